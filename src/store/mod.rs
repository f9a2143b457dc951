//! Repository layer: one module per aggregate, each a thin wrapper over
//! a `PgPool` behind a trait so engine components can be tested against
//! in-memory fakes. See `SPEC_FULL.md` §4.A.

pub mod admin;
pub mod changeover;
pub mod job_styles;
pub mod orders;
pub mod outbox;
pub mod payloads;
pub mod reporting_points;

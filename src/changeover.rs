//! Changeover state machine. See `spec.md` §4.I.
//!
//! One mutex-guarded instance per production line; operations on
//! different lines never contend. The cycle itself lives on
//! `edge_types::ChangeoverState::next`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use edge_types::{ChangeoverState, EdgeEvent};
use tracing::info;

use crate::bus::EventBus;
use crate::store::changeover::{ChangeoverStore, ChangeoverStoreError};

#[derive(Debug, thiserror::Error)]
pub enum ChangeoverError {
    #[error("changeover already active on line {0}")]
    AlreadyActive(i64),
    #[error("changeover not active on line {0}")]
    NotActive(i64),
    #[error(transparent)]
    Store(#[from] ChangeoverStoreError),
}

fn state_str(state: ChangeoverState) -> &'static str {
    match state {
        ChangeoverState::Running => "running",
        ChangeoverState::Stopping => "stopping",
        ChangeoverState::CountingOut => "counting_out",
        ChangeoverState::Storing => "storing",
        ChangeoverState::Delivering => "delivering",
        ChangeoverState::CountingIn => "counting_in",
        ChangeoverState::Ready => "ready",
    }
}

#[derive(Debug, Clone)]
struct Instance {
    state: ChangeoverState,
    active: bool,
    from_style: Option<i64>,
    to_style: Option<i64>,
}

impl Default for Instance {
    fn default() -> Self {
        Self { state: ChangeoverState::Running, active: false, from_style: None, to_style: None }
    }
}

pub struct ChangeoverManager {
    store: Arc<dyn ChangeoverStore>,
    bus: Arc<EventBus>,
    lines: RwLock<HashMap<i64, Arc<Mutex<Instance>>>>,
}

impl ChangeoverManager {
    pub fn new(store: Arc<dyn ChangeoverStore>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { store, bus, lines: RwLock::new(HashMap::new()) })
    }

    fn line(&self, line_id: i64) -> Arc<Mutex<Instance>> {
        if let Some(existing) = self.lines.read().expect("changeover lock poisoned").get(&line_id) {
            return existing.clone();
        }
        let mut guard = self.lines.write().expect("changeover lock poisoned");
        guard.entry(line_id).or_insert_with(|| Arc::new(Mutex::new(Instance::default()))).clone()
    }

    pub async fn start(
        &self,
        line_id: i64,
        from_style: Option<i64>,
        to_style: Option<i64>,
        operator: Option<&str>,
    ) -> Result<(), ChangeoverError> {
        let instance = self.line(line_id);
        {
            let mut guard = instance.lock().expect("changeover instance lock poisoned");
            if guard.active {
                return Err(ChangeoverError::AlreadyActive(line_id));
            }
            guard.active = true;
            guard.from_style = from_style;
            guard.to_style = to_style;
            guard.state = ChangeoverState::Stopping;
        }

        self.store.append(line_id, state_str(ChangeoverState::Stopping), "changeover started", operator).await?;
        self.bus.emit(EdgeEvent::ChangeoverStarted { line_id, from_style, to_style, at: chrono::Utc::now() });
        self.bus.emit(EdgeEvent::ChangeoverStateChanged {
            line_id,
            state: ChangeoverState::Stopping,
            at: chrono::Utc::now(),
        });
        info!(line_id, "changeover started");
        Ok(())
    }

    pub async fn advance(&self, line_id: i64, operator: Option<&str>) -> Result<(), ChangeoverError> {
        let instance = self.line(line_id);
        let (next, completed) = {
            let mut guard = instance.lock().expect("changeover instance lock poisoned");
            if !guard.active {
                return Err(ChangeoverError::NotActive(line_id));
            }
            let next = guard.state.next();
            guard.state = next;
            let completed = next == ChangeoverState::Running;
            if completed {
                guard.active = false;
            }
            (next, completed)
        };

        self.store.append(line_id, state_str(next), "changeover advanced", operator).await?;
        self.bus.emit(EdgeEvent::ChangeoverStateChanged { line_id, state: next, at: chrono::Utc::now() });
        if completed {
            self.bus.emit(EdgeEvent::ChangeoverCompleted { line_id, at: chrono::Utc::now() });
        }
        Ok(())
    }

    pub async fn cancel(&self, line_id: i64, operator: Option<&str>) -> Result<(), ChangeoverError> {
        let instance = self.line(line_id);
        {
            let mut guard = instance.lock().expect("changeover instance lock poisoned");
            if !guard.active {
                return Err(ChangeoverError::NotActive(line_id));
            }
            guard.state = ChangeoverState::Running;
            guard.active = false;
        }
        self.store.append(line_id, state_str(ChangeoverState::Running), "changeover cancelled", operator).await?;
        self.bus.emit(EdgeEvent::ChangeoverCompleted { line_id, at: chrono::Utc::now() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeChangeoverStore {
        entries: StdMutex<Vec<(i64, String, String)>>,
    }

    #[async_trait::async_trait]
    impl ChangeoverStore for FakeChangeoverStore {
        async fn append(
            &self,
            line_id: i64,
            state: &str,
            detail: &str,
            _operator: Option<&str>,
        ) -> Result<(), ChangeoverStoreError> {
            self.entries.lock().unwrap().push((line_id, state.to_string(), detail.to_string()));
            Ok(())
        }
    }

    fn manager() -> Arc<ChangeoverManager> {
        let store = Arc::new(FakeChangeoverStore { entries: StdMutex::new(Vec::new()) });
        let bus = Arc::new(EventBus::new());
        ChangeoverManager::new(store, bus)
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let mgr = manager();
        mgr.start(1, Some(10), Some(20), Some("op1")).await.unwrap();
        assert!(matches!(mgr.start(1, Some(10), Some(20), Some("op1")).await, Err(ChangeoverError::AlreadyActive(1))));
    }

    #[tokio::test]
    async fn seven_advances_return_to_running_and_deactivate() {
        let mgr = manager();
        mgr.start(1, None, None, None).await.unwrap();
        for _ in 0..6 {
            mgr.advance(1, None).await.unwrap();
        }
        // one more advance (7th overall) returns to running
        mgr.advance(1, None).await.unwrap();
        assert!(matches!(mgr.advance(1, None).await, Err(ChangeoverError::NotActive(1))));
    }

    #[tokio::test]
    async fn advancing_inactive_line_is_rejected() {
        let mgr = manager();
        assert!(matches!(mgr.advance(99, None).await, Err(ChangeoverError::NotActive(99))));
    }

    #[tokio::test]
    async fn cancel_resets_to_running() {
        let mgr = manager();
        mgr.start(1, None, None, None).await.unwrap();
        mgr.advance(1, None).await.unwrap();
        mgr.cancel(1, Some("op1")).await.unwrap();
        assert!(matches!(mgr.advance(1, None).await, Err(ChangeoverError::NotActive(1))));
    }
}

//! In-memory cache of per-PLC tag values.
//!
//! Reader-writer lock on the outer map; the inner tag map for a PLC is
//! replaced atomically on each poll tick / stream update rather than
//! mutated field-by-field, so readers never see a half-updated PLC.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct TagEntry {
    pub value: TagValue,
    pub type_name: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PlcState {
    pub connected: bool,
    pub error: Option<String>,
    pub tags: HashMap<String, TagEntry>,
}

#[derive(Debug, Default)]
pub struct GatewayCache {
    plcs: RwLock<HashMap<String, PlcState>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("PLC {0} not tracked")]
    NotFound(String),
    #[error("tag {0} error: {1}")]
    TagError(String, String),
}

impl GatewayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a PLC's entire tag map atomically.
    pub fn replace_tags(&self, plc: &str, tags: HashMap<String, TagEntry>) {
        let mut guard = self.plcs.write().expect("gateway cache lock poisoned");
        let entry = guard.entry(plc.to_string()).or_default();
        entry.tags = tags;
    }

    pub fn set_connected(&self, plc: &str, connected: bool, error: Option<String>) -> bool {
        let mut guard = self.plcs.write().expect("gateway cache lock poisoned");
        let entry = guard.entry(plc.to_string()).or_default();
        let was_connected = entry.connected;
        entry.connected = connected;
        entry.error = error;
        was_connected != connected
    }

    pub fn disconnect_all(&self) -> Vec<String> {
        let mut guard = self.plcs.write().expect("gateway cache lock poisoned");
        let mut transitioned = Vec::new();
        for (name, state) in guard.iter_mut() {
            if state.connected {
                transitioned.push(name.clone());
            }
            state.connected = false;
        }
        transitioned
    }

    pub fn is_connected(&self, plc: &str) -> bool {
        self.plcs
            .read()
            .expect("gateway cache lock poisoned")
            .get(plc)
            .map(|s| s.connected)
            .unwrap_or(false)
    }

    pub fn read_tag(&self, plc: &str, tag: &str) -> Result<TagValue, ReadError> {
        let guard = self.plcs.read().expect("gateway cache lock poisoned");
        let state = guard
            .get(plc)
            .ok_or_else(|| ReadError::NotFound(plc.to_string()))?;
        let entry = state
            .tags
            .get(tag)
            .ok_or_else(|| ReadError::NotFound(tag.to_string()))?;
        if let Some(err) = &entry.error {
            return Err(ReadError::TagError(tag.to_string(), err.clone()));
        }
        Ok(entry.value.clone())
    }

    pub fn tracked_plcs(&self) -> Vec<String> {
        self.plcs
            .read()
            .expect("gateway cache lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of a PLC's current tag map, empty if the PLC isn't tracked yet.
    pub fn plc_tags(&self, plc: &str) -> HashMap<String, TagEntry> {
        self.plcs
            .read()
            .expect("gateway cache lock poisoned")
            .get(plc)
            .map(|s| s.tags.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_connected_reports_transition_only_on_change() {
        let cache = GatewayCache::new();
        assert!(cache.set_connected("plc1", true, None));
        assert!(!cache.set_connected("plc1", true, None));
        assert!(cache.set_connected("plc1", false, Some("timeout".into())));
    }

    #[test]
    fn read_tag_missing_plc_errors() {
        let cache = GatewayCache::new();
        assert!(matches!(
            cache.read_tag("nope", "t1"),
            Err(ReadError::NotFound(_))
        ));
    }

    #[test]
    fn disconnect_all_marks_every_tracked_plc() {
        let cache = GatewayCache::new();
        cache.set_connected("plc1", true, None);
        cache.set_connected("plc2", true, None);
        let transitioned = cache.disconnect_all();
        assert_eq!(transitioned.len(), 2);
        assert!(!cache.is_connected("plc1"));
        assert!(!cache.is_connected("plc2"));
    }
}

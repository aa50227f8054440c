use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Agents with a stream currently in flight.
///
/// An id is added when a stream starts and removed when the guard returned
/// by [`StreamingAgents::start`] is dropped, whether the stream completed or
/// failed. Overlapping streams for the same agent are counted.
#[derive(Debug, Clone, Default)]
pub struct StreamingAgents {
    active: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl StreamingAgents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `agent_id` as streaming until the guard is dropped.
    pub fn start(&self, agent_id: &str) -> StreamingGuard {
        *self.lock().entry(agent_id.to_string()).or_insert(0) += 1;
        StreamingGuard {
            active: self.active.clone(),
            agent_id: agent_id.to_string(),
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.lock().contains_key(agent_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted ids of agents currently streaming.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, usize>> {
        lock_active(&self.active)
    }
}

// The map is consistent after every single statement, so a poisoned lock is
// still safe to use.
fn lock_active(active: &Mutex<BTreeMap<String, usize>>) -> MutexGuard<'_, BTreeMap<String, usize>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes its agent from the streaming set on drop.
#[derive(Debug)]
pub struct StreamingGuard {
    active: Arc<Mutex<BTreeMap<String, usize>>>,
    agent_id: String,
}

impl Drop for StreamingGuard {
    fn drop(&mut self) {
        let mut active = lock_active(&self.active);
        if let Some(count) = active.get_mut(&self.agent_id) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.agent_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_adds_and_removes() {
        let streaming = StreamingAgents::new();
        assert!(streaming.is_empty());

        let guard = streaming.start("agent-1");
        assert!(streaming.contains("agent-1"));
        assert_eq!(streaming.snapshot(), vec!["agent-1"]);

        drop(guard);
        assert!(!streaming.contains("agent-1"));
        assert!(streaming.is_empty());
    }

    #[test]
    fn test_overlapping_streams_for_same_agent() {
        let streaming = StreamingAgents::new();
        let first = streaming.start("a");
        let second = streaming.start("a");
        let _other = streaming.start("b");

        drop(first);
        assert!(streaming.contains("a"));
        drop(second);
        assert!(!streaming.contains("a"));
        assert_eq!(streaming.snapshot(), vec!["b"]);
    }

    #[test]
    fn test_clones_share_state() {
        let streaming = StreamingAgents::new();
        let view = streaming.clone();
        let _guard = streaming.start("x");
        assert!(view.contains("x"));
    }
}

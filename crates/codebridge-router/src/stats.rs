//! Best-effort per-tool call statistics.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolCounters {
    pub successes: u64,
    pub failures: u64,
    pub total_elapsed_ms: u64,
}

impl ToolCounters {
    pub fn calls(&self) -> u64 {
        self.successes + self.failures
    }
}

/// Counters keyed by tool name. A poisoned lock skips the update; recording
/// never fails a call.
#[derive(Debug, Default)]
pub struct ToolStats {
    counters: Mutex<HashMap<String, ToolCounters>>,
}

impl ToolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tool_name: &str, success: bool, elapsed_ms: u64) {
        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        let entry = counters.entry(tool_name.to_string()).or_default();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        entry.total_elapsed_ms = entry.total_elapsed_ms.saturating_add(elapsed_ms);
    }

    pub fn get(&self, tool_name: &str) -> Option<ToolCounters> {
        self.counters.lock().ok()?.get(tool_name).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, ToolCounters> {
        self.counters
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record() {
        let stats = ToolStats::new();
        stats.record("a", true, 5);
        stats.record("a", false, 7);
        stats.record("b", false, 1);
        let a = stats.get("a").unwrap();
        assert_eq!((a.successes, a.failures, a.calls(), a.total_elapsed_ms), (1, 1, 2, 12));
        assert_eq!(stats.get("b").unwrap().successes, 0);
        assert!(stats.get("c").is_none());
    }

    #[test]
    fn test_poisoned_lock_is_skipped() {
        let stats = Arc::new(ToolStats::new());
        let s2 = Arc::clone(&stats);
        let _ = std::thread::spawn(move || {
            let _guard = s2.counters.lock().unwrap();
            panic!("poison");
        })
        .join();
        stats.record("a", true, 1);
        assert!(stats.get("a").is_none());
        assert!(stats.snapshot().is_empty());
    }
}

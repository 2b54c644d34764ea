use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::http::Status;

/// A monotonically increasing counter, incremented atomically.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Process-wide counters for the file-serving pipeline.
///
/// Initialized once at startup and shared for the process lifetime; values
/// are discarded at exit. Updates are lock-free atomic increments with no
/// ordering guarantee relative to snapshot reads.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    /// Total number of file-serving pipeline calls.
    pub fs_calls: Counter,
    pub fs_ok_responses: Counter,
    pub fs_not_modified_responses: Counter,
    pub fs_not_found_responses: Counter,
    pub fs_other_responses: Counter,
    /// Total size in bytes of 200 response bodies served.
    pub fs_response_body_bytes: Counter,
}

/// A point-in-time copy of the counter values.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    #[serde(rename = "fsCalls")]
    pub fs_calls: u64,
    #[serde(rename = "fsOKResponses")]
    pub fs_ok_responses: u64,
    #[serde(rename = "fsNotModifiedResponses")]
    pub fs_not_modified_responses: u64,
    #[serde(rename = "fsNotFoundResponses")]
    pub fs_not_found_responses: u64,
    #[serde(rename = "fsOtherResponses")]
    pub fs_other_responses: u64,
    #[serde(rename = "fsResponseBodyBytes")]
    pub fs_response_body_bytes: u64,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one file-serving request. Never blocks, never
    /// fails.
    pub fn record(&self, status: Status, body_bytes: u64) {
        self.fs_calls.add(1);
        match status {
            Status::Ok => {
                self.fs_ok_responses.add(1);
                self.fs_response_body_bytes.add(body_bytes);
            }
            Status::NotModified => self.fs_not_modified_responses.add(1),
            Status::NotFound => self.fs_not_found_responses.add(1),
            _ => self.fs_other_responses.add(1),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fs_calls: self.fs_calls.value(),
            fs_ok_responses: self.fs_ok_responses.value(),
            fs_not_modified_responses: self.fs_not_modified_responses.value(),
            fs_not_found_responses: self.fs_not_found_responses.value(),
            fs_other_responses: self.fs_other_responses.value(),
            fs_response_body_bytes: self.fs_response_body_bytes.value(),
        }
    }

    /// JSON rendering of the counters, optionally keeping only names that
    /// contain `filter` (the `/stats?r=` query).
    pub fn to_json(&self, filter: Option<&str>) -> String {
        let snapshot = self.snapshot();
        let value = serde_json::to_value(&snapshot).unwrap_or_default();

        let mut map: BTreeMap<String, u64> = BTreeMap::new();
        if let serde_json::Value::Object(fields) = value {
            for (name, v) in fields {
                if let Some(filter) = filter {
                    if !name.contains(filter) {
                        continue;
                    }
                }
                map.insert(name, v.as_u64().unwrap_or(0));
            }
        }

        serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_outcomes() {
        let stats = StatsRegistry::new();
        stats.record(Status::Ok, 1000);
        stats.record(Status::NotModified, 0);
        stats.record(Status::NotFound, 0);
        stats.record(Status::Forbidden, 0);
        // Partial responses count as "other" and contribute no body bytes.
        stats.record(Status::PartialContent, 100);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.fs_calls, 5);
        assert_eq!(snapshot.fs_ok_responses, 1);
        assert_eq!(snapshot.fs_response_body_bytes, 1000);
        assert_eq!(snapshot.fs_not_modified_responses, 1);
        assert_eq!(snapshot.fs_not_found_responses, 1);
        assert_eq!(snapshot.fs_other_responses, 2);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(StatsRegistry::new());
        let threads = 8;
        let per_thread = 1000;

        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            let stats = stats.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..per_thread {
                    stats.record(Status::Ok, 10);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.fs_calls, (threads * per_thread) as u64);
        assert_eq!(snapshot.fs_ok_responses, (threads * per_thread) as u64);
        assert_eq!(
            snapshot.fs_response_body_bytes,
            (threads * per_thread * 10) as u64
        );
    }

    #[test]
    fn test_json_filter() {
        let stats = StatsRegistry::new();
        stats.record(Status::Ok, 42);

        let all = stats.to_json(None);
        assert!(all.contains("fsCalls"));
        assert!(all.contains("fsResponseBodyBytes"));

        let filtered = stats.to_json(Some("OK"));
        assert!(filtered.contains("fsOKResponses"));
        assert!(!filtered.contains("fsCalls"));
    }
}

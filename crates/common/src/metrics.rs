use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to decode metrics of {uid}: {source}")]
    Decode {
        uid: String,
        source: serde_json::Error,
    },
}

/// Destination for raw metric snapshots collected from the cluster
pub trait MetricsSink: Send + Sync {
    fn append(&self, uid: &str, data: &[u8]) -> Result<(), MetricsError>;
}

/// Keeps the decoded snapshot of every entity in memory
#[derive(Debug, Default)]
pub struct RawMetrics {
    rows: Mutex<BTreeMap<String, Value>>,
}

impl RawMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uids(&self) -> Vec<String> {
        self.rows.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Integer at `pointer` (RFC 6901, e.g. `/p2p/InboundTraffic/Overall`)
    pub fn get_int(&self, uid: &str, pointer: &str) -> Option<i64> {
        self.rows.lock().get(uid)?.pointer(pointer)?.as_i64()
    }

    /// Sum of the integer at `pointer` over every entity that reports it
    pub fn sum(&self, pointer: &str) -> i64 {
        self.rows
            .lock()
            .values()
            .filter_map(|row| row.pointer(pointer)?.as_i64())
            .sum()
    }

    /// All snapshots keyed by entity
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.rows
                .lock()
                .iter()
                .map(|(uid, row)| (uid.clone(), row.clone()))
                .collect(),
        )
    }
}

impl MetricsSink for RawMetrics {
    fn append(&self, uid: &str, data: &[u8]) -> Result<(), MetricsError> {
        let row = serde_json::from_slice(data).map_err(|source| MetricsError::Decode {
            uid: uid.to_string(),
            source,
        })?;
        self.rows.lock().insert(uid.to_string(), row);
        Ok(())
    }
}

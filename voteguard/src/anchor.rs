use crate::*;
use std::sync::Mutex;
use uuid::Uuid;

/// An external immutable record that accepts Merkle roots. The sink owns its
/// own timeout; the engine never retries a failed anchor and never blocks
/// vote submission on one.
pub trait AnchorSink: Send + Sync {
    fn anchor(&self, root: &Hash32) -> Result<String, Error>;
}

/// A published root and the external reference the sink returned for it.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnchorRecord {
    pub ballot_id: Uuid,
    pub root: Hash32,
    pub external_ref: String,
    pub anchored_at: i64,
}

/// In-memory sink for tests and demos.
#[derive(Default)]
pub struct MemAnchorSink {
    anchored: Mutex<Vec<Hash32>>,
}

impl MemAnchorSink {
    pub fn new() -> Self {
        MemAnchorSink::default()
    }

    pub fn anchored(&self) -> Vec<Hash32> {
        self.anchored.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl AnchorSink for MemAnchorSink {
    fn anchor(&self, root: &Hash32) -> Result<String, Error> {
        let mut anchored = self
            .anchored
            .lock()
            .map_err(|_| Error::StoreUnavailable("anchor sink lock poisoned".to_string()))?;
        anchored.push(*root);
        Ok(format!("mem-anchor-{}", anchored.len() - 1))
    }
}

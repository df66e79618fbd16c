// ── Metamemory: Snapshot Persistence ────────────────────────────────────────
// JSON files holding a `MetamemorySnapshot`. Writes go to a sibling temp
// file first and are renamed into place so a crash never leaves half a file.

use crate::atoms::error::EngineResult;
use crate::atoms::memory_types::{MetamemorySnapshot, ThreadState};
use log::info;
use std::collections::BTreeMap;
use std::path::Path;

pub fn save_snapshot(path: impl AsRef<Path>, snapshot: &MetamemorySnapshot) -> EngineResult<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    info!(
        "[metamemory] Saved snapshot: {} topics, {} tagged messages → {}",
        snapshot.topics.len(),
        snapshot.tagged_messages.len(),
        path.display()
    );
    Ok(())
}

pub fn load_snapshot(path: impl AsRef<Path>) -> EngineResult<MetamemorySnapshot> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Counts for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotStats {
    pub topics_by_state: BTreeMap<&'static str, usize>,
    pub tagged_messages: usize,
    pub compaction_records: usize,
    pub last_processed_index: usize,
}

pub fn snapshot_stats(snapshot: &MetamemorySnapshot) -> SnapshotStats {
    let mut topics_by_state: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in snapshot.topics.values() {
        *topics_by_state.entry(record.kind.as_str()).or_default() += 1;
    }
    SnapshotStats {
        topics_by_state,
        tagged_messages: snapshot.tagged_messages.len(),
        compaction_records: snapshot.compactions.values().map(|v| v.len()).sum(),
        last_processed_index: snapshot.last_processed_index,
    }
}

/// Names of archived topics, in key order.
pub fn archived_topics(snapshot: &MetamemorySnapshot) -> Vec<&str> {
    snapshot
        .topics
        .iter()
        .filter(|(_, r)| r.kind == ThreadState::Archived)
        .map(|(name, _)| name.as_str())
        .collect()
}

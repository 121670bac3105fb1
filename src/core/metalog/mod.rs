// src/core/metalog/mod.rs

//! The master's durable write-ahead log of entity state (operations,
//! connection records, balance plans), re-read on startup, plus the
//! commit-log fragment naming scheme range servers use for their own
//! mutation logs.

pub mod log_class;

use crate::core::errors::{MasterError, MasterResult};
use crate::core::operation::types::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A versioned, persisted record: every non-ephemeral operation and every
/// connection record is one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalogEntity {
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub payload: Vec<u8>,
    pub tombstone: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Operation,
    ServerConnection,
    BalancePlan,
}

/// Appends entity batches to a single append-only file, length-prefixed
/// bincode records. Atomic per-batch: a batch is serialized into memory,
/// then written and flushed in one `write_all` call, so a crash mid-batch
/// never leaves a half-written record for the reader to choke on.
pub struct MetalogWriter {
    file: Mutex<std::fs::File>,
}

impl MetalogWriter {
    pub fn open(path: impl AsRef<Path>) -> MasterResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(MetalogWriter { file: Mutex::new(file) })
    }

    /// Appends a batch atomically; entities marked `tombstone` are
    /// persisted as removals in the same batch as live updates.
    pub fn record_state(&self, entities: &[MetalogEntity]) -> MasterResult<()> {
        self.append_batch(entities)
    }

    /// Writes a batch of tombstones for already-retired entities.
    pub fn record_removal(&self, entities: &[MetalogEntity]) -> MasterResult<()> {
        let tombstoned: Vec<MetalogEntity> = entities
            .iter()
            .cloned()
            .map(|mut e| {
                e.tombstone = true;
                e
            })
            .collect();
        self.append_batch(&tombstoned)
    }

    fn append_batch(&self, entities: &[MetalogEntity]) -> MasterResult<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(entities.len() as u32).to_le_bytes());
        for entity in entities {
            let encoded = bincode::serde::encode_to_vec(entity, bincode::config::standard())
                .map_err(|e| MasterError::MetalogReplayFailed(format!("{:?}", entity.entity_id), e.to_string()))?;
            buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            buf.extend_from_slice(&encoded);
        }
        let mut file = self.file.lock().unwrap();
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }
}

/// Replays a metalog file, applying tombstones over earlier live records,
/// and returns the surviving entities in first-insertion order — the
/// order the processor re-adds them to the graph as if freshly submitted.
pub fn replay(path: impl AsRef<Path>) -> MasterResult<Vec<MetalogEntity>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    let mut order: Vec<u64> = Vec::new();
    let mut live: HashMap<u64, MetalogEntity> = HashMap::new();

    loop {
        let mut count_buf = [0u8; 4];
        match reader.read_exact(&mut count_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let count = u32::from_le_bytes(count_buf);
        for _ in 0..count {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            let (entity, _): (MetalogEntity, usize) =
                bincode::serde::decode_from_slice(&body, bincode::config::standard())
                    .map_err(|e| MasterError::MetalogReplayFailed(path.display().to_string(), e.to_string()))?;
            if entity.tombstone {
                live.remove(&entity.entity_id);
            } else {
                if !live.contains_key(&entity.entity_id) {
                    order.push(entity.entity_id);
                }
                live.insert(entity.entity_id, entity);
            }
        }
    }

    Ok(order.into_iter().filter_map(|id| live.remove(&id)).collect())
}

pub fn encode_operation(op: &Operation) -> MasterResult<MetalogEntity> {
    let payload = bincode::serde::encode_to_vec(op, bincode::config::standard())
        .map_err(|e| MasterError::MetalogReplayFailed(op.id.to_string(), e.to_string()))?;
    Ok(MetalogEntity {
        entity_type: EntityType::Operation,
        entity_id: op.id,
        payload,
        tombstone: false,
    })
}

pub fn decode_operation(entity: &MetalogEntity) -> MasterResult<Operation> {
    let (op, _): (Operation, usize) =
        bincode::serde::decode_from_slice(&entity.payload, bincode::config::standard())
            .map_err(|e| MasterError::MetalogReplayFailed(entity.entity_id.to_string(), e.to_string()))?;
    Ok(op)
}

pub fn default_metalog_path(root: impl AsRef<Path>) -> PathBuf {
    root.as_ref().join("mml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operation::types::OperationType;
    use tempfile::tempdir;

    #[test]
    fn replay_of_insert_insert_remove_yields_only_the_survivor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mml");
        let writer = MetalogWriter::open(&path).unwrap();

        let a = encode_operation(&Operation::new(1, OperationType::CreateTable)).unwrap();
        let b = encode_operation(&Operation::new(2, OperationType::DropTable)).unwrap();
        writer.record_state(&[a.clone()]).unwrap();
        writer.record_state(&[b.clone()]).unwrap();
        writer.record_removal(&[a]).unwrap();

        let survivors = replay(&path).unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].entity_id, 2);
    }

    #[test]
    fn replay_of_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let survivors = replay(dir.path().join("does-not-exist")).unwrap();
        assert!(survivors.is_empty());
    }
}

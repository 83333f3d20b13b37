//! Structured per-instance log sink.
//!
//! Authoring and data problems found while evaluating a graph are collected here (and
//! forwarded to the `log` facade) instead of interrupting evaluation.

use serde::{Deserialize, Serialize};

use crate::ids::NodeIndex;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Message,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphLogEntry {
    pub node_idx: NodeIndex,
    pub update_id: u32,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct GraphLog {
    entries: Vec<GraphLogEntry>,
}

impl GraphLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node_idx: NodeIndex, update_id: u32, severity: Severity, message: String) {
        match severity {
            Severity::Message => log::debug!("[node {node_idx} @ update {update_id}] {message}"),
            Severity::Warning => log::warn!("[node {node_idx} @ update {update_id}] {message}"),
            Severity::Error => log::error!("[node {node_idx} @ update {update_id}] {message}"),
        }
        self.entries.push(GraphLogEntry {
            node_idx,
            update_id,
            severity,
            message,
        });
    }

    pub fn warn(&mut self, node_idx: NodeIndex, update_id: u32, message: String) {
        self.push(node_idx, update_id, Severity::Warning, message);
    }

    pub fn error(&mut self, node_idx: NodeIndex, update_id: u32, message: String) {
        self.push(node_idx, update_id, Severity::Error, message);
    }

    pub fn entries(&self) -> &[GraphLogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = GraphLogEntry> + '_ {
        self.entries.drain(..)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_severity_and_drain_empties_the_log() {
        let mut log = GraphLog::new();
        log.warn(3, 1, "missing bone mask".to_owned());
        log.error(4, 1, "bad value".to_owned());
        log.push(5, 2, Severity::Message, "note".to_owned());
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[1].severity, Severity::Error);
        assert_eq!(log.entries()[1].node_idx, 4);

        let drained: Vec<_> = log.drain().collect();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[2].update_id, 2);
        assert!(log.is_empty());
    }
}

//! Load-time errors for graph resources.
//!
//! Contract violations during evaluation (bad indices, type mismatches on typed access,
//! capacity overflows) are assertions, not errors. Everything here comes from data that
//! was authored or serialized outside the runtime.

use thiserror::Error;

use crate::ids::{NodeIndex, StringId};
use crate::value::GraphValueType;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GraphError {
    #[error("graph definition has no nodes")]
    EmptyGraph,

    #[error("node stored at position {position} declares index {declared}")]
    NodeIndexMismatch { position: usize, declared: NodeIndex },

    #[error("graph has {count} nodes, more than an i16 node index can address")]
    TooManyNodes { count: usize },

    #[error("node {node}: pin '{pin}' references node {target}, which does not exist")]
    InvalidPin {
        node: NodeIndex,
        pin: &'static str,
        target: NodeIndex,
    },

    #[error("node {node}: required pin '{pin}' is not connected")]
    DisconnectedPin { node: NodeIndex, pin: &'static str },

    #[error("node {node}: pin '{pin}' expects {expected:?} but node {target} outputs {actual:?}")]
    PinTypeMismatch {
        node: NodeIndex,
        pin: &'static str,
        target: NodeIndex,
        expected: GraphValueType,
        actual: GraphValueType,
    },

    #[error("root node {node} is not a pose node")]
    RootNotPose { node: NodeIndex },

    #[error("node {node}: {reason}")]
    InvalidNodeSettings { node: NodeIndex, reason: String },

    #[error("control parameter {id} is declared more than once")]
    DuplicateControlParameter { id: StringId },

    #[error("external graph slot {id} is declared more than once")]
    DuplicateExternalSlot { id: StringId },

    #[error("node {node}: clip index {clip_idx} is outside the data set ({available} clips)")]
    InvalidClipIndex {
        node: NodeIndex,
        clip_idx: u16,
        available: usize,
    },

    #[error("node {node}: sub-graph index {graph_idx} is outside the data set ({available} graphs)")]
    InvalidSubGraphIndex {
        node: NodeIndex,
        graph_idx: u16,
        available: usize,
    },

    #[error("sub-graph {graph} uses skeleton {actual}, parent uses {expected}")]
    SkeletonMismatch {
        graph: StringId,
        expected: StringId,
        actual: StringId,
    },

    #[error("invalid skeleton: {0}")]
    InvalidSkeleton(String),

    #[error("invalid animation clip {clip}: {reason}")]
    InvalidClip { clip: StringId, reason: String },

    #[error("unknown external graph slot {0}")]
    UnknownExternalSlot(StringId),

    #[error("external graph slot {0} already has a graph attached")]
    ExternalSlotOccupied(StringId),

    #[error("corrupt bone mask task archive: {0}")]
    CorruptArchive(String),

    #[error("graph json: {0}")]
    Json(#[from] serde_json::Error),
}

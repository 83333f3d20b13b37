//! Vizij Anim Graph Core (engine-agnostic)
//!
//! Runtime evaluator for skeletal animation graphs. A [`GraphDefinition`] describes the nodes,
//! a [`GraphDataSet`] binds it to a skeleton and clips, and a [`GraphInstance`] holds the
//! per-character state. Each update produces a list of pose [`Task`]s, a root motion delta
//! and a buffer of weighted [`SampledEvent`]s; executing the tasks yields the final pose.

pub mod bit_archive;
pub mod bone_mask;
pub mod clip;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod graph_log;
pub mod ids;
pub mod instance;
pub mod math;
mod nodes;
pub mod sampled_events;
pub mod skeleton;
pub mod sync_track;
pub mod tasks;
pub mod value;

// Re-exports for consumers (engine adapters)
pub use bit_archive::{BitArchive, BoneMaskTaskArchive};
pub use bone_mask::{BoneMask, BoneMaskPool, BoneMaskTaskList, BoneMaskTaskType};
pub use clip::{AnimationClip, AnimationClipDescriptor, AnimationEvent, BoneTrack};
pub use config::GraphInstanceConfig;
pub use context::{BranchState, GraphContext, GraphLayerContext, PhysicsWorld, RayCastHit};
pub use definition::{
    GraphDataSet, GraphDefinition, GraphDefinitionDescriptor, GraphVariation, NodeDefinition, NodeKind,
};
pub use error::GraphError;
pub use graph_log::{GraphLog, GraphLogEntry, Severity};
pub use ids::{NodeIndex, StringId, INVALID_INDEX};
pub use instance::GraphInstance;
pub use math::{Percentage, Transform};
pub use nodes::{GraphNode, PoseNodeDebugInfo, PoseNodeResult, PoseNodeTime};
pub use sampled_events::{GraphEventType, SampledEvent, SampledEventData, SampledEventRange, SampledEventsBuffer};
pub use skeleton::{BoneMaskDefinition, BoneWeight, Pose, Skeleton, SkeletonDescriptor};
pub use sync_track::{SyncTrack, SyncTrackEvent, SyncTrackTime, SyncTrackTimeRange};
pub use tasks::{Task, TaskIndex, TaskSystem};
pub use value::{GraphValue, GraphValueKind, GraphValueType, Target};

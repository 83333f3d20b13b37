//! Sizing hints for graph instances.

use serde::{Deserialize, Serialize};

/// Capacity hints applied when an instance is constructed.
///
/// These only pre-size buffers so that steady-state updates do not allocate. Hard limits
/// (bone mask pool slots, mask task count, pose task indices) are constants of their modules.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphInstanceConfig {
    /// Initial capacity of the per-update sampled events buffer.
    pub sampled_events_capacity: usize,
    /// Initial capacity of the pose task list (and its pose buffers).
    pub pose_task_capacity: usize,
    /// Bone mask pool slots allocated up front.
    pub bone_mask_pool_slots: usize,
    /// Record the list of nodes touched by the last update.
    pub record_active_nodes: bool,
}

impl Default for GraphInstanceConfig {
    fn default() -> Self {
        Self {
            sampled_events_capacity: 64,
            pose_task_capacity: 16,
            bone_mask_pool_slots: 4,
            record_active_nodes: cfg!(debug_assertions),
        }
    }
}

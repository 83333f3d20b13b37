//! Per-update evaluation context threaded through every node call.

use glam::Vec3;

use crate::graph_log::GraphLog;
use crate::ids::NodeIndex;
use crate::math::Transform;
use crate::sampled_events::SampledEventsBuffer;
use crate::skeleton::Skeleton;
use crate::tasks::TaskSystem;

/// Whether the sub-tree being evaluated is the one the graph will commit to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BranchState {
    #[default]
    Active,
    Inactive,
}

/// Set while a layer of a layer blend is being evaluated.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GraphLayerContext {
    pub is_currently_in_layer: bool,
    /// Scaled by state machines inside the layer.
    pub layer_weight: f32,
}

impl Default for GraphLayerContext {
    fn default() -> Self {
        Self {
            is_currently_in_layer: false,
            layer_weight: 1.0,
        }
    }
}

impl GraphLayerContext {
    pub fn begin_layer(&mut self) {
        self.is_currently_in_layer = true;
        self.layer_weight = 1.0;
    }

    pub fn end_layer(&mut self) {
        *self = GraphLayerContext::default();
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayCastHit {
    pub position: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Physics scene queried by gameplay-facing nodes. Synchronization is the implementor's job.
pub trait PhysicsWorld {
    fn ray_cast(&self, start: Vec3, end: Vec3) -> Option<RayCastHit>;
}

pub struct GraphContext<'a> {
    pub graph_user_id: u64,
    pub skeleton: &'a Skeleton,
    pub task_system: &'a mut TaskSystem,
    pub sampled_events: &'a mut SampledEventsBuffer,
    pub log: &'a mut GraphLog,
    pub(crate) active_nodes: Option<&'a mut Vec<NodeIndex>>,

    pub delta_time: f32,
    pub world_transform: Transform,
    pub world_transform_inverse: Transform,
    pub physics_world: Option<&'a dyn PhysicsWorld>,
    pub update_id: u32,
    pub branch_state: BranchState,
    pub layer_context: GraphLayerContext,
}

impl<'a> GraphContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph_user_id: u64,
        skeleton: &'a Skeleton,
        task_system: &'a mut TaskSystem,
        sampled_events: &'a mut SampledEventsBuffer,
        log: &'a mut GraphLog,
        update_id: u32,
        delta_time: f32,
        world_transform: Transform,
        physics_world: Option<&'a dyn PhysicsWorld>,
    ) -> Self {
        Self {
            graph_user_id,
            skeleton,
            task_system,
            sampled_events,
            log,
            active_nodes: None,
            delta_time,
            world_transform,
            world_transform_inverse: world_transform.inverse(),
            physics_world,
            update_id,
            branch_state: BranchState::Active,
            layer_context: GraphLayerContext::default(),
        }
    }

    /// Context for a sub-graph: shares the task system and log, writes events into the
    /// sub-graph's own buffer and uses its update counter.
    pub(crate) fn child<'c>(
        &'c mut self,
        sampled_events: &'c mut SampledEventsBuffer,
        update_id: u32,
    ) -> GraphContext<'c> {
        GraphContext {
            graph_user_id: self.graph_user_id,
            skeleton: self.skeleton,
            task_system: &mut *self.task_system,
            sampled_events,
            log: &mut *self.log,
            active_nodes: None,
            delta_time: self.delta_time,
            world_transform: self.world_transform,
            world_transform_inverse: self.world_transform_inverse,
            physics_world: self.physics_world,
            update_id,
            branch_state: self.branch_state,
            layer_context: self.layer_context,
        }
    }

    #[inline]
    pub fn is_in_active_branch(&self) -> bool {
        self.branch_state == BranchState::Active
    }

    #[inline]
    pub fn is_in_layer(&self) -> bool {
        self.layer_context.is_currently_in_layer
    }

    #[inline]
    pub(crate) fn record_active_node(&mut self, node_idx: NodeIndex) {
        if let Some(active_nodes) = self.active_nodes.as_deref_mut() {
            active_nodes.push(node_idx);
        }
    }

    pub fn log_warning(&mut self, node_idx: NodeIndex, message: String) {
        self.log.warn(node_idx, self.update_id, message);
    }
}

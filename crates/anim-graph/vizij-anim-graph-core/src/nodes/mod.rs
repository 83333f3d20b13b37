//! Runtime nodes.
//!
//! Node settings live in the shared [`GraphDefinition`]; each instance keeps one [`GraphNode`]
//! per definition node with the mutable runtime state. Evaluation goes through a
//! [`NodeArena`], a borrowed view pairing the two, and dispatches on [`NodeKind`].

mod blend_nodes;
mod graph_nodes;
mod pose_nodes;
mod state_machine;
mod value_nodes;

pub(crate) use graph_nodes::SubGraphState;

use crate::context::GraphContext;
use crate::definition::{GraphDataSet, GraphDefinition, NodeKind};
use crate::ids::{NodeIndex, INVALID_INDEX};
use crate::math::{Percentage, Transform};
use crate::sampled_events::SampledEventRange;
use crate::sync_track::{SyncTrack, SyncTrackTime, SyncTrackTimeRange};
use crate::tasks::{Task, TaskIndex, INVALID_TASK_INDEX};
use crate::value::{GraphValue, GraphValueKind, GraphValueType};

use blend_nodes::BlendState;
use state_machine::StateMachineState;

/// Output of a pose node update: a registered task, the root motion it produced and the
/// events it sampled.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PoseNodeResult {
    pub task_idx: TaskIndex,
    pub root_motion_delta: Transform,
    pub sampled_event_range: SampledEventRange,
}

impl PoseNodeResult {
    pub const EMPTY: PoseNodeResult = PoseNodeResult {
        task_idx: INVALID_TASK_INDEX,
        root_motion_delta: Transform::IDENTITY,
        sampled_event_range: SampledEventRange { start_idx: 0, end_idx: 0 },
    };

    /// No pose contribution, with an empty event range at `range`.
    pub fn empty(range: SampledEventRange) -> Self {
        Self {
            sampled_event_range: range,
            ..Self::EMPTY
        }
    }

    #[inline]
    pub fn has_registered_tasks(&self) -> bool {
        self.task_idx != INVALID_TASK_INDEX
    }
}

/// Playback position of a pose node.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PoseNodeTime {
    pub loop_count: i32,
    /// Seconds.
    pub duration: f32,
    pub current_time: Percentage,
    pub previous_time: Percentage,
}

impl PoseNodeTime {
    /// Advance by `delta` of a cycle, counting a loop when the end of the cycle is passed.
    fn advance_looping(&mut self, delta: f32) {
        self.previous_time = self.current_time;
        let next = self.current_time + delta;
        if next.value() >= 1.0 {
            self.loop_count += next.loop_count();
            self.current_time = next.normalized();
        } else {
            self.current_time = next;
        }
    }

    fn cycle_delta(&self, delta_time: f32) -> f32 {
        if self.duration > 0.0 {
            delta_time / self.duration
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
pub struct PoseNodeDebugInfo<'a> {
    pub time: PoseNodeTime,
    pub current_sync_time: SyncTrackTime,
    pub sync_track: &'a SyncTrack,
}

#[derive(Debug)]
pub(crate) enum PoseNodeExtra {
    None,
    Blend(BlendState),
    StateMachine(Box<StateMachineState>),
    SubGraph(SubGraphState),
}

#[derive(Debug)]
pub(crate) struct PoseNodeState {
    pub(crate) time: PoseNodeTime,
    pub(crate) last_result: PoseNodeResult,
    pub(crate) extra: PoseNodeExtra,
}

#[derive(Debug)]
pub(crate) enum NodeState {
    /// Last computed (or externally set) output of a value node.
    Value(GraphValue),
    Pose(PoseNodeState),
}

/// Per-instance runtime state of one node.
#[derive(Debug)]
pub struct GraphNode {
    initialization_count: u16,
    last_update_id: u32,
    pub(crate) state: NodeState,
}

impl GraphNode {
    pub(crate) fn new(kind: &NodeKind, output_type: GraphValueType) -> Self {
        let state = if kind.is_pose_node() {
            let extra = match kind {
                NodeKind::Blend1D { .. } => PoseNodeExtra::Blend(BlendState::default()),
                NodeKind::StateMachine { .. } => PoseNodeExtra::StateMachine(Box::default()),
                NodeKind::ChildGraph { .. } | NodeKind::ExternalGraph { .. } | NodeKind::ReferencedGraph { .. } => {
                    PoseNodeExtra::SubGraph(SubGraphState::default())
                }
                _ => PoseNodeExtra::None,
            };
            NodeState::Pose(PoseNodeState {
                time: PoseNodeTime::default(),
                last_result: PoseNodeResult::EMPTY,
                extra,
            })
        } else {
            let value = match kind {
                NodeKind::ControlParameter { value, .. } | NodeKind::Constant { value } => value.clone(),
                _ => GraphValue::default_for(output_type).unwrap_or(GraphValue::Bool(false)),
            };
            NodeState::Value(value)
        };

        Self {
            initialization_count: 0,
            last_update_id: 0,
            state,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialization_count > 0
    }

    #[inline]
    pub fn initialization_count(&self) -> u16 {
        self.initialization_count
    }

    #[inline]
    pub fn last_update_id(&self) -> u32 {
        self.last_update_id
    }

    #[inline]
    pub fn was_updated(&self, update_id: u32) -> bool {
        self.last_update_id == update_id
    }

    pub fn value(&self) -> Option<&GraphValue> {
        match &self.state {
            NodeState::Value(value) => Some(value),
            NodeState::Pose(_) => None,
        }
    }

    pub fn pose_time(&self) -> Option<&PoseNodeTime> {
        match &self.state {
            NodeState::Pose(pose) => Some(&pose.time),
            NodeState::Value(_) => None,
        }
    }

    pub(crate) fn set_value(&mut self, value: GraphValue) {
        match &mut self.state {
            NodeState::Value(stored) => {
                assert_eq!(
                    stored.value_type(),
                    value.value_type(),
                    "value type mismatch when writing a value node"
                );
                *stored = value;
            }
            NodeState::Pose(_) => panic!("pose nodes do not hold values"),
        }
    }

    pub(crate) fn sub_graph_mut(&mut self) -> Option<&mut SubGraphState> {
        match &mut self.state {
            NodeState::Pose(PoseNodeState {
                extra: PoseNodeExtra::SubGraph(sub_graph),
                ..
            }) => Some(sub_graph),
            _ => None,
        }
    }

    pub(crate) fn sub_graph(&self) -> Option<&SubGraphState> {
        match &self.state {
            NodeState::Pose(PoseNodeState {
                extra: PoseNodeExtra::SubGraph(sub_graph),
                ..
            }) => Some(sub_graph),
            _ => None,
        }
    }

    pub(crate) fn pose_state(&self) -> &PoseNodeState {
        match &self.state {
            NodeState::Pose(pose) => pose,
            NodeState::Value(_) => panic!("value node used as a pose node"),
        }
    }

    pub(crate) fn pose_state_mut(&mut self) -> &mut PoseNodeState {
        match &mut self.state {
            NodeState::Pose(pose) => pose,
            NodeState::Value(_) => panic!("value node used as a pose node"),
        }
    }
}

/// Read-only counterpart of [`NodeArena`].
#[derive(Copy, Clone)]
pub(crate) struct NodeView<'a> {
    pub(crate) definition: &'a GraphDefinition,
    pub(crate) data_set: &'a GraphDataSet,
    pub(crate) default_sync_track: &'a SyncTrack,
    pub(crate) nodes: &'a [GraphNode],
}

impl<'a> NodeView<'a> {
    #[inline]
    pub(crate) fn time(self, node_idx: NodeIndex) -> PoseNodeTime {
        self.nodes[node_idx as usize].pose_state().time
    }

    /// Sync track currently driving `node_idx`.
    pub(crate) fn sync_track(self, node_idx: NodeIndex) -> &'a SyncTrack {
        if node_idx == INVALID_INDEX {
            return self.default_sync_track;
        }
        let extra = &self.nodes[node_idx as usize].pose_state().extra;
        match (self.definition.node(node_idx), extra) {
            (NodeKind::AnimationClip { clip_idx, .. }, _) => self.data_set.clip(*clip_idx).sync_track(),
            (NodeKind::SpeedScale { input, .. }, _) => self.sync_track(*input),
            (NodeKind::LayerBlend { base, .. }, _) => self.sync_track(*base),
            (NodeKind::Blend1D { inputs, .. }, PoseNodeExtra::Blend(state)) => state.sync_track(self, inputs),
            (NodeKind::StateMachine { states, .. }, PoseNodeExtra::StateMachine(machine)) => {
                machine.sync_track(self, states)
            }
            (NodeKind::ReferencedGraph { fallback, .. }, PoseNodeExtra::SubGraph(sub_graph))
                if sub_graph.instance.is_none() =>
            {
                self.sync_track(*fallback)
            }
            (_, PoseNodeExtra::SubGraph(sub_graph)) => match &sub_graph.instance {
                Some(instance) => instance.root_sync_track(),
                None => self.default_sync_track,
            },
            _ => self.default_sync_track,
        }
    }

    /// Sync range covered by `node_idx`'s last update, used to drive synchronized siblings.
    pub(crate) fn sync_range(self, node_idx: NodeIndex) -> SyncTrackTimeRange {
        let time = self.time(node_idx);
        let track = self.sync_track(node_idx);
        SyncTrackTimeRange::new(
            track.get_time(time.previous_time, true),
            track.get_time(time.current_time, true),
        )
    }

    pub(crate) fn debug_info(self, node_idx: NodeIndex) -> PoseNodeDebugInfo<'a> {
        let time = self.time(node_idx);
        let sync_track = self.sync_track(node_idx);
        PoseNodeDebugInfo {
            time,
            current_sync_time: sync_track.get_time(time.current_time, true),
            sync_track,
        }
    }
}

/// Mutable view of one instance's nodes together with the resources they read.
pub(crate) struct NodeArena<'g> {
    pub(crate) definition: &'g GraphDefinition,
    pub(crate) data_set: &'g GraphDataSet,
    pub(crate) default_sync_track: &'g SyncTrack,
    pub(crate) nodes: &'g mut [GraphNode],
}

impl<'g> NodeArena<'g> {
    #[inline]
    fn node(&self, node_idx: NodeIndex) -> &GraphNode {
        &self.nodes[node_idx as usize]
    }

    #[inline]
    fn node_mut(&mut self, node_idx: NodeIndex) -> &mut GraphNode {
        &mut self.nodes[node_idx as usize]
    }

    #[inline]
    pub(crate) fn time(&self, node_idx: NodeIndex) -> PoseNodeTime {
        self.node(node_idx).pose_state().time
    }

    pub(crate) fn time_mut(&mut self, node_idx: NodeIndex) -> &mut PoseNodeTime {
        &mut self.node_mut(node_idx).pose_state_mut().time
    }

    // Lifetime -----------------------------------------------------------------------------

    /// Refcounted: only the first call runs the node's own initialization.
    pub(crate) fn initialize_node(&mut self, node_idx: NodeIndex, initial_time: SyncTrackTime) {
        let node = self.node_mut(node_idx);
        node.initialization_count += 1;
        if node.initialization_count > 1 {
            return;
        }
        node.last_update_id = 0;

        let definition = self.definition;
        let kind = definition.node(node_idx);
        if kind.is_pose_node() {
            *self.time_mut(node_idx) = PoseNodeTime::default();
            self.node_mut(node_idx).pose_state_mut().last_result = PoseNodeResult::EMPTY;
            match kind {
                NodeKind::ReferencePose | NodeKind::ZeroPose => {}
                NodeKind::AnimationClip { .. } => self.initialize_clip(node_idx, initial_time),
                NodeKind::SpeedScale { input, scale } => {
                    self.initialize_node(*scale, initial_time);
                    self.initialize_node(*input, initial_time);
                    let time = self.time(*input);
                    *self.time_mut(node_idx) = time;
                }
                NodeKind::Blend1D { .. } => self.initialize_blend_1d(node_idx, initial_time),
                NodeKind::LayerBlend { .. } => self.initialize_layer_blend(node_idx, initial_time),
                NodeKind::StateMachine { .. } => self.initialize_state_machine(node_idx, initial_time),
                NodeKind::ChildGraph { .. } | NodeKind::ExternalGraph { .. } | NodeKind::ReferencedGraph { .. } => {
                    self.initialize_sub_graph(node_idx, initial_time)
                }
                _ => unreachable!("not a pose node"),
            }
        } else {
            self.initialize_pins(node_idx, initial_time);
        }
    }

    pub(crate) fn shutdown_node(&mut self, node_idx: NodeIndex) {
        let node = self.node_mut(node_idx);
        assert!(node.initialization_count > 0, "node {node_idx} shut down more often than initialized");
        node.initialization_count -= 1;
        if node.initialization_count > 0 {
            return;
        }

        let definition = self.definition;
        match definition.node(node_idx) {
            NodeKind::SpeedScale { input, scale } => {
                self.shutdown_node(*input);
                self.shutdown_node(*scale);
            }
            NodeKind::StateMachine { .. } => self.shutdown_state_machine(node_idx),
            NodeKind::ChildGraph { .. } | NodeKind::ExternalGraph { .. } | NodeKind::ReferencedGraph { .. } => {
                self.shutdown_sub_graph(node_idx)
            }
            _ => self.shutdown_pins(node_idx),
        }
    }

    /// Initialize every connected input of `node_idx`.
    fn initialize_pins(&mut self, node_idx: NodeIndex, initial_time: SyncTrackTime) {
        let definition = self.definition;
        definition.node(node_idx).for_each_pin(|pin| {
            if pin.node != INVALID_INDEX {
                self.initialize_node(pin.node, initial_time);
            }
        });
    }

    fn shutdown_pins(&mut self, node_idx: NodeIndex) {
        let definition = self.definition;
        definition.node(node_idx).for_each_pin(|pin| {
            if pin.node != INVALID_INDEX {
                self.shutdown_node(pin.node);
            }
        });
    }

    // Values -------------------------------------------------------------------------------

    /// Typed output of a value node. Panics if `T` does not match the node's output type.
    pub(crate) fn get_value<T: GraphValueKind>(&mut self, ctx: &mut GraphContext, node_idx: NodeIndex) -> T {
        debug_assert_eq!(self.definition.output_type(node_idx), T::VALUE_TYPE);
        self.evaluate_value(ctx, node_idx);
        match &self.node(node_idx).state {
            NodeState::Value(value) => T::from_graph_value(value),
            NodeState::Pose(_) => panic!("node {node_idx} is not a value node"),
        }
    }

    /// Compute a value node at most once per update.
    pub(crate) fn evaluate_value(&mut self, ctx: &mut GraphContext, node_idx: NodeIndex) {
        let node = self.node_mut(node_idx);
        debug_assert!(node.is_initialized(), "value node {node_idx} read before initialization");
        if node.was_updated(ctx.update_id) {
            return;
        }
        node.last_update_id = ctx.update_id;
        ctx.record_active_node(node_idx);

        if let Some(value) = self.compute_value(ctx, node_idx) {
            if let NodeState::Value(stored) = &mut self.node_mut(node_idx).state {
                *stored = value;
            }
        }
    }

    // Poses --------------------------------------------------------------------------------

    /// Update a pose node, registering its tasks and sampling its events. A node reached a
    /// second time in the same update returns its earlier task with no new events.
    pub(crate) fn update_pose(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let node = self.node_mut(node_idx);
        debug_assert!(node.is_initialized(), "pose node {node_idx} updated before initialization");
        if node.was_updated(ctx.update_id) {
            let cached = node.pose_state().last_result;
            return PoseNodeResult {
                sampled_event_range: ctx.sampled_events.empty_range(),
                ..cached
            };
        }
        node.last_update_id = ctx.update_id;
        ctx.record_active_node(node_idx);

        let definition = self.definition;
        let result = match definition.node(node_idx) {
            NodeKind::ReferencePose => self.update_fixed_pose(ctx, node_idx, Task::ReferencePose),
            NodeKind::ZeroPose => self.update_fixed_pose(ctx, node_idx, Task::ZeroPose),
            NodeKind::AnimationClip { .. } => self.update_clip(ctx, node_idx, sync_range),
            NodeKind::SpeedScale { .. } => self.update_speed_scale(ctx, node_idx, sync_range),
            NodeKind::Blend1D { .. } => self.update_blend_1d(ctx, node_idx, sync_range),
            NodeKind::LayerBlend { .. } => self.update_layer_blend(ctx, node_idx, sync_range),
            NodeKind::StateMachine { .. } => self.update_state_machine(ctx, node_idx, sync_range),
            NodeKind::ChildGraph { .. } | NodeKind::ExternalGraph { .. } | NodeKind::ReferencedGraph { .. } => {
                self.update_sub_graph(ctx, node_idx, sync_range)
            }
            _ => unreachable!("node {node_idx} is not a pose node"),
        };

        self.node_mut(node_idx).pose_state_mut().last_result = result;
        result
    }

    pub(crate) fn view(&self) -> NodeView<'_> {
        NodeView {
            definition: self.definition,
            data_set: self.data_set,
            default_sync_track: self.default_sync_track,
            nodes: &*self.nodes,
        }
    }

    #[inline]
    pub(crate) fn sync_track(&self, node_idx: NodeIndex) -> &SyncTrack {
        self.view().sync_track(node_idx)
    }

    #[inline]
    pub(crate) fn sync_range(&self, node_idx: NodeIndex) -> SyncTrackTimeRange {
        self.view().sync_range(node_idx)
    }

    fn update_fixed_pose(&mut self, ctx: &mut GraphContext, node_idx: NodeIndex, task: Task) -> PoseNodeResult {
        let time = self.time_mut(node_idx);
        time.previous_time = time.current_time;
        PoseNodeResult {
            task_idx: ctx.task_system.register_task(node_idx, task),
            root_motion_delta: Transform::IDENTITY,
            sampled_event_range: ctx.sampled_events.empty_range(),
        }
    }
}

/// Make sure `result` carries a task, substituting the reference pose when it does not.
pub(crate) fn ensure_task(ctx: &mut GraphContext, node_idx: NodeIndex, result: &mut PoseNodeResult) {
    if !result.has_registered_tasks() {
        result.task_idx = ctx.task_system.register_task(node_idx, Task::ReferencePose);
    }
}

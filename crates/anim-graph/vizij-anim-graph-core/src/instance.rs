//! Graph instances: per-character runtime state for a [`GraphVariation`].

use std::sync::Arc;

use crate::config::GraphInstanceConfig;
use crate::context::{GraphContext, PhysicsWorld};
use crate::definition::{GraphDefinition, GraphVariation, NodeKind};
use crate::error::GraphError;
use crate::graph_log::GraphLog;
use crate::ids::{NodeIndex, StringId};
use crate::math::Transform;
use crate::nodes::{ensure_task, GraphNode, NodeArena, NodeView, PoseNodeDebugInfo, PoseNodeResult, PoseNodeTime};
use crate::sampled_events::SampledEventsBuffer;
use crate::skeleton::{Pose, Skeleton};
use crate::sync_track::{SyncTrack, SyncTrackTime, SyncTrackTimeRange};
use crate::tasks::TaskSystem;
use crate::value::{GraphValue, GraphValueKind};

/// One evaluable copy of a graph.
///
/// Typical frame:
///
/// ```ignore
/// instance.set_control_parameter_value(speed_idx, 1.5f32);
/// instance.evaluate_graph(dt, world, None, false);
/// instance.execute_tasks();
/// let pose = instance.primary_pose();
/// ```
#[derive(Debug)]
pub struct GraphInstance {
    variation: GraphVariation,
    graph_user_id: u64,
    config: GraphInstanceConfig,
    nodes: Vec<GraphNode>,
    default_sync_track: SyncTrack,
    task_system: TaskSystem,
    sampled_events: SampledEventsBuffer,
    log: GraphLog,
    active_nodes: Vec<NodeIndex>,
    update_id: u32,
    root_result: PoseNodeResult,
    is_initialized: bool,
}

impl GraphInstance {
    pub fn new(variation: GraphVariation, graph_user_id: u64) -> Self {
        Self::with_config(variation, graph_user_id, GraphInstanceConfig::default())
    }

    /// Builds the node states and every child or referenced sub-graph instance. The instance
    /// still has to be initialized before it can be evaluated.
    pub fn with_config(variation: GraphVariation, graph_user_id: u64, config: GraphInstanceConfig) -> Self {
        let definition = Arc::clone(variation.definition());
        let data_set = Arc::clone(variation.data_set());
        let mut graph_log = GraphLog::new();

        let mut nodes: Vec<GraphNode> = definition
            .nodes()
            .iter()
            .map(|node| GraphNode::new(&node.kind, definition.output_type(node.node_idx)))
            .collect();

        for node in definition.nodes() {
            let sub_variation = match &node.kind {
                NodeKind::ChildGraph { child_graph_idx } => Some(data_set.child_graph(*child_graph_idx)),
                NodeKind::ReferencedGraph {
                    referenced_graph_idx, ..
                } => data_set.referenced_graph(*referenced_graph_idx),
                _ => None,
            };
            let Some(sub_variation) = sub_variation else {
                continue;
            };
            let child = GraphInstance::with_config(sub_variation.clone(), graph_user_id, config.clone());
            if let Some(sub_graph) = nodes[node.node_idx as usize].sub_graph_mut() {
                sub_graph.attach(child, &definition, &mut graph_log, node.node_idx, 0);
            }
        }

        let task_system = TaskSystem::new(
            Arc::clone(data_set.skeleton()),
            Arc::clone(data_set.bone_masks()),
            &config,
        );
        log::debug!(
            "created instance of graph {} ({} nodes) for user {graph_user_id}",
            definition.id(),
            nodes.len()
        );

        Self {
            sampled_events: SampledEventsBuffer::with_capacity(config.sampled_events_capacity),
            active_nodes: Vec::with_capacity(if config.record_active_nodes { nodes.len() } else { 0 }),
            variation,
            graph_user_id,
            config,
            nodes,
            default_sync_track: SyncTrack::default(),
            task_system,
            log: graph_log,
            update_id: 0,
            root_result: PoseNodeResult::EMPTY,
            is_initialized: false,
        }
    }

    fn arena(&mut self) -> NodeArena<'_> {
        NodeArena {
            definition: self.variation.definition(),
            data_set: self.variation.data_set(),
            default_sync_track: &self.default_sync_track,
            nodes: &mut self.nodes,
        }
    }

    fn view(&self) -> NodeView<'_> {
        NodeView {
            definition: self.variation.definition(),
            data_set: self.variation.data_set(),
            default_sync_track: &self.default_sync_track,
            nodes: &self.nodes,
        }
    }

    fn next_update_id(&mut self) {
        // Zero is reserved for "never updated".
        self.update_id = self.update_id.wrapping_add(1).max(1);
    }

    // Lifetime -----------------------------------------------------------------------------

    /// Initialize persistent nodes and the pose tree below the root at `initial_time`.
    pub fn initialize(&mut self, initial_time: SyncTrackTime) {
        assert!(!self.is_initialized, "graph instance initialized twice");
        let root = self.variation.definition().root_node_idx();
        let mut arena = self.arena();
        let definition = arena.definition;
        for &node_idx in definition.persistent_nodes() {
            arena.initialize_node(node_idx, initial_time);
        }
        arena.initialize_node(root, initial_time);

        self.root_result = PoseNodeResult::EMPTY;
        self.is_initialized = true;
    }

    pub fn shutdown(&mut self) {
        assert!(self.is_initialized, "graph instance shut down without being initialized");
        let root = self.variation.definition().root_node_idx();
        let mut arena = self.arena();
        let definition = arena.definition;
        arena.shutdown_node(root);
        for &node_idx in definition.persistent_nodes() {
            arena.shutdown_node(node_idx);
        }

        self.root_result = PoseNodeResult::EMPTY;
        self.is_initialized = false;
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    /// Shut down (if needed) and re-initialize at `initial_time`. Control parameter values
    /// survive the reset.
    pub fn reset_graph_state(&mut self, initial_time: SyncTrackTime) {
        if self.is_initialized {
            self.shutdown();
        }
        self.initialize(initial_time);
    }

    // Evaluation ---------------------------------------------------------------------------

    /// Run one graph update: registers pose tasks, samples events and accumulates root
    /// motion. Poses are produced by [`GraphInstance::execute_tasks`].
    pub fn evaluate_graph(
        &mut self,
        delta_time: f32,
        world_transform: Transform,
        physics_world: Option<&dyn PhysicsWorld>,
        reset: bool,
    ) -> PoseNodeResult {
        if reset {
            self.reset_graph_state(SyncTrackTime::default());
        }
        assert!(self.is_initialized, "graph instance evaluated before initialization");

        self.next_update_id();
        self.task_system.reset();
        self.sampled_events.reset();
        self.active_nodes.clear();

        let definition: &GraphDefinition = self.variation.definition();
        let root = definition.root_node_idx();
        let mut ctx = GraphContext::new(
            self.graph_user_id,
            self.variation.skeleton(),
            &mut self.task_system,
            &mut self.sampled_events,
            &mut self.log,
            self.update_id,
            delta_time,
            world_transform,
            physics_world,
        );
        if self.config.record_active_nodes {
            ctx.active_nodes = Some(&mut self.active_nodes);
        }
        let mut arena = NodeArena {
            definition,
            data_set: self.variation.data_set(),
            default_sync_track: &self.default_sync_track,
            nodes: &mut self.nodes,
        };

        let mut result = arena.update_pose(&mut ctx, root, None);
        ensure_task(&mut ctx, root, &mut result);
        self.root_result = result;
        result
    }

    /// Update this instance as a sub-graph of the graph owning `ctx`. Tasks go to the
    /// parent's task system and events are appended to the parent buffer.
    pub(crate) fn evaluate_as_child(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        debug_assert!(self.is_initialized);
        self.next_update_id();
        self.sampled_events.reset();

        let definition: &GraphDefinition = self.variation.definition();
        let root = definition.root_node_idx();
        let (mut result, layer_context) = {
            let mut child_ctx = ctx.child(&mut self.sampled_events, self.update_id);
            let mut arena = NodeArena {
                definition,
                data_set: self.variation.data_set(),
                default_sync_track: &self.default_sync_track,
                nodes: &mut self.nodes,
            };
            let result = arena.update_pose(&mut child_ctx, root, sync_range);
            (result, child_ctx.layer_context)
        };
        ctx.layer_context = layer_context;

        result.sampled_event_range = ctx.sampled_events.append_buffer(&self.sampled_events, node_idx);
        self.root_result = result;
        result
    }

    pub fn execute_tasks(&mut self) {
        self.task_system.execute();
    }

    /// Pose produced by the root node in the last update, once its tasks have been executed.
    pub fn primary_pose(&self) -> Option<&Pose> {
        self.task_system.pose(self.root_result.task_idx)
    }

    pub fn task_system(&self) -> &TaskSystem {
        &self.task_system
    }

    #[inline]
    pub fn root_motion_delta(&self) -> Transform {
        self.root_result.root_motion_delta
    }

    pub fn sampled_events(&self) -> &SampledEventsBuffer {
        &self.sampled_events
    }

    // Control parameters -------------------------------------------------------------------

    pub fn control_parameter_index(&self, id: impl Into<StringId>) -> Option<NodeIndex> {
        self.variation.definition().control_parameter_index(id.into())
    }

    /// Panics if `node_idx` is not a control parameter of type `T`.
    pub fn set_control_parameter_value<T: GraphValueKind>(&mut self, node_idx: NodeIndex, value: T) {
        assert!(
            matches!(
                self.variation.definition().node(node_idx),
                NodeKind::ControlParameter { .. }
            ),
            "node {node_idx} is not a control parameter"
        );
        self.nodes[node_idx as usize].set_value(value.into_graph_value());
    }

    pub fn control_parameter_value<T: GraphValueKind>(&self, node_idx: NodeIndex) -> T {
        match self.nodes[node_idx as usize].value() {
            Some(value) => T::from_graph_value(value),
            None => panic!("node {node_idx} is not a value node"),
        }
    }

    pub(crate) fn set_node_value(&mut self, node_idx: NodeIndex, value: GraphValue) {
        self.nodes[node_idx as usize].set_value(value);
    }

    // External graphs ----------------------------------------------------------------------

    /// Attach `instance` to an external graph slot. If the slot is currently active the
    /// attached graph is initialized right away.
    pub fn connect_external_graph(&mut self, slot_id: impl Into<StringId>, mut instance: GraphInstance) -> Result<(), GraphError> {
        let slot_id = slot_id.into();
        let definition = self.variation.definition();
        let node_idx = definition
            .external_slot_index(slot_id)
            .ok_or(GraphError::UnknownExternalSlot(slot_id))?;

        let expected = self.variation.skeleton().id();
        let actual = instance.skeleton().id();
        if actual != expected {
            return Err(GraphError::SkeletonMismatch {
                graph: instance.definition().id(),
                expected,
                actual,
            });
        }

        let node = &mut self.nodes[node_idx as usize];
        let is_slot_active = node.is_initialized();
        let Some(sub_graph) = node.sub_graph_mut() else {
            return Err(GraphError::UnknownExternalSlot(slot_id));
        };
        if sub_graph.instance.is_some() {
            return Err(GraphError::ExternalSlotOccupied(slot_id));
        }
        if is_slot_active && !instance.is_initialized() {
            instance.initialize(SyncTrackTime::default());
        }
        log::debug!("attaching graph {} to slot {slot_id}", instance.definition().id());
        sub_graph.attach(instance, definition, &mut self.log, node_idx, self.update_id);
        Ok(())
    }

    /// Detach whatever is attached to an external slot. The returned graph is shut down.
    pub fn disconnect_external_graph(&mut self, slot_id: impl Into<StringId>) -> Result<Option<GraphInstance>, GraphError> {
        let slot_id = slot_id.into();
        let node_idx = self
            .variation
            .definition()
            .external_slot_index(slot_id)
            .ok_or(GraphError::UnknownExternalSlot(slot_id))?;

        let mut detached = self.nodes[node_idx as usize]
            .sub_graph_mut()
            .and_then(|sub_graph| sub_graph.detach());
        if let Some(instance) = detached.as_mut() {
            if instance.is_initialized() {
                instance.shutdown();
            }
            log::debug!("detached graph {} from slot {slot_id}", instance.definition().id());
        }
        Ok(detached)
    }

    pub fn external_slot_ids(&self) -> impl Iterator<Item = StringId> + '_ {
        self.variation.definition().external_slot_ids()
    }

    pub fn external_graph(&self, slot_id: impl Into<StringId>) -> Option<&GraphInstance> {
        let node_idx = self.variation.definition().external_slot_index(slot_id.into())?;
        self.nodes[node_idx as usize]
            .sub_graph()
            .and_then(|sub_graph| sub_graph.instance.as_deref())
    }

    // Introspection ------------------------------------------------------------------------

    pub fn graph_user_id(&self) -> u64 {
        self.graph_user_id
    }

    pub fn variation(&self) -> &GraphVariation {
        &self.variation
    }

    pub fn definition(&self) -> &Arc<GraphDefinition> {
        self.variation.definition()
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        self.variation.skeleton()
    }

    pub fn node(&self, node_idx: NodeIndex) -> &GraphNode {
        &self.nodes[node_idx as usize]
    }

    /// Nodes touched by the last update, in first-visit order. Empty unless
    /// `record_active_nodes` is set.
    pub fn active_nodes(&self) -> &[NodeIndex] {
        &self.active_nodes
    }

    pub fn log(&self) -> &GraphLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut GraphLog {
        &mut self.log
    }

    #[inline]
    pub fn update_id(&self) -> u32 {
        self.update_id
    }

    /// Playback state of a pose node. Panics for value nodes.
    pub fn pose_node_debug_info(&self, node_idx: NodeIndex) -> PoseNodeDebugInfo<'_> {
        self.view().debug_info(node_idx)
    }

    pub(crate) fn root_time(&self) -> PoseNodeTime {
        self.view().time(self.variation.definition().root_node_idx())
    }

    pub(crate) fn root_sync_track(&self) -> &SyncTrack {
        self.view().sync_track(self.variation.definition().root_node_idx())
    }
}

impl Drop for GraphInstance {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if self.is_initialized {
            self.shutdown();
        }
        debug_assert!(
            self.nodes.iter().all(|node| !node.is_initialized()),
            "graph instance dropped with initialized nodes"
        );
    }
}

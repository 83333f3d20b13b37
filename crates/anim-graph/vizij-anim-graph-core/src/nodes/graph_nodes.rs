//! Child, external and referenced graph nodes.
//!
//! Each node owns an optional nested [`GraphInstance`]. Same-ID, same-type control parameters
//! of the parent are copied into the nested instance before every update, and the nested
//! instance's events are appended to the parent buffer.

use std::mem;

use crate::context::GraphContext;
use crate::definition::{GraphDefinition, NodeKind};
use crate::graph_log::GraphLog;
use crate::ids::{NodeIndex, INVALID_INDEX};
use crate::instance::GraphInstance;
use crate::sync_track::{SyncTrackTime, SyncTrackTimeRange};

use super::{NodeArena, PoseNodeExtra, PoseNodeResult};

#[derive(Debug, Default)]
pub(crate) struct SubGraphState {
    pub(crate) instance: Option<Box<GraphInstance>>,
    /// `(child node, parent node)` control parameter pairs.
    pub(crate) parameter_mapping: Vec<(NodeIndex, NodeIndex)>,
}

impl SubGraphState {
    pub(crate) fn attach(
        &mut self,
        instance: GraphInstance,
        parent: &GraphDefinition,
        log: &mut GraphLog,
        node_idx: NodeIndex,
        update_id: u32,
    ) {
        self.parameter_mapping = build_parameter_mapping(parent, instance.definition(), log, node_idx, update_id);
        self.instance = Some(Box::new(instance));
    }

    pub(crate) fn detach(&mut self) -> Option<GraphInstance> {
        self.parameter_mapping.clear();
        self.instance.take().map(|instance| *instance)
    }
}

/// Pair up control parameters that share an ID. Mismatched types are logged and skipped.
pub(crate) fn build_parameter_mapping(
    parent: &GraphDefinition,
    child: &GraphDefinition,
    log: &mut GraphLog,
    node_idx: NodeIndex,
    update_id: u32,
) -> Vec<(NodeIndex, NodeIndex)> {
    let mut mapping = Vec::new();
    for (id, child_idx) in child.control_parameters() {
        let Some(parent_idx) = parent.control_parameter_index(id) else {
            continue;
        };
        let (parent_type, child_type) = (parent.output_type(parent_idx), child.output_type(child_idx));
        if parent_type == child_type {
            mapping.push((child_idx, parent_idx));
        } else {
            log.warn(
                node_idx,
                update_id,
                format!(
                    "control parameter {id} is {parent_type:?} in graph {} but {child_type:?} in graph {}",
                    parent.id(),
                    child.id()
                ),
            );
        }
    }
    mapping.sort_unstable();
    mapping
}

impl<'g> NodeArena<'g> {
    fn take_sub_graph(&mut self, node_idx: NodeIndex) -> SubGraphState {
        match &mut self.node_mut(node_idx).pose_state_mut().extra {
            PoseNodeExtra::SubGraph(sub_graph) => mem::take(sub_graph),
            _ => unreachable!("node {node_idx} is not a sub-graph node"),
        }
    }

    fn restore_sub_graph(&mut self, node_idx: NodeIndex, sub_graph: SubGraphState) {
        self.node_mut(node_idx).pose_state_mut().extra = PoseNodeExtra::SubGraph(sub_graph);
    }

    fn fallback(&self, node_idx: NodeIndex) -> NodeIndex {
        match self.definition.node(node_idx) {
            NodeKind::ReferencedGraph { fallback, .. } => *fallback,
            _ => INVALID_INDEX,
        }
    }

    pub(super) fn initialize_sub_graph(&mut self, node_idx: NodeIndex, initial_time: SyncTrackTime) {
        let mut sub_graph = self.take_sub_graph(node_idx);
        match sub_graph.instance.as_deref_mut() {
            Some(instance) => {
                if !instance.is_initialized() {
                    instance.initialize(initial_time);
                }
                *self.time_mut(node_idx) = instance.root_time();
            }
            None => {
                let fallback = self.fallback(node_idx);
                if fallback != INVALID_INDEX {
                    self.initialize_node(fallback, initial_time);
                    let time = self.time(fallback);
                    *self.time_mut(node_idx) = time;
                }
            }
        }
        self.restore_sub_graph(node_idx, sub_graph);
    }

    pub(super) fn shutdown_sub_graph(&mut self, node_idx: NodeIndex) {
        let mut sub_graph = self.take_sub_graph(node_idx);
        match sub_graph.instance.as_deref_mut() {
            Some(instance) => {
                if instance.is_initialized() {
                    instance.shutdown();
                }
            }
            None => {
                let fallback = self.fallback(node_idx);
                if fallback != INVALID_INDEX {
                    self.shutdown_node(fallback);
                }
            }
        }
        self.restore_sub_graph(node_idx, sub_graph);
    }

    pub(super) fn update_sub_graph(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let mut sub_graph = self.take_sub_graph(node_idx);
        let result = match sub_graph.instance.as_deref_mut() {
            Some(instance) => {
                for &(child_idx, parent_idx) in &sub_graph.parameter_mapping {
                    if let Some(value) = self.node(parent_idx).value() {
                        instance.set_node_value(child_idx, value.clone());
                    }
                }
                let result = instance.evaluate_as_child(ctx, node_idx, sync_range);
                *self.time_mut(node_idx) = instance.root_time();
                result
            }
            None => {
                let fallback = self.fallback(node_idx);
                if fallback != INVALID_INDEX {
                    let result = self.update_pose(ctx, fallback, sync_range);
                    let time = self.time(fallback);
                    *self.time_mut(node_idx) = time;
                    result
                } else {
                    PoseNodeResult::empty(ctx.sampled_events.empty_range())
                }
            }
        };
        self.restore_sub_graph(node_idx, sub_graph);
        result
    }
}

use std::mem;

use crate::bone_mask::BoneMaskTaskList;
use crate::context::GraphContext;
use crate::definition::NodeKind;
use crate::ids::{NodeIndex, INVALID_INDEX};
use crate::math::{lerp, Percentage, Transform};
use crate::sync_track::{SyncTrack, SyncTrackTime, SyncTrackTimeRange};
use crate::tasks::Task;

use super::{ensure_task, NodeArena, NodeView, PoseNodeExtra, PoseNodeResult};

/// Runtime state of a 1D blend.
#[derive(Debug)]
pub(crate) struct BlendState {
    /// Sync track of the two selected inputs; only meaningful when they differ.
    blended_track: SyncTrack,
    source: usize,
    target: usize,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            blended_track: SyncTrack::default(),
            source: 0,
            target: 0,
        }
    }
}

impl BlendState {
    pub(super) fn sync_track<'a>(&'a self, view: NodeView<'a>, inputs: &[NodeIndex]) -> &'a SyncTrack {
        if self.source == self.target {
            view.sync_track(inputs[self.source])
        } else {
            &self.blended_track
        }
    }
}

/// Inputs bracketing `parameter` and the weight between them. Out-of-range parameters
/// select the first or last input alone.
fn select_inputs(parameter_values: &[f32], parameter: f32) -> (usize, usize, f32) {
    let last = parameter_values.len() - 1;
    if last == 0 || parameter.is_nan() || parameter <= parameter_values[0] {
        return (0, 0, 0.0);
    }
    if parameter >= parameter_values[last] {
        return (last, last, 0.0);
    }

    let target = parameter_values.partition_point(|value| *value <= parameter);
    let source = target - 1;
    let span = parameter_values[target] - parameter_values[source];
    let weight = if span > 0.0 {
        (parameter - parameter_values[source]) / span
    } else {
        0.0
    };
    (source, target, weight)
}

impl<'g> NodeArena<'g> {
    fn blend_state(&self, node_idx: NodeIndex) -> &BlendState {
        match &self.node(node_idx).pose_state().extra {
            PoseNodeExtra::Blend(state) => state,
            _ => unreachable!("node {node_idx} is not a blend"),
        }
    }

    fn blend_state_mut(&mut self, node_idx: NodeIndex) -> &mut BlendState {
        match &mut self.node_mut(node_idx).pose_state_mut().extra {
            PoseNodeExtra::Blend(state) => state,
            _ => unreachable!("node {node_idx} is not a blend"),
        }
    }

    pub(super) fn initialize_blend_1d(&mut self, node_idx: NodeIndex, initial_time: SyncTrackTime) {
        let definition = self.definition;
        let NodeKind::Blend1D { inputs, .. } = definition.node(node_idx) else {
            unreachable!()
        };
        self.initialize_pins(node_idx, initial_time);

        let first = inputs[0];
        let mut time = self.time(first);
        time.loop_count = 0;
        *self.time_mut(node_idx) = time;

        let state = self.blend_state_mut(node_idx);
        state.source = 0;
        state.target = 0;
    }

    /// Rebuild the blended track of `node_idx` in place from its two selected inputs.
    fn rebuild_blended_track(&mut self, node_idx: NodeIndex, source: NodeIndex, target: NodeIndex, weight: f32) {
        let mut blended = mem::replace(&mut self.blend_state_mut(node_idx).blended_track, SyncTrack::placeholder());
        blended.blend_from(self.sync_track(source), self.sync_track(target), weight);
        self.blend_state_mut(node_idx).blended_track = blended;
    }

    pub(super) fn update_blend_1d(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let definition = self.definition;
        let NodeKind::Blend1D {
            inputs,
            parameter_values,
            parameter,
            is_synchronized,
        } = definition.node(node_idx)
        else {
            unreachable!()
        };

        let parameter = self.get_value::<f32>(ctx, *parameter);
        let (source, target, weight) = select_inputs(parameter_values, parameter);
        {
            let state = self.blend_state_mut(node_idx);
            state.source = source;
            state.target = target;
        }
        let (source_idx, target_idx) = (inputs[source], inputs[target]);

        if source == target {
            let result = self.update_pose(ctx, source_idx, sync_range);
            let child_time = self.time(source_idx);
            let time = self.time_mut(node_idx);
            time.duration = child_time.duration;
            time.previous_time = child_time.previous_time;
            time.current_time = child_time.current_time;
            time.loop_count = child_time.loop_count;
            return result;
        }

        self.rebuild_blended_track(node_idx, source_idx, target_idx, weight);

        let (mut source_result, mut target_result) = if *is_synchronized {
            let (source_time, target_time) = (self.time(source_idx), self.time(target_idx));
            let duration = SyncTrack::calculate_duration_synchronized(
                source_time.duration,
                target_time.duration,
                self.sync_track(source_idx).num_events(),
                self.sync_track(target_idx).num_events(),
                self.blend_state(node_idx).blended_track.num_events(),
                weight,
            );

            let mut time = self.time(node_idx);
            time.duration = duration;
            let range = {
                let track = &self.blend_state(node_idx).blended_track;
                match sync_range {
                    Some(range) => {
                        let previous = track.get_percentage_through(range.start_time, true);
                        let current = track.get_percentage_through(range.end_time, true);
                        if current < previous {
                            time.loop_count += 1;
                        }
                        time.previous_time = previous;
                        time.current_time = current;
                        *range
                    }
                    None => {
                        time.advance_looping(time.cycle_delta(ctx.delta_time));
                        SyncTrackTimeRange::new(
                            track.get_time(time.previous_time, true),
                            track.get_time(time.current_time, true),
                        )
                    }
                }
            };
            *self.time_mut(node_idx) = time;

            let source_result = self.update_pose(ctx, source_idx, Some(&range));
            let target_result = self.update_pose(ctx, target_idx, Some(&range));
            (source_result, target_result)
        } else {
            let source_result = self.update_pose(ctx, source_idx, sync_range);
            let target_result = self.update_pose(ctx, target_idx, sync_range);

            let (source_time, target_time) = (self.time(source_idx), self.time(target_idx));
            let time = self.time_mut(node_idx);
            time.previous_time = time.current_time;
            time.duration = lerp(source_time.duration, target_time.duration, weight);
            time.current_time = Percentage(lerp(
                source_time.current_time.value(),
                target_time.current_time.value(),
                weight,
            ));
            time.loop_count = if weight < 0.5 {
                source_time.loop_count
            } else {
                target_time.loop_count
            };
            (source_result, target_result)
        };

        ensure_task(ctx, node_idx, &mut source_result);
        ensure_task(ctx, node_idx, &mut target_result);
        let task_idx = ctx.task_system.register_task(
            node_idx,
            Task::Blend {
                source: source_result.task_idx,
                target: target_result.task_idx,
                weight,
                bone_mask: None,
            },
        );

        PoseNodeResult {
            task_idx,
            root_motion_delta: Transform::blend(
                &source_result.root_motion_delta,
                &target_result.root_motion_delta,
                weight,
            ),
            sampled_event_range: ctx.sampled_events.blend_event_ranges(
                source_result.sampled_event_range,
                target_result.sampled_event_range,
                weight,
            ),
        }
    }

    pub(super) fn initialize_layer_blend(&mut self, node_idx: NodeIndex, initial_time: SyncTrackTime) {
        let definition = self.definition;
        let NodeKind::LayerBlend { base, .. } = definition.node(node_idx) else {
            unreachable!()
        };
        self.initialize_pins(node_idx, initial_time);
        let time = self.time(*base);
        *self.time_mut(node_idx) = time;
    }

    /// Root motion comes from the base input only.
    pub(super) fn update_layer_blend(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let definition = self.definition;
        let NodeKind::LayerBlend { base, layers } = definition.node(node_idx) else {
            unreachable!()
        };

        let mut base_result = self.update_pose(ctx, *base, sync_range);
        ensure_task(ctx, node_idx, &mut base_result);
        let base_time = self.time(*base);
        *self.time_mut(node_idx) = base_time;
        let base_range = self.sync_range(*base);

        let mut task_idx = base_result.task_idx;
        for layer in layers {
            let outer_layer = ctx.layer_context;
            ctx.layer_context.begin_layer();

            let layer_sync = layer.is_synchronized.then_some(base_range);
            let layer_result = self.update_pose(ctx, layer.input, layer_sync.as_ref());

            let mut weight = if layer.weight != INVALID_INDEX {
                self.get_value::<f32>(ctx, layer.weight).clamp(0.0, 1.0)
            } else {
                1.0
            };
            weight *= ctx.layer_context.layer_weight;
            let bone_mask = if layer.bone_mask != INVALID_INDEX {
                Some(self.get_value::<BoneMaskTaskList>(ctx, layer.bone_mask))
            } else {
                None
            };

            if outer_layer.is_currently_in_layer {
                ctx.layer_context = outer_layer;
            } else {
                ctx.layer_context.end_layer();
            }

            ctx.sampled_events
                .update_weights(layer_result.sampled_event_range, weight);
            if layer_result.has_registered_tasks() && weight > 0.0 {
                task_idx = ctx.task_system.register_task(
                    node_idx,
                    Task::Blend {
                        source: task_idx,
                        target: layer_result.task_idx,
                        weight,
                        bone_mask,
                    },
                );
            }
        }

        PoseNodeResult {
            task_idx,
            root_motion_delta: base_result.root_motion_delta,
            sampled_event_range: ctx
                .sampled_events
                .range_from(base_result.sampled_event_range.start_idx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_selects_bracketing_inputs() {
        let values = [0.0, 1.0, 3.0];
        assert_eq!(select_inputs(&values, -1.0), (0, 0, 0.0));
        assert_eq!(select_inputs(&values, 0.5), (0, 1, 0.5));
        assert_eq!(select_inputs(&values, 2.5), (1, 2, 0.75));
        assert_eq!(select_inputs(&values, 1.0), (1, 2, 0.0));
        assert_eq!(select_inputs(&values, 9.0), (2, 2, 0.0));
        assert_eq!(select_inputs(&values, f32::NAN), (0, 0, 0.0));
    }

    #[test]
    fn single_input_is_never_blended() {
        assert_eq!(select_inputs(&[2.0], 5.0), (0, 0, 0.0));
    }

    #[test]
    fn coincident_parameter_values_do_not_divide_by_zero() {
        assert_eq!(select_inputs(&[0.0, 1.0, 1.0, 2.0], 1.5), (2, 3, 0.5));
    }
}

//! State machine node with inline states.
//!
//! A settled machine updates only its active state. While a transition runs, the source
//! state keeps updating as an inactive branch and the two poses, root motions and event
//! ranges are blended by the transition progress. Only one transition runs at a time;
//! conditions are not re-evaluated until it completes.

use std::mem;

use crate::context::{BranchState, GraphContext};
use crate::definition::{NodeKind, StateDefinition, TimedStateEvent, TransitionDefinition};
use crate::ids::{NodeIndex, StringId, INVALID_INDEX};
use crate::math::{lerp, Transform};
use crate::sampled_events::GraphEventType;
use crate::sync_track::{SyncTrack, SyncTrackTime, SyncTrackTimeRange};
use crate::tasks::Task;

use super::{ensure_task, NodeArena, NodeView, PoseNodeExtra, PoseNodeResult};

#[derive(Copy, Clone, Debug)]
struct ActiveTransition {
    source_state: u8,
    /// Seconds the source state had been active, still advancing while it blends out.
    source_elapsed: f32,
    elapsed: f32,
    duration: f32,
    is_synchronized: bool,
}

impl ActiveTransition {
    fn progress(&self) -> f32 {
        if self.duration > 0.0 {
            (self.elapsed / self.duration).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StateMachineState {
    active_state: u8,
    /// Seconds the active state has been active.
    elapsed: f32,
    /// Entry events are still owed for the active state.
    is_entering: bool,
    transition: Option<ActiveTransition>,
    blended_track: SyncTrack,
}

impl StateMachineState {
    pub(super) fn sync_track<'a>(&'a self, view: NodeView<'a>, states: &[StateDefinition]) -> &'a SyncTrack {
        if self.transition.is_some() {
            &self.blended_track
        } else {
            view.sync_track(states[self.active_state as usize].input)
        }
    }
}

fn emit_state_events(
    ctx: &mut GraphContext,
    node_idx: NodeIndex,
    ids: &[StringId],
    event_type: GraphEventType,
    is_from_active_branch: bool,
) {
    for id in ids {
        ctx.sampled_events
            .emplace_graph_event(node_idx, event_type, *id, is_from_active_branch);
    }
}

/// Timed events whose time falls in `[from, to)` seconds of state time.
fn emit_timed_events(
    ctx: &mut GraphContext,
    node_idx: NodeIndex,
    events: &[TimedStateEvent],
    from: f32,
    to: f32,
    is_from_active_branch: bool,
) {
    for event in events.iter().filter(|event| event.time >= from && event.time < to) {
        ctx.sampled_events.emplace_graph_event(
            node_idx,
            GraphEventType::Timed,
            event.id,
            is_from_active_branch,
        );
    }
}

impl<'g> NodeArena<'g> {
    fn take_state_machine(&mut self, node_idx: NodeIndex) -> Box<StateMachineState> {
        let extra = &mut self.node_mut(node_idx).pose_state_mut().extra;
        match mem::replace(extra, PoseNodeExtra::None) {
            PoseNodeExtra::StateMachine(machine) => machine,
            _ => unreachable!("node {node_idx} is not a state machine"),
        }
    }

    fn restore_state_machine(&mut self, node_idx: NodeIndex, machine: Box<StateMachineState>) {
        self.node_mut(node_idx).pose_state_mut().extra = PoseNodeExtra::StateMachine(machine);
    }

    pub(super) fn initialize_state_machine(&mut self, node_idx: NodeIndex, initial_time: SyncTrackTime) {
        let definition = self.definition;
        let NodeKind::StateMachine { states, default_state } = definition.node(node_idx) else {
            unreachable!()
        };

        for transition in states.iter().flat_map(|state| &state.transitions) {
            self.initialize_node(transition.condition, initial_time);
        }

        let mut machine = self.take_state_machine(node_idx);
        machine.active_state = *default_state;
        machine.elapsed = 0.0;
        machine.is_entering = true;
        machine.transition = None;
        self.restore_state_machine(node_idx, machine);

        let input = states[*default_state as usize].input;
        if input != INVALID_INDEX {
            self.initialize_node(input, initial_time);
            let time = self.time(input);
            *self.time_mut(node_idx) = time;
        }
    }

    pub(super) fn shutdown_state_machine(&mut self, node_idx: NodeIndex) {
        let definition = self.definition;
        let NodeKind::StateMachine { states, .. } = definition.node(node_idx) else {
            unreachable!()
        };

        let mut machine = self.take_state_machine(node_idx);
        let active_input = states[machine.active_state as usize].input;
        if active_input != INVALID_INDEX {
            self.shutdown_node(active_input);
        }
        if let Some(transition) = machine.transition.take() {
            let source_input = states[transition.source_state as usize].input;
            if source_input != INVALID_INDEX {
                self.shutdown_node(source_input);
            }
        }
        self.restore_state_machine(node_idx, machine);

        for transition in states.iter().flat_map(|state| &state.transitions) {
            self.shutdown_node(transition.condition);
        }
    }

    fn update_state_input(
        &mut self,
        ctx: &mut GraphContext,
        input: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        if input == INVALID_INDEX {
            PoseNodeResult::empty(ctx.sampled_events.empty_range())
        } else {
            self.update_pose(ctx, input, sync_range)
        }
    }

    fn start_transition(
        &mut self,
        machine: &mut StateMachineState,
        states: &[StateDefinition],
        transition: &TransitionDefinition,
    ) {
        let source_input = states[machine.active_state as usize].input;
        let target_input = states[transition.target_state as usize].input;

        let initial_time = if transition.is_synchronized && source_input != INVALID_INDEX {
            let source_time = self.time(source_input);
            self.sync_track(source_input)
                .get_time(source_time.current_time, true)
        } else {
            SyncTrackTime::default()
        };
        if target_input != INVALID_INDEX {
            self.initialize_node(target_input, initial_time);
        }

        machine.transition = Some(ActiveTransition {
            source_state: machine.active_state,
            source_elapsed: machine.elapsed,
            elapsed: 0.0,
            duration: transition.duration,
            is_synchronized: transition.is_synchronized,
        });
        machine.active_state = transition.target_state;
        machine.elapsed = 0.0;
        machine.is_entering = true;
    }

    pub(super) fn update_state_machine(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let definition = self.definition;
        let NodeKind::StateMachine { states, .. } = definition.node(node_idx) else {
            unreachable!()
        };
        let mut machine = self.take_state_machine(node_idx);

        if machine.transition.is_none() {
            let active_state = machine.active_state;
            for transition in &states[active_state as usize].transitions {
                if transition.target_state != active_state && self.get_value::<bool>(ctx, transition.condition) {
                    self.start_transition(&mut machine, states, transition);
                    break;
                }
            }
        }

        let result = match machine.transition {
            Some(transition) => self.update_transition(ctx, node_idx, states, &mut machine, transition, sync_range),
            None => self.update_settled_state(ctx, node_idx, states, &mut machine, sync_range),
        };

        let input = states[machine.active_state as usize].input;
        if input != INVALID_INDEX {
            let time = self.time(input);
            *self.time_mut(node_idx) = time;
        }
        self.restore_state_machine(node_idx, machine);
        result
    }

    fn update_settled_state(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        states: &[StateDefinition],
        machine: &mut StateMachineState,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let state = &states[machine.active_state as usize];
        let start_idx = ctx.sampled_events.len();
        let mut result = self.update_state_input(ctx, state.input, sync_range);

        let previous_elapsed = machine.elapsed;
        machine.elapsed += ctx.delta_time;

        let is_active = ctx.is_in_active_branch();
        if machine.is_entering {
            emit_state_events(ctx, node_idx, &state.entry_events, GraphEventType::Entry, is_active);
            machine.is_entering = false;
        } else {
            emit_state_events(
                ctx,
                node_idx,
                &state.fully_in_state_events,
                GraphEventType::FullyInState,
                is_active,
            );
        }
        emit_timed_events(ctx, node_idx, &state.timed_events, previous_elapsed, machine.elapsed, is_active);

        if ctx.is_in_layer() {
            ctx.layer_context.layer_weight *= state.layer_weight;
        }

        result.sampled_event_range = ctx.sampled_events.range_from(start_idx);
        result
    }

    fn update_transition(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        states: &[StateDefinition],
        machine: &mut StateMachineState,
        mut transition: ActiveTransition,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let source_state = &states[transition.source_state as usize];
        let target_state = &states[machine.active_state as usize];
        transition.elapsed += ctx.delta_time;
        let weight = transition.progress();

        // Source, evaluated as the branch being left.
        let source_start_idx = ctx.sampled_events.len();
        let outer_branch = ctx.branch_state;
        ctx.branch_state = BranchState::Inactive;
        let mut source_result = self.update_state_input(ctx, source_state.input, sync_range);
        let previous_source_elapsed = transition.source_elapsed;
        transition.source_elapsed += ctx.delta_time;
        emit_state_events(ctx, node_idx, &source_state.exit_events, GraphEventType::Exit, false);
        emit_timed_events(
            ctx,
            node_idx,
            &source_state.timed_events,
            previous_source_elapsed,
            transition.source_elapsed,
            false,
        );
        ctx.branch_state = outer_branch;
        let source_range = ctx.sampled_events.range_from(source_start_idx);
        ctx.sampled_events.mark_events_as_from_inactive_branch(source_range);

        // Target.
        let target_start_idx = ctx.sampled_events.len();
        let target_sync = if transition.is_synchronized && source_state.input != INVALID_INDEX {
            Some(self.sync_range(source_state.input))
        } else {
            sync_range.copied()
        };
        let mut target_result = self.update_state_input(ctx, target_state.input, target_sync.as_ref());
        let previous_elapsed = machine.elapsed;
        machine.elapsed += ctx.delta_time;
        let is_active = ctx.is_in_active_branch();
        emit_state_events(ctx, node_idx, &target_state.entry_events, GraphEventType::Entry, is_active);
        emit_timed_events(
            ctx,
            node_idx,
            &target_state.timed_events,
            previous_elapsed,
            machine.elapsed,
            is_active,
        );
        let target_range = ctx.sampled_events.range_from(target_start_idx);

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

        machine.blended_track.blend_from(
            self.sync_track(source_state.input),
            self.sync_track(target_state.input),
            weight,
        );

        if ctx.is_in_layer() {
            ctx.layer_context.layer_weight *= lerp(source_state.layer_weight, target_state.layer_weight, weight);
        }

        if weight >= 1.0 {
            if source_state.input != INVALID_INDEX {
                self.shutdown_node(source_state.input);
            }
            machine.transition = None;
            machine.is_entering = false;
        } else {
            machine.transition = Some(transition);
        }

        PoseNodeResult {
            task_idx,
            root_motion_delta: Transform::blend(
                &source_result.root_motion_delta,
                &target_result.root_motion_delta,
                weight,
            ),
            sampled_event_range: ctx
                .sampled_events
                .blend_event_ranges(source_range, target_range, weight),
        }
    }
}

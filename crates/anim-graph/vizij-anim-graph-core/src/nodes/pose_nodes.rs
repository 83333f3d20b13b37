use std::sync::Arc;

use crate::context::GraphContext;
use crate::definition::NodeKind;
use crate::ids::NodeIndex;
use crate::math::{Percentage, Transform};
use crate::sync_track::{SyncTrackTime, SyncTrackTimeRange};
use crate::tasks::Task;

use super::{NodeArena, PoseNodeResult, PoseNodeTime};

/// Position reached by an unsynchronized clip after moving `delta` of a cycle, and the number
/// of loops completed on the way.
fn advance_clip(previous: Percentage, delta: f32, reverse: bool, allow_looping: bool) -> (Percentage, i32) {
    if !reverse {
        let raw = previous.value() + delta;
        if raw < 1.0 {
            (Percentage(raw), 0)
        } else if allow_looping {
            (Percentage(raw).normalized(), Percentage(raw).loop_count())
        } else {
            (Percentage::ONE, 0)
        }
    } else {
        let raw = previous.value() - delta;
        if raw >= 0.0 {
            (Percentage(raw), 0)
        } else if allow_looping {
            (Percentage(raw).normalized(), -Percentage(raw).loop_count())
        } else {
            (Percentage::ZERO, 0)
        }
    }
}

impl<'g> NodeArena<'g> {
    pub(super) fn initialize_clip(&mut self, node_idx: NodeIndex, initial_time: SyncTrackTime) {
        let NodeKind::AnimationClip {
            clip_idx,
            play_in_reverse,
            ..
        } = self.definition.node(node_idx)
        else {
            unreachable!()
        };
        let data_set = self.data_set;
        let clip = data_set.clip(*clip_idx);

        let mut start = clip.sync_track().get_percentage_through(initial_time, true);
        if *play_in_reverse {
            start = Percentage(1.0 - start.value());
        }
        *self.time_mut(node_idx) = PoseNodeTime {
            loop_count: 0,
            duration: clip.duration(),
            current_time: start,
            previous_time: start,
        };
    }

    pub(super) fn update_clip(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let definition = self.definition;
        let NodeKind::AnimationClip {
            clip_idx,
            speed_multiplier,
            play_in_reverse,
            allow_looping,
            sample_root_motion,
        } = definition.node(node_idx)
        else {
            unreachable!()
        };
        let reverse = *play_in_reverse;
        let data_set = self.data_set;
        let clip = data_set.clip(*clip_idx);

        let time = self.time_mut(node_idx);
        match sync_range {
            None => {
                let previous = time.current_time;
                let delta = time.cycle_delta(ctx.delta_time * speed_multiplier.abs());
                let (current, loops) = advance_clip(previous, delta, reverse, *allow_looping);
                time.previous_time = previous;
                time.current_time = current;
                time.loop_count += loops;
            }
            Some(range) => {
                let track = clip.sync_track();
                let mut start = track.get_percentage_through(range.start_time, true);
                let mut end = track.get_percentage_through(range.end_time, true);
                if reverse {
                    start = Percentage(1.0 - start.value());
                    end = Percentage(1.0 - end.value());
                }
                let wrapped = if reverse { end > start } else { end < start };
                time.previous_time = start;
                time.current_time = end;
                time.loop_count += wrapped as i32;
            }
        }
        time.duration = clip.duration();
        let (previous, current) = (time.previous_time, time.current_time);

        // Events and root motion are always read forwards through the clip.
        let (from, to) = if reverse { (current, previous) } else { (previous, current) };

        let start_idx = ctx.sampled_events.len();
        let is_active = ctx.is_in_active_branch();
        let events = &mut *ctx.sampled_events;
        clip.sample_events(from, to, |event, percentage_through| {
            events.emplace_animation_event(node_idx, event, percentage_through, 1.0, is_active);
        });

        let root_motion_delta = if *sample_root_motion {
            let delta = clip.root_motion_delta(from, to);
            if reverse {
                delta.inverse()
            } else {
                delta
            }
        } else {
            Transform::IDENTITY
        };

        let task_idx = ctx.task_system.register_task(
            node_idx,
            Task::Sample {
                clip: Arc::clone(clip),
                time: current,
            },
        );

        PoseNodeResult {
            task_idx,
            root_motion_delta,
            sampled_event_range: ctx.sampled_events.range_from(start_idx),
        }
    }

    pub(super) fn update_speed_scale(
        &mut self,
        ctx: &mut GraphContext,
        node_idx: NodeIndex,
        sync_range: Option<&SyncTrackTimeRange>,
    ) -> PoseNodeResult {
        let definition = self.definition;
        let NodeKind::SpeedScale { input, scale } = definition.node(node_idx) else {
            unreachable!()
        };
        let (input, scale_node) = (*input, *scale);

        let (result, scale) = if sync_range.is_some() {
            (self.update_pose(ctx, input, sync_range), 1.0)
        } else {
            let scale = self.get_value::<f32>(ctx, scale_node).max(0.0);
            let saved_delta_time = ctx.delta_time;
            ctx.delta_time *= scale;
            let result = self.update_pose(ctx, input, None);
            ctx.delta_time = saved_delta_time;
            (result, scale)
        };

        let mut time = self.time(input);
        if scale > 0.0 {
            time.duration /= scale;
        }
        *self.time_mut(node_idx) = time;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_playback_wraps_and_counts_loops() {
        assert_eq!(advance_clip(Percentage(0.5), 0.25, false, true), (Percentage(0.75), 0));
        assert_eq!(advance_clip(Percentage(0.75), 0.5, false, true), (Percentage(0.25), 1));
        assert_eq!(advance_clip(Percentage(0.75), 0.5, false, false), (Percentage::ONE, 0));
    }

    #[test]
    fn reverse_playback_wraps_below_zero() {
        assert_eq!(advance_clip(Percentage(0.5), 0.25, true, true), (Percentage(0.25), 0));
        assert_eq!(advance_clip(Percentage(0.25), 0.5, true, true), (Percentage(0.75), 1));
        assert_eq!(advance_clip(Percentage(0.25), 0.5, true, false), (Percentage::ZERO, 0));
        assert_eq!(advance_clip(Percentage(0.25), 0.25, true, true), (Percentage::ZERO, 0));
    }
}

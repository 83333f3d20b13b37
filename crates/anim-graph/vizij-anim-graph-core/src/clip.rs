//! Animation clip resource: sampled bone tracks, root motion, authored events and sync markers.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::ids::StringId;
use crate::math::{Percentage, Transform};
use crate::skeleton::{Pose, PoseKind, Skeleton};
use crate::sync_track::{SyncTrack, SyncTrackMarker};

/// Authored event. Times are in seconds; a zero duration marks an immediate event.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimationEvent {
    pub id: StringId,
    pub start_time: f32,
    #[serde(default)]
    pub duration: f32,
}

impl AnimationEvent {
    #[inline]
    pub fn is_immediate(&self) -> bool {
        self.duration <= 0.0
    }

    #[inline]
    pub fn end_time(&self) -> f32 {
        self.start_time + self.duration
    }
}

/// Per-frame local transforms for one bone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoneTrack {
    pub bone_id: StringId,
    pub frames: Vec<Transform>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnimationClipDescriptor {
    pub id: StringId,
    pub skeleton: StringId,
    /// Seconds.
    pub duration: f32,
    pub num_frames: u32,
    #[serde(default)]
    pub tracks: Vec<BoneTrack>,
    /// Model-space root transform per frame; empty when the clip has no root motion.
    #[serde(default)]
    pub root_motion: Vec<Transform>,
    #[serde(default)]
    pub sync_markers: Vec<SyncTrackMarker>,
    #[serde(default)]
    pub start_sync_event_offset: i32,
    #[serde(default)]
    pub events: Vec<AnimationEvent>,
}

#[derive(Clone, Debug)]
struct ResolvedTrack {
    bone_idx: usize,
    frames: Vec<Transform>,
}

/// Clip bound to a skeleton. Tracks are resolved to bone indices when the clip is built.
#[derive(Clone, Debug)]
pub struct AnimationClip {
    id: StringId,
    skeleton_id: StringId,
    duration: f32,
    num_frames: u32,
    tracks: Vec<ResolvedTrack>,
    root_motion: Vec<Transform>,
    sync_track: SyncTrack,
    events: Vec<AnimationEvent>,
}

impl AnimationClip {
    pub fn new(descriptor: AnimationClipDescriptor, skeleton: &Skeleton) -> Result<Self, GraphError> {
        let AnimationClipDescriptor {
            id,
            skeleton: skeleton_id,
            duration,
            num_frames,
            tracks,
            root_motion,
            sync_markers,
            start_sync_event_offset,
            mut events,
        } = descriptor;

        let invalid = |reason: String| GraphError::InvalidClip { clip: id, reason };

        if skeleton_id != skeleton.id() {
            return Err(invalid(format!(
                "authored for skeleton {skeleton_id}, bound to {}",
                skeleton.id()
            )));
        }
        if duration.is_nan() || duration <= 0.0 {
            return Err(invalid(format!("duration {duration} must be positive")));
        }
        if num_frames == 0 {
            return Err(invalid("clip has no frames".into()));
        }
        if !root_motion.is_empty() && root_motion.len() != num_frames as usize {
            return Err(invalid(format!(
                "root motion has {} frames, expected {num_frames}",
                root_motion.len()
            )));
        }

        let mut resolved = Vec::with_capacity(tracks.len());
        for track in tracks {
            let bone_idx = skeleton
                .bone_index(track.bone_id)
                .ok_or_else(|| invalid(format!("track bone {} is not in the skeleton", track.bone_id)))?;
            if track.frames.len() != num_frames as usize {
                return Err(invalid(format!(
                    "track for bone {} has {} frames, expected {num_frames}",
                    track.bone_id,
                    track.frames.len()
                )));
            }
            resolved.push(ResolvedTrack {
                bone_idx,
                frames: track.frames,
            });
        }

        for event in &events {
            if event.start_time < 0.0 || event.end_time() > duration + f32::EPSILON {
                return Err(invalid(format!(
                    "event {} [{}, {}] lies outside the clip",
                    event.id,
                    event.start_time,
                    event.end_time()
                )));
            }
        }
        events.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        Ok(Self {
            id,
            skeleton_id,
            duration,
            num_frames,
            tracks: resolved,
            root_motion,
            sync_track: SyncTrack::new(&sync_markers, start_sync_event_offset),
            events,
        })
    }

    #[inline]
    pub fn id(&self) -> StringId {
        self.id
    }

    #[inline]
    pub fn skeleton_id(&self) -> StringId {
        self.skeleton_id
    }

    /// Seconds.
    #[inline]
    pub fn duration(&self) -> f32 {
        self.duration
    }

    #[inline]
    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    #[inline]
    pub fn sync_track(&self) -> &SyncTrack {
        &self.sync_track
    }

    pub fn events(&self) -> &[AnimationEvent] {
        &self.events
    }

    #[inline]
    pub fn has_root_motion(&self) -> bool {
        !self.root_motion.is_empty()
    }

    fn frame_position(&self, percentage: Percentage) -> (usize, usize, f32) {
        let last_frame = self.num_frames as usize - 1;
        let frame = percentage.value().clamp(0.0, 1.0) * last_frame as f32;
        let lower = (frame.floor() as usize).min(last_frame);
        let upper = (lower + 1).min(last_frame);
        (lower, upper, frame - lower as f32)
    }

    /// Write the clip pose at `percentage` (in `[0, 1]`) into `pose`. Bones without a track
    /// get the skeleton reference transform.
    pub fn sample(&self, percentage: Percentage, skeleton: &Skeleton, pose: &mut Pose) {
        debug_assert_eq!(skeleton.id(), self.skeleton_id);
        pose.reset(PoseKind::Reference, skeleton);
        let (lower, upper, t) = self.frame_position(percentage);
        let transforms = pose.transforms_mut();
        for track in &self.tracks {
            transforms[track.bone_idx] = Transform::blend(&track.frames[lower], &track.frames[upper], t);
        }
        pose.mark_animated();
    }

    fn root_transform(&self, percentage: Percentage) -> Transform {
        let (lower, upper, t) = self.frame_position(percentage);
        Transform::blend(&self.root_motion[lower], &self.root_motion[upper], t)
    }

    /// Root displacement when playing forward from `from` to `to`; `to < from` means the
    /// playback looped past the end of the clip.
    pub fn root_motion_delta(&self, from: Percentage, to: Percentage) -> Transform {
        if !self.has_root_motion() {
            return Transform::IDENTITY;
        }
        if to.value() >= from.value() {
            Transform::delta(&self.root_transform(from), &self.root_transform(to))
        } else {
            let to_end = Transform::delta(&self.root_transform(from), &self.root_transform(Percentage::ONE));
            let from_start = Transform::delta(&self.root_transform(Percentage::ZERO), &self.root_transform(to));
            to_end * from_start
        }
    }

    /// Visit the events touched while playing forward from `from` to `to` (looping when
    /// `to < from`, nothing when `to == from`). Immediate events fire when their start lies in the window; durable
    /// events fire while they overlap it, with their percentage through at the window end.
    pub fn sample_events(&self, from: Percentage, to: Percentage, mut visit: impl FnMut(&AnimationEvent, Percentage)) {
        let from_time = from.value().clamp(0.0, 1.0) * self.duration;
        let to_time = to.value().clamp(0.0, 1.0) * self.duration;
        if to_time == from_time {
            return;
        }
        if to_time > from_time {
            self.sample_events_in_window(from_time, to_time, to_time >= self.duration, &mut visit);
        } else {
            self.sample_events_in_window(from_time, self.duration, true, &mut visit);
            self.sample_events_in_window(0.0, to_time, false, &mut visit);
        }
    }

    fn sample_events_in_window(
        &self,
        start: f32,
        end: f32,
        include_end: bool,
        visit: &mut impl FnMut(&AnimationEvent, Percentage),
    ) {
        for event in &self.events {
            if event.start_time > end {
                break;
            }
            if event.is_immediate() {
                let in_window = event.start_time >= start && (event.start_time < end || (include_end && event.start_time == end));
                if in_window {
                    visit(event, Percentage::ONE);
                }
            } else if event.end_time() >= start {
                let through = (end.clamp(event.start_time, event.end_time()) - event.start_time) / event.duration;
                visit(event, Percentage(through));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::skeleton::{BoneDescriptor, SkeletonDescriptor};

    fn skeleton() -> Skeleton {
        Skeleton::new(SkeletonDescriptor {
            id: "rig".into(),
            bones: vec![
                BoneDescriptor {
                    id: "root".into(),
                    parent: None,
                    reference: Transform::IDENTITY,
                },
                BoneDescriptor {
                    id: "hand".into(),
                    parent: Some("root".into()),
                    reference: Transform::from_translation(Vec3::Z),
                },
            ],
            bone_masks: vec![],
        })
        .unwrap()
    }

    fn descriptor() -> AnimationClipDescriptor {
        AnimationClipDescriptor {
            id: "walk".into(),
            skeleton: "rig".into(),
            duration: 1.0,
            num_frames: 3,
            tracks: vec![BoneTrack {
                bone_id: "root".into(),
                frames: vec![
                    Transform::from_translation(Vec3::ZERO),
                    Transform::from_translation(Vec3::X),
                    Transform::from_translation(Vec3::X * 2.0),
                ],
            }],
            root_motion: vec![
                Transform::from_translation(Vec3::ZERO),
                Transform::from_translation(Vec3::Z),
                Transform::from_translation(Vec3::Z * 2.0),
            ],
            sync_markers: vec![],
            start_sync_event_offset: 0,
            events: vec![
                AnimationEvent {
                    id: "step".into(),
                    start_time: 0.5,
                    duration: 0.0,
                },
                AnimationEvent {
                    id: "swing".into(),
                    start_time: 0.2,
                    duration: 0.4,
                },
            ],
        }
    }

    fn clip() -> AnimationClip {
        AnimationClip::new(descriptor(), &skeleton()).unwrap()
    }

    #[test]
    fn samples_between_frames_and_keeps_untracked_reference() {
        let skeleton = skeleton();
        let mut pose = Pose::new(&skeleton);
        clip().sample(Percentage(0.75), &skeleton, &mut pose);
        assert!(pose.transform(0).translation.abs_diff_eq(Vec3::X * 1.5, 1e-6));
        assert_eq!(pose.transform(1).translation, Vec3::Z);
        assert_eq!(pose.kind(), PoseKind::Animated);
    }

    #[test]
    fn root_motion_handles_loop_wrap() {
        let clip = clip();
        let forward = clip.root_motion_delta(Percentage(0.25), Percentage(0.75));
        assert!(forward.translation.abs_diff_eq(Vec3::Z, 1e-6));
        let wrapped = clip.root_motion_delta(Percentage(0.75), Percentage(0.25));
        assert!(wrapped.translation.abs_diff_eq(Vec3::Z, 1e-6));
    }

    #[test]
    fn events_split_on_wrap() {
        let clip = clip();
        let mut seen = Vec::new();
        clip.sample_events(Percentage(0.4), Percentage(0.6), |event, through| seen.push((event.id, through.value())));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, StringId::new("swing"));
        assert!((seen[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(seen[1].0, StringId::new("step"));

        let mut wrapped = Vec::new();
        clip.sample_events(Percentage(0.9), Percentage(0.1), |event, _| wrapped.push(event.id));
        assert!(wrapped.is_empty());

        // A durable event overlapping both halves of the wrapped window is reported per half.
        let mut ids = Vec::new();
        let mut through = Vec::new();
        clip.sample_events(Percentage(0.55), Percentage(0.3), |event, p| {
            ids.push(event.id);
            through.push(p.value());
        });
        assert_eq!(ids, vec![StringId::new("swing"), StringId::new("swing")]);
        assert!((through[0] - 1.0).abs() < 1e-5);
        assert!((through[1] - 0.25).abs() < 1e-5);
    }

    #[test]
    fn clamped_end_does_not_refire_events() {
        let mut descriptor = descriptor();
        descriptor.events.push(AnimationEvent {
            id: "land".into(),
            start_time: 1.0,
            duration: 0.0,
        });
        let clip = AnimationClip::new(descriptor, &skeleton()).unwrap();

        let mut ids = Vec::new();
        clip.sample_events(Percentage(0.9), Percentage::ONE, |event, _| ids.push(event.id));
        assert_eq!(ids, vec![StringId::new("land")]);

        ids.clear();
        clip.sample_events(Percentage::ONE, Percentage::ONE, |event, _| ids.push(event.id));
        assert!(ids.is_empty());
    }

    #[test]
    fn rejects_tracks_for_unknown_bones() {
        let mut descriptor = AnimationClipDescriptor {
            id: "bad".into(),
            skeleton: "rig".into(),
            duration: 1.0,
            num_frames: 1,
            tracks: vec![BoneTrack {
                bone_id: "tail".into(),
                frames: vec![Transform::IDENTITY],
            }],
            root_motion: vec![],
            sync_markers: vec![],
            start_sync_event_offset: 0,
            events: vec![],
        };
        assert!(matches!(
            AnimationClip::new(descriptor.clone(), &skeleton()),
            Err(GraphError::InvalidClip { .. })
        ));
        descriptor.tracks.clear();
        descriptor.duration = 0.0;
        assert!(AnimationClip::new(descriptor, &skeleton()).is_err());
    }
}

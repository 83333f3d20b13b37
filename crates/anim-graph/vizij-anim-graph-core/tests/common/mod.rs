#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use vizij_anim_graph_core::{
    clip::AnimationClipDescriptor,
    skeleton::{BoneDescriptor, BoneWeight},
    sync_track::SyncTrackMarker,
    AnimationClip, AnimationEvent, BoneMaskDefinition, BoneTrack, GraphDataSet, GraphDefinition, GraphInstance,
    GraphInstanceConfig, GraphVariation, NodeDefinition, NodeIndex, NodeKind, Skeleton, SkeletonDescriptor,
    StringId, SyncTrackTime, Transform,
};

pub const BONES: [&str; 5] = ["root", "hips", "spine", "head", "leg"];

pub fn approx(a: f32, b: f32, eps: f32) {
    assert!((a - b).abs() <= eps, "left={a} right={b} eps={eps}");
}

/// root -> hips -> spine -> head, hips -> leg, with an "upper_body" mask on spine and head.
pub fn mk_skeleton(id: &str) -> Arc<Skeleton> {
    let bones = [
        ("root", None),
        ("hips", Some("root")),
        ("spine", Some("hips")),
        ("head", Some("spine")),
        ("leg", Some("hips")),
    ]
    .into_iter()
    .map(|(id, parent)| BoneDescriptor {
        id: id.into(),
        parent: parent.map(StringId::from),
        reference: Transform::IDENTITY,
    })
    .collect();
    let upper_body = BoneMaskDefinition::new(
        "upper_body",
        vec![
            BoneWeight {
                bone_id: "spine".into(),
                weight: 1.0,
            },
            BoneWeight {
                bone_id: "head".into(),
                weight: 1.0,
            },
        ],
    );
    let descriptor = SkeletonDescriptor {
        id: id.into(),
        bones,
        bone_masks: vec![upper_body],
    };
    Arc::new(Skeleton::new(descriptor).unwrap())
}

pub fn bone_idx(skeleton: &Skeleton, name: &str) -> usize {
    skeleton.bone_index(name.into()).unwrap()
}

/// Clip that holds every bone at `x` translation, moves the root forward at `root_speed`
/// m/s, and carries the given normalized sync markers and events.
pub fn mk_clip(
    skeleton: &Skeleton,
    id: &str,
    duration: f32,
    x: f32,
    root_speed: f32,
    markers: &[f32],
    events: Vec<AnimationEvent>,
) -> Arc<AnimationClip> {
    let pose = Transform::from_translation(Vec3::new(x, 0.0, 0.0));
    let tracks = BONES
        .iter()
        .map(|bone| BoneTrack {
            bone_id: (*bone).into(),
            frames: vec![pose; 3],
        })
        .collect();
    let distance = root_speed * duration;
    let root_motion = [0.0, 0.5, 1.0]
        .iter()
        .map(|t| Transform::from_translation(Vec3::new(0.0, 0.0, distance * t)))
        .collect();
    let sync_markers = markers
        .iter()
        .enumerate()
        .map(|(i, start)| SyncTrackMarker::new(StringId::new(&format!("m{i}")), *start))
        .collect();
    let descriptor = AnimationClipDescriptor {
        id: id.into(),
        skeleton: skeleton.id(),
        duration,
        num_frames: 3,
        tracks,
        root_motion,
        sync_markers,
        start_sync_event_offset: 0,
        events,
    };
    Arc::new(AnimationClip::new(descriptor, skeleton).unwrap())
}

pub fn immediate_event(id: &str, start_time: f32) -> AnimationEvent {
    AnimationEvent {
        id: id.into(),
        start_time,
        duration: 0.0,
    }
}

pub fn mk_definition(id: &str, kinds: Vec<NodeKind>, root: NodeIndex) -> Arc<GraphDefinition> {
    let nodes = kinds
        .into_iter()
        .enumerate()
        .map(|(idx, kind)| NodeDefinition::new(idx as NodeIndex, kind))
        .collect();
    Arc::new(GraphDefinition::new(id.into(), nodes, root).unwrap())
}

pub fn mk_variation(
    skeleton: &Arc<Skeleton>,
    clips: Vec<Arc<AnimationClip>>,
    kinds: Vec<NodeKind>,
    root: NodeIndex,
) -> GraphVariation {
    let definition = mk_definition("graph", kinds, root);
    let data_set = Arc::new(GraphDataSet::new(Arc::clone(skeleton), clips));
    GraphVariation::new(definition, data_set).unwrap()
}

pub fn recording_config() -> GraphInstanceConfig {
    GraphInstanceConfig {
        record_active_nodes: true,
        ..GraphInstanceConfig::default()
    }
}

pub fn mk_instance(variation: GraphVariation) -> GraphInstance {
    let mut instance = GraphInstance::with_config(variation, 7, recording_config());
    instance.initialize(SyncTrackTime::default());
    instance
}

pub fn clip_node(clip_idx: u16) -> NodeKind {
    NodeKind::AnimationClip {
        clip_idx,
        speed_multiplier: 1.0,
        play_in_reverse: false,
        allow_looping: true,
        sample_root_motion: true,
    }
}

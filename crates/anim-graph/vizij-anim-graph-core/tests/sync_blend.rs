mod common;

use std::sync::Arc;

use common::approx;
use vizij_anim_graph_core::{
    clip::AnimationClipDescriptor, skeleton::PoseKind, AnimationClip, GraphDataSet, GraphDefinition, GraphInstance,
    GraphInstanceConfig, GraphVariation, Skeleton, SyncTrackTime, Transform,
};
use vizij_test_fixtures::{clips, graphs, skeletons};

const BLEND: i16 = 3;
const WALK: i16 = 1;
const RUN: i16 = 2;

fn locomotion() -> GraphInstance {
    let skeleton: Skeleton = skeletons::load("biped").unwrap();
    let skeleton = Arc::new(skeleton);
    let clips = ["walk", "run"]
        .iter()
        .map(|name| {
            let descriptor: AnimationClipDescriptor = clips::load(name).unwrap();
            Arc::new(AnimationClip::new(descriptor, &skeleton).unwrap())
        })
        .collect();
    let definition: GraphDefinition = graphs::load("locomotion").unwrap();
    let data_set = Arc::new(GraphDataSet::new(skeleton, clips));
    let variation = GraphVariation::new(Arc::new(definition), data_set).unwrap();

    let config = GraphInstanceConfig {
        record_active_nodes: true,
        ..GraphInstanceConfig::default()
    };
    let mut instance = GraphInstance::with_config(variation, 1, config);
    instance.initialize(SyncTrackTime::default());
    instance
}

fn set_speed(instance: &mut GraphInstance, speed: f32) {
    let speed_idx = instance.control_parameter_index("speed").unwrap();
    instance.set_control_parameter_value(speed_idx, speed);
}

#[test]
fn synchronized_blend_uses_lcm_track_and_scaled_duration() {
    let mut instance = locomotion();
    set_speed(&mut instance, 0.5);
    instance.evaluate_graph(0.3, Transform::IDENTITY, None, false);

    let info = instance.pose_node_debug_info(BLEND);
    // 3 walk events and 2 run events.
    assert_eq!(info.sync_track.num_events(), 6);
    // Both clips cover 6 events in 2.4s: two walk cycles, three run cycles.
    approx(info.time.duration, 2.4, 1e-3);
    approx(info.time.current_time.value(), 0.125, 1e-4);
}

#[test]
fn synchronized_inputs_stay_in_step_and_count_loops() {
    let mut instance = locomotion();
    set_speed(&mut instance, 0.5);

    let mut previous = instance.pose_node_debug_info(BLEND).time;
    for _ in 0..15 {
        instance.evaluate_graph(0.3, Transform::IDENTITY, None, false);
        let time = instance.pose_node_debug_info(BLEND).time;
        if time.current_time < previous.current_time {
            assert_eq!(time.loop_count, previous.loop_count + 1);
        } else {
            assert_eq!(time.loop_count, previous.loop_count);
        }
        previous = time;
    }

    // 4.5s of playback: 1.875 blended cycles, 3.75 walk cycles, 5.625 run cycles.
    assert_eq!(instance.pose_node_debug_info(BLEND).time.loop_count, 1);
    approx(instance.pose_node_debug_info(BLEND).time.current_time.value(), 0.875, 1e-3);

    let walk = *instance.node(WALK).pose_time().unwrap();
    assert_eq!(walk.loop_count, 3);
    approx(walk.current_time.value(), 0.75, 1e-3);

    let run = *instance.node(RUN).pose_time().unwrap();
    assert_eq!(run.loop_count, 5);
    approx(run.current_time.value(), 0.625, 1e-3);
}

#[test]
fn root_motion_and_pose_are_weighted_by_the_parameter() {
    let mut instance = locomotion();
    set_speed(&mut instance, 0.5);

    for _ in 0..10 {
        instance.evaluate_graph(0.3, Transform::IDENTITY, None, false);
        // Walk moves 1 m/s and run 2 m/s.
        approx(instance.root_motion_delta().translation.z, 0.45, 1e-3);
    }

    instance.execute_tasks();
    let pose = instance.primary_pose().unwrap();
    assert_eq!(pose.kind(), PoseKind::Animated);
    let hips = instance.skeleton().bone_index("hips".into()).unwrap();
    approx(pose.transform(hips).translation.x, 0.5, 1e-5);
}

#[test]
fn out_of_range_parameter_updates_a_single_input() {
    let mut instance = locomotion();
    set_speed(&mut instance, -1.0);
    instance.evaluate_graph(0.3, Transform::IDENTITY, None, false);

    assert!(instance.active_nodes().contains(&WALK));
    assert!(!instance.active_nodes().contains(&RUN));
    approx(instance.root_motion_delta().translation.z, 0.3, 1e-4);
    // The blend reports the walk clip's own playback.
    approx(instance.pose_node_debug_info(BLEND).time.duration, 1.2, 1e-5);
    assert_eq!(instance.pose_node_debug_info(BLEND).sync_track.num_events(), 3);

    let events = instance.sampled_events();
    assert_eq!(events.num_animation_events(), 1);
    approx(events.events()[0].weight(), 1.0, 0.0);
}

#[test]
fn reset_restarts_playback_but_keeps_parameters() {
    let mut instance = locomotion();
    set_speed(&mut instance, 1.0);
    for _ in 0..3 {
        instance.evaluate_graph(0.2, Transform::IDENTITY, None, false);
    }
    assert!(instance.node(RUN).pose_time().unwrap().current_time.value() > 0.0);

    instance.reset_graph_state(SyncTrackTime::default());
    let speed_idx = instance.control_parameter_index("speed").unwrap();
    approx(instance.control_parameter_value::<f32>(speed_idx), 1.0, 0.0);
    approx(instance.node(RUN).pose_time().unwrap().current_time.value(), 0.0, 0.0);
}

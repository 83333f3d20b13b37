mod common;

use common::*;
use vizij_anim_graph_core::{
    skeleton::PoseKind, GraphError, GraphInstance, GraphValue, NodeKind, Severity, StringId, SyncTrackTime,
    Transform,
};

const SPEED: i16 = 0;
const MODE: i16 = 1;
const SLOT: i16 = 2;

fn mk_parent() -> GraphInstance {
    let skeleton = mk_skeleton("biped");
    let variation = mk_variation(
        &skeleton,
        Vec::new(),
        vec![
            NodeKind::ControlParameter {
                id: "speed".into(),
                value: GraphValue::Float(0.0),
            },
            NodeKind::ControlParameter {
                id: "mode".into(),
                value: GraphValue::Float(0.0),
            },
            NodeKind::ExternalGraph {
                slot_id: "upper".into(),
            },
        ],
        SLOT,
    );
    mk_instance(variation)
}

/// Blends a clip holding bones at x = 0 towards one at x = 1 by its "speed" parameter. Its
/// "mode" parameter is a bool, unlike the parent's.
fn mk_child(skeleton_id: &str) -> GraphInstance {
    let skeleton = mk_skeleton(skeleton_id);
    let still = mk_clip(&skeleton, "still", 1.0, 0.0, 0.0, &[], Vec::new());
    let moved = mk_clip(&skeleton, "moved", 1.0, 1.0, 2.0, &[], vec![immediate_event("child_event", 0.0)]);
    let variation = mk_variation(
        &skeleton,
        vec![still, moved],
        vec![
            NodeKind::ControlParameter {
                id: "speed".into(),
                value: GraphValue::Float(0.0),
            },
            NodeKind::ControlParameter {
                id: "mode".into(),
                value: GraphValue::Bool(false),
            },
            clip_node(0),
            clip_node(1),
            NodeKind::Blend1D {
                inputs: vec![2, 3],
                parameter_values: vec![0.0, 1.0],
                parameter: 0,
                is_synchronized: false,
            },
        ],
        4,
    );
    GraphInstance::new(variation, 7)
}

fn hips_x(instance: &GraphInstance) -> f32 {
    let hips = bone_idx(instance.skeleton(), "hips");
    instance.primary_pose().unwrap().transform(hips).translation.x
}

#[test]
fn empty_slot_produces_the_reference_pose() {
    let mut parent = mk_parent();
    parent.evaluate_graph(0.1, Transform::IDENTITY, None, false);
    parent.execute_tasks();
    assert_eq!(parent.primary_pose().unwrap().kind(), PoseKind::Reference);
    assert!(parent.external_graph("upper").is_none());
}

#[test]
fn attached_graph_reads_parent_parameters() {
    let mut parent = mk_parent();
    parent.connect_external_graph("upper", mk_child("biped")).unwrap();
    assert!(parent.external_graph("upper").unwrap().is_initialized());

    parent.set_control_parameter_value(SPEED, 1.0f32);
    parent.evaluate_graph(0.1, Transform::IDENTITY, None, false);
    parent.execute_tasks();

    approx(hips_x(&parent), 1.0, 1e-6);
    approx(parent.root_motion_delta().translation.z, 0.2, 1e-5);

    // Child events are appended to the parent buffer.
    let events = parent.sampled_events().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id(), StringId::from("child_event"));
}

#[test]
fn mismatched_parameter_types_are_logged_and_skipped() {
    let mut parent = mk_parent();
    parent.set_control_parameter_value(MODE, 3.0f32);
    parent.connect_external_graph("upper", mk_child("biped")).unwrap();

    let warning = parent
        .log()
        .entries()
        .iter()
        .find(|entry| entry.severity == Severity::Warning)
        .unwrap();
    assert_eq!(warning.node_idx, SLOT);

    // Updating still works and the child keeps its own value.
    parent.evaluate_graph(0.1, Transform::IDENTITY, None, false);
    let child = parent.external_graph("upper").unwrap();
    let mode_idx = child.control_parameter_index("mode").unwrap();
    assert!(!child.control_parameter_value::<bool>(mode_idx));
}

#[test]
fn connect_rejects_bad_requests() {
    let mut parent = mk_parent();

    let err = parent.connect_external_graph("missing", mk_child("biped")).unwrap_err();
    assert!(matches!(err, GraphError::UnknownExternalSlot(_)));

    let err = parent.connect_external_graph("upper", mk_child("quadruped")).unwrap_err();
    assert!(matches!(err, GraphError::SkeletonMismatch { .. }));

    parent.connect_external_graph("upper", mk_child("biped")).unwrap();
    let err = parent.connect_external_graph("upper", mk_child("biped")).unwrap_err();
    assert!(matches!(err, GraphError::ExternalSlotOccupied(_)));
}

#[test]
fn disconnect_returns_a_shut_down_graph_and_falls_back() {
    let mut parent = mk_parent();
    parent.connect_external_graph("upper", mk_child("biped")).unwrap();
    parent.set_control_parameter_value(SPEED, 1.0f32);
    parent.evaluate_graph(0.1, Transform::IDENTITY, None, false);

    let child = parent.disconnect_external_graph("upper").unwrap().unwrap();
    assert!(!child.is_initialized());
    assert!(parent.disconnect_external_graph("upper").unwrap().is_none());

    parent.evaluate_graph(0.1, Transform::IDENTITY, None, false);
    parent.execute_tasks();
    assert_eq!(parent.primary_pose().unwrap().kind(), PoseKind::Reference);
    assert!(parent.sampled_events().is_empty());
}

#[test]
fn graph_attached_to_an_inactive_parent_waits_for_initialization() {
    let skeleton = mk_skeleton("biped");
    let variation = mk_variation(
        &skeleton,
        Vec::new(),
        vec![NodeKind::ExternalGraph {
            slot_id: "upper".into(),
        }],
        0,
    );
    let mut parent = GraphInstance::new(variation, 1);
    parent.connect_external_graph("upper", mk_child("biped")).unwrap();
    assert!(!parent.external_graph("upper").unwrap().is_initialized());

    parent.initialize(SyncTrackTime::default());
    assert!(parent.external_graph("upper").unwrap().is_initialized());
    parent.shutdown();
    assert!(!parent.external_graph("upper").unwrap().is_initialized());
}

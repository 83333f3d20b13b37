mod common;

use common::*;
use vizij_anim_graph_core::{
    definition::LayerDefinition, GraphInstance, GraphValue, NodeKind, Transform, INVALID_INDEX,
};

const LAYER_WEIGHT: i16 = 0;
const BASE: i16 = 1;
const OVERLAY: i16 = 2;
const MASK: i16 = 3;
const LAYERS: i16 = 4;

fn mk_layered(bone_mask: i16) -> GraphInstance {
    let skeleton = mk_skeleton("biped");
    let base = mk_clip(&skeleton, "base", 1.0, 0.0, 1.0, &[], Vec::new());
    let overlay = mk_clip(&skeleton, "overlay", 1.0, 1.0, 3.0, &[], vec![immediate_event("wave", 0.05)]);
    let variation = mk_variation(
        &skeleton,
        vec![base, overlay],
        vec![
            NodeKind::ControlParameter {
                id: "layer_weight".into(),
                value: GraphValue::Float(1.0),
            },
            clip_node(0),
            clip_node(1),
            NodeKind::BoneMask {
                mask_id: "upper_body".into(),
            },
            NodeKind::LayerBlend {
                base: BASE,
                layers: vec![LayerDefinition {
                    input: OVERLAY,
                    weight: LAYER_WEIGHT,
                    bone_mask,
                    is_synchronized: false,
                }],
            },
        ],
        LAYERS,
    );
    mk_instance(variation)
}

fn bone_x(instance: &GraphInstance, bone: &str) -> f32 {
    let bone_idx = bone_idx(instance.skeleton(), bone);
    instance.primary_pose().unwrap().transform(bone_idx).translation.x
}

#[test]
fn masked_layer_only_affects_masked_bones() {
    let mut instance = mk_layered(MASK);
    instance.evaluate_graph(0.1, Transform::IDENTITY, None, false);
    assert!(!instance.task_system().was_executed());
    assert!(instance.primary_pose().is_none());
    instance.execute_tasks();
    assert!(instance.task_system().was_executed());
    // No mask slot stays acquired once the blend has run.
    assert_eq!(instance.task_system().bone_mask_pool().num_used(), 0);

    approx(bone_x(&instance, "root"), 0.0, 1e-6);
    // Feathered halfway between the root and the spine.
    approx(bone_x(&instance, "hips"), 0.5, 1e-6);
    approx(bone_x(&instance, "spine"), 1.0, 1e-6);
    approx(bone_x(&instance, "head"), 1.0, 1e-6);
    // Unlisted bones inherit their parent's weight.
    approx(bone_x(&instance, "leg"), 0.5, 1e-6);
}

#[test]
fn layer_weight_scales_pose_and_events_but_not_root_motion() {
    let mut instance = mk_layered(INVALID_INDEX);
    instance.set_control_parameter_value(LAYER_WEIGHT, 0.25f32);
    instance.evaluate_graph(0.1, Transform::IDENTITY, None, false);
    instance.execute_tasks();

    for bone in BONES {
        approx(bone_x(&instance, bone), 0.25, 1e-6);
    }

    let events = instance.sampled_events().events();
    assert_eq!(events.len(), 1);
    approx(events[0].weight(), 0.25, 1e-6);

    // Base moves 1 m/s; the overlay's 3 m/s is ignored.
    approx(instance.root_motion_delta().translation.z, 0.1, 1e-5);
}

#[test]
fn zero_weight_layer_registers_no_blend() {
    let mut instance = mk_layered(MASK);
    instance.set_control_parameter_value(LAYER_WEIGHT, 0.0f32);
    instance.evaluate_graph(0.1, Transform::IDENTITY, None, false);
    instance.execute_tasks();

    let tasks = instance.task_system().tasks();
    assert!(tasks.iter().all(|task| task.node_idx != LAYERS));
    for bone in BONES {
        approx(bone_x(&instance, bone), 0.0, 1e-6);
    }
}

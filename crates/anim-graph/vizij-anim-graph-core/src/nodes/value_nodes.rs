use crate::bone_mask::BoneMaskTaskList;
use crate::context::GraphContext;
use crate::definition::{ComparisonOp, FloatMathOp, IdComparisonOp, NodeKind, VectorComponent};
use crate::ids::{NodeIndex, StringId, INVALID_INDEX};
use crate::math::lerp;
use crate::value::{GraphValue, Target};

use super::NodeArena;

impl<'g> NodeArena<'g> {
    /// New output of a value node, or `None` when the stored value is the output.
    pub(super) fn compute_value(&mut self, ctx: &mut GraphContext, node_idx: NodeIndex) -> Option<GraphValue> {
        let definition = self.definition;
        let value = match definition.node(node_idx) {
            NodeKind::ControlParameter { .. } | NodeKind::Constant { .. } => return None,
            NodeKind::VirtualParameter { input, .. } => {
                self.evaluate_value(ctx, *input);
                self.node(*input).value().cloned()?
            }

            NodeKind::FloatMath { a, b, constant, op } => {
                let a = self.get_value::<f32>(ctx, *a);
                let b = if *b != INVALID_INDEX {
                    self.get_value::<f32>(ctx, *b)
                } else {
                    *constant
                };
                GraphValue::Float(match op {
                    FloatMathOp::Add => a + b,
                    FloatMathOp::Subtract => a - b,
                    FloatMathOp::Multiply => a * b,
                    FloatMathOp::Divide => {
                        if b == 0.0 {
                            ctx.log_warning(node_idx, format!("division of {a} by zero"));
                            0.0
                        } else {
                            a / b
                        }
                    }
                })
            }
            NodeKind::FloatClamp { input, min, max } => {
                GraphValue::Float(self.get_value::<f32>(ctx, *input).clamp(*min, *max))
            }
            NodeKind::FloatRemap {
                input,
                input_range,
                output_range,
            } => {
                let value = self.get_value::<f32>(ctx, *input);
                let span = input_range.end - input_range.begin;
                let t = if span != 0.0 {
                    ((value - input_range.begin) / span).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                GraphValue::Float(lerp(output_range.begin, output_range.end, t))
            }
            NodeKind::FloatComparison {
                input,
                comparand,
                constant,
                op,
                epsilon,
            } => {
                let value = self.get_value::<f32>(ctx, *input);
                let comparand = if *comparand != INVALID_INDEX {
                    self.get_value::<f32>(ctx, *comparand)
                } else {
                    *constant
                };
                GraphValue::Bool(match op {
                    ComparisonOp::GreaterThanEqual => value >= comparand,
                    ComparisonOp::LessThanEqual => value <= comparand,
                    ComparisonOp::NearEqual => (value - comparand).abs() <= *epsilon,
                    ComparisonOp::GreaterThan => value > comparand,
                    ComparisonOp::LessThan => value < comparand,
                })
            }
            NodeKind::FloatSwitch {
                switch,
                if_true,
                if_false,
            } => {
                let selected = if self.get_value::<bool>(ctx, *switch) {
                    *if_true
                } else {
                    *if_false
                };
                GraphValue::Float(self.get_value::<f32>(ctx, selected))
            }

            NodeKind::And { inputs } => {
                let mut result = true;
                for input in inputs {
                    result &= self.get_value::<bool>(ctx, *input);
                }
                GraphValue::Bool(result)
            }
            NodeKind::Or { inputs } => {
                let mut result = false;
                for input in inputs {
                    result |= self.get_value::<bool>(ctx, *input);
                }
                GraphValue::Bool(result)
            }
            NodeKind::Not { input } => GraphValue::Bool(!self.get_value::<bool>(ctx, *input)),
            NodeKind::IdComparison { input, ids, op } => {
                let id = self.get_value::<StringId>(ctx, *input);
                let found = ids.contains(&id);
                GraphValue::Bool(match op {
                    IdComparisonOp::Matches => found,
                    IdComparisonOp::DoesNotMatch => !found,
                })
            }
            NodeKind::VectorInfo { input, component } => {
                let vector = self.get_value::<glam::Vec3>(ctx, *input);
                GraphValue::Float(match component {
                    VectorComponent::X => vector.x,
                    VectorComponent::Y => vector.y,
                    VectorComponent::Z => vector.z,
                    VectorComponent::Length => vector.length(),
                })
            }
            NodeKind::IsTargetSet { input } => GraphValue::Bool(self.get_value::<Target>(ctx, *input).is_set()),

            NodeKind::BoneMask { mask_id } => {
                match self.data_set.skeleton().bone_mask_definition_index(*mask_id) {
                    Some(mask_idx) => GraphValue::BoneMask(BoneMaskTaskList::from_mask(mask_idx as u16)),
                    None => {
                        ctx.log_warning(node_idx, format!("skeleton has no bone mask {mask_id}"));
                        GraphValue::BoneMask(BoneMaskTaskList::from_fixed_weight(0.0))
                    }
                }
            }
            NodeKind::FixedWeightBoneMask { weight } => {
                GraphValue::BoneMask(BoneMaskTaskList::from_fixed_weight(*weight))
            }
            NodeKind::BoneMaskBlend {
                source,
                target,
                blend_weight,
            } => {
                let source = self.get_value::<BoneMaskTaskList>(ctx, *source);
                let target = self.get_value::<BoneMaskTaskList>(ctx, *target);
                let weight = self.get_value::<f32>(ctx, *blend_weight).clamp(0.0, 1.0);
                GraphValue::BoneMask(BoneMaskTaskList::blended(&source, &target, weight))
            }
            NodeKind::BoneMaskCombine { source, target } => {
                let source = self.get_value::<BoneMaskTaskList>(ctx, *source);
                let target = self.get_value::<BoneMaskTaskList>(ctx, *target);
                GraphValue::BoneMask(BoneMaskTaskList::combined(&source, &target))
            }

            _ => unreachable!("node {node_idx} is not a value node"),
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3;

    use crate::bone_mask::test_support::chain_skeleton;
    use crate::bone_mask::BoneMaskTaskType;
    use crate::config::GraphInstanceConfig;
    use crate::definition::{FloatRange, GraphDataSet, GraphDefinition, NodeDefinition};
    use crate::graph_log::GraphLog;
    use crate::math::Transform;
    use crate::nodes::GraphNode;
    use crate::sampled_events::SampledEventsBuffer;
    use crate::skeleton::BoneMaskDefinition;
    use crate::sync_track::{SyncTrack, SyncTrackTime};
    use crate::tasks::TaskSystem;

    use super::*;

    /// Evaluate `target` in a graph made of `value_nodes` plus a trailing reference pose root.
    fn evaluate(value_nodes: Vec<NodeKind>, target: NodeIndex) -> (GraphValue, GraphLog) {
        let mut kinds = value_nodes;
        kinds.push(NodeKind::ReferencePose);
        let root = kinds.len() as NodeIndex - 1;
        let nodes = kinds
            .into_iter()
            .enumerate()
            .map(|(idx, kind)| NodeDefinition::new(idx as NodeIndex, kind))
            .collect();
        let definition = GraphDefinition::new("values".into(), nodes, root).unwrap();

        let skeleton = chain_skeleton(vec![BoneMaskDefinition::new("upper", Vec::new())]);
        let data_set = GraphDataSet::new(Arc::clone(&skeleton), Vec::new());
        let mut runtime: Vec<GraphNode> = definition
            .nodes()
            .iter()
            .map(|node| GraphNode::new(&node.kind, definition.output_type(node.node_idx)))
            .collect();
        let default_track = SyncTrack::default();

        let mut task_system = TaskSystem::new(
            Arc::clone(&skeleton),
            Arc::clone(data_set.bone_masks()),
            &GraphInstanceConfig::default(),
        );
        let mut events = SampledEventsBuffer::with_capacity(4);
        let mut log = GraphLog::new();
        let mut ctx = GraphContext::new(
            0,
            &skeleton,
            &mut task_system,
            &mut events,
            &mut log,
            1,
            0.016,
            Transform::IDENTITY,
            None,
        );
        let mut arena = NodeArena {
            definition: &definition,
            data_set: &data_set,
            default_sync_track: &default_track,
            nodes: &mut runtime,
        };
        arena.initialize_node(target, SyncTrackTime::default());
        arena.evaluate_value(&mut ctx, target);
        let value = arena.node(target).value().cloned().unwrap();
        arena.shutdown_node(target);
        drop(ctx);
        (value, log)
    }

    fn float(value: f32) -> NodeKind {
        NodeKind::Constant {
            value: GraphValue::Float(value),
        }
    }

    #[test]
    fn division_by_zero_logs_and_yields_zero() {
        let (value, log) = evaluate(
            vec![
                float(4.0),
                NodeKind::FloatMath {
                    a: 0,
                    b: INVALID_INDEX,
                    constant: 0.0,
                    op: FloatMathOp::Divide,
                },
            ],
            1,
        );
        assert_eq!(value, GraphValue::Float(0.0));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].node_idx, 1);
    }

    #[test]
    fn remap_clamps_to_the_input_range() {
        let remap = |input: f32| {
            evaluate(
                vec![
                    float(input),
                    NodeKind::FloatRemap {
                        input: 0,
                        input_range: FloatRange { begin: 0.0, end: 2.0 },
                        output_range: FloatRange { begin: 10.0, end: 20.0 },
                    },
                ],
                1,
            )
            .0
        };
        assert_eq!(remap(1.0), GraphValue::Float(15.0));
        assert_eq!(remap(5.0), GraphValue::Float(20.0));
        assert_eq!(remap(-1.0), GraphValue::Float(10.0));
    }

    #[test]
    fn switch_only_reads_the_selected_branch() {
        let (value, _) = evaluate(
            vec![
                NodeKind::Constant {
                    value: GraphValue::Bool(false),
                },
                float(1.0),
                float(2.0),
                NodeKind::FloatSwitch {
                    switch: 0,
                    if_true: 1,
                    if_false: 2,
                },
            ],
            3,
        );
        assert_eq!(value, GraphValue::Float(2.0));
    }

    #[test]
    fn comparisons_and_boolean_logic() {
        let (value, _) = evaluate(
            vec![
                float(0.5),
                NodeKind::FloatComparison {
                    input: 0,
                    comparand: INVALID_INDEX,
                    constant: 0.25,
                    op: ComparisonOp::GreaterThan,
                    epsilon: 0.0,
                },
                NodeKind::FloatComparison {
                    input: 0,
                    comparand: INVALID_INDEX,
                    constant: 0.51,
                    op: ComparisonOp::NearEqual,
                    epsilon: 0.1,
                },
                NodeKind::And { inputs: vec![1, 2] },
                NodeKind::Not { input: 3 },
                NodeKind::Or { inputs: vec![4, 3] },
            ],
            5,
        );
        assert_eq!(value, GraphValue::Bool(true));
    }

    #[test]
    fn id_comparison_and_vector_info() {
        let (matches, _) = evaluate(
            vec![
                NodeKind::Constant {
                    value: GraphValue::Id("walk".into()),
                },
                NodeKind::IdComparison {
                    input: 0,
                    ids: vec!["run".into(), "walk".into()],
                    op: IdComparisonOp::DoesNotMatch,
                },
            ],
            1,
        );
        assert_eq!(matches, GraphValue::Bool(false));

        let (length, _) = evaluate(
            vec![
                NodeKind::Constant {
                    value: GraphValue::Vector(Vec3::new(3.0, 4.0, 0.0)),
                },
                NodeKind::VectorInfo {
                    input: 0,
                    component: VectorComponent::Length,
                },
            ],
            1,
        );
        assert_eq!(length, GraphValue::Float(5.0));
    }

    #[test]
    fn bone_mask_nodes_build_task_lists() {
        let (value, log) = evaluate(
            vec![
                NodeKind::BoneMask { mask_id: "upper".into() },
                NodeKind::FixedWeightBoneMask { weight: 0.5 },
                float(0.25),
                NodeKind::BoneMaskBlend {
                    source: 0,
                    target: 1,
                    blend_weight: 2,
                },
            ],
            3,
        );
        assert!(log.is_empty());
        let GraphValue::BoneMask(list) = value else {
            panic!("expected a bone mask");
        };
        let types: Vec<_> = list.tasks().iter().map(|task| task.task_type).collect();
        assert_eq!(
            types,
            vec![
                BoneMaskTaskType::Mask,
                BoneMaskTaskType::GenerateMask,
                BoneMaskTaskType::Blend
            ]
        );
    }

    #[test]
    fn missing_bone_mask_warns_and_yields_zero_weight() {
        let (value, log) = evaluate(vec![NodeKind::BoneMask { mask_id: "tail".into() }], 0);
        assert_eq!(log.len(), 1);
        assert_eq!(value, GraphValue::BoneMask(BoneMaskTaskList::from_fixed_weight(0.0)));
    }

    #[test]
    fn virtual_parameter_forwards_and_target_check() {
        let (value, _) = evaluate(
            vec![
                NodeKind::ControlParameter {
                    id: "aim".into(),
                    value: GraphValue::Target(Target::Bone("head".into())),
                },
                NodeKind::VirtualParameter {
                    id: "aim_alias".into(),
                    input: 0,
                },
                NodeKind::IsTargetSet { input: 1 },
            ],
            2,
        );
        assert_eq!(value, GraphValue::Bool(true));
    }
}

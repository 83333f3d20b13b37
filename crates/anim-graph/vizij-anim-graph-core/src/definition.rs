//! Compiled graph definitions and the resources they are instantiated against.
//!
//! Definitions only hold node indices and resource indices, never references, so one
//! definition can back any number of instances.

use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::bone_mask::{build_skeleton_bone_masks, BoneMask};
use crate::clip::AnimationClip;
use crate::error::GraphError;
use crate::ids::{NodeIndex, StringId, INVALID_INDEX};
use crate::skeleton::Skeleton;
use crate::value::{GraphValue, GraphValueType};

fn invalid_index() -> NodeIndex {
    INVALID_INDEX
}

fn default_true() -> bool {
    true
}

fn default_one() -> f32 {
    1.0
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloatMathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    GreaterThanEqual,
    LessThanEqual,
    NearEqual,
    GreaterThan,
    LessThan,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdComparisonOp {
    #[default]
    Matches,
    DoesNotMatch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorComponent {
    X,
    Y,
    Z,
    Length,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloatRange {
    pub begin: f32,
    pub end: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub input: NodeIndex,
    /// Float node; unconnected means full weight.
    #[serde(default = "invalid_index")]
    pub weight: NodeIndex,
    /// Bone mask node; unconnected means the whole skeleton.
    #[serde(default = "invalid_index")]
    pub bone_mask: NodeIndex,
    #[serde(default)]
    pub is_synchronized: bool,
}

/// Event emitted once the state has been active for `time` seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimedStateEvent {
    pub id: StringId,
    pub time: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub target_state: u8,
    /// Bool node.
    pub condition: NodeIndex,
    /// Seconds.
    #[serde(default)]
    pub duration: f32,
    #[serde(default)]
    pub is_synchronized: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub id: StringId,
    /// Pose node; an unconnected state produces no pose.
    #[serde(default = "invalid_index")]
    pub input: NodeIndex,
    #[serde(default)]
    pub entry_events: Vec<StringId>,
    #[serde(default)]
    pub fully_in_state_events: Vec<StringId>,
    #[serde(default)]
    pub exit_events: Vec<StringId>,
    #[serde(default)]
    pub timed_events: Vec<TimedStateEvent>,
    #[serde(default = "default_one")]
    pub layer_weight: f32,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
}

/// Node settings, tagged by node type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    ControlParameter {
        id: StringId,
        /// Default value; also fixes the parameter type.
        value: GraphValue,
    },
    VirtualParameter {
        id: StringId,
        input: NodeIndex,
    },
    Constant {
        value: GraphValue,
    },
    FloatMath {
        a: NodeIndex,
        #[serde(default = "invalid_index")]
        b: NodeIndex,
        /// Used when `b` is unconnected.
        #[serde(default)]
        constant: f32,
        op: FloatMathOp,
    },
    FloatClamp {
        input: NodeIndex,
        min: f32,
        max: f32,
    },
    FloatRemap {
        input: NodeIndex,
        input_range: FloatRange,
        output_range: FloatRange,
    },
    FloatComparison {
        input: NodeIndex,
        #[serde(default = "invalid_index")]
        comparand: NodeIndex,
        #[serde(default)]
        constant: f32,
        op: ComparisonOp,
        #[serde(default)]
        epsilon: f32,
    },
    FloatSwitch {
        switch: NodeIndex,
        if_true: NodeIndex,
        if_false: NodeIndex,
    },
    And {
        inputs: Vec<NodeIndex>,
    },
    Or {
        inputs: Vec<NodeIndex>,
    },
    Not {
        input: NodeIndex,
    },
    IdComparison {
        input: NodeIndex,
        ids: Vec<StringId>,
        #[serde(default)]
        op: IdComparisonOp,
    },
    VectorInfo {
        input: NodeIndex,
        component: VectorComponent,
    },
    IsTargetSet {
        input: NodeIndex,
    },
    BoneMask {
        mask_id: StringId,
    },
    FixedWeightBoneMask {
        weight: f32,
    },
    BoneMaskBlend {
        source: NodeIndex,
        target: NodeIndex,
        blend_weight: NodeIndex,
    },
    BoneMaskCombine {
        source: NodeIndex,
        target: NodeIndex,
    },

    ReferencePose,
    ZeroPose,
    AnimationClip {
        clip_idx: u16,
        #[serde(default = "default_one")]
        speed_multiplier: f32,
        #[serde(default)]
        play_in_reverse: bool,
        #[serde(default = "default_true")]
        allow_looping: bool,
        #[serde(default = "default_true")]
        sample_root_motion: bool,
    },
    SpeedScale {
        input: NodeIndex,
        scale: NodeIndex,
    },
    Blend1D {
        inputs: Vec<NodeIndex>,
        parameter_values: Vec<f32>,
        parameter: NodeIndex,
        #[serde(default)]
        is_synchronized: bool,
    },
    LayerBlend {
        base: NodeIndex,
        #[serde(default)]
        layers: Vec<LayerDefinition>,
    },
    StateMachine {
        states: Vec<StateDefinition>,
        #[serde(default)]
        default_state: u8,
    },
    ChildGraph {
        child_graph_idx: u16,
    },
    ExternalGraph {
        slot_id: StringId,
    },
    ReferencedGraph {
        referenced_graph_idx: u16,
        #[serde(default = "invalid_index")]
        fallback: NodeIndex,
    },
}

/// What a pin accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PinType {
    Pose,
    Value(GraphValueType),
    AnyValue,
}

#[derive(Copy, Clone, Debug)]
pub struct Pin {
    pub name: &'static str,
    pub node: NodeIndex,
    pub pin_type: PinType,
    pub required: bool,
}

impl Pin {
    fn required(name: &'static str, node: NodeIndex, pin_type: PinType) -> Self {
        Self {
            name,
            node,
            pin_type,
            required: true,
        }
    }

    fn optional(name: &'static str, node: NodeIndex, pin_type: PinType) -> Self {
        Self {
            name,
            node,
            pin_type,
            required: false,
        }
    }
}

impl NodeKind {
    pub fn is_pose_node(&self) -> bool {
        matches!(
            self,
            NodeKind::ReferencePose
                | NodeKind::ZeroPose
                | NodeKind::AnimationClip { .. }
                | NodeKind::SpeedScale { .. }
                | NodeKind::Blend1D { .. }
                | NodeKind::LayerBlend { .. }
                | NodeKind::StateMachine { .. }
                | NodeKind::ChildGraph { .. }
                | NodeKind::ExternalGraph { .. }
                | NodeKind::ReferencedGraph { .. }
        )
    }

    /// Output type known without looking at other nodes. `None` for virtual parameters,
    /// whose type follows their input.
    fn declared_output_type(&self) -> Option<GraphValueType> {
        use GraphValueType as T;
        Some(match self {
            NodeKind::ControlParameter { value, .. } | NodeKind::Constant { value } => value.value_type(),
            NodeKind::VirtualParameter { .. } => return None,
            NodeKind::FloatMath { .. }
            | NodeKind::FloatClamp { .. }
            | NodeKind::FloatRemap { .. }
            | NodeKind::FloatSwitch { .. }
            | NodeKind::VectorInfo { .. } => T::Float,
            NodeKind::FloatComparison { .. }
            | NodeKind::And { .. }
            | NodeKind::Or { .. }
            | NodeKind::Not { .. }
            | NodeKind::IdComparison { .. }
            | NodeKind::IsTargetSet { .. } => T::Bool,
            NodeKind::BoneMask { .. }
            | NodeKind::FixedWeightBoneMask { .. }
            | NodeKind::BoneMaskBlend { .. }
            | NodeKind::BoneMaskCombine { .. } => T::BoneMask,
            _ => T::Pose,
        })
    }

    /// Visit every input pin, in declaration order.
    pub fn for_each_pin(&self, mut visit: impl FnMut(Pin)) {
        use GraphValueType as T;
        use PinType::{Pose, Value};
        match self {
            NodeKind::ControlParameter { .. }
            | NodeKind::Constant { .. }
            | NodeKind::BoneMask { .. }
            | NodeKind::FixedWeightBoneMask { .. }
            | NodeKind::ReferencePose
            | NodeKind::ZeroPose
            | NodeKind::AnimationClip { .. }
            | NodeKind::ChildGraph { .. }
            | NodeKind::ExternalGraph { .. } => {}
            NodeKind::VirtualParameter { input, .. } => visit(Pin::required("input", *input, PinType::AnyValue)),
            NodeKind::FloatMath { a, b, .. } => {
                visit(Pin::required("a", *a, Value(T::Float)));
                visit(Pin::optional("b", *b, Value(T::Float)));
            }
            NodeKind::FloatClamp { input, .. } | NodeKind::FloatRemap { input, .. } => {
                visit(Pin::required("input", *input, Value(T::Float)));
            }
            NodeKind::FloatComparison { input, comparand, .. } => {
                visit(Pin::required("input", *input, Value(T::Float)));
                visit(Pin::optional("comparand", *comparand, Value(T::Float)));
            }
            NodeKind::FloatSwitch {
                switch,
                if_true,
                if_false,
            } => {
                visit(Pin::required("switch", *switch, Value(T::Bool)));
                visit(Pin::required("if_true", *if_true, Value(T::Float)));
                visit(Pin::required("if_false", *if_false, Value(T::Float)));
            }
            NodeKind::And { inputs } | NodeKind::Or { inputs } => {
                for input in inputs {
                    visit(Pin::required("inputs", *input, Value(T::Bool)));
                }
            }
            NodeKind::Not { input } => visit(Pin::required("input", *input, Value(T::Bool))),
            NodeKind::IdComparison { input, .. } => visit(Pin::required("input", *input, Value(T::Id))),
            NodeKind::VectorInfo { input, .. } => visit(Pin::required("input", *input, Value(T::Vector))),
            NodeKind::IsTargetSet { input } => visit(Pin::required("input", *input, Value(T::Target))),
            NodeKind::BoneMaskBlend {
                source,
                target,
                blend_weight,
            } => {
                visit(Pin::required("source", *source, Value(T::BoneMask)));
                visit(Pin::required("target", *target, Value(T::BoneMask)));
                visit(Pin::required("blend_weight", *blend_weight, Value(T::Float)));
            }
            NodeKind::BoneMaskCombine { source, target } => {
                visit(Pin::required("source", *source, Value(T::BoneMask)));
                visit(Pin::required("target", *target, Value(T::BoneMask)));
            }
            NodeKind::SpeedScale { input, scale } => {
                visit(Pin::required("input", *input, Pose));
                visit(Pin::required("scale", *scale, Value(T::Float)));
            }
            NodeKind::Blend1D { inputs, parameter, .. } => {
                for input in inputs {
                    visit(Pin::required("inputs", *input, Pose));
                }
                visit(Pin::required("parameter", *parameter, Value(T::Float)));
            }
            NodeKind::LayerBlend { base, layers } => {
                visit(Pin::required("base", *base, Pose));
                for layer in layers {
                    visit(Pin::required("layer.input", layer.input, Pose));
                    visit(Pin::optional("layer.weight", layer.weight, Value(T::Float)));
                    visit(Pin::optional("layer.bone_mask", layer.bone_mask, Value(T::BoneMask)));
                }
            }
            NodeKind::StateMachine { states, .. } => {
                for state in states {
                    visit(Pin::optional("state.input", state.input, Pose));
                    for transition in &state.transitions {
                        visit(Pin::required("transition.condition", transition.condition, Value(T::Bool)));
                    }
                }
            }
            NodeKind::ReferencedGraph { fallback, .. } => visit(Pin::optional("fallback", *fallback, Pose)),
        }
    }

    fn validate_settings(&self) -> Result<(), String> {
        match self {
            NodeKind::Blend1D {
                inputs,
                parameter_values,
                ..
            } => {
                if inputs.is_empty() {
                    return Err("blend has no inputs".into());
                }
                if inputs.len() != parameter_values.len() {
                    return Err(format!(
                        "{} inputs but {} parameter values",
                        inputs.len(),
                        parameter_values.len()
                    ));
                }
                if parameter_values.windows(2).any(|pair| pair[0] > pair[1]) {
                    return Err("parameter values must be sorted ascending".into());
                }
            }
            NodeKind::StateMachine { states, default_state } => {
                if states.is_empty() {
                    return Err("state machine has no states".into());
                }
                if *default_state as usize >= states.len() {
                    return Err(format!("default state {default_state} is out of range"));
                }
                for state in states {
                    if let Some(transition) = state
                        .transitions
                        .iter()
                        .find(|t| t.target_state as usize >= states.len())
                    {
                        return Err(format!(
                            "state {} transitions to missing state {}",
                            state.id, transition.target_state
                        ));
                    }
                }
            }
            NodeKind::FixedWeightBoneMask { weight } if !(0.0..=1.0).contains(weight) => {
                return Err(format!("fixed mask weight {weight} is outside [0, 1]"));
            }
            NodeKind::FloatClamp { min, max, .. } if min > max => {
                return Err(format!("clamp range [{min}, {max}] is inverted"));
            }
            NodeKind::And { inputs } | NodeKind::Or { inputs } if inputs.is_empty() => {
                return Err("boolean node has no inputs".into());
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub node_idx: NodeIndex,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl NodeDefinition {
    pub fn new(node_idx: NodeIndex, kind: NodeKind) -> Self {
        Self { node_idx, kind }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDefinitionDescriptor {
    pub id: StringId,
    pub root_node_idx: NodeIndex,
    pub nodes: Vec<NodeDefinition>,
}

/// Validated, immutable graph definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "GraphDefinitionDescriptor", into = "GraphDefinitionDescriptor")]
pub struct GraphDefinition {
    id: StringId,
    root_node_idx: NodeIndex,
    nodes: Vec<NodeDefinition>,
    output_types: Vec<GraphValueType>,
    persistent_nodes: Vec<NodeIndex>,
    control_parameters: HashMap<StringId, NodeIndex>,
    external_slots: HashMap<StringId, NodeIndex>,
}

impl GraphDefinition {
    pub fn new(id: StringId, nodes: Vec<NodeDefinition>, root_node_idx: NodeIndex) -> Result<Self, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        if nodes.len() > NodeIndex::MAX as usize {
            return Err(GraphError::TooManyNodes { count: nodes.len() });
        }
        for (position, node) in nodes.iter().enumerate() {
            if node.node_idx as isize != position as isize {
                return Err(GraphError::NodeIndexMismatch {
                    position,
                    declared: node.node_idx,
                });
            }
        }

        let output_types = resolve_output_types(&nodes)?;

        for node in &nodes {
            node.kind
                .validate_settings()
                .map_err(|reason| GraphError::InvalidNodeSettings {
                    node: node.node_idx,
                    reason,
                })?;

            let mut result = Ok(());
            node.kind.for_each_pin(|pin| {
                if result.is_ok() {
                    result = validate_pin(node.node_idx, pin, &output_types);
                }
            });
            result?;
        }

        match output_types.get(root_node_idx as usize) {
            Some(GraphValueType::Pose) if root_node_idx >= 0 => {}
            _ => return Err(GraphError::RootNotPose { node: root_node_idx }),
        }

        let mut persistent_nodes = Vec::new();
        let mut control_parameters = HashMap::new();
        let mut external_slots = HashMap::new();
        for node in &nodes {
            match &node.kind {
                NodeKind::ControlParameter { id, .. } => {
                    if control_parameters.insert(*id, node.node_idx).is_some() {
                        return Err(GraphError::DuplicateControlParameter { id: *id });
                    }
                    persistent_nodes.push(node.node_idx);
                }
                NodeKind::ExternalGraph { slot_id } => {
                    if external_slots.insert(*slot_id, node.node_idx).is_some() {
                        return Err(GraphError::DuplicateExternalSlot { id: *slot_id });
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            id,
            root_node_idx,
            nodes,
            output_types,
            persistent_nodes,
            control_parameters,
            external_slots,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[inline]
    pub fn id(&self) -> StringId {
        self.id
    }

    #[inline]
    pub fn root_node_idx(&self) -> NodeIndex {
        self.root_node_idx
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[NodeDefinition] {
        &self.nodes
    }

    #[inline]
    pub fn node(&self, node_idx: NodeIndex) -> &NodeKind {
        &self.nodes[node_idx as usize].kind
    }

    #[inline]
    pub fn output_type(&self, node_idx: NodeIndex) -> GraphValueType {
        self.output_types[node_idx as usize]
    }

    /// Nodes initialized with the instance rather than by the pose tree.
    pub fn persistent_nodes(&self) -> &[NodeIndex] {
        &self.persistent_nodes
    }

    pub fn control_parameter_index(&self, id: StringId) -> Option<NodeIndex> {
        self.control_parameters.get(&id).copied()
    }

    pub fn control_parameters(&self) -> impl Iterator<Item = (StringId, NodeIndex)> + '_ {
        self.control_parameters.iter().map(|(id, idx)| (*id, *idx))
    }

    pub fn external_slot_index(&self, slot_id: StringId) -> Option<NodeIndex> {
        self.external_slots.get(&slot_id).copied()
    }

    pub fn external_slot_ids(&self) -> impl Iterator<Item = StringId> + '_ {
        self.external_slots.keys().copied()
    }
}

fn resolve_output_types(nodes: &[NodeDefinition]) -> Result<Vec<GraphValueType>, GraphError> {
    let mut output_types: Vec<Option<GraphValueType>> =
        nodes.iter().map(|node| node.kind.declared_output_type()).collect();

    for node_idx in 0..nodes.len() {
        if output_types[node_idx].is_some() {
            continue;
        }
        // Follow the virtual parameter chain to a node with a declared type.
        let mut current = node_idx;
        let mut hops = 0;
        let resolved = loop {
            if let Some(value_type) = output_types[current] {
                break value_type;
            }
            let NodeKind::VirtualParameter { input, .. } = &nodes[current].kind else {
                unreachable!("only virtual parameters have an undeclared type");
            };
            if *input < 0 || *input as usize >= nodes.len() {
                return Err(GraphError::InvalidPin {
                    node: current as NodeIndex,
                    pin: "input",
                    target: *input,
                });
            }
            hops += 1;
            if hops > nodes.len() {
                return Err(GraphError::InvalidNodeSettings {
                    node: node_idx as NodeIndex,
                    reason: "virtual parameter chain forms a cycle".into(),
                });
            }
            current = *input as usize;
        };
        output_types[node_idx] = Some(resolved);
    }

    Ok(output_types.into_iter().map(|t| t.unwrap_or(GraphValueType::Unknown)).collect())
}

fn validate_pin(node: NodeIndex, pin: Pin, output_types: &[GraphValueType]) -> Result<(), GraphError> {
    if pin.node == INVALID_INDEX {
        return if pin.required {
            Err(GraphError::DisconnectedPin { node, pin: pin.name })
        } else {
            Ok(())
        };
    }
    if pin.node < 0 || pin.node as usize >= output_types.len() || pin.node == node {
        return Err(GraphError::InvalidPin {
            node,
            pin: pin.name,
            target: pin.node,
        });
    }

    let actual = output_types[pin.node as usize];
    let (matches, expected) = match pin.pin_type {
        PinType::Pose => (actual == GraphValueType::Pose, GraphValueType::Pose),
        PinType::Value(expected) => (actual == expected, expected),
        PinType::AnyValue => (actual.is_value(), GraphValueType::Unknown),
    };
    if matches {
        Ok(())
    } else {
        Err(GraphError::PinTypeMismatch {
            node,
            pin: pin.name,
            target: pin.node,
            expected,
            actual,
        })
    }
}

impl TryFrom<GraphDefinitionDescriptor> for GraphDefinition {
    type Error = GraphError;

    fn try_from(descriptor: GraphDefinitionDescriptor) -> Result<Self, Self::Error> {
        GraphDefinition::new(descriptor.id, descriptor.nodes, descriptor.root_node_idx)
    }
}

impl From<GraphDefinition> for GraphDefinitionDescriptor {
    fn from(definition: GraphDefinition) -> Self {
        GraphDefinitionDescriptor {
            id: definition.id,
            root_node_idx: definition.root_node_idx,
            nodes: definition.nodes,
        }
    }
}

/// Resources a definition is instantiated against.
#[derive(Debug)]
pub struct GraphDataSet {
    skeleton: Arc<Skeleton>,
    clips: Vec<Arc<AnimationClip>>,
    child_graphs: Vec<GraphVariation>,
    referenced_graphs: Vec<Option<GraphVariation>>,
    bone_masks: Arc<Vec<BoneMask>>,
}

impl GraphDataSet {
    /// Builds the skeleton's bone masks (feathered) up front.
    pub fn new(skeleton: Arc<Skeleton>, clips: Vec<Arc<AnimationClip>>) -> Self {
        let bone_masks = Arc::new(build_skeleton_bone_masks(&skeleton));
        Self {
            skeleton,
            clips,
            child_graphs: Vec::new(),
            referenced_graphs: Vec::new(),
            bone_masks,
        }
    }

    pub fn with_child_graphs(mut self, child_graphs: Vec<GraphVariation>) -> Self {
        self.child_graphs = child_graphs;
        self
    }

    /// `None` entries leave the reference unresolved, so the node uses its fallback.
    pub fn with_referenced_graphs(mut self, referenced_graphs: Vec<Option<GraphVariation>>) -> Self {
        self.referenced_graphs = referenced_graphs;
        self
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn clips(&self) -> &[Arc<AnimationClip>] {
        &self.clips
    }

    pub fn clip(&self, clip_idx: u16) -> &Arc<AnimationClip> {
        &self.clips[clip_idx as usize]
    }

    pub fn child_graph(&self, graph_idx: u16) -> &GraphVariation {
        &self.child_graphs[graph_idx as usize]
    }

    pub fn referenced_graph(&self, graph_idx: u16) -> Option<&GraphVariation> {
        self.referenced_graphs[graph_idx as usize].as_ref()
    }

    pub fn bone_masks(&self) -> &Arc<Vec<BoneMask>> {
        &self.bone_masks
    }
}

/// A definition paired with a data set it has been validated against.
#[derive(Clone, Debug)]
pub struct GraphVariation {
    definition: Arc<GraphDefinition>,
    data_set: Arc<GraphDataSet>,
}

impl GraphVariation {
    pub fn new(definition: Arc<GraphDefinition>, data_set: Arc<GraphDataSet>) -> Result<Self, GraphError> {
        let skeleton_id = data_set.skeleton.id();

        for clip in &data_set.clips {
            if clip.skeleton_id() != skeleton_id {
                return Err(GraphError::SkeletonMismatch {
                    graph: clip.id(),
                    expected: skeleton_id,
                    actual: clip.skeleton_id(),
                });
            }
        }
        let sub_graphs = data_set
            .child_graphs
            .iter()
            .chain(data_set.referenced_graphs.iter().flatten());
        for sub_graph in sub_graphs {
            let actual = sub_graph.data_set.skeleton.id();
            if actual != skeleton_id {
                return Err(GraphError::SkeletonMismatch {
                    graph: sub_graph.definition.id(),
                    expected: skeleton_id,
                    actual,
                });
            }
        }

        for node in definition.nodes() {
            match &node.kind {
                NodeKind::AnimationClip { clip_idx, .. } if *clip_idx as usize >= data_set.clips.len() => {
                    return Err(GraphError::InvalidClipIndex {
                        node: node.node_idx,
                        clip_idx: *clip_idx,
                        available: data_set.clips.len(),
                    });
                }
                NodeKind::ChildGraph { child_graph_idx } if *child_graph_idx as usize >= data_set.child_graphs.len() => {
                    return Err(GraphError::InvalidSubGraphIndex {
                        node: node.node_idx,
                        graph_idx: *child_graph_idx,
                        available: data_set.child_graphs.len(),
                    });
                }
                NodeKind::ReferencedGraph {
                    referenced_graph_idx, ..
                } if *referenced_graph_idx as usize >= data_set.referenced_graphs.len() => {
                    return Err(GraphError::InvalidSubGraphIndex {
                        node: node.node_idx,
                        graph_idx: *referenced_graph_idx,
                        available: data_set.referenced_graphs.len(),
                    });
                }
                _ => {}
            }
        }

        Ok(Self { definition, data_set })
    }

    pub fn definition(&self) -> &Arc<GraphDefinition> {
        &self.definition
    }

    pub fn data_set(&self) -> &Arc<GraphDataSet> {
        &self.data_set
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.data_set.skeleton
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_idx: NodeIndex, kind: NodeKind) -> NodeDefinition {
        NodeDefinition::new(node_idx, kind)
    }

    #[test]
    fn rejects_pins_of_the_wrong_type() {
        let err = GraphDefinition::new(
            "bad".into(),
            vec![
                node(
                    0,
                    NodeKind::ControlParameter {
                        id: "Flag".into(),
                        value: GraphValue::Bool(false),
                    },
                ),
                node(
                    1,
                    NodeKind::FloatClamp {
                        input: 0,
                        min: 0.0,
                        max: 1.0,
                    },
                ),
                node(2, NodeKind::ReferencePose),
            ],
            2,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::PinTypeMismatch {
                node: 1,
                expected: GraphValueType::Float,
                actual: GraphValueType::Bool,
                ..
            }
        ));
    }

    #[test]
    fn virtual_parameters_take_their_input_type() {
        let definition = GraphDefinition::new(
            "virtual".into(),
            vec![
                node(
                    0,
                    NodeKind::VirtualParameter {
                        id: "Speed".into(),
                        input: 1,
                    },
                ),
                node(
                    1,
                    NodeKind::Constant {
                        value: GraphValue::Float(1.0),
                    },
                ),
                node(2, NodeKind::ZeroPose),
            ],
            2,
        )
        .unwrap();
        assert_eq!(definition.output_type(0), GraphValueType::Float);
        assert!(definition.persistent_nodes().is_empty());
    }

    #[test]
    fn root_must_be_a_pose() {
        let err = GraphDefinition::new(
            "no_pose".into(),
            vec![node(
                0,
                NodeKind::Constant {
                    value: GraphValue::Float(1.0),
                },
            )],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::RootNotPose { node: 0 }));
        assert!(matches!(
            GraphDefinition::new("empty".into(), vec![], 0),
            Err(GraphError::EmptyGraph)
        ));
    }

    #[test]
    fn json_round_trip_keeps_node_order_and_lookups() {
        let json = r#"{
            "id": "locomotion",
            "root_node_idx": 2,
            "nodes": [
                { "node_idx": 0, "type": "ControlParameter", "id": "Speed", "value": { "type": "Float", "value": 0.5 } },
                { "node_idx": 1, "type": "ExternalGraph", "slot_id": "Face" },
                { "node_idx": 2, "type": "ReferencePose" }
            ]
        }"#;
        let definition = GraphDefinition::from_json(json).unwrap();
        assert_eq!(definition.control_parameter_index("Speed".into()), Some(0));
        assert_eq!(definition.external_slot_index("Face".into()), Some(1));
        assert_eq!(definition.persistent_nodes(), &[0]);

        let text = definition.to_json().unwrap();
        let reparsed = GraphDefinition::from_json(&text).unwrap();
        assert_eq!(reparsed.nodes(), definition.nodes());
        // Each node writes its index before its settings.
        assert!(text.find("\"node_idx\"").unwrap() < text.find("\"ControlParameter\"").unwrap());
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        let param = |idx| {
            node(
                idx,
                NodeKind::ControlParameter {
                    id: "Speed".into(),
                    value: GraphValue::Float(0.0),
                },
            )
        };
        let err = GraphDefinition::new("dup".into(), vec![param(0), param(1), node(2, NodeKind::ZeroPose)], 2)
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateControlParameter { .. }));
    }
}

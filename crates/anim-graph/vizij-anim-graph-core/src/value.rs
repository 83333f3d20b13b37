//! Values flowing between graph nodes.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::bone_mask::BoneMaskTaskList;
use crate::ids::StringId;
use crate::math::Transform;

/// Output type of a graph node. Fixed when the graph is authored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphValueType {
    Unknown,
    Bool,
    Id,
    Float,
    Vector,
    Target,
    BoneMask,
    Pose,
    Special,
}

impl GraphValueType {
    #[inline]
    pub fn is_value(self) -> bool {
        !matches!(
            self,
            GraphValueType::Unknown | GraphValueType::Pose | GraphValueType::Special
        )
    }
}

/// World-space or bone-relative target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Target {
    #[default]
    Unset,
    Transform(Transform),
    Bone(StringId),
}

impl Target {
    #[inline]
    pub fn is_set(&self) -> bool {
        !matches!(self, Target::Unset)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum GraphValue {
    Bool(bool),
    Id(StringId),
    Float(f32),
    Vector(Vec3),
    Target(Target),
    BoneMask(BoneMaskTaskList),
}

impl GraphValue {
    pub fn value_type(&self) -> GraphValueType {
        match self {
            GraphValue::Bool(_) => GraphValueType::Bool,
            GraphValue::Id(_) => GraphValueType::Id,
            GraphValue::Float(_) => GraphValueType::Float,
            GraphValue::Vector(_) => GraphValueType::Vector,
            GraphValue::Target(_) => GraphValueType::Target,
            GraphValue::BoneMask(_) => GraphValueType::BoneMask,
        }
    }

    /// Zero value for a value type; `None` for pose/special/unknown.
    pub fn default_for(value_type: GraphValueType) -> Option<GraphValue> {
        Some(match value_type {
            GraphValueType::Bool => GraphValue::Bool(false),
            GraphValueType::Id => GraphValue::Id(StringId::INVALID),
            GraphValueType::Float => GraphValue::Float(0.0),
            GraphValueType::Vector => GraphValue::Vector(Vec3::ZERO),
            GraphValueType::Target => GraphValue::Target(Target::Unset),
            GraphValueType::BoneMask => GraphValue::BoneMask(BoneMaskTaskList::from_fixed_weight(0.0)),
            GraphValueType::Unknown | GraphValueType::Pose | GraphValueType::Special => return None,
        })
    }

    /// Typed read. Panics when the stored type differs from `T`.
    #[inline]
    pub fn get<T: GraphValueKind>(&self) -> T {
        T::from_graph_value(self)
    }

    pub fn try_get<T: GraphValueKind>(&self) -> Option<T> {
        (self.value_type() == T::VALUE_TYPE).then(|| T::from_graph_value(self))
    }
}

/// Rust types that can be read from or written into a value node.
pub trait GraphValueKind: Sized {
    const VALUE_TYPE: GraphValueType;

    fn from_graph_value(value: &GraphValue) -> Self;
    fn into_graph_value(self) -> GraphValue;
}

macro_rules! impl_graph_value_kind {
    ($ty:ty, $variant:ident) => {
        impl GraphValueKind for $ty {
            const VALUE_TYPE: GraphValueType = GraphValueType::$variant;

            #[inline]
            fn from_graph_value(value: &GraphValue) -> Self {
                match value {
                    GraphValue::$variant(v) => v.clone(),
                    other => panic!(
                        "value type mismatch: expected {:?}, found {:?}",
                        GraphValueType::$variant,
                        other.value_type()
                    ),
                }
            }

            #[inline]
            fn into_graph_value(self) -> GraphValue {
                GraphValue::$variant(self)
            }
        }
    };
}

impl_graph_value_kind!(bool, Bool);
impl_graph_value_kind!(StringId, Id);
impl_graph_value_kind!(f32, Float);
impl_graph_value_kind!(Vec3, Vector);
impl_graph_value_kind!(Target, Target);
impl_graph_value_kind!(BoneMaskTaskList, BoneMask);

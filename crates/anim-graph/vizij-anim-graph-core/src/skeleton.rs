//! Skeleton resource and dense local-space poses.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::ids::StringId;
use crate::math::Transform;

/// One explicitly authored bone weight.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneWeight {
    pub bone_id: StringId,
    pub weight: f32,
}

/// Named, sparse list of bone weights authored against a skeleton.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneMaskDefinition {
    pub id: StringId,
    #[serde(default)]
    pub weights: Vec<BoneWeight>,
}

impl BoneMaskDefinition {
    pub fn new(id: impl Into<StringId>, weights: Vec<BoneWeight>) -> Self {
        Self {
            id: id.into(),
            weights,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoneDescriptor {
    pub id: StringId,
    #[serde(default)]
    pub parent: Option<StringId>,
    #[serde(default)]
    pub reference: Transform,
}

/// Serialized form of a skeleton.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkeletonDescriptor {
    pub id: StringId,
    pub bones: Vec<BoneDescriptor>,
    #[serde(default)]
    pub bone_masks: Vec<BoneMaskDefinition>,
}

/// Bone hierarchy, reference pose and bone mask definitions.
///
/// Bones are stored parents-first, so iterating by index always visits a parent before its
/// children.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "SkeletonDescriptor", into = "SkeletonDescriptor")]
pub struct Skeleton {
    id: StringId,
    bone_ids: Vec<StringId>,
    parent_indices: Vec<Option<usize>>,
    depths: Vec<u16>,
    reference_pose: Vec<Transform>,
    bone_mask_definitions: Vec<BoneMaskDefinition>,
    bone_lookup: HashMap<StringId, usize>,
    bone_mask_lookup: HashMap<StringId, usize>,
}

impl Skeleton {
    pub fn new(descriptor: SkeletonDescriptor) -> Result<Self, GraphError> {
        let SkeletonDescriptor {
            id,
            bones,
            bone_masks,
        } = descriptor;

        if bones.is_empty() {
            return Err(GraphError::InvalidSkeleton("skeleton has no bones".into()));
        }

        let mut bone_lookup = HashMap::with_capacity(bones.len());
        let mut bone_ids = Vec::with_capacity(bones.len());
        let mut parent_indices = Vec::with_capacity(bones.len());
        let mut depths = Vec::with_capacity(bones.len());
        let mut reference_pose = Vec::with_capacity(bones.len());

        for (idx, bone) in bones.iter().enumerate() {
            if bone_lookup.insert(bone.id, idx).is_some() {
                return Err(GraphError::InvalidSkeleton(format!(
                    "bone {} is declared twice",
                    bone.id
                )));
            }
            let parent = match (idx, bone.parent) {
                (0, None) => None,
                (0, Some(_)) => {
                    return Err(GraphError::InvalidSkeleton("root bone has a parent".into()))
                }
                (_, None) => {
                    return Err(GraphError::InvalidSkeleton(format!(
                        "bone {} has no parent; only the first bone may be a root",
                        bone.id
                    )))
                }
                (_, Some(parent_id)) => match bone_lookup.get(&parent_id) {
                    Some(&parent_idx) if parent_idx < idx => Some(parent_idx),
                    _ => {
                        return Err(GraphError::InvalidSkeleton(format!(
                            "bone {} must be declared after its parent {}",
                            bone.id, parent_id
                        )))
                    }
                },
            };
            let depth = parent.map(|p: usize| depths[p] + 1).unwrap_or(0);
            bone_ids.push(bone.id);
            parent_indices.push(parent);
            depths.push(depth);
            reference_pose.push(bone.reference);
        }

        let mut bone_mask_lookup = HashMap::with_capacity(bone_masks.len());
        for (idx, mask) in bone_masks.iter().enumerate() {
            if bone_mask_lookup.insert(mask.id, idx).is_some() {
                return Err(GraphError::InvalidSkeleton(format!(
                    "bone mask {} is declared twice",
                    mask.id
                )));
            }
        }

        Ok(Self {
            id,
            bone_ids,
            parent_indices,
            depths,
            reference_pose,
            bone_mask_definitions: bone_masks,
            bone_lookup,
            bone_mask_lookup,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    #[inline]
    pub fn id(&self) -> StringId {
        self.id
    }

    #[inline]
    pub fn num_bones(&self) -> usize {
        self.bone_ids.len()
    }

    pub fn bone_index(&self, bone_id: StringId) -> Option<usize> {
        self.bone_lookup.get(&bone_id).copied()
    }

    pub fn bone_id(&self, bone_idx: usize) -> StringId {
        self.bone_ids[bone_idx]
    }

    pub fn parent_index(&self, bone_idx: usize) -> Option<usize> {
        self.parent_indices[bone_idx]
    }

    /// Hierarchy depth (root is 0).
    pub fn depth(&self, bone_idx: usize) -> u16 {
        self.depths[bone_idx]
    }

    pub fn reference_pose(&self) -> &[Transform] {
        &self.reference_pose
    }

    pub fn bone_mask_definitions(&self) -> &[BoneMaskDefinition] {
        &self.bone_mask_definitions
    }

    pub fn bone_mask_definition_index(&self, mask_id: StringId) -> Option<usize> {
        self.bone_mask_lookup.get(&mask_id).copied()
    }
}

impl TryFrom<SkeletonDescriptor> for Skeleton {
    type Error = GraphError;

    fn try_from(descriptor: SkeletonDescriptor) -> Result<Self, Self::Error> {
        Skeleton::new(descriptor)
    }
}

impl From<Skeleton> for SkeletonDescriptor {
    fn from(skeleton: Skeleton) -> Self {
        let bones = skeleton
            .bone_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| BoneDescriptor {
                id: *id,
                parent: skeleton.parent_indices[idx].map(|p| skeleton.bone_ids[p]),
                reference: skeleton.reference_pose[idx],
            })
            .collect();
        SkeletonDescriptor {
            id: skeleton.id,
            bones,
            bone_masks: skeleton.bone_mask_definitions,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoseKind {
    Unset,
    Reference,
    Zero,
    Animated,
}

/// Local-space transforms, one per skeleton bone.
#[derive(Clone, Debug)]
pub struct Pose {
    kind: PoseKind,
    transforms: Vec<Transform>,
}

impl Pose {
    pub fn new(skeleton: &Skeleton) -> Self {
        Self {
            kind: PoseKind::Unset,
            transforms: vec![Transform::IDENTITY; skeleton.num_bones()],
        }
    }

    #[inline]
    pub fn kind(&self) -> PoseKind {
        self.kind
    }

    #[inline]
    pub fn num_bones(&self) -> usize {
        self.transforms.len()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn transform(&self, bone_idx: usize) -> &Transform {
        &self.transforms[bone_idx]
    }

    pub fn set_transform(&mut self, bone_idx: usize, transform: Transform) {
        self.transforms[bone_idx] = transform;
        self.kind = PoseKind::Animated;
    }

    /// Reset to the reference or zero pose. `Unset`/`Animated` leave transforms untouched.
    pub fn reset(&mut self, kind: PoseKind, skeleton: &Skeleton) {
        debug_assert_eq!(self.transforms.len(), skeleton.num_bones());
        match kind {
            PoseKind::Reference => self.transforms.copy_from_slice(skeleton.reference_pose()),
            PoseKind::Zero => self.transforms.fill(Transform::IDENTITY),
            PoseKind::Unset | PoseKind::Animated => {}
        }
        self.kind = kind;
    }

    pub(crate) fn copy_from(&mut self, other: &Pose) {
        self.transforms.copy_from_slice(&other.transforms);
        self.kind = other.kind;
    }

    pub(crate) fn mark_animated(&mut self) {
        self.kind = PoseKind::Animated;
    }

    pub(crate) fn transforms_mut(&mut self) -> &mut [Transform] {
        &mut self.transforms
    }

    /// Write `lerp(source, target, weight * mask[bone])` into `self`.
    pub fn blend(&mut self, source: &Pose, target: &Pose, weight: f32, bone_weights: Option<&[f32]>) {
        debug_assert_eq!(source.num_bones(), self.num_bones());
        debug_assert_eq!(target.num_bones(), self.num_bones());
        for (bone_idx, out) in self.transforms.iter_mut().enumerate() {
            let bone_weight = bone_weights.map_or(weight, |w| w[bone_idx] * weight);
            *out = Transform::blend(&source.transforms[bone_idx], &target.transforms[bone_idx], bone_weight);
        }
        self.kind = PoseKind::Animated;
    }
}

//! Per-bone weight masks, the per-update mask pool and lazily evaluated mask task lists.

mod pool;
mod task_list;

use std::sync::Arc;

pub use pool::{BoneMaskPool, BoneMaskPoolIndex, INVALID_POOL_INDEX, MAX_POOL_MASKS};
pub use task_list::{
    BoneMaskHandle, BoneMaskTask, BoneMaskTaskList, BoneMaskTaskType, MAX_BONE_MASK_TASKS,
};

use crate::math::lerp;
use crate::skeleton::{BoneMaskDefinition, Skeleton};

const UNSET_WEIGHT: f32 = -1.0;

/// Dense weights in `[0, 1]`, one per bone of the referenced skeleton, plus a root motion weight.
#[derive(Clone, Debug)]
pub struct BoneMask {
    skeleton: Arc<Skeleton>,
    weights: Vec<f32>,
    root_motion_weight: f32,
}

impl BoneMask {
    /// Zero-weight mask.
    pub fn new(skeleton: Arc<Skeleton>) -> Self {
        Self::with_fixed_weight(skeleton, 0.0)
    }

    pub fn with_fixed_weight(skeleton: Arc<Skeleton>, weight: f32) -> Self {
        let weights = vec![weight; skeleton.num_bones()];
        Self {
            skeleton,
            weights,
            root_motion_weight: weight,
        }
    }

    pub fn from_definition(
        skeleton: Arc<Skeleton>,
        definition: &BoneMaskDefinition,
        should_feather_intermediate_bones: bool,
    ) -> Self {
        let mut mask = Self::new(skeleton);
        mask.reset_weights(definition, should_feather_intermediate_bones);
        mask
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.weights.is_empty() && self.weights.len() == self.skeleton.num_bones()
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn weight(&self, bone_idx: usize) -> f32 {
        self.weights[bone_idx]
    }

    #[inline]
    pub fn root_motion_weight(&self) -> f32 {
        self.root_motion_weight
    }

    pub fn reset_fixed_weight(&mut self, weight: f32, root_motion_weight: f32) {
        debug_assert!((0.0..=1.0).contains(&weight));
        self.weights.fill(weight);
        self.root_motion_weight = root_motion_weight;
    }

    /// Rebuild the weights from a sparse definition.
    ///
    /// Explicit weights are applied first; the root defaults to 0 when it is not listed.
    /// With feathering, bones between an explicitly weighted ancestor and an explicitly
    /// weighted descendant are interpolated linearly by depth (overlapping paths keep the
    /// larger weight). Remaining bones inherit their parent's weight, so a bone without
    /// any weighted ancestor ends up at 0.
    pub fn reset_weights(&mut self, definition: &BoneMaskDefinition, should_feather_intermediate_bones: bool) {
        let skeleton = Arc::clone(&self.skeleton);
        let num_bones = skeleton.num_bones();
        self.weights.fill(UNSET_WEIGHT);

        for bone_weight in &definition.weights {
            match skeleton.bone_index(bone_weight.bone_id) {
                Some(bone_idx) => self.weights[bone_idx] = bone_weight.weight.clamp(0.0, 1.0),
                None => log::warn!(
                    "bone mask {}: bone {} is not in skeleton {}",
                    definition.id,
                    bone_weight.bone_id,
                    skeleton.id()
                ),
            }
        }

        if self.weights[0] == UNSET_WEIGHT {
            self.weights[0] = 0.0;
        }

        if should_feather_intermediate_bones {
            let explicit: Vec<bool> = self.weights.iter().map(|w| *w != UNSET_WEIGHT).collect();
            for bone_idx in 1..num_bones {
                if explicit[bone_idx] {
                    self.feather_towards(&skeleton, &explicit, bone_idx);
                }
            }
        }

        for bone_idx in 1..num_bones {
            if self.weights[bone_idx] != UNSET_WEIGHT {
                continue;
            }
            if let Some(parent_idx) = skeleton.parent_index(bone_idx) {
                self.weights[bone_idx] = self.weights[parent_idx];
            }
        }

        self.root_motion_weight = self.weights[0];
    }

    fn feather_towards(&mut self, skeleton: &Skeleton, explicit: &[bool], descendant_idx: usize) {
        let mut ancestor = skeleton.parent_index(descendant_idx);
        while let Some(ancestor_idx) = ancestor {
            if explicit[ancestor_idx] {
                break;
            }
            ancestor = skeleton.parent_index(ancestor_idx);
        }

        // The root is always explicit after defaulting, so an ancestor always exists.
        let Some(ancestor_idx) = ancestor else { return };
        let ancestor_depth = skeleton.depth(ancestor_idx) as f32;
        let depth_range = skeleton.depth(descendant_idx) as f32 - ancestor_depth;
        let ancestor_weight = self.weights[ancestor_idx];
        let descendant_weight = self.weights[descendant_idx];

        let mut bone = skeleton.parent_index(descendant_idx);
        while let Some(bone_idx) = bone {
            if bone_idx == ancestor_idx {
                break;
            }
            let t = (skeleton.depth(bone_idx) as f32 - ancestor_depth) / depth_range;
            let weight = lerp(ancestor_weight, descendant_weight, t);
            let current = self.weights[bone_idx];
            self.weights[bone_idx] = if current == UNSET_WEIGHT { weight } else { current.max(weight) };
            bone = skeleton.parent_index(bone_idx);
        }
    }

    pub fn copy_from(&mut self, other: &BoneMask) {
        debug_assert_eq!(self.weights.len(), other.weights.len());
        self.weights.copy_from_slice(&other.weights);
        self.root_motion_weight = other.root_motion_weight;
    }

    /// Multiply weights element-wise.
    pub fn combine_with(&mut self, other: &BoneMask) {
        debug_assert_eq!(self.weights.len(), other.weights.len());
        for (weight, other_weight) in self.weights.iter_mut().zip(&other.weights) {
            *weight *= other_weight;
        }
        self.root_motion_weight *= other.root_motion_weight;
    }

    /// `self = lerp(source, self, blend_weight)`.
    pub fn blend_from(&mut self, source: &BoneMask, blend_weight: f32) {
        debug_assert_eq!(self.weights.len(), source.weights.len());
        for (weight, source_weight) in self.weights.iter_mut().zip(&source.weights) {
            *weight = lerp(*source_weight, *weight, blend_weight);
        }
        self.root_motion_weight = lerp(source.root_motion_weight, self.root_motion_weight, blend_weight);
    }

    /// `self = lerp(self, target, blend_weight)`.
    pub fn blend_to(&mut self, target: &BoneMask, blend_weight: f32) {
        debug_assert_eq!(self.weights.len(), target.weights.len());
        for (weight, target_weight) in self.weights.iter_mut().zip(&target.weights) {
            *weight = lerp(*weight, *target_weight, blend_weight);
        }
        self.root_motion_weight = lerp(self.root_motion_weight, target.root_motion_weight, blend_weight);
    }
}

/// Build the precomputed masks for every definition on the skeleton.
pub fn build_skeleton_bone_masks(skeleton: &Arc<Skeleton>) -> Vec<BoneMask> {
    skeleton
        .bone_mask_definitions()
        .iter()
        .map(|definition| BoneMask::from_definition(Arc::clone(skeleton), definition, true))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::chain_skeleton;
    use super::*;
    use crate::skeleton::BoneWeight;

    fn weight(bone: &str, weight: f32) -> BoneWeight {
        BoneWeight {
            bone_id: bone.into(),
            weight,
        }
    }

    #[test]
    fn feathering_interpolates_by_depth() {
        let definition = BoneMaskDefinition::new("upper", vec![weight("hips", 0.0), weight("neck", 1.0)]);
        let skeleton = chain_skeleton(vec![definition.clone()]);
        let mask = BoneMask::from_definition(skeleton.clone(), &definition, true);

        let w = |name: &str| mask.weight(skeleton.bone_index(name.into()).unwrap());
        assert_eq!(w("root"), 0.0);
        assert_eq!(w("hips"), 0.0);
        assert!((w("spine1") - 0.25).abs() < 1e-6);
        assert!((w("spine2") - 0.5).abs() < 1e-6);
        assert!((w("spine3") - 0.75).abs() < 1e-6);
        assert_eq!(w("neck"), 1.0);
        // Off-path bones inherit from their parent.
        assert!((w("arm") - 0.75).abs() < 1e-6);
        assert_eq!(w("leg"), 0.0);
        assert_eq!(mask.root_motion_weight(), 0.0);
    }

    #[test]
    fn without_feathering_children_inherit() {
        let definition = BoneMaskDefinition::new("upper", vec![weight("spine2", 0.6)]);
        let skeleton = chain_skeleton(vec![]);
        let mask = BoneMask::from_definition(skeleton.clone(), &definition, false);
        let w = |name: &str| mask.weight(skeleton.bone_index(name.into()).unwrap());
        assert_eq!(w("spine1"), 0.0);
        assert_eq!(w("spine2"), 0.6);
        assert_eq!(w("neck"), 0.6);
        assert_eq!(w("arm"), 0.6);
        assert_eq!(w("leg"), 0.0);
    }

    #[test]
    fn blend_and_combine_operate_per_bone() {
        let skeleton = chain_skeleton(vec![]);
        let half = BoneMask::with_fixed_weight(skeleton.clone(), 0.5);
        let mut full = BoneMask::with_fixed_weight(skeleton.clone(), 1.0);

        let mut blended = full.clone();
        blended.blend_to(&half, 1.0);
        assert!(blended.weights().iter().all(|w| *w == 0.5));
        blended.blend_from(&full, 0.0);
        assert!(blended.weights().iter().all(|w| *w == 1.0));

        full.combine_with(&half);
        assert!(full.weights().iter().all(|w| *w == 0.5));
        assert_eq!(full.root_motion_weight(), 0.5);
    }
}

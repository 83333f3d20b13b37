//! Deferred pose work registered by pose nodes and executed after the graph update.

use std::sync::Arc;

use crate::bone_mask::{BoneMask, BoneMaskPool, BoneMaskTaskList};
use crate::clip::AnimationClip;
use crate::config::GraphInstanceConfig;
use crate::ids::NodeIndex;
use crate::math::Percentage;
use crate::skeleton::{Pose, PoseKind, Skeleton};

pub type TaskIndex = i8;

pub const INVALID_TASK_INDEX: TaskIndex = -1;

/// Largest number of tasks a single update may register.
pub const MAX_TASKS: usize = i8::MAX as usize;

#[derive(Clone, Debug)]
pub enum Task {
    ReferencePose,
    ZeroPose,
    Sample {
        clip: Arc<AnimationClip>,
        time: Percentage,
    },
    /// `lerp(source, target, weight * mask)`. Operands are earlier tasks.
    Blend {
        source: TaskIndex,
        target: TaskIndex,
        weight: f32,
        bone_mask: Option<BoneMaskTaskList>,
    },
}

#[derive(Clone, Debug)]
pub struct RegisteredTask {
    pub node_idx: NodeIndex,
    pub task: Task,
}

/// Per-instance task list, pose buffers and bone mask pool.
#[derive(Debug)]
pub struct TaskSystem {
    skeleton: Arc<Skeleton>,
    bone_masks: Arc<Vec<BoneMask>>,
    tasks: Vec<RegisteredTask>,
    poses: Vec<Pose>,
    bone_mask_pool: BoneMaskPool,
    executed: bool,
}

impl TaskSystem {
    pub fn new(skeleton: Arc<Skeleton>, bone_masks: Arc<Vec<BoneMask>>, config: &GraphInstanceConfig) -> Self {
        let poses = (0..config.pose_task_capacity).map(|_| Pose::new(&skeleton)).collect();
        Self {
            bone_mask_pool: BoneMaskPool::new(Arc::clone(&skeleton), config.bone_mask_pool_slots),
            skeleton,
            bone_masks,
            tasks: Vec::with_capacity(config.pose_task_capacity),
            poses,
            executed: false,
        }
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    /// Precomputed masks, one per skeleton bone mask definition.
    pub fn bone_masks(&self) -> &[BoneMask] {
        &self.bone_masks
    }

    pub fn bone_mask_pool(&self) -> &BoneMaskPool {
        &self.bone_mask_pool
    }

    pub fn bone_mask_pool_mut(&mut self) -> &mut BoneMaskPool {
        &mut self.bone_mask_pool
    }

    pub fn reset(&mut self) {
        self.tasks.clear();
        self.bone_mask_pool.reset();
        self.executed = false;
    }

    #[inline]
    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    #[inline]
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks(&self) -> &[RegisteredTask] {
        &self.tasks
    }

    pub fn register_task(&mut self, node_idx: NodeIndex, task: Task) -> TaskIndex {
        let task_idx = self.tasks.len();
        assert!(task_idx < MAX_TASKS, "too many pose tasks registered in one update");
        if let Task::Blend { source, target, .. } = &task {
            debug_assert!(*source >= 0 && (*source as usize) < task_idx);
            debug_assert!(*target >= 0 && (*target as usize) < task_idx);
        }
        self.tasks.push(RegisteredTask { node_idx, task });
        self.executed = false;
        task_idx as TaskIndex
    }

    /// Run every registered task in registration order.
    pub fn execute(&mut self) {
        while self.poses.len() < self.tasks.len() {
            self.poses.push(Pose::new(&self.skeleton));
        }

        for task_idx in 0..self.tasks.len() {
            let (done, pending) = self.poses.split_at_mut(task_idx);
            let output = &mut pending[0];
            match &self.tasks[task_idx].task {
                Task::ReferencePose => output.reset(PoseKind::Reference, &self.skeleton),
                Task::ZeroPose => output.reset(PoseKind::Zero, &self.skeleton),
                Task::Sample { clip, time } => clip.sample(*time, &self.skeleton, output),
                Task::Blend {
                    source,
                    target,
                    weight,
                    bone_mask,
                } => {
                    let source = &done[*source as usize];
                    let target = &done[*target as usize];
                    match bone_mask {
                        Some(task_list) if task_list.has_tasks() => {
                            let handle = task_list.generate_bone_mask(&mut self.bone_mask_pool, &self.bone_masks);
                            let mask = handle.resolve(&self.bone_mask_pool, &self.bone_masks);
                            output.blend(source, target, *weight, Some(mask.weights()));
                            if let Some(pool_idx) = handle.pool_index() {
                                self.bone_mask_pool.release_mask(pool_idx);
                            }
                        }
                        _ => output.blend(source, target, *weight, None),
                    }
                }
            }
        }
        self.executed = true;
    }

    #[inline]
    pub fn was_executed(&self) -> bool {
        self.executed
    }

    /// Output of the last registered task, once executed.
    pub fn primary_pose(&self) -> Option<&Pose> {
        if !self.executed || self.tasks.is_empty() {
            return None;
        }
        self.poses.get(self.tasks.len() - 1)
    }

    pub fn pose(&self, task_idx: TaskIndex) -> Option<&Pose> {
        if !self.executed || task_idx < 0 || task_idx as usize >= self.tasks.len() {
            return None;
        }
        self.poses.get(task_idx as usize)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::bone_mask::build_skeleton_bone_masks;
    use crate::math::Transform;
    use crate::skeleton::{BoneDescriptor, BoneMaskDefinition, BoneWeight, SkeletonDescriptor};

    fn skeleton() -> Arc<Skeleton> {
        Arc::new(
            Skeleton::new(SkeletonDescriptor {
                id: "rig".into(),
                bones: vec![
                    BoneDescriptor {
                        id: "root".into(),
                        parent: None,
                        reference: Transform::from_translation(Vec3::X),
                    },
                    BoneDescriptor {
                        id: "head".into(),
                        parent: Some("root".into()),
                        reference: Transform::from_translation(Vec3::Y),
                    },
                ],
                bone_masks: vec![BoneMaskDefinition::new(
                    "head_only",
                    vec![BoneWeight {
                        bone_id: "head".into(),
                        weight: 1.0,
                    }],
                )],
            })
            .unwrap(),
        )
    }

    #[test]
    fn masked_blend_only_moves_weighted_bones() {
        let skeleton = skeleton();
        let masks = Arc::new(build_skeleton_bone_masks(&skeleton));
        let mut system = TaskSystem::new(skeleton, masks, &GraphInstanceConfig::default());

        let reference = system.register_task(0, Task::ReferencePose);
        let zero = system.register_task(1, Task::ZeroPose);
        let blend = system.register_task(
            2,
            Task::Blend {
                source: reference,
                target: zero,
                weight: 1.0,
                bone_mask: Some(BoneMaskTaskList::from_mask(0)),
            },
        );
        assert!(system.primary_pose().is_none());
        system.execute();

        let pose = system.primary_pose().unwrap();
        assert_eq!(pose.transform(0).translation, Vec3::X);
        assert_eq!(pose.transform(1).translation, Vec3::ZERO);
        assert_eq!(system.pose(blend).unwrap().kind(), PoseKind::Animated);
        assert_eq!(system.bone_mask_pool().num_used(), 0);

        system.reset();
        assert!(!system.has_tasks());
        assert!(system.primary_pose().is_none());
    }

    #[test]
    fn grows_pose_buffers_past_the_capacity_hint() {
        let skeleton = skeleton();
        let config = GraphInstanceConfig {
            pose_task_capacity: 1,
            ..GraphInstanceConfig::default()
        };
        let mut system = TaskSystem::new(skeleton, Arc::new(Vec::new()), &config);
        for node_idx in 0..5 {
            system.register_task(node_idx, Task::ZeroPose);
        }
        system.execute();
        assert_eq!(system.primary_pose().unwrap().kind(), PoseKind::Zero);
    }
}

use serde::{Deserialize, Serialize};

use super::pool::{BoneMaskPool, BoneMaskPoolIndex};
use super::BoneMask;
use crate::bit_archive::BitArchive;
use crate::error::GraphError;

/// Inline capacity of a task list. Overflow is fatal.
pub const MAX_BONE_MASK_TASKS: usize = 32;

const NUM_BITS_TASK_COUNT: u32 = 6;
const NUM_BITS_TASK_TYPE: u32 = 2;
const NUM_BITS_TASK_INDEX: u32 = 5;
const NUM_BITS_WEIGHT: u32 = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BoneMaskTaskType {
    /// Reference to a precomputed skeleton mask.
    Mask = 0,
    /// Uniform weight mask.
    GenerateMask = 1,
    Blend = 2,
    Combine = 3,
}

impl BoneMaskTaskType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => BoneMaskTaskType::Mask,
            1 => BoneMaskTaskType::GenerateMask,
            2 => BoneMaskTaskType::Blend,
            _ => BoneMaskTaskType::Combine,
        }
    }
}

/// One step of a mask expression. `source_idx`/`target_idx` refer to earlier tasks of the
/// same list.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneMaskTask {
    pub task_type: BoneMaskTaskType,
    #[serde(default)]
    pub source_idx: i8,
    #[serde(default)]
    pub target_idx: i8,
    #[serde(default)]
    pub weight: f32,
    #[serde(default)]
    pub mask_idx: u16,
}

impl BoneMaskTask {
    const EMPTY: BoneMaskTask = BoneMaskTask {
        task_type: BoneMaskTaskType::GenerateMask,
        source_idx: -1,
        target_idx: -1,
        weight: 0.0,
        mask_idx: 0,
    };

    pub fn mask(mask_idx: u16) -> Self {
        Self {
            task_type: BoneMaskTaskType::Mask,
            mask_idx,
            ..Self::EMPTY
        }
    }

    pub fn generate(weight: f32) -> Self {
        Self {
            task_type: BoneMaskTaskType::GenerateMask,
            weight,
            ..Self::EMPTY
        }
    }

    pub fn blend(source_idx: i8, target_idx: i8, weight: f32) -> Self {
        Self {
            task_type: BoneMaskTaskType::Blend,
            source_idx,
            target_idx,
            weight,
            ..Self::EMPTY
        }
    }

    pub fn combine(source_idx: i8, target_idx: i8) -> Self {
        Self {
            task_type: BoneMaskTaskType::Combine,
            source_idx,
            target_idx,
            ..Self::EMPTY
        }
    }

    #[inline]
    fn has_operands(&self) -> bool {
        matches!(self.task_type, BoneMaskTaskType::Blend | BoneMaskTaskType::Combine)
    }
}

/// Result of evaluating a task list. A pooled result must be released by the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoneMaskHandle {
    Precomputed(u16),
    Pooled(BoneMaskPoolIndex),
}

impl BoneMaskHandle {
    pub fn resolve<'a>(self, pool: &'a BoneMaskPool, precomputed: &'a [BoneMask]) -> &'a BoneMask {
        match self {
            BoneMaskHandle::Precomputed(mask_idx) => &precomputed[mask_idx as usize],
            BoneMaskHandle::Pooled(pool_idx) => pool.get(pool_idx),
        }
    }

    pub fn pool_index(self) -> Option<BoneMaskPoolIndex> {
        match self {
            BoneMaskHandle::Pooled(pool_idx) => Some(pool_idx),
            BoneMaskHandle::Precomputed(_) => None,
        }
    }
}

/// Lazily evaluated bone mask expression with fixed inline storage.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BoneMaskTask>", into = "Vec<BoneMaskTask>")]
pub struct BoneMaskTaskList {
    tasks: [BoneMaskTask; MAX_BONE_MASK_TASKS],
    num_tasks: u8,
}

impl Default for BoneMaskTaskList {
    fn default() -> Self {
        Self {
            tasks: [BoneMaskTask::EMPTY; MAX_BONE_MASK_TASKS],
            num_tasks: 0,
        }
    }
}

impl std::fmt::Debug for BoneMaskTaskList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tasks()).finish()
    }
}

impl BoneMaskTaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mask(mask_idx: u16) -> Self {
        let mut list = Self::new();
        list.push(BoneMaskTask::mask(mask_idx));
        list
    }

    pub fn from_fixed_weight(weight: f32) -> Self {
        let mut list = Self::new();
        list.push(BoneMaskTask::generate(weight));
        list
    }

    /// `lerp(source, target, weight)` as a single list.
    pub fn blended(source: &BoneMaskTaskList, target: &BoneMaskTaskList, weight: f32) -> Self {
        let mut list = source.clone();
        let source_idx = list.last_task_idx();
        let target_idx = list.append(target);
        list.push(BoneMaskTask::blend(source_idx, target_idx, weight));
        list
    }

    /// Element-wise product of `source` and `target` as a single list.
    pub fn combined(source: &BoneMaskTaskList, target: &BoneMaskTaskList) -> Self {
        let mut list = source.clone();
        let source_idx = list.last_task_idx();
        let target_idx = list.append(target);
        list.push(BoneMaskTask::combine(source_idx, target_idx));
        list
    }

    #[inline]
    pub fn has_tasks(&self) -> bool {
        self.num_tasks > 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.num_tasks as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_tasks == 0
    }

    pub fn tasks(&self) -> &[BoneMaskTask] {
        &self.tasks[..self.len()]
    }

    #[inline]
    pub fn last_task_idx(&self) -> i8 {
        self.num_tasks as i8 - 1
    }

    pub fn clear(&mut self) {
        self.num_tasks = 0;
    }

    pub fn push(&mut self, task: BoneMaskTask) {
        let idx = self.len();
        assert!(idx < MAX_BONE_MASK_TASKS, "bone mask task list overflow");
        if task.has_operands() {
            debug_assert!(task.source_idx >= 0 && (task.source_idx as usize) < idx);
            debug_assert!(task.target_idx >= 0 && (task.target_idx as usize) < idx);
        }
        self.tasks[idx] = task;
        self.num_tasks += 1;
    }

    /// Append `other`'s tasks, rebasing their operand indices. Returns the index of
    /// `other`'s result task inside `self`.
    fn append(&mut self, other: &BoneMaskTaskList) -> i8 {
        assert!(other.has_tasks());
        assert!(
            self.len() + other.len() < MAX_BONE_MASK_TASKS,
            "bone mask task list overflow"
        );
        let offset = self.num_tasks as i8;
        for task in other.tasks() {
            let mut task = *task;
            if task.has_operands() {
                task.source_idx += offset;
                task.target_idx += offset;
            }
            self.push(task);
        }
        self.last_task_idx()
    }

    /// Evaluate the list against the pool. Only the returned slot (if pooled) stays acquired.
    ///
    /// Operands may be shared between tasks, so every operation writes a freshly acquired
    /// slot and an intermediate is released once its last reader has run.
    pub fn generate_bone_mask(&self, pool: &mut BoneMaskPool, precomputed: &[BoneMask]) -> BoneMaskHandle {
        assert!(self.has_tasks(), "evaluating an empty bone mask task list");
        let last_idx = self.len() - 1;
        let mut results = [BoneMaskHandle::Pooled(-1); MAX_BONE_MASK_TASKS];

        let mut remaining_uses = [0u8; MAX_BONE_MASK_TASKS];
        for task in self.tasks().iter().filter(|task| task.has_operands()) {
            remaining_uses[task.source_idx as usize] += 1;
            remaining_uses[task.target_idx as usize] += 1;
        }

        for (task_idx, task) in self.tasks().iter().enumerate() {
            results[task_idx] = match task.task_type {
                BoneMaskTaskType::Mask => {
                    debug_assert!((task.mask_idx as usize) < precomputed.len());
                    BoneMaskHandle::Precomputed(task.mask_idx)
                }
                BoneMaskTaskType::GenerateMask => {
                    let pool_idx = pool.acquire_mask(false);
                    pool.get_mut(pool_idx).reset_fixed_weight(task.weight, task.weight);
                    BoneMaskHandle::Pooled(pool_idx)
                }
                BoneMaskTaskType::Blend | BoneMaskTaskType::Combine => {
                    let source = results[task.source_idx as usize];
                    let target = results[task.target_idx as usize];

                    let result_idx = pool.acquire_mask(false);
                    match source {
                        BoneMaskHandle::Pooled(source_idx) => {
                            let (result, source_mask) = pool.get_pair_mut(result_idx, source_idx);
                            result.copy_from(source_mask);
                        }
                        BoneMaskHandle::Precomputed(mask_idx) => {
                            pool.get_mut(result_idx).copy_from(&precomputed[mask_idx as usize]);
                        }
                    }
                    match target {
                        BoneMaskHandle::Pooled(target_idx) => {
                            let (result, target_mask) = pool.get_pair_mut(result_idx, target_idx);
                            apply_operation(task, result, target_mask);
                        }
                        BoneMaskHandle::Precomputed(mask_idx) => {
                            apply_operation(task, pool.get_mut(result_idx), &precomputed[mask_idx as usize]);
                        }
                    }

                    for operand_idx in [task.source_idx as usize, task.target_idx as usize] {
                        remaining_uses[operand_idx] -= 1;
                        if remaining_uses[operand_idx] == 0 {
                            if let Some(pool_idx) = results[operand_idx].pool_index() {
                                pool.release_mask(pool_idx);
                            }
                        }
                    }
                    BoneMaskHandle::Pooled(result_idx)
                }
            };

            // Results nothing reads are dropped straight away.
            if task_idx != last_idx && remaining_uses[task_idx] == 0 {
                if let Some(pool_idx) = results[task_idx].pool_index() {
                    pool.release_mask(pool_idx);
                }
            }
        }

        results[last_idx]
    }

    /// Bit-pack the list. `max_bits_for_mask_index` sizes the mask index field.
    pub fn serialize<const N: usize>(&self, archive: &mut BitArchive<N>, max_bits_for_mask_index: u32) {
        debug_assert!((1..=16).contains(&max_bits_for_mask_index));
        archive.write_uint(self.num_tasks as u32, NUM_BITS_TASK_COUNT);
        for task in self.tasks() {
            archive.write_uint(task.task_type as u32, NUM_BITS_TASK_TYPE);
            match task.task_type {
                BoneMaskTaskType::Mask => {
                    archive.write_uint(task.mask_idx as u32, max_bits_for_mask_index);
                }
                BoneMaskTaskType::GenerateMask => {
                    archive.write_normalized_float(task.weight, NUM_BITS_WEIGHT);
                }
                BoneMaskTaskType::Blend => {
                    archive.write_uint(task.source_idx as u32, NUM_BITS_TASK_INDEX);
                    archive.write_uint(task.target_idx as u32, NUM_BITS_TASK_INDEX);
                    archive.write_normalized_float(task.weight, NUM_BITS_WEIGHT);
                }
                BoneMaskTaskType::Combine => {
                    archive.write_uint(task.source_idx as u32, NUM_BITS_TASK_INDEX);
                    archive.write_uint(task.target_idx as u32, NUM_BITS_TASK_INDEX);
                }
            }
        }
    }

    pub fn deserialize<const N: usize>(
        archive: &mut BitArchive<N>,
        max_bits_for_mask_index: u32,
    ) -> Result<Self, GraphError> {
        let num_tasks = archive.read_uint(NUM_BITS_TASK_COUNT)? as usize;
        if num_tasks > MAX_BONE_MASK_TASKS {
            return Err(GraphError::CorruptArchive(format!(
                "{num_tasks} tasks exceed the {MAX_BONE_MASK_TASKS} task limit"
            )));
        }

        let mut list = Self::new();
        for task_idx in 0..num_tasks {
            let task_type = BoneMaskTaskType::from_bits(archive.read_uint(NUM_BITS_TASK_TYPE)?);
            let task = match task_type {
                BoneMaskTaskType::Mask => BoneMaskTask::mask(archive.read_uint(max_bits_for_mask_index)? as u16),
                BoneMaskTaskType::GenerateMask => {
                    BoneMaskTask::generate(archive.read_normalized_float(NUM_BITS_WEIGHT)?)
                }
                BoneMaskTaskType::Blend | BoneMaskTaskType::Combine => {
                    let source_idx = archive.read_uint(NUM_BITS_TASK_INDEX)? as usize;
                    let target_idx = archive.read_uint(NUM_BITS_TASK_INDEX)? as usize;
                    if source_idx >= task_idx || target_idx >= task_idx {
                        return Err(GraphError::CorruptArchive(format!(
                            "task {task_idx} references operands {source_idx}/{target_idx}"
                        )));
                    }
                    if task_type == BoneMaskTaskType::Blend {
                        let weight = archive.read_normalized_float(NUM_BITS_WEIGHT)?;
                        BoneMaskTask::blend(source_idx as i8, target_idx as i8, weight)
                    } else {
                        BoneMaskTask::combine(source_idx as i8, target_idx as i8)
                    }
                }
            };
            list.push(task);
        }
        Ok(list)
    }
}

fn apply_operation(task: &BoneMaskTask, result: &mut BoneMask, target: &BoneMask) {
    match task.task_type {
        BoneMaskTaskType::Blend => result.blend_to(target, task.weight),
        BoneMaskTaskType::Combine => result.combine_with(target),
        BoneMaskTaskType::Mask | BoneMaskTaskType::GenerateMask => {
            unreachable!("operand-free task")
        }
    }
}

impl TryFrom<Vec<BoneMaskTask>> for BoneMaskTaskList {
    type Error = String;

    fn try_from(tasks: Vec<BoneMaskTask>) -> Result<Self, Self::Error> {
        if tasks.len() > MAX_BONE_MASK_TASKS {
            return Err(format!("{} bone mask tasks exceed the limit of {MAX_BONE_MASK_TASKS}", tasks.len()));
        }
        let mut list = Self::new();
        for (idx, task) in tasks.into_iter().enumerate() {
            let valid_operand = |operand: i8| operand >= 0 && (operand as usize) < idx;
            if task.has_operands() && !(valid_operand(task.source_idx) && valid_operand(task.target_idx)) {
                return Err(format!("bone mask task {idx} references a later task"));
            }
            list.push(task);
        }
        Ok(list)
    }
}

impl From<BoneMaskTaskList> for Vec<BoneMaskTask> {
    fn from(list: BoneMaskTaskList) -> Self {
        list.tasks().to_vec()
    }
}

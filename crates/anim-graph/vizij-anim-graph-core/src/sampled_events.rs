//! Per-update buffer of weighted events sampled from clips and state machines.
//!
//! The buffer is append-only within an update, so a [`SampledEventRange`] produced earlier in
//! the update stays valid until the next [`SampledEventsBuffer::reset`]. Sibling sub-trees
//! produce adjacent ranges in evaluation order.

use serde::{Deserialize, Serialize};

use crate::clip::AnimationEvent;
use crate::ids::{NodeIndex, StringId};
use crate::math::Percentage;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphEventType {
    Entry,
    FullyInState,
    Exit,
    Timed,
    Generic,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SampledEventData {
    Animation {
        event: AnimationEvent,
        percentage_through: Percentage,
    },
    Graph {
        id: StringId,
        event_type: GraphEventType,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampledEvent {
    source_node_idx: NodeIndex,
    data: SampledEventData,
    weight: f32,
    is_from_active_branch: bool,
    is_ignored: bool,
}

impl SampledEvent {
    #[inline]
    pub fn source_node_idx(&self) -> NodeIndex {
        self.source_node_idx
    }

    #[inline]
    pub fn data(&self) -> &SampledEventData {
        &self.data
    }

    pub fn id(&self) -> StringId {
        match &self.data {
            SampledEventData::Animation { event, .. } => event.id,
            SampledEventData::Graph { id, .. } => *id,
        }
    }

    #[inline]
    pub fn weight(&self) -> f32 {
        self.weight
    }

    #[inline]
    pub fn is_from_active_branch(&self) -> bool {
        self.is_from_active_branch
    }

    #[inline]
    pub fn is_ignored(&self) -> bool {
        self.is_ignored
    }

    #[inline]
    pub fn is_animation_event(&self) -> bool {
        matches!(self.data, SampledEventData::Animation { .. })
    }

    #[inline]
    pub fn is_graph_event(&self) -> bool {
        matches!(self.data, SampledEventData::Graph { .. })
    }

    pub fn graph_event_type(&self) -> Option<GraphEventType> {
        match self.data {
            SampledEventData::Graph { event_type, .. } => Some(event_type),
            SampledEventData::Animation { .. } => None,
        }
    }

    pub fn percentage_through(&self) -> Option<Percentage> {
        match self.data {
            SampledEventData::Animation {
                percentage_through, ..
            } => Some(percentage_through),
            SampledEventData::Graph { .. } => None,
        }
    }
}

/// Half-open `[start_idx, end_idx)` range into a [`SampledEventsBuffer`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SampledEventRange {
    pub start_idx: usize,
    pub end_idx: usize,
}

impl SampledEventRange {
    /// Empty range positioned at `idx`.
    #[inline]
    pub fn at(idx: usize) -> Self {
        Self {
            start_idx: idx,
            end_idx: idx,
        }
    }

    #[inline]
    pub fn new(start_idx: usize, end_idx: usize) -> Self {
        debug_assert!(start_idx <= end_idx);
        Self { start_idx, end_idx }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end_idx - self.start_idx
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start_idx == self.end_idx
    }
}

#[derive(Debug, Default)]
pub struct SampledEventsBuffer {
    events: Vec<SampledEvent>,
    num_animation_events: usize,
    num_graph_events: usize,
    /// Node indices from the top-level graph down to the emitting node.
    #[cfg(debug_assertions)]
    debug_paths: Vec<Vec<NodeIndex>>,
}

impl SampledEventsBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            num_animation_events: 0,
            num_graph_events: 0,
            #[cfg(debug_assertions)]
            debug_paths: Vec::with_capacity(capacity),
        }
    }

    pub fn reset(&mut self) {
        self.events.clear();
        self.num_animation_events = 0;
        self.num_graph_events = 0;
        #[cfg(debug_assertions)]
        self.debug_paths.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[SampledEvent] {
        &self.events
    }

    pub fn events_in(&self, range: SampledEventRange) -> &[SampledEvent] {
        self.assert_valid_range(range);
        &self.events[range.start_idx..range.end_idx]
    }

    #[inline]
    pub fn num_animation_events(&self) -> usize {
        self.num_animation_events
    }

    #[inline]
    pub fn num_graph_events(&self) -> usize {
        self.num_graph_events
    }

    /// Empty range at the current end of the buffer.
    #[inline]
    pub fn empty_range(&self) -> SampledEventRange {
        SampledEventRange::at(self.events.len())
    }

    /// Range from `start_idx` to the current end of the buffer.
    #[inline]
    pub fn range_from(&self, start_idx: usize) -> SampledEventRange {
        SampledEventRange::new(start_idx, self.events.len())
    }

    #[cfg(debug_assertions)]
    pub fn debug_path(&self, event_idx: usize) -> &[NodeIndex] {
        &self.debug_paths[event_idx]
    }

    pub fn emplace_animation_event(
        &mut self,
        source_node_idx: NodeIndex,
        event: &AnimationEvent,
        percentage_through: Percentage,
        weight: f32,
        is_from_active_branch: bool,
    ) -> &mut SampledEvent {
        self.num_animation_events += 1;
        self.push(SampledEvent {
            source_node_idx,
            data: SampledEventData::Animation {
                event: *event,
                percentage_through,
            },
            weight,
            is_from_active_branch,
            is_ignored: false,
        })
    }

    pub fn emplace_graph_event(
        &mut self,
        source_node_idx: NodeIndex,
        event_type: GraphEventType,
        id: StringId,
        is_from_active_branch: bool,
    ) -> &mut SampledEvent {
        self.num_graph_events += 1;
        self.push(SampledEvent {
            source_node_idx,
            data: SampledEventData::Graph { id, event_type },
            weight: 1.0,
            is_from_active_branch,
            is_ignored: false,
        })
    }

    fn push(&mut self, event: SampledEvent) -> &mut SampledEvent {
        #[cfg(debug_assertions)]
        self.debug_paths.push(vec![event.source_node_idx]);
        self.events.push(event);
        let last = self.events.len() - 1;
        &mut self.events[last]
    }

    /// Scale `range0` by `1 - weight` and `range1` by `weight`, returning their union.
    /// `range0` must end where `range1` starts.
    pub fn blend_event_ranges(
        &mut self,
        range0: SampledEventRange,
        range1: SampledEventRange,
        weight: f32,
    ) -> SampledEventRange {
        self.assert_valid_range(range0);
        self.assert_valid_range(range1);

        self.update_weights(range0, 1.0 - weight);
        self.update_weights(range1, weight);

        if range0.is_empty() {
            return range1;
        }
        if range1.is_empty() {
            return range0;
        }
        assert_eq!(
            range0.end_idx, range1.start_idx,
            "blended event ranges must be adjacent"
        );
        SampledEventRange::new(range0.start_idx, range1.end_idx)
    }

    /// Copy every event of `other` (a sub-graph's buffer) onto the end of this one.
    /// `prefix_node_idx` is the node that evaluated the sub-graph.
    pub fn append_buffer(&mut self, other: &SampledEventsBuffer, prefix_node_idx: NodeIndex) -> SampledEventRange {
        let start_idx = self.events.len();
        self.events.extend_from_slice(&other.events);
        self.num_animation_events += other.num_animation_events;
        self.num_graph_events += other.num_graph_events;

        #[cfg(debug_assertions)]
        for path in &other.debug_paths {
            let mut prefixed = Vec::with_capacity(path.len() + 1);
            prefixed.push(prefix_node_idx);
            prefixed.extend_from_slice(path);
            self.debug_paths.push(prefixed);
        }
        #[cfg(not(debug_assertions))]
        let _ = prefix_node_idx;

        self.range_from(start_idx)
    }

    /// Multiply every weight in `range` by `weight`.
    pub fn update_weights(&mut self, range: SampledEventRange, weight: f32) {
        self.assert_valid_range(range);
        for event in &mut self.events[range.start_idx..range.end_idx] {
            event.weight *= weight;
        }
    }

    /// Set both flags on every event in `range`.
    pub fn mark_events(&mut self, range: SampledEventRange, is_from_active_branch: bool, is_ignored: bool) {
        self.assert_valid_range(range);
        for event in &mut self.events[range.start_idx..range.end_idx] {
            event.is_from_active_branch = is_from_active_branch;
            event.is_ignored = is_ignored;
        }
    }

    pub fn mark_events_as_ignored(&mut self, range: SampledEventRange) {
        self.assert_valid_range(range);
        for event in &mut self.events[range.start_idx..range.end_idx] {
            event.is_ignored = true;
        }
    }

    pub fn mark_events_as_ignored_and_clear_weights(&mut self, range: SampledEventRange) {
        self.assert_valid_range(range);
        for event in &mut self.events[range.start_idx..range.end_idx] {
            event.is_ignored = true;
            event.weight = 0.0;
        }
    }

    pub fn mark_events_as_from_inactive_branch(&mut self, range: SampledEventRange) {
        self.assert_valid_range(range);
        for event in &mut self.events[range.start_idx..range.end_idx] {
            event.is_from_active_branch = false;
        }
    }

    #[inline]
    fn assert_valid_range(&self, range: SampledEventRange) {
        assert!(
            range.start_idx <= range.end_idx && range.end_idx <= self.events.len(),
            "sampled event range {}..{} is outside a buffer of {} events",
            range.start_idx,
            range.end_idx,
            self.events.len()
        );
    }
}

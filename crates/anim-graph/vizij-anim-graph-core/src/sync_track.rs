//! Sync tracks: per-clip partitions of normalized time into named events.
//!
//! Clips of different lengths are kept in step by expressing playback position as
//! "event index + percentage through that event" instead of raw time. Blending two tracks
//! produces a synthetic track with `lcm(n0, n1)` events so that both sources can be driven
//! from a single [`SyncTrackTimeRange`].

use serde::{Deserialize, Serialize};

use crate::ids::StringId;
use crate::math::{lerp, Percentage};

/// A named span of the normalized cycle. The last event may wrap past `1.0`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncTrackEvent {
    pub id: StringId,
    pub start_time: Percentage,
    pub duration: Percentage,
}

/// Authored marker: an event begins at `start_time` and lasts until the next marker.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncTrackMarker {
    pub id: StringId,
    pub start_time: f32,
}

impl SyncTrackMarker {
    pub fn new(id: impl Into<StringId>, start_time: f32) -> Self {
        Self {
            id: id.into(),
            start_time,
        }
    }
}

/// Position on a sync track.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SyncTrackTime {
    pub event_idx: i32,
    pub percentage_through: Percentage,
}

impl SyncTrackTime {
    pub fn new(event_idx: i32, percentage_through: f32) -> Self {
        Self {
            event_idx,
            percentage_through: Percentage(percentage_through),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTrackTimeRange {
    pub start_time: SyncTrackTime,
    pub end_time: SyncTrackTime,
}

impl SyncTrackTimeRange {
    pub fn new(start_time: SyncTrackTime, end_time: SyncTrackTime) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// Zero-length range at `time`.
    pub fn at(time: SyncTrackTime) -> Self {
        Self::new(time, time)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SyncTrackDescriptor {
    #[serde(default)]
    markers: Vec<SyncTrackMarker>,
    #[serde(default)]
    start_event_offset: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "SyncTrackDescriptor", into = "SyncTrackDescriptor")]
pub struct SyncTrack {
    events: Vec<SyncTrackEvent>,
    start_event_offset: i32,
}

impl Default for SyncTrack {
    /// A single event covering the whole cycle.
    fn default() -> Self {
        Self {
            events: vec![SyncTrackEvent {
                id: StringId::INVALID,
                start_time: Percentage::ZERO,
                duration: Percentage::ONE,
            }],
            start_event_offset: 0,
        }
    }
}

fn greatest_common_divisor(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

fn lowest_common_multiple(a: usize, b: usize) -> usize {
    a / greatest_common_divisor(a, b) * b
}

impl SyncTrack {
    /// Build a track from authored markers.
    ///
    /// Markers may arrive unsorted; start times are wrapped into `[0, 1)` and duplicates are
    /// dropped. An empty marker list yields the single full-cycle default event.
    pub fn new(markers: &[SyncTrackMarker], start_event_offset: i32) -> Self {
        let mut track = SyncTrack {
            events: Vec::with_capacity(markers.len().max(1)),
            start_event_offset,
        };

        for marker in markers {
            let start = Percentage(marker.start_time).normalized();
            track.events.push(SyncTrackEvent {
                id: marker.id,
                start_time: start,
                duration: Percentage::ZERO,
            });
        }
        track
            .events
            .sort_by(|a, b| a.start_time.0.total_cmp(&b.start_time.0));
        track.events.dedup_by(|b, a| a.start_time == b.start_time);

        if track.events.is_empty() {
            let mut default = SyncTrack::default();
            default.start_event_offset = start_event_offset;
            return default;
        }

        let num_events = track.events.len();
        let first_start = track.events[0].start_time.0;
        for idx in 0..num_events {
            let start = track.events[idx].start_time.0;
            let duration = if idx + 1 < num_events {
                track.events[idx + 1].start_time.0 - start
            } else {
                (1.0 - start) + first_start
            };
            track.events[idx].duration = Percentage(duration);
        }
        track.start_event_offset = track.clamp_index_to_track(start_event_offset);
        track
    }

    /// Synthetic track blending `track0` towards `track1`.
    pub fn blended(track0: &SyncTrack, track1: &SyncTrack, blend_weight: f32) -> SyncTrack {
        let mut track = SyncTrack {
            events: Vec::new(),
            start_event_offset: 0,
        };
        track.blend_from(track0, track1, blend_weight);
        track
    }

    /// In-place version of [`SyncTrack::blended`] that reuses this track's storage.
    ///
    /// The result has `lcm(n0, n1)` events. Each source's cycle is repeated until both cover
    /// the same number of events, durations are scaled down by the repeat count, lerped by
    /// `blend_weight`, and renormalized so that the cycle sums to `1.0`. Event IDs (and the
    /// start offset) come from `track1` when `blend_weight > 0.5`, from `track0` otherwise.
    pub fn blend_from(&mut self, track0: &SyncTrack, track1: &SyncTrack, blend_weight: f32) {
        debug_assert!((0.0..=1.0).contains(&blend_weight));
        let num_events0 = track0.num_events();
        let num_events1 = track1.num_events();
        let num_blended = lowest_common_multiple(num_events0, num_events1);
        let scale0 = num_events0 as f32 / num_blended as f32;
        let scale1 = num_events1 as f32 / num_blended as f32;
        let take_track1 = blend_weight > 0.5;

        self.events.clear();
        self.start_event_offset = if take_track1 {
            track1.start_event_offset
        } else {
            track0.start_event_offset
        };

        let mut total_duration = 0.0f32;
        for idx in 0..num_blended {
            let event0 = &track0.events[idx % num_events0];
            let event1 = &track1.events[idx % num_events1];
            let duration = lerp(
                event0.duration.0 * scale0,
                event1.duration.0 * scale1,
                blend_weight,
            );
            total_duration += duration;
            self.events.push(SyncTrackEvent {
                id: if take_track1 { event1.id } else { event0.id },
                start_time: Percentage::ZERO,
                duration: Percentage(duration),
            });
        }

        let first_start = lerp(
            track0.events[0].start_time.0 * scale0,
            track1.events[0].start_time.0 * scale1,
            blend_weight,
        );

        let mut start = first_start;
        let mut accumulated = 0.0f32;
        let last = num_blended - 1;
        for (idx, event) in self.events.iter_mut().enumerate() {
            let duration = if idx == last {
                1.0 - accumulated
            } else if total_duration > 0.0 {
                event.duration.0 / total_duration
            } else {
                1.0 / num_blended as f32
            };
            event.start_time = Percentage(start);
            event.duration = Percentage(duration);
            accumulated += duration;
            start += duration;
        }
    }

    /// Duration of a synchronized blend: each source duration is scaled to the blended event
    /// count before lerping.
    pub fn calculate_duration_synchronized(
        duration0: f32,
        duration1: f32,
        num_events0: usize,
        num_events1: usize,
        num_events_blended: usize,
        blend_weight: f32,
    ) -> f32 {
        debug_assert!((0.0..=1.0).contains(&blend_weight));
        let scaled0 = duration0 * (num_events_blended as f32 / num_events0 as f32);
        let scaled1 = duration1 * (num_events_blended as f32 / num_events1 as f32);
        lerp(scaled0, scaled1, blend_weight)
    }

    /// Temporary, event-less track used while a node's blended track is being rebuilt.
    pub(crate) fn placeholder() -> Self {
        SyncTrack {
            events: Vec::new(),
            start_event_offset: 0,
        }
    }

    #[inline]
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[SyncTrackEvent] {
        &self.events
    }

    #[inline]
    pub fn start_event_offset(&self) -> i32 {
        self.start_event_offset
    }

    #[inline]
    pub fn has_start_offset(&self) -> bool {
        self.start_event_offset != 0
    }

    /// Wrap any (possibly negative) event index onto the track.
    #[inline]
    pub fn clamp_index_to_track(&self, event_idx: i32) -> i32 {
        debug_assert!(!self.events.is_empty());
        event_idx.rem_euclid(self.events.len() as i32)
    }

    /// Event at `event_idx` counted from the offset event.
    pub fn event(&self, event_idx: i32) -> &SyncTrackEvent {
        let idx = self.clamp_index_to_track(event_idx + self.start_event_offset);
        &self.events[idx as usize]
    }

    pub fn event_without_offset(&self, event_idx: i32) -> &SyncTrackEvent {
        &self.events[self.clamp_index_to_track(event_idx) as usize]
    }

    pub fn event_duration(&self, event_idx: i32) -> Percentage {
        self.event(event_idx).duration
    }

    pub fn start_time(&self) -> SyncTrackTime {
        SyncTrackTime::new(0, 0.0)
    }

    pub fn end_time(&self) -> SyncTrackTime {
        SyncTrackTime::new(self.events.len() as i32 - 1, 1.0)
    }

    /// Map a (possibly looping) percentage to a sync track time.
    ///
    /// The integer part of `percentage` is ignored. An exact end of cycle (`1.0`, `2.0`, ...)
    /// resolves to the last event at 100% rather than the start of the first event, and
    /// positions before the first event's start belong to the wrapping last event.
    pub fn get_time(&self, percentage: Percentage, with_offset: bool) -> SyncTrackTime {
        debug_assert!(!self.events.is_empty());
        let position = percentage.normalized_time().0;
        let last_idx = self.events.len() - 1;

        if position >= 1.0 {
            let mut time = SyncTrackTime::new(last_idx as i32, 1.0);
            if with_offset {
                time.event_idx = self.clamp_index_to_track(time.event_idx - self.start_event_offset);
            }
            return time;
        }

        let (event_idx, offset_into_event) = if position < self.events[0].start_time.0 {
            (last_idx, (position + 1.0) - self.events[last_idx].start_time.0)
        } else {
            let idx = self
                .events
                .partition_point(|event| event.start_time.0 <= position)
                .saturating_sub(1);
            (idx, position - self.events[idx].start_time.0)
        };

        let duration = self.events[event_idx].duration.0;
        let percentage_through = if duration > 0.0 {
            (offset_into_event / duration).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut time = SyncTrackTime::new(event_idx as i32, percentage_through);
        if with_offset {
            time.event_idx = self.clamp_index_to_track(time.event_idx - self.start_event_offset);
        }
        time
    }

    /// Inverse of [`SyncTrack::get_time`]. Results past the end of the cycle (the wrapping
    /// part of the last event) are folded back into `[0, 1)`.
    pub fn get_percentage_through(&self, time: SyncTrackTime, with_offset: bool) -> Percentage {
        debug_assert!((0.0..=1.0).contains(&time.percentage_through.0));
        let event = if with_offset {
            self.event(time.event_idx)
        } else {
            self.event_without_offset(time.event_idx)
        };
        let mut percentage = event.start_time.0 + event.duration.0 * time.percentage_through.0;
        if percentage > 1.0 {
            percentage -= 1.0;
        }
        Percentage(percentage)
    }

    /// Advance `start_time` (offset space) by `delta` of the cycle. The result is expressed
    /// without the offset so that it can be fed straight into a synchronized child update.
    pub fn update_event_time(&self, start_time: SyncTrackTime, delta: Percentage) -> SyncTrackTime {
        let start = self.get_percentage_through(start_time, true);
        self.get_time(start + delta.0, false)
    }

    /// Portion of the cycle covered when moving from `start_time` to `end_time`
    /// (both without offset), wrapping once if the end precedes the start.
    pub fn calculate_percentage_covered(
        &self,
        start_time: SyncTrackTime,
        end_time: SyncTrackTime,
    ) -> Percentage {
        let start = self.get_percentage_through(start_time, false);
        let end = self.get_percentage_through(end_time, false);
        Percentage(Percentage::looping_delta(start, end))
    }
}

impl From<SyncTrackDescriptor> for SyncTrack {
    fn from(descriptor: SyncTrackDescriptor) -> Self {
        SyncTrack::new(&descriptor.markers, descriptor.start_event_offset)
    }
}

impl From<SyncTrack> for SyncTrackDescriptor {
    fn from(track: SyncTrack) -> Self {
        SyncTrackDescriptor {
            markers: track
                .events
                .iter()
                .map(|event| SyncTrackMarker {
                    id: event.id,
                    start_time: event.start_time.0,
                })
                .collect(),
            start_event_offset: track.start_event_offset,
        }
    }
}

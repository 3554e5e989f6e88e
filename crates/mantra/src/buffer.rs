//! Forward buffer of generated background segments.
//!
//! Segments are numbered with an absolute index for the life of the session
//! and carry cumulative start offsets, so position arithmetic never assumes
//! every segment has the same length. Playback position picks the current
//! segment; growth and eviction are decided relative to it.

use crate::generation::GeneratedSegment;
use crate::sessions::{Segment, SegmentId, SessionId};
use cas::ContentHash;
use chrono::Utc;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct SegmentBuffer {
    /// Segments to keep ahead of the current one
    capacity: usize,
    segments: VecDeque<Segment>,
    current_index: u64,
    next_index: u64,
    next_offset: f64,
}

impl SegmentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            segments: VecDeque::new(),
            current_index: 0,
            next_index: 0,
            next_offset: 0.0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Upper bound on buffered segments once eviction has run.
    pub fn max_len(&self) -> usize {
        self.capacity + 2
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn current_index(&self) -> u64 {
        self.current_index
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn get(&self, index: u64) -> Option<&Segment> {
        let first = self.segments.front()?.index;
        let offset = index.checked_sub(first)?;
        self.segments.get(usize::try_from(offset).ok()?)
    }

    pub fn handle(&self, index: u64) -> Option<&ContentHash> {
        self.get(index).map(|s| &s.handle)
    }

    /// Append a generated segment at the tail.
    pub fn push(&mut self, session_id: &SessionId, generated: GeneratedSegment) -> &Segment {
        let index = self.next_index;
        let segment = Segment {
            id: SegmentId::for_session(session_id, index),
            index,
            handle: generated.handle,
            duration: generated.duration,
            start_offset: self.next_offset,
            prompt: generated.prompt,
            created_at: Utc::now(),
        };
        self.next_index += 1;
        self.next_offset = segment.end_offset();
        self.segments.push_back(segment);
        // push_back just ran, so back() is present
        &self.segments[self.segments.len() - 1]
    }

    /// Point the current index at the segment containing `position`.
    ///
    /// Positions before the oldest buffered segment clamp to it; positions
    /// past the tail clamp to the last segment.
    pub fn locate(&mut self, position: f64) -> u64 {
        let (Some(first), Some(last)) = (self.segments.front(), self.segments.back()) else {
            return self.current_index;
        };
        self.current_index = if position < first.start_offset {
            first.index
        } else {
            self.segments
                .iter()
                .find(|s| s.contains(position))
                .map(|s| s.index)
                .unwrap_or(last.index)
        };
        self.current_index
    }

    /// Segments buffered after the current one.
    pub fn ahead_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.index > self.current_index)
            .count()
    }

    /// Whether another segment may be appended without exceeding
    /// `capacity` segments ahead of the current one.
    pub fn has_room(&self) -> bool {
        self.ahead_count() < self.capacity
    }

    /// Whether playback at `position` is close enough to the end of the
    /// current segment that another one should be requested.
    pub fn needs_growth(&self, position: f64, look_ahead: f64) -> bool {
        let Some(current) = self.get(self.current_index) else {
            return false;
        };
        position >= current.end_offset() - look_ahead && self.has_room()
    }

    /// Drop already-played segments from the head until the buffer is back
    /// under its bound. The current segment is never evicted.
    pub fn evict(&mut self) -> Vec<Segment> {
        let mut evicted = Vec::new();
        while self.segments.len() > self.max_len() {
            match self.segments.front() {
                Some(oldest) if oldest.index < self.current_index => {
                    if let Some(segment) = self.segments.pop_front() {
                        evicted.push(segment);
                    }
                }
                _ => break,
            }
        }
        evicted
    }

    /// Remove every segment, for cleanup.
    pub fn drain(&mut self) -> Vec<Segment> {
        self.segments.drain(..).collect()
    }
}

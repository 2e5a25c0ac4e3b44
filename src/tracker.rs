//! Per-contact continuity context: smoothed position, travel direction and
//! match/miss counters.

use std::num::NonZeroUsize;

use serde::Serialize;

use crate::filters::SmoothingBuffer;
use crate::geometry::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerState {
    /// Created from a lone input, not yet confirmed.
    Discover,
    /// Confirmed; lifecycle events are emitted for it.
    Forward,
    /// Removed from the live set. Terminal.
    Destroy,
}

/// Confidence thresholds. A lock holds once the counter is strictly
/// greater than the threshold, so zero means "after one sample".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockThresholds {
    pub strong_lock: u32,
    pub strong_lost_lock: u32,
}

#[derive(Debug, Clone)]
pub struct SpatiotemporalTracker {
    id: u64,
    state: TrackerState,
    buffer: SmoothingBuffer,
    position: Vec2,
    start_position: Vec2,
    forward: Vec2,
    normal_forward: Vec2,
    prediction_scale: f64,
    thresholds: LockThresholds,
    consecutive_matches: u32,
    consecutive_misses: u32,
}

impl SpatiotemporalTracker {
    pub fn new(
        id: u64,
        smooth_size: NonZeroUsize,
        prediction_scale: f64,
        thresholds: LockThresholds,
    ) -> Self {
        Self {
            id,
            state: TrackerState::Discover,
            buffer: SmoothingBuffer::with_capacity(smooth_size),
            position: Vec2::ZERO,
            start_position: Vec2::ZERO,
            forward: Vec2::ZERO,
            normal_forward: Vec2::ZERO,
            prediction_scale,
            thresholds,
            consecutive_matches: 0,
            consecutive_misses: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Discover -> Forward happens once; nothing leaves Destroy.
    pub(crate) fn set_state(&mut self, next: TrackerState) {
        if self.state == TrackerState::Destroy {
            return;
        }
        if next == TrackerState::Discover && self.state == TrackerState::Forward {
            return;
        }
        self.state = next;
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn start_position(&self) -> Vec2 {
        self.start_position
    }

    /// Previous position minus current: points backwards along travel.
    pub fn forward(&self) -> Vec2 {
        self.forward
    }

    pub fn set_prediction_scale(&mut self, scale: f64) {
        self.prediction_scale = scale;
    }

    pub fn predicted_next_position(&self) -> Vec2 {
        self.position + self.normal_forward * self.prediction_scale
    }

    pub fn consecutive_matches(&self) -> u32 {
        self.consecutive_matches
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn strong_lock(&self) -> bool {
        self.consecutive_matches > self.thresholds.strong_lock
    }

    pub fn strong_lost_lock(&self) -> bool {
        self.consecutive_misses > self.thresholds.strong_lost_lock
    }

    pub fn consume_input(&mut self, point: Vec2) {
        let first = self.consecutive_matches == 0 && self.buffer.is_empty();
        let last = self.position;
        self.position = self.buffer.add_and_get(point);

        // no previous position on the very first sample
        self.forward = if first { Vec2::ZERO } else { last - self.position };
        self.normal_forward = self.forward.normalized();

        if self.consecutive_matches == 0 {
            self.start_position = self.position;
        }
        self.consecutive_matches = self.consecutive_matches.saturating_add(1);
        self.consecutive_misses = 0;
    }

    /// Register a frame without a matching input. Position coasts.
    pub fn consume_nothing(&mut self) {
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
    }

    /// Optimistic affinity: the closer of "stayed put" and "kept going".
    /// Smaller is better.
    pub fn classification_ranking(&self, point: Vec2) -> f64 {
        let from_best = self.position.distance(point);
        let from_predicted = self.predicted_next_position().distance(point);
        from_best.min(from_predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(scale: f64) -> SpatiotemporalTracker {
        SpatiotemporalTracker::new(
            1,
            NonZeroUsize::new(1).unwrap(),
            scale,
            LockThresholds::default(),
        )
    }

    #[test]
    fn first_input_sets_start_and_position() {
        let mut t = tracker(100.0);
        assert!(!t.strong_lock());
        t.consume_input(Vec2::new(10.0, 20.0));
        assert_eq!(t.position(), Vec2::new(10.0, 20.0));
        assert_eq!(t.start_position(), Vec2::new(10.0, 20.0));
        assert_eq!(t.forward(), Vec2::ZERO);
        assert_eq!(t.predicted_next_position(), t.position());
        assert!(t.strong_lock());
    }

    #[test]
    fn forward_points_backwards_along_travel() {
        let mut t = tracker(10.0);
        t.consume_input(Vec2::new(0.0, 0.0));
        t.consume_input(Vec2::new(4.0, 0.0));
        assert_eq!(t.forward(), Vec2::new(-4.0, 0.0));
        assert_eq!(t.predicted_next_position(), Vec2::new(-6.0, 0.0));
        assert_eq!(t.start_position(), Vec2::new(0.0, 0.0));
    }

    #[test]
    fn ranking_takes_the_better_hypothesis() {
        let mut t = tracker(10.0);
        t.consume_input(Vec2::new(0.0, 0.0));
        t.consume_input(Vec2::new(4.0, 0.0));
        // predicted sits at (-6, 0)
        assert_eq!(t.classification_ranking(Vec2::new(-6.0, 1.0)), 1.0);
        assert_eq!(t.classification_ranking(Vec2::new(4.0, 3.0)), 3.0);
    }

    #[test]
    fn misses_coast_and_matches_reset_them() {
        let mut t = tracker(10.0);
        t.consume_input(Vec2::new(5.0, 5.0));
        t.consume_nothing();
        t.consume_nothing();
        assert_eq!(t.consecutive_misses(), 2);
        assert!(t.strong_lost_lock());
        assert_eq!(t.position(), Vec2::new(5.0, 5.0));
        t.consume_input(Vec2::new(5.0, 5.0));
        assert_eq!(t.consecutive_misses(), 0);
        assert!(!t.strong_lost_lock());
    }

    #[test]
    fn destroy_is_terminal() {
        let mut t = tracker(10.0);
        t.set_state(TrackerState::Forward);
        t.set_state(TrackerState::Discover);
        assert_eq!(t.state(), TrackerState::Forward);
        t.set_state(TrackerState::Destroy);
        t.set_state(TrackerState::Forward);
        assert_eq!(t.state(), TrackerState::Destroy);
    }

    #[test]
    fn thresholds_delay_confidence() {
        let mut t = SpatiotemporalTracker::new(
            7,
            NonZeroUsize::new(2).unwrap(),
            10.0,
            LockThresholds {
                strong_lock: 2,
                strong_lost_lock: 1,
            },
        );
        t.consume_input(Vec2::ZERO);
        t.consume_input(Vec2::ZERO);
        assert!(!t.strong_lock());
        t.consume_input(Vec2::ZERO);
        assert!(t.strong_lock());
        t.consume_nothing();
        assert!(!t.strong_lost_lock());
        t.consume_nothing();
        assert!(t.strong_lost_lock());
    }
}

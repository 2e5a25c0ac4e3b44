//! Frame-to-frame identity matching for unordered IR blobs.
//!
//! The remote reports up to four blobs per frame in no particular order. The
//! classifier keeps one [`SpatiotemporalTracker`] per contact and, each frame,
//! decides which blob continues which tracker, which trackers went missing
//! and which blobs are new. Matching is a greedy walk over the full
//! tracker x input table sorted by ranking. With at most a handful of
//! contacts per frame the gap to an optimal assignment is well below sensor
//! noise.
//!
//! Lifecycle events are queued while the frame is processed and returned to
//! the caller in the order they fired.

use std::num::NonZeroUsize;

use log::{debug, trace};
use serde::Serialize;

use crate::error::TrackError;
use crate::geometry::Vec2;
use crate::tracker::{LockThresholds, SpatiotemporalTracker, TrackerState};

/// One unlabeled detection in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawInput {
    pub point: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerEventKind {
    Start,
    Update,
    End,
}

/// Snapshot of a tracker at the moment an event fired.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackerEvent {
    pub kind: TrackerEventKind,
    pub id: u64,
    pub position: Vec2,
    pub start_position: Vec2,
}

impl TrackerEvent {
    fn of(kind: TrackerEventKind, t: &SpatiotemporalTracker) -> Self {
        Self {
            kind,
            id: t.id(),
            position: t.position(),
            start_position: t.start_position(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    pub smooth_size: usize,
    pub duplicate_distance: f64,
    pub prediction_scale: f64,
    pub thresholds: LockThresholds,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            smooth_size: 3,
            duplicate_distance: 10.0,
            prediction_scale: 1920.0,
            thresholds: LockThresholds::default(),
        }
    }
}

/// One row of the affinity table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranking {
    pub tracker: usize,
    pub input: usize,
    pub score: f64,
}

/// Greedy minimum-weight matching over a ranking table.
///
/// Rows are visited in ascending score; a row is accepted when neither its
/// tracker nor its input has been claimed yet. Equal scores keep their table
/// order (stable sort), which for tables built tracker-major means lower
/// tracker index, then lower input index, wins. That tie-break is
/// deterministic but carries no meaning.
pub fn assign_greedy(table: &[Ranking]) -> Vec<Ranking> {
    let mut sorted = table.to_vec();
    sorted.sort_by(|a, b| a.score.total_cmp(&b.score));

    let mut best: Vec<Ranking> = Vec::with_capacity(sorted.len().min(4));
    for row in sorted {
        let taken = best
            .iter()
            .any(|b| b.tracker == row.tracker || b.input == row.input);
        if !taken {
            best.push(row);
        }
    }
    best
}

/// A removed tracker gets an end whenever it held a strong lock, whether
/// or not a start was ever sent for it.
fn announces_end(t: &SpatiotemporalTracker) -> bool {
    t.strong_lock()
}

#[derive(Debug)]
pub struct SpatiotemporalClassifier {
    trackers: Vec<SpatiotemporalTracker>,
    next_id: u64,
    smooth_size: NonZeroUsize,
    duplicate_distance: f64,
    prediction_scale: f64,
    thresholds: LockThresholds,
    events: Vec<TrackerEvent>,
}

impl SpatiotemporalClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, TrackError> {
        let smooth_size = NonZeroUsize::new(config.smooth_size)
            .ok_or(TrackError::InvalidCapacity(config.smooth_size))?;
        Ok(Self {
            trackers: Vec::with_capacity(4),
            next_id: 0,
            smooth_size,
            duplicate_distance: config.duplicate_distance,
            prediction_scale: config.prediction_scale,
            thresholds: config.thresholds,
            events: Vec::new(),
        })
    }

    /// Apply new tuning. Live trackers keep their buffers; new trackers pick
    /// up the new values.
    pub fn configure(&mut self, config: ClassifierConfig) -> Result<(), TrackError> {
        self.smooth_size = NonZeroUsize::new(config.smooth_size)
            .ok_or(TrackError::InvalidCapacity(config.smooth_size))?;
        self.duplicate_distance = config.duplicate_distance;
        self.prediction_scale = config.prediction_scale;
        self.thresholds = config.thresholds;
        for t in &mut self.trackers {
            t.set_prediction_scale(config.prediction_scale);
        }
        Ok(())
    }

    pub fn default_smooth_size(&self) -> usize {
        self.smooth_size.get()
    }

    pub fn duplicate_distance(&self) -> f64 {
        self.duplicate_distance
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn set_duplicate_distance(&mut self, distance: f64) {
        self.duplicate_distance = distance;
    }

    pub fn trackers(&self) -> &[SpatiotemporalTracker] {
        &self.trackers
    }

    /// Drop every tracker and restart IDs from zero. IDs are not unique
    /// across a reset.
    pub fn reset(&mut self) {
        self.trackers.clear();
        self.events.clear();
        self.next_id = 0;
    }

    /// Match one frame of inputs against the live trackers and return the
    /// lifecycle events in the order they fired.
    pub fn process_frame(&mut self, inputs: &[RawInput]) -> Vec<TrackerEvent> {
        if inputs.is_empty() && self.trackers.is_empty() {
            return Vec::new();
        }

        self.remove_duplicates();

        let mut table = Vec::with_capacity(self.trackers.len() * inputs.len());
        for (ti, tracker) in self.trackers.iter().enumerate() {
            for (ii, input) in inputs.iter().enumerate() {
                table.push(Ranking {
                    tracker: ti,
                    input: ii,
                    score: tracker.classification_ranking(input.point),
                });
            }
        }
        let best = assign_greedy(&table);
        trace!("classifier: {} pairs, {} accepted", table.len(), best.len());

        let mut matched = vec![false; self.trackers.len()];
        let mut claimed = vec![false; inputs.len()];
        for b in &best {
            matched[b.tracker] = true;
            claimed[b.input] = true;
        }

        self.dispatch_updates(&best, inputs);
        self.remove_old(&matched);
        let fresh: Vec<Vec2> = inputs
            .iter()
            .zip(&claimed)
            .filter(|(_, c)| !**c)
            .map(|(i, _)| i.point)
            .collect();
        self.create_new(&fresh);

        std::mem::take(&mut self.events)
    }

    /// Two trackers sitting on top of each other are one light source split
    /// by sensor noise. Drop the first-indexed of the pair and rescan.
    fn remove_duplicates(&mut self) {
        'scan: loop {
            for i in 0..self.trackers.len() {
                for j in (i + 1)..self.trackers.len() {
                    let d = self.trackers[i]
                        .position()
                        .distance(self.trackers[j].position());
                    if d < self.duplicate_distance {
                        let mut removed = self.trackers.remove(i);
                        let announce = announces_end(&removed);
                        removed.set_state(TrackerState::Destroy);
                        debug!(
                            "tracker {} merged into {} (d={d:.1})",
                            removed.id(),
                            self.trackers[j - 1].id()
                        );
                        if announce {
                            self.events
                                .push(TrackerEvent::of(TrackerEventKind::End, &removed));
                        }
                        continue 'scan;
                    }
                }
            }
            break;
        }
    }

    fn dispatch_updates(&mut self, best: &[Ranking], inputs: &[RawInput]) {
        for b in best {
            let tracker = &mut self.trackers[b.tracker];
            tracker.consume_input(inputs[b.input].point);
            if !tracker.strong_lock() {
                continue;
            }
            if tracker.state() == TrackerState::Discover {
                tracker.set_state(TrackerState::Forward);
                debug!("tracker {} start at {:?}", tracker.id(), tracker.position());
                self.events
                    .push(TrackerEvent::of(TrackerEventKind::Start, tracker));
            } else {
                self.events
                    .push(TrackerEvent::of(TrackerEventKind::Update, tracker));
            }
        }
    }

    fn remove_old(&mut self, matched: &[bool]) {
        // walk the original indices; removals shift what follows
        let mut keep = Vec::with_capacity(self.trackers.len());
        for (mut tracker, was_matched) in self.trackers.drain(..).zip(matched.iter().copied()) {
            if was_matched {
                keep.push(tracker);
                continue;
            }
            tracker.consume_nothing();
            if !tracker.strong_lost_lock() {
                keep.push(tracker);
                continue;
            }
            let announce = announces_end(&tracker);
            tracker.set_state(TrackerState::Destroy);
            if announce {
                debug!("tracker {} end at {:?}", tracker.id(), tracker.position());
                self.events
                    .push(TrackerEvent::of(TrackerEventKind::End, &tracker));
            } else {
                trace!("tracker {} dropped before it stabilized", tracker.id());
            }
        }
        self.trackers = keep;
    }

    fn create_new(&mut self, points: &[Vec2]) {
        for &p in points {
            self.next_id += 1;
            let mut tracker = SpatiotemporalTracker::new(
                self.next_id,
                self.smooth_size,
                self.prediction_scale,
                self.thresholds,
            );
            tracker.consume_input(p);
            tracker.set_state(TrackerState::Discover);
            trace!("tracker {} discovered at {p:?}", tracker.id());
            self.trackers.push(tracker);
        }
    }
}

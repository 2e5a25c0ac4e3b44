//! Fixed-capacity moving average over 2D samples.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use crate::error::TrackError;
use crate::geometry::Vec2;

/// Ring of the most recent samples. Once full, each insert evicts the
/// oldest one. The smoothed value is the plain mean of whatever is held.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    samples: VecDeque<Vec2>,
    capacity: NonZeroUsize,
}

impl SmoothingBuffer {
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn new(capacity: usize) -> Result<Self, TrackError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(TrackError::InvalidCapacity(capacity))?;
        Ok(Self::with_capacity(capacity))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.get()),
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn add_value(&mut self, point: Vec2) {
        if self.samples.len() == self.capacity.get() {
            self.samples.pop_front();
        }
        self.samples.push_back(point);
    }

    /// Insert and return the new mean in one step. Never fails since the
    /// buffer holds at least the sample just pushed.
    pub fn add_and_get(&mut self, point: Vec2) -> Vec2 {
        self.add_value(point);
        self.mean()
    }

    /// Overwrite the most recent sample without advancing the ring.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn replace_last(&mut self, point: Vec2) -> Result<(), TrackError> {
        let last = self.samples.back_mut().ok_or(TrackError::EmptyBuffer)?;
        *last = point;
        Ok(())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn smoothed_value(&self) -> Result<Vec2, TrackError> {
        if self.samples.is_empty() {
            return Err(TrackError::EmptyBuffer);
        }
        Ok(self.mean())
    }

    /// Change the capacity. With `preserve` the newest `min(len, new)`
    /// samples survive in insertion order; otherwise the buffer is emptied.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn resize(&mut self, capacity: usize, preserve: bool) -> Result<(), TrackError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(TrackError::InvalidCapacity(capacity))?;
        if preserve {
            while self.samples.len() > capacity.get() {
                self.samples.pop_front();
            }
        } else {
            self.samples.clear();
        }
        self.capacity = capacity;
        Ok(())
    }

    fn mean(&self) -> Vec2 {
        let mut sum = Vec2::ZERO;
        for s in &self.samples {
            sum += *s;
        }
        sum / self.samples.len().max(1) as f64
    }
}

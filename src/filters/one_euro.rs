//! One Euro filter: smooth at rest, responsive during motion.

use std::f64::consts::PI;

use crate::geometry::Vec2;

#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,

    x_prev: f64,
    dx_prev: f64,
    t_prev: f64,
    initialized: bool,
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f64, beta: f64) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff: 1.0,
            x_prev: 0.0,
            dx_prev: 0.0,
            t_prev: 0.0,
            initialized: false,
        }
    }

    fn smoothing_factor(t_e: f64, cutoff: f64) -> f64 {
        let r = 2.0 * PI * cutoff * t_e;
        r / (r + 1.0)
    }

    /// Filter `x` observed at time `t` (seconds).
    pub fn filter(&mut self, t: f64, x: f64) -> f64 {
        if !self.initialized {
            self.x_prev = x;
            self.t_prev = t;
            self.initialized = true;
            return x;
        }

        let t_e = t - self.t_prev;
        if t_e <= 0.0 {
            return self.x_prev;
        }

        let a_d = Self::smoothing_factor(t_e, self.d_cutoff);
        let dx = (x - self.x_prev) / t_e;
        let dx_hat = a_d * dx + (1.0 - a_d) * self.dx_prev;

        let cutoff = self.min_cutoff + self.beta * dx_hat.abs();
        let a = Self::smoothing_factor(t_e, cutoff);
        let x_hat = a * x + (1.0 - a) * self.x_prev;

        self.x_prev = x_hat;
        self.dx_prev = dx_hat;
        self.t_prev = t;
        x_hat
    }

    pub fn reset(&mut self) {
        self.initialized = false;
        self.dx_prev = 0.0;
    }
}

/// Pair of one-euro filters clocked by a nominal sample rate instead of
/// wall time; the remote reports at a fixed rate.
#[derive(Debug, Clone)]
pub struct CoordFilter {
    freq: f64,
    frame_count: u64,
    x: OneEuroFilter,
    y: OneEuroFilter,
}

impl Default for CoordFilter {
    fn default() -> Self {
        Self::new(100.0, 1.0, 0.005)
    }
}

impl CoordFilter {
    pub fn new(freq: f64, min_cutoff: f64, beta: f64) -> Self {
        Self {
            freq,
            frame_count: 0,
            x: OneEuroFilter::new(min_cutoff, beta),
            y: OneEuroFilter::new(min_cutoff, beta),
        }
    }

    /// Filter a point expressed in a `width` x `height` space. The filter
    /// itself runs on unit coordinates so its tuning is resolution independent.
    pub fn add_get_filtered(&mut self, point: Vec2, width: f64, height: f64) -> Vec2 {
        let t = self.frame_count as f64 / self.freq;
        let fx = self.x.filter(t, point.x / width);
        let fy = self.y.filter(t, point.y / height);
        self.frame_count += 1;
        Vec2::new(fx * width, fy * height)
    }

    pub fn reset(&mut self) {
        self.frame_count = 0;
        self.x.reset();
        self.y.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_passes_through() {
        let mut f = OneEuroFilter::new(1.0, 0.0);
        assert_eq!(f.filter(0.0, 0.42), 0.42);
    }

    #[test]
    fn output_lags_behind_a_step() {
        let mut f = OneEuroFilter::new(1.0, 0.0);
        f.filter(0.0, 0.0);
        let y = f.filter(0.01, 1.0);
        assert!(y > 0.0 && y < 1.0);
    }

    #[test]
    fn non_increasing_time_repeats_previous_output() {
        let mut f = OneEuroFilter::new(1.0, 0.0);
        f.filter(1.0, 5.0);
        assert_eq!(f.filter(1.0, 9.0), 5.0);
    }

    #[test]
    fn coord_filter_converges_on_constant_input() {
        let mut f = CoordFilter::default();
        let target = Vec2::new(640.0, 360.0);
        let mut out = Vec2::ZERO;
        f.add_get_filtered(Vec2::ZERO, 1280.0, 720.0);
        for _ in 0..2000 {
            out = f.add_get_filtered(target, 1280.0, 720.0);
        }
        assert!(out.distance(target) < 1e-3);
    }
}

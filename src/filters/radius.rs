//! Dead-zone smoothing: the stable value only moves once a sample leaves
//! the configured radius around it, and then slides just far enough to
//! put the sample back on the rim.

use crate::geometry::Vec2;

#[derive(Debug, Clone)]
pub struct RadiusBuffer {
    radius: f64,
    value: Vec2,
    seeded: bool,
}

impl RadiusBuffer {
    /// Negative radii are treated as zero.
    pub fn new(radius: f64) -> Self {
        Self {
            radius: radius.max(0.0),
            value: Vec2::ZERO,
            seeded: false,
        }
    }

    /// Insert a sample and return the updated stable value.
    pub fn add_and_get(&mut self, sample: Vec2) -> Vec2 {
        if !self.seeded {
            self.value = sample;
            self.seeded = true;
            return self.value;
        }
        let delta = sample - self.value;
        if delta.length() > self.radius {
            self.value += delta - delta.normalized() * self.radius;
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: Vec2, b: Vec2) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    #[test]
    fn jitter_inside_radius_is_ignored() {
        let mut buf = RadiusBuffer::new(5.0);
        let start = buf.add_and_get(Vec2::new(100.0, 100.0));
        assert_eq!(start, Vec2::new(100.0, 100.0));
        for p in [(103.0, 100.0), (98.0, 97.0), (100.0, 104.9), (96.5, 103.5)] {
            assert_eq!(buf.add_and_get(p.into()), start);
        }
    }

    #[test]
    fn large_motion_slides_by_excess_distance() {
        let mut buf = RadiusBuffer::new(5.0);
        buf.add_and_get(Vec2::new(0.0, 0.0));
        let v = buf.add_and_get(Vec2::new(30.0, 40.0));
        // |delta| = 50, so the value moves 45 along (0.6, 0.8)
        assert!(approx_eq(v, Vec2::new(27.0, 36.0)));
        assert!((v.distance(Vec2::new(30.0, 40.0)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn negative_radius_follows_every_sample() {
        let mut buf = RadiusBuffer::new(-4.0);
        buf.add_and_get(Vec2::new(1.0, 0.0));
        assert_eq!(buf.add_and_get(Vec2::new(2.0, 0.0)), Vec2::new(2.0, 0.0));
    }

    #[test]
    fn first_sample_seeds_far_from_origin() {
        let mut buf = RadiusBuffer::new(10.0);
        assert_eq!(buf.add_and_get(Vec2::new(500.0, 500.0)), Vec2::new(500.0, 500.0));
        assert_eq!(buf.add_and_get(Vec2::new(505.0, 500.0)), Vec2::new(500.0, 500.0));
    }
}

//! Device-space to screen-space mapping.
//!
//! A calibration pairs four corners seen by the camera with four screen
//! corners. The warp is the projective transform through those pairs,
//! solved once when the rectangles are installed.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::contact::{ContactType, Frame};
use crate::error::TrackError;
use crate::geometry::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRectangle {
    pub top_left: Vec2,
    pub top_right: Vec2,
    pub bottom_left: Vec2,
    pub bottom_right: Vec2,
}

impl Default for CalibrationRectangle {
    fn default() -> Self {
        Self::from_size(Vec2::new(1.0, 1.0))
    }
}

impl CalibrationRectangle {
    pub fn new(top_left: Vec2, top_right: Vec2, bottom_left: Vec2, bottom_right: Vec2) -> Self {
        Self {
            top_left,
            top_right,
            bottom_left,
            bottom_right,
        }
    }

    /// Axis aligned rectangle from the origin to `size`.
    pub fn from_size(size: Vec2) -> Self {
        Self::new(
            Vec2::ZERO,
            Vec2::new(size.x, 0.0),
            Vec2::new(0.0, size.y),
            size,
        )
    }

    fn corners(&self) -> [Vec2; 4] {
        [self.top_left, self.top_right, self.bottom_left, self.bottom_right]
    }
}

/// Projective warp between two quadrilaterals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Warper {
    h: [f64; 8],
}

impl Default for Warper {
    fn default() -> Self {
        Self {
            h: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        }
    }
}

impl Warper {
    pub fn new(source: &CalibrationRectangle, destination: &CalibrationRectangle) -> Result<Self, TrackError> {
        let mut a = [[0.0f64; 9]; 8];
        for (k, (s, d)) in source
            .corners()
            .iter()
            .zip(destination.corners().iter())
            .enumerate()
        {
            a[2 * k] = [s.x, s.y, 1.0, 0.0, 0.0, 0.0, -d.x * s.x, -d.x * s.y, d.x];
            a[2 * k + 1] = [0.0, 0.0, 0.0, s.x, s.y, 1.0, -d.y * s.x, -d.y * s.y, d.y];
        }
        let h = solve(a).ok_or(TrackError::DegenerateCalibration)?;
        debug!("warp coefficients {h:?}");
        Ok(Self { h })
    }

    pub fn transform(&self, p: Vec2) -> Vec2 {
        let h = &self.h;
        let w = h[6] * p.x + h[7] * p.y + 1.0;
        Vec2::new(
            (h[0] * p.x + h[1] * p.y + h[2]) / w,
            (h[3] * p.x + h[4] * p.y + h[5]) / w,
        )
    }
}

/// Gauss-Jordan elimination with partial pivoting on an 8x8 augmented system.
fn solve(mut a: [[f64; 9]; 8]) -> Option<[f64; 8]> {
    const EPS: f64 = 1e-12;
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < EPS {
            return None;
        }
        a.swap(col, pivot);
        let p = a[col][col];
        for v in a[col].iter_mut() {
            *v /= p;
        }
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }
    let mut h = [0.0; 8];
    for (i, v) in h.iter_mut().enumerate() {
        *v = a[i][8];
    }
    Some(h)
}

/// Narrow surface a calibration front end talks to. Beginning a calibration
/// suspends warping so raw device points flow out; installing data resumes it.
pub trait Calibrate {
    fn begin_calibration(&self) -> Result<(), TrackError>;
    fn set_calibration_data(
        &self,
        source: CalibrationRectangle,
        destination: CalibrationRectangle,
        screen: Vec2,
    ) -> Result<(), TrackError>;
}

/// Collects one touch per corner, in the order top-left, top-right,
/// bottom-left, bottom-right, from frames produced while calibrating.
#[derive(Debug, Default, Clone)]
pub struct CalibrationSession {
    points: Vec<Vec2>,
}

impl CalibrationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> usize {
        self.points.len()
    }

    /// Feed a frame; returns the finished source rectangle once the fourth
    /// corner has been touched.
    pub fn record(&mut self, frame: &Frame) -> Option<CalibrationRectangle> {
        if self.points.len() >= 4 {
            return None;
        }
        let start = frame.contacts.iter().find(|c| c.kind == ContactType::Start)?;
        self.points.push(start.position);
        debug!("calibration corner {} at {:?}", self.points.len(), start.position);
        match self.points.as_slice() {
            [tl, tr, bl, br] => Some(CalibrationRectangle::new(*tl, *tr, *bl, *br)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Contact;

    fn close(a: Vec2, b: Vec2) -> bool {
        a.distance(b) < 1e-6
    }

    #[test]
    fn corners_map_onto_corners() {
        let src = CalibrationRectangle::new(
            Vec2::new(100.0, 80.0),
            Vec2::new(900.0, 120.0),
            Vec2::new(140.0, 700.0),
            Vec2::new(880.0, 660.0),
        );
        let dst = CalibrationRectangle::from_size(Vec2::new(1920.0, 1080.0));
        let w = Warper::new(&src, &dst).unwrap();
        for (s, d) in src.corners().iter().zip(dst.corners().iter()) {
            assert!(close(w.transform(*s), *d));
        }
    }

    #[test]
    fn scaling_warp_is_linear() {
        let src = CalibrationRectangle::default();
        let dst = CalibrationRectangle::from_size(Vec2::new(200.0, 100.0));
        let w = Warper::new(&src, &dst).unwrap();
        assert!(close(w.transform(Vec2::new(0.5, 0.25)), Vec2::new(100.0, 25.0)));
    }

    #[test]
    fn collapsed_corners_are_rejected() {
        let p = Vec2::new(5.0, 5.0);
        let src = CalibrationRectangle::new(p, p, p, p);
        assert_eq!(
            Warper::new(&src, &CalibrationRectangle::default()).unwrap_err(),
            TrackError::DegenerateCalibration
        );
    }

    #[test]
    fn default_warper_is_identity() {
        assert_eq!(Warper::default().transform(Vec2::new(3.0, 4.0)), Vec2::new(3.0, 4.0));
    }

    #[test]
    fn session_finishes_on_fourth_start() {
        let screen = Vec2::new(1024.0, 768.0);
        let frame = |kind, x, y| Frame {
            timestamp_ms: 0,
            contacts: vec![Contact::new(1, kind, Vec2::new(x, y), screen, Vec2::ZERO, 0)],
        };
        let mut s = CalibrationSession::new();
        assert!(s.record(&frame(ContactType::Start, 10.0, 10.0)).is_none());
        assert!(s.record(&frame(ContactType::Move, 50.0, 50.0)).is_none());
        assert!(s.record(&frame(ContactType::Start, 900.0, 12.0)).is_none());
        assert!(s.record(&frame(ContactType::Start, 14.0, 700.0)).is_none());
        let rect = s.record(&frame(ContactType::Start, 910.0, 690.0)).unwrap();
        assert_eq!(rect.top_right, Vec2::new(900.0, 12.0));
        assert_eq!(rect.bottom_right, Vec2::new(910.0, 690.0));
        assert_eq!(s.captured(), 4);
        assert!(s.record(&frame(ContactType::Start, 1.0, 1.0)).is_none());
    }
}

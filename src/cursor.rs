//! Pointer pathway: turns the sensor-bar blobs seen by the remote's camera
//! into a screen cursor position.

use serde::{Deserialize, Serialize};

use crate::filters::CoordFilter;
use crate::geometry::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorBarPosition {
    Top,
    #[default]
    Center,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorConfig {
    pub screen: Vec2,
    pub margins_left_right: f64,
    pub margins_top_bottom: f64,
    pub sensor_bar: SensorBarPosition,
    pub sensor_bar_compensation: f64,
    pub filter_freq: f64,
    pub filter_min_cutoff: f64,
    pub filter_beta: f64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            screen: Vec2::new(1920.0, 1080.0),
            margins_left_right: 0.2,
            margins_top_bottom: 0.2,
            sensor_bar: SensorBarPosition::Center,
            sensor_bar_compensation: 0.3,
            filter_freq: 100.0,
            filter_min_cutoff: 1.0,
            filter_beta: 0.005,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CursorPos {
    /// Screen pixels, clamped to the screen.
    pub position: Vec2,
    /// Filtered position in camera space, 0..1 on both axes.
    pub relative: Vec2,
    /// The sensor bar was not visible; position repeats the last good one.
    pub out_of_reach: bool,
}

#[derive(Debug, Clone)]
pub struct CursorCalculator {
    config: CursorConfig,
    filter: CoordFilter,
    last: CursorPos,
}

impl CursorCalculator {
    pub fn new(config: CursorConfig) -> Self {
        Self {
            filter: CoordFilter::new(config.filter_freq, config.filter_min_cutoff, config.filter_beta),
            config,
            last: CursorPos::default(),
        }
    }

    pub fn set_screen(&mut self, screen: Vec2) {
        self.config.screen = screen;
    }

    /// `blobs` are camera-space points normalized to 0..1. The first two
    /// are taken as the two ends of the sensor bar.
    pub fn calculate(&mut self, blobs: &[Vec2]) -> CursorPos {
        let (a, b) = match blobs {
            [a, b, ..] => (*a, *b),
            _ => {
                return CursorPos {
                    out_of_reach: true,
                    ..self.last
                };
            }
        };

        let mut rel = a.midpoint(b);
        // the camera sees the bar mirrored horizontally
        rel.x = 1.0 - rel.x;
        let rel = self.filter.add_get_filtered(rel, 1.0, 1.0);

        let Vec2 { x: w, y: h } = self.config.screen;
        let min_x = -(w * self.config.margins_left_right);
        let span_x = w - 2.0 * min_x;
        let min_y = -(h * self.config.margins_top_bottom);
        let span_y = h - 2.0 * min_y;
        let offset_y = match self.config.sensor_bar {
            SensorBarPosition::Top => -(h * self.config.sensor_bar_compensation),
            SensorBarPosition::Center => 0.0,
            SensorBarPosition::Bottom => h * self.config.sensor_bar_compensation,
        };

        let x = (span_x * rel.x + min_x).round();
        let y = (span_y * rel.y + min_y).round() + offset_y.trunc();
        let pos = CursorPos {
            position: Vec2::new(x.clamp(0.0, (w - 1.0).max(0.0)), y.clamp(0.0, (h - 1.0).max(0.0))),
            relative: rel,
            out_of_reach: false,
        };
        self.last = pos;
        pos
    }

    pub fn reset(&mut self) {
        self.filter.reset();
        self.last = CursorPos::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(bar: SensorBarPosition) -> CursorCalculator {
        CursorCalculator::new(CursorConfig {
            screen: Vec2::new(1000.0, 500.0),
            sensor_bar: bar,
            ..CursorConfig::default()
        })
    }

    #[test]
    fn centered_bar_points_at_screen_center() {
        let mut c = calc(SensorBarPosition::Center);
        let p = c.calculate(&[Vec2::new(0.4, 0.5), Vec2::new(0.6, 0.5)]);
        assert!(!p.out_of_reach);
        assert_eq!(p.position, Vec2::new(500.0, 250.0));
    }

    #[test]
    fn camera_x_is_mirrored() {
        let mut c = calc(SensorBarPosition::Center);
        // bar seen on the left of the camera means pointing right
        let p = c.calculate(&[Vec2::new(0.2, 0.5), Vec2::new(0.3, 0.5)]);
        assert!(p.position.x > 500.0);
    }

    #[test]
    fn sensor_bar_offset_shifts_vertically() {
        let mut top = calc(SensorBarPosition::Top);
        let mut bottom = calc(SensorBarPosition::Bottom);
        let blobs = [Vec2::new(0.4, 0.5), Vec2::new(0.6, 0.5)];
        assert_eq!(top.calculate(&blobs).position.y, 100.0);
        assert_eq!(bottom.calculate(&blobs).position.y, 400.0);
    }

    #[test]
    fn result_is_clamped_to_screen() {
        let mut c = calc(SensorBarPosition::Center);
        let p = c.calculate(&[Vec2::new(0.0, 1.0), Vec2::new(0.0, 1.0)]);
        assert_eq!(p.position, Vec2::new(999.0, 499.0));
    }

    #[test]
    fn lost_bar_repeats_last_position() {
        let mut c = calc(SensorBarPosition::Center);
        let good = c.calculate(&[Vec2::new(0.4, 0.5), Vec2::new(0.6, 0.5)]);
        let lost = c.calculate(&[Vec2::new(0.1, 0.1)]);
        assert!(lost.out_of_reach);
        assert_eq!(lost.position, good.position);
    }
}

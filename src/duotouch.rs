//! Two synthetic touch contacts driven by one pointing remote.
//!
//! The master contact follows the cursor. The slave contact, once engaged
//! while the master is down, mirrors the master through the midpoint taken
//! at engage time, which turns a single pointer into a two-finger pinch or
//! rotate. Each remote owns a window of four consecutive contact IDs; the
//! pair steps by two inside that window after every completed touch so the
//! OS never mistakes a new press for a continuation of a stale one.

use crate::contact::{Contact, ContactType};
use crate::error::TrackError;
use crate::filters::RadiusBuffer;
use crate::geometry::Vec2;

/// Contact IDs reserved per remote.
pub const ID_WINDOW: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuoTouchConfig {
    /// Master stays pinned to its first touch point until it moves this far
    /// on either axis.
    pub tap_threshold: f64,
    /// A touch starting within this distance of an edge is an edge swipe.
    pub edge_helper_margins: f64,
    /// Edge swipes get straightened until they are this far from the edge.
    pub edge_helper_release: f64,
    pub position_radius: f64,
    pub contact_size: f64,
}

impl Default for DuoTouchConfig {
    fn default() -> Self {
        Self {
            tap_threshold: 30.0,
            edge_helper_margins: 30.0,
            edge_helper_release: 60.0,
            position_radius: 3.0,
            contact_size: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuoTouch {
    config: DuoTouchConfig,
    screen: Vec2,
    smoothing: RadiusBuffer,

    start_id: u64,
    master_id: u64,
    slave_id: u64,
    master_priority: i32,
    slave_priority: i32,
    step_ids: bool,

    master_position: Vec2,
    slave_position: Vec2,
    midpoint: Vec2,
    using_midpoint: bool,
    last_master: Option<Contact>,
    last_slave: Option<Contact>,

    master_released: bool,
    slave_released: bool,
    master_hovering: bool,
    slave_hovering: bool,
    slave_ended: bool,
    hover_disabled: bool,

    first_master_contact: Option<Vec2>,
    master_hold_position: bool,
}

impl DuoTouch {
    /// `start_id` opens a window of four IDs, which must also fit the
    /// contact priority range.
    pub fn new(config: DuoTouchConfig, screen: Vec2, start_id: u64) -> Result<Self, TrackError> {
        let out_of_range = || TrackError::IdOutOfRange(start_id);
        let last_id = start_id.checked_add(ID_WINDOW - 1).ok_or_else(out_of_range)?;
        i32::try_from(last_id).map_err(|_| out_of_range())?;
        let master_priority = i32::try_from(start_id).map_err(|_| out_of_range())?;
        Ok(Self {
            config,
            screen,
            smoothing: RadiusBuffer::new(config.position_radius),
            start_id,
            master_id: start_id,
            slave_id: start_id + 1,
            master_priority,
            slave_priority: master_priority + 1,
            step_ids: false,
            master_position: Vec2::ZERO,
            slave_position: Vec2::ZERO,
            midpoint: Vec2::ZERO,
            using_midpoint: false,
            last_master: None,
            last_slave: None,
            master_released: true,
            slave_released: true,
            master_hovering: true,
            slave_hovering: true,
            slave_ended: true,
            hover_disabled: false,
            first_master_contact: None,
            master_hold_position: true,
        })
    }

    pub fn set_screen(&mut self, screen: Vec2) {
        self.screen = screen;
    }

    pub fn set_master_position(&mut self, position: Vec2) {
        self.master_position = position;
    }

    /// Ignored while the slave is down: it only moves with the master then.
    pub fn set_slave_position(&mut self, position: Vec2) {
        if self.slave_released {
            self.slave_position = position;
        }
    }

    pub fn set_contact_master(&mut self) {
        self.master_released = false;
    }

    pub fn set_contact_slave(&mut self) {
        self.slave_released = false;
    }

    pub fn release_contact_master(&mut self) {
        self.master_released = true;
    }

    pub fn release_contact_slave(&mut self) {
        self.slave_released = true;
    }

    pub fn disable_hover(&mut self) {
        self.hover_disabled = true;
    }

    pub fn enable_hover(&mut self) {
        self.hover_disabled = false;
    }

    /// Produce this tick's contacts, master first.
    pub fn get_frame(&mut self) -> Vec<Contact> {
        let mut frame = Vec::with_capacity(2);
        if let Some(c) = self.master_contact() {
            frame.push(c);
        }
        if let Some(c) = self.slave_contact() {
            frame.push(c);
        }
        frame
    }

    fn contact(&self, id: u64, kind: ContactType, position: Vec2, priority: i32) -> Contact {
        let size = Vec2::new(self.config.contact_size, self.config.contact_size);
        Contact::new(id, kind, position, self.screen, size, priority)
    }

    fn step(&mut self) {
        self.master_id = (self.master_id - self.start_id + 2) % ID_WINDOW + self.start_id;
        self.slave_id = (self.slave_id - self.start_id + 2) % ID_WINDOW + self.start_id;
        self.step_ids = false;
    }

    fn master_contact(&mut self) -> Option<Contact> {
        let kind = if !self.master_released {
            let kind = if self.master_hovering {
                self.master_hovering = false;
                ContactType::Start
            } else {
                ContactType::Move
            };
            match self.first_master_contact {
                None => self.first_master_contact = Some(self.master_position),
                Some(anchor) => {
                    self.apply_tap_hold(anchor);
                    self.apply_edge_helper(anchor);
                }
            }
            self.master_position = self.smoothing.add_and_get(self.master_position);
            kind
        } else {
            let kind = if !self.master_hovering {
                if let Some(last) = self.last_master {
                    self.master_position = last.position;
                }
                self.master_hovering = true;
                if self.hover_disabled {
                    ContactType::End
                } else {
                    ContactType::EndToHover
                }
            } else {
                self.master_position = self.smoothing.add_and_get(self.master_position);
                ContactType::Hover
            };
            self.first_master_contact = None;
            self.master_hold_position = true;
            kind
        };

        if kind == ContactType::Hover && self.hover_disabled {
            return None;
        }

        let contact = if self.step_ids && kind == ContactType::EndToHover {
            // slave lifted first: end the master outright so the next press
            // starts a fresh primary contact
            let c = self.contact(self.master_id, ContactType::End, self.master_position, self.master_priority);
            self.step();
            c
        } else {
            self.contact(self.master_id, kind, self.master_position, self.master_priority)
        };
        self.last_master = Some(contact);
        Some(contact)
    }

    /// Micro-tremor around the first touch point is snapped back onto it
    /// until the master clearly moves away; after that it is never re-armed
    /// for this touch.
    fn apply_tap_hold(&mut self, anchor: Vec2) {
        if !self.master_hold_position {
            return;
        }
        let th = self.config.tap_threshold;
        if (anchor.x - self.master_position.x).abs() < th
            && (anchor.y - self.master_position.y).abs() < th
        {
            self.master_position = anchor;
        } else {
            self.master_hold_position = false;
        }
    }

    /// Keep swipes that start at an edge straight by pulling the orthogonal
    /// axis two thirds of the way back to the anchor.
    fn apply_edge_helper(&mut self, anchor: Vec2) {
        let margins = self.config.edge_helper_margins;
        let release = self.config.edge_helper_release;
        let (w, h) = (self.screen.x, self.screen.y);
        let pos = &mut self.master_position;

        if anchor.x < margins && pos.x < release {
            pos.y = (anchor.y * 2.0 + pos.y) / 3.0;
        }
        if anchor.x > w - margins && pos.x > w - release {
            pos.y = (anchor.y * 2.0 + pos.y) / 3.0;
        }
        if anchor.y < margins && pos.y < release {
            pos.x = (anchor.x * 2.0 + pos.x) / 3.0;
        }
        if anchor.y > h - margins && pos.y > h - release {
            pos.x = (anchor.x * 2.0 + pos.x) / 3.0;
        }
    }

    fn slave_contact(&mut self) -> Option<Contact> {
        let kind = if !self.slave_released {
            let kind = if self.slave_hovering {
                self.slave_hovering = false;
                ContactType::Start
            } else {
                ContactType::Move
            };
            if !self.master_released {
                if !self.using_midpoint {
                    self.midpoint = self.master_position.midpoint(self.slave_position);
                    self.using_midpoint = true;
                }
                let mirrored = self.master_position.reflect_through(self.midpoint);
                self.slave_position = self.clamp_to_screen(mirrored);
            } else {
                self.using_midpoint = false;
            }
            self.slave_ended = false;
            self.step_ids = false;
            kind
        } else {
            if self.master_released {
                self.using_midpoint = false;
            }
            if !self.slave_hovering {
                if let Some(last) = self.last_slave {
                    self.slave_position = last.position;
                }
                self.slave_hovering = true;
                ContactType::EndToHover
            } else {
                ContactType::EndFromHover
            }
        };

        if self.slave_ended {
            return None;
        }

        let contact = self.contact(self.slave_id, kind, self.slave_position, self.slave_priority);
        self.last_slave = Some(contact);
        if kind == ContactType::EndFromHover {
            self.slave_ended = true;
            if !self.master_released {
                // defer until the master lifts
                self.step_ids = true;
            } else {
                self.step();
            }
        }
        Some(contact)
    }

    fn clamp_to_screen(&self, p: Vec2) -> Vec2 {
        let max_x = (self.screen.x - 1.0).max(0.0);
        let max_y = (self.screen.y - 1.0).max(0.0);
        Vec2::new(p.x.clamp(0.0, max_x), p.y.clamp(0.0, max_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: Vec2 = Vec2::new(1920.0, 1080.0);

    fn exact() -> DuoTouch {
        DuoTouch::new(
            DuoTouchConfig {
                position_radius: 0.0,
                ..DuoTouchConfig::default()
            },
            SCREEN,
            1,
        )
        .unwrap()
    }

    fn kinds(frame: &[Contact]) -> Vec<(u64, ContactType)> {
        frame.iter().map(|c| (c.id, c.kind)).collect()
    }

    #[test]
    fn hover_then_touch_lifecycle() {
        let mut d = exact();
        d.set_master_position(Vec2::new(500.0, 500.0));
        assert_eq!(kinds(&d.get_frame()), vec![(1, ContactType::Hover)]);

        d.set_contact_master();
        assert_eq!(kinds(&d.get_frame()), vec![(1, ContactType::Start)]);
        d.set_master_position(Vec2::new(600.0, 500.0));
        let f = d.get_frame();
        assert_eq!(kinds(&f), vec![(1, ContactType::Move)]);
        assert_eq!(f[0].position, Vec2::new(600.0, 500.0));

        d.release_contact_master();
        d.set_master_position(Vec2::new(900.0, 900.0));
        let f = d.get_frame();
        assert_eq!(kinds(&f), vec![(1, ContactType::EndToHover)]);
        // lift happens where the last touch was committed
        assert_eq!(f[0].position, Vec2::new(600.0, 500.0));
        assert_eq!(kinds(&d.get_frame()), vec![(1, ContactType::Hover)]);
    }

    #[test]
    fn disabled_hover_ends_plainly_and_emits_nothing_while_up() {
        let mut d = exact();
        d.disable_hover();
        d.set_master_position(Vec2::new(500.0, 500.0));
        assert!(d.get_frame().is_empty());
        d.set_contact_master();
        assert_eq!(kinds(&d.get_frame()), vec![(1, ContactType::Start)]);
        d.release_contact_master();
        assert_eq!(kinds(&d.get_frame()), vec![(1, ContactType::End)]);
        assert!(d.get_frame().is_empty());
    }

    #[test]
    fn tap_hold_pins_small_motion_to_anchor() {
        let mut d = exact();
        d.set_master_position(Vec2::new(500.0, 500.0));
        d.set_contact_master();
        d.get_frame();
        d.set_master_position(Vec2::new(512.0, 490.0));
        assert_eq!(d.get_frame()[0].position, Vec2::new(500.0, 500.0));

        // leaving the threshold releases the hold for the rest of the touch
        d.set_master_position(Vec2::new(560.0, 500.0));
        assert_eq!(d.get_frame()[0].position, Vec2::new(560.0, 500.0));
        d.set_master_position(Vec2::new(505.0, 500.0));
        assert_eq!(d.get_frame()[0].position, Vec2::new(505.0, 500.0));
    }

    #[test]
    fn edge_swipe_is_straightened() {
        let mut d = exact();
        d.set_master_position(Vec2::new(10.0, 300.0));
        d.set_contact_master();
        d.get_frame();
        d.set_master_position(Vec2::new(50.0, 360.0));
        let p = d.get_frame()[0].position;
        assert_eq!(p, Vec2::new(50.0, 320.0));

        // past the release distance the swipe is free
        d.set_master_position(Vec2::new(200.0, 400.0));
        assert_eq!(d.get_frame()[0].position, Vec2::new(200.0, 400.0));
    }

    #[test]
    fn slave_mirrors_master_through_engage_midpoint() {
        let mut d = exact();
        d.set_master_position(Vec2::new(100.0, 100.0));
        d.set_contact_master();
        d.get_frame();

        d.set_slave_position(Vec2::new(300.0, 300.0));
        d.set_contact_slave();
        let f = d.get_frame();
        assert_eq!(
            kinds(&f),
            vec![(1, ContactType::Move), (2, ContactType::Start)]
        );
        assert_eq!(f[1].position, Vec2::new(300.0, 300.0));

        // midpoint (200,200) stays fixed while the master moves
        d.set_master_position(Vec2::new(50.0, 100.0));
        d.set_slave_position(Vec2::new(0.0, 0.0));
        let f = d.get_frame();
        assert_eq!(f[1].kind, ContactType::Move);
        assert_eq!(f[1].position, Vec2::new(350.0, 300.0));
    }

    #[test]
    fn mirrored_slave_is_clamped_to_screen() {
        let mut d = exact();
        d.set_master_position(Vec2::new(1000.0, 500.0));
        d.set_contact_master();
        d.get_frame();
        d.set_slave_position(Vec2::new(1800.0, 500.0));
        d.set_contact_slave();
        d.get_frame();
        d.set_master_position(Vec2::new(700.0, 500.0));
        let f = d.get_frame();
        // unclamped reflection would be x = 2100
        assert_eq!(f[1].position, Vec2::new(1919.0, 500.0));
    }

    #[test]
    fn negative_reflection_is_pulled_to_zero() {
        let mut d = exact();
        d.set_master_position(Vec2::new(200.0, 500.0));
        d.set_contact_master();
        d.get_frame();
        d.set_slave_position(Vec2::new(100.0, 500.0));
        d.set_contact_slave();
        d.get_frame();
        d.set_master_position(Vec2::new(400.0, 500.0));
        let f = d.get_frame();
        // unclamped reflection would be x = -100
        assert_eq!(f[1].position, Vec2::new(0.0, 500.0));
    }

    #[test]
    fn ids_step_after_both_contacts_finish() {
        let mut d = exact();
        d.set_master_position(Vec2::new(400.0, 400.0));
        d.set_contact_master();
        d.set_slave_position(Vec2::new(400.0, 400.0));
        d.set_contact_slave();
        d.get_frame();

        d.release_contact_master();
        d.release_contact_slave();
        assert_eq!(
            kinds(&d.get_frame()),
            vec![(1, ContactType::EndToHover), (2, ContactType::EndToHover)]
        );
        assert_eq!(
            kinds(&d.get_frame()),
            vec![(1, ContactType::Hover), (2, ContactType::EndFromHover)]
        );
        assert_eq!(kinds(&d.get_frame()), vec![(3, ContactType::Hover)]);
    }

    #[test]
    fn slave_lifting_first_defers_the_step() {
        let mut d = exact();
        d.set_master_position(Vec2::new(400.0, 400.0));
        d.set_contact_master();
        d.set_contact_slave();
        d.get_frame();

        d.release_contact_slave();
        assert_eq!(
            kinds(&d.get_frame()),
            vec![(1, ContactType::Move), (2, ContactType::EndToHover)]
        );
        assert_eq!(
            kinds(&d.get_frame()),
            vec![(1, ContactType::Move), (2, ContactType::EndFromHover)]
        );

        d.release_contact_master();
        assert_eq!(kinds(&d.get_frame()), vec![(1, ContactType::End)]);

        d.set_contact_master();
        d.set_contact_slave();
        assert_eq!(
            kinds(&d.get_frame()),
            vec![(3, ContactType::Start), (4, ContactType::Start)]
        );
    }

    #[test]
    fn id_window_wraps_within_four() {
        let mut d = DuoTouch::new(DuoTouchConfig::default(), SCREEN, 5).unwrap();
        for _ in 0..2 {
            d.set_contact_master();
            d.set_contact_slave();
            d.get_frame();
            d.release_contact_master();
            d.release_contact_slave();
            d.get_frame();
            d.get_frame();
        }
        assert_eq!(kinds(&d.get_frame()), vec![(5, ContactType::Hover)]);
    }

    #[test]
    fn id_window_must_fit_priorities() {
        let top = i32::MAX as u64 - 3;
        assert!(DuoTouch::new(DuoTouchConfig::default(), SCREEN, top).is_ok());
        assert_eq!(
            DuoTouch::new(DuoTouchConfig::default(), SCREEN, top + 1).unwrap_err(),
            TrackError::IdOutOfRange(top + 1)
        );
        assert!(DuoTouch::new(DuoTouchConfig::default(), SCREEN, u64::MAX).is_err());
    }
}

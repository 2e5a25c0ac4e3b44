//! Drives a [`DuoTouch`] from a cursor and two touch buttons.

use crate::contact::Contact;
use crate::cursor::CursorPos;
use crate::duotouch::{DuoTouch, DuoTouchConfig, ID_WINDOW};
use crate::error::TrackError;
use crate::geometry::Vec2;

/// Upper bound for `touch.remote_index`.
pub const MAX_REMOTE_INDEX: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchButton {
    Master,
    Slave,
}

#[derive(Debug, Clone)]
pub struct TouchHandler {
    duo: DuoTouch,
    master_down: bool,
    slave_down: bool,
}

impl TouchHandler {
    /// `remote_index` starts at 1. Each remote gets its own window of four
    /// contact IDs so several remotes never collide.
    pub fn new(config: DuoTouchConfig, screen: Vec2, remote_index: u64, hover: bool) -> Result<Self, TrackError> {
        if !(1..=MAX_REMOTE_INDEX).contains(&remote_index) {
            return Err(TrackError::InvalidRemoteIndex(remote_index));
        }
        let start_id = (remote_index - 1) * ID_WINDOW + 1;
        let mut duo = DuoTouch::new(config, screen, start_id)?;
        if hover {
            duo.enable_hover();
        } else {
            duo.disable_hover();
        }
        Ok(Self {
            duo,
            master_down: false,
            slave_down: false,
        })
    }

    pub fn set_screen(&mut self, screen: Vec2) {
        self.duo.set_screen(screen);
    }

    pub fn set_button(&mut self, button: TouchButton, down: bool) {
        match button {
            TouchButton::Master => self.master_down = down,
            TouchButton::Slave => self.slave_down = down,
        }
    }

    /// Feed one cursor sample. Nothing is produced while the sensor bar is
    /// out of view.
    pub fn set_position(&mut self, cursor: &CursorPos) -> Option<Vec<Contact>> {
        if cursor.out_of_reach {
            return None;
        }
        if self.master_down {
            self.duo.set_contact_master();
        } else {
            self.duo.release_contact_master();
        }
        self.duo.set_master_position(cursor.position);
        if self.slave_down {
            self.duo.set_slave_position(cursor.position);
            self.duo.set_contact_slave();
        } else {
            self.duo.release_contact_slave();
        }
        Some(self.duo.get_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactType;

    fn at(x: f64, y: f64) -> CursorPos {
        CursorPos {
            position: Vec2::new(x, y),
            relative: Vec2::ZERO,
            out_of_reach: false,
        }
    }

    #[test]
    fn second_remote_uses_its_own_id_window() {
        let mut h = TouchHandler::new(DuoTouchConfig::default(), Vec2::new(1920.0, 1080.0), 2, true).unwrap();
        h.set_button(TouchButton::Master, true);
        let f = h.set_position(&at(400.0, 400.0)).unwrap();
        assert_eq!(f[0].id, 5);
        assert_eq!(f[0].kind, ContactType::Start);
    }

    #[test]
    fn out_of_reach_yields_no_frame() {
        let mut h = TouchHandler::new(DuoTouchConfig::default(), Vec2::new(1920.0, 1080.0), 1, true).unwrap();
        let mut c = at(1.0, 1.0);
        c.out_of_reach = true;
        assert!(h.set_position(&c).is_none());
    }

    #[test]
    fn pressing_slave_while_master_down_adds_second_contact() {
        let mut h = TouchHandler::new(DuoTouchConfig::default(), Vec2::new(1920.0, 1080.0), 1, false).unwrap();
        h.set_button(TouchButton::Master, true);
        h.set_position(&at(800.0, 500.0));
        h.set_button(TouchButton::Slave, true);
        let f = h.set_position(&at(800.0, 500.0)).unwrap();
        let ids: Vec<u64> = f.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(f[1].kind, ContactType::Start);
    }

    #[test]
    fn remote_index_is_bounded() {
        let screen = Vec2::new(1920.0, 1080.0);
        for bad in [0, MAX_REMOTE_INDEX + 1, u64::MAX] {
            assert_eq!(
                TouchHandler::new(DuoTouchConfig::default(), screen, bad, true).unwrap_err(),
                TrackError::InvalidRemoteIndex(bad)
            );
        }
        let mut h = TouchHandler::new(DuoTouchConfig::default(), screen, MAX_REMOTE_INDEX, true).unwrap();
        h.set_button(TouchButton::Master, true);
        let f = h.set_position(&at(10.0, 10.0)).unwrap();
        assert_eq!(f[0].id, (MAX_REMOTE_INDEX - 1) * ID_WINDOW + 1);
    }
}

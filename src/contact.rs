//! Output records handed to sinks, one `Frame` per hardware tick.

use serde::Serialize;

use crate::classifier::{TrackerEvent, TrackerEventKind};
use crate::geometry::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    Start,
    Move,
    End,
    Hover,
    EndToHover,
    EndFromHover,
}

impl From<TrackerEventKind> for ContactType {
    fn from(kind: TrackerEventKind) -> Self {
        match kind {
            TrackerEventKind::Start => ContactType::Start,
            TrackerEventKind::Update => ContactType::Move,
            TrackerEventKind::End => ContactType::End,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Contact {
    pub id: u64,
    pub kind: ContactType,
    pub position: Vec2,
    /// Position divided by the screen size, clamped to [0,1].
    pub normalized: Vec2,
    pub size: Vec2,
    pub priority: i32,
}

impl Contact {
    pub fn new(id: u64, kind: ContactType, position: Vec2, screen: Vec2, size: Vec2, priority: i32) -> Self {
        Self {
            id,
            kind,
            position,
            normalized: normalize(position, screen),
            size,
            priority,
        }
    }

    pub fn from_tracker_event(ev: &TrackerEvent, screen: Vec2, size: Vec2) -> Self {
        Self::new(ev.id, ev.kind.into(), ev.position, screen, size, 0)
    }
}

fn normalize(p: Vec2, screen: Vec2) -> Vec2 {
    let axis = |v: f64, extent: f64| {
        if extent > 0.0 {
            (v / extent).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };
    Vec2::new(axis(p.x, screen.x), axis(p.y, screen.y))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    pub timestamp_ms: u128,
    pub contacts: Vec<Contact>,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_position_is_screen_relative_and_clamped() {
        let screen = Vec2::new(1000.0, 500.0);
        let c = Contact::new(1, ContactType::Move, Vec2::new(250.0, 600.0), screen, Vec2::ZERO, 0);
        assert_eq!(c.normalized, Vec2::new(0.25, 1.0));
    }

    #[test]
    fn tracker_events_map_onto_contact_types() {
        let ev = TrackerEvent {
            kind: TrackerEventKind::Update,
            id: 9,
            position: Vec2::new(10.0, 10.0),
            start_position: Vec2::ZERO,
        };
        let c = Contact::from_tracker_event(&ev, Vec2::new(100.0, 100.0), Vec2::new(4.0, 4.0));
        assert_eq!(c.kind, ContactType::Move);
        assert_eq!(c.id, 9);
        assert_eq!(c.normalized, Vec2::new(0.1, 0.1));
    }
}

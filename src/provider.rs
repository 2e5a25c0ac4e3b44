//! Per-device frame loop.
//!
//! A provider owns everything that turns one remote's reports into contact
//! frames. All of it sits behind a single mutex: each report is handled
//! start to finish under the lock, and the finished frame is returned to the
//! caller for delivery after the lock is released.

use std::sync::{Mutex, MutexGuard};

use log::{debug, info, trace};
use serde::Serialize;

use crate::calibration::{Calibrate, CalibrationRectangle, Warper};
use crate::classifier::{ClassifierConfig, RawInput, SpatiotemporalClassifier, TrackerEventKind};
use crate::config::{Profile, TrackingMode};
use crate::contact::{Contact, Frame};
use crate::cursor::CursorCalculator;
use crate::error::TrackError;
use crate::geometry::Vec2;
use crate::input::{IR_HEIGHT, IR_WIDTH, IrState};
use crate::touch::{TouchButton, TouchHandler};
use crate::tracker::TrackerState;

/// One live tracker as shown by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackerSummary {
    pub id: u64,
    pub state: TrackerState,
    pub position: Vec2,
    pub forward: Vec2,
    pub predicted: Vec2,
    pub matches: u32,
    pub misses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub running: bool,
    pub calibrating: bool,
    pub smooth_size: usize,
    pub duplicate_distance: f64,
    pub live_trackers: usize,
    pub trackers: Vec<TrackerSummary>,
    pub frames: u64,
}

struct ProviderState {
    running: bool,
    calibrating: bool,
    mode: TrackingMode,
    screen: Vec2,
    contact_size: Vec2,
    scale_override: Option<f64>,
    classifier_config: ClassifierConfig,
    classifier: SpatiotemporalClassifier,
    warper: Warper,
    cursor: CursorCalculator,
    touch: TouchHandler,
    touch_initial: TouchHandler,
    frames: u64,
}

fn camera_space() -> Vec2 {
    Vec2::new(IR_WIDTH, IR_HEIGHT)
}

/// Uncalibrated mapping: the whole camera frame stretched over the screen.
fn camera_to_screen(screen: Vec2) -> Result<Warper, TrackError> {
    Warper::new(
        &CalibrationRectangle::from_size(camera_space()),
        &CalibrationRectangle::from_size(screen),
    )
}

impl ProviderState {
    fn from_profile(profile: &Profile) -> Result<Self, TrackError> {
        let screen = profile.screen_size();
        let warper = match profile.calibration_rectangles() {
            Some((source, destination)) => Warper::new(&source, &destination)?,
            None => camera_to_screen(screen)?,
        };
        let classifier_config = profile.classifier_config();
        let touch = TouchHandler::new(
            profile.duotouch_config(),
            screen,
            profile.touch.remote_index,
            profile.touch.hover,
        )?;
        Ok(Self {
            running: false,
            calibrating: false,
            mode: profile.tracking.mode,
            screen,
            contact_size: profile.contact_size(),
            scale_override: profile.tracking.prediction_scale,
            classifier: SpatiotemporalClassifier::new(classifier_config)?,
            classifier_config,
            warper,
            cursor: CursorCalculator::new(profile.cursor_config()),
            touch_initial: touch.clone(),
            touch,
            frames: 0,
        })
    }

    fn reset(&mut self) {
        self.classifier.reset();
        self.cursor.reset();
        self.touch = self.touch_initial.clone();
    }

    fn set_screen(&mut self, screen: Vec2) -> Result<(), TrackError> {
        self.screen = screen;
        self.cursor.set_screen(screen);
        self.touch.set_screen(screen);
        self.touch_initial.set_screen(screen);
        if self.scale_override.is_none() {
            self.classifier_config.prediction_scale = screen.x.max(screen.y);
            self.classifier.configure(self.classifier_config)?;
        }
        Ok(())
    }

    fn pen_contacts(&mut self, ir: &IrState) -> Vec<Contact> {
        let inputs: Vec<RawInput> = ir
            .points()
            .map(|p| {
                let q = if self.calibrating { p } else { self.warper.transform(p) };
                RawInput { point: q }
            })
            .collect();
        let space = if self.calibrating { camera_space() } else { self.screen };

        self.classifier
            .process_frame(&inputs)
            .iter()
            .map(|ev| {
                if ev.kind != TrackerEventKind::Update {
                    debug!("tracker {} {:?} at {:?}", ev.id, ev.kind, ev.position);
                }
                Contact::from_tracker_event(ev, space, self.contact_size)
            })
            .collect()
    }

    fn pointer_contacts(&mut self, ir: &IrState) -> Vec<Contact> {
        let cursor = self.cursor.calculate(&ir.normalized_points());
        self.touch.set_button(TouchButton::Master, ir.buttons.a);
        self.touch.set_button(TouchButton::Slave, ir.buttons.b);
        self.touch.set_position(&cursor).unwrap_or_default()
    }
}

pub struct PointerProvider {
    name: String,
    state: Mutex<ProviderState>,
}

impl PointerProvider {
    pub fn new(name: impl Into<String>, profile: &Profile) -> Result<Self, TrackError> {
        Ok(Self {
            name: name.into(),
            state: Mutex::new(ProviderState::from_profile(profile)?),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, ProviderState>, TrackError> {
        self.state
            .lock()
            .map_err(|_| TrackError::UnexpectedState(format!("{}: provider lock poisoned", self.name)))
    }

    /// Swap in new tuning. Live trackers and touch state are dropped; the
    /// running flag is kept.
    pub fn apply_profile(&self, profile: &Profile) -> Result<(), TrackError> {
        let fresh = ProviderState::from_profile(profile)?;
        let mut st = self.lock()?;
        let running = st.running;
        *st = fresh;
        st.running = running;
        info!("{}: profile applied ({:?} mode)", self.name, st.mode);
        Ok(())
    }

    pub fn start(&self) -> Result<(), TrackError> {
        let mut st = self.lock()?;
        st.reset();
        st.running = true;
        info!("{}: provider started", self.name);
        Ok(())
    }

    /// Stop accepting reports and clear all tracking state. A report being
    /// handled on another thread finishes first.
    pub fn stop(&self) -> Result<(), TrackError> {
        let mut st = self.lock()?;
        st.running = false;
        st.calibrating = false;
        st.reset();
        info!("{}: provider stopped", self.name);
        Ok(())
    }

    pub fn stats(&self) -> Result<ProviderStats, TrackError> {
        let st = self.lock()?;
        let trackers: Vec<TrackerSummary> = st
            .classifier
            .trackers()
            .iter()
            .map(|t| TrackerSummary {
                id: t.id(),
                state: t.state(),
                position: t.position(),
                forward: t.forward(),
                predicted: t.predicted_next_position(),
                matches: t.consecutive_matches(),
                misses: t.consecutive_misses(),
            })
            .collect();
        Ok(ProviderStats {
            running: st.running,
            calibrating: st.calibrating,
            smooth_size: st.classifier.default_smooth_size(),
            duplicate_distance: st.classifier.duplicate_distance(),
            live_trackers: trackers.len(),
            trackers,
            frames: st.frames,
        })
    }

    /// Process one hardware report. Zero blobs is a normal frame: every
    /// tracker registers a miss.
    pub fn handle_state(&self, ir: &IrState, timestamp_ms: u128) -> Result<Frame, TrackError> {
        let contacts = {
            let mut st = self.lock()?;
            if !st.running {
                return Err(TrackError::NotRunning);
            }
            st.frames += 1;
            match st.mode {
                TrackingMode::Pen => st.pen_contacts(ir),
                TrackingMode::Pointer => st.pointer_contacts(ir),
            }
        };
        trace!("{}: {} blobs -> {} contacts", self.name, ir.blobs.len(), contacts.len());
        Ok(Frame {
            timestamp_ms,
            contacts,
        })
    }
}

impl Calibrate for PointerProvider {
    fn begin_calibration(&self) -> Result<(), TrackError> {
        let mut st = self.lock()?;
        if !st.running {
            return Err(TrackError::NotRunning);
        }
        if st.mode != TrackingMode::Pen {
            return Err(TrackError::UnexpectedState(
                "calibration needs the pen tracking mode".to_string(),
            ));
        }
        st.calibrating = true;
        st.classifier.reset();
        info!("{}: calibration started, warping suspended", self.name);
        Ok(())
    }

    fn set_calibration_data(
        &self,
        source: CalibrationRectangle,
        destination: CalibrationRectangle,
        screen: Vec2,
    ) -> Result<(), TrackError> {
        let warper = Warper::new(&source, &destination)?;
        let mut st = self.lock()?;
        st.warper = warper;
        st.set_screen(screen)?;
        st.calibrating = false;
        st.classifier.reset();
        info!("{}: calibration installed for {}x{}", self.name, screen.x, screen.y);
        Ok(())
    }
}

//! Hardware boundary: per-tick IR state and the evdev devices that carry it.
//!
//! The kernel's hid-wiimote driver already decodes the remote's reports. It
//! exposes the IR camera as one evdev device with four HAT axis pairs
//! (1023 meaning "no blob in this slot") and the buttons as a sibling device
//! sharing the same physical path.

use std::io;

use anyhow::{Result, anyhow};
use evdev::{AbsoluteAxisCode, Device, EventType, KeyCode, SynchronizationCode};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::geometry::Vec2;

/// Camera resolution in device units.
pub const IR_WIDTH: f64 = 1024.0;
pub const IR_HEIGHT: f64 = 768.0;
pub const MAX_BLOBS: usize = 4;

const HAT_MISSING: i32 = 1023;

const KEY_UP: u16 = 103;
const KEY_LEFT: u16 = 105;
const KEY_RIGHT: u16 = 106;
const KEY_DOWN: u16 = 108;
const BTN_1: u16 = 0x101;
const BTN_2: u16 = 0x102;
const BTN_A: u16 = 0x130;
const BTN_B: u16 = 0x131;
const BTN_MODE: u16 = 0x13c;
const KEY_NEXT: u16 = 0x197;
const KEY_PREVIOUS: u16 = 0x19c;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Buttons {
    pub a: bool,
    pub b: bool,
    pub one: bool,
    pub two: bool,
    pub plus: bool,
    pub minus: bool,
    pub home: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl Buttons {
    fn set_code(&mut self, code: u16, down: bool) -> bool {
        let slot = match code {
            BTN_A => &mut self.a,
            BTN_B => &mut self.b,
            BTN_1 => &mut self.one,
            BTN_2 => &mut self.two,
            KEY_NEXT => &mut self.plus,
            KEY_PREVIOUS => &mut self.minus,
            BTN_MODE => &mut self.home,
            KEY_UP => &mut self.up,
            KEY_DOWN => &mut self.down,
            KEY_LEFT => &mut self.left,
            KEY_RIGHT => &mut self.right,
            _ => return false,
        };
        *slot = down;
        true
    }
}

/// One detected light source, in camera units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrBlob {
    pub x: f64,
    pub y: f64,
}

/// Everything the remote reported for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrState {
    pub buttons: Buttons,
    pub blobs: Vec<IrBlob>,
}

impl IrState {
    /// Blob positions in camera units, at most [`MAX_BLOBS`].
    pub fn points(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.blobs.iter().take(MAX_BLOBS).map(|b| Vec2::new(b.x, b.y))
    }

    /// Blob positions scaled to 0..1.
    pub fn normalized_points(&self) -> Vec<Vec2> {
        self.points()
            .map(|p| Vec2::new(p.x / IR_WIDTH, p.y / IR_HEIGHT))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub ir_path: String,
    pub buttons_path: Option<String>,
    pub phys: Option<String>,
}

fn event_nodes() -> Vec<std::path::PathBuf> {
    let mut out = vec![];
    if let Ok(rd) = std::fs::read_dir("/dev/input") {
        for e in rd.flatten() {
            let p = e.path();
            if p.file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.starts_with("event"))
                .unwrap_or(false)
            {
                out.push(p);
            }
        }
    }
    out.sort();
    out
}

fn is_ir_camera(dev: &Device) -> bool {
    let has_abs = dev.supported_events().contains(EventType::ABSOLUTE);
    let axes = dev.supported_absolute_axes();
    has_abs
        && axes.is_some_and(|a| {
            a.contains(AbsoluteAxisCode::ABS_HAT0X)
                && a.contains(AbsoluteAxisCode::ABS_HAT0Y)
                && a.contains(AbsoluteAxisCode::ABS_HAT3Y)
        })
}

fn is_button_pad(dev: &Device) -> bool {
    dev.supported_keys().is_some_and(|k| {
        k.contains(KeyCode::BTN_SOUTH) && k.contains(KeyCode::BTN_EAST) && k.contains(KeyCode::BTN_MODE)
    })
}

/// Find IR camera devices and pair each with its button device.
pub fn discover_remotes() -> Vec<DeviceInfo> {
    let mut cameras = vec![];
    let mut pads = vec![];
    for p in event_nodes() {
        let Ok(dev) = Device::open(&p) else { continue };
        let phys = dev.physical_path().map(str::to_string);
        let name = dev.name().unwrap_or("unknown").to_string();
        if is_ir_camera(&dev) {
            cameras.push((p.display().to_string(), name, phys));
        } else if is_button_pad(&dev) {
            pads.push((p.display().to_string(), phys));
        }
    }

    cameras
        .into_iter()
        .map(|(ir_path, name, phys)| {
            let buttons_path = pads
                .iter()
                .find(|(_, pp)| pp.is_some() && *pp == phys)
                .map(|(path, _)| path.clone());
            DeviceInfo {
                name,
                ir_path,
                buttons_path,
                phys,
            }
        })
        .collect()
}

/// Assembles `IrState`s from the raw event streams of one remote.
pub struct IrReader {
    ir: Device,
    buttons_dev: Option<Device>,
    hats: [[i32; 2]; MAX_BLOBS],
    buttons: Buttons,
}

impl IrReader {
    pub fn open(info: &DeviceInfo) -> Result<Self> {
        let ir = Device::open(&info.ir_path)
            .map_err(|e| anyhow!("failed to open {}: {e}", info.ir_path))?;
        ir.set_nonblocking(true)?;
        let buttons_dev = match &info.buttons_path {
            Some(p) => match Device::open(p) {
                Ok(d) => {
                    d.set_nonblocking(true)?;
                    Some(d)
                }
                Err(e) => {
                    warn!("failed to open button device {p}: {e}; touch buttons unavailable");
                    None
                }
            },
            None => None,
        };
        debug!("reader: opened {} (buttons: {:?})", info.ir_path, info.buttons_path);
        Ok(Self {
            ir,
            buttons_dev,
            hats: [[HAT_MISSING; 2]; MAX_BLOBS],
            buttons: Buttons::default(),
        })
    }

    /// Drain pending events. Returns one state per completed IR report, in
    /// delivery order. An empty result means nothing new arrived.
    pub fn poll(&mut self) -> Result<Vec<IrState>> {
        if let Some(dev) = self.buttons_dev.as_mut() {
            match dev.fetch_events() {
                Ok(events) => {
                    for ev in events {
                        if ev.event_type() == EventType::KEY {
                            // value 2 is autorepeat: still held
                            self.buttons.set_code(ev.code(), ev.value() != 0);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(anyhow!("button device read failed: {e}")),
            }
        }

        let mut out = vec![];
        let events: Vec<(EventType, u16, i32)> = match self.ir.fetch_events() {
            Ok(events) => events.map(|ev| (ev.event_type(), ev.code(), ev.value())).collect(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(out),
            Err(e) => return Err(anyhow!("IR device read failed: {e}")),
        };
        for (ty, code, value) in events {
            if ty == EventType::ABSOLUTE {
                self.on_abs(code, value);
            } else if ty == EventType::SYNCHRONIZATION && code == SynchronizationCode::SYN_REPORT.0 {
                out.push(self.snapshot());
            }
        }
        Ok(out)
    }

    fn on_abs(&mut self, code: u16, value: i32) {
        let base = AbsoluteAxisCode::ABS_HAT0X.0;
        let Some(offset) = code.checked_sub(base) else { return };
        let offset = offset as usize;
        if offset < MAX_BLOBS * 2 {
            self.hats[offset / 2][offset % 2] = value;
        }
    }

    fn snapshot(&self) -> IrState {
        IrState {
            buttons: self.buttons,
            blobs: blobs_from_hats(&self.hats),
        }
    }
}

fn blobs_from_hats(hats: &[[i32; 2]; MAX_BLOBS]) -> Vec<IrBlob> {
    hats.iter()
        .filter(|[x, y]| *x >= 0 && *y >= 0 && *x < HAT_MISSING && *y < HAT_MISSING)
        .map(|[x, y]| IrBlob {
            x: *x as f64,
            y: *y as f64,
        })
        .collect()
}

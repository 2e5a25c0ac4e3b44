use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::calibration::CalibrationRectangle;
use crate::classifier::ClassifierConfig;
use crate::cursor::{CursorConfig, SensorBarPosition};
use crate::duotouch::DuoTouchConfig;
use crate::geometry::Vec2;
use crate::input;
use crate::touch::MAX_REMOTE_INDEX;
use crate::tracker::LockThresholds;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Screen {
    pub width: f64,
    pub height: f64,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    #[default]
    Pen,
    Pointer,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracking {
    pub mode: TrackingMode,
    pub smooth_size: usize,
    pub duplicate_distance: f64,
    pub strong_lock_threshold: u32,
    pub strong_lost_lock_threshold: u32,
    pub prediction_scale: Option<f64>,
    pub contact_size: f64,
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Pen,
            smooth_size: 4,
            duplicate_distance: 10.0,
            strong_lock_threshold: 0,
            strong_lost_lock_threshold: 0,
            prediction_scale: None,
            contact_size: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Touch {
    pub tap_threshold: f64,
    pub edge_helper_margins: f64,
    pub edge_helper_release: f64,
    pub position_radius: f64,
    pub hover: bool,
    pub remote_index: u64,
}

impl Default for Touch {
    fn default() -> Self {
        Self {
            tap_threshold: 30.0,
            edge_helper_margins: 30.0,
            edge_helper_release: 60.0,
            position_radius: 3.0,
            hover: true,
            remote_index: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Cursor {
    pub margins_left_right: f64,
    pub margins_top_bottom: f64,
    pub sensor_bar: SensorBarPosition,
    pub sensor_bar_compensation: f64,
    pub filter_freq: f64,
    pub filter_min_cutoff: f64,
    pub filter_beta: f64,
}

impl Default for Cursor {
    fn default() -> Self {
        let c = CursorConfig::default();
        Self {
            margins_left_right: c.margins_left_right,
            margins_top_bottom: c.margins_top_bottom,
            sensor_bar: c.sensor_bar,
            sensor_bar_compensation: c.sensor_bar_compensation,
            filter_freq: c.filter_freq,
            filter_min_cutoff: c.filter_min_cutoff,
            filter_beta: c.filter_beta,
        }
    }
}

/// Corners as `[x, y]` pairs: top-left, top-right, bottom-left, bottom-right.
pub type Corners = [[f64; 2]; 4];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Calibration {
    pub source: Option<Corners>,
    pub destination: Option<Corners>,
}

fn rectangle(c: &Corners) -> CalibrationRectangle {
    let p = |i: usize| Vec2::new(c[i][0], c[i][1]);
    CalibrationRectangle::new(p(0), p(1), p(2), p(3))
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Profile {
    pub meta: Meta,
    pub screen: Screen,
    pub tracking: Tracking,
    pub touch: Touch,
    pub cursor: Cursor,
    pub calibration: Calibration,
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    pub fn screen_size(&self) -> Vec2 {
        Vec2::new(self.screen.width, self.screen.height)
    }

    pub fn contact_size(&self) -> Vec2 {
        Vec2::new(self.tracking.contact_size, self.tracking.contact_size)
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        let t = &self.tracking;
        ClassifierConfig {
            smooth_size: t.smooth_size,
            duplicate_distance: t.duplicate_distance,
            prediction_scale: t
                .prediction_scale
                .unwrap_or_else(|| self.screen.width.max(self.screen.height)),
            thresholds: LockThresholds {
                strong_lock: t.strong_lock_threshold,
                strong_lost_lock: t.strong_lost_lock_threshold,
            },
        }
    }

    pub fn duotouch_config(&self) -> DuoTouchConfig {
        let t = &self.touch;
        DuoTouchConfig {
            tap_threshold: t.tap_threshold,
            edge_helper_margins: t.edge_helper_margins,
            edge_helper_release: t.edge_helper_release,
            position_radius: t.position_radius,
            contact_size: self.tracking.contact_size,
        }
    }

    pub fn cursor_config(&self) -> CursorConfig {
        let c = &self.cursor;
        CursorConfig {
            screen: self.screen_size(),
            margins_left_right: c.margins_left_right,
            margins_top_bottom: c.margins_top_bottom,
            sensor_bar: c.sensor_bar,
            sensor_bar_compensation: c.sensor_bar_compensation,
            filter_freq: c.filter_freq,
            filter_min_cutoff: c.filter_min_cutoff,
            filter_beta: c.filter_beta,
        }
    }

    /// Source and destination rectangles, if a source is configured. A
    /// missing destination means the whole screen.
    pub fn calibration_rectangles(&self) -> Option<(CalibrationRectangle, CalibrationRectangle)> {
        let source = self.calibration.source.as_ref().map(rectangle)?;
        let destination = self
            .calibration
            .destination
            .as_ref()
            .map(rectangle)
            .unwrap_or_else(|| CalibrationRectangle::from_size(self.screen_size()));
        Some((source, destination))
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub detected_devices: Vec<String>,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("blobtouch"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

/// The profile shipped with the binary.
pub fn embedded_default() -> Result<Profile> {
    Profile::parse(default_profile_text())
}

pub fn detect_ir_devices() -> Vec<String> {
    input::discover_remotes()
        .into_iter()
        .map(|d| match &d.buttons_path {
            Some(b) => format!("{} ({}, buttons {})", d.name, d.ir_path, b),
            None => format!("{} ({})", d.name, d.ir_path),
        })
        .collect()
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let mut st = Self::load_from(config_dir()?)?;
        st.detected_devices = detect_ir_devices();
        Ok(st)
    }

    /// Load (installing the default profile if needed) from an explicit
    /// configuration directory. Does not scan for devices.
    pub fn load_from(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let mut active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        if active_name.is_empty() {
            warn!("active profile pointer is empty; using 'default'");
            active_name = "default".to_string();
        }
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
            detected_devices: vec![],
        })
    }

    /// Re-read the active profile. On error the last good profile stays.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(anyhow!("invalid profile name '{name}'"));
        }
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn active_profile_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let input_dir_ok = Path::new("/dev/input").exists();
        let in_input_group = check_in_input_group();
        serde_json::json!({
            "input_dir_present": input_dir_ok,
            "input_group_member": in_input_group,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "active_profile_file": self.active_profile_path(),
            "mode": self.profile.tracking.mode,
            "calibrated": self.profile.calibration.source.is_some(),
            "devices": self.detected_devices,
            "hints": {
                "kernel_driver": "modprobe hid-wiimote (pair the remote over bluetooth first)",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

pub fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::parse(&txt).map_err(|e| anyhow!("failed to load {}: {e}", path.display()))
}

fn non_negative(key: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(anyhow!("{key} must be a finite value >= 0, got {v}"));
    }
    Ok(())
}

fn positive(key: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v <= 0.0 {
        return Err(anyhow!("{key} must be > 0, got {v}"));
    }
    Ok(())
}

pub fn validate_profile(p: &Profile) -> Result<()> {
    positive("screen.width", p.screen.width)?;
    positive("screen.height", p.screen.height)?;

    let t = &p.tracking;
    if t.smooth_size == 0 {
        return Err(anyhow!("tracking.smooth_size must be at least 1"));
    }
    non_negative("tracking.duplicate_distance", t.duplicate_distance)?;
    non_negative("tracking.contact_size", t.contact_size)?;
    if let Some(scale) = t.prediction_scale {
        non_negative("tracking.prediction_scale", scale)?;
    }

    let touch = &p.touch;
    non_negative("touch.tap_threshold", touch.tap_threshold)?;
    non_negative("touch.edge_helper_margins", touch.edge_helper_margins)?;
    non_negative("touch.edge_helper_release", touch.edge_helper_release)?;
    non_negative("touch.position_radius", touch.position_radius)?;
    if touch.edge_helper_release < touch.edge_helper_margins {
        return Err(anyhow!(
            "touch.edge_helper_release ({}) must not be smaller than touch.edge_helper_margins ({})",
            touch.edge_helper_release,
            touch.edge_helper_margins
        ));
    }
    if !(1..=MAX_REMOTE_INDEX).contains(&touch.remote_index) {
        return Err(anyhow!(
            "touch.remote_index must be between 1 and {MAX_REMOTE_INDEX}, got {}",
            touch.remote_index
        ));
    }

    let c = &p.cursor;
    for (key, v) in [
        ("cursor.margins_left_right", c.margins_left_right),
        ("cursor.margins_top_bottom", c.margins_top_bottom),
    ] {
        if !(0.0..1.0).contains(&v) {
            return Err(anyhow!("{key} must be in [0,1), got {v}"));
        }
    }
    non_negative("cursor.sensor_bar_compensation", c.sensor_bar_compensation)?;
    positive("cursor.filter_freq", c.filter_freq)?;
    positive("cursor.filter_min_cutoff", c.filter_min_cutoff)?;
    positive("cursor.filter_beta", c.filter_beta)?;

    if p.calibration.destination.is_some() && p.calibration.source.is_none() {
        return Err(anyhow!("calibration.destination requires calibration.source"));
    }
    for corners in [&p.calibration.source, &p.calibration.destination].into_iter().flatten() {
        if corners.iter().flatten().any(|v| !v.is_finite()) {
            return Err(anyhow!("calibration corners must be finite"));
        }
    }
    Ok(())
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| line.split(':').nth(3).unwrap_or("").split(',').any(|u| u == user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_profile_is_valid() {
        let p = Profile::parse(default_profile_text()).unwrap();
        assert_eq!(p.meta.name.as_deref(), Some("default"));
        assert_eq!(p.tracking.mode, TrackingMode::Pen);
        assert_eq!(p.tracking.smooth_size, 4);
        assert_eq!(p.touch.remote_index, 1);
        assert_eq!(p.cursor.sensor_bar, SensorBarPosition::Center);
        assert!(p.calibration_rectangles().is_none());
    }

    #[test]
    fn empty_profile_uses_defaults() {
        let p = Profile::parse("").unwrap();
        let cc = p.classifier_config();
        assert_eq!(cc.smooth_size, 4);
        assert_eq!(cc.prediction_scale, 1920.0);
        assert_eq!(p.duotouch_config().tap_threshold, 30.0);
    }

    #[test]
    fn prediction_scale_override_wins() {
        let p = Profile::parse("[tracking]\nprediction_scale = 500.0\n").unwrap();
        assert_eq!(p.classifier_config().prediction_scale, 500.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for txt in [
            "[tracking]\nsmooth_size = 0\n",
            "[touch]\nedge_helper_margins = 80.0\nedge_helper_release = 60.0\n",
            "[touch]\nremote_index = 0\n",
            "[touch]\nremote_index = 5000\n",
            "[cursor]\nmargins_left_right = 1.0\n",
            "[cursor]\nfilter_beta = 0.0\n",
            "[screen]\nwidth = 0\n",
            "[tracking]\nmode = \"mouse\"\n",
            "[calibration]\ndestination = [[0,0],[1,0],[0,1],[1,1]]\n",
        ] {
            assert!(Profile::parse(txt).is_err(), "accepted: {txt}");
        }
    }

    #[test]
    fn calibration_destination_defaults_to_screen() {
        let p = Profile::parse(
            "[screen]\nwidth = 800\nheight = 600\n[calibration]\nsource = [[10,10],[90,10],[10,90],[90,90]]\n",
        )
        .unwrap();
        let (src, dst) = p.calibration_rectangles().unwrap();
        assert_eq!(src.bottom_right, Vec2::new(90.0, 90.0));
        assert_eq!(dst, CalibrationRectangle::from_size(Vec2::new(800.0, 600.0)));
    }

    #[test]
    fn install_switch_and_keep_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_from(dir.path().to_path_buf()).unwrap();
        assert_eq!(st.active_name, "default");
        assert_eq!(st.list_profiles(), vec!["default".to_string()]);

        fs::write(st.profiles_dir.join("wall.toml"), "[tracking]\nmode = \"pointer\"\n").unwrap();
        st.set_active("wall").unwrap();
        assert_eq!(st.profile.tracking.mode, TrackingMode::Pointer);
        assert_eq!(fs::read_to_string(&st.active_ptr).unwrap(), "wall");

        let report = st.doctor_report();
        assert_eq!(report["active_profile"], "wall");
        assert_eq!(
            report["active_profile_file"],
            serde_json::json!(dir.path().join("profiles").join("wall.toml"))
        );

        fs::write(st.active_profile_path(), "[touch]\nremote_index = 0\n").unwrap();
        assert!(st.reload().is_err());
        assert_eq!(st.profile.tracking.mode, TrackingMode::Pointer);

        assert!(st.set_active("missing").is_err());
        assert_eq!(st.active_name, "wall");
    }
}

//! Display calibration records.
//!
//! A calibration describes the physical lenticular geometry of one panel.
//! Records are produced by external tooling (firmware readers, exported
//! JSON) and treated as read-only input for the rest of the pipeline. When
//! none is available, [`Calibration::resolve`] substitutes an emulated
//! device so rendering never blocks.

use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;
use crate::error::{CoreError, CoreResult};

/// View cone used when a calibration reports zero.
pub const DEFAULT_VIEW_CONE: f32 = 35.0;

/// Serial assigned to records that were not read from hardware.
pub const DEFAULT_SERIAL: &str = "PORT";

/// Physical calibration of a lenticular display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Index of the display among connected devices.
    pub index: u32,
    /// Screen width in pixels.
    pub screen_width: u32,
    /// Screen height in pixels.
    pub screen_height: u32,
    /// Width of one subpixel in normalized screen units.
    pub subpixel_size: f32,
    /// View cone in degrees. Zero means "use the default".
    pub view_cone: f32,
    /// Screen aspect ratio.
    pub aspect: f32,
    /// Lenticular pitch.
    pub pitch: f32,
    /// Lenticular slope.
    pub slope: f32,
    /// Lenticular phase center.
    pub center: f32,
    /// Fringe correction.
    pub fringe: f32,
    /// Device serial.
    pub serial: String,
    /// Device name as reported by the hardware.
    pub name: String,
    /// Horizontal display position on the desktop.
    pub x_pos: i32,
    /// Vertical display position on the desktop.
    pub y_pos: i32,
    /// Uncorrected slope from the device.
    pub raw_slope: f32,
    /// Non-zero when the panel image is mirrored horizontally.
    pub flip_image_x: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        let settings = DeviceKind::Portrait.settings();
        Self {
            pitch: 10.0,
            ..Self::with_screen(0, settings.screen_width, settings.screen_height)
        }
    }
}

impl Calibration {
    /// Create a calibration that only knows the screen size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Screen sizes are far below f32 precision limits
    pub fn with_screen(index: u32, screen_width: u32, screen_height: u32) -> Self {
        Self {
            index,
            screen_width,
            screen_height,
            subpixel_size: 0.0,
            view_cone: 0.0,
            aspect: screen_width as f32 / screen_height.max(1) as f32,
            pitch: 1.0,
            slope: 1.0,
            center: 0.0,
            fringe: 0.0,
            serial: DEFAULT_SERIAL.to_string(),
            name: String::new(),
            x_pos: 0,
            y_pos: 0,
            raw_slope: 0.0,
            flip_image_x: 0.0,
        }
    }

    /// Create the stand-in calibration for an emulated device.
    #[must_use]
    pub fn emulated(kind: DeviceKind) -> Self {
        let settings = kind.settings();
        Self {
            serial: settings.name.to_string(),
            aspect: settings.aspect(),
            ..Self::with_screen(0, settings.screen_width, settings.screen_height)
        }
    }

    /// Parse a calibration from JSON.
    ///
    /// Missing fields take their default values. The aspect is derived from
    /// the screen size unless the document sets a positive one.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the screen size is zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let explicit_aspect = value.get("aspect").is_some();
        let mut cal: Self = serde_json::from_value(value)?;
        if cal.screen_width == 0 || cal.screen_height == 0 {
            return Err(CoreError::InvalidCalibration(format!(
                "screen size {}x{} must be non-zero",
                cal.screen_width, cal.screen_height
            )));
        }
        if !explicit_aspect || cal.aspect <= 0.0 {
            cal.aspect = cal.screen_width as f32 / cal.screen_height as f32;
        }
        Ok(cal)
    }

    /// Serialize the calibration to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// View cone in degrees with zero replaced by [`DEFAULT_VIEW_CONE`].
    #[must_use]
    pub fn effective_view_cone(&self) -> f32 {
        if self.view_cone == 0.0 {
            DEFAULT_VIEW_CONE
        } else {
            self.view_cone
        }
    }

    /// Whether this calibration belongs to a portrait panel.
    #[must_use]
    pub fn is_portrait(&self) -> bool {
        self.serial.is_empty() || self.serial.contains("PORT") || self.serial.contains("Portrait")
    }

    /// Pick the found calibration or fall back to an emulated device.
    #[must_use]
    pub fn resolve(found: Option<Self>, emulated: DeviceKind) -> CalibrationLoad {
        match found {
            Some(calibration) => CalibrationLoad {
                calibration,
                calibration_found: true,
            },
            None => {
                tracing::warn!(
                    "No calibration found, emulating {}",
                    emulated.settings().name
                );
                CalibrationLoad {
                    calibration: Self::emulated(emulated),
                    calibration_found: false,
                }
            }
        }
    }
}

/// Outcome of calibration resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationLoad {
    /// The calibration in effect.
    pub calibration: Calibration,
    /// False when the calibration is an emulated stand-in.
    pub calibration_found: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_portrait_record() {
        let cal = Calibration::default();
        assert_eq!(cal.screen_width, 1536);
        assert_eq!(cal.screen_height, 2048);
        assert!((cal.pitch - 10.0).abs() < f32::EPSILON);
        assert!((cal.aspect - 0.75).abs() < 1e-6);
        assert!(cal.is_portrait());
    }

    #[test]
    fn test_with_screen_derives_aspect() {
        let cal = Calibration::with_screen(2, 2560, 1600);
        assert_eq!(cal.index, 2);
        assert!((cal.aspect - 1.6).abs() < 1e-6);
        assert!((cal.pitch - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_view_cone_uses_default() {
        let mut cal = Calibration::default();
        assert!((cal.effective_view_cone() - DEFAULT_VIEW_CONE).abs() < f32::EPSILON);
        cal.view_cone = 40.0;
        assert!((cal.effective_view_cone() - 40.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_portrait_detection() {
        let mut cal = Calibration::emulated(DeviceKind::FourK);
        assert!(!cal.is_portrait());
        cal.serial = String::new();
        assert!(cal.is_portrait());
        cal.serial = "LKG-Portrait-0042".to_string();
        assert!(cal.is_portrait());
        assert!(Calibration::emulated(DeviceKind::Portrait).is_portrait());
    }

    #[test]
    fn test_resolve_prefers_found() {
        let found = Calibration::with_screen(1, 3840, 2160);
        let load = Calibration::resolve(Some(found.clone()), DeviceKind::Portrait);
        assert!(load.calibration_found);
        assert_eq!(load.calibration, found);
    }

    #[test]
    fn test_resolve_emulates_when_missing() {
        let load = Calibration::resolve(None, DeviceKind::EightK);
        assert!(!load.calibration_found);
        assert_eq!(load.calibration.screen_width, 7680);
        assert_eq!(load.calibration.serial, "Looking Glass - 8K");
        assert!((load.calibration.aspect - 7680.0 / 4320.0).abs() < 1e-5);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let cal = Calibration::from_json(
            r#"{"screen_width": 3840, "screen_height": 2160, "pitch": 49.8, "slope": -5.2}"#,
        )
        .expect("should parse calibration");
        assert!((cal.pitch - 49.8).abs() < 1e-5);
        assert!((cal.aspect - 3840.0 / 2160.0).abs() < 1e-5);
        assert_eq!(cal.serial, DEFAULT_SERIAL);
    }

    #[test]
    fn test_from_json_rejects_zero_screen() {
        let err = Calibration::from_json(r#"{"screen_width": 0, "screen_height": 100}"#);
        assert!(matches!(err, Err(CoreError::InvalidCalibration(_))));
        assert!(matches!(
            Calibration::from_json("not json"),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let cal = Calibration::emulated(DeviceKind::Legacy);
        let json = cal.to_json().expect("should serialize");
        let back = Calibration::from_json(&json).expect("should parse");
        assert_eq!(cal, back);
    }
}

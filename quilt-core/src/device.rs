//! Display device classes and their default settings.
//!
//! Each supported panel family has a canonical screen resolution, a
//! near-clip factor for the camera rig and a quilt preset. These are used
//! when no calibration is connected and the host emulates a device.

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::layout::QuiltPreset;

/// Supported display device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Portrait panel (1536 × 2048).
    #[default]
    Portrait,
    /// 4K landscape panel.
    FourK,
    /// 8K landscape panel.
    EightK,
    /// Legacy 8.9 inch panel.
    Legacy,
}

/// Fixed settings for one device class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSettings {
    /// Human-readable device name.
    pub name: &'static str,
    /// Native screen width in pixels.
    pub screen_width: u32,
    /// Native screen height in pixels.
    pub screen_height: u32,
    /// Near clip distance as a multiple of the rig size.
    pub near_clip_factor: f32,
    /// Quilt preset that matches the panel.
    pub quilt_preset: QuiltPreset,
}

impl DeviceSettings {
    /// Screen aspect ratio (width / height).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Screen sizes are far below f32 precision limits
    pub fn aspect(&self) -> f32 {
        self.screen_width as f32 / self.screen_height as f32
    }
}

const DEVICE_PRESETS: [DeviceSettings; 4] = [
    DeviceSettings {
        name: "Looking Glass - Portrait",
        screen_width: 1536,
        screen_height: 2048,
        near_clip_factor: 0.5,
        quilt_preset: QuiltPreset::Portrait,
    },
    DeviceSettings {
        name: "Looking Glass - 4k",
        screen_width: 3840,
        screen_height: 2160,
        near_clip_factor: 1.5,
        quilt_preset: QuiltPreset::FourKStandard,
    },
    DeviceSettings {
        name: "Looking Glass - 8K",
        screen_width: 7680,
        screen_height: 4320,
        near_clip_factor: 1.5,
        quilt_preset: QuiltPreset::EightKStandard,
    },
    DeviceSettings {
        name: "Looking Glass - 8.9inch(Legacy)",
        screen_width: 2560,
        screen_height: 1600,
        near_clip_factor: 1.5,
        quilt_preset: QuiltPreset::FourKStandard,
    },
];

impl DeviceKind {
    /// All device classes in preset-table order.
    pub const ALL: [Self; 4] = [Self::Portrait, Self::FourK, Self::EightK, Self::Legacy];

    /// Settings for this device class.
    #[must_use]
    pub const fn settings(self) -> &'static DeviceSettings {
        match self {
            Self::Portrait => &DEVICE_PRESETS[0],
            Self::FourK => &DEVICE_PRESETS[1],
            Self::EightK => &DEVICE_PRESETS[2],
            Self::Legacy => &DEVICE_PRESETS[3],
        }
    }

    /// Find the device class whose screen matches the calibration.
    #[must_use]
    pub fn from_calibration(cal: &Calibration) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            let s = kind.settings();
            s.screen_width == cal.screen_width && s.screen_height == cal.screen_height
        })
    }

    /// Display name for a calibration, falling back to the portrait name.
    #[must_use]
    pub fn name_for(cal: &Calibration) -> &'static str {
        Self::from_calibration(cal)
            .unwrap_or_default()
            .settings()
            .name
    }
}

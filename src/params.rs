//! Parameter Set
//!
//! The tunable state of the processing graph. Wire names follow the message
//! contract (`volume`, `compressionEnabled`, `threshold`, `ratio`, `attack`,
//! `release`) so persisted settings and control messages share one format.

use serde::{Deserialize, Serialize};

pub const DEFAULT_VOLUME_PERCENT: f32 = 100.0;
pub const DEFAULT_THRESHOLD_DB: f32 = -24.0;
pub const DEFAULT_RATIO: f32 = 4.0;
pub const DEFAULT_ATTACK_SECONDS: f32 = 0.05;
pub const DEFAULT_RELEASE_SECONDS: f32 = 0.25;

/// Fully populated graph parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "wasm", derive(tsify::Tsify))]
#[cfg_attr(feature = "wasm", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterSet {
    /// Output volume, 100 = unity gain
    #[serde(rename = "volume")]
    pub volume_percent: f32,
    pub compression_enabled: bool,
    #[serde(rename = "threshold")]
    pub threshold_db: f32,
    pub ratio: f32,
    #[serde(rename = "attack")]
    pub attack_seconds: f32,
    #[serde(rename = "release")]
    pub release_seconds: f32,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            volume_percent: DEFAULT_VOLUME_PERCENT,
            compression_enabled: false,
            threshold_db: DEFAULT_THRESHOLD_DB,
            ratio: DEFAULT_RATIO,
            attack_seconds: DEFAULT_ATTACK_SECONDS,
            release_seconds: DEFAULT_RELEASE_SECONDS,
        }
    }
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "wasm", derive(tsify::Tsify))]
#[cfg_attr(feature = "wasm", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "camelCase", default)]
pub struct ParameterPatch {
    #[serde(rename = "volume", skip_serializing_if = "Option::is_none")]
    pub volume_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_enabled: Option<bool>,
    #[serde(rename = "threshold", skip_serializing_if = "Option::is_none")]
    pub threshold_db: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f32>,
    #[serde(rename = "attack", skip_serializing_if = "Option::is_none")]
    pub attack_seconds: Option<f32>,
    #[serde(rename = "release", skip_serializing_if = "Option::is_none")]
    pub release_seconds: Option<f32>,
}

impl ParameterPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_volume(mut self, percent: f32) -> Self {
        self.volume_percent = Some(percent);
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = Some(enabled);
        self
    }

    pub fn with_threshold(mut self, db: f32) -> Self {
        self.threshold_db = Some(db);
        self
    }

    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = Some(ratio);
        self
    }

    pub fn with_attack(mut self, seconds: f32) -> Self {
        self.attack_seconds = Some(seconds);
        self
    }

    pub fn with_release(mut self, seconds: f32) -> Self {
        self.release_seconds = Some(seconds);
        self
    }
}

impl From<ParameterSet> for ParameterPatch {
    fn from(set: ParameterSet) -> Self {
        Self {
            volume_percent: Some(set.volume_percent),
            compression_enabled: Some(set.compression_enabled),
            threshold_db: Some(set.threshold_db),
            ratio: Some(set.ratio),
            attack_seconds: Some(set.attack_seconds),
            release_seconds: Some(set.release_seconds),
        }
    }
}

/// Control values for the dynamics stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicsValues {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_seconds: f32,
    pub release_seconds: f32,
}

impl DynamicsValues {
    /// Threshold 0 dB at 1:1 leaves the signal numerically untouched
    pub const TRANSPARENT_THRESHOLD_DB: f32 = 0.0;
    pub const TRANSPARENT_RATIO: f32 = 1.0;
}

impl ParameterSet {
    /// Merge a partial update over this set
    ///
    /// Non-finite values are dropped; finite values are clamped into their
    /// domain (volume and times non-negative, ratio at least 1, threshold at
    /// most 0 dB).
    pub fn merge(&mut self, patch: &ParameterPatch) {
        if let Some(v) = finite(patch.volume_percent) {
            self.volume_percent = v.max(0.0);
        }
        if let Some(enabled) = patch.compression_enabled {
            self.compression_enabled = enabled;
        }
        if let Some(v) = finite(patch.threshold_db) {
            self.threshold_db = v.min(0.0);
        }
        if let Some(v) = finite(patch.ratio) {
            self.ratio = v.max(1.0);
        }
        if let Some(v) = finite(patch.attack_seconds) {
            self.attack_seconds = v.max(0.0);
        }
        if let Some(v) = finite(patch.release_seconds) {
            self.release_seconds = v.max(0.0);
        }
    }

    /// Defaults with `patch` merged over them
    pub fn from_patch(patch: &ParameterPatch) -> Self {
        let mut set = Self::default();
        set.merge(patch);
        set
    }

    /// Linear gain for the gain stage
    pub fn linear_gain(&self) -> f32 {
        self.volume_percent / 100.0
    }

    /// Dynamics stage values, transparent when compression is disabled
    pub fn dynamics(&self) -> DynamicsValues {
        let (threshold_db, ratio) = if self.compression_enabled {
            (self.threshold_db, self.ratio)
        } else {
            (
                DynamicsValues::TRANSPARENT_THRESHOLD_DB,
                DynamicsValues::TRANSPARENT_RATIO,
            )
        };
        DynamicsValues {
            threshold_db,
            ratio,
            attack_seconds: self.attack_seconds,
            release_seconds: self.release_seconds,
        }
    }
}

fn finite(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let p = ParameterSet::default();
        assert_relative_eq!(p.linear_gain(), 1.0);
        assert!(!p.compression_enabled);
        assert_relative_eq!(p.threshold_db, -24.0);
        assert_relative_eq!(p.ratio, 4.0);
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut p = ParameterSet::default();
        p.merge(&ParameterPatch::default().with_volume(150.0));
        assert_relative_eq!(p.volume_percent, 150.0);
        assert_relative_eq!(p.attack_seconds, DEFAULT_ATTACK_SECONDS);

        p.merge(&ParameterPatch::default().with_ratio(8.0));
        assert_relative_eq!(p.volume_percent, 150.0);
        assert_relative_eq!(p.ratio, 8.0);
    }

    #[test]
    fn test_merge_clamps_and_drops_non_finite() {
        let mut p = ParameterSet::default();
        p.merge(
            &ParameterPatch::default()
                .with_volume(-20.0)
                .with_ratio(0.5)
                .with_threshold(6.0)
                .with_attack(f32::NAN)
                .with_release(-1.0),
        );
        assert_relative_eq!(p.volume_percent, 0.0);
        assert_relative_eq!(p.ratio, 1.0);
        assert_relative_eq!(p.threshold_db, 0.0);
        assert_relative_eq!(p.attack_seconds, DEFAULT_ATTACK_SECONDS);
        assert_relative_eq!(p.release_seconds, 0.0);
    }

    #[test]
    fn test_dynamics_transparent_when_disabled() {
        let p = ParameterSet::from_patch(
            &ParameterPatch::default()
                .with_compression(false)
                .with_threshold(-40.0)
                .with_ratio(12.0),
        );
        let d = p.dynamics();
        assert_relative_eq!(d.threshold_db, 0.0);
        assert_relative_eq!(d.ratio, 1.0);
        assert_relative_eq!(d.attack_seconds, DEFAULT_ATTACK_SECONDS);

        let enabled = ParameterSet { compression_enabled: true, ..p };
        assert_relative_eq!(enabled.dynamics().threshold_db, -40.0);
        assert_relative_eq!(enabled.dynamics().ratio, 12.0);
    }

    #[test]
    fn test_wire_format() {
        let patch: ParameterPatch =
            serde_json::from_str(r#"{"volume": 50, "compressionEnabled": true, "threshold": -30}"#)
                .unwrap();
        assert_eq!(patch.volume_percent, Some(50.0));
        assert_eq!(patch.compression_enabled, Some(true));
        assert_eq!(patch.ratio, None);

        let json = serde_json::to_value(ParameterSet::default()).unwrap();
        assert_eq!(json["volume"], 100.0);
        assert_eq!(json["compressionEnabled"], false);
        assert_eq!(json["release"], 0.25);
    }

    #[test]
    fn test_partial_persisted_set_fills_defaults() {
        let set: ParameterSet = serde_json::from_str(r#"{"volume": 180}"#).unwrap();
        assert_relative_eq!(set.volume_percent, 180.0);
        assert_relative_eq!(set.ratio, DEFAULT_RATIO);
    }
}

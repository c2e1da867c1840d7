//! Phenology stage types: stage label, gate decision, estimated bloom window.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Growth stage of a flowering perennial, inferred from the vegetation index trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhenologyStage {
    Dormant,
    PreBloomGrowth,
    BloomImminent,
    Bloom,
    PostBloom,
}

impl PhenologyStage {
    /// Phenology gate: a numeric forecast is only meaningful while the canopy
    /// is building toward bloom.
    pub const fn permits_forecast(self) -> bool {
        matches!(self, Self::PreBloomGrowth | Self::BloomImminent)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dormant => "dormant",
            Self::PreBloomGrowth => "pre_bloom_growth",
            Self::BloomImminent => "bloom_imminent",
            Self::Bloom => "bloom",
            Self::PostBloom => "post_bloom",
        }
    }
}

impl std::fmt::Display for PhenologyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the recent index trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Flat,
    Declining,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Flat => write!(f, "flat"),
            Self::Declining => write!(f, "declining"),
        }
    }
}

/// Qualitative confidence of a calibration-derived bloom window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowConfidence {
    Low,
    High,
}

/// Bloom window estimated from historical calibration when no ML forecast is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomWindow {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
    pub confidence: WindowConfidence,
}

/// Output of the phenology classifier for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenologyAssessment {
    pub stage: PhenologyStage,
    /// Normalized distance from the nearest threshold (0-1)
    pub confidence: f64,
    pub message: String,
    /// Trailing mean vegetation index the decision was based on
    pub index_level: f64,
    /// Latest daily vegetation index
    pub current_index: f64,
    /// Least-squares slope of the trailing index (per day)
    pub slope_per_day: f64,
    pub trend: TrendDirection,
    /// Present only when the gate is closed
    pub estimated_bloom_window: Option<BloomWindow>,
}

impl PhenologyAssessment {
    pub const fn can_predict(&self) -> bool {
        self.stage.permits_forecast()
    }
}

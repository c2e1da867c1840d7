//! Calibration-derived reference models.
//!
//! Used to bootstrap a fresh install (`bloomwatch bootstrap`) before trained
//! artifacts are available, and as realistic fixtures in tests. Each member
//! encodes a simple phenological prior in the real artifact format:
//!
//! - `tree`: days to the next historical peak, binned by day-of-year
//! - `feed_forward`: linear in day-of-year with an NDVI deficit correction
//! - `sequence`: LSTM tracking the recent NDVI deficit against the seasonal peak

use crate::config::CropCalibration;
use crate::features::feature_names;
use crate::types::ModelKind;

use super::artifacts::{CropModels, LoadedMember, ModelManifest};
use super::models::{
    Activation, DenseLayer, FeedForwardModel, Predictor, RandomForestModel, RegressionTree,
    SequenceModel, StandardScaler, TreeNode,
};

/// Day-of-year bin width for the tree member.
const TREE_BIN_DAYS: u32 = 15;

/// Days per unit of NDVI deficit below the seasonal peak.
const NDVI_DEFICIT_DAYS: f64 = 60.0;

/// Trailing days consumed by the sequence member.
const SEQUENCE_LENGTH: usize = 60;

/// Reference member set for `crop`.
pub fn baseline_models(crop: &str, calibration: &CropCalibration) -> CropModels {
    let names = feature_names();
    let doy_idx = names.iter().position(|n| n == "day_of_year").unwrap_or(0);
    let ndvi_idx = names.iter().position(|n| n == "ndvi").unwrap_or(0);

    let predictors = vec![
        Predictor::Sequence(sequence_member(calibration)),
        Predictor::Tree(tree_member(calibration, doy_idx)),
        Predictor::FeedForward(feed_forward_member(calibration, names.len(), doy_idx, ndvi_idx)),
    ];

    let members = predictors
        .into_iter()
        .map(|predictor| {
            let kind = predictor.kind();
            LoadedMember {
                kind,
                model_id: format!("{crop}/{kind}"),
                predictor,
            }
        })
        .collect();

    let mut manifest = ModelManifest::current(
        crop,
        vec![ModelKind::Sequence, ModelKind::Tree, ModelKind::FeedForward],
    );
    manifest.trained_at = Some("calibration-baseline".to_string());

    CropModels {
        crop: crop.to_string(),
        manifest,
        members,
    }
}

/// Days from `doy` to the next occurrence of `peak`.
fn days_to_peak(doy: f64, peak: f64) -> f64 {
    if doy <= peak {
        peak - doy
    } else {
        peak + 365.0 - doy
    }
}

fn tree_member(calibration: &CropCalibration, doy_idx: usize) -> RandomForestModel {
    let peak = f64::from(calibration.peak_doy);
    let trees = [0, TREE_BIN_DAYS / 2]
        .into_iter()
        .map(|shift| {
            let mut edges: Vec<u32> = (0..)
                .map(|i| shift + i * TREE_BIN_DAYS)
                .take_while(|&e| e < 366)
                .collect();
            if edges.first() != Some(&0) {
                edges.insert(0, 0);
            }
            edges.push(366);
            let bins: Vec<(f64, f64)> = edges
                .windows(2)
                .map(|w| {
                    let mid = f64::from(w[0] + w[1]) / 2.0;
                    (f64::from(w[1]), days_to_peak(mid, peak))
                })
                .collect();
            let mut nodes = Vec::new();
            build_bins(&bins, doy_idx, &mut nodes);
            RegressionTree { nodes }
        })
        .collect();
    RandomForestModel {
        scaler: None,
        trees,
    }
}

/// Pre-order balanced tree over `(upper_edge, value)` bins. Children always
/// follow their parent in `nodes`.
fn build_bins(bins: &[(f64, f64)], feature: usize, nodes: &mut Vec<TreeNode>) -> usize {
    let idx = nodes.len();
    if bins.len() == 1 {
        nodes.push(TreeNode::Leaf { value: bins[0].1 });
        return idx;
    }
    let mid = bins.len() / 2;
    nodes.push(TreeNode::Leaf { value: 0.0 });
    let left = build_bins(&bins[..mid], feature, nodes);
    let right = build_bins(&bins[mid..], feature, nodes);
    nodes[idx] = TreeNode::Split {
        feature,
        threshold: bins[mid - 1].0,
        left,
        right,
    };
    idx
}

fn feed_forward_member(
    calibration: &CropCalibration,
    n_features: usize,
    doy_idx: usize,
    ndvi_idx: usize,
) -> FeedForwardModel {
    let mut weights = vec![0.0; n_features];
    weights[doy_idx] = -1.0;
    weights[ndvi_idx] = -NDVI_DEFICIT_DAYS;
    FeedForwardModel {
        scaler: StandardScaler::identity(n_features),
        layers: vec![DenseLayer {
            weights: vec![weights],
            bias: vec![f64::from(calibration.peak_doy) + NDVI_DEFICIT_DAYS * calibration.ndvi_peak],
            activation: Activation::Linear,
        }],
        target_mean: 0.0,
        target_scale: 1.0,
    }
}

fn sequence_member(calibration: &CropCalibration) -> SequenceModel {
    // Saturated input/output gates and a closed forget gate make the cell
    // track tanh(ndvi - ndvi_peak) of the latest day.
    let saturate = 10.0;
    SequenceModel {
        scaler: StandardScaler {
            mean: vec![calibration.ndvi_peak, 0.0, 0.0],
            scale: vec![1.0, 1.0, 1.0],
        },
        sequence_length: SEQUENCE_LENGTH,
        hidden_size: 1,
        w_ih: vec![
            vec![0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0],
        ],
        w_hh: vec![vec![0.0]; 4],
        bias: vec![saturate, -saturate, 0.0, saturate],
        head: vec![DenseLayer {
            weights: vec![vec![-4.0 * NDVI_DEFICIT_DAYS]],
            bias: vec![0.0],
            activation: Activation::Linear,
        }],
        target_mean: 0.0,
        target_scale: 1.0,
    }
}

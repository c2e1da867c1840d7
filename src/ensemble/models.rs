//! Ensemble member variants and their inference.
//!
//! Each variant is a plain serde struct holding trained parameters exported by
//! the (out-of-scope) training step, plus the input scaler fitted alongside it.
//! [`Predictor`] is the tagged union the ensemble iterates over; dispatch is an
//! explicit `match`, not a trait object.

use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, InferenceError};
use crate::features::{FeatureRepresentation, SEQUENCE_CHANNELS};
use crate::types::ModelKind;

/// Floor applied to scaler denominators.
const MIN_SCALE: f64 = 1e-12;

// ============================================================================
// Building Blocks
// ============================================================================

/// Per-column standardization `(x - mean) / scale` fitted at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Identity scaler of width `n`.
    pub fn identity(n: usize) -> Self {
        Self {
            mean: vec![0.0; n],
            scale: vec![1.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>, InferenceError> {
        if x.len() != self.len() {
            return Err(InferenceError::InputShape {
                expected: self.len(),
                actual: x.len(),
            });
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&v, (&m, &s))| (v - m) / s.abs().max(MIN_SCALE))
            .collect())
    }

    fn check(&self, width: usize, what: &str) -> Result<(), String> {
        if self.mean.len() != width || self.scale.len() != width {
            return Err(format!(
                "{what} scaler has {}/{} columns, expected {width}",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err(format!("{what} scaler contains non-finite values"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Linear => x,
            Self::Relu => x.max(0.0),
            Self::Tanh => x.tanh(),
            Self::Sigmoid => sigmoid(x),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Fully connected layer, `weights` is `[outputs][inputs]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn outputs(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                let z: f64 = row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b;
                self.activation.apply(z)
            })
            .collect()
    }
}

/// Check a stack of dense layers maps `input` columns to exactly one output.
fn check_layers(layers: &[DenseLayer], input: usize) -> Result<(), String> {
    if layers.is_empty() {
        return Err("no layers".to_string());
    }
    let mut width = input;
    for (i, layer) in layers.iter().enumerate() {
        if layer.outputs() == 0 || layer.bias.len() != layer.outputs() {
            return Err(format!("layer {i}: bias/weights row count mismatch"));
        }
        if layer.weights.iter().any(|row| row.len() != width) {
            return Err(format!(
                "layer {i}: expected {width} inputs, found {}",
                layer.inputs()
            ));
        }
        width = layer.outputs();
    }
    if width != 1 {
        return Err(format!("final layer has {width} outputs, expected 1"));
    }
    Ok(())
}

fn forward_layers(layers: &[DenseLayer], x: Vec<f64>) -> f64 {
    layers
        .iter()
        .fold(x, |acc, layer| layer.forward(&acc))
        .first()
        .copied()
        .unwrap_or(f64::NAN)
}

fn default_target_scale() -> f64 { 1.0 }

// ============================================================================
// Regression Trees
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        /// Taken when `x[feature] <= threshold`
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Binary regression tree stored as a flat node array rooted at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Children must point forward, which rules out cycles.
    fn check(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split { feature, left, right, threshold } = *node {
                if feature >= n_features {
                    return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                }
                if left <= i || right <= i || left >= self.nodes.len() || right >= self.nodes.len() {
                    return Err(format!("node {i} has invalid children ({left}, {right})"));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {i} has a non-finite threshold"));
                }
            }
        }
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        // Forward-only children bound the walk by the node count.
        for _ in 0..self.nodes.len() {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(&TreeNode::Split { feature, threshold, left, right }) => {
                    let v = x.get(feature).copied().unwrap_or(f64::NAN);
                    idx = if v <= threshold { left } else { right };
                }
                None => break,
            }
        }
        f64::NAN
    }
}

fn check_trees(trees: &[RegressionTree], n_features: usize) -> Result<(), String> {
    if trees.is_empty() {
        return Err("no trees".to_string());
    }
    trees
        .iter()
        .enumerate()
        .try_for_each(|(i, t)| t.check(n_features).map_err(|e| format!("tree {i}: {e}")))
}

// ============================================================================
// Member Models
// ============================================================================

/// Random forest: mean of independent regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    /// Trees split on raw values unless a scaler was fitted
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    pub trees: Vec<RegressionTree>,
}

/// Gradient boosted trees: `base_score + learning_rate * Σ tree(x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

/// Dense feed-forward network over the standardized flat vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardModel {
    pub scaler: StandardScaler,
    pub layers: Vec<DenseLayer>,
    #[serde(default)]
    pub target_mean: f64,
    #[serde(default = "default_target_scale")]
    pub target_scale: f64,
}

/// Single-layer LSTM over the trailing daily sequence, followed by a dense head.
///
/// Gate order in the stacked weights is input, forget, cell, output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModel {
    /// Per-channel scaler over `[ndvi, temperature, precipitation]`
    pub scaler: StandardScaler,
    /// Trailing days consumed per prediction
    pub sequence_length: usize,
    pub hidden_size: usize,
    /// `[4 * hidden][channels]`
    pub w_ih: Vec<Vec<f64>>,
    /// `[4 * hidden][hidden]`
    pub w_hh: Vec<Vec<f64>>,
    /// `[4 * hidden]`
    pub bias: Vec<f64>,
    pub head: Vec<DenseLayer>,
    #[serde(default)]
    pub target_mean: f64,
    #[serde(default = "default_target_scale")]
    pub target_scale: f64,
}

impl SequenceModel {
    fn check(&self) -> Result<(), String> {
        let channels = SEQUENCE_CHANNELS.len();
        let gates = 4 * self.hidden_size;
        self.scaler.check(channels, "sequence")?;
        if self.sequence_length == 0 || self.hidden_size == 0 {
            return Err("sequence_length and hidden_size must be > 0".to_string());
        }
        if self.w_ih.len() != gates || self.w_ih.iter().any(|r| r.len() != channels) {
            return Err(format!("w_ih must be {gates}x{channels}"));
        }
        if self.w_hh.len() != gates || self.w_hh.iter().any(|r| r.len() != self.hidden_size) {
            return Err(format!("w_hh must be {gates}x{}", self.hidden_size));
        }
        if self.bias.len() != gates {
            return Err(format!("bias must have {gates} entries"));
        }
        check_layers(&self.head, self.hidden_size).map_err(|e| format!("head: {e}"))
    }

    fn predict(&self, sequence: &[[f64; 3]]) -> Result<f64, InferenceError> {
        if sequence.len() < self.sequence_length {
            return Err(InferenceError::SequenceTooShort {
                required: self.sequence_length,
                actual: sequence.len(),
            });
        }
        let window = &sequence[sequence.len() - self.sequence_length..];
        let hs = self.hidden_size;
        let mut h = vec![0.0; hs];
        let mut c = vec![0.0; hs];

        for step in window {
            let x = self.scaler.transform(step)?;
            let gates: Vec<f64> = (0..4 * hs)
                .map(|g| {
                    let wx: f64 = self.w_ih[g].iter().zip(&x).map(|(w, v)| w * v).sum();
                    let wh: f64 = self.w_hh[g].iter().zip(&h).map(|(w, v)| w * v).sum();
                    wx + wh + self.bias[g]
                })
                .collect();
            for j in 0..hs {
                let i = sigmoid(gates[j]);
                let f = sigmoid(gates[hs + j]);
                let g = gates[2 * hs + j].tanh();
                let o = sigmoid(gates[3 * hs + j]);
                c[j] = f * c[j] + i * g;
                h[j] = o * c[j].tanh();
            }
        }

        Ok(forward_layers(&self.head, h) * self.target_scale + self.target_mean)
    }
}

// ============================================================================
// Predictor
// ============================================================================

/// One trained ensemble member.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictor {
    Sequence(SequenceModel),
    Tree(RandomForestModel),
    FeedForward(FeedForwardModel),
    Boosted(BoostedModel),
}

impl Predictor {
    pub const fn kind(&self) -> ModelKind {
        match self {
            Self::Sequence(_) => ModelKind::Sequence,
            Self::Tree(_) => ModelKind::Tree,
            Self::FeedForward(_) => ModelKind::FeedForward,
            Self::Boosted(_) => ModelKind::Boosted,
        }
    }

    /// Parse the artifact body for `kind`.
    pub fn from_json(kind: ModelKind, bytes: &[u8], path: &str) -> Result<Self, ArtifactError> {
        let parse_err = |source: serde_json::Error| ArtifactError::Parse {
            path: path.to_string(),
            source: std::sync::Arc::new(source),
        };
        Ok(match kind {
            ModelKind::Sequence => Self::Sequence(serde_json::from_slice(bytes).map_err(parse_err)?),
            ModelKind::Tree => Self::Tree(serde_json::from_slice(bytes).map_err(parse_err)?),
            ModelKind::FeedForward => {
                Self::FeedForward(serde_json::from_slice(bytes).map_err(parse_err)?)
            }
            ModelKind::Boosted => Self::Boosted(serde_json::from_slice(bytes).map_err(parse_err)?),
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Sequence(m) => serde_json::to_vec(m),
            Self::Tree(m) => serde_json::to_vec(m),
            Self::FeedForward(m) => serde_json::to_vec(m),
            Self::Boosted(m) => serde_json::to_vec(m),
        }
    }

    /// Structural validation against the flat feature width.
    pub fn validate(&self, n_features: usize) -> Result<(), ArtifactError> {
        let result = match self {
            Self::Sequence(m) => m.check(),
            Self::Tree(m) => m
                .scaler
                .as_ref()
                .map_or(Ok(()), |s| s.check(n_features, "tree"))
                .and_then(|()| check_trees(&m.trees, n_features)),
            Self::FeedForward(m) => m
                .scaler
                .check(n_features, "feed_forward")
                .and_then(|()| check_layers(&m.layers, n_features)),
            Self::Boosted(m) => m
                .scaler
                .as_ref()
                .map_or(Ok(()), |s| s.check(n_features, "boosted"))
                .and_then(|()| check_trees(&m.trees, n_features))
                .and_then(|()| {
                    if m.learning_rate.is_finite() && m.base_score.is_finite() {
                        Ok(())
                    } else {
                        Err("base_score and learning_rate must be finite".to_string())
                    }
                }),
        };
        result.map_err(|reason| ArtifactError::Invalid {
            kind: self.kind().to_string(),
            reason,
        })
    }

    /// Raw day-offset prediction, before output validation.
    pub fn predict(&self, rep: &FeatureRepresentation) -> Result<f64, InferenceError> {
        match self {
            Self::Sequence(m) => m.predict(&rep.sequence),
            Self::Tree(m) => {
                let x = scale_optional(m.scaler.as_ref(), &rep.flat)?;
                #[allow(clippy::cast_precision_loss)]
                let n = m.trees.len() as f64;
                Ok(m.trees.iter().map(|t| t.predict(&x)).sum::<f64>() / n)
            }
            Self::FeedForward(m) => {
                let x = m.scaler.transform(&rep.flat)?;
                Ok(forward_layers(&m.layers, x) * m.target_scale + m.target_mean)
            }
            Self::Boosted(m) => {
                let x = scale_optional(m.scaler.as_ref(), &rep.flat)?;
                let sum: f64 = m.trees.iter().map(|t| t.predict(&x)).sum();
                Ok(m.base_score + m.learning_rate * sum)
            }
        }
    }
}

fn scale_optional(scaler: Option<&StandardScaler>, x: &[f64]) -> Result<Vec<f64>, InferenceError> {
    scaler.map_or_else(|| Ok(x.to_vec()), |s| s.transform(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(flat: Vec<f64>, days: usize) -> FeatureRepresentation {
        FeatureRepresentation {
            schema_version: 1,
            names: (0..flat.len()).map(|i| format!("f{i}")).collect(),
            flat,
            sequence: vec![[0.5, 12.0, 0.0]; days],
        }
    }

    fn stump(feature: usize, threshold: f64, low: f64, high: f64) -> RegressionTree {
        RegressionTree {
            nodes: vec![
                TreeNode::Split { feature, threshold, left: 1, right: 2 },
                TreeNode::Leaf { value: low },
                TreeNode::Leaf { value: high },
            ],
        }
    }

    #[test]
    fn test_forest_averages_trees() {
        let forest = Predictor::Tree(RandomForestModel {
            scaler: None,
            trees: vec![stump(0, 0.5, 10.0, 40.0), stump(1, 0.5, 20.0, 60.0)],
        });
        forest.validate(2).unwrap();
        // x0 <= 0.5 -> 10, x1 > 0.5 -> 60
        let out = forest.predict(&rep(vec![0.2, 0.9], 1)).unwrap();
        assert!((out - 35.0).abs() < 1e-12);
    }

    #[test]
    fn test_boosted_sums_scaled_trees() {
        let model = Predictor::Boosted(BoostedModel {
            scaler: None,
            base_score: 30.0,
            learning_rate: 0.5,
            trees: vec![stump(0, 0.5, -4.0, 4.0), stump(0, 0.5, -2.0, 2.0)],
        });
        let out = model.predict(&rep(vec![0.9], 1)).unwrap();
        assert!((out - 33.0).abs() < 1e-12);
    }

    #[test]
    fn test_tree_with_backward_child_is_rejected() {
        let tree = RegressionTree {
            nodes: vec![
                TreeNode::Split { feature: 0, threshold: 0.5, left: 1, right: 0 },
                TreeNode::Leaf { value: 1.0 },
            ],
        };
        let forest = Predictor::Tree(RandomForestModel { scaler: None, trees: vec![tree] });
        assert!(matches!(forest.validate(1), Err(ArtifactError::Invalid { .. })));
    }

    #[test]
    fn test_feed_forward_linear_head() {
        let model = Predictor::FeedForward(FeedForwardModel {
            scaler: StandardScaler { mean: vec![1.0, 0.0], scale: vec![2.0, 1.0] },
            layers: vec![DenseLayer {
                weights: vec![vec![1.0, 1.0]],
                bias: vec![0.0],
                activation: Activation::Linear,
            }],
            target_mean: 20.0,
            target_scale: 10.0,
        });
        model.validate(2).unwrap();
        // ((3-1)/2 + 0.5) * 10 + 20
        let out = model.predict(&rep(vec![3.0, 0.5], 1)).unwrap();
        assert!((out - 35.0).abs() < 1e-12);
    }

    #[test]
    fn test_feed_forward_shape_mismatch_is_inference_error() {
        let model = Predictor::FeedForward(FeedForwardModel {
            scaler: StandardScaler::identity(3),
            layers: vec![DenseLayer {
                weights: vec![vec![1.0, 1.0, 1.0]],
                bias: vec![0.0],
                activation: Activation::Linear,
            }],
            target_mean: 0.0,
            target_scale: 1.0,
        });
        assert_eq!(
            model.predict(&rep(vec![1.0], 1)),
            Err(InferenceError::InputShape { expected: 3, actual: 1 })
        );
    }

    fn constant_lstm(sequence_length: usize, output: f64) -> SequenceModel {
        SequenceModel {
            scaler: StandardScaler::identity(3),
            sequence_length,
            hidden_size: 1,
            w_ih: vec![vec![0.0; 3]; 4],
            w_hh: vec![vec![0.0]; 4],
            bias: vec![0.0; 4],
            head: vec![DenseLayer {
                weights: vec![vec![0.0]],
                bias: vec![output],
                activation: Activation::Linear,
            }],
            target_mean: 0.0,
            target_scale: 1.0,
        }
    }

    #[test]
    fn test_sequence_model_needs_full_window() {
        let model = Predictor::Sequence(constant_lstm(60, 25.0));
        model.validate(54).unwrap();
        assert_eq!(model.predict(&rep(vec![], 90)).unwrap(), 25.0);
        assert_eq!(
            model.predict(&rep(vec![], 45)),
            Err(InferenceError::SequenceTooShort { required: 60, actual: 45 })
        );
    }

    #[test]
    fn test_lstm_state_evolves() {
        let mut lstm = constant_lstm(5, 0.0);
        lstm.w_ih = vec![vec![1.0, 0.0, 0.0]; 4];
        lstm.head[0].weights = vec![vec![10.0]];
        let model = Predictor::Sequence(lstm);
        let out = model.predict(&rep(vec![], 5)).unwrap();
        assert!(out > 0.0 && out < 10.0);
    }

    #[test]
    fn test_json_round_trip_by_kind() {
        let model = Predictor::Sequence(constant_lstm(10, 5.0));
        let bytes = model.to_json().unwrap();
        let parsed = Predictor::from_json(ModelKind::Sequence, &bytes, "sequence.json").unwrap();
        assert_eq!(parsed, model);
        assert!(Predictor::from_json(ModelKind::Tree, &bytes, "tree.json").is_err());
    }
}

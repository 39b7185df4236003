//! ONNX inference for the two-headed scheduling classifier using tract
//!
//! The network takes four standardized features and produces a
//! P-core probability plus a Low/Medium/High frequency distribution.

use super::normalization::{NormalizationParams, NormalizedVector};
use super::DecisionModel;
use crate::error::{SchedError, SchedResult};
use crate::models::NUM_FEATURES;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Maximum inference latency before warning
const MAX_INFERENCE_MS: u128 = 5;

/// Tolerance on the frequency distribution summing to one
const DISTRIBUTION_TOLERANCE: f64 = 1e-3;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Raw classifier output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOutput {
    pub core_probability: f64,
    pub freq_distribution: [f64; 3],
}

impl ModelOutput {
    pub fn new(core_probability: f64, freq_distribution: [f64; 3]) -> Self {
        Self {
            core_probability,
            freq_distribution,
        }
    }

    /// Probability in [0, 1] and a distribution summing to ~1
    pub fn is_well_formed(&self) -> bool {
        let p_ok = (0.0..=1.0).contains(&self.core_probability);
        let d_ok = self
            .freq_distribution
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0);
        let sum: f64 = self.freq_distribution.iter().sum();
        p_ok && d_ok && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE
    }

    /// Clamp the probability and renormalize the distribution.
    /// A non-finite probability maps to 0; a distribution with no mass maps to uniform.
    pub fn sanitized(&self) -> Self {
        let core_probability = if self.core_probability.is_finite() {
            self.core_probability.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut dist = self.freq_distribution.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
        let sum: f64 = dist.iter().sum();
        if sum > f64::EPSILON {
            for v in dist.iter_mut() {
                *v /= sum;
            }
        } else {
            dist = [1.0 / 3.0; 3];
        }

        Self {
            core_probability,
            freq_distribution: dist,
        }
    }
}

/// Decode tract outputs into a `ModelOutput`.
///
/// Accepts either two heads (one value and three values, in any order) or a
/// single output laid out `[p, f_low, f_med, f_high]`.
pub fn decode_outputs(outputs: &[Vec<f32>]) -> Result<ModelOutput> {
    match outputs {
        [single] if single.len() >= 4 => Ok(ModelOutput::new(
            single[0] as f64,
            [single[1] as f64, single[2] as f64, single[3] as f64],
        )),
        [a, b, ..] => {
            let (core, freq) = match (a.len(), b.len()) {
                (1, 3) => (a, b),
                (3, 1) => (b, a),
                (la, lb) => anyhow::bail!(
                    "Unexpected head sizes {} and {}, expected 1 and 3",
                    la,
                    lb
                ),
            };
            Ok(ModelOutput::new(
                core[0] as f64,
                [freq[0] as f64, freq[1] as f64, freq[2] as f64],
            ))
        }
        _ => anyhow::bail!("Model produced {} outputs, expected 2 heads", outputs.len()),
    }
}

/// Decision model backed by an optimized tract plan
pub struct OnnxDecisionModel {
    model: TractModel,
    version: String,
}

impl OnnxDecisionModel {
    /// Load the weights file; the file stem becomes the model version
    pub fn load(path: &Path) -> SchedResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| SchedError::model_load(path, e))?;
        let version = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        Self::from_bytes(&bytes, version)
            .map_err(|e| SchedError::model_load(path, format!("{:#}", e)))
    }

    /// Create a model from ONNX bytes
    pub fn from_bytes(model_bytes: &[u8], version: impl Into<String>) -> Result<Self> {
        let model = Self::build_plan(model_bytes)?;
        Ok(Self {
            model,
            version: version.into(),
        })
    }

    fn build_plan(model_bytes: &[u8]) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, NUM_FEATURES]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    fn to_tensor(input: &NormalizedVector) -> Result<Tensor> {
        let array = tract_ndarray::Array2::from_shape_vec((1, NUM_FEATURES), input.to_f32())
            .context("Failed to shape input tensor")?;
        Ok(array.into())
    }
}

impl DecisionModel for OnnxDecisionModel {
    fn infer(&self, input: &NormalizedVector) -> Result<ModelOutput> {
        let start = Instant::now();

        let tensor = Self::to_tensor(input)?;
        let result = self.model.run(tvec!(tensor.into()))?;
        let outputs = result
            .iter()
            .map(|t| {
                t.to_array_view::<f32>()
                    .map(|view| view.iter().copied().collect::<Vec<f32>>())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(
                elapsed_ms = elapsed.as_millis(),
                "Inference exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        decode_outputs(&outputs)
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// Weights and normalization loaded together at startup
#[derive(Clone)]
pub struct ModelArtifact {
    pub model: Arc<dyn DecisionModel>,
    pub normalization: NormalizationParams,
}

impl ModelArtifact {
    pub fn new(model: Arc<dyn DecisionModel>, normalization: NormalizationParams) -> Self {
        Self {
            model,
            normalization,
        }
    }

    /// Load both files. Any failure is fatal to the caller.
    pub fn load(weights_path: &Path, scaler_path: &Path) -> SchedResult<Self> {
        let normalization = NormalizationParams::load(scaler_path)?;
        let model = OnnxDecisionModel::load(weights_path)?;

        info!(
            weights = %weights_path.display(),
            scaler = %scaler_path.display(),
            version = %model.version(),
            "Decision model loaded"
        );

        Ok(Self {
            model: Arc::new(model),
            normalization,
        })
    }

    pub fn version(&self) -> &str {
        self.model.version()
    }
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("version", &self.model.version())
            .field("normalization", &self.normalization)
            .finish()
    }
}

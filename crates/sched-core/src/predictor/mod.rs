//! Decision pipeline: features, normalization, model inference, policies

mod features;
mod inference;
mod normalization;
mod policy;

pub use features::{CacheMissModel, EstimatorConfig, FeatureEstimator};
pub use inference::{decode_outputs, ModelArtifact, ModelOutput, OnnxDecisionModel};
pub use normalization::{NormalizationParams, NormalizedVector};
pub use policy::{
    argmax_freq, PolicyConfig, PolicyEngine, PolicyOutcome, ThermalScope,
    DEFAULT_BASELINE_THRESHOLD, DEFAULT_THERMAL_LIMIT,
};

use anyhow::Result;

/// Pretrained classifier consumed through a narrow inference contract
pub trait DecisionModel: Send + Sync {
    /// Standardized features in, core probability and frequency distribution out
    fn infer(&self, input: &NormalizedVector) -> Result<ModelOutput>;

    /// Identifier of the loaded weights
    fn version(&self) -> &str;
}

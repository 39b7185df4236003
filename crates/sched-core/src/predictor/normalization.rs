//! Per-feature standardization parameters
//!
//! Loaded once at startup from the JSON export of the training scaler
//! (`{"mean": [..], "scale": [..]}`) and immutable afterwards. Both arrays
//! must hold exactly one entry per feature; serde rejects any other length.

use crate::error::{SchedError, SchedResult};
use crate::models::{FeatureVector, NUM_FEATURES};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Standardized features, `(x - mean) / scale` per position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedVector(pub [f64; NUM_FEATURES]);

impl NormalizedVector {
    pub fn to_f32(&self) -> Vec<f32> {
        self.0.iter().map(|v| *v as f32).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub mean: [f64; NUM_FEATURES],
    pub scale: [f64; NUM_FEATURES],
}

impl NormalizationParams {
    /// Build and validate parameters
    pub fn new(mean: [f64; NUM_FEATURES], scale: [f64; NUM_FEATURES]) -> SchedResult<Self> {
        let params = Self { mean, scale };
        params.validate()?;
        Ok(params)
    }

    /// Parameters that leave features unchanged
    pub fn identity() -> Self {
        Self {
            mean: [0.0; NUM_FEATURES],
            scale: [1.0; NUM_FEATURES],
        }
    }

    /// Read and validate the scaler artifact
    pub fn load(path: &Path) -> SchedResult<Self> {
        let data = std::fs::read(path).map_err(|e| SchedError::model_load(path, e))?;
        let params: Self =
            serde_json::from_slice(&data).map_err(|e| SchedError::model_load(path, e))?;
        params
            .validate()
            .map_err(|e| SchedError::model_load(path, e))?;
        Ok(params)
    }

    /// Write the parameters as JSON
    pub fn save(&self, path: &Path) -> SchedResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| SchedError::Normalization(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| SchedError::Normalization(e.to_string()))
    }

    pub fn validate(&self) -> SchedResult<()> {
        if let Some(i) = self.mean.iter().position(|m| !m.is_finite()) {
            return Err(SchedError::Normalization(format!(
                "mean[{}] is not finite",
                i
            )));
        }
        if let Some(i) = self
            .scale
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(SchedError::Normalization(format!(
                "scale[{}] must be finite and non-zero",
                i
            )));
        }
        Ok(())
    }

    pub fn normalize(&self, features: &FeatureVector) -> NormalizedVector {
        let raw = features.as_array();
        NormalizedVector(std::array::from_fn(|i| (raw[i] - self.mean[i]) / self.scale[i]))
    }
}

//! Core library for the heterogeneous-core scheduling simulator
//!
//! This crate provides:
//! - Telemetry sampling from the host (or a seeded synthetic source)
//! - Feature estimation, normalization and ONNX inference
//! - AI and rule-based baseline scheduling policies with thermal override
//! - Simulated power and cumulative energy accounting
//! - A process-based CPU stress load generator
//! - Health checks and observability

pub mod accounting;
pub mod collector;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod stress;

pub use engine::{EngineConfig, TickEngine};
pub use error::{SchedError, SchedResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};

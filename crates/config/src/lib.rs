//! Configuration management for the voice tutor
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, `config/{env}.toml`)
//! - Environment variables (`VOICE_TUTOR__SECTION__KEY`)

pub mod constants;
pub mod routing;
pub mod settings;

pub use routing::{ConditionSnapshot, NetworkType, RoutingCondition, RoutingRule, ThermalState};
pub use settings::{
    load_settings, load_settings_from, BargeInConfig, CandidateConfig, DegradedMessages,
    ObservabilityConfig, PlaybackConfig, ProvidersConfig, ResumeMode, ResumePolicyConfig,
    RuntimeEnvironment, ServerConfig, SessionConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

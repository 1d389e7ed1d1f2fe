//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use voice_tutor_core::CapabilityKind;

use crate::constants::{barge_in, degraded, endpoints, playback, providers, resume, session};
use crate::routing::RoutingRule;
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Turn-taking
    #[serde(default)]
    pub session: SessionConfig,

    /// Barge-in detection
    #[serde(default)]
    pub barge_in: BargeInConfig,

    /// Resume-vs-interjection policy after an answered barge-in
    #[serde(default)]
    pub resume_policy: ResumePolicyConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Provider candidates, routing and health
    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Turn-taking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    /// Baseline VAD confidence that counts as user speech
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,

    #[serde(default = "default_resume_after_silence_ms")]
    pub resume_after_silence_ms: u64,

    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub degraded_messages: DegradedMessages,
}

fn default_silence_timeout_ms() -> u64 {
    session::SILENCE_TIMEOUT_MS
}

fn default_speech_threshold() -> f32 {
    session::SPEECH_THRESHOLD
}

fn default_resume_after_silence_ms() -> u64 {
    session::RESUME_AFTER_SILENCE_MS
}

fn default_max_context_turns() -> usize {
    session::MAX_CONTEXT_TURNS
}

fn default_system_prompt() -> String {
    session::SYSTEM_PROMPT.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout_ms(),
            speech_threshold: default_speech_threshold(),
            resume_after_silence_ms: default_resume_after_silence_ms(),
            max_context_turns: default_max_context_turns(),
            system_prompt: default_system_prompt(),
            degraded_messages: DegradedMessages::default(),
        }
    }
}

/// Short answers given instead of silence when a capability is exhausted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedMessages {
    #[serde(default = "default_degraded_stt")]
    pub stt: String,
    #[serde(default = "default_degraded_llm")]
    pub llm: String,
    #[serde(default = "default_degraded_tts")]
    pub tts: String,
}

fn default_degraded_stt() -> String {
    degraded::STT.to_string()
}

fn default_degraded_llm() -> String {
    degraded::LLM.to_string()
}

fn default_degraded_tts() -> String {
    degraded::TTS.to_string()
}

impl Default for DegradedMessages {
    fn default() -> Self {
        Self {
            stt: default_degraded_stt(),
            llm: default_degraded_llm(),
            tts: default_degraded_tts(),
        }
    }
}

impl DegradedMessages {
    pub fn for_kind(&self, kind: CapabilityKind) -> &str {
        match kind {
            CapabilityKind::Stt => &self.stt,
            CapabilityKind::Llm => &self.llm,
            CapabilityKind::Tts => &self.tts,
        }
    }
}

/// Barge-in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_barge_in_threshold")]
    pub threshold: f32,

    #[serde(default = "default_confirm_window_ms")]
    pub confirm_window_ms: u64,

    #[serde(default = "default_min_sustain_ms")]
    pub min_sustain_ms: u64,

    #[serde(default = "default_preroll_ms")]
    pub preroll_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_barge_in_threshold() -> f32 {
    barge_in::THRESHOLD
}

fn default_confirm_window_ms() -> u64 {
    barge_in::CONFIRM_WINDOW_MS
}

fn default_min_sustain_ms() -> u64 {
    barge_in::MIN_SUSTAIN_MS
}

fn default_preroll_ms() -> u64 {
    barge_in::PREROLL_MS
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_barge_in_threshold(),
            confirm_window_ms: default_confirm_window_ms(),
            min_sustain_ms: default_min_sustain_ms(),
            preroll_ms: default_preroll_ms(),
        }
    }
}

/// How a post-interjection utterance is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Resume on a short continuation cue, otherwise treat as a new question
    #[default]
    ContinuationCue,
    /// Always resume the interrupted response after answering
    AlwaysResume,
    /// Never resume on speech; only silence resumes
    AlwaysInterject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePolicyConfig {
    #[serde(default)]
    pub mode: ResumeMode,

    #[serde(default = "default_continuation_cues")]
    pub continuation_cues: Vec<String>,

    #[serde(default = "default_max_cue_words")]
    pub max_cue_words: usize,
}

fn default_continuation_cues() -> Vec<String> {
    resume::CONTINUATION_CUES.iter().map(|c| c.to_string()).collect()
}

fn default_max_cue_words() -> usize {
    resume::MAX_CUE_WORDS
}

impl Default for ResumePolicyConfig {
    fn default() -> Self {
        Self {
            mode: ResumeMode::default(),
            continuation_cues: default_continuation_cues(),
            max_cue_words: default_max_cue_words(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Playback clock granularity; truncation happens on these boundaries
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
}

fn default_frame_ms() -> u64 {
    playback::FRAME_MS
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_ms: default_frame_ms(),
        }
    }
}

/// One provider candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub id: String,
    pub kind: CapabilityKind,

    /// Declared fallback order; lower goes first
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_true")]
    pub requires_network: bool,

    #[serde(default)]
    pub cost_per_unit: f64,

    /// Base URL for the HTTP adapter
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_priority() -> u32 {
    providers::DEFAULT_PRIORITY
}

/// Provider resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_health_cooldown_ms")]
    pub health_cooldown_ms: u64,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Forces one provider id to the head of every chain it can serve
    #[serde(default)]
    pub global_override: Option<String>,

    /// Per-capability manual override
    #[serde(default)]
    pub overrides: BTreeMap<CapabilityKind, String>,

    /// Declared default per capability
    #[serde(default)]
    pub defaults: BTreeMap<CapabilityKind, String>,

    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,

    #[serde(default)]
    pub candidates: Vec<CandidateConfig>,

    /// Session cost budget; `None` means unlimited
    #[serde(default)]
    pub cost_budget: Option<f64>,
}

fn default_provider_timeout_ms() -> u64 {
    providers::TIMEOUT_MS
}

fn default_health_cooldown_ms() -> u64 {
    providers::HEALTH_COOLDOWN_MS
}

fn default_probe_interval_ms() -> u64 {
    providers::PROBE_INTERVAL_MS
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_provider_timeout_ms(),
            health_cooldown_ms: default_health_cooldown_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            global_override: None,
            overrides: BTreeMap::new(),
            defaults: BTreeMap::new(),
            routing_rules: Vec::new(),
            candidates: Vec::new(),
            cost_budget: None,
        }
    }
}

impl ProvidersConfig {
    pub fn candidate(&self, id: &str) -> Option<&CandidateConfig> {
        self.candidates.iter().find(|c| c.id == id)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    endpoints::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    endpoints::DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_session()?;
        self.validate_barge_in()?;
        self.validate_playback()?;
        self.validate_providers()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_session(&self) -> Result<(), ConfigError> {
        let s = &self.session;

        if s.silence_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.silence_timeout_ms".to_string(),
                message: "Must be at least 1ms".to_string(),
            });
        }

        if !(s.speech_threshold > 0.0 && s.speech_threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "session.speech_threshold".to_string(),
                message: format!("Must be in (0.0, 1.0], got {}", s.speech_threshold),
            });
        }

        if s.resume_after_silence_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.resume_after_silence_ms".to_string(),
                message: "Must be at least 1ms".to_string(),
            });
        }

        Ok(())
    }

    fn validate_barge_in(&self) -> Result<(), ConfigError> {
        let b = &self.barge_in;

        if !(b.threshold > 0.0 && b.threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "barge_in.threshold".to_string(),
                message: format!("Must be in (0.0, 1.0], got {}", b.threshold),
            });
        }

        if b.confirm_window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "barge_in.confirm_window_ms".to_string(),
                message: "Must be at least 1ms".to_string(),
            });
        }

        if b.threshold < self.session.speech_threshold {
            tracing::warn!(
                barge_in_threshold = b.threshold,
                speech_threshold = self.session.speech_threshold,
                "Barge-in threshold is below the turn-taking threshold; speaker echo may trigger interruptions"
            );
        }

        Ok(())
    }

    fn validate_playback(&self) -> Result<(), ConfigError> {
        let frame_ms = self.playback.frame_ms;
        if frame_ms == 0 || frame_ms > playback::MAX_FRAME_MS {
            return Err(ConfigError::InvalidValue {
                field: "playback.frame_ms".to_string(),
                message: format!("Must be in 1..={}, got {}", playback::MAX_FRAME_MS, frame_ms),
            });
        }
        Ok(())
    }

    pub(crate) fn validate_providers(&self) -> Result<(), ConfigError> {
        let p = &self.providers;

        if p.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "providers.timeout_ms".to_string(),
                message: "Must be at least 1ms".to_string(),
            });
        }

        if p.health_cooldown_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "providers.health_cooldown_ms".to_string(),
                message: "Must be at least 1ms".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for candidate in &p.candidates {
            if candidate.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "providers.candidates.id".to_string(),
                    message: "Candidate id cannot be empty".to_string(),
                });
            }
            if !seen.insert(candidate.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "providers.candidates".to_string(),
                    message: format!("Duplicate candidate id '{}'", candidate.id),
                });
            }
            if candidate.cost_per_unit < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("providers.candidates.{}.cost_per_unit", candidate.id),
                    message: "Cost cannot be negative".to_string(),
                });
            }
        }

        if let Some(id) = &p.global_override {
            if p.candidate(id).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "providers.global_override".to_string(),
                    message: format!("Unknown candidate '{}'", id),
                });
            }
        }

        for (section, map) in [("overrides", &p.overrides), ("defaults", &p.defaults)] {
            for (kind, id) in map {
                match p.candidate(id) {
                    Some(c) if c.kind == *kind => {},
                    Some(c) => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("providers.{}.{}", section, kind),
                            message: format!("Candidate '{}' serves {}, not {}", id, c.kind, kind),
                        })
                    },
                    None => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("providers.{}.{}", section, kind),
                            message: format!("Unknown candidate '{}'", id),
                        })
                    },
                }
            }
        }

        for rule in &p.routing_rules {
            if p.candidate(&rule.target_provider_id).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "providers.routing_rules".to_string(),
                    message: format!("Rule targets unknown candidate '{}'", rule.target_provider_id),
                });
            }
        }

        if let Some(budget) = p.cost_budget {
            if budget < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "providers.cost_budget".to_string(),
                    message: format!("Cannot be negative, got {}", budget),
                });
            }
        }

        if self.environment.is_strict() {
            for kind in CapabilityKind::ALL {
                if !p.candidates.iter().any(|c| c.kind == kind) {
                    return Err(ConfigError::MissingField(format!(
                        "providers.candidates ({} candidate)",
                        kind
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICE_TUTOR__ prefix, `__` separated)
/// 2. config/{env}.toml (if env specified)
/// 3. config/default.toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// [`load_settings`] with an explicit config directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder = builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_TUTOR")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

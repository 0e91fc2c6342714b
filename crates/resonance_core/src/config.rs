use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

/// All feature flags and tuned constants, passed at construction.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResonanceConfig {
    pub render: RenderConfig,
    pub gate: GateConfig,
    pub generation: GenerationConfig,
    pub history: HistoryConfig,
    pub store: StoreConfig,
}

impl ResonanceConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result is validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ResonanceConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, return defaults
    /// with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                if let Err(e) = cfg.validate() {
                    tracing::warn!(
                        "Env overrides produced an invalid config ({}), ignoring them",
                        e
                    );
                    return Self::default();
                }
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RESONANCE_RENDER_ENGINE") {
            if let Some(b) = parse_flag(&v) {
                self.render.engine_enabled = b;
            }
        }
        if let Ok(v) = std::env::var("RESONANCE_MAX_VISIBLE_LINES") {
            if let Ok(n) = v.parse() {
                self.render.max_visible_lines = n;
            }
        }
        if let Ok(v) = std::env::var("RESONANCE_GENERATION_ENABLED") {
            if let Some(b) = parse_flag(&v) {
                self.generation.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("RESONANCE_GENERATION_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.generation.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("RESONANCE_DB_PATH") {
            self.store.db_path = v;
        }
    }

    /// Check cross-field constraints once, at startup.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.gate.validate()?;
        self.render.validate()?;
        if self.generation.timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "generation.timeout_ms",
            });
        }
        if self.history.max_turns == 0 {
            return Err(ConfigError::Zero {
                field: "history.max_turns",
            });
        }
        Ok(())
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

/// Line budgets and render switches.
///
/// The numbers are empirically tuned; keep them as named settings rather than
/// re-deriving them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// When off, replies are sanitized but never rebuilt from external block lists.
    pub engine_enabled: bool,
    /// Visible-line budget for ordinary turns.
    pub max_visible_lines: usize,
    /// Floor for fixed-format diagnostic turns (multi-field layouts).
    pub diagnostic_min_lines: usize,
    /// Hard cap for silence / single-token turns.
    pub silence_max_lines: usize,
    /// Floor for replies planned as several sections.
    pub multi_section_min_lines: usize,
    /// Planned block count at which a reply counts as multi-section.
    pub multi_section_min_blocks: usize,
    /// Last-resort reply when every candidate is empty.
    pub neutral_ack: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            engine_enabled: true,
            max_visible_lines: 8,
            diagnostic_min_lines: 16,
            silence_max_lines: 3,
            multi_section_min_lines: 28,
            multi_section_min_blocks: 3,
            neutral_ack: "I'm here.".to_string(),
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (field, value) in [
            ("render.max_visible_lines", self.max_visible_lines),
            ("render.silence_max_lines", self.silence_max_lines),
            ("render.multi_section_min_blocks", self.multi_section_min_blocks),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.neutral_ack.trim().is_empty() {
            return Err(ConfigError::EmptyNeutralAck);
        }
        Ok(())
    }
}

/// Descent gate thresholds (self-acceptance).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Enter-drop fires at or below this value.
    pub enter_max_self_acceptance: f32,
    /// Recover with a positive emotional code at or above this value.
    pub recover_positive_min: f32,
    /// Recover from a high depth band at or above this value.
    pub recover_high_depth_min: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enter_max_self_acceptance: 0.45,
            recover_positive_min: 0.58,
            recover_high_depth_min: 0.62,
        }
    }
}

impl GateConfig {
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (field, value) in [
            ("gate.enter_max_self_acceptance", self.enter_max_self_acceptance),
            ("gate.recover_positive_min", self.recover_positive_min),
            ("gate.recover_high_depth_min", self.recover_high_depth_min),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        // Enter and exit must not overlap, otherwise the gate can flap.
        let recover = self.recover_positive_min.min(self.recover_high_depth_min);
        if self.enter_max_self_acceptance >= recover {
            return Err(ConfigError::InvertedThresholds {
                enter: self.enter_max_self_acceptance,
                recover,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 8_000,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// How many recent turns are forwarded to the generator.
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_turns: 12 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
    /// Extra attempts for the turn-end write before it is dropped.
    pub commit_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "resonance.db".to_string(),
            commit_retries: 1,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ResonanceConfig::default();
        assert!(cfg.render.engine_enabled);
        assert_eq!(cfg.render.max_visible_lines, 8);
        assert_eq!(cfg.render.diagnostic_min_lines, 16);
        assert_eq!(cfg.render.silence_max_lines, 3);
        assert_eq!(cfg.render.multi_section_min_lines, 28);
        assert_eq!(cfg.gate.enter_max_self_acceptance, 0.45);
        assert_eq!(cfg.history.max_turns, 12);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[render]
max_visible_lines = 12
"#;
        let cfg: ResonanceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.render.max_visible_lines, 12);
        // Defaults for unspecified fields
        assert_eq!(cfg.render.silence_max_lines, 3);
        assert_eq!(cfg.gate.recover_positive_min, 0.58);
        assert_eq!(cfg.generation.timeout_ms, 8_000);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[render]
engine_enabled = false
max_visible_lines = 10
diagnostic_min_lines = 20
silence_max_lines = 2
multi_section_min_lines = 30
multi_section_min_blocks = 4
neutral_ack = "Mm."

[gate]
enter_max_self_acceptance = 0.4
recover_positive_min = 0.6
recover_high_depth_min = 0.65

[generation]
enabled = false
timeout_ms = 2500

[history]
max_turns = 6

[store]
db_path = "data/resonance.db"
commit_retries = 3
"#;
        let cfg: ResonanceConfig = toml::from_str(toml_str).unwrap();
        assert!(!cfg.render.engine_enabled);
        assert_eq!(cfg.render.multi_section_min_blocks, 4);
        assert_eq!(cfg.render.neutral_ack, "Mm.");
        assert_eq!(cfg.gate.recover_high_depth_min, 0.65);
        assert!(!cfg.generation.enabled);
        assert_eq!(cfg.generation.timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.history.max_turns, 6);
        assert_eq!(cfg.store.commit_retries, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlapping_thresholds() {
        let mut cfg = ResonanceConfig::default();
        cfg.gate.enter_max_self_acceptance = 0.7;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvertedThresholds { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut cfg = ResonanceConfig::default();
        cfg.gate.recover_high_depth_min = 1.5;
        assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut cfg = ResonanceConfig::default();
        cfg.render.max_visible_lines = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Zero {
                field: "render.max_visible_lines"
            })
        );
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        // Part 1: env overrides
        std::env::set_var("RESONANCE_MAX_VISIBLE_LINES", "14");
        std::env::set_var("RESONANCE_RENDER_ENGINE", "off");

        let mut cfg = ResonanceConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.render.max_visible_lines, 14);
        assert!(!cfg.render.engine_enabled);

        // Clean up env vars before testing defaults
        std::env::remove_var("RESONANCE_MAX_VISIBLE_LINES");
        std::env::remove_var("RESONANCE_RENDER_ENGINE");

        // Part 2: nonexistent path returns defaults (no env interference)
        let cfg = ResonanceConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.render.max_visible_lines, 8);
    }
}

//! Relay configuration, assembled once at startup.
//!
//! | Key | Env | Default | Range |
//! |-----|-----|---------|-------|
//! | gemini.api_key | GEMINI_API_KEY | none | required |
//! | gemini.model | GEMINI_MODEL | gemini-3-flash-preview | non-empty |
//! | gemini.api_base | KAMOS__GEMINI__API_BASE | generativelanguage v1beta | |
//! | kamos.api_url | KAMOS_API_URL | Kamos Cloud Run endpoint | |
//! | kamos.api_token | KAMOS_API_TOKEN | none | required by the gateway |
//! | kamos.func_url | KAMOS_FUNC_URL | local gateway `/ask` | |
//! | kamos.timeout_secs | KAMOS__KAMOS__TIMEOUT_SECS | 120 | 1..=600 |
//! | relay.phase_count | KAMOS__RELAY__PHASE_COUNT | 3 | 1..=8 |
//! | relay.bind_addr | KAMOS__RELAY__BIND_ADDR | 127.0.0.1:5001 | |
//! | orchestrator.matrix_max | KAMOS__ORCHESTRATOR__MATRIX_MAX | 5 | 1..=5 |
//! | orchestrator.output_dir | KAMOS__ORCHESTRATOR__OUTPUT_DIR | outputs | |
//!
//! Precedence: defaults < TOML file (`KAMOS_CONFIG`, else `config/kamos.toml`) <
//! `KAMOS__SECTION__KEY` variables < the well-known variables above.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PHASE_COUNT: u32 = 3;
pub const PHASE_COUNT_RANGE: RangeInclusive<u32> = 1..=8;
/// Hard ceiling for parallel sessions in one matrix run.
pub const MATRIX_MAX_LIMIT: usize = 5;
pub const TIMEOUT_SECS_RANGE: RangeInclusive<u64> = 1..=600;

const DEFAULT_CONFIG_PATH: &str = "config/kamos.toml";
const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_KAMOS_API_URL: &str = "https://processmcprequest-x2panoolwa-an.a.run.app";
const DEFAULT_KAMOS_FUNC_URL: &str = "http://127.0.0.1:5001/ask";

/// Well-known variable names mapped onto config keys.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("GEMINI_API_KEY", "gemini.api_key"),
    ("GEMINI_MODEL", "gemini.model"),
    ("KAMOS_API_URL", "kamos.api_url"),
    ("KAMOS_API_TOKEN", "kamos.api_token"),
    ("KAMOS_FUNC_URL", "kamos.func_url"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KamosSettings {
    pub api_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Remote phase loop endpoint used by the CLI sessions.
    pub func_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    pub phase_count: u32,
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub matrix_max: usize,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub gemini: GeminiSettings,
    pub kamos: KamosSettings,
    pub relay: LoopSettings,
    pub orchestrator: OrchestratorSettings,
}

impl RelayConfig {
    /// Load from the process environment and the optional config file.
    pub fn load() -> RelayResult<Self> {
        let path = std::env::var("KAMOS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(Some(Path::new(&path)), vars)
    }

    /// Load from an explicit file and variable map. A missing file is not an error.
    pub fn load_from(path: Option<&Path>, vars: HashMap<String, String>) -> RelayResult<Self> {
        let mut builder = config::Config::builder()
            .set_default("gemini.model", DEFAULT_GEMINI_MODEL)?
            .set_default("gemini.api_base", DEFAULT_GEMINI_API_BASE)?
            .set_default("kamos.api_url", DEFAULT_KAMOS_API_URL)?
            .set_default("kamos.func_url", DEFAULT_KAMOS_FUNC_URL)?
            .set_default("kamos.timeout_secs", 120_i64)?
            .set_default("relay.phase_count", DEFAULT_PHASE_COUNT as i64)?
            .set_default("relay.bind_addr", "127.0.0.1:5001")?
            .set_default("orchestrator.matrix_max", MATRIX_MAX_LIMIT as i64)?
            .set_default("orchestrator.output_dir", "outputs")?;

        if let Some(path) = path.filter(|p| p.exists()) {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("KAMOS")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        for (var, key) in ENV_ALIASES {
            let value = vars
                .get(*var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config: RelayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks for the tunable constants.
    pub fn validate(&self) -> RelayResult<()> {
        if !PHASE_COUNT_RANGE.contains(&self.relay.phase_count) {
            return Err(RelayError::Configuration(format!(
                "relay.phase_count must be within {}..={}, got {}",
                PHASE_COUNT_RANGE.start(),
                PHASE_COUNT_RANGE.end(),
                self.relay.phase_count
            )));
        }
        if !(1..=MATRIX_MAX_LIMIT).contains(&self.orchestrator.matrix_max) {
            return Err(RelayError::Configuration(format!(
                "orchestrator.matrix_max must be within 1..={}, got {}",
                MATRIX_MAX_LIMIT, self.orchestrator.matrix_max
            )));
        }
        if !TIMEOUT_SECS_RANGE.contains(&self.kamos.timeout_secs) {
            return Err(RelayError::Configuration(format!(
                "kamos.timeout_secs must be within {}..={}, got {}",
                TIMEOUT_SECS_RANGE.start(),
                TIMEOUT_SECS_RANGE.end(),
                self.kamos.timeout_secs
            )));
        }
        if self.gemini.model.trim().is_empty() {
            return Err(RelayError::Configuration("gemini.model must not be empty".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.kamos.timeout_secs)
    }

    pub fn require_gemini_key(&self) -> RelayResult<&str> {
        non_empty(self.gemini.api_key.as_deref()).ok_or_else(|| {
            RelayError::Configuration("GEMINI_API_KEY environment variable is required".into())
        })
    }

    pub fn require_kamos_token(&self) -> RelayResult<&str> {
        non_empty(self.kamos.api_token.as_deref()).ok_or_else(|| {
            RelayError::Configuration("KAMOS_API_TOKEN missing in server environment".into())
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let cfg = RelayConfig::load_from(None, HashMap::new()).unwrap();
        assert_eq!(cfg.relay.phase_count, 3);
        assert_eq!(cfg.orchestrator.matrix_max, 5);
        assert_eq!(cfg.kamos.timeout_secs, 120);
        assert_eq!(cfg.timeout(), Duration::from_secs(120));
        assert_eq!(cfg.gemini.model, "gemini-3-flash-preview");
        assert!(cfg.gemini.api_key.is_none());
        assert!(cfg.require_gemini_key().is_err());
        assert!(cfg.require_kamos_token().is_err());
    }

    #[test]
    fn well_known_variables_fill_credentials() {
        let cfg = RelayConfig::load_from(
            None,
            vars(&[
                ("GEMINI_API_KEY", "AIza-test"),
                ("KAMOS_API_TOKEN", " tok "),
                ("KAMOS_FUNC_URL", "http://localhost:9999/ask"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.require_gemini_key().unwrap(), "AIza-test");
        assert_eq!(cfg.require_kamos_token().unwrap(), "tok");
        assert_eq!(cfg.kamos.func_url, "http://localhost:9999/ask");
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let cfg = RelayConfig::load_from(None, vars(&[("GEMINI_API_KEY", "   ")])).unwrap();
        let err = cfg.require_gemini_key().unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn prefixed_variables_override_sections() {
        let cfg = RelayConfig::load_from(
            None,
            vars(&[
                ("KAMOS__RELAY__PHASE_COUNT", "4"),
                ("KAMOS__ORCHESTRATOR__OUTPUT_DIR", "/tmp/reports"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.relay.phase_count, 4);
        assert_eq!(cfg.orchestrator.output_dir, "/tmp/reports");
    }

    #[test]
    fn file_values_sit_between_defaults_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kamos.toml");
        std::fs::write(
            &path,
            "[relay]\nphase_count = 2\nbind_addr = \"0.0.0.0:8080\"\n[gemini]\nmodel = \"gemini-pro\"\n",
        )
        .unwrap();
        let cfg = RelayConfig::load_from(Some(&path), vars(&[("GEMINI_MODEL", "gemini-flash")])).unwrap();
        assert_eq!(cfg.relay.phase_count, 2);
        assert_eq!(cfg.relay.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.gemini.model, "gemini-flash");
    }

    #[test]
    fn out_of_range_phase_count_is_rejected() {
        let err = RelayConfig::load_from(None, vars(&[("KAMOS__RELAY__PHASE_COUNT", "0")])).unwrap_err();
        assert!(err.to_string().contains("phase_count"));
        let err = RelayConfig::load_from(None, vars(&[("KAMOS__RELAY__PHASE_COUNT", "9")])).unwrap_err();
        assert!(err.to_string().contains("phase_count"));
    }

    #[test]
    fn matrix_max_cannot_exceed_limit() {
        let err =
            RelayConfig::load_from(None, vars(&[("KAMOS__ORCHESTRATOR__MATRIX_MAX", "6")])).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}

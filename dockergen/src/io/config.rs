//! Generator configuration loaded from an optional TOML file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Generator configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below. CLI flags are applied on top after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Chat model used for every generation call.
    pub model: String,

    pub temperature: f32,

    /// Upper bound on refine cycles per run.
    pub max_refinements: u32,

    /// Base URL of the OpenAI-compatible API.
    pub api_base_url: String,

    /// Characters of build log passed to a refinement.
    pub build_log_tail_chars: usize,

    pub generation: GenerationConfig,
    pub sandbox: SandboxConfig,
    pub probes: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    pub analyze_max_tokens: u32,
    pub generate_max_tokens: u32,
    pub refine_max_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Byte budget for a rendered user prompt.
    pub prompt_budget_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container engine CLI, resolved on `PATH`.
    pub docker_bin: String,
    pub build_timeout_secs: u64,
    /// Truncate captured build/run output beyond this many bytes per stream.
    pub output_limit_bytes: usize,
    /// Extra attempts for a probe hit by a container-removal race.
    pub race_retries: u32,
    pub race_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    pub startup_timeout_secs: u64,
    pub help_timeout_secs: u64,
    pub example_timeout_secs: u64,
    pub error_timeout_secs: u64,
    pub behavior_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            analyze_max_tokens: 1000,
            generate_max_tokens: 2000,
            refine_max_tokens: 2500,
            timeout_secs: 60,
            prompt_budget_bytes: 24_000,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            build_timeout_secs: 30,
            output_limit_bytes: 100_000,
            race_retries: 2,
            race_backoff_ms: 1000,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: 10,
            help_timeout_secs: 10,
            example_timeout_secs: 30,
            error_timeout_secs: 10,
            behavior_timeout_secs: 15,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.1,
            max_refinements: 3,
            api_base_url: "https://api.openai.com/v1".to_string(),
            build_log_tail_chars: 2000,
            generation: GenerationConfig::default(),
            sandbox: SandboxConfig::default(),
            probes: ProbeConfig::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be within 0.0..=2.0"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(anyhow!("api_base_url must be non-empty"));
        }
        if self.generation.timeout_secs == 0 {
            return Err(anyhow!("generation.timeout_secs must be > 0"));
        }
        if self.generation.prompt_budget_bytes == 0 {
            return Err(anyhow!("generation.prompt_budget_bytes must be > 0"));
        }
        let gen_limits = [
            self.generation.analyze_max_tokens,
            self.generation.generate_max_tokens,
            self.generation.refine_max_tokens,
        ];
        if gen_limits.contains(&0) {
            return Err(anyhow!("generation max_tokens values must be > 0"));
        }
        if self.sandbox.docker_bin.trim().is_empty() {
            return Err(anyhow!("sandbox.docker_bin must be non-empty"));
        }
        if self.sandbox.build_timeout_secs == 0 {
            return Err(anyhow!("sandbox.build_timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        let probe_timeouts = [
            self.probes.startup_timeout_secs,
            self.probes.help_timeout_secs,
            self.probes.example_timeout_secs,
            self.probes.error_timeout_secs,
            self.probes.behavior_timeout_secs,
        ];
        if probe_timeouts.contains(&0) {
            return Err(anyhow!("probe timeouts must be > 0"));
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.build_timeout_secs)
    }
}

/// Load config from a TOML file. A missing file is an error.
pub fn load_config(path: &Path) -> Result<GeneratorConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GeneratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = GeneratorConfig::default();
        cfg.validate().expect("valid defaults");
        assert_eq!(cfg.max_refinements, 3);
        assert_eq!(cfg.build_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.probes.example_timeout_secs, 30);
    }

    /// Verifies every default matches the documented limits table.
    #[test]
    fn defaults_match_limits_table() {
        let cfg = GeneratorConfig::default();
        assert_eq!(cfg.probes.startup_timeout_secs, 10);
        assert_eq!(cfg.probes.help_timeout_secs, 10);
        assert_eq!(cfg.probes.error_timeout_secs, 10);
        assert_eq!(cfg.probes.behavior_timeout_secs, 15);
        assert_eq!(cfg.probes.example_timeout_secs, 30);
        assert_eq!(cfg.sandbox.build_timeout_secs, 30);
        assert_eq!(cfg.generation_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.sandbox.race_retries, 2);
        assert_eq!(cfg.sandbox.race_backoff_ms, 1000);
        assert_eq!(cfg.build_log_tail_chars, 2000);
        assert_eq!(cfg.max_refinements, 3);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("dockergen.toml");
        fs::write(
            &path,
            "model = \"gpt-4\"\n\n[sandbox]\nrace_backoff_ms = 0\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.model, "gpt-4");
        assert_eq!(cfg.sandbox.race_backoff_ms, 0);
        assert_eq!(cfg.sandbox.race_retries, 2);
        assert_eq!(cfg.generation, GenerationConfig::default());
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config(&temp.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.toml");
        fs::write(&path, "[probes]\nstartup_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("probe timeouts must be > 0"));
    }
}

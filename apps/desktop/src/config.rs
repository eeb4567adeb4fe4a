use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use client_core::{ConcurrencyPolicy, ControllerConfig};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "desk.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend_url: String,
    pub timeout_ms: Option<u64>,
    pub concurrency: ConcurrencyPolicy,
    pub auto_reset: bool,
    pub transcript_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5000".into(),
            timeout_ms: Some(120_000),
            concurrency: ConcurrencyPolicy::RejectWhilePending,
            auto_reset: true,
            transcript_path: None,
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        let config = ControllerConfig::default()
            .with_concurrency(self.concurrency)
            .with_auto_reset(self.auto_reset);
        match self.timeout_ms {
            Some(ms) if ms > 0 => config.with_timeout(Duration::from_millis(ms)),
            _ => config,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    backend_url: Option<String>,
    timeout_ms: Option<u64>,
    concurrency: Option<ConcurrencyPolicy>,
    auto_reset: Option<bool>,
    transcript_path: Option<PathBuf>,
}

/// Defaults, then the config file, then the environment.
///
/// An explicitly named file must exist; the default `desk.toml` is optional.
pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<Settings> {
    let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let raw = match fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == io::ErrorKind::NotFound && explicit.is_none() => None,
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    };

    let mut settings = Settings::default();
    if let Some(raw) = raw {
        apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
    }
    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = file_cfg.timeout_ms {
        settings.timeout_ms = Some(v);
    }
    if let Some(v) = file_cfg.concurrency {
        settings.concurrency = v;
    }
    if let Some(v) = file_cfg.auto_reset {
        settings.auto_reset = v;
    }
    if let Some(v) = file_cfg.transcript_path {
        settings.transcript_path = Some(v);
    }
    Ok(())
}

/// `DESK_*` first, then `APP__*`, so the latter wins when both are set.
fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let var = |name: &str| {
        lookup(&format!("APP__{name}")).or_else(|| lookup(&format!("DESK_{name}")))
    };

    if let Some(v) = var("BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = var("TIMEOUT_MS") {
        let parsed = v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid TIMEOUT_MS '{v}'"))?;
        settings.timeout_ms = (parsed > 0).then_some(parsed);
    }
    if let Some(v) = var("CONCURRENCY") {
        settings.concurrency = v.parse().map_err(|err: String| anyhow!(err))?;
    }
    if let Some(v) = var("AUTO_RESET") {
        settings.auto_reset = parse_flag(&v).with_context(|| format!("invalid AUTO_RESET '{v}'"))?;
    }
    if let Some(v) = var("TRANSCRIPT_PATH") {
        settings.transcript_path = (!v.trim().is_empty()).then(|| PathBuf::from(v));
    }
    Ok(())
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{other}'")),
    }
}

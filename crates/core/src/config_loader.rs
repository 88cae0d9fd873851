use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

/// Legacy variable names still honoured for credentials and app id.
const LEGACY_ENV: [&str; 3] = ["DERIV_TOKEN_DEMO", "DERIV_TOKEN_REAL", "DERIV_APP_ID"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging `config/Config.toml` and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source exists but cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH), None)
    }

    /// Loads configuration with a profile overlay (`config/Config.<profile>.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source exists but cannot be parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH), Some(profile))
    }

    /// Loads configuration from an explicit base file.
    ///
    /// Precedence, lowest first: base file, profile file next to it,
    /// `DERIV_BOT_*` variables (`__` separates sections), then
    /// `DERIV_TOKEN_DEMO` / `DERIV_TOKEN_REAL` / `DERIV_APP_ID`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source exists but cannot be parsed.
    pub fn load_from(path: &Path, profile: Option<&str>) -> Result<AppConfig> {
        let mut figment = Figment::new().merge(Toml::file(path));

        if let Some(profile) = profile {
            let overlay = path.with_file_name(format!("Config.{profile}.toml"));
            figment = figment.merge(Toml::file(overlay));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed("DERIV_BOT_").split("__"))
            .merge(Env::raw().only(&LEGACY_ENV).map(|key| {
                match key.as_str().to_ascii_lowercase().as_str() {
                    "deriv_token_demo" => "broker.demo_token".into(),
                    "deriv_token_real" => "broker.real_token".into(),
                    "deriv_app_id" => "broker.app_id".into(),
                    other => other.to_string().into(),
                }
            }))
            .extract()
            .with_context(|| format!("invalid configuration (base file {})", path.display()))?;

        debug!(path = %path.display(), profile = ?profile, "Configuration loaded");
        Ok(config)
    }
}

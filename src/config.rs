use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    chat::flow::FlowSettings,
    error::{LauncherError, LauncherResult},
    logging::{parse_level, LoggingConfig},
    quantize::QuantFormat,
};

pub const APP_NAME: &str = "llama_launcher";
const CONFIG_NAME: &str = "config";

/// Hard ceiling on generated tokens per reply.
pub const TOKEN_LIMIT: u32 = 256;

/// Directory next to the launcher binary that holds the llama.cpp tools.
pub const TOOLS_DIR: &str = "llama_app";

#[cfg(target_os = "windows")]
const QUANTIZE_EXECUTABLE: &str = "llama-quantize.exe";
#[cfg(not(target_os = "windows"))]
const QUANTIZE_EXECUTABLE: &str = "llama-quantize";

#[cfg(target_os = "windows")]
const SERVER_EXECUTABLE: &str = "llama-server.exe";
#[cfg(not(target_os = "windows"))]
const SERVER_EXECUTABLE: &str = "llama-server";

pub const QUANTIZE_BIN_ENV: &str = "LLAMA_LAUNCHER_QUANTIZE_BIN";
pub const SERVER_BIN_ENV: &str = "LLAMA_LAUNCHER_SERVER_BIN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Overrides `<exe dir>/llama_app/llama-quantize`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantize_executable: Option<PathBuf>,
    /// Overrides `<exe dir>/llama_app/llama-server`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_executable: Option<PathBuf>,
    pub default_quant_format: QuantFormat,
    pub max_tokens: u32,
    pub temperature: f32,
    pub ctx_size: u32,
    pub quantize_timeout_secs: u64,
    pub load_budget_secs: u64,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub logging_enabled: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            quantize_executable: None,
            server_executable: None,
            default_quant_format: QuantFormat::default(),
            max_tokens: TOKEN_LIMIT,
            temperature: 0.7,
            ctx_size: 4096,
            quantize_timeout_secs: 60 * 60,
            load_budget_secs: 120,
            request_timeout_secs: 300,
            log_level: "info".to_string(),
            logging_enabled: true,
        }
    }
}

impl LauncherConfig {
    /// Loads the config from the platform config dir, creating it with defaults on first run.
    pub fn load() -> LauncherResult<Self> {
        let mut config: Self = confy::load(APP_NAME, CONFIG_NAME).map_err(|e| {
            LauncherError::InvalidConfig {
                field: "config file",
                reason: e.to_string(),
            }
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_path(path: impl AsRef<Path>) -> LauncherResult<Self> {
        let mut config: Self =
            confy::load_path(path.as_ref()).map_err(|e| LauncherError::InvalidConfig {
                field: "config file",
                reason: format!("{}: {e}", path.as_ref().display()),
            })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn config_file_path() -> LauncherResult<PathBuf> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME).map_err(|e| {
            LauncherError::InvalidConfig {
                field: "config file",
                reason: e.to_string(),
            }
        })
    }

    /// `.env` and process environment take precedence over the config file.
    pub fn apply_env_overrides(&mut self) {
        dotenvy::dotenv().ok();
        if let Some(path) = non_empty_env(QUANTIZE_BIN_ENV) {
            tracing::debug!(%path, "quantize executable overridden from environment");
            self.quantize_executable = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env(SERVER_BIN_ENV) {
            tracing::debug!(%path, "server executable overridden from environment");
            self.server_executable = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> LauncherResult<()> {
        if self.max_tokens == 0 || self.max_tokens > TOKEN_LIMIT {
            return Err(LauncherError::InvalidConfig {
                field: "max_tokens",
                reason: format!("must be within 1..={TOKEN_LIMIT}, got {}", self.max_tokens),
            });
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(LauncherError::InvalidConfig {
                field: "temperature",
                reason: format!("must be within 0.0..=2.0, got {}", self.temperature),
            });
        }
        if self.ctx_size < TOKEN_LIMIT {
            return Err(LauncherError::InvalidConfig {
                field: "ctx_size",
                reason: format!("must be at least {TOKEN_LIMIT}, got {}", self.ctx_size),
            });
        }
        for (field, secs) in [
            ("quantize_timeout_secs", self.quantize_timeout_secs),
            ("load_budget_secs", self.load_budget_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if secs == 0 {
                return Err(LauncherError::InvalidConfig {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        parse_level(&self.log_level)?;
        Ok(())
    }

    pub fn quantize_executable_path(&self) -> LauncherResult<PathBuf> {
        match &self.quantize_executable {
            Some(path) => Ok(path.clone()),
            None => colocated_tool(QUANTIZE_EXECUTABLE),
        }
    }

    pub fn server_executable_path(&self) -> LauncherResult<PathBuf> {
        match &self.server_executable {
            Some(path) => Ok(path.clone()),
            None => colocated_tool(SERVER_EXECUTABLE),
        }
    }

    pub fn quantize_timeout(&self) -> Duration {
        Duration::from_secs(self.quantize_timeout_secs)
    }

    pub fn load_budget(&self) -> Duration {
        Duration::from_secs(self.load_budget_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn logging(&self) -> LauncherResult<LoggingConfig> {
        Ok(LoggingConfig::new()
            .level(parse_level(&self.log_level)?)
            .logging_enabled(self.logging_enabled)
            .logger_name(APP_NAME))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn colocated_tool(executable: &str) -> LauncherResult<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| LauncherError::file_system("locate current executable", ".", e))?;
    let dir = exe.parent().ok_or_else(|| {
        LauncherError::Internal(format!("'{}' has no parent directory", exe.display()))
    })?;
    Ok(dir.join(TOOLS_DIR).join(executable))
}

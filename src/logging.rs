use std::path::PathBuf;

use colorful::Colorful;
use tracing_subscriber::layer::SubscriberExt;

use crate::error::{LauncherError, LauncherResult};

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: tracing::Level,
    pub logging_enabled: bool,
    pub logger_name: String,
    /// Directory for the rolling log files. `None` resolves to the platform data dir.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            logging_enabled: true,
            logger_name: "llama_launcher".to_string(),
            log_dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    pub fn logging_enabled(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    pub fn logger_name<S: Into<String>>(mut self, logger_name: S) -> Self {
        self.logger_name = logger_name.into();
        self
    }

    pub fn log_dir<P: Into<PathBuf>>(mut self, log_dir: P) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    /// Installs the process-wide subscriber.
    ///
    /// The worker thread logs too, so a thread-local default is not enough here.
    pub fn init(&self) -> LauncherResult<()> {
        if !self.logging_enabled {
            return Ok(());
        }
        let log_dir = self.resolve_log_dir()?;
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| LauncherError::file_system("create log directory", &log_dir, e))?;

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::HOURLY)
            .max_log_files(6)
            .filename_prefix(&self.logger_name)
            .filename_suffix("log")
            .build(&log_dir)
            .map_err(|e| LauncherError::Internal(format!("failed to build log appender: {e}")))?;

        let filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(false)
            .with_writer(file_appender);

        let terminal_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(false)
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(terminal_layer);

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LauncherError::Internal(format!("logger already installed: {e}")))?;

        eprintln!(
            "{}",
            format!("Starting {} Logger", self.logger_name)
                .color(colorful::RGB::new(0, 139, 248))
                .bold()
        );
        tracing::debug!(log_dir = %log_dir.display(), "logging initialised");
        Ok(())
    }

    fn resolve_log_dir(&self) -> LauncherResult<PathBuf> {
        if let Some(dir) = &self.log_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("", "", "llama_launcher")
            .map(|dirs| dirs.data_local_dir().join("logs"))
            .ok_or_else(|| {
                LauncherError::Internal("could not resolve a home directory for logs".to_string())
            })
    }
}

/// Parses the level names accepted in the config file.
pub fn parse_level(level: &str) -> LauncherResult<tracing::Level> {
    level
        .parse::<tracing::Level>()
        .map_err(|_| LauncherError::InvalidConfig {
            field: "log_level",
            reason: format!("unknown level '{level}' (use trace, debug, info, warn or error)"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logging_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("logs");
        LoggingConfig::new()
            .logging_enabled(false)
            .log_dir(&target)
            .init()
            .unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug").unwrap(), tracing::Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), tracing::Level::WARN);
        assert!(matches!(
            parse_level("loud"),
            Err(LauncherError::InvalidConfig { field: "log_level", .. })
        ));
    }
}

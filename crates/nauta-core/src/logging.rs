//! Inicialização do `tracing` para quem embute o núcleo

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{CoreError, CoreResult};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG`, quando definida, tem precedência sobre o nível configurado.
pub fn env_filter(level: &str) -> CoreResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| CoreError::validation(format!("nível de log inválido '{level}': {e}")))
}

fn open_log_file(path: &Path) -> CoreResult<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::validation(format!("falha ao criar {}: {e}", parent.display()))
            })?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CoreError::validation(format!("falha ao abrir {}: {e}", path.display())))
}

/// Instala o subscriber global. Falha se já houver um instalado.
pub fn init_logging(config: &LoggingConfig) -> CoreResult<()> {
    let filter = env_filter(&config.level)?;

    let (writer, ansi) = match &config.file {
        Some(path) => (BoxMakeWriter::new(Mutex::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| CoreError::validation(format!("subscriber de log já instalado: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("nauta.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_filter_accepts_directives() {
        assert!(env_filter("debug").is_ok());
        assert!(env_filter("nauta_core=trace,info").is_ok());
    }
}

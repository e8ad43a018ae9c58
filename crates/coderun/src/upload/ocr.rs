//! Text extraction from stored images.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::exec::FILE_PLACEHOLDER;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("{command} did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// `false` when uploads should skip extraction entirely.
    fn enabled(&self) -> bool {
        true
    }

    async fn extract(&self, image: &Path) -> Result<String, OcrError>;
}

/// Runs an external OCR command and reads the text from its stdout.
#[derive(Debug, Clone)]
pub struct CommandOcr {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOcr {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl OcrEngine for CommandOcr {
    async fn extract(&self, image: &Path) -> Result<String, OcrError> {
        let file = image.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &file))
            .collect();
        debug!("Running OCR: {} {:?}", self.command, args);

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| OcrError::TimedOut {
                command: self.command.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| OcrError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OcrError::Failed {
                command: self.command.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Never extracts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn enabled(&self) -> bool {
        false
    }

    async fn extract(&self, _image: &Path) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

/// Build the engine described by `config`.
pub fn from_config(config: &OcrConfig) -> Arc<dyn OcrEngine> {
    if config.enabled {
        Arc::new(CommandOcr::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    } else {
        Arc::new(DisabledOcr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_output_is_extracted_text() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("page.png");
        std::fs::write(&image, b"ignored").unwrap();

        let engine = CommandOcr::new(
            "sh",
            vec![
                "-c".to_string(),
                "printf 'text from %s' \"$(basename \"$0\")\"".to_string(),
                FILE_PLACEHOLDER.to_string(),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(engine.extract(&image).await.unwrap(), "text from page.png");
    }

    #[tokio::test]
    async fn test_command_failure_reports_stderr() {
        let engine = CommandOcr::new(
            "sh",
            vec!["-c".to_string(), "echo broken >&2; exit 1".to_string()],
            Duration::from_secs(5),
        );
        match engine.extract(Path::new("/nonexistent.png")).await {
            Err(OcrError::Failed { stderr, .. }) => assert_eq!(stderr, "broken"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_command() {
        let engine = CommandOcr::new("coderun-no-such-ocr", Vec::new(), Duration::from_secs(1));
        assert!(matches!(
            engine.extract(Path::new("x.png")).await,
            Err(OcrError::Spawn { .. })
        ));
    }

    #[test]
    fn test_disabled_config() {
        let config = OcrConfig {
            enabled: false,
            ..OcrConfig::default()
        };
        assert!(!from_config(&config).enabled());
        assert!(from_config(&OcrConfig::default()).enabled());
    }
}

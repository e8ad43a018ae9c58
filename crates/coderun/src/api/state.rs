//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::exec::LaunchSpec;
use crate::upload::{self, ImageStore, UploadService};

#[derive(Clone, Debug)]
pub struct AppState {
    /// Used for runs driven over the WebSocket channel.
    pub interactive: Arc<LaunchSpec>,
    /// Used for `/compile-code`.
    pub compile: Arc<LaunchSpec>,
    pub uploads: UploadService,
    /// Keepalive ping interval on the execution channel.
    pub ping_interval: Duration,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(interactive: LaunchSpec, compile: LaunchSpec, uploads: UploadService) -> Self {
        Self {
            interactive: Arc::new(interactive),
            compile: Arc::new(compile),
            uploads,
            ping_interval: Duration::from_secs(30),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let interactive = config
            .executor
            .interactive_spec()
            .context("building interactive executor")?;
        let compile = config
            .executor
            .compile_spec()
            .context("building compile executor")?;
        let upload_dir = config
            .upload
            .resolve_dir()
            .context("resolving upload directory")?;
        let uploads = UploadService::new(
            ImageStore::new(upload_dir),
            upload::from_config(&config.upload.ocr),
        );

        let mut state = Self::new(interactive, compile, uploads);
        state.ping_interval = Duration::from_secs(config.server.ping_interval_secs.max(1));
        state.max_upload_bytes = config.upload.max_upload_bytes;
        Ok(state)
    }
}

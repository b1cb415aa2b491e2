use std::sync::Arc;

use idlevault_crypto::Encryptor;
use idlevault_storage::{store_from_config, Uploader};

use crate::config::{self, ConfigSource, IdlevaultConfig};
use crate::error::{IdlevaultError, Result};
use crate::pipeline::{BackupPipeline, PipelineSettings};

pub mod dispatch;
pub mod passphrase;
pub mod service;

pub use self::dispatch::{RunDispatcher, RunFn};
pub use self::service::{AgentService, ServiceSettings};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub source: ConfigSource,
    pub config: IdlevaultConfig,
}

pub fn load_runtime_config(config_path: Option<&str>) -> Result<RuntimeConfig> {
    let source = config::resolve_config_path(config_path).ok_or_else(|| {
        IdlevaultError::Config("no configuration file found in default search paths".into())
    })?;
    let config = config::load_config(source.path())?;
    Ok(RuntimeConfig { source, config })
}

pub fn build_uploader(config: &IdlevaultConfig) -> Result<Uploader> {
    let store = store_from_config(&config.storage)?;
    Ok(Uploader::new(
        Arc::from(store),
        config.storage.upload_settings(),
        tracing::info_span!("upload"),
    ))
}

/// Resolve the passphrase and wire the pipeline to the configured store.
pub fn build_pipeline(config: &IdlevaultConfig) -> Result<BackupPipeline> {
    let passphrase = passphrase::resolve_passphrase(&config.encryption)?;
    let uploader = build_uploader(config)?;
    Ok(BackupPipeline::new(
        PipelineSettings::from_config(config),
        Encryptor::new(config.encryption.iterations),
        passphrase,
        uploader,
        tracing::info_span!("pipeline", client = %config.client_id),
    ))
}

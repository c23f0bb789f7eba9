//! Backend selection: builds the configured `Generator`.

use std::sync::Arc;
use companion_config::{AppConfig, BackendConfig, BackendKind};
use companion_core::error::GenerationError;
use companion_core::generator::Generator;
use tracing::{info, warn};

use crate::hosted::HostedGenerator;
use crate::local::LocalGenerator;

/// Build a backend of the given kind.
///
/// Fails with `NotConfigured` when the hosted backend has no API key.
pub fn build_generator(
    kind: BackendKind,
    config: &BackendConfig,
) -> Result<Arc<dyn Generator>, GenerationError> {
    let generator: Arc<dyn Generator> = match kind {
        BackendKind::Hosted => Arc::new(HostedGenerator::from_config(config)?),
        BackendKind::Local => Arc::new(LocalGenerator::from_config(config)?),
    };
    info!(backend = generator.name(), "Generation backend ready");
    Ok(generator)
}

/// Build the backend selected in configuration.
///
/// A hosted selection without credentials falls back to the local backend.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Generator>, GenerationError> {
    match build_generator(config.backend.kind, &config.backend) {
        Err(GenerationError::NotConfigured(reason)) if config.backend.kind == BackendKind::Hosted => {
            warn!(%reason, "Hosted backend unavailable, using local model");
            build_generator(BackendKind::Local, &config.backend)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_without_key_falls_back_to_local() {
        let config = AppConfig::default();
        let generator = build_from_config(&config).unwrap();
        assert_eq!(generator.name(), "local");
    }

    #[test]
    fn hosted_with_key() {
        let mut config = AppConfig::default();
        config.backend.api_key = Some("k".into());
        let generator = build_from_config(&config).unwrap();
        assert_eq!(generator.name(), "hosted");
    }

    #[test]
    fn explicit_hosted_without_key_errors() {
        let result = build_generator(BackendKind::Hosted, &BackendConfig::default());
        assert!(matches!(result, Err(GenerationError::NotConfigured(_))));
    }

    #[test]
    fn explicit_local() {
        let generator = build_generator(BackendKind::Local, &BackendConfig::default()).unwrap();
        assert_eq!(generator.name(), "local");
    }
}

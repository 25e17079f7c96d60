//! Construct the control-plane provider named in the configuration.

use foundation_core::{Config, ProviderKind};
use foundation_provider::{CloudProvider, MemoryProvider, ProviderError};

/// Bearer token for the control-plane gateway, read once here and handed in.
#[cfg_attr(not(feature = "gateway"), allow(dead_code))]
pub(crate) const GATEWAY_TOKEN_ENV: &str = "FOUNDATION_GATEWAY_TOKEN";

pub(crate) fn build(config: &Config) -> Result<Box<dyn CloudProvider>, ProviderError> {
    match &config.provider {
        ProviderKind::Local { state_file } => {
            tracing::debug!(state_file = %state_file.display(), "using local control plane");
            let provider = MemoryProvider::open(
                state_file,
                config.organization.management_account_id.as_ref(),
            )?;
            Ok(Box::new(provider))
        }
        ProviderKind::Gateway { endpoint } => gateway(endpoint),
    }
}

#[cfg(feature = "gateway")]
fn gateway(endpoint: &str) -> Result<Box<dyn CloudProvider>, ProviderError> {
    tracing::debug!(endpoint, "using control-plane gateway");
    let token = std::env::var(GATEWAY_TOKEN_ENV).ok();
    Ok(Box::new(foundation_provider::GatewayProvider::new(
        endpoint, token,
    )))
}

#[cfg(not(feature = "gateway"))]
fn gateway(_endpoint: &str) -> Result<Box<dyn CloudProvider>, ProviderError> {
    Err(ProviderError::Validation(
        "provider.kind = \"gateway\" needs a build with the `gateway` feature".to_string(),
    ))
}

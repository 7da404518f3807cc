//! Shared CLI bootstrap
//!
//! Builds the orchestrator from environment configuration. Provider
//! shims register here by backend name; out-of-tree backends are
//! expected to wrap the `hal` library rather than this binary.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use hal_core::{Credentials, HalConfig, MockProvider, Orchestrator, Provider};

/// Build the provider registry for the configured slots
fn build_providers(config: &HalConfig) -> Result<HashMap<String, Arc<dyn Provider>>> {
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    for slot in &config.slots {
        if providers.contains_key(&slot.provider) {
            continue;
        }
        match slot.provider.as_str() {
            "mock" => {
                providers.insert(
                    slot.provider.clone(),
                    Arc::new(MockProvider::new(slot.provider.clone())),
                );
            }
            other => bail!(
                "no provider backend registered for '{other}'; \
                 embed hal-core and register one via the Provider trait"
            ),
        }
    }
    Ok(providers)
}

/// Load config, credentials and open the orchestrator
pub fn open_orchestrator() -> Result<Arc<Orchestrator>> {
    let config = HalConfig::from_env()?;
    let providers = build_providers(&config)?;
    let credentials = Credentials::load_default();
    Ok(Orchestrator::open(config, providers, credentials)?)
}

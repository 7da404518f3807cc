//! Orchestrator configuration
//!
//! Slots are read once at startup from the environment and stay fixed
//! for the process lifetime. `HAL_PROVIDERS` lists slot names in
//! priority order; per-slot knobs live under `HAL_<NAME>_*`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default capacity cap per slot
pub const DEFAULT_MAX_POOL_SIZE: usize = 5;
/// Warm-pool TTL for local virtualization backends
pub const LOCAL_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);
/// Warm-pool TTL for metered cloud backends
pub const CLOUD_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Backends that run on the operator's machine and cost nothing idle
const LOCAL_PROVIDERS: &[&str] = &["local", "tart", "orbstack"];

/// One configured provider backend with capacity and warm-pool knobs
#[derive(Debug, Clone)]
pub struct SlotConfig {
    /// Slot name; also the env-var infix
    pub name: String,
    /// Backend implementation this slot uses
    pub provider: String,
    pub snapshot_id: Option<String>,
    pub region: Option<String>,
    pub plan: Option<String>,
    pub max_pool_size: usize,
    /// Lower fills first; ties preserve configured order
    pub priority: u32,
    /// Zero destroys released VMs inline instead of pooling them
    pub idle_timeout: Duration,
    /// Pre-warm target
    pub min_ready: usize,
    pub ssh_key_ids: Vec<String>,
}

impl SlotConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let idle_timeout = default_idle_timeout(&name);
        Self {
            provider: name.clone(),
            name,
            snapshot_id: None,
            region: None,
            plan: None,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            priority: 0,
            idle_timeout,
            min_ready: 0,
            ssh_key_ids: Vec::new(),
        }
    }

    pub fn with_max_pool_size(mut self, n: usize) -> Self {
        self.max_pool_size = n;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_min_ready(mut self, n: usize) -> Self {
        self.min_ready = n;
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }

    /// A slot with no idle TTL has no warm pool
    pub fn has_warm_pool(&self) -> bool {
        !self.idle_timeout.is_zero()
    }
}

fn default_idle_timeout(provider: &str) -> Duration {
    if LOCAL_PROVIDERS.contains(&provider) {
        LOCAL_IDLE_TIMEOUT
    } else {
        CLOUD_IDLE_TIMEOUT
    }
}

/// Full orchestrator configuration
#[derive(Debug, Clone)]
pub struct HalConfig {
    /// Ordered by priority; fixed for the process lifetime
    pub slots: Vec<SlotConfig>,
    pub data_dir: PathBuf,
    pub ssh_user: String,
    /// Private key for reaching VMs; None uses the default identity
    pub ssh_key_path: Option<PathBuf>,
    /// Prefix for generated feature branches
    pub branch_prefix: String,
}

impl HalConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Testable variant taking the variable lookup as a parameter
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let providers = lookup("HAL_PROVIDERS")
            .ok_or_else(|| ConfigError::Missing("HAL_PROVIDERS".to_string()))?;

        let mut slots = Vec::new();
        for (index, name) in providers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
        {
            slots.push(slot_from_lookup(name, index as u32, &lookup)?);
        }
        if slots.is_empty() {
            return Err(ConfigError::Invalid {
                name: "HAL_PROVIDERS".to_string(),
                reason: "no slot names listed".to_string(),
            });
        }

        Ok(Self {
            slots,
            data_dir: hal_paths::data_dir(),
            ssh_user: lookup("HAL_SSH_USER").unwrap_or_else(|| "root".to_string()),
            ssh_key_path: lookup("HAL_SSH_KEY_PATH").map(PathBuf::from),
            branch_prefix: "hal/".to_string(),
        })
    }

    /// Build a config directly from slots (tests and embedders)
    pub fn with_slots(slots: Vec<SlotConfig>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            slots,
            data_dir: data_dir.into(),
            ssh_user: "root".to_string(),
            ssh_key_path: None,
            branch_prefix: "hal/".to_string(),
        }
    }

    /// Sum of slot capacities, used in the capacity error message
    pub fn total_capacity(&self) -> usize {
        self.slots.iter().map(|s| s.max_pool_size).sum()
    }
}

fn slot_from_lookup(
    name: &str,
    priority: u32,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<SlotConfig, ConfigError> {
    let infix = name.to_uppercase().replace('-', "_");
    let var = |suffix: &str| lookup(&format!("HAL_{infix}_{suffix}"));

    let mut slot = SlotConfig::new(name).with_priority(priority);
    slot.snapshot_id = var("SNAPSHOT_ID");
    if let Some(region) = var("REGION") {
        slot.region = Some(region);
    }
    if let Some(plan) = var("PLAN") {
        slot.plan = Some(plan);
    }
    if let Some(raw) = var("MAX_POOL_SIZE") {
        slot.max_pool_size = parse_number(&format!("HAL_{infix}_MAX_POOL_SIZE"), &raw)?;
    }
    if let Some(raw) = var("IDLE_TIMEOUT_S") {
        let secs: u64 = parse_number(&format!("HAL_{infix}_IDLE_TIMEOUT_S"), &raw)? as u64;
        slot.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(raw) = var("MIN_READY") {
        slot.min_ready = parse_number(&format!("HAL_{infix}_MIN_READY"), &raw)?;
    }
    if let Some(key_id) = lookup("HAL_SSH_KEY_ID") {
        slot.ssh_key_ids = vec![key_id];
    }
    Ok(slot)
}

fn parse_number(name: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name: name.to_string(),
        reason: format!("'{raw}' is not a number"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key: &str| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn missing_provider_list_is_fatal() {
        let err = HalConfig::from_lookup(lookup(&[]));
        assert!(matches!(err, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn slots_preserve_listed_order_as_priority() {
        let config = HalConfig::from_lookup(lookup(&[("HAL_PROVIDERS", "local,do")])).unwrap();
        assert_eq!(config.slots.len(), 2);
        assert_eq!(config.slots[0].name, "local");
        assert_eq!(config.slots[0].priority, 0);
        assert_eq!(config.slots[1].name, "do");
        assert_eq!(config.slots[1].priority, 1);
    }

    #[test]
    fn per_slot_overrides_apply() {
        let config = HalConfig::from_lookup(lookup(&[
            ("HAL_PROVIDERS", "do"),
            ("HAL_DO_SNAPSHOT_ID", "snap-42"),
            ("HAL_DO_REGION", "nyc3"),
            ("HAL_DO_MAX_POOL_SIZE", "2"),
            ("HAL_DO_IDLE_TIMEOUT_S", "0"),
            ("HAL_DO_MIN_READY", "1"),
        ]))
        .unwrap();
        let slot = &config.slots[0];
        assert_eq!(slot.snapshot_id.as_deref(), Some("snap-42"));
        assert_eq!(slot.region.as_deref(), Some("nyc3"));
        assert_eq!(slot.max_pool_size, 2);
        assert!(!slot.has_warm_pool());
        assert_eq!(slot.min_ready, 1);
    }

    #[test]
    fn idle_defaults_differ_for_local_and_cloud() {
        assert_eq!(SlotConfig::new("local").idle_timeout, LOCAL_IDLE_TIMEOUT);
        assert_eq!(SlotConfig::new("do").idle_timeout, CLOUD_IDLE_TIMEOUT);
    }

    #[test]
    fn bad_numbers_are_reported_with_the_variable_name() {
        let err = HalConfig::from_lookup(lookup(&[
            ("HAL_PROVIDERS", "do"),
            ("HAL_DO_MAX_POOL_SIZE", "many"),
        ]));
        match err {
            Err(ConfigError::Invalid { name, .. }) => {
                assert_eq!(name, "HAL_DO_MAX_POOL_SIZE");
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn total_capacity_sums_slots() {
        let config = HalConfig::with_slots(
            vec![
                SlotConfig::new("a").with_max_pool_size(2),
                SlotConfig::new("b").with_max_pool_size(3),
            ],
            "/tmp/hal",
        );
        assert_eq!(config.total_capacity(), 5);
    }
}

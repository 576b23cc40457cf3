//! Daemon configuration

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ControllerConfig;

/// `endocrined` settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Controller configuration
    pub controller: ControllerConfig,
    /// Period of the synthetic event feed; 0 disables it
    pub demo_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            demo_interval_ms: 2_000,
        }
    }
}

impl Settings {
    /// Load configuration from `.env` and `ENDOCRINE_*` variables
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Build settings from an arbitrary variable source; unparsable values are ignored
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = parse_u64("ENDOCRINE_DECAY_INTERVAL_MS") {
            cfg.controller.decay_interval_ms = v;
        }
        if let Some(v) = parse_u64("ENDOCRINE_MONITOR_INTERVAL_MS") {
            cfg.controller.monitor_interval_ms = v;
        }
        if let Some(v) = parse_u64("ENDOCRINE_RECOVERY_MS") {
            cfg.controller.emergency_recovery_ms = v;
        }
        if let Some(v) = lookup("ENDOCRINE_AUDIT_CAPACITY").and_then(|v| v.trim().parse().ok()) {
            cfg.controller.audit_capacity = v;
        }
        if let Some(v) = parse_u64("ENDOCRINE_DEMO_INTERVAL_MS") {
            cfg.demo_interval_ms = v;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_from_variables() {
        let vars: HashMap<&str, &str> = [
            ("ENDOCRINE_DECAY_INTERVAL_MS", "250"),
            ("ENDOCRINE_RECOVERY_MS", " 5000 "),
            ("ENDOCRINE_AUDIT_CAPACITY", "64"),
            ("ENDOCRINE_DEMO_INTERVAL_MS", "0"),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.controller.decay_interval_ms, 250);
        assert_eq!(settings.controller.emergency_recovery_ms, 5_000);
        assert_eq!(settings.controller.audit_capacity, 64);
        assert_eq!(settings.demo_interval_ms, 0);
        assert_eq!(settings.controller.monitor_interval_ms, 5_000);
    }

    #[test]
    fn test_unparsable_values_ignored() {
        let settings = Settings::from_lookup(|k| {
            (k == "ENDOCRINE_MONITOR_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert_eq!(settings.controller.monitor_interval_ms, 5_000);
    }
}

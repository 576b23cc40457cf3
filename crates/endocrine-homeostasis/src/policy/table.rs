//! Policy table with lenient loading

use endocrine_common::{ConfigurationError, EndocrineError, SignalType};
use serde_json::Value;
use tracing::{info, warn};

use super::{defaults, HormonePolicy};

/// One policy per signal type, indexed by `SignalType::index()`
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    policies: [HormonePolicy; SignalType::COUNT],
}

impl PolicyTable {
    /// Built-in policies
    pub fn defaults() -> Self {
        Self {
            policies: SignalType::ALL.map(defaults::policy_for),
        }
    }

    pub fn get(&self, signal_type: SignalType) -> &HormonePolicy {
        &self.policies[signal_type.index()]
    }

    /// Replace a policy after validating it
    pub fn set(
        &mut self,
        signal_type: SignalType,
        policy: HormonePolicy,
    ) -> Result<(), ConfigurationError> {
        policy.validate(signal_type)?;
        self.policies[signal_type.index()] = policy;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_unchecked(&mut self, signal_type: SignalType, policy: HormonePolicy) {
        self.policies[signal_type.index()] = policy;
    }

    /// Policies in precedence order
    pub fn iter(&self) -> impl Iterator<Item = (SignalType, &HormonePolicy)> {
        SignalType::ALL.into_iter().zip(self.policies.iter())
    }

    /// Load policies keyed by signal-type name.
    ///
    /// Missing types keep the built-in policy. Unknown names and malformed
    /// entries are logged and skipped; their errors are returned as
    /// diagnostics rather than failing the load.
    pub fn from_json_value(value: &Value) -> (Self, Vec<ConfigurationError>) {
        let mut table = Self::defaults();
        let mut diagnostics = Vec::new();

        let Some(entries) = value.as_object() else {
            let err = ConfigurationError::InvalidValue {
                field: "policies".to_string(),
                value: "expected an object keyed by signal type".to_string(),
            };
            warn!(error = %err, "Ignoring policy document, using built-in policies");
            diagnostics.push(err);
            return (table, diagnostics);
        };

        for (name, entry) in entries {
            let signal_type = match name.parse::<SignalType>() {
                Ok(t) => t,
                Err(err) => {
                    warn!(error = %err, "Skipping policy entry");
                    diagnostics.push(err);
                    continue;
                }
            };

            let policy = match serde_json::from_value::<HormonePolicy>(entry.clone()) {
                Ok(p) => p,
                Err(e) => {
                    let err = ConfigurationError::MalformedPolicy {
                        signal: signal_type.to_string(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping policy entry, keeping built-in");
                    diagnostics.push(err);
                    continue;
                }
            };

            if let Err(err) = table.set(signal_type, policy) {
                warn!(error = %err, "Skipping policy entry, keeping built-in");
                diagnostics.push(err);
            }
        }

        info!(
            overrides = entries.len() - diagnostics.len(),
            skipped = diagnostics.len(),
            "Loaded policy table"
        );
        (table, diagnostics)
    }

    /// Parse a JSON policy document; only unparsable JSON is an error
    pub fn from_json_str(
        json: &str,
    ) -> Result<(Self, Vec<ConfigurationError>), EndocrineError> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_json_value(&value))
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::defaults()
    }
}

//! Modulation mapper
//!
//! Side-effect-free transform engine: converts the active signal set into
//! concrete parameter values. Signal types are applied in precedence order and
//! every tightening records a guard that later, less critical types cannot
//! cross. A final unconditional clamp keeps every field within its bound.

use endocrine_common::{
    ModulationParameters, Parameter, ParameterBounds, SafetyMode, Signal, SignalType, Tightening,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::rule::ModulationRule;
use super::transform::EvalContext;
use crate::policy::PolicyTable;

/// Result of mapping one signal set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingOutcome {
    pub parameters: ModulationParameters,
    /// Signal types whose rules were applied, in application order
    pub applied: Vec<SignalType>,
    /// Human-readable record of each change
    pub trace: Vec<String>,
    /// Rules that failed to evaluate and kept their previous value
    pub failures: usize,
}

/// Intensity per signal type; duplicates collapse to their maximum
pub fn level_table(signals: &[Signal]) -> [Option<f64>; SignalType::COUNT] {
    let mut levels = [None; SignalType::COUNT];
    for signal in signals {
        let slot: &mut Option<f64> = &mut levels[signal.signal_type.index()];
        *slot = Some(slot.map_or(signal.level, |existing| existing.max(signal.level)));
    }
    levels
}

/// Bounds-aware transform engine
#[derive(Debug, Clone)]
pub struct ModulationMapper {
    bounds: ParameterBounds,
}

impl ModulationMapper {
    pub fn new(bounds: ParameterBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    /// Baseline parameters with no active signals
    pub fn baseline(&self) -> ModulationParameters {
        ModulationParameters::from_bounds(&self.bounds)
    }

    /// Map active signals through the policy table
    pub fn map_signals(&self, signals: &[Signal], policies: &PolicyTable) -> MappingOutcome {
        self.map(&level_table(signals), policies)
    }

    /// Map per-type intensities through the policy table
    pub fn map(
        &self,
        levels: &[Option<f64>; SignalType::COUNT],
        policies: &PolicyTable,
    ) -> MappingOutcome {
        let mut params = self.baseline();
        let mut guards: [Option<f64>; Parameter::COUNT] = [None; Parameter::COUNT];
        let mut mode_ceiling: Option<SafetyMode> = None;
        let mut applied = Vec::new();
        let mut trace = Vec::new();
        let mut failures = 0;

        let present: [f64; SignalType::COUNT] = levels.map(|l| l.unwrap_or(0.0));

        for signal_type in SignalType::ALL {
            let Some(intensity) = levels[signal_type.index()] else {
                continue;
            };
            let policy = policies.get(signal_type);
            if intensity < policy.threshold {
                trace.push(format!(
                    "{} {:.3} below activation {:.3}",
                    signal_type, intensity, policy.threshold
                ));
                continue;
            }
            applied.push(signal_type);

            for rule in &policy.rules {
                match rule {
                    ModulationRule::Numeric {
                        parameter,
                        transform,
                    } => {
                        let current = params.get(*parameter);
                        let ctx = EvalContext {
                            intensity,
                            current,
                            levels: &present,
                        };
                        match transform.evaluate(&ctx) {
                            Ok(value) => {
                                let value = self.guarded(*parameter, current, value, &mut guards);
                                params.set(*parameter, value);
                                if params.get(*parameter) != current {
                                    trace.push(format!(
                                        "{}: {} {:.3} -> {:.3}",
                                        signal_type,
                                        parameter,
                                        current,
                                        params.get(*parameter)
                                    ));
                                }
                            }
                            Err(e) => {
                                failures += 1;
                                error!(
                                    %signal_type,
                                    %parameter,
                                    error = %e,
                                    "Transform failed, keeping previous value"
                                );
                                trace.push(format!(
                                    "{}: {} transform failed ({}), kept {:.3}",
                                    signal_type, parameter, e, current
                                ));
                            }
                        }
                    }
                    ModulationRule::SafetyMode { when, mode } => {
                        let ctx = EvalContext {
                            intensity,
                            current: 0.0,
                            levels: &present,
                        };
                        match when.holds(&ctx) {
                            Ok(true) => {
                                let before = params.safety_mode;
                                let next = mode_ceiling.map_or(*mode, |ceiling| (*mode).min(ceiling));
                                if next < before {
                                    mode_ceiling = Some(next);
                                }
                                params.safety_mode = next;
                                if next != before {
                                    trace.push(format!(
                                        "{}: safety_mode {} -> {}",
                                        signal_type, before, next
                                    ));
                                }
                            }
                            Ok(false) => {}
                            Err(e) => {
                                failures += 1;
                                error!(%signal_type, error = %e, "Safety-mode predicate failed");
                                trace.push(format!(
                                    "{}: safety_mode predicate failed ({})",
                                    signal_type, e
                                ));
                            }
                        }
                    }
                    ModulationRule::RestrictTools { when, allow } => {
                        let ctx = EvalContext {
                            intensity,
                            current: 0.0,
                            levels: &present,
                        };
                        match when.holds(&ctx) {
                            Ok(true) => {
                                let before = params.tool_allowlist.len();
                                params.tool_allowlist.retain(|tool| allow.contains(tool));
                                if params.tool_allowlist.len() != before {
                                    trace.push(format!(
                                        "{}: tools restricted to [{}]",
                                        signal_type,
                                        params.tool_allowlist.join(",")
                                    ));
                                }
                            }
                            Ok(false) => {}
                            Err(e) => {
                                failures += 1;
                                error!(%signal_type, error = %e, "Tool predicate failed");
                                trace.push(format!(
                                    "{}: tool predicate failed ({})",
                                    signal_type, e
                                ));
                            }
                        }
                    }
                }
            }
        }

        params.clamp_to(&self.bounds);

        MappingOutcome {
            parameters: params,
            applied,
            trace,
            failures,
        }
    }

    // A move in the parameter's safe direction records a guard; a later move
    // in the other direction stops at the tightest guard seen so far.
    fn guarded(
        &self,
        parameter: Parameter,
        current: f64,
        proposed: f64,
        guards: &mut [Option<f64>; Parameter::COUNT],
    ) -> f64 {
        let bound = self.bounds.get(parameter);
        let proposed = bound.clamp(proposed);
        let guard = &mut guards[parameter.index()];

        match parameter.tightening() {
            Tightening::Lower => {
                if proposed < current {
                    *guard = Some(guard.map_or(proposed, |g| g.min(proposed)));
                    proposed
                } else {
                    guard.map_or(proposed, |g| proposed.min(g))
                }
            }
            Tightening::Raise => {
                if proposed > current {
                    *guard = Some(guard.map_or(proposed, |g| g.max(proposed)));
                    proposed
                } else {
                    guard.map_or(proposed, |g| proposed.max(g))
                }
            }
        }
    }
}

impl Default for ModulationMapper {
    fn default() -> Self {
        Self::new(ParameterBounds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation::transform::{Predicate, Transform};
    use crate::policy::HormonePolicy;
    use proptest::prelude::*;

    const T0: i64 = 1_700_000_000_000;

    fn signal(signal_type: SignalType, level: f64) -> Signal {
        Signal::new(signal_type, level).created_at(T0)
    }

    #[test]
    fn test_no_signals_yields_baseline() {
        let mapper = ModulationMapper::default();
        let outcome = mapper.map_signals(&[], &PolicyTable::defaults());
        assert_eq!(outcome.parameters, mapper.baseline());
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn test_stress_lowers_temperature_and_tokens() {
        let mapper = ModulationMapper::default();
        let baseline = mapper.baseline();
        let outcome = mapper.map_signals(
            &[signal(SignalType::Stress, 0.9)],
            &PolicyTable::defaults(),
        );

        assert!(outcome.parameters.temperature <= baseline.temperature);
        assert!(outcome.parameters.max_output_tokens < baseline.max_output_tokens);
        assert_eq!(outcome.applied, vec![SignalType::Stress]);
        assert_eq!(outcome.failures, 0);
    }

    #[test]
    fn test_below_activation_is_ignored() {
        let mapper = ModulationMapper::default();
        let outcome = mapper.map_signals(
            &[signal(SignalType::Curiosity, 0.05)],
            &PolicyTable::defaults(),
        );
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.parameters, mapper.baseline());
    }

    #[test]
    fn test_later_signal_cannot_loosen_tightened_bound() {
        let mut policies = PolicyTable::defaults();
        let mut stress = policies.get(SignalType::Stress).clone();
        stress.rules = vec![ModulationRule::numeric(
            Parameter::Temperature,
            Transform::constant(0.2),
        )];
        policies.set(SignalType::Stress, stress).unwrap();

        let mut curiosity = policies.get(SignalType::Curiosity).clone();
        curiosity.rules = vec![
            ModulationRule::numeric(Parameter::Temperature, Transform::constant(1.4)),
            ModulationRule::safety_mode(Predicate::Always, SafetyMode::Creative),
        ];
        policies.set(SignalType::Curiosity, curiosity).unwrap();

        let mut alarm = policies.get(SignalType::Alarm).clone();
        alarm.rules = vec![ModulationRule::safety_mode(Predicate::Always, SafetyMode::Strict)];
        policies.set(SignalType::Alarm, alarm).unwrap();

        let mapper = ModulationMapper::default();
        let outcome = mapper.map_signals(
            &[
                signal(SignalType::Curiosity, 0.9),
                signal(SignalType::Stress, 0.9),
                signal(SignalType::Alarm, 0.9),
            ],
            &policies,
        );

        assert_eq!(outcome.parameters.temperature, 0.2);
        assert_eq!(outcome.parameters.safety_mode, SafetyMode::Strict);
        assert_eq!(
            outcome.applied,
            vec![SignalType::Alarm, SignalType::Stress, SignalType::Curiosity]
        );
    }

    #[test]
    fn test_raise_direction_guard() {
        let mut policies = PolicyTable::defaults();
        let mut uncertainty = policies.get(SignalType::Uncertainty).clone();
        uncertainty.rules = vec![ModulationRule::numeric(
            Parameter::RetrievalK,
            Transform::constant(12.0),
        )];
        policies.set(SignalType::Uncertainty, uncertainty).unwrap();

        let mut confidence = policies.get(SignalType::Confidence).clone();
        confidence.rules = vec![ModulationRule::numeric(
            Parameter::RetrievalK,
            Transform::constant(2.0),
        )];
        policies.set(SignalType::Confidence, confidence).unwrap();

        let outcome = ModulationMapper::default().map_signals(
            &[
                signal(SignalType::Confidence, 0.9),
                signal(SignalType::Uncertainty, 0.9),
            ],
            &policies,
        );
        assert_eq!(outcome.parameters.retrieval_k, 12);
    }

    #[test]
    fn test_untightened_parameter_may_loosen() {
        let mapper = ModulationMapper::default();
        let outcome = mapper.map_signals(
            &[signal(SignalType::Curiosity, 0.8)],
            &PolicyTable::defaults(),
        );
        assert!(outcome.parameters.temperature > mapper.baseline().temperature);
        assert!(outcome.parameters.planner_beam > mapper.baseline().planner_beam);
    }

    #[test]
    fn test_tools_only_narrow() {
        let mut policies = PolicyTable::defaults();
        let mut reward = policies.get(SignalType::Reward).clone();
        reward.rules = vec![ModulationRule::restrict_tools(
            Predicate::Always,
            &["read", "write", "teleport"],
        )];
        policies.set(SignalType::Reward, reward).unwrap();

        let outcome =
            ModulationMapper::default().map_signals(&[signal(SignalType::Reward, 0.9)], &policies);
        assert_eq!(outcome.parameters.tool_allowlist, vec!["read", "write"]);
    }

    #[test]
    fn test_failed_transform_keeps_previous_value() {
        let mut policies = PolicyTable::defaults();
        let broken = HormonePolicy {
            rules: vec![
                ModulationRule::numeric(
                    Parameter::Temperature,
                    Transform::clamp(Transform::Current, 1.0, 0.0),
                ),
                ModulationRule::numeric(Parameter::TopP, Transform::constant(0.5)),
            ],
            ..policies.get(SignalType::Reward).clone()
        };
        // Bypass load-time validation to exercise the runtime fallback
        policies.set_unchecked(SignalType::Reward, broken);

        let mapper = ModulationMapper::default();
        let outcome = mapper.map_signals(&[signal(SignalType::Reward, 0.9)], &policies);

        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.parameters.temperature, mapper.baseline().temperature);
        assert_eq!(outcome.parameters.top_p, 0.5);
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mapper = ModulationMapper::default();
        let policies = PolicyTable::defaults();
        let signals: Vec<Signal> = SignalType::ALL
            .iter()
            .enumerate()
            .map(|(i, t)| signal(*t, 0.3 + 0.1 * i as f64))
            .collect();

        let first = mapper.map_signals(&signals, &policies);
        for _ in 0..10 {
            assert_eq!(mapper.map_signals(&signals, &policies), first);
        }
        assert!(first.parameters.is_within(mapper.bounds()));
    }

    #[test]
    fn test_level_table_takes_maximum() {
        let levels = level_table(&[
            signal(SignalType::Stress, 0.3),
            signal(SignalType::Stress, 0.6),
        ]);
        assert_eq!(levels[SignalType::Stress.index()], Some(0.6));
        assert_eq!(levels[SignalType::Alarm.index()], None);
    }

    proptest! {
        #[test]
        fn prop_parameters_stay_within_bounds(
            picks in proptest::collection::vec((0..SignalType::COUNT, -5.0f64..5.0), 0..16),
        ) {
            let mapper = ModulationMapper::default();
            let policies = PolicyTable::defaults();
            let signals: Vec<Signal> = picks
                .iter()
                .map(|(i, level)| signal(SignalType::ALL[*i], *level))
                .collect();

            let first = mapper.map_signals(&signals, &policies);
            prop_assert!(first.parameters.is_within(mapper.bounds()));

            let again = mapper.map_signals(&signals, &policies);
            prop_assert_eq!(&again, &first);
            prop_assert_eq!(
                again.parameters.temperature.to_bits(),
                first.parameters.temperature.to_bits()
            );
        }
    }
}

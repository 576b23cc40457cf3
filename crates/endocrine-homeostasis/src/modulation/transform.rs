//! Transform interpreter
//!
//! Signal-to-parameter transforms are a closed set of tagged variants evaluated
//! by a small recursive interpreter. Evaluation reads only the variables in
//! [`EvalContext`], performs no I/O, and is bounded by [`MAX_DEPTH`] and
//! [`MAX_PREDICATES`].
//!
//! ```text
//! x        normalized intensity of the signal owning the rule
//! current  running value of the parameter being modulated
//! level(t) intensity of another active signal type (0 when absent)
//! ```

use endocrine_common::{SignalType, TransformError};
use serde::{Deserialize, Serialize};

/// Maximum nesting of transforms and predicates
pub const MAX_DEPTH: usize = 8;

/// Maximum entries in a single `All` predicate
pub const MAX_PREDICATES: usize = 8;

/// Variables visible to a transform
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Intensity of the signal that owns the rule
    pub intensity: f64,
    /// Current value of the target parameter
    pub current: f64,
    /// Intensity per signal type, 0 when the type is not active
    pub levels: &'a [f64; SignalType::COUNT],
}

impl EvalContext<'_> {
    #[inline]
    fn level(&self, signal_type: SignalType) -> f64 {
        self.levels[signal_type.index()]
    }
}

/// Value-producing expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// Fixed value
    Constant { value: f64 },
    /// Leave the parameter unchanged
    Current,
    /// `slope * x + intercept`
    Linear { slope: f64, intercept: f64 },
    /// `current * (intercept + slope * x)`
    Scale { slope: f64, intercept: f64 },
    /// `current + slope * x`
    Offset { slope: f64 },
    /// Inner transform limited to `[min, max]`
    Clamp {
        inner: Box<Transform>,
        min: f64,
        max: f64,
    },
    /// `then` if the predicate holds, else `otherwise`
    Conditional {
        when: Predicate,
        then: Box<Transform>,
        otherwise: Box<Transform>,
    },
}

/// Boolean condition over the evaluation context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    IntensityAbove { bound: f64 },
    IntensityBelow { bound: f64 },
    SignalAbove { signal: SignalType, bound: f64 },
    SignalBelow { signal: SignalType, bound: f64 },
    All { of: Vec<Predicate> },
}

impl Transform {
    pub fn constant(value: f64) -> Self {
        Transform::Constant { value }
    }

    pub fn linear(slope: f64, intercept: f64) -> Self {
        Transform::Linear { slope, intercept }
    }

    pub fn scale(slope: f64, intercept: f64) -> Self {
        Transform::Scale { slope, intercept }
    }

    pub fn offset(slope: f64) -> Self {
        Transform::Offset { slope }
    }

    pub fn clamp(inner: Transform, min: f64, max: f64) -> Self {
        Transform::Clamp {
            inner: Box::new(inner),
            min,
            max,
        }
    }

    pub fn conditional(when: Predicate, then: Transform, otherwise: Transform) -> Self {
        Transform::Conditional {
            when,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Evaluate against a context
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<f64, TransformError> {
        let value = self.eval(ctx, 0)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(TransformError::NonFinite)
        }
    }

    fn eval(&self, ctx: &EvalContext<'_>, depth: usize) -> Result<f64, TransformError> {
        if depth >= MAX_DEPTH {
            return Err(TransformError::DepthExceeded { limit: MAX_DEPTH });
        }

        let x = ctx.intensity;
        let value = match self {
            Transform::Constant { value } => *value,
            Transform::Current => ctx.current,
            Transform::Linear { slope, intercept } => slope * x + intercept,
            Transform::Scale { slope, intercept } => ctx.current * (intercept + slope * x),
            Transform::Offset { slope } => ctx.current + slope * x,
            Transform::Clamp { inner, min, max } => {
                if min > max || min.is_nan() || max.is_nan() {
                    return Err(TransformError::InvalidClamp {
                        min: *min,
                        max: *max,
                    });
                }
                inner.eval(ctx, depth + 1)?.max(*min).min(*max)
            }
            Transform::Conditional {
                when,
                then,
                otherwise,
            } => {
                if when.holds_at(ctx, depth + 1)? {
                    then.eval(ctx, depth + 1)?
                } else {
                    otherwise.eval(ctx, depth + 1)?
                }
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(TransformError::NonFinite)
        }
    }

    /// Static check run when a policy is loaded
    pub fn validate(&self) -> Result<(), TransformError> {
        self.check(0)
    }

    fn check(&self, depth: usize) -> Result<(), TransformError> {
        if depth >= MAX_DEPTH {
            return Err(TransformError::DepthExceeded { limit: MAX_DEPTH });
        }
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());

        match self {
            Transform::Current => Ok(()),
            Transform::Constant { value } if finite(&[*value]) => Ok(()),
            Transform::Linear { slope, intercept } | Transform::Scale { slope, intercept }
                if finite(&[*slope, *intercept]) =>
            {
                Ok(())
            }
            Transform::Offset { slope } if finite(&[*slope]) => Ok(()),
            Transform::Clamp { inner, min, max } => {
                if !finite(&[*min, *max]) || min > max {
                    return Err(TransformError::InvalidClamp {
                        min: *min,
                        max: *max,
                    });
                }
                inner.check(depth + 1)
            }
            Transform::Conditional {
                when,
                then,
                otherwise,
            } => {
                when.check(depth + 1)?;
                then.check(depth + 1)?;
                otherwise.check(depth + 1)
            }
            _ => Err(TransformError::NonFinite),
        }
    }
}

impl Predicate {
    pub fn holds(&self, ctx: &EvalContext<'_>) -> Result<bool, TransformError> {
        self.holds_at(ctx, 0)
    }

    fn holds_at(&self, ctx: &EvalContext<'_>, depth: usize) -> Result<bool, TransformError> {
        if depth >= MAX_DEPTH {
            return Err(TransformError::DepthExceeded { limit: MAX_DEPTH });
        }
        Ok(match self {
            Predicate::Always => true,
            Predicate::IntensityAbove { bound } => ctx.intensity > *bound,
            Predicate::IntensityBelow { bound } => ctx.intensity < *bound,
            Predicate::SignalAbove { signal, bound } => ctx.level(*signal) > *bound,
            Predicate::SignalBelow { signal, bound } => ctx.level(*signal) < *bound,
            Predicate::All { of } => {
                if of.len() > MAX_PREDICATES {
                    return Err(TransformError::TooManyPredicates {
                        len: of.len(),
                        limit: MAX_PREDICATES,
                    });
                }
                for predicate in of {
                    if !predicate.holds_at(ctx, depth + 1)? {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    /// Static check run when a policy is loaded
    pub fn validate(&self) -> Result<(), TransformError> {
        self.check(0)
    }

    fn check(&self, depth: usize) -> Result<(), TransformError> {
        if depth >= MAX_DEPTH {
            return Err(TransformError::DepthExceeded { limit: MAX_DEPTH });
        }
        match self {
            Predicate::Always => Ok(()),
            Predicate::IntensityAbove { bound }
            | Predicate::IntensityBelow { bound }
            | Predicate::SignalAbove { bound, .. }
            | Predicate::SignalBelow { bound, .. } => {
                if bound.is_nan() {
                    Err(TransformError::NonFinite)
                } else {
                    Ok(())
                }
            }
            Predicate::All { of } => {
                if of.len() > MAX_PREDICATES {
                    return Err(TransformError::TooManyPredicates {
                        len: of.len(),
                        limit: MAX_PREDICATES,
                    });
                }
                of.iter().try_for_each(|p| p.check(depth + 1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(intensity: f64, current: f64, levels: &[f64; SignalType::COUNT]) -> EvalContext<'_> {
        EvalContext {
            intensity,
            current,
            levels,
        }
    }

    const QUIET: [f64; SignalType::COUNT] = [0.0; SignalType::COUNT];

    #[test]
    fn test_arithmetic_variants() {
        let c = ctx(0.5, 2.0, &QUIET);
        assert_eq!(Transform::constant(3.0).evaluate(&c).unwrap(), 3.0);
        assert_eq!(Transform::Current.evaluate(&c).unwrap(), 2.0);
        assert!((Transform::linear(2.0, 0.1).evaluate(&c).unwrap() - 1.1).abs() < 1e-12);
        assert_eq!(Transform::scale(-0.5, 1.0).evaluate(&c).unwrap(), 1.5);
        assert_eq!(Transform::offset(4.0).evaluate(&c).unwrap(), 4.0);
    }

    #[test]
    fn test_clamp() {
        let c = ctx(1.0, 0.0, &QUIET);
        let t = Transform::clamp(Transform::linear(10.0, 0.0), 0.0, 2.5);
        assert_eq!(t.evaluate(&c).unwrap(), 2.5);

        let inverted = Transform::clamp(Transform::Current, 1.0, 0.0);
        assert!(matches!(
            inverted.evaluate(&c),
            Err(TransformError::InvalidClamp { .. })
        ));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_conditional_on_other_signal() {
        let mut levels = QUIET;
        levels[SignalType::Stress.index()] = 0.8;

        let t = Transform::conditional(
            Predicate::SignalAbove {
                signal: SignalType::Stress,
                bound: 0.5,
            },
            Transform::Current,
            Transform::offset(0.4),
        );

        assert_eq!(t.evaluate(&ctx(1.0, 0.7, &levels)).unwrap(), 0.7);
        assert!((t.evaluate(&ctx(1.0, 0.7, &QUIET)).unwrap() - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_all_predicate() {
        let mut levels = QUIET;
        levels[SignalType::Alarm.index()] = 0.2;
        let p = Predicate::All {
            of: vec![
                Predicate::IntensityAbove { bound: 0.5 },
                Predicate::SignalBelow {
                    signal: SignalType::Alarm,
                    bound: 0.1,
                },
            ],
        };
        assert!(!p.holds(&ctx(0.9, 0.0, &levels)).unwrap());
        assert!(p.holds(&ctx(0.9, 0.0, &QUIET)).unwrap());
        assert!(!p.holds(&ctx(0.4, 0.0, &QUIET)).unwrap());
    }

    #[test]
    fn test_non_finite_result_is_error() {
        let c = ctx(1.0, f64::MAX, &QUIET);
        let t = Transform::scale(0.0, 10.0);
        assert_eq!(t.evaluate(&c), Err(TransformError::NonFinite));

        assert!(Transform::constant(f64::NAN).validate().is_err());
        assert!(Transform::linear(f64::INFINITY, 0.0).validate().is_err());
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut t = Transform::Current;
        for _ in 0..MAX_DEPTH {
            t = Transform::clamp(t, 0.0, 1.0);
        }
        assert_eq!(
            t.evaluate(&ctx(0.5, 0.5, &QUIET)),
            Err(TransformError::DepthExceeded { limit: MAX_DEPTH })
        );
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_predicate_fan_out_is_bounded() {
        let p = Predicate::All {
            of: vec![Predicate::Always; MAX_PREDICATES + 1],
        };
        assert!(matches!(
            p.holds(&ctx(0.5, 0.0, &QUIET)),
            Err(TransformError::TooManyPredicates { .. })
        ));
    }

    #[test]
    fn test_serde_tagged_form() {
        let json = r#"{"kind":"conditional",
            "when":{"kind":"signal_above","signal":"STRESS","bound":0.5},
            "then":{"kind":"current"},
            "otherwise":{"kind":"offset","slope":0.4}}"#;
        let t: Transform = serde_json::from_str(json).unwrap();
        assert!(matches!(t, Transform::Conditional { .. }));
        t.validate().unwrap();
    }
}

//! Homeostasis controller
//!
//! Owns the regulation state and runs the event pipeline:
//!
//! ```text
//! event -> raw signals -> detector -> damping -> cooldown -> bus
//!       -> emergency check -> hormone levels -> active snapshot -> mapper -> override -> audit
//! ```
//!
//! All mutable state lives behind one mutex. Bus subscribers and audit sinks
//! are invoked only after it is released, so a handler may call back into the
//! controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use endocrine_bus::{Delivery, OscillationDetector, SignalBus};
use endocrine_common::{
    clamp_unit, now_millis, ModulationParameters, RawSignal, Signal, SignalType,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditRecord, AuditSink, AuditTrail, EventEnvelope};
use crate::events::{self, EventContext};
use crate::modulation::{MappingOutcome, ModulationMapper};
use crate::policy::PolicyTable;
use crate::telemetry::ControllerMetrics;
use crate::{ControllerConfig, LEVEL_EPSILON, MONITOR_SOURCE};

/// Controller mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Normal,
    /// Inside a regulation pass
    Regulating,
    /// Conservative override in force
    Emergency,
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlState::Normal => write!(f, "normal"),
            ControlState::Regulating => write!(f, "regulating"),
            ControlState::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Default)]
struct EmergencyState {
    active: bool,
    /// Set by an operator; only `clear_emergency` ends it
    manual: bool,
    since: Option<i64>,
    calm_since: Option<i64>,
    triggers: u64,
    reason: Option<String>,
}

struct ControllerState {
    mode: ControlState,
    levels: [f64; SignalType::COUNT],
    last_emission: [Option<i64>; SignalType::COUNT],
    detector: OscillationDetector,
    emergency: EmergencyState,
    stress_streak: u32,
    audit: AuditTrail,
}

impl ControllerState {
    fn resolve_mode(&mut self) {
        self.mode = if self.emergency.active {
            ControlState::Emergency
        } else {
            ControlState::Normal
        };
    }
}

/// Work produced by one regulation pass, finished after the lock is released
#[derive(Default)]
struct RegulationPass {
    accepted: Vec<Signal>,
    deliveries: Vec<Delivery>,
    notes: Vec<String>,
    oscillating: bool,
}

impl RegulationPass {
    fn dispatch(self) -> Vec<Signal> {
        for delivery in self.deliveries {
            delivery.dispatch();
        }
        self.accepted
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: ControlState,
    pub hormone_levels: Vec<(SignalType, f64)>,
    pub emergency_since: Option<i64>,
    pub emergency_reason: Option<String>,
    pub emergency_triggers: u64,
    pub stress_streak: u32,
    pub oscillating: Vec<SignalType>,
    pub audit_len: usize,
    pub audit_total: u64,
    pub running: bool,
}

/// Outcome of one monitor tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorReport {
    pub stress_streak: u32,
    /// Safety-critical types currently oscillating
    pub oscillating: Vec<SignalType>,
    /// Why emergency was (re)asserted this tick
    pub triggered: Option<String>,
    pub recovered: bool,
}

/// Event-driven homeostasis controller
pub struct HomeostasisController {
    config: ControllerConfig,
    bus: Arc<SignalBus>,
    policies: PolicyTable,
    mapper: ModulationMapper,
    state: Mutex<ControllerState>,
    sinks: RwLock<Vec<Arc<dyn AuditSink>>>,
    metrics: Option<ControllerMetrics>,
    pub(super) running: AtomicBool,
    pub(super) shutdown: Notify,
}

impl HomeostasisController {
    /// Create a controller with the built-in policy table
    pub fn new(bus: Arc<SignalBus>, config: ControllerConfig) -> Self {
        Self::with_policies(bus, config, PolicyTable::defaults())
    }

    pub fn with_policies(bus: Arc<SignalBus>, config: ControllerConfig, policies: PolicyTable) -> Self {
        let config = config.sanitized();
        let state = ControllerState {
            mode: ControlState::Normal,
            levels: [0.0; SignalType::COUNT],
            last_emission: [None; SignalType::COUNT],
            detector: OscillationDetector::new(config.detector.clone()),
            emergency: EmergencyState::default(),
            stress_streak: 0,
            audit: AuditTrail::new(config.audit_capacity),
        };

        Self {
            mapper: ModulationMapper::new(config.bounds.clone()),
            config,
            bus,
            policies,
            state: Mutex::new(state),
            sinks: RwLock::new(Vec::new()),
            metrics: None,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Attach prometheus metrics
    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.bus
    }

    pub fn metrics(&self) -> Option<&ControllerMetrics> {
        self.metrics.as_ref()
    }

    /// Register an outbound audit writer
    pub fn add_sink(&self, sink: Arc<dyn AuditSink>) {
        self.sinks.write().push(sink);
    }

    /// Map a domain event to raw signals (no state change)
    pub fn on_event(&self, event_type: &str, context: &EventContext) -> Vec<RawSignal> {
        events::on_event(event_type, context)
    }

    /// Regulate raw signals at the current time
    pub fn regulate(&self, raw: Vec<RawSignal>) -> Vec<Signal> {
        self.regulate_at(raw, now_millis())
    }

    /// Regulate raw signals as of `now`, returning the signals the bus accepted
    pub fn regulate_at(&self, raw: Vec<RawSignal>, now: i64) -> Vec<Signal> {
        let mut pass = RegulationPass::default();
        {
            let mut state = self.state.lock();
            state.mode = ControlState::Regulating;
            self.regulate_locked(&mut state, raw, now, &mut pass);
            state.resolve_mode();
        }
        pass.dispatch()
    }

    /// Parameters for an explicit signal set under the current emergency flag
    pub fn compute_modulation(&self, active: &[Signal]) -> ModulationParameters {
        let emergency = self.state.lock().emergency.active;
        self.modulate(active, emergency).parameters
    }

    /// Full pipeline at the current time
    pub fn process_event(&self, event_type: &str, context: EventContext) -> ModulationParameters {
        self.process_event_at(event_type, context, now_millis())
    }

    /// Full pipeline as of `now`. Never fails; every call leaves one audit record.
    #[instrument(skip(self, context))]
    pub fn process_event_at(
        &self,
        event_type: &str,
        context: EventContext,
        now: i64,
    ) -> ModulationParameters {
        let started = Instant::now();
        let raw = events::on_event(event_type, &context);
        if raw.is_empty() {
            debug!("Event produced no signals");
        }

        let mut pass = RegulationPass::default();
        let (record, levels, emergency, failures) = {
            let mut state = self.state.lock();
            state.mode = ControlState::Regulating;

            self.regulate_locked(&mut state, raw, now, &mut pass);
            self.evaluate_recovery_locked(&mut state, now, &mut pass.notes);

            let active = self.bus.active_signals_at(now);
            let emergency = state.emergency.active;
            let outcome = self.modulate(&active, emergency);

            let mut explanation = std::mem::take(&mut pass.notes);
            explanation.extend(outcome.trace);
            if emergency {
                explanation.push(format!(
                    "emergency override in force ({})",
                    state.emergency.reason.as_deref().unwrap_or("unspecified")
                ));
            }
            if explanation.is_empty() {
                explanation.push("no active signals above activation".to_string());
            }

            let oscillating = pass.oscillating || state.detector.any_oscillating();
            let record = AuditRecord::new(
                now,
                EventEnvelope::new(event_type, context),
                active,
                outcome.parameters,
            )
            .with_explanation(explanation.join("; "))
            .with_flags(oscillating, emergency);

            state.audit.append(record.clone());
            state.resolve_mode();
            (record, state.levels, emergency, outcome.failures)
        };

        pass.dispatch();
        self.write_sinks(&record);

        if let Some(metrics) = &self.metrics {
            metrics.events_processed.inc();
            metrics.transform_failures.inc_by(failures as u64);
            metrics.record_levels(&levels);
            metrics.set_emergency(emergency);
            metrics
                .process_duration_seconds
                .observe(started.elapsed().as_secs_f64());
        }

        record.resulting_parameters
    }

    /// Decay hormone levels and expire old state as of `now`.
    ///
    /// Also advances emergency recovery, so the calm window starts at the
    /// first tick on which every safety-critical level is below threshold.
    ///
    /// Returns the number of bus signals purged.
    pub fn decay_tick(&self, now: i64) -> usize {
        let levels = {
            let mut state = self.state.lock();
            for (signal_type, policy) in self.policies.iter() {
                let level = &mut state.levels[signal_type.index()];
                *level *= 1.0 - policy.decay_rate;
                if *level < LEVEL_EPSILON {
                    *level = 0.0;
                }
            }
            let pruned = state.detector.prune_stale(now);
            if pruned > 0 {
                debug!(pruned, "Pruned stale oscillation samples");
            }
            let mut notes = Vec::new();
            self.evaluate_recovery_locked(&mut state, now, &mut notes);
            state.resolve_mode();
            state.levels
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_levels(&levels);
        }
        self.bus.purge_expired(now)
    }

    /// Watch for sustained stress and safety-critical oscillation as of `now`
    pub fn monitor_tick(&self, now: i64) -> MonitorReport {
        let mut report = MonitorReport::default();
        let mut notes = Vec::new();
        let mut delivery = None;
        {
            let mut state = self.state.lock();

            if state.levels[SignalType::Stress.index()] >= self.config.sustained_stress_level {
                state.stress_streak += 1;
            } else {
                state.stress_streak = 0;
            }
            report.stress_streak = state.stress_streak;

            report.oscillating = state
                .detector
                .oscillating_types()
                .into_iter()
                .filter(|t| t.is_safety_critical())
                .collect();

            if state.stress_streak >= self.config.sustained_stress_ticks {
                report.triggered = Some(format!(
                    "sustained stress for {} monitor ticks",
                    state.stress_streak
                ));
            } else if !report.oscillating.is_empty() {
                let names: Vec<&str> = report.oscillating.iter().map(|t| t.as_str()).collect();
                report.triggered = Some(format!("oscillating {}", names.join(",")));
            }

            match &report.triggered {
                Some(reason) => {
                    self.enter_emergency(&mut state, now, reason);
                    let policy = self.policies.get(SignalType::Alarm);
                    let alarm = Signal::new(SignalType::Alarm, 1.0)
                        .with_source(MONITOR_SOURCE)
                        .with_ttl(policy.ttl_ms)
                        .with_cooldown(policy.cooldown_ms)
                        .created_at(now);
                    delivery = self.bus.offer(alarm, now);
                }
                None => {
                    report.recovered = self.evaluate_recovery_locked(&mut state, now, &mut notes);
                }
            }
            state.resolve_mode();
        }

        if let Some(delivery) = delivery {
            delivery.dispatch();
        }
        if let Some(metrics) = &self.metrics {
            for signal_type in &report.oscillating {
                metrics.record_oscillation(*signal_type);
            }
            metrics.set_emergency(self.is_emergency());
        }
        report
    }

    /// Clear emergency mode if the calm window has elapsed as of `now`
    pub fn evaluate_recovery_at(&self, now: i64) -> bool {
        let mut notes = Vec::new();
        let mut state = self.state.lock();
        let recovered = self.evaluate_recovery_locked(&mut state, now, &mut notes);
        state.resolve_mode();
        recovered
    }

    /// Operator override: enter emergency until `clear_emergency`
    pub fn force_emergency(&self, reason: &str) {
        let now = now_millis();
        let record = {
            let mut state = self.state.lock();
            self.enter_emergency(&mut state, now, reason);
            state.emergency.manual = true;
            state.resolve_mode();
            self.audit_transition_locked(&mut state, now, "emergency_forced", reason)
        };
        self.write_sinks(&record);
        if let Some(metrics) = &self.metrics {
            metrics.set_emergency(true);
        }
    }

    /// Operator override: leave emergency immediately. Returns whether it was active.
    pub fn clear_emergency(&self) -> bool {
        let now = now_millis();
        let record = {
            let mut state = self.state.lock();
            if !state.emergency.active {
                return false;
            }
            self.exit_emergency(&mut state, now, "cleared by operator");
            state.resolve_mode();
            self.audit_transition_locked(&mut state, now, "emergency_cleared", "cleared by operator")
        };
        self.write_sinks(&record);
        if let Some(metrics) = &self.metrics {
            metrics.set_emergency(false);
        }
        true
    }

    pub fn is_emergency(&self) -> bool {
        self.state.lock().emergency.active
    }

    pub fn state(&self) -> ControlState {
        self.state.lock().mode
    }

    /// Copy of the hormone level table, in precedence order
    pub fn hormone_levels(&self) -> Vec<(SignalType, f64)> {
        let levels = self.state.lock().levels;
        SignalType::ALL
            .into_iter()
            .map(|t| (t, levels[t.index()]))
            .collect()
    }

    pub fn hormone_level(&self, signal_type: SignalType) -> f64 {
        self.state.lock().levels[signal_type.index()]
    }

    /// Up to `n` most recent audit records, oldest first
    pub fn audit_trail(&self, n: usize) -> Vec<AuditRecord> {
        self.state.lock().audit.recent(n)
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.state.lock();
        ControllerStatus {
            state: state.mode,
            hormone_levels: SignalType::ALL
                .into_iter()
                .map(|t| (t, state.levels[t.index()]))
                .collect(),
            emergency_since: state.emergency.since,
            emergency_reason: state.emergency.reason.clone(),
            emergency_triggers: state.emergency.triggers,
            stress_streak: state.stress_streak,
            oscillating: state.detector.oscillating_types(),
            audit_len: state.audit.len(),
            audit_total: state.audit.total_appended(),
            running: self.is_running(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn modulate(&self, active: &[Signal], emergency: bool) -> MappingOutcome {
        let mut outcome = self.mapper.map_signals(active, &self.policies);
        if emergency {
            outcome.parameters = self.config.emergency_override.clone();
        }
        outcome
    }

    fn regulate_locked(
        &self,
        state: &mut ControllerState,
        raw: Vec<RawSignal>,
        now: i64,
        pass: &mut RegulationPass,
    ) {
        for candidate in raw {
            let signal_type = candidate.signal_type;
            let idx = signal_type.index();
            let policy = self.policies.get(signal_type);

            let level = clamp_unit(candidate.level);
            state.detector.record(signal_type, now, level);
            let oscillating = state.detector.detect_oscillation(signal_type);
            let damping = state.detector.get_damping_factor(signal_type);
            if oscillating {
                pass.oscillating = true;
                pass.notes.push(format!("{} oscillating, damped x{}", signal_type, damping));
            }

            let regulated = (level * damping).clamp(0.0, policy.max_level);

            if let Some(last) = state.last_emission[idx] {
                let elapsed = now.saturating_sub(last);
                if elapsed < i64::try_from(policy.cooldown_ms).unwrap_or(i64::MAX) {
                    debug!(%signal_type, elapsed_ms = elapsed, "Signal skipped by cooldown");
                    pass.notes.push(format!("{} within cooldown, skipped", signal_type));
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rejected("cooldown");
                    }
                    continue;
                }
            }

            let signal = Signal::new(signal_type, regulated)
                .with_source(&candidate.source)
                .with_ttl(policy.ttl_ms)
                .with_cooldown(policy.cooldown_ms)
                .created_at(now);

            // Only an emission the bus accepts counts toward cooldown, levels and emergency
            match self.bus.offer(signal.clone(), now) {
                Some(delivery) => {
                    if let Some(threshold) = policy.emergency_threshold_for(signal_type) {
                        if regulated > threshold {
                            let reason = format!(
                                "{} {:.3} above emergency threshold {:.3}",
                                signal_type, regulated, threshold
                            );
                            pass.notes.push(reason.clone());
                            self.enter_emergency(state, now, &reason);
                        }
                    }

                    state.last_emission[idx] = Some(now);
                    state.levels[idx] = state.levels[idx].max(regulated);

                    debug!(signal = %signal, "Regulated signal published");
                    if let Some(metrics) = &self.metrics {
                        metrics.signals_accepted.inc();
                    }
                    pass.deliveries.push(delivery);
                    pass.accepted.push(signal);
                }
                None => {
                    pass.notes.push(format!("{} rejected by bus", signal_type));
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rejected("bus");
                    }
                }
            }
        }
    }

    fn enter_emergency(&self, state: &mut ControllerState, now: i64, reason: &str) {
        let emergency = &mut state.emergency;
        emergency.triggers += 1;
        emergency.calm_since = None;
        if let Some(metrics) = &self.metrics {
            metrics.emergency_triggers.inc();
        }

        if !emergency.active {
            emergency.active = true;
            emergency.since = Some(now);
            emergency.reason = Some(reason.to_string());
            warn!(reason, "Entering emergency mode");
        } else {
            debug!(reason, "Emergency re-asserted");
        }
    }

    fn exit_emergency(&self, state: &mut ControllerState, now: i64, reason: &str) {
        let emergency = &mut state.emergency;
        let duration_ms = emergency.since.map(|since| now.saturating_sub(since));
        emergency.active = false;
        emergency.manual = false;
        emergency.since = None;
        emergency.calm_since = None;
        emergency.reason = None;
        info!(reason, duration_ms, "Leaving emergency mode");
    }

    /// Safety-critical levels must stay below their emergency thresholds for
    /// the whole recovery window. A manual emergency never self-clears.
    fn evaluate_recovery_locked(
        &self,
        state: &mut ControllerState,
        now: i64,
        notes: &mut Vec<String>,
    ) -> bool {
        if !state.emergency.active || state.emergency.manual {
            return false;
        }

        let calm = SignalType::ALL.into_iter().all(|signal_type| {
            match self.policies.get(signal_type).emergency_threshold_for(signal_type) {
                Some(threshold) => state.levels[signal_type.index()] < threshold,
                None => true,
            }
        });
        if !calm {
            state.emergency.calm_since = None;
            return false;
        }

        let calm_since = *state.emergency.calm_since.get_or_insert(now);
        let calm_ms = now.saturating_sub(calm_since);
        let window = i64::try_from(self.config.emergency_recovery_ms).unwrap_or(i64::MAX);
        if calm_ms >= window {
            self.exit_emergency(state, now, "calm window elapsed");
            notes.push(format!("emergency cleared after {} ms calm", calm_ms));
            true
        } else {
            false
        }
    }

    fn audit_transition_locked(
        &self,
        state: &mut ControllerState,
        now: i64,
        event_type: &str,
        reason: &str,
    ) -> AuditRecord {
        let active = self.bus.active_signals_at(now);
        let emergency = state.emergency.active;
        let outcome = self.modulate(&active, emergency);
        let record = AuditRecord::new(
            now,
            EventEnvelope::new(event_type, EventContext::new()),
            active,
            outcome.parameters,
        )
        .with_explanation(reason.to_string())
        .with_flags(state.detector.any_oscillating(), emergency);
        state.audit.append(record.clone());
        record
    }

    fn write_sinks(&self, record: &AuditRecord) {
        // Copied out so a sink may register another sink
        let sinks: Vec<Arc<dyn AuditSink>> = self.sinks.read().clone();
        for sink in &sinks {
            sink.write(record);
        }
    }
}

impl std::fmt::Debug for HomeostasisController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeostasisController")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

//! Signal bus
//!
//! Holds the active signal set: for each signal type, the single most recent
//! accepted signal. Mutation and snapshot reads go through one bus-scoped
//! mutex. Subscribers are invoked after that mutex is released, using a copy
//! of the accepted signal, so a handler may publish again without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use endocrine_common::{clamp_unit, now_millis, Signal, SignalType};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

/// Subscriber callback. Errors and panics are caught and logged.
pub type SignalHandler = Arc<dyn Fn(&Signal) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`SignalBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: SignalHandler,
}

/// State guarded by the bus mutex
struct BusState {
    /// Most recent accepted signal per type
    active: [Option<Signal>; SignalType::COUNT],
    /// Acceptance time of the last accepted signal per type (Unix millis)
    last_accepted: [Option<i64>; SignalType::COUNT],
}

impl BusState {
    fn new() -> Self {
        Self {
            active: std::array::from_fn(|_| None),
            last_accepted: [None; SignalType::COUNT],
        }
    }
}

#[derive(Debug, Default)]
struct BusMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    expired: AtomicU64,
    handler_failures: AtomicU64,
}

/// Point-in-time bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Publishes accepted
    pub accepted: u64,
    /// Publishes rejected by cooldown
    pub rejected: u64,
    /// Entries dropped because their TTL elapsed
    pub expired: u64,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,
}

/// Notifications for one accepted signal, captured while the bus lock was held
/// and invoked by [`Delivery::dispatch`] after it was released.
#[must_use = "subscribers are only notified when the delivery is dispatched"]
pub struct Delivery {
    signal: Signal,
    handlers: Vec<(SubscriptionId, SignalHandler)>,
    metrics: Arc<BusMetrics>,
}

impl Delivery {
    /// Invoke every captured handler; returns how many failed
    pub fn dispatch(self) -> usize {
        let mut failures = 0;
        for (id, handler) in &self.handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&self.signal))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(
                        subscription = id.0,
                        signal_type = %self.signal.signal_type,
                        error = %e,
                        "Signal handler failed"
                    );
                }
                Err(_) => {
                    failures += 1;
                    error!(
                        subscription = id.0,
                        signal_type = %self.signal.signal_type,
                        "Signal handler panicked"
                    );
                }
            }
        }
        if failures > 0 {
            self.metrics
                .handler_failures
                .fetch_add(failures as u64, Ordering::Relaxed);
        }
        failures
    }
}

/// In-memory publish/subscribe store of active signals
pub struct SignalBus {
    state: Mutex<BusState>,
    subscribers: RwLock<HashMap<SignalType, Vec<Subscription>>>,
    next_subscription: AtomicU64,
    metrics: Arc<BusMetrics>,
}

impl SignalBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            metrics: Arc::new(BusMetrics::default()),
        }
    }

    /// Publish a signal at the current time
    pub fn publish(&self, signal: Signal) -> bool {
        self.publish_at(signal, now_millis())
    }

    /// Publish a signal as of `now` (Unix millis).
    ///
    /// Returns false, leaving the bus untouched, when the same type was
    /// accepted less than `signal.cooldown_ms` ago.
    pub fn publish_at(&self, signal: Signal, now: i64) -> bool {
        match self.offer(signal, now) {
            Some(delivery) => {
                delivery.dispatch();
                true
            }
            None => false,
        }
    }

    /// Store a signal without notifying subscribers yet.
    ///
    /// The caller must [`dispatch`](Delivery::dispatch) the returned delivery
    /// once it has released any locks of its own.
    pub fn offer(&self, mut signal: Signal, now: i64) -> Option<Delivery> {
        signal.level = clamp_unit(signal.level);
        let signal_type = signal.signal_type;
        let idx = signal_type.index();

        {
            let mut state = self.state.lock();
            if let Some(last) = state.last_accepted[idx] {
                let elapsed = now.saturating_sub(last);
                if elapsed < i64::try_from(signal.cooldown_ms).unwrap_or(i64::MAX) {
                    self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        %signal_type,
                        elapsed_ms = elapsed,
                        cooldown_ms = signal.cooldown_ms,
                        "Signal rejected by cooldown"
                    );
                    return None;
                }
            }
            state.last_accepted[idx] = Some(now);
            state.active[idx] = Some(signal.clone());
        }

        self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
        trace!(signal = %signal, "Signal accepted");

        let handlers = self
            .subscribers
            .read()
            .get(&signal_type)
            .map(|subs| {
                subs.iter()
                    .map(|s| (s.id, Arc::clone(&s.handler)))
                    .collect()
            })
            .unwrap_or_default();

        Some(Delivery {
            signal,
            handlers,
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Register a handler for one signal type
    pub fn subscribe<F>(&self, signal_type: SignalType, handler: F) -> SubscriptionId
    where
        F: Fn(&Signal) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(signal_type)
            .or_default()
            .push(Subscription {
                id,
                handler: Arc::new(handler),
            });
        debug!(%signal_type, subscription = id.0, "Subscribed");
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for subs in subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self, signal_type: SignalType) -> usize {
        self.subscribers
            .read()
            .get(&signal_type)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// All unexpired signals at the current time, in precedence order
    pub fn get_active_signals(&self) -> Vec<Signal> {
        self.active_signals_at(now_millis())
    }

    /// All signals unexpired as of `now`, in precedence order.
    ///
    /// Expired entries are purged as a side effect.
    pub fn active_signals_at(&self, now: i64) -> Vec<Signal> {
        let mut state = self.state.lock();
        let mut expired = 0u64;
        let mut active = Vec::with_capacity(SignalType::COUNT);

        for slot in state.active.iter_mut() {
            match slot {
                Some(signal) if signal.is_expired_at(now) => {
                    *slot = None;
                    expired += 1;
                }
                Some(signal) => active.push(signal.clone()),
                None => {}
            }
        }

        if expired > 0 {
            self.metrics.expired.fetch_add(expired, Ordering::Relaxed);
        }
        active
    }

    /// The active signal of one type, if present and unexpired as of `now`
    pub fn get_at(&self, signal_type: SignalType, now: i64) -> Option<Signal> {
        let mut state = self.state.lock();
        let slot = &mut state.active[signal_type.index()];
        if slot.as_ref().is_some_and(|s| s.is_expired_at(now)) {
            *slot = None;
            self.metrics.expired.fetch_add(1, Ordering::Relaxed);
        }
        slot.clone()
    }

    pub fn get(&self, signal_type: SignalType) -> Option<Signal> {
        self.get_at(signal_type, now_millis())
    }

    /// Drop every entry expired as of `now`; returns how many were dropped
    pub fn purge_expired(&self, now: i64) -> usize {
        let mut state = self.state.lock();
        let mut purged = 0;
        for slot in state.active.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.is_expired_at(now)) {
                *slot = None;
                purged += 1;
            }
        }
        drop(state);

        if purged > 0 {
            self.metrics
                .expired
                .fetch_add(purged as u64, Ordering::Relaxed);
            debug!(purged, "Purged expired signals");
        }
        purged
    }

    /// When a type was last accepted (Unix millis)
    pub fn last_accepted(&self, signal_type: SignalType) -> Option<i64> {
        self.state.lock().last_accepted[signal_type.index()]
    }

    /// Stored entries, possibly including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.state.lock().active.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all signals and cooldown history (subscribers are kept)
    pub fn clear(&self) {
        *self.state.lock() = BusState::new();
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            accepted: self.metrics.accepted.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            expired: self.metrics.expired.load(Ordering::Relaxed),
            handler_failures: self.metrics.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    const T0: i64 = 1_700_000_000_000;

    fn stress(level: f64) -> Signal {
        Signal::new(SignalType::Stress, level)
            .created_at(T0)
            .with_cooldown(500)
            .with_ttl(10_000)
    }

    #[test]
    fn test_publish_clamps_level() {
        let bus = SignalBus::new();
        assert!(bus.publish_at(stress(1.8), T0));
        assert_eq!(bus.get_at(SignalType::Stress, T0).unwrap().level, 1.0);

        let fatigue = Signal::new(SignalType::Fatigue, -0.4).created_at(T0);
        assert!(bus.publish_at(fatigue, T0));
        assert_eq!(bus.get_at(SignalType::Fatigue, T0).unwrap().level, 0.0);
    }

    #[test]
    fn test_cooldown_rejects_then_recovers() {
        let bus = SignalBus::new();
        assert!(bus.publish_at(stress(0.5), T0));

        // Second publish 50ms later is rejected and leaves the stored signal alone
        let second = stress(0.9).created_at(T0 + 50);
        assert!(!bus.publish_at(second, T0 + 50));
        let stored = bus.get_at(SignalType::Stress, T0 + 50).unwrap();
        assert_eq!(stored.level, 0.5);
        assert_eq!(bus.last_accepted(SignalType::Stress), Some(T0));

        // 600ms later the cooldown has elapsed
        let third = stress(0.7).created_at(T0 + 600);
        assert!(bus.publish_at(third, T0 + 600));
        assert_eq!(bus.get_at(SignalType::Stress, T0 + 600).unwrap().level, 0.7);

        let stats = bus.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn test_cooldown_is_per_type() {
        let bus = SignalBus::new();
        assert!(bus.publish_at(stress(0.5), T0));
        let alarm = Signal::new(SignalType::Alarm, 0.5)
            .created_at(T0)
            .with_cooldown(500);
        assert!(bus.publish_at(alarm, T0 + 10));
    }

    #[test]
    fn test_expired_signals_not_returned() {
        let bus = SignalBus::new();
        bus.publish_at(stress(0.5), T0);
        let reward = Signal::new(SignalType::Reward, 0.4)
            .created_at(T0)
            .with_ttl(100);
        bus.publish_at(reward, T0);

        assert_eq!(bus.active_signals_at(T0 + 50).len(), 2);

        let active = bus.active_signals_at(T0 + 100);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].signal_type, SignalType::Stress);
        // Purged as a side effect
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.stats().expired, 1);
    }

    #[test]
    fn test_active_signals_in_precedence_order() {
        let bus = SignalBus::new();
        for t in [SignalType::Curiosity, SignalType::Alarm, SignalType::Fatigue] {
            bus.publish_at(Signal::new(t, 0.5).created_at(T0), T0);
        }
        let types: Vec<_> = bus
            .active_signals_at(T0)
            .into_iter()
            .map(|s| s.signal_type)
            .collect();
        assert_eq!(
            types,
            vec![SignalType::Alarm, SignalType::Fatigue, SignalType::Curiosity]
        );
    }

    #[test]
    fn test_purge_expired() {
        let bus = SignalBus::new();
        bus.publish_at(stress(0.5).with_ttl(10), T0);
        bus.publish_at(Signal::new(SignalType::Reward, 0.4).created_at(T0), T0);
        assert_eq!(bus.purge_expired(T0 + 10), 1);
        assert_eq!(bus.purge_expired(T0 + 10), 0);
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_subscribers_notified_with_copy() {
        let bus = SignalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(SignalType::Stress, move |signal| {
            sink.lock().push(signal.level);
            Ok(())
        });

        bus.publish_at(stress(1.4), T0);
        bus.publish_at(Signal::new(SignalType::Reward, 0.3).created_at(T0), T0);

        assert_eq!(*seen.lock(), vec![1.0]);
    }

    #[test]
    fn test_failing_handler_does_not_abort_publish() {
        let bus = SignalBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe(SignalType::Stress, |_| anyhow::bail!("downstream unavailable"));
        bus.subscribe(SignalType::Stress, |_| panic!("handler bug"));
        let counter = Arc::clone(&calls);
        bus.subscribe(SignalType::Stress, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.publish_at(stress(0.5), T0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().handler_failures, 2);
        assert!(bus.get_at(SignalType::Stress, T0).is_some());
    }

    #[test]
    fn test_handler_can_publish_without_deadlock() {
        let bus = Arc::new(SignalBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(SignalType::Alarm, move |signal| {
            let echo = Signal::new(SignalType::Stress, signal.level).created_at(signal.created_at);
            inner.publish_at(echo, signal.created_at);
            Ok(())
        });

        bus.publish_at(Signal::new(SignalType::Alarm, 0.8).created_at(T0), T0);
        assert_eq!(bus.get_at(SignalType::Stress, T0).unwrap().level, 0.8);
    }

    #[test]
    fn test_offer_defers_notification() {
        let bus = SignalBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe(SignalType::Stress, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let delivery = bus.offer(stress(0.5), T0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(delivery.dispatch(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = SignalBus::new();
        let id = bus.subscribe(SignalType::Stress, |_| Ok(()));
        assert_eq!(bus.subscriber_count(SignalType::Stress), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(SignalType::Stress), 0);
    }

    #[test]
    fn test_clear_resets_cooldowns() {
        let bus = SignalBus::new();
        bus.publish_at(stress(0.5), T0);
        bus.clear();
        assert!(bus.is_empty());
        assert!(bus.publish_at(stress(0.5), T0 + 1));
    }

    #[tokio::test]
    async fn test_cooldown_with_wall_clock() {
        let bus = SignalBus::new();
        let make = || Signal::new(SignalType::Stress, 0.5).with_cooldown(500);

        assert!(bus.publish(make()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!bus.publish(make()));
        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        assert!(bus.publish(make()));
    }

    proptest! {
        #[test]
        fn prop_stored_levels_within_unit_interval(
            levels in proptest::collection::vec(-10.0f64..10.0, 1..50)
        ) {
            let bus = SignalBus::new();
            for (i, level) in levels.into_iter().enumerate() {
                let t = SignalType::ALL[i % SignalType::COUNT];
                bus.publish_at(Signal::new(t, level).created_at(T0), T0);
            }
            for signal in bus.active_signals_at(T0) {
                prop_assert!((0.0..=1.0).contains(&signal.level));
            }
        }
    }
}

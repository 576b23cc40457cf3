//! Endocrine daemon
//!
//! Runs the control loop with its background tasks and, optionally, a
//! synthetic event feed. Audit records are logged through `tracing`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use endocrine_bus::SignalBus;
use endocrine_common::{SignalType, VERSION};
use endocrine_homeostasis::{
    config::Settings, ControllerMetrics, EventContext, HomeostasisController, TracingAuditSink,
};

/// Events cycled through by the demo feed, with their context
fn demo_events() -> Vec<(&'static str, EventContext)> {
    let ctx = |value: serde_json::Value| value.as_object().cloned().unwrap_or_default();
    vec![
        ("task_succeeded", ctx(json!({ "quality": 0.8 }))),
        ("novel_input", ctx(json!({ "novelty": 0.9 }))),
        ("task_failed", ctx(json!({ "consecutive_failures": 1 }))),
        ("drift_detected", ctx(json!({ "magnitude": 0.4 }))),
        ("timeout", EventContext::new()),
        ("consensus_reached", ctx(json!({ "agreement": 0.9 }))),
        ("error_rate_spike", ctx(json!({ "error_rate": 0.6 }))),
        ("low_confidence", ctx(json!({ "confidence": 0.2 }))),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting Endocrine daemon v{}", VERSION);

    let settings = Settings::load()?;
    info!("Loaded configuration: {:?}", settings);

    let bus = Arc::new(SignalBus::new());
    let metrics = ControllerMetrics::new()?;
    let controller = Arc::new(
        HomeostasisController::new(Arc::clone(&bus), settings.controller.clone())
            .with_metrics(metrics),
    );
    controller.add_sink(Arc::new(TracingAuditSink));

    bus.subscribe(SignalType::Alarm, |signal| {
        warn!(source = %signal.source, level = signal.level, "ALARM raised");
        Ok(())
    });

    let handle = controller
        .start()
        .ok_or_else(|| anyhow::anyhow!("controller tasks already running"))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    };

    if settings.demo_interval_ms > 0 {
        let feed = Arc::clone(&controller);
        let period = Duration::from_millis(settings.demo_interval_ms);
        let demo = async move {
            let events = demo_events();
            let mut interval = tokio::time::interval(period);
            for (event_type, context) in events.iter().cycle() {
                interval.tick().await;
                let params = feed.process_event(event_type, context.clone());
                info!(event = event_type, params = %params, "Modulation updated");
            }
        };
        tokio::select! {
            _ = demo => {}
            _ = shutdown => {}
        }
    } else {
        shutdown.await;
    }

    handle.shutdown().await;

    if let Some(metrics) = controller.metrics() {
        info!("Final metrics:\n{}", metrics.gather_text());
    }
    info!(status = ?controller.status(), "Endocrine daemon stopped");
    Ok(())
}

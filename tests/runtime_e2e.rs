use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use raidcall::engine::{EnrichmentFuture, EnrichmentResult};
use raidcall::event::{Event, EventKind, Field};
use raidcall::output::{Message, Response, Severity};
use raidcall::trigger::{Pattern, Trigger, TriggerSet};
use raidcall::{
    alert_channel, AlertStream, EncounterId, EndReason, EngineConfig, EngineError, EngineRuntime, EnrichmentGateway,
    EnrichmentQuery, TriggerEngine,
};

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
}

fn cast(ms: i64, ability: &str) -> Event {
    Event::new(EventKind::CastStarted, at(ms)).with(Field::AbilityId, ability)
}

fn set() -> TriggerSet {
    TriggerSet::new("runtime")
        .trigger(
            Trigger::new("now")
                .on(EventKind::CastStarted)
                .pattern(Pattern::new().exact(Field::AbilityId, "100"))
                .respond(Response::info("aoe")),
        )
        .trigger(
            Trigger::new("later")
                .on(EventKind::CastStarted)
                .pattern(Pattern::new().exact(Field::AbilityId, "200"))
                .delay(Duration::from_secs(5))
                .respond(Response::alarm("getOut")),
        )
}

fn engine(config: EngineConfig) -> (TriggerEngine, AlertStream) {
    let (sink, alerts) = alert_channel(64);
    (TriggerEngine::new(config, sink).unwrap(), alerts)
}

async fn started(config: EngineConfig) -> (EngineRuntime, AlertStream) {
    let (engine, alerts) = engine(config);
    let runtime = EngineRuntime::spawn(engine).unwrap();
    runtime.load(set()).await.unwrap();
    runtime.start(EncounterId::new()).await.unwrap();
    (runtime, alerts)
}

#[tokio::test(start_paused = true)]
async fn delayed_firing_comes_due_on_the_wall_clock() {
    let (runtime, alerts) = started(EngineConfig::default()).await;

    runtime.submit(cast(0, "200")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(alerts.try_recv().is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let out = alerts.drain();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].payload.text, "Get Out");
    assert_eq!(out[0].emitted_at, at(5000));
}

#[tokio::test(start_paused = true)]
async fn events_are_processed_in_submission_order() {
    let (runtime, alerts) = started(EngineConfig::default()).await;
    for i in 0..10 {
        runtime.submit(cast(i * 100, "100")).await.unwrap();
    }
    runtime.end(EndReason::Reset).await.unwrap();

    let stamps: Vec<_> = alerts.drain().into_iter().map(|a| a.emitted_at).collect();
    assert_eq!(stamps, (0..10).map(|i| at(i * 100)).collect::<Vec<_>>());
    assert_eq!(runtime.stats().snapshot().events_submitted, 10);
}

#[tokio::test(start_paused = true)]
async fn try_submit_reports_a_full_queue() {
    let config = EngineConfig {
        command_queue_capacity: 1,
        ..EngineConfig::default()
    };
    let (engine, _alerts) = engine(config);
    let runtime = EngineRuntime::spawn(engine).unwrap();

    runtime.try_submit(cast(0, "100")).unwrap();
    let err = runtime.try_submit(cast(1, "100")).unwrap_err();
    assert!(matches!(err, EngineError::QueueFull { capacity: 1 }));
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn load_errors_come_back_through_the_handle() {
    let (runtime, _alerts) = started(EngineConfig::default()).await;
    let bad = TriggerSet::new("bad").trigger(Trigger::new("x"));
    let err = runtime.load(bad).await.unwrap_err();
    assert!(err.is_load());
}

struct Slow;

impl EnrichmentGateway for Slow {
    fn request(&self, _query: EnrichmentQuery) -> EnrichmentFuture {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(EnrichmentResult::Custom(serde_json::json!({ "phase": 2 })))
        })
    }
}

#[tokio::test(start_paused = true)]
async fn runtime_resumes_enrichment_at_projected_time() {
    let (sink, alerts) = alert_channel(16);
    let engine = TriggerEngine::new(EngineConfig::default(), sink)
        .unwrap()
        .with_gateway(Arc::new(Slow));
    let runtime = EngineRuntime::spawn(engine).unwrap();
    runtime
        .load(
            TriggerSet::new("custom").trigger(
                Trigger::new("phase")
                    .on(EventKind::CastStarted)
                    .enrich(|_| {
                        Ok(Some(EnrichmentQuery::Custom {
                            call: "getPhase".to_string(),
                            payload: serde_json::Value::Null,
                        }))
                    })
                    .output(|ctx| {
                        let phase = ctx
                            .enrichment()
                            .and_then(|o| o.result())
                            .and_then(|r| match r {
                                EnrichmentResult::Custom(v) => v["phase"].as_i64(),
                                EnrichmentResult::Combatants(_) => None,
                            })
                            .unwrap_or_default();
                        Ok(Some(
                            Response::new().with(Message::literal(Severity::Info, format!("phase {phase}"))),
                        ))
                    }),
            ),
        )
        .await
        .unwrap();
    runtime.start(EncounterId::new()).await.unwrap();

    runtime.submit(cast(0, "100")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let out = alerts.drain();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].payload.text, "phase 2");
    assert_eq!(out[0].emitted_at, at(50));
}

#[tokio::test(start_paused = true)]
async fn shutdown_returns_the_engine() {
    let (runtime, _alerts) = started(EngineConfig::default()).await;
    let other = runtime.clone();
    runtime.submit(cast(0, "200")).await.unwrap();

    let engine = runtime.shutdown().await.unwrap();
    assert!(engine.is_active());
    assert_eq!(engine.pending_firings(), 1);
    assert!(matches!(
        other.submit(cast(1, "100")).await,
        Err(EngineError::Disconnected { .. })
    ));
}

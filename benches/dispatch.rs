use std::time::Duration;

use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use raidcall::event::{Event, EventKind, Field};
use raidcall::output::Response;
use raidcall::trigger::{conditions, responses, Pattern, Trigger, TriggerSet};
use raidcall::{Alert, EncounterId, EngineConfig, TriggerEngine};

const TRIGGERS: usize = 200;
const EVENTS: usize = 1000;

/// A set shaped like a large raid tier: many triggers per event kind, most of
/// which fail the pattern test.
fn raid_set() -> TriggerSet {
    let mut set = TriggerSet::new("bench");
    for i in 0..TRIGGERS {
        let ability = format!("{:04X}", 0x6000 + i);
        let mut trigger = Trigger::new(format!("trigger {i}"))
            .on(EventKind::CastStarted)
            .pattern(Pattern::new().exact(Field::AbilityId, ability));
        trigger = match i % 4 {
            0 => trigger.output(responses::tank_buster()),
            1 => trigger.guard(conditions::target_is_not_you()).respond(Response::warning("spread")),
            2 => trigger.delay(Duration::from_secs(3)).respond(Response::info("aoe")),
            _ => trigger.suppress(Duration::from_secs(1)).respond(Response::alarm("getOut")),
        };
        set = set.trigger(trigger);
    }
    set
}

fn events() -> Vec<Event> {
    (0..EVENTS)
        .map(|i| {
            let ts = Utc.timestamp_millis_opt(1_700_000_000_000 + (i as i64) * 50).unwrap();
            Event::new(EventKind::CastStarted, ts)
                .with(Field::AbilityId, format!("{:04X}", 0x6000 + (i * 7) % (TRIGGERS * 2)))
                .with(Field::Target, "Estinien")
        })
        .collect()
}

fn engine() -> TriggerEngine {
    let sink = |_: Alert| true;
    let mut engine = TriggerEngine::new(EngineConfig::default(), sink).unwrap();
    engine.load(raid_set()).unwrap();
    engine.start(EncounterId::new()).unwrap();
    engine
}

fn bench_fan_out(c: &mut Criterion) {
    let events = events();
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(EVENTS as u64));
    group.bench_function("fan_out_200_triggers", |b| {
        b.iter_batched(
            || (engine(), events.clone()),
            |(mut engine, events)| {
                for event in events {
                    engine.submit(event);
                }
                engine
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_load(c: &mut Criterion) {
    c.bench_function("dispatch/load_200_triggers", |b| {
        b.iter_batched(raid_set, |set| set.load(raidcall::Locale::En).unwrap(), BatchSize::SmallInput);
    });
}

criterion_group!(dispatch, bench_fan_out, bench_load);
criterion_main!(dispatch);

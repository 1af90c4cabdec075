//! Async runtime for the trigger engine.
//!
//! [`EngineRuntime`] owns a [`TriggerEngine`] on a tokio task and feeds it
//! from a bounded command queue. Between events the engine's clock is
//! projected forward from the last event timestamp on tokio's monotonic
//! clock, so delayed firings come due on time even while the log is quiet.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::trigger::TriggerSet;

use super::dispatcher::after;
use super::encounter::{EncounterId, EndReason};
use super::{EngineStats, TriggerEngine};

enum Command {
    Submit(Event),
    Start {
        id: EncounterId,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    End {
        reason: EndReason,
        reply: oneshot::Sender<bool>,
    },
    Load {
        set: TriggerSet,
        reply: oneshot::Sender<EngineResult<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<TriggerEngine>,
    },
}

/// Maps engine time onto tokio's clock.
#[derive(Debug, Clone, Copy, Default)]
struct RuntimeClock {
    base: Option<(DateTime<Utc>, Instant)>,
}

impl RuntimeClock {
    fn rebase(&mut self, event_time: Option<DateTime<Utc>>) {
        if let Some(t) = event_time {
            self.base = Some((t, Instant::now()));
        }
    }

    fn now(&self) -> Option<DateTime<Utc>> {
        self.base.map(|(t, at)| after(t, at.elapsed()))
    }

    fn instant_for(&self, due: DateTime<Utc>) -> Option<Instant> {
        let (t, at) = self.base?;
        let ahead = (due - t).to_std().unwrap_or(Duration::ZERO);
        Some(at.checked_add(ahead).unwrap_or(at))
    }
}

/// Handle to an engine running on a tokio task.
#[derive(Debug, Clone)]
pub struct EngineRuntime {
    tx: mpsc::Sender<Command>,
    stats: Arc<EngineStats>,
    capacity: usize,
}

impl EngineRuntime {
    /// Moves `engine` onto a task of the current tokio runtime.
    pub fn spawn(engine: TriggerEngine) -> EngineResult<Self> {
        let handle = Handle::try_current()
            .map_err(|_| EngineError::internal("EngineRuntime::spawn requires a tokio runtime"))?;
        let capacity = engine.config().command_queue_capacity;
        let stats = engine.stats();
        let (tx, rx) = mpsc::channel(capacity);
        handle.spawn(run(engine, rx));
        Ok(Self { tx, stats, capacity })
    }

    /// Queues an event, waiting for room.
    pub async fn submit(&self, event: Event) -> EngineResult<()> {
        self.tx.send(Command::Submit(event)).await.map_err(|_| disconnected())
    }

    /// Queues an event without waiting.
    pub fn try_submit(&self, event: Event) -> EngineResult<()> {
        self.tx.try_send(Command::Submit(event)).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EngineError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => disconnected(),
        })
    }

    /// Starts an encounter; see [`TriggerEngine::start`].
    pub async fn start(&self, id: EncounterId) -> EngineResult<()> {
        self.request(|reply| Command::Start { id, reply }).await?
    }

    /// Ends the active encounter; see [`TriggerEngine::end`].
    pub async fn end(&self, reason: EndReason) -> EngineResult<bool> {
        self.request(|reply| Command::End { reason, reply }).await
    }

    /// Loads a trigger set; see [`TriggerEngine::load`].
    pub async fn load(&self, set: TriggerSet) -> EngineResult<String> {
        self.request(|reply| Command::Load { set, reply }).await?
    }

    /// The running engine's counters.
    #[must_use]
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Stops the task after the commands queued before this one, and hands
    /// the engine back.
    pub async fn shutdown(self) -> EngineResult<TriggerEngine> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| disconnected())?;
        rx.await.map_err(|_| disconnected())
    }
}

fn disconnected() -> EngineError {
    EngineError::Disconnected {
        path: "engine_runtime".to_string(),
    }
}

async fn run(mut engine: TriggerEngine, mut rx: mpsc::Receiver<Command>) {
    let mut clock = RuntimeClock::default();
    let mut shutdown = None;

    loop {
        let deadline = engine.next_due().and_then(|due| clock.instant_for(due));
        tokio::select! {
            biased;

            cmd = rx.recv() => match cmd {
                None => break,
                Some(Command::Submit(event)) => {
                    engine.submit(event);
                    clock.rebase(engine.clock());
                }
                Some(Command::Start { id, reply }) => {
                    let _ = reply.send(engine.start(id));
                }
                Some(Command::End { reason, reply }) => {
                    let _ = reply.send(engine.end(reason));
                }
                Some(Command::Load { set, reply }) => {
                    let _ = reply.send(engine.load(set));
                }
                Some(Command::Shutdown { reply }) => {
                    shutdown = Some(reply);
                    break;
                }
            },
            Some(completion) = engine.next_enrichment() => {
                if let Some(now) = clock.now() {
                    engine.advance_to(now);
                }
                engine.complete_enrichment(completion);
            }
            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(now) = clock.now() {
                    engine.advance_to(now);
                }
            }
        }
    }

    log::debug!(target: "raidcall::runtime", "engine task stopping");
    drop(rx);
    if let Some(reply) = shutdown {
        let _ = reply.send(engine);
    }
}

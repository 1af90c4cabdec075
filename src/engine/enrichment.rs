//! Asynchronous enrichment.
//!
//! A trigger may capture an [`EnrichmentQuery`] at match time. When the firing
//! comes due, the broker hands the query to the host's [`EnrichmentGateway`]
//! on a spawned tokio task bounded by a timeout, and the firing's output step
//! is parked until a [`Completion`] for its ticket comes back. Completions for
//! tickets the broker no longer knows (the encounter ended, the countdown was
//! replaced) are stale and dropped by the caller.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;

/// Query sent to the overlay-state provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrichmentQuery {
    /// Live combatant data for the given hex ids and/or names.
    Combatants {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        names: Vec<String>,
    },
    /// Any other provider call.
    Custom {
        call: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl EnrichmentQuery {
    /// Combatants by id.
    #[must_use]
    pub fn combatants_by_id<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Combatants {
            ids: ids.into_iter().map(Into::into).collect(),
            names: Vec::new(),
        }
    }

    /// Combatants by name.
    #[must_use]
    pub fn combatants_by_name<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Combatants {
            ids: Vec::new(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

/// Live state of one combatant.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatantInfo {
    pub id: String,
    pub name: String,
    pub current_hp: u64,
    pub max_hp: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub heading: f64,
}

/// Data returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EnrichmentResult {
    /// Answer to [`EnrichmentQuery::Combatants`].
    Combatants(Vec<CombatantInfo>),
    /// Free-form answer to [`EnrichmentQuery::Custom`].
    Custom(serde_json::Value),
}

/// What a parked firing receives when it resumes.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    /// The provider answered.
    Resolved(EnrichmentResult),
    /// The provider answered with nothing (null or error).
    Empty,
    /// The provider did not answer within the configured timeout.
    TimedOut,
    /// No provider or no async runtime was available.
    Unavailable,
}

impl EnrichmentOutcome {
    /// The provider's data, if any.
    #[must_use]
    pub const fn result(&self) -> Option<&EnrichmentResult> {
        match self {
            Self::Resolved(r) => Some(r),
            _ => None,
        }
    }

    /// Combatant data, if the provider returned some.
    #[must_use]
    pub fn combatants(&self) -> Option<&[CombatantInfo]> {
        match self {
            Self::Resolved(EnrichmentResult::Combatants(c)) => Some(c),
            _ => None,
        }
    }

    /// True when the provider returned data.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// Boxed future returned by a gateway.
pub type EnrichmentFuture = Pin<Box<dyn Future<Output = Option<EnrichmentResult>> + Send + 'static>>;

/// External provider of live overlay state.
///
/// `request` must not block; it returns a future that the engine drives on
/// its own task with a timeout. Retries are the trigger author's business.
pub trait EnrichmentGateway: Send + Sync {
    /// Starts a request. A `None` result is treated like an error.
    fn request(&self, query: EnrichmentQuery) -> EnrichmentFuture;
}

/// Handle for one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket#{}", self.0)
    }
}

/// A finished request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Request this completes.
    pub ticket: Ticket,
    /// What the provider returned.
    pub outcome: EnrichmentOutcome,
}

struct InFlight<C> {
    continuation: C,
    supervisor: AbortHandle,
    gateway: AbortHandle,
}

impl<C> InFlight<C> {
    fn abort(&self) {
        self.supervisor.abort();
        self.gateway.abort();
    }
}

/// Owns in-flight enrichment tasks and the continuations parked on them.
pub(crate) struct EnrichmentBroker<C> {
    gateway: Option<Arc<dyn EnrichmentGateway>>,
    timeout: Duration,
    next_ticket: u64,
    in_flight: HashMap<Ticket, InFlight<C>>,
    tx: UnboundedSender<Completion>,
    rx: UnboundedReceiver<Completion>,
}

impl<C> EnrichmentBroker<C> {
    pub(crate) fn new(timeout: Duration) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            gateway: None,
            timeout,
            next_ticket: 0,
            in_flight: HashMap::new(),
            tx,
            rx,
        }
    }

    pub(crate) fn set_gateway(&mut self, gateway: Arc<dyn EnrichmentGateway>) {
        self.gateway = Some(gateway);
    }

    pub(crate) fn has_gateway(&self) -> bool {
        self.gateway.is_some()
    }

    /// Starts a request. If it cannot be started the continuation is handed
    /// back with the outcome to resume it with right away.
    pub(crate) fn request(&mut self, query: EnrichmentQuery, continuation: C) -> Result<Ticket, (C, EnrichmentOutcome)> {
        let Some(gateway) = self.gateway.as_ref() else {
            return Err((continuation, EnrichmentOutcome::Unavailable));
        };
        let Ok(runtime) = Handle::try_current() else {
            log::warn!(
                target: "raidcall::enrichment",
                "enrichment requested outside a tokio runtime; resuming without data"
            );
            return Err((continuation, EnrichmentOutcome::Unavailable));
        };

        let future = match panic::catch_unwind(AssertUnwindSafe(|| gateway.request(query))) {
            Ok(future) => future,
            Err(_) => {
                log::warn!(
                    target: "raidcall::enrichment",
                    "enrichment gateway panicked while starting a request; resuming without data"
                );
                return Err((continuation, EnrichmentOutcome::Empty));
            }
        };

        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        let timeout = self.timeout;
        let tx = self.tx.clone();
        // A panic in the gateway future must still produce a completion.
        let mut inner = runtime.spawn(future);
        let gateway_task = inner.abort_handle();
        let supervisor = runtime.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, &mut inner).await {
                Ok(Ok(Some(result))) => EnrichmentOutcome::Resolved(result),
                Ok(Ok(None)) => EnrichmentOutcome::Empty,
                Ok(Err(err)) => {
                    log::warn!(target: "raidcall::enrichment", "enrichment request for {ticket} failed: {err}");
                    EnrichmentOutcome::Empty
                }
                Err(_) => {
                    inner.abort();
                    EnrichmentOutcome::TimedOut
                }
            };
            // The broker may be gone; nothing to report to then.
            let _ = tx.send(Completion { ticket, outcome });
        });
        self.in_flight.insert(
            ticket,
            InFlight {
                continuation,
                supervisor: supervisor.abort_handle(),
                gateway: gateway_task,
            },
        );
        Ok(ticket)
    }

    /// Claims the continuation for a completed ticket. `None` means stale.
    pub(crate) fn take(&mut self, ticket: Ticket) -> Option<C> {
        self.in_flight.remove(&ticket).map(|f| f.continuation)
    }

    pub(crate) fn try_next(&mut self) -> Option<Completion> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next completion. Cancel-safe.
    pub(crate) async fn next(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }

    /// Aborts requests whose continuation satisfies `pred`.
    pub(crate) fn abort_where(&mut self, mut pred: impl FnMut(&C) -> bool) -> usize {
        let doomed: Vec<Ticket> = self
            .in_flight
            .iter()
            .filter(|(_, f)| pred(&f.continuation))
            .map(|(t, _)| *t)
            .collect();
        for ticket in &doomed {
            if let Some(f) = self.in_flight.remove(ticket) {
                f.abort();
            }
        }
        doomed.len()
    }

    /// Aborts every request.
    pub(crate) fn abort_all(&mut self) -> usize {
        let count = self.in_flight.len();
        for (_, f) in self.in_flight.drain() {
            f.abort();
        }
        count
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<C> fmt::Debug for EnrichmentBroker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentBroker")
            .field("has_gateway", &self.gateway.is_some())
            .field("timeout", &self.timeout)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        delay: Duration,
        result: Option<EnrichmentResult>,
    }

    impl EnrichmentGateway for Fixed {
        fn request(&self, _query: EnrichmentQuery) -> EnrichmentFuture {
            let delay = self.delay;
            let result = self.result.clone();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                result
            })
        }
    }

    fn broker(delay: Duration, result: Option<EnrichmentResult>) -> EnrichmentBroker<&'static str> {
        let mut broker = EnrichmentBroker::new(Duration::from_millis(100));
        broker.set_gateway(Arc::new(Fixed { delay, result }));
        broker
    }

    #[test]
    fn no_gateway_resumes_immediately() {
        let mut broker: EnrichmentBroker<&str> = EnrichmentBroker::new(Duration::from_millis(100));
        let (cont, outcome) = broker
            .request(EnrichmentQuery::combatants_by_id(["4000A"]), "statue")
            .unwrap_err();
        assert_eq!(cont, "statue");
        assert_eq!(outcome, EnrichmentOutcome::Unavailable);
    }

    #[test]
    fn no_runtime_resumes_immediately() {
        let mut broker = broker(Duration::ZERO, None);
        let (_, outcome) = broker
            .request(EnrichmentQuery::combatants_by_id(["4000A"]), "statue")
            .unwrap_err();
        assert_eq!(outcome, EnrichmentOutcome::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_before_timeout() {
        let info = CombatantInfo {
            id: "4000A".to_string(),
            name: "Statue".to_string(),
            ..CombatantInfo::default()
        };
        let mut broker = broker(
            Duration::from_millis(50),
            Some(EnrichmentResult::Combatants(vec![info.clone()])),
        );
        let ticket = broker
            .request(EnrichmentQuery::combatants_by_id(["4000A"]), "statue")
            .unwrap();

        let completion = broker.next().await.unwrap();
        assert_eq!(completion.ticket, ticket);
        assert_eq!(completion.outcome.combatants(), Some(&[info][..]));
        assert_eq!(broker.take(ticket), Some("statue"));
        assert_eq!(broker.take(ticket), None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_times_out() {
        let mut broker = broker(Duration::from_secs(60), None);
        let ticket = broker
            .request(EnrichmentQuery::combatants_by_name(["Hesperos"]), "slow")
            .unwrap();
        let start = tokio::time::Instant::now();
        let completion = broker.next().await.unwrap();
        assert_eq!(completion.ticket, ticket);
        assert_eq!(completion.outcome, EnrichmentOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    struct Exploding;

    async fn explode() -> Option<EnrichmentResult> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        panic!("overlay went away")
    }

    impl EnrichmentGateway for Exploding {
        fn request(&self, _query: EnrichmentQuery) -> EnrichmentFuture {
            Box::pin(explode())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_future_completes_empty() {
        let mut broker = EnrichmentBroker::new(Duration::from_millis(100));
        broker.set_gateway(Arc::new(Exploding));
        let ticket = broker
            .request(EnrichmentQuery::combatants_by_id(["4000A"]), "statue")
            .unwrap();

        let start = tokio::time::Instant::now();
        let completion = broker.next().await.unwrap();
        assert_eq!(completion.ticket, ticket);
        assert_eq!(completion.outcome, EnrichmentOutcome::Empty);
        assert_eq!(start.elapsed(), Duration::from_millis(10));
        assert_eq!(broker.take(ticket), Some("statue"));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_all_forgets_continuations() {
        let mut broker = broker(Duration::from_millis(50), None);
        let ticket = broker
            .request(EnrichmentQuery::combatants_by_id(["4000A"]), "statue")
            .unwrap();
        assert_eq!(broker.abort_all(), 1);
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.take(ticket), None);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(broker.try_next().is_none());
    }
}

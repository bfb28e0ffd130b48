use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pictor_core::PictorError;
use std::sync::Arc;
use tokio::sync::watch;

/// What a completed origin flight hands to every caller that shared it.
#[derive(Debug, Clone)]
pub struct FlightOutcome {
    pub bytes: Bytes,
    pub content_type: String,
    pub original_size: u64,
}

pub type FlightResult = Result<FlightOutcome, PictorError>;

type Slot = watch::Receiver<Option<FlightResult>>;

/// Role handed back by [`SingleFlight::join`].
pub enum FlightRole {
    /// First caller for this key: runs the origin work and publishes it.
    Leader(watch::Sender<Option<FlightResult>>),
    /// Concurrent caller: awaits the leader's published outcome.
    Follower(Slot),
}

/// Keyed single-flight coordinator.
///
/// Register-if-absent is atomic through the map's entry API; the leader
/// computes without holding any map lock and publishes through a watch
/// channel every follower holds a receiver for. Success and failure are
/// shared identically — a failed flight fails every follower with the same
/// error rather than fanning out retries. Entries are removed immediately
/// after publication, so a caller arriving later re-probes the tiers.
#[derive(Clone, Default)]
pub struct SingleFlight {
    flights: Arc<DashMap<String, Slot>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: &str) -> FlightRole {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(existing) => FlightRole::Follower(existing.get().clone()),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx);
                FlightRole::Leader(tx)
            }
        }
    }

    /// Publish the leader's outcome, then deregister the flight. The order
    /// matters: followers holding a receiver observe the outcome even after
    /// removal, while new callers miss the entry and probe normally.
    pub fn complete(&self, key: &str, tx: &watch::Sender<Option<FlightResult>>, result: FlightResult) {
        let _ = tx.send(Some(result));
        self.flights.remove(key);
    }

    /// Drop an abandoned flight without publishing (leader panicked before
    /// producing an outcome). Followers see a closed channel.
    pub fn abandon(&self, key: &str) {
        self.flights.remove(key);
    }

    /// Await the outcome of the flight this receiver belongs to.
    pub async fn wait(mut rx: Slot) -> FlightResult {
        let outcome = rx
            .wait_for(|slot| slot.is_some())
            .await
            .map_err(|_| PictorError::Internal("origin flight abandoned".to_string()))?
            .clone();
        outcome.unwrap_or_else(|| Err(PictorError::Internal("empty flight outcome".to_string())))
    }

    /// Number of in-flight keys, for tests and stats.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(payload: &str) -> FlightOutcome {
        FlightOutcome {
            bytes: Bytes::from(payload.to_string()),
            content_type: "image/png".to_string(),
            original_size: payload.len() as u64,
        }
    }

    #[tokio::test]
    async fn first_join_is_leader_second_is_follower() {
        let flights = SingleFlight::new();
        let leader = flights.join("k");
        assert!(matches!(leader, FlightRole::Leader(_)));
        assert!(matches!(flights.join("k"), FlightRole::Follower(_)));
        assert_eq!(flights.len(), 1);
    }

    #[tokio::test]
    async fn follower_receives_the_leaders_success() {
        let flights = SingleFlight::new();
        let FlightRole::Leader(tx) = flights.join("k") else {
            panic!("expected leader");
        };
        let FlightRole::Follower(rx) = flights.join("k") else {
            panic!("expected follower");
        };

        let waiter = tokio::spawn(SingleFlight::wait(rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        flights.complete("k", &tx, Ok(outcome("shared")));

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.bytes, Bytes::from("shared"));
        assert_eq!(flights.len(), 0, "flight must be deregistered after publish");
    }

    #[tokio::test]
    async fn follower_receives_the_leaders_error_verbatim() {
        let flights = SingleFlight::new();
        let FlightRole::Leader(tx) = flights.join("k") else {
            panic!("expected leader");
        };
        let FlightRole::Follower(rx) = flights.join("k") else {
            panic!("expected follower");
        };

        flights.complete("k", &tx, Err(PictorError::Upstream { status: 502 }));
        let err = SingleFlight::wait(rx).await.unwrap_err();
        assert_eq!(err, PictorError::Upstream { status: 502 });
    }

    #[tokio::test]
    async fn follower_observes_an_outcome_published_before_it_awaits() {
        let flights = SingleFlight::new();
        let FlightRole::Leader(tx) = flights.join("k") else {
            panic!("expected leader");
        };
        let FlightRole::Follower(rx) = flights.join("k") else {
            panic!("expected follower");
        };
        // Publish first, await second: watch retains the last value.
        flights.complete("k", &tx, Ok(outcome("early")));
        let got = SingleFlight::wait(rx).await.unwrap();
        assert_eq!(got.bytes, Bytes::from("early"));
    }

    #[tokio::test]
    async fn a_caller_after_completion_becomes_a_fresh_leader() {
        let flights = SingleFlight::new();
        let FlightRole::Leader(tx) = flights.join("k") else {
            panic!("expected leader");
        };
        flights.complete("k", &tx, Ok(outcome("done")));
        assert!(matches!(flights.join("k"), FlightRole::Leader(_)));
    }

    #[tokio::test]
    async fn abandoned_flight_fails_followers_instead_of_hanging() {
        let flights = SingleFlight::new();
        let FlightRole::Leader(tx) = flights.join("k") else {
            panic!("expected leader");
        };
        let FlightRole::Follower(rx) = flights.join("k") else {
            panic!("expected follower");
        };
        flights.abandon("k");
        drop(tx);
        let err = SingleFlight::wait(rx).await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn distinct_keys_fly_independently() {
        let flights = SingleFlight::new();
        assert!(matches!(flights.join("a"), FlightRole::Leader(_)));
        assert!(matches!(flights.join("b"), FlightRole::Leader(_)));
        assert_eq!(flights.len(), 2);
    }
}

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::WorkerError;
use crate::pipeline::StageEvent;
use crate::storage::BlobStore;

use super::dispatcher::Dispatcher;

/// Polls the blob store and turns newly appeared objects into stage events.
///
/// An object is delivered once per appearance. It becomes eligible again
/// only after it has disappeared from its location and come back.
pub struct LocationWatcher {
    store: Arc<dyn BlobStore>,
    interval: Duration,
    seen: HashSet<(String, String)>,
}

impl LocationWatcher {
    pub fn new(store: Arc<dyn BlobStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            seen: HashSet::new(),
        }
    }

    /// Runs one scan over every location the dispatcher handles and returns
    /// the number of events dispatched.
    pub async fn poll_once(&mut self, dispatcher: &mut Dispatcher) -> Result<usize, WorkerError> {
        let locations = self
            .store
            .locations()
            .await
            .map_err(|e| WorkerError::ScanFailed {
                location: "*".to_string(),
                source: e,
            })?;
        let locations: Vec<String> = locations
            .into_iter()
            .filter(|l| dispatcher.handles(l))
            .collect();

        let mut scanned = HashSet::new();
        let mut present = HashSet::new();
        let mut dispatched = 0;

        for location in locations {
            let keys = match self.store.list(&location).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Listing {} failed, skipping this round: {}", location, e);
                    continue;
                }
            };

            for key in keys {
                let id = (location.clone(), key);
                present.insert(id.clone());
                if self.seen.contains(&id) {
                    continue;
                }

                let bytes = match self.store.get(&id.0, &id.1).await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => {
                        debug!("{}/{} vanished before delivery", id.0, id.1);
                        continue;
                    }
                    Err(e) => {
                        warn!("Reading {}/{} failed: {}", id.0, id.1, e);
                        continue;
                    }
                };

                dispatcher
                    .dispatch(StageEvent::new(id.0.as_str(), id.1.as_str(), bytes))
                    .await?;
                self.seen.insert(id);
                dispatched += 1;
            }
            scanned.insert(location);
        }

        self.seen
            .retain(|id| !scanned.contains(&id.0) || present.contains(id));
        Ok(dispatched)
    }

    /// Polls until `shutdown` flips to `true` or its sender goes away, then
    /// waits for in-flight handlers.
    pub async fn run(
        mut self,
        dispatcher: &mut Dispatcher,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        info!(
            "Watching storage every {:?} with {} worker(s)",
            self.interval,
            dispatcher.worker_count()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once(dispatcher).await {
                        Ok(0) => {}
                        Ok(n) => debug!("Dispatched {} event(s)", n),
                        Err(e @ WorkerError::ScanFailed { .. }) => warn!("{}", e),
                        Err(e) => return Err(e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            "Watcher stopping, waiting for {} in-flight event(s)",
            dispatcher.in_flight()
        );
        dispatcher.wait_idle().await;
        Ok(())
    }
}

use std::sync::Arc;

use futures_util::FutureExt;
use log::{debug, error, info};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::error::WorkerError;
use crate::pipeline::{ClassificationStage, IngestStage, OcrStage, StageContext, StageEvent, StageHandler};

/// Which trigger locations a handler is registered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationMatch {
    Exact(String),
    /// Any location starting with the prefix, excluding the bare prefix.
    Prefix(String),
}

impl LocationMatch {
    pub fn matches(&self, location: &str) -> bool {
        match self {
            LocationMatch::Exact(name) => name == location,
            LocationMatch::Prefix(prefix) => {
                location.len() > prefix.len() && location.starts_with(prefix.as_str())
            }
        }
    }
}

struct Route {
    pattern: LocationMatch,
    handler: Arc<dyn StageHandler>,
}

/// Runs stage handlers for location events, at most `worker_count` at a time.
pub struct Dispatcher {
    routes: Vec<Route>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    worker_count: usize,
}

impl Dispatcher {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            routes: Vec::new(),
            permits: Arc::new(Semaphore::new(worker_count)),
            tasks: JoinSet::new(),
            worker_count,
        }
    }

    /// Registers the ingest, classification and OCR stages on the
    /// configured locations.
    pub fn for_pipeline(ctx: StageContext, worker_count: usize) -> Self {
        let locations = ctx.config.locations.clone();
        let mut dispatcher = Self::new(worker_count);
        dispatcher.register_stage_handler(
            LocationMatch::Exact(locations.input),
            Arc::new(IngestStage::new(ctx.clone())),
        );
        dispatcher.register_stage_handler(
            LocationMatch::Exact(locations.splitted),
            Arc::new(ClassificationStage::new(ctx.clone())),
        );
        dispatcher.register_stage_handler(
            LocationMatch::Prefix(locations.classified_prefix),
            Arc::new(OcrStage::new(ctx)),
        );
        dispatcher
    }

    /// Registers `handler` for locations matching `pattern`. Earlier
    /// registrations win when several patterns match.
    pub fn register_stage_handler(&mut self, pattern: LocationMatch, handler: Arc<dyn StageHandler>) {
        info!("Registered {} stage for {:?}", handler.name(), pattern);
        self.routes.push(Route { pattern, handler });
    }

    pub fn handler_for(&self, location: &str) -> Option<&Arc<dyn StageHandler>> {
        self.routes
            .iter()
            .find(|route| route.pattern.matches(location))
            .map(|route| &route.handler)
    }

    pub fn handles(&self, location: &str) -> bool {
        self.handler_for(location).is_some()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of spawned handler tasks not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Hands the event to its stage on a background task. Waits for a free
    /// worker slot when all are busy.
    pub async fn dispatch(&mut self, event: StageEvent) -> Result<(), WorkerError> {
        let handler = self
            .handler_for(&event.location)
            .cloned()
            .ok_or_else(|| WorkerError::NoHandler(event.location.clone()))?;

        self.reap_finished();

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;

        debug!(
            "Dispatching {}/{} to the {} stage",
            event.location,
            event.key,
            handler.name()
        );
        self.tasks.spawn(async move {
            handler.handle(event).await;
            drop(permit);
        });
        Ok(())
    }

    /// Waits until every dispatched handler has finished.
    pub async fn wait_idle(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            log_task_result(result);
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.join_next().now_or_never().flatten() {
            log_task_result(result);
        }
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        let err = WorkerError::TaskFailed(e.to_string());
        error!("{}", err);
    }
}

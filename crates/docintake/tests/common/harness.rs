//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` wires the real stages to:
//! - a filesystem blob store under a temp directory
//! - a SQLite record store file in the same directory
//! - a scripted document-intelligence service

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use docintake::capability::ScriptedCapability;
use docintake::config::Config;
use docintake::db::{
    PipelineRecord, ProcessingErrorRecord, RecordFilter, RecordStore, SqliteRecordStore,
};
use docintake::pipeline::{PipelineConfig, StageContext};
use docintake::processor::PageSplitter;
use docintake::storage::{BlobStore, FsBlobStore, StorageRelocator};
use docintake::worker::{Dispatcher, LocationWatcher};

/// Watcher rounds before a run is considered stuck.
const MAX_ROUNDS: usize = 20;

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: Config,
    pub store: Arc<FsBlobStore>,
    pub records: Arc<SqliteRecordStore>,
    pub capability: Arc<ScriptedCapability>,
    dispatcher: Dispatcher,
    watcher: LocationWatcher,
}

impl TestHarness {
    pub async fn new(config: Config, capability: ScriptedCapability) -> Self {
        Self::with_splitter(config, capability, PageSplitter::new()).await
    }

    pub async fn with_splitter(
        mut config: Config,
        capability: ScriptedCapability,
        splitter: PageSplitter,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        config.storage.root = temp_dir.path().join("blobs").to_string_lossy().to_string();
        config.records.path = temp_dir
            .path()
            .join("records.db")
            .to_string_lossy()
            .to_string();

        let store = Arc::new(FsBlobStore::new(&config.storage.root));
        store
            .ensure_location(&config.locations.input)
            .await
            .expect("Failed to create input location");

        let records = Arc::new(
            SqliteRecordStore::open(Path::new(&config.records.path))
                .expect("Failed to open record store"),
        );
        let capability = Arc::new(capability);

        let ctx = StageContext::new(
            PipelineConfig::from_config(&config),
            StorageRelocator::new(store.clone()),
            records.clone(),
            capability.clone(),
        )
        .with_splitter(splitter);

        let dispatcher = Dispatcher::for_pipeline(ctx, config.worker_count);
        let watcher = LocationWatcher::new(store.clone(), Duration::from_millis(10));

        Self {
            temp_dir,
            config,
            store,
            records,
            capability,
            dispatcher,
            watcher,
        }
    }

    /// Reopens the record store and starts a fresh watcher and dispatcher
    /// over the same storage, as a process restart would.
    pub fn restart(&mut self) {
        self.records = Arc::new(
            SqliteRecordStore::open(Path::new(&self.config.records.path))
                .expect("Failed to reopen record store"),
        );
        let ctx = StageContext::new(
            PipelineConfig::from_config(&self.config),
            StorageRelocator::new(self.store.clone()),
            self.records.clone(),
            self.capability.clone(),
        );
        self.dispatcher = Dispatcher::for_pipeline(ctx, self.config.worker_count);
        self.watcher = LocationWatcher::new(self.store.clone(), Duration::from_millis(10));
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn blob_path(&self, location: &str, key: &str) -> PathBuf {
        Path::new(&self.config.storage.root).join(location).join(key)
    }

    /// Drops a file into the input location, as an uploader would.
    pub async fn upload(&self, key: &str, bytes: &[u8]) {
        self.put(&self.config.locations.input, key, bytes).await;
    }

    pub async fn put(&self, location: &str, key: &str, bytes: &[u8]) {
        self.store
            .ensure_location(location)
            .await
            .expect("Failed to create location");
        self.store
            .put(location, key, bytes, "application/pdf")
            .await
            .expect("Failed to write object");
    }

    /// Polls and dispatches until a round finds nothing new.
    pub async fn run_until_idle(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let dispatched = self
                .watcher
                .poll_once(&mut self.dispatcher)
                .await
                .expect("Watcher poll failed");
            self.dispatcher.wait_idle().await;
            if dispatched == 0 {
                return;
            }
        }
        panic!("Pipeline did not settle after {} rounds", MAX_ROUNDS);
    }

    pub async fn keys(&self, location: &str) -> Vec<String> {
        self.store.list(location).await.expect("Failed to list location")
    }

    pub async fn record(&self, id: &str) -> Option<PipelineRecord> {
        self.records.get(id).await.expect("Failed to read record")
    }

    pub async fn records(&self, filter: RecordFilter) -> Vec<PipelineRecord> {
        self.records.query(filter).await.expect("Failed to query records")
    }

    pub async fn errors(&self, document_id: &str) -> Vec<ProcessingErrorRecord> {
        self.records
            .errors_for(document_id)
            .await
            .expect("Failed to read error log")
    }
}

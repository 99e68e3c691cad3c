pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod scheduler;
pub mod storage;
pub mod study;
pub mod surveys;
pub mod upload;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::watch;
use uuid::Uuid;

use config::{data_dir_from_env, ConfigStore, CONFIG_FILE_NAME};
use db::Database;
use models::DataStream;
use network::HttpTransport;
use scheduler::{DutyCycleService, ServiceFactory};
use storage::StorageLayout;
use study::StudyManager;

const DATABASE_FILE_NAME: &str = "studysync.sqlite3";

/// Factory used when no platform sensor readers are linked in. Only the
/// app-event stream is collected.
struct NoSensors;

impl ServiceFactory for NoSensors {
    fn create(
        &self,
        stream: DataStream,
        _storage: &Arc<StorageLayout>,
        _patient_id: &str,
    ) -> Option<Box<dyn DutyCycleService>> {
        warn!("No sensor reader for {} on this platform", stream.as_str());
        None
    }
}

pub fn run() -> Result<()> {
    let data_dir = data_dir_from_env();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let config_store = ConfigStore::new(data_dir.join(CONFIG_FILE_NAME))?;
    let mut config = config_store.get();

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if config.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("studysync starting up in {}", data_dir.display());

    if config.device_id.is_empty() {
        config = config_store.update(|config| config.device_id = Uuid::new_v4().to_string())?;
        info!("Assigned device id {}", config.device_id);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let database = Database::new(data_dir.join(DATABASE_FILE_NAME))?;
        let storage = Arc::new(StorageLayout::new(&data_dir, &config));
        let transport = Arc::new(HttpTransport::new(&config, config.device_id.clone())?);
        let (reachability_tx, reachability_rx) = watch::channel(config.default_reachability);

        let manager = Arc::new(StudyManager::new(
            config,
            Arc::new(database),
            transport.clone(),
            storage,
            Arc::new(NoSensors),
            reachability_rx,
        ));

        if !manager.load_default_study().await? {
            info!("No study registered yet; nothing to collect");
            return Ok(());
        }
        let Some(study) = manager.study_snapshot().await else {
            return Ok(());
        };
        transport.set_patient_id(&study.patient_id);

        if study.participant_consented {
            manager.start_study_data_services().await?;
        } else {
            info!("Study {} is awaiting consent", study.patient_id);
        }

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("Shutting down");
        manager.stop().await?;
        drop(reachability_tx);
        Ok(())
    })
}

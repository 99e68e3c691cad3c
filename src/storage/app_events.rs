//! Always-on service that records pipeline activity to its own data stream,
//! so the upload and scheduling history reaches the server too.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use std::sync::{Arc, Mutex, PoisonError};

use crate::scheduler::DutyCycleService;

use super::layout::{SharedDataStore, StorageLayout};

pub const APP_EVENT_DATA_TYPE: &str = "ios_log";
const HEADERS: [&str; 4] = ["timestamp", "event", "msg", "d1"];

#[derive(Default)]
struct AppLogState {
    patient_id: Option<String>,
    store: Option<SharedDataStore>,
    collecting: bool,
}

#[derive(Clone)]
pub struct AppEventLog {
    storage: Arc<StorageLayout>,
    state: Arc<Mutex<AppLogState>>,
}

impl AppEventLog {
    pub fn new(storage: Arc<StorageLayout>) -> Self {
        Self {
            storage,
            state: Arc::new(Mutex::new(AppLogState::default())),
        }
    }

    pub fn bind_patient(&self, patient_id: &str) {
        self.lock().patient_id = Some(patient_id.to_string());
    }

    /// Record one event. Dropped silently while collection is off.
    pub fn log_event(&self, event: &str, msg: &str, d1: &str) {
        let store = {
            let state = self.lock();
            if !state.collecting {
                return;
            }
            match &state.store {
                Some(store) => store.clone(),
                None => return,
            }
        };

        let row = vec![
            Utc::now().timestamp_millis().to_string(),
            event.to_string(),
            msg.to_string(),
            d1.to_string(),
        ];
        let mut guard = store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = guard.store(&row) {
            warn!("Failed to record app event {event}: {err:?}");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppLogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DutyCycleService for AppEventLog {
    fn name(&self) -> &str {
        APP_EVENT_DATA_TYPE
    }

    fn init(&mut self) -> bool {
        let mut state = self.lock();
        let Some(patient_id) = state.patient_id.clone() else {
            warn!("App event log has no patient bound; not collecting");
            return false;
        };
        state.store = Some(
            self.storage
                .create_store(&patient_id, APP_EVENT_DATA_TYPE, &HEADERS),
        );
        state.collecting = false;
        true
    }

    fn start(&mut self) -> Result<()> {
        self.lock().collecting = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let store = {
            let mut state = self.lock();
            state.collecting = false;
            state.store.clone()
        };
        if let Some(store) = store {
            store.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.pause()?;
        self.lock().store = None;
        self.storage.close_store(APP_EVENT_DATA_TYPE)
    }
}

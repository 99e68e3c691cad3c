pub mod app_events;
pub mod data_store;
pub mod layout;

pub use app_events::{AppEventLog, APP_EVENT_DATA_TYPE};
pub use data_store::{DataStore, DATA_FILE_EXTENSION};
pub use layout::{SharedDataStore, StorageLayout};

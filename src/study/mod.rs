pub mod manager;
pub mod settings_sync;
pub mod transfers;

pub use manager::StudyManager;
pub use settings_sync::{reconcile_settings, StreamChange};
pub use transfers::{plan_transfers, TransferPlan};

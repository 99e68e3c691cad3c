use anyhow::Result;
use async_trait::async_trait;

use crate::models::DataStream;
use crate::storage::StorageLayout;

/// One sensor or passive data stream the scheduler can switch on and off.
#[async_trait]
pub trait DutyCycleService: Send {
    fn name(&self) -> &str;

    /// Prepare for collection. `false` keeps the service out of the schedule.
    fn init(&mut self) -> bool;

    fn start(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Release stores and handles. Awaited in registration order on teardown.
    async fn finish(&mut self) -> Result<()>;
}

/// Supplies concrete platform readers; the scheduler never looks past the
/// trait object it gets back.
pub trait ServiceFactory: Send + Sync {
    fn create(
        &self,
        stream: DataStream,
        storage: &std::sync::Arc<StorageLayout>,
        patient_id: &str,
    ) -> Option<Box<dyn DutyCycleService>>;
}

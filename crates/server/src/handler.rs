use async_trait::async_trait;
use tracing::info;
use treejar_core::domain::batch::PendingBatch;
use treejar_integrations::BatchHandler;

/// Default business seam: records each drained batch. Conversation handling plugs
/// in here by supplying another `BatchHandler`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingBatchHandler;

#[async_trait]
impl BatchHandler for LoggingBatchHandler {
    async fn handle(&self, batch: &PendingBatch) -> anyhow::Result<()> {
        info!(
            event_name = "worker.batch.handled",
            group_key = %batch.group_key,
            job_id = %batch.scheduled_job_id,
            batch_size = batch.len(),
            event_ids = ?batch.buffered_event_ids(),
            "batch ready for conversation handling"
        );
        Ok(())
    }
}

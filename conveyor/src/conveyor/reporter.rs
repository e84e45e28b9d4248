use super::statistic::ConveyorStatistic;
use async_trait::async_trait;
use conveyor_shared::ConveyorResult;

/// Receives periodic statistic snapshots.
///
/// Errors are logged and otherwise ignored.
#[async_trait]
pub trait StatisticReporter: Send + Sync {
    async fn report(&self, statistic: &ConveyorStatistic) -> ConveyorResult<()>;
}

/// Logs every snapshot as one JSON `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl StatisticReporter for LogReporter {
    async fn report(&self, statistic: &ConveyorStatistic) -> ConveyorResult<()> {
        let json = serde_json::to_string(statistic)
            .map_err(|e| conveyor_shared::ConveyorError::Internal(e.to_string()))?;
        tracing::info!(target: "conveyor::statistic", cluster_id = %statistic.cluster_id, "{json}");
        Ok(())
    }
}

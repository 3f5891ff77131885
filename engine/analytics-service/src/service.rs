//! Service state management and component wiring

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use stream_processor::{
    BrokerConnector, LineConnector, LineSource, LocalFileSink, LogSink, LoopExit, ProcessorError,
    SnapshotSink, StreamProcessor,
};

use crate::config::{InputConfig, ServiceConfig, SinkConfig};

/// Handle to the running consumer loop
pub type LoopHandle = JoinHandle<Result<LoopExit, ProcessorError>>;

/// Service state containing the configured processor
pub struct ServiceState {
    /// Service configuration
    pub config: ServiceConfig,

    /// StreamProcessor instance
    pub processor: Arc<StreamProcessor>,
}

impl ServiceState {
    /// Build the broker connector, the sink and the processor
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let connector = build_connector(&config.input);
        let sink = build_sink(&config.sink)?;

        info!("Event source: {}", connector.describe());
        info!("Snapshot sink: {}", sink.name());

        let processor = StreamProcessor::new(config.processor.clone(), connector, sink)
            .context("Failed to create StreamProcessor")?;

        Ok(Self { config, processor: Arc::new(processor) })
    }

    /// Run the consumer loop on its own task
    pub fn spawn_processor(&self) -> LoopHandle {
        let processor = self.processor.clone();
        tokio::spawn(async move { processor.start().await })
    }

    /// Stop the processor, wait for its loop and report the final aggregates
    pub async fn shutdown(&self, handle: LoopHandle) -> Result<()> {
        info!("Stopping StreamProcessor...");
        self.processor.stop().await;

        let shutdown_timeout = Duration::from_secs(self.config.service.shutdown_timeout_secs);
        match tokio::time::timeout(shutdown_timeout, handle).await {
            Ok(Ok(Ok(exit))) => info!("StreamProcessor loop exited: {:?}", exit),
            Ok(Ok(Err(e))) => error!("StreamProcessor failed: {}", e),
            Ok(Err(e)) => error!("StreamProcessor task failed: {}", e),
            Err(_) => warn!("StreamProcessor did not stop within {:?}", shutdown_timeout),
        }

        self.report();
        Ok(())
    }

    /// Log the headline numbers and the top pages/products
    pub fn report(&self) {
        let stats = self.processor.get_stats();
        let metrics = self.processor.metrics();
        let top_n = self.config.service.report_top_n;

        info!(
            "Processed {} events, skipped {} ({} duplicates, {} undecodable, {} unknown types, {} invalid, {} panics)",
            stats.events_processed,
            stats.events_skipped,
            metrics.duplicates,
            metrics.decode_failures,
            metrics.unknown_types,
            metrics.invalid_payloads,
            metrics.handler_panics
        );
        info!(
            "Total revenue: {:.2} across {} hourly buckets",
            stats.total_revenue(),
            stats.revenue_by_hour.len()
        );

        for (rank, page) in self.processor.get_top_pages(top_n).iter().enumerate() {
            info!("Top page #{}: {} ({} views)", rank + 1, page.page, page.views);
        }
        for (rank, product) in self.processor.get_top_products(top_n).iter().enumerate() {
            info!(
                "Top product #{}: {} ({} interactions)",
                rank + 1,
                product.product_id,
                product.total_interactions
            );
        }
    }
}

fn build_connector(input: &InputConfig) -> Arc<dyn BrokerConnector> {
    let source = match input {
        InputConfig::Stdin => LineSource::Stdin,
        InputConfig::File { path } => LineSource::File(path.clone()),
    };
    Arc::new(LineConnector::new(source))
}

fn build_sink(sink: &SinkConfig) -> Result<Arc<dyn SnapshotSink>> {
    match sink {
        SinkConfig::Log => Ok(Arc::new(LogSink)),
        SinkConfig::Directory { path, max_snapshots } => {
            let sink = LocalFileSink::new(path.clone(), *max_snapshots)
                .with_context(|| format!("Failed to prepare sink directory: {:?}", path))?;
            Ok(Arc::new(sink))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_to_directory_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let events_path = temp_dir.path().join("events.jsonl");
        let mut events = std::fs::File::create(&events_path).unwrap();
        writeln!(events, r#"{{"type":"page_view","event_id":"1","page":"/home"}}"#).unwrap();
        writeln!(events, r#"{{"type":"product_interaction","event_id":"2","product_id":"br-001"}}"#)
            .unwrap();
        writeln!(events, r#"{{"type":"page_view","event_id":"1","page":"/home"}}"#).unwrap();
        drop(events);

        let flush_dir = temp_dir.path().join("flushes");
        let mut config = ServiceConfig {
            input: InputConfig::File { path: events_path },
            sink: SinkConfig::Directory { path: flush_dir.clone(), max_snapshots: 2 },
            ..Default::default()
        };
        config.processor.poll_timeout_ms = 20;

        let service = ServiceState::new(config).unwrap();
        let handle = service.spawn_processor();

        for _ in 0..200 {
            let stats = service.processor.get_stats();
            if stats.events_processed + stats.events_skipped == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        service.shutdown(handle).await.unwrap();

        let record = LocalFileSink::new(&flush_dir, 2).unwrap().load_latest().unwrap().unwrap();
        assert_eq!(record.stats.events_processed, 2);
        assert_eq!(record.stats.events_skipped, 1);
        assert_eq!(record.stats.page_views["/home"], 1);
    }

    #[tokio::test]
    async fn test_missing_input_file_degrades() {
        let config = ServiceConfig {
            input: InputConfig::File { path: "/nonexistent/events.jsonl".into() },
            ..Default::default()
        };

        let service = ServiceState::new(config).unwrap();
        let exit = service.spawn_processor().await.unwrap().unwrap();
        assert_eq!(exit, LoopExit::Degraded);
    }
}

//! Process lifecycle: startup (log client liveness, WAL directory, encoding
//! resolution), the cycle driver loop, the lag metrics loop, and graceful stop.

use std::{
    ops::ControlFlow,
    sync::{atomic::{AtomicU32, Ordering}, Arc},
    time::Duration,
};

use backoff::{Backoff, BackoffConfig};
use observability_deps::tracing::info;
use partition_log::{LogClient, LogClientError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    assignment::resolve_assigned_partitions,
    config::{BlockBuilderConfig, LATEST_ENCODING_VERSION},
    cycle::run_sweep,
    decode::Decoder,
    lag::run_lag_loop,
    metrics::BlockBuilderMetrics,
    overrides::Overrides,
    ring::PartitionRingReader,
    section::BlockParams,
    storage::BlockWriter,
};
use iox_time::TimeProvider;

/// Number of liveness-ping attempts before startup gives up (spec §4.6: 100ms -> 1min,
/// up to 10 retries).
const MAX_PING_ATTEMPTS: u32 = 10;

/// Failures that prevent the service from ever entering the running state.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The configured (or default) block encoding version is not one this build knows
    /// how to write.
    #[error("unknown block encoding version {0}")]
    UnknownEncoding(u32),

    /// The WAL scratch directory could not be created or opened.
    #[error("failed to open WAL directory {path}: {source}")]
    WalOpen {
        /// The directory that failed to open.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The log never became reachable within the startup ping budget.
    #[error("log unreachable after {attempts} attempts: {source}")]
    LogUnreachable {
        /// Number of ping attempts made.
        attempts: u32,
        /// The last error returned by the log client.
        #[source]
        source: LogClientError,
    },
}

/// Errors surfaced while stopping the service.
#[derive(Debug, Error)]
pub enum StopError {
    /// Closing the log client failed.
    #[error("failed to close log client: {0}")]
    Close(#[source] LogClientError),
}

/// Constructs the decoder used for one `consume_partition` call. A decoder is
/// instantiated fresh per cycle so its `reset()` discipline never crosses cycle
/// boundaries; that's cheap because a decoder is typically just scratch buffers.
pub trait DecoderFactory: Send + Sync + 'static {
    /// Build a new decoder instance.
    fn make(&self) -> Box<dyn Decoder>;
}

impl<F> DecoderFactory for F
where
    F: Fn() -> Box<dyn Decoder> + Send + Sync + 'static,
{
    fn make(&self) -> Box<dyn Decoder> {
        self()
    }
}

/// The running block-builder: owns every external collaborator handle and the
/// background tasks driven off them.
///
/// Constructed by [`BlockBuilderService::start`]; torn down by
/// [`BlockBuilderService::stop`]. Lives for the process lifetime in normal operation.
pub struct BlockBuilderService {
    config: BlockBuilderConfig,
    log: Arc<dyn LogClient>,
    writer: Arc<dyn BlockWriter>,
    decoder_factory: Arc<dyn DecoderFactory>,
    overrides: Arc<dyn Overrides>,
    ring: Arc<dyn PartitionRingReader>,
    time_provider: Arc<dyn TimeProvider>,
    metrics: BlockBuilderMetrics,
    block_params: BlockParams,
    cancel: CancellationToken,
    lag_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BlockBuilderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBuilderService")
            .field("instance_id", &self.config.instance_id)
            .finish_non_exhaustive()
    }
}

impl BlockBuilderService {
    /// Start the service: resolve the block encoding, open the WAL directory, ping the
    /// log with bounded backoff, and launch the lag metrics task.
    ///
    /// `log` and `writer` are expected to already be connected/openable handles; this
    /// crate does not construct the underlying Kafka transport or object store client
    /// (out of scope, see module docs on [`partition_log`] and [`crate::storage`]).
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        config: BlockBuilderConfig,
        log: Arc<dyn LogClient>,
        writer: Arc<dyn BlockWriter>,
        decoder_factory: Arc<dyn DecoderFactory>,
        overrides: Arc<dyn Overrides>,
        ring: Arc<dyn PartitionRingReader>,
        time_provider: Arc<dyn TimeProvider>,
        metric_registry: &metric::Registry,
    ) -> Result<Self, StartupError> {
        let encoding_version = resolve_encoding_version(config.block.version)?;

        std::fs::create_dir_all(&config.wal.filepath).map_err(|source| StartupError::WalOpen {
            path: config.wal.filepath.clone(),
            source,
        })?;

        ping_with_backoff(log.as_ref()).await?;

        let metrics = BlockBuilderMetrics::new(metric_registry);
        let block_params = BlockParams {
            encoding_version,
            bloom_filter: Vec::new(),
            index: Vec::new(),
        };

        let cancel = CancellationToken::new();
        let lag_task = tokio::spawn(run_lag_loop(
            Arc::clone(&log),
            Arc::clone(&ring),
            metrics.clone(),
            config.ingest_storage.kafka_topic.clone(),
            config.ingest_storage.kafka_consumer_group.clone(),
            config.own_assigned_partitions(),
            cancel.clone(),
        ));

        info!(instance_id = %config.instance_id, encoding_version, "block-builder started");

        Ok(Self {
            config,
            log,
            writer,
            decoder_factory,
            overrides,
            ring,
            time_provider,
            metrics,
            block_params,
            cancel,
            lag_task: Some(lag_task),
        })
    }

    /// Run the consume-cycle driver loop until cancelled.
    ///
    /// The first sweep fires immediately; subsequent sweeps are spaced by
    /// `consume_cycle_duration`. Each sweep resolves the currently active partitions
    /// fresh against the partition ring, so a ring change between sweeps takes effect on
    /// the very next one.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.consume_cycle_duration);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("block-builder run loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_sweep_once().await;
                }
            }
        }
    }

    /// Run exactly one sweep over the currently-active assigned partitions.
    ///
    /// [`run`](Self::run) is this, called repeatedly on a timer; exposed directly so
    /// tests can drive sweeps deterministically instead of waiting on real timers.
    pub async fn run_sweep_once(&self) {
        let ring = self.ring.partition_ring();
        let active = resolve_assigned_partitions(&self.config.own_assigned_partitions(), &ring);

        let mut decoder = self.decoder_factory.make();
        run_sweep(
            self.log.as_ref(),
            decoder.as_mut(),
            self.overrides.as_ref(),
            self.writer.as_ref(),
            &self.block_params,
            self.time_provider.as_ref(),
            &self.config.ingest_storage.kafka_topic,
            &self.config.ingest_storage.kafka_consumer_group,
            &active,
            self.config.consume_cycle_duration,
            &self.metrics,
        )
        .await;
    }

    /// Signal the run loop and lag task to stop, then close the log client.
    ///
    /// Errors during close are surfaced; the run loop itself always unwinds cleanly
    /// once cancelled (current poll/flush/commit in flight is allowed to finish).
    pub async fn stop(mut self) -> Result<(), StopError> {
        self.cancel.cancel();
        if let Some(task) = self.lag_task.take() {
            let _ = task.await;
        }
        self.log.close().await.map_err(StopError::Close)
    }
}

/// Resolve the configured encoding version, defaulting to the latest known version.
pub fn resolve_encoding_version(configured: Option<u32>) -> Result<u32, StartupError> {
    let version = configured.unwrap_or(LATEST_ENCODING_VERSION);
    if version == 0 || version > LATEST_ENCODING_VERSION {
        return Err(StartupError::UnknownEncoding(version));
    }
    Ok(version)
}

async fn ping_with_backoff(log: &dyn LogClient) -> Result<(), StartupError> {
    let mut backoff = Backoff::new(&BackoffConfig {
        init_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(60),
        base: 2.0,
    });
    let attempts = AtomicU32::new(0);

    backoff
        .retry_with_backoff("ping log", || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match log.ping().await {
                Ok(()) => ControlFlow::Break(Ok(())),
                Err(source) if attempt >= MAX_PING_ATTEMPTS => ControlFlow::Break(Err((attempt, source))),
                Err(source) => ControlFlow::Continue(source),
            }
        })
        .await
        .expect("backoff retries forever and cannot itself fail")
        .map_err(|(attempts, source)| StartupError::LogUnreachable { attempts, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_encoding_resolves_to_latest() {
        assert_eq!(resolve_encoding_version(None).unwrap(), LATEST_ENCODING_VERSION);
    }

    #[test]
    fn zero_encoding_is_rejected() {
        assert!(resolve_encoding_version(Some(0)).is_err());
    }

    #[test]
    fn future_encoding_is_rejected() {
        assert!(resolve_encoding_version(Some(LATEST_ENCODING_VERSION + 1)).is_err());
    }

    #[tokio::test]
    async fn ping_succeeds_immediately_when_log_is_reachable() {
        let log = partition_log::mock::MockLogClient::new();
        ping_with_backoff(&log).await.unwrap();
    }
}

use batcher_utils::metrics::{
    register_counter_metric_instrument, register_gauge_metric_instrument, register_histogram_metric_instrument,
    Metrics,
};
use opentelemetry::metrics::{Counter, Gauge, Histogram};
use opentelemetry::{global, KeyValue};
use strum_macros::Display;

/// Outcome label attached to `blobs_processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BlobOutcome {
    Confirmed,
    InsufficientSignatures,
    Retried,
    Failed,
    Finalized,
}

/// Instruments shared by every pipeline component. Built once by the orchestrator and handed out
/// behind an `Arc`.
pub struct BatcherMetrics {
    pub blobs_processed: Counter<u64>,
    pub encoding_requests: Counter<u64>,
    pub encoded_results: Gauge<f64>,
    pub encoded_results_size: Gauge<f64>,
    pub minibatches_dispersed: Counter<u64>,
    pub dispersal_latency: Histogram<f64>,
    pub batch_size: Histogram<f64>,
    pub batches_attested: Counter<u64>,
    pub txns_sent: Counter<u64>,
    pub txn_speed_ups: Counter<u64>,
    pub gas_used: Gauge<f64>,
    pub finalizer_runs: Counter<u64>,
    pub last_finalized_block: Gauge<f64>,
}

impl Metrics for BatcherMetrics {
    fn register() -> Self {
        let meter = global::meter("crates.disperser_batcher.opentelemetry");

        let blobs_processed = register_counter_metric_instrument(
            &meter,
            "blobs_processed".to_string(),
            "Blobs leaving the pipeline, labelled by outcome".to_string(),
            "blob".to_string(),
        );

        let encoding_requests = register_counter_metric_instrument(
            &meter,
            "encoding_requests".to_string(),
            "Encoding jobs submitted to the encoder".to_string(),
            "request".to_string(),
        );

        let encoded_results = register_gauge_metric_instrument(
            &meter,
            "encoded_results".to_string(),
            "Encoding results held in memory".to_string(),
            "result".to_string(),
        );

        let encoded_results_size = register_gauge_metric_instrument(
            &meter,
            "encoded_results_size".to_string(),
            "Bytes of chunk data held in memory".to_string(),
            "byte".to_string(),
        );

        let minibatches_dispersed = register_counter_metric_instrument(
            &meter,
            "minibatches_dispersed".to_string(),
            "Minibatches sent to operators".to_string(),
            "minibatch".to_string(),
        );

        let dispersal_latency = register_histogram_metric_instrument(
            &meter,
            "dispersal_latency".to_string(),
            "Time for one operator to store a minibatch".to_string(),
            "ms".to_string(),
        );

        let batch_size = register_histogram_metric_instrument(
            &meter,
            "batch_size".to_string(),
            "Encoded bytes per minibatch".to_string(),
            "byte".to_string(),
        );

        let batches_attested = register_counter_metric_instrument(
            &meter,
            "batches_attested".to_string(),
            "Batches confirmed on chain".to_string(),
            "batch".to_string(),
        );

        let txns_sent = register_counter_metric_instrument(
            &meter,
            "txns_sent".to_string(),
            "Transactions broadcast, speed-ups included".to_string(),
            "txn".to_string(),
        );

        let txn_speed_ups = register_counter_metric_instrument(
            &meter,
            "txn_speed_ups".to_string(),
            "Gas bumps of pending transactions".to_string(),
            "txn".to_string(),
        );

        let gas_used = register_gauge_metric_instrument(
            &meter,
            "gas_used".to_string(),
            "Gas used by the last mined transaction".to_string(),
            "gas".to_string(),
        );

        let finalizer_runs = register_counter_metric_instrument(
            &meter,
            "finalizer_runs".to_string(),
            "Finalizer sweeps".to_string(),
            "run".to_string(),
        );

        let last_finalized_block = register_gauge_metric_instrument(
            &meter,
            "last_finalized_block".to_string(),
            "Finalized head seen by the last finalizer sweep".to_string(),
            "block".to_string(),
        );

        Self {
            blobs_processed,
            encoding_requests,
            encoded_results,
            encoded_results_size,
            minibatches_dispersed,
            dispersal_latency,
            batch_size,
            batches_attested,
            txns_sent,
            txn_speed_ups,
            gas_used,
            finalizer_runs,
            last_finalized_block,
        }
    }
}

impl BatcherMetrics {
    pub fn record_blobs(&self, outcome: BlobOutcome, count: usize) {
        if count > 0 {
            self.blobs_processed.add(count as u64, &[KeyValue::new("outcome", outcome.to_string())]);
        }
    }
}

//! Metrics for storage operations.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

use crate::error::Operation;

/// Metrics for storage operations.
#[derive(Clone)]
pub struct StorageMetrics {
    /// Histogram for operation latencies.
    pub operations: Histogram<f64>,

    /// Counter for failed operations.
    pub errors: Counter<u64>,
}

impl StorageMetrics {
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("gcs_storage_operation_duration_seconds")
            .with_description("Duration of storage operations in seconds")
            .build();

        let errors = meter
            .u64_counter("gcs_storage_errors_total")
            .with_description("Total number of failed storage operations")
            .build();

        Self { operations, errors }
    }

    pub fn start(&self, operation: Operation) -> Timer {
        Timer::start_with_labels(&self.operations, &[op_label(operation)])
    }

    pub fn record_error(&self, operation: Operation) {
        self.errors.add(1, &[op_label(operation)]);
    }
}

impl std::fmt::Debug for StorageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMetrics").finish_non_exhaustive()
    }
}

fn op_label(operation: Operation) -> KeyValue {
    KeyValue::new("op", operation.as_ref().to_string())
}

/// Records the time between its creation and drop.
pub struct Timer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: Vec<KeyValue>,
}

impl Timer {
    pub fn start_with_labels(histogram: &Histogram<f64>, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            labels: labels.to_vec(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.record(duration, &self.labels);
    }
}

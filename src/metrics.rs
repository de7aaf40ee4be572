use std::{
    borrow::Cow,
    sync::{Arc, LazyLock},
};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    Key, KeyValue, StringValue, Value,
};
use serde::Serialize;

/// Central metrics singleton for pool metrics.
pub(crate) static POOL_METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

const KEY_POOL_NAME: Key = Key::from_static_str("db.client.connection.pool.name");
const KEY_STATE: Key = Key::from_static_str("db.client.connection.state");

/// Storage for pool metrics.
pub(crate) struct Metrics {
    /// The number of resources that are currently in state described by the state attribute.
    pub(crate) conn_count: Gauge<u64>,
    /// The number of acquisitions waiting for a resource.
    pub(crate) pending_requests: Gauge<u64>,
    /// The time it took to obtain a resource from the pool.
    pub(crate) wait_time: Histogram<f64>,
    /// The time it took to create a new resource.
    pub(crate) create_time: Histogram<f64>,
    /// The maximum number of idle resources allowed.
    pub(crate) idle_max: Gauge<u64>,
    /// The minimum number of idle resources requested.
    pub(crate) idle_min: Gauge<u64>,
    /// The maximum number of resources allowed.
    pub(crate) conn_max: Gauge<u64>,
    /// Failed resource creations.
    pub(crate) create_errors: Counter<u64>,
    /// Resources handed over to the factory for destruction.
    pub(crate) destroyed: Counter<u64>,
    /// Failed resource destructions.
    pub(crate) destroy_errors: Counter<u64>,
}

impl Metrics {
    /// Create new storage for pool metrics.
    ///
    /// You probably don't need this, as all pools use a central metrics singleton for storage.
    pub(crate) fn new() -> Self {
        let meter = global::meter("stockpile");
        // db.client.connection.pool.name (string)
        // db.client.connection.state (idle / used / pending)
        let conn_count = meter
            .u64_gauge("db.client.connection.count")
            .with_description(
                "The number of resources that are currently in state described by the state attribute.",
            )
            .build();
        // db.client.connection.pool.name (string)
        let pending_requests = meter
            .u64_gauge("db.client.connection.pending_requests")
            .with_description("The number of pending requests for a resource from the pool.")
            .build();
        // db.client.connection.pool.name (string)
        let wait_time = meter
            .f64_histogram("db.client.connection.wait_time")
            .with_unit("s")
            .with_description("The time it took to obtain a resource from the pool.")
            .build();
        // db.client.connection.pool.name (string)
        let create_time = meter
            .f64_histogram("db.client.connection.create_time")
            .with_unit("s")
            .with_description("The time it took to create a new resource.")
            .build();
        // db.client.connection.pool.name (string)
        let idle_max = meter
            .u64_gauge("db.client.connection.idle.max")
            .with_description("The maximum number of idle resources allowed.")
            .build();
        // db.client.connection.pool.name (string)
        let idle_min = meter
            .u64_gauge("db.client.connection.idle.min")
            .with_description("The minimum number of idle resources requested.")
            .build();
        // db.client.connection.pool.name (string)
        let conn_max = meter
            .u64_gauge("db.client.connection.max")
            .with_description("The maximum number of resources allowed.")
            .build();
        let create_errors = meter
            .u64_counter("stockpile.resource.create_errors")
            .with_description("Resource creations that ended in an error.")
            .build();
        let destroyed = meter
            .u64_counter("stockpile.resource.destroyed")
            .with_description("Resources evicted from the pool and handed over for destruction.")
            .build();
        let destroy_errors = meter
            .u64_counter("stockpile.resource.destroy_errors")
            .with_description("Resource destructions that failed or were declined.")
            .build();
        Metrics {
            conn_count,
            pending_requests,
            wait_time,
            create_time,
            idle_max,
            idle_min,
            conn_max,
            create_errors,
            destroyed,
            destroy_errors,
        }
    }

    pub(crate) fn record_state(&self, label: &[KeyValue; 1], state: &PoolState) {
        if let Some(max_size) = state.max_size {
            self.conn_max.record(max_size as u64, label);
        }
        self.conn_count
            .record(state.idle as u64, &status_kv(label[0].clone(), "idle"));
        self.conn_count
            .record(state.in_use as u64, &status_kv(label[0].clone(), "used"));
        self.conn_count
            .record(state.pending as u64, &status_kv(label[0].clone(), "pending"));
        self.pending_requests.record(state.waiting as u64, label);
        self.idle_min.record(state.min_idle as u64, label);
        if let Some(max_idle) = state.max_idle {
            self.idle_max.record(max_idle as u64, label);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

pub(crate) fn pool_kv(name: Option<Cow<'static, str>>) -> [KeyValue; 1] {
    match name {
        Some(n) => [KeyValue::new(KEY_POOL_NAME, n)],
        None => [KeyValue::new(KEY_POOL_NAME, "default")],
    }
}

pub(crate) fn status_kv(name: KeyValue, status: &'static str) -> [KeyValue; 2] {
    [
        name,
        KeyValue::new(KEY_STATE, Value::String(StringValue::from(status))),
    ]
}

/// Snapshot of pool counters and configured bounds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolState {
    /// Total (`idle` + `in_use` + `pending`) number of resources in the pool.
    pub size: usize,
    /// Current number of idle (not acquired) resources.
    pub idle: usize,
    /// Current number of in-use (acquired) resources.
    pub in_use: usize,
    /// Number of resource creations in flight.
    pub pending: usize,
    /// Number of acquisitions waiting for a resource.
    pub waiting: usize,
    /// Minimum total number of resources to keep in the pool.
    pub min_size: usize,
    /// Maximum total number of resources in the pool, if bounded.
    pub max_size: Option<usize>,
    /// Minimum number of eventually available resources to keep in the pool.
    pub min_idle: usize,
    /// Maximum number of idle resources to keep in the pool, if bounded.
    pub max_idle: Option<usize>,
}

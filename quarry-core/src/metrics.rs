//! Prometheus export of the query metrics recorded by [`Connection`](crate::Connection).
//!
//! Every executed statement records `quarry.query.duration_ms` (histogram)
//! and `quarry.query.count` (counter), labelled by `operation` and `driver`.

use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;

use crate::error::{QuarryError, Result};

/// Installs the global Prometheus recorder and returns the handle for scraping.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| QuarryError::Config(format!("cannot install metrics recorder: {err}")))
}

/// Records the transaction nesting depth of a connection as a gauge.
pub fn record_transaction_depth(conn: &crate::Connection) {
    metrics::gauge!("quarry.transaction.level", "driver" => conn.driver_name())
        .set(f64::from(conn.transaction_level()));
}

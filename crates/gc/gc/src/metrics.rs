use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// Collector metrics, registered under the `state_gc` scope.
pub(crate) struct GcMetrics {
    /// Wall time of the initial full-plus-range scan.
    pub(crate) scan_duration_seconds: Histogram,
    /// Wall time of incremental delta scans run on the controller.
    pub(crate) delta_duration_seconds: Histogram,
    /// Current size of the reachable set.
    pub(crate) reachable_nodes: Gauge,
    /// Rows written to the staging table.
    pub(crate) staged_rows: Counter,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self {
            scan_duration_seconds: histogram!("state_gc.scan_duration_seconds"),
            delta_duration_seconds: histogram!("state_gc.delta_duration_seconds"),
            reachable_nodes: gauge!("state_gc.reachable_nodes"),
            staged_rows: counter!("state_gc.staged_rows"),
        }
    }
}

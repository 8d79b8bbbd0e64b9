use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for the submit server, bumped on the connection and
/// worker paths.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    clients_connected: AtomicU64,
    req_recv_total: AtomicU64,
    rsp_send_total: AtomicU64,
    req_dropped_total: AtomicU64,
}

impl ServerMetrics {
    pub fn client_connected(&self) {
        self.clients_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.clients_connected.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn req_recv(&self) {
        self.req_recv_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rsp_send(&self) {
        self.rsp_send_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn req_dropped(&self) {
        self.req_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            clients_connected: self.clients_connected.load(Ordering::Relaxed),
            req_recv_total: self.req_recv_total.load(Ordering::Relaxed),
            rsp_send_total: self.rsp_send_total.load(Ordering::Relaxed),
            req_dropped_total: self.req_dropped_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub clients_connected: u64,
    pub req_recv_total: u64,
    pub rsp_send_total: u64,
    pub req_dropped_total: u64,
}

impl MetricsSnapshot {
    /// Requests received but not yet answered. Busy requests are answered
    /// too, so `req_dropped_total` does not figure in here.
    pub fn in_flight(&self) -> u64 {
        self.req_recv_total.saturating_sub(self.rsp_send_total)
    }

    /// Share of received requests that were turned away busy.
    pub fn drop_rate(&self) -> f64 {
        if self.req_recv_total == 0 {
            return 0.0;
        }
        self.req_dropped_total as f64 / self.req_recv_total as f64
    }
}

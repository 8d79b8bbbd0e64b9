use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use super::errors::ScheduleError;
use super::frame::FrameCodec;
use super::metrics::ServerMetrics;
use super::packet::{Packet, RESULT_BUSY, RESULT_OK};
use super::pool::Pool;

/// TCP front end that feeds decoded submit requests to a worker pool.
///
/// Packet processing runs on pool workers; the connection task only frames,
/// decodes and forwards. Construction rejects a `block = true` pool, which
/// would park the connection task on a saturated submit instead of letting
/// it answer busy.
pub struct SubmitServer {
    pool: Arc<Pool>,
    metrics: Arc<ServerMetrics>,
}

impl SubmitServer {
    /// Wraps a pool for serving.
    ///
    /// # Panics
    ///
    /// Panics if the pool blocks on saturation; `schedule` must fail fast so
    /// the connection task can answer busy.
    pub fn new(pool: Arc<Pool>) -> Self {
        assert!(
            !pool.is_blocking(),
            "SubmitServer requires a non-blocking pool"
        );
        Self {
            pool,
            metrics: Arc::new(ServerMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "submit server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move { server.handle_conn(stream, peer).await });
        }
    }

    async fn handle_conn(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "client connected");
        self.metrics.client_connected();

        let (mut sink, mut frames) = Framed::new(stream, FrameCodec).split();

        // Worker closures answer through this queue; the writer task is the
        // only owner of the sink half.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let writer_metrics = Arc::clone(&self.metrics);
        let writer = tokio::spawn(async move {
            while let Some(body) = out_rx.recv().await {
                if sink.send(body).await.is_err() {
                    break;
                }
                writer_metrics.rsp_send();
            }
        });

        while let Some(frame) = frames.next().await {
            let body = match frame {
                Ok(body) => body,
                Err(err) => {
                    warn!(%peer, error = %err, "bad frame, dropping connection");
                    break;
                }
            };
            self.metrics.req_recv();

            let (id, payload) = match Packet::decode(body) {
                Ok(Packet::Submit { id, payload }) => (id, payload),
                Ok(other) => {
                    warn!(%peer, packet = ?other, "unexpected packet, dropping connection");
                    break;
                }
                Err(err) => {
                    warn!(%peer, error = %err, "bad packet, dropping connection");
                    break;
                }
            };
            if !self.dispatch(id, payload, &out_tx) {
                break;
            }
        }

        // Lets the writer drain pending acks and stop.
        drop(out_tx);
        let _ = writer.await;
        self.metrics.client_disconnected();
        debug!(%peer, "client disconnected");
    }

    /// Hands one request to the pool. Returns false when the connection
    /// should close because the pool is gone.
    fn dispatch(&self, id: String, payload: Bytes, out: &mpsc::UnboundedSender<Bytes>) -> bool {
        let reply = out.clone();
        let busy_id = id.clone();
        let scheduled = self.pool.schedule(move || {
            let ack = process_submit(id, payload);
            match ack.encode() {
                Ok(body) => {
                    // The writer may already be gone on teardown.
                    let _ = reply.send(body);
                }
                Err(err) => warn!(error = %err, "failed to encode ack"),
            }
        });

        match scheduled {
            Ok(()) => true,
            Err(ScheduleError::NoIdleWorker) => {
                self.metrics.req_dropped();
                let busy = Packet::SubmitAck {
                    id: busy_id,
                    result: RESULT_BUSY,
                };
                match busy.encode() {
                    Ok(body) => {
                        let _ = out.send(body);
                    }
                    Err(err) => warn!(error = %err, "failed to encode busy ack"),
                }
                true
            }
            Err(ScheduleError::PoolFreed) => {
                warn!("worker pool freed, closing connection");
                false
            }
        }
    }
}

/// The actual per-request work, run on a pool worker.
fn process_submit(id: String, payload: Bytes) -> Packet {
    trace!(%id, len = payload.len(), "processing submit");
    Packet::SubmitAck {
        id,
        result: RESULT_OK,
    }
}

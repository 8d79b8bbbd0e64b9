#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use tokio_util::codec::Framed;

    use workerpool::frame::FrameCodec;
    use workerpool::packet::{Packet, RESULT_BUSY, RESULT_OK};
    use workerpool::pool::{Config, Pool};
    use workerpool::server::SubmitServer;

    const REPLY_WAIT: Duration = Duration::from_secs(5);

    async fn start_server(capacity: usize) -> (Arc<Pool>, Arc<SubmitServer>, std::net::SocketAddr) {
        let pool = Arc::new(Pool::with_config(
            capacity,
            Config {
                pre_alloc: true,
                block: false,
            },
        ));
        // Give the pre-allocated workers time to reach their receive loop.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(SubmitServer::new(Arc::clone(&pool)));
        tokio::spawn(Arc::clone(&server).serve(listener));
        (pool, server, addr)
    }

    async fn free_pool(pool: Arc<Pool>) {
        let _ = tokio::task::spawn_blocking(move || pool.free()).await;
    }

    fn submit(id: &str, payload: &'static [u8]) -> Bytes {
        Packet::Submit {
            id: id.into(),
            payload: Bytes::from_static(payload),
        }
        .encode()
        .unwrap()
    }

    #[test]
    #[should_panic(expected = "non-blocking pool")]
    fn rejects_a_blocking_pool() {
        // Pool::new defaults to blocking submission.
        let _ = SubmitServer::new(Arc::new(Pool::new(1)));
    }

    #[tokio::test]
    async fn submit_round_trip() {
        let (pool, server, addr) = start_server(4).await;
        let metrics = server.metrics();

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec);

        for i in 0..3 {
            let id = format!("{i:08}");
            framed.send(submit(&id, b"ping")).await.unwrap();

            let reply = timeout(REPLY_WAIT, framed.next())
                .await
                .expect("reply in time")
                .expect("connection open")
                .expect("well-formed frame");
            match Packet::decode(reply).unwrap() {
                Packet::SubmitAck { id: ack_id, result } => {
                    assert_eq!(ack_id, id);
                    assert_eq!(result, RESULT_OK);
                }
                other => panic!("unexpected reply: {other:?}"),
            }
        }

        // The send counter is bumped just after the reply hits the socket.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = metrics.snapshot();
        assert_eq!(snap.req_recv_total, 3);
        assert_eq!(snap.rsp_send_total, 3);
        assert_eq!(snap.req_dropped_total, 0);
        assert_eq!(snap.clients_connected, 1);

        free_pool(pool).await;
    }

    #[tokio::test]
    async fn saturated_pool_answers_busy() {
        let (pool, server, addr) = start_server(1).await;
        let metrics = server.metrics();

        // Occupy the only worker so the next request finds nobody idle.
        pool.schedule(|| std::thread::sleep(Duration::from_millis(500)))
            .unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec);
        framed.send(submit("00000001", b"work")).await.unwrap();

        let reply = timeout(REPLY_WAIT, framed.next())
            .await
            .expect("reply in time")
            .expect("connection open")
            .expect("well-formed frame");
        match Packet::decode(reply).unwrap() {
            Packet::SubmitAck { id, result } => {
                assert_eq!(id, "00000001");
                assert_eq!(result, RESULT_BUSY);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        // Once the worker frees up, the same connection is served normally.
        tokio::time::sleep(Duration::from_millis(600)).await;
        framed.send(submit("00000002", b"work")).await.unwrap();
        let reply = timeout(REPLY_WAIT, framed.next())
            .await
            .expect("reply in time")
            .expect("connection open")
            .expect("well-formed frame");
        match Packet::decode(reply).unwrap() {
            Packet::SubmitAck { id, result } => {
                assert_eq!(id, "00000002");
                assert_eq!(result, RESULT_OK);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = metrics.snapshot();
        assert_eq!(snap.req_recv_total, 2);
        assert_eq!(snap.req_dropped_total, 1);

        free_pool(pool).await;
    }

    #[tokio::test]
    async fn malformed_frame_closes_the_connection() {
        let (pool, _server, addr) = start_server(2).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        // Declares a 2-byte total length, which cannot even hold the header.
        stream.write_all(&[0, 0, 0, 2]).await.unwrap();

        let mut buf = [0u8; 16];
        let read = timeout(REPLY_WAIT, stream.read(&mut buf))
            .await
            .expect("server closes in time")
            .unwrap();
        assert_eq!(read, 0, "server hangs up instead of answering");

        free_pool(pool).await;
    }

    #[tokio::test]
    async fn unknown_command_closes_the_connection() {
        let (pool, _server, addr) = start_server(2).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec);
        // A well-formed frame whose body opens with a command nobody knows.
        framed
            .send(Bytes::from_static(&[0x7f, b'0', b'0', b'0', b'0', b'0', b'0', b'0', b'0']))
            .await
            .unwrap();

        let next = timeout(REPLY_WAIT, framed.next())
            .await
            .expect("server closes in time");
        assert!(next.is_none() || next.unwrap().is_err());

        free_pool(pool).await;
    }

    #[tokio::test]
    async fn freed_pool_closes_the_connection() {
        let (pool, _server, addr) = start_server(2).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec);

        free_pool(pool).await;

        framed.send(submit("00000009", b"late")).await.unwrap();
        let next = timeout(REPLY_WAIT, framed.next())
            .await
            .expect("server closes in time");
        assert!(
            next.is_none() || next.unwrap().is_err(),
            "no ack comes back from a freed pool"
        );
    }
}

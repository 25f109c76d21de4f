//! Loopback broker for tests: answers every CONNECT with an accepted
//! CONNACK, swallows everything else, and counts sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

pub(crate) struct TestBroker {
    pub port: u16,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl TestBroker {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) async fn spawn() -> TestBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));

    let (o, c) = (opened.clone(), closed.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            o.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                if matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {
                    let _ = socket.write_all(&CONNACK_ACCEPTED).await;
                    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
                }
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    TestBroker {
        port,
        opened,
        closed,
    }
}

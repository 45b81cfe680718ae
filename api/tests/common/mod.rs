//! Shared helpers for tests that run a real server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use airlink_api::{Broker, Hub, Server, ServerConfig, UnavailableAssistant};
use airlink_sdk::ws::decode_frame;
use airlink_sdk::Envelope;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Hub,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub async fn start(config: ServerConfig, broker: Option<Arc<dyn Broker>>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = Server::new(config, broker, Arc::new(UnavailableAssistant));
        let hub = server.hub();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(listener, async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            hub,
            stop: Some(stop),
            task,
        }
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn connect(&self, path: &str) -> Socket {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url(path))
            .await
            .expect("connect");
        ws
    }

    pub async fn connect_with_header(&self, path: &str, user_id: &str) -> Socket {
        let mut request = self.ws_url(path).into_client_request().expect("request");
        request
            .headers_mut()
            .insert("X-User-ID", user_id.parse().expect("header value"));
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("connect");
        ws
    }

    /// Waits until the hub reports `channel` with `count` subscribers.
    pub async fn wait_for_channel(&self, channel: &str, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.hub.stats().channels.get(channel).copied().unwrap_or(0) != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("channel wait timeout");
    }

    pub async fn wait_for_clients(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.hub.stats().total_clients != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client wait timeout");
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("server stop timeout")
            .expect("join")
            .expect("serve");
    }
}

/// Reads text frames until at least one envelope arrives.
pub async fn next_envelopes(ws: &mut Socket) -> Vec<Envelope> {
    loop {
        match next_message(ws).await {
            Message::Text(text) => {
                let envelopes: Vec<Envelope> = decode_frame(text.as_str())
                    .map(|decoded| decoded.expect("envelope"))
                    .collect();
                if !envelopes.is_empty() {
                    return envelopes;
                }
            }
            Message::Close(frame) => panic!("unexpected close: {:?}", frame),
            _ => {}
        }
    }
}

/// Reads until an envelope of `msg_type` arrives.
pub async fn expect_type(ws: &mut Socket, msg_type: &str) -> Envelope {
    loop {
        for envelope in next_envelopes(ws).await {
            if envelope.msg_type == msg_type {
                return envelope;
            }
        }
    }
}

/// Reads until the server closes and returns the close frame.
pub async fn expect_close(ws: &mut Socket) -> Option<CloseFrame> {
    loop {
        match tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("read timeout")
        {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

pub async fn next_message(ws: &mut Socket) -> Message {
    tokio::time::timeout(WAIT, ws.next())
        .await
        .expect("read timeout")
        .expect("stream open")
        .expect("frame")
}

pub async fn send(ws: &mut Socket, envelope: &Envelope) {
    let text = envelope.to_json().expect("encode");
    ws.send(Message::Text(text.into())).await.expect("send");
}

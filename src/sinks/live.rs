// src/sinks/live.rs - WebSocket endpoint streaming every window to connected viewers

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::{run_sink, SinkError, WindowSink};
use crate::config::LiveConfig;
use crate::tracker::registry::SubscriberRegistry;
use crate::tracker::shutdown::ShutdownListener;
use crate::types::WindowStat;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// One upgraded viewer connection
pub struct LiveSubscriberSink {
    peer: SocketAddr,
    writer: SplitSink<WebSocketStream<TcpStream>, Message>,
    reader: SplitStream<WebSocketStream<TcpStream>>,
}

impl LiveSubscriberSink {
    pub fn new(peer: SocketAddr, socket: WebSocketStream<TcpStream>) -> Self {
        let (writer, reader) = socket.split();
        Self { peer, writer, reader }
    }
}

#[async_trait]
impl WindowSink for LiveSubscriberSink {
    fn name(&self) -> String {
        format!("ws:{}", self.peer)
    }

    async fn deliver(&mut self, stat: &WindowStat) -> Result<(), SinkError> {
        let payload = stat.to_json()?;
        self.writer.send(Message::Text(payload)).await?;
        Ok(())
    }

    fn ends_on_error(&self) -> bool {
        true
    }

    /// Viewers are not expected to talk; anything but a close is ignored
    async fn closed(&mut self) {
        loop {
            match self.reader.next().await {
                Some(Ok(Message::Close(frame))) => {
                    debug!("{} sent close: {:?}", self.peer, frame);
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("{} read error: {}", self.peer, e);
                    return;
                }
                None => return,
            }
        }
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        if let Err(e) = self.writer.send(Message::Close(None)).await {
            debug!("Close frame to {} not sent: {}", self.peer, e);
        }
        let _ = self.writer.close().await;
        Ok(())
    }
}

/// Accepts viewer connections and runs one streaming task per connection
pub struct LiveServer {
    listener: TcpListener,
    path: Arc<str>,
    queue_capacity: usize,
    registry: Arc<SubscriberRegistry>,
}

impl LiveServer {
    pub async fn bind(config: &LiveConfig, registry: Arc<SubscriberRegistry>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind live sink to {}", config.listen_addr))?;

        Ok(Self {
            listener,
            path: Arc::from(config.path.as_str()),
            queue_capacity: config.queue_capacity,
            registry,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Live sink listener has no local address")
    }

    /// Accept connections until shutdown
    pub async fn run(self, mut shutdown: ShutdownListener) {
        match self.local_addr() {
            Ok(addr) => info!("Live sink listening on ws://{}{}", addr, self.path),
            Err(e) => warn!("{}", e),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.path),
                            Arc::clone(&self.registry),
                            self.queue_capacity,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.wait() => {
                    info!("Live sink received shutdown signal");
                    break;
                }
            }
        }

        info!("Live sink stopped accepting connections");
    }
}

/// Upgrade one connection and stream windows to it until either side is done
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    path: Arc<str>,
    registry: Arc<SubscriberRegistry>,
    queue_capacity: usize,
    shutdown: ShutdownListener,
) {
    let expected = Arc::clone(&path);
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == &*expected {
            return Ok(response);
        }
        let mut rejection = ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    };

    let socket = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_hdr_async(stream, check_path),
    )
    .await
    {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            warn!("WebSocket upgrade from {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket upgrade from {} timed out", peer);
            return;
        }
    };

    info!("Viewer {} connected on {}", peer, path);
    run_sink(LiveSubscriberSink::new(peer, socket), registry, queue_capacity, shutdown).await;
    info!("Viewer {} disconnected", peer);
}

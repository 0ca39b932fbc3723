//! [`CockpitServer`] – one TCP listener for every operator-facing surface.
//!
//! * Websocket upgrades → command session ([`crate::ws`]).
//! * `GET /api/events` → server-sent event stream ([`crate::sse`]).
//! * Everything else → calibration REST routes ([`crate::http`]).

use std::net::SocketAddr;
use std::sync::Arc;

use rover_runtime::RoverRuntime;
use rover_types::RoverError;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::{http, sse, ws};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8888;

pub struct CockpitServer {
    runtime: Arc<RoverRuntime>,
    port: u16,
}

impl CockpitServer {
    pub fn new(runtime: Arc<RoverRuntime>) -> Self {
        Self {
            runtime,
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listener without serving yet. Port `0` picks a free port.
    pub async fn bind(self) -> Result<BoundServer, RoverError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RoverError::Channel(format!("bind error on {addr}: {e}")))?;
        Ok(BoundServer {
            runtime: self.runtime,
            listener,
        })
    }

    /// Bind and serve until the task is dropped.
    pub async fn run(self) -> Result<(), RoverError> {
        self.bind().await?.serve().await
    }
}

pub struct BoundServer {
    runtime: Arc<RoverRuntime>,
    listener: TcpListener,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr, RoverError> {
        self.listener
            .local_addr()
            .map_err(|e| RoverError::Channel(format!("no local address: {e}")))
    }

    pub async fn serve(self) -> Result<(), RoverError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "cockpit listening");
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let runtime = Arc::clone(&self.runtime);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, &runtime).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    runtime: &RoverRuntime,
) -> Result<(), RoverError> {
    // `peek` leaves the request in place for the websocket handshake.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| RoverError::Channel(format!("peek error from {peer}: {e}")))?;
    if is_ws_upgrade(&buf[..n]) {
        return ws::serve(stream, peer, runtime).await;
    }

    let request = match http::read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            let _ = stream
                .write_all(&http::Response::error(&e).to_bytes())
                .await;
            return Err(e);
        }
    };
    debug!(%peer, method = %request.method, path = %request.path, "http request");

    if request.method == "GET" && request.path == http::EVENTS_PATH {
        return sse::stream(&mut stream, runtime, runtime.config().write_deadline).await;
    }

    let response = http::handle(runtime, &request).await;
    stream
        .write_all(&response.to_bytes())
        .await
        .map_err(|e| RoverError::Channel(format!("HTTP write error: {e}")))?;
    let _ = stream.shutdown().await;
    Ok(())
}

fn is_ws_upgrade(head: &[u8]) -> bool {
    String::from_utf8_lossy(head).lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port() {
        assert_eq!(DEFAULT_PORT, 8888);
    }

    #[test]
    fn upgrade_detection_is_case_insensitive() {
        assert!(is_ws_upgrade(
            b"GET / HTTP/1.1\r\nHost: r\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n"
        ));
        assert!(!is_ws_upgrade(b"GET /api/calibration HTTP/1.1\r\nHost: r\r\n\r\n"));
    }
}

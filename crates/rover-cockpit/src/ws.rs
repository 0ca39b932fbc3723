//! Websocket command sessions.
//!
//! One task per connection reads operator messages and hands them to the
//! dispatcher, which never waits on hardware. After authentication the
//! same task also forwards bus events to the operator, including the ones
//! addressed to this session alone. Writes carry a
//! deadline; an operator that stops reading is disconnected instead of
//! stalling anything else.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use rover_runtime::RoverRuntime;
use rover_types::{Event, RoverError};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::sse::payload_data;

pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    runtime: &RoverRuntime,
) -> Result<(), RoverError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| RoverError::Channel(format!("websocket handshake from {peer}: {e}")))?;
    let (mut tx, mut rx) = ws.split();

    let config = runtime.config();
    let dispatcher = runtime.dispatcher();
    let mut session = dispatcher.open_session();
    let mut events = runtime.bus().subscribe_session(session.id());
    info!(session = %session.id(), %peer, "operator connected");

    loop {
        let idle = tokio::time::sleep(session.idle_remaining(config.idle_timeout));
        tokio::select! {
            msg = rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(session = %session.id(), error = %e, "read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };
                let response = dispatcher.handle(&mut session, &text);
                let sent = send(&mut tx, response.frame.to_text(), config.write_deadline).await;
                if response.close || sent.is_err() {
                    break;
                }
            }
            Some(event) = events.recv(), if session.is_authenticated() => {
                if send(&mut tx, event_text(&event), config.write_deadline).await.is_err() {
                    warn!(session = %session.id(), "operator not reading, disconnecting");
                    break;
                }
            }
            () = idle => {
                info!(session = %session.id(), "session idle, closing");
                let _ = send_message(&mut tx, Message::Close(None), config.write_deadline).await;
                break;
            }
        }
    }

    let id = session.id();
    // Queued commands keep running after the socket is gone.
    session.close().await;
    info!(session = %id, %peer, "operator disconnected");
    Ok(())
}

fn event_text(event: &Event) -> String {
    json!({ "event": event.payload.name(), "data": payload_data(&event.payload) }).to_string()
}

async fn send<S>(tx: &mut S, text: String, deadline: Duration) -> Result<(), RoverError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    send_message(tx, Message::Text(text.into()), deadline).await
}

async fn send_message<S>(tx: &mut S, msg: Message, deadline: Duration) -> Result<(), RoverError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match tokio::time::timeout(deadline, tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RoverError::Channel(format!("websocket write failed: {e}"))),
        Err(_) => Err(RoverError::Channel("websocket write deadline exceeded".into())),
    }
}

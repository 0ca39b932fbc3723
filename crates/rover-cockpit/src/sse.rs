//! Server-sent event stream (`GET /api/events`).

use std::time::Duration;

use rover_runtime::RoverRuntime;
use rover_types::{EventPayload, RoverError};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const HEADERS: &str = "HTTP/1.1 200 OK\r\n\
    Content-Type: text/event-stream\r\n\
    Cache-Control: no-cache\r\n\
    Connection: keep-alive\r\n\
    \r\n";

/// Body of an event without its type tag.
pub fn payload_data(payload: &EventPayload) -> Value {
    serde_json::to_value(payload)
        .ok()
        .and_then(|mut v| v.get_mut("payload").map(Value::take))
        .unwrap_or(Value::Null)
}

/// `event: <name>\ndata: <json>\n\n`.
pub fn frame(payload: &EventPayload) -> String {
    format!("event: {}\ndata: {}\n\n", payload.name(), payload_data(payload))
}

async fn write_frame<W: AsyncWrite + Unpin>(
    out: &mut W,
    text: &str,
    deadline: Duration,
) -> Result<(), RoverError> {
    match tokio::time::timeout(deadline, out.write_all(text.as_bytes())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RoverError::Channel(format!("write failed: {e}"))),
        Err(_) => Err(RoverError::Channel("write deadline exceeded".into())),
    }
}

/// Stream bus events to `out` until the client goes away or stops reading.
///
/// The stream opens with the current shoulder calibration and battery
/// status. A subscriber that misses the write deadline is dropped so it
/// cannot hold anyone else up.
pub async fn stream<W: AsyncWrite + Unpin>(
    out: &mut W,
    runtime: &RoverRuntime,
    deadline: Duration,
) -> Result<(), RoverError> {
    // Subscribe first so nothing published during the preamble is lost.
    let mut events = runtime.bus().subscribe();

    write_frame(out, HEADERS, deadline).await?;
    let preamble = [
        EventPayload::ShoulderCalibration(runtime.shoulder()),
        EventPayload::BatteryStatus(runtime.battery().estimate()),
    ];
    for payload in &preamble {
        write_frame(out, &frame(payload), deadline).await?;
    }

    while let Some(event) = events.recv().await {
        if let Err(e) = write_frame(out, &frame(&event.payload), deadline).await {
            warn!(error = %e, "dropping event stream subscriber");
            return Err(e);
        }
    }
    debug!("event bus closed, ending stream");
    Ok(())
}

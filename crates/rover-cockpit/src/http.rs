//! Minimal HTTP/1.1 handling for the calibration REST surface.
//!
//! Requests are read once (headers plus a `Content-Length` body) and every
//! response closes the connection, except the SSE stream which is handed
//! over to [`crate::sse`].

use rover_runtime::RoverRuntime;
use rover_types::{RoverError, ShoulderCalibration};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one request from `stream`.
pub async fn read_request<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Request, RoverError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(RoverError::Parse("request headers too large".into()));
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| RoverError::Channel(format!("read error: {e}")))?;
        if n == 0 {
            return Err(RoverError::Channel("connection closed mid-request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(RoverError::Parse(format!("bad request line {request_line:?}")));
    };
    let path = target.split('?').next().unwrap_or(target).to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut request = Request {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body: buf[header_end + 4..].to_vec(),
    };

    let length: usize = request
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if length > MAX_BODY_BYTES {
        return Err(RoverError::Parse("request body too large".into()));
    }
    while request.body.len() < length {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| RoverError::Channel(format!("read error: {e}")))?;
        if n == 0 {
            break;
        }
        request.body.extend_from_slice(&chunk[..n]);
    }
    request.body.truncate(length);
    Ok(request)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Response {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Error body carrying the reason string shown to the operator.
    pub fn error(error: &RoverError) -> Self {
        Self::json(error.http_status(), error_body(error))
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        if self.body.is_some() {
            out.push_str("Content-Type: application/json\r\n");
        }
        for (k, v) in &self.headers {
            out.push_str(&format!("{k}: {v}\r\n"));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        out.into_bytes()
    }
}

fn error_body(error: &RoverError) -> Value {
    let reason = match error {
        RoverError::InvalidCalibration(msg)
        | RoverError::Parse(msg)
        | RoverError::AcquisitionUnavailable(msg) => msg.clone(),
        other => other.to_string(),
    };
    json!({ "success": false, "error": reason, "kind": error.kind() })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub const EVENTS_PATH: &str = "/api/events";
const CALIBRATION_PATH: &str = "/api/calibration";
const SHOULDER_PATH: &str = "/api/servo/shoulder";

/// Handle every non-streaming route.
pub async fn handle(runtime: &RoverRuntime, request: &Request) -> Response {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", CALIBRATION_PATH) => get_calibration(runtime, request),
        ("POST", CALIBRATION_PATH) => post_calibration(runtime, request).await,
        ("GET", SHOULDER_PATH) => Response::json(200, json!({ "calibration": runtime.shoulder() })),
        ("POST", SHOULDER_PATH) => post_shoulder(runtime, request).await,
        (_, CALIBRATION_PATH | SHOULDER_PATH | EVENTS_PATH) => Response::json(
            405,
            json!({ "success": false, "error": "method not allowed" }),
        ),
        _ => Response::json(404, json!({ "success": false, "error": "not found" })),
    }
}

fn etag(revision: u64) -> String {
    format!("\"{revision}\"")
}

fn parse_etag(value: &str) -> Option<u64> {
    value
        .trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .parse()
        .ok()
}

fn get_calibration(runtime: &RoverRuntime, request: &Request) -> Response {
    let view = runtime.calibration_view();
    let tag = etag(view.revision);
    if request.header("if-none-match").and_then(parse_etag) == Some(view.revision) {
        return Response::empty(304).with_header("ETag", tag);
    }
    match serde_json::to_value(&view) {
        Ok(body) => Response::json(200, body).with_header("ETag", tag),
        Err(e) => Response::error(&RoverError::Channel(format!("serialization failed: {e}"))),
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationRequest {
    voltage: Option<Value>,
    revision: Option<u64>,
}

fn parse_voltage(value: Option<&Value>) -> Result<f64, RoverError> {
    let invalid = || RoverError::InvalidCalibration("Invalid voltage value".into());
    match value {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

async fn post_calibration(runtime: &RoverRuntime, request: &Request) -> Response {
    let body: CalibrationRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(e) => return Response::error(&RoverError::Parse(format!("invalid JSON body: {e}"))),
    };
    let voltage = match parse_voltage(body.voltage.as_ref()) {
        Ok(v) => v,
        Err(e) => return Response::error(&e),
    };
    let revision = body
        .revision
        .or_else(|| request.header("if-match").and_then(parse_etag));

    match runtime.calibrate(voltage, revision).await {
        Ok(outcome) => {
            let tag = etag(outcome.calibration.revision);
            Response::json(
                200,
                json!({
                    "success": true,
                    "calibration": outcome.calibration,
                    "revision": outcome.calibration.revision,
                    "actual_voltage": outcome.actual_voltage,
                    "raw_sample": outcome.raw_sample,
                    "voltage": outcome.estimate.voltage,
                    "raw_voltage": outcome.estimate.raw_voltage,
                }),
            )
            .with_header("ETag", tag)
        }
        Err(e) => {
            tracing::warn!(error = %e, voltage, "calibration rejected");
            Response::error(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShoulderRequest {
    base_angle: Option<Value>,
    raise_angle: Option<Value>,
}

fn parse_angle(value: Option<&Value>) -> Result<f32, RoverError> {
    let invalid = || RoverError::InvalidCalibration("Angles must be numeric.".into());
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().map(|v| v as f32).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

async fn post_shoulder(runtime: &RoverRuntime, request: &Request) -> Response {
    let body: ShoulderRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(e) => return Response::error(&RoverError::Parse(format!("invalid JSON body: {e}"))),
    };
    let requested = match (
        parse_angle(body.base_angle.as_ref()),
        parse_angle(body.raise_angle.as_ref()),
    ) {
        (Ok(base_angle), Ok(raise_angle)) => ShoulderCalibration {
            base_angle,
            raise_angle,
        },
        (Err(e), _) | (_, Err(e)) => return Response::error(&e),
    };
    match runtime.update_shoulder(requested).await {
        Ok(stored) => Response::json(200, json!({ "success": true, "calibration": stored })),
        Err(e) => Response::error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_with_body_is_parsed() {
        let raw = b"POST /api/calibration?x=1 HTTP/1.1\r\nHost: rover\r\nContent-Length: 16\r\nIf-Match: \"3\"\r\n\r\n{\"voltage\":7.9}\n";
        let mut reader = &raw[..];
        let req = read_request(&mut reader).await.unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/calibration");
        assert_eq!(req.header("if-match"), Some("\"3\""));
        assert_eq!(req.body, b"{\"voltage\":7.9}\n");
    }

    #[tokio::test]
    async fn truncated_request_is_an_error() {
        let mut reader = &b"GET / HTTP/1.1\r\nHost"[..];
        assert!(read_request(&mut reader).await.is_err());
    }

    #[test]
    fn etags_round_trip() {
        assert_eq!(parse_etag(&etag(12)), Some(12));
        assert_eq!(parse_etag("W/\"4\""), Some(4));
        assert_eq!(parse_etag("abc"), None);
    }

    #[test]
    fn voltage_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_voltage(Some(&json!(7.5))).unwrap(), 7.5);
        assert_eq!(parse_voltage(Some(&json!("7.25"))).unwrap(), 7.25);
        assert!(parse_voltage(Some(&json!("seven"))).is_err());
        assert!(parse_voltage(None).is_err());
    }

    #[test]
    fn error_response_carries_reason_and_status() {
        let resp = Response::error(&RoverError::InvalidCalibration(
            "Voltage must be greater than zero".into(),
        ));
        assert_eq!(resp.status, 400);
        let body = resp.body.unwrap();
        assert_eq!(body["error"], "Voltage must be greater than zero");
        assert_eq!(body["kind"], "invalid_calibration");
    }

    #[test]
    fn response_serialises_headers_and_length() {
        let bytes = Response::json(200, json!({"ok": true}))
            .with_header("ETag", "\"1\"")
            .to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("ETag: \"1\"\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("{\"ok\":true}"));
    }
}

//! Session wire protocol.
//!
//! Inbound messages are decoded exactly once into a [`Command`]. Three shapes
//! are accepted:
//!
//! - bare tokens: `forward`, `DS`, `wsB 60`, `SiLeft 2`, ...
//! - a JSON string holding a token: `"get_info"`
//! - a JSON envelope: `{"title": "findColorSet", "data": [h, s, v]}`
//!
//! Tokens that take an argument (`wsB`, `SiLeft`, `SiRight`, `PWMMS`)
//! accept it after the token or as the envelope `data`, as a number or a
//! numeric string.
//!
//! Outbound replies use the [`Reply`] envelope `{status, title, data}`.

use rover_types::{Axis, Command, Direction, PowerMode, RoverError, TelemetrySnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Sent after a successful credential check.
pub const GREETING: &str = "congratulation, you have connect with server\r\nnow, you can do something else";

/// Sent before a session with a wrong credential is closed.
pub const REJECTION: &str = "sorry, the username or password is wrong, please submit again";

const SPEED_TOKEN: &str = "wsB";
const TRIM_DOWN_TOKEN: &str = "SiLeft";
const TRIM_UP_TOKEN: &str = "SiRight";
const SAVE_TRIM_TOKEN: &str = "PWMMS";
const COLOR_TITLE: &str = "findColorSet";

/// Tokens followed by an argument, with the command it builds.
const ARG_TOKENS: [(&str, fn(&str) -> Result<Command, RoverError>); 4] = [
    (SPEED_TOKEN, speed_command),
    (TRIM_DOWN_TOKEN, trim_down_command),
    (TRIM_UP_TOKEN, trim_up_command),
    (SAVE_TRIM_TOKEN, save_trim_command),
];

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    /// Title echoed back in the reply: the token or the envelope title.
    pub title: String,
    pub command: Command,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    title: String,
    #[serde(default)]
    data: Value,
}

/// Decode one inbound line.
///
/// # Errors
///
/// [`RoverError::Parse`] for unknown tokens, malformed JSON, or out-of-range
/// arguments.
pub fn parse(line: &str) -> Result<Parsed, RoverError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(RoverError::Parse("empty message".into()));
    }
    match line.as_bytes()[0] {
        b'{' => {
            let envelope: Envelope = serde_json::from_str(line)
                .map_err(|e| RoverError::Parse(format!("malformed envelope: {e}")))?;
            let command = envelope_command(&envelope)?;
            Ok(Parsed {
                title: envelope.title,
                command,
            })
        }
        b'"' => {
            let token: String = serde_json::from_str(line)
                .map_err(|e| RoverError::Parse(format!("malformed string: {e}")))?;
            parse_token(token.trim())
        }
        _ => parse_token(line),
    }
}

fn parse_token(token: &str) -> Result<Parsed, RoverError> {
    if let Some(command) = token_command(token) {
        return Ok(Parsed {
            title: token.to_string(),
            command,
        });
    }
    for (prefix, build) in ARG_TOKENS {
        if let Some(rest) = token.strip_prefix(prefix) {
            return Ok(Parsed {
                title: prefix.to_string(),
                command: build(rest)?,
            });
        }
    }
    Err(RoverError::Parse(format!("unknown command {token:?}")))
}

fn envelope_command(envelope: &Envelope) -> Result<Command, RoverError> {
    let title = envelope.title.as_str();
    if title == COLOR_TITLE {
        return color_command(&envelope.data);
    }
    if let Some((_, build)) = ARG_TOKENS.iter().find(|(token, _)| *token == title) {
        return match &envelope.data {
            Value::Number(n) => build(&n.to_string()),
            Value::String(s) => build(s),
            other => Err(RoverError::Parse(format!("invalid {title} argument {other}"))),
        };
    }
    token_command(title).ok_or_else(|| RoverError::Parse(format!("unknown command {title:?}")))
}

fn speed_command(arg: &str) -> Result<Command, RoverError> {
    let arg = arg.trim();
    arg.parse::<i64>()
        .map(clamp_speed)
        .map_err(|_| RoverError::Parse(format!("invalid speed {arg:?}")))
}

fn clamp_speed(speed: i64) -> Command {
    Command::SetSpeed {
        speed: speed.clamp(0, 100) as u8,
    }
}

fn channel_arg(arg: &str) -> Result<u8, RoverError> {
    let arg = arg.trim();
    arg.parse::<u8>()
        .map_err(|_| RoverError::Parse(format!("invalid servo channel {arg:?}")))
}

fn trim_down_command(arg: &str) -> Result<Command, RoverError> {
    Ok(Command::TrimServo {
        channel: channel_arg(arg)?,
        delta: -1,
    })
}

fn trim_up_command(arg: &str) -> Result<Command, RoverError> {
    Ok(Command::TrimServo {
        channel: channel_arg(arg)?,
        delta: 1,
    })
}

fn save_trim_command(arg: &str) -> Result<Command, RoverError> {
    Ok(Command::SaveTrim {
        channel: channel_arg(arg)?,
    })
}

fn color_command(data: &Value) -> Result<Command, RoverError> {
    let invalid = || RoverError::Parse("findColorSet expects [h, s, v] in 0..=255".into());
    let values = data.as_array().ok_or_else(invalid)?;
    if values.len() != 3 {
        return Err(invalid());
    }
    let mut hsv = [0u8; 3];
    for (slot, value) in hsv.iter_mut().zip(values) {
        *slot = value
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(invalid)?;
    }
    Ok(Command::FindColor { hsv })
}

fn token_command(token: &str) -> Option<Command> {
    use Direction::{Negative, Positive};

    let mv = |axis, direction| Command::Move { axis, direction };
    let stop = |axis| Command::Stop { axis };

    let command = match token {
        "forward" => mv(Axis::Drive, Positive),
        "backward" => mv(Axis::Drive, Negative),
        "DS" => stop(Axis::Drive),
        "left" => mv(Axis::Turn, Negative),
        "right" => mv(Axis::Turn, Positive),
        "TS" => stop(Axis::Turn),

        "armUp" => mv(Axis::Shoulder, Positive),
        "armDown" => mv(Axis::Shoulder, Negative),
        "armStop" => stop(Axis::Shoulder),
        "handUp" => mv(Axis::Wrist, Positive),
        "handDown" => mv(Axis::Wrist, Negative),
        "handStop" => stop(Axis::Wrist),
        "lookleft" => mv(Axis::Yaw, Positive),
        "lookright" => mv(Axis::Yaw, Negative),
        "LRstop" => stop(Axis::Yaw),
        "grab" => mv(Axis::Gripper, Positive),
        "loose" => mv(Axis::Gripper, Negative),
        "GLstop" => stop(Axis::Gripper),
        "up" => mv(Axis::CameraTilt, Positive),
        "down" => mv(Axis::CameraTilt, Negative),
        "UDstop" => stop(Axis::CameraTilt),

        "ledOn" => Command::Headlight { on: true },
        "ledOff" => Command::Headlight { on: false },
        "PWMINIT" => Command::ServoInit,
        "PWMD" => Command::ResetTrim,
        "home" => Command::Home,
        "stop" | "stopAll" => Command::StopAll,
        "modeActive" => Command::SetMode {
            mode: PowerMode::Active,
        },
        "modeEco" => Command::SetMode {
            mode: PowerMode::Eco,
        },
        "cameraHQOn" => Command::CameraQuality { high: true },
        "cameraHQOff" => Command::CameraQuality { high: false },
        "get_info" => Command::GetInfo,
        _ => return switch_command(token),
    };
    Some(command)
}

/// `Switch_<n>_on` / `Switch_<n>_off`.
fn switch_command(token: &str) -> Option<Command> {
    let (number, state) = token.strip_prefix("Switch_")?.split_once('_')?;
    let on = match state {
        "on" => true,
        "off" => false,
        _ => return None,
    };
    let axis = Axis::switch(number.parse().ok()?)?;
    Some(Command::Switch { axis, on })
}

// ────────────────────────────────────────────────────────────────────────────
// Replies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// Handled inline.
    Ok,
    /// Accepted and handed to the scheduler.
    Queued,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    pub title: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TelemetrySnapshot>,
}

impl Reply {
    pub fn ok(title: impl Into<String>, data: Value) -> Self {
        Self {
            status: ReplyStatus::Ok,
            title: title.into(),
            data,
            snapshot: None,
        }
    }

    pub fn queued(title: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Queued,
            title: title.into(),
            data: Value::Null,
            snapshot: None,
        }
    }

    pub fn error(title: impl Into<String>, error: &RoverError) -> Self {
        Self {
            status: ReplyStatus::Error,
            title: title.into(),
            data: json!({ "kind": error.kind(), "message": error.to_string() }),
            snapshot: None,
        }
    }

    /// Reply to `get_info`: the legacy five-element array plus the snapshot.
    pub fn info(snapshot: TelemetrySnapshot) -> Self {
        let data = json!([
            snapshot.cpu.temperature_c,
            snapshot.cpu.usage_percent,
            snapshot.cpu.ram_percent,
            snapshot.battery.voltage,
            snapshot.battery.percentage,
        ]);
        Self {
            status: ReplyStatus::Ok,
            title: "get_info".into(),
            data,
            snapshot: Some(snapshot),
        }
    }

    /// Kind of the carried error, for error replies.
    pub fn error_kind(&self) -> Option<&str> {
        match self.status {
            ReplyStatus::Error => self.data.get("kind").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","title":"reply","data":{{"kind":"parse","message":"{e}"}}}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Command {
        parse(line).unwrap().command
    }

    #[test]
    fn bare_tokens_map_to_axis_commands() {
        assert_eq!(
            command("forward"),
            Command::Move {
                axis: Axis::Drive,
                direction: Direction::Positive
            }
        );
        assert_eq!(command("TS"), Command::Stop { axis: Axis::Turn });
        assert_eq!(
            command("left"),
            Command::Move {
                axis: Axis::Turn,
                direction: Direction::Negative
            }
        );
        assert_eq!(command("GLstop"), Command::Stop { axis: Axis::Gripper });
        assert_eq!(command("ledOn"), Command::Headlight { on: true });
        assert_eq!(command("stop"), Command::StopAll);
        assert_eq!(command("  home\r\n"), Command::Home);
    }

    #[test]
    fn speed_is_parsed_and_clamped() {
        assert_eq!(command("wsB 60"), Command::SetSpeed { speed: 60 });
        assert_eq!(command("wsB 250"), Command::SetSpeed { speed: 100 });
        assert_eq!(command("wsB -4"), Command::SetSpeed { speed: 0 });
        assert_eq!(parse("wsB 60").unwrap().title, "wsB");
        assert!(matches!(parse("wsB fast"), Err(RoverError::Parse(_))));
    }

    #[test]
    fn switches_are_numbered() {
        assert_eq!(
            command("Switch_2_on"),
            Command::Switch {
                axis: Axis::Switch2,
                on: true
            }
        );
        assert_eq!(
            command("Switch_3_off"),
            Command::Switch {
                axis: Axis::Switch3,
                on: false
            }
        );
        for bad in ["Switch_4_on", "Switch_0_off", "Switch_1_dim", "Switch_on"] {
            assert!(matches!(parse(bad), Err(RoverError::Parse(_))), "{bad}");
        }
    }

    #[test]
    fn servo_trim_tokens() {
        assert_eq!(
            command("SiLeft 2"),
            Command::TrimServo {
                channel: 2,
                delta: -1
            }
        );
        assert_eq!(
            command("SiRight 0"),
            Command::TrimServo {
                channel: 0,
                delta: 1
            }
        );
        assert_eq!(command("PWMMS 4"), Command::SaveTrim { channel: 4 });
        assert_eq!(command("PWMINIT"), Command::ServoInit);
        assert_eq!(command("PWMD"), Command::ResetTrim);
        assert_eq!(parse("SiRight 3").unwrap().title, "SiRight");
        assert_eq!(parse("PWMD").unwrap().title, "PWMD");
        for bad in ["SiLeft", "SiLeft x", "PWMMS 300", "PWMDX"] {
            assert!(matches!(parse(bad), Err(RoverError::Parse(_))), "{bad}");
        }
    }

    #[test]
    fn enveloped_arguments_may_be_numbers_or_strings() {
        assert_eq!(
            command(r#"{"title":"SiLeft","data":1}"#),
            Command::TrimServo {
                channel: 1,
                delta: -1
            }
        );
        assert_eq!(
            command(r#"{"title":"PWMMS","data":"3"}"#),
            Command::SaveTrim { channel: 3 }
        );
        assert_eq!(
            command(r#"{"title":"wsB","data":40}"#),
            Command::SetSpeed { speed: 40 }
        );
        assert!(matches!(
            parse(r#"{"title":"SiRight","data":[1]}"#),
            Err(RoverError::Parse(_))
        ));
    }

    #[test]
    fn quoted_and_enveloped_get_info() {
        assert_eq!(command("\"get_info\""), Command::GetInfo);
        assert_eq!(command(r#"{"title":"get_info"}"#), Command::GetInfo);
        let parsed = parse(r#"{"title":"armUp","data":null}"#).unwrap();
        assert_eq!(parsed.title, "armUp");
    }

    #[test]
    fn color_target_is_validated() {
        assert_eq!(
            command(r#"{"title":"findColorSet","data":[35, 43, 46]}"#),
            Command::FindColor { hsv: [35, 43, 46] }
        );
        for bad in [
            r#"{"title":"findColorSet","data":[1,2]}"#,
            r#"{"title":"findColorSet","data":[1,2,256]}"#,
            r#"{"title":"findColorSet","data":"red"}"#,
        ] {
            assert!(matches!(parse(bad), Err(RoverError::Parse(_))), "{bad}");
        }
    }

    #[test]
    fn unknown_or_malformed_input_is_a_parse_error() {
        for bad in ["", "dance", "{\"title\":", "\"unterminated", r#"{"title":"fly"}"#] {
            assert!(matches!(parse(bad), Err(RoverError::Parse(_))), "{bad:?}");
        }
    }

    #[test]
    fn error_reply_carries_kind_and_reason() {
        let reply = Reply::error("armUp", &RoverError::InterlockBlocked { axis: Axis::Shoulder });
        assert_eq!(reply.error_kind(), Some("interlock_blocked"));
        let json: Value = serde_json::from_str(&reply.to_json()).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["data"]["message"].as_str().unwrap().contains("interlock"));
        assert!(json.get("snapshot").is_none());
    }
}

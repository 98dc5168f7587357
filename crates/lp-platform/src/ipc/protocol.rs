//! JSON payloads exchanged with the presence service.

use lp_core::presence::activity::DEFAULT_ASSET_KEY;
use lp_core::presence::{ActivityPayload, ActivityTimestamps};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version requested in the handshake.
pub const HANDSHAKE_VERSION: u32 = 1;

/// Maximum length, in characters, of every text field of an activity.
pub const MAX_FIELD_CHARS: usize = 128;

/// Image references longer than this are replaced by the fallback asset key.
pub const MAX_IMAGE_CHARS: usize = 256;

const ELLIPSIS: char = '…';

/// "Listening to ..." activity type.
const ACTIVITY_TYPE_LISTENING: u8 = 2;

/// Shorten `value` to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_with_ellipsis(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = value.chars().take(max_chars - 1).collect();
    out.push(ELLIPSIS);
    out
}

#[derive(Debug, Serialize)]
struct Handshake<'a> {
    v: u32,
    client_id: &'a str,
}

pub fn handshake_payload(client_id: &str) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&Handshake {
        v: HANDSHAKE_VERSION,
        client_id,
    })
}

#[derive(Debug, Serialize)]
struct SetActivityCommand {
    cmd: &'static str,
    args: SetActivityArgs,
    nonce: String,
}

#[derive(Debug, Serialize)]
struct SetActivityArgs {
    pid: u32,
    activity: Option<WireActivity>,
}

#[derive(Debug, Serialize)]
struct WireActivity {
    #[serde(rename = "type")]
    kind: u8,
    details: String,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamps: Option<ActivityTimestamps>,
    assets: WireAssets,
}

#[derive(Debug, Serialize)]
struct WireAssets {
    large_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    large_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    small_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    small_text: Option<String>,
}

impl WireActivity {
    fn from_payload(activity: &ActivityPayload, fallback_image: &str) -> Self {
        let text = |value: &str| truncate_with_ellipsis(value, MAX_FIELD_CHARS);
        let large_image = if activity.large_image.chars().count() > MAX_IMAGE_CHARS {
            fallback_image.to_string()
        } else {
            activity.large_image.clone()
        };
        Self {
            kind: ACTIVITY_TYPE_LISTENING,
            details: text(&activity.details),
            state: text(&activity.state),
            timestamps: activity.timestamps,
            assets: WireAssets {
                large_image,
                large_text: activity.large_text.as_deref().map(text),
                small_image: activity.small_image.clone(),
                small_text: activity.small_text.as_deref().map(text),
            },
        }
    }
}

/// Encode a SET_ACTIVITY command. `None` clears the activity.
pub fn set_activity_payload(
    activity: Option<&ActivityPayload>,
    pid: u32,
    nonce: String,
) -> serde_json::Result<Vec<u8>> {
    let fallback_image = activity
        .and_then(|a| a.small_image.clone())
        .unwrap_or_else(|| DEFAULT_ASSET_KEY.to_string());
    serde_json::to_vec(&SetActivityCommand {
        cmd: "SET_ACTIVITY",
        args: SetActivityArgs {
            pid,
            activity: activity.map(|a| WireActivity::from_payload(a, &fallback_image)),
        },
        nonce,
    })
}

/// Payload of a keep-alive ping.
pub fn ping_payload(nonce: String) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&serde_json::json!({ "nonce": nonce }))
}

/// A command/event frame received from the service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceFrame {
    pub cmd: Option<String>,
    pub evt: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub nonce: Option<String>,
}

impl ServiceFrame {
    pub fn parse(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn is_ready(&self) -> bool {
        self.cmd.as_deref() == Some("DISPATCH") && self.evt.as_deref() == Some("READY")
    }

    /// Negotiated protocol version announced in READY.
    pub fn protocol_version(&self) -> u32 {
        self.data
            .get("v")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(HANDSHAKE_VERSION)
    }

    /// Error message when the frame reports a failed command.
    pub fn error_message(&self) -> Option<String> {
        if self.evt.as_deref() != Some("ERROR") {
            return None;
        }
        let message = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        Some(message.to_string())
    }
}

/// Body of a close frame sent by the service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloseReason {
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl CloseReason {
    /// Lenient: an unparsable close body is still a close.
    pub fn parse(payload: &[u8]) -> Self {
        serde_json::from_slice(payload).unwrap_or_default()
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{message} ({code})"),
            (None, Some(message)) => write!(f, "{message}"),
            (Some(code), None) => write!(f, "code {code}"),
            (None, None) => write!(f, "no reason given"),
        }
    }
}

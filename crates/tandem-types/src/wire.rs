//! Websocket wire protocol.
//!
//! Every frame on the socket is a JSON text message of the shape
//! `{"event": <name>, "data": <payload>}`. The same protocol is spoken on
//! the server side toward local clients and inbound peers, and on the client
//! side toward remote sites.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{PostitMessage, VoiceMessage};

/// Event names carried in the `event` field of a [`Frame`].
pub mod evt {
    pub const LOGIN: &str = "login";
    pub const AUTHE_OK: &str = "authe_ok";
    pub const UNAUTHORIZED: &str = "401";
    pub const BAD_REQUEST: &str = "bad_request";

    pub const EXTEN_UPDATE: &str = "extenUpdate";
    pub const TRUNK_UPDATE: &str = "trunkUpdate";
    pub const QUEUE_UPDATE: &str = "queueUpdate";
    pub const QUEUE_MEMBER_UPDATE: &str = "queueMemberUpdate";
    pub const PARKING_UPDATE: &str = "parkingUpdate";
    pub const EXTEN_RINGING: &str = "extenRinging";
    pub const EXTEN_HANGUP: &str = "extenHangup";
    pub const ENDPOINT_PRESENCE_UPDATE: &str = "endpointPresenceUpdate";

    pub const UPDATE_NEW_VOICE_MESSAGES: &str = "updateNewVoiceMessages";
    pub const NEW_VOICE_MESSAGE_COUNTER: &str = "newVoiceMessageCounter";
    pub const UPDATE_NEW_POSTIT: &str = "updateNewPostit";
    pub const NEW_POSTIT_COUNTER: &str = "newPostitCounter";

    pub const REMOTE_EXTEN_UPDATE: &str = "remoteExtenUpdate";
    pub const REMOTE_ENDPOINT_PRESENCE_UPDATE: &str = "remoteEndpointPresenceUpdate";
    pub const REMOTE_SITE_UPDATE: &str = "remoteSiteUpdate";
}

/// Acknowledgement text sent with [`evt::AUTHE_OK`].
pub const AUTHORIZED_MESSAGE: &str = "authorized successfully";
/// Text sent with [`evt::UNAUTHORIZED`] before closing the socket.
pub const UNAUTHORIZED_MESSAGE: &str = "unauthorized access";

/// A single websocket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parses a text message; malformed frames surface the serde error so
    /// the caller can log and drop them.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The `authe_ok` acknowledgement sent after a successful login.
    pub fn authe_ok() -> Self {
        Self::new(
            evt::AUTHE_OK,
            serde_json::json!({ "message": AUTHORIZED_MESSAGE }),
        )
    }

    /// The `401` frame sent before forcibly closing an unauthorized socket.
    pub fn unauthorized() -> Self {
        Self::new(
            evt::UNAUTHORIZED,
            serde_json::json!({ "message": UNAUTHORIZED_MESSAGE }),
        )
    }

    /// Reply to a frame that is not valid before authentication.
    pub fn bad_request() -> Self {
        Self::new(evt::BAD_REQUEST, Value::Null)
    }
}

/// Payload of the `login` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub access_key_id: String,
    pub token: String,
    /// Optional client identification, e.g. the desktop app tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_agent: Option<String>,
}

/// Wrapper for events rebroadcast locally on behalf of a remote site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRelay {
    pub remote_site: String,
    pub data: Value,
}

impl RemoteRelay {
    /// Builds the wrapped payload directly, for emission paths that already
    /// hold a `Value`.
    pub fn wrap(remote_site: &str, data: Value) -> Value {
        serde_json::json!({ "remoteSite": remote_site, "data": data })
    }
}

/// Counter-only voicemail notification sent to every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoicemailCounter {
    pub voicemail: String,
    pub counter: usize,
}

/// Full voicemail listing sent to the mailbox owners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoicemailList {
    pub voicemail: String,
    pub messages: Vec<VoiceMessage>,
}

/// Counter-only post-it notification sent to every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostitCounter {
    pub user: String,
    pub counter: usize,
}

/// Full post-it listing sent to the recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostitList {
    pub user: String,
    pub messages: Vec<PostitMessage>,
}

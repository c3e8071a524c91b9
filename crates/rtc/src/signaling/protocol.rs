//! JSON-RPC 2.0 signaling protocol types
//!
//! Client requests carry an `id` and get exactly one response. Hub
//! notifications carry `method` + `params` and no `id`.

use crate::peer::{IceCandidate, PeerId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    pub params: serde_json::Value,

    /// Request ID for matching with response (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<ErrorObject> for Error {
    fn from(e: ErrorObject) -> Self {
        Error::Signaling {
            code: e.code,
            message: e.message,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes plus the hub's own
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Target peer is not connected to the hub
    pub const PEER_NOT_FOUND: i32 = -32000;

    /// Room does not exist or has ended
    pub const ROOM_NOT_FOUND: i32 = -32001;

    /// Caller lacks the role required for the method
    pub const NOT_AUTHORIZED: i32 = -32002;

    /// Room is at capacity
    pub const ROOM_FULL: i32 = -32005;
}

/// A text frame received from the hub
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    /// Success response to one of our requests
    Response { id: u64, result: serde_json::Value },
    /// Error response to one of our requests
    Error { id: u64, error: ErrorObject },
    /// Server-initiated notification
    Notification { method: String, params: serde_json::Value },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

impl IncomingFrame {
    /// Classify a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;

        if let Some(method) = raw.method {
            return Ok(IncomingFrame::Notification {
                method,
                params: raw.params.unwrap_or(serde_json::Value::Null),
            });
        }

        let id = raw
            .id
            .as_ref()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::Serialization("Response without numeric id".to_string()))?;

        match (raw.error, raw.result) {
            (Some(error), _) => Ok(IncomingFrame::Error { id, error }),
            (None, result) => Ok(IncomingFrame::Response {
                id,
                result: result.unwrap_or(serde_json::Value::Null),
            }),
        }
    }
}

/// Role of a participant in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    #[default]
    Participant,
}

/// Requests the client sends to the hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum HubRequest {
    /// Join a room; answered with [`JoinRoomResponse`]
    #[serde(rename = "room.join")]
    JoinRoom { room_id: String, display_name: String },

    #[serde(rename = "room.leave")]
    LeaveRoom { room_id: String },

    /// Host only
    #[serde(rename = "room.end")]
    EndRoom { room_id: String },

    #[serde(rename = "room.media_state")]
    MediaState {
        room_id: String,
        is_muted: bool,
        is_camera_off: bool,
    },

    #[serde(rename = "room.raise_hand")]
    RaiseHand { room_id: String, raised: bool },

    #[serde(rename = "signal.offer")]
    SendOffer { to: PeerId, sdp: String },

    #[serde(rename = "signal.answer")]
    SendAnswer { to: PeerId, sdp: String },

    #[serde(rename = "signal.ice_candidate")]
    SendIceCandidate { to: PeerId, candidate: IceCandidate },

    /// Ring `to` with our offer
    #[serde(rename = "call.start")]
    StartCall {
        to: PeerId,
        sdp: String,
        is_video: bool,
    },

    #[serde(rename = "call.accept")]
    AcceptCall { to: PeerId, sdp: String },

    #[serde(rename = "call.decline")]
    DeclineCall {
        to: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "call.end")]
    EndCall { to: PeerId },
}

impl HubRequest {
    /// Wrap into a JSON-RPC request with `id`
    pub fn into_rpc(self, id: u64) -> Result<JsonRpcRequest> {
        let value = serde_json::to_value(&self)?;
        let method = value
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| Error::Serialization("Request without method".to_string()))?
            .to_string();
        let params = value
            .get("params")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        Ok(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params,
            id: Some(serde_json::Value::from(id)),
        })
    }

    /// Wire method name
    pub fn method(&self) -> &'static str {
        match self {
            HubRequest::JoinRoom { .. } => "room.join",
            HubRequest::LeaveRoom { .. } => "room.leave",
            HubRequest::EndRoom { .. } => "room.end",
            HubRequest::MediaState { .. } => "room.media_state",
            HubRequest::RaiseHand { .. } => "room.raise_hand",
            HubRequest::SendOffer { .. } => "signal.offer",
            HubRequest::SendAnswer { .. } => "signal.answer",
            HubRequest::SendIceCandidate { .. } => "signal.ice_candidate",
            HubRequest::StartCall { .. } => "call.start",
            HubRequest::AcceptCall { .. } => "call.accept",
            HubRequest::DeclineCall { .. } => "call.decline",
            HubRequest::EndCall { .. } => "call.end",
        }
    }
}

/// Notifications the hub pushes to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum HubEvent {
    /// Own role in the current room (sent after join and on re-assignment)
    #[serde(rename = "room.role_assigned")]
    RoleAssigned { peer_id: PeerId, role: ParticipantRole },

    #[serde(rename = "room.user_joined")]
    UserJoined {
        peer_id: PeerId,
        display_name: String,
        #[serde(default)]
        role: ParticipantRole,
    },

    #[serde(rename = "room.user_left")]
    UserLeft { peer_id: PeerId },

    #[serde(rename = "room.ended")]
    RoomEnded {
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "participant.media_changed")]
    ParticipantMediaChanged {
        peer_id: PeerId,
        is_muted: bool,
        is_camera_off: bool,
    },

    #[serde(rename = "participant.hand_changed")]
    HandChanged { peer_id: PeerId, raised: bool },

    #[serde(rename = "signal.offer")]
    OfferReceived { from: PeerId, sdp: String },

    #[serde(rename = "signal.answer")]
    AnswerReceived { from: PeerId, sdp: String },

    #[serde(rename = "signal.ice_candidate")]
    IceCandidateReceived { from: PeerId, candidate: IceCandidate },

    /// Someone is ringing us
    #[serde(rename = "call.incoming")]
    IncomingCall {
        from: PeerId,
        #[serde(default)]
        caller_name: Option<String>,
        sdp: String,
        #[serde(default)]
        is_video: bool,
    },

    #[serde(rename = "call.accepted")]
    CallAccepted { from: PeerId, sdp: String },

    #[serde(rename = "call.declined")]
    CallDeclined {
        from: PeerId,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "call.ended")]
    CallEnded { from: PeerId },

    #[serde(rename = "call.failed")]
    CallFailed {
        #[serde(default)]
        from: Option<PeerId>,
        reason: String,
    },
}

impl HubEvent {
    /// Decode a notification's method and params
    pub fn from_notification(method: &str, params: serde_json::Value) -> Result<Self> {
        let params = if params.is_null() {
            serde_json::json!({})
        } else {
            params
        };
        let value = serde_json::json!({ "method": method, "params": params });
        Ok(serde_json::from_value(value)?)
    }

    /// Encode as a JSON-RPC notification frame
    pub fn to_notification(&self) -> Result<JsonRpcRequest> {
        let value = serde_json::to_value(self)?;
        Ok(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: value
                .get("method")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string(),
            params: value
                .get("params")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            id: None,
        })
    }
}

/// Result of `room.join`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinRoomResponse {
    /// Identity the hub assigned to us for this connection
    pub peer_id: PeerId,
    pub role: ParticipantRole,
    /// Everyone already in the room, excluding us
    #[serde(default)]
    pub participants: Vec<RosterEntry>,
}

/// One participant in the join roster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterEntry {
    pub peer_id: PeerId,
    pub display_name: String,
    #[serde(default)]
    pub role: ParticipantRole,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_camera_off: bool,
    #[serde(default)]
    pub is_hand_raised: bool,
}

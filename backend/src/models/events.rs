//! Live transport frames.
//!
//! Every frame is `{"event": "<name>", "data": {...}}`. Payloads the core does not
//! interpret (chat bodies, SDP, ICE candidates) travel as opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Coordinates, Notification, UserId, Venue};

/// Events sent by a client over its live connection
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "register")]
    Register { user_id: UserId },

    #[serde(rename = "joinRoom")]
    JoinRoom { room_id: String },

    #[serde(rename = "leaveRoom")]
    LeaveRoom { room_id: String },

    #[serde(rename = "typing")]
    Typing {
        room_id: Option<String>,
        to: Option<UserId>,
        #[serde(default = "default_true")]
        is_typing: bool,
    },

    #[serde(rename = "message:seen")]
    MessageSeen {
        room_id: Option<String>,
        to: Option<UserId>,
        #[serde(default)]
        message_ids: Vec<String>,
    },

    #[serde(rename = "sendMessage")]
    SendMessage {
        room_id: Option<String>,
        to: Option<UserId>,
        message_id: String,
        #[serde(default)]
        payload: Value,
    },

    // ============================
    // Meet in the middle
    // ============================
    #[serde(rename = "meet:request")]
    MeetRequest { to: UserId, coords: Option<Coordinates> },

    #[serde(rename = "meet:accept")]
    MeetAccept { with: UserId, coords: Option<Coordinates> },

    /// Initiator supplies coordinates after `meet:location_required`
    #[serde(rename = "meet:location")]
    MeetLocation { with: UserId, coords: Option<Coordinates> },

    #[serde(rename = "meet:expand")]
    MeetExpand { with: UserId },

    #[serde(rename = "meet:place:selected")]
    MeetPlaceSelected { with: UserId, venue: Venue },

    #[serde(rename = "meet:place:accepted")]
    MeetPlaceAccepted { with: UserId },

    #[serde(rename = "meet:place:rejected")]
    MeetPlaceRejected { with: UserId },

    #[serde(rename = "meet:decline")]
    MeetDecline { with: UserId },

    // ============================
    // Call signaling
    // ============================
    #[serde(rename = "call:offer")]
    CallOffer {
        room_id: Option<String>,
        to: Option<UserId>,
        #[serde(default)]
        payload: Value,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        room_id: Option<String>,
        to: Option<UserId>,
        #[serde(default)]
        payload: Value,
    },

    #[serde(rename = "call:signal")]
    CallSignal {
        room_id: Option<String>,
        to: Option<UserId>,
        #[serde(default)]
        payload: Value,
    },

    #[serde(rename = "call:end")]
    CallEnd {
        room_id: Option<String>,
        to: Option<UserId>,
        #[serde(default)]
        payload: Value,
    },
}

fn default_true() -> bool {
    true
}

/// Events pushed to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "registered")]
    Registered { user_id: UserId },

    #[serde(rename = "presence:online")]
    PresenceOnline { user_id: UserId },

    #[serde(rename = "presence:offline")]
    PresenceOffline { user_id: UserId },

    #[serde(rename = "message")]
    Message {
        from: UserId,
        room_id: String,
        message_id: String,
        payload: Value,
    },

    #[serde(rename = "typing")]
    Typing {
        from: UserId,
        room_id: String,
        is_typing: bool,
    },

    #[serde(rename = "message:seen")]
    MessageSeen {
        from: UserId,
        room_id: String,
        message_ids: Vec<String>,
    },

    #[serde(rename = "match")]
    Match { match_id: Uuid, with: UserId },

    #[serde(rename = "buzz_request")]
    BuzzRequest { from: UserId },

    #[serde(rename = "buzz")]
    Buzz {
        from: UserId,
        streak: i64,
        milestone: Option<i64>,
    },

    #[serde(rename = "notification")]
    Notification(Notification),

    #[serde(rename = "meet:request")]
    MeetRequest { from: UserId },

    #[serde(rename = "meet:unavailable")]
    MeetUnavailable { to: UserId },

    #[serde(rename = "meet:accepted")]
    MeetAccepted { from: UserId, coords: Coordinates },

    #[serde(rename = "meet:location_required")]
    MeetLocationRequired { with: UserId },

    #[serde(rename = "meet:suggest")]
    MeetSuggest {
        with: UserId,
        midpoint: Coordinates,
        venues: Vec<Venue>,
        can_expand: bool,
        radius_meters: u32,
    },

    #[serde(rename = "meet:place:selected")]
    MeetPlaceSelected { by: UserId, venue: Venue },

    #[serde(rename = "meet:place:accepted")]
    MeetPlaceAccepted { by: UserId, venue: Venue },

    #[serde(rename = "meet:place:rejected")]
    MeetPlaceRejected { by: UserId },

    #[serde(rename = "meet:declined")]
    MeetDeclined { by: UserId },

    #[serde(rename = "meet:expired")]
    MeetExpired { with: UserId },

    #[serde(rename = "call:offer")]
    CallOffer { from: UserId, payload: Value },

    #[serde(rename = "call:answer")]
    CallAnswer { from: UserId, payload: Value },

    #[serde(rename = "call:signal")]
    CallSignal { from: UserId, payload: Value },

    #[serde(rename = "call:end")]
    CallEnd { from: UserId, payload: Value },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Registered { .. } => "registered",
            ServerEvent::PresenceOnline { .. } => "presence:online",
            ServerEvent::PresenceOffline { .. } => "presence:offline",
            ServerEvent::Message { .. } => "message",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::MessageSeen { .. } => "message:seen",
            ServerEvent::Match { .. } => "match",
            ServerEvent::BuzzRequest { .. } => "buzz_request",
            ServerEvent::Buzz { .. } => "buzz",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::MeetRequest { .. } => "meet:request",
            ServerEvent::MeetUnavailable { .. } => "meet:unavailable",
            ServerEvent::MeetAccepted { .. } => "meet:accepted",
            ServerEvent::MeetLocationRequired { .. } => "meet:location_required",
            ServerEvent::MeetSuggest { .. } => "meet:suggest",
            ServerEvent::MeetPlaceSelected { .. } => "meet:place:selected",
            ServerEvent::MeetPlaceAccepted { .. } => "meet:place:accepted",
            ServerEvent::MeetPlaceRejected { .. } => "meet:place:rejected",
            ServerEvent::MeetDeclined { .. } => "meet:declined",
            ServerEvent::MeetExpired { .. } => "meet:expired",
            ServerEvent::CallOffer { .. } => "call:offer",
            ServerEvent::CallAnswer { .. } => "call:answer",
            ServerEvent::CallSignal { .. } => "call:signal",
            ServerEvent::CallEnd { .. } => "call:end",
            ServerEvent::Error { .. } => "error",
        }
    }
}

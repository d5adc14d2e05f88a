//! Request, response and delivery types for the timecast protocol.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use timecast_core::FireAt;

use crate::error::RequestError;

/// Application payload: an ordered mapping of named values.
///
/// The server never looks inside a payload; it only carries it from the
/// publisher (or scheduler) to subscribers.
pub type Payload = serde_json::Map<String, Value>;

/// Request kinds understood by the server.
const REQUEST_KINDS: &[&str] = &[
    "info",
    "ping",
    "add_time_event",
    "publish",
    "subscribe",
    "unsubscribe",
    "listen",
];

/// Request types that can be sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// Get server identity and statistics.
    Info,

    /// Liveness check.
    Ping,

    /// Schedule a payload for delivery on a channel at `fire_at`.
    AddTimeEvent {
        /// When the event fires.
        fire_at: FireAt,
        /// Channel the payload is published on.
        channel: String,
        /// Payload delivered to subscribers.
        payload: Payload,
    },

    /// Deliver a payload to the current subscribers of a channel.
    Publish {
        /// Target channel.
        channel: String,
        /// Payload delivered to subscribers.
        payload: Payload,
    },

    /// Join a channel's subscriber set.
    Subscribe {
        /// Channel to join.
        channel: String,
    },

    /// Leave a channel's subscriber set.
    Unsubscribe {
        /// Channel to leave.
        channel: String,
    },

    /// Switch the session to receiving deliveries.
    Listen,
}

impl Request {
    /// Creates an AddTimeEvent request.
    pub fn add_time_event(
        fire_at: impl Into<FireAt>,
        channel: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::AddTimeEvent {
            fire_at: fire_at.into(),
            channel: channel.into(),
            payload,
        }
    }

    /// Creates a Publish request.
    pub fn publish(channel: impl Into<String>, payload: Payload) -> Self {
        Self::Publish {
            channel: channel.into(),
            payload,
        }
    }

    /// Creates a Subscribe request.
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::Subscribe {
            channel: channel.into(),
        }
    }

    /// Creates an Unsubscribe request.
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Returns the wire `kind` of this request.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Ping => "ping",
            Self::AddTimeEvent { .. } => "add_time_event",
            Self::Publish { .. } => "publish",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Listen => "listen",
        }
    }

    /// Checks field contents that the type system cannot express.
    pub fn validate(&self) -> Result<(), RequestError> {
        match self {
            Self::AddTimeEvent { channel, .. }
            | Self::Publish { channel, .. }
            | Self::Subscribe { channel }
            | Self::Unsubscribe { channel } => {
                if channel.trim().is_empty() {
                    return Err(RequestError::invalid("channel must not be empty"));
                }
                Ok(())
            }
            Self::Info | Self::Ping | Self::Listen => Ok(()),
        }
    }
}

/// Interprets a decoded frame body as a request.
///
/// Distinguishes an unknown `kind` from a known kind with bad fields so the
/// client gets a precise error code.
pub fn decode_request(value: &Value) -> Result<Request, RequestError> {
    let object = value
        .as_object()
        .ok_or_else(|| RequestError::invalid("request must be a mapping"))?;

    let kind = match object.get("kind") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(_) => return Err(RequestError::invalid("`kind` must be a string")),
        None => return Err(RequestError::invalid("missing `kind` field")),
    };

    if !REQUEST_KINDS.contains(&kind) {
        return Err(RequestError::UnknownKind(kind.to_string()));
    }

    let request: Request = serde_json::from_value(value.clone())
        .map_err(|e| RequestError::invalid(format!("{kind}: {e}")))?;
    request.validate()?;
    Ok(request)
}

/// Response types that can be sent from server to client.
///
/// The `kind` mirrors the request being answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Server identity and statistics.
    Info {
        /// Snapshot details.
        info: ServerInfo,
    },

    /// Pong.
    Ping,

    /// Time event accepted.
    AddTimeEvent {
        /// Identifier of the scheduled event.
        event_id: String,
        /// Resolved fire time, in the server's timezone.
        fire_at: DateTime<FixedOffset>,
    },

    /// Publish accepted.
    Publish {
        /// Channel published on.
        channel: String,
        /// Number of subscriber queues the payload reached.
        delivered: usize,
    },

    /// Subscription recorded.
    Subscribe {
        /// Channel joined.
        channel: String,
    },

    /// Subscription removed.
    Unsubscribe {
        /// Channel left.
        channel: String,
    },

    /// Session now receiving deliveries.
    Listen {
        /// Channels the session is subscribed to.
        channels: Vec<String>,
    },

    /// Error response.
    Error {
        /// Error details.
        #[serde(flatten)]
        error: ErrorResponse,
    },
}

impl Response {
    /// Creates an Info response.
    pub fn info(info: ServerInfo) -> Self {
        Self::Info { info }
    }

    /// Creates an Error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorResponse::new(code, message),
        }
    }

    /// Creates an error response from an ErrorResponse.
    pub fn from_error(error: ErrorResponse) -> Self {
        Self::Error { error }
    }

    /// Returns true unless this is an error response.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }

    /// Returns the error if this is an error response.
    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}

impl From<RequestError> for Response {
    fn from(err: RequestError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

/// A payload pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    /// Payload from an immediate `publish`.
    PublishedEvent {
        /// Channel published on.
        channel: String,
        /// Published payload.
        payload: Payload,
    },

    /// Payload from a fired time event.
    TimeEvent {
        /// Identifier returned when the event was scheduled.
        event_id: String,
        /// Channel the event fired on.
        channel: String,
        /// Requested fire time.
        fire_at: DateTime<FixedOffset>,
        /// When the event was scheduled.
        scheduled_at: DateTime<FixedOffset>,
        /// Scheduled payload.
        payload: Payload,
    },
}

impl Delivery {
    /// Creates a PublishedEvent delivery.
    pub fn published(channel: impl Into<String>, payload: Payload) -> Self {
        Self::PublishedEvent {
            channel: channel.into(),
            payload,
        }
    }

    /// Channel the delivery belongs to.
    pub fn channel(&self) -> &str {
        match self {
            Self::PublishedEvent { channel, .. } | Self::TimeEvent { channel, .. } => channel,
        }
    }

    /// The carried payload.
    pub fn payload(&self) -> &Payload {
        match self {
            Self::PublishedEvent { payload, .. } | Self::TimeEvent { payload, .. } => payload,
        }
    }
}

/// Anything the server writes to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Answer to a request.
    Response(Response),
    /// Channel delivery.
    Delivery(Delivery),
}

impl From<Response> for ServerMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Delivery> for ServerMessage {
    fn from(delivery: Delivery) -> Self {
        Self::Delivery(delivery)
    }
}

/// Server identity and statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
    /// Bound address (`host:port` or socket path).
    pub address: String,
    /// When the server started.
    pub started_at: DateTime<FixedOffset>,
    /// Seconds since start.
    pub uptime_seconds: u64,
    /// Live sessions.
    pub clients: usize,
    /// Session cap.
    pub max_clients: usize,
    /// Channels with at least one subscriber.
    pub channels: Vec<String>,
    /// Number of channels.
    pub channel_count: usize,
    /// Pending time events.
    pub pending_events: usize,
    /// Active codec.
    pub codec: String,
    /// Timezone fire times are evaluated in.
    pub timezone: String,
}

/// Error codes carried by error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request `kind` is not recognised.
    UnknownKind,

    /// Required fields are missing or malformed.
    InvalidRequest,

    /// The frame body could not be decoded.
    MalformedFrame,

    /// Unexpected server-side failure.
    Internal,
}

impl ErrorCode {
    /// Returns a human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnknownKind => "The request kind is unknown",
            Self::InvalidRequest => "The request was invalid",
            Self::MalformedFrame => "The frame could not be decoded",
            Self::Internal => "An internal error occurred",
        }
    }
}

/// Error response details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl std::error::Error for ErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn request_serde_ping() {
        let json = serde_json::to_string(&Request::Ping).unwrap();
        assert_eq!(json, r#"{"kind":"ping"}"#);

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Request::Ping);
    }

    #[test]
    fn request_serde_publish() {
        let request = Request::publish("c2", payload(json!({"status": "ok"})));
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"publish","channel":"c2","payload":{"status":"ok"}}"#
        );
    }

    #[test]
    fn request_serde_add_time_event() {
        let value = json!({
            "kind": "add_time_event",
            "fire_at": 1700000000.5,
            "channel": "alarms",
            "payload": {"wake": true},
        });
        let request = decode_request(&value).unwrap();
        assert_eq!(
            request,
            Request::add_time_event(1_700_000_000.5, "alarms", payload(json!({"wake": true})))
        );
    }

    #[test]
    fn decode_request_unknown_kind() {
        let err = decode_request(&json!({"kind": "teleport"})).unwrap_err();
        assert_eq!(err, RequestError::UnknownKind("teleport".into()));
    }

    #[test]
    fn decode_request_missing_kind() {
        let err = decode_request(&json!({"channel": "c1"})).unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));

        let err = decode_request(&json!({"kind": 7})).unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));

        let err = decode_request(&json!(["ping"])).unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));
    }

    #[test]
    fn decode_request_missing_fields() {
        let err = decode_request(&json!({"kind": "publish", "channel": "c1"})).unwrap_err();
        match err {
            RequestError::Invalid(message) => assert!(message.contains("payload")),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = decode_request(&json!({"kind": "subscribe"})).unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));
    }

    #[test]
    fn decode_request_rejects_blank_channel() {
        let err = decode_request(&json!({"kind": "subscribe", "channel": "  "})).unwrap_err();
        assert_eq!(err, RequestError::invalid("channel must not be empty"));
    }

    #[test]
    fn decode_request_rejects_non_mapping_payload() {
        let err = decode_request(&json!({"kind": "publish", "channel": "c", "payload": [1, 2]}))
            .unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));
    }

    #[test]
    fn request_kind_matches_wire_tag() {
        let requests = vec![
            Request::Info,
            Request::Ping,
            Request::add_time_event(0.0, "c", Payload::new()),
            Request::publish("c", Payload::new()),
            Request::subscribe("c"),
            Request::unsubscribe("c"),
            Request::Listen,
        ];
        for request in requests {
            let value = serde_json::to_value(&request).unwrap();
            assert_eq!(value["kind"], request.kind());
        }
    }

    #[test]
    fn response_serde_error() {
        let response = Response::error(ErrorCode::InvalidRequest, "missing field");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"error","code":"invalid_request","message":"missing field"}"#
        );

        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert!(!parsed.is_success());
        assert_eq!(parsed.as_error().unwrap().code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn response_from_request_error() {
        let response: Response = RequestError::UnknownKind("x".into()).into();
        assert_eq!(response.as_error().unwrap().code, ErrorCode::UnknownKind);
    }

    #[test]
    fn server_message_distinguishes_responses_and_deliveries() {
        let delivery: ServerMessage =
            serde_json::from_value(json!({"kind": "published_event", "channel": "c2", "payload": {"status": "ok"}}))
                .unwrap();
        match delivery {
            ServerMessage::Delivery(delivery) => {
                assert_eq!(delivery.channel(), "c2");
                assert_eq!(delivery.payload(), &payload(json!({"status": "ok"})));
            }
            other => panic!("expected delivery, got {other:?}"),
        }

        let response: ServerMessage =
            serde_json::from_value(json!({"kind": "subscribe", "channel": "c2"})).unwrap();
        assert_eq!(
            response,
            ServerMessage::Response(Response::Subscribe {
                channel: "c2".into()
            })
        );
    }

    #[test]
    fn time_event_delivery_serde() {
        let fire_at = DateTime::parse_from_rfc3339("2024-01-15T12:00:00+01:00").unwrap();
        let delivery = Delivery::TimeEvent {
            event_id: "abc".into(),
            channel: "alarms".into(),
            fire_at,
            scheduled_at: fire_at,
            payload: payload(json!({"n": 1})),
        };
        let value = serde_json::to_value(&delivery).unwrap();
        assert_eq!(value["kind"], "time_event");
        assert_eq!(value["fire_at"], "2024-01-15T12:00:00+01:00");

        let back: Delivery = serde_json::from_value(value).unwrap();
        assert_eq!(back, delivery);
    }

    #[test]
    fn error_response_display() {
        let error = ErrorResponse::new(ErrorCode::MalformedFrame, "bad bytes");
        let display = format!("{}", error);
        assert!(display.contains("decoded"));
        assert!(display.contains("bad bytes"));
    }
}

//! Request dispatch.
//!
//! This module provides the shared server state and the request handler that
//! routes each decoded request to the broker or scheduler and produces the
//! response.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::{debug, info};

use timecast_core::now_in;
use timecast_protocol::{
    Codec, DEFAULT_MAX_FRAME_SIZE, Delivery, ErrorCode, FireAt, Payload, Request, Response,
    ServerInfo, encode_message,
};

use crate::broker::{ChannelBroker, DeliverySender, SessionId};
use crate::config::BindAddress;
use crate::scheduler::TimeEventScheduler;

/// State shared by every session.
#[derive(Debug)]
pub struct ServerState {
    started_at: DateTime<Tz>,
    address: BindAddress,
    max_clients: usize,
    max_frame_size: usize,
    timezone: Tz,
    codec: Arc<dyn Codec>,
    broker: Arc<ChannelBroker>,
    scheduler: Arc<TimeEventScheduler>,
    clients: AtomicUsize,
    next_session_id: AtomicU64,
}

impl ServerState {
    /// Creates the state for a server bound to `address`.
    pub fn new(
        address: BindAddress,
        max_clients: usize,
        timezone: Tz,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let broker = Arc::new(ChannelBroker::new());
        let scheduler = Arc::new(TimeEventScheduler::new(broker.clone(), timezone));
        Self {
            started_at: now_in(timezone),
            address,
            max_clients,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            timezone,
            codec,
            broker,
            scheduler,
            clients: AtomicUsize::new(0),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Sets the largest frame body sessions may write.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Returns the channel broker.
    pub fn broker(&self) -> &Arc<ChannelBroker> {
        &self.broker
    }

    /// Returns the time-event scheduler.
    pub fn scheduler(&self) -> &Arc<TimeEventScheduler> {
        &self.scheduler
    }

    /// Returns the active codec.
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Returns the configured timezone.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Returns the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        let duration = now_in(self.timezone) - self.started_at;
        duration.num_seconds().max(0) as u64
    }

    /// Number of live sessions.
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// Registers a new session and returns its id.
    pub fn session_opened(&self) -> SessionId {
        self.clients.fetch_add(1, Ordering::Relaxed);
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Unregisters a session.
    pub fn session_closed(&self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Snapshot of identity and statistics.
    pub async fn info(&self) -> ServerInfo {
        let channels = self.broker.channel_names();
        ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            address: self.address.to_string(),
            started_at: self.started_at.fixed_offset(),
            uptime_seconds: self.uptime_seconds(),
            clients: self.clients(),
            max_clients: self.max_clients,
            channel_count: channels.len(),
            channels,
            pending_events: self.scheduler.pending_count().await,
            codec: self.codec.name().to_string(),
            timezone: self.timezone.name().to_string(),
        }
    }
}

/// Shared server state wrapped in an Arc.
pub type SharedState = Arc<ServerState>;

/// Per-session data the handler needs.
#[derive(Debug)]
pub struct SessionContext {
    /// Session identifier.
    pub id: SessionId,
    /// Queue feeding the session's writer.
    pub outbound: DeliverySender,
}

impl SessionContext {
    /// Creates the context for session `id`.
    pub fn new(id: SessionId, outbound: DeliverySender) -> Self {
        Self { id, outbound }
    }
}

/// Request handler that processes incoming requests and produces responses.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    state: SharedState,
}

impl RequestHandler {
    /// Creates a new request handler with the given state.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Returns the shared state.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Handles a single request and returns the response.
    #[tracing::instrument(skip_all, fields(session_id = session.id, kind = request.kind(), duration_ms))]
    pub async fn handle(&self, session: &SessionContext, request: &Request) -> Response {
        use tracing::Span;

        let start = std::time::Instant::now();

        let response = match request {
            Request::Info => Response::info(self.state.info().await),
            Request::Ping => Response::Ping,
            Request::AddTimeEvent {
                fire_at,
                channel,
                payload,
            } => self.add_time_event(fire_at, channel, payload).await,
            Request::Publish { channel, payload } => self.publish(channel, payload),
            Request::Subscribe { channel } => {
                self.state
                    .broker
                    .subscribe(channel, session.id, session.outbound.clone());
                Response::Subscribe {
                    channel: channel.clone(),
                }
            }
            Request::Unsubscribe { channel } => {
                self.state.broker.unsubscribe(channel, session.id);
                Response::Unsubscribe {
                    channel: channel.clone(),
                }
            }
            Request::Listen => {
                let channels = self.state.broker.channels_of(session.id);
                info!(channels = ?channels, "Session listening");
                Response::Listen { channels }
            }
        };

        let duration = start.elapsed();
        if tracing::enabled!(tracing::Level::DEBUG) {
            Span::current().record("duration_ms", duration.as_millis());
            debug!(duration_ms = duration.as_millis(), "Request handled");
        }

        response
    }

    fn publish(&self, channel: &str, payload: &Payload) -> Response {
        let delivery = Delivery::published(channel, payload.clone());
        if let Err(response) = self.check_frame_fits(&delivery) {
            return response;
        }
        let delivered = self.state.broker.publish(channel, delivery.into());
        debug!(channel = %channel, delivered, "Published");
        Response::Publish {
            channel: channel.to_string(),
            delivered,
        }
    }

    async fn add_time_event(&self, fire_at: &FireAt, channel: &str, payload: &Payload) -> Response {
        let resolved = match fire_at.resolve(self.state.timezone) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(error = %e, "Rejected fire time");
                return Response::error(ErrorCode::InvalidRequest, e.to_string());
            }
        };

        let scheduler = &self.state.scheduler;
        let event = scheduler.prepare(resolved, channel, payload.clone());
        if let Err(response) = self.check_frame_fits(&event.clone().into_delivery()) {
            return response;
        }

        let response = Response::AddTimeEvent {
            event_id: event.id.clone(),
            fire_at: event.fire_at.fixed_offset(),
        };
        scheduler.submit(event).await;
        response
    }

    /// Refuses a delivery no subscriber could be sent.
    fn check_frame_fits(&self, delivery: &Delivery) -> Result<(), Response> {
        let size = match encode_message(self.state.codec.as_ref(), delivery) {
            Ok(body) => body.len(),
            Err(e) => return Err(Response::error(ErrorCode::Internal, e.to_string())),
        };
        if size > self.state.max_frame_size {
            debug!(size, max = self.state.max_frame_size, "Delivery over frame limit");
            return Err(Response::error(
                ErrorCode::InvalidRequest,
                format!(
                    "payload too large: delivery would be {} bytes (max: {})",
                    size, self.state.max_frame_size
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use timecast_protocol::{JsonCodec, ServerMessage};
    use tokio::sync::mpsc;

    fn state() -> SharedState {
        Arc::new(ServerState::new(
            BindAddress::default(),
            8,
            Tz::UTC,
            Arc::new(JsonCodec),
        ))
    }

    fn session(state: &SharedState) -> (SessionContext, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (SessionContext::new(state.session_opened(), tx), rx)
    }

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn server_state_uptime() {
        let state = state();
        assert!(state.uptime_seconds() < 2);
    }

    #[test]
    fn session_ids_are_unique() {
        let state = state();
        let a = state.session_opened();
        let b = state.session_opened();
        assert_ne!(a, b);
        assert_eq!(state.clients(), 2);
        state.session_closed();
        assert_eq!(state.clients(), 1);
    }

    #[tokio::test]
    async fn request_handler_ping() {
        let state = state();
        let handler = RequestHandler::new(state.clone());
        let (ctx, _rx) = session(&state);

        let response = handler.handle(&ctx, &Request::Ping).await;
        assert_eq!(response, Response::Ping);
    }

    #[tokio::test]
    async fn request_handler_info() {
        let state = state();
        let handler = RequestHandler::new(state.clone());
        let (ctx, _rx) = session(&state);
        handler.handle(&ctx, &Request::subscribe("b")).await;
        handler.handle(&ctx, &Request::subscribe("a")).await;

        let Response::Info { info } = handler.handle(&ctx, &Request::Info).await else {
            panic!("expected info response");
        };
        assert_eq!(info.clients, 1);
        assert_eq!(info.max_clients, 8);
        assert_eq!(info.channels, vec!["a", "b"]);
        assert_eq!(info.channel_count, 2);
        assert_eq!(info.pending_events, 0);
        assert_eq!(info.codec, "json");
        assert_eq!(info.timezone, "UTC");
        assert_eq!(info.address, "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers() {
        let state = state();
        let handler = RequestHandler::new(state.clone());
        let (listener, mut rx) = session(&state);
        let (publisher, _prx) = session(&state);

        let response = handler
            .handle(&listener, &Request::subscribe("c2"))
            .await;
        assert_eq!(
            response,
            Response::Subscribe {
                channel: "c2".into()
            }
        );

        let response = handler.handle(&listener, &Request::Listen).await;
        assert_eq!(
            response,
            Response::Listen {
                channels: vec!["c2".into()]
            }
        );

        let response = handler
            .handle(
                &publisher,
                &Request::publish("c2", payload(json!({"status": "ok"}))),
            )
            .await;
        assert_eq!(
            response,
            Response::Publish {
                channel: "c2".into(),
                delivered: 1
            }
        );

        match rx.try_recv().unwrap() {
            ServerMessage::Delivery(delivery) => {
                assert_eq!(delivery.channel(), "c2");
                assert_eq!(delivery.payload(), &payload(json!({"status": "ok"})));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_deliveries() {
        let state = state();
        let handler = RequestHandler::new(state.clone());
        let (ctx, mut rx) = session(&state);

        handler.handle(&ctx, &Request::subscribe("c1")).await;
        handler.handle(&ctx, &Request::unsubscribe("c1")).await;
        let response = handler
            .handle(&ctx, &Request::publish("c1", Payload::new()))
            .await;

        assert_eq!(
            response,
            Response::Publish {
                channel: "c1".into(),
                delivered: 0
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(state.broker().channel_count(), 0);
    }

    #[tokio::test]
    async fn add_time_event_returns_id_and_resolved_time() {
        let state = state();
        let handler = RequestHandler::new(state.clone());
        let (ctx, _rx) = session(&state);

        let request = Request::add_time_event(4_102_444_800.0, "later", Payload::new());
        let response = handler.handle(&ctx, &request).await;

        let Response::AddTimeEvent { event_id, fire_at } = response else {
            panic!("expected add_time_event response, got {response:?}");
        };
        assert!(!event_id.is_empty());
        assert_eq!(fire_at.timestamp(), 4_102_444_800);
        assert_eq!(state.scheduler().pending_count().await, 1);
    }

    #[tokio::test]
    async fn add_time_event_rejects_bad_fire_time() {
        let state = state();
        let handler = RequestHandler::new(state.clone());
        let (ctx, _rx) = session(&state);

        let request = Request::add_time_event("whenever", "c", Payload::new());
        let response = handler.handle(&ctx, &request).await;

        assert_eq!(
            response.as_error().unwrap().code,
            ErrorCode::InvalidRequest
        );
        assert_eq!(state.scheduler().pending_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_publish_is_refused() {
        let state = Arc::new(
            ServerState::new(BindAddress::default(), 8, Tz::UTC, Arc::new(JsonCodec))
                .with_max_frame_size(200),
        );
        let handler = RequestHandler::new(state.clone());
        let (listener, mut rx) = session(&state);
        handler.handle(&listener, &Request::subscribe("c")).await;

        let big = payload(json!({"text": "x".repeat(148)}));
        let response = handler
            .handle(&listener, &Request::publish("c", big.clone()))
            .await;
        let error = response.as_error().unwrap();
        assert_eq!(error.code, ErrorCode::InvalidRequest);
        assert!(error.message.contains("max: 200"));
        assert!(rx.try_recv().is_err());

        let response = handler
            .handle(
                &listener,
                &Request::add_time_event(4_102_444_800.0, "c", big),
            )
            .await;
        assert_eq!(
            response.as_error().unwrap().code,
            ErrorCode::InvalidRequest
        );
        assert_eq!(state.scheduler().pending_count().await, 0);

        let small = payload(json!({"ok": true}));
        let response = handler
            .handle(&listener, &Request::publish("c", small))
            .await;
        assert_eq!(
            response,
            Response::Publish {
                channel: "c".into(),
                delivered: 1
            }
        );
    }
}

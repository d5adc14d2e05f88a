//! Per-connection session.
//!
//! A session owns one connection. Its read loop decodes requests and hands
//! them to the [`RequestHandler`]; everything going back to the client
//! (responses and channel deliveries alike) goes through one bounded
//! outbound queue drained by a dedicated writer task, so frames never
//! interleave. Responses wait for room in the queue; deliveries that find it
//! full are dropped by the broker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use timecast_protocol::{
    Codec, ErrorCode, ProtocolError, Response, ServerMessage, decode_request, encode_message,
};

use crate::broker::{DeliveryReceiver, SessionId};
use crate::handler::{RequestHandler, SessionContext, SharedState};
use crate::socket::{BoxedReader, BoxedWriter, Connection};
use crate::transport::{FrameReader, FrameWriter};

/// Transport limits applied to every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Bytes requested per socket read.
    pub read_size: usize,
    /// Largest accepted or produced frame body.
    pub max_frame_size: usize,
    /// Messages queued for the writer before deliveries are dropped.
    pub outbound_capacity: usize,
}

/// A client session.
pub struct Session {
    connection: Connection,
    handler: RequestHandler,
    limits: SessionLimits,
}

impl Session {
    /// Creates a session for an accepted connection.
    pub fn new(connection: Connection, state: SharedState, limits: SessionLimits) -> Self {
        Self {
            connection,
            handler: RequestHandler::new(state),
            limits,
        }
    }

    /// Serves the connection until the peer leaves or the stream breaks.
    ///
    /// On exit the session has left every channel and released its slot.
    pub async fn run(self) {
        let state = self.handler.state().clone();
        let id = state.session_opened();
        let peer = self.connection.peer().to_string();
        let span = info_span!("session", session_id = id, peer = %peer);

        async move {
            info!("Session opened");
            let (reader, writer, slot) = self.connection.into_parts();
            let (outbound, queue) = mpsc::channel(self.limits.outbound_capacity);
            let codec = state.codec().clone();

            let writer_task = tokio::spawn(
                write_loop(
                    FrameWriter::new(writer, self.limits.max_frame_size),
                    queue,
                    codec.clone(),
                    id,
                )
                .in_current_span(),
            );

            let mut reader =
                FrameReader::new(reader, self.limits.read_size, self.limits.max_frame_size);
            let ctx = SessionContext::new(id, outbound);
            read_loop(&mut reader, &self.handler, &ctx, codec.as_ref()).await;

            let left = state.broker().unsubscribe_all(id);
            // Last sender gone: the writer drains what is queued and stops.
            drop(ctx);
            if let Err(e) = writer_task.await {
                warn!(error = %e, "Writer task failed");
            }

            drop(slot);
            state.session_closed();
            info!(channels_left = left, "Session closed");
        }
        .instrument(span)
        .await
    }
}

async fn read_loop(
    reader: &mut FrameReader<BoxedReader>,
    handler: &RequestHandler,
    ctx: &SessionContext,
    codec: &dyn Codec,
) {
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Client disconnected");
                return;
            }
            Err(ProtocolError::Io(e)) => {
                warn!(error = %e, "Connection read failed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Framing error, closing session");
                let _ = ctx
                    .outbound
                    .try_send(Response::error(ErrorCode::MalformedFrame, e.to_string()).into());
                return;
            }
        };

        let response = match codec.decode(&frame) {
            Ok(value) => match decode_request(&value) {
                Ok(request) => handler.handle(ctx, &request).await,
                Err(e) => {
                    debug!(error = %e, "Rejected request");
                    Response::from(e)
                }
            },
            Err(e) => {
                warn!(error = %e, bytes = frame.len(), "Undecodable frame");
                Response::error(ErrorCode::MalformedFrame, e.to_string())
            }
        };

        if ctx.outbound.send(response.into()).await.is_err() {
            debug!("Writer gone, closing session");
            return;
        }
    }
}

async fn write_loop(
    mut writer: FrameWriter<BoxedWriter>,
    mut queue: DeliveryReceiver,
    codec: Arc<dyn Codec>,
    session: SessionId,
) {
    while let Some(message) = queue.recv().await {
        let body = match encode_message(codec.as_ref(), &message) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    session_id = session,
                    error = %e,
                    "Failed to encode outbound message, skipping"
                );
                continue;
            }
        };

        match writer.write_frame(&body).await {
            Ok(()) => {}
            Err(ProtocolError::Io(e)) => {
                debug!(session_id = session, error = %e, "Connection write failed");
                return;
            }
            Err(e) => {
                warn!(
                    session_id = session,
                    error = %e,
                    kind = message_kind(&message),
                    "Dropping outbound message"
                );
                if let ServerMessage::Response(_) = message {
                    let fallback = Response::error(ErrorCode::Internal, e.to_string());
                    if let Ok(body) = encode_message(codec.as_ref(), &fallback)
                        && writer.write_frame(&body).await.is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    let _ = writer.shutdown().await;
}

fn message_kind(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::Response(_) => "response",
        ServerMessage::Delivery(_) => "delivery",
    }
}

/// Creates a connection handler function for use with SocketServer::run.
///
/// This returns a closure that can be passed to `SocketServer::run` or
/// `SocketServer::run_until_shutdown`.
pub fn make_connection_handler(
    state: SharedState,
    limits: SessionLimits,
) -> impl Fn(Connection) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
    move |conn| {
        let session = Session::new(conn, state.clone(), limits);
        Box::pin(session.run())
    }
}

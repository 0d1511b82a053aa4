//! Per-connection handler: handshake, auth, and request routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version
//!   2. Authenticate token → get a Principal
//!   3. Send HandshakeAck
//!   4. Loop: answer requests, and push events for subscribed sessions

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use rollcall_protocol::{
    Codec, Envelope, ErrorKind, Message, ProtocolError, SessionEvent, SessionId,
};
use rollcall_session::{RosterProvider, ScanError, SessionError};
use rollcall_transport::{Connection, WebSocketConnection};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use crate::RollcallError;
use crate::auth::{Authenticator, Principal};
use crate::server::{PROTOCOL_VERSION, ServerState};

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, R, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, R, C>>,
) -> Result<(), RollcallError>
where
    A: Authenticator,
    R: RosterProvider,
    C: Codec,
{
    let conn_id = conn.id();
    debug!(%conn_id, peer = ?conn.peer_addr(), "handling new connection");

    let mut outbox = Outbox {
        conn: &conn,
        codec: &state.codec,
        seq: 0,
        start: Instant::now(),
    };

    // --- Step 1: Handshake ---
    let principal = perform_handshake(&conn, &state, &mut outbox).await?;
    info!(%conn_id, actor = %principal.actor, role = %principal.role, "client authenticated");

    // --- Step 2: Request loop ---
    let mut subscriptions: HashSet<SessionId> = HashSet::new();
    let mut events: Option<broadcast::Receiver<SessionEvent>> = None;

    loop {
        tokio::select! {
            incoming = tokio::time::timeout(state.config.idle_timeout, conn.recv()) => {
                let data = match incoming {
                    Ok(Ok(Some(data))) => data,
                    Ok(Ok(None)) => {
                        debug!(%conn_id, "connection closed cleanly");
                        break;
                    }
                    Ok(Err(e)) => {
                        debug!(%conn_id, error = %e, "recv error");
                        break;
                    }
                    Err(_) => {
                        info!(%conn_id, "connection idle, closing");
                        break;
                    }
                };

                let envelope: Envelope = match state.codec.decode(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(%conn_id, error = %e, "failed to decode envelope");
                        outbox
                            .send_error(RequestError::bad_request(format!("malformed envelope: {e}")))
                            .await?;
                        continue;
                    }
                };

                match dispatch(&state, &principal, envelope.payload).await {
                    Ok(Reply::Send(msg)) => outbox.send(msg).await?,
                    Ok(Reply::Subscribe(session_id)) => {
                        subscriptions.insert(session_id);
                        events.get_or_insert_with(|| state.registry.subscribe());
                        outbox.send(Message::Subscribed { session_id }).await?;
                    }
                    Ok(Reply::Unsubscribe(session_id)) => {
                        subscriptions.remove(&session_id);
                        if subscriptions.is_empty() {
                            events = None;
                        }
                    }
                    Ok(Reply::Close(reason)) => {
                        info!(%conn_id, %reason, "client disconnected");
                        break;
                    }
                    Err(err) => {
                        debug!(%conn_id, kind = ?err.kind, message = %err.message, "request refused");
                        outbox.send_error(err).await?;
                    }
                }
            }

            event = next_event(&mut events), if events.is_some() => match event {
                Ok(event) if subscriptions.contains(&event.session_id()) => {
                    outbox.send(Message::Event { event }).await?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%conn_id, skipped, "subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => events = None,
            },
        }
    }

    if let Err(e) = conn.close().await {
        debug!(%conn_id, error = %e, "close failed");
    }
    Ok(())
}

/// Receives the next broadcast event, or waits forever with no subscription.
async fn next_event(
    events: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Performs the initial handshake: receive Handshake, validate, auth, send Ack.
async fn perform_handshake<A, R, C>(
    conn: &WebSocketConnection,
    state: &ServerState<A, R, C>,
    outbox: &mut Outbox<'_, C>,
) -> Result<Principal, RollcallError>
where
    A: Authenticator,
    R: RosterProvider,
    C: Codec,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(invalid("connection closed before handshake"));
        }
        Ok(Err(e)) => return Err(RollcallError::Transport(e)),
        Err(_) => return Err(invalid("handshake timed out")),
    };

    let envelope: Envelope = state.codec.decode(&data)?;

    let (version, token) = match envelope.payload {
        Message::Handshake { version, token } => (version, token),
        _ => {
            outbox
                .send_error(RequestError::bad_request("expected Handshake"))
                .await?;
            return Err(invalid("first message must be Handshake"));
        }
    };

    if version != PROTOCOL_VERSION {
        outbox
            .send_error(RequestError::bad_request(format!(
                "version mismatch: expected {PROTOCOL_VERSION}, got {version}"
            )))
            .await?;
        return Err(invalid("protocol version mismatch"));
    }

    let principal = match state.auth.authenticate(token.as_deref().unwrap_or("")).await {
        Ok(principal) => principal,
        Err(e) => {
            outbox
                .send_error(RequestError::new(ErrorKind::Unauthorized, "unauthorized"))
                .await?;
            return Err(RollcallError::Auth(e));
        }
    };

    outbox
        .send(Message::HandshakeAck {
            actor: principal.actor.clone(),
            server_time: wall_millis(state),
        })
        .await?;

    Ok(principal)
}

fn invalid(reason: &str) -> RollcallError {
    RollcallError::Protocol(ProtocolError::InvalidMessage(reason.into()))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What the connection loop should do after a request.
enum Reply {
    Send(Message),
    Subscribe(SessionId),
    Unsubscribe(SessionId),
    Close(String),
}

/// Routes one request to the registry, enforcing the caller's role.
async fn dispatch<A, R, C>(
    state: &ServerState<A, R, C>,
    principal: &Principal,
    msg: Message,
) -> Result<Reply, RequestError>
where
    A: Authenticator,
    R: RosterProvider,
    C: Codec,
{
    let actor = principal.actor.as_str();
    let reply = match msg {
        Message::Heartbeat { client_time } => Message::HeartbeatAck {
            client_time,
            server_time: wall_millis(state),
        },

        Message::Disconnect { reason } => return Ok(Reply::Close(reason)),

        Message::OpenSession {
            class_ref,
            window_start,
            window_end,
            rotation_secs,
            grace_secs,
        } => {
            require_admin(principal, "open sessions")?;
            let schedule =
                state
                    .config
                    .session_schedule(window_start, window_end, rotation_secs, grace_secs);

            let session_id = state
                .registry
                .open(&state.rosters, &class_ref, &schedule, actor, state.clock.now())
                .await?;
            let roster_size = state
                .registry
                .get(session_id)
                .map_or(0, |session| session.roster_target_count());
            info!(%session_id, %class_ref, roster_size, %actor, "session opened");

            Message::SessionOpened {
                session_id,
                roster_size,
            }
        }

        Message::CloseSession { session_id } => {
            require_admin(principal, "close sessions")?;
            let counts = state.registry.close(session_id, actor, state.clock.now())?;
            Message::SessionClosed { session_id, counts }
        }

        Message::ExtendWindow {
            session_id,
            window_end,
        } => {
            require_admin(principal, "extend windows")?;
            state
                .registry
                .extend_window(session_id, window_end, actor, state.clock.now())?;
            Message::WindowExtended {
                session_id,
                window_end,
            }
        }

        Message::OverrideStatus {
            session_id,
            participant_id,
            status,
        } => {
            require_admin(principal, "override statuses")?;
            let change = state.registry.override_status(
                session_id,
                participant_id,
                status,
                actor,
                state.clock.now(),
            )?;
            Message::StatusOverridden {
                session_id,
                participant_id,
                status: change.to,
                counts: change.counts,
            }
        }

        Message::SubmitScan {
            session_id,
            token,
            participant_id,
        } => {
            if !principal.role.can_scan_for(participant_id) {
                return Err(RequestError::forbidden(
                    principal,
                    &format!("scan for {participant_id}"),
                ));
            }
            let receipt = state
                .processor
                .submit_scan(session_id, &token, participant_id)?;
            Message::ScanAccepted {
                session_id,
                participant_id,
                status: receipt.status,
                epoch: receipt.epoch,
                counts: receipt.counts,
            }
        }

        Message::GetCounts { session_id } => Message::Counts {
            session_id,
            counts: state.registry.aggregate_counts(session_id)?,
        },

        Message::GetToken { session_id } => {
            if !principal.role.can_view_token() {
                return Err(RequestError::forbidden(principal, "view scan tokens"));
            }
            let token = state.registry.current_token_display(session_id)?;
            Message::Token {
                session_id,
                value: token.value,
                epoch: token.epoch,
                expires_at: token.expires_at,
            }
        }

        Message::ListActive => {
            let mut sessions: Vec<SessionId> = state.registry.list_active().collect();
            sessions.sort_unstable();
            Message::ActiveSessions { sessions }
        }

        Message::Subscribe { session_id } => {
            if state.registry.get(session_id).is_none() {
                return Err(SessionError::NotFound(session_id).into());
            }
            return Ok(Reply::Subscribe(session_id));
        }

        Message::Unsubscribe { session_id } => return Ok(Reply::Unsubscribe(session_id)),

        Message::Handshake { .. } => {
            return Err(RequestError::bad_request("already handshaken"));
        }

        other => {
            return Err(RequestError::bad_request(format!(
                "{} is not a client request",
                message_name(&other)
            )));
        }
    };

    Ok(Reply::Send(reply))
}

fn require_admin(principal: &Principal, action: &str) -> Result<(), RequestError> {
    if principal.role.is_admin() {
        Ok(())
    } else {
        Err(RequestError::forbidden(principal, action))
    }
}

fn message_name(msg: &Message) -> &'static str {
    match msg {
        Message::HandshakeAck { .. } => "HandshakeAck",
        Message::HeartbeatAck { .. } => "HeartbeatAck",
        Message::SessionOpened { .. } => "SessionOpened",
        Message::SessionClosed { .. } => "SessionClosed",
        Message::WindowExtended { .. } => "WindowExtended",
        Message::StatusOverridden { .. } => "StatusOverridden",
        Message::ScanAccepted { .. } => "ScanAccepted",
        Message::Counts { .. } => "Counts",
        Message::Token { .. } => "Token",
        Message::ActiveSessions { .. } => "ActiveSessions",
        Message::Subscribed { .. } => "Subscribed",
        Message::Event { .. } => "Event",
        Message::Error { .. } => "Error",
        _ => "message",
    }
}

/// Milliseconds since the Unix epoch on the server's clock.
fn wall_millis<A, R, C>(state: &ServerState<A, R, C>) -> u64
where
    A: Authenticator,
    R: RosterProvider,
    C: Codec,
{
    u64::try_from(state.clock.now().timestamp_millis()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Errors on the wire
// ---------------------------------------------------------------------------

/// A refused request, ready to be sent back as [`Message::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestError {
    pub(crate) kind: ErrorKind,
    pub(crate) message: String,
}

impl RequestError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    fn forbidden(principal: &Principal, action: &str) -> Self {
        Self::new(
            ErrorKind::Forbidden,
            format!("{} ({}) may not {action}", principal.actor, principal.role),
        )
    }

    pub(crate) fn into_message(self) -> Message {
        Message::Error {
            code: status_code(self.kind),
            kind: self.kind,
            retry: self.kind.is_retryable(),
            message: self.message,
        }
    }
}

impl From<SessionError> for RequestError {
    fn from(err: SessionError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<ScanError> for RequestError {
    fn from(err: ScanError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// HTTP-style status code for each error kind.
pub(crate) fn status_code(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::BadRequest | ErrorKind::TokenMismatch => 400,
        ErrorKind::Unauthorized => 401,
        ErrorKind::Forbidden => 403,
        ErrorKind::SessionNotFound | ErrorKind::UnknownParticipant => 404,
        ErrorKind::InvalidTransition
        | ErrorKind::SessionNotActive
        | ErrorKind::AlreadyRecorded
        | ErrorKind::NoActiveToken
        | ErrorKind::NotEvictable => 409,
        ErrorKind::TokenExpired => 410,
        ErrorKind::InvalidPlan => 422,
        ErrorKind::InvariantViolation => 500,
        ErrorKind::RosterUnavailable => 503,
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Wraps outgoing messages in envelopes and numbers them.
struct Outbox<'a, C: Codec> {
    conn: &'a WebSocketConnection,
    codec: &'a C,
    seq: u64,
    start: Instant,
}

impl<C: Codec> Outbox<'_, C> {
    async fn send(&mut self, payload: Message) -> Result<(), RollcallError> {
        let envelope = Envelope {
            seq: next_seq(&mut self.seq),
            timestamp: self.start.elapsed().as_millis() as u64,
            payload,
        };
        let bytes = self.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_error(&mut self, err: RequestError) -> Result<(), RollcallError> {
        self.send(err.into_message()).await
    }
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}

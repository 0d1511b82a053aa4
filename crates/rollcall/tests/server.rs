//! Integration tests for the Rollcall server: handshake, roles, and the
//! full open → scan → close flow over a real WebSocket.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rollcall::prelude::*;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// =========================================================================
// Server fixture
// =========================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 11, 3, 13, 0, 0).unwrap()
}

const SWEEP: Duration = Duration::from_millis(20);

/// Starts a server on a random port whose clock the test controls.
async fn start_server() -> (String, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));

    let auth = StaticAuthenticator::new()
        .with_principal("admin-token", Principal::new("registrar", Role::Admin))
        .with_principal("wall-token", Principal::new("room-204", Role::Viewer))
        .with_principal("ada-token", Principal::new("ada", Role::Participant(ParticipantId(1))))
        .with_principal("bob-token", Principal::new("bob", Role::Participant(ParticipantId(2))));
    let roster: Roster = (1..=3).map(ParticipantId).collect();
    let rosters = StaticRoster::new().with_class("cs101", roster);

    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        sweep: SweepConfig {
            initial_jitter: Duration::ZERO,
            ..SweepConfig::every(SWEEP)
        },
        handshake_timeout: Duration::from_millis(500),
        ..ServerConfig::default()
    };

    let server = RollcallServerBuilder::new()
        .config(config)
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .build(auth, rosters)
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, clock)
}

// =========================================================================
// Client helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Client {
    ws: ClientWs,
    seq: u64,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("should connect");
        Self { ws, seq: 0 }
    }

    /// Connects and completes the handshake with `token`.
    async fn login(addr: &str, token: &str) -> Self {
        let mut client = Self::connect(addr).await;
        let ack = client
            .request(Message::Handshake {
                version: PROTOCOL_VERSION,
                token: Some(token.into()),
            })
            .await;
        assert!(
            matches!(ack, Message::HandshakeAck { .. }),
            "expected HandshakeAck, got {ack:?}"
        );
        client
    }

    async fn send(&mut self, payload: Message) {
        let envelope = Envelope {
            seq: self.seq,
            timestamp: 0,
            payload,
        };
        self.seq += 1;
        let json = serde_json::to_string(&envelope).expect("encode");
        self.ws.send(WsMessage::Text(json.into())).await.expect("send");
    }

    async fn recv(&mut self) -> Message {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if frame.is_text() || frame.is_binary() {
                let envelope: Envelope =
                    serde_json::from_slice(&frame.into_data()).expect("decode");
                return envelope.payload;
            }
        }
    }

    /// Receives until a message satisfies `pred`, skipping pushed events
    /// and anything else in between.
    async fn recv_until(&mut self, pred: impl Fn(&Message) -> bool) -> Message {
        loop {
            let msg = self.recv().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    async fn request(&mut self, payload: Message) -> Message {
        self.send(payload).await;
        self.recv_until(|m| !matches!(m, Message::Event { .. })).await
    }

    async fn open_cs101(&mut self, start: DateTime<Utc>) -> SessionId {
        match self
            .request(Message::OpenSession {
                class_ref: "cs101".into(),
                window_start: start,
                window_end: start + TimeDelta::hours(1),
                rotation_secs: Some(30),
                grace_secs: None,
            })
            .await
        {
            Message::SessionOpened {
                session_id,
                roster_size,
            } => {
                assert_eq!(roster_size, 3);
                session_id
            }
            other => panic!("expected SessionOpened, got {other:?}"),
        }
    }

    /// Polls until the session shows a token with at least `epoch`.
    async fn wait_for_token(&mut self, session_id: SessionId, epoch: u64) -> String {
        for _ in 0..200 {
            if let Message::Token {
                value, epoch: got, ..
            } = self.request(Message::GetToken { session_id }).await
            {
                if got >= epoch {
                    return value;
                }
            }
            tokio::time::sleep(SWEEP).await;
        }
        panic!("session {session_id} never reached epoch {epoch}");
    }

    async fn scan(&mut self, session_id: SessionId, token: &str, participant: u64) -> Message {
        self.request(Message::SubmitScan {
            session_id,
            token: token.into(),
            participant_id: ParticipantId(participant),
        })
        .await
    }
}

#[track_caller]
fn assert_error(msg: &Message, expected_kind: ErrorKind, expected_code: u16) {
    match msg {
        Message::Error { code, kind, .. } => {
            assert_eq!(*kind, expected_kind, "unexpected error: {msg:?}");
            assert_eq!(*code, expected_code);
        }
        other => panic!("expected Error {expected_kind:?}, got {other:?}"),
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_ack_names_the_actor() {
    let (addr, _clock) = start_server().await;
    let mut client = Client::connect(&addr).await;

    let ack = client
        .request(Message::Handshake {
            version: PROTOCOL_VERSION,
            token: Some("wall-token".into()),
        })
        .await;

    match ack {
        Message::HandshakeAck { actor, server_time } => {
            assert_eq!(actor, "room-204");
            assert_eq!(server_time, t0().timestamp_millis() as u64);
        }
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let (addr, _clock) = start_server().await;
    let mut client = Client::connect(&addr).await;

    let reply = client
        .request(Message::Handshake {
            version: 999,
            token: Some("admin-token".into()),
        })
        .await;

    assert_error(&reply, ErrorKind::BadRequest, 400);
}

#[tokio::test]
async fn test_handshake_unknown_token_is_unauthorized() {
    let (addr, _clock) = start_server().await;
    let mut client = Client::connect(&addr).await;

    let reply = client
        .request(Message::Handshake {
            version: PROTOCOL_VERSION,
            token: Some("guess".into()),
        })
        .await;

    assert_error(&reply, ErrorKind::Unauthorized, 401);
}

#[tokio::test]
async fn test_first_message_must_be_handshake() {
    let (addr, _clock) = start_server().await;
    let mut client = Client::connect(&addr).await;

    let reply = client.request(Message::ListActive).await;

    assert_error(&reply, ErrorKind::BadRequest, 400);
}

#[tokio::test]
async fn test_heartbeat_echoes_client_time() {
    let (addr, clock) = start_server().await;
    let mut client = Client::login(&addr, "ada-token").await;
    clock.advance(Duration::from_secs(5));

    let reply = client.request(Message::Heartbeat { client_time: 12345 }).await;

    assert_eq!(
        reply,
        Message::HeartbeatAck {
            client_time: 12345,
            server_time: (t0() + TimeDelta::seconds(5)).timestamp_millis() as u64,
        }
    );
}

#[tokio::test]
async fn test_malformed_envelope_is_refused_and_connection_survives() {
    let (addr, _clock) = start_server().await;
    let mut client = Client::login(&addr, "wall-token").await;

    client
        .ws
        .send(WsMessage::Text(r#"{"seq":1,"payload":{"type":"Nope"}}"#.into()))
        .await
        .unwrap();
    assert_error(&client.recv().await, ErrorKind::BadRequest, 400);

    let reply = client.request(Message::ListActive).await;
    assert_eq!(reply, Message::ActiveSessions { sessions: vec![] });
}

// =========================================================================
// Roles
// =========================================================================

#[tokio::test]
async fn test_viewer_cannot_open_sessions() {
    let (addr, _clock) = start_server().await;
    let mut wall = Client::login(&addr, "wall-token").await;

    let reply = wall
        .request(Message::OpenSession {
            class_ref: "cs101".into(),
            window_start: t0(),
            window_end: t0() + TimeDelta::hours(1),
            rotation_secs: None,
            grace_secs: None,
        })
        .await;

    assert_error(&reply, ErrorKind::Forbidden, 403);
}

#[tokio::test]
async fn test_participant_cannot_read_token_or_scan_for_others() {
    let (addr, _clock) = start_server().await;
    let mut admin = Client::login(&addr, "admin-token").await;
    let session_id = admin.open_cs101(t0()).await;
    let token = admin.wait_for_token(session_id, 1).await;

    let mut ada = Client::login(&addr, "ada-token").await;
    let reply = ada.request(Message::GetToken { session_id }).await;
    assert_error(&reply, ErrorKind::Forbidden, 403);

    let reply = ada.scan(session_id, &token, 2).await;
    assert_error(&reply, ErrorKind::Forbidden, 403);

    // Counts are readable by everyone.
    let reply = ada.request(Message::GetCounts { session_id }).await;
    assert!(matches!(reply, Message::Counts { counts, .. } if counts.absent == 3));
}

#[tokio::test]
async fn test_open_unknown_class_is_roster_unavailable() {
    let (addr, _clock) = start_server().await;
    let mut admin = Client::login(&addr, "admin-token").await;

    let reply = admin
        .request(Message::OpenSession {
            class_ref: "history-9".into(),
            window_start: t0(),
            window_end: t0() + TimeDelta::hours(1),
            rotation_secs: None,
            grace_secs: None,
        })
        .await;

    assert_error(&reply, ErrorKind::RosterUnavailable, 503);
}

#[tokio::test]
async fn test_open_with_inverted_window_is_invalid_plan() {
    let (addr, _clock) = start_server().await;
    let mut admin = Client::login(&addr, "admin-token").await;

    let reply = admin
        .request(Message::OpenSession {
            class_ref: "cs101".into(),
            window_start: t0(),
            window_end: t0() - TimeDelta::minutes(1),
            rotation_secs: None,
            grace_secs: None,
        })
        .await;

    assert_error(&reply, ErrorKind::InvalidPlan, 422);
}

// =========================================================================
// Attendance flow
// =========================================================================

#[tokio::test]
async fn test_full_attendance_flow_over_websocket() {
    let (addr, clock) = start_server().await;
    let start = t0() + TimeDelta::minutes(1);

    let mut admin = Client::login(&addr, "admin-token").await;
    let session_id = admin.open_cs101(start).await;

    // The wall display subscribes before the window opens.
    let mut wall = Client::login(&addr, "wall-token").await;
    assert_eq!(
        wall.request(Message::Subscribe { session_id }).await,
        Message::Subscribed { session_id }
    );

    clock.set(start);
    let activated = wall
        .recv_until(|m| matches!(m, Message::Event { event: SessionEvent::Activated { .. } }))
        .await;
    assert!(matches!(
        activated,
        Message::Event { event: SessionEvent::Activated { epoch: 1, .. } }
    ));

    let token = wall.wait_for_token(session_id, 1).await;

    // Ada scans: Present, and the wall sees it live.
    let mut ada = Client::login(&addr, "ada-token").await;
    match ada.scan(session_id, &token, 1).await {
        Message::ScanAccepted {
            status,
            epoch,
            counts,
            ..
        } => {
            assert_eq!(status, AttendanceStatus::Present);
            assert_eq!(epoch, 1);
            assert_eq!(counts.present, 1);
            assert_eq!(counts.absent, 2);
        }
        other => panic!("expected ScanAccepted, got {other:?}"),
    }
    let scanned = wall
        .recv_until(|m| {
            matches!(m, Message::Event { event: SessionEvent::ParticipantScanned { .. } })
        })
        .await;
    assert!(matches!(
        scanned,
        Message::Event { event: SessionEvent::ParticipantScanned { participant_id: ParticipantId(1), .. } }
    ));

    // A second scan is refused and changes nothing.
    assert_error(
        &ada.scan(session_id, &token, 1).await,
        ErrorKind::AlreadyRecorded,
        409,
    );

    // Bob types a token that was never issued.
    let mut bob = Client::login(&addr, "bob-token").await;
    let reply = bob.scan(session_id, "deadbeef", 2).await;
    assert_error(&reply, ErrorKind::TokenMismatch, 400);
    assert!(matches!(reply, Message::Error { retry: false, .. }));

    // The registrar closes the session.
    match admin.request(Message::CloseSession { session_id }).await {
        Message::SessionClosed { counts, .. } => {
            assert_eq!(counts.present, 1);
            assert_eq!(counts.absent, 2);
            assert_eq!(counts.total, 3);
        }
        other => panic!("expected SessionClosed, got {other:?}"),
    }
    wall.recv_until(|m| matches!(m, Message::Event { event: SessionEvent::Ended { .. } }))
        .await;

    assert_error(
        &bob.scan(session_id, &token, 2).await,
        ErrorKind::SessionNotActive,
        409,
    );
}

#[tokio::test]
async fn test_rotated_out_token_is_expired_and_retryable() {
    let (addr, clock) = start_server().await;
    let mut admin = Client::login(&addr, "admin-token").await;
    let session_id = admin.open_cs101(t0()).await;
    let first = admin.wait_for_token(session_id, 1).await;

    clock.set(t0() + TimeDelta::seconds(31));
    let second = admin.wait_for_token(session_id, 2).await;
    assert_ne!(first, second);

    let mut ada = Client::login(&addr, "ada-token").await;
    let reply = ada.scan(session_id, &first, 1).await;
    assert_error(&reply, ErrorKind::TokenExpired, 410);
    assert!(matches!(reply, Message::Error { retry: true, .. }));

    let reply = ada.scan(session_id, &second, 1).await;
    assert!(matches!(
        reply,
        Message::ScanAccepted { epoch: 2, status: AttendanceStatus::Present, .. }
    ));
}

#[tokio::test]
async fn test_admin_override_and_extend_window() {
    let (addr, _clock) = start_server().await;
    let mut admin = Client::login(&addr, "admin-token").await;
    let session_id = admin.open_cs101(t0()).await;
    admin.wait_for_token(session_id, 1).await;

    match admin
        .request(Message::OverrideStatus {
            session_id,
            participant_id: ParticipantId(3),
            status: AttendanceStatus::Sick,
        })
        .await
    {
        Message::StatusOverridden { status, counts, .. } => {
            assert_eq!(status, AttendanceStatus::Sick);
            assert_eq!(counts.sick, 1);
            assert_eq!(counts.absent, 2);
        }
        other => panic!("expected StatusOverridden, got {other:?}"),
    }

    let new_end = t0() + TimeDelta::hours(2);
    assert_eq!(
        admin
            .request(Message::ExtendWindow {
                session_id,
                window_end: new_end,
            })
            .await,
        Message::WindowExtended {
            session_id,
            window_end: new_end,
        }
    );

    let reply = admin
        .request(Message::OverrideStatus {
            session_id,
            participant_id: ParticipantId(99),
            status: AttendanceStatus::Excused,
        })
        .await;
    assert_error(&reply, ErrorKind::UnknownParticipant, 404);
}

#[tokio::test]
async fn test_list_active_and_subscribe_unknown_session() {
    let (addr, _clock) = start_server().await;
    let mut admin = Client::login(&addr, "admin-token").await;
    let scheduled = admin.open_cs101(t0() + TimeDelta::hours(5)).await;
    let active = admin.open_cs101(t0()).await;
    admin.wait_for_token(active, 1).await;

    let reply = admin.request(Message::ListActive).await;
    assert_eq!(
        reply,
        Message::ActiveSessions {
            sessions: vec![active]
        }
    );
    assert_ne!(scheduled, active);

    let reply = admin
        .request(Message::Subscribe {
            session_id: SessionId(404),
        })
        .await;
    assert_error(&reply, ErrorKind::SessionNotFound, 404);
}

#[tokio::test]
async fn test_disconnect_closes_the_connection() {
    let (addr, _clock) = start_server().await;
    let mut client = Client::login(&addr, "wall-token").await;

    client
        .send(Message::Disconnect {
            reason: "bye".into(),
        })
        .await;

    let next = tokio::time::timeout(Duration::from_secs(2), client.ws.next())
        .await
        .expect("server should close promptly");
    assert!(matches!(next, None | Some(Ok(WsMessage::Close(_))) | Some(Err(_))));
}

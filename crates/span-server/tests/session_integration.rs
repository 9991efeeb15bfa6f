//! Integration tests for session management: admission, clipboard
//! propagation, liveness, and screensaver forwarding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use span_core::domain::clipboard::ClipboardId;
use span_core::domain::topology::{Direction, ScreenShape, TopologyMap};
use span_core::protocol::codec::{readf, Value};
use span_core::protocol::msgs::{self, tag_of};
use span_core::protocol::parse::ClientMessage;
use span_core::protocol::version::ProtocolVersion;
use span_server::proxy::{DisconnectCause, EndpointCall, EndpointLog, PrimaryProxy, RecordingEndpoint};
use span_server::screen::{RecordingScreen, ScreenCall, ScreenLog};
use span_server::server::{AdoptError, AdoptRequest, Server, ServerEvent, ServerOptions};
use span_server::status::{RecordingReporter, StatusEvent};

const DESK: ScreenShape = ScreenShape {
    x: 0,
    y: 0,
    width: 1000,
    height: 1000,
};
const LAPTOP: ScreenShape = ScreenShape {
    x: 0,
    y: 0,
    width: 500,
    height: 500,
};

struct Rig {
    server: Server,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    desk_log: ScreenLog,
    reporter: Arc<RecordingReporter>,
}

fn desk_laptop_topology() -> TopologyMap {
    let mut map = TopologyMap::new();
    map.add_screen("desk").unwrap();
    map.add_screen("laptop").unwrap();
    map.link("desk", Direction::Right, "laptop").unwrap();
    map.link("laptop", Direction::Left, "desk").unwrap();
    map
}

fn make_rig(options: ServerOptions) -> Rig {
    let screen = RecordingScreen::new(DESK, 1);
    let desk_log = screen.log();
    let primary = PrimaryProxy::new("desk".to_string(), Box::new(screen));
    let reporter = Arc::new(RecordingReporter::new());
    let (tx, events) = mpsc::unbounded_channel();
    let server = Server::new(
        desk_laptop_topology(),
        Box::new(primary),
        options,
        reporter.clone(),
        tx,
    );
    Rig {
        server,
        events,
        desk_log,
        reporter,
    }
}

async fn attach_laptop(rig: &mut Rig) -> EndpointLog {
    let endpoint = RecordingEndpoint::new("laptop", LAPTOP);
    let log = endpoint.log();
    rig.server
        .attach_endpoint(Box::new(endpoint))
        .await
        .expect("laptop must be admitted");
    log
}

async fn switch_to_laptop(rig: &mut Rig) {
    rig.server
        .handle_event(ServerEvent::MouseMove { x: 999, y: 500 })
        .await;
    assert_eq!(rig.server.active_screen(), "laptop");
}

fn from_laptop(message: ClientMessage) -> ServerEvent {
    ServerEvent::FromClient {
        name: "laptop".to_string(),
        connection_id: 1,
        message,
    }
}

// ── Admission ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_screen_name_is_refused() {
    let mut rig = make_rig(ServerOptions::default());
    let err = rig
        .server
        .attach_endpoint(Box::new(RecordingEndpoint::new("ghost", LAPTOP)))
        .await
        .unwrap_err();
    assert_eq!(err, AdoptError::Unknown);
}

#[tokio::test]
async fn test_duplicate_screen_name_is_refused() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;
    let err = rig
        .server
        .attach_endpoint(Box::new(RecordingEndpoint::new("laptop", LAPTOP)))
        .await
        .unwrap_err();
    assert_eq!(err, AdoptError::Busy);
}

#[tokio::test]
async fn test_adopt_answers_busy_on_the_wire() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;

    let (sink, mut frames) = mpsc::unbounded_channel();
    rig.server
        .handle_event(ServerEvent::Adopt(AdoptRequest {
            name: "laptop".to_string(),
            connection_id: 99,
            version: ProtocolVersion::CURRENT,
            sink,
        }))
        .await;

    let frame = frames.try_recv().expect("a refusal must be sent");
    assert_eq!(tag_of(&frame), Some(*b"EBSY"));
}

#[tokio::test]
async fn test_adopt_answers_unknown_on_the_wire() {
    let mut rig = make_rig(ServerOptions::default());

    let (sink, mut frames) = mpsc::unbounded_channel();
    rig.server
        .handle_event(ServerEvent::Adopt(AdoptRequest {
            name: "ghost".to_string(),
            connection_id: 7,
            version: ProtocolVersion::CURRENT,
            sink,
        }))
        .await;

    let frame = frames.try_recv().expect("a refusal must be sent");
    assert_eq!(tag_of(&frame), Some(*b"EUNK"));
}

#[tokio::test]
async fn test_adopted_client_is_asked_for_info() {
    let mut rig = make_rig(ServerOptions::default());

    let (sink, mut frames) = mpsc::unbounded_channel();
    rig.server
        .handle_event(ServerEvent::Adopt(AdoptRequest {
            name: "laptop".to_string(),
            connection_id: 1,
            version: ProtocolVersion::CURRENT,
            sink,
        }))
        .await;

    assert_eq!(tag_of(&frames.try_recv().unwrap()), Some(*b"QINF"));
    // The option push follows the info request.
    assert_eq!(tag_of(&frames.try_recv().unwrap()), Some(*b"CROP"));
    assert_eq!(tag_of(&frames.try_recv().unwrap()), Some(*b"DSOP"));
    // Not ready until it reports a shape, so no switch can target it.
    rig.server
        .handle_event(ServerEvent::MouseMove { x: 999, y: 500 })
        .await;
    assert_eq!(rig.server.active_screen(), "desk");

    // The shape report is acknowledged and unlocks switching.
    rig.server
        .handle_event(from_laptop(ClientMessage::Info {
            shape: LAPTOP,
            jump_zone: 1,
            cursor_x: 0,
            cursor_y: 0,
        }))
        .await;
    assert_eq!(tag_of(&frames.try_recv().unwrap()), Some(*b"CIAK"));
    assert!(rig
        .reporter
        .events()
        .contains(&StatusEvent::ScreenReady {
            name: "laptop".to_string()
        }));

    rig.server
        .handle_event(ServerEvent::MouseMove { x: 500, y: 500 })
        .await;
    rig.server
        .handle_event(ServerEvent::MouseMove { x: 999, y: 500 })
        .await;
    assert_eq!(rig.server.active_screen(), "laptop");
}

#[tokio::test]
async fn test_adoption_pushes_option_list() {
    let mut rig = make_rig(ServerOptions::default());

    let (sink, mut frames) = mpsc::unbounded_channel();
    rig.server
        .handle_event(ServerEvent::Adopt(AdoptRequest {
            name: "laptop".to_string(),
            connection_id: 1,
            version: ProtocolVersion::CURRENT,
            sink,
        }))
        .await;

    assert_eq!(tag_of(&frames.try_recv().unwrap()), Some(*b"QINF"));
    assert_eq!(tag_of(&frames.try_recv().unwrap()), Some(*b"CROP"));
    let frame = frames.try_recv().unwrap();
    assert_eq!(tag_of(&frame), Some(*b"DSOP"));
    let values = readf(&mut frame.as_slice(), msgs::D_SET_OPTIONS).unwrap();
    // Default keep-alive rate is 3 seconds.
    assert_eq!(
        values[0],
        Value::List(vec![msgs::OPT_KEEP_ALIVE_MS, 3000])
    );
}

// ── Disconnects ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_active_screen_disconnect_bails_to_primary() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;
    switch_to_laptop(&mut rig).await;

    rig.server
        .handle_event(ServerEvent::ConnectionLost {
            name: "laptop".to_string(),
            connection_id: 1,
            cause: DisconnectCause::Dropped,
        })
        .await;

    assert_eq!(rig.server.active_screen(), "desk");
    assert!(!rig.server.is_connected("laptop"));
    // The cursor reappears at the primary's centre.
    assert!(rig
        .desk_log
        .calls()
        .contains(&ScreenCall::Enter(500, 500)));
}

#[tokio::test]
async fn test_connection_lost_from_superseded_connection_is_ignored() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await; // connection_id 1

    rig.server
        .handle_event(ServerEvent::ConnectionLost {
            name: "laptop".to_string(),
            connection_id: 42,
            cause: DisconnectCause::Dropped,
        })
        .await;

    assert!(rig.server.is_connected("laptop"));
}

#[tokio::test]
async fn test_client_close_message_disconnects_it() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;

    rig.server
        .handle_event(from_laptop(ClientMessage::Close))
        .await;

    assert!(!rig.server.is_connected("laptop"));
    assert!(rig.reporter.events().contains(&StatusEvent::ScreenDisconnected {
        name: "laptop".to_string(),
        cause: DisconnectCause::Closed,
    }));
}

// ── Clipboard ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clipboard_grab_notifies_other_screens() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    switch_to_laptop(&mut rig).await;
    laptop.drain();

    // The primary copies something.
    rig.server
        .handle_event(ServerEvent::LocalClipboardGrab {
            id: ClipboardId::System,
        })
        .await;

    assert_eq!(
        laptop.calls(),
        vec![EndpointCall::GrabClipboard(ClipboardId::System)]
    );
}

#[tokio::test]
async fn test_clipboard_pushed_to_active_screen_on_change() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    switch_to_laptop(&mut rig).await;
    laptop.drain();

    rig.server
        .handle_event(ServerEvent::LocalClipboardGrab {
            id: ClipboardId::System,
        })
        .await;
    rig.server
        .handle_event(ServerEvent::LocalClipboardData {
            id: ClipboardId::System,
            data: b"copied on desk".to_vec(),
        })
        .await;

    assert!(laptop.calls().contains(&EndpointCall::SetClipboard(
        ClipboardId::System,
        0,
        b"copied on desk".to_vec()
    )));
}

#[tokio::test]
async fn test_clipboard_delivered_on_next_visit() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;

    // Copy on the desk while the desk is active.
    rig.server
        .handle_event(ServerEvent::LocalClipboardGrab {
            id: ClipboardId::Selection,
        })
        .await;
    rig.server
        .handle_event(ServerEvent::LocalClipboardData {
            id: ClipboardId::Selection,
            data: b"selection".to_vec(),
        })
        .await;
    laptop.drain();

    // The data travels with the cursor, after the enter so the client can
    // order it against its new enter sequence.
    switch_to_laptop(&mut rig).await;
    let calls = laptop.calls();
    let clipboard_at = calls
        .iter()
        .position(|c| matches!(c, EndpointCall::SetClipboard(ClipboardId::Selection, _, _)));
    let enter_at = calls
        .iter()
        .position(|c| matches!(c, EndpointCall::Enter { .. }));
    assert!(
        clipboard_at.is_some() && enter_at < clipboard_at,
        "clipboard must follow the enter, got {calls:?}"
    );
}

#[tokio::test]
async fn test_primary_clipboard_read_and_pushed_on_leave() {
    // A local grab alone caches nothing; the contents live on the screen
    // and must be read when the cursor departs.
    let screen = RecordingScreen::new(DESK, 1);
    let contents = screen.clipboard_store();
    let primary = PrimaryProxy::new("desk".to_string(), Box::new(screen));
    let reporter = Arc::new(RecordingReporter::new());
    let (tx, _events) = mpsc::unbounded_channel();
    let mut server = Server::new(
        desk_laptop_topology(),
        Box::new(primary),
        ServerOptions::default(),
        reporter,
        tx,
    );
    let endpoint = RecordingEndpoint::new("laptop", LAPTOP);
    let laptop = endpoint.log();
    server.attach_endpoint(Box::new(endpoint)).await.unwrap();

    contents.set(ClipboardId::System, b"copied locally");
    server
        .handle_event(ServerEvent::LocalClipboardGrab {
            id: ClipboardId::System,
        })
        .await;
    server
        .handle_event(ServerEvent::MouseMove { x: 999, y: 500 })
        .await;

    assert!(laptop.calls().iter().any(|c| matches!(
        c,
        EndpointCall::SetClipboard(ClipboardId::System, _, data)
            if data.as_slice() == b"copied locally"
    )));
}

#[tokio::test]
async fn test_unchanged_clipboard_not_pushed_again() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    rig.server
        .handle_event(ServerEvent::LocalClipboardGrab {
            id: ClipboardId::System,
        })
        .await;
    rig.server
        .handle_event(ServerEvent::LocalClipboardData {
            id: ClipboardId::System,
            data: b"stable".to_vec(),
        })
        .await;

    // First visit delivers it.
    switch_to_laptop(&mut rig).await;
    laptop.drain();

    // Back and forth without any clipboard change: no re-push.
    rig.server
        .handle_event(ServerEvent::MouseRelMove { dx: -10, dy: 0 })
        .await;
    assert_eq!(rig.server.active_screen(), "desk");
    rig.server
        .handle_event(ServerEvent::MouseMove { x: 500, y: 500 })
        .await;
    rig.server
        .handle_event(ServerEvent::MouseMove { x: 999, y: 500 })
        .await;
    assert_eq!(rig.server.active_screen(), "laptop");

    assert!(!laptop
        .calls()
        .iter()
        .any(|c| matches!(c, EndpointCall::SetClipboard(..))));
}

#[tokio::test]
async fn test_stale_clipboard_data_is_dropped() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;
    switch_to_laptop(&mut rig).await;

    // The laptop grabs at the current enter sequence (1).
    rig.server
        .handle_event(from_laptop(ClientMessage::ClipboardGrab {
            id: ClipboardId::System,
            sequence: 1,
        }))
        .await;

    // Data tagged with an older sequence must not reach the primary.
    rig.server
        .handle_event(from_laptop(ClientMessage::ClipboardData {
            id: ClipboardId::System,
            sequence: 0,
            data: b"stale".to_vec(),
        }))
        .await;
    assert!(!rig
        .desk_log
        .calls()
        .iter()
        .any(|c| matches!(c, ScreenCall::SetClipboard(..))));

    // Correctly tagged data flows to the primary's clipboard when the
    // cursor comes home.
    rig.server
        .handle_event(from_laptop(ClientMessage::ClipboardData {
            id: ClipboardId::System,
            sequence: 1,
            data: b"fresh".to_vec(),
        }))
        .await;
    rig.server
        .handle_event(ServerEvent::MouseRelMove { dx: -10, dy: 0 })
        .await;
    assert_eq!(rig.server.active_screen(), "desk");
    assert!(rig.desk_log.calls().contains(&ScreenCall::SetClipboard(
        ClipboardId::System,
        b"fresh".to_vec()
    )));
}

// ── Liveness ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_heartbeat_sends_keep_alives() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    laptop.drain();

    rig.server.handle_event(ServerEvent::HeartbeatTick).await;

    assert_eq!(laptop.calls(), vec![EndpointCall::KeepAlive]);
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_is_disconnected() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;

    // Three full keep-alive intervals of silence.
    tokio::time::advance(Duration::from_secs(10)).await;
    rig.server.handle_event(ServerEvent::HeartbeatTick).await;

    assert!(!rig.server.is_connected("laptop"));
    assert!(rig.reporter.events().contains(&StatusEvent::ScreenDisconnected {
        name: "laptop".to_string(),
        cause: DisconnectCause::Unresponsive,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_answering_client_stays_connected() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;

    tokio::time::advance(Duration::from_secs(8)).await;
    rig.server
        .handle_event(from_laptop(ClientMessage::KeepAlive))
        .await;
    tokio::time::advance(Duration::from_secs(8)).await;
    rig.server.handle_event(ServerEvent::HeartbeatTick).await;

    assert!(rig.server.is_connected("laptop"));
}

#[tokio::test(start_paused = true)]
async fn test_old_clients_exempt_from_liveness() {
    let mut rig = make_rig(ServerOptions::default());
    let endpoint =
        RecordingEndpoint::new("laptop", LAPTOP).with_version(ProtocolVersion::new(1, 2));
    let log = endpoint.log();
    rig.server.attach_endpoint(Box::new(endpoint)).await.unwrap();

    tokio::time::advance(Duration::from_secs(60)).await;
    rig.server.handle_event(ServerEvent::HeartbeatTick).await;

    assert!(rig.server.is_connected("laptop"));
    assert!(!log.calls().contains(&EndpointCall::KeepAlive));
}

// ── Screensaver ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_screensaver_state_forwarded_to_clients() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    laptop.drain();

    rig.server
        .handle_event(ServerEvent::Screensaver { active: true })
        .await;
    rig.server
        .handle_event(ServerEvent::Screensaver { active: false })
        .await;

    assert_eq!(
        laptop.calls(),
        vec![
            EndpointCall::Screensaver(true),
            EndpointCall::Screensaver(false),
        ]
    );
}

#[tokio::test]
async fn test_screensaver_parks_cursor_on_primary_and_restores() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;
    switch_to_laptop(&mut rig).await;

    rig.server
        .handle_event(ServerEvent::Screensaver { active: true })
        .await;
    assert_eq!(rig.server.active_screen(), "desk");

    rig.server
        .handle_event(ServerEvent::Screensaver { active: false })
        .await;
    assert_eq!(rig.server.active_screen(), "laptop");
}

#[tokio::test]
async fn test_screensaver_restores_remembered_position() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    switch_to_laptop(&mut rig).await;
    rig.server
        .handle_event(ServerEvent::MouseRelMove { dx: 100, dy: -150 })
        .await;
    assert_eq!(rig.server.cursor(), (100, 100));
    laptop.drain();

    rig.server
        .handle_event(ServerEvent::Screensaver { active: true })
        .await;
    rig.server
        .handle_event(ServerEvent::Screensaver { active: false })
        .await;

    assert_eq!(rig.server.active_screen(), "laptop");
    assert!(laptop
        .calls()
        .iter()
        .any(|c| matches!(c, EndpointCall::Enter { x: 100, y: 100, .. })));
}

#[tokio::test]
async fn test_screensaver_restore_clamps_out_of_jump_zone() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    // The cursor sits exactly on the laptop's left edge after the switch;
    // restoring it there would re-trigger the zone on the next move.
    switch_to_laptop(&mut rig).await;
    assert_eq!(rig.server.cursor(), (0, 250));
    laptop.drain();

    rig.server
        .handle_event(ServerEvent::Screensaver { active: true })
        .await;
    rig.server
        .handle_event(ServerEvent::Screensaver { active: false })
        .await;

    assert!(laptop
        .calls()
        .iter()
        .any(|c| matches!(c, EndpointCall::Enter { x: 1, y: 250, .. })));
}

#[tokio::test]
async fn test_screensaver_restore_skips_departed_screen() {
    let mut rig = make_rig(ServerOptions::default());
    attach_laptop(&mut rig).await;
    switch_to_laptop(&mut rig).await;

    rig.server
        .handle_event(ServerEvent::Screensaver { active: true })
        .await;
    rig.server
        .handle_event(ServerEvent::ConnectionLost {
            name: "laptop".to_string(),
            connection_id: 1,
            cause: DisconnectCause::Dropped,
        })
        .await;
    rig.server
        .handle_event(ServerEvent::Screensaver { active: false })
        .await;

    assert_eq!(rig.server.active_screen(), "desk");
}

// ── Shutdown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_says_goodbye_to_clients() {
    let mut rig = make_rig(ServerOptions::default());
    let laptop = attach_laptop(&mut rig).await;
    laptop.drain();

    rig.server.handle_event(ServerEvent::Shutdown).await;

    assert_eq!(laptop.calls(), vec![EndpointCall::Close]);
}

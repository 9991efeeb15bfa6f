//! Per-screen endpoints the coordinator drives.
//!
//! The coordinator treats every screen uniformly through the [`Endpoint`]
//! trait: the server's own monitor is a [`PrimaryProxy`] over a
//! [`PrimaryScreen`], and every connected client is a [`ClientProxy`] that
//! encodes protocol messages and hands the frames to its connection's
//! writer task.
//!
//! Version differences are a data problem, not a type problem: a
//! [`Dialect`] is a capability table derived once from the negotiated
//! version, and the proxy consults it to pick payload layouts and to
//! suppress messages the peer would not understand.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, trace};

use span_core::domain::clipboard::{ClipboardId, CLIPBOARD_COUNT};
use span_core::domain::topology::ScreenShape;
use span_core::protocol::codec::{writef, Item};
use span_core::protocol::msgs;
use span_core::protocol::version::ProtocolVersion;

/// Why a screen's connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The client said goodbye.
    Closed,
    /// The socket dropped or errored.
    Dropped,
    /// The client broke the protocol and was cut off.
    ProtocolError,
    /// The client stopped answering keep-alives.
    Unresponsive,
    /// The server is shutting down.
    ServerShutdown,
}

impl DisconnectCause {
    pub fn describe(self) -> &'static str {
        match self {
            DisconnectCause::Closed => "closed by client",
            DisconnectCause::Dropped => "connection dropped",
            DisconnectCause::ProtocolError => "protocol error",
            DisconnectCause::Unresponsive => "unresponsive",
            DisconnectCause::ServerShutdown => "server shutdown",
        }
    }
}

// ── Dialect ───────────────────────────────────────────────────────────────────

/// What a peer at a given protocol version understands.
///
/// Looked up once when the connection is adopted; every later encoding
/// decision reads a flag instead of comparing versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub version: ProtocolVersion,
    /// Key messages carry the physical key button (v1.1+).
    pub key_button: bool,
    /// Understands relative mouse move (`DMRM`, v1.2+).
    pub relative_moves: bool,
    /// Speaks keep-alive (`CALV`, v1.3+).
    pub keep_alive: bool,
    /// Wheel messages carry a horizontal delta (v1.3+).
    pub horizontal_wheel: bool,
}

impl Dialect {
    pub fn for_version(version: ProtocolVersion) -> Dialect {
        Dialect {
            version,
            key_button: version >= ProtocolVersion::new(1, 1),
            relative_moves: version >= ProtocolVersion::new(1, 2),
            keep_alive: version >= ProtocolVersion::new(1, 3),
            horizontal_wheel: version >= ProtocolVersion::new(1, 3),
        }
    }
}

// ── Endpoint trait ────────────────────────────────────────────────────────────

/// The coordinator-facing surface of one screen.
pub trait Endpoint: Send {
    fn name(&self) -> &str;

    /// Identity of the underlying connection; 0 for the primary screen.
    /// Lets the coordinator discard events from a superseded connection.
    fn connection_id(&self) -> u64;

    fn version(&self) -> ProtocolVersion;

    /// `None` until the screen has reported its shape.
    fn shape(&self) -> Option<ScreenShape>;

    fn jump_zone(&self) -> i16;

    /// Ready means shape known: the screen may become the active one.
    fn is_ready(&self) -> bool;

    /// Asks the screen to (re-)send its info.
    fn request_info(&mut self);

    /// Records freshly reported info and acknowledges it.
    fn handle_info(&mut self, shape: ScreenShape, jump_zone: i16);

    /// Resets the screen's option set to defaults.
    fn reset_options(&mut self);

    /// Pushes option id/value pairs.
    fn set_options(&mut self, options: &[(u32, u32)]);

    /// Notes that the screen was heard from.
    fn touch(&mut self, now: Instant);

    fn last_heard(&self) -> Instant;

    /// Whether this endpoint participates in keep-alive liveness.
    fn wants_keep_alive(&self) -> bool;

    fn send_keep_alive(&mut self);

    /// The cursor arrives at (x, y). `sequence` orders clipboard traffic
    /// from this visit; `toggle_mask` carries the primary's toggle keys.
    fn enter(&mut self, x: i16, y: i16, sequence: u32, toggle_mask: u16);

    /// The cursor is departing. Returning `false` vetoes the switch.
    fn leave(&mut self) -> bool;

    fn key_down(&mut self, id: u16, mask: u16, button: u16);
    fn key_repeat(&mut self, id: u16, mask: u16, count: u16, button: u16);
    fn key_up(&mut self, id: u16, mask: u16, button: u16);
    fn mouse_down(&mut self, button: u8);
    fn mouse_up(&mut self, button: u8);
    fn mouse_move(&mut self, x: i16, y: i16);

    /// Returns `false` if the peer cannot take relative moves; the caller
    /// falls back to absolute.
    fn mouse_relative_move(&mut self, dx: i16, dy: i16) -> bool;

    fn mouse_wheel(&mut self, dx: i16, dy: i16);

    fn screensaver(&mut self, active: bool);

    /// Tells the screen that someone else now owns a clipboard.
    fn grab_clipboard(&mut self, id: ClipboardId);

    /// Delivers clipboard contents.
    fn set_clipboard(&mut self, id: ClipboardId, sequence: u32, data: &[u8]);

    /// Reads a clipboard this screen holds locally. Network clients push
    /// contents themselves, so only the primary answers.
    fn read_clipboard(&mut self, id: ClipboardId) -> Option<Vec<u8>>;

    /// Dirty means: the shared contents changed since this screen last
    /// received them, so they must be pushed before the cursor enters.
    fn set_clipboard_dirty(&mut self, id: ClipboardId, dirty: bool);
    fn clipboard_dirty(&self, id: ClipboardId) -> bool;

    /// Graceful goodbye.
    fn close(&mut self);
}

// ── Client proxy ──────────────────────────────────────────────────────────────

/// A connected client screen.
///
/// Owns no socket: frames go to the connection's writer task through an
/// unbounded channel, so nothing here ever blocks the coordinator. If the
/// writer is gone the send fails silently; the reader side will surface
/// the disconnect as its own event.
pub struct ClientProxy {
    name: String,
    connection_id: u64,
    dialect: Dialect,
    sink: mpsc::UnboundedSender<Vec<u8>>,
    shape: Option<ScreenShape>,
    jump_zone: i16,
    last_heard: Instant,
    clipboard_dirty: [bool; CLIPBOARD_COUNT],
}

impl ClientProxy {
    pub fn new(
        name: String,
        connection_id: u64,
        version: ProtocolVersion,
        sink: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            name,
            connection_id,
            dialect: Dialect::for_version(version),
            sink,
            shape: None,
            jump_zone: 0,
            last_heard: Instant::now(),
            // New screens have never seen the shared clipboards.
            clipboard_dirty: [true; CLIPBOARD_COUNT],
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn post(&self, fmt: &str, args: &[Item<'_>]) {
        let mut frame = Vec::new();
        match writef(&mut frame, fmt, args) {
            Ok(()) => {
                if self.sink.send(frame).is_err() {
                    trace!(screen = %self.name, "writer gone, dropping outbound message");
                }
            }
            Err(err) => {
                error!(screen = %self.name, %err, "failed to encode outbound message");
            }
        }
    }
}

impl Endpoint for ClientProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn version(&self) -> ProtocolVersion {
        self.dialect.version
    }

    fn shape(&self) -> Option<ScreenShape> {
        self.shape
    }

    fn jump_zone(&self) -> i16 {
        self.jump_zone
    }

    fn is_ready(&self) -> bool {
        self.shape.is_some()
    }

    fn request_info(&mut self) {
        self.post(msgs::Q_INFO, &[]);
    }

    fn handle_info(&mut self, shape: ScreenShape, jump_zone: i16) {
        self.shape = Some(shape);
        self.jump_zone = jump_zone;
        self.post(msgs::C_INFO_ACK, &[]);
    }

    fn reset_options(&mut self) {
        self.post(msgs::C_RESET_OPTIONS, &[]);
    }

    fn set_options(&mut self, options: &[(u32, u32)]) {
        let flat: Vec<u32> = options
            .iter()
            .flat_map(|&(id, value)| [id, value])
            .collect();
        self.post(msgs::D_SET_OPTIONS, &[Item::List(&flat)]);
    }

    fn touch(&mut self, now: Instant) {
        self.last_heard = now;
    }

    fn last_heard(&self) -> Instant {
        self.last_heard
    }

    fn wants_keep_alive(&self) -> bool {
        self.dialect.keep_alive
    }

    fn send_keep_alive(&mut self) {
        self.post(msgs::C_KEEP_ALIVE, &[]);
    }

    fn enter(&mut self, x: i16, y: i16, sequence: u32, toggle_mask: u16) {
        self.post(
            msgs::C_ENTER,
            &[
                Item::U16(x as u16),
                Item::U16(y as u16),
                Item::U32(sequence),
                Item::U16(toggle_mask),
            ],
        );
    }

    fn leave(&mut self) -> bool {
        self.post(msgs::C_LEAVE, &[]);
        true
    }

    fn key_down(&mut self, id: u16, mask: u16, button: u16) {
        if self.dialect.key_button {
            self.post(
                msgs::D_KEY_DOWN,
                &[Item::U16(id), Item::U16(mask), Item::U16(button)],
            );
        } else {
            self.post(msgs::D_KEY_DOWN_1_0, &[Item::U16(id), Item::U16(mask)]);
        }
    }

    fn key_repeat(&mut self, id: u16, mask: u16, count: u16, button: u16) {
        if self.dialect.key_button {
            self.post(
                msgs::D_KEY_REPEAT,
                &[
                    Item::U16(id),
                    Item::U16(mask),
                    Item::U16(count),
                    Item::U16(button),
                ],
            );
        } else {
            self.post(
                msgs::D_KEY_REPEAT_1_0,
                &[Item::U16(id), Item::U16(mask), Item::U16(count)],
            );
        }
    }

    fn key_up(&mut self, id: u16, mask: u16, button: u16) {
        if self.dialect.key_button {
            self.post(
                msgs::D_KEY_UP,
                &[Item::U16(id), Item::U16(mask), Item::U16(button)],
            );
        } else {
            self.post(msgs::D_KEY_UP_1_0, &[Item::U16(id), Item::U16(mask)]);
        }
    }

    fn mouse_down(&mut self, button: u8) {
        self.post(msgs::D_MOUSE_DOWN, &[Item::U8(button)]);
    }

    fn mouse_up(&mut self, button: u8) {
        self.post(msgs::D_MOUSE_UP, &[Item::U8(button)]);
    }

    fn mouse_move(&mut self, x: i16, y: i16) {
        self.post(
            msgs::D_MOUSE_MOVE,
            &[Item::U16(x as u16), Item::U16(y as u16)],
        );
    }

    fn mouse_relative_move(&mut self, dx: i16, dy: i16) -> bool {
        if !self.dialect.relative_moves {
            return false;
        }
        self.post(
            msgs::D_MOUSE_REL_MOVE,
            &[Item::U16(dx as u16), Item::U16(dy as u16)],
        );
        true
    }

    fn mouse_wheel(&mut self, dx: i16, dy: i16) {
        if self.dialect.horizontal_wheel {
            self.post(
                msgs::D_MOUSE_WHEEL,
                &[Item::U16(dx as u16), Item::U16(dy as u16)],
            );
        } else {
            // Older peers only know a vertical wheel.
            self.post(msgs::D_MOUSE_WHEEL_1_0, &[Item::U16(dy as u16)]);
        }
    }

    fn screensaver(&mut self, active: bool) {
        self.post(msgs::C_SCREENSAVER, &[Item::U8(u8::from(active))]);
    }

    fn grab_clipboard(&mut self, id: ClipboardId) {
        // The server always reports sequence 0 when announcing a grab.
        self.post(
            msgs::C_CLIPBOARD,
            &[Item::U8(id.to_wire()), Item::U32(0)],
        );
    }

    fn set_clipboard(&mut self, id: ClipboardId, sequence: u32, data: &[u8]) {
        self.post(
            msgs::D_CLIPBOARD,
            &[
                Item::U8(id.to_wire()),
                Item::U32(sequence),
                Item::Bytes(data),
            ],
        );
    }

    fn read_clipboard(&mut self, _id: ClipboardId) -> Option<Vec<u8>> {
        None
    }

    fn set_clipboard_dirty(&mut self, id: ClipboardId, dirty: bool) {
        self.clipboard_dirty[id.index()] = dirty;
    }

    fn clipboard_dirty(&self, id: ClipboardId) -> bool {
        self.clipboard_dirty[id.index()]
    }

    fn close(&mut self) {
        self.post(msgs::C_CLOSE, &[]);
    }
}

// ── Primary proxy ─────────────────────────────────────────────────────────────

/// The server's own monitor as an [`Endpoint`].
///
/// Input relays are no-ops: while the cursor is here the hardware already
/// delivers input locally. Always ready, never subject to keep-alive.
pub struct PrimaryProxy {
    name: String,
    screen: Box<dyn crate::screen::PrimaryScreen>,
    clipboard_dirty: [bool; CLIPBOARD_COUNT],
}

impl PrimaryProxy {
    pub fn new(name: String, screen: Box<dyn crate::screen::PrimaryScreen>) -> Self {
        Self {
            name,
            screen,
            clipboard_dirty: [false; CLIPBOARD_COUNT],
        }
    }
}

impl Endpoint for PrimaryProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_id(&self) -> u64 {
        0
    }

    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::CURRENT
    }

    fn shape(&self) -> Option<ScreenShape> {
        Some(self.screen.shape())
    }

    fn jump_zone(&self) -> i16 {
        self.screen.jump_zone()
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn request_info(&mut self) {}

    fn handle_info(&mut self, _shape: ScreenShape, _jump_zone: i16) {}

    fn reset_options(&mut self) {}

    fn set_options(&mut self, _options: &[(u32, u32)]) {}

    fn touch(&mut self, _now: Instant) {}

    fn last_heard(&self) -> Instant {
        Instant::now()
    }

    fn wants_keep_alive(&self) -> bool {
        false
    }

    fn send_keep_alive(&mut self) {}

    fn enter(&mut self, x: i16, y: i16, _sequence: u32, _toggle_mask: u16) {
        self.screen.warp_cursor(x, y);
        self.screen.enter(x, y);
    }

    fn leave(&mut self) -> bool {
        self.screen.leave()
    }

    fn key_down(&mut self, _id: u16, _mask: u16, _button: u16) {}
    fn key_repeat(&mut self, _id: u16, _mask: u16, _count: u16, _button: u16) {}
    fn key_up(&mut self, _id: u16, _mask: u16, _button: u16) {}
    fn mouse_down(&mut self, _button: u8) {}
    fn mouse_up(&mut self, _button: u8) {}

    fn mouse_move(&mut self, x: i16, y: i16) {
        self.screen.warp_cursor(x, y);
    }

    fn mouse_relative_move(&mut self, _dx: i16, _dy: i16) -> bool {
        false
    }

    fn mouse_wheel(&mut self, _dx: i16, _dy: i16) {}

    fn screensaver(&mut self, _active: bool) {}

    fn grab_clipboard(&mut self, _id: ClipboardId) {}

    fn set_clipboard(&mut self, id: ClipboardId, _sequence: u32, data: &[u8]) {
        self.screen.set_clipboard(id, data);
    }

    fn read_clipboard(&mut self, id: ClipboardId) -> Option<Vec<u8>> {
        self.screen.get_clipboard(id)
    }

    fn set_clipboard_dirty(&mut self, id: ClipboardId, dirty: bool) {
        self.clipboard_dirty[id.index()] = dirty;
    }

    fn clipboard_dirty(&self, id: ClipboardId) -> bool {
        self.clipboard_dirty[id.index()]
    }

    fn close(&mut self) {}
}

// ── Recording endpoint for tests ──────────────────────────────────────────────

/// What a [`RecordingEndpoint`] was told, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointCall {
    RequestInfo,
    ResetOptions,
    SetOptions(Vec<(u32, u32)>),
    KeepAlive,
    Enter { x: i16, y: i16, sequence: u32 },
    Leave,
    KeyDown(u16, u16, u16),
    KeyRepeat(u16, u16, u16, u16),
    KeyUp(u16, u16, u16),
    MouseDown(u8),
    MouseUp(u8),
    MouseMove(i16, i16),
    MouseRelMove(i16, i16),
    MouseWheel(i16, i16),
    Screensaver(bool),
    GrabClipboard(ClipboardId),
    SetClipboard(ClipboardId, u32, Vec<u8>),
    Close,
}

/// Shared view of a [`RecordingEndpoint`]'s calls.  Cloned off before the
/// endpoint is boxed away into the coordinator, so tests can still assert
/// on what the coordinator did.
#[derive(Debug, Clone, Default)]
pub struct EndpointLog(std::sync::Arc<std::sync::Mutex<Vec<EndpointCall>>>);

impl EndpointLog {
    pub fn calls(&self) -> Vec<EndpointCall> {
        self.0.lock().expect("endpoint log lock poisoned").clone()
    }

    /// Returns and clears the recorded calls.
    pub fn drain(&self) -> Vec<EndpointCall> {
        std::mem::take(&mut *self.0.lock().expect("endpoint log lock poisoned"))
    }

    fn push(&self, call: EndpointCall) {
        self.0.lock().expect("endpoint log lock poisoned").push(call);
    }
}

/// An [`Endpoint`] double that records every call.
///
/// Lives outside `#[cfg(test)]` so integration tests can use it, the same
/// way the headless screen is always available.
pub struct RecordingEndpoint {
    name: String,
    connection_id: u64,
    version: ProtocolVersion,
    pub shape: Option<ScreenShape>,
    pub jump_zone: i16,
    pub veto_leave: bool,
    pub supports_relative: bool,
    last_heard: Instant,
    clipboard_dirty: [bool; CLIPBOARD_COUNT],
    log: EndpointLog,
}

impl RecordingEndpoint {
    pub fn new(name: &str, shape: ScreenShape) -> Self {
        Self {
            name: name.to_string(),
            connection_id: 1,
            version: ProtocolVersion::CURRENT,
            shape: Some(shape),
            jump_zone: 1,
            veto_leave: false,
            supports_relative: true,
            last_heard: Instant::now(),
            clipboard_dirty: [true; CLIPBOARD_COUNT],
            log: EndpointLog::default(),
        }
    }

    pub fn with_connection_id(mut self, id: u64) -> Self {
        self.connection_id = id;
        self
    }

    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn log(&self) -> EndpointLog {
        self.log.clone()
    }
}

impl Endpoint for RecordingEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn shape(&self) -> Option<ScreenShape> {
        self.shape
    }

    fn jump_zone(&self) -> i16 {
        self.jump_zone
    }

    fn is_ready(&self) -> bool {
        self.shape.is_some()
    }

    fn request_info(&mut self) {
        self.log.push(EndpointCall::RequestInfo);
    }

    fn handle_info(&mut self, shape: ScreenShape, jump_zone: i16) {
        self.shape = Some(shape);
        self.jump_zone = jump_zone;
    }

    fn reset_options(&mut self) {
        self.log.push(EndpointCall::ResetOptions);
    }

    fn set_options(&mut self, options: &[(u32, u32)]) {
        self.log.push(EndpointCall::SetOptions(options.to_vec()));
    }

    fn touch(&mut self, now: Instant) {
        self.last_heard = now;
    }

    fn last_heard(&self) -> Instant {
        self.last_heard
    }

    fn wants_keep_alive(&self) -> bool {
        self.version >= ProtocolVersion::new(1, 3)
    }

    fn send_keep_alive(&mut self) {
        self.log.push(EndpointCall::KeepAlive);
    }

    fn enter(&mut self, x: i16, y: i16, sequence: u32, _toggle_mask: u16) {
        self.log.push(EndpointCall::Enter { x, y, sequence });
    }

    fn leave(&mut self) -> bool {
        self.log.push(EndpointCall::Leave);
        !self.veto_leave
    }

    fn key_down(&mut self, id: u16, mask: u16, button: u16) {
        self.log.push(EndpointCall::KeyDown(id, mask, button));
    }

    fn key_repeat(&mut self, id: u16, mask: u16, count: u16, button: u16) {
        self.log.push(EndpointCall::KeyRepeat(id, mask, count, button));
    }

    fn key_up(&mut self, id: u16, mask: u16, button: u16) {
        self.log.push(EndpointCall::KeyUp(id, mask, button));
    }

    fn mouse_down(&mut self, button: u8) {
        self.log.push(EndpointCall::MouseDown(button));
    }

    fn mouse_up(&mut self, button: u8) {
        self.log.push(EndpointCall::MouseUp(button));
    }

    fn mouse_move(&mut self, x: i16, y: i16) {
        self.log.push(EndpointCall::MouseMove(x, y));
    }

    fn mouse_relative_move(&mut self, dx: i16, dy: i16) -> bool {
        if !self.supports_relative {
            return false;
        }
        self.log.push(EndpointCall::MouseRelMove(dx, dy));
        true
    }

    fn mouse_wheel(&mut self, dx: i16, dy: i16) {
        self.log.push(EndpointCall::MouseWheel(dx, dy));
    }

    fn screensaver(&mut self, active: bool) {
        self.log.push(EndpointCall::Screensaver(active));
    }

    fn grab_clipboard(&mut self, id: ClipboardId) {
        self.log.push(EndpointCall::GrabClipboard(id));
    }

    fn set_clipboard(&mut self, id: ClipboardId, sequence: u32, data: &[u8]) {
        self.log
            .push(EndpointCall::SetClipboard(id, sequence, data.to_vec()));
    }

    fn read_clipboard(&mut self, _id: ClipboardId) -> Option<Vec<u8>> {
        None
    }

    fn set_clipboard_dirty(&mut self, id: ClipboardId, dirty: bool) {
        self.clipboard_dirty[id.index()] = dirty;
    }

    fn clipboard_dirty(&self, id: ClipboardId) -> bool {
        self.clipboard_dirty[id.index()]
    }

    fn close(&mut self) {
        self.log.push(EndpointCall::Close);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use span_core::protocol::codec::{readf, Value};
    use span_core::protocol::msgs::tag_of;

    fn proxy_at(version: ProtocolVersion) -> (ClientProxy, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientProxy::new("laptop".to_string(), 1, version, tx), rx)
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        rx.try_recv().expect("a frame should have been posted")
    }

    #[test]
    fn test_dialect_capabilities_by_version() {
        let v10 = Dialect::for_version(ProtocolVersion::new(1, 0));
        assert!(!v10.key_button && !v10.relative_moves && !v10.keep_alive);

        let v11 = Dialect::for_version(ProtocolVersion::new(1, 1));
        assert!(v11.key_button && !v11.relative_moves);

        let v12 = Dialect::for_version(ProtocolVersion::new(1, 2));
        assert!(v12.key_button && v12.relative_moves && !v12.keep_alive);

        let v13 = Dialect::for_version(ProtocolVersion::new(1, 3));
        assert!(v13.keep_alive && v13.horizontal_wheel);
    }

    #[test]
    fn test_key_down_carries_button_on_modern_dialect() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::new(1, 3));
        proxy.key_down(0x61, 0x02, 38);
        let frame = next_frame(&mut rx);
        let values = readf(&mut frame.as_slice(), msgs::D_KEY_DOWN).unwrap();
        assert_eq!(values[2].as_u16(), Some(38));
    }

    #[test]
    fn test_key_down_omits_button_on_old_dialect() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::new(1, 0));
        proxy.key_down(0x61, 0x02, 38);
        let frame = next_frame(&mut rx);
        let values = readf(&mut frame.as_slice(), msgs::D_KEY_DOWN_1_0).unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_wheel_drops_horizontal_delta_on_old_dialect() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::new(1, 2));
        proxy.mouse_wheel(120, -120);
        let frame = next_frame(&mut rx);
        let values = readf(&mut frame.as_slice(), msgs::D_MOUSE_WHEEL_1_0).unwrap();
        assert_eq!(values[0].as_i16(), Some(-120));
    }

    #[test]
    fn test_relative_move_refused_below_1_2() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::new(1, 1));
        assert!(!proxy.mouse_relative_move(3, 4));
        assert!(rx.try_recv().is_err(), "nothing must be sent");
    }

    #[test]
    fn test_relative_move_sent_at_1_2() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::new(1, 2));
        assert!(proxy.mouse_relative_move(-3, 4));
        let frame = next_frame(&mut rx);
        let values = readf(&mut frame.as_slice(), msgs::D_MOUSE_REL_MOVE).unwrap();
        assert_eq!(values[0].as_i16(), Some(-3));
        assert_eq!(values[1].as_i16(), Some(4));
    }

    #[test]
    fn test_enter_encodes_position_and_sequence() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::CURRENT);
        proxy.enter(10, -20, 7, 0x1000);
        let frame = next_frame(&mut rx);
        let values = readf(&mut frame.as_slice(), msgs::C_ENTER).unwrap();
        assert_eq!(values[0].as_i16(), Some(10));
        assert_eq!(values[1].as_i16(), Some(-20));
        assert_eq!(values[2].as_u32(), Some(7));
        assert_eq!(values[3].as_u16(), Some(0x1000));
    }

    #[test]
    fn test_handle_info_makes_proxy_ready_and_acks() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::CURRENT);
        assert!(!proxy.is_ready());
        proxy.handle_info(ScreenShape::new(0, 0, 800, 600), 1);
        assert!(proxy.is_ready());
        assert_eq!(proxy.jump_zone(), 1);
        assert_eq!(tag_of(&next_frame(&mut rx)), Some(*b"CIAK"));
    }

    #[test]
    fn test_set_options_flattens_pairs_into_list() {
        let (mut proxy, mut rx) = proxy_at(ProtocolVersion::CURRENT);
        proxy.set_options(&[(msgs::OPT_KEEP_ALIVE_MS, 3000)]);
        let frame = next_frame(&mut rx);
        let values = readf(&mut frame.as_slice(), msgs::D_SET_OPTIONS).unwrap();
        assert_eq!(
            values[0],
            Value::List(vec![msgs::OPT_KEEP_ALIVE_MS, 3000])
        );
    }

    #[test]
    fn test_new_proxy_has_all_clipboards_dirty() {
        let (proxy, _rx) = proxy_at(ProtocolVersion::CURRENT);
        for id in ClipboardId::ALL {
            assert!(proxy.clipboard_dirty(id));
        }
    }

    #[test]
    fn test_keep_alive_gated_on_dialect() {
        let (proxy, _rx) = proxy_at(ProtocolVersion::new(1, 2));
        assert!(!proxy.wants_keep_alive());
        let (proxy, _rx) = proxy_at(ProtocolVersion::new(1, 3));
        assert!(proxy.wants_keep_alive());
    }

    #[test]
    fn test_post_survives_closed_writer() {
        let (mut proxy, rx) = proxy_at(ProtocolVersion::CURRENT);
        drop(rx);
        // must not panic
        proxy.mouse_move(1, 2);
    }
}

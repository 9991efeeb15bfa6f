//! Protocol message tags and format strings.
//!
//! Every message starts with a four-byte ASCII tag; the handshake pair is
//! the exception and starts with the protocol name literal instead. The
//! first letter of a tag groups it: `C` for commands, `D` for data, `Q`
//! for queries, `E` for errors. The format strings are consumed by
//! [`crate::protocol::codec`].
//!
//! Versioning: tags are only ever added, never removed or re-laid-out, so
//! an older peer simply never receives the tags it does not know. Where a
//! payload grew between versions both layouts are kept (`*_1_0` suffix)
//! and the proxy picks one at handshake time.

/// Current protocol version spoken by the server.
pub const PROTOCOL_MAJOR: u16 = 1;
pub const PROTOCOL_MINOR: u16 = 3;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 24800;

/// Upper bound on a HelloBack reply, tag included.
pub const MAX_HELLO_LENGTH: u32 = 1024;

/// Upper bound on one framed message (length prefix excluded).
pub const MAX_MESSAGE_LENGTH: u32 = 4 * 1024 * 1024;

/// Seconds between server keep-alives, and the multiplier after which a
/// silent peer is declared unresponsive.
pub const KEEP_ALIVE_RATE: f64 = 3.0;
pub const KEEP_ALIVES_UNTIL_DEATH: f64 = 3.0;

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Server → client greeting: protocol major, minor.
pub const HELLO: &str = "ScreenSpan%2i%2i";

/// Client → server reply: protocol major, minor, screen name.
pub const HELLO_BACK: &str = "ScreenSpan%2i%2i%s";

// ── Commands ──────────────────────────────────────────────────────────────────

/// No-operation.
pub const C_NOOP: &str = "CNOP";

/// Close connection (graceful).
pub const C_CLOSE: &str = "CBYE";

/// Enter screen: x, y, enter-sequence number, toggle-modifier mask.
pub const C_ENTER: &str = "CINN%2i%2i%4i%2i";

/// Leave screen. The secondary should send any clipboard it has grabbed
/// before processing further messages.
pub const C_LEAVE: &str = "COUT";

/// Clipboard grab notice: clipboard id, sequence number from the most
/// recent enter (the primary always sends 0).
pub const C_CLIPBOARD: &str = "CCLP%1i%4i";

/// Screensaver change: 1 = activated, 0 = deactivated.
pub const C_SCREENSAVER: &str = "CSEC%1i";

/// Reset all options to defaults.
pub const C_RESET_OPTIONS: &str = "CROP";

/// Acknowledgment of a received `DINF`, solicited or not.
pub const C_INFO_ACK: &str = "CIAK";

/// Keep-alive (v1.3+). Sent periodically by the server; the client echoes
/// it back. Either side may use silence to declare the other dead.
pub const C_KEEP_ALIVE: &str = "CALV";

// ── Data ──────────────────────────────────────────────────────────────────────

/// Key press: key id, modifier mask, physical key button (v1.1+).
pub const D_KEY_DOWN: &str = "DKDN%2i%2i%2i";
/// Key press, v1.0 layout (no physical key button).
pub const D_KEY_DOWN_1_0: &str = "DKDN%2i%2i";

/// Key auto-repeat: key id, modifier mask, repeat count, button (v1.1+).
pub const D_KEY_REPEAT: &str = "DKRP%2i%2i%2i%2i";
/// Key auto-repeat, v1.0 layout.
pub const D_KEY_REPEAT_1_0: &str = "DKRP%2i%2i%2i";

/// Key release: key id, modifier mask, button (v1.1+).
pub const D_KEY_UP: &str = "DKUP%2i%2i%2i";
/// Key release, v1.0 layout.
pub const D_KEY_UP_1_0: &str = "DKUP%2i%2i";

/// Mouse button press: button id.
pub const D_MOUSE_DOWN: &str = "DMDN%1i";

/// Mouse button release: button id.
pub const D_MOUSE_UP: &str = "DMUP%1i";

/// Absolute mouse move: x, y (screen-local).
pub const D_MOUSE_MOVE: &str = "DMMV%2i%2i";

/// Relative mouse move: dx, dy (v1.2+).
pub const D_MOUSE_REL_MOVE: &str = "DMRM%2i%2i";

/// Mouse wheel: x delta, y delta (v1.3+).
pub const D_MOUSE_WHEEL: &str = "DMWM%2i%2i";
/// Mouse wheel, pre-1.3 layout: y delta only.
pub const D_MOUSE_WHEEL_1_0: &str = "DMWM%2i";

/// Clipboard contents: clipboard id, sequence number, marshalled data.
pub const D_CLIPBOARD: &str = "DCLP%1i%4i%s";

/// Screen info: x, y, width, height, jump-zone size, cursor x, cursor y.
/// Sent in response to `QINF` and unsolicited whenever the shape changes.
pub const D_INFO: &str = "DINF%2i%2i%2i%2i%2i%2i%2i";

/// Option list: flat id/value pairs.
pub const D_SET_OPTIONS: &str = "DSOP%4I";

/// Packs a four-character option name into its wire id.
pub const fn option_id(name: [u8; 4]) -> u32 {
    u32::from_be_bytes(name)
}

/// Option: keep-alive interval in milliseconds. 0 disables.
pub const OPT_KEEP_ALIVE_MS: u32 = option_id(*b"KALV");

// ── Queries ───────────────────────────────────────────────────────────────────

/// Ask the secondary for its screen info; it must reply with `DINF`.
pub const Q_INFO: &str = "QINF";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Incompatible protocol version: server major, minor. Sent before the
/// connection is dropped during handshake.
pub const E_INCOMPATIBLE: &str = "EICV%2i%2i";

/// The client's screen name is already connected.
pub const E_BUSY: &str = "EBSY";

/// The client's screen name is not in the topology.
pub const E_UNKNOWN: &str = "EUNK";

/// The client violated the protocol.
pub const E_BAD: &str = "EBAD";

/// Returns the four-byte tag at the head of a frame, if present.
pub fn tag_of(frame: &[u8]) -> Option<[u8; 4]> {
    let head: &[u8] = frame.get(..4)?;
    let mut tag = [0u8; 4];
    tag.copy_from_slice(head);
    Some(tag)
}

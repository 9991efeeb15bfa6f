//! The server's own screen, behind a trait.
//!
//! The coordinator never talks to a window system directly; it drives a
//! [`PrimaryScreen`] implementation. The real one would wrap the platform
//! input capture and clipboard APIs. [`HeadlessScreen`] is the stand-in
//! used by the default binary and by tests that only care about the
//! coordinator's decisions, and [`RecordingScreen`] additionally records
//! every call so tests can assert on what the coordinator did.

use span_core::domain::clipboard::{ClipboardId, CLIPBOARD_COUNT};
use span_core::domain::topology::ScreenShape;

/// Everything the coordinator needs from the local screen.
pub trait PrimaryScreen: Send {
    /// Position and size in the shared virtual coordinate space.
    fn shape(&self) -> ScreenShape;

    /// Width in pixels of the edge band that triggers a switch.
    fn jump_zone(&self) -> i16;

    /// Moves the hardware cursor.
    fn warp_cursor(&mut self, x: i16, y: i16);

    /// The cursor is returning to this screen at (x, y): show it and stop
    /// relaying input elsewhere.
    fn enter(&mut self, x: i16, y: i16);

    /// The cursor is about to jump to another screen. Returning `false`
    /// vetoes the switch (for example while a drag is in progress that
    /// must not be torn).
    fn leave(&mut self) -> bool;

    /// Replaces the local clipboard contents.
    fn set_clipboard(&mut self, id: ClipboardId, data: &[u8]);

    /// Reads the local clipboard contents, called when the cursor leaves
    /// this screen so the grabbed data travels with it. `None` when the
    /// clipboard is empty or unreadable.
    fn get_clipboard(&mut self, id: ClipboardId) -> Option<Vec<u8>>;
}

// ── Headless implementation ───────────────────────────────────────────────────

/// A primary screen with no window system behind it.
///
/// Used when the server runs as a pure coordinator (input events are fed
/// in externally) and throughout the test suite.
#[derive(Debug)]
pub struct HeadlessScreen {
    shape: ScreenShape,
    jump_zone: i16,
    cursor: (i16, i16),
    clipboards: [Option<Vec<u8>>; CLIPBOARD_COUNT],
}

impl HeadlessScreen {
    pub fn new(shape: ScreenShape, jump_zone: i16) -> Self {
        let cursor = (
            (shape.x + shape.width / 2) as i16,
            (shape.y + shape.height / 2) as i16,
        );
        Self {
            shape,
            jump_zone,
            cursor,
            clipboards: Default::default(),
        }
    }

    pub fn cursor(&self) -> (i16, i16) {
        self.cursor
    }
}

impl PrimaryScreen for HeadlessScreen {
    fn shape(&self) -> ScreenShape {
        self.shape
    }

    fn jump_zone(&self) -> i16 {
        self.jump_zone
    }

    fn warp_cursor(&mut self, x: i16, y: i16) {
        self.cursor = (x, y);
    }

    fn enter(&mut self, x: i16, y: i16) {
        self.cursor = (x, y);
    }

    fn leave(&mut self) -> bool {
        true
    }

    fn set_clipboard(&mut self, id: ClipboardId, data: &[u8]) {
        self.clipboards[id.index()] = Some(data.to_vec());
    }

    fn get_clipboard(&mut self, id: ClipboardId) -> Option<Vec<u8>> {
        self.clipboards[id.index()].clone()
    }
}

// ── Recording implementation for tests ────────────────────────────────────────

/// What a [`RecordingScreen`] saw, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenCall {
    Warp(i16, i16),
    Enter(i16, i16),
    Leave,
    SetClipboard(ClipboardId, Vec<u8>),
}

/// Shared view of a [`RecordingScreen`]'s calls.  Cloned off before the
/// screen is boxed away into a proxy, so tests can still inspect it.
#[derive(Debug, Clone, Default)]
pub struct ScreenLog(std::sync::Arc<std::sync::Mutex<Vec<ScreenCall>>>);

impl ScreenLog {
    pub fn calls(&self) -> Vec<ScreenCall> {
        self.0.lock().expect("screen log lock poisoned").clone()
    }

    fn push(&self, call: ScreenCall) {
        self.0.lock().expect("screen log lock poisoned").push(call);
    }
}

/// Shared clipboard contents of a [`RecordingScreen`], so tests can
/// preload what `get_clipboard` returns after the screen is boxed away.
#[derive(Debug, Clone, Default)]
pub struct ClipboardStore(std::sync::Arc<std::sync::Mutex<[Option<Vec<u8>>; CLIPBOARD_COUNT]>>);

impl ClipboardStore {
    pub fn set(&self, id: ClipboardId, data: &[u8]) {
        self.0.lock().expect("clipboard store lock poisoned")[id.index()] = Some(data.to_vec());
    }

    fn get(&self, id: ClipboardId) -> Option<Vec<u8>> {
        self.0.lock().expect("clipboard store lock poisoned")[id.index()].clone()
    }
}

/// A [`PrimaryScreen`] double that records every call.
///
/// `veto_leave` makes `leave()` refuse, which lets tests exercise the
/// switch-veto path.
#[derive(Debug)]
pub struct RecordingScreen {
    shape: ScreenShape,
    jump_zone: i16,
    veto_leave: std::sync::Arc<std::sync::atomic::AtomicBool>,
    clipboards: ClipboardStore,
    log: ScreenLog,
}

impl RecordingScreen {
    pub fn new(shape: ScreenShape, jump_zone: i16) -> Self {
        Self {
            shape,
            jump_zone,
            veto_leave: Default::default(),
            clipboards: ClipboardStore::default(),
            log: ScreenLog::default(),
        }
    }

    pub fn log(&self) -> ScreenLog {
        self.log.clone()
    }

    /// Handle for flipping the leave veto after the screen is boxed away.
    pub fn veto_handle(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        std::sync::Arc::clone(&self.veto_leave)
    }

    /// Handle for preloading clipboard contents after the screen is boxed
    /// away.
    pub fn clipboard_store(&self) -> ClipboardStore {
        self.clipboards.clone()
    }
}

impl PrimaryScreen for RecordingScreen {
    fn shape(&self) -> ScreenShape {
        self.shape
    }

    fn jump_zone(&self) -> i16 {
        self.jump_zone
    }

    fn warp_cursor(&mut self, x: i16, y: i16) {
        self.log.push(ScreenCall::Warp(x, y));
    }

    fn enter(&mut self, x: i16, y: i16) {
        self.log.push(ScreenCall::Enter(x, y));
    }

    fn leave(&mut self) -> bool {
        self.log.push(ScreenCall::Leave);
        !self.veto_leave.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn set_clipboard(&mut self, id: ClipboardId, data: &[u8]) {
        self.clipboards.set(id, data);
        self.log.push(ScreenCall::SetClipboard(id, data.to_vec()));
    }

    fn get_clipboard(&mut self, id: ClipboardId) -> Option<Vec<u8>> {
        self.clipboards.get(id)
    }
}

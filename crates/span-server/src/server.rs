//! The coordinator: owns all cursor, topology, and clipboard state.
//!
//! Exactly one task runs the coordinator. Connection readers, timers, and
//! the input source never touch its state; they post [`ServerEvent`]s into
//! its channel and the event loop applies them one at a time. Timers are
//! delayed events carrying a generation counter, so a timer that was
//! cancelled logically (the cursor left the jump zone) is recognised as
//! stale when it finally fires.
//!
//! # Switching rules
//!
//! A cursor touching a jump zone switches screens only if every gate
//! passes, in this order:
//!
//! 1. **Lock** — a held mouse button or an explicit lock pins the cursor
//!    to the current screen and clears any pending gesture state.
//! 2. **Neighbor** — the topology walk must find a connected, ready
//!    screen on the far side of the edge.
//! 3. **Two-tap** — if enabled, the cursor must leave the zone and come
//!    back within the configured window.
//! 4. **Dwell delay** — if enabled, the cursor must stay in the zone
//!    until the one-shot wait timer fires. The delay applies even to a
//!    switch the two-tap gesture just approved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use span_core::domain::clipboard::{ClipboardId, ClipboardSlot, ClipboardUpdate, CLIPBOARD_COUNT};
use span_core::domain::topology::{map_to_fraction, map_to_pixel, Direction, TopologyMap};
use span_core::protocol::codec::{writef, Item};
use span_core::protocol::msgs;
use span_core::protocol::parse::ClientMessage;
use span_core::protocol::version::ProtocolVersion;

use crate::config::OptionsSection;
use crate::proxy::{ClientProxy, DisconnectCause, Endpoint};
use crate::status::{StatusEvent, StatusReporter};

/// Behaviour knobs the coordinator consults at runtime.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Dwell time in a jump zone before switching. Zero disables.
    pub switch_delay: Duration,
    /// Window for the tap-twice gesture. Zero disables.
    pub switch_two_tap: Duration,
    /// Keep-alive send interval. Zero disables liveness entirely.
    pub keep_alive_rate: Duration,
    /// Prefer relative mouse deltas while a button is held.
    pub relative_mouse_moves: bool,
    /// Forward screensaver state to clients.
    pub screensaver_sync: bool,
}

impl ServerOptions {
    pub fn from_config(options: &OptionsSection) -> ServerOptions {
        ServerOptions {
            switch_delay: Duration::from_millis(options.switch_delay_ms),
            switch_two_tap: Duration::from_millis(options.switch_two_tap_ms),
            keep_alive_rate: Duration::from_secs_f64(options.keep_alive_rate_secs.max(0.0)),
            relative_mouse_moves: options.relative_mouse_moves,
            screensaver_sync: options.screensaver_sync,
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&OptionsSection::default())
    }
}

/// A freshly handshaken connection for the coordinator to adopt.
pub struct AdoptRequest {
    pub name: String,
    pub connection_id: u64,
    pub version: ProtocolVersion,
    pub sink: mpsc::UnboundedSender<Vec<u8>>,
}

/// Everything that can happen to the coordinator.
pub enum ServerEvent {
    /// A connection finished its handshake.
    Adopt(AdoptRequest),
    /// A parsed message arrived from a client.
    FromClient {
        name: String,
        connection_id: u64,
        message: ClientMessage,
    },
    /// A client's connection ended.
    ConnectionLost {
        name: String,
        connection_id: u64,
        cause: DisconnectCause,
    },
    /// Absolute cursor position on the primary screen.
    MouseMove { x: i32, y: i32 },
    /// Raw cursor delta, used while a secondary screen is active.
    MouseRelMove { dx: i32, dy: i32 },
    KeyDown { id: u16, mask: u16, button: u16 },
    KeyRepeat { id: u16, mask: u16, count: u16, button: u16 },
    KeyUp { id: u16, mask: u16, button: u16 },
    MouseDown { button: u8 },
    MouseUp { button: u8 },
    MouseWheel { dx: i16, dy: i16 },
    /// The server's own screen grabbed a clipboard.
    LocalClipboardGrab { id: ClipboardId },
    /// Contents of a locally grabbed clipboard.
    LocalClipboardData { id: ClipboardId, data: Vec<u8> },
    /// The server's screensaver turned on or off.
    Screensaver { active: bool },
    /// Pin the cursor to the current screen (or release it).
    LockCursor { locked: bool },
    /// The dwell-delay timer fired.
    SwitchWaitExpired { generation: u64 },
    /// Periodic liveness sweep.
    HeartbeatTick,
    Shutdown,
}

/// Why an adoption was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdoptError {
    #[error("screen name already connected")]
    Busy,
    #[error("screen name not in the topology")]
    Unknown,
}

struct PendingSwitch {
    dir: Direction,
    x: i32,
    y: i32,
    generation: u64,
}

/// Where the cursor was when the screensaver kicked in.
struct SavedPosition {
    screen: String,
    x: i32,
    y: i32,
}

pub struct Server {
    options: ServerOptions,
    topology: TopologyMap,
    endpoints: HashMap<String, Box<dyn Endpoint>>,
    primary_name: String,
    active: String,
    x: i32,
    y: i32,
    enter_sequence: u32,
    toggle_mask: u16,
    buttons_down: u32,
    locked: bool,
    screensaver_active: bool,
    saved_position: Option<SavedPosition>,
    clipboards: [ClipboardSlot; CLIPBOARD_COUNT],
    two_tap_engaged: bool,
    two_tap_armed: Option<(Direction, Instant)>,
    switch_wait: Option<PendingSwitch>,
    wait_generation: u64,
    events: mpsc::UnboundedSender<ServerEvent>,
    reporter: Arc<dyn StatusReporter>,
}

impl Server {
    /// Builds a coordinator with the primary screen already attached and
    /// active.
    pub fn new(
        topology: TopologyMap,
        primary: Box<dyn Endpoint>,
        options: ServerOptions,
        reporter: Arc<dyn StatusReporter>,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Server {
        let primary_name = primary.name().to_string();
        let shape = primary
            .shape()
            .unwrap_or(span_core::domain::topology::ScreenShape {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
            });
        let mut endpoints: HashMap<String, Box<dyn Endpoint>> = HashMap::new();
        endpoints.insert(primary_name.clone(), primary);
        Server {
            options,
            topology,
            endpoints,
            active: primary_name.clone(),
            primary_name,
            x: shape.x + shape.width / 2,
            y: shape.y + shape.height / 2,
            enter_sequence: 0,
            toggle_mask: 0,
            buttons_down: 0,
            locked: false,
            screensaver_active: false,
            saved_position: None,
            clipboards: Default::default(),
            two_tap_engaged: false,
            two_tap_armed: None,
            switch_wait: None,
            wait_generation: 0,
            events,
            reporter,
        }
    }

    pub fn active_screen(&self) -> &str {
        &self.active
    }

    pub fn cursor(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Runs the event loop until [`ServerEvent::Shutdown`] or until all
    /// senders are gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        self.spawn_heartbeat();
        while let Some(event) = events.recv().await {
            let shutdown = matches!(event, ServerEvent::Shutdown);
            self.handle_event(event).await;
            if shutdown {
                break;
            }
        }
        info!("coordinator stopped");
    }

    fn spawn_heartbeat(&self) {
        if self.options.keep_alive_rate.is_zero() {
            return;
        }
        let rate = self.options.keep_alive_rate;
        let tx = self.events.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rate);
            // First tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(ServerEvent::HeartbeatTick).is_err() {
                    return;
                }
            }
        });
    }

    /// Applies one event. Public so tests can drive the coordinator
    /// without the channel plumbing.
    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Adopt(request) => self.handle_adopt(request).await,
            ServerEvent::FromClient {
                name,
                connection_id,
                message,
            } => self.handle_client_message(&name, connection_id, message).await,
            ServerEvent::ConnectionLost {
                name,
                connection_id,
                cause,
            } => {
                if self.connection_matches(&name, connection_id) {
                    self.remove_endpoint(&name, cause).await;
                }
            }
            ServerEvent::MouseMove { x, y } => self.on_primary_mouse_move(x, y).await,
            ServerEvent::MouseRelMove { dx, dy } => self.on_relative_move(dx, dy).await,
            ServerEvent::KeyDown { id, mask, button } => {
                self.toggle_mask = mask;
                self.relay(|ep| ep.key_down(id, mask, button));
            }
            ServerEvent::KeyRepeat {
                id,
                mask,
                count,
                button,
            } => self.relay(|ep| ep.key_repeat(id, mask, count, button)),
            ServerEvent::KeyUp { id, mask, button } => {
                self.toggle_mask = mask;
                self.relay(|ep| ep.key_up(id, mask, button));
            }
            ServerEvent::MouseDown { button } => {
                self.buttons_down += 1;
                self.relay(|ep| ep.mouse_down(button));
            }
            ServerEvent::MouseUp { button } => {
                self.buttons_down = self.buttons_down.saturating_sub(1);
                self.relay(|ep| ep.mouse_up(button));
            }
            ServerEvent::MouseWheel { dx, dy } => self.relay(|ep| ep.mouse_wheel(dx, dy)),
            ServerEvent::LocalClipboardGrab { id } => {
                let primary = self.primary_name.clone();
                self.on_clipboard_grab(&primary, id, 0, true);
            }
            ServerEvent::LocalClipboardData { id, data } => {
                let primary = self.primary_name.clone();
                let sequence = self.clipboards[id.index()].sequence();
                self.on_clipboard_data(&primary, id, sequence, data);
            }
            ServerEvent::Screensaver { active } => self.on_screensaver(active).await,
            ServerEvent::LockCursor { locked } => {
                self.locked = locked;
                if locked {
                    self.two_tap_armed = None;
                    self.two_tap_engaged = false;
                    self.cancel_switch_wait();
                }
            }
            ServerEvent::SwitchWaitExpired { generation } => {
                self.on_switch_wait_expired(generation).await;
            }
            ServerEvent::HeartbeatTick => self.on_heartbeat().await,
            ServerEvent::Shutdown => self.on_shutdown(),
        }
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    fn admission(&self, name: &str) -> Result<(), AdoptError> {
        if !self.topology.contains(name) {
            return Err(AdoptError::Unknown);
        }
        if self.endpoints.contains_key(name) {
            return Err(AdoptError::Busy);
        }
        Ok(())
    }

    /// Admits an already-built endpoint. Used by [`handle_adopt`] for real
    /// connections and by tests for recording doubles.
    ///
    /// [`handle_adopt`]: Server::handle_adopt
    ///
    /// # Errors
    ///
    /// [`AdoptError::Unknown`] for a name outside the topology and
    /// [`AdoptError::Busy`] for a name already connected.
    pub async fn attach_endpoint(
        &mut self,
        mut endpoint: Box<dyn Endpoint>,
    ) -> Result<(), AdoptError> {
        self.admission(endpoint.name())?;
        let name = endpoint.name().to_string();
        let version = endpoint.version();
        endpoint.request_info();
        endpoint.reset_options();
        let keep_alive_ms = self.options.keep_alive_rate.as_millis() as u32;
        endpoint.set_options(&[(msgs::OPT_KEEP_ALIVE_MS, keep_alive_ms)]);
        let was_ready = endpoint.is_ready();
        self.endpoints.insert(name.clone(), endpoint);
        self.reporter
            .report(StatusEvent::ScreenConnected {
                name: name.clone(),
                version,
            })
            .await;
        if was_ready {
            self.reporter.report(StatusEvent::ScreenReady { name }).await;
        }
        Ok(())
    }

    async fn handle_adopt(&mut self, request: AdoptRequest) {
        let AdoptRequest {
            name,
            connection_id,
            version,
            sink,
        } = request;
        let proxy = ClientProxy::new(name.clone(), connection_id, version, sink.clone());
        match self.attach_endpoint(Box::new(proxy)).await {
            Ok(()) => {}
            Err(reason) => {
                warn!(screen = %name, %reason, "refusing client");
                let fmt = match reason {
                    AdoptError::Busy => msgs::E_BUSY,
                    AdoptError::Unknown => msgs::E_UNKNOWN,
                };
                send_raw(&sink, fmt, &[]);
                // Dropping the sink closes the writer and the socket.
            }
        }
    }

    fn connection_matches(&self, name: &str, connection_id: u64) -> bool {
        self.endpoints
            .get(name)
            .is_some_and(|ep| ep.connection_id() == connection_id)
    }

    async fn remove_endpoint(&mut self, name: &str, cause: DisconnectCause) {
        let Some(_endpoint) = self.endpoints.remove(name) else {
            return;
        };
        for slot in &mut self.clipboards {
            slot.release_if_owned_by(name);
        }
        self.reporter
            .report(StatusEvent::ScreenDisconnected {
                name: name.to_string(),
                cause,
            })
            .await;
        if self.saved_position.as_ref().is_some_and(|s| s.screen == name) {
            self.saved_position = None;
        }
        if self.active == name {
            // The screen under the cursor vanished: bail out to the
            // primary screen, no veto possible.
            let primary = self.primary_name.clone();
            self.jump_to_screen(&primary, true).await;
        }
    }

    // ── Client messages ───────────────────────────────────────────────────────

    async fn handle_client_message(
        &mut self,
        name: &str,
        connection_id: u64,
        message: ClientMessage,
    ) {
        if !self.connection_matches(name, connection_id) {
            debug!(screen = %name, "message from superseded connection, ignoring");
            return;
        }
        let now = Instant::now();
        if let Some(endpoint) = self.endpoints.get_mut(name) {
            endpoint.touch(now);
        }
        match message {
            ClientMessage::Info {
                shape, jump_zone, ..
            } => {
                let Some(endpoint) = self.endpoints.get_mut(name) else {
                    return;
                };
                let was_ready = endpoint.is_ready();
                endpoint.handle_info(shape, jump_zone);
                if !was_ready {
                    self.reporter
                        .report(StatusEvent::ScreenReady {
                            name: name.to_string(),
                        })
                        .await;
                }
                // If the active screen shrank out from under the cursor,
                // pull the cursor back inside.
                if self.active == name && !shape.contains(self.x, self.y) {
                    self.x = self.x.clamp(shape.x, shape.right());
                    self.y = self.y.clamp(shape.y, shape.bottom());
                    let (x, y) = (self.x as i16, self.y as i16);
                    if let Some(endpoint) = self.endpoints.get_mut(name) {
                        endpoint.mouse_move(x, y);
                    }
                }
            }
            ClientMessage::ClipboardGrab { id, sequence } => {
                self.on_clipboard_grab(name, id, sequence, false);
            }
            ClientMessage::ClipboardData { id, sequence, data } => {
                self.on_clipboard_data(name, id, sequence, data);
            }
            ClientMessage::KeepAlive | ClientMessage::Noop => {}
            ClientMessage::Close => {
                self.remove_endpoint(name, DisconnectCause::Closed).await;
            }
        }
    }

    // ── Clipboard ─────────────────────────────────────────────────────────────

    fn on_clipboard_grab(&mut self, owner: &str, id: ClipboardId, sequence: u32, from_primary: bool) {
        if !self.clipboards[id.index()].try_grab(owner, sequence, from_primary) {
            debug!(screen = %owner, %id, sequence, "stale clipboard grab ignored");
            return;
        }
        debug!(screen = %owner, %id, "clipboard grabbed");
        for (name, endpoint) in self.endpoints.iter_mut() {
            if name == owner {
                endpoint.set_clipboard_dirty(id, false);
            } else {
                endpoint.set_clipboard_dirty(id, true);
                endpoint.grab_clipboard(id);
            }
        }
    }

    fn on_clipboard_data(&mut self, sender: &str, id: ClipboardId, sequence: u32, data: Vec<u8>) {
        match self.clipboards[id.index()].try_update(sequence, data) {
            ClipboardUpdate::Stale => {
                debug!(screen = %sender, %id, sequence, "stale clipboard data dropped");
            }
            ClipboardUpdate::Unchanged => {
                if let Some(endpoint) = self.endpoints.get_mut(sender) {
                    endpoint.set_clipboard_dirty(id, false);
                }
            }
            ClipboardUpdate::Updated => {
                for (name, endpoint) in self.endpoints.iter_mut() {
                    endpoint.set_clipboard_dirty(id, name != sender);
                }
                // The screen under the cursor gets the new contents right
                // away; everyone else when the cursor next visits.
                if self.active != sender {
                    let slot = &self.clipboards[id.index()];
                    if let (Some(data), Some(endpoint)) =
                        (slot.data(), self.endpoints.get_mut(&self.active))
                    {
                        if endpoint.clipboard_dirty(id) {
                            endpoint.set_clipboard(id, slot.sequence(), data);
                            endpoint.set_clipboard_dirty(id, false);
                        }
                    }
                }
            }
        }
    }

    // ── Cursor movement and switching ─────────────────────────────────────────

    async fn on_primary_mouse_move(&mut self, x: i32, y: i32) {
        if self.active != self.primary_name {
            // Absolute positions are meaningless while relaying; the
            // capture layer sends deltas in that state.
            return;
        }
        self.x = x;
        self.y = y;
        if self.screensaver_active {
            return;
        }
        let Some(endpoint) = self.endpoints.get(&self.primary_name) else {
            return;
        };
        let Some(shape) = endpoint.shape() else {
            return;
        };
        let zone = i32::from(endpoint.jump_zone()).max(1);
        let dir = if x <= shape.x + zone - 1 {
            Some(Direction::Left)
        } else if x >= shape.right() - zone + 1 {
            Some(Direction::Right)
        } else if y <= shape.y + zone - 1 {
            Some(Direction::Top)
        } else if y >= shape.bottom() - zone + 1 {
            Some(Direction::Bottom)
        } else {
            None
        };
        match dir {
            Some(dir) => self.try_switch(dir, x, y).await,
            None => {
                self.two_tap_engaged = false;
                self.cancel_switch_wait();
            }
        }
    }

    async fn on_relative_move(&mut self, dx: i32, dy: i32) {
        if self.active == self.primary_name {
            return;
        }
        let Some(endpoint) = self.endpoints.get(&self.active) else {
            return;
        };
        let Some(shape) = endpoint.shape() else {
            return;
        };

        let nx = self.x + dx;
        let ny = self.y + dy;

        // While dragging, capable clients get raw deltas so grabs and
        // pointer-lock applications on the far side track correctly.
        if self.options.relative_mouse_moves && self.buttons_down > 0 {
            self.x = nx.clamp(shape.x, shape.right());
            self.y = ny.clamp(shape.y, shape.bottom());
            let (dx16, dy16) = (dx as i16, dy as i16);
            if let Some(endpoint) = self.endpoints.get_mut(&self.active) {
                if endpoint.mouse_relative_move(dx16, dy16) {
                    return;
                }
                let (x, y) = (self.x as i16, self.y as i16);
                endpoint.mouse_move(x, y);
            }
            return;
        }

        let dir = if nx < shape.x {
            Some(Direction::Left)
        } else if nx > shape.right() {
            Some(Direction::Right)
        } else if ny < shape.y {
            Some(Direction::Top)
        } else if ny > shape.bottom() {
            Some(Direction::Bottom)
        } else {
            None
        };

        let cx = nx.clamp(shape.x, shape.right());
        let cy = ny.clamp(shape.y, shape.bottom());

        match dir {
            None => {
                self.two_tap_engaged = false;
                self.cancel_switch_wait();
                self.x = nx;
                self.y = ny;
                let (x, y) = (nx as i16, ny as i16);
                if let Some(endpoint) = self.endpoints.get_mut(&self.active) {
                    endpoint.mouse_move(x, y);
                }
            }
            Some(dir) => {
                let before = self.active.clone();
                self.try_switch(dir, cx, cy).await;
                if self.active == before {
                    // No switch: the cursor sticks to the edge.
                    self.x = cx;
                    self.y = cy;
                    let (x, y) = (cx as i16, cy as i16);
                    if let Some(endpoint) = self.endpoints.get_mut(&self.active) {
                        endpoint.mouse_move(x, y);
                    }
                }
            }
        }
    }

    fn resolve_neighbor(&self, from: &str, dir: Direction) -> Option<String> {
        let connected = |name: &str| {
            self.endpoints
                .get(name)
                .is_some_and(|endpoint| endpoint.is_ready())
        };
        self.topology
            .neighbor(from, dir, connected)
            .map(str::to_string)
    }

    async fn try_switch(&mut self, dir: Direction, x: i32, y: i32) {
        let Some(target) = self.resolve_neighbor(&self.active, dir) else {
            return;
        };
        if !self.switch_gates_pass(dir, x, y) {
            return;
        }
        self.switch_screen(&target, dir, x, y).await;
    }

    /// The lock, two-tap, and dwell-delay gates, in that order.
    fn switch_gates_pass(&mut self, dir: Direction, x: i32, y: i32) -> bool {
        if self.locked || self.buttons_down > 0 {
            self.two_tap_armed = None;
            self.two_tap_engaged = false;
            self.cancel_switch_wait();
            return false;
        }

        if !self.options.switch_two_tap.is_zero() {
            if self.two_tap_engaged {
                // Still the same contact with the edge; not a new tap.
                return false;
            }
            self.two_tap_engaged = true;
            let now = Instant::now();
            let passed = matches!(
                self.two_tap_armed,
                Some((armed_dir, deadline)) if armed_dir == dir && now <= deadline
            );
            if !passed {
                self.two_tap_armed = Some((dir, now + self.options.switch_two_tap));
                debug!(dir = dir.name(), "two-tap armed");
                return false;
            }
            self.two_tap_armed = None;
        }

        if !self.options.switch_delay.is_zero() {
            match &mut self.switch_wait {
                Some(pending) if pending.dir == dir => {
                    // Timer already running; remember the latest position.
                    pending.x = x;
                    pending.y = y;
                }
                _ => self.start_switch_wait(dir, x, y),
            }
            return false;
        }

        true
    }

    fn start_switch_wait(&mut self, dir: Direction, x: i32, y: i32) {
        self.wait_generation += 1;
        let generation = self.wait_generation;
        self.switch_wait = Some(PendingSwitch {
            dir,
            x,
            y,
            generation,
        });
        let delay = self.options.switch_delay;
        let tx = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ServerEvent::SwitchWaitExpired { generation });
        });
        debug!(dir = dir.name(), ?delay, "switch wait started");
    }

    fn cancel_switch_wait(&mut self) {
        if self.switch_wait.take().is_some() {
            // Invalidate the in-flight timer.
            self.wait_generation += 1;
        }
    }

    async fn on_switch_wait_expired(&mut self, generation: u64) {
        let Some(pending) = self.switch_wait.take() else {
            return;
        };
        if pending.generation != generation {
            self.switch_wait = Some(pending);
            return;
        }
        // Re-resolve: the neighbor set may have changed while waiting.
        let Some(target) = self.resolve_neighbor(&self.active, pending.dir) else {
            return;
        };
        if self.locked || self.buttons_down > 0 {
            return;
        }
        self.switch_screen(&target, pending.dir, pending.x, pending.y).await;
    }

    /// Jumps the cursor across `dir` into `to`, remapping the position
    /// fractionally. The cursor lands exactly on the crossed edge, except
    /// when that edge's jump zone on the destination is armed and would
    /// bounce it straight back: that happens only on the primary (which
    /// watches its own edges) and only when the crossed edge has a
    /// configured neighbor, and then the cursor is nudged just inside.
    async fn switch_screen(&mut self, to: &str, dir: Direction, x: i32, y: i32) {
        if to == self.active {
            return;
        }
        let (Some(src_shape), Some(dst)) = (
            self.endpoints.get(&self.active).and_then(|e| e.shape()),
            self.endpoints.get(to),
        ) else {
            return;
        };
        let Some(dst_shape) = dst.shape() else {
            return;
        };
        let zone = if to == self.primary_name && self.topology.has_neighbor(to, dir.opposite()) {
            i32::from(dst.jump_zone()).max(1)
        } else {
            0
        };
        let fraction = map_to_fraction(&src_shape, dir, x, y);
        let along = map_to_pixel(&dst_shape, dir, fraction);
        let (nx, ny) = match dir {
            Direction::Left => (
                dst_shape.right() - zone,
                along.clamp(dst_shape.y, dst_shape.bottom()),
            ),
            Direction::Right => (
                dst_shape.x + zone,
                along.clamp(dst_shape.y, dst_shape.bottom()),
            ),
            Direction::Top => (
                along.clamp(dst_shape.x, dst_shape.right()),
                dst_shape.bottom() - zone,
            ),
            Direction::Bottom => (
                along.clamp(dst_shape.x, dst_shape.right()),
                dst_shape.y + zone,
            ),
        };
        self.complete_switch(to, nx, ny, false).await;
    }

    /// Jumps straight to a screen's centre (disconnect bail-out).
    async fn jump_to_screen(&mut self, to: &str, force: bool) {
        let Some(shape) = self.endpoints.get(to).and_then(|e| e.shape()) else {
            return;
        };
        let nx = shape.x + shape.width / 2;
        let ny = shape.y + shape.height / 2;
        self.complete_switch(to, nx, ny, force).await;
    }

    async fn complete_switch(&mut self, to: &str, nx: i32, ny: i32, force: bool) {
        if to == self.active {
            return;
        }
        if let Some(current) = self.endpoints.get_mut(&self.active) {
            if !current.leave() && !force {
                debug!(from = %self.active, %to, "switch vetoed by active screen");
                return;
            }
        }

        // Leaving the primary: read its locally owned clipboards now, so
        // the destination gets current contents rather than a stale cache.
        if self.active == self.primary_name {
            let primary = self.primary_name.clone();
            for id in ClipboardId::ALL {
                let slot = &self.clipboards[id.index()];
                if slot.owner() != Some(primary.as_str()) {
                    continue;
                }
                let sequence = slot.sequence();
                let Some(data) = self
                    .endpoints
                    .get_mut(&primary)
                    .and_then(|endpoint| endpoint.read_clipboard(id))
                else {
                    continue;
                };
                self.on_clipboard_data(&primary, id, sequence, data);
            }
        }

        self.enter_sequence += 1;
        let sequence = self.enter_sequence;
        let toggle_mask = self.toggle_mask;
        if let Some(destination) = self.endpoints.get_mut(to) {
            destination.enter(nx as i16, ny as i16, sequence, toggle_mask);
        }

        // Clipboards the destination has not seen yet follow the enter,
        // so the client can order them against its new enter sequence.
        for id in ClipboardId::ALL {
            let slot = &self.clipboards[id.index()];
            let Some(data) = slot.data() else {
                continue;
            };
            let slot_sequence = slot.sequence();
            if let Some(destination) = self.endpoints.get_mut(to) {
                if destination.clipboard_dirty(id) {
                    destination.set_clipboard(id, slot_sequence, data);
                    destination.set_clipboard_dirty(id, false);
                }
            }
        }

        let from = std::mem::replace(&mut self.active, to.to_string());
        self.x = nx;
        self.y = ny;
        self.two_tap_engaged = false;
        self.two_tap_armed = None;
        self.cancel_switch_wait();

        self.reporter
            .report(StatusEvent::ActiveScreenChanged {
                from,
                to: to.to_string(),
            })
            .await;
    }

    // ── Input relay ───────────────────────────────────────────────────────────

    /// Applies `f` to the active endpoint when a secondary screen is
    /// active. While the primary is active the hardware already delivers
    /// input locally.
    fn relay<F: FnOnce(&mut Box<dyn Endpoint>)>(&mut self, f: F) {
        if self.active == self.primary_name {
            return;
        }
        if let Some(endpoint) = self.endpoints.get_mut(&self.active) {
            f(endpoint);
        }
    }

    // ── Screensaver ───────────────────────────────────────────────────────────

    async fn on_screensaver(&mut self, active: bool) {
        self.screensaver_active = active;
        if active {
            if self.active != self.primary_name {
                self.saved_position = Some(SavedPosition {
                    screen: self.active.clone(),
                    x: self.x,
                    y: self.y,
                });
                let primary = self.primary_name.clone();
                self.jump_to_screen(&primary, true).await;
            }
        } else if let Some(saved) = self.saved_position.take() {
            if self
                .endpoints
                .get(&saved.screen)
                .is_some_and(|endpoint| endpoint.is_ready())
            {
                self.return_to_position(saved).await;
            }
        }
        if self.options.screensaver_sync {
            let primary = self.primary_name.clone();
            for (name, endpoint) in self.endpoints.iter_mut() {
                if *name != primary {
                    endpoint.screensaver(active);
                }
            }
            self.reporter
                .report(StatusEvent::ScreensaverChanged { active })
                .await;
        }
    }

    /// Puts the cursor back where it was when the screensaver kicked in,
    /// clamped out of the jump zone of the (possibly resized) screen.
    async fn return_to_position(&mut self, saved: SavedPosition) {
        let Some(endpoint) = self.endpoints.get(&saved.screen) else {
            return;
        };
        let Some(shape) = endpoint.shape() else {
            return;
        };
        let zone = i32::from(endpoint.jump_zone()).max(1);
        let x = saved.x.min(shape.right() - zone).max(shape.x + zone);
        let y = saved.y.min(shape.bottom() - zone).max(shape.y + zone);
        self.complete_switch(&saved.screen, x, y, false).await;
    }

    // ── Liveness ──────────────────────────────────────────────────────────────

    async fn on_heartbeat(&mut self) {
        let now = Instant::now();
        let timeout = self
            .options
            .keep_alive_rate
            .mul_f64(msgs::KEEP_ALIVES_UNTIL_DEATH);
        let mut dead = Vec::new();
        for (name, endpoint) in self.endpoints.iter_mut() {
            if !endpoint.wants_keep_alive() {
                continue;
            }
            if now.duration_since(endpoint.last_heard()) > timeout {
                dead.push(name.clone());
            } else {
                endpoint.send_keep_alive();
            }
        }
        for name in dead {
            warn!(screen = %name, "no keep-alive answer, disconnecting");
            self.remove_endpoint(&name, DisconnectCause::Unresponsive).await;
        }
    }

    fn on_shutdown(&mut self) {
        for (name, endpoint) in self.endpoints.iter_mut() {
            if *name != self.primary_name {
                endpoint.close();
            }
        }
    }
}

/// Encodes and posts a message on a raw sink, for replies to connections
/// that never became endpoints.
fn send_raw(sink: &mpsc::UnboundedSender<Vec<u8>>, fmt: &str, args: &[Item<'_>]) {
    let mut frame = Vec::new();
    if writef(&mut frame, fmt, args).is_ok() {
        let _ = sink.send(frame);
    }
}

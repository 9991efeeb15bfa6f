//! TOML-based server configuration.
//!
//! A config file names the server's own screen, the listen address, the
//! switch behaviour options, and every screen in the topology with its
//! directional links.  Example:
//!
//! ```toml
//! [server]
//! name = "desk"
//! bind_address = "0.0.0.0"
//! port = 24800
//!
//! [options]
//! switch_delay_ms = 250
//! switch_two_tap_ms = 0
//! keep_alive_rate_secs = 3.0
//! relative_mouse_moves = false
//!
//! [[screens]]
//! name = "desk"
//! [screens.links]
//! right = "laptop"
//!
//! [[screens]]
//! name = "laptop"
//! [screens.links]
//! left = "desk"
//! ```
//!
//! Links are directed: `right = "laptop"` only wires desk→laptop; the
//! reverse edge must be declared on the laptop entry.  A screen may be
//! configured here long before its client ever connects.
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return
//! value of `some_fn()` when the field is absent from the TOML file, so a
//! minimal config with just a server name and screens works out of the box.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use span_core::domain::topology::{Direction, TopologyError, TopologyMap};
use span_core::protocol::msgs::{DEFAULT_PORT, KEEP_ALIVE_RATE};
use span_core::protocol::version::ProtocolVersion;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The `[server] name` is not listed under `[[screens]]`.
    #[error("server screen \"{0}\" is not declared in [[screens]]")]
    ServerScreenMissing(String),

    /// The `minimum_protocol` string did not parse or is out of range.
    #[error("bad minimum_protocol: {0}")]
    BadMinimumProtocol(String),

    /// A duplicate screen or a link to an undeclared screen.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub options: OptionsSection,
    #[serde(default)]
    pub screens: Vec<ScreenEntry>,
}

/// Identity and listen settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// The name of the screen this server's own monitor appears as in the
    /// topology.
    pub name: String,
    /// IP address to bind the listener to.  `"0.0.0.0"` binds all
    /// interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Oldest protocol version a client may connect with, as
    /// `"major.minor"`.  Anything older is refused during handshake.
    #[serde(default = "default_minimum_protocol")]
    pub minimum_protocol: String,
}

/// Switch behaviour and liveness options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionsSection {
    /// Milliseconds the cursor must dwell in a jump zone before a switch
    /// happens.  0 disables the delay.
    #[serde(default)]
    pub switch_delay_ms: u64,
    /// Window in milliseconds for the tap-twice-on-the-edge gesture.
    /// 0 disables the gesture and edges switch on first contact.
    #[serde(default)]
    pub switch_two_tap_ms: u64,
    /// Seconds between keep-alives to v1.3+ clients.  A client silent for
    /// three times this long is disconnected as unresponsive.
    #[serde(default = "default_keep_alive_rate")]
    pub keep_alive_rate_secs: f64,
    /// Ask capable clients for relative mouse deltas while a button is
    /// held, so grabs and games on the far side track correctly.
    #[serde(default)]
    pub relative_mouse_moves: bool,
    /// Forward the server's screensaver state to all clients.
    #[serde(default = "default_true")]
    pub screensaver_sync: bool,
}

/// One screen in the topology and its outgoing links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenEntry {
    pub name: String,
    #[serde(default)]
    pub links: LinksEntry,
}

/// Outgoing links of one screen.  Each field names the screen on the
/// other side of that edge, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinksEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom: Option<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_minimum_protocol() -> String {
    ProtocolVersion::OLDEST.to_string()
}
fn default_keep_alive_rate() -> f64 {
    KEEP_ALIVE_RATE
}
fn default_true() -> bool {
    true
}

impl Default for OptionsSection {
    fn default() -> Self {
        Self {
            switch_delay_ms: 0,
            switch_two_tap_ms: 0,
            keep_alive_rate_secs: default_keep_alive_rate(),
            relative_mouse_moves: false,
            screensaver_sync: default_true(),
        }
    }
}

// ── Loading and validation ────────────────────────────────────────────────────

impl ServerConfig {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors,
    /// [`ConfigError::Parse`] for malformed TOML, and the validation
    /// variants for a config that parses but cannot describe a runnable
    /// server.
    pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses config text (used by tests and by `load`).
    pub fn from_toml(content: &str) -> Result<ServerConfig, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.screens.iter().any(|s| s.name == self.server.name) {
            return Err(ConfigError::ServerScreenMissing(self.server.name.clone()));
        }
        self.minimum_protocol()?;
        self.build_topology()?;
        Ok(())
    }

    /// The parsed minimum protocol version, clamped to what we speak.
    ///
    /// A configured minimum above [`ProtocolVersion::CURRENT`] would make
    /// the server refuse every client it could actually serve, so it is
    /// clamped down with a warning.
    pub fn minimum_protocol(&self) -> Result<ProtocolVersion, ConfigError> {
        let minimum: ProtocolVersion = self
            .server
            .minimum_protocol
            .parse()
            .map_err(|_| ConfigError::BadMinimumProtocol(self.server.minimum_protocol.clone()))?;
        if minimum > ProtocolVersion::CURRENT {
            tracing::warn!(
                configured = %minimum,
                speaking = %ProtocolVersion::CURRENT,
                "minimum_protocol is newer than this server speaks; clamping",
            );
            return Ok(ProtocolVersion::CURRENT);
        }
        Ok(minimum)
    }

    /// Builds the topology graph from the `[[screens]]` entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Topology`] for duplicate screens or links
    /// naming undeclared screens.
    pub fn build_topology(&self) -> Result<TopologyMap, ConfigError> {
        let mut map = TopologyMap::new();
        for screen in &self.screens {
            map.add_screen(&screen.name)?;
        }
        for screen in &self.screens {
            let links = [
                (Direction::Left, &screen.links.left),
                (Direction::Right, &screen.links.right),
                (Direction::Top, &screen.links.top),
                (Direction::Bottom, &screen.links.bottom),
            ];
            for (dir, target) in links {
                if let Some(target) = target {
                    map.link(&screen.name, dir, target)?;
                }
            }
        }
        Ok(map)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Clipboard ownership and staleness tracking.
//!
//! Each shared clipboard is a slot with an owner, a sequence number, and
//! (optionally) cached contents. The sequence number is the enter-sequence
//! current when the owning screen was last entered; it orders grabs and
//! data from different screens so that a slow client cannot overwrite a
//! newer grab with stale contents.

use std::fmt;

/// Number of shared clipboards: the main clipboard and the primary
/// selection.
pub const CLIPBOARD_COUNT: usize = 2;

/// Identifies one of the shared clipboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipboardId {
    /// The ordinary copy/paste clipboard.
    System,
    /// The X11-style select-to-copy selection.
    Selection,
}

impl ClipboardId {
    pub const ALL: [ClipboardId; CLIPBOARD_COUNT] = [ClipboardId::System, ClipboardId::Selection];

    /// Wire representation (`%1i` in `CCLP`/`DCLP`).
    pub fn to_wire(self) -> u8 {
        match self {
            ClipboardId::System => 0,
            ClipboardId::Selection => 1,
        }
    }

    pub fn from_wire(id: u8) -> Option<ClipboardId> {
        match id {
            0 => Some(ClipboardId::System),
            1 => Some(ClipboardId::Selection),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self.to_wire() as usize
    }
}

impl fmt::Display for ClipboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipboardId::System => write!(f, "system"),
            ClipboardId::Selection => write!(f, "selection"),
        }
    }
}

/// Outcome of offering new contents to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardUpdate {
    /// Contents accepted and they differ from what was cached.
    Updated,
    /// Contents accepted but byte-identical to the cache; no rebroadcast
    /// is needed.
    Unchanged,
    /// The offer carried an older sequence number and was dropped.
    Stale,
}

/// One shared clipboard slot.
#[derive(Debug, Clone, Default)]
pub struct ClipboardSlot {
    owner: Option<String>,
    sequence: u32,
    data: Option<Vec<u8>>,
}

impl ClipboardSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Cached contents, if any screen has sent them since the last grab.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Records that `owner` grabbed this clipboard at `sequence`.
    ///
    /// The primary screen always reports sequence 0 and always wins; a
    /// secondary's grab is honored only if its sequence is not older than
    /// the current one. An accepted grab invalidates the cached contents
    /// until the new owner sends them — even when the owner is unchanged,
    /// since a regrab means new contents.
    ///
    /// Returns `true` if the grab was accepted, `false` if it was stale.
    pub fn try_grab(&mut self, owner: &str, sequence: u32, from_primary: bool) -> bool {
        if !from_primary && sequence < self.sequence {
            return false;
        }
        if !from_primary {
            self.sequence = sequence;
        }
        self.owner = Some(owner.to_string());
        self.data = None;
        true
    }

    /// Offers contents tagged with `sequence` to the slot.
    pub fn try_update(&mut self, sequence: u32, data: Vec<u8>) -> ClipboardUpdate {
        if sequence < self.sequence {
            return ClipboardUpdate::Stale;
        }
        if self.data.as_deref() == Some(data.as_slice()) {
            return ClipboardUpdate::Unchanged;
        }
        self.data = Some(data);
        ClipboardUpdate::Updated
    }

    /// Drops ownership if `name` currently holds it (the screen went away).
    pub fn release_if_owned_by(&mut self, name: &str) {
        if self.owner.as_deref() == Some(name) {
            self.owner = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_takes_ownership_and_clears_cache() {
        let mut slot = ClipboardSlot::new();
        slot.try_update(0, b"old".to_vec());
        assert!(slot.try_grab("laptop", 5, false));
        assert_eq!(slot.owner(), Some("laptop"));
        assert_eq!(slot.data(), None);
        assert_eq!(slot.sequence(), 5);
    }

    #[test]
    fn test_stale_grab_from_secondary_is_ignored() {
        let mut slot = ClipboardSlot::new();
        slot.try_grab("desk", 10, false);
        assert!(!slot.try_grab("laptop", 4, false));
        assert_eq!(slot.owner(), Some("desk"));
    }

    #[test]
    fn test_primary_grab_always_wins() {
        let mut slot = ClipboardSlot::new();
        slot.try_grab("laptop", 10, false);
        // the primary reports sequence 0 but outranks any secondary
        assert!(slot.try_grab("desk", 0, true));
        assert_eq!(slot.owner(), Some("desk"));
        assert_eq!(slot.sequence(), 10, "primary grabs keep the sequence");
    }

    #[test]
    fn test_regrab_by_same_owner_invalidates_cache() {
        let mut slot = ClipboardSlot::new();
        assert!(slot.try_grab("desk", 1, false));
        slot.try_update(1, b"first".to_vec());
        assert!(slot.try_grab("desk", 2, false));
        assert_eq!(slot.data(), None);
    }

    #[test]
    fn test_stale_data_is_dropped() {
        let mut slot = ClipboardSlot::new();
        slot.try_grab("desk", 8, false);
        assert_eq!(slot.try_update(3, b"late".to_vec()), ClipboardUpdate::Stale);
        assert_eq!(slot.data(), None);
    }

    #[test]
    fn test_identical_data_reports_unchanged() {
        let mut slot = ClipboardSlot::new();
        assert_eq!(slot.try_update(1, b"x".to_vec()), ClipboardUpdate::Updated);
        assert_eq!(slot.try_update(2, b"x".to_vec()), ClipboardUpdate::Unchanged);
        assert_eq!(slot.try_update(2, b"y".to_vec()), ClipboardUpdate::Updated);
    }

    #[test]
    fn test_release_only_affects_current_owner() {
        let mut slot = ClipboardSlot::new();
        slot.try_grab("desk", 1, false);
        slot.release_if_owned_by("laptop");
        assert_eq!(slot.owner(), Some("desk"));
        slot.release_if_owned_by("desk");
        assert_eq!(slot.owner(), None);
    }

    #[test]
    fn test_wire_ids_roundtrip() {
        for id in ClipboardId::ALL {
            assert_eq!(ClipboardId::from_wire(id.to_wire()), Some(id));
        }
        assert_eq!(ClipboardId::from_wire(7), None);
    }
}

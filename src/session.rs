//! Per-client session state.
//!
//! A session owns everything the server knows about one client: the
//! handshake state, the negotiated format and feature flags, the three
//! accounting regions, the adaptive state, and the queue of unacknowledged
//! datagram updates. It owns no socket; the caller pairs it with whatever
//! stream the connection arrived on.

use crate::adaptive::Adaptive;
use crate::protocol::{Encoding, PixelFormat, Version};
use crate::region::{Rect, Region};
use crate::unacked::UnackedQueue;

/// Handshake and dispatch state of a connection.
///
/// ```text
/// ProtocolVersion -> SecurityType (3.7+) | Initialisation (3.3)
/// SecurityType -> TunnelingType (tight) | Initialisation
/// TunnelingType -> AuthType -> Authentication -> Initialisation
/// Initialisation -> Normal
/// any state -> Closed on error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    ProtocolVersion,
    SecurityType,
    TunnelingType,
    AuthType,
    Authentication,
    Initialisation,
    Normal,
    Closed,
}

#[derive(Debug, Default)]
pub struct Stats {
    pub update_requests: u64,
    pub key_events: u64,
    pub pointer_events: u64,
    pub cut_texts: u64,
    pub updates_sent: u64,
    pub bytes_sent: u64,
    pub acks_received: u64,
}

#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub state: State,
    pub version: Version,
    pub tight_extensions: bool,
    pub reverse_connection: bool,
    /// The one session eligible for server push.
    pub primary: bool,
    pub view_only: bool,
    pub shared: bool,

    pub format: PixelFormat,
    pub ready_for_colour_map: bool,

    pub preferred_encoding: Encoding,
    pub use_copy_rect: bool,
    pub cursor_shape_updates: bool,
    pub rich_cursor: bool,
    pub cursor_pos_updates: bool,
    pub last_rect_encoding: bool,
    pub zlib_compress_level: u8,
    pub tight_compress_level: u8,
    /// -1 until the client requests a quality level; the adaptive
    /// controller then keeps it inside its own clamp range.
    pub tight_quality_level: i32,

    pub cursor_x: i32,
    pub cursor_y: i32,
    pub cursor_was_changed: bool,
    pub cursor_was_moved: bool,

    /// Pixels known to have changed since the last update.
    pub modified: Region,
    /// Pixels whose new value is a translated copy of an earlier value.
    pub copy: Region,
    /// Pixels the client has asked to receive.
    pub requested: Region,
    pub copy_delta: (i32, i32),

    pub update_request_count: u32,
    pub push_mode: bool,
    pub use_datagram: bool,
    pub last_update: u64,
    pub last_event_id: u32,

    pub adaptive: Adaptive,
    pub unacked: UnackedQueue,
    pub stats: Stats,
}

impl Session {
    pub fn new(
        id: u32,
        width: u16,
        height: u16,
        format: PixelFormat,
        push_interval: u64,
        tick_interval: u64,
        now: u64,
    ) -> Session {
        Session {
            id,
            state: State::ProtocolVersion,
            version: Version::Rfb38,
            tight_extensions: false,
            reverse_connection: false,
            primary: false,
            view_only: false,
            shared: false,
            format,
            ready_for_colour_map: false,
            preferred_encoding: Encoding::Raw,
            use_copy_rect: false,
            cursor_shape_updates: false,
            rich_cursor: false,
            cursor_pos_updates: false,
            last_rect_encoding: false,
            zlib_compress_level: 5,
            tight_compress_level: 6,
            tight_quality_level: -1,
            cursor_x: 0,
            cursor_y: 0,
            cursor_was_changed: false,
            cursor_was_moved: false,
            // A new client owes the whole screen.
            modified: Region::from_rect(Rect::new(0, 0, i32::from(width), i32::from(height))),
            copy: Region::new(),
            requested: Region::new(),
            copy_delta: (0, 0),
            update_request_count: 0,
            push_mode: false,
            use_datagram: false,
            last_update: 0,
            last_event_id: 0,
            adaptive: Adaptive::new(push_interval, tick_interval, now),
            unacked: UnackedQueue::new(),
            stats: Stats::default(),
        }
    }

    pub fn mark_modified(&mut self, rect: Rect) {
        self.modified.add_rect(rect);
    }

    /// Records that `dst` now holds pixels copied from `dst` translated by
    /// `(-dx, -dy)`. Only one copy delta can be pending; when a new copy
    /// conflicts with the in-flight one, the pending copy is folded into
    /// the modified region and re-encoded instead.
    pub fn mark_copy(&mut self, dst: Rect, dx: i32, dy: i32) {
        if !self.copy.is_empty() && self.copy_delta != (dx, dy) {
            self.modified = self.modified.union(&self.copy);
            self.copy.clear();
        }
        self.copy.add_rect(dst);
        self.copy_delta = (dx, dy);
    }

    /// Records an update request. A non-incremental request means the
    /// client lost its copy of the area: it must be fully re-sent, and
    /// cannot serve as a CopyRect destination.
    pub fn add_requested(&mut self, rect: Rect, incremental: bool) {
        self.requested.add_rect(rect);
        if !incremental {
            self.modified.add_rect(rect);
            self.copy = self.copy.subtract(&Region::from_rect(rect));
        }
    }

    /// Whether anything is owed to this client.
    pub fn update_pending(&self) -> bool {
        (self.cursor_shape_updates && self.cursor_was_changed)
            || (self.cursor_pos_updates && self.cursor_was_moved)
            || !self.copy.is_empty()
            || !self.modified.is_empty()
    }

    pub fn record_pointer(&mut self, x: u16, y: u16) {
        let (x, y) = (i32::from(x), i32::from(y));
        if (x, y) != (self.cursor_x, self.cursor_y) {
            self.cursor_x = x;
            self.cursor_y = y;
            self.cursor_was_moved = true;
        }
    }
}

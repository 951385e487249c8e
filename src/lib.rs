//! Server side of the RFB (VNC) protocol with an adaptive update pipeline.
//!
//! Framebuffer updates are streamed to clients either on demand over the
//! reliable control stream (pull mode) or, once a client has proven itself
//! interactive, pushed over an unreliable datagram channel as
//! sequence-numbered, acknowledged updates (push mode). Lost updates are not
//! resent byte-for-byte; their regions fall back into the client's modified
//! region and are re-encoded from current pixel state on the next push.

mod adaptive;
mod region;
mod session;
mod unacked;

pub mod display;
pub mod encoder;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod update;

pub use adaptive::Adaptive;
pub use protocol::{Encoding, PixelFormat, Version};
pub use region::{Rect, Region};
pub use server::Server;
pub use session::{Session, State, Stats};
pub use unacked::{UnackedEntry, UnackedQueue};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent something the protocol does not allow here.
    #[error("unexpected {0}")]
    Unexpected(&'static str),

    /// The peer went away in the middle of a message boundary.
    #[error("client disconnected")]
    Disconnected,

    /// An update exceeded the datagram payload ceiling. The recursive
    /// splitter guarantees this cannot happen for well-behaved callers.
    #[error("datagram payload of {0} bytes exceeds the configured maximum")]
    DatagramTooLarge(usize),

    /// Only part of a datagram was accepted by the socket.
    #[error("datagram send truncated to {0} of {1} bytes")]
    DatagramTruncated(usize, usize),

    /// The sharing policy refused this connection.
    #[error("sharing policy refused the connection")]
    PolicyRefused,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Tunables for a [`Server`].
///
/// The defaults reproduce the behaviour of the reference deployment: 66 ms
/// initial push cadence, datagram payloads capped just under two Ethernet
/// frames, and a client promoted from pull to push mode after ten update
/// requests.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the served desktop, embedded in the ServerInit message.
    pub desktop_name: String,
    /// Host name reported in the ServerInit message.
    pub host_name: String,
    /// Display number reported in the ServerInit message.
    pub display: String,
    /// Login name of the serving user, if known.
    pub user_name: Option<String>,
    /// Initial minimum interval between pushed frames, in milliseconds.
    pub push_interval: u64,
    /// Throughput sampling window, in milliseconds.
    pub tick_interval: u64,
    /// UDP port updates are pushed to on the client's address.
    pub datagram_port: u16,
    /// Hard ceiling on a single datagram payload.
    pub max_update_size: usize,
    /// Number of update requests after which the primary client is switched
    /// from pull mode to server push.
    pub pull_threshold: u32,
    /// Ignore all input events from every client.
    pub view_only: bool,
    /// Treat every client as if it had requested a shared session.
    pub always_shared: bool,
    /// Never share, regardless of what clients request.
    pub never_shared: bool,
    /// When a non-shared client connects, refuse it instead of disconnecting
    /// the established clients.
    pub dont_disconnect: bool,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            desktop_name: String::from("x11"),
            host_name: String::from("localhost"),
            display: String::from("0"),
            user_name: None,
            push_interval: 66,
            tick_interval: 66,
            datagram_port: 6829,
            max_update_size: 2 * 1500 - 100,
            pull_threshold: 10,
            view_only: false,
            always_shared: false,
            never_shared: false,
            dont_disconnect: false,
        }
    }
}

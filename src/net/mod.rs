// Network layer module
// Async TCP link to the anchor network gateway

pub mod connection;
pub mod link;
pub mod messages;

pub use connection::Connection;
pub use link::TcpRangingLink;
pub use messages::{parse_frame, Frame, LinkMessage, TagPosition};

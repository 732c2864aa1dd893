//! TCP transport: frame codec and non-blocking framed connections.

pub mod conn;
pub mod frame;

pub use conn::{park, parse_url, Acceptor, FramedConn};
pub use frame::{Frame, MAX_FRAME_LEN};

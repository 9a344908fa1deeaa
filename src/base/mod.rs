mod channel;
mod connection;
mod error;
pub mod mock;
mod ring_byte_buffer;
#[cfg(feature = "serial")]
mod serial;
mod tcp;

pub(crate) use self::channel::lock;
pub use self::channel::{Channel, SplitStream, DEFAULT_POLL_INTERVAL};
pub use self::connection::Connection;
pub use self::error::{Error, Result};
pub use self::mock::MockConnection;
pub use self::ring_byte_buffer::RingByteBuffer;
#[cfg(feature = "serial")]
pub use self::serial::SerialConnection;
pub use self::tcp::TcpConnection;

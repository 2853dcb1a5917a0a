pub mod session;
pub mod transport;

pub use session::{Session, SessionError};
pub use transport::sse::{SseTransport, SseTransportParams};
pub use transport::stdio::{StdioTransport, StdioTransportParams};
pub use transport::{Error as TransportError, ReadStream, Transport, WriteStream};

//! SMPP server: accept loop, per-connection sessions, bind registry.

mod acceptor;
mod registry;
mod session;

pub use acceptor::SmppListener;
pub use registry::{OutboundDeliver, SessionHandle, SessionRegistry};
pub use session::{SessionError, SmppSession};

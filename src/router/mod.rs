//! Message routing core.
//!
//! The router owns the two input channels and the terminal-action policy
//! that keeps the gateway at-least-once correct. It sees the rest of the
//! system only through narrow capabilities: the address index, a client
//! sink, the broker publisher and the carrier registry.

mod router;
mod routes;

pub use router::{ClientSink, Router, SinkError};
pub use routes::{Route, RouteKind, RouteTable};

mod server;
mod shutdown;

pub use server::Server;
pub use shutdown::Shutdown;

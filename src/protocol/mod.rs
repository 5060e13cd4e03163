// Device control protocol
//
// Text requests terminated by CRLF, one reply line per request or batch.

pub mod acceptance;
pub mod client;
pub mod reply; // Reply parsing and request formatting
pub mod transport;

// Re-exports for convenience
pub use acceptance::AcceptanceSet;
pub use client::Client;
pub use reply::Reply;
pub use transport::{TcpTransport, Transport};

#[cfg(test)]
pub(crate) mod testing;

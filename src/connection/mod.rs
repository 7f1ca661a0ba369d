pub mod manager;
pub mod protocol;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{ConnectionManager, ConnectionSettings};
pub use protocol::{ContractStatus, Inbound, InboundMessage, Request};
pub use transport::WsConnector;

//! The smart-HTTP protocol: pkt-line framing, service types, the
//! advertisement/push/fetch conversations, and pack generation.

pub mod pack;
pub mod pktline;
pub mod smart;
pub mod types;

pub use smart::SmartProtocol;
pub use types::ServiceType;

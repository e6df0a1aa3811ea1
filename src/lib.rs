//! swift: zero-config LAN file transfer node.
//!
//! Two nodes on the same network discover each other over UDP broadcast,
//! negotiate sender/receiver roles, introduce themselves over a TCP data
//! connection, and expose a fixed pool of chunk-receiving listeners for the
//! parallel transfer. A browser control surface observes and drives the
//! whole process over a WebSocket control channel.

pub mod config;
pub mod discovery;
pub mod forward;
pub mod node;
pub mod pool;
pub mod protocol;
pub mod session;

pub use config::NodeConfig;
pub use node::Node;

//! Bridge client: a DSN-driven connection manager with reconnection, a
//! correlation-tracked RPC layer over it, a typed result cursor, and a
//! heartbeat manager that activates on first use.

pub mod connection;
pub mod cursor;
pub mod heartbeat;
pub mod rpc;

pub use connection::{ConnectionManager, ConnectionState};
pub use cursor::ResultCursor;
pub use heartbeat::HeartbeatManager;
pub use rpc::RpcClient;

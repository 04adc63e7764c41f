//! Wire types for the broker-mediated SQL/function/command RPC bridge.
//!
//! Everything in this crate is shared between the server and the client: the
//! request/response envelopes carried as AMQP message bodies, the function
//! call payload shape, and the error taxonomy both sides report through.

pub mod envelope;
pub mod error;
pub mod function;

pub use envelope::{CellValue, RequestEnvelope, RequestType, ResponseEnvelope, TransactionCommand};
pub use error::{BridgeError, RiskLevel, ValidationCause};
pub use function::{FunctionCall, ParamValue};

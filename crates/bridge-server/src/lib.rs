//! Server-side request pipeline for the RPC bridge: dispatcher, worker
//! pool, rate limiter, SQL validator, query cache, function registry,
//! SQL/command executors, transaction registry, and heartbeat responder.

pub mod cache;
pub mod command_executor;
pub mod dispatcher;
pub mod function;
pub mod heartbeat;
pub mod rate_limiter;
pub mod sql_executor;
pub mod transaction;
pub mod validator;
pub mod worker_pool;

pub use dispatcher::Dispatcher;
pub use sql_executor::{PoolMode, SqlExecutor};
pub use worker_pool::WorkerPool;

//! Correlation-tracked RPC over a `ConnectionManager`.
//!
//! One reply queue is declared per connection (not per call): a background
//! reactor task consumes it and routes each response to the pending call
//! that is waiting on its correlation id, the same split between "owns the
//! socket" and "one task per in-flight call" as a DEALER-socket client
//! reactor, adapted from an mpsc-command-channel-plus-oneshot-per-request
//! shape to AMQP's queue/consumer primitives.

use crate::connection::{ConnectionManager, ConnectionState};
use bridge_proto::{
    BridgeError, CellValue, FunctionCall, RequestEnvelope, ResponseEnvelope, TransactionCommand,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

struct ReplySlot {
    channel: lapin::Channel,
    queue_name: String,
}

/// Issues RPCs against a device's request/heartbeat queues and demultiplexes
/// responses arriving on a per-connection reply queue.
pub struct RpcClient {
    manager: Arc<ConnectionManager>,
    pending: Arc<DashMap<String, oneshot::Sender<ResponseEnvelope>>>,
    reply_slot: Arc<tokio::sync::Mutex<Option<ReplySlot>>>,
}

impl RpcClient {
    /// Spawns the reply-listener reactor and returns immediately.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        let pending: Arc<DashMap<String, oneshot::Sender<ResponseEnvelope>>> = Arc::new(DashMap::new());
        let reply_slot = Arc::new(tokio::sync::Mutex::new(None));

        let task_manager = manager.clone();
        let task_pending = pending.clone();
        let task_slot = reply_slot.clone();
        tokio::spawn(async move {
            reply_reactor(task_manager, task_pending, task_slot).await;
        });

        Self { manager, pending, reply_slot }
    }

    /// Issues a raw envelope and awaits its correlated response, bounded by
    /// the DSN timeout.
    async fn call(&self, mut envelope: RequestEnvelope, routing_key: String) -> Result<ResponseEnvelope, BridgeError> {
        let correlation_id = Uuid::new_v4().to_string();
        envelope.corr_id = Some(correlation_id.clone());

        let slot = self.reply_slot.lock().await;
        let Some(ReplySlot { channel, queue_name }) = slot.as_ref() else {
            return Err(BridgeError::ConnectionLost);
        };
        let channel = channel.clone();
        let reply_to = queue_name.clone();
        drop(slot);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        if let Err(e) = bridge_transport::publish_request(&channel, &routing_key, &reply_to, &envelope).await {
            self.pending.remove(&correlation_id);
            return Err(BridgeError::BrokerError(e.to_string()));
        }

        let timeout = self.manager.dsn().timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Sender dropped without a response; treat as lost connection.
                Err(BridgeError::ConnectionLost)
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(BridgeError::Timeout)
            }
        }
    }

    pub async fn sql(&self, query: impl Into<String>, params: Vec<CellValue>) -> Result<ResponseEnvelope, BridgeError> {
        let device_id = self.manager.device_id().to_string();
        let routing_key = self.manager.dsn().request_queue();
        let envelope = RequestEnvelope::sql(device_id, query).with_params(params);
        self.call(envelope, routing_key).await
    }

    pub async fn sql_in_transaction(
        &self,
        query: impl Into<String>,
        params: Vec<CellValue>,
        transaction_id: impl Into<String>,
    ) -> Result<ResponseEnvelope, BridgeError> {
        let device_id = self.manager.device_id().to_string();
        let routing_key = self.manager.dsn().request_queue();
        let envelope = RequestEnvelope::sql(device_id, query)
            .with_params(params)
            .with_transaction_id(transaction_id);
        self.call(envelope, routing_key).await
    }

    pub async fn function(&self, call: &FunctionCall) -> Result<ResponseEnvelope, BridgeError> {
        let device_id = self.manager.device_id().to_string();
        let routing_key = self.manager.dsn().request_queue();
        let envelope = RequestEnvelope::function(device_id, call)
            .map_err(|e| BridgeError::MalformedRequest(e.to_string()))?;
        self.call(envelope, routing_key).await
    }

    pub async fn command(&self, line: impl Into<String>) -> Result<ResponseEnvelope, BridgeError> {
        let device_id = self.manager.device_id().to_string();
        let routing_key = self.manager.dsn().request_queue();
        let envelope = RequestEnvelope::command(device_id, line);
        self.call(envelope, routing_key).await
    }

    pub async fn ping(&self) -> Result<ResponseEnvelope, BridgeError> {
        let device_id = self.manager.device_id().to_string();
        let routing_key = self.manager.dsn().heartbeat_queue();
        let envelope = RequestEnvelope::heartbeat_ping(device_id);
        self.call(envelope, routing_key).await
    }

    /// The connection this client issues calls over; the heartbeat manager
    /// uses this to force a reconnect after too many missed beats.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    async fn transaction_command(&self, transaction_id: impl Into<String>, command: TransactionCommand) -> Result<ResponseEnvelope, BridgeError> {
        let device_id = self.manager.device_id().to_string();
        let routing_key = self.manager.dsn().request_queue();
        let envelope = RequestEnvelope {
            request_type: bridge_proto::RequestType::Transaction,
            device_id,
            query: String::new(),
            params: Vec::new(),
            client_ip: String::new(),
            transaction_id: Some(transaction_id.into()),
            command: Some(command),
            corr_id: None,
            timestamp: None,
        };
        self.call(envelope, routing_key).await
    }

    pub async fn begin(&self, transaction_id: impl Into<String>) -> Result<ResponseEnvelope, BridgeError> {
        self.transaction_command(transaction_id, TransactionCommand::Begin).await
    }

    pub async fn commit(&self, transaction_id: impl Into<String>) -> Result<ResponseEnvelope, BridgeError> {
        self.transaction_command(transaction_id, TransactionCommand::Commit).await
    }

    pub async fn rollback(&self, transaction_id: impl Into<String>) -> Result<ResponseEnvelope, BridgeError> {
        self.transaction_command(transaction_id, TransactionCommand::Rollback).await
    }
}

/// Declares a fresh reply queue and drains it on every `Connected`
/// transition; stops draining (and drops all pending calls as lost) when
/// the connection goes down.
async fn reply_reactor(
    manager: Arc<ConnectionManager>,
    pending: Arc<DashMap<String, oneshot::Sender<ResponseEnvelope>>>,
    reply_slot: Arc<tokio::sync::Mutex<Option<ReplySlot>>>,
) {
    let mut states = manager.subscribe();
    loop {
        if states.changed().await.is_err() {
            return;
        }
        let state = *states.borrow();
        match state {
            ConnectionState::Connected => {
                let Ok(channel) = manager.channel().await else { continue };
                let Ok(queue_name) = bridge_transport::declare_reply_queue(&channel).await else {
                    continue;
                };
                let Ok(mut consumer) =
                    bridge_transport::consume(&channel, &queue_name, "bridge-client-replies").await
                else {
                    continue;
                };

                *reply_slot.lock().await = Some(ReplySlot { channel, queue_name });

                let task_pending = pending.clone();
                tokio::spawn(async move {
                    while let Some(result) = bridge_transport::next_response(&mut consumer).await {
                        match result {
                            Ok((correlation_id, response)) => {
                                if let Some((_, tx)) = task_pending.remove(&correlation_id) {
                                    let _ = tx.send(response);
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "malformed response delivery"),
                        }
                    }
                });
            }
            ConnectionState::Disconnected | ConnectionState::Dead => {
                *reply_slot.lock().await = None;
                // Calls waiting on these correlation ids see their oneshot
                // sender drop and surface `ConnectionLost` at the `call` site.
                pending.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_config::ClientDsn;

    #[tokio::test]
    async fn call_without_connection_is_connection_lost() {
        let dsn = ClientDsn::parse(
            "deviceID=dev-1&amqp_uri=amqp://127.0.0.1:59999/%2f&reconnect_enabled=false&timeout=100ms",
        )
        .unwrap();
        let manager = Arc::new(ConnectionManager::start(dsn));
        let rpc = RpcClient::new(manager);
        let err = rpc.ping().await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionLost));
    }
}

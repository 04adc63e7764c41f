//! Thin AMQP 0-9-1 helper layer over `lapin`, shared by the bridge server
//! and client. Connection dial, queue declaration, and publish/consume with
//! the `correlationId`/`replyTo` message properties the wire protocol relies
//! on all live here so neither side re-derives the same lapin boilerplate.

mod error;

pub use error::TransportError;

use bridge_proto::{RequestEnvelope, ResponseEnvelope};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use uuid::Uuid;

/// Default (nameless) exchange: publishing with `routing_key = queue name`
/// delivers directly to that queue, same as the rest of the corpus does.
pub const DEFAULT_EXCHANGE: &str = "";

/// Dials the broker. Connection is not automatically reconnected; callers
/// that need that own the retry loop (see `bridge-client`'s connection
/// manager).
pub async fn connect(amqp_uri: &str) -> Result<Connection, TransportError> {
    Connection::connect(amqp_uri, ConnectionProperties::default())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))
}

pub async fn open_channel(conn: &Connection) -> Result<Channel, TransportError> {
    conn.create_channel()
        .await
        .map_err(|e| TransportError::Channel(e.to_string()))
}

/// Declares a durable, non-exclusive queue (the device request queue and
/// its heartbeat sibling).
pub async fn declare_durable_queue(channel: &Channel, name: &str) -> Result<(), TransportError> {
    channel
        .queue_declare(name, QueueDeclareOptions::default(), FieldTable::default())
        .await
        .map_err(|e| TransportError::QueueDeclare(name.to_string(), e.to_string()))?;
    Ok(())
}

/// Declares the client's exclusive, auto-delete, server-named reply queue
/// and returns the generated name.
pub async fn declare_reply_queue(channel: &Channel) -> Result<String, TransportError> {
    let options = QueueDeclareOptions {
        exclusive: true,
        auto_delete: true,
        ..QueueDeclareOptions::default()
    };
    let queue = channel
        .queue_declare("", options, FieldTable::default())
        .await
        .map_err(|e| TransportError::QueueDeclare("<reply>".to_string(), e.to_string()))?;
    Ok(queue.name().to_string())
}

/// Publishes a request envelope to `routing_key` (the device's request or
/// heartbeat queue), stamping `correlationId` and `replyTo`. Returns the
/// correlation id used, generating one if the envelope didn't already carry
/// one.
pub async fn publish_request(
    channel: &Channel,
    routing_key: &str,
    reply_to: &str,
    envelope: &RequestEnvelope,
) -> Result<String, TransportError> {
    let correlation_id = envelope
        .corr_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let body = serde_json::to_vec(envelope).map_err(TransportError::Encode)?;

    let properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_correlation_id(correlation_id.clone().into())
        .with_reply_to(reply_to.into());

    channel
        .basic_publish(
            DEFAULT_EXCHANGE,
            routing_key,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await
        .map_err(|e| TransportError::Publish(e.to_string()))?
        .await
        .map_err(|e| TransportError::Publish(e.to_string()))?;

    Ok(correlation_id)
}

/// Publishes a response envelope back to `reply_to`, carrying the same
/// `correlationId` as the request it answers.
pub async fn publish_response(
    channel: &Channel,
    reply_to: &str,
    correlation_id: &str,
    envelope: &ResponseEnvelope,
) -> Result<(), TransportError> {
    let body = serde_json::to_vec(envelope).map_err(TransportError::Encode)?;
    let properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_correlation_id(correlation_id.into());

    channel
        .basic_publish(
            DEFAULT_EXCHANGE,
            reply_to,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await
        .map_err(|e| TransportError::Publish(e.to_string()))?
        .await
        .map_err(|e| TransportError::Publish(e.to_string()))?;

    Ok(())
}

/// Starts consuming `queue_name` under `consumer_tag`. One channel should
/// not be shared for concurrent publishes from multiple tasks; callers that
/// need concurrent publish either open a channel per task or serialize
/// access to a shared one (this is a channel-ownership rule the protocol
/// itself does not enforce).
pub async fn consume(
    channel: &Channel,
    queue_name: &str,
    consumer_tag: &str,
) -> Result<Consumer, TransportError> {
    channel
        .basic_consume(
            queue_name,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| TransportError::Consume(e.to_string()))
}

/// A decoded request delivery: the envelope plus everything needed to route
/// a response and ack the message.
pub struct RequestDelivery {
    pub envelope: RequestEnvelope,
    pub correlation_id: String,
    pub reply_to: String,
    delivery: Delivery,
}

impl RequestDelivery {
    pub async fn ack(self) -> Result<(), TransportError> {
        self.delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| TransportError::Ack(e.to_string()))
    }
}

/// Decodes one delivery off a request/heartbeat consumer into a
/// `RequestDelivery`. Deliveries missing `correlationId` or `replyTo`, or
/// whose body does not parse as a `RequestEnvelope`, are rejected as
/// `MalformedRequest` rather than silently dropped.
pub fn decode_request(delivery: Delivery) -> Result<RequestDelivery, TransportError> {
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|c| c.to_string())
        .ok_or_else(|| TransportError::MalformedDelivery("missing correlationId".to_string()))?;
    let reply_to = delivery
        .properties
        .reply_to()
        .as_ref()
        .map(|r| r.to_string())
        .ok_or_else(|| TransportError::MalformedDelivery("missing replyTo".to_string()))?;
    let envelope: RequestEnvelope = serde_json::from_slice(&delivery.data)
        .map_err(|e| TransportError::MalformedDelivery(e.to_string()))?;

    Ok(RequestDelivery {
        envelope,
        correlation_id,
        reply_to,
        delivery,
    })
}

/// Pulls the next request delivery off a consumer stream, or `None` once
/// the consumer is cancelled/the channel closes.
pub async fn next_request(consumer: &mut Consumer) -> Option<Result<RequestDelivery, TransportError>> {
    match consumer.next().await {
        Some(Ok(delivery)) => Some(decode_request(delivery)),
        Some(Err(e)) => Some(Err(TransportError::Consume(e.to_string()))),
        None => None,
    }
}

/// Pulls the next response delivery off a reply-queue consumer, along with
/// its correlation id, so the caller can route it to the pending request it
/// answers.
pub async fn next_response(
    consumer: &mut Consumer,
) -> Option<Result<(String, ResponseEnvelope), TransportError>> {
    let delivery = match consumer.next().await {
        Some(Ok(delivery)) => delivery,
        Some(Err(e)) => return Some(Err(TransportError::Consume(e.to_string()))),
        None => return None,
    };

    let correlation_id = match delivery.properties.correlation_id().as_ref().map(|c| c.to_string()) {
        Some(id) => id,
        None => {
            return Some(Err(TransportError::MalformedDelivery(
                "missing correlationId".to_string(),
            )))
        }
    };

    let result = serde_json::from_slice::<ResponseEnvelope>(&delivery.data)
        .map_err(|e| TransportError::MalformedDelivery(e.to_string()));

    if delivery.ack(BasicAckOptions::default()).await.is_err() {
        tracing::warn!(correlation_id = %correlation_id, "failed to ack response delivery");
    }

    Some(result.map(|envelope| (correlation_id, envelope)))
}

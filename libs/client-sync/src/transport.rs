//! Transport seam between the sync agent and the event broker
//!
//! The agent only speaks the room protocol (`ClientMessage` out,
//! `ServerMessage` in). `BrokerConnector` attaches it to an in-process
//! broker; a network transport implements the same two traits.

use async_trait::async_trait;
use event_broker::{BrokerHandle, ClientMessage, ServerMessage, Subscriber, SubscriberId};
use types::errors::AuctionError;

/// Opens connections to the broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, AuctionError>;
}

/// One live connection.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, message: ClientMessage) -> Result<(), AuctionError>;

    /// Next inbound message; `None` means the connection dropped.
    async fn recv(&mut self) -> Option<ServerMessage>;

    async fn close(&mut self);
}

#[derive(Clone)]
pub struct BrokerConnector {
    broker: BrokerHandle,
}

impl BrokerConnector {
    pub fn new(broker: BrokerHandle) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Connector for BrokerConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, AuctionError> {
        Ok(Box::new(BrokerConnection::new(self.broker.connect())))
    }
}

pub struct BrokerConnection {
    subscriber: Option<Subscriber>,
}

impl BrokerConnection {
    pub fn new(subscriber: Subscriber) -> Self {
        Self {
            subscriber: Some(subscriber),
        }
    }

    pub fn id(&self) -> Option<SubscriberId> {
        self.subscriber.as_ref().map(Subscriber::id)
    }
}

#[async_trait]
impl Connection for BrokerConnection {
    async fn send(&mut self, message: ClientMessage) -> Result<(), AuctionError> {
        match &self.subscriber {
            Some(subscriber) if !subscriber.is_closed() => {
                subscriber.handle(message);
                Ok(())
            }
            _ => Err(AuctionError::TransportDropped {
                reason: "connection closed".to_string(),
            }),
        }
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        match &self.subscriber {
            Some(subscriber) => subscriber.recv().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        // Dropping the subscriber leaves every room.
        self.subscriber.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_broker::BrokerConfig;
    use types::ids::AuctionId;

    #[tokio::test]
    async fn test_broker_connection_round_trip() {
        let broker = BrokerHandle::new(BrokerConfig::default());
        let connector = BrokerConnector::new(broker.clone());
        let mut conn = connector.connect().await.unwrap();

        let room = AuctionId::new("QmRoom");
        conn.send(ClientMessage::Join {
            auction_id: room.clone(),
        })
        .await
        .unwrap();
        assert_eq!(
            conn.recv().await,
            Some(ServerMessage::Joined {
                auction_id: room.clone()
            })
        );
        assert_eq!(broker.room_size(&room), 1);

        conn.close().await;
        assert_eq!(broker.room_size(&room), 0);
        assert!(conn.recv().await.is_none());
        assert!(conn.send(ClientMessage::Ping { nonce: 1 }).await.is_err());
    }
}

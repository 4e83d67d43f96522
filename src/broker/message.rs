use bytes::Bytes;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(value: u64) -> Self {
        MessageId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct InboundMessage {
    pub id: MessageId,
    pub key: String,
    pub payload: Bytes,
    pub redelivery_count: u32,
}

impl Clone for InboundMessage {
    fn clone(&self) -> Self {
        InboundMessage {
            id: self.id,
            key: self.key.clone(),
            payload: Bytes::clone(&self.payload),
            redelivery_count: self.redelivery_count,
        }
    }
}

impl InboundMessage {
    pub fn new(id: MessageId, key: &str, payload: Bytes) -> Self {
        InboundMessage {
            id,
            key: String::from(key),
            payload,
            redelivery_count: 0,
        }
    }

    pub fn redelivered(&self) -> Self {
        InboundMessage {
            redelivery_count: self.redelivery_count + 1,
            ..InboundMessage::clone(self)
        }
    }
}

use std::net::SocketAddr;

use chrono::{DateTime, FixedOffset};

use crate::address::Address;

/// A received message, ready for delivery or relay.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub remote_addr: SocketAddr,
    pub helo: String,
    pub mail_from: Address,
    pub rcpt_to: Vec<Address>,
    pub received: DateTime<FixedOffset>,
    pub id: String,
    /// The message with the `Received:` trace header prepended, LF line endings.
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn has_recipient(&self, recipient: &Address) -> bool {
        self.rcpt_to.iter().any(|addr| addr == recipient)
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }
}

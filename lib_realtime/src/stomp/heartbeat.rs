//! STOMP heart-beat negotiation.
//!
//! Each side advertises `heart-beat: cx,cy` where `cx` is the smallest interval
//! it can send at and `cy` the interval it wants to receive at (milliseconds,
//! `0` meaning "never").

use std::time::Duration;

/// One side's `heart-beat` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Parses a `cx,cy` header value. Anything unparsable means "no heart-beats".
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(',').map(|p| p.trim().parse::<u64>().ok());
        match (parts.next().flatten(), parts.next().flatten()) {
            (Some(outgoing_ms), Some(incoming_ms)) => Self::new(outgoing_ms, incoming_ms),
            _ => Self::default(),
        }
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// Effective intervals agreed between client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// How often the client must send a heart-beat, if at all.
    pub send_every: Option<Duration>,
    /// How often the client should expect traffic from the server, if at all.
    pub expect_every: Option<Duration>,
}

impl Negotiated {
    /// Silence tolerated before the connection is considered dead.
    pub fn inbound_deadline(&self) -> Option<Duration> {
        self.expect_every.map(|d| d * 2)
    }
}

/// Computes the effective intervals from the client's offer and the server's reply.
pub fn negotiate(client: HeartBeat, server: HeartBeat) -> Negotiated {
    Negotiated {
        send_every: pick(client.outgoing_ms, server.incoming_ms),
        expect_every: pick(client.incoming_ms, server.outgoing_ms),
    }
}

fn pick(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 {
        None
    } else {
        Some(Duration::from_millis(ours.max(theirs)))
    }
}

//! Telling our own transmissions apart from replies on a half-duplex bus.
//!
//! Every byte written to a shared bus comes straight back to the sender before any device has
//! had a chance to answer. The writer records what it sends, and the reader compares incoming
//! bytes against that record strictly in transmission order.

use log::warn;
use std::collections::VecDeque;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Incoming {
    /// A byte we sent ourselves.
    Echo(u8),
    /// A byte from some other node.
    Reply(u8),
}

#[derive(Clone, Debug, Default)]
pub struct EchoFilter {
    sent: VecDeque<u8>,
}

impl EchoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records bytes about to be written. Must be called before the write, so that the echo
    /// can't overtake the record.
    pub fn record_sent(&mut self, bytes: &[u8]) {
        self.sent.extend(bytes);
    }

    /// The number of sent bytes whose echo hasn't come back yet.
    pub fn pending(&self) -> usize {
        self.sent.len()
    }

    pub fn classify(&mut self, byte: u8) -> Incoming {
        match self.sent.front() {
            Some(&expected) if expected == byte => {
                self.sent.pop_front();
                Incoming::Echo(byte)
            }
            Some(&expected) => {
                // The echo got mangled or lost, so the rest of it can't be matched up either.
                warn!(
                    "Expected echo of {:#04x} but got {:#04x}; dropping {} pending echo bytes",
                    expected,
                    byte,
                    self.sent.len()
                );
                self.sent.clear();
                Incoming::Reply(byte)
            }
            None => Incoming::Reply(byte),
        }
    }
}

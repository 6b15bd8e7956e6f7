//! Consumer → producer rendezvous: "the swap you requested has taken effect".
//!
//! Capacity is one message; the protocol never has more than one
//! acknowledgment outstanding, so a send from the render loop never blocks.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tilestream_common::GenerationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// The consumer is now drawing this generation and has swept it once.
    SwapApplied(GenerationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Sent,
    /// An earlier acknowledgment has not been consumed yet.
    Full,
    /// The producer side is gone.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffWait {
    Received(Handoff),
    TimedOut,
    Disconnected,
}

pub fn handoff_channel() -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (HandoffSender(tx), HandoffReceiver(rx))
}

#[derive(Debug)]
pub struct HandoffSender(Sender<Handoff>);

impl HandoffSender {
    pub fn acknowledge(&self, generation: GenerationId) -> AckOutcome {
        match self.0.try_send(Handoff::SwapApplied(generation)) {
            Ok(()) => AckOutcome::Sent,
            Err(TrySendError::Full(_)) => AckOutcome::Full,
            Err(TrySendError::Disconnected(_)) => AckOutcome::Disconnected,
        }
    }
}

#[derive(Debug)]
pub struct HandoffReceiver(Receiver<Handoff>);

impl HandoffReceiver {
    pub fn wait(&self, timeout: Duration) -> HandoffWait {
        match self.0.recv_timeout(timeout) {
            Ok(msg) => HandoffWait::Received(msg),
            Err(RecvTimeoutError::Timeout) => HandoffWait::TimedOut,
            Err(RecvTimeoutError::Disconnected) => HandoffWait::Disconnected,
        }
    }

    /// Discard anything queued. Returns how many messages were dropped.
    pub fn drain(&self) -> usize {
        self.0.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_slot_capacity() {
        let (tx, rx) = handoff_channel();
        assert_eq!(tx.acknowledge(GenerationId::One), AckOutcome::Sent);
        assert_eq!(tx.acknowledge(GenerationId::Zero), AckOutcome::Full);
        assert_eq!(
            rx.wait(Duration::from_millis(10)),
            HandoffWait::Received(Handoff::SwapApplied(GenerationId::One))
        );
        assert_eq!(rx.wait(Duration::from_millis(10)), HandoffWait::TimedOut);
    }

    #[test]
    fn dropping_sender_wakes_receiver() {
        let (tx, rx) = handoff_channel();
        drop(tx);
        assert_eq!(rx.wait(Duration::from_secs(5)), HandoffWait::Disconnected);
    }

    #[test]
    fn ack_after_receiver_dropped() {
        let (tx, rx) = handoff_channel();
        drop(rx);
        assert_eq!(tx.acknowledge(GenerationId::One), AckOutcome::Disconnected);
    }

    #[test]
    fn drain_empties_channel() {
        let (tx, rx) = handoff_channel();
        tx.acknowledge(GenerationId::One);
        assert_eq!(rx.drain(), 1);
        assert_eq!(rx.drain(), 0);
    }
}

use crate::core::channel::{Channel, ChannelKind, CloseSignal};
use crate::core::error::ChannelError;
use crate::core::types::{Message, ProcessId};
use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;
use std::time::Duration;

/// Unbounded multi-producer / multi-consumer queue
///
/// Senders never block. Receivers block only while the queue is empty.
#[derive(Debug)]
pub struct Queue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    /// Held across enqueue and report, see [`Channel::send_observed`]
    last_seq: Mutex<u64>,
    close: CloseSignal,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Queue {
            tx,
            rx,
            last_seq: Mutex::new(0),
            close: CloseSignal::new(),
        }
    }

    /// Wait out a sender still reporting the enqueue of `msg`
    fn settled(&self, msg: Message) -> Message {
        drop(self.last_seq.lock());
        msg
    }
}

impl Channel for Queue {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Queue
    }

    fn send_observed(
        &self,
        payload: Vec<u8>,
        sender: ProcessId,
        on_enqueued: &dyn Fn(u64),
    ) -> Result<u64, ChannelError> {
        let mut last_seq = self.last_seq.lock();
        self.close.check()?;

        let seq = *last_seq + 1;
        self.tx
            .send(Message::new(seq, sender, payload))
            .map_err(|_| ChannelError::Closed)?;
        *last_seq = seq;
        on_enqueued(seq);
        Ok(seq)
    }

    fn recv(&self, _receiver: ProcessId) -> Result<Message, ChannelError> {
        self.close.check()?;
        select! {
            recv(self.rx) -> msg => {
                msg.map(|m| self.settled(m)).map_err(|_| ChannelError::Closed)
            }
            recv(self.close.receiver()) -> _ => Err(ChannelError::Closed),
        }
    }

    fn recv_timeout(
        &self,
        _receiver: ProcessId,
        timeout: Duration,
    ) -> Result<Option<Message>, ChannelError> {
        self.close.check()?;
        select! {
            recv(self.rx) -> msg => {
                msg.map(|m| Some(self.settled(m))).map_err(|_| ChannelError::Closed)
            }
            recv(self.close.receiver()) -> _ => Err(ChannelError::Closed),
            default(timeout) => Ok(None),
        }
    }

    fn close(&self) {
        self.close.close();
    }

    fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    fn len(&self) -> usize {
        self.rx.len()
    }

    fn status(&self) -> String {
        if self.is_closed() {
            "Queue: closed".to_string()
        } else {
            format!("Queue: {} msg(s)", self.rx.len())
        }
    }
}

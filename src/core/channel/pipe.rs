use crate::core::channel::{Channel, ChannelKind, CloseSignal};
use crate::core::error::ChannelError;
use crate::core::types::{Message, ProcessId};
use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;
use std::time::Duration;

/// Point-to-point pipe with a single in-flight slot
///
/// One `Pipe` carries one direction. A send completes as soon as the slot is
/// free; a second send blocks until a receiver has taken the first message.
#[derive(Debug)]
pub struct Pipe {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    /// Last sequence number handed out. Held for the whole enqueue, report
    /// included, so that sequence order matches slot order; receivers pass
    /// through it before returning.
    last_seq: Mutex<u64>,
    close: CloseSignal,
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipe {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Pipe {
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

impl Channel for Pipe {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Pipe
    }

    fn send_observed(
        &self,
        payload: Vec<u8>,
        sender: ProcessId,
        on_enqueued: &dyn Fn(u64),
    ) -> Result<u64, ChannelError> {
        self.close.check()?;
        let mut last_seq = self.last_seq.lock();
        self.close.check()?;

        let seq = *last_seq + 1;
        let msg = Message::new(seq, sender, payload);
        select! {
            send(self.tx, msg) -> res => {
                res.map_err(|_| ChannelError::Closed)?;
                *last_seq = seq;
                on_enqueued(seq);
                Ok(seq)
            }
            recv(self.close.receiver()) -> _ => Err(ChannelError::Closed),
        }
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
            "Pipe: closed".to_string()
        } else if self.rx.is_empty() {
            "Pipe: empty".to_string()
        } else {
            "Pipe: ready".to_string()
        }
    }
}

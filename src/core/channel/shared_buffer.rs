use crate::core::channel::{Channel, ChannelKind};
use crate::core::diagnostics::DiagnosticsEngine;
use crate::core::error::ChannelError;
use crate::core::types::{LockId, Message, ProcessId};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the lock guarding every shared buffer
pub const SHARED_BUFFER_LOCK: &str = "shared-buffer";

#[derive(Debug)]
struct Slots {
    ring: Vec<Option<Message>>,
    head: usize,
    len: usize,
    last_seq: u64,
    closed: bool,
}

impl Slots {
    fn is_full(&self) -> bool {
        self.len == self.ring.len()
    }

    fn push(&mut self, msg: Message) {
        let tail = (self.head + self.len) % self.ring.len();
        self.ring[tail] = Some(msg);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<Message> {
        if self.len == 0 {
            return None;
        }
        let msg = self.ring[self.head].take();
        self.head = (self.head + 1) % self.ring.len();
        self.len -= 1;
        msg
    }
}

/// Fixed-size ring of slots behind an explicit, tracked lock
///
/// Every send and receive takes the buffer lock through the
/// [`DiagnosticsEngine`], so contention shows up as wait-for edges and the
/// lock is granted strictly in FIFO order. Callers first wait, without the
/// lock, until a slot (or a message) is available, then take the lock and
/// re-check; the lock is released before the call returns.
///
/// Processes using the buffer must be registered with the engine. An
/// unregistered process gets [`ChannelError::Closed`].
pub struct SharedBuffer {
    lock: LockId,
    engine: Arc<DiagnosticsEngine>,
    slots: Mutex<Slots>,
    changed: Condvar,
}

impl SharedBuffer {
    /// Create a buffer with `capacity` slots (at least one)
    pub fn new(capacity: usize, engine: Arc<DiagnosticsEngine>) -> Self {
        Self::with_lock(capacity, engine, SHARED_BUFFER_LOCK)
    }

    /// Like [`SharedBuffer::new`] but with a custom lock name, for running
    /// several buffers against one engine
    pub fn with_lock(
        capacity: usize,
        engine: Arc<DiagnosticsEngine>,
        lock: impl Into<LockId>,
    ) -> Self {
        let capacity = capacity.max(1);
        SharedBuffer {
            lock: lock.into(),
            engine,
            slots: Mutex::new(Slots {
                ring: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
                last_seq: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().ring.len()
    }

    /// Wait until `ready` holds or the buffer is closed
    ///
    /// # Returns
    /// `Ok(false)` if the deadline passed first
    fn wait_until_ready(
        &self,
        deadline: Option<Instant>,
        ready: impl Fn(&Slots) -> bool,
    ) -> Result<bool, ChannelError> {
        let mut slots = self.slots.lock();
        while !slots.closed && !ready(&*slots) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut slots, deadline).timed_out() {
                        return Ok(!slots.closed && ready(&*slots));
                    }
                }
                None => self.changed.wait(&mut slots),
            }
        }
        if slots.closed {
            return Err(ChannelError::Closed);
        }
        Ok(true)
    }

    fn take(
        &self,
        receiver: ProcessId,
        deadline: Option<Instant>,
    ) -> Result<Option<Message>, ChannelError> {
        loop {
            if !self.wait_until_ready(deadline, |s| s.len > 0)? {
                return Ok(None);
            }

            // The deadline is the caller's poll, not a lock timeout
            let _guard = match self
                .engine
                .acquire_until(receiver, self.lock.clone(), deadline)
            {
                Ok(Some(guard)) => guard,
                Ok(None) => return Ok(None),
                Err(_) => return Err(ChannelError::Closed),
            };

            let mut slots = self.slots.lock();
            if slots.closed {
                return Err(ChannelError::Closed);
            }
            if let Some(msg) = slots.pop() {
                self.changed.notify_all();
                return Ok(Some(msg));
            }
            // Another receiver got there first
        }
    }
}

impl Channel for SharedBuffer {
    fn kind(&self) -> ChannelKind {
        ChannelKind::SharedBuffer
    }

    fn send_observed(
        &self,
        payload: Vec<u8>,
        sender: ProcessId,
        on_enqueued: &dyn Fn(u64),
    ) -> Result<u64, ChannelError> {
        let mut payload = payload;
        loop {
            self.wait_until_ready(None, |s| !s.is_full())?;

            let _guard = self
                .engine
                .acquire_timeout(sender, self.lock.clone(), None)
                .map_err(|_| ChannelError::Closed)?;

            let mut slots = self.slots.lock();
            if slots.closed {
                return Err(ChannelError::Closed);
            }
            if !slots.is_full() {
                let seq = slots.last_seq + 1;
                slots.last_seq = seq;
                slots.push(Message::new(seq, sender, std::mem::take(&mut payload)));
                // Receivers pop under the same slot lock
                on_enqueued(seq);
                self.changed.notify_all();
                return Ok(seq);
            }
        }
    }

    fn recv(&self, receiver: ProcessId) -> Result<Message, ChannelError> {
        loop {
            if let Some(msg) = self.take(receiver, None)? {
                return Ok(msg);
            }
        }
    }

    fn recv_timeout(
        &self,
        receiver: ProcessId,
        timeout: Duration,
    ) -> Result<Option<Message>, ChannelError> {
        self.take(receiver, Some(Instant::now() + timeout))
    }

    fn close(&self) {
        let mut slots = self.slots.lock();
        slots.closed = true;
        self.changed.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    fn len(&self) -> usize {
        self.slots.lock().len
    }

    fn status(&self) -> String {
        let slots = self.slots.lock();
        if slots.closed {
            "SharedBuffer: closed".to_string()
        } else {
            format!("SharedBuffer: {}/{} slots", slots.len, slots.ring.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DiagnosticsConfig;
    use crate::core::timeline::TimelineKind;
    use std::sync::mpsc;
    use std::thread;

    fn engine_with(processes: usize) -> Arc<DiagnosticsEngine> {
        let engine = Arc::new(DiagnosticsEngine::new(DiagnosticsConfig::default()));
        for p in 0..processes {
            engine.on_process_started(p);
        }
        engine
    }

    #[test]
    fn test_send_and_recv_release_the_lock() {
        let engine = engine_with(2);
        let buffer = SharedBuffer::new(4, Arc::clone(&engine));

        assert_eq!(buffer.send(b"a".to_vec(), 0), Ok(1));
        assert_eq!(buffer.send(b"b".to_vec(), 0), Ok(2));
        assert_eq!(buffer.status(), "SharedBuffer: 2/4 slots");
        assert_eq!(engine.holder(&LockId::new(SHARED_BUFFER_LOCK)), None);

        assert_eq!(buffer.recv(1).map(|m| m.text()), Ok("a".to_string()));
        assert_eq!(buffer.recv(1).map(|m| m.text()), Ok("b".to_string()));
        assert_eq!(engine.holder(&LockId::new(SHARED_BUFFER_LOCK)), None);
    }

    #[test]
    fn test_full_buffer_blocks_sender_until_recv() {
        let engine = engine_with(2);
        let buffer = Arc::new(SharedBuffer::new(1, Arc::clone(&engine)));
        buffer.send(b"first".to_vec(), 0).unwrap();

        let (tx, rx) = mpsc::channel();
        let b = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            tx.send(b.send(b"second".to_vec(), 0)).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(buffer.recv(1).map(|m| m.seq()), Ok(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Ok(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_recv_timeout_and_close() {
        let engine = engine_with(1);
        let buffer = SharedBuffer::new(2, engine);
        assert_eq!(buffer.recv_timeout(0, Duration::from_millis(20)), Ok(None));

        buffer.close();
        assert_eq!(buffer.send(b"late".to_vec(), 0), Err(ChannelError::Closed));
        assert_eq!(buffer.recv(0), Err(ChannelError::Closed));
    }

    #[test]
    fn test_losing_poll_is_not_a_lock_timeout() {
        let engine = engine_with(2);
        let buffer = SharedBuffer::new(2, Arc::clone(&engine));
        buffer.send(b"queued".to_vec(), 0).unwrap();

        let held = engine.acquire(0, SHARED_BUFFER_LOCK).unwrap();
        assert_eq!(buffer.recv_timeout(1, Duration::from_millis(20)), Ok(None));
        assert_eq!(engine.timeline().count(TimelineKind::LockTimeout), 0);
        assert_eq!(engine.waiting_on(1), None);
        assert_eq!(engine.graph_snapshot().edge_count(), 0);

        drop(held);
        assert_eq!(buffer.recv(1).map(|m| m.text()), Ok("queued".to_string()));
    }

    #[test]
    fn test_unregistered_process_sees_closed() {
        let engine = engine_with(1);
        let buffer = SharedBuffer::new(2, engine);
        assert_eq!(buffer.send(b"x".to_vec(), 9), Err(ChannelError::Closed));
    }
}

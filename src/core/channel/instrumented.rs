use crate::core::channel::{Channel, ChannelKind};
use crate::core::diagnostics::DiagnosticsEngine;
use crate::core::error::ChannelError;
use crate::core::timeline::TimelineKind;
use crate::core::types::{Message, ProcessId};
use std::sync::Arc;
use std::time::Duration;

/// Channel wrapper that reports every completed transfer
///
/// Successful sends and receives are written to the engine's timeline and
/// mark the process as active. A send is logged from inside the inner
/// channel's enqueue, so it always precedes the matching receive. Each receive also records one telemetry
/// sample with the message's end-to-end latency. Failed operations are
/// passed through untouched.
pub struct Instrumented<C> {
    inner: C,
    engine: Arc<DiagnosticsEngine>,
}

impl<C: Channel> Instrumented<C> {
    pub fn new(inner: C, engine: Arc<DiagnosticsEngine>) -> Self {
        Instrumented { inner, engine }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn on_sent(&self, sender: ProcessId, seq: u64, bytes: usize) {
        self.engine.record_access(sender);
        self.engine.timeline().push(
            Some(sender),
            TimelineKind::Send,
            format!(
                "P{sender} sent #{seq} ({bytes} bytes) via {}",
                self.inner.kind()
            ),
        );
    }

    fn on_received(&self, receiver: ProcessId, msg: &Message) {
        let latency = msg.sent_at().elapsed();
        self.engine.telemetry().record(latency);
        self.engine.record_access(receiver);
        self.engine.timeline().push(
            Some(receiver),
            TimelineKind::Recv,
            format!(
                "P{receiver} received #{} '{}' from P{}, latency={:.4}s",
                msg.seq(),
                msg.text(),
                msg.sender(),
                latency.as_secs_f64()
            ),
        );
    }
}

impl<C: Channel> Channel for Instrumented<C> {
    fn kind(&self) -> ChannelKind {
        self.inner.kind()
    }

    fn send_observed(
        &self,
        payload: Vec<u8>,
        sender: ProcessId,
        on_enqueued: &dyn Fn(u64),
    ) -> Result<u64, ChannelError> {
        let bytes = payload.len();
        self.inner.send_observed(payload, sender, &|seq| {
            self.on_sent(sender, seq, bytes);
            on_enqueued(seq);
        })
    }

    fn recv(&self, receiver: ProcessId) -> Result<Message, ChannelError> {
        let msg = self.inner.recv(receiver)?;
        self.on_received(receiver, &msg);
        Ok(msg)
    }

    fn recv_timeout(
        &self,
        receiver: ProcessId,
        timeout: Duration,
    ) -> Result<Option<Message>, ChannelError> {
        let msg = self.inner.recv_timeout(receiver, timeout)?;
        if let Some(msg) = &msg {
            self.on_received(receiver, msg);
        }
        Ok(msg)
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn status(&self) -> String {
        self.inner.status()
    }
}

//! Scriptable sink for connection manager tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::connection::{CloseReason, TransportKind};
use crate::ports::{ConnectionSink, SinkError};

pub struct FakeSink {
    transport: TransportKind,
    frames: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
    fail_probes: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
    scripted_delays: Mutex<VecDeque<Duration>>,
    probes: AtomicUsize,
    closed: Mutex<Option<CloseReason>>,
}

impl FakeSink {
    pub fn new(transport: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            transport,
            frames: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            fail_probes: AtomicBool::new(false),
            send_delay: Mutex::new(None),
            scripted_delays: Mutex::new(VecDeque::new()),
            probes: AtomicUsize::new(0),
            closed: Mutex::new(None),
        })
    }

    pub fn push() -> Arc<Self> {
        Self::new(TransportKind::Push)
    }

    pub fn stream() -> Arc<Self> {
        Self::new(TransportKind::Stream)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_sends(&self, delay: Duration) {
        *self.send_delay.lock() = Some(delay);
    }

    /// Delays for the next sends, one per call, ahead of `delay_sends`.
    pub fn script_send_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.scripted_delays.lock().extend(delays);
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn closed_with(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }
}

#[async_trait]
impl ConnectionSink for FakeSink {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn send(&self, frame: &str) -> Result<(), SinkError> {
        let scripted = self.scripted_delays.lock().pop_front();
        let delay = scripted.or(*self.send_delay.lock());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SinkError::Io("connection reset".to_string()));
        }
        self.frames.lock().push(frame.to_string());
        Ok(())
    }

    async fn probe(&self) -> Result<(), SinkError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probes.load(Ordering::SeqCst) {
            Err(SinkError::Closed)
        } else {
            Ok(())
        }
    }

    async fn close(&self, reason: CloseReason) {
        self.closed.lock().get_or_insert(reason);
    }
}

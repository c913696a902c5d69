//! Event plumbing between transport callbacks and the poll engines
//!
//! Transports post named events from byte/timer callback context; the poll
//! loop drains them. [`EventQueue::post`] is non-blocking and safe to call
//! repeatedly; [`EventQueue::get`] is polled by the engine main loop.
//!
//! The master additionally owns two synchronization primitives that decouple
//! a blocked requester from the polling loop:
//!
//! - [`RunToken`], a single-permit timed semaphore. A request API call must
//!   acquire it before touching the wire, which enforces exactly one request
//!   in flight process-wide, FIFO by acquisition.
//! - [`WaitSignal`], the completion signal a requester blocks on until the
//!   poll engine posts one of the four terminal outcomes. The request API
//!   creates a fresh one per request, so an outcome can only ever reach the
//!   caller whose request produced it.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Maximum queued events per role. The protocol never has more than a
/// handful outstanding; overflow indicates a stalled poll loop.
const EVENT_QUEUE_CAPACITY: usize = 8;

/// Events consumed by the slave poll engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveEvent {
    /// Transport finished its startup settle delay
    Ready,
    /// Transport delivered a candidate frame
    FrameReceived,
    /// Frame passed the address filter, dispatch it
    Execute,
    /// Response is ready for transmission
    FrameSent,
}

/// Events consumed by the master poll engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterEvent {
    /// Transport finished its startup settle delay
    Ready,
    /// Transport delivered a candidate response frame
    FrameReceived,
    /// Response (or broadcast completion) ready for handler execution
    Execute,
    /// A request PDU is staged and should be pushed to the transport
    FrameSent,
    /// A request failed; run the error observer and resolve the requester
    ErrorProcess(MasterErrorKind),
}

/// Error classification for a failed master request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterErrorKind {
    /// No response within the respond-timeout window
    RespondTimeout,
    /// Frame-level receive failure or mismatched responder address
    ReceiveData,
    /// Response decoded to an exception or failed validation
    ExecuteFunction,
}

/// Terminal outcome of one master request, delivered through [`WaitSignal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    RespondTimeout,
    ReceiveData,
    ExecuteFunction,
}

/// Small bounded event queue bridging callback context to the poll loop
pub struct EventQueue<E> {
    inner: Mutex<VecDeque<E>>,
}

impl<E: Copy + PartialEq + std::fmt::Debug> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(EVENT_QUEUE_CAPACITY)),
        }
    }

    /// Queue an event. Never blocks; drops the event with a warning if the
    /// queue is full, which only happens when the poll loop has stalled.
    pub fn post(&self, event: E) {
        let mut q = self.inner.lock();
        if q.len() >= EVENT_QUEUE_CAPACITY {
            warn!(?event, "event queue full, dropping event");
            return;
        }
        q.push_back(event);
    }

    /// Take the oldest queued event, if any
    pub fn get(&self) -> Option<E> {
        self.inner.lock().pop_front()
    }

    /// Drop all queued events (engine disable)
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl<E: Copy + PartialEq + std::fmt::Debug> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-permit timed semaphore guarding the master's one-in-flight rule
pub struct RunToken {
    available: Mutex<bool>,
    cond: Condvar,
}

impl RunToken {
    pub fn new() -> Self {
        Self {
            available: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    /// Acquire the permit. `timeout == None` waits forever. Returns false
    /// if the permit was not released within the timeout.
    pub fn take(&self, timeout: Option<Duration>) -> bool {
        let mut available = self.available.lock();
        match timeout {
            None => {
                while !*available {
                    self.cond.wait(&mut available);
                }
            }
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while !*available {
                    if self.cond.wait_until(&mut available, deadline).timed_out() {
                        return false;
                    }
                }
            }
        }
        *available = false;
        true
    }

    /// Release the permit, waking one waiting requester
    pub fn release(&self) {
        let mut available = self.available.lock();
        *available = true;
        self.cond.notify_one();
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion signal a blocked requester waits on. One instance serves one
/// request; the slot is never shared between callers.
pub struct WaitSignal {
    outcome: Mutex<Option<RequestOutcome>>,
    cond: Condvar,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Post a terminal outcome and wake the requester
    pub fn notify(&self, outcome: RequestOutcome) {
        let mut slot = self.outcome.lock();
        *slot = Some(outcome);
        self.cond.notify_one();
    }

    /// Block until the poll engine posts a terminal outcome
    pub fn wait(&self) -> RequestOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.cond.wait(&mut slot);
        }
    }
}

impl Default for WaitSignal {
    fn default() -> Self {
        Self::new()
    }
}

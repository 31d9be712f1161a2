//! Bounded push-to-pull event queue.
//!
//! Bridges a push-style producer (session event callbacks) to a lazily
//! pulled consumer. The producer never blocks: when the buffer is full the
//! oldest buffered value is dropped and the drop is logged. Terminal signals
//! ([`complete`](BoundedEventQueue::complete) and
//! [`fail`](BoundedEventQueue::fail)) are only observed by the consumer after
//! every value pushed before them has been delivered.
//!
//! # Example
//!
//! ```
//! use llm_adapter::queue::BoundedEventQueue;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = BoundedEventQueue::new(8);
//! queue.push("He".to_string());
//! queue.push("llo".to_string());
//! queue.complete();
//!
//! assert_eq!(queue.next().await.unwrap().as_deref(), Some("He"));
//! assert_eq!(queue.next().await.unwrap().as_deref(), Some("llo"));
//! assert_eq!(queue.next().await.unwrap(), None);
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::Stream;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::AdapterError;

/// Default number of buffered values before the oldest is dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One suspended `next()` call. The sender carries either a value,
/// end-of-sequence (`Ok(None)`) or the terminal error.
type Waiter<T> = oneshot::Sender<Result<Option<T>, AdapterError>>;

struct QueueState<T> {
    buffer: VecDeque<T>,
    waiters: VecDeque<Waiter<T>>,
    done: bool,
    error: Option<AdapterError>,
    capacity: usize,
    dropped: u64,
}

impl<T> QueueState<T> {
    const fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

/// Bounded single-producer/single-consumer event queue.
///
/// Cloning yields another handle to the same queue; by convention one handle
/// is held by the producer and one by the consumer.
pub struct BoundedEventQueue<T> {
    inner: Arc<Mutex<QueueState<T>>>,
}

impl<T> Clone for BoundedEventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for BoundedEventQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("BoundedEventQueue")
            .field("buffered", &state.buffer.len())
            .field("waiters", &state.waiters.len())
            .field("capacity", &state.capacity)
            .field("done", &state.done)
            .field("failed", &state.error.is_some())
            .finish()
    }
}

impl<T> Default for BoundedEventQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<T> BoundedEventQueue<T> {
    /// Creates an empty queue holding at most `capacity` buffered values.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState {
                buffer: VecDeque::new(),
                waiters: VecDeque::new(),
                done: false,
                error: None,
                capacity: capacity.max(1),
                dropped: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        // Nothing panics while the lock is held, so a poisoned lock still
        // holds consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes a value.
    ///
    /// Hands the value straight to the oldest suspended consumer if there is
    /// one, otherwise buffers it, evicting the oldest buffered value when the
    /// buffer is full. Returns `false` if the queue is already terminal and
    /// the value was discarded.
    pub fn push(&self, value: T) -> bool {
        let mut state = self.state();
        if state.is_terminal() {
            return false;
        }

        let mut value = value;
        while let Some(waiter) = state.waiters.pop_front() {
            // A waiter whose `next()` future was dropped hands the value back.
            if let Err(Ok(Some(returned))) = waiter.send(Ok(Some(value))) {
                value = returned;
            } else {
                return true;
            }
        }

        if state.buffer.len() >= state.capacity {
            state.buffer.pop_front();
            state.dropped += 1;
            warn!(
                capacity = state.capacity,
                dropped = state.dropped,
                "event queue full, dropped oldest buffered value"
            );
        }
        state.buffer.push_back(value);
        true
    }

    /// Marks the queue done. Suspended consumers receive end-of-sequence.
    ///
    /// Has no effect if the queue is already terminal.
    pub fn complete(&self) {
        let mut state = self.state();
        if state.is_terminal() {
            return;
        }
        state.done = true;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Ok(None));
        }
    }

    /// Marks the queue failed. Suspended consumers receive `error`; later
    /// consumers receive it once the buffer is drained.
    ///
    /// Has no effect if the queue is already terminal.
    pub fn fail(&self, error: AdapterError) {
        let mut state = self.state();
        if state.is_terminal() {
            return;
        }
        state.done = true;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        state.error = Some(error);
    }

    /// Pulls the next value.
    ///
    /// Returns buffered values first regardless of terminal state, then the
    /// terminal error if the queue failed, then `Ok(None)` once done.
    /// Suspends while the queue is empty and still open.
    pub async fn next(&self) -> Result<Option<T>, AdapterError> {
        let receiver = {
            let mut state = self.state();
            if let Some(value) = state.buffer.pop_front() {
                return Ok(Some(value));
            }
            if let Some(error) = &state.error {
                return Err(error.clone());
            }
            if state.done {
                return Ok(None);
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        // The sender lives in the queue state this handle keeps alive, so
        // it is only dropped after being resolved.
        receiver.await.unwrap_or(Ok(None))
    }

    /// Returns `true` once `complete` or `fail` has been called.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Number of values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().buffer.len()
    }

    /// Returns `true` if no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().buffer.is_empty()
    }

    /// Number of values evicted because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state().dropped
    }

    /// Number of consumers currently suspended in [`next`](Self::next).
    #[must_use]
    pub fn pending_consumers(&self) -> usize {
        self.state().waiters.len()
    }
}

impl<T: Send + 'static> BoundedEventQueue<T> {
    /// Converts the queue into a stream of values.
    ///
    /// The stream yields `Ok` for each value, ends after end-of-sequence, and
    /// ends after yielding a single `Err` if the queue failed.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, AdapterError>> + Send + 'static {
        futures_util::stream::unfold(Some(self), |queue| async move {
            let queue = queue?;
            match queue.next().await {
                Ok(Some(value)) => Some((Ok(value), Some(queue))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

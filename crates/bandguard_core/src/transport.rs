//! Lock-Free Exchange Between the Control and Audio Threads
//!
//! A single-producer/single-consumer cell with two slots. The audio thread
//! owns one slot, the control thread the other. Two boolean tokens record
//! what happened last:
//!
//! ```text
//! write == read   nothing pending: audio owns slot[read], control owns slot[!read]
//! write != read   control published slot[write]; audio has not taken it yet
//! ```
//!
//! The control side only touches slots while nothing is pending, the audio
//! side only flips `read` after it is done with its slot. Every value is
//! therefore observed whole: either the old one or the new one.
//!
//! The audio side never waits. The control side polls with a timeout and a
//! cancellation token.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::monitor::CancellationToken;

struct Shared<T> {
    slots: [UnsafeCell<T>; 2],
    write: AtomicBool,
    read: AtomicBool,
}

// Rust pattern: the flags hand each slot to exactly one side at a time, so
// sharing the cell is sound as long as the payload itself may move between
// threads
unsafe impl<T: Send> Sync for Shared<T> {}

/// Constructor for the two halves of a transport
pub struct Transport;

impl Transport {
    /// Create a transport with both slots holding `initial`
    ///
    /// Allocates once; both halves are then allocation-free.
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T: Copy + Send>(initial: T) -> (TransportWriter<T>, TransportReader<T>) {
        let shared = Arc::new(Shared {
            slots: [UnsafeCell::new(initial), UnsafeCell::new(initial)],
            write: AtomicBool::new(false),
            read: AtomicBool::new(false),
        });
        (
            TransportWriter {
                shared: Arc::clone(&shared),
                write: false,
            },
            TransportReader { shared },
        )
    }
}

/// Control-thread half
pub struct TransportWriter<T> {
    shared: Arc<Shared<T>>,
    // Only this half stores `write`, so a local copy is always current
    write: bool,
}

impl<T: Copy + Send> TransportWriter<T> {
    /// Whether the last submitted value was taken by the audio thread
    pub fn is_consumed(&self) -> bool {
        self.shared.read.load(Ordering::Acquire) == self.write
    }

    /// Publish `value` without waiting
    ///
    /// Fails, handing the value back, while the previous submission has
    /// not been consumed. On success returns what the control slot held:
    /// the value the audio thread worked on (and wrote its telemetry into)
    /// up to the previous exchange.
    pub fn try_submit(&mut self, value: T) -> Result<T, T> {
        if !self.is_consumed() {
            return Err(value);
        }
        let slot = &self.shared.slots[usize::from(!self.write)];
        // SAFETY: nothing is pending, so the audio side only uses
        // slot[write] and will not look at this slot before `write` flips
        let previous = unsafe {
            let previous = *slot.get();
            *slot.get() = value;
            previous
        };
        self.write = !self.write;
        self.shared.write.store(self.write, Ordering::Release);
        Ok(previous)
    }

    /// Publish `value`, retrying until the previous submission is consumed
    ///
    /// Sleeps a tenth of `timeout` between attempts. On timeout or
    /// cancellation nothing is published.
    pub fn submit(&mut self, value: T, timeout: Duration, token: &CancellationToken) -> Result<T, TransportError> {
        let start = Instant::now();
        let pause = (timeout / 10).clamp(Duration::from_micros(100), Duration::from_millis(10));
        loop {
            match self.try_submit(value) {
                Ok(previous) => return Ok(previous),
                Err(_) => {
                    if token.is_cancelled() {
                        return Err(TransportError::Cancelled);
                    }
                    if start.elapsed() >= timeout {
                        return Err(TransportError::Timeout);
                    }
                    thread::sleep(pause);
                }
            }
        }
    }
}

/// Audio-thread half
pub struct TransportReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy + Send> TransportReader<T> {
    /// Take the audio slot for this cycle
    ///
    /// Wait-free. If the control thread published a value since the last
    /// call, the guard points at it and [`Slot::is_fresh`] is true. The
    /// value is marked consumed when the guard is dropped.
    pub fn try_consume(&mut self) -> Slot<'_, T> {
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);
        Slot {
            shared: &self.shared,
            index: usize::from(write),
            fresh: write != read,
            write,
        }
    }
}

/// Exclusive access to the audio thread's slot
pub struct Slot<'a, T> {
    shared: &'a Shared<T>,
    index: usize,
    fresh: bool,
    write: bool,
}

impl<T> Slot<'_, T> {
    /// True when the slot holds a value not seen by a previous guard
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

impl<T> Deref for Slot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the control side does not touch slot[write] until this
        // guard publishes `read`
        unsafe { &*self.shared.slots[self.index].get() }
    }
}

impl<T> DerefMut for Slot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `deref`; the reader's `&mut self` borrow keeps this
        // the only guard
        unsafe { &mut *self.shared.slots[self.index].get() }
    }
}

impl<T> Drop for Slot<'_, T> {
    fn drop(&mut self) {
        self.shared.read.store(self.write, Ordering::Release);
    }
}

//! A deadline-ordered queue for serialized job consumption.
//!
//! Items become visible once their deadline passes; ready items come out in
//! insertion order. The consumer side is a single async [`DelayQueue::get`]
//! that sleeps until the head is due — no polling interval, no busy loop.
//! Producers are cheap and synchronous.

use std::collections::BinaryHeap;
use std::collections::binary_heap::PeekMut;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

struct Entry<T> {
    deadline: Instant,
    seq: u64,
    item: T,
}

// Reversed ordering turns the std max-heap into an earliest-deadline heap,
// with the sequence number breaking ties in insertion order.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    seq: u64,
}

/// An unbounded min-heap of delayed items with one async consumer.
pub struct DelayQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues an item that is ready immediately.
    pub fn put(&self, item: T) {
        self.put_at(Instant::now(), item);
    }

    /// Enqueues an item that becomes ready after `delay`.
    pub fn put_after(&self, delay: Duration, item: T) {
        self.put_at(Instant::now() + delay, item);
    }

    /// Enqueues an item with an absolute deadline.
    pub fn put_at(&self, deadline: Instant, item: T) {
        {
            let mut inner = self.inner.lock();
            let seq = inner.seq;
            inner.seq += 1;
            inner.heap.push(Entry {
                deadline,
                seq,
                item,
            });
        }
        self.notify.notify_one();
    }

    /// Enqueues an item for the next wall-clock occurrence of `offset` past
    /// the hour, plus up to `jitter` of random spread so a fleet of bots
    /// does not fire in lockstep.
    pub fn put_hourly(&self, offset: Duration, jitter: Duration, item: T) {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut delay = Duration::from_secs(next_hourly_delay(now_secs, offset.as_secs()));
        if !jitter.is_zero() {
            delay += jitter.mul_f64(rand::thread_rng().r#gen::<f64>());
        }
        self.put_after(delay, item);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Waits for the next due item and removes it.
    ///
    /// Cancel-safe: dropping the future leaves the queue untouched. With
    /// several concurrent callers each wakeup goes to one waiter, so a
    /// single consumer is the intended shape.
    pub async fn get(&self) -> T {
        loop {
            // Arm the notification before inspecting the heap so a put
            // racing with the check cannot be missed.
            let notified = self.notify.notified();
            let head_deadline = {
                let mut inner = self.inner.lock();
                match inner.heap.peek_mut() {
                    Some(entry) if entry.deadline <= Instant::now() => {
                        return PeekMut::pop(entry).item;
                    }
                    Some(entry) => Some(entry.deadline),
                    None => None,
                }
            };
            match head_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Seconds from `now_secs` (Unix time) until the next occurrence of
/// `offset` seconds past an hour boundary. An occurrence at exactly now
/// schedules a full hour out.
fn next_hourly_delay(now_secs: u64, offset: u64) -> u64 {
    let mut when = now_secs / 3600 * 3600 + offset;
    if when <= now_secs {
        when += 3600;
    }
    when - now_secs
}

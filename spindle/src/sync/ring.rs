//! Bounded lock-free MPMC queue.
//!
//! [`RingQueue`] hands opaque work items between the scheduler thread and the
//! broker's workers. It is built from two index rings of the same shape: a
//! *free* ring pre-filled with every data slot index, and an *active* ring
//! holding the indices of occupied slots in FIFO order. Enqueue takes a free
//! index, writes the value, then publishes the index on the active ring;
//! dequeue does the reverse.
//!
//! Each index ring has twice as many entries as the queue has slots. Every
//! entry packs a cycle number, a "safe" bit and an index into one `u64`, so
//! producers and consumers only ever race on single-word CAS/FAA operations.
//! The queue is lock-free, not wait-free: under contention a thread retries,
//! but it never waits on a lock held by another thread.

use crossbeam_utils::CachePadded;

use std::cell::UnsafeCell;
use std::collections::TryReserveError;
use std::hint;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::error;

/// Largest supported capacity order (`2^24` slots).
pub const MAX_ORDER: u32 = 24;

/// Number of times a dequeuer re-reads an empty slot of an older cycle while
/// an enqueuer may still be about to fill it, before advancing the slot.
const MAX_ATTEMPTS: usize = 5000;

/// log2 of the number of ring entries sharing one 64-byte cache line.
const CACHE_SHIFT: u32 = 3;

/// Error returned by [`RingQueue::new`].
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring order {0} exceeds the maximum of {MAX_ORDER}")]
    OrderTooLarge(u32),

    #[error("failed to allocate ring storage: {0}")]
    Alloc(#[from] TryReserveError),
}

/// One index ring.
///
/// Holds up to `2^order` indices in `2^(order + 1)` entries.
struct Ring {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    threshold: CachePadded<AtomicI64>,
    entries: Box<[AtomicU64]>,

    /// log2 of `entries.len()`.
    shift: u32,
}

impl Ring {
    fn new(order: u32) -> Result<Self, RingError> {
        let shift = order + 1;
        let size = 1usize << shift;

        // Cycle 0, safe, empty index: every entry is behind the first cycle.
        let empty = (1u64 << shift) | (size as u64 - 1);

        let mut entries = Vec::new();
        entries.try_reserve_exact(size)?;
        entries.extend((0..size).map(|_| AtomicU64::new(empty)));

        Ok(Self {
            head: CachePadded::new(AtomicU64::new(size as u64)),
            tail: CachePadded::new(AtomicU64::new(size as u64)),
            threshold: CachePadded::new(AtomicI64::new(-1)),
            entries: entries.into_boxed_slice(),
            shift,
        })
    }

    /// Creates a ring already holding every index in `0..2^order`.
    fn full(order: u32) -> Result<Self, RingError> {
        let ring = Self::new(order)?;
        for index in 0..(1u64 << order) {
            let pushed = ring.enqueue(index);
            debug_assert!(pushed);
        }
        Ok(ring)
    }

    /// Index value marking an empty entry (`2n - 1`).
    fn bottom(&self) -> u64 {
        (1u64 << self.shift) - 1
    }

    fn safe_bit(&self) -> u64 {
        1u64 << self.shift
    }

    /// Threshold restored by every successful enqueue (`3n - 1`).
    fn full_threshold(&self) -> i64 {
        3 * (1i64 << (self.shift - 1)) - 1
    }

    fn pack(&self, cycle: u64, safe: bool, index: u64) -> u64 {
        (cycle << (self.shift + 1)) | ((safe as u64) << self.shift) | index
    }

    fn entry_cycle(&self, entry: u64) -> u64 {
        entry >> (self.shift + 1)
    }

    fn entry_index(&self, entry: u64) -> u64 {
        entry & self.bottom()
    }

    fn entry_safe(&self, entry: u64) -> bool {
        entry & self.safe_bit() != 0
    }

    /// Cycle a head/tail counter belongs to.
    fn cycle_of(&self, counter: u64) -> u64 {
        counter >> self.shift
    }

    /// Maps a counter to an entry, spreading consecutive positions over
    /// different cache lines.
    fn slot(&self, counter: u64) -> &AtomicU64 {
        let mask = self.bottom();
        let position = counter & mask;

        let mapped = if self.shift > CACHE_SHIFT {
            (position >> (self.shift - CACHE_SHIFT)) | ((position << CACHE_SHIFT) & mask)
        } else {
            position
        };

        &self.entries[mapped as usize]
    }

    /// Publishes `index`. Only fails if the ring keeps refusing slots, which
    /// cannot happen while it holds at most `n` indices.
    fn enqueue(&self, index: u64) -> bool {
        let mut refused = 0;

        loop {
            let tail = self.tail.fetch_add(1, Ordering::AcqRel);
            let tail_cycle = self.cycle_of(tail);
            let slot = self.slot(tail);
            let mut entry = slot.load(Ordering::Acquire);

            loop {
                let usable = self.entry_cycle(entry) < tail_cycle
                    && self.entry_index(entry) == self.bottom()
                    && (self.entry_safe(entry) || self.head.load(Ordering::Acquire) <= tail);

                if !usable {
                    break;
                }

                let new = self.pack(tail_cycle, true, index);
                match slot.compare_exchange_weak(entry, new, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {
                        let full = self.full_threshold();
                        if self.threshold.load(Ordering::Acquire) != full {
                            self.threshold.store(full, Ordering::Release);
                        }
                        return true;
                    }
                    Err(actual) => entry = actual,
                }
            }

            refused += 1;
            if refused >= MAX_ATTEMPTS {
                return false;
            }
        }
    }

    fn dequeue(&self) -> Option<u64> {
        if self.threshold.load(Ordering::Acquire) < 0 {
            return None;
        }

        loop {
            let head = self.head.fetch_add(1, Ordering::AcqRel);
            let head_cycle = self.cycle_of(head);
            let slot = self.slot(head);

            let mut attempt = 0;
            let mut entry = slot.load(Ordering::Acquire);

            loop {
                let entry_cycle = self.entry_cycle(entry);

                if entry_cycle == head_cycle {
                    slot.fetch_or(self.bottom(), Ordering::AcqRel);
                    return Some(self.entry_index(entry));
                }

                if entry_cycle > head_cycle {
                    break;
                }

                let new = if self.entry_index(entry) == self.bottom() {
                    // An enqueuer holding this position may not have written it yet.
                    if attempt < MAX_ATTEMPTS && self.tail.load(Ordering::Acquire) > head {
                        attempt += 1;
                        hint::spin_loop();
                        entry = slot.load(Ordering::Acquire);
                        continue;
                    }
                    self.pack(head_cycle, self.entry_safe(entry), self.bottom())
                } else {
                    // Element of an older cycle still unconsumed: fence off the slot.
                    let unsafe_entry = self.pack(entry_cycle, false, self.entry_index(entry));
                    if unsafe_entry == entry {
                        break;
                    }
                    unsafe_entry
                };

                match slot.compare_exchange_weak(entry, new, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => break,
                    Err(actual) => entry = actual,
                }
            }

            let tail = self.tail.load(Ordering::Acquire);
            if tail <= head + 1 {
                self.catch_up(tail, head + 1);
                self.threshold.fetch_sub(1, Ordering::AcqRel);
                return None;
            }

            if self.threshold.fetch_sub(1, Ordering::AcqRel) <= 0 {
                return None;
            }
        }
    }

    /// Drags the tail forward to `head` after dequeuers overshot it.
    fn catch_up(&self, mut tail: u64, mut head: u64) {
        while self
            .tail
            .compare_exchange_weak(tail, head, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            head = self.head.load(Ordering::Acquire);
            tail = self.tail.load(Ordering::Acquire);

            if tail >= head {
                break;
            }
        }
    }
}

/// A bounded lock-free multi-producer multi-consumer queue of `2^order`
/// values.
///
/// # Examples
///
/// ```rust
/// use spindle::sync::RingQueue;
///
/// let queue = RingQueue::new(2).unwrap();
/// assert_eq!(queue.capacity(), 4);
///
/// queue.enqueue("job").unwrap();
/// assert_eq!(queue.dequeue(), Some("job"));
/// assert_eq!(queue.dequeue(), None);
/// ```
pub struct RingQueue<T> {
    free: Ring,
    active: Ring,
    slots: Box<[UnsafeCell<Option<T>>]>,
}

// A slot is only touched by the thread that currently owns its index.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Creates an empty queue holding up to `2^order` values.
    pub fn new(order: u32) -> Result<Self, RingError> {
        if order > MAX_ORDER {
            return Err(RingError::OrderTooLarge(order));
        }

        let capacity = 1usize << order;
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.extend((0..capacity).map(|_| UnsafeCell::new(None)));

        Ok(Self {
            free: Ring::full(order)?,
            active: Ring::new(order)?,
            slots: slots.into_boxed_slice(),
        })
    }

    /// Maximum number of values the queue holds at once.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Appends `value`, handing it back if every slot is occupied.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        let Some(index) = self.free.dequeue() else {
            return Err(value);
        };

        let slot = &self.slots[index as usize];
        // SAFETY: `index` came off the free ring, so no other thread holds it.
        unsafe { *slot.get() = Some(value) };

        if self.active.enqueue(index) {
            return Ok(());
        }

        // SAFETY: the index was never published, this thread still owns it.
        let value = unsafe { (*slot.get()).take() };
        self.release(index);

        match value {
            Some(value) => Err(value),
            None => unreachable!("slot emptied while owned"),
        }
    }

    /// Removes the oldest value, or returns `None` if the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        let index = self.active.dequeue()?;

        // SAFETY: `index` came off the active ring, so its value is published
        // and no other thread holds it until it is returned to the free ring.
        let value = unsafe { (*self.slots[index as usize].get()).take() };
        self.release(index);

        value
    }

    /// Returns a slot index to the free ring.
    ///
    /// The free ring never holds more than `n` indices, so this only fails
    /// if the ring invariants are broken. The slot is then lost for good.
    fn release(&self, index: u64) {
        let returned = self.free.enqueue(index);
        debug_assert!(returned, "free ring refused slot {index}");

        if !returned {
            error!(index, capacity = self.capacity(), "free ring refused a slot index");
        }
    }
}

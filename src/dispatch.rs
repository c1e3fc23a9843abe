//! Routes Transfer Events from [`crate::controller::Controller::service_interrupt`]
//! to whichever endpoint is waiting for them.
//!
//! The data this was grounded on moved completions through a single
//! `Vec`, behind one lock shared by every producer and consumer. That's
//! fine under a real interrupt (mutual exclusion from disabling
//! interrupts while the ISR runs), but doesn't hold once a read and a
//! write can genuinely race — so each (slot, endpoint) pair gets its own
//! lock-free single-producer/single-consumer queue: the producer (the
//! interrupt handler) publishes its write with `Release`, the consumer
//! (the transfer engine's busy-wait) observes it with `Acquire`, and
//! vice versa for the queue being drained.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::vec::Vec;

use crate::trb::TransferEvent;

const QUEUE_CAPACITY: usize = 8;
/// Device-context-index width per slot: slot context (index 0) plus up to
/// 31 endpoint contexts (`crate::ring::endpoint_index` never exceeds 31).
const ENDPOINTS_PER_SLOT: usize = 32;

struct EndpointQueue {
    buffer: UnsafeCell<[Option<TransferEvent>; QUEUE_CAPACITY]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// The buffer is only ever touched by the single producer between loading
// `tail` and storing it, and by the single consumer between loading `head`
// and storing it; the atomics are what make that handoff safe to share
// across a `Sync` boundary.
unsafe impl Sync for EndpointQueue {}

impl EndpointQueue {
    fn new() -> Self {
        EndpointQueue {
            buffer: UnsafeCell::new([None; QUEUE_CAPACITY]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn push(&self, event: TransferEvent) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= QUEUE_CAPACITY {
            return false;
        }
        let index = tail % QUEUE_CAPACITY;
        unsafe {
            (*self.buffer.get())[index] = Some(event);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    fn pop(&self) -> Option<TransferEvent> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let index = head % QUEUE_CAPACITY;
        let event = unsafe { (*self.buffer.get())[index].take() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        event
    }
}

/// Owns one queue per (slot, endpoint) pair, sized once at controller
/// bring-up. Indexed separately from `Controller` itself so the two don't
/// need a cyclic reference: `Controller` hands events to a `&Dispatcher`,
/// and `crate::transfer` pulls completions from the same reference.
pub struct Dispatcher {
    queues: Vec<EndpointQueue>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher { queues: Vec::new() }
    }

    /// Grows the table to cover `max_slots` device slots (slot IDs are
    /// 1-based; index 0 is unused but kept so `slot_id` can index
    /// directly). Called once, right after `Controller::new` learns
    /// `max_slots` from HCSPARAMS1.
    pub fn reserve(&mut self, max_slots: u8) {
        let total = (max_slots as usize + 1) * ENDPOINTS_PER_SLOT;
        self.queues.clear();
        self.queues.reserve(total);
        for _ in 0..total {
            self.queues.push(EndpointQueue::new());
        }
    }

    fn index(&self, slot_id: u8, endpoint_index: u8) -> usize {
        slot_id as usize * ENDPOINTS_PER_SLOT + endpoint_index as usize
    }

    /// Called from interrupt context with a freshly dequeued Transfer
    /// Event. Drops the event (after logging is the caller's job) if the
    /// target endpoint's queue is full or unallocated.
    pub fn deliver(&self, event: TransferEvent) -> bool {
        match self.queues.get(self.index(event.slot_id, event.endpoint_id)) {
            Some(queue) => queue.push(event),
            None => false,
        }
    }

    /// Called by the transfer engine while it busy-waits for one
    /// endpoint's next completion.
    pub fn try_recv(&self, slot_id: u8, endpoint_index: u8) -> Option<TransferEvent> {
        self.queues.get(self.index(slot_id, endpoint_index))?.pop()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

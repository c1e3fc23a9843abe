//! The controller's single consumer event ring and its one-segment Event
//! Ring Segment Table (xHCI 1.2 §4.9.4, §6.5). Unlike the producer rings in
//! [`crate::ring`], software is the consumer here: the controller writes
//! completion/status events, software drains them and moves ERDP forward.

use alloc::vec::Vec;

use crate::error::XhciResult;
use crate::hal::{DmaAlloc, PhysAddr};
use crate::regs::{EventRingDequePtr, InterrupterRegs};
use crate::trb::Trb;
use crate::{read_ref, write_ref};

/// One entry of the Event Ring Segment Table (xHCI 1.2 §6.5, Figure 6-40).
/// This driver only ever allocates a single segment.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ErstEntry {
    ring_segment_base: PhysAddr,
    /// Only the low 16 bits are meaningful.
    ring_segment_size: u32,
    _reserved: u32,
}

const _: () = assert!(core::mem::size_of::<ErstEntry>() == 16);

/// Consumer event ring bound to one interrupter. `interrupter` is a raw
/// pointer rather than a borrow because its lifetime is the controller's
/// BAR0 mapping, which outlives this type by construction but isn't
/// expressible without threading a lifetime parameter through every caller.
pub struct EventRing {
    interrupter: *mut InterrupterRegs,
    trbs_virt: usize,
    trbs_phys: PhysAddr,
    len: usize,
    dequeue_index: usize,
    /// Consumer Cycle State.
    ccs: bool,
}

impl EventRing {
    /// Allocates `trb_count` event TRBs and a one-entry segment table, then
    /// programs ERSTSZ/ERDP/ERSTBA on `interrupter` in that order (xHCI 1.2
    /// §4.9.4: ERDP must be valid before ERSTBA is written).
    pub fn new(alloc: &dyn DmaAlloc, trb_count: usize, interrupter: *mut InterrupterRegs) -> XhciResult<Self> {
        let trbs_size = trb_count * core::mem::size_of::<Trb>();
        let (trbs_virt, trbs_phys) = alloc.calloc_aligned(trbs_size, 64, 64 * 1024)?;
        let (erst_virt, erst_phys) = alloc.calloc_aligned(core::mem::size_of::<ErstEntry>(), 64, 64 * 1024)?;

        unsafe {
            (erst_virt as *mut ErstEntry).write_volatile(ErstEntry {
                ring_segment_base: trbs_phys,
                ring_segment_size: trb_count as u32,
                _reserved: 0,
            });
        }

        let mut ring = EventRing {
            interrupter,
            trbs_virt,
            trbs_phys,
            len: trb_count,
            dequeue_index: 0,
            ccs: true,
        };

        write_ref!((*interrupter).erst_sz, 1u32);
        ring.update_erdp();
        write_ref!((*interrupter).erst_base, erst_phys);

        Ok(ring)
    }

    fn slot_ptr(&self, index: usize) -> *mut Trb {
        (self.trbs_virt + index * core::mem::size_of::<Trb>()) as *mut Trb
    }

    fn read_slot(&self, index: usize) -> Trb {
        unsafe { core::ptr::read_volatile(self.slot_ptr(index)) }
    }

    fn update_erdp(&mut self) {
        let offset = (self.dequeue_index * core::mem::size_of::<Trb>()) as u64;
        let dequeue_addr = self.trbs_phys.offset(offset);
        unsafe {
            write_ref!((*self.interrupter).event_ring_deque, EventRingDequePtr::from_addr(dequeue_addr));
        }
    }

    fn dequeue_trb(&mut self) -> Option<Trb> {
        let trb = self.read_slot(self.dequeue_index);
        if trb.cycle() != self.ccs {
            return None;
        }

        self.dequeue_index += 1;
        if self.dequeue_index == self.len {
            self.dequeue_index = 0;
            self.ccs = !self.ccs;
        }

        Some(trb)
    }

    /// Drains every TRB currently owned by software, advances ERDP, and
    /// clears Event Handler Busy so the controller can post more events.
    /// Called from interrupt context by `Controller::service_interrupt`.
    pub fn dequeue_events(&mut self) -> Vec<Trb> {
        let mut events = Vec::new();
        while let Some(trb) = self.dequeue_trb() {
            events.push(trb);
        }

        self.update_erdp();
        let interrupter = self.interrupter;
        let busy = read_ref!((*interrupter).event_ring_deque).with_event_handler_busy(true);
        write_ref!((*interrupter).event_ring_deque, busy);

        events
    }
}

//! Generic producer TRB ring: shared by the command ring and every
//! per-endpoint transfer ring (`SPEC_FULL.md` §3, §4.2). A contiguous,
//! 64-byte-aligned, non-64KiB-boundary-crossing array of TRBs terminated
//! by a Link-TRB.

use crate::error::{XhciError, XhciResult};
use crate::hal::{DmaAlloc, PhysAddr};
use crate::trb::Trb;

/// A producer ring of `Trb`s. Both the command ring and a transfer ring are
/// `TrbRing` instances — the only difference between them is which doorbell
/// target rings them and who reads their completions.
pub struct TrbRing {
    trbs_virt: usize,
    trbs_phys: PhysAddr,
    /// TRB count including the trailing Link-TRB.
    len: usize,
    /// Index of the next slot the producer will write (the "enqueue
    /// pointer"), in `[0, len)`.
    enqueue_index: usize,
    /// Producer Cycle State.
    pcs: bool,
}

impl TrbRing {
    /// Allocates a zeroed ring of `trb_count` TRBs (including the Link-TRB
    /// this function writes into the final slot) and initializes PCS=1.
    pub fn new(alloc: &dyn DmaAlloc, trb_count: usize) -> XhciResult<Self> {
        assert!(trb_count >= 2, "a ring needs at least one data slot and a link slot");
        let size = trb_count * core::mem::size_of::<Trb>();
        let (virt, phys) = alloc.calloc_aligned(size, 64, 64 * 1024)?;

        let mut ring = TrbRing {
            trbs_virt: virt,
            trbs_phys: phys,
            len: trb_count,
            enqueue_index: 0,
            pcs: true,
        };

        let link_phys = phys;
        ring.write_slot(trb_count - 1, Trb::new_link(link_phys.0));
        Ok(ring)
    }

    pub fn base_phys(&self) -> PhysAddr {
        self.trbs_phys
    }

    pub fn producer_cycle_state(&self) -> bool {
        self.pcs
    }

    fn slot_ptr(&self, index: usize) -> *mut Trb {
        (self.trbs_virt + index * core::mem::size_of::<Trb>()) as *mut Trb
    }

    fn read_slot(&self, index: usize) -> Trb {
        unsafe { core::ptr::read_volatile(self.slot_ptr(index)) }
    }

    fn write_slot(&mut self, index: usize, trb: Trb) {
        unsafe { core::ptr::write_volatile(self.slot_ptr(index), trb) };
    }

    /// Writes one TRB, stamping its cycle bit with the current PCS, and
    /// advances the enqueue pointer. Crossing the Link-TRB rewrites its
    /// cycle bit to match the new PCS and toggles PCS (xHCI 1.2 §4.9.2).
    pub fn put_trb(&mut self, mut trb: Trb) -> PhysAddr {
        trb.set_cycle(self.pcs);
        let index = self.enqueue_index;
        self.write_slot(index, trb);
        let written_phys = self.trbs_phys.offset((index * core::mem::size_of::<Trb>()) as u64);

        self.enqueue_index += 1;
        if self.enqueue_index == self.len - 1 {
            let mut link = self.read_slot(self.len - 1);
            link.set_cycle(self.pcs);
            self.write_slot(self.len - 1, link);
            self.pcs = !self.pcs;
            self.enqueue_index = 0;
        }

        written_phys
    }

    /// Writes every TRB of a Transfer Descriptor in order. Returns the
    /// physical address of the *first* TRB written (the one the caller
    /// should remember to correlate with its eventual completion event).
    /// The memory barrier between this and the doorbell write is the
    /// caller's responsibility (`SPEC_FULL.md` §5 ordering guarantee (i));
    /// see `Controller::ring_doorbell_after`.
    pub fn put_td(&mut self, trbs: &[Trb]) -> PhysAddr {
        assert!(!trbs.is_empty());
        let mut first = None;
        for trb in trbs {
            let phys = self.put_trb(*trb);
            if first.is_none() {
                first = Some(phys);
            }
        }
        first.unwrap()
    }
}

const _: () = {
    // property 1/2 sanity: a ring always has exactly len-1 data slots plus
    // one Link-TRB; asserted at runtime in `new` via the `trb_count >= 2`
    // check above since `len` isn't known at compile time.
};

impl Drop for TrbRing {
    fn drop(&mut self) {
        // Freeing DMA memory is the allocator's job in a real kernel
        // (tracked by physical frame, not by this ring); this driver has no
        // narrow interface for "free" (SPEC_FULL.md §6 only names alloc),
        // so rings are intentionally leaked from this crate's point of
        // view, matching the teacher's own "never freed" TODO in
        // `reference/xhci/regs.rs`.
    }
}

/// Maps an endpoint number + direction to its context/transfer-ring index
/// (xHCI 1.2 §4.5.1): `ep_index(0, _) == 1`, otherwise
/// `ep_number * 2 + dir_in`, covering `2..=31`.
pub const fn endpoint_index(ep_number: u8, dir_in: bool) -> u8 {
    if ep_number == 0 {
        1
    } else {
        ep_number * 2 + dir_in as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::tests_support::VecDmaAlloc;

    #[test]
    fn ring_has_one_link_trb_pointing_at_its_own_base() {
        let alloc = VecDmaAlloc::new();
        let ring = TrbRing::new(&alloc, 4).unwrap();
        let link = ring.read_slot(3);
        assert_eq!(link.trb_type(), Some(crate::trb::TrbType::Link));
        assert_eq!(link.parameter, ring.base_phys().0);
    }

    #[test]
    fn seven_puts_on_a_four_slot_ring_toggles_pcs_twice() {
        let alloc = VecDmaAlloc::new();
        let mut ring = TrbRing::new(&alloc, 4).unwrap();
        let initial_pcs = ring.producer_cycle_state();
        for _ in 0..7 {
            ring.put_trb(Trb::new_normal(0x1000, 8, true, true));
        }
        // n=4 (3 data slots + link): after k=7 puts, PCS = initial XOR
        // floor(7/3) mod 2 = initial XOR 1.
        assert_eq!(ring.producer_cycle_state(), !initial_pcs);
    }

    #[test]
    fn every_written_trb_carries_the_pcs_active_when_it_was_stamped() {
        let alloc = VecDmaAlloc::new();
        let mut ring = TrbRing::new(&alloc, 4).unwrap();
        let pcs_before = ring.producer_cycle_state();
        ring.put_trb(Trb::new_normal(0x2000, 4, true, true));
        let first = ring.read_slot(0);
        assert_eq!(first.cycle(), pcs_before);
    }

    #[test]
    fn endpoint_index_is_a_bijection() {
        use std::collections::BTreeSet;
        let mut seen = BTreeSet::new();
        assert_eq!(endpoint_index(0, false), 1);
        assert_eq!(endpoint_index(0, true), 1);
        for ep in 1..=15u8 {
            for dir_in in [false, true] {
                let idx = endpoint_index(ep, dir_in);
                assert!((2..=31).contains(&idx));
                assert!(seen.insert(idx), "index {idx} reused for ep {ep} dir_in {dir_in}");
            }
        }
    }
}

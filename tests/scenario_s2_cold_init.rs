//! S2: cold init on a model controller reporting MaxSlots=16,
//! MaxScratchpad=4. After `Controller::new`: CONFIG.MaxSlotsEn=16, the
//! DCBAA's scratchpad pointer (entry 0) resolves to a 4-entry array of
//! 4 KiB-aligned buffers, USBCMD.RUN is set, and USBSTS.HCHALTED is clear.

mod common;

use xhci_driver::regs::{UsbCmd, UsbSts};

#[test]
fn cold_init_matches_the_model_controller() {
    let (_bar0, _simulator, mut controller) = common::bring_up(16, 4, 4);

    assert_eq!(controller.max_slots(), 16);

    let op = controller.op_regs();
    assert_eq!(op.config, 16);
    assert!(op.usbcmd.contains(UsbCmd::RUN));
    assert!(!op.usbsts.contains(UsbSts::HCHALTED));

    let dcbaa_phys = op.dcbaap;
    assert!(!dcbaa_phys.is_null());

    // Entry 0 of the DCBAA holds the scratchpad pointer array's physical
    // address; `VecDmaAlloc` identity-maps, so it can be read back directly.
    let scratch_array_addr = unsafe { (dcbaa_phys.0 as *const u64).read_volatile() };
    assert_ne!(scratch_array_addr, 0);

    let scratch_entries = scratch_array_addr as *const u64;
    for i in 0..4u64 {
        let entry = unsafe { scratch_entries.add(i as usize).read_volatile() };
        assert_ne!(entry, 0, "scratchpad buffer {i} was never allocated");
        assert_eq!(entry % 4096, 0, "scratchpad buffer {i} is not 4 KiB aligned");
    }

    let _ = &mut controller;
}

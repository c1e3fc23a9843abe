//! S1: a device whose class/subclass/prog-if matches an EHCI controller
//! (0x0C, 0x03, 0x20) rather than xHCI (0x0C, 0x03, 0x30) is rejected before
//! anything touches BAR0.

use xhci_driver::hal::tests_support::{NullPci, VecDmaAlloc, VecLog};
use xhci_driver::{Controller, ControllerConfig, XhciError};

#[test]
fn ehci_prog_if_is_rejected_as_not_xhci() {
    let pci = NullPci {
        bar0_virt: 0,
        bar0_len: 0,
        class_triplet: (0x0c, 0x03, 0x20),
    };

    let result = Controller::new(pci, VecDmaAlloc::new(), VecLog, ControllerConfig::default());
    assert_eq!(result.err(), Some(XhciError::NotXhci));
}

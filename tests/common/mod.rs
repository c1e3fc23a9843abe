//! Shared scaffolding for the integration suite: a byte-buffer stand-in for
//! a mapped BAR0 region, plus a background thread that plays the part of
//! the handful of self-clearing hardware bits (`USBCMD.HCRST`, `USBSTS.HCH`)
//! `Controller::new` busy-polls on. Everything past cold init that depends
//! on the command ring or event ring (slot enable, address device,
//! configure endpoint) is deliberately out of reach here: `Controller`
//! exposes no test seam onto either ring's internals, and reconstructing
//! one from raw CRCR/ERSTBA offsets would mean re-implementing half the
//! driver inside its own test harness. Those code paths stay covered by the
//! `#[cfg(test)]` unit tests next to the code they exercise.

use std::boxed::Box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::vec;

use xhci_driver::hal::tests_support::{NullPci, VecDmaAlloc, VecLog};
use xhci_driver::{Controller, ControllerConfig};

const XHCI_CLASS_TRIPLET: (u8, u8, u8) = (0x0c, 0x03, 0x30);

const CAPS_LEN: usize = 0x20;
const RUNTIME_OFF: u32 = 0x1000;
const DOORBELL_OFF: u32 = 0xB000;
pub const MMIO_SIZE: usize = 0x1_0000;

unsafe fn write_u8(base: usize, offset: usize, value: u8) {
    unsafe { (base as *mut u8).add(offset).write_volatile(value) };
}

unsafe fn write_u32(base: usize, offset: usize, value: u32) {
    unsafe { (base as *mut u8).add(offset).cast::<u32>().write_volatile(value) };
}

/// Lays out a `CapsReg` + `OperationalRegs` + port register block inside a
/// freshly zeroed buffer, matching the field offsets `regs.rs` expects:
/// operational registers right after the capability registers, ports at
/// `CAPLENGTH + 0x400`, runtime and doorbell regions further out.
/// `USBSTS.HCH` starts set so `Controller::new` skips the
/// already-running/stop branch entirely.
pub fn build_mock_bar0(max_device_slots: u8, max_ports: u8, scratchpad_count: u8) -> Box<[u8]> {
    let mut buf = vec![0u8; MMIO_SIZE].into_boxed_slice();
    let base = buf.as_mut_ptr() as usize;

    unsafe {
        write_u8(base, 0, CAPS_LEN as u8); // reg_length

        let hcsparams_1 = (max_device_slots as u32) | (1u32 << 8) | ((max_ports as u32) << 24);
        write_u32(base, 4, hcsparams_1);

        let hcsparams_2 = (scratchpad_count as u32) << 27;
        write_u32(base, 8, hcsparams_2);

        // hccparams_1: AC64 = 1, CSZ = 0 (32-byte contexts), no xECP list.
        write_u32(base, 16, 1);
        write_u32(base, 20, DOORBELL_OFF);
        write_u32(base, 24, RUNTIME_OFF);

        // USBSTS.HCHALTED at operational-register offset 4.
        write_u32(base, CAPS_LEN + 4, 1);
    }

    buf
}

/// Plays hardware for the two bits nothing else in this buffer will ever
/// clear on its own: HCRST self-clearing, and HCH dropping once RUN is set.
pub struct HwSimulator {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl HwSimulator {
    pub fn start(bar0_virt: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let op_base = bar0_virt + CAPS_LEN;
            let usbcmd_ptr = op_base as *mut u32;
            let usbsts_ptr = (op_base + 4) as *mut u32;

            while !stop_clone.load(Ordering::Relaxed) {
                unsafe {
                    let cmd = usbcmd_ptr.read_volatile();
                    if cmd & (1 << 1) != 0 {
                        usbcmd_ptr.write_volatile(cmd & !(1 << 1));
                    }
                    if cmd & 1 != 0 {
                        let sts = usbsts_ptr.read_volatile();
                        if sts & 1 != 0 {
                            usbsts_ptr.write_volatile(sts & !1);
                        }
                    }
                }
                thread::yield_now();
            }
        });

        HwSimulator { stop, handle: Some(handle) }
    }
}

impl Drop for HwSimulator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Brings up a `Controller` against a mock BAR0. The returned buffer and
/// simulator must outlive the controller; both get dropped (in the right
/// order, as locals do) when the caller's test function returns.
pub fn bring_up(max_device_slots: u8, max_ports: u8, scratchpad_count: u8) -> (Box<[u8]>, HwSimulator, Controller<NullPci, VecDmaAlloc, VecLog>) {
    let bar0 = build_mock_bar0(max_device_slots, max_ports, scratchpad_count);
    let bar0_virt = bar0.as_ptr() as usize;
    let simulator = HwSimulator::start(bar0_virt);

    let pci = NullPci {
        bar0_virt,
        bar0_len: MMIO_SIZE,
        class_triplet: XHCI_CLASS_TRIPLET,
    };

    let mut config = ControllerConfig::default();
    config.poll_timeout_ms = 50;

    let controller = Controller::new(pci, VecDmaAlloc::new(), VecLog, config).expect("mock controller bring-up");
    (bar0, simulator, controller)
}

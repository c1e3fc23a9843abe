//! Controller lifecycle: from a freshly-mapped BAR0 to a running
//! controller with an enabled command ring and event ring
//! (`SPEC_FULL.md` §4.4), the command-ring execution path, and the
//! bounded-wait helper every busy-poll in this crate shares.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::ControllerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{XhciError, XhciResult};
use crate::event_ring::EventRing;
use crate::hal::{DmaAlloc, Log, PciDevice, PhysAddr};
use crate::regs::{
    CapsReg, DoorbellManager, ExtCapIter, OperationalRegs, UsbCmd, UsbLegacySupportCap, UsbSts,
    UsbSupportedProtocolCap, EXT_CAP_ID_LEGACY_SUPPORT, EXT_CAP_ID_SUPPORTED_PROTOCOL,
};
use crate::ring::TrbRing;
use crate::trb::{CommandCompletionEvent, EventTrb, Trb};
use crate::{debug, error, info};

const XHCI_CLASS_TRIPLET: (u8, u8, u8) = (0x0c, 0x03, 0x30);

/// The USB major revision and Enable-Slot protocol slot type a root-hub
/// port was assigned by a Supported Protocol capability (`SPEC_FULL.md`
/// §4.1). `None` until the xECP walk classifies the port.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortProtocol {
    pub major_revision: u8,
    pub slot_type: u8,
}

/// A live xHCI controller. Generic over the three HAL seams so every
/// MMIO/DMA/log access is monomorphized rather than going through a vtable,
/// matching the rest of this crate's register types.
pub struct Controller<P: PciDevice, A: DmaAlloc, L: Log> {
    pci: P,
    alloc: A,
    log: L,
    config: ControllerConfig,

    caps: *const CapsReg,
    op_regs: *mut OperationalRegs,
    doorbells: Mutex<DoorbellManager>,

    command_ring: Mutex<TrbRing>,
    event_ring: Mutex<EventRing>,
    last_command_completion: Mutex<Option<CommandCompletionEvent>>,

    dcbaa_virt: usize,
    max_slots: u8,
    context_size_64: bool,
    port_protocols: Vec<PortProtocol>,

    dispatch: Dispatcher,
}

// Every mutable access to the raw MMIO/ring pointers goes through a `Mutex`
// or is confined to the single-threaded busy-poll call path this crate
// assumes (`SPEC_FULL.md` §6); nothing here relies on `&Controller` giving
// exclusive access across real concurrent callers.
unsafe impl<P: PciDevice, A: DmaAlloc, L: Log> Send for Controller<P, A, L> {}
unsafe impl<P: PciDevice, A: DmaAlloc, L: Log> Sync for Controller<P, A, L> {}

impl<P: PciDevice, A: DmaAlloc, L: Log> Controller<P, A, L> {
    /// Brings up a controller already identified as an xHCI device and
    /// already BAR0-mapped by the caller. Runs the full ten-step sequence:
    /// validate class, claim BIOS handoff, halt and reset, program
    /// DCBAA/scratchpad, allocate the command ring, allocate and arm the
    /// event ring/interrupter, then set RUN.
    pub fn new(mut pci: P, alloc: A, log: L, config: ControllerConfig) -> XhciResult<Self> {
        if pci.class_triplet() != XHCI_CLASS_TRIPLET {
            return Err(XhciError::NotXhci);
        }

        let (bar0_virt, _bar0_len) = pci.bar0();
        let caps = bar0_virt as *const CapsReg;
        let caps_ref = unsafe { &*caps };
        let op_regs = caps_ref.operational_regs_ptr();
        let max_slots = config.max_slots_cap.min(caps_ref.max_device_slots() as u8);
        let context_size_64 = caps_ref.context_size_64byte();

        info!(log, "controller"; "mapped at {:#x}, {} slots, {}-byte contexts", bar0_virt, max_slots, if context_size_64 { 64 } else { 32 });

        let mut port_protocols = vec![PortProtocol::default(); caps_ref.max_ports() as usize];

        // Step: claim every USB Legacy Support capability from the BIOS,
        // and classify ports from every Supported Protocol capability.
        // Claiming is unconditional (`SPEC_FULL.md` §4.4 resolves the
        // "claim only if BIOS-owned" question in favor of always asking).
        unsafe {
            for cap in ExtCapIter::new(bar0_virt, caps_ref) {
                match cap.id {
                    EXT_CAP_ID_LEGACY_SUPPORT if config.require_legacy_handoff => {
                        let mut legacy = UsbLegacySupportCap::from_ext_cap(&cap);
                        legacy.claim_os_owned();
                        let mut iterations = 0u32;
                        while legacy.bios_owned() {
                            iterations += 1;
                            if iterations > config.poll_timeout_ms.saturating_mul(1_000) {
                                error!(log, "controller"; "BIOS would not release USB legacy ownership");
                                return Err(XhciError::ControllerHung);
                            }
                            core::hint::spin_loop();
                        }
                    }
                    EXT_CAP_ID_SUPPORTED_PROTOCOL => {
                        let proto = UsbSupportedProtocolCap::from_ext_cap(&cap);
                        let first = proto.first_port_index();
                        for i in 0..proto.port_count() {
                            let idx = (first + i) as usize;
                            if let Some(slot) = port_protocols.get_mut(idx) {
                                *slot = PortProtocol {
                                    major_revision: proto.major_revision(),
                                    slot_type: proto.slot_type(),
                                };
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let op = unsafe { &mut *op_regs };

        // If the controller is already running (HCHALTED clear), stop it
        // before resetting.
        if (read_vol(&op.usbsts) & UsbSts::HCHALTED).is_empty() {
            let cmd = read_vol(&op.usbcmd);
            write_vol(&mut op.usbcmd, cmd & !UsbCmd::RUN);
            poll_until(config.poll_timeout_ms, || {
                !(read_vol(&op.usbsts) & UsbSts::HCHALTED).is_empty()
            })?;
        }

        write_vol(&mut op.usbcmd, UsbCmd::HCRESET);
        poll_until(config.poll_timeout_ms, || {
            (read_vol(&op.usbcmd) & UsbCmd::HCRESET).is_empty()
        })?;
        poll_until(config.poll_timeout_ms, || {
            (read_vol(&op.usbsts) & UsbSts::NOT_READY).is_empty()
        })?;

        write_vol(&mut op.config, max_slots as u32);

        // Device Context Base Address Array: one PhysAddr per slot plus a
        // reserved entry 0 for the scratchpad array pointer.
        let dcbaa_entries = max_slots as usize + 1;
        let (dcbaa_virt, dcbaa_phys) =
            alloc.calloc_aligned(dcbaa_entries * core::mem::size_of::<PhysAddr>(), 64, 4096)?;

        let scratchpad_count = caps_ref.max_scratchpad_buffers();
        if scratchpad_count > 0 {
            let (sp_array_virt, sp_array_phys) =
                alloc.calloc_aligned(scratchpad_count * core::mem::size_of::<PhysAddr>(), 64, 4096)?;
            for i in 0..scratchpad_count {
                let (_buf_virt, buf_phys) = alloc.calloc_aligned(4096, 4096, 4096)?;
                unsafe {
                    ((sp_array_virt as *mut PhysAddr).add(i)).write_volatile(buf_phys);
                }
            }
            unsafe {
                (dcbaa_virt as *mut PhysAddr).write_volatile(sp_array_phys);
            }
        }
        write_vol(&mut op.dcbaap, dcbaa_phys);

        let command_ring = TrbRing::new(&alloc, config.command_ring_trb_count)?;
        write_vol(&mut op.crcr, command_ring.base_phys().0 as usize | command_ring.producer_cycle_state() as usize);

        let runtime_regs = unsafe { &mut *caps_ref.runtime_regs_ptr() };
        let interrupter = runtime_regs.interrupter_ptr(0);
        let event_ring = EventRing::new(&alloc, config.event_ring_trb_count, interrupter)?;
        unsafe {
            crate::write_ref!((*interrupter).iman, crate::regs::Iman::INTERRUPT_ENABLE);
        }

        pci.init_msix()?;
        let vector_data = pci.default_msix_vector_data(0, 0);
        pci.set_msix_vector(0, 0, vector_data)?;
        pci.enable_msix()?;

        let doorbells = unsafe { DoorbellManager::new(caps_ref.doorbells_ptr(), max_slots as usize) };

        let cmd = read_vol(&op.usbcmd);
        write_vol(&mut op.usbcmd, cmd | UsbCmd::RUN | UsbCmd::INTERRUPT_ENABLE);
        poll_until(config.poll_timeout_ms, || {
            (read_vol(&op.usbsts) & UsbSts::HCHALTED).is_empty()
        })?;

        debug!(log, "controller"; "running");

        Ok(Controller {
            pci,
            alloc,
            log,
            config,
            caps,
            op_regs,
            doorbells: Mutex::new(doorbells),
            command_ring: Mutex::new(command_ring),
            event_ring: Mutex::new(event_ring),
            last_command_completion: Mutex::new(None),
            dcbaa_virt,
            max_slots,
            context_size_64,
            port_protocols,
            dispatch: {
                let mut dispatch = Dispatcher::new();
                dispatch.reserve(max_slots);
                dispatch
            },
        })
    }

    pub fn alloc(&self) -> &A {
        &self.alloc
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn context_size_64(&self) -> bool {
        self.context_size_64
    }

    pub fn max_slots(&self) -> u8 {
        self.max_slots
    }

    pub fn port_count(&self) -> u8 {
        unsafe { (*self.caps).max_ports() }
    }

    pub fn port_protocol(&self, port_index: u8) -> PortProtocol {
        self.port_protocols[port_index as usize]
    }

    pub fn op_regs(&self) -> &mut OperationalRegs {
        unsafe { &mut *self.op_regs }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatch
    }

    /// Records `phys` as device slot `slot_id`'s Device Context pointer in
    /// the DCBAA (xHCI 1.2 §6.1). Called once per slot right after Enable
    /// Slot succeeds.
    pub fn set_device_context(&self, slot_id: u8, phys: PhysAddr) {
        unsafe {
            ((self.dcbaa_virt as *mut PhysAddr).add(slot_id as usize)).write_volatile(phys);
        }
    }

    /// Rings the command doorbell after a release fence, per the
    /// producer-before-doorbell ordering this crate requires everywhere
    /// (`SPEC_FULL.md` §5 ordering guarantee (i)).
    fn ring_command_doorbell(&self) {
        core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
        self.doorbells.lock().ring_command();
    }

    /// Rings an endpoint's doorbell after the same release fence.
    pub fn ring_endpoint_doorbell(&self, slot_id: u8, endpoint_index: u8) {
        core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
        self.doorbells.lock().ring(slot_id, endpoint_index);
    }

    /// Drains the hardware event ring and dispatches each TRB: Command
    /// Completion events fill the single-outstanding-command mailbox,
    /// Transfer events go to the per-endpoint dispatcher, Port Status
    /// Change events are returned for the caller (the enumeration poll
    /// loop) to act on. Acks the interrupter's Interrupt Pending bit.
    pub fn service_interrupt(&self) -> Vec<u8> {
        let mut changed_ports = Vec::new();
        let events = self.event_ring.lock().dequeue_events();

        for trb in events {
            match trb.into_event_trb() {
                EventTrb::CommandCompletion(event) => {
                    debug!(self.log, "controller"; "command completed: {:?}", event.completion_code);
                    *self.last_command_completion.lock() = Some(event);
                }
                EventTrb::Transfer(event) => {
                    self.dispatch.deliver(event);
                }
                EventTrb::PortStatusChange(event) => {
                    changed_ports.push(event.port_index);
                }
                EventTrb::Other(_) => {}
            }
        }

        let runtime_regs = unsafe { &mut *(*self.caps).runtime_regs_ptr() };
        let interrupter = runtime_regs.interrupter_ptr(0);
        unsafe {
            crate::write_ref!((*interrupter).iman, crate::regs::Iman::INTERRUPT_PENDING);
        }

        changed_ports
    }

    /// Enqueues `trb` on the command ring, rings the doorbell, and busy-polls
    /// `service_interrupt` until the matching Command Completion Event
    /// arrives or the configured timeout elapses. The command ring's single
    /// `Mutex` is this crate's only serialization point (`SPEC_FULL.md`
    /// §4.7): only one command is ever in flight.
    pub fn send_command(&self, trb: Trb) -> XhciResult<CommandCompletionEvent> {
        *self.last_command_completion.lock() = None;
        {
            let mut ring = self.command_ring.lock();
            ring.put_trb(trb);
        }
        self.ring_command_doorbell();

        let mut iterations = 0u32;
        let budget = self.config.poll_timeout_ms.saturating_mul(1_000);
        loop {
            self.service_interrupt();
            if let Some(event) = self.last_command_completion.lock().take() {
                return Ok(event);
            }
            iterations += 1;
            if iterations > budget {
                return Err(XhciError::ControllerHung);
            }
            core::hint::spin_loop();
        }
    }

    /// The bounded busy-wait every lifecycle step and every command/transfer
    /// wait in this crate funds through: no wall-clock time source is named
    /// in the HAL (`SPEC_FULL.md` §6), so `timeout_ms` is an iteration
    /// budget rather than a true elapsed-time bound.
    pub fn poll_until(&self, cond: impl FnMut() -> bool) -> XhciResult<()> {
        poll_until(self.config.poll_timeout_ms, cond)
    }
}

fn poll_until(timeout_ms: u32, mut cond: impl FnMut() -> bool) -> XhciResult<()> {
    const ITERATIONS_PER_MS: u32 = 10_000;
    let budget = timeout_ms.saturating_mul(ITERATIONS_PER_MS);
    for _ in 0..budget {
        if cond() {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(XhciError::ControllerHung)
}

fn read_vol<T: Copy>(place: &T) -> T {
    unsafe { core::ptr::read_volatile(place) }
}

fn write_vol<T>(place: &mut T, value: T) {
    unsafe { core::ptr::write_volatile(place, value) };
}

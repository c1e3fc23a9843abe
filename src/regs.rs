//! Typed view over the controller's capability, operational, runtime,
//! doorbell, and extended-capability MMIO regions (xHCI 1.2 §5). All
//! accesses are volatile; CRCR/DCBAAP/ERSTBA/ERDP are logically 64-bit but
//! this driver only targets hosts where a `usize` write is wide enough
//! (AC64 is assumed set — see `SPEC_FULL.md` Non-goals for the AC64=0 case).

use bitfield_struct::bitfield;
use bitflags::bitflags;

use crate::hal::PhysAddr;
use crate::{read_ref, write_ref};

#[repr(C)]
pub struct CapsReg {
    reg_length: u8,
    _reserved0: u8,
    _version_number: u16,
    hcsparams_1: u32,
    hcsparams_2: u32,
    hcsparams_3: u32,
    hccparams_1: u32,
    doorbell_off: u32,
    runtime_off: u32,
    hccparams_2: u32,
}

impl CapsReg {
    pub fn operational_regs_ptr(&self) -> *mut OperationalRegs {
        let base = self as *const _ as *const u8;
        unsafe { base.add(self.reg_length as usize) as *mut OperationalRegs }
    }

    pub fn runtime_regs_ptr(&self) -> *mut RuntimeRegs {
        let base = self as *const _ as *const u8;
        unsafe { base.add(self.runtime_off as usize) as *mut RuntimeRegs }
    }

    pub fn doorbells_ptr(&self) -> *mut DoorbellReg {
        let base = self as *const _ as *const u8;
        unsafe { base.add(self.doorbell_off as usize) as *mut DoorbellReg }
    }

    /// Byte offset of the first extended capability from the start of
    /// MMIO space, or `None` if the capability list is empty.
    pub fn first_ext_cap_offset(&self) -> Option<usize> {
        let dwords = (self.hccparams_1 >> 16) & 0xFFFF;
        if dwords == 0 {
            None
        } else {
            Some((dwords as usize) * 4)
        }
    }

    pub const fn max_device_slots(&self) -> usize {
        (self.hcsparams_1 & 0xFF) as usize
    }
    pub const fn max_interrupts(&self) -> u16 {
        ((self.hcsparams_1 >> 8) & 0x7FF) as u16
    }
    pub const fn max_ports(&self) -> u8 {
        (self.hcsparams_1 >> 24) as u8
    }
    pub const fn erst_max(&self) -> u8 {
        ((self.hcsparams_2) as u8) & 0xF
    }
    pub const fn max_scratchpad_buffers(&self) -> usize {
        let hi = (self.hcsparams_2 >> 21) & 0x1F;
        let lo = (self.hcsparams_2 >> 27) & 0x1F;
        ((hi << 5) | lo) as usize
    }
    pub const fn addressing_64bit(&self) -> bool {
        self.hccparams_1 & 1 != 0
    }
    pub const fn context_size_64byte(&self) -> bool {
        (self.hccparams_1 >> 2) & 1 != 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UsbCmd: u32 {
        /// Run/Stop (R/S). Software starts and stops the schedule with this
        /// bit; the controller reflects completion via USBSTS.HCH
        /// (xHCI 1.2 §5.4.1).
        const RUN = 1 << 0;
        /// Host Controller Reset. Self-clears when the reset completes.
        const HCRESET = 1 << 1;
        /// Interrupter Enable — gates MSI-X delivery for every interrupter.
        const INTERRUPT_ENABLE = 1 << 2;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UsbSts: u32 {
        /// HCHalted. Zero while RUN is set; the controller sets this after
        /// it finishes draining in-flight work following RUN being cleared.
        const HCHALTED = 1 << 0;
        /// Event Interrupt, RW1C — set whenever any interrupter's IP bit
        /// transitions 0->1.
        const EINT = 1 << 3;
        /// Controller Not Ready. No operational/doorbell register writes
        /// are permitted while this is set.
        const NOT_READY = 1 << 11;
        const HCERROR = 1 << 12;
    }
}

#[repr(C)]
pub struct OperationalRegs {
    pub usbcmd: UsbCmd,
    pub usbsts: UsbSts,
    _page_size: u32,
    _reserved0: [u32; 2],
    pub dnctrl: u32,
    pub crcr: usize,
    _reserved1: [u32; 4],
    pub dcbaap: PhysAddr,
    pub config: u32,
    _reserved2: [u32; 49],
}

impl OperationalRegs {
    /// Port register block for a zero-indexed port. xHCI lays these out
    /// starting at byte offset 0x400 from the operational register base,
    /// one `PortRegisters` (16 bytes) per port.
    pub unsafe fn port_registers(&mut self, port_index: u8) -> *mut PortRegisters {
        let base = self as *mut Self as *mut u8;
        unsafe {
            base.add(0x400 + size_of::<PortRegisters>() * port_index as usize) as *mut PortRegisters
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortSpeed {
    Undefined = 0,
    Full = 1,
    Low = 2,
    High = 3,
    Super = 4,
    SuperPlus = 5,
}

impl PortSpeed {
    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Full,
            2 => Self::Low,
            3 => Self::High,
            4 => Self::Super,
            5 => Self::SuperPlus,
            _ => Self::Undefined,
        }
    }

    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    /// Initial ep0 max-packet-size guess before the 8-byte device
    /// descriptor fetch refines it (`SPEC_FULL.md` §4.5).
    pub const fn initial_control_mps(self) -> u16 {
        match self {
            Self::Low => 8,
            Self::Full | Self::High => 64,
            Self::Super | Self::SuperPlus => 512,
            Self::Undefined => 8,
        }
    }

    pub const fn is_usb3(self) -> bool {
        matches!(self, Self::Super | Self::SuperPlus)
    }
}

/// Port Status & Control register (xHCI 1.2 §5.4.8, PORTSC).
#[bitfield(u32)]
pub struct PortScReg {
    /// Current Connect Status.
    pub ccs: bool,
    /// Port Enabled/Disabled, RW1CS.
    pub ped: bool,
    #[bits(2)]
    __: u8,
    /// Port Reset, RW1S.
    pub pr: bool,
    #[bits(4)]
    __: u8,
    /// Port Power, RWS.
    pub pp: bool,
    #[bits(4)]
    pub port_speed: PortSpeed,
    #[bits(3)]
    __: u8,
    /// Connect Status Change, RW1CS.
    pub csc: bool,
    /// Port Enabled/Disabled Change, RW1CS.
    pub pec: bool,
    /// Warm Port Reset Change (USB3 only), RW1CS.
    pub wrc: bool,
    #[bits(1)]
    __: u8,
    /// Port Reset Change, RW1CS.
    pub prc: bool,
    #[bits(9)]
    __: u16,
    /// Warm Port Reset (USB3 only), RW1S.
    pub wpr: bool,
}

#[derive(Debug)]
#[repr(C)]
pub struct PortRegisters {
    pub port_sc: PortScReg,
    _port_pmsc: u32,
    _port_li: u32,
    _reserved: u32,
}

const _: () = assert!(core::mem::size_of::<PortRegisters>() == 0x10);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Iman: u32 {
        const INTERRUPT_PENDING = 1 << 0;
        const INTERRUPT_ENABLE = 1 << 1;
    }
}

#[bitfield(u64)]
pub struct EventRingDequePtr {
    #[bits(3)]
    pub erst_segment_index: u8,
    pub event_handler_busy: bool,
    #[bits(60)]
    pub addr_bits: u64,
}

impl EventRingDequePtr {
    pub fn from_addr(addr: PhysAddr) -> Self {
        Self::from_bits(addr.0 & !0xF)
    }
}

#[repr(C)]
pub struct InterrupterRegs {
    pub iman: Iman,
    _imod: u32,
    pub erst_sz: u32,
    _reserved: u32,
    pub erst_base: PhysAddr,
    pub event_ring_deque: EventRingDequePtr,
}

#[repr(C)]
pub struct RuntimeRegs {
    _mf_index: u32,
    _reserved: [u32; 7],
    interrupter_registers: [InterrupterRegs; 1024],
}

impl RuntimeRegs {
    pub fn interrupter_ptr(&mut self, index: usize) -> *mut InterrupterRegs {
        &raw mut self.interrupter_registers[index]
    }
}

#[bitfield(u32)]
pub struct DoorbellReg {
    db_target: u8,
    __: u8,
    db_stream_id: u16,
}

/// Handle onto the doorbell array; `ring(slot_id, target)` is the only
/// operation, the target meaning depends on the ring (0 = command ring,
/// otherwise an endpoint index, xHCI 1.2 §5.6).
pub struct DoorbellManager {
    base: *mut DoorbellReg,
    max_slots: usize,
}

impl DoorbellManager {
    /// # Safety
    /// `base` must point at a valid doorbell array of at least `max_slots`
    /// entries for the lifetime of the returned manager.
    pub unsafe fn new(base: *mut DoorbellReg, max_slots: usize) -> Self {
        DoorbellManager { base, max_slots }
    }

    pub fn ring(&mut self, slot_id: u8, target: u8) {
        assert!((slot_id as usize) <= self.max_slots);
        let ptr = unsafe { self.base.add(slot_id as usize) };
        unsafe { ptr.write_volatile(DoorbellReg::new().with_db_target(target)) };
    }

    pub fn ring_command(&mut self) {
        self.ring(0, 0);
    }
}

/// One entry of the USB Legacy Support / Supported Protocol extended
/// capability linked list header (xHCI 1.2 §7, common to every xECP).
#[derive(Debug, Clone, Copy)]
struct ExtCapHeader {
    id: u8,
    next_dwords: u8,
    raw: u32,
}

impl ExtCapHeader {
    fn read(ptr: *const u32) -> Self {
        let raw = unsafe { core::ptr::read_volatile(ptr) };
        ExtCapHeader {
            id: (raw & 0xFF) as u8,
            next_dwords: ((raw >> 8) & 0xFF) as u8,
            raw,
        }
    }
}

pub const EXT_CAP_ID_LEGACY_SUPPORT: u8 = 1;
pub const EXT_CAP_ID_SUPPORTED_PROTOCOL: u8 = 2;

/// Walks the extended-capability linked list starting at HCCPARAMS1.xECP,
/// in 4-byte increments, stopping on a zero next-pointer. Generalizes the
/// single-capability walker this driver was grounded on into one
/// enumerator shared by every capability id.
pub struct ExtCapIter {
    next: Option<*mut u32>,
}

impl ExtCapIter {
    /// # Safety
    /// `mmio_base` must be the mapped BAR0 virtual base, and `caps` the
    /// `CapsReg` read from it.
    pub unsafe fn new(mmio_base: usize, caps: &CapsReg) -> Self {
        let next = caps
            .first_ext_cap_offset()
            .map(|off| (mmio_base + off) as *mut u32);
        ExtCapIter { next }
    }
}

/// One capability found while walking the list: its id and a pointer to
/// its first dword, for the caller to reinterpret per-id.
pub struct ExtCap {
    pub id: u8,
    pub ptr: *mut u32,
}

impl Iterator for ExtCapIter {
    type Item = ExtCap;

    fn next(&mut self) -> Option<ExtCap> {
        let ptr = self.next?;
        let header = ExtCapHeader::read(ptr);
        self.next = if header.next_dwords == 0 {
            None
        } else {
            Some(unsafe { ptr.add(header.next_dwords as usize) })
        };
        Some(ExtCap { id: header.id, ptr })
    }
}

/// USB Legacy Support Capability (xHCI 1.2 §7.1.1). Dword 0 is the generic
/// header; bit 24 is HC OS Owned Semaphore, bit 16 is HC BIOS Owned
/// Semaphore.
pub struct UsbLegacySupportCap {
    ptr: *mut u32,
}

impl UsbLegacySupportCap {
    /// # Safety
    /// `cap.id` must be [`EXT_CAP_ID_LEGACY_SUPPORT`].
    pub unsafe fn from_ext_cap(cap: &ExtCap) -> Self {
        UsbLegacySupportCap { ptr: cap.ptr }
    }

    fn read(&self) -> u32 {
        unsafe { core::ptr::read_volatile(self.ptr) }
    }

    fn write(&mut self, value: u32) {
        unsafe { core::ptr::write_volatile(self.ptr, value) };
    }

    pub fn bios_owned(&self) -> bool {
        self.read() & (1 << 16) != 0
    }

    pub fn claim_os_owned(&mut self) {
        let value = self.read() | (1 << 24);
        self.write(value);
    }
}

/// USB Supported Protocol Capability (xHCI 1.2 §7.2): classifies root-hub
/// ports by USB major revision and records the protocol slot type used
/// when enabling a slot on one of its ports.
pub struct UsbSupportedProtocolCap {
    ptr: *mut u32,
}

impl UsbSupportedProtocolCap {
    /// # Safety
    /// `cap.id` must be [`EXT_CAP_ID_SUPPORTED_PROTOCOL`].
    pub unsafe fn from_ext_cap(cap: &ExtCap) -> Self {
        UsbSupportedProtocolCap { ptr: cap.ptr }
    }

    fn dword(&self, index: usize) -> u32 {
        unsafe { core::ptr::read_volatile(self.ptr.add(index)) }
    }

    pub fn major_revision(&self) -> u8 {
        ((self.dword(0) >> 24) & 0xFF) as u8
    }

    /// Zero-based index of the first port this capability describes.
    pub fn first_port_index(&self) -> u8 {
        (((self.dword(2)) & 0xFF) as u8).wrapping_sub(1)
    }

    pub fn port_count(&self) -> u8 {
        ((self.dword(2) >> 8) & 0xFF) as u8
    }

    /// The Protocol Slot Type passed to Enable-Slot for a port covered by
    /// this capability (xHCI 1.2 §7.2.2.1.4, dword 3 bits [4:0]).
    pub fn slot_type(&self) -> u8 {
        (self.dword(3) & 0x1F) as u8
    }
}

/// Reads the current PORTSC value of a port.
pub fn read_port_sc(op_regs: &mut OperationalRegs, port_index: u8) -> PortScReg {
    let port = unsafe { &mut *op_regs.port_registers(port_index) };
    read_ref!(port.port_sc)
}

pub fn write_port_sc(op_regs: &mut OperationalRegs, port_index: u8, value: PortScReg) {
    let port = unsafe { &mut *op_regs.port_registers(port_index) };
    write_ref!(port.port_sc, value);
}

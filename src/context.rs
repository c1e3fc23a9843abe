//! Slot, Endpoint, Device, and Input contexts (xHCI 1.2 §6.2). Context size
//! is either 32 or 64 bytes depending on HCCPARAMS1.CSZ; both layouts are
//! the same generic struct parameterized on trailing padding so the field
//! offsets that matter (dword3, qword2) land at the same place in either
//! size, matching table 6-1/6-2 of the spec.

use core::mem::offset_of;

use bitfield_struct::bitfield;

use crate::hal::PhysAddr;
use crate::regs::PortSpeed;

#[bitfield(u32)]
pub struct SlotContextDword0 {
    /// Route String used by hubs to route packets to this device (USB3 §8.9).
    #[bits(20)]
    pub route_string: u32,
    #[bits(4)]
    pub speed: u8,
    #[bits(1)]
    __: bool,
    pub multi_tt: bool,
    pub is_hub: bool,
    /// Index of the last valid endpoint context (1-31); (entries+1)*ctx_size
    /// bytes is the device context's total size.
    #[bits(5)]
    pub context_entries: u8,
}

#[bitfield(u32)]
pub struct SlotContextDword1 {
    pub max_exit_latency: u16,
    /// 1-indexed root hub port this device is attached through.
    pub root_hub_port_id: u8,
    pub number_of_ports: u8,
}

#[bitfield(u32)]
pub struct SlotContextDword2 {
    pub parent_hub_slot_id: u8,
    pub parent_port_id: u8,
    #[bits(2)]
    pub think_time: u8,
    #[bits(4)]
    __: u8,
    #[bits(10)]
    pub interrupter_target: u16,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    DisabledOrEnabled = 0,
    Default = 1,
    Addressed = 2,
    Configured = 3,
}

impl SlotState {
    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::DisabledOrEnabled,
            1 => Self::Default,
            2 => Self::Addressed,
            _ => Self::Configured,
        }
    }

    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

#[bitfield(u32)]
pub struct SlotContextDword3 {
    pub usb_device_address: u8,
    #[bits(19)]
    __: u32,
    #[bits(5)]
    pub slot_state: SlotState,
}

/// Slot Context (xHCI 1.2 §6.2.2): information that applies to the device
/// as a whole rather than to one endpoint.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SlotContext<const PAD: usize> {
    pub dword0: SlotContextDword0,
    pub dword1: SlotContextDword1,
    pub dword2: SlotContextDword2,
    pub dword3: SlotContextDword3,
    _pad: [u8; PAD],
}

pub type SlotContext32 = SlotContext<{ 32 - 16 }>;
pub type SlotContext64 = SlotContext<{ 64 - 16 }>;

const _: () = assert!(core::mem::size_of::<SlotContext32>() == 32);
const _: () = assert!(core::mem::size_of::<SlotContext64>() == 64);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Disabled = 0,
    Running = 1,
    Halted = 2,
    Stopped = 3,
    Error = 4,
}

impl EndpointState {
    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Disabled,
            1 => Self::Running,
            2 => Self::Halted,
            3 => Self::Stopped,
            _ => Self::Error,
        }
    }

    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    NotValid = 0,
    IsochOut = 1,
    BulkOut = 2,
    InterruptOut = 3,
    ControlBidirectional = 4,
    IsochIn = 5,
    BulkIn = 6,
    InterruptIn = 7,
}

impl EndpointType {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            1 => Self::IsochOut,
            2 => Self::BulkOut,
            3 => Self::InterruptOut,
            4 => Self::ControlBidirectional,
            5 => Self::IsochIn,
            6 => Self::BulkIn,
            7 => Self::InterruptIn,
            _ => Self::NotValid,
        }
    }

    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn is_in(self) -> bool {
        matches!(self, Self::IsochIn | Self::BulkIn | Self::InterruptIn | Self::ControlBidirectional)
    }

    /// The endpoint type this driver assigns for a chapter-9
    /// (transfer-type, direction-in) pair; control endpoints are always
    /// bidirectional regardless of the direction asked for.
    pub const fn from_transfer(bm_attributes_type: u8, dir_in: bool) -> Self {
        match (bm_attributes_type & 0x3, dir_in) {
            (0, _) => Self::ControlBidirectional,
            (1, false) => Self::IsochOut,
            (1, true) => Self::IsochIn,
            (2, false) => Self::BulkOut,
            (2, true) => Self::BulkIn,
            (3, false) => Self::InterruptOut,
            (3, true) => Self::InterruptIn,
            _ => Self::NotValid,
        }
    }
}

#[bitfield(u32)]
pub struct EndpointContextDword0 {
    #[bits(3)]
    pub endpoint_state: EndpointState,
    #[bits(5)]
    __: u8,
    #[bits(2)]
    pub mult: u8,
    #[bits(5)]
    pub max_primary_streams: u8,
    pub linear_stream_array: bool,
    /// Encoded service interval; period = 125us * 2^interval.
    pub interval: u8,
    pub max_esit_payload_hi: u8,
}

#[bitfield(u32)]
pub struct EndpointContextDword1 {
    #[bits(1)]
    __: u8,
    #[bits(2)]
    pub error_count: u8,
    #[bits(3)]
    pub endpoint_type: EndpointType,
    #[bits(1)]
    __: u8,
    pub host_initiate_disable: bool,
    pub max_burst_size: u8,
    pub max_packet_size: u16,
}

#[bitfield(u64)]
pub struct EndpointContextQword2 {
    pub dequeue_cycle_state: bool,
    #[bits(3)]
    __: u8,
    /// High 60 bits of the TR Dequeue Pointer (16-byte aligned).
    #[bits(60)]
    pub tr_dequeue_pointer_bits: u64,
}

impl EndpointContextQword2 {
    pub fn with_tr_dequeue_ptr(self, addr: PhysAddr, dcs: bool) -> Self {
        self.with_tr_dequeue_pointer_bits(addr.0 >> 4).with_dequeue_cycle_state(dcs)
    }

    pub fn tr_dequeue_ptr(self) -> PhysAddr {
        PhysAddr(self.tr_dequeue_pointer_bits() << 4)
    }
}

/// Endpoint Context (xHCI 1.2 §6.2.3): state for one direction of one
/// endpoint, indexed by [`crate::ring::endpoint_index`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EndpointContext<const PAD: usize> {
    pub dword0: EndpointContextDword0,
    pub dword1: EndpointContextDword1,
    pub qword2: EndpointContextQword2,
    pub average_trb_length: u16,
    pub max_esit_payload_lo: u16,
    _pad: [u8; PAD],
}

pub type EndpointContext32 = EndpointContext<{ 32 - 20 }>;
pub type EndpointContext64 = EndpointContext<{ 64 - 20 }>;

const _: () = assert!(core::mem::size_of::<EndpointContext32>() == 32);
const _: () = assert!(core::mem::size_of::<EndpointContext64>() == 64);

/// Device Context (xHCI 1.2 §6.2.1): Slot Context at index 0, then up to 31
/// Endpoint Contexts indexed by `ep_index(ep_number, dir_in)`. One of these
/// exists per enabled slot and is pointed to from the DCBAA.
#[repr(C)]
pub struct DeviceContext<const SLOT_PAD: usize, const EP_PAD: usize> {
    pub slot: SlotContext<SLOT_PAD>,
    pub ep0: EndpointContext<EP_PAD>,
    pub ep: [EndpointContext<EP_PAD>; 30],
}

pub type DeviceContext32 = DeviceContext<{ 32 - 16 }, { 32 - 20 }>;
pub type DeviceContext64 = DeviceContext<{ 64 - 16 }, { 64 - 20 }>;

const _: () = assert!(core::mem::size_of::<DeviceContext32>() == 32 * 32);
const _: () = assert!(core::mem::size_of::<DeviceContext64>() == 64 * 32);

/// Input Control Context (xHCI 1.2 §6.2.5.1): the Drop/Add context flag
/// bitmaps that accompany a Device Context in every Input Context, telling
/// a Configure-Endpoint or Evaluate-Context command which contexts to
/// apply. Bit 0 of Add is always "Add Slot Context", bit N (N>=1) is
/// "Add/Drop the context at device-context-index N".
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InputControlContext {
    pub drop_flags: u32,
    pub add_flags: u32,
    _reserved: [u32; 5],
    /// Configuration value / interface number / alternate setting, used
    /// only by the Evaluate Context Command (xHCI 1.2 Table 6-10); zero for
    /// Configure-Endpoint / Address-Device.
    pub config_value: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    _reserved2: u8,
}

const _: () = assert!(core::mem::size_of::<InputControlContext>() == 32);

impl InputControlContext {
    pub fn add_context(&mut self, device_context_index: u8) {
        self.add_flags |= 1 << device_context_index;
    }

    pub fn drop_context(&mut self, device_context_index: u8) {
        self.drop_flags |= 1 << device_context_index;
    }
}

/// Input Context (xHCI 1.2 §6.2.5): what software actually builds and
/// hands the controller through Address-Device / Configure-Endpoint /
/// Evaluate-Context commands. The Input Control Context always occupies
/// one context-sized slot ahead of the Device Context it describes, at
/// either context size.
#[repr(C)]
pub struct InputContext<const SLOT_PAD: usize, const EP_PAD: usize, const ICC_PAD: usize> {
    pub control: InputControlContext,
    _icc_pad: [u8; ICC_PAD],
    pub device: DeviceContext<SLOT_PAD, EP_PAD>,
}

pub type InputContext32 = InputContext<{ 32 - 16 }, { 32 - 20 }, 0>;
pub type InputContext64 = InputContext<{ 64 - 16 }, { 64 - 20 }, 32>;

const _: () = assert!(offset_of!(InputContext32, device) == 32);
const _: () = assert!(offset_of!(InputContext64, device) == 64);
const _: () = assert!(core::mem::size_of::<InputContext32>() == 32 * 33);
const _: () = assert!(core::mem::size_of::<InputContext64>() == 64 * 33);

/// Fills in the Slot Context fields that never change once a device is
/// addressed: route string, speed, and topology. Called once per device
/// during enumeration before the first Address-Device command.
pub fn init_slot_context<const PAD: usize>(
    slot: &mut SlotContext<PAD>,
    root_hub_port_id: u8,
    speed: PortSpeed,
    route_string: u32,
) {
    slot.dword0 = SlotContextDword0::new()
        .with_route_string(route_string)
        .with_speed(speed.into_bits())
        .with_context_entries(1);
    slot.dword1 = SlotContextDword1::new().with_root_hub_port_id(root_hub_port_id);
    slot.dword2 = SlotContextDword2::new();
    slot.dword3 = SlotContextDword3::default();
}

/// Fills in an Endpoint Context for a freshly-created transfer ring. The
/// caller is responsible for picking `interval` (see
/// `crate::enumeration::interval_from_binterval`) and `max_packet_size`
/// (refined once the device descriptor's `bMaxPacketSize0` is known, for
/// the control endpoint).
pub fn init_endpoint_context<const PAD: usize>(
    ep: &mut EndpointContext<PAD>,
    endpoint_type: EndpointType,
    max_packet_size: u16,
    interval: u8,
    ring_base: PhysAddr,
    ring_dcs: bool,
) {
    ep.dword0 = EndpointContextDword0::new().with_interval(interval);
    ep.dword1 = EndpointContextDword1::new()
        .with_error_count(3)
        .with_endpoint_type(endpoint_type)
        .with_max_packet_size(max_packet_size);
    ep.qword2 = EndpointContextQword2::new().with_tr_dequeue_ptr(ring_base, ring_dcs);
    ep.average_trb_length = if matches!(endpoint_type, EndpointType::ControlBidirectional) {
        8
    } else {
        max_packet_size
    };
    ep.max_esit_payload_lo = 0;
}

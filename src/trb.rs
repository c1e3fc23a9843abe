//! Transfer Request Blocks: the fixed 16-byte unit on every xHCI ring
//! (command ring, transfer rings, event ring). A TRB is {parameter (64
//! bit), status (32 bit), control (32 bit)}; the control word's low 10 bits
//! always carry C (cycle) at bit 0 and the 6-bit TRB Type at bits [15:10]
//! (Type occupies bits 10-15, the cycle bit sits below it, separated from it
//! only by type-specific flag bits on most variants).

use bitfield_struct::bitfield;
use int_enum::IntEnum;

/// The 6-bit TRB Type field (xHCI 1.2 §6.4.6, Table 6-91).
#[repr(u8)]
#[derive(IntEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrbType {
    Normal = 1,
    SetupStage = 2,
    DataStage = 3,
    StatusStage = 4,
    Isoch = 5,
    Link = 6,
    EventData = 7,
    NoOp = 8,
    EnableSlotCommand = 9,
    DisableSlotCommand = 10,
    AddressDeviceCommand = 11,
    ConfigureEndpointCommand = 12,
    EvaluateContextCommand = 13,
    ResetEndpointCommand = 14,
    StopEndpointCommand = 15,
    SetTrDequeuePointerCommand = 16,
    ResetDeviceCommand = 17,
    NoOpCommand = 23,
    TransferEvent = 32,
    CommandCompletionEvent = 33,
    PortStatusChangeEvent = 34,
}

/// Completion code carried by Transfer Events and Command Completion
/// Events (xHCI 1.2 §6.4.5, Table 6-90). `Other` catches codes this driver
/// doesn't name individually rather than panicking on an unrecognised byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Invalid,
    Success,
    DataBufferError,
    BabbleDetectedError,
    UsbTransactionError,
    TrbError,
    StallError,
    ResourceError,
    BandwidthError,
    NoSlotsAvailableError,
    InvalidStreamTypeError,
    SlotNotEnabledError,
    EndpointNotEnabledError,
    ShortPacket,
    RingUnderrun,
    RingOverrun,
    ParameterError,
    ContextStateError,
    EventRingFullError,
    CommandAbortedError,
    Stopped,
    StoppedLengthInvalid,
    Other(u8),
}

impl CompletionCode {
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Invalid,
            1 => Self::Success,
            2 => Self::DataBufferError,
            3 => Self::BabbleDetectedError,
            4 => Self::UsbTransactionError,
            5 => Self::TrbError,
            6 => Self::StallError,
            7 => Self::ResourceError,
            8 => Self::BandwidthError,
            9 => Self::NoSlotsAvailableError,
            10 => Self::InvalidStreamTypeError,
            11 => Self::SlotNotEnabledError,
            12 => Self::EndpointNotEnabledError,
            13 => Self::ShortPacket,
            14 => Self::RingUnderrun,
            15 => Self::RingOverrun,
            17 => Self::ParameterError,
            19 => Self::ContextStateError,
            21 => Self::EventRingFullError,
            24 => Self::CommandAbortedError,
            25 => Self::Stopped,
            26 => Self::StoppedLengthInvalid,
            other => Self::Other(other),
        }
    }

    pub const fn into_u8(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Success => 1,
            Self::DataBufferError => 2,
            Self::BabbleDetectedError => 3,
            Self::UsbTransactionError => 4,
            Self::TrbError => 5,
            Self::StallError => 6,
            Self::ResourceError => 7,
            Self::BandwidthError => 8,
            Self::NoSlotsAvailableError => 9,
            Self::InvalidStreamTypeError => 10,
            Self::SlotNotEnabledError => 11,
            Self::EndpointNotEnabledError => 12,
            Self::ShortPacket => 13,
            Self::RingUnderrun => 14,
            Self::RingOverrun => 15,
            Self::ParameterError => 17,
            Self::ContextStateError => 19,
            Self::EventRingFullError => 21,
            Self::CommandAbortedError => 24,
            Self::Stopped => 25,
            Self::StoppedLengthInvalid => 26,
            Self::Other(v) => v,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// The raw 16-byte TRB as it sits on any ring. Typed variants below are
/// read out of / written into this layout with `from_raw`/`into_raw`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Trb {
    pub parameter: u64,
    pub status: u32,
    pub control: u32,
}

const _: () = assert!(core::mem::size_of::<Trb>() == 16);

impl Trb {
    pub const fn zeroed() -> Self {
        Trb {
            parameter: 0,
            status: 0,
            control: 0,
        }
    }

    pub const fn cycle(&self) -> bool {
        self.control & 1 != 0
    }

    pub fn set_cycle(&mut self, cycle: bool) {
        if cycle {
            self.control |= 1;
        } else {
            self.control &= !1;
        }
    }

    pub const fn trb_type_raw(&self) -> u8 {
        ((self.control >> 10) & 0x3F) as u8
    }

    pub fn trb_type(&self) -> Option<TrbType> {
        TrbType::from_int(self.trb_type_raw()).ok()
    }

    pub const fn with_type(mut self, ty: TrbType) -> Self {
        self.control = (self.control & !(0x3F << 10)) | ((ty as u32) << 10);
        self
    }
}

/// Control word of a Link TRB: bit 1 Toggle-Cycle, the rest reserved/IOC.
#[bitfield(u32)]
pub struct LinkControl {
    pub cycle: bool,
    pub toggle_cycle: bool,
    #[bits(3)]
    __: u8,
    pub interrupt_on_completion: bool,
    #[bits(4)]
    __: u8,
    #[bits(6)]
    pub trb_type: u8,
    #[bits(16)]
    __: u16,
}

impl Trb {
    /// Builds the Link-TRB that terminates every ring: parameter is the
    /// physical address of the ring's first TRB, toggle_cycle is always
    /// set (the only way a producer's PCS can flip).
    pub fn new_link(ring_segment_phys: u64) -> Self {
        let control = LinkControl::new()
            .with_toggle_cycle(true)
            .with_trb_type(TrbType::Link as u8);
        Trb {
            parameter: ring_segment_phys,
            status: 0,
            control: control.into_bits(),
        }
    }
}

/// Control word shared by Normal, Setup/Data/Status Stage TRBs: Chain (CH),
/// Interrupt-On-Completion (IOC), Immediate-Data (IDT), and the two bits
/// past the TRB Type field (xHCI 1.2 §6.4.1.2.1-3) that carry the Direction
/// bit on Data/Status Stage TRBs and the Transfer Type (TRT) on Setup Stage
/// TRBs — same bit range, different width depending on the variant, so the
/// field here is the raw 2 bits and `with_direction_in`/`with_transfer_type`
/// below pick the right width for the TRB being built.
#[bitfield(u32)]
pub struct TransferControl {
    pub cycle: bool,
    pub evaluate_next_trb: bool,
    pub interrupt_on_short_packet: bool,
    pub no_snoop: bool,
    pub chain: bool,
    pub interrupt_on_completion: bool,
    pub immediate_data: bool,
    #[bits(3)]
    __: u8,
    #[bits(6)]
    pub trb_type: u8,
    #[bits(2)]
    pub dir_or_trt: u8,
    #[bits(14)]
    __: u16,
}

impl TransferControl {
    /// Sets the Direction bit (bit 16) of a Data/Status Stage TRB.
    pub fn with_direction_in(self, dir_in: bool) -> Self {
        self.with_dir_or_trt(dir_in as u8)
    }

    /// Sets the 2-bit Transfer Type field (bits 16-17) of a Setup Stage TRB.
    pub fn with_transfer_type(self, transfer_type: u8) -> Self {
        self.with_dir_or_trt(transfer_type & 0x3)
    }
}

impl Trb {
    /// A Normal TRB: one bulk/interrupt transfer on `data_buffer`.
    /// `ioc`/`isp` are both set by the transfer engine for every transfer
    /// this core issues (it always wants completion notification).
    pub fn new_normal(data_buffer_phys: u64, transfer_length: u32, ioc: bool, isp: bool) -> Self {
        let control = TransferControl::new()
            .with_interrupt_on_completion(ioc)
            .with_interrupt_on_short_packet(isp)
            .with_trb_type(TrbType::Normal as u8);
        Trb {
            parameter: data_buffer_phys,
            status: transfer_length & 0x1_FFFF,
            control: control.into_bits(),
        }
    }

    /// A Setup Stage TRB. The 8-byte setup packet is carried as immediate
    /// data in `parameter` (IDT is always set — xHCI 1.2 §6.4.1.2.1).
    /// `transfer_type` encodes the data stage direction per §6.4.1.2.1
    /// Table 6-78: 0 = No Data, 2 = OUT Data, 3 = IN Data. TRT lives in the
    /// control word (bits 16-17), not the status word's transfer-length
    /// field, which stays fixed at 8.
    pub fn new_setup_stage(setup_packet: u64, transfer_type: u8) -> Self {
        let control = TransferControl::new()
            .with_immediate_data(true)
            .with_trb_type(TrbType::SetupStage as u8)
            .with_transfer_type(transfer_type);
        Trb {
            parameter: setup_packet,
            status: 8,
            control: control.into_bits(),
        }
    }

    pub fn new_data_stage(buffer_phys: u64, length: u32, dir_in: bool) -> Self {
        let control = TransferControl::new()
            .with_direction_in(dir_in)
            .with_trb_type(TrbType::DataStage as u8);
        Trb {
            parameter: buffer_phys,
            status: length & 0x1_FFFF,
            control: control.into_bits(),
        }
    }

    /// A Status Stage TRB, direction opposite the data stage, IOC always
    /// set (the transfer engine waits on this TRB's completion event).
    pub fn new_status_stage(dir_in: bool) -> Self {
        let control = TransferControl::new()
            .with_direction_in(dir_in)
            .with_interrupt_on_completion(true)
            .with_trb_type(TrbType::StatusStage as u8);
        Trb {
            parameter: 0,
            status: 0,
            control: control.into_bits(),
        }
    }
}

/// Control word of command TRBs that target a device slot (Address-Device,
/// Configure-Endpoint, Evaluate-Context).
#[bitfield(u32)]
pub struct SlotCommandControl {
    pub cycle: bool,
    #[bits(8)]
    __: u8,
    pub block_set_address_request: bool,
    #[bits(6)]
    pub trb_type: u8,
    #[bits(8)]
    __: u8,
    pub slot_id: u8,
}

impl Trb {
    pub fn new_enable_slot_command(slot_type: u8) -> Self {
        #[bitfield(u32)]
        struct EnableSlotControl {
            pub cycle: bool,
            #[bits(9)]
            __: u16,
            #[bits(6)]
            pub trb_type: u8,
            #[bits(11)]
            __: u16,
            #[bits(5)]
            pub slot_type: u8,
        }
        let control = EnableSlotControl::new()
            .with_trb_type(TrbType::EnableSlotCommand as u8)
            .with_slot_type(slot_type);
        Trb {
            parameter: 0,
            status: 0,
            control: control.into_bits(),
        }
    }

    pub fn new_address_device_command(input_ctx_phys: u64, slot_id: u8, bsr: bool) -> Self {
        let control = SlotCommandControl::new()
            .with_block_set_address_request(bsr)
            .with_trb_type(TrbType::AddressDeviceCommand as u8)
            .with_slot_id(slot_id);
        Trb {
            parameter: input_ctx_phys,
            status: 0,
            control: control.into_bits(),
        }
    }

    pub fn new_configure_endpoint_command(input_ctx_phys: u64, slot_id: u8) -> Self {
        let control = SlotCommandControl::new()
            .with_trb_type(TrbType::ConfigureEndpointCommand as u8)
            .with_slot_id(slot_id);
        Trb {
            parameter: input_ctx_phys,
            status: 0,
            control: control.into_bits(),
        }
    }

    pub fn new_evaluate_context_command(input_ctx_phys: u64, slot_id: u8) -> Self {
        let control = SlotCommandControl::new()
            .with_trb_type(TrbType::EvaluateContextCommand as u8)
            .with_slot_id(slot_id);
        Trb {
            parameter: input_ctx_phys,
            status: 0,
            control: control.into_bits(),
        }
    }
}

/// Status word of a Command Completion Event (xHCI 1.2 §6.4.2.1).
#[bitfield(u32)]
pub struct CommandCompletionStatus {
    #[bits(24)]
    pub command_completion_parameter: u32,
    #[bits(8)]
    pub completion_code: u8,
}

/// Control word of a Command Completion Event.
#[bitfield(u32)]
pub struct CommandCompletionControl {
    pub cycle: bool,
    #[bits(9)]
    __: u16,
    #[bits(6)]
    pub trb_type: u8,
    #[bits(8)]
    pub vf_id: u8,
    #[bits(8)]
    pub slot_id: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandCompletionEvent {
    /// Physical address of the command TRB this event answers.
    pub command_trb: u64,
    pub completion_code: CompletionCode,
    pub slot_id: u8,
}

impl CommandCompletionEvent {
    pub fn from_trb(trb: &Trb) -> Self {
        let status = CommandCompletionStatus::from_bits(trb.status);
        let control = CommandCompletionControl::from_bits(trb.control);
        CommandCompletionEvent {
            command_trb: trb.parameter,
            completion_code: CompletionCode::from_u8(status.completion_code()),
            slot_id: control.slot_id(),
        }
    }
}

/// Status word of a Transfer Event.
#[bitfield(u32)]
pub struct TransferEventStatus {
    #[bits(24)]
    pub transfer_length: u32,
    #[bits(8)]
    pub completion_code: u8,
}

/// Control word of a Transfer Event.
#[bitfield(u32)]
pub struct TransferEventControl {
    pub cycle: bool,
    #[bits(1)]
    __: u8,
    pub event_data: bool,
    #[bits(7)]
    __: u8,
    #[bits(6)]
    pub trb_type: u8,
    #[bits(5)]
    pub endpoint_id: u8,
    #[bits(3)]
    __: u8,
    #[bits(8)]
    pub slot_id: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferEvent {
    /// Physical address of the TRB that generated this event (zero for an
    /// Event-Data TRB echo, which carries its own software data instead).
    pub trb_pointer: u64,
    pub completion_code: CompletionCode,
    pub transfer_length: u32,
    pub endpoint_id: u8,
    pub slot_id: u8,
}

impl TransferEvent {
    pub fn from_trb(trb: &Trb) -> Self {
        let status = TransferEventStatus::from_bits(trb.status);
        let control = TransferEventControl::from_bits(trb.control);
        TransferEvent {
            trb_pointer: trb.parameter,
            completion_code: CompletionCode::from_u8(status.completion_code()),
            transfer_length: status.transfer_length(),
            endpoint_id: control.endpoint_id(),
            slot_id: control.slot_id(),
        }
    }
}

/// Control word of a Port Status Change Event; the changed port number
/// lives in the top byte of `parameter`, one-indexed.
#[derive(Debug, Clone, Copy)]
pub struct PortStatusChangeEvent {
    /// Zero-indexed port that changed.
    pub port_index: u8,
}

impl PortStatusChangeEvent {
    pub fn from_trb(trb: &Trb) -> Self {
        let port_number = ((trb.parameter >> 24) & 0xFF) as u8;
        PortStatusChangeEvent {
            port_index: port_number.saturating_sub(1),
        }
    }
}

/// A dequeued event-ring TRB, dispatched by its TRB Type.
#[derive(Debug, Clone, Copy)]
pub enum EventTrb {
    CommandCompletion(CommandCompletionEvent),
    Transfer(TransferEvent),
    PortStatusChange(PortStatusChangeEvent),
    /// A TRB type the dispatcher doesn't special-case (e.g. Host Controller
    /// Event); carried so a caller can at least log it.
    Other(Trb),
}

impl Trb {
    pub fn into_event_trb(self) -> EventTrb {
        match self.trb_type() {
            Some(TrbType::CommandCompletionEvent) => {
                EventTrb::CommandCompletion(CommandCompletionEvent::from_trb(&self))
            }
            Some(TrbType::TransferEvent) => EventTrb::Transfer(TransferEvent::from_trb(&self)),
            Some(TrbType::PortStatusChangeEvent) => {
                EventTrb::PortStatusChange(PortStatusChangeEvent::from_trb(&self))
            }
            _ => EventTrb::Other(self),
        }
    }
}

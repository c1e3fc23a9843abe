//! Root-hub port scan and the per-port enumeration state machine
//! (`SPEC_FULL.md` §4.5): disconnected -> reset -> enabled -> slot-assigned
//! -> addressed -> MPS-known -> ready -> attached. Built entirely on the
//! synchronous command path in [`crate::controller`] and the transfer
//! primitives in [`crate::transfer`]; a failure at any step abandons the
//! port rather than aborting the whole scan (`SPEC_FULL.md` §7).

use alloc::vec::Vec;

use crate::context::{
    init_endpoint_context, init_slot_context, DeviceContext, EndpointContext, EndpointType, InputContext,
};
use crate::controller::Controller;
use crate::error::{XhciError, XhciResult};
use crate::hal::{DmaAlloc, Log, PciDevice};
use crate::regs::{read_port_sc, write_port_sc, PortScReg, PortSpeed};
use crate::ring::endpoint_index;
use crate::transfer::EndpointRing;
use crate::trb::Trb;
use crate::usb::descriptor::{parse_configuration, Descriptor, DESCRIPTOR_TYPE_CONFIGURATION, DESCRIPTOR_TYPE_DEVICE, UsbConfigurationDescriptor, UsbDeviceDescriptor};
use crate::usb::device::{ConfigurationDescriptorFields, DeviceDescriptorFields, InterfaceDescriptorFields, EndpointDescriptorFields, UsbDeviceTree, UsbEndpointNode, UsbInterfaceNode};
use crate::usb::request::SetupPacket;
use crate::{debug, warn};

/// USB major revision values classified by a Supported Protocol capability
/// (xHCI 1.2 Table 7-9): anything below 3 needs an explicit port reset,
/// 3 and above is auto-enabled by link training.
const USB_MAJOR_REVISION_SUPERSPEED: u8 = 3;

/// A fully enumerated device: its default control pipe, the transfer rings
/// opened for its configured endpoints, and the descriptor tree fetched
/// from it.
pub struct EnumeratedDevice {
    pub slot_id: u8,
    pub port_index: u8,
    pub speed: PortSpeed,
    pub ep0: EndpointRing,
    pub endpoints: Vec<EndpointRing>,
    pub tree: UsbDeviceTree,
}

/// Ports currently showing Current Connect Status with a pending Connect
/// Status Change. Clears CSC (write-1-to-clear) as it finds each one —
/// the first transition of the state machine — and leaves every other
/// change bit alone.
pub fn candidate_ports<P: PciDevice, A: DmaAlloc, L: Log>(controller: &Controller<P, A, L>) -> Vec<u8> {
    let mut candidates = Vec::new();
    for port_index in 0..controller.port_count() {
        let portsc = read_port_sc(controller.op_regs(), port_index);
        if portsc.ccs() && portsc.csc() {
            write_port_sc(controller.op_regs(), port_index, PortScReg::new().with_csc(true));
            candidates.push(port_index);
        }
    }
    candidates
}

/// Drives one candidate port through Reset -> Enabled -> SlotAssigned ->
/// Addressed -> MPSKnown -> Ready -> Attached. Any step's error is returned
/// to the caller, who abandons this port and moves to the next candidate.
pub fn enumerate_port<P: PciDevice, A: DmaAlloc, L: Log>(controller: &Controller<P, A, L>, port_index: u8) -> XhciResult<EnumeratedDevice> {
    let protocol = controller.port_protocol(port_index);
    let speed = reset_port(controller, port_index, protocol.major_revision)?;

    let slot_id = enable_slot(controller, protocol.slot_type)?;
    debug!(controller.log(), "enumeration"; "port {} assigned slot {}", port_index, slot_id);

    let (mut ep0, device_ctx_virt) = address_device(controller, port_index, slot_id, speed)?;
    refine_max_packet_size(controller, slot_id, speed, &mut ep0)?;

    let device_descriptor = fetch_device_descriptor(controller, &mut ep0)?;
    let (configuration_descriptor, mut interfaces) = fetch_configuration(controller, &mut ep0)?;

    let endpoints = configure_endpoints(controller, slot_id, device_ctx_virt, speed, &interfaces)?;
    ep0.control_transfer(controller, SetupPacket::set_configuration(configuration_descriptor.b_configuration_value), None)?;

    let tree = UsbDeviceTree {
        slot_id,
        port_index,
        speed: speed.into(),
        manufacturer: None,
        product: None,
        serial_number: None,
        device: DeviceDescriptorFields::from(&device_descriptor),
        configuration: ConfigurationDescriptorFields::from(&configuration_descriptor),
        interfaces: core::mem::take(&mut interfaces),
    };

    debug!(controller.log(), "enumeration"; "port {} slot {} attached: {:04x}:{:04x}", port_index, slot_id, device_descriptor.id_vendor, device_descriptor.id_product);

    Ok(EnumeratedDevice { slot_id, port_index, speed, ep0, endpoints, tree })
}

fn reset_port<P: PciDevice, A: DmaAlloc, L: Log>(controller: &Controller<P, A, L>, port_index: u8, major_revision: u8) -> XhciResult<PortSpeed> {
    if major_revision >= USB_MAJOR_REVISION_SUPERSPEED {
        // USB3 link training enables the port on its own; just clear the
        // change bits CCS/CSC left set.
        let portsc = read_port_sc(controller.op_regs(), port_index);
        write_port_sc(
            controller.op_regs(),
            port_index,
            PortScReg::new().with_csc(true).with_pec(true).with_prc(true).with_wrc(true),
        );
        return Ok(portsc.port_speed());
    }

    write_port_sc(controller.op_regs(), port_index, PortScReg::new().with_csc(true).with_pec(true).with_prc(true).with_pr(true));
    controller.poll_until(|| read_port_sc(controller.op_regs(), port_index).prc())?;

    let portsc = read_port_sc(controller.op_regs(), port_index);
    write_port_sc(controller.op_regs(), port_index, PortScReg::new().with_prc(true));

    if !portsc.ped() {
        warn!(controller.log(), "enumeration"; "port {} reset did not enable the port", port_index);
        return Err(XhciError::EnablePortError);
    }
    Ok(portsc.port_speed())
}

fn enable_slot<P: PciDevice, A: DmaAlloc, L: Log>(controller: &Controller<P, A, L>, slot_type: u8) -> XhciResult<u8> {
    let completion = controller.send_command(Trb::new_enable_slot_command(slot_type))?;
    if !completion.completion_code.is_success() {
        return Err(XhciError::NoSlotsAvailable);
    }
    Ok(completion.slot_id)
}

fn address_device<P: PciDevice, A: DmaAlloc, L: Log>(
    controller: &Controller<P, A, L>,
    port_index: u8,
    slot_id: u8,
    speed: PortSpeed,
) -> XhciResult<(EndpointRing, usize)> {
    if controller.context_size_64() {
        address_device_sized::<P, A, L, { 64 - 16 }, { 64 - 20 }, 32>(controller, port_index, slot_id, speed)
    } else {
        address_device_sized::<P, A, L, { 32 - 16 }, { 32 - 20 }, 0>(controller, port_index, slot_id, speed)
    }
}

/// Allocates the output Device Context and the default control endpoint's
/// transfer ring, builds an Input Context with A0|A1 set, and issues
/// Address-Device with BSR=0 (`SPEC_FULL.md` §4.5). Generic over context
/// size so the 32- and 64-byte layouts share one implementation.
fn address_device_sized<P, A, L, const SLOT_PAD: usize, const EP_PAD: usize, const ICC_PAD: usize>(
    controller: &Controller<P, A, L>,
    port_index: u8,
    slot_id: u8,
    speed: PortSpeed,
) -> XhciResult<(EndpointRing, usize)>
where
    P: PciDevice,
    A: DmaAlloc,
    L: Log,
{
    let alloc = controller.alloc();

    let device_size = core::mem::size_of::<DeviceContext<SLOT_PAD, EP_PAD>>();
    let (device_virt, device_phys) = alloc.calloc_aligned(device_size, 64, 4096)?;
    controller.set_device_context(slot_id, device_phys);

    let ep0_ring = EndpointRing::new(alloc, controller.config().transfer_ring_trb_count, slot_id, endpoint_index(0, false))?;

    let input_size = core::mem::size_of::<InputContext<SLOT_PAD, EP_PAD, ICC_PAD>>();
    let (input_virt, input_phys) = alloc.calloc_aligned(input_size, 64, 4096)?;
    let input = unsafe { &mut *(input_virt as *mut InputContext<SLOT_PAD, EP_PAD, ICC_PAD>) };

    input.control.add_context(0);
    input.control.add_context(1);
    init_slot_context(&mut input.device.slot, port_index + 1, speed, 0);
    init_endpoint_context(
        &mut input.device.ep0,
        EndpointType::ControlBidirectional,
        speed.initial_control_mps(),
        0,
        ep0_ring.base_phys(),
        ep0_ring.producer_cycle_state(),
    );

    let completion = controller.send_command(Trb::new_address_device_command(input_phys.0, slot_id, false))?;
    if !completion.completion_code.is_success() {
        return Err(XhciError::AddressDeviceError);
    }

    Ok((ep0_ring, device_virt))
}

/// Fetches the 8-byte prefix of the device descriptor and, if the
/// controller's actual `bMaxPacketSize0` differs from the speed-based
/// guess `address_device` used, corrects ep0's Max Packet Size with an
/// Evaluate-Context. Runs unconditionally on every port, every speed
/// (`SPEC_FULL.md` §4.5, §9 resolved open question).
fn refine_max_packet_size<P: PciDevice, A: DmaAlloc, L: Log>(
    controller: &Controller<P, A, L>,
    slot_id: u8,
    speed: PortSpeed,
    ep0: &mut EndpointRing,
) -> XhciResult<()> {
    let alloc = controller.alloc();
    let (buf_virt, buf_phys) = alloc.calloc_aligned(8, 8, 4096)?;
    ep0.control_transfer(controller, SetupPacket::get_descriptor(DESCRIPTOR_TYPE_DEVICE, 0, 0, 8), Some((buf_phys, 8)))?;

    let raw_mps0 = unsafe { *((buf_virt + 7) as *const u8) };
    // SuperSpeed+ device descriptors encode bMaxPacketSize0 as a power-of-two
    // exponent (USB 3.2 §9.6.1); every slower speed carries it literally.
    let actual_mps = if speed.is_usb3() { 1u16 << raw_mps0 } else { raw_mps0 as u16 };

    if actual_mps == speed.initial_control_mps() {
        return Ok(());
    }

    debug!(controller.log(), "enumeration"; "slot {} ep0 MPS {} (was guessed {})", slot_id, actual_mps, speed.initial_control_mps());

    if controller.context_size_64() {
        refine_max_packet_size_sized::<P, A, L, { 64 - 16 }, { 64 - 20 }, 32>(controller, slot_id, ep0, actual_mps)
    } else {
        refine_max_packet_size_sized::<P, A, L, { 32 - 16 }, { 32 - 20 }, 0>(controller, slot_id, ep0, actual_mps)
    }
}

fn refine_max_packet_size_sized<P, A, L, const SLOT_PAD: usize, const EP_PAD: usize, const ICC_PAD: usize>(
    controller: &Controller<P, A, L>,
    slot_id: u8,
    ep0: &mut EndpointRing,
    actual_mps: u16,
) -> XhciResult<()>
where
    P: PciDevice,
    A: DmaAlloc,
    L: Log,
{
    let alloc = controller.alloc();
    let input_size = core::mem::size_of::<InputContext<SLOT_PAD, EP_PAD, ICC_PAD>>();
    let (input_virt, input_phys) = alloc.calloc_aligned(input_size, 64, 4096)?;
    let input = unsafe { &mut *(input_virt as *mut InputContext<SLOT_PAD, EP_PAD, ICC_PAD>) };

    input.control.add_context(1);
    init_endpoint_context(
        &mut input.device.ep0,
        EndpointType::ControlBidirectional,
        actual_mps,
        0,
        ep0.base_phys(),
        ep0.producer_cycle_state(),
    );

    let completion = controller.send_command(Trb::new_evaluate_context_command(input_phys.0, slot_id))?;
    if !completion.completion_code.is_success() {
        return Err(XhciError::ConfigEndpointError);
    }
    Ok(())
}

fn fetch_device_descriptor<P: PciDevice, A: DmaAlloc, L: Log>(controller: &Controller<P, A, L>, ep0: &mut EndpointRing) -> XhciResult<UsbDeviceDescriptor> {
    let alloc = controller.alloc();
    let length = core::mem::size_of::<UsbDeviceDescriptor>();
    let (buf_virt, buf_phys) = alloc.calloc_aligned(length, 8, 4096)?;

    ep0.control_transfer(controller, SetupPacket::get_descriptor(DESCRIPTOR_TYPE_DEVICE, 0, 0, length as u16), Some((buf_phys, length)))?;

    Ok(unsafe { core::ptr::read_unaligned(buf_virt as *const UsbDeviceDescriptor) })
}

fn fetch_configuration<P: PciDevice, A: DmaAlloc, L: Log>(
    controller: &Controller<P, A, L>,
    ep0: &mut EndpointRing,
) -> XhciResult<(UsbConfigurationDescriptor, Vec<UsbInterfaceNode>)> {
    let alloc = controller.alloc();
    let header_len = core::mem::size_of::<UsbConfigurationDescriptor>();
    let (header_virt, header_phys) = alloc.calloc_aligned(header_len, 8, 4096)?;
    ep0.control_transfer(controller, SetupPacket::get_descriptor(DESCRIPTOR_TYPE_CONFIGURATION, 0, 0, header_len as u16), Some((header_phys, header_len)))?;
    let header = unsafe { core::ptr::read_unaligned(header_virt as *const UsbConfigurationDescriptor) };

    let total_length = header.w_total_length as usize;
    if total_length < header_len {
        return Err(XhciError::MalformedDescriptor);
    }

    let (blob_virt, blob_phys) = alloc.calloc_aligned(total_length, 8, 4096)?;
    ep0.control_transfer(controller, SetupPacket::get_descriptor(DESCRIPTOR_TYPE_CONFIGURATION, 0, 0, total_length as u16), Some((blob_phys, total_length)))?;
    let blob = unsafe { core::slice::from_raw_parts(blob_virt as *const u8, total_length) };

    let descriptors = parse_configuration(blob);
    let configuration = match descriptors.first() {
        Some(Descriptor::Configuration(c)) => *c,
        _ => return Err(XhciError::MalformedDescriptor),
    };

    let mut interfaces: Vec<UsbInterfaceNode> = Vec::new();
    for descriptor in &descriptors[1..] {
        match descriptor {
            Descriptor::Interface(iface) => interfaces.push(UsbInterfaceNode {
                descriptor: InterfaceDescriptorFields::from(iface),
                endpoints: Vec::new(),
            }),
            Descriptor::Endpoint(ep) => {
                if let Some(last) = interfaces.last_mut() {
                    last.endpoints.push(UsbEndpointNode {
                        descriptor: EndpointDescriptorFields::from(ep),
                        device_context_index: endpoint_index(ep.endpoint_number(), ep.is_in()),
                    });
                }
            }
            // SuperSpeed burst/interval tuning isn't modeled; class-specific
            // descriptors (HID reports, etc.) aren't this module's concern.
            // Skip both without losing stream sync.
            Descriptor::SsEndpointCompanion(_) | Descriptor::Other { .. } => {}
        }
    }

    Ok((configuration, interfaces))
}

fn configure_endpoints<P: PciDevice, A: DmaAlloc, L: Log>(
    controller: &Controller<P, A, L>,
    slot_id: u8,
    device_ctx_virt: usize,
    speed: PortSpeed,
    interfaces: &[UsbInterfaceNode],
) -> XhciResult<Vec<EndpointRing>> {
    if controller.context_size_64() {
        configure_endpoints_sized::<P, A, L, { 64 - 16 }, { 64 - 20 }, 32>(controller, slot_id, device_ctx_virt, speed, interfaces)
    } else {
        configure_endpoints_sized::<P, A, L, { 32 - 16 }, { 32 - 20 }, 0>(controller, slot_id, device_ctx_virt, speed, interfaces)
    }
}

fn endpoint_context_mut<const SLOT_PAD: usize, const EP_PAD: usize, const ICC_PAD: usize>(
    input: &mut InputContext<SLOT_PAD, EP_PAD, ICC_PAD>,
    device_context_index: u8,
) -> &mut EndpointContext<EP_PAD> {
    if device_context_index == 1 {
        &mut input.device.ep0
    } else {
        &mut input.device.ep[device_context_index as usize - 2]
    }
}

/// Builds one Input Context covering every endpoint found while parsing
/// the configuration descriptor, opens a transfer ring per endpoint, and
/// issues Configure-Endpoint (`SPEC_FULL.md` §4.6).
fn configure_endpoints_sized<P, A, L, const SLOT_PAD: usize, const EP_PAD: usize, const ICC_PAD: usize>(
    controller: &Controller<P, A, L>,
    slot_id: u8,
    device_ctx_virt: usize,
    speed: PortSpeed,
    interfaces: &[UsbInterfaceNode],
) -> XhciResult<Vec<EndpointRing>>
where
    P: PciDevice,
    A: DmaAlloc,
    L: Log,
{
    let alloc = controller.alloc();
    let input_size = core::mem::size_of::<InputContext<SLOT_PAD, EP_PAD, ICC_PAD>>();
    let (input_virt, input_phys) = alloc.calloc_aligned(input_size, 64, 4096)?;
    let input = unsafe { &mut *(input_virt as *mut InputContext<SLOT_PAD, EP_PAD, ICC_PAD>) };

    let mut rings = Vec::new();
    let mut highest_index = 1u8;

    for interface in interfaces {
        for endpoint in &interface.endpoints {
            let device_context_index = endpoint.device_context_index;
            let ring = EndpointRing::new(alloc, controller.config().transfer_ring_trb_count, slot_id, device_context_index)?;

            let dir_in = endpoint.descriptor.endpoint_address & 0x80 != 0;
            let ep_type = EndpointType::from_transfer(endpoint.descriptor.attributes, dir_in);
            let interval = interval_from_binterval(speed, ep_type, endpoint.descriptor.interval);
            // Max burst (SuperSpeed bits [12:11]) is folded into ESIT, not
            // tracked separately, since this driver has no SS companion
            // descriptor parsing yet; wMaxPacketSize[10:0] alone is used.
            let max_packet_size = endpoint.descriptor.max_packet_size & 0x7FF;

            init_endpoint_context(
                endpoint_context_mut(input, device_context_index),
                ep_type,
                max_packet_size,
                interval,
                ring.base_phys(),
                ring.producer_cycle_state(),
            );
            input.control.add_context(device_context_index);
            highest_index = highest_index.max(device_context_index);
            rings.push(ring);
        }
    }

    let output = unsafe { &*(device_ctx_virt as *const DeviceContext<SLOT_PAD, EP_PAD>) };
    if highest_index > output.slot.dword0.context_entries() {
        input.control.add_context(0);
        input.device.slot = output.slot;
        input.device.slot.dword0 = input.device.slot.dword0.with_context_entries(highest_index);
    }

    let completion = controller.send_command(Trb::new_configure_endpoint_command(input_phys.0, slot_id))?;
    if !completion.completion_code.is_success() {
        return Err(XhciError::ConfigEndpointError);
    }

    Ok(rings)
}

/// Encodes an endpoint descriptor's `bInterval` into the xHCI Interval
/// field (xHCI 1.2 §6.2.3.6). Control and bulk endpoints ignore it
/// entirely. Full/low-speed interrupt endpoints count linear 1ms frames
/// (`bInterval - 1`); high-speed and SuperSpeed+ interrupt/isoch endpoints
/// give a power-of-two count of 125us microframes and are encoded as its
/// base-2 log, not decoded from the raw byte directly.
pub fn interval_from_binterval(speed: PortSpeed, endpoint_type: EndpointType, binterval: u8) -> u8 {
    if matches!(endpoint_type, EndpointType::BulkIn | EndpointType::BulkOut | EndpointType::ControlBidirectional) {
        return 0;
    }
    if speed.is_usb3() || matches!(speed, PortSpeed::High) {
        let binterval = binterval.clamp(1, 16);
        31 - (binterval as u32).leading_zeros() as u8
    } else {
        binterval.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_endpoints_ignore_binterval() {
        assert_eq!(interval_from_binterval(PortSpeed::High, EndpointType::BulkIn, 9), 0);
    }

    #[test]
    fn full_speed_interrupt_interval_is_linear() {
        assert_eq!(interval_from_binterval(PortSpeed::Full, EndpointType::InterruptIn, 10), 9);
    }

    #[test]
    fn high_speed_interrupt_interval_is_log2() {
        assert_eq!(interval_from_binterval(PortSpeed::High, EndpointType::InterruptIn, 8), 3);
        assert_eq!(interval_from_binterval(PortSpeed::High, EndpointType::InterruptIn, 1), 0);
    }
}

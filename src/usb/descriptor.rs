//! Standard USB descriptors (USB 2.0 §9.6) and a cursor that walks the byte
//! blob a GET_DESCRIPTOR(Configuration) request returns: one configuration
//! descriptor followed by a flat run of interface and endpoint descriptors,
//! each self-describing its own length.
//!
//! Only the descriptor definition mirrored in the data this was grounded on
//! (`UsbDeviceDescriptor`) survived the retrieval; the rest
//! (Configuration/Interface/Endpoint) are standard USB 2.0 layouts rebuilt
//! from their `bLength`/field tables.

use alloc::vec::Vec;

pub const DESCRIPTOR_TYPE_DEVICE: u8 = 1;
pub const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 2;
pub const DESCRIPTOR_TYPE_STRING: u8 = 3;
pub const DESCRIPTOR_TYPE_INTERFACE: u8 = 4;
pub const DESCRIPTOR_TYPE_ENDPOINT: u8 = 5;
pub const DESCRIPTOR_TYPE_SS_EP_COMPANION: u8 = 0x30;

/// Common prefix of every descriptor (USB 2.0 §9.5).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct UsbDescriptorHeader {
    pub b_length: u8,
    pub b_descriptor_type: u8,
}

const _: () = assert!(core::mem::size_of::<UsbDescriptorHeader>() == 2);

/// USB 2.0 Table 9-8. 18 bytes, the only descriptor fetched before an
/// address has been assigned.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct UsbDeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

const _: () = assert!(core::mem::size_of::<UsbDeviceDescriptor>() == 18);

/// USB 2.0 Table 9-10. Precedes every interface/endpoint descriptor for the
/// configuration it describes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct UsbConfigurationDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub b_max_power: u8,
}

const _: () = assert!(core::mem::size_of::<UsbConfigurationDescriptor>() == 9);

/// USB 2.0 Table 9-12.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct UsbInterfaceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
}

const _: () = assert!(core::mem::size_of::<UsbInterfaceDescriptor>() == 9);

impl UsbInterfaceDescriptor {
    /// bmAttributes.TransferType bits, the low two bits of the paired
    /// endpoint descriptor's own `bm_attributes` (not this struct's field;
    /// kept here since callers usually have both handy together).
    pub const fn is_control(&self) -> bool {
        self.b_num_endpoints == 0
    }
}

/// USB 2.0 Table 9-13.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct UsbEndpointDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

const _: () = assert!(core::mem::size_of::<UsbEndpointDescriptor>() == 7);

/// USB 3.2 Table 9-26. Follows a SuperSpeed endpoint's own Endpoint
/// Descriptor; not emitted by USB 2.0 devices.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct UsbSsEndpointCompanionDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_max_burst: u8,
    pub bm_attributes: u8,
    pub w_bytes_per_interval: u16,
}

const _: () = assert!(core::mem::size_of::<UsbSsEndpointCompanionDescriptor>() == 6);

impl UsbEndpointDescriptor {
    /// bEndpointAddress bit 7: 1 = IN.
    pub const fn is_in(&self) -> bool {
        self.b_endpoint_address & 0x80 != 0
    }

    /// bEndpointAddress bits [3:0].
    pub const fn endpoint_number(&self) -> u8 {
        self.b_endpoint_address & 0x0F
    }

    /// bmAttributes bits [1:0] (USB 2.0 Table 9-13): 0 control, 1 isoch,
    /// 2 bulk, 3 interrupt.
    pub const fn transfer_type(&self) -> u8 {
        self.bm_attributes & 0x03
    }
}

/// One descriptor pulled out of a configuration descriptor blob by
/// [`parse_configuration`]. Anything not a known type is kept as raw bytes
/// so a class driver can still find and parse its own (e.g. HID report)
/// descriptors without this module knowing about them.
#[derive(Debug, Clone)]
pub enum Descriptor<'a> {
    Configuration(UsbConfigurationDescriptor),
    Interface(UsbInterfaceDescriptor),
    Endpoint(UsbEndpointDescriptor),
    SsEndpointCompanion(UsbSsEndpointCompanionDescriptor),
    Other { descriptor_type: u8, bytes: &'a [u8] },
}

fn read<T: Copy>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < core::mem::size_of::<T>() {
        return None;
    }
    Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

/// Walks a configuration descriptor blob (as returned by a
/// GET_DESCRIPTOR(Configuration, wLength = wTotalLength) request) into its
/// constituent descriptors, in the order the device sent them. Stops at the
/// first malformed header (zero length, or a length claiming more bytes
/// than remain) rather than panicking on a misbehaving device.
pub fn parse_configuration(blob: &[u8]) -> Vec<Descriptor<'_>> {
    let mut descriptors = Vec::new();
    let mut offset = 0usize;

    while offset + 2 <= blob.len() {
        let header: UsbDescriptorHeader = match read(&blob[offset..]) {
            Some(h) => h,
            None => break,
        };
        let length = header.b_length as usize;
        if length < 2 || offset + length > blob.len() {
            break;
        }
        let body = &blob[offset..offset + length];

        let descriptor = match header.b_descriptor_type {
            DESCRIPTOR_TYPE_CONFIGURATION => read(body).map(Descriptor::Configuration),
            DESCRIPTOR_TYPE_INTERFACE => read(body).map(Descriptor::Interface),
            DESCRIPTOR_TYPE_ENDPOINT => read(body).map(Descriptor::Endpoint),
            DESCRIPTOR_TYPE_SS_EP_COMPANION => read(body).map(Descriptor::SsEndpointCompanion),
            other => Some(Descriptor::Other { descriptor_type: other, bytes: body }),
        };

        match descriptor {
            Some(d) => descriptors.push(d),
            None => break,
        }

        offset += length;
    }

    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration_bytes() -> Vec<u8> {
        let mut blob = Vec::new();
        // Configuration descriptor, 9 bytes.
        blob.extend_from_slice(&[9, DESCRIPTOR_TYPE_CONFIGURATION, 9 + 9 + 7, 0, 1, 1, 0, 0xA0, 50]);
        // Interface descriptor, 9 bytes, one endpoint.
        blob.extend_from_slice(&[9, DESCRIPTOR_TYPE_INTERFACE, 0, 0, 1, 0xFF, 0, 0, 0]);
        // Endpoint descriptor, 7 bytes, bulk IN.
        blob.extend_from_slice(&[7, DESCRIPTOR_TYPE_ENDPOINT, 0x81, 2, 0x00, 0x02, 0]);
        blob
    }

    #[test]
    fn parses_configuration_interface_endpoint_in_order() {
        let blob = configuration_bytes();
        let descriptors = parse_configuration(&blob);
        assert_eq!(descriptors.len(), 3);
        assert!(matches!(descriptors[0], Descriptor::Configuration(_)));
        assert!(matches!(descriptors[1], Descriptor::Interface(_)));
        match descriptors[2] {
            Descriptor::Endpoint(ep) => {
                assert!(ep.is_in());
                assert_eq!(ep.endpoint_number(), 1);
                assert_eq!(ep.transfer_type(), 2);
            }
            _ => panic!("expected endpoint descriptor"),
        }
    }

    #[test]
    fn stops_at_truncated_descriptor() {
        let mut blob = configuration_bytes();
        blob.truncate(blob.len() - 3);
        let descriptors = parse_configuration(&blob);
        assert_eq!(descriptors.len(), 2);
    }

    #[test]
    fn ss_endpoint_companion_is_recognised_between_endpoint_and_next_descriptor() {
        let mut blob = configuration_bytes();
        blob.extend_from_slice(&[6, DESCRIPTOR_TYPE_SS_EP_COMPANION, 0, 0, 0, 0]);
        let descriptors = parse_configuration(&blob);
        assert_eq!(descriptors.len(), 4);
        assert!(matches!(descriptors[3], Descriptor::SsEndpointCompanion(_)));
    }

    #[test]
    fn unknown_descriptor_type_is_carried_as_raw_bytes() {
        let blob = [4u8, 0x21, 0xAA, 0xBB];
        let descriptors = parse_configuration(&blob);
        match descriptors[0] {
            Descriptor::Other { descriptor_type, bytes } => {
                assert_eq!(descriptor_type, 0x21);
                assert_eq!(bytes.len(), 4);
            }
            _ => panic!("expected raw descriptor"),
        }
    }
}

//! S4 (descriptor/interval half): a HID keyboard's configuration (one
//! interface, one interrupt-IN endpoint, MPS=8, bInterval=10) parses into
//! the right shape and derives the right xHCI Interval field for a
//! full-speed device. The device-side half of S4 (actually issuing
//! Configure-Endpoint and checking the resulting endpoint context) needs a
//! live command ring and is covered by `transfer`'s and `enumeration`'s own
//! `#[cfg(test)]` suites instead — see `tests/common/mod.rs`.

use xhci_driver::context::EndpointType;
use xhci_driver::enumeration::interval_from_binterval;
use xhci_driver::regs::PortSpeed;
use xhci_driver::usb::descriptor::{parse_configuration, Descriptor, DESCRIPTOR_TYPE_CONFIGURATION, DESCRIPTOR_TYPE_ENDPOINT, DESCRIPTOR_TYPE_INTERFACE};
use xhci_driver::usb::device::EndpointDescriptorFields;

#[test]
fn hid_keyboard_configuration_yields_one_interrupt_in_endpoint() {
    let total_length: u16 = 9 + 9 + 7;
    let mut blob = Vec::new();
    blob.extend_from_slice(&[9, DESCRIPTOR_TYPE_CONFIGURATION, total_length as u8, (total_length >> 8) as u8, 1, 1, 0, 0xA0, 50]);
    blob.extend_from_slice(&[9, DESCRIPTOR_TYPE_INTERFACE, 0, 0, 1, 0x03, 0x01, 0x01, 0]);
    blob.extend_from_slice(&[7, DESCRIPTOR_TYPE_ENDPOINT, 0x81, 0x03, 8, 0, 10]);

    let descriptors = parse_configuration(&blob);
    assert_eq!(descriptors.len(), 3);

    match &descriptors[0] {
        Descriptor::Configuration(c) => {
            let parsed_total = c.w_total_length;
            assert_eq!(parsed_total, total_length);
        }
        other => panic!("expected a configuration descriptor, got {other:?}"),
    }

    let endpoint = match &descriptors[2] {
        Descriptor::Endpoint(e) => EndpointDescriptorFields::from(e),
        other => panic!("expected an endpoint descriptor, got {other:?}"),
    };

    assert_eq!(endpoint.max_packet_size, 8);
    assert_eq!(endpoint.endpoint_address & 0x80, 0x80);

    let interval = interval_from_binterval(PortSpeed::Full, EndpointType::InterruptIn, endpoint.interval);
    assert_eq!(interval, 9);
}

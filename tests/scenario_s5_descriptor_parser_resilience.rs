//! S5: a configuration descriptor blob containing CONFIG(9) + INTERFACE(9)
//! + HID(9, type=0x21) + ENDPOINT(7) + ENDPOINT(7) parses into one
//! interface and two endpoints, with the HID descriptor skipped (carried
//! as an opaque `Descriptor::Other` rather than dropped or mis-parsed).

use xhci_driver::usb::descriptor::{parse_configuration, Descriptor, DESCRIPTOR_TYPE_CONFIGURATION, DESCRIPTOR_TYPE_ENDPOINT, DESCRIPTOR_TYPE_INTERFACE};

#[test]
fn hid_descriptor_between_interface_and_endpoints_is_carried_as_raw_bytes() {
    let mut blob = Vec::new();
    blob.extend_from_slice(&[9, DESCRIPTOR_TYPE_CONFIGURATION, 9 + 9 + 9 + 7 + 7, 0, 1, 1, 0, 0xA0, 50]);
    blob.extend_from_slice(&[9, DESCRIPTOR_TYPE_INTERFACE, 0, 0, 2, 0x03, 0x01, 0x01, 0]);
    blob.extend_from_slice(&[9, 0x21, 0x10, 0x01, 0x00, 0x01, 0x22, 0x22, 0x00]);
    blob.extend_from_slice(&[7, DESCRIPTOR_TYPE_ENDPOINT, 0x81, 0x03, 0x08, 0x00, 0x0A]);
    blob.extend_from_slice(&[7, DESCRIPTOR_TYPE_ENDPOINT, 0x02, 0x02, 0x40, 0x00, 0x00]);

    let descriptors = parse_configuration(&blob);
    assert_eq!(descriptors.len(), 5);

    assert!(matches!(descriptors[0], Descriptor::Configuration(_)));
    assert!(matches!(descriptors[1], Descriptor::Interface(_)));
    match &descriptors[2] {
        Descriptor::Other { descriptor_type, bytes } => {
            assert_eq!(*descriptor_type, 0x21);
            assert_eq!(bytes.len(), 9);
        }
        other => panic!("expected the HID descriptor to be skipped as raw bytes, got {other:?}"),
    }
    assert!(matches!(descriptors[3], Descriptor::Endpoint(_)));
    assert!(matches!(descriptors[4], Descriptor::Endpoint(_)));

    let interface_count = descriptors.iter().filter(|d| matches!(d, Descriptor::Interface(_))).count();
    let endpoint_count = descriptors.iter().filter(|d| matches!(d, Descriptor::Endpoint(_))).count();
    assert_eq!(interface_count, 1);
    assert_eq!(endpoint_count, 2);
}

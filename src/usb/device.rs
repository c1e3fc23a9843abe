//! The runtime state this driver keeps for one enumerated device and the
//! serializable tree a diagnostic caller can dump from it.

use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;

use crate::regs::PortSpeed;
use crate::usb::descriptor::{UsbConfigurationDescriptor, UsbDeviceDescriptor, UsbEndpointDescriptor, UsbInterfaceDescriptor};

/// One endpoint of an enumerated interface: its descriptor plus the device
/// context index ([`crate::ring::endpoint_index`]) its transfer ring lives
/// under.
#[derive(Debug, Clone, Serialize)]
pub struct UsbEndpointNode {
    pub descriptor: EndpointDescriptorFields,
    pub device_context_index: u8,
}

/// One interface of an enumerated configuration.
#[derive(Debug, Clone, Serialize)]
pub struct UsbInterfaceNode {
    pub descriptor: InterfaceDescriptorFields,
    pub endpoints: Vec<UsbEndpointNode>,
}

/// An enumerated device: everything chapter-9 plumbing discovered about it,
/// shaped for `serde_json` rather than for re-use by transfer code (see
/// [`crate::transfer`] for the live handles).
#[derive(Debug, Clone, Serialize)]
pub struct UsbDeviceTree {
    pub slot_id: u8,
    pub port_index: u8,
    pub speed: PortSpeedField,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub device: DeviceDescriptorFields,
    pub configuration: ConfigurationDescriptorFields,
    pub interfaces: Vec<UsbInterfaceNode>,
}

/// Descriptor fields serde can derive `Serialize` for directly; the real
/// descriptor structs are `#[repr(C, packed)]`, and packed structs can't
/// have their fields borrowed by a derive macro, so enumeration copies the
/// handful of fields worth surfacing into these plain types.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PortSpeedField(pub u8);

impl From<PortSpeed> for PortSpeedField {
    fn from(speed: PortSpeed) -> Self {
        PortSpeedField(speed.into_bits())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeviceDescriptorFields {
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub num_configurations: u8,
}

impl From<&UsbDeviceDescriptor> for DeviceDescriptorFields {
    fn from(d: &UsbDeviceDescriptor) -> Self {
        DeviceDescriptorFields {
            bcd_usb: d.bcd_usb,
            device_class: d.b_device_class,
            device_sub_class: d.b_device_sub_class,
            device_protocol: d.b_device_protocol,
            max_packet_size0: d.b_max_packet_size0,
            id_vendor: d.id_vendor,
            id_product: d.id_product,
            bcd_device: d.bcd_device,
            num_configurations: d.b_num_configurations,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConfigurationDescriptorFields {
    pub configuration_value: u8,
    pub num_interfaces: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl From<&UsbConfigurationDescriptor> for ConfigurationDescriptorFields {
    fn from(c: &UsbConfigurationDescriptor) -> Self {
        ConfigurationDescriptorFields {
            configuration_value: c.b_configuration_value,
            num_interfaces: c.b_num_interfaces,
            attributes: c.bm_attributes,
            max_power: c.b_max_power,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct InterfaceDescriptorFields {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
}

impl From<&UsbInterfaceDescriptor> for InterfaceDescriptorFields {
    fn from(i: &UsbInterfaceDescriptor) -> Self {
        InterfaceDescriptorFields {
            interface_number: i.b_interface_number,
            alternate_setting: i.b_alternate_setting,
            interface_class: i.b_interface_class,
            interface_sub_class: i.b_interface_sub_class,
            interface_protocol: i.b_interface_protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EndpointDescriptorFields {
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl From<&UsbEndpointDescriptor> for EndpointDescriptorFields {
    fn from(e: &UsbEndpointDescriptor) -> Self {
        EndpointDescriptorFields {
            endpoint_address: e.b_endpoint_address,
            attributes: e.bm_attributes,
            max_packet_size: e.w_max_packet_size,
            interval: e.b_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_round_trips_through_json() {
        let tree = UsbDeviceTree {
            slot_id: 1,
            port_index: 0,
            speed: PortSpeedField(4),
            manufacturer: Some(String::from("Example Corp")),
            product: Some(String::from("Widget")),
            serial_number: None,
            device: DeviceDescriptorFields {
                bcd_usb: 0x0300,
                device_class: 0,
                device_sub_class: 0,
                device_protocol: 0,
                max_packet_size0: 9,
                id_vendor: 0x1234,
                id_product: 0xABCD,
                bcd_device: 0x0100,
                num_configurations: 1,
            },
            configuration: ConfigurationDescriptorFields {
                configuration_value: 1,
                num_interfaces: 1,
                attributes: 0xA0,
                max_power: 50,
            },
            interfaces: Vec::new(),
        };

        let json = serde_json::to_string(&tree).expect("serialize device tree");
        assert!(json.contains("\"id_vendor\":4660"));
    }
}

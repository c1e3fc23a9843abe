//! The 8-byte USB control-transfer setup packet (USB 2.0 §9.3) and the
//! standard chapter-9 device requests built on top of it. Every request here
//! is carried as immediate data in a Setup Stage TRB (xHCI 1.2 §6.4.1.2.1),
//! so [`SetupPacket`] packs into the same 64 bits the controller expects in
//! the TRB's parameter field.

use bitfield_struct::bitfield;

/// bmRequestType.Recipient (USB 2.0 Table 9-2).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

impl Recipient {
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Interface,
            2 => Self::Endpoint,
            3 => Self::Other,
            _ => Self::Device,
        }
    }
}

/// bmRequestType.Type (USB 2.0 Table 9-2).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
}

impl RequestType {
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Class,
            2 => Self::Vendor,
            _ => Self::Standard,
        }
    }
}

/// Standard request codes, USB 2.0 Table 9-4. Class/vendor drivers define
/// their own codes in the same `b_request` byte; those aren't named here.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}

/// The setup packet handed to the controller as the parameter field of a
/// Setup Stage TRB (xHCI 1.2 Figure 6-10). Field order and widths mirror USB
/// 2.0 Figure 9-2 exactly, since this is wire format, not an internal type.
#[bitfield(u64)]
pub struct SetupPacket {
    #[bits(5)]
    pub recipient: Recipient,
    #[bits(2)]
    pub request_type: RequestType,
    /// Direction bit of bmRequestType: true = device-to-host (IN).
    pub device_to_host: bool,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPacket {
    /// Transfer Type for the Setup Stage TRB's control word (xHCI 1.2 Table
    /// 6-78): 0 = no data stage, 2 = OUT data stage, 3 = IN data stage.
    pub const fn transfer_type(&self) -> u8 {
        if self.w_length() == 0 {
            0
        } else if self.device_to_host() {
            3
        } else {
            2
        }
    }

    fn standard(recipient: Recipient, request: StandardRequest, device_to_host: bool, w_value: u16, w_index: u16, w_length: u16) -> Self {
        SetupPacket::new()
            .with_recipient(recipient)
            .with_request_type(RequestType::Standard)
            .with_device_to_host(device_to_host)
            .with_b_request(request as u8)
            .with_w_value(w_value)
            .with_w_index(w_index)
            .with_w_length(w_length)
    }

    pub fn get_status(recipient: Recipient, index: u16) -> Self {
        Self::standard(recipient, StandardRequest::GetStatus, true, 0, index, 2)
    }

    pub fn clear_feature(recipient: Recipient, feature_selector: u16, index: u16) -> Self {
        Self::standard(recipient, StandardRequest::ClearFeature, false, feature_selector, index, 0)
    }

    pub fn set_feature(recipient: Recipient, feature_selector: u16, index: u16) -> Self {
        Self::standard(recipient, StandardRequest::SetFeature, false, feature_selector, index, 0)
    }

    /// `address` must be at most 127 (USB 2.0 §9.4.6); the caller validates.
    pub fn set_address(address: u8) -> Self {
        Self::standard(Recipient::Device, StandardRequest::SetAddress, false, address as u16, 0, 0)
    }

    /// `descriptor_type`/`descriptor_index` pack into wValue high/low byte
    /// per USB 2.0 §9.4.3; `language_id` is 0 for device/configuration
    /// descriptors.
    pub fn get_descriptor(descriptor_type: u8, descriptor_index: u8, language_id: u16, length: u16) -> Self {
        let w_value = ((descriptor_type as u16) << 8) | descriptor_index as u16;
        Self::standard(Recipient::Device, StandardRequest::GetDescriptor, true, w_value, language_id, length)
    }

    pub fn set_descriptor(descriptor_type: u8, descriptor_index: u8, language_id: u16, length: u16) -> Self {
        let w_value = ((descriptor_type as u16) << 8) | descriptor_index as u16;
        Self::standard(Recipient::Device, StandardRequest::SetDescriptor, false, w_value, language_id, length)
    }

    pub fn get_configuration() -> Self {
        Self::standard(Recipient::Device, StandardRequest::GetConfiguration, true, 0, 0, 1)
    }

    pub fn set_configuration(configuration_value: u8) -> Self {
        Self::standard(Recipient::Device, StandardRequest::SetConfiguration, false, configuration_value as u16, 0, 0)
    }

    pub fn get_interface(interface_number: u16) -> Self {
        Self::standard(Recipient::Interface, StandardRequest::GetInterface, true, 0, interface_number, 1)
    }

    pub fn set_interface(interface_number: u16, alternate_setting: u16) -> Self {
        Self::standard(Recipient::Interface, StandardRequest::SetInterface, false, alternate_setting, interface_number, 0)
    }

    pub fn synch_frame(endpoint_number: u16) -> Self {
        Self::standard(Recipient::Endpoint, StandardRequest::SynchFrame, true, 0, endpoint_number, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_descriptor_packs_type_and_index_into_w_value() {
        let packet = SetupPacket::get_descriptor(1, 0, 0, 18);
        assert_eq!(packet.w_value(), 0x0100);
        assert_eq!(packet.w_length(), 18);
        assert!(packet.device_to_host());
        assert_eq!(packet.b_request(), StandardRequest::GetDescriptor as u8);
    }

    #[test]
    fn set_address_has_no_data_stage() {
        let packet = SetupPacket::set_address(5);
        assert_eq!(packet.transfer_type(), 0);
        assert_eq!(packet.w_value(), 5);
    }

    #[test]
    fn get_status_has_in_data_stage() {
        let packet = SetupPacket::get_status(Recipient::Device, 0);
        assert_eq!(packet.transfer_type(), 3);
    }
}

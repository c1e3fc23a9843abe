//! USB chapter-9 plumbing: descriptors, the setup-packet request builders,
//! and the serializable device tree enumeration produces. This module knows
//! nothing about the xHCI wire format; [`crate::transfer`] and
//! [`crate::enumeration`] are the bridge between the two.

pub mod descriptor;
pub mod device;
pub mod request;

pub use descriptor::{Descriptor, UsbConfigurationDescriptor, UsbDescriptorHeader, UsbDeviceDescriptor, UsbEndpointDescriptor, UsbInterfaceDescriptor};
pub use device::UsbDeviceTree;
pub use request::{Recipient, RequestType, SetupPacket, StandardRequest};

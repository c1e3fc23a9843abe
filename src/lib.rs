//! xHCI (eXtensible Host Controller Interface) USB host-controller driver.
//!
//! Brings a PCI-attached xHCI controller from reset to the running state,
//! enumerates devices on its root hub, exchanges control/bulk/interrupt
//! transfers with them, and dispatches completion events to per-endpoint
//! handlers. PCI enumeration, physical memory management, logging sinks,
//! and class drivers are external collaborators reached through the traits
//! in [`hal`].

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "test-support"))]
extern crate std;

pub mod config;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod enumeration;
pub mod error;
pub mod hal;
pub mod logging;
pub mod regs;
pub mod ring;
pub mod transfer;
pub mod trb;
pub mod usb;
mod volatile;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{XhciError, XhciResult};

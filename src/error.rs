use thiserror::Error;

use crate::trb::CompletionCode;

/// Errors surfaced by the core. Command and transfer failures are returned,
/// never retried; per-port enumeration errors are handled locally by the
/// caller (the port is abandoned, the next candidate proceeds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum XhciError {
    #[error("device is not an xHCI controller")]
    NotXhci,
    #[error("port enable/reset timed out")]
    EnablePortError,
    #[error("controller has no free device slots")]
    NoSlotsAvailable,
    #[error("address device command did not complete successfully")]
    AddressDeviceError,
    #[error("configure endpoint command did not complete successfully")]
    ConfigEndpointError,
    #[error("transfer failed with completion code {0:?}")]
    TransferError(CompletionCode),
    #[error("requested feature is not yet implemented")]
    NotYetImplemented,
    #[error("controller did not leave CNR/HCH within the allotted time")]
    ControllerHung,
    #[error("dma allocation failed: out of memory")]
    OutOfMemory,
    #[error("descriptor buffer was malformed or truncated")]
    MalformedDescriptor,
}

pub type XhciResult<T> = Result<T, XhciError>;

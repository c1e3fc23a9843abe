//! Ambient properties added by the expansion: a Setup Stage TRB round-trips
//! its 8-byte setup packet, `ControllerConfig::default()` matches the
//! documented constants, and every `XhciError` variant has a distinct,
//! non-empty `Display` message.

use std::collections::BTreeSet;

use xhci_driver::trb::{CompletionCode, Trb, TransferControl};
use xhci_driver::usb::request::SetupPacket;
use xhci_driver::{ControllerConfig, XhciError};

#[test]
fn setup_stage_trb_round_trips_its_setup_packet() {
    let setup = SetupPacket::get_descriptor(1, 0, 0, 18);
    let trb = Trb::new_setup_stage(setup.into_bits(), setup.transfer_type());

    assert_eq!(trb.parameter, setup.into_bits());
    let decoded = SetupPacket::from_bits(trb.parameter);
    assert_eq!(decoded.w_value(), setup.w_value());
    assert_eq!(decoded.w_length(), setup.w_length());
    assert_eq!(decoded.b_request(), setup.b_request());
}

#[test]
fn setup_stage_trb_carries_transfer_type_in_the_control_word_not_status() {
    let setup = SetupPacket::get_descriptor(1, 0, 0, 18);
    let trb = Trb::new_setup_stage(setup.into_bits(), setup.transfer_type());

    // wLength is nonzero, so an IN data stage is expected (TRT = 3).
    assert_eq!(setup.transfer_type(), 3);
    assert_eq!(trb.status, 8, "status word must stay the 8-byte setup length, not fold in TRT");

    let control = TransferControl::from_bits(trb.control);
    assert_eq!(control.dir_or_trt(), 3);
}

#[test]
fn data_and_status_stage_trbs_put_direction_at_bit_16() {
    let data_in = Trb::new_data_stage(0x1000, 8, true);
    let data_out = Trb::new_data_stage(0x1000, 8, false);
    assert_eq!(data_in.control & (1 << 16), 1 << 16);
    assert_eq!(data_out.control & (1 << 16), 0);

    let status_in = Trb::new_status_stage(true);
    let status_out = Trb::new_status_stage(false);
    assert_eq!(status_in.control & (1 << 16), 1 << 16);
    assert_eq!(status_out.control & (1 << 16), 0);
}

#[test]
fn default_config_matches_the_documented_constants() {
    let config = ControllerConfig::default();
    assert_eq!(config.max_slots_cap, 16);
    assert_eq!(config.command_ring_trb_count, 256);
    assert_eq!(config.event_ring_trb_count, 256);
    assert!(config.require_legacy_handoff);
}

#[test]
fn every_error_variant_has_a_distinct_non_empty_message() {
    let variants = [
        XhciError::NotXhci,
        XhciError::EnablePortError,
        XhciError::NoSlotsAvailable,
        XhciError::AddressDeviceError,
        XhciError::ConfigEndpointError,
        XhciError::TransferError(CompletionCode::StallError),
        XhciError::NotYetImplemented,
        XhciError::ControllerHung,
        XhciError::OutOfMemory,
        XhciError::MalformedDescriptor,
    ];

    let mut messages = BTreeSet::new();
    for variant in &variants {
        let message = variant.to_string();
        assert!(!message.is_empty());
        assert!(messages.insert(message), "duplicate Display message for {variant:?}");
    }
}

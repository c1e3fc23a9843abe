//! Ambient property: a `poll_until` predicate that never becomes true
//! returns `ControllerHung` once its iteration budget is spent, rather than
//! spinning forever or panicking.

mod common;

use xhci_driver::XhciError;

#[test]
fn poll_until_gives_up_and_returns_controller_hung() {
    let (_bar0, _simulator, controller) = common::bring_up(4, 1, 0);

    let result = controller.poll_until(|| false);
    assert_eq!(result, Err(XhciError::ControllerHung));
}

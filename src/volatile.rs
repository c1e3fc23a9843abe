//! Volatile struct-field access. The optimizer is otherwise free to elide or
//! reorder reads/writes to MMIO-backed struct fields; these macros force a
//! genuine load/store through the field's address every time.

#[macro_export]
macro_rules! read_ref {
    ($ref:expr) => {
        unsafe { core::ptr::read_volatile(&raw const $ref) }
    };
}

#[macro_export]
macro_rules! write_ref {
    ($ref:expr, $value:expr) => {
        unsafe { core::ptr::write_volatile(&raw mut $ref, $value) }
    };
}

pub use crate::{read_ref, write_ref};

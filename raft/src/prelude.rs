//! Re-exports of `alloc` collection types used throughout this crate, so that modules need not
//! distinguish between `std` and `alloc` depending on enabled features.

pub(crate) use alloc::vec::Vec;

#![deny(clippy::await_holding_refcell_ref)]

pub mod common;
pub mod job;
pub mod orchestrator;
pub mod profile;
pub mod slice;

pub type Error = crate::common::error::MultisliceError;
pub type Result<T> = std::result::Result<T, Error>;

/// Ordinal of a slice inside a cohort (`0..N-1`).
pub type SliceIndex = u32;

pub const MULTISLICE_VERSION: &str = {
    match option_env!("MULTISLICE_BUILD_VERSION") {
        Some(version) => version,
        None => env!("CARGO_PKG_VERSION"),
    }
};

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod asynch;
mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod scope;
pub mod urc;

#[cfg(test)]
mod test_helpers;

pub use error::{DeviceError, DeviceErrorType, Error};

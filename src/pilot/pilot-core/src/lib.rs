#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod constants;
pub mod control;
pub mod decode;
pub mod decoder;
pub mod error;
pub mod execute;
pub mod fetch;
pub mod interconnect;
pub mod memory;
pub mod microcode;
pub mod pilot;
pub mod registers;

pub use error::CoreError;
pub use pilot::Pilot;

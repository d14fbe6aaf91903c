//! Sandboxed ARM Thumb interpreter and plugin VM core.
//!
//! A plugin is a sealed little-endian image of Thumb/Thumb-2 machine code
//! loaded into an isolated linear RAM and interpreted by a software CPU.
//! The guest talks to its host only through imported function slots that
//! the loader rewrites into trampoline addresses, and through a cooperative
//! `yield` that ends the current time-slice.

pub mod cpu;
mod exec;
pub mod image;
pub mod vm;

pub use image::ImageError;
pub use vm::{Args, CallValue, HostFn, Vm, DEFAULT_SLICE};

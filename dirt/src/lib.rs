//! Host runtime for sandboxed Thumb plugins.
//!
//! The host exposes a graphics scene, a key-value [`model`], and an
//! asynchronous event/message surface to plugin binaries interpreted by
//! [`loam`]. Plugins run concurrently in a worker pool; host-mutating calls
//! are deferred to the main thread, reads go through registry locks.

pub mod api;
pub mod app;
pub mod events;
pub mod graphics;
pub mod index;
pub mod main_thread;
pub mod model;
pub mod scene;
pub mod util;
pub mod vm;

pub use app::{App, AppShared};
pub use events::EventId;
pub use graphics::{Graphics, Headless};

//! Contract for the windowing/renderer backend.
//!
//! The real backends (window, input, GL upload) live outside this crate;
//! the core only needs their dimensions, liveness and an event pump. A
//! backend configures itself from the `window.*` model keys (title, size,
//! position, GL version) when it handles the Boot event.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::events::EventBus;

pub trait Graphics: Send {
    /// False once the backend wants the process to shut down.
    fn running(&self) -> bool;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Pump backend input/window events into the bus.
    fn poll(&mut self, bus: &EventBus);
}

/// Backend stand-in for tests and windowless runs.
pub struct Headless {
    alive: AtomicBool,
    width: u32,
    height: u32,
}

impl Headless {
    pub fn new(width: u32, height: u32) -> Headless {
        Headless {
            alive: AtomicBool::new(true),
            width,
            height,
        }
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Graphics for Headless {
    fn running(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn poll(&mut self, _bus: &EventBus) {}
}

//! Event fan-out: named host events and the per-VM pending ring.

use parking_lot::RwLock;

/// Host events a plugin can subscribe to. `MaxEvent` doubles as the
/// "nothing pending" sentinel returned by `pollEvents`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum EventId {
    #[default]
    Boot = 0,
    PreUpdate = 1,
    Update = 2,
    Draw = 3,
    PostUpdate = 4,
    Resize = 5,
    MouseLeftDown = 6,
    MouseMiddleDown = 7,
    MouseRightDown = 8,
    MouseLeftUp = 9,
    MouseMiddleUp = 10,
    MouseRightUp = 11,
    MouseMove = 12,
    MaxEvent = 13,
}

pub const MAX_EVENT: u32 = EventId::MaxEvent as u32;

impl EventId {
    pub fn from_u32(value: u32) -> Option<EventId> {
        use EventId::*;
        Some(match value {
            0 => Boot,
            1 => PreUpdate,
            2 => Update,
            3 => Draw,
            4 => PostUpdate,
            5 => Resize,
            6 => MouseLeftDown,
            7 => MouseMiddleDown,
            8 => MouseRightDown,
            9 => MouseLeftUp,
            10 => MouseMiddleUp,
            11 => MouseRightUp,
            12 => MouseMove,
            _ => return None,
        })
    }
}

struct Listener {
    /// Owner token, used to clear every slot of a dying endpoint. Host-side
    /// listeners use zero.
    endpoint: u32,
    handler: Box<dyn Fn(EventId) + Send + Sync>,
}

/// Per-event listener slot vectors. Subscribing reuses an empty slot or
/// appends; emitting walks the slots under the read lock.
pub struct EventBus {
    slots: RwLock<Vec<Vec<Option<Listener>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            slots: RwLock::new((0..MAX_EVENT).map(|_| Vec::new()).collect()),
        }
    }

    pub fn subscribe(
        &self,
        id: EventId,
        endpoint: u32,
        handler: impl Fn(EventId) + Send + Sync + 'static,
    ) {
        let listener = Listener {
            endpoint,
            handler: Box::new(handler),
        };
        let mut slots = self.slots.write();
        let listeners = &mut slots[id as usize];
        match listeners.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(listener),
            None => listeners.push(Some(listener)),
        }
    }

    /// Clear every slot owned by `endpoint`; the slots become reusable.
    pub fn remove_endpoint(&self, endpoint: u32) {
        let mut slots = self.slots.write();
        for listeners in slots.iter_mut() {
            for slot in listeners.iter_mut() {
                if matches!(slot, Some(listener) if listener.endpoint == endpoint) {
                    *slot = None;
                }
            }
        }
    }

    pub fn emit(&self, id: EventId) {
        let slots = self.slots.read();
        for listener in slots[id as usize].iter().flatten() {
            (listener.handler)(id);
        }
    }
}

/// Fixed-size ring that drops the oldest entry on overflow. With capacity
/// `n` it holds at most `n - 1` items (`read == write` means empty).
pub struct CircleBuffer<T> {
    data: Vec<T>,
    read: usize,
    write: usize,
}

impl<T: Copy + Default> CircleBuffer<T> {
    pub fn new(size: usize) -> CircleBuffer<T> {
        CircleBuffer {
            data: vec![T::default(); size.max(2)],
            read: 0,
            write: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.data[self.read];
        self.read = (self.read + 1) % self.data.len();
        Some(value)
    }

    pub fn push(&mut self, value: T) {
        self.data[self.write] = value;
        self.write = (self.write + 1) % self.data.len();
        if self.write == self.read {
            self.read = (self.read + 1) % self.data.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn emit_reaches_subscribers_and_removal_clears_slots() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        bus.subscribe(EventId::Update, 7, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(EventId::Update);
        bus.emit(EventId::Draw);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.remove_endpoint(7);
        bus.emit(EventId::Update);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn freed_slots_are_reused() {
        let bus = EventBus::new();
        bus.subscribe(EventId::Boot, 1, |_| {});
        bus.subscribe(EventId::Boot, 2, |_| {});
        bus.remove_endpoint(1);
        bus.subscribe(EventId::Boot, 3, |_| {});
        // still two slots: endpoint 3 reused the cleared one
        assert_eq!(bus.slots.read()[EventId::Boot as usize].len(), 2);
    }

    #[test]
    fn ring_drops_oldest_on_overflow() {
        let mut ring: CircleBuffer<u32> = CircleBuffer::new(4);
        for v in 1..=6 {
            ring.push(v);
        }
        // capacity 4 retains the newest three
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), Some(5));
        assert_eq!(ring.pop(), Some(6));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn event_id_round_trips_through_u32() {
        assert_eq!(EventId::from_u32(3), Some(EventId::Draw));
        assert_eq!(EventId::from_u32(13), None);
        assert_eq!(EventId::Draw as u32, 3);
    }
}

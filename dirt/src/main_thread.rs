//! Main-thread deferral queue.
//!
//! Renderer state and the scene graph are mutated only on the main thread.
//! Host API calls running on worker threads enqueue closures here; the main
//! thread drains the queue between tick phases, linearising all writes.

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct MainThreadQueue {
    callbacks: Mutex<Vec<Callback>>,
}

impl MainThreadQueue {
    pub fn defer(&self, callback: impl FnOnce() + Send + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Drain and run the queued callbacks. Work deferred by a callback runs
    /// on the next drain.
    pub fn run(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn callbacks_run_once_in_order() {
        let queue = MainThreadQueue::default();
        let state = Arc::new(AtomicU32::new(0));
        for i in 1..=3u32 {
            let state = state.clone();
            queue.defer(move || {
                state.store(state.load(Ordering::SeqCst) * 10 + i, Ordering::SeqCst);
            });
        }
        queue.run();
        assert_eq!(state.load(Ordering::SeqCst), 123);
        queue.run();
        assert_eq!(state.load(Ordering::SeqCst), 123);
    }

    #[test]
    fn nested_deferrals_wait_for_the_next_drain() {
        let queue = Arc::new(MainThreadQueue::default());
        let hits = Arc::new(AtomicU32::new(0));
        {
            let queue2 = queue.clone();
            let hits = hits.clone();
            queue.defer(move || {
                let hits = hits.clone();
                queue2.defer(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        queue.run();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        queue.run();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

//! Pixel surfaces shared between plugins and the renderer.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::index::Registry;

/// Signed-origin rectangle; width and height are unsigned.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Rect {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Grow to the bounding box of `self` and `other`.
    pub fn expand(&mut self, other: Rect) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
            return;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.width as i32).max(other.x + other.width as i32);
        let y1 = (self.y + self.height as i32).max(other.y + other.height as i32);
        *self = Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32);
    }
}

struct SurfaceState {
    pixels: Vec<u32>,
    width: u32,
    height: u32,
    /// Bounding box of all writes since the last renderer upload.
    dirty: Rect,
}

/// A `width x height` grid of RGBA8 pixels with its own lock; the renderer
/// uploads the dirty region and clears it.
pub struct Surface {
    registry: Arc<Registry<Surface>>,
    key: AtomicU32,
    state: RwLock<SurfaceState>,
    pub texture: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Surface {
    pub fn create(registry: &Arc<Registry<Surface>>, width: u32, height: u32) -> Arc<Surface> {
        let surface = Arc::new(Surface {
            registry: registry.clone(),
            key: AtomicU32::new(0),
            state: RwLock::new(SurfaceState {
                pixels: vec![0; (width as usize) * (height as usize)],
                width,
                height,
                dirty: Rect::default(),
            }),
            texture: Mutex::new(None),
        });
        let key = registry.add(&surface);
        surface.key.store(key.raw(), Ordering::Release);
        surface
    }

    pub fn key(&self) -> u32 {
        self.key.load(Ordering::Acquire)
    }

    pub fn width(&self) -> u32 {
        self.state.read().width
    }

    pub fn height(&self) -> u32 {
        self.state.read().height
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.write();
        if width == state.width && height == state.height {
            return;
        }
        state.pixels = vec![0; (width as usize) * (height as usize)];
        state.width = width;
        state.height = height;
        state.dirty = Rect::new(0, 0, width, height);
    }

    pub fn fill(&self, color: u32) {
        let mut state = self.state.write();
        state.pixels.fill(color);
        state.dirty = Rect::new(0, 0, state.width, state.height);
    }

    /// Blit a `region.width x region.height` block of pixels, clipped to
    /// the surface. The dirty rect grows by the clipped region.
    pub fn write(&self, region: Rect, data: &[u32]) {
        let mut state = self.state.write();
        let (sw, sh) = (state.width as i64, state.height as i64);
        let stride = region.width as usize;
        if region.is_empty()
            || region.x as i64 >= sw
            || region.y as i64 >= sh
            || region.x as i64 + region.width as i64 <= 0
            || region.y as i64 + region.height as i64 <= 0
            || data.len() < stride * region.height as usize
        {
            return;
        }

        let min_x = (-region.x).max(0) as u32;
        let min_y = (-region.y).max(0) as u32;
        let max_x = region.width.min((sw - region.x as i64) as u32);
        let max_y = region.height.min((sh - region.y as i64) as u32);

        let clipped = Rect::new(
            region.x + min_x as i32,
            region.y + min_y as i32,
            max_x - min_x,
            max_y - min_y,
        );
        state.dirty.expand(clipped);

        for src_y in min_y..max_y {
            let dst_y = (region.y + src_y as i32) as usize;
            for src_x in min_x..max_x {
                let dst_x = (region.x + src_x as i32) as usize;
                let dst = dst_y * state.width as usize + dst_x;
                state.pixels[dst] = data[src_y as usize * stride + src_x as usize];
            }
        }
    }

    /// Return and clear the accumulated dirty rect (the renderer upload).
    pub fn take_dirty(&self) -> Rect {
        let mut state = self.state.write();
        std::mem::take(&mut state.dirty)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        let state = self.state.read();
        if x >= state.width || y >= state.height {
            return None;
        }
        Some(state.pixels[(y * state.width + x) as usize])
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.registry.remove(self.key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SURFACE_INDEX_BASE;

    fn surface(w: u32, h: u32) -> Arc<Surface> {
        Surface::create(&Registry::new(SURFACE_INDEX_BASE), w, h)
    }

    #[test]
    fn fill_marks_everything_dirty() {
        let s = surface(4, 3);
        s.fill(0xFF00_00FF);
        assert_eq!(s.pixel(3, 2), Some(0xFF00_00FF));
        assert_eq!(s.take_dirty(), Rect::new(0, 0, 4, 3));
        assert_eq!(s.take_dirty(), Rect::default());
    }

    #[test]
    fn writes_clip_against_the_surface() {
        let s = surface(4, 4);
        // 2x2 block half off the top-left corner
        s.write(Rect::new(-1, -1, 2, 2), &[1, 2, 3, 4]);
        assert_eq!(s.pixel(0, 0), Some(4));
        assert_eq!(s.pixel(1, 0), Some(0));
        assert_eq!(s.take_dirty(), Rect::new(0, 0, 1, 1));

        // fully off-surface writes are ignored
        s.write(Rect::new(10, 10, 2, 2), &[9, 9, 9, 9]);
        assert_eq!(s.take_dirty(), Rect::default());
    }

    #[test]
    fn dirty_accumulates_across_writes() {
        let s = surface(8, 8);
        s.write(Rect::new(1, 1, 1, 1), &[7]);
        s.write(Rect::new(5, 6, 1, 1), &[8]);
        assert_eq!(s.take_dirty(), Rect::new(1, 1, 5, 6));
    }

    #[test]
    fn short_source_buffers_are_rejected() {
        let s = surface(4, 4);
        s.write(Rect::new(0, 0, 2, 2), &[1, 2, 3]);
        assert_eq!(s.pixel(0, 0), Some(0));
    }
}

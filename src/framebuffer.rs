use anyhow::{bail, Result};
use embedded_graphics::{
    draw_target::DrawTarget,
    geometry::{Dimensions, OriginDimensions, Size},
    pixelcolor::{raw::RawU16, Rgb565},
    prelude::*,
    primitives::Rectangle,
    Pixel,
};

use crate::layout::{SCREEN_H, SCREEN_W};

/// Number of rows sent per DMA chunk.
pub const CHUNK_LINES: u32 = 10;

/// RGB565 framebuffer in landscape, flushed to the panel in row chunks.
/// Only rows touched since the last flush are sent.
pub struct Framebuffer {
    pixels: Vec<u16>,
    width: u32,
    height: u32,
    /// Inclusive row range drawn since the last flush.
    dirty_rows: Option<(u32, u32)>,
    // Two DMA buffers used alternately: the panel may still be reading one
    // while the other is filled.
    dma: [*mut u8; 2],
    dma_bytes: usize,
    next_dma: usize,
}

impl Framebuffer {
    pub fn new() -> Result<Self> {
        let (width, height) = (SCREEN_W, SCREEN_H);
        let dma_bytes = (width * CHUNK_LINES * 2) as usize;
        let mut dma = [core::ptr::null_mut(); 2];
        for slot in dma.iter_mut() {
            *slot = unsafe {
                esp_idf_sys::heap_caps_malloc(dma_bytes, esp_idf_sys::MALLOC_CAP_DMA | esp_idf_sys::MALLOC_CAP_8BIT)
            } as *mut u8;
            if slot.is_null() {
                bail!("DMA buffer alloc failed ({} bytes)", dma_bytes);
            }
        }
        Ok(Self {
            pixels: vec![0; (width * height) as usize],
            width,
            height,
            dirty_rows: Some((0, height - 1)),
            dma,
            dma_bytes,
            next_dma: 0,
        })
    }

    fn mark_rows(&mut self, top: u32, bottom: u32) {
        self.dirty_rows = Some(match self.dirty_rows {
            Some((a, b)) => (a.min(top), b.max(bottom)),
            None => (top, bottom),
        });
    }

    /// Send dirty rows to the panel (big-endian RGB565).
    pub fn flush_to_panel(&mut self, panel: esp_idf_sys::esp_lcd_panel_handle_t) {
        let Some((top, bottom)) = self.dirty_rows.take() else {
            return;
        };
        let w = self.width as usize;

        let mut y = top;
        while y <= bottom {
            let y_end = (y + CHUNK_LINES).min(bottom + 1);
            let buf = unsafe { core::slice::from_raw_parts_mut(self.dma[self.next_dma], self.dma_bytes) };

            let mut di = 0usize;
            for row in y..y_end {
                let start = row as usize * w;
                for &pixel in &self.pixels[start..start + w] {
                    buf[di] = (pixel >> 8) as u8;
                    buf[di + 1] = (pixel & 0xFF) as u8;
                    di += 2;
                }
            }

            unsafe {
                esp_idf_sys::esp_lcd_panel_draw_bitmap(
                    panel,
                    0,
                    y as i32,
                    self.width as i32,
                    y_end as i32,
                    buf.as_ptr().cast(),
                );
            }
            self.next_dma ^= 1;
            y = y_end;
        }
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Framebuffer {
    type Color = Rgb565;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (w, h) = (self.width, self.height);
        let mut rows: Option<(u32, u32)> = None;
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 && (point.x as u32) < w && (point.y as u32) < h {
                let y = point.y as u32;
                self.pixels[(y * w + point.x as u32) as usize] = RawU16::from(color).into_inner();
                rows = Some(rows.map_or((y, y), |(a, b)| (a.min(y), b.max(y))));
            }
        }
        if let Some((a, b)) = rows {
            self.mark_rows(a, b);
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let area = area.intersection(&self.bounding_box());
        let Some(bottom_right) = area.bottom_right() else {
            return Ok(());
        };
        let raw = RawU16::from(color).into_inner();
        let w = self.width as usize;
        let x0 = area.top_left.x as usize;
        let x1 = bottom_right.x as usize + 1;
        for y in area.rows() {
            let row = y as usize * w;
            self.pixels[row + x0..row + x1].fill(raw);
        }
        self.mark_rows(area.top_left.y as u32, bottom_right.y as u32);
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.pixels.fill(RawU16::from(color).into_inner());
        self.mark_rows(0, self.height - 1);
        Ok(())
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        for buf in self.dma {
            unsafe { esp_idf_sys::heap_caps_free(buf.cast()) };
        }
    }
}

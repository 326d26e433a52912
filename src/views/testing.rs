//! Host-side stand-ins for the panel, used by unit and integration tests.

use embedded_graphics::{pixelcolor::Rgb565, prelude::*, Pixel};

use super::{Renderer, Tile, TileContent};

/// Plain in-memory Rgb565 target.
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<Rgb565>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgb565::BLACK; (width * height) as usize],
        }
    }

    pub fn pixel(&self, p: Point) -> Rgb565 {
        self.pixels[(p.y as u32 * self.width + p.x as u32) as usize]
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb565;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(p, color) in pixels {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < self.width && (p.y as u32) < self.height {
                let idx = (p.y as u32 * self.width + p.x as u32) as usize;
                self.pixels[idx] = color;
            }
        }
        Ok(())
    }
}

/// Records what the registry asked to draw, as `"slot:id"` / `"slot:+N"`.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub drawn_tiles: Vec<(usize, String)>,
    pub redraws: Vec<Vec<String>>,
}

fn label(tile: &Tile<'_>) -> String {
    match tile.content {
        TileContent::Channel { id, .. } => id.to_string(),
        TileContent::Overflow(n) => format!("+{}", n),
    }
}

impl Renderer for RecordingRenderer {
    fn redraw(&mut self, tiles: &[Tile<'_>]) {
        self.redraws
            .push(tiles.iter().map(|t| format!("{}:{}", t.slot, label(t))).collect());
    }

    fn draw_tile(&mut self, tile: &Tile<'_>) {
        self.drawn_tiles.push((tile.slot, label(tile)));
    }
}

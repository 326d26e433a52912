#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod ticker;

use embedded_graphics::{
    image::Image,
    mono_font::MonoTextStyle,
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use log::warn;
use profont::{PROFONT_12_POINT, PROFONT_18_POINT, PROFONT_24_POINT};
use tinybmp::Bmp;

use crate::layout::*;

/// One tile handed to the renderer: a display slot and what to put there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile<'a> {
    pub slot: usize,
    pub content: TileContent<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileContent<'a> {
    /// A live channel. `picture` is a BMP; undecodable pictures fall back to
    /// the unknown-channel tile.
    Channel { id: &'a str, picture: &'static [u8] },
    /// `+N` more live channels than there are visible slots.
    Overflow(usize),
}

/// Drawing seam between the registry and the display.
pub trait Renderer {
    /// Clear the tile area and draw `tiles` from scratch.
    fn redraw(&mut self, tiles: &[Tile<'_>]);
    /// Draw a single tile without touching the others.
    fn draw_tile(&mut self, tile: &Tile<'_>);
}

/// Renders tiles into any Rgb565 draw target and remembers whether the target
/// needs to be flushed to the panel.
pub struct Screen<D> {
    target: D,
    dirty: bool,
}

impl<D> Screen<D>
where
    D: DrawTarget<Color = Rgb565>,
{
    pub fn new(target: D) -> Self {
        Self { target, dirty: true }
    }

    pub fn target(&self) -> &D {
        &self.target
    }

    /// Mutable access for other widgets. Marks the screen dirty.
    pub fn target_mut(&mut self) -> &mut D {
        self.dirty = true;
        &mut self.target
    }

    /// Returns true once after every change.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Hand the target to `flush` if anything changed since the last call.
    pub fn present(&mut self, flush: impl FnOnce(&mut D)) -> bool {
        if !self.take_dirty() {
            return false;
        }
        flush(&mut self.target);
        true
    }

    /// Clear everything and draw `tiles` with an empty ticker band.
    pub fn reset(&mut self, tiles: &[Tile<'_>]) {
        self.target.clear(BG).ok();
        self.redraw(tiles);
    }

    /// Full-screen boot message.
    pub fn splash(&mut self, line: &str) {
        self.target.clear(BG).ok();
        let style = MonoTextStyle::new(&PROFONT_18_POINT, TWITCH_PURPLE);
        Text::with_text_style(
            "twitch display",
            Point::new(SCREEN_W as i32 / 2, SCREEN_H as i32 / 2 - 14),
            style,
            centered(),
        )
        .draw(&mut self.target)
        .ok();
        let style = MonoTextStyle::new(&PROFONT_12_POINT, TEXT_SECONDARY);
        Text::with_text_style(
            line,
            Point::new(SCREEN_W as i32 / 2, SCREEN_H as i32 / 2 + 14),
            style,
            centered(),
        )
        .draw(&mut self.target)
        .ok();
        self.dirty = true;
    }

    fn clear_tile_band(&mut self) {
        let band = Rectangle::new(
            Point::zero(),
            Size::new(SCREEN_W, (TILE_Y + TILE_SIZE as i32 + TILE_Y) as u32),
        );
        band.into_styled(PrimitiveStyle::with_fill(BG))
            .draw(&mut self.target)
            .ok();
        draw_hline(&mut self.target, TICKER_Y - 6, CARD_BORDER);
    }

    fn paint(&mut self, tile: &Tile<'_>) {
        let area = tile_rect(tile.slot);
        area.into_styled(PrimitiveStyle::with_fill(BG))
            .draw(&mut self.target)
            .ok();

        match tile.content {
            TileContent::Channel { id, picture } => match Bmp::<Rgb565>::from_slice(picture) {
                Ok(bmp) => {
                    Image::new(&bmp, area.top_left).draw(&mut self.target).ok();
                }
                Err(e) => {
                    warn!("views: picture for {} unreadable: {:?}", id, e);
                    self.paint_unknown(area, id);
                }
            },
            TileContent::Overflow(n) => {
                draw_card(&mut self.target, area, 8, CARD_FILL, TWITCH_PURPLE);
                let style = MonoTextStyle::new(&PROFONT_24_POINT, TEXT_PRIMARY);
                let label = format!("+{}", n);
                Text::with_text_style(&label, area.center(), style, centered())
                    .draw(&mut self.target)
                    .ok();
            }
        }
        self.dirty = true;
    }

    fn paint_unknown(&mut self, area: Rectangle, id: &str) {
        draw_card(&mut self.target, area, 8, CARD_FILL, CARD_BORDER);
        let style = MonoTextStyle::new(&PROFONT_12_POINT, TEXT_UNKNOWN);
        Text::with_text_style("?????", area.center() - Point::new(0, 8), style, centered())
            .draw(&mut self.target)
            .ok();
        let style = MonoTextStyle::new(&PROFONT_12_POINT, TEXT_SECONDARY);
        let short: String = id.chars().take(8).collect();
        Text::with_text_style(&short, area.center() + Point::new(0, 10), style, centered())
            .draw(&mut self.target)
            .ok();
    }
}

impl<D> Renderer for Screen<D>
where
    D: DrawTarget<Color = Rgb565>,
{
    fn redraw(&mut self, tiles: &[Tile<'_>]) {
        self.clear_tile_band();
        for tile in tiles {
            self.paint(tile);
        }
        self.dirty = true;
    }

    fn draw_tile(&mut self, tile: &Tile<'_>) {
        self.paint(tile);
    }
}

fn centered() -> embedded_graphics::text::TextStyle {
    TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Middle)
        .build()
}

#[cfg(test)]
mod tests {
    use super::testing::Canvas;
    use super::*;

    const PICTURE: &[u8] = include_bytes!("../pics/bonjwa.bmp");

    fn tile_pixels(canvas: &Canvas, slot: usize) -> Vec<Rgb565> {
        let area = tile_rect(slot);
        area.points().map(|p| canvas.pixel(p)).collect()
    }

    #[test]
    fn picture_tile_is_drawn_at_its_slot() {
        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        screen.take_dirty();
        screen.draw_tile(&Tile {
            slot: 1,
            content: TileContent::Channel { id: "73437396", picture: PICTURE },
        });
        assert!(screen.take_dirty());
        assert!(tile_pixels(screen.target(), 1).iter().any(|&c| c != BG));
        assert!(tile_pixels(screen.target(), 0).iter().all(|&c| c == BG));
    }

    #[test]
    fn bad_picture_falls_back_to_unknown_tile() {
        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        screen.draw_tile(&Tile {
            slot: 0,
            content: TileContent::Channel { id: "1", picture: b"not a bmp" },
        });
        assert!(tile_pixels(screen.target(), 0).contains(&TEXT_UNKNOWN));
    }

    #[test]
    fn redraw_clears_stale_tiles() {
        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        let a = Tile { slot: 0, content: TileContent::Channel { id: "a", picture: PICTURE } };
        let b = Tile { slot: 1, content: TileContent::Channel { id: "b", picture: PICTURE } };
        screen.redraw(&[a, b]);
        screen.redraw(&[a]);
        assert!(tile_pixels(screen.target(), 1).iter().all(|&c| c == BG));
        assert!(tile_pixels(screen.target(), 0).iter().any(|&c| c != BG));
    }

    #[test]
    fn overflow_tile_uses_accent_border() {
        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        screen.draw_tile(&Tile { slot: 3, content: TileContent::Overflow(2) });
        assert!(tile_pixels(screen.target(), 3).contains(&TWITCH_PURPLE));
    }
}

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyleBuilder, Rectangle, RoundedRectangle};

/// Convert 8-bit RGB to Rgb565.
pub const fn rgb(r: u8, g: u8, b: u8) -> Rgb565 {
    Rgb565::new(r >> 3, g >> 2, b >> 3)
}

// ── Colors ──────────────────────────────────────────────────────────

pub const BG: Rgb565 = Rgb565::BLACK;
pub const TWITCH_PURPLE: Rgb565 = rgb(145, 70, 255);
pub const CARD_FILL: Rgb565 = rgb(24, 24, 27);
pub const CARD_BORDER: Rgb565 = rgb(83, 83, 95);

pub const TEXT_PRIMARY: Rgb565 = rgb(239, 239, 241);
pub const TEXT_SECONDARY: Rgb565 = rgb(173, 173, 184);
pub const TEXT_UNKNOWN: Rgb565 = rgb(255, 120, 120);

// ── Panel ───────────────────────────────────────────────────────────

/// ST7789 170x320 used in landscape.
pub const SCREEN_W: u32 = 320;
pub const SCREEN_H: u32 = 170;

// ── Tiles ───────────────────────────────────────────────────────────

pub const TILE_SIZE: u32 = 64;
pub const TILE_X0: i32 = 11;
pub const TILE_PITCH: i32 = 78;
pub const TILE_Y: i32 = 14;

/// Tiles that fit side by side; with more live channels the last one
/// becomes a `+N` tile.
pub const VISIBLE_SLOTS: usize =
    ((SCREEN_W as i32 - TILE_X0 - TILE_SIZE as i32) / TILE_PITCH) as usize + 1;

/// Top-left corner of the tile in `slot`.
pub fn tile_origin(slot: usize) -> Point {
    Point::new(TILE_X0 + TILE_PITCH * slot as i32, TILE_Y)
}

pub fn tile_rect(slot: usize) -> Rectangle {
    Rectangle::new(tile_origin(slot), Size::new(TILE_SIZE, TILE_SIZE))
}

// ── Title ticker band ───────────────────────────────────────────────

pub const TICKER_Y: i32 = 100;
pub const TICKER_H: u32 = 56;

pub fn ticker_rect() -> Rectangle {
    Rectangle::new(Point::new(0, TICKER_Y), Size::new(SCREEN_W, TICKER_H))
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Fill a horizontal line across the full target width.
pub fn draw_hline<D>(target: &mut D, y: i32, color: Rgb565)
where
    D: DrawTarget<Color = Rgb565>,
{
    let style = PrimitiveStyleBuilder::new().fill_color(color).build();
    Rectangle::new(Point::new(0, y), Size::new(target.bounding_box().size.width, 1))
        .into_styled(style)
        .draw(target)
        .ok();
}

/// Filled rounded rectangle with a border.
pub fn draw_card<D>(target: &mut D, area: Rectangle, radius: u32, fill: Rgb565, border: Rgb565)
where
    D: DrawTarget<Color = Rgb565>,
{
    let outer = PrimitiveStyleBuilder::new().fill_color(border).build();
    RoundedRectangle::with_equal_corners(area, Size::new(radius, radius))
        .into_styled(outer)
        .draw(target)
        .ok();

    let inner = PrimitiveStyleBuilder::new().fill_color(fill).build();
    RoundedRectangle::with_equal_corners(
        area.offset(-2),
        Size::new(radius.saturating_sub(2), radius.saturating_sub(2)),
    )
    .into_styled(inner)
    .draw(target)
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_tiles_fit_the_panel() {
        assert_eq!(VISIBLE_SLOTS, 4);
        let last = tile_rect(VISIBLE_SLOTS - 1);
        assert!(last.top_left.x + TILE_SIZE as i32 <= SCREEN_W as i32);
    }

    #[test]
    fn first_tile_matches_panel_margins() {
        assert_eq!(tile_origin(0), Point::new(11, 14));
        assert_eq!(tile_origin(2), Point::new(167, 14));
    }

    #[test]
    fn ticker_band_is_below_tiles_and_on_screen() {
        assert!(TICKER_Y > TILE_Y + TILE_SIZE as i32);
        assert!(TICKER_Y + TICKER_H as i32 <= SCREEN_H as i32);
    }
}

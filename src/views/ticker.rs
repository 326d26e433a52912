//! Scrolls queued title changes across the band below the tiles.

use embedded_graphics::{
    mono_font::MonoTextStyle,
    pixelcolor::Rgb565,
    prelude::*,
    primitives::PrimitiveStyle,
    text::{Baseline, Text},
};
use log::info;
use profont::PROFONT_18_POINT;

use crate::channels::ChannelRegistry;
use crate::layout::*;
use crate::views::Screen;

/// Pixels moved per step.
pub const STEP_PX: i32 = 3;
/// Minimum time between steps.
pub const STEP_MS: u32 = 30;

struct Scroll {
    text: String,
    x: i32,
    width: i32,
}

#[derive(Default)]
pub struct TitleTicker {
    current: Option<Scroll>,
    last_step: u32,
}

impl TitleTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Advance the scroll by one step if due. Picks up the next queued title
    /// when idle and pops it from the queue once it has left the band.
    /// Titles of channels that went offline while queued are dropped unseen.
    pub fn tick<D>(&mut self, now: u32, registry: &mut ChannelRegistry, screen: &mut Screen<D>)
    where
        D: DrawTarget<Color = Rgb565>,
    {
        if self.current.is_none() {
            while let Some(channel) = registry.pending_title().filter(|c| !c.is_live()) {
                info!("ticker: skipping title of {}, no longer live", channel.name());
                registry.finish_title();
            }
            let Some(channel) = registry.pending_title() else {
                return;
            };
            let text = format!("{}: {} | {}", channel.name(), channel.title(), channel.category());
            info!("ticker: {}", text);
            let glyph = PROFONT_18_POINT.character_size.width + PROFONT_18_POINT.character_spacing;
            self.current = Some(Scroll {
                width: (text.chars().count() as u32 * glyph) as i32,
                text,
                x: SCREEN_W as i32,
            });
            self.last_step = now.wrapping_sub(STEP_MS);
        }

        if now.wrapping_sub(self.last_step) < STEP_MS {
            return;
        }
        self.last_step = now;

        let Some(scroll) = self.current.as_mut() else {
            return;
        };
        let target = screen.target_mut();
        ticker_rect()
            .into_styled(PrimitiveStyle::with_fill(BG))
            .draw(target)
            .ok();

        if scroll.x + scroll.width <= 0 {
            self.current = None;
            registry.finish_title();
            return;
        }

        let style = MonoTextStyle::new(&PROFONT_18_POINT, TEXT_PRIMARY);
        let y = TICKER_Y + TICKER_H as i32 / 2;
        Text::with_baseline(&scroll.text, Point::new(scroll.x, y), style, Baseline::Middle)
            .draw(target)
            .ok();
        scroll.x -= STEP_PX;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::helix::StreamRecord;
    use crate::views::testing::{Canvas, RecordingRenderer};

    fn registry_with_title() -> ChannelRegistry {
        let cfg = [ChannelConfig { id: "7", name: "seven", picture: &[] }];
        let mut reg = ChannelRegistry::new(&cfg, 4);
        let record = StreamRecord {
            user_id: "7".into(),
            user_name: "seven".into(),
            title: "hi".into(),
            game_name: "chess".into(),
        };
        reg.reconcile(&[record], &mut RecordingRenderer::default());
        reg
    }

    #[test]
    fn idle_without_pending_titles() {
        let cfg = [ChannelConfig { id: "7", name: "seven", picture: &[] }];
        let mut reg = ChannelRegistry::new(&cfg, 4);
        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        screen.take_dirty();
        let mut ticker = TitleTicker::new();
        ticker.tick(0, &mut reg, &mut screen);
        assert!(ticker.is_idle());
        assert!(!screen.take_dirty());
    }

    #[test]
    fn title_scrolls_out_then_leaves_queue() {
        let mut reg = registry_with_title();
        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        let mut ticker = TitleTicker::new();

        ticker.tick(1000, &mut reg, &mut screen);
        assert!(!ticker.is_idle());
        assert_eq!(reg.pending_title_count(), 1);

        let mut now = 1000;
        for _ in 0..1000 {
            now += STEP_MS;
            ticker.tick(now, &mut reg, &mut screen);
            if ticker.is_idle() {
                break;
            }
        }
        assert!(ticker.is_idle());
        assert_eq!(reg.pending_title_count(), 0);
    }

    #[test]
    fn titles_of_offline_channels_are_skipped() {
        let mut reg = registry_with_title();
        reg.set_live_status("7", false, &mut RecordingRenderer::default());
        assert_eq!(reg.pending_title_count(), 1);

        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        screen.take_dirty();
        let mut ticker = TitleTicker::new();
        ticker.tick(0, &mut reg, &mut screen);
        assert!(ticker.is_idle());
        assert_eq!(reg.pending_title_count(), 0);
        assert!(!screen.take_dirty());
    }

    #[test]
    fn steps_are_rate_limited() {
        let mut reg = registry_with_title();
        let mut screen = Screen::new(Canvas::new(SCREEN_W, SCREEN_H));
        let mut ticker = TitleTicker::new();
        ticker.tick(500, &mut reg, &mut screen);
        screen.take_dirty();
        ticker.tick(500 + STEP_MS - 1, &mut reg, &mut screen);
        assert!(!screen.take_dirty());
        ticker.tick(500 + STEP_MS, &mut reg, &mut screen);
        assert!(screen.take_dirty());
    }
}

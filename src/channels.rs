//! Channel registry: which monitored channels are live, which display slot
//! each one occupies, and which title changes still wait to be shown.

use std::collections::{HashMap, VecDeque};

use log::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::debug_flags;
use crate::helix::StreamRecord;
use crate::views::{Renderer, Tile, TileContent};

/// A monitored channel. Created once at start-up, never removed.
#[derive(Debug, Clone)]
pub struct Channel {
    id: String,
    name: &'static str,
    picture: &'static [u8],
    live: bool,
    title: String,
    category: String,
    slot: Option<usize>,
}

impl Channel {
    fn new(cfg: &ChannelConfig) -> Self {
        Self {
            id: cfg.id.to_string(),
            name: cfg.name,
            picture: cfg.picture,
            live: false,
            title: String::new(),
            category: String::new(),
            slot: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn picture(&self) -> &'static [u8] {
        self.picture
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Display slot, `None` while the channel is offline.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Store new metadata, returning true when anything changed.
    fn set_metadata(&mut self, title: &str, category: &str) -> bool {
        if self.title == title && self.category == category {
            return false;
        }
        self.title = title.to_string();
        self.category = category.to_string();
        true
    }

    fn tile(&self, slot: usize) -> Tile<'_> {
        Tile {
            slot,
            content: TileContent::Channel {
                id: &self.id,
                picture: self.picture,
            },
        }
    }
}

pub struct ChannelRegistry {
    channels: Vec<Channel>,
    by_id: HashMap<String, usize>,
    live_count: usize,
    visible_slots: usize,
    // Indices into `channels`; channels are never removed.
    pending_titles: VecDeque<usize>,
}

impl ChannelRegistry {
    /// Build the registry from the compiled-in list. `visible_slots` is how
    /// many tiles the renderer can show; it is clamped to at least one.
    pub fn new(configs: &[ChannelConfig], visible_slots: usize) -> Self {
        let channels: Vec<Channel> = configs.iter().map(Channel::new).collect();
        let by_id = channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Self {
            channels,
            by_id,
            live_count: 0,
            visible_slots: visible_slots.max(1),
            pending_titles: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.by_id.get(id).map(|&i| &self.channels[i])
    }

    /// Mark one channel live or offline.
    ///
    /// Going live takes the next free slot and draws only that tile (unless
    /// the overflow tile has to change). Going offline compacts the remaining
    /// slots and redraws everything, so tiles may move.
    pub fn set_live_status(&mut self, id: &str, live: bool, renderer: &mut dyn Renderer) {
        let Some(&idx) = self.by_id.get(id) else {
            warn!("registry: unknown channel id {}", id);
            return;
        };

        if live {
            if self.channels[idx].live {
                info!("registry: {} already live", self.channels[idx].name);
                return;
            }
            let slot = self.live_count;
            let channel = &mut self.channels[idx];
            channel.live = true;
            channel.slot = Some(slot);
            self.live_count += 1;
            info!(
                "registry: {} live in slot {} ({} live)",
                channel.name, slot, self.live_count
            );
            if self.live_count <= self.visible_slots {
                renderer.draw_tile(&self.channels[idx].tile(slot));
            } else {
                renderer.redraw(&self.tiles());
            }
        } else {
            let channel = &mut self.channels[idx];
            if channel.live {
                channel.live = false;
                channel.slot = None;
                self.live_count -= 1;
            }
            info!(
                "registry: {} offline ({} live)",
                self.channels[idx].name, self.live_count
            );
            self.compact_slots();
            renderer.redraw(&self.tiles());
        }
    }

    /// Replace liveness and metadata with an authoritative snapshot.
    ///
    /// Slots are handed out in snapshot order. Live channels whose title or
    /// category changed are queued for the ticker.
    pub fn reconcile(&mut self, snapshot: &[StreamRecord], renderer: &mut dyn Renderer) {
        for channel in &mut self.channels {
            channel.live = false;
            channel.slot = None;
        }
        self.live_count = 0;

        for record in snapshot {
            let Some(&idx) = self.by_id.get(record.user_id.as_str()) else {
                warn!("registry: snapshot lists unknown id {} ({})", record.user_id, record.user_name);
                continue;
            };
            if self.channels[idx].live {
                debug!("registry: duplicate snapshot entry for {}", record.user_id);
                continue;
            }
            let slot = self.live_count;
            let channel = &mut self.channels[idx];
            channel.live = true;
            channel.slot = Some(slot);
            self.live_count += 1;
            if debug_flags::is_on(&debug_flags::DEBUG_HELIX) {
                info!("registry: live {} in slot {}", channel.name, slot);
            }
            if channel.set_metadata(&record.title, &record.game_name) {
                self.enqueue_title(idx);
            }
        }

        info!("registry: reconciled, {} live", self.live_count);
        renderer.redraw(&self.tiles());
    }

    /// Apply a title/category change reported by a `channel.update` event.
    /// Only live channels are queued; offline ones are ignored.
    pub fn update_metadata(&mut self, id: &str, title: &str, category: &str) {
        let Some(&idx) = self.by_id.get(id) else {
            warn!("registry: update for unknown channel id {}", id);
            return;
        };
        if !self.channels[idx].live {
            info!("registry: ignoring update for offline {}", self.channels[idx].name);
            return;
        }
        if self.channels[idx].set_metadata(title, category) {
            self.enqueue_title(idx);
        }
    }

    /// Channel whose title should be shown next, if any.
    pub fn pending_title(&self) -> Option<&Channel> {
        self.pending_titles.front().map(|&i| &self.channels[i])
    }

    /// Drop the front of the title queue once the ticker is done with it.
    pub fn finish_title(&mut self) {
        self.pending_titles.pop_front();
    }

    pub fn pending_title_count(&self) -> usize {
        self.pending_titles.len()
    }

    /// Tiles for every live channel in slot order. When more channels are live
    /// than there are visible slots, the last visible slot becomes `+N`.
    pub fn tiles(&self) -> Vec<Tile<'_>> {
        let mut live: Vec<&Channel> = self.channels.iter().filter(|c| c.live).collect();
        live.sort_by_key(|c| c.slot);

        if live.len() <= self.visible_slots {
            return live.iter().enumerate().map(|(slot, c)| c.tile(slot)).collect();
        }

        let shown = self.visible_slots - 1;
        let mut tiles: Vec<Tile<'_>> = live[..shown]
            .iter()
            .enumerate()
            .map(|(slot, c)| c.tile(slot))
            .collect();
        tiles.push(Tile {
            slot: shown,
            content: TileContent::Overflow(live.len() - shown),
        });
        tiles
    }

    fn enqueue_title(&mut self, idx: usize) {
        if self.pending_titles.contains(&idx) {
            return;
        }
        info!(
            "registry: queued title for {}: {} | {}",
            self.channels[idx].name, self.channels[idx].title, self.channels[idx].category
        );
        self.pending_titles.push_back(idx);
    }

    /// Renumber live channels 0..live_count, keeping their relative order.
    fn compact_slots(&mut self) {
        let mut live: Vec<usize> = (0..self.channels.len())
            .filter(|&i| self.channels[i].live)
            .collect();
        live.sort_by_key(|&i| self.channels[i].slot);
        for (slot, idx) in live.into_iter().enumerate() {
            self.channels[idx].slot = Some(slot);
        }
    }
}

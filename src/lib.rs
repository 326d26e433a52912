//! Live-channel display for Twitch: tracks which of a fixed set of channels
//! are live through EventSub and Helix, and shows them as tiles.

pub mod app;
pub mod backlight;
pub mod channels;
pub mod config;
pub mod debug_flags;
pub mod eventsub;
pub mod helix;
pub mod layout;
pub mod refresher;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod views;

#[cfg(target_os = "espidf")]
pub mod console;
#[cfg(target_os = "espidf")]
pub mod framebuffer;
#[cfg(target_os = "espidf")]
pub mod http_client;
#[cfg(target_os = "espidf")]
pub mod wifi;
#[cfg(target_os = "espidf")]
pub mod ws_transport;

/// Milliseconds since boot, wrapping.
#[cfg(target_os = "espidf")]
pub fn now_ms() -> u32 {
    (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000) as u32
}

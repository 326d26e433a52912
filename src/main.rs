#[cfg(target_os = "espidf")]
mod firmware {
    use anyhow::Result;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
    use log::{error, info, warn};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use twitch_display::app::App;
    use twitch_display::backlight::AmbientBacklight;
    use twitch_display::config::{self, Config, CHANNELS};
    use twitch_display::framebuffer::{Framebuffer, CHUNK_LINES};
    use twitch_display::helix::Helix;
    use twitch_display::http_client::EspHttp;
    use twitch_display::layout::{SCREEN_W, VISIBLE_SLOTS};
    use twitch_display::session::{ConnectionState, Timing};
    use twitch_display::views::ticker::TitleTicker;
    use twitch_display::views::Screen;
    use twitch_display::ws_transport::WsTransport;
    use twitch_display::{console, debug_flags, now_ms, wifi};

    // ── SPI ─────────────────────────────────────────────────────────────
    const PCLK_HZ: u32 = 40_000_000;

    // ── Pins (ESP32-C3 + ST7789 1.9" 170x320) ──────────────────────────
    const PIN_LCD_SCLK: i32 = 4;
    const PIN_LCD_MOSI: i32 = 6;
    const PIN_LCD_CS: i32 = 7;
    const PIN_LCD_DC: i32 = 1;
    const PIN_LCD_RST: i32 = 10;

    /// The 170-row panel sits in the middle of the controller's 240 rows.
    const PANEL_Y_GAP: i32 = 35;

    // ── Timing ──────────────────────────────────────────────────────────
    const TICK_MS: u64 = 20;
    const WIFI_RETRY_INTERVAL_MS: u32 = 300_000;
    const WIFI_DEBUG_INTERVAL_MS: u32 = 10_000;

    // ── Helpers ─────────────────────────────────────────────────────────

    fn esp_check(res: esp_idf_sys::esp_err_t, msg: &str) -> Result<()> {
        if res != esp_idf_sys::ESP_OK {
            Err(anyhow::anyhow!("{} (err {})", msg, res))
        } else {
            Ok(())
        }
    }

    // ── Display init ────────────────────────────────────────────────────

    fn init_display() -> Result<esp_idf_sys::esp_lcd_panel_handle_t> {
        let mut bus_cfg = esp_idf_sys::spi_bus_config_t::default();
        bus_cfg.sclk_io_num = PIN_LCD_SCLK;
        bus_cfg.__bindgen_anon_1.mosi_io_num = PIN_LCD_MOSI;
        bus_cfg.__bindgen_anon_2.miso_io_num = -1;
        bus_cfg.__bindgen_anon_3.quadwp_io_num = -1;
        bus_cfg.__bindgen_anon_4.quadhd_io_num = -1;
        bus_cfg.max_transfer_sz = (SCREEN_W * CHUNK_LINES * 2) as i32;

        let host = esp_idf_sys::spi_host_device_t_SPI2_HOST;
        esp_check(
            unsafe { esp_idf_sys::spi_bus_initialize(host, &bus_cfg, esp_idf_sys::spi_common_dma_t_SPI_DMA_CH_AUTO) },
            "spi_bus_initialize",
        )?;

        let mut io: esp_idf_sys::esp_lcd_panel_io_handle_t = std::ptr::null_mut();
        let io_cfg = esp_idf_sys::esp_lcd_panel_io_spi_config_t {
            cs_gpio_num: PIN_LCD_CS,
            dc_gpio_num: PIN_LCD_DC,
            spi_mode: 0,
            pclk_hz: PCLK_HZ,
            trans_queue_depth: 10,
            lcd_cmd_bits: 8,
            lcd_param_bits: 8,
            ..Default::default()
        };
        esp_check(
            unsafe { esp_idf_sys::esp_lcd_new_panel_io_spi(host as esp_idf_sys::esp_lcd_spi_bus_handle_t, &io_cfg, &mut io) },
            "esp_lcd_new_panel_io_spi",
        )?;

        let mut panel: esp_idf_sys::esp_lcd_panel_handle_t = std::ptr::null_mut();
        let mut panel_cfg = esp_idf_sys::esp_lcd_panel_dev_config_t {
            reset_gpio_num: PIN_LCD_RST,
            bits_per_pixel: 16,
            ..Default::default()
        };
        panel_cfg.__bindgen_anon_1.rgb_ele_order = esp_idf_sys::lcd_rgb_element_order_t_LCD_RGB_ELEMENT_ORDER_RGB;
        esp_check(
            unsafe { esp_idf_sys::esp_lcd_new_panel_st7789(io, &panel_cfg, &mut panel) },
            "esp_lcd_new_panel_st7789",
        )?;

        unsafe {
            esp_check(esp_idf_sys::esp_lcd_panel_reset(panel), "panel_reset")?;
            esp_check(esp_idf_sys::esp_lcd_panel_init(panel), "panel_init")?;
            esp_check(esp_idf_sys::esp_lcd_panel_invert_color(panel, true), "invert_color")?;
            // Landscape: rows of the framebuffer run along the long edge.
            esp_check(esp_idf_sys::esp_lcd_panel_swap_xy(panel, true), "swap_xy")?;
            esp_check(esp_idf_sys::esp_lcd_panel_mirror(panel, true, false), "mirror")?;
            esp_check(esp_idf_sys::esp_lcd_panel_set_gap(panel, 0, PANEL_Y_GAP), "set_gap")?;
            esp_check(esp_idf_sys::esp_lcd_panel_disp_on_off(panel, true), "disp_on")?;
        }

        info!("Display initialized OK");
        Ok(panel)
    }

    // ── Entry point ─────────────────────────────────────────────────────

    pub fn run() -> Result<()> {
        esp_idf_sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();

        info!("BOOT twitch_display v{}", env!("CARGO_PKG_VERSION"));

        // ── 1. Display + splash ──
        let panel = init_display()?;
        let mut screen = Screen::new(Framebuffer::new()?);
        screen.splash("starting...");
        screen.present(|fb| fb.flush_to_panel(panel));

        // ── 2. Peripherals ──
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs_partition = EspDefaultNvsPartition::take()?;

        // ── 3. NVS config ──
        let nvs = EspNvs::new(nvs_partition, config::NS, true)?;
        let cfg = Config::load(&nvs);
        let wifi_ssid = cfg.wifi_ssid.clone();
        let wifi_pass = cfg.wifi_pass.clone();
        let credentials = cfg.credentials.clone();
        if !credentials.is_complete() {
            warn!("Twitch credentials incomplete (use console: twitch set-token / set-client)");
        }

        let nvs = Arc::new(Mutex::new(nvs));
        let cfg = Arc::new(Mutex::new(cfg));

        // ── 4. Console ──
        console::spawn_console(nvs, cfg)?;

        // ── 5. Backlight ──
        let mut backlight = match AmbientBacklight::new(
            peripherals.adc1,
            peripherals.pins.gpio3,
            peripherals.ledc.timer0,
            peripherals.ledc.channel0,
            peripherals.pins.gpio0,
        ) {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("Backlight control unavailable: {}", e);
                None
            }
        };

        // ── 6. WiFi ──
        let mut link = if !wifi_ssid.is_empty() {
            screen.splash(&format!("connecting to '{}'...", wifi_ssid));
            screen.present(|fb| fb.flush_to_panel(panel));
            match wifi::connect_wifi(peripherals.modem, sysloop.clone(), &wifi_ssid, &wifi_pass) {
                Ok(link) => Some(link),
                Err(e) => {
                    warn!("WiFi failed: {}", e);
                    None
                }
            }
        } else {
            warn!("No WiFi SSID configured (use console: wifi set <ssid> <pass>)");
            None
        };

        // ── 7. App ──
        let timing = Timing::default();
        let mut transport = WsTransport::new(timing.reconnect_grace_ms);
        let mut helix = Helix::new(EspHttp, credentials);
        let mut app = App::new(&CHANNELS, VISIBLE_SLOTS, timing);
        let mut ticker = TitleTicker::new();

        screen.reset(&app.registry().tiles());

        // ── 8. Main loop ──
        info!("Entering main loop");
        let mut last_wifi_retry_ms = now_ms();
        let mut last_wifi_debug_ms = now_ms();

        loop {
            let t = now_ms();

            if debug_flags::take(&debug_flags::REQUEST_REFRESH) {
                app.request_refresh();
            }
            if debug_flags::take(&debug_flags::REQUEST_STATUS) {
                info!("app: {}", app.status_line());
            }

            if app.tick(t, &mut transport, &mut helix, &mut screen) == ConnectionState::Fault {
                error!("connection failed permanently; restarting");
                std::thread::sleep(Duration::from_secs(1));
                unsafe { esp_idf_sys::esp_restart() };
            }

            ticker.tick(t, app.registry_mut(), &mut screen);

            if let Some(b) = backlight.as_mut() {
                b.update(t);
            }

            // Retry WiFi association every 5 minutes while disconnected.
            if let Some(l) = link.as_mut() {
                if !l.is_up() && t.wrapping_sub(last_wifi_retry_ms) >= WIFI_RETRY_INTERVAL_MS {
                    last_wifi_retry_ms = t;
                    info!("WiFi retry window reached; attempting reconnect...");
                    match wifi::reconnect(l, sysloop.clone()) {
                        Ok(Some(ip)) => info!("WiFi back, IP {}", ip),
                        Ok(None) => info!("WiFi reconnect did not succeed; retrying in 5 minutes"),
                        Err(e) => warn!("WiFi reconnect error: {}", e),
                    }
                }
            }

            if debug_flags::is_on(&debug_flags::DEBUG_WIFI)
                && t.wrapping_sub(last_wifi_debug_ms) >= WIFI_DEBUG_INTERVAL_MS
            {
                last_wifi_debug_ms = t;
                info!("WiFi: {}", wifi::ap_summary().unwrap_or_else(|| "not connected".into()));
            }

            screen.present(|fb| fb.flush_to_panel(panel));

            std::thread::sleep(Duration::from_millis(TICK_MS));
        }
    }
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("twitch_display runs on ESP-IDF targets only; use `cargo test` on the host");
}

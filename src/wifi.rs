use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{info, warn};

use crate::debug_flags;

const CONNECT_ATTEMPTS: u32 = 5;

pub struct WifiLink {
    pub wifi: Box<EspWifi<'static>>,
    pub ip_address: Option<String>,
}

impl WifiLink {
    pub fn is_up(&self) -> bool {
        self.ip_address.is_some() && self.wifi.is_connected().unwrap_or(false)
    }
}

/// Current association as "rssi/channel/ssid", or None when not associated.
pub fn ap_summary() -> Option<String> {
    unsafe {
        let mut ap_info: esp_idf_sys::wifi_ap_record_t = core::mem::zeroed();
        if esp_idf_sys::esp_wifi_sta_get_ap_info(&mut ap_info) != esp_idf_sys::ESP_OK {
            return None;
        }
        let ssid = core::str::from_utf8(&ap_info.ssid)
            .unwrap_or("?")
            .trim_end_matches('\0');
        Some(format!("rssi={} ch={} ssid={}", ap_info.rssi, ap_info.primary, ssid))
    }
}

fn elapsed_ms(t0: i64) -> i64 {
    (unsafe { esp_idf_sys::esp_timer_get_time() } - t0) / 1000
}

/// Try to associate a few times, cycling the radio between attempts.
fn associate(wifi: &mut BlockingWifi<&mut EspWifi<'static>>, label: &str) -> bool {
    for attempt in 1..=CONNECT_ATTEMPTS {
        let t0 = unsafe { esp_idf_sys::esp_timer_get_time() };
        match wifi.connect() {
            Ok(()) => {
                info!("WiFi {} OK on attempt {} ({}ms)", label, attempt, elapsed_ms(t0));
                if debug_flags::is_on(&debug_flags::DEBUG_WIFI) {
                    info!("WiFi: {}", ap_summary().unwrap_or_else(|| "no ap info".into()));
                }
                return true;
            }
            Err(e) => {
                warn!(
                    "WiFi {} attempt {}/{} failed after {}ms: {}",
                    label, attempt, CONNECT_ATTEMPTS, elapsed_ms(t0), e
                );
                if attempt < CONNECT_ATTEMPTS {
                    let _ = wifi.disconnect();
                    wifi.stop().ok();
                    std::thread::sleep(std::time::Duration::from_millis(500));
                    wifi.start().ok();
                    std::thread::sleep(std::time::Duration::from_millis(300));
                }
            }
        }
    }
    false
}

fn wait_for_ip(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> Result<String> {
    wifi.wait_netif_up()?;
    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("WiFi up, IP {}", ip_info.ip);
    Ok(ip_info.ip.to_string())
}

pub fn connect_wifi(modem: Modem, sysloop: EspSystemEventLoop, ssid: &str, password: &str) -> Result<WifiLink> {
    let mut esp_wifi = Box::new(EspWifi::new(modem, sysloop.clone(), None)?);

    let auth = if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let mut wifi_ssid = heapless::String::<32>::new();
    let mut wifi_pass = heapless::String::<64>::new();
    if wifi_ssid.push_str(ssid).is_err() {
        warn!("WiFi ssid longer than 32 bytes, truncated");
    }
    if wifi_pass.push_str(password).is_err() {
        warn!("WiFi password longer than 64 bytes, truncated");
    }

    esp_wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: wifi_ssid,
        password: wifi_pass,
        auth_method: auth,
        ..Default::default()
    }))?;

    let mut blocking = BlockingWifi::wrap(esp_wifi.as_mut(), sysloop)?;
    blocking.start()?;
    info!("WiFi connecting to '{}'...", ssid);

    let ip_address = if associate(&mut blocking, "connect") {
        Some(wait_for_ip(&mut blocking)?)
    } else {
        warn!("WiFi failed after {} attempts; will retry later", CONNECT_ATTEMPTS);
        None
    };
    drop(blocking);

    Ok(WifiLink {
        wifi: esp_wifi,
        ip_address,
    })
}

/// Re-run association on an existing driver. Returns the new IP on success.
pub fn reconnect(link: &mut WifiLink, sysloop: EspSystemEventLoop) -> Result<Option<String>> {
    let mut blocking = BlockingWifi::wrap(link.wifi.as_mut(), sysloop)?;
    let _ = blocking.start();
    if !associate(&mut blocking, "reconnect") {
        return Ok(None);
    }
    let ip = wait_for_ip(&mut blocking)?;
    drop(blocking);
    link.ip_address = Some(ip.clone());
    Ok(Some(ip))
}

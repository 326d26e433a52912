use log::info;

// ── Endpoints ───────────────────────────────────────────────────────

/// Keepalive interval requested from EventSub, in seconds.
pub const KEEPALIVE_SECS: u32 = 30;

pub const EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws?keepalive_timeout_seconds=30";
pub const HELIX_STREAMS_URL: &str = "https://api.twitch.tv/helix/streams";
pub const HELIX_SUBSCRIPTIONS_URL: &str = "https://api.twitch.tv/helix/eventsub/subscriptions";

// ── Monitored channels ──────────────────────────────────────────────

/// A compiled-in channel: Twitch broadcaster id, display name and a 64x64 BMP.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub picture: &'static [u8],
}

pub const CHANNELS: [ChannelConfig; 3] = [
    ChannelConfig {
        id: "21991090",
        name: "PietSmiet",
        picture: include_bytes!("pics/pietsmiet.bmp"),
    },
    ChannelConfig {
        id: "73437396",
        name: "Bonjwa",
        picture: include_bytes!("pics/bonjwa.bmp"),
    },
    ChannelConfig {
        id: "106159308",
        name: "GronkhTV",
        picture: include_bytes!("pics/gronkh.bmp"),
    },
];

// ── Runtime configuration ───────────────────────────────────────────

pub const NS: &str = "twitch_cfg";

const DEFAULT_WIFI_SSID: &str = match option_env!("LOCAL_WIFI_SSID") {
    Some(v) => v,
    None => "",
};
const DEFAULT_WIFI_PASS: &str = match option_env!("LOCAL_WIFI_PASS") {
    Some(v) => v,
    None => "",
};
const DEFAULT_TWITCH_TOKEN: &str = match option_env!("LOCAL_TWITCH_TOKEN") {
    Some(v) => v,
    None => "",
};
const DEFAULT_TWITCH_CLIENT_ID: &str = match option_env!("LOCAL_TWITCH_CLIENT_ID") {
    Some(v) => v,
    None => "",
};

/// Bearer token and client id sent with every Helix request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub client_id: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.client_id.is_empty()
    }
}

pub struct Config {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub credentials: Credentials,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wifi_ssid: DEFAULT_WIFI_SSID.to_string(),
            wifi_pass: DEFAULT_WIFI_PASS.to_string(),
            credentials: Credentials {
                token: DEFAULT_TWITCH_TOKEN.to_string(),
                client_id: DEFAULT_TWITCH_CLIENT_ID.to_string(),
            },
        }
    }
}

impl Config {
    /// Fill empty fields from the compile-time defaults.
    pub fn with_defaults(mut self) -> Self {
        let defaults = Config::default();
        if self.wifi_ssid.is_empty() {
            self.wifi_ssid = defaults.wifi_ssid;
            self.wifi_pass = defaults.wifi_pass;
        }
        if self.credentials.token.is_empty() {
            self.credentials.token = defaults.credentials.token;
        }
        if self.credentials.client_id.is_empty() {
            self.credentials.client_id = defaults.credentials.client_id;
        }
        self
    }

    pub fn log_summary(&self) {
        info!("wifi ssid = {:?}", self.wifi_ssid);
        info!("wifi pass = <{} chars>", self.wifi_pass.len());
        info!("twitch token = <{} chars>", self.credentials.token.len());
        info!("twitch client id = <{} chars>", self.credentials.client_id.len());
    }
}

#[cfg(target_os = "espidf")]
mod nvs {
    use super::*;
    use anyhow::Result;
    use esp_idf_svc::nvs::{EspNvs, NvsDefault};

    const KEY_WIFI_SSID: &str = "wifi_ssid";
    const KEY_WIFI_PASS: &str = "wifi_pass";
    const KEY_TWITCH_TOKEN: &str = "tw_token";
    const KEY_TWITCH_CLIENT: &str = "tw_client";

    /// Read a string from NVS, returning None if the key is absent or on error.
    fn nvs_get_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
        let len = match nvs.str_len(key) {
            Ok(Some(len)) => len,
            _ => return None,
        };

        let mut buf = vec![0u8; len];
        match nvs.get_str(key, &mut buf) {
            Ok(Some(val)) => {
                let s = val.trim_end_matches('\0').to_string();
                if s.is_empty() { None } else { Some(s) }
            }
            _ => None,
        }
    }

    impl Config {
        /// Load configuration from NVS, falling back to the compile-time
        /// defaults for any missing key.
        pub fn load(nvs: &EspNvs<NvsDefault>) -> Config {
            let cfg = Config {
                wifi_ssid: nvs_get_str(nvs, KEY_WIFI_SSID).unwrap_or_default(),
                wifi_pass: nvs_get_str(nvs, KEY_WIFI_PASS).unwrap_or_default(),
                credentials: Credentials {
                    token: nvs_get_str(nvs, KEY_TWITCH_TOKEN).unwrap_or_default(),
                    client_id: nvs_get_str(nvs, KEY_TWITCH_CLIENT).unwrap_or_default(),
                },
            }
            .with_defaults();
            cfg.log_summary();
            cfg
        }

        pub fn save_wifi(nvs: &mut EspNvs<NvsDefault>, ssid: &str, pass: &str) -> Result<()> {
            nvs.set_str(KEY_WIFI_SSID, ssid)?;
            nvs.set_str(KEY_WIFI_PASS, pass)?;
            info!("NVS saved wifi_ssid={:?}", ssid);
            Ok(())
        }

        pub fn clear_wifi(nvs: &mut EspNvs<NvsDefault>) -> Result<()> {
            nvs.remove(KEY_WIFI_SSID)?;
            nvs.remove(KEY_WIFI_PASS)?;
            info!("NVS cleared wifi override");
            Ok(())
        }

        pub fn save_twitch_token(nvs: &mut EspNvs<NvsDefault>, token: &str) -> Result<()> {
            nvs.set_str(KEY_TWITCH_TOKEN, token)?;
            info!("NVS saved tw_token=<{} chars>", token.len());
            Ok(())
        }

        pub fn save_twitch_client_id(nvs: &mut EspNvs<NvsDefault>, client_id: &str) -> Result<()> {
            nvs.set_str(KEY_TWITCH_CLIENT, client_id)?;
            info!("NVS saved tw_client=<{} chars>", client_id.len());
            Ok(())
        }

        pub fn clear_twitch(nvs: &mut EspNvs<NvsDefault>) -> Result<()> {
            nvs.remove(KEY_TWITCH_TOKEN)?;
            nvs.remove(KEY_TWITCH_CLIENT)?;
            info!("NVS cleared twitch overrides");
            Ok(())
        }
    }
}

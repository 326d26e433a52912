use anyhow::{anyhow, Result};
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use log::{info, warn};
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::debug_flags;

pub fn spawn_console(nvs: Arc<Mutex<EspNvs<NvsDefault>>>, config: Arc<Mutex<Config>>) -> Result<()> {
    std::thread::Builder::new()
        .name("console".into())
        .stack_size(8192)
        .spawn(move || {
            info!("console: ready (type 'help')");
            let stdin = io::stdin();
            let mut reader = stdin.lock();
            let mut line = String::new();
            let mut buf = [0u8; 1];
            let mut in_escape = false;
            loop {
                match reader.read(&mut buf) {
                    Ok(1) => {
                        let ch = buf[0];
                        if in_escape {
                            if (ch as char).is_ascii_alphabetic() || ch == b'~' {
                                in_escape = false;
                            }
                            continue;
                        }
                        if ch == 0x1b {
                            in_escape = true;
                            continue;
                        }
                        if ch == b'\n' || ch == b'\r' {
                            if line.is_empty() {
                                continue;
                            }
                            info!("> {}", line);
                            if let Err(e) = process_line(&line, &nvs, &config) {
                                warn!("console: error: {}", e);
                            }
                            line.clear();
                        } else if ch == 0x7f || ch == 0x08 {
                            line.pop();
                        } else if ch >= 0x20 {
                            line.push(ch as char);
                        }
                    }
                    Ok(_) => std::thread::sleep(std::time::Duration::from_millis(50)),
                    Err(_) => std::thread::sleep(std::time::Duration::from_millis(100)),
                }
            }
        })?;
    Ok(())
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| anyhow!("lock poisoned"))
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"').trim_matches('\'')
}

/// Last four characters of a secret, for confirmation without disclosure.
fn masked(secret: &str) -> String {
    let n = secret.chars().count();
    if n <= 4 {
        "*".repeat(n)
    } else {
        let tail: String = secret.chars().skip(n - 4).collect();
        format!("****{}", tail)
    }
}

fn process_line(line: &str, nvs: &Arc<Mutex<EspNvs<NvsDefault>>>, config: &Arc<Mutex<Config>>) -> Result<()> {
    let clean = line.trim().trim_end_matches('\\');
    if clean.is_empty() {
        return Ok(());
    }
    let mut parts = clean.splitn(3, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let sub = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match cmd {
        "help" | "?" => print_help(),
        "wifi" => handle_wifi(sub, rest, nvs, config)?,
        "twitch" => handle_twitch(sub, rest, nvs, config)?,
        "debug" => handle_debug(sub),
        "refresh" => {
            debug_flags::set(&debug_flags::REQUEST_REFRESH, true);
            info!("refresh: requested (runs on next idle tick)");
        }
        "status" => {
            {
                let cfg = lock(config)?;
                info!("wifi: {}", if cfg.wifi_ssid.is_empty() { "not configured" } else { &cfg.wifi_ssid });
                info!("twitch token: {} chars", cfg.credentials.token.len());
                info!("twitch client id: {}", masked(&cfg.credentials.client_id));
            }
            let heap_kb = unsafe { esp_idf_sys::esp_get_free_heap_size() } / 1024;
            info!("free heap: {} KB", heap_kb);
            info!("debug: {}", debug_flags::status_line());
            debug_flags::set(&debug_flags::REQUEST_STATUS, true);
        }
        "reboot" => {
            info!("console: rebooting now");
            std::thread::sleep(std::time::Duration::from_millis(100));
            unsafe { esp_idf_sys::esp_restart() };
        }
        _ => warn!("console: unknown command '{}' (type 'help')", cmd),
    }
    Ok(())
}

fn print_help() {
    info!("commands:");
    info!("  wifi show                  - show Wi-Fi config");
    info!("  wifi set <ssid> <pass>     - set Wi-Fi credentials");
    info!("  wifi clear                 - clear Wi-Fi override");
    info!("  twitch show                - show Twitch credentials");
    info!("  twitch set-token <token>   - set Helix bearer token");
    info!("  twitch set-client <id>     - set Helix client id");
    info!("  twitch clear               - clear Twitch overrides");
    info!("  refresh                    - re-read live channels now");
    info!("  debug <module>             - toggle debug for module");
    info!("    modules: eventsub, helix, backlight, wifi, all");
    info!("  debug show                 - show debug flag status");
    info!("  status                     - show system status");
    info!("  reboot                     - reboot device");
}

fn handle_debug(sub: &str) {
    match sub {
        "show" | "" => info!("debug: {}", debug_flags::status_line()),
        "all" => {
            // Any flag off turns all on; otherwise all off.
            let any_off = debug_flags::MODULES.iter().any(|(_, f)| !debug_flags::is_on(f));
            for (_, flag) in debug_flags::MODULES.iter() {
                debug_flags::set(flag, any_off);
            }
            info!("debug all: {}", if any_off { "ON" } else { "OFF" });
        }
        name => match debug_flags::by_name(name) {
            Some(flag) => {
                let on = debug_flags::toggle(flag);
                info!("debug {}: {}", name, if on { "ON" } else { "OFF" });
            }
            None => info!("unknown module '{}'. options: eventsub, helix, backlight, wifi, all", name),
        },
    }
}

fn handle_wifi(sub: &str, rest: &str, nvs: &Arc<Mutex<EspNvs<NvsDefault>>>, config: &Arc<Mutex<Config>>) -> Result<()> {
    match sub {
        "show" | "" => {
            let cfg = lock(config)?;
            info!("wifi ssid: {}", cfg.wifi_ssid);
            info!("wifi pass: {} chars", cfg.wifi_pass.len());
        }
        "set" => {
            let (ssid, pass) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let ssid = unquote(ssid);
            let pass = unquote(pass);
            if ssid.is_empty() {
                warn!("usage: wifi set <ssid> <password>");
                return Ok(());
            }
            Config::save_wifi(&mut *lock(nvs)?, ssid, pass)?;
            let mut cfg = lock(config)?;
            cfg.wifi_ssid = ssid.to_string();
            cfg.wifi_pass = pass.to_string();
            info!("saved: SSID='{}' pass=<{} chars>", ssid, pass.len());
            info!("type 'reboot' to apply");
        }
        "clear" => {
            Config::clear_wifi(&mut *lock(nvs)?)?;
            let mut cfg = lock(config)?;
            cfg.wifi_ssid.clear();
            cfg.wifi_pass.clear();
            info!("Wi-Fi override cleared; compile-time default applies after reboot");
        }
        _ => info!("usage: wifi show|set <ssid> <pass>|clear"),
    }
    Ok(())
}

fn handle_twitch(sub: &str, rest: &str, nvs: &Arc<Mutex<EspNvs<NvsDefault>>>, config: &Arc<Mutex<Config>>) -> Result<()> {
    match sub {
        "show" | "" => {
            let cfg = lock(config)?;
            let token = &cfg.credentials.token;
            info!("token: {} ({} chars)", masked(token), token.len());
            info!("client id: {}", masked(&cfg.credentials.client_id));
            if !cfg.credentials.is_complete() {
                warn!("credentials incomplete: Helix requests will fail");
            }
        }
        "set-token" => {
            let token = unquote(rest);
            if token.is_empty() {
                warn!("usage: twitch set-token <token>");
                return Ok(());
            }
            Config::save_twitch_token(&mut *lock(nvs)?, token)?;
            lock(config)?.credentials.token = token.to_string();
            info!("saved: token {} ({} chars)", masked(token), token.len());
            info!("type 'reboot' to apply");
        }
        "set-client" => {
            let client_id = unquote(rest);
            if client_id.is_empty() {
                warn!("usage: twitch set-client <client id>");
                return Ok(());
            }
            Config::save_twitch_client_id(&mut *lock(nvs)?, client_id)?;
            lock(config)?.credentials.client_id = client_id.to_string();
            info!("saved: client id {}", masked(client_id));
            info!("type 'reboot' to apply");
        }
        "clear" => {
            Config::clear_twitch(&mut *lock(nvs)?)?;
            let mut cfg = lock(config)?;
            cfg.credentials.token.clear();
            cfg.credentials.client_id.clear();
            info!("Twitch overrides cleared; compile-time defaults apply after reboot");
        }
        _ => info!("usage: twitch show|set-token <token>|set-client <id>|clear"),
    }
    Ok(())
}

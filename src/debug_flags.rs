use std::sync::atomic::{AtomicBool, Ordering};

/// Global debug flags toggled via console.
/// When a flag is true, the module logs at info! level instead of being silent.
pub static DEBUG_EVENTSUB: AtomicBool = AtomicBool::new(false);
pub static DEBUG_HELIX: AtomicBool = AtomicBool::new(false);
pub static DEBUG_BACKLIGHT: AtomicBool = AtomicBool::new(false);
pub static DEBUG_WIFI: AtomicBool = AtomicBool::new(false);

/// Request flags: the console sets these, the main loop consumes them.
pub static REQUEST_REFRESH: AtomicBool = AtomicBool::new(false);
pub static REQUEST_STATUS: AtomicBool = AtomicBool::new(false);

/// Flags addressable by name from the console.
pub static MODULES: [(&str, &AtomicBool); 4] = [
    ("eventsub", &DEBUG_EVENTSUB),
    ("helix", &DEBUG_HELIX),
    ("backlight", &DEBUG_BACKLIGHT),
    ("wifi", &DEBUG_WIFI),
];

pub fn is_on(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

pub fn set(flag: &AtomicBool, val: bool) {
    flag.store(val, Ordering::Relaxed);
}

pub fn toggle(flag: &AtomicBool) -> bool {
    let old = flag.load(Ordering::Relaxed);
    flag.store(!old, Ordering::Relaxed);
    !old
}

/// Clear a one-shot request, returning whether it was raised.
pub fn take(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::Relaxed)
}

pub fn by_name(name: &str) -> Option<&'static AtomicBool> {
    MODULES.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

pub fn status_line() -> String {
    MODULES
        .iter()
        .map(|(name, flag)| format!("{}={}", name, if is_on(flag) { "ON" } else { "off" }))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_taken_once() {
        set(&REQUEST_REFRESH, true);
        assert!(take(&REQUEST_REFRESH));
        assert!(!take(&REQUEST_REFRESH));
    }

    #[test]
    fn lookup_by_console_name() {
        assert!(std::ptr::eq(by_name("helix").unwrap(), &DEBUG_HELIX));
        assert!(by_name("touch").is_none());
    }

    #[test]
    fn toggle_flips_and_reports() {
        let before = is_on(&DEBUG_BACKLIGHT);
        assert_eq!(toggle(&DEBUG_BACKLIGHT), !before);
        toggle(&DEBUG_BACKLIGHT);
        assert_eq!(is_on(&DEBUG_BACKLIGHT), before);
    }
}

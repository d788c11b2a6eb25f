//! Localized text lookup.
//!
//! Translations are embedded at compile time (`include_str!`), keyed by
//! language code and dot-separated key path. Unknown locales fall back to
//! English; unknown keys fall back to the key itself so a missing string is
//! visible instead of silently empty.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::Value;

/// Global translation store: LangCode -> nested key tree.
static TRANSLATIONS: OnceLock<HashMap<String, Value>> = OnceLock::new();

/// Load embedded translations. Safe to call more than once.
pub fn init() {
    let mut map = HashMap::new();

    let en_json = include_str!("en.json");
    if let Ok(val) = serde_json::from_str(en_json) {
        map.insert("en".to_string(), val);
    }

    let _ = TRANSLATIONS.set(map);
}

/// Get text for a key in a specific language.
/// Supports nested keys via dot notation, e.g., "mute.unmuted".
pub fn get_text(lang: &str, key: &str) -> String {
    let Some(store) = TRANSLATIONS.get() else {
        return key.to_string();
    };

    if let Some(val) = store.get(lang) {
        if let Some(text) = resolve_key(val, key) {
            return text;
        }
    }

    // Fallback to English
    if lang != "en" {
        if let Some(val) = store.get("en") {
            if let Some(text) = resolve_key(val, key) {
                return text;
            }
        }
    }

    key.to_string()
}

fn resolve_key(val: &Value, key: &str) -> Option<String> {
    let mut current = val;
    for part in key.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => return None,
        }
    }
    current.as_str().map(|s| s.to_string())
}

// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Client settings, populated from the config INI and CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    // Client
    pub interface: String,
    pub instance: String,
    pub oneway: bool,
    /// Unregister the demo service after the first call to exercise death delivery.
    pub kill_after_first: bool,

    // Logging
    pub verbose: bool,
}

pub const DEFAULT_INTERFACE: &str = "kaios.test.bar@1.0::IBar";
pub const DEFAULT_INSTANCE: &str = "default";

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            instance: DEFAULT_INSTANCE.to_string(),
            oneway: false,
            kill_after_first: false,
            verbose: false,
        }
    }
}

/// Parse an INI-style boolean ("1", "true", "yes", "on").
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.interface, DEFAULT_INTERFACE);
        assert_eq!(s.instance, "default");
        assert!(!s.oneway);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" True "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

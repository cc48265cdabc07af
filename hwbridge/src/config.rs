// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use hwbridge_common::settings::{parse_bool, Settings};
use ini::Ini;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "hwbridge.ini";

/// Locate hwbridge.ini under the user's config directory.
pub fn find_config_path() -> Option<PathBuf> {
    // XDG_CONFIG_HOME/hwbridge/hwbridge.ini
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join("hwbridge").join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    // ~/.config/hwbridge/hwbridge.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join("hwbridge")
            .join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load settings from an INI file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return settings;
            }
            p.to_path_buf()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                info!("No config found, using defaults");
                return settings;
            }
        },
    };

    info!("Loading config from: {}", config_path.display());

    match Ini::load_from_file(&config_path) {
        Ok(conf) => apply_config(&conf, &mut settings),
        Err(e) => warn!("Failed to parse config: {}", e),
    }
    settings
}

/// Copy recognised keys from `conf` into `settings`.
pub fn apply_config(conf: &Ini, settings: &mut Settings) {
    // [client]
    if let Some(section) = conf.section(Some("client")) {
        if let Some(interface) = section.get("interface") {
            settings.interface = interface.trim().to_string();
            debug!("Interface: {}", settings.interface);
        }
        if let Some(instance) = section.get("instance") {
            settings.instance = instance.trim().to_string();
        }
        if let Some(oneway) = section.get("oneway") {
            settings.oneway = parse_bool(oneway).unwrap_or(settings.oneway);
        }
        if let Some(kill) = section.get("kill_after_first") {
            settings.kill_after_first = parse_bool(kill).unwrap_or(settings.kill_after_first);
        }
    }

    // [logging]
    if let Some(section) = conf.section(Some("logging")) {
        if let Some(verbose) = section.get("verbose") {
            match parse_bool(verbose) {
                Some(v) => settings.verbose = v,
                None => warn!("Ignoring logging.verbose={:?}", verbose),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_config() {
        let conf = Ini::load_from_str(
            "[client]\ninterface = demo.IFoo@1.0::IFoo\ninstance = slot1\noneway = yes\n\n[logging]\nverbose = 1\n",
        )
        .unwrap();
        let mut settings = Settings::default();
        apply_config(&conf, &mut settings);
        assert_eq!(settings.interface, "demo.IFoo@1.0::IFoo");
        assert_eq!(settings.instance, "slot1");
        assert!(settings.oneway);
        assert!(settings.verbose);
        assert!(!settings.kill_after_first);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let conf = Ini::load_from_str("[client]\noneway = sometimes\n[logging]\nverbose = loud\n").unwrap();
        let mut settings = Settings::default();
        apply_config(&conf, &mut settings);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = load_config(Some(Path::new("/nonexistent/hwbridge.ini")));
        assert_eq!(settings, Settings::default());
    }
}

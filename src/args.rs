// SPDX-License-Identifier: Apache-2.0
//
// Command line parsing and runtime configuration.

use std::path::Path;

use clap::{Parser, ValueEnum};

use crate::input::discover::DeviceMapping;

/// uiprobe: REST-API daemon that makes automated testing on hardware
/// possible without physical intervention, by injecting user input and
/// capturing the framebuffer over HTTP.
#[derive(Parser, Debug)]
#[command(name = "uiprobe", disable_version_flag = true)]
pub struct Cli {
    /// Port to bind the server to
    #[arg(short = 'p', long = "port", default_value_t = 3465)]
    pub port: u16,

    /// Input backend; uinput creates virtual devices, evdev drives real ones
    #[arg(short = 'i', long = "input-type", value_enum, default_value_t = InputSelector::Uinput)]
    pub input_type: InputSelector,

    /// Screen backend
    #[arg(short = 's', long = "screen-backend", value_enum, default_value_t = ScreenSelector::Kms)]
    pub screen_backend: ScreenSelector,

    /// DRM device under /dev/dri; every card* entry is probed when unset
    #[arg(short = 'k', long = "kms-backend-card")]
    pub kms_backend_card: Option<String>,

    /// Use RGB pixel format instead of BGR
    #[arg(short = 'r', long = "kms-format-rgb")]
    pub kms_format_rgb: bool,

    /// Probe /proc/bus/input/devices to map device kinds to event ids
    #[arg(short = 'g', long = "guess-devices")]
    pub guess_devices: bool,

    /// Verbose logging
    #[arg(short = 'V', long = "verbose")]
    pub verbose: bool,

    /// Print version information
    #[arg(short = 'v', long = "version")]
    pub version: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSelector {
    Uinput,
    Evdev,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenSelector {
    Kms,
    Ilm,
}

/// Immutable after startup; shared by every session.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub port: u16,
    pub input_backend: InputSelector,
    pub screen_backend: ScreenSelector,
    pub kms_cards: Vec<String>,
    pub kms_format_rgb: bool,
    pub devices: Option<Vec<DeviceMapping>>,
    pub verbose: bool,
}

impl RuntimeConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let kms_cards = match &cli.kms_backend_card {
            Some(card) => vec![card.clone()],
            None => enumerate_cards(Path::new(crate::screen::kms::DRI_DIR)),
        };
        RuntimeConfig {
            port: cli.port,
            input_backend: cli.input_type,
            screen_backend: cli.screen_backend,
            kms_cards,
            kms_format_rgb: cli.kms_format_rgb,
            devices: None,
            verbose: cli.verbose,
        }
    }
}

/// Candidate cards are the card* entries under the DRI directory, in name
/// order.
fn enumerate_cards(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut cards: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("card"))
        .collect();
    cards.sort();
    cards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_daemon_contract() {
        let cli = Cli::try_parse_from(["uiprobe"]).unwrap();
        assert_eq!(cli.port, 3465);
        assert_eq!(cli.input_type, InputSelector::Uinput);
        assert_eq!(cli.screen_backend, ScreenSelector::Kms);
        assert!(!cli.kms_format_rgb);
        assert!(!cli.guess_devices);
    }

    #[test]
    fn unknown_backend_strings_are_rejected() {
        assert!(Cli::try_parse_from(["uiprobe", "-i", "magic"]).is_err());
        assert!(Cli::try_parse_from(["uiprobe", "-s", "fbdev"]).is_err());
    }

    #[test]
    fn explicit_card_overrides_enumeration() {
        let cli = Cli::try_parse_from(["uiprobe", "-k", "card1"]).unwrap();
        let cfg = RuntimeConfig::from_cli(&cli);
        assert_eq!(cfg.kms_cards, vec!["card1".to_string()]);
    }

    #[test]
    fn card_enumeration_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["card1", "renderD128", "card0", "by-path"] {
            std::fs::File::create(dir.path().join(name)).unwrap();
        }
        assert_eq!(enumerate_cards(dir.path()), vec!["card0", "card1"]);
        assert!(enumerate_cards(&dir.path().join("missing")).is_empty());
    }
}

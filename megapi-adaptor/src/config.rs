//! Adaptor configuration.
//!
//! Settings come from code ([`AdaptorConfig::new`]), a TOML file
//! ([`AdaptorConfig::load_from`]), and `MEGAPI_*` environment variables
//! ([`AdaptorConfig::apply_env`]), later sources overriding earlier ones.
//!
//! ```toml
//! device = "/dev/ttyAMA0"
//! baud_rate = 115200
//! boot_settle_ms = 2000
//! write_pacing_ms = 10
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::{env, path::Path, str::FromStr, time::Duration};

/// Baud rate the MegaPi firmware listens at.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Time the board needs after the port opens before it accepts data.
///
/// Opening the port resets the board; bytes written before the bootloader
/// hands over to the firmware are dropped or misread.
pub const BOOT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Minimum gap between two frames, matching the board's intake rate.
pub const WRITE_PACING: Duration = Duration::from_millis(10);

/// Serial settings and timings for one board.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptorConfig {
    /// Serial device path (e.g. "/dev/ttyUSB0")
    pub device: String,

    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Wait between opening the port and the first write
    #[serde(
        rename = "boot_settle_ms",
        default = "default_boot_settle",
        deserialize_with = "millis"
    )]
    pub boot_settle: Duration,

    /// Pause after every frame written
    #[serde(
        rename = "write_pacing_ms",
        default = "default_write_pacing",
        deserialize_with = "millis"
    )]
    pub write_pacing: Duration,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_boot_settle() -> Duration {
    BOOT_SETTLE_DELAY
}

fn default_write_pacing() -> Duration {
    WRITE_PACING
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl AdaptorConfig {
    /// Configuration for `device` with the board's default timings.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            boot_settle: BOOT_SETTLE_DELAY,
            write_pacing: WRITE_PACING,
        }
    }

    /// Override the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Override the boot-settle delay.
    pub fn with_boot_settle(mut self, delay: Duration) -> Self {
        self.boot_settle = delay;
        self
    }

    /// Override the pacing between frames.
    pub fn with_write_pacing(mut self, pacing: Duration) -> Self {
        self.write_pacing = pacing;
        self
    }

    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        text.parse()
    }

    /// Apply `MEGAPI_DEVICE`, `MEGAPI_BAUD_RATE`, `MEGAPI_BOOT_SETTLE_MS` and
    /// `MEGAPI_WRITE_PACING_MS` from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(device) = lookup("MEGAPI_DEVICE") {
            self.device = device;
        }
        if let Some(baud) = lookup("MEGAPI_BAUD_RATE") {
            self.baud_rate = parse_number("MEGAPI_BAUD_RATE", &baud)?;
        }
        if let Some(ms) = lookup("MEGAPI_BOOT_SETTLE_MS") {
            self.boot_settle = Duration::from_millis(parse_number("MEGAPI_BOOT_SETTLE_MS", &ms)?);
        }
        if let Some(ms) = lookup("MEGAPI_WRITE_PACING_MS") {
            self.write_pacing = Duration::from_millis(parse_number("MEGAPI_WRITE_PACING_MS", &ms)?);
        }
        Ok(self)
    }
}

fn parse_number<N: FromStr>(key: &str, value: &str) -> Result<N> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: not a number: {value:?}")))
}

impl FromStr for AdaptorConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }
}

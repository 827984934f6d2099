//! Configuration data type. Loading the INI file itself is an external
//! collaborator outside this crate; `tcd-cli::config_loader` implements that
//! loader and populates this struct.

use crate::errors::ConfigError;

/// Which DVSI hardware class is attached; bounds the channel count and the
/// allowed gain range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// 3000-class: one vocoder channel, gain range [-36, 36] dB.
    Dv3000,
    /// 3003-class: up to three vocoder channels, gain range [-24, 24] dB.
    Dv3003,
}

impl DeviceClass {
    pub fn channel_capacity(self) -> usize {
        match self {
            DeviceClass::Dv3000 => 1,
            DeviceClass::Dv3003 => 3,
        }
    }

    pub fn gain_range(self) -> (i32, i32) {
        match self {
            DeviceClass::Dv3000 => (-36, 36),
            DeviceClass::Dv3003 => (-24, 24),
        }
    }

    /// FTDI baud rate for this device class.
    pub fn baud_rate(self) -> u32 {
        match self {
            DeviceClass::Dv3000 => 460_800,
            DeviceClass::Dv3003 => 921_600,
        }
    }

    /// Pick a device class from the FTDI description string reported during
    /// discovery.
    pub fn from_description(desc: &str) -> DeviceClass {
        match desc {
            "ThumbDV" | "DVstick-30" | "USB-3000" | "FT230X Basic UART" => DeviceClass::Dv3000,
            _ => DeviceClass::Dv3003,
        }
    }
}

/// Clamp a gain in dB to the range the attached device class allows,
/// returning the clamped value and whether clamping occurred.
pub fn clamp_gain(class: DeviceClass, db: i32) -> (i32, bool) {
    let (lo, hi) = class.gain_range();
    if db < lo {
        (lo, true)
    } else if db > hi {
        (hi, true)
    } else {
        (db, false)
    }
}

/// The USRP bridge's gain range is fixed regardless of device class.
pub const USRP_GAIN_RANGE: (i32, i32) = (-36, 36);

pub fn clamp_usrp_gain(db: i32) -> (i32, bool) {
    let (lo, hi) = USRP_GAIN_RANGE;
    if db < lo {
        (lo, true)
    } else if db > hi {
        (hi, true)
    } else {
        (db, false)
    }
}

/// Per-codec gain pairs, already clamped.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gains {
    pub dstar_in: i32,
    pub dstar_out: i32,
    pub dmr_in: i32,
    pub dmr_out: i32,
    pub usrp_tx: i32,
    pub usrp_rx: i32,
}

/// The data-only configuration struct the engine needs.
#[derive(Debug, Clone)]
pub struct TcdConfig {
    /// Deduplicated, uppercased module letters, in first-seen order.
    pub modules: Vec<char>,
    pub gains: Gains,
    pub server_address: String,
    pub port: u16,
    /// Directory (or path prefix) holding the `REF2TC` / `TC2REF<module>`
    /// Unix-domain datagram sockets.
    pub socket_dir: String,
}

impl TcdConfig {
    /// Normalize a raw module string: keep alphabetic characters only,
    /// uppercase them, dedupe while preserving first-seen order.
    pub fn normalize_modules(raw: &str) -> Result<Vec<char>, ConfigError> {
        let mut mods = Vec::new();
        for c in raw.chars() {
            if c.is_ascii_alphabetic() {
                let upper = c.to_ascii_uppercase();
                if !mods.contains(&upper) {
                    mods.push(upper);
                }
            }
        }
        if mods.is_empty() {
            return Err(ConfigError::EmptyModuleList {
                raw: raw.to_string(),
            });
        }
        Ok(mods)
    }

    /// Validates the module count against the device class that will serve
    /// it.
    pub fn check_module_capacity(&self, class: DeviceClass) -> Result<(), ConfigError> {
        let capacity = class.channel_capacity();
        if self.modules.len() > capacity {
            return Err(ConfigError::TooManyModules {
                count: self.modules.len(),
                capacity,
            });
        }
        Ok(())
    }

    pub fn validate_port(port: u32) -> Result<u16, ConfigError> {
        if port <= 1024 || port >= 49000 {
            return Err(ConfigError::PortOutOfRange(port));
        }
        Ok(port as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_modules_dedupes_and_uppercases() {
        let mods = TcdConfig::normalize_modules("a,b;A b-c!").unwrap();
        assert_eq!(mods, vec!['A', 'B', 'C']);
    }

    #[test]
    fn normalize_modules_rejects_empty() {
        assert!(TcdConfig::normalize_modules("123---").is_err());
    }

    #[test]
    fn clamp_gain_respects_device_class() {
        assert_eq!(clamp_gain(DeviceClass::Dv3000, 40), (36, true));
        assert_eq!(clamp_gain(DeviceClass::Dv3003, 40), (24, true));
        assert_eq!(clamp_gain(DeviceClass::Dv3003, 10), (10, false));
    }

    #[test]
    fn device_class_from_description() {
        assert_eq!(DeviceClass::from_description("ThumbDV"), DeviceClass::Dv3000);
        assert_eq!(
            DeviceClass::from_description("DVSI USB-3012"),
            DeviceClass::Dv3003
        );
    }

    #[test]
    fn baud_rate_follows_device_class() {
        assert_eq!(DeviceClass::Dv3000.baud_rate(), 460_800);
        assert_eq!(DeviceClass::Dv3003.baud_rate(), 921_600);
    }

    #[test]
    fn validate_port_range() {
        assert!(TcdConfig::validate_port(1024).is_err());
        assert!(TcdConfig::validate_port(49000).is_err());
        assert!(TcdConfig::validate_port(20001).is_ok());
    }
}

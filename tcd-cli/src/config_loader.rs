//! The INI loader: reads the reflector's transcoder config file and builds
//! a `TcdConfig`.

use std::fs;

use tcd_core::config::{clamp_usrp_gain, DeviceClass, Gains, TcdConfig};
use tcd_core::{ConfigError, TcdError};

const MODULES: &str = "Modules";
const TRANSCODED: &str = "Transcoded";
const SERVER_ADDRESS: &str = "ServerAddress";
const PORT: &str = "Port";
const DSTAR_GAIN_IN: &str = "DStarGainIn";
const DSTAR_GAIN_OUT: &str = "DStarGainOut";
const DMR_GAIN_IN: &str = "DmrYsfGainIn";
const DMR_GAIN_OUT: &str = "DmrYsfGainOut";
const USRP_TX_GAIN: &str = "UsrpTxGain";
const USRP_RX_GAIN: &str = "UsrpRxGain";

/// One gain parameter that fell outside the device class's allowed range and
/// was clamped rather than rejected. The caller turns these into structured
/// `GainClamped` log events once a logger is available; `load` itself only
/// has the `log` facade.
pub struct ClampNotice {
    pub parameter: &'static str,
    pub requested_db: i32,
    pub clamped_db: i32,
}

/// Loads and validates the transcoder config at `path`, clamping per-codec
/// gains to the device class's allowed range and logging a warning for each
/// value that needed clamping.
pub fn load(path: &str, device_class: DeviceClass) -> Result<(TcdConfig, Vec<ClampNotice>), TcdError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::FileNotFound {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let mut modules_raw = String::new();
    let mut address = None;
    let mut port_raw = None;
    let mut dstar_in = 0i32;
    let mut dstar_out = 0i32;
    let mut dmr_in = 0i32;
    let mut dmr_out = 0i32;
    let mut usrp_tx = 0i32;
    let mut usrp_rx = 0i32;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.len() < 3 || line.starts_with('#') {
            continue;
        }

        let Some((key_part, value_part)) = line.split_once('=') else {
            log::warn!("'{line}' does not contain an equal sign, skipping");
            continue;
        };

        let value_part = match value_part.find('#') {
            Some(pos) => &value_part[..pos],
            None => value_part,
        };
        let key = key_part.trim();
        let value = value_part.trim();
        if key.is_empty() || value.is_empty() {
            log::warn!("missing key or value: '{line}'");
            continue;
        }

        match key {
            MODULES | TRANSCODED => modules_raw.push_str(value),
            SERVER_ADDRESS => address = Some(value.to_string()),
            PORT => port_raw = Some(value.to_string()),
            DSTAR_GAIN_IN => dstar_in = parse_signed(key, value)?,
            DSTAR_GAIN_OUT => dstar_out = parse_signed(key, value)?,
            DMR_GAIN_IN => dmr_in = parse_signed(key, value)?,
            DMR_GAIN_OUT => dmr_out = parse_signed(key, value)?,
            USRP_TX_GAIN => usrp_tx = parse_signed(key, value)?,
            USRP_RX_GAIN => usrp_rx = parse_signed(key, value)?,
            other => log::warn!("unexpected parameter: '{other}'"),
        }
    }

    let modules = TcdConfig::normalize_modules(&modules_raw)?;

    let address = address.ok_or_else(|| ConfigError::MalformedAddress("<missing>".to_string()))?;
    if address.parse::<std::net::IpAddr>().is_err() {
        return Err(ConfigError::MalformedAddress(address).into());
    }

    let port_raw = port_raw.unwrap_or_default();
    let port_num: u32 = port_raw.parse().map_err(|_| ConfigError::PortOutOfRange(0))?;
    let port = TcdConfig::validate_port(port_num)?;

    let requested = [
        (DSTAR_GAIN_IN, dstar_in),
        (DSTAR_GAIN_OUT, dstar_out),
        (DMR_GAIN_IN, dmr_in),
        (DMR_GAIN_OUT, dmr_out),
        (USRP_TX_GAIN, usrp_tx),
        (USRP_RX_GAIN, usrp_rx),
    ];

    let (dstar_in, dstar_in_clamped) = tcd_core::config::clamp_gain(device_class, dstar_in);
    let (dstar_out, dstar_out_clamped) = tcd_core::config::clamp_gain(device_class, dstar_out);
    let (dmr_in, dmr_in_clamped) = tcd_core::config::clamp_gain(device_class, dmr_in);
    let (dmr_out, dmr_out_clamped) = tcd_core::config::clamp_gain(device_class, dmr_out);
    let (usrp_tx, usrp_tx_clamped) = clamp_usrp_gain(usrp_tx);
    let (usrp_rx, usrp_rx_clamped) = clamp_usrp_gain(usrp_rx);

    let clamped = [
        (dstar_in, dstar_in_clamped),
        (dstar_out, dstar_out_clamped),
        (dmr_in, dmr_in_clamped),
        (dmr_out, dmr_out_clamped),
        (usrp_tx, usrp_tx_clamped),
        (usrp_rx, usrp_rx_clamped),
    ];

    let mut clamp_notices = Vec::new();
    for ((label, requested_db), (clamped_db, was_clamped)) in requested.into_iter().zip(clamped) {
        if was_clamped {
            log::warn!("{label} was out of range ({requested_db}dB) and has been clamped to {clamped_db}dB");
            clamp_notices.push(ClampNotice {
                parameter: label,
                requested_db,
                clamped_db,
            });
        }
    }

    let config = TcdConfig {
        modules,
        gains: Gains {
            dstar_in,
            dstar_out,
            dmr_in,
            dmr_out,
            usrp_tx,
            usrp_rx,
        },
        server_address: address,
        port,
        socket_dir: std::path::Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string()),
    };

    Ok((config, clamp_notices))
}

/// Parses a signed gain value. No range clamp happens here: the
/// device-class-aware clamp runs once in `load`, after every key has been
/// read, so an out-of-range value always resolves against the real
/// attached hardware's range rather than some intermediate bound.
fn parse_signed(key: &str, value: &str) -> Result<i32, TcdError> {
    value
        .parse()
        .map_err(|_| ConfigError::UnknownKey(format!("{key}={value}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> String {
        let path = format!("/tmp/tcd_config_test_{name}_{}.ini", std::process::id());
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_a_well_formed_config() {
        let path = write_temp(
            "wellformed",
            "Modules = AB\nServerAddress = 127.0.0.1\nPort = 20001\nDStarGainIn = 3 # trailing comment\n",
        );
        let (config, notices) = load(&path, DeviceClass::Dv3003).unwrap();
        assert_eq!(config.modules, vec!['A', 'B']);
        assert_eq!(config.server_address, "127.0.0.1");
        assert_eq!(config.port, 20001);
        assert_eq!(config.gains.dstar_in, 3);
        assert!(notices.is_empty());
    }

    #[test]
    fn accumulates_multiple_module_lines() {
        let path = write_temp("multimod", "Modules = A\nTranscoded = B\nServerAddress = 127.0.0.1\nPort = 20001\n");
        let (config, _) = load(&path, DeviceClass::Dv3003).unwrap();
        assert_eq!(config.modules, vec!['A', 'B']);
    }

    #[test]
    fn gain_within_device_class_range_is_untouched() {
        let path = write_temp(
            "clampgain",
            "Modules = A\nServerAddress = 127.0.0.1\nPort = 20001\nDStarGainIn = 24\n",
        );
        let (config, notices) = load(&path, DeviceClass::Dv3000).unwrap();
        assert_eq!(config.gains.dstar_in, 24);
        assert!(notices.is_empty());
    }

    /// `DStarGainIn = 40` clamps to the attached device class's own range
    /// -- 36 dB for Dv3000, not some tighter intermediate bound applied
    /// before the device class is known.
    #[test]
    fn out_of_range_gain_clamps_to_the_device_classs_own_range() {
        let path = write_temp(
            "clamp40",
            "Modules = A\nServerAddress = 127.0.0.1\nPort = 20001\nDStarGainIn = 40\n",
        );
        let (config, notices) = load(&path, DeviceClass::Dv3000).unwrap();
        assert_eq!(config.gains.dstar_in, 36);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].parameter, DSTAR_GAIN_IN);
        assert_eq!(notices[0].requested_db, 40);
        assert_eq!(notices[0].clamped_db, 36);
    }

    #[test]
    fn reports_a_clamp_notice_when_a_gain_is_out_of_range() {
        let path = write_temp(
            "clampnotice",
            "Modules = A\nServerAddress = 127.0.0.1\nPort = 20001\nUsrpTxGain = -60\n",
        );
        let (_, notices) = load(&path, DeviceClass::Dv3003).unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].parameter, USRP_TX_GAIN);
        assert_eq!(notices[0].clamped_db, -36);
    }

    #[test]
    fn rejects_malformed_address() {
        let path = write_temp("badaddr", "Modules = A\nServerAddress = not-an-ip\nPort = 20001\n");
        assert!(load(&path, DeviceClass::Dv3003).is_err());
    }

    #[test]
    fn rejects_missing_file() {
        assert!(load("/tmp/does-not-exist.ini", DeviceClass::Dv3003).is_err());
    }
}

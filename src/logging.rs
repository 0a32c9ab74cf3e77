//! Bitmask-gated logging facade, replacing the original `log(level, msg)`
//! helper from `dombusprotocol.py` with one backed by the `log` crate so that
//! `RUST_LOG` keeps working for local development while the DomBus-specific
//! channel bitmask still controls the dump/TX/RX/DCMD/MQTT/TELNET channels.

use bitflags::bitflags;

bitflags! {
    /// Mirrors the integer `debugLevel` bitmask from the Python original.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct DebugMask: u16 {
        const ERR = 0x0001;
        const WARN = 0x0002;
        const INFO = 0x0004;
        const DEBUG = 0x0008;
        const DUMP_TX = 0x0010;
        const DUMP_RX = 0x0020;
        const DCMD = 0x0040;
        const MQTT_TX = 0x0080;
        const MQTT_RX = 0x0100;
        const TELNET = 0x0200;
    }
}

impl Default for DebugMask {
    fn default() -> Self {
        DebugMask::ERR | DebugMask::WARN | DebugMask::INFO
    }
}

impl DebugMask {
    /// Parses a mask from a decimal or `0x`-prefixed hex string, as found in
    /// the configuration file.
    pub fn parse(s: &str) -> Option<Self> {
        let bits = if let Some(hex) = s.strip_prefix("0x") {
            u16::from_str_radix(hex, 16).ok()?
        } else {
            s.parse().ok()?
        };
        Some(DebugMask::from_bits_truncate(bits))
    }
}

/// A named channel within the debug bitmask, used by the `dlog!` call sites.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
    Err,
    Warn,
    Info,
    Debug,
    DumpTx,
    DumpRx,
    Dcmd,
    MqttTx,
    MqttRx,
    Telnet,
}

impl Channel {
    fn mask(self) -> DebugMask {
        match self {
            Channel::Err => DebugMask::ERR,
            Channel::Warn => DebugMask::WARN,
            Channel::Info => DebugMask::INFO,
            Channel::Debug => DebugMask::DEBUG,
            Channel::DumpTx => DebugMask::DUMP_TX,
            Channel::DumpRx => DebugMask::DUMP_RX,
            Channel::Dcmd => DebugMask::DCMD,
            Channel::MqttTx => DebugMask::MQTT_TX,
            Channel::MqttRx => DebugMask::MQTT_RX,
            Channel::Telnet => DebugMask::TELNET,
        }
    }
}

/// Logs `msg` on `channel` at the severity the channel implies, provided the
/// channel's bit is set in `mask`. Dump/DCMD/MQTT/TELNET channels are
/// reported at `debug` level; ERR/WARN/INFO/DEBUG map onto their namesakes.
pub fn dlog(mask: DebugMask, channel: Channel, msg: &str) {
    if !mask.contains(channel.mask()) {
        return;
    }
    match channel {
        Channel::Err => log::error!("{}", msg),
        Channel::Warn => log::warn!("{}", msg),
        Channel::Info => log::info!("{}", msg),
        _ => log::debug!("{}", msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mask_covers_err_warn_info_only() {
        let mask = DebugMask::default();
        assert!(mask.contains(DebugMask::INFO));
        assert!(!mask.contains(DebugMask::DUMP_TX));
    }

    #[test]
    fn parse_hex_and_decimal() {
        assert_eq!(DebugMask::parse("0x3"), Some(DebugMask::ERR | DebugMask::WARN));
        assert_eq!(DebugMask::parse("3"), Some(DebugMask::ERR | DebugMask::WARN));
        assert_eq!(DebugMask::parse("nope"), None);
    }
}

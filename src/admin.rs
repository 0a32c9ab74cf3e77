//! Admin Command Processor: the line-oriented protocol spoken on the
//! telnet session. Parsing is kept transport-free — the bus/gateway layer
//! owns the TCP socket and feeds lines in, writes replies out.

use crate::error::AdminError;

/// Whitelisted `KEY=VALUE` option names `setport` accepts, per the
/// controller-facing options table.
const OPTION_KEYS: &[&str] = &[
    "A", "B", "CAL", "INIT", "PAR1", "PAR2", "PAR3", "PAR4", "PAR5", "PAR6", "PAR7", "PAR8", "PAR9", "PAR10", "PAR11", "EVMAXCURRENT",
    "EVMAXPOWER", "EVSTARTPOWER", "EVSTOPTIME", "EVAUTOSTART", "EVMAXPOWER2", "EVMAXPOWERTIME", "EVMAXPOWERTIME2", "EVWAITTIME", "EVMETERTYPE",
    "EVMINVOLTAGE", "DIVIDER", "OPPOSITE", "HWADDR", "ADDR", "FUNCTION",
];

/// Controller-side (haOpts) override keys, distinct from the bus-facing
/// option whitelist above.
const HA_KEYS: &[&str] = &["platform", "device_class", "unit", "min", "max", "step", "icon", "options"];

#[derive(Clone, Debug, PartialEq)]
pub enum SetportToken {
    PortType(String),
    PortOpt(String),
    Option { key: String, value: String },
    Ha { key: String, value: String },
}

/// One parsed admin command. `refresh`/`showbus`/`showmodule`/`rmmodule`
/// carry optional addressing that falls back to the session's selected
/// bus/module when omitted.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Help,
    Refresh { reset: bool },
    ShowBus { bus_id: Option<u8> },
    ShowModule { addr: Option<u16> },
    RmModule { addrs: Vec<u16> },
    SetPort { port: u8, tokens: Vec<SetportToken> },
}

/// Per-connection cursor: which bus/module a bare `showmodule`/`setport`
/// implicitly targets.
#[derive(Clone, Copy, Debug, Default)]
pub struct Session {
    pub bus_id: Option<u8>,
    pub module_addr: Option<u16>,
}

fn parse_u16(s: &str) -> Result<u16, AdminError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x") {
        u16::from_str_radix(hex, 16).map_err(|_| AdminError::InvalidNumber(s.to_string()))
    } else {
        s.parse().map_err(|_| AdminError::InvalidNumber(s.to_string()))
    }
}

fn parse_u8(s: &str) -> Result<u8, AdminError> {
    parse_u16(s).and_then(|v| u8::try_from(v).map_err(|_| AdminError::InvalidNumber(s.to_string())))
}

fn parse_setport_token(tok: &str) -> Result<SetportToken, AdminError> {
    let tok = tok.trim();
    if let Some((key, value)) = tok.split_once('=') {
        let key = key.trim();
        if OPTION_KEYS.contains(&key) {
            return Ok(SetportToken::Option { key: key.to_string(), value: value.trim().to_string() });
        }
        if HA_KEYS.contains(&key) {
            return Ok(SetportToken::Ha { key: key.to_string(), value: value.trim().to_string() });
        }
        return Err(AdminError::UnknownToken(tok.to_string()));
    }
    if tok.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
        if tok.starts_with("IN_") || tok.starts_with("OUT_") {
            return Ok(SetportToken::PortType(tok.to_string()));
        }
        return Ok(SetportToken::PortOpt(tok.to_string()));
    }
    Err(AdminError::UnknownToken(tok.to_string()))
}

/// Parses one line of admin input. Unknown leading words are reported as
/// `AdminError::UnknownCommand`; malformed arguments use the more specific
/// variants.
pub fn parse_line(line: &str) -> Result<Command, AdminError> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or("").to_ascii_lowercase();
    match verb.as_str() {
        "help" | "?" => Ok(Command::Help),
        "refresh" => Ok(Command::Refresh { reset: words.next().map(|w| w.eq_ignore_ascii_case("reset")).unwrap_or(false) }),
        "showbus" => Ok(Command::ShowBus { bus_id: words.next().map(parse_u8).transpose()? }),
        "showmodule" => Ok(Command::ShowModule { addr: words.next().map(parse_u16).transpose()? }),
        "rmmodule" => {
            let addrs: Vec<u16> = words.map(parse_u16).collect::<Result<_, _>>()?;
            if addrs.is_empty() {
                return Err(AdminError::MissingArgument("addr"));
            }
            Ok(Command::RmModule { addrs })
        }
        "setport" => {
            let port = words.next().ok_or(AdminError::MissingArgument("port"))?;
            let port = parse_u8(port)?;
            let rest: String = words.collect::<Vec<_>>().join(" ");
            let tokens = rest.split(',').filter(|s| !s.trim().is_empty()).map(parse_setport_token).collect::<Result<_, _>>()?;
            Ok(Command::SetPort { port, tokens })
        }
        "" => Err(AdminError::UnknownCommand(String::new())),
        other => Err(AdminError::UnknownCommand(other.to_string())),
    }
}

pub const HELP_TEXT: &str = "\
commands:
  help                         show this text
  refresh [reset]              re-run port enumeration on all modules
  showbus [busID]               list modules on a bus (or all buses)
  showmodule [addr]             show one module's ports and values
  rmmodule addr...               remove one or more modules
  setport port spec              reconfigure a port (comma-separated tokens)
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_line("help").unwrap(), Command::Help);
        assert_eq!(parse_line("refresh").unwrap(), Command::Refresh { reset: false });
        assert_eq!(parse_line("refresh reset").unwrap(), Command::Refresh { reset: true });
    }

    #[test]
    fn parses_addressed_commands() {
        assert_eq!(parse_line("showbus 1").unwrap(), Command::ShowBus { bus_id: Some(1) });
        assert_eq!(parse_line("showmodule 0x01ff").unwrap(), Command::ShowModule { addr: Some(0x01ff) });
        assert_eq!(parse_line("rmmodule 0x01ff 0x0200").unwrap(), Command::RmModule { addrs: vec![0x01ff, 0x0200] });
    }

    #[test]
    fn rmmodule_requires_at_least_one_address() {
        assert!(matches!(parse_line("rmmodule"), Err(AdminError::MissingArgument("addr"))));
    }

    #[test]
    fn setport_classifies_token_kinds() {
        let cmd = parse_line("setport 1 IN_DIGITAL,INVERTED,A=0.5,unit=W").unwrap();
        match cmd {
            Command::SetPort { port, tokens } => {
                assert_eq!(port, 1);
                assert_eq!(
                    tokens,
                    vec![
                        SetportToken::PortType("IN_DIGITAL".into()),
                        SetportToken::PortOpt("INVERTED".into()),
                        SetportToken::Option { key: "A".into(), value: "0.5".into() },
                        SetportToken::Ha { key: "unit".into(), value: "W".into() },
                    ]
                );
            }
            _ => panic!("expected SetPort"),
        }
    }

    #[test]
    fn unknown_verb_is_reported() {
        assert!(matches!(parse_line("frobnicate"), Err(AdminError::UnknownCommand(_))));
    }

    #[test]
    fn setport_rejects_unrecognised_option_key() {
        assert!(matches!(parse_line("setport 1 BOGUS=1"), Err(AdminError::UnknownToken(_))));
    }
}

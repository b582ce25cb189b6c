//! Inbound commands to the control service.
//!
//! These represent actions requested by the host (operator console, a web
//! front end, a test harness) that the
//! [`ControlService`](super::service::ControlService) interprets and acts upon.

use core::str::FromStr;

use crate::config::SystemConfig;
use crate::model::RelayId;

/// Commands that the host can send into the controller core.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Force a relay on or off. Subject to the same no-op rule as automatic actuation.
    ManualOverride { relay: RelayId, on: bool },

    /// Replace the daylight window strings.
    UpdateSchedule { on: String, off: String },

    /// Hot-reload thresholds, hysteresis, humidity and schedule settings.
    /// Pin assignments only take effect after a restart.
    UpdateConfig(Box<SystemConfig>),
}

/// A console line that is not a recognised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(pub String);

impl core::fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "unrecognised command: {}", self.0)
    }
}

impl std::error::Error for ParseCommandError {}

/// Console syntax: `relay <id> on|off` or `schedule <HH:MM> <HH:MM>`.
impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = || ParseCommandError(line.trim().to_string());
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["relay", id, state] => {
                let relay = RelayId(id.parse().map_err(|_| bad())?);
                let on = match state.to_ascii_lowercase().as_str() {
                    "on" | "1" => true,
                    "off" | "0" => false,
                    _ => return Err(bad()),
                };
                Ok(Self::ManualOverride { relay, on })
            }
            ["schedule", on, off] => Ok(Self::UpdateSchedule {
                on: (*on).to_string(),
                off: (*off).to_string(),
            }),
            _ => Err(bad()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relay_override() {
        let cmd: Command = "relay 4 ON".parse().unwrap();
        assert_eq!(
            cmd,
            Command::ManualOverride {
                relay: RelayId(4),
                on: true
            }
        );
        let cmd: Command = "  relay 2 off ".parse().unwrap();
        assert_eq!(
            cmd,
            Command::ManualOverride {
                relay: RelayId(2),
                on: false
            }
        );
    }

    #[test]
    fn parses_schedule() {
        let cmd: Command = "schedule 20:00 06:00".parse().unwrap();
        assert_eq!(
            cmd,
            Command::UpdateSchedule {
                on: "20:00".into(),
                off: "06:00".into()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("relay x on".parse::<Command>().is_err());
        assert!("relay 1 maybe".parse::<Command>().is_err());
        assert!("reboot".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }
}

//! SSH connection-type variants
//!
//! A closed set: each variant determines the escalation protocol and which
//! extra options (sudo username, prompt pattern, PTY, umask override) are
//! meaningful. Behavior differences are match-based dispatch, not a class
//! hierarchy.

use std::str::FromStr;

use crate::error::TetherError;

/// How an SSH connection escalates privileges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshConnectionType {
    /// Commands run as the authenticated user
    Regular,
    /// Commands are wrapped in non-interactive `sudo -n`
    Sudo,
    /// One escalated shell is negotiated at connect time over a PTY,
    /// answering the sudo password prompt
    InteractiveSudo,
    /// Commands are wrapped in `su <user> -c`
    SuExec,
}

impl SshConnectionType {
    /// Whether this variant runs commands as another identity
    pub fn requires_escalation(&self) -> bool {
        !matches!(self, SshConnectionType::Regular)
    }

    /// Whether escalation is negotiated interactively at connect time.
    ///
    /// Only the interactive variant needs a terminal: without one there is
    /// no prompt to observe and answer. The other variants escalate by
    /// wrapping each command and never see a prompt.
    pub fn interactive(&self) -> bool {
        matches!(self, SshConnectionType::InteractiveSudo)
    }
}

impl FromStr for SshConnectionType {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REGULAR" => Ok(SshConnectionType::Regular),
            "SUDO" => Ok(SshConnectionType::Sudo),
            "INTERACTIVE_SUDO" => Ok(SshConnectionType::InteractiveSudo),
            "SUEXEC" => Ok(SshConnectionType::SuExec),
            other => Err(TetherError::UnknownConnectionType(other.to_string())),
        }
    }
}

impl std::fmt::Display for SshConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SshConnectionType::Regular => "REGULAR",
            SshConnectionType::Sudo => "SUDO",
            SshConnectionType::InteractiveSudo => "INTERACTIVE_SUDO",
            SshConnectionType::SuExec => "SUEXEC",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for name in ["REGULAR", "SUDO", "INTERACTIVE_SUDO", "SUEXEC"] {
            let parsed: SshConnectionType = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(
            "interactive_sudo".parse::<SshConnectionType>().unwrap(),
            SshConnectionType::InteractiveSudo
        );
    }

    #[test]
    fn test_unknown_type() {
        match "DOAS".parse::<SshConnectionType>() {
            Err(TetherError::UnknownConnectionType(name)) => assert_eq!(name, "DOAS"),
            other => panic!("expected UnknownConnectionType, got {:?}", other),
        }
    }

    #[test]
    fn test_variant_properties() {
        assert!(!SshConnectionType::Regular.requires_escalation());
        assert!(SshConnectionType::Sudo.requires_escalation());
        assert!(SshConnectionType::InteractiveSudo.interactive());
        assert!(!SshConnectionType::Sudo.interactive());
        assert!(!SshConnectionType::SuExec.interactive());
    }
}

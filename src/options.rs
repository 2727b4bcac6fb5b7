//! Connection options registry
//!
//! Typed, validated key/value configuration consumed by every transport
//! driver. Keys are declared in a static schema; setting an unknown or
//! mistyped key fails immediately, before any network I/O happens. Secret
//! values (passwords, key material) are wrapped so they never appear in
//! logs or debug output.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::error::{Result, TetherError};

/// Target host name or IP address.
pub const ADDRESS: &str = "address";
/// Transport port.
pub const PORT: &str = "port";
/// Username for primary authentication.
pub const USERNAME: &str = "username";
/// Password for primary authentication.
pub const PASSWORD: &str = "password";
/// OpenSSH private key content (alternative to [`PASSWORD`]).
pub const PRIVATE_KEY: &str = "private_key";
/// Operating system family of the host: `UNIX` or `WINDOWS`.
pub const OPERATING_SYSTEM: &str = "operating_system";
/// Connection type selecting the escalation variant.
pub const CONNECTION_TYPE: &str = "connection_type";
/// Identity to escalate to.
pub const SUDO_USERNAME: &str = "sudo_username";
/// Credential injected at the sudo prompt; falls back to [`PASSWORD`].
pub const SUDO_PASSWORD: &str = "sudo_password";
/// Pattern that detects the sudo password prompt in the output stream.
pub const SUDO_PASSWORD_PROMPT_REGEX: &str = "sudo_password_prompt_regex";
/// Extra credential injections allowed when the prompt reappears.
pub const SUDO_PASSWORD_PROMPT_RETRIES: &str = "sudo_password_prompt_retries";
/// Request a PTY for ordinary (non-escalated) commands.
pub const ALLOCATE_DEFAULT_PTY: &str = "allocate_default_pty";
/// Force a permissive umask inside escalated commands.
pub const SUDO_OVERRIDE_UMASK: &str = "sudo_override_umask";
/// Transport establishment timeout in milliseconds.
pub const CONNECTION_TIMEOUT_MS: &str = "connection_timeout_ms";
/// Read window for the escalation handshake in milliseconds.
pub const ESCALATION_TIMEOUT_MS: &str = "escalation_timeout_ms";
/// Base directory for temporary files on the host.
pub const TEMPORARY_DIRECTORY: &str = "temporary_directory";

/// Declared type of an option key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    /// String restricted to a declared value set (stored canonically uppercase)
    Enum(&'static [&'static str]),
    Secret,
    /// String that must compile as a regular expression
    Pattern,
}

impl OptionKind {
    fn name(&self) -> &'static str {
        match self {
            OptionKind::String => "string",
            OptionKind::Integer => "integer",
            OptionKind::Boolean => "boolean",
            OptionKind::Enum(_) => "enum",
            OptionKind::Secret => "secret",
            OptionKind::Pattern => "pattern",
        }
    }
}

struct OptionSpec {
    name: &'static str,
    kind: OptionKind,
    default: Option<&'static str>,
}

static SCHEMA: &[OptionSpec] = &[
    OptionSpec { name: ADDRESS, kind: OptionKind::String, default: None },
    OptionSpec { name: PORT, kind: OptionKind::Integer, default: Some("22") },
    OptionSpec { name: USERNAME, kind: OptionKind::String, default: None },
    OptionSpec { name: PASSWORD, kind: OptionKind::Secret, default: None },
    OptionSpec { name: PRIVATE_KEY, kind: OptionKind::Secret, default: None },
    OptionSpec {
        name: OPERATING_SYSTEM,
        kind: OptionKind::Enum(&["UNIX", "WINDOWS"]),
        default: Some("UNIX"),
    },
    OptionSpec {
        name: CONNECTION_TYPE,
        kind: OptionKind::Enum(&["REGULAR", "SUDO", "INTERACTIVE_SUDO", "SUEXEC"]),
        default: Some("REGULAR"),
    },
    OptionSpec { name: SUDO_USERNAME, kind: OptionKind::String, default: None },
    OptionSpec { name: SUDO_PASSWORD, kind: OptionKind::Secret, default: None },
    OptionSpec {
        name: SUDO_PASSWORD_PROMPT_REGEX,
        kind: OptionKind::Pattern,
        default: Some(".*[Pp]assword.*:"),
    },
    OptionSpec {
        name: SUDO_PASSWORD_PROMPT_RETRIES,
        kind: OptionKind::Integer,
        default: Some("0"),
    },
    OptionSpec { name: ALLOCATE_DEFAULT_PTY, kind: OptionKind::Boolean, default: Some("false") },
    OptionSpec { name: SUDO_OVERRIDE_UMASK, kind: OptionKind::Boolean, default: Some("false") },
    OptionSpec { name: CONNECTION_TIMEOUT_MS, kind: OptionKind::Integer, default: Some("30000") },
    OptionSpec { name: ESCALATION_TIMEOUT_MS, kind: OptionKind::Integer, default: Some("10000") },
    OptionSpec { name: TEMPORARY_DIRECTORY, kind: OptionKind::String, default: None },
];

fn spec_for(key: &str) -> Option<&'static OptionSpec> {
    SCHEMA.iter().find(|spec| spec.name == key)
}

/// A secret value that never shows up in logs or debug output.
///
/// The backing string is zeroed on drop.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(Zeroizing::new(value.into()))
    }

    /// Access the secret value. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret::new(value)
    }
}

/// A typed option value
#[derive(Debug, Clone)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Secret(Secret),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::String(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::String(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Integer(value)
    }
}

impl From<u16> for OptionValue {
    fn from(value: u16) -> Self {
        OptionValue::Integer(i64::from(value))
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Boolean(value)
    }
}

impl From<Secret> for OptionValue {
    fn from(value: Secret) -> Self {
        OptionValue::Secret(value)
    }
}

/// Ordered, schema-validated connection configuration.
///
/// Safe to log: `Debug` output redacts secret values.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    values: BTreeMap<&'static str, OptionValue>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, validating the value against the key's declared type.
    ///
    /// Fails on unknown keys, type mismatches, enum values outside the
    /// declared set, and patterns that do not compile.
    pub fn set(&mut self, key: &str, value: impl Into<OptionValue>) -> Result<()> {
        let spec = spec_for(key)
            .ok_or_else(|| TetherError::config(format!("Unknown connection option: {}", key)))?;
        let validated = coerce(spec, value.into())?;
        self.values.insert(spec.name, validated);
        Ok(())
    }

    /// Get the value for a key, falling back to the schema default.
    pub fn get(&self, key: &str) -> Result<Option<OptionValue>> {
        let spec = spec_for(key)
            .ok_or_else(|| TetherError::config(format!("Unknown connection option: {}", key)))?;
        if let Some(value) = self.values.get(spec.name) {
            return Ok(Some(value.clone()));
        }
        match spec.default {
            Some(text) => Ok(Some(parse_default(spec, text))),
            None => Ok(None),
        }
    }

    /// Get a string-typed option (string, enum, or pattern keys).
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.get(key)? {
            None => Ok(None),
            Some(OptionValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(type_error(key, "string", &other)),
        }
    }

    /// Get an integer-typed option.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key)? {
            None => Ok(None),
            Some(OptionValue::Integer(n)) => Ok(Some(n)),
            Some(other) => Err(type_error(key, "integer", &other)),
        }
    }

    /// Get a boolean-typed option.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key)? {
            None => Ok(None),
            Some(OptionValue::Boolean(b)) => Ok(Some(b)),
            Some(other) => Err(type_error(key, "boolean", &other)),
        }
    }

    /// Get a secret-typed option.
    pub fn get_secret(&self, key: &str) -> Result<Option<Secret>> {
        match self.get(key)? {
            None => Ok(None),
            Some(OptionValue::Secret(s)) => Ok(Some(s)),
            Some(other) => Err(type_error(key, "secret", &other)),
        }
    }

    /// Whether a value (or a default) is available for the key.
    pub fn is_set(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(Some(_)))
    }

    /// Validate that every listed key has a value or a default.
    ///
    /// Fails with a single configuration error enumerating all missing
    /// keys, not just the first.
    pub fn validate_required(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|key| !self.is_set(key))
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TetherError::config(format!(
                "Missing required connection options: {}",
                missing.join(", ")
            )))
        }
    }
}

fn coerce(spec: &OptionSpec, value: OptionValue) -> Result<OptionValue> {
    match (spec.kind, value) {
        (OptionKind::String, OptionValue::String(s)) => Ok(OptionValue::String(s)),
        (OptionKind::Integer, OptionValue::Integer(n)) => Ok(OptionValue::Integer(n)),
        (OptionKind::Boolean, OptionValue::Boolean(b)) => Ok(OptionValue::Boolean(b)),
        (OptionKind::Enum(allowed), OptionValue::String(s)) => {
            let canonical = s.to_ascii_uppercase();
            if allowed.contains(&canonical.as_str()) {
                Ok(OptionValue::String(canonical))
            } else {
                Err(TetherError::config(format!(
                    "Invalid value {:?} for {}: expected one of {}",
                    s,
                    spec.name,
                    allowed.join(", ")
                )))
            }
        }
        (OptionKind::Pattern, OptionValue::String(s)) => match regex::bytes::Regex::new(&s) {
            Ok(_) => Ok(OptionValue::String(s)),
            Err(e) => Err(TetherError::config(format!(
                "Invalid pattern for {}: {}",
                spec.name, e
            ))),
        },
        // Plain strings passed for secret keys are wrapped, never stored bare
        (OptionKind::Secret, OptionValue::Secret(s)) => Ok(OptionValue::Secret(s)),
        (OptionKind::Secret, OptionValue::String(s)) => Ok(OptionValue::Secret(Secret::new(s))),
        (kind, other) => Err(TetherError::config(format!(
            "Expected {} value for {}, got {}",
            kind.name(),
            spec.name,
            value_kind_name(&other)
        ))),
    }
}

fn parse_default(spec: &OptionSpec, text: &'static str) -> OptionValue {
    match spec.kind {
        OptionKind::Integer => OptionValue::Integer(text.parse().unwrap_or(0)),
        OptionKind::Boolean => OptionValue::Boolean(text == "true"),
        OptionKind::Secret => OptionValue::Secret(Secret::new(text)),
        _ => OptionValue::String(text.to_string()),
    }
}

fn value_kind_name(value: &OptionValue) -> &'static str {
    match value {
        OptionValue::String(_) => "string",
        OptionValue::Integer(_) => "integer",
        OptionValue::Boolean(_) => "boolean",
        OptionValue::Secret(_) => "secret",
    }
}

fn type_error(key: &str, expected: &str, got: &OptionValue) -> TetherError {
    TetherError::config(format!(
        "Expected {} value for {}, got {}",
        expected,
        key,
        value_kind_name(got)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut options = ConnectionOptions::new();
        options.set(ADDRESS, "host.example.com").unwrap();
        options.set(PORT, 2222u16).unwrap();
        options.set(ALLOCATE_DEFAULT_PTY, true).unwrap();

        assert_eq!(
            options.get_str(ADDRESS).unwrap().as_deref(),
            Some("host.example.com")
        );
        assert_eq!(options.get_int(PORT).unwrap(), Some(2222));
        assert_eq!(options.get_bool(ALLOCATE_DEFAULT_PTY).unwrap(), Some(true));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut options = ConnectionOptions::new();
        let err = options.set("no_such_key", "value").unwrap_err();
        assert!(err.to_string().contains("Unknown connection option"));
        assert!(options.get("no_such_key").is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut options = ConnectionOptions::new();
        let err = options.set(PORT, "not a port").unwrap_err();
        assert!(err.to_string().contains("Expected integer"));
    }

    #[test]
    fn test_enum_validation() {
        let mut options = ConnectionOptions::new();
        options.set(OPERATING_SYSTEM, "windows").unwrap();
        assert_eq!(
            options.get_str(OPERATING_SYSTEM).unwrap().as_deref(),
            Some("WINDOWS")
        );
        assert!(options.set(OPERATING_SYSTEM, "plan9").is_err());
    }

    #[test]
    fn test_pattern_must_compile() {
        let mut options = ConnectionOptions::new();
        options
            .set(SUDO_PASSWORD_PROMPT_REGEX, ".*[Pp]assword.*:")
            .unwrap();
        assert!(options.set(SUDO_PASSWORD_PROMPT_REGEX, "[unclosed").is_err());
    }

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::new();
        assert_eq!(options.get_int(PORT).unwrap(), Some(22));
        assert_eq!(
            options.get_str(CONNECTION_TYPE).unwrap().as_deref(),
            Some("REGULAR")
        );
        assert_eq!(options.get_str(ADDRESS).unwrap(), None);
        assert_eq!(options.get_int(SUDO_PASSWORD_PROMPT_RETRIES).unwrap(), Some(0));
    }

    #[test]
    fn test_validate_required_enumerates_all_missing() {
        let mut options = ConnectionOptions::new();
        options.set(ADDRESS, "host").unwrap();
        let err = options
            .validate_required(&[ADDRESS, USERNAME, PASSWORD])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(USERNAME));
        assert!(msg.contains(PASSWORD));
        assert!(!msg.contains("options: address"));
    }

    #[test]
    fn test_secret_never_in_debug_output() {
        let mut options = ConnectionOptions::new();
        options.set(PASSWORD, "hunter2").unwrap();
        let debug = format!("{:?}", options);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));

        let secret = options.get_secret(PASSWORD).unwrap().unwrap();
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_plain_string_wrapped_for_secret_keys() {
        let mut options = ConnectionOptions::new();
        options.set(SUDO_PASSWORD, "swordfish").unwrap();
        match options.get(SUDO_PASSWORD).unwrap() {
            Some(OptionValue::Secret(s)) => assert_eq!(s.expose(), "swordfish"),
            other => panic!("expected secret, got {:?}", other),
        }
    }
}

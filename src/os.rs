//! Operating system family model
//!
//! Path syntax, separators and executability semantics differ between the
//! UNIX and WINDOWS families. Every connection is bound to exactly one
//! family; remote file handles consult it for path composition.

use std::str::FromStr;

use crate::error::TetherError;

/// The operating system family of a remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystemFamily {
    Unix,
    Windows,
}

impl OperatingSystemFamily {
    /// Path separator character for this family
    pub fn path_separator(&self) -> char {
        match self {
            OperatingSystemFamily::Unix => '/',
            OperatingSystemFamily::Windows => '\\',
        }
    }

    /// Line separator for this family
    pub fn line_separator(&self) -> &'static str {
        match self {
            OperatingSystemFamily::Unix => "\n",
            OperatingSystemFamily::Windows => "\r\n",
        }
    }

    /// Conventional temporary directory for this family
    pub fn default_temp_dir(&self) -> &'static str {
        match self {
            OperatingSystemFamily::Unix => "/tmp",
            OperatingSystemFamily::Windows => "C:\\windows\\temp",
        }
    }

    /// Whether the family has a notion of an executable permission bit.
    ///
    /// WINDOWS does not; querying executability there is an error, not a
    /// `false`.
    pub fn supports_executable_check(&self) -> bool {
        matches!(self, OperatingSystemFamily::Unix)
    }

    /// Join a directory path and a child name.
    ///
    /// Pure string composition; does not touch the network and does not
    /// imply either path exists.
    pub fn join(&self, base: &str, name: &str) -> String {
        let sep = self.path_separator();
        if base.ends_with(sep) {
            format!("{}{}", base, name)
        } else {
            format!("{}{}{}", base, sep, name)
        }
    }

    /// The final component of a path
    pub fn file_name<'a>(&self, path: &'a str) -> &'a str {
        let trimmed = path.trim_end_matches(self.path_separator());
        match trimmed.rfind(self.path_separator()) {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// The parent of a path, or `None` for a filesystem root
    pub fn parent_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let sep = self.path_separator();
        let trimmed = path.trim_end_matches(sep);
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.rfind(sep) {
            Some(0) => Some(&path[..1]),
            Some(idx) => Some(&trimmed[..idx]),
            None => None,
        }
    }
}

impl FromStr for OperatingSystemFamily {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNIX" => Ok(OperatingSystemFamily::Unix),
            "WINDOWS" => Ok(OperatingSystemFamily::Windows),
            other => Err(TetherError::config(format!(
                "Unknown operating system family: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for OperatingSystemFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingSystemFamily::Unix => f.write_str("UNIX"),
            OperatingSystemFamily::Windows => f.write_str("WINDOWS"),
        }
    }
}

//! Shared host types

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Values exchanged with scripts (parameters, variables, pipeline output)
pub type Value = serde_json::Value;

/// Diagnostic severity, ordered from least to most important
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Verbose stream output
    #[default]
    Trace,
    /// Debug stream output
    Debug,
    /// Informational stream output
    Information,
    /// Warning stream output
    Warning,
    /// Error stream output and runtime faults
    Error,
}

impl Severity {
    /// Name used in structured log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Severity> for tracing::Level {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Trace => tracing::Level::TRACE,
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Information => tracing::Level::INFO,
            Severity::Warning => tracing::Level::WARN,
            Severity::Error => tracing::Level::ERROR,
        }
    }
}

/// How diagnostics produced during a run reach the log sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Collect every diagnostic and emit one record per run at the worst severity
    #[default]
    Bulk,
    /// Forward each diagnostic the moment it is produced
    Direct,
}

/// Execution policy applied to every session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    /// Script files and modules may be loaded
    #[default]
    Unrestricted,
    /// Only inline scripts and commands; no script files, no `eval`
    Restricted,
}

impl ExecutionPolicy {
    /// Returns true for [`ExecutionPolicy::Restricted`]
    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::Restricted)
    }
}

/// Text encoding of script files on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptEncoding {
    /// UTF-8, with an optional byte order mark
    #[default]
    Utf8,
    /// UTF-16 little endian, with an optional byte order mark
    Utf16Le,
    /// ISO-8859-1
    Latin1,
}

impl ScriptEncoding {
    /// Decode raw file contents into script text
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => {
                let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::validation(format!("Script is not valid UTF-8: {e}")))
            }
            Self::Utf16Le => {
                let bytes = bytes.strip_prefix(&[0xFF, 0xFE]).unwrap_or(bytes);
                if bytes.len() % 2 != 0 {
                    return Err(Error::validation(
                        "Script is not valid UTF-16: odd number of bytes",
                    ));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units)
                    .map_err(|e| Error::validation(format!("Script is not valid UTF-16: {e}")))
            }
            Self::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Read and decode a script file
    pub fn read_to_string(&self, path: impl AsRef<std::path::Path>) -> Result<String> {
        let bytes = std::fs::read(path.as_ref())?;
        self.decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Debug < Severity::Information);
        assert!(Severity::Information < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::default(), Severity::Trace);
    }

    #[test]
    fn test_log_mode_serde() {
        let mode: LogMode = serde_json::from_str("\"direct\"").unwrap();
        assert_eq!(mode, LogMode::Direct);
        assert_eq!(LogMode::default(), LogMode::Bulk);
    }

    #[test]
    fn test_decode_utf8_strips_bom() {
        let text = ScriptEncoding::Utf8
            .decode(&[0xEF, 0xBB, 0xBF, b'4', b'2'])
            .unwrap();
        assert_eq!(text, "42");
    }

    #[test]
    fn test_decode_utf16le() {
        let bytes = [0xFF, 0xFE, b'h', 0, b'i', 0];
        assert_eq!(ScriptEncoding::Utf16Le.decode(&bytes).unwrap(), "hi");
        assert!(ScriptEncoding::Utf16Le.decode(&[b'h']).is_err());
    }

    #[test]
    fn test_decode_latin1() {
        assert_eq!(ScriptEncoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]).unwrap(), "café");
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(ScriptEncoding::Utf8.decode(&[0xC3, 0x28]).is_err());
    }
}

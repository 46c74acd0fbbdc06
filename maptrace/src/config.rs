//! Tracer configuration

use crate::error::TracerError;
use crate::target::TargetSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default trace file name
pub const DEFAULT_OUTPUT: &str = "maptrace.out";

/// Startup configuration for a [`MemTracer`](crate::MemTracer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracerConfig {
    /// Binary trace output path
    pub output: PathBuf,
    /// Names of the routines to trace
    pub targets: Vec<String>,
    /// Optional text mirror of every record
    pub debug_output: Option<PathBuf>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            targets: Vec::new(),
            debug_output: None,
        }
    }
}

impl TracerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    /// Append a target routine name
    pub fn with_target(mut self, name: impl Into<String>) -> Self {
        self.targets.push(name.into());
        self
    }

    pub fn with_debug_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_output = Some(path.into());
        self
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, TracerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, TracerError> {
        let json = std::fs::read_to_string(path).map_err(|source| TracerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn target_set(&self) -> TargetSet {
        self.targets.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TracerConfig::default();
        assert_eq!(config.output, PathBuf::from("maptrace.out"));
        assert!(config.targets.is_empty());
        assert_eq!(config.debug_output, None);
    }

    #[test]
    fn test_builder_appends_targets() {
        let config = TracerConfig::new()
            .with_output("/tmp/trace.bin")
            .with_target("outer")
            .with_target("inner");
        assert_eq!(config.output, PathBuf::from("/tmp/trace.bin"));
        assert_eq!(config.targets, vec!["outer".to_string(), "inner".to_string()]);
        assert!(config.target_set().is_target("inner"));
    }

    #[test]
    fn test_json_partial() {
        let config = TracerConfig::from_json_str(r#"{ "targets": ["compress"] }"#).unwrap();
        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(config.targets, vec!["compress".to_string()]);
    }

    #[test]
    fn test_json_rejects_unknown_fields() {
        let err = TracerConfig::from_json_str(r#"{ "target": "compress" }"#).unwrap_err();
        assert!(matches!(err, TracerError::Config(_)));
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maptrace.json");
        std::fs::write(
            &path,
            r#"{ "output": "out.bin", "targets": ["a", "b"], "debug_output": "out.txt" }"#,
        )
        .unwrap();

        let config = TracerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.output, PathBuf::from("out.bin"));
        assert_eq!(config.debug_output, Some(PathBuf::from("out.txt")));
        assert_eq!(config.targets.len(), 2);

        let missing = TracerConfig::from_json_file(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(TracerError::ConfigRead { .. })));
    }
}

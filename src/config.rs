use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::foundation::core::validate_fps;
use crate::foundation::error::{StrandError, StrandResult};

/// Top-level server configuration, loaded from a JSON file.
///
/// Every field has a default, so an empty object `{}` is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub render: RenderConfig,
    pub store: StoreConfig,
    pub command: CommandConfig,
}

/// Render pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Target frame rate of the pipeline.
    pub fps: f64,
    /// Number of render worker threads.
    pub threads: usize,
    /// Capacity of the logical framebuffer, in pixels.
    pub framebuffer_pixels: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 42.0,
            threads: 2,
            framebuffer_pixels: 5000,
        }
    }
}

/// Entity store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strandcast-store.json"),
        }
    }
}

/// Command endpoint options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    /// Pretty-print reply JSON (for humans poking at the socket).
    pub human_readable_replies: bool,
}

impl Config {
    /// Parse a config from a JSON reader.
    pub fn from_reader<R: std::io::Read>(r: R) -> StrandResult<Self> {
        let cfg: Config = serde_json::from_reader(r)
            .map_err(|e| StrandError::config(format!("parse config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a config from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> StrandResult<Self> {
        let path = path.as_ref();
        let f = File::open(path)
            .map_err(|e| StrandError::config(format!("open config '{}': {e}", path.display())))?;
        Self::from_reader(BufReader::new(f))
    }

    /// Check value-level invariants the type system cannot express.
    pub fn validate(&self) -> StrandResult<()> {
        validate_fps(self.render.fps)?;
        if self.render.threads == 0 {
            return Err(StrandError::config("render.threads must be >= 1"));
        }
        if self.render.framebuffer_pixels == 0 {
            return Err(StrandError::config("render.framebuffer_pixels must be >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg = Config::from_reader("{}".as_bytes()).unwrap();
        assert_eq!(cfg.render.fps, 42.0);
        assert_eq!(cfg.render.threads, 2);
        assert_eq!(cfg.render.framebuffer_pixels, 5000);
        assert!(!cfg.command.human_readable_replies);
    }

    #[test]
    fn partial_render_section_keeps_other_defaults() {
        let cfg =
            Config::from_reader(r#"{"render": {"fps": 50.0, "threads": 4}}"#.as_bytes()).unwrap();
        assert_eq!(cfg.render.fps, 50.0);
        assert_eq!(cfg.render.threads, 4);
        assert_eq!(cfg.render.framebuffer_pixels, 5000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_reader(r#"{"renderer": {}}"#.as_bytes()).unwrap_err();
        assert!(matches!(err, StrandError::Config(_)));
    }

    #[test]
    fn zero_threads_is_rejected() {
        let err = Config::from_reader(r#"{"render": {"threads": 0}}"#.as_bytes()).unwrap_err();
        assert!(matches!(err, StrandError::Config(_)));
    }

    #[test]
    fn non_positive_fps_is_rejected() {
        let err = Config::from_reader(r#"{"render": {"fps": 0.0}}"#.as_bytes()).unwrap_err();
        assert!(matches!(err, StrandError::Config(_)));
    }
}

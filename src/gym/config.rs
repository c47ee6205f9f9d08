use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{EnvError, PhysiGymResult};

/// Pixels per inch used to turn `figsize` into a bitmap size.
pub const DPI: f64 = 100.0;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Every reset and step writes a PNG frame into the output folder.
    Human,
    /// `render()` returns the frame as an RGB array.
    RgbArray,
}

/// Construction parameters of a [`PhysiCellEnv`](crate::gym::env::PhysiCellEnv).
///
/// # Example
///
/// ```no_run
/// # use physigym::prelude::*;
/// let cfg = EnvConfig::default()
///     .with_settingxml("config/PhysiCell_settings.xml")
///     .with_render_mode(RenderMode::RgbArray)
///     .with_figsize(8.0, 6.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Path to the PhysiCell settings XML, relative to `workdir`.
    settingxml: PathBuf,

    /// Working directory. The settings' save folder is resolved against it.
    workdir: PathBuf,

    /// Figure size in inches, `(width, height)`.
    figsize: (f64, f64),

    render_mode: Option<RenderMode>,

    render_fps: u32,

    /// Log every step at `info` instead of `debug`.
    verbose: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            settingxml: PathBuf::from("config/PhysiCell_settings.xml"),
            workdir: PathBuf::from("."),
            figsize: (8.0, 6.0),
            render_mode: None,
            render_fps: 10,
            verbose: true,
        }
    }
}

impl EnvConfig {
    pub fn with_settingxml(self, path: impl Into<PathBuf>) -> Self {
        Self {
            settingxml: path.into(),
            ..self
        }
    }

    pub fn with_workdir(self, path: impl Into<PathBuf>) -> Self {
        Self {
            workdir: path.into(),
            ..self
        }
    }

    pub fn with_figsize(self, width: f64, height: f64) -> Self {
        Self {
            figsize: (width, height),
            ..self
        }
    }

    pub fn with_render_mode(self, mode: RenderMode) -> Self {
        Self {
            render_mode: Some(mode),
            ..self
        }
    }

    pub fn without_render(self) -> Self {
        Self {
            render_mode: None,
            ..self
        }
    }

    pub fn with_render_fps(self, fps: u32) -> Self {
        Self {
            render_fps: fps,
            ..self
        }
    }

    pub fn with_verbose(self, verbose: bool) -> Self {
        Self { verbose, ..self }
    }

    pub fn settingxml_path(&self) -> PathBuf {
        self.workdir.join(&self.settingxml)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn render_mode(&self) -> Option<RenderMode> {
        self.render_mode
    }

    pub fn render_fps(&self) -> u32 {
        self.render_fps
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Bitmap size in pixels at [`DPI`].
    pub fn frame_size(&self) -> (u32, u32) {
        let (w, h) = self.figsize;
        ((w * DPI).round() as u32, (h * DPI).round() as u32)
    }

    pub(crate) fn validate(&self) -> PhysiGymResult<()> {
        let (w, h) = self.figsize;
        if !(w > 0.0 && h > 0.0 && w.is_finite() && h.is_finite()) {
            return Err(EnvError::InvalidConfig(format!("figsize must be positive, got ({w}, {h})")).into());
        }
        if self.render_fps == 0 {
            return Err(EnvError::InvalidConfig("render_fps must be positive".to_string()).into());
        }
        Ok(())
    }
}

/// Static description of an environment, Gymnasium's `metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvMetadata {
    pub render_modes: Vec<RenderMode>,
    pub render_fps: u32,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_defaults_match_template() {
        let cfg = EnvConfig::default();
        assert_eq!(cfg.frame_size(), (800, 600));
        assert_eq!(cfg.render_mode(), None);
        assert_eq!(cfg.render_fps(), 10);
        assert!(cfg.verbose());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_render_mode_names() {
        assert_eq!(RenderMode::from_str("rgb_array").unwrap(), RenderMode::RgbArray);
        assert_eq!(RenderMode::Human.to_string(), "human");
    }

    #[test]
    fn test_invalid_figsize_is_rejected() {
        let cfg = EnvConfig::default().with_figsize(0.0, 6.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_settings_path_is_relative_to_workdir() {
        let cfg = EnvConfig::default()
            .with_workdir("/tmp/run")
            .with_settingxml("config/settings.xml");
        assert_eq!(
            cfg.settingxml_path(),
            PathBuf::from("/tmp/run/config/settings.xml")
        );
    }
}

// Persistent storage for the swerve module home angles
//
// A home angle is the raw absolute encoder reading that corresponds to the
// wheel pointing forward. All four are written and read together, in module
// order front-left, front-right, rear-right, rear-left, as whitespace
// separated decimal degrees.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::platform::ModuleSet;

/// Home angle per module (degrees)
pub type CalibrationOffsets = ModuleSet<f64>;

#[derive(Debug, thiserror::Error)]
pub enum HomingError {
    #[error("Could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed home positions in {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Home storage unavailable: {0}")]
    Unavailable(String),
}

/// Save/load capability for home angles
pub trait HomingStore: Send {
    /// Replace all four stored angles
    fn save(&mut self, offsets: &CalibrationOffsets) -> Result<(), HomingError>;

    /// `Ok(None)` when nothing has been stored yet (missing or empty backing)
    fn load(&mut self) -> Result<Option<CalibrationOffsets>, HomingError>;
}

/// Render offsets in the on-disk format
pub fn format_offsets(offsets: &CalibrationOffsets) -> String {
    format!(
        "{} {} {} {}\n",
        offsets.front_left, offsets.front_right, offsets.rear_right, offsets.rear_left
    )
}

/// Parse the on-disk format; `Ok(None)` for blank content
pub fn parse_offsets(contents: &str) -> Result<Option<CalibrationOffsets>, String> {
    let tokens: Vec<&str> = contents.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(None);
    }
    if tokens.len() != 4 {
        return Err(format!("expected 4 values, found {}", tokens.len()));
    }

    let mut values = [0.0f64; 4];
    for (value, token) in values.iter_mut().zip(&tokens) {
        let parsed: f64 = token
            .parse()
            .map_err(|e| format!("invalid angle {:?}: {}", token, e))?;
        if !parsed.is_finite() {
            return Err(format!("non-finite angle {:?}", token));
        }
        *value = parsed;
    }

    Ok(Some(ModuleSet::new(values[0], values[1], values[2], values[3])))
}

/// Home angles kept in a plain text file
#[derive(Debug, Clone)]
pub struct FileHomingStore {
    path: PathBuf,
}

impl FileHomingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.config/Swerve-Platform/moduleHomes`
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("Swerve-Platform")
                .join("moduleHomes"),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> HomingError {
        HomingError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl HomingStore for FileHomingStore {
    fn save(&mut self, offsets: &CalibrationOffsets) -> Result<(), HomingError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        // Write beside the target, then rename over it so readers never see a partial file
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, format_offsets(offsets)).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;

        info!("Saved home positions to {}", self.path.display());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<CalibrationOffsets>, HomingError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No home positions at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        parse_offsets(&contents).map_err(|reason| HomingError::Malformed {
            path: self.path.clone(),
            reason,
        })
    }
}

/// Volatile store for tests and simulation
#[derive(Debug, Clone, Default)]
pub struct MemoryHomingStore {
    stored: Option<CalibrationOffsets>,
    fail_saves: bool,
    fail_loads: bool,
}

impl MemoryHomingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offsets(offsets: CalibrationOffsets) -> Self {
        Self {
            stored: Some(offsets),
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Option<CalibrationOffsets> {
        self.stored
    }

    pub fn set_fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    pub fn set_fail_loads(&mut self, fail: bool) {
        self.fail_loads = fail;
    }
}

impl HomingStore for MemoryHomingStore {
    fn save(&mut self, offsets: &CalibrationOffsets) -> Result<(), HomingError> {
        if self.fail_saves {
            return Err(HomingError::Unavailable("save disabled".to_string()));
        }
        self.stored = Some(*offsets);
        Ok(())
    }

    fn load(&mut self) -> Result<Option<CalibrationOffsets>, HomingError> {
        if self.fail_loads {
            return Err(HomingError::Unavailable("load disabled".to_string()));
        }
        Ok(self.stored)
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use polars::prelude::{CsvWriter, DataFrame, LazyCsvReader, LazyFileListReader, PlPath, SerWriter};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{DataError, IoError, PhysiGymError, PhysiGymResult};

pub(crate) fn polars_err(what: &str, e: polars::error::PolarsError) -> PhysiGymError {
    DataError::DataFrame(format!("{what}: {e}")).into()
}

// ================================================================================================
// CSV
// ================================================================================================

pub fn write_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> PhysiGymResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let mut file = fs::File::create(path).map_err(|e| {
        IoError::WriteFailed(format!("Failed to create {}: {e}", path.display()))
    })?;

    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .map_err(|e| polars_err(&format!("Failed to write CSV to '{}'", path.display()), e))
}

pub fn read_csv(path: impl AsRef<Path>) -> PhysiGymResult<DataFrame> {
    let path = path.as_ref();
    let uri = path.to_str().ok_or_else(|| {
        IoError::FileSystem(format!(
            "Path contains invalid UTF-8 characters: {}",
            path.display()
        ))
    })?;

    LazyCsvReader::new(PlPath::new(uri))
        .with_has_header(true)
        .finish()
        .map_err(|e| polars_err(&format!("Failed to scan '{}'", path.display()), e))?
        .collect()
        .map_err(|e| polars_err(&format!("Failed to read '{}'", path.display()), e))
}

// ================================================================================================
// Directories
// ================================================================================================

pub fn ensure_dir(path: impl AsRef<Path>) -> PhysiGymResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            IoError::FileSystem(format!(
                "Failed to create directory {}: {e}",
                path.display()
            ))
        })?;
    }
    Ok(())
}

/// Removes `path` if present and creates it again, empty.
pub fn recreate_dir(path: impl AsRef<Path>) -> PhysiGymResult<()> {
    let path = path.as_ref();
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| {
            IoError::FileSystem(format!(
                "Failed to remove directory {}: {e}",
                path.display()
            ))
        })?;
    }
    ensure_dir(path)
}

/// Moves `src` to `dst` (replacing `dst`) and leaves an empty `src` behind.
pub fn archive_dir(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> PhysiGymResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    if dst.exists() {
        fs::remove_dir_all(dst).map_err(|e| {
            IoError::FileSystem(format!("Failed to remove {}: {e}", dst.display()))
        })?;
    }
    fs::rename(src, dst).map_err(|e| {
        IoError::FileSystem(format!(
            "Failed to move {} to {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    ensure_dir(src)
}

pub fn file_digest(path: impl AsRef<Path>) -> PhysiGymResult<String> {
    let bytes = fs::read(path.as_ref()).map_err(IoError::Io)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// ================================================================================================
// Episode Artifacts
// ================================================================================================

static EPISODE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)$").expect("static regex is valid"));

/// Files the drift harness leaves in its working directory.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Artifact {
    /// Archived raw output folder, `output###`.
    OutputDir,
    CellTable,
    ConcTable,
    Plot,
}

impl Artifact {
    pub fn prefix(&self, output: &str) -> String {
        match self {
            Self::OutputDir => output.to_string(),
            Self::CellTable => "timeseries_cell_episode".to_string(),
            Self::ConcTable => "timeseries_conc_episode".to_string(),
            Self::Plot => "timeseries_plot_episode".to_string(),
        }
    }

    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::OutputDir => None,
            Self::CellTable | Self::ConcTable => Some("csv"),
            Self::Plot => Some("png"),
        }
    }

    pub fn file_name(&self, output: &str, episode: u32) -> String {
        let stem = format!("{}{}", self.prefix(output), episode_tag(episode));
        match self.extension() {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }

    pub fn path(&self, workdir: &Path, output: &str, episode: u32) -> PathBuf {
        workdir.join(self.file_name(output, episode))
    }

    /// Parses the episode number back out of an artifact file name.
    pub fn parse_episode(&self, output: &str, file_name: &str) -> Option<u32> {
        let stem = match self.extension() {
            Some(ext) => file_name.strip_suffix(&format!(".{ext}"))?,
            None => file_name,
        };
        let digits = stem.strip_prefix(&self.prefix(output))?;
        EPISODE_NUMBER
            .captures(digits)
            .and_then(|c| c[1].parse().ok())
    }

    /// All artifacts of this kind in `workdir`, keyed by episode.
    pub fn scan(&self, workdir: &Path, output: &str) -> PhysiGymResult<Vec<(u32, PathBuf)>> {
        let entries = fs::read_dir(workdir).map_err(|e| {
            IoError::FileSystem(format!("Failed to list {}: {e}", workdir.display()))
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(IoError::Io)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(episode) = self.parse_episode(output, name) {
                found.push((episode, entry.path()));
            }
        }
        found.sort();
        Ok(found)
    }
}

/// Zero-padded episode label, e.g. `007`.
pub fn episode_tag(episode: u32) -> String {
    format!("{episode:03}")
}

/// Removes every artifact a previous drift run left in `workdir`.
pub fn remove_artifacts(workdir: &Path, output: &str) -> PhysiGymResult<usize> {
    use strum::IntoEnumIterator;

    let mut removed = 0;
    for artifact in Artifact::iter() {
        for (_, path) in artifact.scan(workdir, output)? {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| {
                IoError::FileSystem(format!("Failed to remove {}: {e}", path.display()))
            })?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub(crate) fn file_name_of(path: &Path) -> PhysiGymResult<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DataError::InvalidFileName(path.display().to_string()).into())
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    #[test]
    fn test_artifact_file_names() {
        assert_eq!(
            Artifact::CellTable.file_name("output", 1),
            "timeseries_cell_episode001.csv"
        );
        assert_eq!(
            Artifact::ConcTable.file_name("output", 12),
            "timeseries_conc_episode012.csv"
        );
        assert_eq!(
            Artifact::Plot.file_name("output", 0),
            "timeseries_plot_episode000.png"
        );
        assert_eq!(Artifact::OutputDir.file_name("output", 2), "output002");
    }

    #[test]
    fn test_parse_episode_round_trips_and_rejects_foreign_names() {
        assert_eq!(
            Artifact::ConcTable.parse_episode("output", "timeseries_conc_episode004.csv"),
            Some(4)
        );
        assert_eq!(Artifact::OutputDir.parse_episode("output", "output010"), Some(10));

        // The live output folder itself is not an archive.
        assert_eq!(Artifact::OutputDir.parse_episode("output", "output"), None);
        assert_eq!(
            Artifact::CellTable.parse_episode("output", "timeseries_conc_episode004.csv"),
            None
        );
        assert_eq!(
            Artifact::CellTable.parse_episode("output", "timeseries_cell_episodeX01.csv"),
            None
        );
    }

    #[test]
    fn test_csv_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/table.csv");

        let mut df = df!(
            "time" => &[0.0, 60.0],
            "cell_type" => &["tumor", "tumor"],
        )
        .unwrap();
        write_csv(&mut df, &path).expect("write should succeed");

        let back = read_csv(&path).expect("read should succeed");
        assert_eq!(back.shape(), (2, 2));
        assert_eq!(back.get_column_names_str(), vec!["time", "cell_type"]);
    }

    #[test]
    fn test_archive_dir_leaves_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("output");
        ensure_dir(&src).unwrap();
        fs::write(src.join("cells_00000000.csv"), "ID\n0\n").unwrap();

        let dst = dir.path().join("output000");
        archive_dir(&src, &dst).unwrap();

        assert!(dst.join("cells_00000000.csv").exists());
        assert!(src.exists());
        assert_eq!(fs::read_dir(&src).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_artifacts_only_touches_episode_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        ensure_dir(root.join("output")).unwrap();
        ensure_dir(root.join("output000")).unwrap();
        fs::write(root.join("timeseries_cell_episode000.csv"), "a\n").unwrap();
        fs::write(root.join("notes.txt"), "keep").unwrap();

        let removed = remove_artifacts(root, "output").unwrap();

        assert_eq!(removed, 2);
        assert!(root.join("output").exists());
        assert!(root.join("notes.txt").exists());
        assert!(!root.join("output000").exists());
    }
}

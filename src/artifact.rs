//! Destination checks, download and renaming of extract artifacts.
//!
//! The provider names files after the account's extract counter
//! (`cps_00012.dat.gz`, `cps_00012.xml`). After download, the one data file
//! and the one DDI codebook matching that convention are renamed to
//! `<stem>.<data-ext>` and `<stem>.xml`.
//!
//! All collision checks run in [`ArtifactTargets::preflight`], before any
//! remote work is requested. A [`DestinationLock`] keeps two runs from
//! renaming files in the same directory at once.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::error::ExtractError;
use crate::extract::{DataFormat, ExtractHandle, ExtractService};

/// Lock file created in the destination directory.
pub const LOCK_FILE_NAME: &str = ".ipums-extract.lock";

/// Extension of the DDI codebook file.
pub const DDI_EXTENSION: &str = "xml";

/// Final paths for one extract run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTargets {
    dir: PathBuf,
    collection: String,
    data_extension: &'static str,
    data_path: PathBuf,
    ddi_path: PathBuf,
}

/// Default-named files found after download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifacts {
    /// Provider-named data file.
    pub data: PathBuf,
    /// Provider-named DDI codebook.
    pub ddi: PathBuf,
}

/// Files left in place by a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedExtract {
    /// Renamed data file.
    pub data: PathBuf,
    /// Renamed DDI codebook.
    pub ddi: PathBuf,
}

impl ArtifactTargets {
    /// Computes the final paths for `stem` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Validation`] if `stem` is empty, contains a
    /// path separator, or is `.`/`..`.
    pub fn new(
        dir: impl Into<PathBuf>,
        collection: impl Into<String>,
        stem: &str,
        format: DataFormat,
    ) -> Result<Self, ExtractError> {
        let stem = stem.trim();
        if stem.is_empty() || stem == "." || stem == ".." || stem.contains(['/', '\\']) {
            return Err(ExtractError::validation(
                format!("invalid file name stem '{stem}'"),
                "Pass a plain name without directories, e.g. --name cps_16to24_2023",
            ));
        }
        let dir = dir.into();
        let data_extension = format.extension();
        Ok(Self {
            data_path: dir.join(format!("{stem}.{data_extension}")),
            ddi_path: dir.join(format!("{stem}.{DDI_EXTENSION}")),
            collection: collection.into(),
            data_extension,
            dir,
        })
    }

    /// Destination directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final data file path.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Final DDI codebook path.
    #[must_use]
    pub fn ddi_path(&self) -> &Path {
        &self.ddi_path
    }

    /// Glob-style description of the provider's data file name.
    #[must_use]
    pub fn data_pattern(&self) -> String {
        format!("{}_0*.{}", self.collection, self.data_extension)
    }

    /// Glob-style description of the provider's DDI file name.
    #[must_use]
    pub fn ddi_pattern(&self) -> String {
        format!("{}_0*.{DDI_EXTENSION}", self.collection)
    }

    /// Creates the destination directory if it does not exist.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Filesystem`] if the directory cannot be created.
    pub async fn ensure_dir(&self) -> Result<(), ExtractError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ExtractError::io(&self.dir, e))
    }

    /// Checks the destination before anything is requested remotely.
    ///
    /// Creates the directory if needed, refuses existing targets and
    /// refuses leftover provider-named files that would make the post
    /// download lookup ambiguous.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Filesystem`], [`ExtractError::FileExists`] or
    /// [`ExtractError::AmbiguousArtifact`].
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn preflight(&self) -> Result<(), ExtractError> {
        self.ensure_dir().await?;

        for target in [&self.data_path, &self.ddi_path] {
            let exists = tokio::fs::try_exists(target)
                .await
                .map_err(|e| ExtractError::io(target, e))?;
            if exists {
                return Err(ExtractError::file_exists(target));
            }
        }

        let (data, ddi) = self.scan_default_named().await?;
        if !data.is_empty() {
            return Err(ExtractError::ambiguous(
                "data",
                &self.dir,
                self.data_pattern(),
                data.len(),
            ));
        }
        if !ddi.is_empty() {
            return Err(ExtractError::ambiguous(
                "DDI",
                &self.dir,
                self.ddi_pattern(),
                ddi.len(),
            ));
        }
        debug!("destination is clear");
        Ok(())
    }

    /// Finds exactly one provider-named data file and DDI codebook.
    ///
    /// # Errors
    ///
    /// [`ExtractError::AmbiguousArtifact`] when more than one file matches,
    /// [`ExtractError::MissingArtifact`] when none does.
    pub async fn locate(&self) -> Result<LocatedArtifacts, ExtractError> {
        let (data, ddi) = self.scan_default_named().await?;
        let data = self.single("data", self.data_pattern(), data)?;
        let ddi = self.single("DDI", self.ddi_pattern(), ddi)?;
        Ok(LocatedArtifacts { data, ddi })
    }

    /// Renames located artifacts to their final names.
    ///
    /// If the codebook rename fails the data rename is undone, so either
    /// both final names exist or neither does.
    ///
    /// # Errors
    ///
    /// [`ExtractError::FileExists`] if a target appeared since preflight,
    /// [`ExtractError::Filesystem`] if a rename fails.
    pub async fn rename(&self, located: &LocatedArtifacts) -> Result<MaterializedExtract, ExtractError> {
        for target in [&self.data_path, &self.ddi_path] {
            if tokio::fs::try_exists(target).await.unwrap_or(false) {
                return Err(ExtractError::file_exists(target));
            }
        }

        tokio::fs::rename(&located.data, &self.data_path)
            .await
            .map_err(|e| ExtractError::io(&located.data, e))?;

        if let Err(error) = tokio::fs::rename(&located.ddi, &self.ddi_path).await {
            if let Err(rollback) = tokio::fs::rename(&self.data_path, &located.data).await {
                warn!(
                    path = %self.data_path.display(),
                    error = %rollback,
                    "could not restore data file name after failed codebook rename"
                );
            }
            return Err(ExtractError::io(&located.ddi, error));
        }

        info!(
            data = %self.data_path.display(),
            ddi = %self.ddi_path.display(),
            "extract files renamed"
        );
        Ok(MaterializedExtract {
            data: self.data_path.clone(),
            ddi: self.ddi_path.clone(),
        })
    }

    fn single(
        &self,
        artifact: &'static str,
        pattern: String,
        mut matches: Vec<PathBuf>,
    ) -> Result<PathBuf, ExtractError> {
        match matches.len() {
            0 => Err(ExtractError::missing_artifact(artifact, &self.dir, pattern)),
            1 => Ok(matches.remove(0)),
            count => Err(ExtractError::ambiguous(artifact, &self.dir, pattern, count)),
        }
    }

    async fn scan_default_named(&self) -> Result<(Vec<PathBuf>, Vec<PathBuf>), ExtractError> {
        let data_re = default_name_regex(&self.collection, self.data_extension)?;
        let ddi_re = default_name_regex(&self.collection, DDI_EXTENSION)?;

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ExtractError::io(&self.dir, e))?;
        let mut data = Vec::new();
        let mut ddi = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExtractError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if data_re.is_match(name) {
                data.push(entry.path());
            } else if ddi_re.is_match(name) {
                ddi.push(entry.path());
            }
        }
        data.sort();
        ddi.sort();
        Ok((data, ddi))
    }
}

fn default_name_regex(collection: &str, extension: &str) -> Result<Regex, ExtractError> {
    let pattern = format!(
        r"^{}_0\d*\.{}$",
        regex::escape(collection),
        regex::escape(extension)
    );
    Regex::new(&pattern).map_err(|e| {
        ExtractError::validation(
            format!("invalid artifact pattern for collection '{collection}': {e}"),
            "Use a plain collection name such as cps",
        )
    })
}

/// Downloads a completed extract and renames its files to `targets`.
///
/// # Errors
///
/// Propagates download errors from `service`, then the errors of
/// [`ArtifactTargets::locate`] and [`ArtifactTargets::rename`].
#[instrument(skip(service, targets), fields(extract = %handle, dir = %targets.dir().display()))]
pub async fn materialize(
    service: &dyn ExtractService,
    handle: ExtractHandle,
    targets: &ArtifactTargets,
) -> Result<MaterializedExtract, ExtractError> {
    let written = service.download(&handle, targets.dir()).await?;
    debug!(files = written.len(), "extract downloaded");
    let located = targets.locate().await?;
    targets.rename(&located).await
}

/// Exclusive advisory lock on a destination directory.
///
/// Released when dropped. The lock file itself is left in place.
#[derive(Debug)]
pub struct DestinationLock {
    file: File,
    path: PathBuf,
}

impl DestinationLock {
    /// Takes the lock for `dir` without waiting.
    ///
    /// # Errors
    ///
    /// [`ExtractError::DestinationBusy`] if another process holds it,
    /// [`ExtractError::Filesystem`] if the lock file cannot be opened.
    pub fn acquire(dir: &Path) -> Result<Self, ExtractError> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ExtractError::io(&path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "destination lock acquired");
                Ok(Self { file, path })
            }
            Err(error) if error.kind() == fs2::lock_contended_error().kind() => {
                Err(ExtractError::destination_busy(dir))
            }
            Err(error) => Err(ExtractError::io(&path, error)),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;

    fn targets(dir: &Path, stem: &str) -> ArtifactTargets {
        ArtifactTargets::new(dir, "cps", stem, DataFormat::FixedWidth).unwrap()
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_targets_paths_and_patterns() {
        let t = ArtifactTargets::new("/data", "cps", "t1", DataFormat::Csv).unwrap();
        assert_eq!(t.data_path(), Path::new("/data/t1.csv.gz"));
        assert_eq!(t.ddi_path(), Path::new("/data/t1.xml"));
        assert_eq!(t.data_pattern(), "cps_0*.csv.gz");
        assert_eq!(t.ddi_pattern(), "cps_0*.xml");
    }

    #[test]
    fn test_targets_reject_bad_stems() {
        for stem in ["", "  ", "..", "a/b", r"a\b"] {
            let err = ArtifactTargets::new("/data", "cps", stem, DataFormat::FixedWidth).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "stem {stem:?}");
        }
    }

    #[tokio::test]
    async fn test_preflight_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("datasets");
        targets(&dir, "t1").preflight().await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_preflight_rejects_existing_data_target() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "t1.dat.gz");
        let err = targets(temp.path(), "t1").preflight().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileExists);
    }

    #[tokio::test]
    async fn test_preflight_rejects_existing_ddi_target() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "t1.xml");
        let err = targets(temp.path(), "t1").preflight().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileExists);
    }

    #[tokio::test]
    async fn test_preflight_rejects_leftover_default_named_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "cps_00003.dat.gz");
        let err = targets(temp.path(), "t1").preflight().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousArtifact);
    }

    #[tokio::test]
    async fn test_preflight_ignores_unrelated_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "other.dat.gz");
        touch(temp.path(), "cps_00003.csv.gz");
        touch(temp.path(), "usa_00001.xml");
        targets(temp.path(), "t1").preflight().await.unwrap();
    }

    #[tokio::test]
    async fn test_locate_and_rename_success() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "cps_00012.dat.gz");
        touch(temp.path(), "cps_00012.xml");
        let t = targets(temp.path(), "t1");

        let located = t.locate().await.unwrap();
        assert!(located.data.ends_with("cps_00012.dat.gz"));
        let done = t.rename(&located).await.unwrap();

        assert_eq!(std::fs::read(&done.data).unwrap(), b"cps_00012.dat.gz");
        assert!(done.ddi.exists());
        assert!(!temp.path().join("cps_00012.dat.gz").exists());
        assert!(!temp.path().join("cps_00012.xml").exists());
    }

    #[tokio::test]
    async fn test_locate_multiple_matches_is_ambiguous() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "cps_00011.dat.gz");
        touch(temp.path(), "cps_00012.dat.gz");
        touch(temp.path(), "cps_00012.xml");
        let err = targets(temp.path(), "t1").locate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousArtifact);
    }

    #[tokio::test]
    async fn test_locate_missing_codebook() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "cps_00012.dat.gz");
        let err = targets(temp.path(), "t1").locate().await.unwrap_err();
        assert!(matches!(err, ExtractError::MissingArtifact { artifact: "DDI", .. }));
    }

    #[tokio::test]
    async fn test_rename_rolls_back_when_codebook_rename_fails() {
        let temp = TempDir::new().unwrap();
        let data = touch(temp.path(), "cps_00012.dat.gz");
        let t = targets(temp.path(), "t1");
        let located = LocatedArtifacts {
            data: data.clone(),
            ddi: temp.path().join("cps_00012.xml"),
        };

        let err = t.rename(&located).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Filesystem);
        assert!(data.exists(), "data rename must be rolled back");
        assert!(!t.data_path().exists());
    }

    #[test]
    fn test_destination_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let lock = DestinationLock::acquire(temp.path()).unwrap();
        assert!(lock.path().ends_with(LOCK_FILE_NAME));

        let err = DestinationLock::acquire(temp.path()).unwrap_err();
        assert!(matches!(err, ExtractError::DestinationBusy { .. }));

        drop(lock);
        assert!(DestinationLock::acquire(temp.path()).is_ok());
    }
}

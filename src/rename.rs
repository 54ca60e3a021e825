use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::discover::FileGroup;
use crate::metadata::{
    find_field, MetadataError, MetadataRecord, MetadataSource, FILE_DIRECTORY, FILE_NAME,
    FILE_TYPE_EXTENSION,
};
use crate::sanitize::{sanitize, SanitizationPolicy};

pub const TITLE_FIELD: &str = "Title";

pub const UNSUPPORTED_CHARACTERS: &str =
    "some characters are not supported on this filesystem, try again with --fat32-safe";

pub const NUL_IN_TITLE: &str = "title contains a NUL character, no filesystem accepts it";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("no files match the given FILE arguments")]
    NoFilesMatched,

    #[error("metadata tool {} not found", .0.display())]
    ToolNotFound(PathBuf),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::NoFilesMatched => 2,
            RunError::ToolNotFound(_) => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed {
        from: PathBuf,
        to: PathBuf,
        dry_run: bool,
    },
    Skipped {
        path: PathBuf,
        reason: String,
    },
    Failed {
        path: PathBuf,
        reason: String,
    },
}

impl RenameOutcome {
    fn skipped(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RenameOutcome::Skipped {
            path: path.into(),
            reason: reason.into(),
        }
    }

    fn failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RenameOutcome::Failed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<RenameOutcome>,
}

impl RunSummary {
    fn push(&mut self, outcome: RenameOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn renamed(&self) -> usize {
        self.count(|o| matches!(o, RenameOutcome::Renamed { dry_run: false, .. }))
    }

    pub fn simulated(&self) -> usize {
        self.count(|o| matches!(o, RenameOutcome::Renamed { dry_run: true, .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RenameOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RenameOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RenameOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// The destructive half of a run. Swapped out in tests.
pub trait FileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// True when both paths name the same file (e.g. a case-only rename on a
    /// case-insensitive filesystem).
    fn same_file(&self, a: &Path, b: &Path) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileOps;

impl FileOps for OsFileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    #[cfg(unix)]
    fn same_file(&self, a: &Path, b: &Path) -> bool {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
            _ => false,
        }
    }

    #[cfg(not(unix))]
    fn same_file(&self, a: &Path, b: &Path) -> bool {
        match (fs::canonicalize(a), fs::canonicalize(b)) {
            (Ok(ca), Ok(cb)) => ca.to_string_lossy().to_lowercase() == cb.to_string_lossy().to_lowercase(),
            _ => false,
        }
    }
}

/// EINVAL from rename(2) on FAT/NTFS mounts, or the Windows invalid-name error.
fn is_unsupported_name(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::InvalidInput || (cfg!(windows) && err.raw_os_error() == Some(123))
}

/// `title` sanitized under `policy`, plus the lowercased extension.
pub fn candidate_name(title: &str, extension: &str, policy: SanitizationPolicy) -> String {
    let stem = sanitize(title, policy);
    let extension = extension.trim();
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension.to_lowercase())
    }
}

fn source_key(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => path,
    }
}

/// Target names handed out so far in this run.
///
/// Dry runs never touch the disk, so the filesystem alone cannot tell that
/// two files want the same name. Both modes consult this first.
#[derive(Debug, Default)]
pub struct Claims {
    claimed: HashSet<PathBuf>,
    vacated: HashSet<PathBuf>,
}

impl Claims {
    fn claim(&mut self, from: &Path, to: &Path) {
        self.vacated.insert(from.to_path_buf());
        self.vacated.remove(to);
        self.claimed.insert(to.to_path_buf());
    }

    fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.contains(path)
    }

    fn is_vacated(&self, path: &Path) -> bool {
        self.vacated.contains(path)
    }
}

pub struct Renamer<'a, M, F> {
    config: &'a RunConfig,
    metadata: M,
    files: F,
}

impl<'a, M, F> Renamer<'a, M, F>
where
    M: MetadataSource,
    F: FileOps,
{
    pub fn new(config: &'a RunConfig, metadata: M, files: F) -> Self {
        Self {
            config,
            metadata,
            files,
        }
    }

    /// Rename every file of every group, in order.
    ///
    /// Only run-level problems come back as `Err`, and both are raised before
    /// the first file is touched. Everything per-file lands in the summary.
    pub fn run(&self, groups: &[FileGroup]) -> Result<RunSummary, RunError> {
        let total: usize = groups.iter().map(|g| g.files.len()).sum();
        info!("matched {} files to rename", total);
        if total == 0 {
            return Err(RunError::NoFilesMatched);
        }

        match self.metadata.probe() {
            Ok(version) => debug!(version = %version, "metadata tool ready"),
            Err(MetadataError::ToolNotFound { tool }) => return Err(RunError::ToolNotFound(tool)),
            Err(err) => warn!("metadata tool probe failed: {err}"),
        }

        let mut summary = RunSummary::default();
        let mut claims = Claims::default();
        for group in groups {
            self.process_group(group, &mut claims, &mut summary)?;
        }
        Ok(summary)
    }

    fn process_group(
        &self,
        group: &FileGroup,
        claims: &mut Claims,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        if group.files.is_empty() {
            debug!(pattern = %group.pattern, "no files for pattern");
            return Ok(());
        }
        debug!(
            pattern = %group.pattern,
            files = group.files.len(),
            fat32_safe = group.policy.fat32_safe,
            console_friendly = group.policy.console_friendly,
            "processing group"
        );

        let records = match self.metadata.read_batch(&group.files) {
            Ok(records) => records,
            Err(MetadataError::ToolNotFound { tool }) => return Err(RunError::ToolNotFound(tool)),
            Err(err) => {
                for path in &group.files {
                    error!(file = %path.display(), "cannot read metadata: {err}");
                    summary.push(RenameOutcome::failed(
                        path.clone(),
                        format!("cannot read metadata: {err}"),
                    ));
                }
                return Ok(());
            }
        };

        let mut reported = HashSet::new();
        for record in &records {
            if let Some(source) = record.source_file() {
                reported.insert(source_key(&source));
            }
            summary.push(self.process_record(record, group.policy, claims));
        }

        for path in &group.files {
            if !reported.contains(&source_key(&path.to_string_lossy())) {
                error!(file = %path.display(), "metadata tool returned nothing for this file");
                summary.push(RenameOutcome::failed(
                    path.clone(),
                    "metadata tool returned nothing for this file",
                ));
            }
        }
        Ok(())
    }

    /// Decide and carry out the rename for one file.
    pub fn process_record(
        &self,
        record: &MetadataRecord,
        policy: SanitizationPolicy,
        claims: &mut Claims,
    ) -> RenameOutcome {
        let fallback = record
            .source_file()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("<unknown>"));

        let mut required = Vec::with_capacity(3);
        for key in [FILE_DIRECTORY, FILE_NAME, FILE_TYPE_EXTENSION] {
            match record.get(key) {
                Some(value) if !value.is_empty() || key == FILE_TYPE_EXTENSION => {
                    required.push(value)
                }
                _ => {
                    error!(file = %fallback.display(), "metadata is missing {key}, will skip");
                    return RenameOutcome::failed(fallback, format!("metadata is missing {key}"));
                }
            }
        }
        let (dir, name, extension) = (&required[0], &required[1], &required[2]);
        let from = Path::new(dir).join(name);

        let titles = find_field(record, TITLE_FIELD);
        let Some(title) = titles.first() else {
            warn!(file = %from.display(), "no title field found, will skip");
            return RenameOutcome::skipped(from, "no title field");
        };
        if titles.len() > 1 {
            warn!(
                file = %from.display(),
                count = titles.len(),
                "more than one field contains the title, make sure the file is renamed correctly"
            );
        }
        if title.trim().is_empty() {
            warn!(file = %from.display(), "title is empty, will skip");
            return RenameOutcome::skipped(from, "title is empty");
        }

        let new_name = candidate_name(title, extension, policy);
        if &new_name == name {
            info!(file = %from.display(), "already named after its title");
            return RenameOutcome::skipped(from, "already named");
        }
        if new_name.contains('\0') {
            error!(file = %from.display(), "cannot rename file, {NUL_IN_TITLE}");
            return RenameOutcome::failed(from, NUL_IN_TITLE);
        }
        let to = Path::new(dir).join(&new_name);

        if claims.is_claimed(&to) {
            error!(file = %from.display(), target = %to.display(), "target is taken by an earlier file, will not overwrite");
            return RenameOutcome::failed(
                from,
                format!("target {} is taken by an earlier file", to.display()),
            );
        }
        let occupied = self.files.exists(&to) && !claims.is_vacated(&to);
        if occupied && !self.files.same_file(&from, &to) {
            error!(file = %from.display(), target = %to.display(), "target already exists, will not overwrite");
            return RenameOutcome::failed(from, format!("target {} already exists", to.display()));
        }

        info!("will rename file {} to {}", name, new_name);
        if self.config.dry_run {
            claims.claim(&from, &to);
            return RenameOutcome::Renamed {
                from,
                to,
                dry_run: true,
            };
        }

        // rename(2) replaces a target that appeared after the check above.
        // There is no portable no-replace rename, so that window stays open.
        match self.files.rename(&from, &to) {
            Ok(()) => {
                claims.claim(&from, &to);
                RenameOutcome::Renamed {
                    from,
                    to,
                    dry_run: false,
                }
            }
            Err(err) if is_unsupported_name(&err) => {
                error!(file = %from.display(), "cannot rename file, {UNSUPPORTED_CHARACTERS}");
                RenameOutcome::failed(from, UNSUPPORTED_CHARACTERS)
            }
            Err(err) => {
                error!(file = %from.display(), "cannot rename file: {err}");
                RenameOutcome::failed(from, err.to_string())
            }
        }
    }
}

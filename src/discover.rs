use glob::MatchOptions;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{FsPolicy, RunConfig};
use crate::fsdetect::{self, MountTable};
use crate::sanitize::SanitizationPolicy;

/// Files from one source pattern, renamed under one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub pattern: String,
    pub files: Vec<PathBuf>,
    pub policy: SanitizationPolicy,
}

/// Expand `$VAR`/`${VAR}` then `~`. Unknown variables stay as written.
pub fn expand_pattern(pattern: &str) -> String {
    let vars = shellexpand::env_with_context_no_errors(pattern, |var| std::env::var(var).ok());
    shellexpand::tilde(&*vars).into_owned()
}

/// Regular files matching an already expanded pattern.
///
/// `**` only descends into subdirectories when `recursive` is set; otherwise it
/// matches like a single `*`.
pub fn find_files(pattern: &str, recursive: bool) -> Vec<PathBuf> {
    let pattern: Cow<'_, str> = if recursive {
        Cow::Borrowed(pattern)
    } else {
        Cow::Owned(pattern.replace("**", "*"))
    };

    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let paths = match glob::glob_with(&pattern, options) {
        Ok(paths) => paths,
        Err(err) => {
            warn!(pattern = %pattern, "invalid file pattern: {err}");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(err) => warn!(pattern = %pattern, "cannot read {}: {}", err.path().display(), err.error()),
        }
    }
    files
}

/// The policy every file under `expanded` will be renamed with.
pub fn group_policy(
    expanded: &str,
    config: &RunConfig,
    table: &dyn MountTable,
) -> SanitizationPolicy {
    let policy = match config.fs_policy {
        FsPolicy::ForceFat32 => SanitizationPolicy::new(true, false),
        FsPolicy::Permissive => SanitizationPolicy::new(false, false),
        FsPolicy::Detect => {
            let label = fsdetect::detect_file_system(table, Path::new(expanded));
            debug!(pattern = expanded, fs = ?label, "filesystem for pattern");
            fsdetect::policy_from_filesystem(label.as_ref())
        }
    };
    policy.with_console_friendly(config.console_friendly)
}

pub fn collect_groups(
    patterns: &[String],
    config: &RunConfig,
    table: &dyn MountTable,
) -> Vec<FileGroup> {
    patterns
        .iter()
        .map(|raw| {
            let pattern = expand_pattern(raw);
            let policy = group_policy(&pattern, config, table);
            let files = find_files(&pattern, config.recursive);
            debug!(pattern = %pattern, files = files.len(), ?policy, "expanded pattern");
            FileGroup {
                pattern,
                files,
                policy,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsdetect::MountEntry;
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    struct CountingTable {
        label: &'static str,
        lookups: Cell<usize>,
    }

    impl CountingTable {
        fn new(label: &'static str) -> Self {
            Self {
                label,
                lookups: Cell::new(0),
            }
        }
    }

    impl MountTable for CountingTable {
        fn mounts(&self) -> Vec<MountEntry> {
            self.lookups.set(self.lookups.get() + 1);
            vec![MountEntry {
                mount_point: PathBuf::from("/"),
                file_system: self.label.to_string(),
            }]
        }

        fn is_mount_point(&self, path: &Path) -> bool {
            path.parent().is_none()
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, b"x").expect("write");
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn finds_only_regular_files() {
        let tmp = TempDir::new().expect("tempdir");
        touch(&tmp.path().join("a.mp4"));
        touch(&tmp.path().join("b.mkv"));
        fs::create_dir(tmp.path().join("dir.mp4")).expect("mkdir");

        let pattern = format!("{}/*", tmp.path().display());
        assert_eq!(names(&find_files(&pattern, false)), vec!["a.mp4", "b.mkv"]);
    }

    #[test]
    fn hidden_files_need_a_literal_dot() {
        let tmp = TempDir::new().expect("tempdir");
        touch(&tmp.path().join(".hidden.mp4"));
        touch(&tmp.path().join("shown.mp4"));

        let pattern = format!("{}/*.mp4", tmp.path().display());
        assert_eq!(names(&find_files(&pattern, false)), vec!["shown.mp4"]);
    }

    #[test]
    fn double_star_only_recurses_when_enabled() {
        let tmp = TempDir::new().expect("tempdir");
        touch(&tmp.path().join("top.mov"));
        touch(&tmp.path().join("season1/ep1.mov"));
        touch(&tmp.path().join("season1/extras/ep1b.mov"));

        let pattern = format!("{}/**/*.mov", tmp.path().display());
        assert_eq!(names(&find_files(&pattern, false)), vec!["ep1.mov"]);

        let mut deep = names(&find_files(&pattern, true));
        deep.sort();
        assert_eq!(deep, vec!["ep1.mov", "ep1b.mov", "top.mov"]);
    }

    #[test]
    fn invalid_pattern_yields_nothing() {
        assert!(find_files("[unterminated", false).is_empty());
    }

    #[test]
    fn expands_environment_and_leaves_unknown_vars() {
        std::env::set_var("VIDEO_RENAMER_TEST_DIR", "/videos");
        assert_eq!(
            expand_pattern("$VIDEO_RENAMER_TEST_DIR/*.mp4"),
            "/videos/*.mp4"
        );
        assert_eq!(
            expand_pattern("${VIDEO_RENAMER_TEST_DIR}/x"),
            "/videos/x"
        );
        assert_eq!(
            expand_pattern("$VIDEO_RENAMER_SURELY_UNSET/x"),
            "$VIDEO_RENAMER_SURELY_UNSET/x"
        );
    }

    #[test]
    fn forced_fat32_never_consults_the_mount_table() {
        let table = CountingTable::new("ext4");
        let config = RunConfig {
            fs_policy: FsPolicy::ForceFat32,
            console_friendly: true,
            ..RunConfig::default()
        };
        let policy = group_policy("/anywhere/*.mp4", &config, &table);
        assert_eq!(policy, SanitizationPolicy::new(true, true));
        assert_eq!(table.lookups.get(), 0);
    }

    #[test]
    fn disabled_detection_is_permissive() {
        let table = CountingTable::new("vfat");
        let config = RunConfig {
            fs_policy: FsPolicy::Permissive,
            ..RunConfig::default()
        };
        let policy = group_policy("/anywhere/*.mp4", &config, &table);
        assert_eq!(policy, SanitizationPolicy::new(false, false));
        assert_eq!(table.lookups.get(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn detection_drives_the_group_policy() {
        let config = RunConfig::default();

        let fat = CountingTable::new("vfat");
        assert!(group_policy("/media/*.mp4", &config, &fat).fat32_safe);
        assert_eq!(fat.lookups.get(), 1);

        let ext = CountingTable::new("ext4");
        assert!(!group_policy("/media/*.mp4", &config, &ext).fat32_safe);
    }

    #[test]
    fn groups_follow_pattern_order() {
        let tmp = TempDir::new().expect("tempdir");
        touch(&tmp.path().join("one/a.mp4"));
        touch(&tmp.path().join("two/b.mp4"));

        let patterns = vec![
            format!("{}/two/*.mp4", tmp.path().display()),
            format!("{}/one/*.mp4", tmp.path().display()),
            format!("{}/none/*.mp4", tmp.path().display()),
        ];
        let config = RunConfig {
            fs_policy: FsPolicy::Permissive,
            ..RunConfig::default()
        };
        let groups = collect_groups(&patterns, &config, &CountingTable::new("ext4"));

        assert_eq!(groups.len(), 3);
        assert_eq!(names(&groups[0].files), vec!["b.mp4"]);
        assert_eq!(names(&groups[1].files), vec!["a.mp4"]);
        assert!(groups[2].files.is_empty());
    }
}

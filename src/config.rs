use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

use crate::metadata::DEFAULT_EXIFTOOL;

/// Where the `fat32_safe` half of each group's policy comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsPolicy {
    /// Look up the filesystem under every source pattern.
    Detect,
    /// `--fat32-safe`: restrictive everywhere, detection never runs.
    ForceFat32,
    /// `--no-fs-detect`: permissive everywhere, detection never runs.
    Permissive,
}

impl FsPolicy {
    pub fn from_flags(fat32_safe: bool, no_fs_detect: bool) -> Self {
        if fat32_safe {
            FsPolicy::ForceFat32
        } else if no_fs_detect {
            FsPolicy::Permissive
        } else {
            FsPolicy::Detect
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Level(u8),
}

impl Verbosity {
    /// Quiet wins over any number of `-v`; a dry run shows at least info.
    pub fn from_flags(verbose: u8, quiet: bool, dry_run: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if dry_run {
            Verbosity::Level(verbose.max(1))
        } else {
            Verbosity::Level(verbose)
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::OFF,
            Verbosity::Level(0) => LevelFilter::WARN,
            Verbosity::Level(1) => LevelFilter::INFO,
            Verbosity::Level(_) => LevelFilter::DEBUG,
        }
    }

    pub fn is_quiet(self) -> bool {
        self == Verbosity::Quiet
    }
}

/// Everything one run needs, fixed before the first file is touched.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub console_friendly: bool,
    pub fs_policy: FsPolicy,
    pub recursive: bool,
    pub dry_run: bool,
    pub verbosity: Verbosity,
    pub exiftool: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            console_friendly: false,
            fs_policy: FsPolicy::Detect,
            recursive: false,
            dry_run: false,
            verbosity: Verbosity::Level(0),
            exiftool: PathBuf::from(DEFAULT_EXIFTOOL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fat32_flag_overrides_no_detect() {
        assert_eq!(FsPolicy::from_flags(true, true), FsPolicy::ForceFat32);
        assert_eq!(FsPolicy::from_flags(true, false), FsPolicy::ForceFat32);
        assert_eq!(FsPolicy::from_flags(false, true), FsPolicy::Permissive);
        assert_eq!(FsPolicy::from_flags(false, false), FsPolicy::Detect);
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(Verbosity::from_flags(0, false, false).level_filter(), LevelFilter::WARN);
        assert_eq!(Verbosity::from_flags(1, false, false).level_filter(), LevelFilter::INFO);
        assert_eq!(Verbosity::from_flags(2, false, false).level_filter(), LevelFilter::DEBUG);
        assert_eq!(Verbosity::from_flags(3, false, false).level_filter(), LevelFilter::DEBUG);
        assert_eq!(Verbosity::from_flags(5, false, false).level_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn dry_run_raises_verbosity_but_quiet_wins() {
        assert_eq!(Verbosity::from_flags(0, false, true), Verbosity::Level(1));
        assert_eq!(Verbosity::from_flags(2, false, true), Verbosity::Level(2));
        assert_eq!(Verbosity::from_flags(3, true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::Quiet.level_filter(), LevelFilter::OFF);
    }
}

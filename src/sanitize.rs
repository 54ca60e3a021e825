/// Replacement used for every character that cannot appear in the target name.
pub const REPLACEMENT: char = '_';

/// Characters FAT32, exFAT and NTFS refuse in file names (besides `/`).
pub const FAT32_FORBIDDEN: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Characters that need escaping in a POSIX shell, plus tab and space.
pub const CONSOLE_UNFRIENDLY: &[char] = &[
    '`', '~', '!', '#', '$', '&', '*', '(', ')', '\t', '[', ']', '{', '}', '|', '\\', ';', '\'',
    '"', '<', '>', '?', ' ',
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizationPolicy {
    pub fat32_safe: bool,
    pub console_friendly: bool,
}

impl SanitizationPolicy {
    pub fn new(fat32_safe: bool, console_friendly: bool) -> Self {
        Self {
            fat32_safe,
            console_friendly,
        }
    }

    pub fn with_console_friendly(self, console_friendly: bool) -> Self {
        Self {
            console_friendly,
            ..self
        }
    }
}

/// Turn a metadata title into a single path component.
///
/// Passes run in a fixed order: trim, `/`, FAT32 set, console set. Every
/// offending character becomes exactly one `_`; runs are not collapsed, and a
/// title made only of forbidden characters comes back as underscores.
pub fn sanitize(name: &str, policy: SanitizationPolicy) -> String {
    let mut out = replace_chars(name.trim(), &['/']);

    if policy.fat32_safe {
        out = replace_chars(&out, FAT32_FORBIDDEN);
    }

    if policy.console_friendly {
        out = replace_chars(&out, CONSOLE_UNFRIENDLY);
    }

    out
}

fn replace_chars(input: &str, forbidden: &[char]) -> String {
    input
        .chars()
        .map(|c| if forbidden.contains(&c) { REPLACEMENT } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERMISSIVE: SanitizationPolicy = SanitizationPolicy {
        fat32_safe: false,
        console_friendly: false,
    };
    const FAT32: SanitizationPolicy = SanitizationPolicy {
        fat32_safe: true,
        console_friendly: false,
    };
    const CONSOLE: SanitizationPolicy = SanitizationPolicy {
        fat32_safe: false,
        console_friendly: true,
    };
    const STRICT: SanitizationPolicy = SanitizationPolicy {
        fat32_safe: true,
        console_friendly: true,
    };

    const NASTY: &[&str] = &[
        "",
        "   plain title   ",
        "My: Trip/Home",
        "a/b\\c:d*e?f\"g<h>i|j",
        "rock & roll (live) [2019] {remaster}",
        "tab\there; semi 'quote' `tick` ~home !bang #hash $dollar",
        "////",
        "ünïcödé / 日本語: タイトル",
    ];

    #[test]
    fn permissive_only_touches_slashes() {
        for input in NASTY {
            let out = sanitize(input, PERMISSIVE);
            let expected: String = input
                .trim()
                .chars()
                .map(|c| if c == '/' { '_' } else { c })
                .collect();
            assert_eq!(out, expected, "input {input:?}");
        }
    }

    #[test]
    fn fat32_output_has_no_forbidden_characters() {
        for input in NASTY {
            let out = sanitize(input, FAT32);
            assert!(
                !out.contains(|c: char| FAT32_FORBIDDEN.contains(&c) || c == '/'),
                "{input:?} -> {out:?}"
            );
        }
    }

    #[test]
    fn console_output_has_no_shell_specials_or_spaces() {
        for input in NASTY {
            let out = sanitize(input, CONSOLE);
            assert!(
                !out.contains(|c: char| CONSOLE_UNFRIENDLY.contains(&c)),
                "{input:?} -> {out:?}"
            );
        }
    }

    #[test]
    fn sanitize_is_idempotent_for_every_policy() {
        for policy in [PERMISSIVE, FAT32, CONSOLE, STRICT] {
            for input in NASTY {
                let once = sanitize(input, policy);
                assert_eq!(sanitize(&once, policy), once, "{policy:?} {input:?}");
            }
        }
    }

    #[test]
    fn replacements_are_one_to_one_and_not_collapsed() {
        assert_eq!(sanitize("a::b", FAT32), "a__b");
        assert_eq!(sanitize("My: Trip/Home", FAT32), "My_ Trip_Home");
        assert_eq!(sanitize("My: Trip/Home", STRICT), "My__Trip_Home");
        assert_eq!(sanitize("<>|", FAT32), "___");
    }

    #[test]
    fn trimming_happens_before_replacement() {
        assert_eq!(sanitize("  spaced out  ", CONSOLE), "spaced_out");
        assert_eq!(sanitize("\tTabbed\n", CONSOLE), "Tabbed");
    }

    #[test]
    fn multibyte_characters_survive() {
        assert_eq!(
            sanitize("日本語: タイトル", FAT32),
            "日本語_ タイトル".to_string()
        );
    }
}

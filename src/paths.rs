//! Cross-platform path helpers for library-scoped operations.
//!
//! A library root may be Windows-style (`C:\Notes`) or POSIX-style
//! (`/home/me/notes`) independently of the OS the host runs on, so these
//! helpers work on strings and take the separator from the path itself.
//! Windows-style paths compare case-insensitively, POSIX paths compare
//! case-sensitively.

/// Check whether a path follows Windows conventions.
///
/// A path is Windows-style when it starts with a drive letter (`C:\`, `c:/`)
/// or contains any backslash.
pub fn is_windows_path(path: &str) -> bool {
    has_drive_prefix(path) || path.contains('\\')
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Separator used by a path: backslash if it contains one, slash otherwise.
pub fn path_separator(path: &str) -> char {
    if path.contains('\\') {
        '\\'
    } else {
        '/'
    }
}

/// Strip every trailing `/` or `\`.
pub fn trim_trailing_separators(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
}

/// Collapse runs of mixed separators into the path's own separator.
///
/// `C:\Notes//daily\\a.md` becomes `C:\Notes\daily\a.md`.
pub fn normalize_separators(path: &str) -> String {
    let sep = path_separator(path);
    let mut out = String::with_capacity(path.len());
    let mut last_was_sep = false;
    for ch in path.chars() {
        if ch == '/' || ch == '\\' {
            if !last_was_sep {
                out.push(sep);
            }
            last_was_sep = true;
        } else {
            out.push(ch);
            last_was_sep = false;
        }
    }
    out
}

/// Check whether `path` lies strictly inside `root`.
///
/// Both operands are normalized first and the root is compared with a
/// trailing separator, so `/lib` never contains `/library-other`. The check
/// ignores case when either side is Windows-style.
pub fn is_inside(root: &str, path: &str) -> bool {
    let root = root.trim();
    let path = path.trim();
    if root.is_empty() || path.is_empty() {
        return false;
    }
    let fold = is_windows_path(root) || is_windows_path(path);
    let mut base = comparable(root, fold);
    let candidate = comparable(path, fold);
    if !base.ends_with('/') {
        base.push('/');
    }
    candidate.starts_with(&base)
}

/// Normalize to `/` separators and optionally fold case.
fn comparable(path: &str, fold_case: bool) -> String {
    let unified = normalize_separators(path).replace('\\', "/");
    if fold_case {
        unified.to_lowercase()
    } else {
        unified
    }
}

/// Join a child segment onto a base using the base's separator.
///
/// Leading separators on the child are dropped and its inner separators are
/// rewritten to match the base.
pub fn join_path(base: &str, child: &str) -> String {
    let sep = path_separator(base);
    let child = child.trim_start_matches(['/', '\\']);
    let child: String = child
        .chars()
        .map(|c| if c == '/' || c == '\\' { sep } else { c })
        .collect();
    if child.is_empty() {
        return base.to_string();
    }
    if base.ends_with(['/', '\\']) {
        format!("{base}{child}")
    } else {
        format!("{base}{sep}{child}")
    }
}

/// Path of `absolute` relative to `base`, always `/`-separated.
///
/// Returns `None` when `absolute` is not under `base`. Returns an empty string
/// when both name the same directory.
pub fn relative_to(base: &str, absolute: &str) -> Option<String> {
    let fold = is_windows_path(base) || is_windows_path(absolute);
    let base = normalize_separators(trim_trailing_separators(base.trim())).replace('\\', "/");
    let absolute = normalize_separators(absolute.trim()).replace('\\', "/");

    let rest = strip_prefix_folded(&absolute, &base, fold)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_matches('/').to_string())
}

/// `path` without `prefix`, compared char by char so the remainder always
/// starts on a boundary of `path` even when case folding changes lengths.
fn strip_prefix_folded<'a>(path: &'a str, prefix: &str, fold_case: bool) -> Option<&'a str> {
    let mut chars = path.chars();
    for expected in prefix.chars() {
        let actual = chars.next()?;
        let same = if fold_case {
            actual.to_lowercase().eq(expected.to_lowercase())
        } else {
            actual == expected
        };
        if !same {
            return None;
        }
    }
    Some(chars.as_str())
}

/// Parent directory of a path, keeping its original separators.
///
/// Returns the input unchanged when it has no separator.
pub fn parent_dir(path: &str) -> &str {
    let trimmed = trim_trailing_separators(path);
    match trimmed.rfind(['/', '\\']) {
        Some(0) => &trimmed[..1],
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    }
}

/// Check whether a path is already absolute in either convention
/// (`/x`, `C:\x`, `\\server\share`).
pub fn is_absolute_like(path: &str) -> bool {
    path.starts_with('/') || path.starts_with("\\\\") || has_drive_prefix(path)
}

/// Canonical form of a library root used for stable keys.
///
/// Trailing separators are trimmed, backslashes become `/`, repeated slashes
/// collapse, and Windows-style roots are lowercased.
pub fn normalize_for_key(root: &str) -> String {
    let raw = root.trim();
    let windows = is_windows_path(raw);
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for ch in trim_trailing_separators(raw).chars() {
        if ch == '/' || ch == '\\' {
            if !last_was_sep {
                out.push('/');
            }
            last_was_sep = true;
        } else {
            out.push(ch);
            last_was_sep = false;
        }
    }
    if windows {
        out.to_lowercase()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_detection() {
        assert!(is_windows_path("C:\\Notes"));
        assert!(is_windows_path("d:/notes"));
        assert!(is_windows_path("notes\\daily"));
        assert!(!is_windows_path("/home/me/notes"));
        assert!(!is_windows_path("relative/path"));
    }

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_separators("/a//b///c"), "/a/b/c");
        assert_eq!(
            normalize_separators("C:\\Notes//daily\\\\a.md"),
            "C:\\Notes\\daily\\a.md"
        );
    }

    #[test]
    fn test_is_inside_rejects_sibling_prefix() {
        assert!(is_inside("/lib", "/lib/a.md"));
        assert!(!is_inside("/lib", "/library-other/a.md"));
        assert!(!is_inside("/lib", "/lib"));
    }

    #[test]
    fn test_is_inside_case_rules() {
        assert!(is_inside("C:\\Notes", "c:\\notes\\daily\\a.md"));
        assert!(is_inside("C:\\Notes\\", "C:/Notes/a.md"));
        assert!(!is_inside("/Notes", "/notes/a.md"));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/lib", "a/b.md"), "/lib/a/b.md");
        assert_eq!(join_path("/lib/", "/a.md"), "/lib/a.md");
        assert_eq!(join_path("C:\\lib", "img/x.png"), "C:\\lib\\img\\x.png");
        assert_eq!(join_path("/lib", ""), "/lib");
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/lib", "/lib/a/b.md").as_deref(), Some("a/b.md"));
        assert_eq!(relative_to("/lib/", "/lib").as_deref(), Some(""));
        assert_eq!(relative_to("/lib", "/library/a.md"), None);
        assert_eq!(
            relative_to("C:\\Lib", "c:\\lib\\Sub\\X.md").as_deref(),
            Some("Sub/X.md")
        );
        assert_eq!(relative_to("/Lib", "/lib/a.md"), None);
    }

    #[test]
    fn test_relative_to_non_ascii_windows_root() {
        assert_eq!(
            relative_to("C:\\Über\\Notizen", "c:\\über\\NOTIZEN\\Tag.md").as_deref(),
            Some("Tag.md")
        );
        // U+0130 grows by a byte when lowercased.
        assert_eq!(
            relative_to("C:\\\u{130}", "C:\\\u{130}\\a\\b.md").as_deref(),
            Some("a/b.md")
        );
        assert_eq!(relative_to("C:\\\u{130}x", "C:\\\u{130}\\x.md"), None);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/lib/notes/a.md"), "/lib/notes");
        assert_eq!(parent_dir("C:\\lib\\a.md"), "C:\\lib");
        assert_eq!(parent_dir("/a.md"), "/");
        assert_eq!(parent_dir("a.md"), "a.md");
    }

    #[test]
    fn test_absolute_like() {
        assert!(is_absolute_like("/x"));
        assert!(is_absolute_like("C:\\x"));
        assert!(is_absolute_like("\\\\server\\share"));
        assert!(!is_absolute_like("notes/x.md"));
    }

    #[test]
    fn test_normalize_for_key() {
        assert_eq!(normalize_for_key("/Lib//Notes/"), "/Lib/Notes");
        assert_eq!(normalize_for_key("C:\\Lib\\Notes\\"), "c:/lib/notes");
        assert_eq!(normalize_for_key("  /lib  "), "/lib");
    }
}

//! Library-scoped filesystem helpers.
//!
//! These functions do the IO behind the filesystem capabilities. They know
//! nothing about extensions; the capability context validates arguments,
//! supplies the library root and logs failures with the extension id.

use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use base64::Engine;
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use super::error::{ExtensionError, ExtensionResult};
use super::hash::LibraryKeyHasher;
use crate::paths::{
    is_inside, is_windows_path, join_path, parent_dir, path_separator, trim_trailing_separators,
};

/// Owned or borrowed bytes accepted by binary writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryData<'a>(Cow<'a, [u8]>);

impl BinaryData<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for BinaryData<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Cow::Owned(bytes))
    }
}

impl<'a> From<&'a [u8]> for BinaryData<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self(Cow::Borrowed(bytes))
    }
}

impl<'a> From<&'a Vec<u8>> for BinaryData<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self(Cow::Borrowed(bytes.as_slice()))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for BinaryData<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self(Cow::Borrowed(bytes.as_slice()))
    }
}

impl<const N: usize> From<[u8; N]> for BinaryData<'static> {
    fn from(bytes: [u8; N]) -> Self {
        Self(Cow::Owned(bytes.to_vec()))
    }
}

/// Trimmed, non-empty path argument.
pub fn require_path(path: &str) -> ExtensionResult<&str> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ExtensionError::Validation("path must not be empty".into()));
    }
    Ok(trimmed)
}

pub fn read_text_file(path: &str) -> ExtensionResult<String> {
    fs::read_to_string(path).map_err(|e| ExtensionError::io(format!("Failed to read {path}"), e))
}

pub fn write_text_file(path: &str, content: &str) -> ExtensionResult<()> {
    fs::write(path, content).map_err(|e| ExtensionError::io(format!("Failed to write {path}"), e))
}

/// Append to a file, creating it if needed. Empty content is a no-op.
pub fn append_text_file(path: &str, content: &str) -> ExtensionResult<()> {
    if content.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ExtensionError::io(format!("Failed to open {path}"), e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| ExtensionError::io(format!("Failed to append to {path}"), e))
}

pub fn read_file_binary(path: &str) -> ExtensionResult<Vec<u8>> {
    fs::read(path).map_err(|e| ExtensionError::io(format!("Failed to read {path}"), e))
}

pub fn write_file_binary(path: &str, data: &BinaryData<'_>) -> ExtensionResult<()> {
    fs::write(path, data.as_bytes())
        .map_err(|e| ExtensionError::io(format!("Failed to write {path}"), e))
}

pub fn ensure_dir(path: &str) -> ExtensionResult<()> {
    fs::create_dir_all(path)
        .map_err(|e| ExtensionError::io(format!("Failed to create directory {path}"), e))
}

/// Remove a file or directory. Non-empty directories need `recursive`.
pub fn remove_path(path: &str, recursive: bool) -> ExtensionResult<()> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| ExtensionError::io(format!("Failed to stat {path}"), e))?;
    let result = if meta.is_dir() {
        if recursive {
            fs::remove_dir_all(path)
        } else {
            fs::remove_dir(path)
        }
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| ExtensionError::io(format!("Failed to remove {path}"), e))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListOptions {
    /// Allowed file extensions; `None` uses the host default, empty allows all.
    pub extensions: Option<Vec<String>>,
    pub max_depth: Option<usize>,
    pub include_dirs: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryFile {
    pub path: String,
    /// Root-relative, `/`-separated.
    pub relative: String,
    pub name: String,
    /// Modification time in epoch milliseconds, 0 when unknown.
    pub mtime: u64,
}

/// Normalize directory prefixes: `/` separators, no leading `./` or
/// slashes, no trailing slash, duplicates dropped case-insensitively.
pub fn normalize_dir_prefixes(dirs: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for raw in dirs {
        let mut s = raw.trim().replace('\\', "/");
        while let Some(rest) = s.strip_prefix("./") {
            s = rest.to_string();
        }
        let s = s.trim_matches('/');
        let mut collapsed = String::with_capacity(s.len());
        for part in s.split('/').filter(|p| !p.is_empty()) {
            if !collapsed.is_empty() {
                collapsed.push('/');
            }
            collapsed.push_str(part);
        }
        if collapsed.is_empty() {
            continue;
        }
        let key = collapsed.to_lowercase();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(collapsed);
        }
    }
    out
}

/// Check whether `relative` equals one of `prefixes` or lies below one.
pub fn match_dir_prefix(relative: &str, prefixes: &[String], case_insensitive: bool) -> bool {
    let fold = |s: &str| {
        if case_insensitive {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    };
    let rel = fold(relative);
    prefixes.iter().any(|prefix| {
        let prefix = fold(prefix);
        rel == prefix || rel.starts_with(&format!("{prefix}/"))
    })
}

/// Whether a directory may contain included files: it is inside an include
/// prefix or an ancestor of one. The root itself is always in scope.
fn dir_in_include_scope(relative: &str, include: &[String], case_insensitive: bool) -> bool {
    if include.is_empty() || relative.is_empty() {
        return true;
    }
    if match_dir_prefix(relative, include, case_insensitive) {
        return true;
    }
    let rel = if case_insensitive {
        relative.to_lowercase()
    } else {
        relative.to_string()
    };
    include.iter().any(|prefix| {
        let prefix = if case_insensitive {
            prefix.to_lowercase()
        } else {
            prefix.clone()
        };
        prefix.starts_with(&format!("{rel}/"))
    })
}

fn relative_of(base: &Path, entry: &DirEntry) -> String {
    entry
        .path()
        .strip_prefix(base)
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

fn mtime_millis(entry: &DirEntry) -> u64 {
    entry
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Walk the library and return matching files sorted by relative path.
pub fn list_library_files(
    root: &str,
    options: &ListOptions,
    default_extensions: &[String],
    default_max_depth: usize,
) -> ExtensionResult<Vec<LibraryFile>> {
    let root = trim_trailing_separators(root.trim());
    if root.is_empty() {
        return Err(ExtensionError::NoLibraryOpen);
    }
    let base = Path::new(root);
    let case_insensitive = is_windows_path(root);

    let allowed: Vec<String> = options
        .extensions
        .as_deref()
        .unwrap_or(default_extensions)
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    let include = normalize_dir_prefixes(&options.include_dirs);
    let exclude = normalize_dir_prefixes(&options.exclude_dirs);
    let max_depth = options.max_depth.unwrap_or(default_max_depth);

    let walker = WalkDir::new(base)
        .min_depth(1)
        .max_depth(max_depth.saturating_add(1))
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            let rel = relative_of(base, entry);
            !match_dir_prefix(&rel, &exclude, case_insensitive)
                && dir_in_include_scope(&rel, &include, case_insensitive)
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable library entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let ext = Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !allowed.is_empty() && !allowed.contains(&ext) {
            continue;
        }

        let relative = relative_of(base, &entry);
        if match_dir_prefix(&relative, &exclude, case_insensitive) {
            continue;
        }
        if !include.is_empty() && !match_dir_prefix(&relative, &include, case_insensitive) {
            continue;
        }

        files.push(LibraryFile {
            path: entry.path().to_string_lossy().into_owned(),
            relative,
            name,
            mtime: mtime_millis(&entry),
        });
    }

    files.sort_by(|a, b| {
        a.relative
            .to_lowercase()
            .cmp(&b.relative.to_lowercase())
            .then_with(|| a.relative.cmp(&b.relative))
    });
    Ok(files)
}

/// What to do when the target file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    Error,
    #[default]
    #[serde(alias = "renameAuto")]
    RenameAuto,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFile {
    pub full_path: String,
    /// `sub_dir/name` or `name`, `/`-separated.
    pub relative_path: String,
}

/// Replace characters invalid in file names. Blank names become `fallback`.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Normalize an optional sub-directory to a `/`-separated relative path.
fn clean_sub_dir(sub_dir: Option<&str>) -> String {
    sub_dir
        .map(|s| {
            s.replace('\\', "/")
                .split('/')
                .filter(|p| !p.is_empty() && *p != "." && *p != "..")
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

/// Base directory for saves: the current document's directory when the
/// document lies inside the library, the library root otherwise.
pub fn save_base_dir(root: &str, current_file: Option<&str>) -> String {
    let root = trim_trailing_separators(root.trim());
    match current_file {
        Some(file) if is_inside(root, file) => parent_dir(file).to_string(),
        _ => root.to_string(),
    }
}

/// Pick the final file name in `dir` according to `policy`.
pub fn resolve_conflict(
    dir: &str,
    name: &str,
    policy: ConflictPolicy,
    max_attempts: u32,
) -> ExtensionResult<String> {
    let full = join_path(dir, name);
    if !Path::new(&full).exists() {
        return Ok(name.to_string());
    }
    match policy {
        ConflictPolicy::Overwrite => Ok(name.to_string()),
        ConflictPolicy::Error => Err(ExtensionError::TargetExists(PathBuf::from(full))),
        ConflictPolicy::RenameAuto => {
            let (stem, ext) = match name.rfind('.') {
                Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
                _ => (name, ""),
            };
            (1..=max_attempts)
                .map(|idx| format!("{stem}-{idx}{ext}"))
                .find(|candidate| !Path::new(&join_path(dir, candidate)).exists())
                .ok_or_else(|| ExtensionError::TargetExists(PathBuf::from(full)))
        }
    }
}

/// Parameters of a save into the current folder.
#[derive(Debug, Clone, Copy)]
pub struct SaveTarget<'a> {
    pub root: &'a str,
    pub current_file: Option<&'a str>,
    pub sub_dir: Option<&'a str>,
    pub file_name: &'a str,
    pub fallback_name: &'a str,
    pub on_conflict: ConflictPolicy,
    pub max_attempts: u32,
}

/// Write `data` next to the current document (or at the library root).
pub fn save_to_current_folder(target: SaveTarget<'_>, data: &[u8]) -> ExtensionResult<SavedFile> {
    let base = save_base_dir(target.root, target.current_file);
    let sub_dir = clean_sub_dir(target.sub_dir);
    let dir = if sub_dir.is_empty() {
        base
    } else {
        let dir = join_path(&base, &sub_dir);
        ensure_dir(&dir)?;
        dir
    };

    let name = sanitize_file_name(target.file_name, target.fallback_name);
    let name = resolve_conflict(&dir, &name, target.on_conflict, target.max_attempts)?;
    let full_path = join_path(&dir, &name);
    fs::write(&full_path, data)
        .map_err(|e| ExtensionError::io(format!("Failed to write {full_path}"), e))?;

    let relative_path = if sub_dir.is_empty() {
        name
    } else {
        format!("{sub_dir}/{name}")
    };
    Ok(SavedFile {
        full_path,
        relative_path,
    })
}

/// Last path segment of a URL, percent-decoded; `None` if there is none.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = match without_query.find("://") {
        Some(idx) => {
            let after_scheme = &without_query[idx + 3..];
            after_scheme.find('/').map_or("", |slash| &after_scheme[slash..])
        }
        None => without_query,
    };
    let segment = path.rsplit('/').find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

/// `<base>/<extension_id>/<hash(root)>`, created if missing.
pub fn plugin_data_dir(
    base: &Path,
    extension_id: &str,
    root: &str,
    hasher: LibraryKeyHasher,
) -> ExtensionResult<PathBuf> {
    let key = super::hash::hash_library_key_with(hasher, root);
    let dir = base.join(extension_id).join(key);
    fs::create_dir_all(&dir)
        .map_err(|e| ExtensionError::io("Failed to create plugin data directory", e))?;
    Ok(dir)
}

/// MIME type for an image path, by extension.
pub fn image_mime_type(path: &str) -> &'static str {
    let ext = path
        .rsplit(['/', '\\'])
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

pub fn read_image_as_data_url(path: &str) -> ExtensionResult<String> {
    let bytes = read_file_binary(path)?;
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{payload}", image_mime_type(path)))
}

/// Resolve a watch or file target against the library root. Paths that are
/// already absolute are kept.
pub fn resolve_in_library(root: &str, path: &str) -> String {
    if crate::paths::is_absolute_like(path) {
        path.to_string()
    } else {
        let sep = path_separator(root);
        let root = trim_trailing_separators(root);
        format!("{root}{sep}{}", path.trim_start_matches(['/', '\\']))
            .chars()
            .map(|c| if c == '/' || c == '\\' { sep } else { c })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    fn root_str(temp: &TempDir) -> String {
        temp.path().to_string_lossy().into_owned()
    }

    fn md() -> Vec<String> {
        vec!["md".to_string(), "markdown".to_string()]
    }

    fn relatives(files: &[LibraryFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative.as_str()).collect()
    }

    #[test]
    fn test_text_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("note.md").to_string_lossy().into_owned();

        for content in ["", "one line", "multi\nline\r\ntext\n"] {
            write_text_file(&path, content).unwrap();
            assert_eq!(read_text_file(&path).unwrap(), content);
        }
    }

    #[test]
    fn test_append_skips_empty_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log.txt").to_string_lossy().into_owned();

        append_text_file(&path, "").unwrap();
        assert!(!Path::new(&path).exists());

        append_text_file(&path, "a").unwrap();
        append_text_file(&path, "b\n").unwrap();
        assert_eq!(read_text_file(&path).unwrap(), "ab\n");
    }

    #[test]
    fn test_binary_data_conversions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("b.bin").to_string_lossy().into_owned();
        let owned = vec![1_u8, 2, 3];

        write_file_binary(&path, &BinaryData::from(&owned)).unwrap();
        assert_eq!(read_file_binary(&path).unwrap(), owned);
        write_file_binary(&path, &BinaryData::from([9_u8, 8])).unwrap();
        assert_eq!(read_file_binary(&path).unwrap(), vec![9, 8]);
        write_file_binary(&path, &BinaryData::from(&b"hi"[..])).unwrap();
        assert_eq!(read_file_binary(&path).unwrap(), b"hi".to_vec());
    }

    #[test]
    fn test_remove_path_recursive_flag() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "dir/inner.md");
        let dir = temp.path().join("dir").to_string_lossy().into_owned();

        assert!(remove_path(&dir, false).is_err());
        remove_path(&dir, true).unwrap();
        assert!(!Path::new(&dir).exists());
        assert!(remove_path(&dir, true).is_err());
    }

    #[test]
    fn test_require_path() {
        assert!(require_path("   ").is_err());
        assert_eq!(require_path(" /a.md ").unwrap(), "/a.md");
    }

    #[test]
    fn test_list_excludes_directories() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.md");
        touch(temp.path(), "drafts/b.md");
        touch(temp.path(), "notes/c.md");
        touch(temp.path(), "notes/image.png");

        let options = ListOptions {
            exclude_dirs: vec!["drafts".into()],
            ..Default::default()
        };
        let files = list_library_files(&root_str(&temp), &options, &md(), 32).unwrap();
        assert_eq!(relatives(&files), vec!["a.md", "notes/c.md"]);
        assert_eq!(files[1].name, "c.md");
        assert!(files[1].mtime > 0);
    }

    #[test]
    fn test_list_include_scope() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.md");
        touch(temp.path(), "notes/x.md");
        touch(temp.path(), "notes/deep/y.md");
        touch(temp.path(), "other/z.md");

        let options = ListOptions {
            include_dirs: vec!["./notes/deep/".into()],
            ..Default::default()
        };
        let files = list_library_files(&root_str(&temp), &options, &md(), 32).unwrap();
        assert_eq!(relatives(&files), vec!["notes/deep/y.md"]);
    }

    #[test]
    fn test_list_depth_extensions_and_order() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "B.md");
        touch(temp.path(), "a.MD");
        touch(temp.path(), "c.txt");
        touch(temp.path(), "sub/d.md");

        let shallow = ListOptions {
            max_depth: Some(0),
            ..Default::default()
        };
        let files = list_library_files(&root_str(&temp), &shallow, &md(), 32).unwrap();
        assert_eq!(relatives(&files), vec!["a.MD", "B.md"]);

        let all = ListOptions {
            extensions: Some(vec![]),
            ..Default::default()
        };
        let files = list_library_files(&root_str(&temp), &all, &md(), 32).unwrap();
        assert_eq!(relatives(&files), vec!["a.MD", "B.md", "c.txt", "sub/d.md"]);
    }

    #[test]
    fn test_prefix_helpers() {
        let prefixes = normalize_dir_prefixes(&[
            "./Notes//Daily/".into(),
            "notes/daily".into(),
            "\\archive".into(),
            "  ".into(),
        ]);
        assert_eq!(prefixes, vec!["Notes/Daily", "archive"]);

        assert!(match_dir_prefix("Notes/Daily/x.md", &prefixes, false));
        assert!(!match_dir_prefix("notes/daily/x.md", &prefixes, false));
        assert!(match_dir_prefix("notes/daily/x.md", &prefixes, true));
        assert!(!match_dir_prefix("archived/x.md", &prefixes, true));
        assert!(dir_in_include_scope("Notes", &prefixes, false));
        assert!(!dir_in_include_scope("Other", &prefixes, false));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c*?.png", "file.bin"), "a_b_c__.png");
        assert_eq!(sanitize_file_name("  ", "download"), "download");
    }

    #[test]
    fn test_rename_auto() {
        let temp = TempDir::new().unwrap();
        let root = root_str(&temp);
        let target = SaveTarget {
            root: &root,
            current_file: None,
            sub_dir: None,
            file_name: "x.png",
            fallback_name: "file.bin",
            on_conflict: ConflictPolicy::RenameAuto,
            max_attempts: 10_000,
        };

        let first = save_to_current_folder(target, b"1").unwrap();
        let second = save_to_current_folder(target, b"2").unwrap();
        assert_eq!(first.relative_path, "x.png");
        assert_eq!(second.relative_path, "x-1.png");
        assert_eq!(fs::read(&first.full_path).unwrap(), b"1");
    }

    #[test]
    fn test_conflict_policies() {
        let temp = TempDir::new().unwrap();
        let root = root_str(&temp);
        touch(temp.path(), "x.png");

        assert!(matches!(
            resolve_conflict(&root, "x.png", ConflictPolicy::Error, 10),
            Err(ExtensionError::TargetExists(_))
        ));
        assert_eq!(
            resolve_conflict(&root, "x.png", ConflictPolicy::Overwrite, 10).unwrap(),
            "x.png"
        );
        touch(temp.path(), "README");
        assert_eq!(
            resolve_conflict(&root, "README", ConflictPolicy::RenameAuto, 10).unwrap(),
            "README-1"
        );
        touch(temp.path(), "x-1.png");
        assert_eq!(
            resolve_conflict(&root, "x.png", ConflictPolicy::RenameAuto, 2).unwrap(),
            "x-2.png"
        );
        touch(temp.path(), "x-2.png");
        assert!(resolve_conflict(&root, "x.png", ConflictPolicy::RenameAuto, 2).is_err());
    }

    #[test]
    fn test_conflict_policy_names() {
        for (name, policy) in [
            ("\"rename-auto\"", ConflictPolicy::RenameAuto),
            ("\"renameAuto\"", ConflictPolicy::RenameAuto),
            ("\"overwrite\"", ConflictPolicy::Overwrite),
            ("\"error\"", ConflictPolicy::Error),
        ] {
            assert_eq!(serde_json::from_str::<ConflictPolicy>(name).unwrap(), policy);
        }
        assert!(serde_json::from_str::<ConflictPolicy>("\"rename\"").is_err());
    }

    #[test]
    fn test_save_next_to_current_document_with_sub_dir() {
        let temp = TempDir::new().unwrap();
        let root = root_str(&temp);
        touch(temp.path(), "notes/doc.md");
        let doc = temp.path().join("notes").join("doc.md");
        let doc = doc.to_string_lossy();

        let saved = save_to_current_folder(
            SaveTarget {
                root: &root,
                current_file: Some(&doc),
                sub_dir: Some("assets/img"),
                file_name: "",
                fallback_name: "file.bin",
                on_conflict: ConflictPolicy::RenameAuto,
                max_attempts: 10,
            },
            b"data",
        )
        .unwrap();
        assert_eq!(saved.relative_path, "assets/img/file.bin");
        assert!(temp.path().join("notes/assets/img/file.bin").exists());
    }

    #[test]
    fn test_save_base_dir_outside_library() {
        assert_eq!(save_base_dir("/lib/", Some("/elsewhere/a.md")), "/lib");
        assert_eq!(save_base_dir("/lib", Some("/lib/n/a.md")), "/lib/n");
        assert_eq!(save_base_dir("/lib", None), "/lib");
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://x.org/a/My%20Pic.png?size=2#top").as_deref(),
            Some("My Pic.png")
        );
        assert_eq!(file_name_from_url("https://x.org/"), None);
        assert_eq!(file_name_from_url("https://x.org"), None);
    }

    #[test]
    fn test_plugin_data_dir_is_stable() {
        let temp = TempDir::new().unwrap();
        let a = plugin_data_dir(temp.path(), "ext", "/Lib/", LibraryKeyHasher::Fnv1a).unwrap();
        let b = plugin_data_dir(temp.path(), "ext", "/Lib", LibraryKeyHasher::Fnv1a).unwrap();
        assert_eq!(a, b);
        assert!(a.is_dir());
        assert_eq!(a.file_name().unwrap().len(), 8);
    }

    #[test]
    fn test_image_data_url() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dot.PNG");
        fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let url = read_image_as_data_url(&path.to_string_lossy()).unwrap();
        assert_eq!(url, "data:image/png;base64,iVBORw==");
        assert_eq!(image_mime_type("/x/icon.ico"), "image/x-icon");
        assert_eq!(image_mime_type("/x.y/noext"), "application/octet-stream");
    }

    #[test]
    fn test_resolve_in_library() {
        assert_eq!(resolve_in_library("/lib", "notes/a"), "/lib/notes/a");
        assert_eq!(resolve_in_library("C:\\lib\\", "notes/a"), "C:\\lib\\notes\\a");
        assert_eq!(resolve_in_library("/lib", "/abs"), "/abs");
    }
}

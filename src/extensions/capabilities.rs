//! Capability groups handed to extensions.
//!
//! [`CapabilityContext`](super::context::CapabilityContext) implements every
//! trait here. Host code that only needs one group can take `&dyn` of that
//! trait instead of the whole context.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::api::PluginApi;
use super::collaborators::{FileFilter, NoticeLevel, NotificationOptions, Selection};
use super::context::{DockPanelHandle, Registration};
use super::dock::DockPanelOptions;
use super::error::ExtensionResult;
use super::fs::{BinaryData, ConflictPolicy, LibraryFile, ListOptions, SavedFile};
use super::menu::MenuItemDescriptor;
use super::storage::ExtensionStorage;
use super::watch::{WatchCallback, WatchOptions};

/// Where and how a file is saved into the current folder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveOptions {
    /// Sub-directory of the target folder, created on demand.
    pub sub_dir: Option<String>,
    pub on_conflict: ConflictPolicy,
}

pub type SelectionListener = Box<dyn Fn(&Selection)>;

/// Files under (and outside) the library root.
///
/// Paths must be non-empty after trimming. `exists`, `ensure_dir` and
/// `remove_path` report failure as `false`; everything else returns the
/// error.
pub trait FilesystemCapability {
    fn read_text_file(&self, path: &str) -> ExtensionResult<String>;
    fn write_text_file(&self, path: &str, content: &str) -> ExtensionResult<()>;
    /// Empty content skips the write.
    fn append_text_file(&self, path: &str, content: &str) -> ExtensionResult<()>;
    fn read_file_binary(&self, path: &str) -> ExtensionResult<Vec<u8>>;
    fn write_file_binary(&self, path: &str, data: BinaryData<'_>) -> ExtensionResult<()>;
    fn exists(&self, path: &str) -> bool;
    fn ensure_dir(&self, path: &str) -> bool;
    fn remove_path(&self, path: &str, recursive: bool) -> bool;
    fn list_library_files(&self, options: &ListOptions) -> ExtensionResult<Vec<LibraryFile>>;
    fn save_binary_to_current_folder(
        &self,
        file_name: &str,
        data: BinaryData<'_>,
        options: &SaveOptions,
    ) -> ExtensionResult<SavedFile>;
    fn download_file_to_current_folder(
        &self,
        url: &str,
        file_name: Option<&str>,
        options: &SaveOptions,
    ) -> ExtensionResult<SavedFile>;
    /// Returns the full path written.
    fn save_markdown_to_current_folder(
        &self,
        file_name: &str,
        content: &str,
        on_conflict: ConflictPolicy,
    ) -> ExtensionResult<String>;
    fn read_image_as_data_url(&self, path: &str) -> ExtensionResult<String>;
    /// Per-extension, per-library data directory.
    fn plugin_data_dir(&self) -> ExtensionResult<PathBuf>;
}

pub trait WatchCapability {
    fn watch_library(
        &self,
        callback: WatchCallback,
        options: WatchOptions,
    ) -> ExtensionResult<Registration>;
    fn watch_paths(
        &self,
        paths: &[&str],
        callback: WatchCallback,
        options: WatchOptions,
    ) -> ExtensionResult<Registration>;
}

pub trait StorageCapability {
    fn storage(&self) -> &ExtensionStorage;
}

pub trait MenuCapability {
    /// One top-level entry per activation; later calls get a no-op handle.
    fn add_menu_item(&self, descriptor: MenuItemDescriptor) -> Registration;
    fn add_context_menu_item(&self, descriptor: MenuItemDescriptor) -> Registration;
}

pub trait DockCapability {
    fn register_panel(&self, panel_id: &str, options: DockPanelOptions) -> DockPanelHandle;
}

pub trait ApiCapability {
    fn register_api(&self, namespace: &str, api: PluginApi) -> ExtensionResult<()>;
    fn get_plugin_api(&self, namespace: &str) -> Option<PluginApi>;
}

/// Read-only queries and narrow setters on the open document.
pub trait DocumentCapability {
    fn editor_text(&self) -> String;
    fn set_editor_text(&self, text: &str);
    fn selection(&self) -> Selection;
    fn selected_text(&self) -> String;
    fn replace_range(&self, start: usize, end: usize, text: &str);
    fn insert_at_cursor(&self, text: &str);
    fn current_file_path(&self) -> Option<String>;
    fn library_root(&self) -> Option<String>;
    fn front_matter_raw(&self) -> Option<String>;
    fn doc_body(&self) -> String;
    fn doc_meta(&self) -> Option<Value>;
    fn line_text(&self, line_number: usize) -> String;
    /// Replace the extension's selection listener; `None` removes it.
    fn on_selection_change(&self, listener: Option<SelectionListener>);
}

pub trait UiCapability {
    fn notice(&self, message: &str, level: NoticeLevel, duration_ms: Option<u64>);
    fn show_notification(&self, message: &str, options: NotificationOptions) -> String;
    fn hide_notification(&self, id: &str);
    fn confirm(&self, message: &str) -> bool;
    /// Empty string when cancelled.
    fn pick_directory(&self, default_path: Option<&str>) -> String;
    fn pick_doc_files(&self, multiple: bool) -> Vec<String>;
    /// `None` when cancelled.
    fn save_file_with_dialog(
        &self,
        data: BinaryData<'_>,
        default_name: Option<&str>,
        filters: Vec<FileFilter>,
    ) -> ExtensionResult<Option<String>>;
}

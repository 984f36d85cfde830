//! Per-activation capability context.
//!
//! Every activation of an extension gets a fresh [`CapabilityContext`]
//! bound to its id. Each mutating call records a [`Disposer`] with the host
//! so that deactivation can undo it. After deactivation the context is
//! revoked and mutating calls fail with [`ExtensionError::ContextRevoked`].

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::api::PluginApi;
use super::capabilities::{
    ApiCapability, DockCapability, DocumentCapability, FilesystemCapability, MenuCapability,
    SaveOptions, SelectionListener, StorageCapability, UiCapability, WatchCapability,
};
use super::collaborators::{
    FileFilter, NoticeLevel, NotificationOptions, OpenDialogOptions, SaveDialogOptions, Selection,
};
use super::disposer::Disposer;
use super::document;
use super::dock::{DockPanelEntry, DockPanelOptions, DockSide};
use super::error::{ExtensionError, ExtensionResult};
use super::fs::{self, BinaryData, ConflictPolicy, LibraryFile, ListOptions, SaveTarget, SavedFile};
use super::host::HostShared;
use super::manifest::ExtensionRecord;
use super::menu::{MenuItemDescriptor, MenuPlacement};
use super::storage::ExtensionStorage;
use super::watch::{WatchBase, WatchCallback, WatchOptions};

/// Handle to one registration. Disposing is idempotent; dropping the handle
/// does not dispose. Handles created by a revoked context are inert.
pub struct Registration {
    target: Option<(Weak<HostShared>, String, Disposer)>,
    disposed: Cell<bool>,
    revoked: Rc<Cell<bool>>,
}

impl Registration {
    fn new(ctx: &CapabilityContext, shared: &Rc<HostShared>, disposer: Disposer) -> Self {
        Self {
            target: Some((Rc::downgrade(shared), ctx.record.id.clone(), disposer)),
            disposed: Cell::new(false),
            revoked: ctx.revoked.clone(),
        }
    }

    /// Handle for a refused registration.
    pub fn noop() -> Self {
        Self {
            target: None,
            disposed: Cell::new(true),
            revoked: Rc::new(Cell::new(true)),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.target.is_none()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn disposer(&self) -> Option<&Disposer> {
        self.target.as_ref().map(|(_, _, d)| d)
    }

    pub fn dispose(&self) {
        if self.disposed.replace(true) || self.revoked.get() {
            return;
        }
        if let Some((shared, extension_id, disposer)) = &self.target {
            if let Some(shared) = shared.upgrade() {
                shared.dispose_now(extension_id, disposer);
            }
        }
    }
}

/// Handle to a docked panel.
///
/// Every mutation updates the registry entry and relays out the dock.
/// Mutations after the panel is gone are no-ops.
pub struct DockPanelHandle {
    shared: Weak<HostShared>,
    extension_id: String,
    key: String,
    revoked: Rc<Cell<bool>>,
}

impl DockPanelHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entry(&self) -> Option<DockPanelEntry> {
        let shared = self.shared.upgrade()?;
        let dock = shared.dock.borrow();
        dock.get(&self.key).cloned()
    }

    fn live(&self) -> Option<Rc<HostShared>> {
        if self.revoked.get() {
            return None;
        }
        self.shared.upgrade()
    }

    pub fn update(&self, options: &DockPanelOptions) {
        if let Some(shared) = self.live() {
            shared.update_dock(&self.key, options);
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.update(&DockPanelOptions {
            visible: Some(visible),
            ..Default::default()
        });
    }

    pub fn set_side(&self, side: DockSide) {
        self.update(&DockPanelOptions {
            side: Some(side),
            ..Default::default()
        });
    }

    pub fn set_size(&self, size: f64) {
        self.update(&DockPanelOptions {
            size: Some(size),
            ..Default::default()
        });
    }

    pub fn dispose(&self) {
        if let Some(shared) = self.live() {
            shared.dispose_now(&self.extension_id, &Disposer::DockPanel(self.key.clone()));
        }
    }
}

pub struct CapabilityContext {
    record: ExtensionRecord,
    shared: Weak<HostShared>,
    storage: ExtensionStorage,
    revoked: Rc<Cell<bool>>,
}

impl CapabilityContext {
    pub(crate) fn new(record: ExtensionRecord, shared: &Rc<HostShared>) -> Self {
        let revoked = Rc::new(Cell::new(false));
        let storage =
            ExtensionStorage::new(&record.id, shared.store.clone()).with_revoked(revoked.clone());
        Self {
            record,
            shared: Rc::downgrade(shared),
            storage,
            revoked,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &ExtensionRecord {
        &self.record
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.get()
    }

    pub(crate) fn revoke(&self) {
        self.revoked.set(true);
    }

    /// Host for a mutating call.
    fn live(&self) -> ExtensionResult<Rc<HostShared>> {
        if self.revoked.get() {
            return Err(ExtensionError::ContextRevoked(self.record.id.clone()));
        }
        self.shared
            .upgrade()
            .ok_or_else(|| ExtensionError::ContextRevoked(self.record.id.clone()))
    }

    /// Host for a read-only query.
    fn host(&self) -> Option<Rc<HostShared>> {
        self.shared.upgrade()
    }

    fn require_library_root(shared: &HostShared) -> ExtensionResult<String> {
        shared
            .editor
            .library_root()
            .filter(|root| !root.trim().is_empty())
            .ok_or(ExtensionError::NoLibraryOpen)
    }

    /// Log a failed capability call with the extension id and pass it on.
    fn logged<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce() -> ExtensionResult<T>,
    ) -> ExtensionResult<T> {
        let result = f();
        if let Err(e) = &result {
            tracing::error!(extension = %self.record.id, operation, error = %e, "Capability call failed");
        }
        result
    }

    /// `asset://localhost/<url-encoded absolute path>` of a file shipped with
    /// the extension. Empty input yields an empty string.
    pub fn asset_url(&self, relative: &str) -> String {
        let relative = relative.trim().trim_start_matches(['/', '\\']);
        if relative.is_empty() {
            return String::new();
        }
        let absolute = self.record.dir.join(relative);
        format!(
            "asset://localhost/{}",
            urlencoding::encode(&absolute.to_string_lossy())
        )
    }

    /// Reduced context passed to an extension's settings entry point.
    pub fn settings(&self) -> SettingsContext<'_> {
        SettingsContext { ctx: self }
    }

    fn refresh_view(shared: &HostShared) {
        if shared.editor.is_preview_mode() || shared.editor.is_wysiwyg_mode() {
            shared.editor.schedule_render();
        }
    }

    fn save_target<'a>(
        &self,
        shared: &HostShared,
        root: &'a str,
        current: Option<&'a str>,
        options: &'a SaveOptions,
        file_name: &'a str,
        fallback_name: &'a str,
    ) -> SaveTarget<'a> {
        SaveTarget {
            root,
            current_file: current,
            sub_dir: options.sub_dir.as_deref(),
            file_name,
            fallback_name,
            on_conflict: options.on_conflict,
            max_attempts: shared.config.library.rename_attempts,
        }
    }
}

impl FilesystemCapability for CapabilityContext {
    fn read_text_file(&self, path: &str) -> ExtensionResult<String> {
        self.logged("read_text_file", || {
            self.live()?;
            fs::read_text_file(fs::require_path(path)?)
        })
    }

    fn write_text_file(&self, path: &str, content: &str) -> ExtensionResult<()> {
        self.logged("write_text_file", || {
            self.live()?;
            fs::write_text_file(fs::require_path(path)?, content)
        })
    }

    fn append_text_file(&self, path: &str, content: &str) -> ExtensionResult<()> {
        self.logged("append_text_file", || {
            self.live()?;
            fs::append_text_file(fs::require_path(path)?, content)
        })
    }

    fn read_file_binary(&self, path: &str) -> ExtensionResult<Vec<u8>> {
        self.logged("read_file_binary", || {
            self.live()?;
            fs::read_file_binary(fs::require_path(path)?)
        })
    }

    fn write_file_binary(&self, path: &str, data: BinaryData<'_>) -> ExtensionResult<()> {
        self.logged("write_file_binary", || {
            self.live()?;
            fs::write_file_binary(fs::require_path(path)?, &data)
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.logged("exists", || {
            self.live()?;
            let path = fs::require_path(path)?;
            Path::new(path)
                .try_exists()
                .map_err(|e| ExtensionError::io(format!("Failed to stat {path}"), e))
        })
        .unwrap_or(false)
    }

    fn ensure_dir(&self, path: &str) -> bool {
        self.logged("ensure_dir", || {
            self.live()?;
            fs::ensure_dir(fs::require_path(path)?)
        })
        .is_ok()
    }

    fn remove_path(&self, path: &str, recursive: bool) -> bool {
        self.logged("remove_path", || {
            self.live()?;
            fs::remove_path(fs::require_path(path)?, recursive)
        })
        .is_ok()
    }

    fn list_library_files(&self, options: &ListOptions) -> ExtensionResult<Vec<LibraryFile>> {
        self.logged("list_library_files", || {
            let shared = self.live()?;
            let root = Self::require_library_root(&shared)?;
            let library = &shared.config.library;
            fs::list_library_files(&root, options, &library.default_extensions, library.max_depth)
        })
    }

    fn save_binary_to_current_folder(
        &self,
        file_name: &str,
        data: BinaryData<'_>,
        options: &SaveOptions,
    ) -> ExtensionResult<SavedFile> {
        self.logged("save_binary_to_current_folder", || {
            let shared = self.live()?;
            let root = Self::require_library_root(&shared)?;
            let current = shared.editor.current_file_path();
            let target = self.save_target(
                &shared,
                &root,
                current.as_deref(),
                options,
                file_name,
                "file.bin",
            );
            fs::save_to_current_folder(target, data.as_bytes())
        })
    }

    fn download_file_to_current_folder(
        &self,
        url: &str,
        file_name: Option<&str>,
        options: &SaveOptions,
    ) -> ExtensionResult<SavedFile> {
        self.logged("download_file_to_current_folder", || {
            let shared = self.live()?;
            let url = url.trim();
            if url.is_empty() {
                return Err(ExtensionError::Validation("url must not be empty".into()));
            }
            let root = Self::require_library_root(&shared)?;

            let response = shared.http.get_bytes(url)?;
            if !response.is_success() {
                return Err(ExtensionError::Http(format!(
                    "HTTP {} for {url}",
                    response.status
                )));
            }

            let name = match file_name.map(str::trim).filter(|n| !n.is_empty()) {
                Some(name) => name.to_string(),
                None => fs::file_name_from_url(url).unwrap_or_default(),
            };
            let current = shared.editor.current_file_path();
            let target =
                self.save_target(&shared, &root, current.as_deref(), options, &name, "download");
            let saved = fs::save_to_current_folder(target, &response.body)?;
            tracing::info!(extension = %self.record.id, path = %saved.full_path, "Downloaded file");
            Ok(saved)
        })
    }

    fn save_markdown_to_current_folder(
        &self,
        file_name: &str,
        content: &str,
        on_conflict: ConflictPolicy,
    ) -> ExtensionResult<String> {
        self.logged("save_markdown_to_current_folder", || {
            let shared = self.live()?;
            if file_name.trim().is_empty() {
                return Err(ExtensionError::Validation("file name must not be empty".into()));
            }
            let root = Self::require_library_root(&shared)?;
            let current = shared.editor.current_file_path();
            let options = SaveOptions {
                sub_dir: None,
                on_conflict,
            };
            let target = self.save_target(
                &shared,
                &root,
                current.as_deref(),
                &options,
                file_name,
                "document.md",
            );
            fs::save_to_current_folder(target, content.as_bytes()).map(|saved| saved.full_path)
        })
    }

    fn read_image_as_data_url(&self, path: &str) -> ExtensionResult<String> {
        self.logged("read_image_as_data_url", || {
            self.live()?;
            fs::read_image_as_data_url(fs::require_path(path)?)
        })
    }

    fn plugin_data_dir(&self) -> ExtensionResult<PathBuf> {
        self.logged("plugin_data_dir", || {
            let shared = self.live()?;
            let root = Self::require_library_root(&shared)?;
            fs::plugin_data_dir(
                &shared.config.plugin_data_root(),
                &self.record.id,
                &root,
                shared.config.library.key_hasher,
            )
        })
    }
}

impl WatchCapability for CapabilityContext {
    fn watch_library(
        &self,
        callback: WatchCallback,
        options: WatchOptions,
    ) -> ExtensionResult<Registration> {
        self.logged("watch_library", || {
            let shared = self.live()?;
            let root = Self::require_library_root(&shared)?;
            let paths = [PathBuf::from(root)];
            let id = shared.watches.borrow_mut().subscribe(
                &self.record.id,
                &paths,
                options.recursive,
                callback,
            )?;
            shared.record(&self.record.id, Disposer::Watch(id));
            Ok(Registration::new(self, &shared, Disposer::Watch(id)))
        })
    }

    fn watch_paths(
        &self,
        paths: &[&str],
        callback: WatchCallback,
        options: WatchOptions,
    ) -> ExtensionResult<Registration> {
        self.logged("watch_paths", || {
            let shared = self.live()?;
            let root = Self::require_library_root(&shared)?;
            let resolved: Vec<PathBuf> = paths
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(|p| match options.base {
                    WatchBase::Absolute => PathBuf::from(p),
                    WatchBase::Library => PathBuf::from(fs::resolve_in_library(&root, p)),
                })
                .collect();
            if resolved.is_empty() {
                return Err(ExtensionError::Validation("no paths to watch".into()));
            }
            let id = shared.watches.borrow_mut().subscribe(
                &self.record.id,
                &resolved,
                options.recursive,
                callback,
            )?;
            shared.record(&self.record.id, Disposer::Watch(id));
            Ok(Registration::new(self, &shared, Disposer::Watch(id)))
        })
    }
}

impl StorageCapability for CapabilityContext {
    fn storage(&self) -> &ExtensionStorage {
        &self.storage
    }
}

impl MenuCapability for CapabilityContext {
    fn add_menu_item(&self, mut descriptor: MenuItemDescriptor) -> Registration {
        let Ok(shared) = self.live() else {
            return Registration::noop();
        };
        if descriptor.label.trim().is_empty() {
            descriptor.label = "Extension".to_string();
        }
        let placement = if self.record.show_in_menu_bar {
            MenuPlacement::MenuBar
        } else {
            MenuPlacement::PluginsMenu
        };
        let added = shared
            .plugin_menu
            .borrow_mut()
            .add(&self.record.id, placement, descriptor);
        if !added {
            tracing::warn!(extension = %self.record.id, "Extension already has a menu entry");
            return Registration::noop();
        }
        shared.record(&self.record.id, Disposer::MenuItem);
        Registration::new(self, &shared, Disposer::MenuItem)
    }

    fn add_context_menu_item(&self, descriptor: MenuItemDescriptor) -> Registration {
        let Ok(shared) = self.live() else {
            return Registration::noop();
        };
        let id = shared
            .context_menu
            .borrow_mut()
            .add(&self.record.id, descriptor);
        shared.record(&self.record.id, Disposer::ContextMenuItem(id));
        Registration::new(self, &shared, Disposer::ContextMenuItem(id))
    }
}

impl DockCapability for CapabilityContext {
    fn register_panel(&self, panel_id: &str, options: DockPanelOptions) -> DockPanelHandle {
        let panel_id = match panel_id.trim() {
            "" => "default",
            id => id,
        };
        let key = super::dock::panel_key(&self.record.id, panel_id);
        if let Ok(shared) = self.live() {
            shared.dock.borrow_mut().register(&self.record.id, panel_id, &options);
            shared.record_once(&self.record.id, Disposer::DockPanel(key.clone()));
            shared.relayout();
        }
        DockPanelHandle {
            shared: self.shared.clone(),
            extension_id: self.record.id.clone(),
            key,
            revoked: self.revoked.clone(),
        }
    }
}

impl ApiCapability for CapabilityContext {
    fn register_api(&self, namespace: &str, api: PluginApi) -> ExtensionResult<()> {
        let shared = self.live()?;
        let namespace = namespace.trim();
        shared
            .apis
            .borrow_mut()
            .register(&self.record.id, namespace, api)?;
        shared.record_once(
            &self.record.id,
            Disposer::ApiNamespace(namespace.to_string()),
        );
        Ok(())
    }

    fn get_plugin_api(&self, namespace: &str) -> Option<PluginApi> {
        let shared = self.host()?;
        let api = shared.apis.borrow().get(namespace);
        api
    }
}

impl DocumentCapability for CapabilityContext {
    fn editor_text(&self) -> String {
        self.host()
            .map(|shared| shared.editor.editor_text())
            .unwrap_or_default()
    }

    fn set_editor_text(&self, text: &str) {
        if let Ok(shared) = self.live() {
            shared.editor.set_editor_text(text);
            Self::refresh_view(&shared);
        }
    }

    fn selection(&self) -> Selection {
        self.host()
            .map(|shared| shared.editor.selection())
            .unwrap_or_default()
    }

    fn selected_text(&self) -> String {
        self.selection().text
    }

    fn replace_range(&self, start: usize, end: usize, text: &str) {
        if let Ok(shared) = self.live() {
            shared
                .editor
                .replace_range(start.min(end), start.max(end), text);
            Self::refresh_view(&shared);
        }
    }

    fn insert_at_cursor(&self, text: &str) {
        if let Ok(shared) = self.live() {
            shared.editor.insert_at_cursor(text);
            Self::refresh_view(&shared);
        }
    }

    fn current_file_path(&self) -> Option<String> {
        self.host()?.editor.current_file_path()
    }

    fn library_root(&self) -> Option<String> {
        self.host()?.editor.library_root()
    }

    fn front_matter_raw(&self) -> Option<String> {
        document::front_matter_raw(&self.editor_text()).map(str::to_string)
    }

    fn doc_body(&self) -> String {
        document::doc_body(&self.editor_text()).to_string()
    }

    fn doc_meta(&self) -> Option<Value> {
        document::doc_meta(&self.editor_text())
    }

    fn line_text(&self, line_number: usize) -> String {
        document::line_text(&self.editor_text(), line_number)
    }

    fn on_selection_change(&self, listener: Option<SelectionListener>) {
        let Ok(shared) = self.live() else {
            return;
        };
        match listener {
            Some(listener) => {
                shared
                    .selection_listeners
                    .borrow_mut()
                    .insert(self.record.id.clone(), Rc::from(listener));
                shared.record_once(&self.record.id, Disposer::SelectionListener);
            }
            None => shared.dispose_now(&self.record.id, &Disposer::SelectionListener),
        }
    }
}

impl UiCapability for CapabilityContext {
    fn notice(&self, message: &str, level: NoticeLevel, duration_ms: Option<u64>) {
        if let Some(shared) = self.host() {
            shared.ui.show_notice(message, level, duration_ms);
        }
    }

    fn show_notification(&self, message: &str, options: NotificationOptions) -> String {
        self.host()
            .map(|shared| shared.ui.show_notification(message, options))
            .unwrap_or_default()
    }

    fn hide_notification(&self, id: &str) {
        if let Some(shared) = self.host() {
            shared.ui.hide_notification(id);
        }
    }

    fn confirm(&self, message: &str) -> bool {
        self.host()
            .is_some_and(|shared| shared.ui.confirm(message, "Confirm"))
    }

    fn pick_directory(&self, default_path: Option<&str>) -> String {
        self.host()
            .and_then(|shared| shared.ui.pick_directory_dialog(default_path))
            .unwrap_or_default()
    }

    fn pick_doc_files(&self, multiple: bool) -> Vec<String> {
        let Some(shared) = self.host() else {
            return Vec::new();
        };
        shared.ui.open_file_dialog(&OpenDialogOptions {
            title: None,
            default_path: None,
            filters: vec![FileFilter {
                name: "Markdown".into(),
                extensions: vec!["md".into(), "markdown".into(), "txt".into()],
            }],
            multiple,
        })
    }

    fn save_file_with_dialog(
        &self,
        data: BinaryData<'_>,
        default_name: Option<&str>,
        filters: Vec<FileFilter>,
    ) -> ExtensionResult<Option<String>> {
        self.logged("save_file_with_dialog", || {
            let shared = self.live()?;
            let filters = if filters.is_empty() {
                vec![FileFilter {
                    name: "All files".into(),
                    extensions: vec!["*".into()],
                }]
            } else {
                filters
            };
            let options = SaveDialogOptions {
                title: None,
                default_path: default_name.map(str::to_string),
                filters,
            };
            let Some(target) = shared.ui.save_file_dialog(&options) else {
                return Ok(None);
            };
            std::fs::write(&target, data.as_bytes())
                .map_err(|e| ExtensionError::io(format!("Failed to write {target}"), e))?;
            Ok(Some(target))
        })
    }
}

/// What an extension's settings entry point may use.
pub struct SettingsContext<'a> {
    ctx: &'a CapabilityContext,
}

impl SettingsContext<'_> {
    pub fn extension_id(&self) -> &str {
        self.ctx.extension_id()
    }

    pub fn storage(&self) -> &ExtensionStorage {
        self.ctx.storage()
    }

    pub fn notice(&self, message: &str, level: NoticeLevel) {
        self.ctx.notice(message, level, None);
    }

    pub fn confirm(&self, message: &str) -> bool {
        self.ctx.confirm(message)
    }

    pub fn editor_text(&self) -> String {
        self.ctx.editor_text()
    }

    pub fn set_editor_text(&self, text: &str) {
        self.ctx.set_editor_text(text);
    }
}

//! Extension host - owns every active extension.
//!
//! The ExtensionHost is responsible for:
//! - Installing and uninstalling extensions
//! - Activating extensions with a fresh capability context
//! - Tracking everything an extension registers
//! - Tearing all of it down again on deactivation
//!
//! The host is single-threaded. Registries live in `RefCell`s behind a
//! shared `Rc`, and no borrow is held while extension code runs.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use crate::config::HostConfig;

use super::api::{ApiRegistry, PluginApi};
use super::collaborators::{
    EditorHost, HeadlessWorkspace, HttpClient, NoticeLevel, OfflineClient, Selection, UiHost,
};
use super::context::CapabilityContext;
use super::disposer::{call_guarded, ignore_non_fatal, Disposer, DisposerList, TeardownReport};
use super::dock::{DockGaps, DockPanelEntry, DockPanelOptions, DockRegistry};
use super::error::{ExtensionError, ExtensionResult};
use super::manifest::{self, ExtensionManifest, ExtensionRecord};
use super::menu::{ContextMenuItem, ContextMenuRegistry, MenuContext, PluginMenuEntry, PluginMenuRegistry};
use super::module::{default_loader, ExtensionModule, ModuleLoader};
use super::storage::HostStore;
use super::watch::{WatchBackend, WatchService};

type SharedSelectionListener = Rc<dyn Fn(&Selection)>;

/// Registries and collaborators shared by the host and every context.
pub(crate) struct HostShared {
    pub(crate) config: HostConfig,
    pub(crate) editor: Rc<dyn EditorHost>,
    pub(crate) ui: Rc<dyn UiHost>,
    pub(crate) http: Rc<dyn HttpClient>,
    pub(crate) store: Rc<RefCell<HostStore>>,
    pub(crate) dock: RefCell<DockRegistry>,
    pub(crate) context_menu: RefCell<ContextMenuRegistry>,
    pub(crate) plugin_menu: RefCell<PluginMenuRegistry>,
    pub(crate) apis: RefCell<ApiRegistry>,
    pub(crate) watches: RefCell<WatchService>,
    pub(crate) selection_listeners: RefCell<BTreeMap<String, SharedSelectionListener>>,
    disposers: RefCell<HashMap<String, DisposerList>>,
}

impl HostShared {
    pub(crate) fn record(&self, extension_id: &str, disposer: Disposer) {
        self.disposers
            .borrow_mut()
            .entry(extension_id.to_string())
            .or_default()
            .push(disposer);
    }

    /// Record a disposer unless an equal one is already pending.
    pub(crate) fn record_once(&self, extension_id: &str, disposer: Disposer) {
        let mut all = self.disposers.borrow_mut();
        let list = all.entry(extension_id.to_string()).or_default();
        if !list.contains(&disposer) {
            list.push(disposer);
        }
    }

    /// Run one disposer ahead of deactivation. Unknown or already-run
    /// disposers are ignored.
    pub(crate) fn dispose_now(&self, extension_id: &str, disposer: &Disposer) {
        let known = self
            .disposers
            .borrow_mut()
            .get_mut(extension_id)
            .is_some_and(|list| list.remove(disposer));
        if !known {
            return;
        }
        let mut dock_changed = false;
        if let Err(e) = self.run_disposer(extension_id, disposer, &mut dock_changed) {
            tracing::warn!(extension = %extension_id, %disposer, error = %e, "Disposer failed");
        }
        if dock_changed {
            self.relayout();
        }
    }

    fn run_disposer(
        &self,
        extension_id: &str,
        disposer: &Disposer,
        dock_changed: &mut bool,
    ) -> ExtensionResult<()> {
        match disposer {
            Disposer::Watch(id) => {
                // The watched path may already be gone.
                ignore_non_fatal("cancel watch", || self.watches.borrow_mut().cancel(*id));
            }
            Disposer::MenuItem => {
                self.plugin_menu.borrow_mut().remove_extension(extension_id);
            }
            Disposer::ContextMenuItem(id) => {
                self.context_menu.borrow_mut().remove(*id);
            }
            Disposer::DockPanel(key) => {
                if self.dock.borrow_mut().remove(key) {
                    *dock_changed = true;
                }
            }
            Disposer::ApiNamespace(namespace) => {
                self.apis.borrow_mut().release(extension_id, namespace);
            }
            Disposer::SelectionListener => {
                self.selection_listeners.borrow_mut().remove(extension_id);
            }
        }
        Ok(())
    }

    pub(crate) fn relayout(&self) {
        let gaps = self.dock.borrow().gaps();
        self.ui.relayout_dock(gaps);
    }

    pub(crate) fn update_dock(&self, key: &str, options: &DockPanelOptions) {
        let changed = self.dock.borrow_mut().update(key, options);
        if changed {
            self.relayout();
        }
    }

    /// Run every pending disposer newest-first, then purge whatever is
    /// still keyed to the extension and recompute the dock once.
    fn teardown(&self, extension_id: &str) -> TeardownReport {
        let mut report = TeardownReport::new(extension_id);
        let list = self
            .disposers
            .borrow_mut()
            .remove(extension_id)
            .unwrap_or_default();

        let mut dock_changed = false;
        for disposer in list.into_reverse() {
            let result =
                call_guarded(|| Ok(self.run_disposer(extension_id, &disposer, &mut dock_changed)?));
            if let Err(message) = result {
                tracing::warn!(extension = %extension_id, %disposer, error = %message, "Disposer failed");
                report.failures.push(format!("{disposer}: {message}"));
            }
            report.disposed.push(disposer);
        }

        report.purged = self.purge(extension_id);
        if report.purged > 0 {
            tracing::debug!(extension = %extension_id, purged = report.purged, "Purged leftover registrations");
        }
        self.relayout();
        report
    }

    fn purge(&self, extension_id: &str) -> usize {
        let panels = self.dock.borrow_mut().remove_extension(extension_id);
        let items = self.context_menu.borrow_mut().remove_extension(extension_id);
        let menu = usize::from(self.plugin_menu.borrow_mut().remove_extension(extension_id));
        let apis = self.apis.borrow_mut().remove_extension(extension_id).len();
        let watches = self.watches.borrow_mut().cancel_extension(extension_id);
        let listener = usize::from(
            self.selection_listeners
                .borrow_mut()
                .remove(extension_id)
                .is_some(),
        );
        panels + items + menu + apis + watches + listener
    }

    fn registrations_for(&self, extension_id: &str) -> usize {
        self.dock.borrow().count_for(extension_id)
            + self.context_menu.borrow().count_for(extension_id)
            + usize::from(self.plugin_menu.borrow().contains(extension_id))
            + self.apis.borrow().namespaces_owned_by(extension_id).len()
            + self.watches.borrow().count_for(extension_id)
            + usize::from(self.selection_listeners.borrow().contains_key(extension_id))
    }
}

/// Editor, UI and network implementations the host talks to.
#[derive(Clone)]
pub struct HostCollaborators {
    pub editor: Rc<dyn EditorHost>,
    pub ui: Rc<dyn UiHost>,
    pub http: Rc<dyn HttpClient>,
}

impl HostCollaborators {
    /// In-memory workspace without network access.
    pub fn headless(workspace: Rc<HeadlessWorkspace>) -> Self {
        Self {
            editor: workspace.clone(),
            ui: workspace,
            http: Rc::new(OfflineClient),
        }
    }
}

struct ActiveExtension {
    record: ExtensionRecord,
    module: Box<dyn ExtensionModule>,
    context: Rc<CapabilityContext>,
}

pub struct ExtensionHost {
    shared: Rc<HostShared>,
    loader: Box<dyn ModuleLoader>,
    installed: BTreeMap<String, ExtensionRecord>,
    active: HashMap<String, ActiveExtension>,
    /// Active extension ids in activation order.
    activation_order: Vec<String>,
}

impl fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionHost")
            .field("installed", &self.installed.keys().collect::<Vec<_>>())
            .field("active", &self.activation_order)
            .finish()
    }
}

impl ExtensionHost {
    /// Create a host backed by the settings store on disk.
    pub fn new(config: HostConfig, collaborators: HostCollaborators) -> Self {
        let store = HostStore::open(config.store_path());
        Self::with_store(config, collaborators, store)
    }

    /// Create a host with an explicit store.
    pub fn with_store(config: HostConfig, collaborators: HostCollaborators, store: HostStore) -> Self {
        let installed = manifest::load_installed(&store);
        tracing::debug!(installed = installed.len(), "Loaded install records");

        let shared = Rc::new(HostShared {
            config,
            editor: collaborators.editor,
            ui: collaborators.ui,
            http: collaborators.http,
            store: Rc::new(RefCell::new(store)),
            dock: RefCell::new(DockRegistry::new()),
            context_menu: RefCell::new(ContextMenuRegistry::new()),
            plugin_menu: RefCell::new(PluginMenuRegistry::new()),
            apis: RefCell::new(ApiRegistry::new()),
            watches: RefCell::new(WatchService::default()),
            selection_listeners: RefCell::new(BTreeMap::new()),
            disposers: RefCell::new(HashMap::new()),
        });

        Self {
            shared,
            loader: Box::new(default_loader()),
            installed,
            active: HashMap::new(),
            activation_order: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Replace the watch backend. Existing subscriptions are cancelled.
    pub fn with_watch_backend(self, backend: impl WatchBackend + 'static) -> Self {
        let previous = self
            .shared
            .watches
            .replace(WatchService::new(Box::new(backend)));
        drop(previous);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.shared.config
    }

    // ------------------------------------------------------------------
    // Install records
    // ------------------------------------------------------------------

    pub fn installed(&self) -> impl Iterator<Item = &ExtensionRecord> {
        self.installed.values()
    }

    pub fn installed_record(&self, extension_id: &str) -> Option<&ExtensionRecord> {
        self.installed.get(extension_id)
    }

    fn persist_installed(&self) -> ExtensionResult<()> {
        manifest::save_installed(&mut self.shared.store.borrow_mut(), &self.installed)
    }

    /// Install (or reinstall) the extension found in `source_dir`.
    pub fn install(&mut self, source_dir: &Path) -> ExtensionResult<ExtensionRecord> {
        let manifest = ExtensionManifest::load(source_dir)?;
        let dest = self.shared.config.extensions_dir().join(&manifest.id);

        if self.active.contains_key(&manifest.id) {
            self.deactivate(&manifest.id);
        }

        let same_dir = matches!(
            (source_dir.canonicalize(), dest.canonicalize()),
            (Ok(a), Ok(b)) if a == b
        );
        if !same_dir {
            manifest::copy_extension_dir(source_dir, &dest)?;
        }

        let record = ExtensionRecord::from_manifest(&manifest, dest);
        self.installed.insert(record.id.clone(), record.clone());
        self.persist_installed()?;
        tracing::info!(extension = %record.id, version = %record.version, "Extension installed");
        Ok(record)
    }

    /// Deactivate, forget and delete an installed extension.
    pub fn uninstall(&mut self, extension_id: &str) -> ExtensionResult<()> {
        let Some(record) = self.installed.get(extension_id).cloned() else {
            return Err(ExtensionError::NotInstalled(extension_id.to_string()));
        };
        self.deactivate(extension_id);
        self.installed.remove(extension_id);
        self.persist_installed()?;

        if record.dir.starts_with(self.shared.config.extensions_dir()) {
            ignore_non_fatal("remove extension directory", || {
                std::fs::remove_dir_all(&record.dir)
            });
        }
        tracing::info!(extension = %extension_id, "Extension uninstalled");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn is_active(&self, extension_id: &str) -> bool {
        self.active.contains_key(extension_id)
    }

    pub fn active_ids(&self) -> &[String] {
        &self.activation_order
    }

    /// Activate an extension. Activating an active extension is a no-op.
    ///
    /// On failure everything the extension registered during the attempt is
    /// rolled back, a notice is shown and the extension stays inactive.
    pub fn activate(&mut self, record: &ExtensionRecord) -> ExtensionResult<()> {
        if self.active.contains_key(&record.id) {
            return Ok(());
        }

        let mut module = match self.loader.load(record) {
            Ok(module) => module,
            Err(e) => {
                self.report_activation_failure(record, &e);
                return Err(e);
            }
        };

        let context = Rc::new(CapabilityContext::new(record.clone(), &self.shared));
        let ctx = context.clone();
        match call_guarded(|| module.activate(ctx)) {
            Ok(()) => {
                self.active.insert(
                    record.id.clone(),
                    ActiveExtension {
                        record: record.clone(),
                        module,
                        context,
                    },
                );
                self.activation_order.push(record.id.clone());
                tracing::info!(extension = %record.id, "Extension activated");
                Ok(())
            }
            Err(message) => {
                context.revoke();
                let report = self.shared.teardown(&record.id);
                tracing::debug!(extension = %record.id, rolled_back = report.disposed.len(), "Rolled back failed activation");
                let err = ExtensionError::Lifecycle {
                    extension: record.id.clone(),
                    message,
                };
                self.report_activation_failure(record, &err);
                Err(err)
            }
        }
    }

    /// Activate an installed extension by id.
    pub fn activate_by_id(&mut self, extension_id: &str) -> ExtensionResult<()> {
        let record = self
            .installed
            .get(extension_id)
            .cloned()
            .ok_or_else(|| ExtensionError::NotInstalled(extension_id.to_string()))?;
        self.activate(&record)
    }

    /// Activate every installed extension, continuing past failures.
    pub fn activate_installed(&mut self) -> Vec<(String, ExtensionError)> {
        let records: Vec<ExtensionRecord> = self.installed.values().cloned().collect();
        let mut failures = Vec::new();
        for record in records {
            if let Err(e) = self.activate(&record) {
                tracing::error!(extension = %record.id, error = %e, "Failed to activate extension");
                failures.push((record.id, e));
            }
        }
        failures
    }

    /// Deactivate an extension. Returns `None` if it was not active.
    pub fn deactivate(&mut self, extension_id: &str) -> Option<TeardownReport> {
        let mut active = self.active.remove(extension_id)?;
        self.activation_order.retain(|id| id != extension_id);

        let module_error = call_guarded(|| active.module.deactivate()).err();
        if let Some(message) = &module_error {
            tracing::error!(extension = %extension_id, error = %message, "Extension deactivate hook failed");
        }
        active.context.revoke();

        let mut report = self.shared.teardown(extension_id);
        report.module_error = module_error;
        tracing::info!(
            extension = %extension_id,
            disposed = report.disposed.len(),
            failures = report.failures.len(),
            "Extension deactivated"
        );
        Some(report)
    }

    /// Deactivate every active extension, newest first.
    pub fn deactivate_all(&mut self) -> Vec<TeardownReport> {
        let ids: Vec<String> = self.activation_order.iter().rev().cloned().collect();
        ids.iter().filter_map(|id| self.deactivate(id)).collect()
    }

    fn report_activation_failure(&self, record: &ExtensionRecord, err: &ExtensionError) {
        tracing::error!(extension = %record.id, error = %err, "Extension activation failed");
        let runtime = &self.shared.config.runtime;
        let message = truncate_message(&err.to_string(), runtime.notice_message_limit);
        self.shared.ui.show_notice(
            &format!("Extension {} failed to activate: {message}", record.name),
            NoticeLevel::Err,
            Some(runtime.notice_duration_ms),
        );
    }

    /// Run an active extension's settings entry point.
    pub fn open_settings(&mut self, extension_id: &str) -> ExtensionResult<()> {
        let Some(active) = self.active.get_mut(extension_id) else {
            self.shared.ui.show_notice(
                &format!("Extension {extension_id} is not active"),
                NoticeLevel::Err,
                None,
            );
            return Err(ExtensionError::NotInstalled(extension_id.to_string()));
        };

        let context = active.context.clone();
        let name = active.record.name.clone();
        let settings = context.settings();
        let outcome = call_guarded(|| active.module.open_settings(&settings).transpose());

        let message = match outcome {
            Ok(Some(())) => return Ok(()),
            Ok(None) => format!("Extension {name} has no settings"),
            Err(message) => format!("Extension {name} settings failed: {message}"),
        };
        self.shared.ui.show_notice(&message, NoticeLevel::Err, None);
        Err(ExtensionError::Lifecycle {
            extension: extension_id.to_string(),
            message,
        })
    }

    // ------------------------------------------------------------------
    // Host-driven events
    // ------------------------------------------------------------------

    /// Deliver queued filesystem events. Returns how many callbacks ran.
    pub fn pump_watch_events(&self) -> usize {
        let pending = self.shared.watches.borrow_mut().drain();
        let mut delivered = 0;
        for event in pending {
            let Ok(mut callback) = event.callback.try_borrow_mut() else {
                tracing::warn!(extension = %event.extension_id, watch = %event.id, "Watch callback re-entered, dropping event");
                continue;
            };
            if let Err(message) = call_guarded(|| (*callback)(&event.event)) {
                tracing::warn!(extension = %event.extension_id, watch = %event.id, error = %message, "Watch callback failed");
            }
            delivered += 1;
        }
        delivered
    }

    /// Fan the current selection out to every selection listener.
    pub fn notify_selection_change(&self) {
        let selection = self.shared.editor.selection();
        let listeners: Vec<(String, SharedSelectionListener)> = self
            .shared
            .selection_listeners
            .borrow()
            .iter()
            .map(|(id, l)| (id.clone(), l.clone()))
            .collect();
        for (extension_id, listener) in listeners {
            let result = call_guarded(|| {
                listener(&selection);
                Ok(())
            });
            if let Err(message) = result {
                tracing::warn!(extension = %extension_id, error = %message, "Selection listener failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Views for the workspace
    // ------------------------------------------------------------------

    pub fn get_plugin_api(&self, namespace: &str) -> Option<PluginApi> {
        self.shared.apis.borrow().get(namespace)
    }

    /// Context-menu items in registration order.
    pub fn context_menu_items(&self) -> Vec<ContextMenuItem> {
        self.shared.context_menu.borrow().items().to_vec()
    }

    /// Current editor state for evaluating context-menu conditions.
    pub fn menu_context(&self) -> MenuContext {
        let editor = &self.shared.editor;
        MenuContext {
            selected_text: editor.selection().text,
            file_path: editor.current_file_path(),
            preview: editor.is_preview_mode(),
        }
    }

    pub fn plugin_menu_entries(&self) -> Vec<PluginMenuEntry> {
        self.shared.plugin_menu.borrow().entries().to_vec()
    }

    pub fn dock_panels(&self) -> Vec<DockPanelEntry> {
        self.shared.dock.borrow().entries().cloned().collect()
    }

    pub fn dock_gaps(&self) -> DockGaps {
        self.shared.dock.borrow().gaps()
    }

    /// Read-only cross-extension view for diagnostics.
    pub fn inspector(&self) -> HostInspector<'_> {
        HostInspector { host: self }
    }
}

impl Drop for ExtensionHost {
    fn drop(&mut self) {
        self.deactivate_all();
    }
}

/// Read-only view over all extensions' registrations.
pub struct HostInspector<'a> {
    host: &'a ExtensionHost,
}

impl HostInspector<'_> {
    pub fn active_extensions(&self) -> Vec<&ExtensionRecord> {
        self.host
            .activation_order
            .iter()
            .filter_map(|id| self.host.active.get(id).map(|a| &a.record))
            .collect()
    }

    /// Pending disposers of an extension.
    pub fn disposer_count(&self, extension_id: &str) -> usize {
        self.host
            .shared
            .disposers
            .borrow()
            .get(extension_id)
            .map_or(0, DisposerList::len)
    }

    /// Registry entries of any kind still keyed to an extension.
    pub fn registrations_for(&self, extension_id: &str) -> usize {
        self.host.shared.registrations_for(extension_id)
    }

    /// `(namespace, owner)` pairs.
    pub fn api_namespaces(&self) -> Vec<(String, String)> {
        self.host.shared.apis.borrow().namespaces()
    }

    pub fn watch_count(&self, extension_id: &str) -> usize {
        self.host.shared.watches.borrow().count_for(extension_id)
    }
}

/// Shorten to at most `limit` characters, marking the cut with `…`.
fn truncate_message(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

//! Extension system for Plume.
//!
//! This module hosts third-party extensions inside the editor process and
//! gives each activation a capability context bound to its id.
//!
//! # Architecture
//!
//! ```text
//! ExtensionHost
//! ├── installed: BTreeMap<ExtensionId, ExtensionRecord>
//! ├── active: HashMap<ExtensionId, ActiveExtension>
//! ├── loader: Box<dyn ModuleLoader>
//! └── shared: Rc<HostShared>
//!     ├── dock / context_menu / plugin_menu / apis
//!     ├── watches: WatchService
//!     ├── selection_listeners
//!     └── disposers: HashMap<ExtensionId, DisposerList>
//! ```
//!
//! Everything a context registers records a [`Disposer`]. Deactivation runs
//! them newest-first, then purges anything still keyed to the extension, so
//! nothing an extension contributed outlives it.
//!
//! Extensions are native Rust modules registered with a [`NativeLoader`],
//! or ES modules run by the embedded JavaScript engine when the
//! `js-runtime` feature is enabled.

pub mod api;
pub mod capabilities;
pub mod collaborators;
pub mod context;
pub mod disposer;
pub mod dock;
pub mod document;
mod error;
pub mod fs;
pub mod hash;
mod host;
#[cfg(feature = "js-runtime")]
pub mod ipc;
#[cfg(feature = "js-runtime")]
mod isolate;
pub mod manifest;
pub mod menu;
pub mod module;
pub mod storage;
pub mod watch;

pub use api::{ApiRegistry, PluginApi};
pub use capabilities::{
    ApiCapability, DockCapability, DocumentCapability, FilesystemCapability, MenuCapability,
    SaveOptions, StorageCapability, UiCapability, WatchCapability,
};
pub use collaborators::{
    EditorHost, HeadlessWorkspace, HttpClient, NoticeLevel, OfflineClient, ReqwestClient,
    Selection, UiHost,
};
pub use context::{CapabilityContext, DockPanelHandle, Registration, SettingsContext};
pub use disposer::{Disposer, TeardownReport};
pub use dock::{DockGaps, DockPanelOptions, DockSide};
pub use error::{ExtensionError, ExtensionResult};
pub use fs::{BinaryData, ConflictPolicy, LibraryFile, ListOptions, SavedFile};
pub use hash::{hash_library_key, LibraryKeyHasher};
pub use host::{ExtensionHost, HostCollaborators, HostInspector};
#[cfg(feature = "js-runtime")]
pub use isolate::ScriptLoader;
pub use manifest::{ExtensionManifest, ExtensionRecord};
pub use menu::{MenuContext, MenuItemDescriptor};
pub use module::{default_loader, ExtensionModule, LoaderChain, ModuleLoader, NativeLoader};
pub use storage::{ExtensionStorage, HostStore};
pub use watch::{WatchEvent, WatchEventKind, WatchOptions};

/// Unique identifier for an extension.
pub type ExtensionId = String;

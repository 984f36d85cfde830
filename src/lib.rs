//! Plume - plugin host runtime for the Plume markdown editor.
//!
//! Plume loads third-party extensions into the editor process and hands each
//! one a capability context: library-scoped file access, watches, storage,
//! menus, dock panels and a cross-extension API registry. Everything an
//! extension registers is torn down when it is deactivated.
//!
//! # Architecture
//!
//! - [`config`] - Host configuration loading and management
//! - [`paths`] - Separator-agnostic path helpers
//! - [`extensions`] - Extension host, capability context and registries
//! - [`cli`] - Command-line tooling over a headless workspace
//!
//! # Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use plume::extensions::{ExtensionHost, HeadlessWorkspace, HostCollaborators};
//!
//! let workspace = Rc::new(HeadlessWorkspace::with_library("/notes"));
//! let mut host = ExtensionHost::new(
//!     plume::HostConfig::load(),
//!     HostCollaborators::headless(workspace),
//! );
//! for (id, error) in host.activate_installed() {
//!     eprintln!("{id}: {error}");
//! }
//! ```

pub mod cli;
pub mod config;
pub mod extensions;
pub mod paths;

mod error;

pub use config::HostConfig;
pub use error::{PlumeError, PlumeResult};
pub use extensions::{ExtensionError, ExtensionHost, ExtensionResult};

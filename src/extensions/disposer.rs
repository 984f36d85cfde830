//! Teardown bookkeeping for active extensions.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use super::menu::ContextMenuItemId;
use super::watch::WatchId;

/// One registration to undo when an extension is deactivated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposer {
    Watch(WatchId),
    MenuItem,
    ContextMenuItem(ContextMenuItemId),
    DockPanel(String),
    ApiNamespace(String),
    SelectionListener,
}

impl Disposer {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Watch(_) => "watch",
            Self::MenuItem => "menu-item",
            Self::ContextMenuItem(_) => "context-menu-item",
            Self::DockPanel(_) => "dock-panel",
            Self::ApiNamespace(_) => "api-namespace",
            Self::SelectionListener => "selection-listener",
        }
    }
}

impl fmt::Display for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watch(id) => write!(f, "watch {id}"),
            Self::MenuItem => f.write_str("menu item"),
            Self::ContextMenuItem(id) => write!(f, "context menu item {id}"),
            Self::DockPanel(key) => write!(f, "dock panel {key}"),
            Self::ApiNamespace(ns) => write!(f, "api namespace {ns}"),
            Self::SelectionListener => f.write_str("selection listener"),
        }
    }
}

/// Disposers of one extension in registration order.
#[derive(Debug, Default, Clone)]
pub struct DisposerList {
    entries: Vec<Disposer>,
}

impl DisposerList {
    pub fn push(&mut self, disposer: Disposer) {
        self.entries.push(disposer);
    }

    /// Forget the most recent matching entry.
    pub fn remove(&mut self, disposer: &Disposer) -> bool {
        match self.entries.iter().rposition(|d| d == disposer) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, disposer: &Disposer) -> bool {
        self.entries.contains(disposer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Disposer> {
        self.entries.iter()
    }

    /// Consume the list newest-first.
    pub fn into_reverse(self) -> impl Iterator<Item = Disposer> {
        self.entries.into_iter().rev()
    }
}

/// Outcome of deactivating one extension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeardownReport {
    pub extension_id: String,
    /// Disposers run, in the order they ran.
    pub disposed: Vec<Disposer>,
    /// Messages of disposers that failed. Failures never stop the teardown.
    pub failures: Vec<String>,
    /// Registry entries still keyed to the extension after its disposers ran.
    pub purged: usize,
    /// Error raised by the extension's own deactivate hook.
    pub module_error: Option<String>,
}

impl TeardownReport {
    pub fn new(extension_id: &str) -> Self {
        Self {
            extension_id: extension_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.module_error.is_none()
    }
}

/// Run a best-effort operation, logging and discarding its error.
pub fn ignore_non_fatal<T, E: fmt::Display>(
    label: &str,
    f: impl FnOnce() -> Result<T, E>,
) -> Option<T> {
    match f() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(operation = %label, error = %e, "Ignoring non-fatal error");
            None
        }
    }
}

/// Run extension-supplied code, turning both errors and panics into a
/// message.
pub(crate) fn call_guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_order_and_remove() {
        let mut list = DisposerList::default();
        list.push(Disposer::MenuItem);
        list.push(Disposer::DockPanel("a::x".into()));
        list.push(Disposer::ApiNamespace("ns".into()));

        assert!(list.remove(&Disposer::DockPanel("a::x".into())));
        assert!(!list.remove(&Disposer::DockPanel("a::x".into())));

        let order: Vec<_> = list.into_reverse().collect();
        assert_eq!(
            order,
            vec![Disposer::ApiNamespace("ns".into()), Disposer::MenuItem]
        );
    }

    #[test]
    fn test_ignore_non_fatal() {
        assert_eq!(ignore_non_fatal("ok", || Ok::<_, String>(3)), Some(3));
        assert_eq!(
            ignore_non_fatal("fails", || Err::<u8, _>("boom".to_string())),
            None
        );
    }

    #[test]
    fn test_call_guarded_catches_panics() {
        assert_eq!(call_guarded(|| Ok(1)), Ok(1));
        assert_eq!(
            call_guarded::<()>(|| Err(anyhow::anyhow!("bad"))),
            Err("bad".to_string())
        );
        let msg = call_guarded::<()>(|| panic!("kaboom")).unwrap_err();
        assert!(msg.contains("kaboom"));
    }
}

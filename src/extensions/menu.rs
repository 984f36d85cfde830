//! Menu contributions: one top-level entry per extension, plus editor
//! context-menu items.
//!
//! Registries only store descriptors. Rendering and evaluating visibility
//! conditions is left to the workspace.

use std::fmt;
use std::rc::Rc;

pub type MenuAction = Rc<dyn Fn()>;
pub type MenuCondition = Rc<dyn Fn(&MenuContext) -> bool>;

/// Editor state handed to context-menu conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuContext {
    pub selected_text: String,
    pub file_path: Option<String>,
    pub preview: bool,
}

#[derive(Clone)]
pub enum MenuItemBody {
    Action(MenuAction),
    Children(Vec<MenuItemDescriptor>),
}

/// A clickable entry or a submenu.
#[derive(Clone)]
pub struct MenuItemDescriptor {
    pub label: String,
    pub title: Option<String>,
    pub icon: Option<String>,
    pub condition: Option<MenuCondition>,
    pub body: MenuItemBody,
}

impl MenuItemDescriptor {
    pub fn action(label: impl Into<String>, action: impl Fn() + 'static) -> Self {
        Self {
            label: label.into(),
            title: None,
            icon: None,
            condition: None,
            body: MenuItemBody::Action(Rc::new(action)),
        }
    }

    pub fn submenu(label: impl Into<String>, children: Vec<MenuItemDescriptor>) -> Self {
        Self {
            label: label.into(),
            title: None,
            icon: None,
            condition: None,
            body: MenuItemBody::Children(children),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Fn(&MenuContext) -> bool + 'static) -> Self {
        self.condition = Some(Rc::new(condition));
        self
    }

    /// Evaluate the visibility condition. Items without one are always shown.
    pub fn is_visible(&self, ctx: &MenuContext) -> bool {
        self.condition.as_ref().map_or(true, |cond| cond(ctx))
    }

    /// Run the click action, if this is not a submenu.
    pub fn activate(&self) -> bool {
        match &self.body {
            MenuItemBody::Action(action) => {
                action();
                true
            }
            MenuItemBody::Children(_) => false,
        }
    }
}

impl fmt::Debug for MenuItemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("MenuItemDescriptor");
        s.field("label", &self.label)
            .field("title", &self.title)
            .field("icon", &self.icon)
            .field("conditional", &self.condition.is_some());
        match &self.body {
            MenuItemBody::Action(_) => s.field("body", &"action"),
            MenuItemBody::Children(children) => s.field("children", children),
        };
        s.finish()
    }
}

/// Identity of a registered context-menu item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextMenuItemId(u64);

impl fmt::Display for ContextMenuItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ContextMenuItem {
    pub id: ContextMenuItemId,
    pub extension_id: String,
    pub descriptor: Rc<MenuItemDescriptor>,
}

/// Ordered context-menu contributions from all extensions.
#[derive(Debug, Default)]
pub struct ContextMenuRegistry {
    items: Vec<ContextMenuItem>,
    next_id: u64,
}

impl ContextMenuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, extension_id: &str, descriptor: MenuItemDescriptor) -> ContextMenuItemId {
        self.next_id += 1;
        let id = ContextMenuItemId(self.next_id);
        self.items.push(ContextMenuItem {
            id,
            extension_id: extension_id.to_string(),
            descriptor: Rc::new(descriptor),
        });
        id
    }

    /// Remove exactly the item with this id; items with equal labels stay.
    pub fn remove(&mut self, id: ContextMenuItemId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        before != self.items.len()
    }

    pub fn remove_extension(&mut self, extension_id: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.extension_id != extension_id);
        before - self.items.len()
    }

    /// Registered items in registration order.
    pub fn items(&self) -> &[ContextMenuItem] {
        &self.items
    }

    pub fn count_for(&self, extension_id: &str) -> usize {
        self.items
            .iter()
            .filter(|item| item.extension_id == extension_id)
            .count()
    }
}

/// Where an extension's top-level menu entry is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuPlacement {
    MenuBar,
    PluginsMenu,
}

#[derive(Debug, Clone)]
pub struct PluginMenuEntry {
    pub extension_id: String,
    pub placement: MenuPlacement,
    pub descriptor: Rc<MenuItemDescriptor>,
}

/// Top-level menu entries, at most one per extension.
#[derive(Debug, Default)]
pub struct PluginMenuRegistry {
    entries: Vec<PluginMenuEntry>,
}

impl PluginMenuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the extension's entry. Returns `false` if it already has one.
    pub fn add(
        &mut self,
        extension_id: &str,
        placement: MenuPlacement,
        descriptor: MenuItemDescriptor,
    ) -> bool {
        if self.contains(extension_id) {
            return false;
        }
        self.entries.push(PluginMenuEntry {
            extension_id: extension_id.to_string(),
            placement,
            descriptor: Rc::new(descriptor),
        });
        true
    }

    pub fn contains(&self, extension_id: &str) -> bool {
        self.entries.iter().any(|e| e.extension_id == extension_id)
    }

    pub fn remove_extension(&mut self, extension_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.extension_id != extension_id);
        before != self.entries.len()
    }

    pub fn entries(&self) -> &[PluginMenuEntry] {
        &self.entries
    }

    pub fn placed(&self, placement: MenuPlacement) -> impl Iterator<Item = &PluginMenuEntry> {
        self.entries.iter().filter(move |e| e.placement == placement)
    }
}

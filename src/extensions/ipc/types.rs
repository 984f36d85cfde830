//! IPC type definitions for script extension calls.

use std::rc::Rc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::extensions::collaborators::{NotificationKind, NotificationOptions};
use crate::extensions::isolate::JsCallbacks;
use crate::extensions::menu::{MenuContext, MenuItemDescriptor};
use crate::extensions::watch::{WatchBase, WatchOptions};

/// Menu item as sent by the JS shim. Functions arrive as callback ids.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MenuSpec {
    pub label: String,
    pub title: Option<String>,
    pub icon: Option<String>,
    /// Callback id of `onClick`.
    pub action: Option<u32>,
    /// Callback id of `condition`.
    pub condition: Option<u32>,
    pub children: Option<Vec<MenuSpec>>,
}

impl MenuSpec {
    pub(crate) fn into_descriptor(self, callbacks: &JsCallbacks) -> MenuItemDescriptor {
        let mut descriptor = match self.children {
            Some(children) => MenuItemDescriptor::submenu(
                self.label,
                children
                    .into_iter()
                    .map(|child| child.into_descriptor(callbacks))
                    .collect(),
            ),
            None => {
                let callbacks = callbacks.clone();
                let action = self.action;
                MenuItemDescriptor::action(self.label, move || {
                    if let Some(id) = action {
                        callbacks.fire(id, &Value::Null);
                    }
                })
            }
        };
        if let Some(title) = self.title {
            descriptor = descriptor.with_title(title);
        }
        if let Some(icon) = self.icon {
            descriptor = descriptor.with_icon(icon);
        }
        if let Some(id) = self.condition {
            let callbacks = callbacks.clone();
            descriptor = descriptor.with_condition(move |ctx| {
                match callbacks.call(id, &menu_context_json(ctx)) {
                    Ok(value) => is_truthy(&value),
                    Err(e) => {
                        tracing::warn!(slot = callbacks.slot(), error = %e, "Menu condition failed, hiding item");
                        false
                    }
                }
            });
        }
        descriptor
    }
}

fn menu_context_json(ctx: &MenuContext) -> Value {
    json!({
        "selectedText": ctx.selected_text,
        "filePath": ctx.file_path,
        "mode": if ctx.preview { "preview" } else { "edit" },
    })
}

/// JavaScript truthiness of a JSON value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSpec {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub duration_ms: Option<u64>,
    /// Callback id of `onClick`.
    pub on_click: Option<u32>,
}

impl NotificationSpec {
    pub(crate) fn into_options(self, callbacks: &JsCallbacks) -> NotificationOptions {
        let on_click = self.on_click.map(|id| {
            let callbacks = callbacks.clone();
            Rc::new(move || callbacks.fire(id, &Value::Null)) as Rc<dyn Fn()>
        });
        NotificationOptions {
            kind: self.kind,
            duration_ms: self.duration_ms,
            on_click,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchSpec {
    /// `None` watches the library root.
    pub paths: Option<Vec<String>>,
    pub recursive: bool,
    /// Take paths as given instead of resolving them against the library.
    pub absolute: bool,
}

impl Default for WatchSpec {
    fn default() -> Self {
        Self {
            paths: None,
            recursive: true,
            absolute: false,
        }
    }
}

impl WatchSpec {
    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            recursive: self.recursive,
            base: if self.absolute {
                WatchBase::Absolute
            } else {
                WatchBase::Library
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_spec_from_shim() {
        let spec: MenuSpec = serde_json::from_value(json!({
            "label": "Tables",
            "children": [{"label": "Insert", "action": 3}, {"label": "Align", "condition": 4}]
        }))
        .unwrap();
        let children = spec.children.as_ref().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].action, Some(3));
        assert_eq!(children[1].condition, Some(4));
    }

    #[test]
    fn test_watch_spec_defaults() {
        let spec: WatchSpec = serde_json::from_value(json!({"paths": ["notes"]})).unwrap();
        assert_eq!(spec.options(), WatchOptions::default());
        let spec: WatchSpec = serde_json::from_value(json!({"absolute": true})).unwrap();
        assert_eq!(spec.options().base, WatchBase::Absolute);
        assert!(spec.paths.is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!({})));
    }
}

//! Docked panels and the layout gaps they reserve.
//!
//! Extensions register panels on the left, right or bottom edge of the
//! editor. Every visible panel reserves its `size` on its side; the sum per
//! side is what the workspace must leave free.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Edge of the editor a panel is docked to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockSide {
    #[default]
    Left,
    Right,
    Bottom,
}

/// Options for registering or updating a panel. `None` keeps the current
/// value (or the default on registration).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockPanelOptions {
    pub side: Option<DockSide>,
    pub size: Option<f64>,
    pub visible: Option<bool>,
}

impl DockPanelOptions {
    pub fn new(side: DockSide, size: f64) -> Self {
        Self {
            side: Some(side),
            size: Some(size),
            visible: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockPanelEntry {
    pub extension_id: String,
    pub panel_id: String,
    pub side: DockSide,
    pub size: f64,
    pub visible: bool,
}

/// Space reserved on each side, in the host's layout unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DockGaps {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Registry key of a panel: `<extension>::<panel>`.
pub fn panel_key(extension_id: &str, panel_id: &str) -> String {
    format!("{extension_id}::{panel_id}")
}

/// Negative, NaN and infinite sizes reserve nothing.
fn clamp_size(size: f64) -> f64 {
    if size.is_finite() && size > 0.0 {
        size
    } else {
        0.0
    }
}

#[derive(Debug, Default)]
pub struct DockRegistry {
    panels: BTreeMap<String, DockPanelEntry>,
}

impl DockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a panel and return its key.
    pub fn register(
        &mut self,
        extension_id: &str,
        panel_id: &str,
        options: &DockPanelOptions,
    ) -> String {
        let key = panel_key(extension_id, panel_id);
        let entry = DockPanelEntry {
            extension_id: extension_id.to_string(),
            panel_id: panel_id.to_string(),
            side: options.side.unwrap_or_default(),
            size: clamp_size(options.size.unwrap_or(0.0)),
            visible: options.visible.unwrap_or(true),
        };
        self.panels.insert(key.clone(), entry);
        key
    }

    /// Apply a partial update. Returns `true` if the entry exists and any
    /// field changed.
    pub fn update(&mut self, key: &str, options: &DockPanelOptions) -> bool {
        let Some(entry) = self.panels.get_mut(key) else {
            return false;
        };
        let before = entry.clone();
        if let Some(side) = options.side {
            entry.side = side;
        }
        if let Some(size) = options.size {
            entry.size = clamp_size(size);
        }
        if let Some(visible) = options.visible {
            entry.visible = visible;
        }
        *entry != before
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.panels.remove(key).is_some()
    }

    /// Drop every panel owned by an extension and return how many went.
    pub fn remove_extension(&mut self, extension_id: &str) -> usize {
        let before = self.panels.len();
        self.panels.retain(|_, entry| entry.extension_id != extension_id);
        before - self.panels.len()
    }

    pub fn get(&self, key: &str) -> Option<&DockPanelEntry> {
        self.panels.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DockPanelEntry> {
        self.panels.values()
    }

    pub fn count_for(&self, extension_id: &str) -> usize {
        self.panels
            .values()
            .filter(|entry| entry.extension_id == extension_id)
            .count()
    }

    /// Sum of visible panel sizes per side.
    pub fn gaps(&self) -> DockGaps {
        self.panels
            .values()
            .filter(|entry| entry.visible)
            .fold(DockGaps::default(), |mut gaps, entry| {
                match entry.side {
                    DockSide::Left => gaps.left += entry.size,
                    DockSide::Right => gaps.right += entry.size,
                    DockSide::Bottom => gaps.bottom += entry.size,
                }
                gaps
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaps_sum_visible_panels_per_side() {
        let mut dock = DockRegistry::new();
        dock.register("a", "tree", &DockPanelOptions::new(DockSide::Left, 240.0));
        dock.register("b", "outline", &DockPanelOptions::new(DockSide::Left, 100.0));
        dock.register("b", "log", &DockPanelOptions::new(DockSide::Bottom, 80.0));
        let hidden = DockPanelOptions {
            side: Some(DockSide::Right),
            size: Some(300.0),
            visible: Some(false),
        };
        dock.register("c", "chat", &hidden);

        assert_eq!(
            dock.gaps(),
            DockGaps {
                left: 340.0,
                right: 0.0,
                bottom: 80.0
            }
        );
    }

    #[test]
    fn test_invalid_sizes_reserve_nothing() {
        let mut dock = DockRegistry::new();
        dock.register("a", "x", &DockPanelOptions::new(DockSide::Right, -5.0));
        dock.register("a", "y", &DockPanelOptions::new(DockSide::Right, f64::NAN));
        assert_eq!(dock.gaps().right, 0.0);
    }

    #[test]
    fn test_update_reports_changes() {
        let mut dock = DockRegistry::new();
        let key = dock.register("a", "x", &DockPanelOptions::new(DockSide::Left, 200.0));

        let hide = DockPanelOptions {
            visible: Some(false),
            ..Default::default()
        };
        assert!(dock.update(&key, &hide));
        assert!(!dock.update(&key, &hide));
        assert_eq!(dock.gaps().left, 0.0);

        let move_right = DockPanelOptions {
            side: Some(DockSide::Right),
            visible: Some(true),
            ..Default::default()
        };
        assert!(dock.update(&key, &move_right));
        assert_eq!(dock.gaps().right, 200.0);
        assert!(!dock.update("missing::key", &move_right));
    }

    #[test]
    fn test_remove_extension_only_touches_owner() {
        let mut dock = DockRegistry::new();
        dock.register("a", "x", &DockPanelOptions::new(DockSide::Left, 10.0));
        dock.register("a", "y", &DockPanelOptions::new(DockSide::Left, 10.0));
        dock.register("b", "x", &DockPanelOptions::new(DockSide::Left, 10.0));

        assert_eq!(dock.remove_extension("a"), 2);
        assert_eq!(dock.count_for("a"), 0);
        assert_eq!(dock.count_for("b"), 1);
        assert!(dock.get(&panel_key("b", "x")).is_some());
    }
}

//! IPC bridge between script extensions and their capability contexts.
//!
//! Script extensions reach the host only through the ops in [`ops`]. Every
//! op takes the caller's slot id first and resolves it to the
//! [`CapabilityContext`] of that activation, so one script cannot act
//! through another's context.

mod ops;
mod types;

use std::collections::HashMap;
use std::rc::Rc;

use deno_core::error::AnyError;

use super::context::{CapabilityContext, DockPanelHandle, Registration};
use super::isolate::JsCallbacks;

pub(crate) use ops::plume_ext;
pub use types::{MenuSpec, NotificationSpec, WatchSpec};

/// Live script activations, stored in the engine's `OpState`.
#[derive(Default)]
pub(crate) struct ScriptSlots {
    slots: HashMap<u32, ScriptSlot>,
}

impl ScriptSlots {
    pub(crate) fn insert(&mut self, slot: u32, state: ScriptSlot) {
        self.slots.insert(slot, state);
    }

    pub(crate) fn remove(&mut self, slot: u32) -> Option<ScriptSlot> {
        self.slots.remove(&slot)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn get(&self, slot: u32) -> Result<&ScriptSlot, AnyError> {
        self.slots
            .get(&slot)
            .ok_or_else(|| anyhow::anyhow!("extension context {slot} is no longer active"))
    }

    pub(crate) fn get_mut(&mut self, slot: u32) -> Result<&mut ScriptSlot, AnyError> {
        self.slots
            .get_mut(&slot)
            .ok_or_else(|| anyhow::anyhow!("extension context {slot} is no longer active"))
    }
}

/// One script activation: its context plus the handles it holds.
pub(crate) struct ScriptSlot {
    pub(crate) ctx: Rc<CapabilityContext>,
    pub(crate) callbacks: JsCallbacks,
    registrations: HashMap<u32, Registration>,
    panels: HashMap<u32, DockPanelHandle>,
    next_handle: u32,
}

impl ScriptSlot {
    pub(crate) fn new(ctx: Rc<CapabilityContext>, callbacks: JsCallbacks) -> Self {
        Self {
            ctx,
            callbacks,
            registrations: HashMap::new(),
            panels: HashMap::new(),
            next_handle: 0,
        }
    }

    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Keep a registration for later disposal. Refused registrations get
    /// handle 0.
    pub(crate) fn keep_registration(&mut self, registration: Registration) -> u32 {
        if registration.is_noop() {
            return 0;
        }
        let handle = self.next_handle();
        self.registrations.insert(handle, registration);
        handle
    }

    pub(crate) fn take_registration(&mut self, handle: u32) -> Option<Registration> {
        self.registrations.remove(&handle)
    }

    pub(crate) fn keep_panel(&mut self, panel: DockPanelHandle) -> u32 {
        let handle = self.next_handle();
        self.panels.insert(handle, panel);
        handle
    }

    pub(crate) fn panel(&self, handle: u32) -> Result<&DockPanelHandle, AnyError> {
        self.panels
            .get(&handle)
            .ok_or_else(|| anyhow::anyhow!("unknown panel handle {handle}"))
    }

    pub(crate) fn take_panel(&mut self, handle: u32) -> Option<DockPanelHandle> {
        self.panels.remove(&handle)
    }
}

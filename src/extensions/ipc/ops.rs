//! Deno ops for the script extension API.
//!
//! Every op is a thin adapter: resolve the slot to its capability context,
//! convert arguments, call the capability. Errors surface in JavaScript as
//! thrown exceptions.

use std::rc::Rc;

use deno_core::{error::AnyError, op2, OpState};
use serde_json::Value;

use crate::extensions::capabilities::{
    ApiCapability, DockCapability, DocumentCapability, FilesystemCapability, MenuCapability,
    SaveOptions, SelectionListener, StorageCapability, UiCapability, WatchCapability,
};
use crate::extensions::collaborators::{FileFilter, NoticeLevel, Selection};
use crate::extensions::context::CapabilityContext;
use crate::extensions::dock::DockPanelOptions;
use crate::extensions::fs::{BinaryData, ConflictPolicy, LibraryFile, ListOptions, SavedFile};
use crate::extensions::isolate::JsCallbacks;
use crate::extensions::watch::WatchCallback;

use super::types::{MenuSpec, NotificationSpec, WatchSpec};
use super::ScriptSlots;

fn context(state: &OpState, slot: u32) -> Result<Rc<CapabilityContext>, AnyError> {
    Ok(state.borrow::<ScriptSlots>().get(slot)?.ctx.clone())
}

fn context_and_callbacks(
    state: &OpState,
    slot: u32,
) -> Result<(Rc<CapabilityContext>, JsCallbacks), AnyError> {
    let entry = state.borrow::<ScriptSlots>().get(slot)?;
    Ok((entry.ctx.clone(), entry.callbacks.clone()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

#[op2]
fn op_plume_log(
    state: &mut OpState,
    slot: u32,
    #[string] level: String,
    #[string] message: String,
) {
    let extension = context(state, slot)
        .map(|ctx| ctx.extension_id().to_string())
        .unwrap_or_default();
    match level.as_str() {
        "error" => tracing::error!(extension = %extension, "{message}"),
        "warn" => tracing::warn!(extension = %extension, "{message}"),
        "debug" => tracing::debug!(extension = %extension, "{message}"),
        _ => tracing::info!(extension = %extension, "{message}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem Ops
// ─────────────────────────────────────────────────────────────────────────────

#[op2]
#[string]
fn op_plume_read_text_file(
    state: &mut OpState,
    slot: u32,
    #[string] path: String,
) -> Result<String, AnyError> {
    Ok(context(state, slot)?.read_text_file(&path)?)
}

#[op2]
fn op_plume_write_text_file(
    state: &mut OpState,
    slot: u32,
    #[string] path: String,
    #[string] content: String,
) -> Result<(), AnyError> {
    Ok(context(state, slot)?.write_text_file(&path, &content)?)
}

#[op2]
fn op_plume_append_text_file(
    state: &mut OpState,
    slot: u32,
    #[string] path: String,
    #[string] content: String,
) -> Result<(), AnyError> {
    Ok(context(state, slot)?.append_text_file(&path, &content)?)
}

#[op2]
#[buffer]
fn op_plume_read_file_binary(
    state: &mut OpState,
    slot: u32,
    #[string] path: String,
) -> Result<Vec<u8>, AnyError> {
    Ok(context(state, slot)?.read_file_binary(&path)?)
}

#[op2]
fn op_plume_write_file_binary(
    state: &mut OpState,
    slot: u32,
    #[string] path: String,
    #[buffer] data: &[u8],
) -> Result<(), AnyError> {
    Ok(context(state, slot)?.write_file_binary(&path, BinaryData::from(data))?)
}

#[op2]
fn op_plume_exists(state: &mut OpState, slot: u32, #[string] path: String) -> bool {
    context(state, slot).is_ok_and(|ctx| ctx.exists(&path))
}

#[op2]
fn op_plume_ensure_dir(state: &mut OpState, slot: u32, #[string] path: String) -> bool {
    context(state, slot).is_ok_and(|ctx| ctx.ensure_dir(&path))
}

#[op2]
fn op_plume_remove_path(
    state: &mut OpState,
    slot: u32,
    #[string] path: String,
    recursive: bool,
) -> bool {
    context(state, slot).is_ok_and(|ctx| ctx.remove_path(&path, recursive))
}

#[op2]
#[serde]
fn op_plume_list_library_files(
    state: &mut OpState,
    slot: u32,
    #[serde] options: ListOptions,
) -> Result<Vec<LibraryFile>, AnyError> {
    Ok(context(state, slot)?.list_library_files(&options)?)
}

#[op2]
#[serde]
fn op_plume_save_binary_to_current_folder(
    state: &mut OpState,
    slot: u32,
    #[string] file_name: String,
    #[buffer] data: &[u8],
    #[serde] options: SaveOptions,
) -> Result<SavedFile, AnyError> {
    Ok(context(state, slot)?.save_binary_to_current_folder(
        &file_name,
        BinaryData::from(data),
        &options,
    )?)
}

#[op2]
#[serde]
fn op_plume_download_file_to_current_folder(
    state: &mut OpState,
    slot: u32,
    #[string] url: String,
    #[serde] file_name: Option<String>,
    #[serde] options: SaveOptions,
) -> Result<SavedFile, AnyError> {
    Ok(context(state, slot)?.download_file_to_current_folder(
        &url,
        file_name.as_deref(),
        &options,
    )?)
}

#[op2]
#[string]
fn op_plume_save_markdown_to_current_folder(
    state: &mut OpState,
    slot: u32,
    #[string] file_name: String,
    #[string] content: String,
    #[serde] on_conflict: Option<ConflictPolicy>,
) -> Result<String, AnyError> {
    Ok(context(state, slot)?.save_markdown_to_current_folder(
        &file_name,
        &content,
        on_conflict.unwrap_or_default(),
    )?)
}

#[op2]
#[string]
fn op_plume_read_image_as_data_url(
    state: &mut OpState,
    slot: u32,
    #[string] path: String,
) -> Result<String, AnyError> {
    Ok(context(state, slot)?.read_image_as_data_url(&path)?)
}

#[op2]
#[string]
fn op_plume_plugin_data_dir(state: &mut OpState, slot: u32) -> Result<String, AnyError> {
    let dir = context(state, slot)?.plugin_data_dir()?;
    Ok(dir.to_string_lossy().into_owned())
}

#[op2]
#[string]
fn op_plume_asset_url(
    state: &mut OpState,
    slot: u32,
    #[string] relative: String,
) -> Result<String, AnyError> {
    Ok(context(state, slot)?.asset_url(&relative))
}

// ─────────────────────────────────────────────────────────────────────────────
// Watch Ops
// ─────────────────────────────────────────────────────────────────────────────

/// Subscribe to filesystem changes. Returns a registration handle.
#[op2]
fn op_plume_watch(
    state: &mut OpState,
    slot: u32,
    #[serde] spec: WatchSpec,
    callback: u32,
) -> Result<u32, AnyError> {
    let (ctx, callbacks) = context_and_callbacks(state, slot)?;
    let on_event: WatchCallback = Box::new(move |event| {
        let payload = serde_json::to_value(event)?;
        callbacks.call(callback, &payload).map(|_| ())
    });
    let registration = match &spec.paths {
        None => ctx.watch_library(on_event, spec.options())?,
        Some(paths) => {
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            ctx.watch_paths(&paths, on_event, spec.options())?
        }
    };
    Ok(state
        .borrow_mut::<ScriptSlots>()
        .get_mut(slot)?
        .keep_registration(registration))
}

/// Dispose a registration handle. Unknown handles are ignored.
#[op2]
fn op_plume_dispose(state: &mut OpState, slot: u32, handle: u32) -> Result<(), AnyError> {
    let registration = state
        .borrow_mut::<ScriptSlots>()
        .get_mut(slot)?
        .take_registration(handle);
    if let Some(registration) = registration {
        registration.dispose();
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Ops
// ─────────────────────────────────────────────────────────────────────────────

#[op2]
#[serde]
fn op_plume_storage_get(
    state: &mut OpState,
    slot: u32,
    #[string] key: String,
) -> Result<Option<Value>, AnyError> {
    Ok(context(state, slot)?.storage().get(&key))
}

#[op2]
fn op_plume_storage_set(
    state: &mut OpState,
    slot: u32,
    #[string] key: String,
    #[serde] value: Value,
) -> Result<(), AnyError> {
    Ok(context(state, slot)?.storage().set(&key, value)?)
}

#[op2]
fn op_plume_storage_remove(
    state: &mut OpState,
    slot: u32,
    #[string] key: String,
) -> Result<(), AnyError> {
    Ok(context(state, slot)?.storage().remove(&key)?)
}

#[op2]
#[serde]
fn op_plume_storage_keys(state: &mut OpState, slot: u32) -> Result<Vec<String>, AnyError> {
    Ok(context(state, slot)?.storage().keys())
}

#[op2]
fn op_plume_storage_has(state: &mut OpState, slot: u32, #[string] key: String) -> bool {
    context(state, slot).is_ok_and(|ctx| ctx.storage().has(&key))
}

#[op2]
fn op_plume_storage_clear(state: &mut OpState, slot: u32) -> Result<(), AnyError> {
    Ok(context(state, slot)?.storage().clear()?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Menu and Dock Ops
// ─────────────────────────────────────────────────────────────────────────────

/// Returns a registration handle, 0 when the host refused the entry.
#[op2]
fn op_plume_add_menu_item(
    state: &mut OpState,
    slot: u32,
    #[serde] spec: MenuSpec,
) -> Result<u32, AnyError> {
    let (ctx, callbacks) = context_and_callbacks(state, slot)?;
    let registration = ctx.add_menu_item(spec.into_descriptor(&callbacks));
    Ok(state
        .borrow_mut::<ScriptSlots>()
        .get_mut(slot)?
        .keep_registration(registration))
}

#[op2]
fn op_plume_add_context_menu_item(
    state: &mut OpState,
    slot: u32,
    #[serde] spec: MenuSpec,
) -> Result<u32, AnyError> {
    let (ctx, callbacks) = context_and_callbacks(state, slot)?;
    let registration = ctx.add_context_menu_item(spec.into_descriptor(&callbacks));
    Ok(state
        .borrow_mut::<ScriptSlots>()
        .get_mut(slot)?
        .keep_registration(registration))
}

#[op2]
fn op_plume_register_panel(
    state: &mut OpState,
    slot: u32,
    #[string] panel_id: String,
    #[serde] options: DockPanelOptions,
) -> Result<u32, AnyError> {
    let panel = context(state, slot)?.register_panel(&panel_id, options);
    Ok(state
        .borrow_mut::<ScriptSlots>()
        .get_mut(slot)?
        .keep_panel(panel))
}

#[op2]
fn op_plume_update_panel(
    state: &mut OpState,
    slot: u32,
    handle: u32,
    #[serde] options: DockPanelOptions,
) -> Result<(), AnyError> {
    state
        .borrow::<ScriptSlots>()
        .get(slot)?
        .panel(handle)?
        .update(&options);
    Ok(())
}

#[op2]
fn op_plume_dispose_panel(state: &mut OpState, slot: u32, handle: u32) -> Result<(), AnyError> {
    let panel = state
        .borrow_mut::<ScriptSlots>()
        .get_mut(slot)?
        .take_panel(handle);
    if let Some(panel) = panel {
        panel.dispose();
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// API Registry Ops
// ─────────────────────────────────────────────────────────────────────────────

/// Claims the namespace for the calling script. `api` is a JSON snapshot;
/// the live object, functions included, stays in the shared isolate and is
/// handed to other scripts by the runtime.
#[op2]
fn op_plume_register_api(
    state: &mut OpState,
    slot: u32,
    #[string] namespace: String,
    #[serde] api: Value,
) -> Result<(), AnyError> {
    Ok(context(state, slot)?.register_api(&namespace, Rc::new(api))?)
}

/// Fallback for namespaces with no live script object. Only JSON values
/// cross; native APIs are invisible to scripts.
#[op2]
#[serde]
fn op_plume_get_plugin_api(
    state: &mut OpState,
    slot: u32,
    #[string] namespace: String,
) -> Result<Option<Value>, AnyError> {
    let api = context(state, slot)?.get_plugin_api(&namespace);
    Ok(api.and_then(|api| api.downcast_ref::<Value>().cloned()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Document Ops
// ─────────────────────────────────────────────────────────────────────────────

#[op2]
#[string]
fn op_plume_get_editor_value(state: &mut OpState, slot: u32) -> Result<String, AnyError> {
    Ok(context(state, slot)?.editor_text())
}

#[op2]
fn op_plume_set_editor_value(
    state: &mut OpState,
    slot: u32,
    #[string] text: String,
) -> Result<(), AnyError> {
    context(state, slot)?.set_editor_text(&text);
    Ok(())
}

#[op2]
#[serde]
fn op_plume_get_selection(state: &mut OpState, slot: u32) -> Result<Selection, AnyError> {
    Ok(context(state, slot)?.selection())
}

#[op2]
fn op_plume_replace_range(
    state: &mut OpState,
    slot: u32,
    start: u32,
    end: u32,
    #[string] text: String,
) -> Result<(), AnyError> {
    context(state, slot)?.replace_range(start as usize, end as usize, &text);
    Ok(())
}

#[op2]
fn op_plume_insert_at_cursor(
    state: &mut OpState,
    slot: u32,
    #[string] text: String,
) -> Result<(), AnyError> {
    context(state, slot)?.insert_at_cursor(&text);
    Ok(())
}

#[op2]
#[serde]
fn op_plume_get_current_file_path(
    state: &mut OpState,
    slot: u32,
) -> Result<Option<String>, AnyError> {
    Ok(context(state, slot)?.current_file_path())
}

#[op2]
#[serde]
fn op_plume_get_library_root(state: &mut OpState, slot: u32) -> Result<Option<String>, AnyError> {
    Ok(context(state, slot)?.library_root())
}

#[op2]
#[serde]
fn op_plume_get_front_matter_raw(
    state: &mut OpState,
    slot: u32,
) -> Result<Option<String>, AnyError> {
    Ok(context(state, slot)?.front_matter_raw())
}

#[op2]
#[string]
fn op_plume_get_doc_body(state: &mut OpState, slot: u32) -> Result<String, AnyError> {
    Ok(context(state, slot)?.doc_body())
}

#[op2]
#[serde]
fn op_plume_get_doc_meta(state: &mut OpState, slot: u32) -> Result<Option<Value>, AnyError> {
    Ok(context(state, slot)?.doc_meta())
}

#[op2]
#[string]
fn op_plume_get_line_text(state: &mut OpState, slot: u32, line: u32) -> Result<String, AnyError> {
    Ok(context(state, slot)?.line_text(line as usize))
}

/// Replace the selection listener; `null` removes it.
#[op2]
fn op_plume_on_selection_change(
    state: &mut OpState,
    slot: u32,
    #[serde] callback: Option<u32>,
) -> Result<(), AnyError> {
    let (ctx, callbacks) = context_and_callbacks(state, slot)?;
    let listener = callback.map(|id| {
        Box::new(move |selection: &Selection| match serde_json::to_value(selection) {
            Ok(payload) => callbacks.fire(id, &payload),
            Err(e) => tracing::warn!(error = %e, "Failed to encode selection"),
        }) as SelectionListener
    });
    ctx.on_selection_change(listener);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// UI Ops
// ─────────────────────────────────────────────────────────────────────────────

#[op2]
fn op_plume_notice(
    state: &mut OpState,
    slot: u32,
    #[string] message: String,
    #[serde] level: Option<NoticeLevel>,
    #[serde] duration_ms: Option<u64>,
) -> Result<(), AnyError> {
    context(state, slot)?.notice(&message, level.unwrap_or_default(), duration_ms);
    Ok(())
}

#[op2]
#[string]
fn op_plume_show_notification(
    state: &mut OpState,
    slot: u32,
    #[string] message: String,
    #[serde] spec: NotificationSpec,
) -> Result<String, AnyError> {
    let (ctx, callbacks) = context_and_callbacks(state, slot)?;
    Ok(ctx.show_notification(&message, spec.into_options(&callbacks)))
}

#[op2]
fn op_plume_hide_notification(
    state: &mut OpState,
    slot: u32,
    #[string] id: String,
) -> Result<(), AnyError> {
    context(state, slot)?.hide_notification(&id);
    Ok(())
}

#[op2]
fn op_plume_confirm(state: &mut OpState, slot: u32, #[string] message: String) -> bool {
    context(state, slot).is_ok_and(|ctx| ctx.confirm(&message))
}

#[op2]
#[string]
fn op_plume_pick_directory(
    state: &mut OpState,
    slot: u32,
    #[serde] default_path: Option<String>,
) -> Result<String, AnyError> {
    Ok(context(state, slot)?.pick_directory(default_path.as_deref()))
}

#[op2]
#[serde]
fn op_plume_pick_doc_files(
    state: &mut OpState,
    slot: u32,
    multiple: bool,
) -> Result<Vec<String>, AnyError> {
    Ok(context(state, slot)?.pick_doc_files(multiple))
}

#[op2]
#[serde]
fn op_plume_save_file_with_dialog(
    state: &mut OpState,
    slot: u32,
    #[buffer] data: &[u8],
    #[serde] default_name: Option<String>,
    #[serde] filters: Vec<FileFilter>,
) -> Result<Option<String>, AnyError> {
    Ok(context(state, slot)?.save_file_with_dialog(
        BinaryData::from(data),
        default_name.as_deref(),
        filters,
    )?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Extension Registration
// ─────────────────────────────────────────────────────────────────────────────

deno_core::extension!(
    plume_ext,
    ops = [
        // Logging
        op_plume_log,
        // Filesystem
        op_plume_read_text_file,
        op_plume_write_text_file,
        op_plume_append_text_file,
        op_plume_read_file_binary,
        op_plume_write_file_binary,
        op_plume_exists,
        op_plume_ensure_dir,
        op_plume_remove_path,
        op_plume_list_library_files,
        op_plume_save_binary_to_current_folder,
        op_plume_download_file_to_current_folder,
        op_plume_save_markdown_to_current_folder,
        op_plume_read_image_as_data_url,
        op_plume_plugin_data_dir,
        op_plume_asset_url,
        // Watch
        op_plume_watch,
        op_plume_dispose,
        // Storage
        op_plume_storage_get,
        op_plume_storage_set,
        op_plume_storage_remove,
        op_plume_storage_keys,
        op_plume_storage_has,
        op_plume_storage_clear,
        // Menus and dock
        op_plume_add_menu_item,
        op_plume_add_context_menu_item,
        op_plume_register_panel,
        op_plume_update_panel,
        op_plume_dispose_panel,
        // API registry
        op_plume_register_api,
        op_plume_get_plugin_api,
        // Document
        op_plume_get_editor_value,
        op_plume_set_editor_value,
        op_plume_get_selection,
        op_plume_replace_range,
        op_plume_insert_at_cursor,
        op_plume_get_current_file_path,
        op_plume_get_library_root,
        op_plume_get_front_matter_raw,
        op_plume_get_doc_body,
        op_plume_get_doc_meta,
        op_plume_get_line_text,
        op_plume_on_selection_change,
        // UI
        op_plume_notice,
        op_plume_show_notification,
        op_plume_hide_notification,
        op_plume_confirm,
        op_plume_pick_directory,
        op_plume_pick_doc_files,
        op_plume_save_file_with_dialog,
    ],
    esm_entry_point = "ext:plume_ext/runtime.js",
    esm = [dir "src/extensions/js", "runtime.js"],
);

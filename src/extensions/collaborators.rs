//! Boundary to the rest of the editor.
//!
//! The host never touches the editor widget, dialogs or the network
//! directly; it goes through these traits. [`HeadlessWorkspace`] implements
//! the editor and UI sides in memory for the CLI and tests.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dock::DockGaps;
use super::error::{ExtensionError, ExtensionResult};

/// Current editor selection as character offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    #[default]
    Ok,
    Err,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Error,
}

#[derive(Clone, Default)]
pub struct NotificationOptions {
    pub kind: NotificationKind,
    /// `None` keeps the notification until hidden.
    pub duration_ms: Option<u64>,
    pub on_click: Option<Rc<dyn Fn()>>,
}

impl fmt::Debug for NotificationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationOptions")
            .field("kind", &self.kind)
            .field("duration_ms", &self.duration_ms)
            .field("clickable", &self.on_click.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFilter {
    pub name: String,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenDialogOptions {
    pub title: Option<String>,
    pub default_path: Option<String>,
    pub filters: Vec<FileFilter>,
    pub multiple: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveDialogOptions {
    pub title: Option<String>,
    pub default_path: Option<String>,
    pub filters: Vec<FileFilter>,
}

/// Editor widget and document state.
pub trait EditorHost {
    fn editor_text(&self) -> String;
    fn set_editor_text(&self, text: &str);
    fn selection(&self) -> Selection;
    fn replace_range(&self, start: usize, end: usize, text: &str);
    fn insert_at_cursor(&self, text: &str);
    fn current_file_path(&self) -> Option<String>;
    fn library_root(&self) -> Option<String>;
    fn is_preview_mode(&self) -> bool;
    fn is_wysiwyg_mode(&self) -> bool;
    fn schedule_render(&self);
}

/// Notices, dialogs and layout.
pub trait UiHost {
    fn show_notice(&self, message: &str, level: NoticeLevel, duration_ms: Option<u64>);
    fn show_notification(&self, message: &str, options: NotificationOptions) -> String;
    fn hide_notification(&self, id: &str);
    fn confirm(&self, message: &str, title: &str) -> bool;
    fn open_file_dialog(&self, options: &OpenDialogOptions) -> Vec<String>;
    fn save_file_dialog(&self, options: &SaveDialogOptions) -> Option<String>;
    fn pick_directory_dialog(&self, default_path: Option<&str>) -> Option<String>;
    fn relayout_dock(&self, gaps: DockGaps);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpClient {
    fn get_bytes(&self, url: &str) -> ExtensionResult<HttpResponse>;
}

/// Blocking `reqwest` client.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> ExtensionResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("plume/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExtensionError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get_bytes(&self, url: &str) -> ExtensionResult<HttpResponse> {
        // The blocking client must not run on an async runtime thread.
        let fetch = || -> Result<HttpResponse, reqwest::Error> {
            let response = self.client.get(url).send()?;
            let status = response.status().as_u16();
            let body = response.bytes()?.to_vec();
            Ok(HttpResponse { status, body })
        };
        std::thread::scope(|s| s.spawn(fetch).join())
            .map_err(|_| ExtensionError::Http(format!("request thread panicked: {url}")))?
            .map_err(|e| ExtensionError::Http(e.to_string()))
    }
}

/// HTTP client for hosts without network access.
#[derive(Debug, Default)]
pub struct OfflineClient;

impl HttpClient for OfflineClient {
    fn get_bytes(&self, url: &str) -> ExtensionResult<HttpResponse> {
        Err(ExtensionError::Http(format!("network disabled: {url}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotice {
    pub message: String,
    pub level: NoticeLevel,
}

/// In-memory editor and UI.
///
/// Dialogs answer from preset values; notices and layout changes are
/// recorded for inspection.
#[derive(Default)]
pub struct HeadlessWorkspace {
    text: RefCell<String>,
    selection: Cell<(usize, usize)>,
    current_file: RefCell<Option<String>>,
    library_root: RefCell<Option<String>>,
    preview: Cell<bool>,
    renders: Cell<usize>,
    notices: RefCell<Vec<RecordedNotice>>,
    notifications: RefCell<Vec<(String, String)>>,
    next_notification: Cell<u64>,
    confirm_answer: Cell<bool>,
    dialog_paths: RefCell<Vec<String>>,
    dock_layouts: RefCell<Vec<DockGaps>>,
}

impl HeadlessWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(root: impl Into<String>) -> Self {
        let ws = Self::default();
        ws.set_library_root(Some(root.into()));
        ws
    }

    pub fn set_library_root(&self, root: Option<String>) {
        *self.library_root.borrow_mut() = root;
    }

    pub fn set_current_file(&self, path: Option<String>) {
        *self.current_file.borrow_mut() = path;
    }

    /// Select `start..end`, clamped to the text length.
    pub fn select(&self, start: usize, end: usize) {
        let len = self.text.borrow().chars().count();
        let (a, b) = (start.min(len), end.min(len));
        self.selection.set((a.min(b), a.max(b)));
    }

    pub fn set_preview(&self, preview: bool) {
        self.preview.set(preview);
    }

    pub fn set_confirm_answer(&self, answer: bool) {
        self.confirm_answer.set(answer);
    }

    /// Paths returned by the next file, save or directory dialogs.
    pub fn set_dialog_paths(&self, paths: Vec<String>) {
        *self.dialog_paths.borrow_mut() = paths;
    }

    pub fn notices(&self) -> Vec<RecordedNotice> {
        self.notices.borrow().clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.borrow().clone()
    }

    pub fn dock_layouts(&self) -> Vec<DockGaps> {
        self.dock_layouts.borrow().clone()
    }

    pub fn render_count(&self) -> usize {
        self.renders.get()
    }

    fn char_to_byte(text: &str, idx: usize) -> usize {
        text.char_indices()
            .nth(idx)
            .map_or(text.len(), |(byte, _)| byte)
    }
}

impl EditorHost for HeadlessWorkspace {
    fn editor_text(&self) -> String {
        self.text.borrow().clone()
    }

    fn set_editor_text(&self, text: &str) {
        *self.text.borrow_mut() = text.to_string();
        let len = text.chars().count();
        self.selection.set((len, len));
    }

    fn selection(&self) -> Selection {
        let (start, end) = self.selection.get();
        let text = self.text.borrow();
        let text = text.chars().skip(start).take(end - start).collect();
        Selection { start, end, text }
    }

    fn replace_range(&self, start: usize, end: usize, replacement: &str) {
        let mut text = self.text.borrow_mut();
        let len = text.chars().count();
        let (start, end) = (start.min(len), end.min(len));
        let (start, end) = (start.min(end), start.max(end));
        let (a, b) = (Self::char_to_byte(&text, start), Self::char_to_byte(&text, end));
        text.replace_range(a..b, replacement);
        let caret = start + replacement.chars().count();
        self.selection.set((caret, caret));
    }

    fn insert_at_cursor(&self, text: &str) {
        let (start, end) = self.selection.get();
        self.replace_range(start, end, text);
    }

    fn current_file_path(&self) -> Option<String> {
        self.current_file.borrow().clone()
    }

    fn library_root(&self) -> Option<String> {
        self.library_root.borrow().clone()
    }

    fn is_preview_mode(&self) -> bool {
        self.preview.get()
    }

    fn is_wysiwyg_mode(&self) -> bool {
        false
    }

    fn schedule_render(&self) {
        self.renders.set(self.renders.get() + 1);
    }
}

impl UiHost for HeadlessWorkspace {
    fn show_notice(&self, message: &str, level: NoticeLevel, _duration_ms: Option<u64>) {
        tracing::info!(?level, "{message}");
        self.notices.borrow_mut().push(RecordedNotice {
            message: message.to_string(),
            level,
        });
    }

    fn show_notification(&self, message: &str, _options: NotificationOptions) -> String {
        let n = self.next_notification.get() + 1;
        self.next_notification.set(n);
        let id = format!("notification-{n}");
        self.notifications
            .borrow_mut()
            .push((id.clone(), message.to_string()));
        id
    }

    fn hide_notification(&self, id: &str) {
        self.notifications.borrow_mut().retain(|(nid, _)| nid != id);
    }

    fn confirm(&self, _message: &str, _title: &str) -> bool {
        self.confirm_answer.get()
    }

    fn open_file_dialog(&self, options: &OpenDialogOptions) -> Vec<String> {
        let paths = std::mem::take(&mut *self.dialog_paths.borrow_mut());
        if options.multiple {
            paths
        } else {
            paths.into_iter().take(1).collect()
        }
    }

    fn save_file_dialog(&self, _options: &SaveDialogOptions) -> Option<String> {
        let mut paths = self.dialog_paths.borrow_mut();
        if paths.is_empty() {
            None
        } else {
            Some(paths.remove(0))
        }
    }

    fn pick_directory_dialog(&self, _default_path: Option<&str>) -> Option<String> {
        self.save_file_dialog(&SaveDialogOptions::default())
    }

    fn relayout_dock(&self, gaps: DockGaps) {
        self.dock_layouts.borrow_mut().push(gaps);
    }
}

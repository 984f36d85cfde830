//! Embedded JavaScript engine for script extensions.
//!
//! One V8 isolate serves every script extension of a loader. Each activation
//! gets its own numbered slot: the JS context object passes the slot to every
//! op, and the op acts through that slot's capability context. Re-activating
//! an extension imports a fresh instance of its entry module.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use anyhow::anyhow;
use deno_core::{
    serde_v8, v8, FsModuleLoader, JsRuntime, ModuleSpecifier, OpState, PollEventLoopOptions,
    RuntimeOptions,
};
use serde_json::{json, Value};

use super::context::{CapabilityContext, SettingsContext};
use super::disposer::ignore_non_fatal;
use super::error::{ExtensionError, ExtensionResult};
use super::ipc::{plume_ext, ScriptSlot, ScriptSlots};
use super::manifest::ExtensionRecord;
use super::module::{ExtensionModule, ModuleLoader};

pub(crate) struct ScriptEngine {
    runtime: RefCell<JsRuntime>,
    op_state: Rc<RefCell<OpState>>,
    tokio: tokio::runtime::Runtime,
    next_slot: Cell<u32>,
}

impl ScriptEngine {
    fn new() -> ExtensionResult<Rc<Self>> {
        let tokio = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ExtensionError::io("Failed to start script runtime", e))?;

        let mut runtime = JsRuntime::new(RuntimeOptions {
            module_loader: Some(Rc::new(FsModuleLoader)),
            extensions: vec![plume_ext::init_ops_and_esm()],
            ..Default::default()
        });
        let op_state = runtime.op_state();
        op_state.borrow_mut().put(ScriptSlots::default());
        tracing::debug!("Script engine started");

        Ok(Rc::new(Self {
            runtime: RefCell::new(runtime),
            op_state,
            tokio,
            next_slot: Cell::new(0),
        }))
    }

    fn open_slot(self: &Rc<Self>, ctx: Rc<CapabilityContext>) -> u32 {
        let slot = self.next_slot.get() + 1;
        self.next_slot.set(slot);
        let callbacks = JsCallbacks {
            engine: Rc::downgrade(self),
            slot,
        };
        self.op_state
            .borrow_mut()
            .borrow_mut::<ScriptSlots>()
            .insert(slot, ScriptSlot::new(ctx, callbacks));
        slot
    }

    fn close_slot(&self, slot: u32) {
        let removed = self
            .op_state
            .borrow_mut()
            .borrow_mut::<ScriptSlots>()
            .remove(slot);
        drop(removed);
        ignore_non_fatal("release script slot", || {
            self.eval("plume:release", format!("globalThis.__plume.release({slot})"))
        });
    }

    /// Run a script and settle pending promises. Returns the script's
    /// completion value, awaited when it is a promise.
    pub(crate) fn eval(&self, name: &'static str, code: String) -> ExtensionResult<Value> {
        let mut runtime = self.runtime.try_borrow_mut().map_err(|_| busy())?;
        let global = runtime
            .execute_script(name, code)
            .map_err(|e| script_error(e.into()))?;
        let resolved = Box::pin(runtime.resolve(global));
        let global = self
            .tokio
            .block_on(async {
                let value = runtime
                    .with_event_loop_promise(resolved, PollEventLoopOptions::default())
                    .await?;
                runtime
                    .run_event_loop(PollEventLoopOptions::default())
                    .await?;
                Ok::<_, anyhow::Error>(value)
            })
            .map_err(script_error)?;
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, global);
        serde_v8::from_v8::<Value>(scope, local).map_err(|e| script_error(e.into()))
    }

    /// Load and evaluate a module from source, waiting for top-level await.
    fn run_module(&self, specifier: &ModuleSpecifier, code: String) -> ExtensionResult<()> {
        let mut runtime = self.runtime.try_borrow_mut().map_err(|_| busy())?;
        self.tokio
            .block_on(async {
                let id = runtime
                    .load_side_es_module_from_code(specifier, code)
                    .await?;
                let evaluation = runtime.mod_evaluate(id);
                runtime
                    .run_event_loop(PollEventLoopOptions::default())
                    .await?;
                evaluation.await?;
                Ok::<_, anyhow::Error>(())
            })
            .map_err(script_error)
    }

    #[cfg(test)]
    fn live_slots(&self) -> usize {
        self.op_state.borrow().borrow::<ScriptSlots>().len()
    }
}

fn script_error(error: anyhow::Error) -> ExtensionError {
    ExtensionError::JavaScript(format!("{error:#}"))
}

fn busy() -> ExtensionError {
    ExtensionError::JavaScript("script engine is busy".to_string())
}

/// Calls back into one slot's JS functions from host code.
#[derive(Clone)]
pub(crate) struct JsCallbacks {
    engine: Weak<ScriptEngine>,
    slot: u32,
}

impl JsCallbacks {
    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }

    /// Invoke a registered JS function and return its result.
    pub(crate) fn call(&self, callback: u32, payload: &Value) -> anyhow::Result<Value> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| anyhow!("script engine has shut down"))?;
        let payload = serde_json::to_string(payload)?;
        Ok(engine.eval(
            "plume:callback",
            format!(
                "globalThis.__plume.fire({}, {callback}, {payload})",
                self.slot
            ),
        )?)
    }

    /// Invoke a JS function for its side effects, logging failures.
    pub(crate) fn fire(&self, callback: u32, payload: &Value) {
        if let Err(e) = self.call(callback, payload) {
            tracing::warn!(slot = self.slot, callback, error = %e, "Script callback failed");
        }
    }
}

/// Loads `.js`/`.mjs` entry points into a shared script engine.
///
/// The engine starts on first use.
#[derive(Default)]
pub struct ScriptLoader {
    engine: RefCell<Option<Rc<ScriptEngine>>>,
}

impl ScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn engine(&self) -> ExtensionResult<Rc<ScriptEngine>> {
        if let Some(engine) = self.engine.borrow().as_ref() {
            return Ok(engine.clone());
        }
        let engine = ScriptEngine::new()?;
        *self.engine.borrow_mut() = Some(engine.clone());
        Ok(engine)
    }
}

impl ModuleLoader for ScriptLoader {
    fn load(&self, record: &ExtensionRecord) -> ExtensionResult<Box<dyn ExtensionModule>> {
        let main = record.main_path();
        let is_script = main
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "js" | "mjs"));
        if !is_script || !main.is_file() {
            return Err(ExtensionError::LoadFailed {
                extension: record.id.clone(),
                message: format!("script entry point not found at {}", main.display()),
            });
        }
        Ok(Box::new(ScriptModule {
            engine: self.engine()?,
            record: record.clone(),
            slot: None,
        }))
    }
}

struct ScriptModule {
    engine: Rc<ScriptEngine>,
    record: ExtensionRecord,
    slot: Option<u32>,
}

impl ScriptModule {
    fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.engine.close_slot(slot);
        }
    }

    fn bootstrap(&self, slot: u32) -> anyhow::Result<(ModuleSpecifier, String)> {
        let dir = &self.record.dir;
        let specifier = ModuleSpecifier::from_file_path(dir.join(format!("__plume_activate_{slot}.js")))
            .map_err(|()| anyhow!("extension directory is not absolute: {}", dir.display()))?;
        let entry = format!(
            "./{}?activation={slot}",
            self.record.main.trim_start_matches("./")
        );
        let meta = json!({
            "id": self.record.id,
            "name": self.record.name,
            "version": self.record.version,
            "dir": dir.to_string_lossy(),
        });
        let code = format!(
            "import * as mod from {entry};\nawait globalThis.__plume.activate({slot}, mod, {meta});\n",
            entry = serde_json::to_string(&entry)?,
        );
        Ok((specifier, code))
    }
}

impl ExtensionModule for ScriptModule {
    fn activate(&mut self, ctx: Rc<CapabilityContext>) -> anyhow::Result<()> {
        let slot = self.engine.open_slot(ctx);
        self.slot = Some(slot);
        let result = self
            .bootstrap(slot)
            .and_then(|(specifier, code)| Ok(self.engine.run_module(&specifier, code)?));
        if result.is_err() {
            self.release();
        } else {
            tracing::debug!(extension = %self.record.id, slot, "Script module evaluated");
        }
        result
    }

    /// Awaits the extension's `deactivate()` before its slot is released.
    fn deactivate(&mut self) -> anyhow::Result<()> {
        let Some(slot) = self.slot else {
            return Ok(());
        };
        let result = self.engine.eval(
            "plume:deactivate",
            format!("globalThis.__plume.deactivate({slot})"),
        );
        self.release();
        result?;
        Ok(())
    }

    fn open_settings(&mut self, _settings: &SettingsContext<'_>) -> Option<anyhow::Result<()>> {
        let slot = self.slot?;
        match self.engine.eval(
            "plume:settings",
            format!("globalThis.__plume.openSettings({slot})"),
        ) {
            Ok(Value::Bool(false)) => None,
            Ok(_) => Some(Ok(())),
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl Drop for ScriptModule {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::extensions::collaborators::HeadlessWorkspace;
    use crate::extensions::host::{ExtensionHost, HostCollaborators};
    use crate::extensions::storage::HostStore;
    use crate::extensions::watch::testing::MockBackend;
    use crate::extensions::watch::WatchEventKind;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const PROVIDER: &str = r#"
let context;
let clicks = 0;

export function activate(ctx) {
  context = ctx;
  ctx.addMenuItem({
    label: "Greet",
    onClick() {
      clicks += 1;
      ctx.storage.set("clicks", clicks);
      ctx.ui.notice(`clicks=${ctx.storage.get("clicks")}`);
    },
  });
  ctx.watchPaths("notes", (event) => ctx.ui.notice(`watch ${event.kind}`));
  ctx.watchPaths(["/outside"], () => {}, { base: "absolute" });

  const first = ctx.saveBinaryToCurrentFolder({
    fileName: "x.png",
    data: [1, 2, 3],
    onConflict: "renameAuto",
  });
  const second = ctx.saveBinaryToCurrentFolder({ fileName: "x.png", data: [4] });
  ctx.ui.notice(`saved ${first.relativePath} ${second.relativePath}`);
  ctx.saveMarkdownToCurrentFolder({ fileName: "note.md", content: "# Hi" });

  ctx.registerAPI("greeter", { name: "greeter", greet: (who) => `hello ${who}` });
}

export async function deactivate() {
  await Promise.resolve();
  context.ui.notice("stopped");
}
"#;

    const CONSUMER: &str = r#"
export function activate(ctx) {
  ctx.ui.notice(ctx.getPluginAPI("greeter").greet("consumer"));
  ctx.addMenuItem({
    label: "Check",
    onClick: () => ctx.ui.notice(`api ${ctx.getPluginAPI("greeter")}`),
  });
}
"#;

    fn write_extension(root: &Path, id: &str, source: &str) -> ExtensionRecord {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.js"), source).unwrap();
        ExtensionRecord::new(id, dir)
    }

    fn click(host: &ExtensionHost, extension_id: &str) {
        let entries = host.plugin_menu_entries();
        let entry = entries
            .iter()
            .find(|e| e.extension_id == extension_id)
            .unwrap();
        assert!(entry.descriptor.activate());
    }

    #[test]
    fn test_script_extension_end_to_end() {
        let temp = TempDir::new().unwrap();
        let library = temp.path().join("lib");
        std::fs::create_dir_all(&library).unwrap();
        let provider = write_extension(temp.path(), "provider", PROVIDER);
        let consumer = write_extension(temp.path(), "consumer", CONSUMER);

        let workspace = Rc::new(HeadlessWorkspace::with_library(
            library.to_string_lossy().into_owned(),
        ));
        let backend = MockBackend::default();
        let engine = ScriptEngine::new().unwrap();
        let loader = ScriptLoader {
            engine: RefCell::new(Some(engine.clone())),
        };
        let mut config = HostConfig::default();
        config.paths.app_data_dir = Some(temp.path().join("data").to_string_lossy().into_owned());
        let mut host = ExtensionHost::with_store(
            config,
            HostCollaborators::headless(workspace.clone()),
            HostStore::in_memory(),
        )
        .with_loader(loader)
        .with_watch_backend(backend.clone());

        host.activate(&provider).unwrap();
        host.activate(&consumer).unwrap();
        assert_eq!(engine.live_slots(), 2);

        assert_eq!(std::fs::read(library.join("x.png")).unwrap(), [1, 2, 3]);
        assert_eq!(std::fs::read(library.join("x-1.png")).unwrap(), [4]);
        assert_eq!(std::fs::read_to_string(library.join("note.md")).unwrap(), "# Hi");
        {
            let sinks = backend.state.sinks.borrow();
            assert_eq!(sinks.len(), 2);
            assert_eq!(sinks[0].0, vec![library.join("notes")]);
            assert_eq!(sinks[1].0, vec![PathBuf::from("/outside")]);
        }

        click(&host, "provider");
        let changed = library.join("notes").join("a.md");
        backend.emit(0, WatchEventKind::Create, &changed.to_string_lossy());
        assert_eq!(host.pump_watch_events(), 1);

        // Other extensions see the live object; the host keeps a JSON copy.
        let api = host.get_plugin_api("greeter").unwrap();
        assert_eq!(api.downcast_ref::<Value>(), Some(&json!({"name": "greeter"})));

        let report = host.deactivate("provider").unwrap();
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.module_error, None);
        assert_eq!(host.inspector().registrations_for("provider"), 0);
        assert!(host.get_plugin_api("greeter").is_none());
        assert_eq!(engine.live_slots(), 1);

        let stats = engine
            .eval("test:stats", "globalThis.__plume.stats()".to_string())
            .unwrap();
        assert_eq!(stats["instances"].as_f64(), Some(1.0));
        assert_eq!(stats["callbacks"].as_f64(), Some(1.0));
        assert_eq!(stats["apis"].as_f64(), Some(0.0));

        backend.emit(0, WatchEventKind::Modify, &changed.to_string_lossy());
        assert_eq!(host.pump_watch_events(), 0);
        click(&host, "consumer");

        let messages: Vec<String> = workspace.notices().into_iter().map(|n| n.message).collect();
        assert_eq!(
            messages,
            [
                "saved x.png x-1.png",
                "hello consumer",
                "clicks=1",
                "watch create",
                "stopped",
                "api null",
            ]
        );
    }

    #[test]
    fn test_script_errors_are_javascript_errors() {
        let engine = ScriptEngine::new().unwrap();
        assert!(matches!(
            engine.eval("test:throw", "throw new Error('boom')".to_string()),
            Err(ExtensionError::JavaScript(message)) if message.contains("boom")
        ));
        assert!(matches!(
            engine.eval("test:reject", "Promise.reject(new Error('later'))".to_string()),
            Err(ExtensionError::JavaScript(message)) if message.contains("later")
        ));
    }

    #[test]
    fn test_loader_requires_script_entry() {
        let temp = TempDir::new().unwrap();
        let loader = ScriptLoader::new();

        let missing = ExtensionRecord::new("missing", temp.path());
        assert!(matches!(
            loader.load(&missing),
            Err(ExtensionError::LoadFailed { .. })
        ));

        std::fs::write(temp.path().join("main.wasm"), b"\0asm").unwrap();
        let mut wasm = ExtensionRecord::new("wasm", temp.path());
        wasm.main = "main.wasm".to_string();
        assert!(loader.load(&wasm).is_err());
        assert!(loader.engine.borrow().is_none());
    }

    #[test]
    fn test_bootstrap_imports_fresh_instance() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("main.js"), "export function activate() {}").unwrap();
        let record = ExtensionRecord::new("hello", temp.path());
        let engine = ScriptEngine::new().unwrap();
        let module = ScriptModule {
            engine,
            record,
            slot: None,
        };

        let (specifier, code) = module.bootstrap(7).unwrap();
        assert!(specifier.path().ends_with("__plume_activate_7.js"));
        assert!(code.contains(r#"from "./main.js?activation=7""#));
        assert!(code.contains("__plume.activate(7, mod, "));
    }
}

//! Extension code and how it is loaded.

use std::collections::HashMap;
use std::rc::Rc;

use super::context::{CapabilityContext, SettingsContext};
use super::error::{ExtensionError, ExtensionResult};
use super::manifest::ExtensionRecord;

/// Lifecycle hooks implemented by extension code.
pub trait ExtensionModule {
    /// Called once per activation with a fresh context.
    fn activate(&mut self, ctx: Rc<CapabilityContext>) -> anyhow::Result<()>;

    /// Called before the host tears down the extension's registrations.
    fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Settings entry point. `None` means the extension has no settings.
    fn open_settings(&mut self, _settings: &SettingsContext<'_>) -> Option<anyhow::Result<()>> {
        None
    }
}

/// Turns an install record into runnable extension code.
pub trait ModuleLoader {
    fn load(&self, record: &ExtensionRecord) -> ExtensionResult<Box<dyn ExtensionModule>>;
}

pub type ModuleFactory = Box<dyn Fn(&ExtensionRecord) -> Box<dyn ExtensionModule>>;

/// Loader for extensions compiled into the host, keyed by extension id.
#[derive(Default)]
pub struct NativeLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        extension_id: impl Into<String>,
        factory: impl Fn(&ExtensionRecord) -> Box<dyn ExtensionModule> + 'static,
    ) -> &mut Self {
        self.factories.insert(extension_id.into(), Box::new(factory));
        self
    }

    pub fn with(
        mut self,
        extension_id: impl Into<String>,
        factory: impl Fn(&ExtensionRecord) -> Box<dyn ExtensionModule> + 'static,
    ) -> Self {
        self.register(extension_id, factory);
        self
    }

    pub fn contains(&self, extension_id: &str) -> bool {
        self.factories.contains_key(extension_id)
    }
}

impl ModuleLoader for NativeLoader {
    fn load(&self, record: &ExtensionRecord) -> ExtensionResult<Box<dyn ExtensionModule>> {
        let factory = self
            .factories
            .get(&record.id)
            .ok_or_else(|| ExtensionError::LoadFailed {
                extension: record.id.clone(),
                message: "no native module registered".to_string(),
            })?;
        Ok(factory(record))
    }
}

/// Tries each loader in turn and returns the first module produced.
#[derive(Default)]
pub struct LoaderChain {
    loaders: Vec<Box<dyn ModuleLoader>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }
}

impl ModuleLoader for LoaderChain {
    fn load(&self, record: &ExtensionRecord) -> ExtensionResult<Box<dyn ExtensionModule>> {
        let mut last_error = None;
        for loader in &self.loaders {
            match loader.load(record) {
                Ok(module) => return Ok(module),
                Err(e) => {
                    tracing::debug!(extension = %record.id, error = %e, "Loader declined extension");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ExtensionError::LoadFailed {
            extension: record.id.clone(),
            message: "no module loader configured".to_string(),
        }))
    }
}

/// Loader used when none is configured: native modules, then scripts when
/// the embedded engine is compiled in.
pub fn default_loader() -> LoaderChain {
    let chain = LoaderChain::new().with(NativeLoader::new());
    #[cfg(feature = "js-runtime")]
    let chain = chain.with(super::isolate::ScriptLoader::new());
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl ExtensionModule for Noop {
        fn activate(&mut self, _ctx: Rc<CapabilityContext>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_native_loader_by_id() {
        let loader = NativeLoader::new().with("known", |_| Box::new(Noop));
        assert!(loader.contains("known"));
        assert!(loader.load(&ExtensionRecord::new("known", "/ext/known")).is_ok());
        assert!(matches!(
            loader.load(&ExtensionRecord::new("other", "/ext/other")),
            Err(ExtensionError::LoadFailed { .. })
        ));
    }

    #[test]
    fn test_loader_chain_falls_through() {
        let chain = LoaderChain::new()
            .with(NativeLoader::new())
            .with(NativeLoader::new().with("b", |_| Box::new(Noop)));
        assert!(chain.load(&ExtensionRecord::new("b", "/ext/b")).is_ok());
        assert!(chain.load(&ExtensionRecord::new("c", "/ext/c")).is_err());
        assert!(LoaderChain::new()
            .load(&ExtensionRecord::new("c", "/ext/c"))
            .is_err());
    }
}

//! Declaration context handed to a unit while its declarative body runs.
//!
//! The session opens one context per fetch and seals it when the host
//! reports completion. Hosts may clone the handle into other tasks; any
//! declaration arriving after the seal is rejected.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Environment;
use crate::error::{BlockError, LoaderError, Result};
use crate::namespace::split_dotted;
use crate::path::{PathError, VirtualPath};
use crate::unit::CodeBlock;

/// Everything a unit declared while it was being loaded.
#[derive(Debug, Default)]
pub struct Discovery {
    pub imports: Vec<String>,
    pub blocks: Vec<CodeBlock>,
    pub namespaces: Vec<String>,
}

/// Declaration-time filters for an import.
#[derive(Default)]
pub struct ImportOptions {
    pub environments: Option<Vec<Environment>>,
    pub guard: Option<Box<dyn Fn() -> std::result::Result<bool, BlockError> + Send>>,
}

impl ImportOptions {
    pub fn environments<I: IntoIterator<Item = Environment>>(environments: I) -> Self {
        Self {
            environments: Some(environments.into_iter().collect()),
            guard: None,
        }
    }

    pub fn guarded<G>(mut self, guard: G) -> Self
    where
        G: Fn() -> std::result::Result<bool, BlockError> + Send + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }
}

#[derive(Debug)]
struct ContextState {
    key: VirtualPath,
    directory: VirtualPath,
    environment: Environment,
    open: bool,
    discovery: Discovery,
}

#[derive(Clone, Debug)]
pub struct UnitContext {
    inner: Arc<Mutex<ContextState>>,
}

impl UnitContext {
    pub(crate) fn open(key: VirtualPath, directory: VirtualPath, environment: Environment) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextState {
                key,
                directory,
                environment,
                open: true,
                discovery: Discovery::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, ContextState>> {
        let guard = self.lock();
        if !guard.open {
            return Err(LoaderError::DeclarationOutsideContext {
                key: Some(guard.key.clone()),
            });
        }
        Ok(guard)
    }

    pub fn key(&self) -> VirtualPath {
        self.lock().key.clone()
    }

    pub fn directory(&self) -> VirtualPath {
        self.lock().directory.clone()
    }

    pub fn environment(&self) -> Environment {
        self.lock().environment
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Declares a dependency on `reference`, resolved against this unit's
    /// directory once the unit has finished loading.
    pub fn import(&self, reference: &str) -> Result<()> {
        let mut state = self.lock_open()?;
        if reference.trim().is_empty() {
            return Err(LoaderError::InvalidReference {
                reference: reference.to_string(),
                source: PathError::EmptyReference,
            });
        }
        state.discovery.imports.push(reference.to_string());
        Ok(())
    }

    /// Like [`import`](Self::import), but dropped when the session's
    /// environment is excluded or the guard does not hold. Returns whether
    /// the import was recorded.
    pub fn import_with(&self, reference: &str, options: ImportOptions) -> Result<bool> {
        let environment = self.lock_open()?.environment;
        if let Some(envs) = &options.environments {
            if !envs.contains(&environment) {
                tracing::debug!("import {} skipped in {} environment", reference, environment);
                return Ok(false);
            }
        }
        if let Some(guard) = &options.guard {
            match guard() {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(err) => {
                    tracing::warn!("import guard for {} failed: {}", reference, err);
                    return Ok(false);
                }
            }
        }
        self.import(reference)?;
        Ok(true)
    }

    pub fn code(&self, block: CodeBlock) -> Result<()> {
        self.lock_open()?.discovery.blocks.push(block);
        Ok(())
    }

    pub fn namespace(&self, dotted: &str) -> Result<()> {
        let mut state = self.lock_open()?;
        split_dotted(dotted)?;
        state.discovery.namespaces.push(dotted.to_string());
        Ok(())
    }

    /// Closes the context and hands back what was declared.
    pub(crate) fn seal(&self) -> Discovery {
        let mut state = self.lock();
        state.open = false;
        std::mem::take(&mut state.discovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_context(environment: Environment) -> UnitContext {
        let key: VirtualPath = "/app/a.js".parse().unwrap();
        UnitContext::open(key.clone(), key.directory(), environment)
    }

    #[test]
    fn collects_declarations_in_order() {
        let cx = open_context(Environment::Foreground);
        cx.import("./b.js").unwrap();
        cx.import("./c.js").unwrap();
        cx.namespace("app.util").unwrap();
        cx.code(CodeBlock::new("first", |_| Ok(()))).unwrap();
        cx.code(CodeBlock::new("second", |_| Ok(()))).unwrap();

        let discovery = cx.seal();
        assert_eq!(discovery.imports, vec!["./b.js", "./c.js"]);
        assert_eq!(discovery.namespaces, vec!["app.util"]);
        let sources: Vec<_> = discovery.blocks.iter().map(|b| b.source.as_str()).collect();
        assert_eq!(sources, vec!["first", "second"]);
    }

    #[test]
    fn sealed_context_rejects_declarations() {
        let cx = open_context(Environment::Foreground);
        let stray = cx.clone();
        cx.seal();

        assert!(!stray.is_open());
        assert!(matches!(
            stray.import("./late.js"),
            Err(LoaderError::DeclarationOutsideContext { key: Some(_) })
        ));
        assert!(matches!(
            stray.namespace("late"),
            Err(LoaderError::DeclarationOutsideContext { .. })
        ));
        assert!(matches!(
            stray.code(CodeBlock::new("late", |_| Ok(()))),
            Err(LoaderError::DeclarationOutsideContext { .. })
        ));
    }

    #[test]
    fn invalid_namespace_fails_only_that_call() {
        let cx = open_context(Environment::Foreground);
        assert!(matches!(
            cx.namespace("app..util"),
            Err(LoaderError::InvalidNamespaceName(_))
        ));
        cx.namespace("app.util").unwrap();
        assert_eq!(cx.seal().namespaces, vec!["app.util"]);
    }

    #[test]
    fn empty_import_is_rejected() {
        let cx = open_context(Environment::Foreground);
        assert!(matches!(cx.import(" "), Err(LoaderError::InvalidReference { .. })));
    }

    #[test]
    fn import_with_filters_by_environment_and_guard() {
        let cx = open_context(Environment::Background);
        assert!(!cx
            .import_with("./fg.js", ImportOptions::environments([Environment::Foreground]))
            .unwrap());
        assert!(cx
            .import_with("./bg.js", ImportOptions::environments([Environment::Background]))
            .unwrap());
        assert!(!cx
            .import_with("./off.js", ImportOptions::default().guarded(|| Ok(false)))
            .unwrap());
        assert!(!cx
            .import_with(
                "./broken.js",
                ImportOptions::default().guarded(|| Err(BlockError::new("boom")))
            )
            .unwrap());
        assert_eq!(cx.seal().imports, vec!["./bg.js"]);
    }
}

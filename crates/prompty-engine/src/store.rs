// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Named templates available to `prompty.include` and `prompty.extends`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::Error;
use crate::Template;

/// Read interface to an external template source (a storage layer, a
/// directory, ...). Lookups are synchronous.
pub trait TemplateProvider: Send + Sync {
    fn has_template(&self, name: &str) -> bool;
    fn template_source(&self, name: &str) -> Option<String>;
}

/// Provider backed by an in-memory map; handy for tests and small embeddings.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    sources: HashMap<String, String>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }
}

impl TemplateProvider for MemoryProvider {
    fn has_template(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    fn template_source(&self, name: &str) -> Option<String> {
        self.sources.get(name).cloned()
    }
}

/// Parsed templates keyed by name, with an optional provider consulted for
/// names that were never registered. Provider parses are cached on first use.
pub(crate) struct TemplateStore {
    parsed: RwLock<HashMap<String, Arc<Template>>>,
    provider: Option<Arc<dyn TemplateProvider>>,
}

impl fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateStore")
            .field("templates", &self.names())
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

impl TemplateStore {
    pub(crate) fn new(provider: Option<Arc<dyn TemplateProvider>>) -> Self {
        Self {
            parsed: RwLock::new(HashMap::new()),
            provider,
        }
    }

    /// Registers a parsed template; names are unique.
    pub(crate) fn insert(&self, template: Template) -> Result<Arc<Template>, Error> {
        let mut parsed = self.parsed.write().unwrap_or_else(PoisonError::into_inner);
        if parsed.contains_key(template.name()) {
            return Err(Error::registration(format!(
                "template \"{}\" is already registered",
                template.name()
            )));
        }
        let template = Arc::new(template);
        parsed.insert(template.name().to_string(), Arc::clone(&template));
        Ok(template)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        let registered = self
            .parsed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name);
        registered
            || self
                .provider
                .as_ref()
                .is_some_and(|provider| provider.has_template(name))
    }

    /// Returns the parsed template, asking the provider (and caching its
    /// parse) when the name is not registered. `Ok(None)` means unknown.
    pub(crate) fn load<F>(&self, name: &str, parse: F) -> Result<Option<Arc<Template>>, Error>
    where
        F: FnOnce(&str, &str) -> Result<Template, Error>,
    {
        if let Some(found) = self
            .parsed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Some(Arc::clone(found)));
        }

        let Some(source) = self
            .provider
            .as_ref()
            .and_then(|provider| provider.template_source(name))
        else {
            return Ok(None);
        };

        tracing::debug!(template = name, "parsing template from provider");
        let template = parse(name, &source)?;
        let mut parsed = self.parsed.write().unwrap_or_else(PoisonError::into_inner);
        let entry = parsed
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(template));
        Ok(Some(Arc::clone(entry)))
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .parsed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        inner: MemoryProvider,
        reads: AtomicUsize,
    }

    impl TemplateProvider for CountingProvider {
        fn has_template(&self, name: &str) -> bool {
            self.inner.has_template(name)
        }

        fn template_source(&self, name: &str) -> Option<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.template_source(name)
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let store = TemplateStore::new(None);
        store
            .insert(Template::parse_str("a", "one").unwrap())
            .unwrap();
        let err = store
            .insert(Template::parse_str("a", "two").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(store.names(), vec!["a"]);
    }

    #[test]
    fn provider_parses_are_cached() {
        let provider = Arc::new(CountingProvider {
            inner: MemoryProvider::new().with("greeting", "hi"),
            reads: AtomicUsize::new(0),
        });
        let shared: Arc<dyn TemplateProvider> = provider.clone();
        let store = TemplateStore::new(Some(shared));
        assert!(store.contains("greeting"));
        assert!(!store.contains("other"));

        for _ in 0..3 {
            let template = store
                .load("greeting", Template::parse_str)
                .unwrap()
                .expect("template should load");
            assert_eq!(template.source(), "hi");
        }
        assert_eq!(provider.reads.load(Ordering::SeqCst), 1);
        assert!(store.load("other", Template::parse_str).unwrap().is_none());
    }
}

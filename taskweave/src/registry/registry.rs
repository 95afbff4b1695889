//! The function registry.

use super::{is_valid_name, Application, FunctionDefinition};
use crate::errors::RegistryError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry of function definitions and application entry points.
///
/// Functions and applications share one namespace. Registration takes
/// `&mut self`; once the registry is wrapped in an `Arc` and handed to an
/// [`Engine`](crate::pipeline::Engine) it is read-only.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionDefinition>>,
    applications: HashMap<String, Arc<dyn Application>>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_free(&self, name: &str) -> Result<(), RegistryError> {
        if self.functions.contains_key(name) || self.applications.contains_key(name) {
            return Err(RegistryError::duplicate(name));
        }
        Ok(())
    }

    /// Validates and registers a function definition.
    pub fn register(
        &mut self,
        definition: FunctionDefinition,
    ) -> Result<Arc<FunctionDefinition>, RegistryError> {
        definition.validate()?;
        self.ensure_free(definition.name())?;

        let definition = Arc::new(definition);
        tracing::debug!(function = %definition.name(), "Registered function");
        self.functions
            .insert(definition.name().to_string(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Registers an application entry point.
    pub fn register_application(
        &mut self,
        application: impl Application + 'static,
    ) -> Result<(), RegistryError> {
        let name = application.name().to_string();
        if !is_valid_name(&name) {
            return Err(RegistryError::invalid(&name, "invalid application name"));
        }
        self.ensure_free(&name)?;

        tracing::debug!(application = %name, "Registered application");
        self.applications.insert(name, Arc::new(application));
        Ok(())
    }

    /// Looks up a function by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<FunctionDefinition>, RegistryError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::unknown_function(name))
    }

    /// Looks up an application by name.
    pub fn application(&self, name: &str) -> Result<Arc<dyn Application>, RegistryError> {
        self.applications
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::unknown_application(name))
    }

    /// Returns true if a function with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Returns the registered function names, sorted.
    #[must_use]
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the registered application names, sorted.
    #[must_use]
    pub fn application_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.applications.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if no functions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.function_names())
            .field("applications", &self.application_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Identity;
    use crate::errors::InvocationError;
    use crate::registry::FnApplication;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = FunctionRegistry::new();
        let def = registry
            .register(FunctionDefinition::new("count_words", Identity))
            .unwrap();

        assert_eq!(def.name(), "count_words");
        assert!(Arc::ptr_eq(&def, &registry.lookup("count_words").unwrap()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("count_words"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = FunctionRegistry::new();
        registry.register(FunctionDefinition::new("fetch", Identity)).unwrap();

        let err = registry
            .register(FunctionDefinition::new("fetch", Identity))
            .unwrap_err();
        assert_eq!(err, RegistryError::duplicate("fetch"));
    }

    #[test]
    fn test_invalid_definition_not_registered() {
        let mut registry = FunctionRegistry::new();
        let err = registry
            .register(FunctionDefinition::new("9lives", Identity))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = FunctionRegistry::new();
        assert_eq!(
            registry.lookup("nope").unwrap_err(),
            RegistryError::unknown_function("nope")
        );
        assert!(matches!(
            registry.application("nope"),
            Err(RegistryError::UnknownApplication { .. })
        ));
    }

    #[test]
    fn test_applications_share_namespace() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_application(FnApplication::new("scraper", |_driver, input| async move {
                Ok::<_, InvocationError>(input)
            }))
            .unwrap();

        let err = registry
            .register(FunctionDefinition::new("scraper", Identity))
            .unwrap_err();
        assert_eq!(err, RegistryError::duplicate("scraper"));
        assert_eq!(registry.application_names(), vec!["scraper".to_string()]);
        assert_eq!(registry.application("scraper").unwrap().name(), "scraper");
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = FunctionRegistry::new();
        registry.register(FunctionDefinition::new("b", Identity)).unwrap();
        registry.register(FunctionDefinition::new("a", Identity)).unwrap();
        assert_eq!(registry.function_names(), vec!["a", "b"]);
    }
}

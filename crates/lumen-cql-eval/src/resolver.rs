//! Library resolution for `include` definitions

use std::collections::HashMap;
use std::sync::Arc;

use lumen_cql_ast::Library;

use crate::error::{EvalError, EvalResult};

/// Source of included libraries, looked up by id and optional version.
pub trait LibraryResolver: Send + Sync {
    fn resolve(&self, id: &str, version: Option<&str>) -> EvalResult<Arc<Library>>;
}

/// Fixed set of pre-loaded libraries.
#[derive(Default)]
pub struct StaticLibraryResolver {
    libraries: HashMap<String, Vec<Arc<Library>>>,
}

impl StaticLibraryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(mut self, library: Library) -> Self {
        self.add_library(library);
        self
    }

    pub fn add_library(&mut self, library: Library) {
        self.libraries
            .entry(library.identifier.id.clone())
            .or_default()
            .push(Arc::new(library));
    }
}

impl LibraryResolver for StaticLibraryResolver {
    fn resolve(&self, id: &str, version: Option<&str>) -> EvalResult<Arc<Library>> {
        let versions = self
            .libraries
            .get(id)
            .ok_or_else(|| EvalError::undefined_library(id))?;
        let found = match version {
            // Most recently registered wins when no version is requested
            None => versions.last(),
            Some(requested) => versions
                .iter()
                .find(|lib| lib.identifier.version.as_deref() == Some(requested)),
        };
        found
            .cloned()
            .ok_or_else(|| EvalError::undefined_library(format!("{id} version {}", version.unwrap_or("?"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_by_id_and_version() {
        let resolver = StaticLibraryResolver::new()
            .with_library(Library::new("Common", Some("1.0.0".to_string())))
            .with_library(Library::new("Common", Some("2.0.0".to_string())));

        let versioned = resolver.resolve("Common", Some("1.0.0")).unwrap();
        assert_eq!(versioned.identifier.version.as_deref(), Some("1.0.0"));

        let latest = resolver.resolve("Common", None).unwrap();
        assert_eq!(latest.identifier.version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn missing_library_is_an_error() {
        let resolver = StaticLibraryResolver::new();
        assert_eq!(
            resolver.resolve("Missing", None).unwrap_err(),
            EvalError::undefined_library("Missing")
        );
    }

    #[test]
    fn missing_version_is_an_error() {
        let resolver =
            StaticLibraryResolver::new().with_library(Library::new("Common", Some("1.0.0".to_string())));
        assert!(resolver.resolve("Common", Some("3.0.0")).is_err());
    }
}

//! Search parameter registry for indexing and lookup.
//!
//! This module provides a registry that stores search parameters indexed by:
//! - Resource type and code (for efficient lookup)
//! - Canonical URL (for resolving references)
//! - Common parameters (applicable to all resources)

use std::collections::HashMap;
use std::sync::Arc;

use crate::parameters::SearchParameter;

/// Registry for search parameters loaded from FHIR packages.
///
/// Provides efficient lookup of search parameters by resource type, code,
/// and canonical URL. Also tracks common parameters that apply to all resources.
#[derive(Debug, Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, code)
    by_resource: HashMap<String, HashMap<String, Arc<SearchParameter>>>,
    /// All parameters by canonical URL
    by_url: HashMap<String, Arc<SearchParameter>>,
    /// Common parameters (apply to all resources: base includes "Resource" or "DomainResource")
    common: HashMap<String, Arc<SearchParameter>>,
}

impl SearchParameterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            by_resource: HashMap::new(),
            by_url: HashMap::new(),
            common: HashMap::new(),
        }
    }

    /// Register a search parameter in the registry.
    ///
    /// The parameter will be indexed by:
    /// - Canonical URL
    /// - Each base resource type + code
    /// - Common parameters if base includes "Resource" or "DomainResource"
    pub fn register(&mut self, param: SearchParameter) {
        let param = Arc::new(param);

        // Store by URL
        self.by_url.insert(param.url.clone(), param.clone());

        // Check if common parameter (base includes "Resource" or "DomainResource")
        if param.is_common() {
            self.common.insert(param.code.clone(), param.clone());
        }

        // Store by resource type
        for base in &param.base {
            self.by_resource
                .entry(base.clone())
                .or_default()
                .insert(param.code.clone(), param.clone());
        }
    }

    /// Get a search parameter for a specific resource type and code.
    ///
    /// First checks resource-specific parameters, then falls back to common parameters.
    pub fn get(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameter>> {
        // Check resource-specific first
        if let Some(param) = self
            .by_resource
            .get(resource_type)
            .and_then(|params| params.get(code))
        {
            return Some(param.clone());
        }

        // Check common parameters
        self.common.get(code).cloned()
    }

    /// Get all search parameters applicable to a resource type.
    ///
    /// Returns both resource-specific and common parameters.
    pub fn get_all_for_type(&self, resource_type: &str) -> Vec<Arc<SearchParameter>> {
        let mut params: Vec<_> = self.common.values().cloned().collect();

        if let Some(type_params) = self.by_resource.get(resource_type) {
            params.extend(type_params.values().cloned());
        }

        params
    }

    /// Get a search parameter by its canonical URL.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameter>> {
        self.by_url.get(url).cloned()
    }

    /// Get all common parameters (applicable to all resources).
    pub fn get_common_parameters(&self) -> Vec<Arc<SearchParameter>> {
        self.common.values().cloned().collect()
    }

    /// Get the total number of registered parameters.
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// Get the number of parameters for a specific resource type.
    pub fn count_for_type(&self, resource_type: &str) -> usize {
        let type_count = self
            .by_resource
            .get(resource_type)
            .map(|m| m.len())
            .unwrap_or(0);
        type_count + self.common.len()
    }

    /// List all resource types that have specific parameters.
    pub fn list_resource_types(&self) -> Vec<&str> {
        self.by_resource.keys().map(|s| s.as_str()).collect()
    }
}

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::registry::HandlerId;

/// Mapping shipped with the binary
pub const EMBEDDED_MAPPING: &str = include_str!("../api-mapping.json");

/// One entry of the route mapping as written in JSON
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDefinition {
    #[serde(rename = "request_method")]
    pub http_method: String,
    #[serde(rename = "path", default)]
    pub subpath: String,
    #[serde(rename = "package")]
    pub handler_module: String,
    #[serde(rename = "class")]
    pub handler_class: String,
    #[serde(rename = "method")]
    pub handler_method: String,
}

impl RouteDefinition {
    fn reference(&self) -> String {
        format!(
            "{}.{}.{}",
            self.handler_module, self.handler_class, self.handler_method
        )
    }
}

type RawMapping = BTreeMap<String, BTreeMap<String, Vec<RouteDefinition>>>;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Failed to read route mapping {path}: {message}")]
    Read { path: String, message: String },
    #[error("Malformed route mapping: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Module '{0}' has no operations")]
    EmptyModule(String),
    #[error("Operation '{module}/{operation}' has no routes")]
    EmptyOperation { module: String, operation: String },
    #[error("Route {module}/{operation} names unknown handler {reference}")]
    UnknownHandler {
        module: String,
        operation: String,
        reference: String,
    },
}

/// A route definition with its handler resolved
#[derive(Debug, Clone)]
pub struct Route {
    pub definition: RouteDefinition,
    pub handler: HandlerId,
}

/// Failure to find a route for a request
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("Module '{module}' not found in API mapping. Available modules: {available:?}")]
    UnknownModule {
        module: String,
        available: Vec<String>,
    },
    #[error("API '{api}' not found in module '{module}'. Available APIs: {available:?}")]
    UnknownOperation {
        module: String,
        api: String,
        available: Vec<String>,
    },
    #[error("No matching API found for path: {path} and method: {method}")]
    NoMatch { path: String, method: String },
}

/// `{module, operation, subpath}` of a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub normalized: String,
    pub module: Option<String>,
    pub operation: Option<String>,
    pub subpath: String,
}

/// Strip outer slashes, split on `/` and trim each segment
pub fn parse_path(path: &str) -> ParsedPath {
    let normalized = path.trim_matches('/').to_string();
    let parts: Vec<&str> = normalized.split('/').map(str::trim).collect();
    let segment = |i: usize| {
        parts
            .get(i)
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
    };

    ParsedPath {
        module: segment(0),
        operation: segment(1),
        subpath: parts.get(2..).map(|rest| rest.join("/")).unwrap_or_default(),
        normalized,
    }
}

/// Validated module -> operation -> ordered routes table
#[derive(Debug)]
pub struct RouteTable {
    modules: BTreeMap<String, BTreeMap<String, Vec<Route>>>,
}

impl RouteTable {
    pub fn from_json(raw: &str) -> Result<Self, MappingError> {
        let mapping: RawMapping = serde_json::from_str(raw)?;
        let mut modules = BTreeMap::new();

        for (module, operations) in mapping {
            if operations.is_empty() {
                return Err(MappingError::EmptyModule(module));
            }
            let mut resolved_ops = BTreeMap::new();
            for (operation, definitions) in operations {
                if definitions.is_empty() {
                    return Err(MappingError::EmptyOperation { module, operation });
                }

                let mut seen = HashSet::new();
                let mut routes = Vec::with_capacity(definitions.len());
                for definition in definitions {
                    let handler = HandlerId::resolve(
                        &definition.handler_module,
                        &definition.handler_class,
                        &definition.handler_method,
                    )
                    .ok_or_else(|| MappingError::UnknownHandler {
                        module: module.clone(),
                        operation: operation.clone(),
                        reference: definition.reference(),
                    })?;

                    let identity = (
                        definition.http_method.to_ascii_uppercase(),
                        definition.subpath.clone(),
                    );
                    if !seen.insert(identity) {
                        tracing::warn!(
                            "Route {} {}/{}/{} is shadowed by an earlier entry",
                            definition.http_method,
                            module,
                            operation,
                            definition.subpath
                        );
                    }
                    routes.push(Route {
                        definition,
                        handler,
                    });
                }
                resolved_ops.insert(operation, routes);
            }
            modules.insert(module, resolved_ops);
        }

        Ok(Self { modules })
    }

    pub fn from_file(path: &str) -> Result<Self, MappingError> {
        let raw = std::fs::read_to_string(path).map_err(|e| MappingError::Read {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&raw)
    }

    pub fn route_count(&self) -> usize {
        self.modules
            .values()
            .flat_map(|ops| ops.values())
            .map(Vec::len)
            .sum()
    }

    /// First route of the operation whose method and subpath match
    pub fn resolve(&self, path: &ParsedPath, method: &str) -> Result<&Route, ResolveError> {
        let module_key = path.module.as_deref().unwrap_or_default();
        let operations = self
            .modules
            .get(module_key)
            .ok_or_else(|| ResolveError::UnknownModule {
                module: module_key.to_string(),
                available: self.modules.keys().cloned().collect(),
            })?;

        let api_key = path.operation.as_deref().unwrap_or_default();
        let routes = operations
            .get(api_key)
            .ok_or_else(|| ResolveError::UnknownOperation {
                module: module_key.to_string(),
                api: api_key.to_string(),
                available: operations.keys().cloned().collect(),
            })?;

        routes
            .iter()
            .find(|route| {
                route.definition.http_method.eq_ignore_ascii_case(method)
                    && route.definition.subpath == path.subpath
            })
            .ok_or_else(|| ResolveError::NoMatch {
                path: path.normalized.clone(),
                method: method.to_ascii_uppercase(),
            })
    }
}

//! Enforcer options and builder

use crate::core::adapter::Adapter;
use crate::core::enforcer::Enforcer;
use crate::core::error::{RampartError, Result};
use crate::core::matcher::{MatcherFn, Value};
use crate::core::model::Model;
use crate::core::rbac::DEFAULT_MAX_HIERARCHY_LEVEL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Default capacity of the `eval()` expression cache
pub const DEFAULT_EXPRESSION_CACHE_CAPACITY: usize = 512;

/// Runtime switches of an [`Enforcer`]
///
/// Loadable from TOML; missing keys take their defaults:
///
/// ```
/// use rampart::EnforcerOptions;
///
/// let options = EnforcerOptions::from_toml_str("accept_json_request = true").unwrap();
/// assert!(options.accept_json_request);
/// assert!(options.enabled);
/// assert_eq!(options.max_hierarchy_level, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerOptions {
    /// When false, every request is allowed without evaluation
    pub enabled: bool,
    /// Parse string request values starting with `{` or `[` as JSON
    pub accept_json_request: bool,
    /// Keep role managers in step with grouping-row changes
    pub auto_build_role_links: bool,
    /// Traversal depth of the default role managers
    pub max_hierarchy_level: usize,
    /// Capacity of the compiled `eval()` sub-expression cache
    pub expression_cache_capacity: usize,
}

impl Default for EnforcerOptions {
    fn default() -> Self {
        EnforcerOptions {
            enabled: true,
            accept_json_request: false,
            auto_build_role_links: true,
            max_hierarchy_level: DEFAULT_MAX_HIERARCHY_LEVEL,
            expression_cache_capacity: DEFAULT_EXPRESSION_CACHE_CAPACITY,
        }
    }
}

impl EnforcerOptions {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}

enum ModelSource {
    Text(String),
    File(PathBuf),
    Parsed(Model),
}

/// Builder for [`Enforcer`]
///
/// # Examples
///
/// ```
/// use rampart::EnforcerBuilder;
///
/// # fn main() -> rampart::Result<()> {
/// let enforcer = EnforcerBuilder::new()
///     .model_text(
///         "[request_definition]\nr = sub, obj, act\n\
///          [policy_definition]\np = sub, obj, act\n\
///          [policy_effect]\ne = some(where (p.eft == allow))\n\
///          [matchers]\nm = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n",
///     )
///     .policy("p", ["alice", "data1", "read"])
///     .build()?;
///
/// assert!(enforcer.enforce(["alice", "data1", "read"])?);
/// assert!(!enforcer.enforce(["alice", "data1", "write"])?);
/// # Ok(())
/// # }
/// ```
pub struct EnforcerBuilder {
    model: Option<ModelSource>,
    options: EnforcerOptions,
    adapter: Option<Box<dyn Adapter>>,
    rows: Vec<(String, Vec<String>)>,
    functions: Vec<(String, MatcherFn)>,
}

impl EnforcerBuilder {
    /// Create a new EnforcerBuilder with default options
    pub fn new() -> Self {
        EnforcerBuilder {
            model: None,
            options: EnforcerOptions::default(),
            adapter: None,
            rows: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Use model definition text
    pub fn model_text<S: Into<String>>(mut self, text: S) -> Self {
        self.model = Some(ModelSource::Text(text.into()));
        self
    }

    /// Read the model definition from a file at build time
    pub fn model_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.model = Some(ModelSource::File(path.into()));
        self
    }

    /// Use an already parsed model
    pub fn model(mut self, model: Model) -> Self {
        self.model = Some(ModelSource::Parsed(model));
        self
    }

    pub fn options(mut self, options: EnforcerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn accept_json_request(mut self, enabled: bool) -> Self {
        self.options.accept_json_request = enabled;
        self
    }

    pub fn max_hierarchy_level(mut self, level: usize) -> Self {
        self.options.max_hierarchy_level = level;
        self
    }

    /// Load rows from `adapter` during build (and on every `load_policy`)
    pub fn adapter<A: Adapter + 'static>(mut self, adapter: A) -> Self {
        self.adapter = Some(Box::new(adapter));
        self
    }

    /// Add one initial row; the section follows the ptype (`p...` or `g...`)
    pub fn policy<I, S>(mut self, ptype: &str, row: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows
            .push((ptype.to_string(), row.into_iter().map(Into::into).collect()));
        self
    }

    /// Register a matcher function
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.push((name.to_string(), Arc::new(f)));
        self
    }

    /// Build the Enforcer
    pub fn build(self) -> Result<Enforcer> {
        let model = match self.model {
            Some(ModelSource::Text(text)) => Model::from_text(&text)?,
            Some(ModelSource::File(path)) => Model::from_file(path)?,
            Some(ModelSource::Parsed(model)) => model,
            None => return Err(RampartError::ModelParse("no model given".into())),
        };

        let mut enforcer = Enforcer::with_options(model, self.options)?;
        for (name, f) in self.functions {
            enforcer.add_function_arc(&name, f);
        }
        if let Some(adapter) = self.adapter {
            enforcer.set_adapter(adapter);
            enforcer.load_policy()?;
        }
        if !self.rows.is_empty() {
            enforcer.load_policy_rows(self.rows)?;
        }

        info!("Built enforcer");
        Ok(enforcer)
    }
}

impl Default for EnforcerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

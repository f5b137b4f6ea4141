//! The enforcement loop
//!
//! [`Enforcer::enforce`] validates the request, evaluates the matcher against each
//! policy row in stored order and feeds the outcomes to the effect until it decides.
//!
//! All enforce methods take `&self`; an enforcer shared behind a reader-writer lock can
//! serve many requests in parallel. Mutations (`add_policy`, `set_model`, ...) need
//! `&mut self`.

use crate::core::adapter::Adapter;
use crate::core::effect::{Effect, Effector};
use crate::core::error::{RampartError, Result};
use crate::core::matcher::{
    compile, CompileCache, Evaluator, FunctionMap, MatcherCache, MatcherFn, Program, Value,
};
use crate::core::model::Model;
use crate::core::options::{EnforcerBuilder, EnforcerOptions};
use crate::core::rbac::{DefaultRoleManager, RoleManager};
use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which request, policy, effect and matcher types an enforce call uses
///
/// A type missing from the model falls back to the unsuffixed one, so
/// `EnforceContext::new("2")` on a model with `r2`, `p2` and `m2` but a single `e` uses `e`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforceContext {
    pub r_type: String,
    pub p_type: String,
    pub e_type: String,
    pub m_type: String,
}

impl EnforceContext {
    /// Context for a ptype suffix: `""` selects `r`/`p`/`e`/`m`, `"2"` selects `r2`/`p2`/`e2`/`m2`
    pub fn new(suffix: &str) -> Self {
        EnforceContext {
            r_type: format!("r{}", suffix),
            p_type: format!("p{}", suffix),
            e_type: format!("e{}", suffix),
            m_type: format!("m{}", suffix),
        }
    }
}

impl Default for EnforceContext {
    fn default() -> Self {
        Self::new("")
    }
}

/// Outcome of [`Enforcer::decide`]
///
/// `allowed` is false whenever `error` is set.
#[derive(Debug)]
pub struct Decision {
    pub allowed: bool,
    pub matched_rows: Vec<Vec<String>>,
    pub error: Option<RampartError>,
}

impl Decision {
    fn denied(error: RampartError) -> Self {
        Decision {
            allowed: false,
            matched_rows: Vec::new(),
            error: Some(error),
        }
    }
}

struct Evaluation {
    allowed: bool,
    rows: Vec<Vec<String>>,
}

/// Authorization enforcer
pub struct Enforcer {
    pub(crate) model: Model,
    functions: FunctionMap,
    matchers: MatcherCache,
    expressions: CompileCache<Arc<Program>>,
    effectors: AHashMap<String, Effector>,
    adapter: Option<Box<dyn Adapter>>,
    pub(crate) options: EnforcerOptions,
}

fn collect_request<I, V>(request: I) -> Vec<Value>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    request.into_iter().map(Into::into).collect()
}

impl Enforcer {
    /// Create an enforcer over `model` with default options
    pub fn new(model: Model) -> Result<Self> {
        Self::with_options(model, EnforcerOptions::default())
    }

    /// Parse model text and create an enforcer over it
    pub fn from_text(text: &str) -> Result<Self> {
        Self::new(Model::from_text(text)?)
    }

    pub fn builder() -> EnforcerBuilder {
        EnforcerBuilder::new()
    }

    pub fn with_options(model: Model, options: EnforcerOptions) -> Result<Self> {
        let mut enforcer = Enforcer {
            model: Model::new(),
            functions: FunctionMap::with_builtins(),
            matchers: MatcherCache::new(),
            expressions: CompileCache::new(options.expression_cache_capacity),
            effectors: AHashMap::new(),
            adapter: None,
            options,
        };
        enforcer.set_model(model)?;
        Ok(enforcer)
    }

    /// Replace the model, installing fresh role managers and effect state
    pub fn set_model(&mut self, mut model: Model) -> Result<()> {
        model.validate()?;
        let ptypes: Vec<String> = model.section("g").map(|(k, _)| k.to_string()).collect();
        for ptype in ptypes {
            let rm = Arc::new(DefaultRoleManager::new(self.options.max_hierarchy_level));
            model.assertion_mut("g", &ptype)?.set_role_manager(rm);
        }
        model.build_role_links()?;

        self.effectors = model
            .section("e")
            .filter_map(|(key, e)| e.effect().map(|kind| (key.to_string(), Effector::new(kind.clone()))))
            .collect();
        self.model = model;
        self.matchers.invalidate();
        self.expressions.clear();
        Ok(())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn options(&self) -> &EnforcerOptions {
        &self.options
    }

    pub fn set_adapter(&mut self, adapter: Box<dyn Adapter>) {
        self.adapter = Some(adapter);
    }

    /// Register a matcher function, replacing any function of the same name
    pub fn add_function<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.add(name, Arc::new(f));
    }

    pub(crate) fn add_function_arc(&mut self, name: &str, f: MatcherFn) {
        self.functions.add(name, f);
    }

    /// Role manager of `g`
    pub fn get_role_manager(&self) -> Option<Arc<dyn RoleManager>> {
        self.get_named_role_manager("g")
    }

    pub fn get_named_role_manager(&self, ptype: &str) -> Option<Arc<dyn RoleManager>> {
        self.model
            .get("g", ptype)
            .and_then(|a| a.role_manager())
            .cloned()
    }

    /// Install `rm` for `g`, link the current rows into it and drop compiled matchers
    pub fn set_role_manager(&mut self, rm: Arc<dyn RoleManager>) -> Result<()> {
        self.set_named_role_manager("g", rm)
    }

    pub fn set_named_role_manager(&mut self, ptype: &str, rm: Arc<dyn RoleManager>) -> Result<()> {
        let assertion = self.model.assertion_mut("g", ptype)?;
        assertion.set_role_manager(rm);
        assertion.build_role_links()?;
        self.matchers.invalidate();
        info!("Installed role manager for {}", ptype);
        Ok(())
    }

    /// Rebuild every role manager from the current grouping rows
    pub fn build_role_links(&self) -> Result<()> {
        self.model.build_role_links()?;
        self.matchers.invalidate();
        Ok(())
    }

    /// Drop compiled matchers and `eval()` expressions
    pub fn invalidate_matcher_cache(&self) {
        self.matchers.invalidate();
        self.expressions.clear();
    }

    /// Effect state of `e_type`, for inspecting rate-limit buckets
    pub fn effector(&self, e_type: &str) -> Option<&Effector> {
        self.effectors.get(e_type)
    }

    pub fn enable_enforce(&mut self, enabled: bool) {
        self.options.enabled = enabled;
    }

    pub fn enable_auto_build_role_links(&mut self, enabled: bool) {
        self.options.auto_build_role_links = enabled;
    }

    pub fn enable_accept_json_request(&mut self, enabled: bool) {
        self.options.accept_json_request = enabled;
    }

    /// Reload every row from the adapter
    ///
    /// The current rows stay in place if loading or constraint validation fails.
    pub fn load_policy(&mut self) -> Result<()> {
        let Some(adapter) = &self.adapter else {
            return Err(RampartError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no adapter set",
            )));
        };
        let mut model = self.model.clone();
        model.clear_policy();
        adapter.load_policy(&mut model)?;
        self.install_policy(model)
    }

    /// Add `(ptype, row)` pairs to the current rows as one batch
    pub fn load_policy_rows<I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut model = self.model.clone();
        for (ptype, row) in rows {
            let sec = crate::core::adapter::section_of(&ptype)?;
            model.add_policy(sec, &ptype, row)?;
        }
        self.install_policy(model)
    }

    fn install_policy(&mut self, mut model: Model) -> Result<()> {
        model.sort_policies_by_priority();
        model.sort_policies_by_subject_hierarchy()?;
        if let Err(e) = model.validate_constraints() {
            warn!("Rejected policy load: {}", e);
            return Err(e);
        }
        self.model = model;
        if self.options.auto_build_role_links {
            self.model.build_role_links()?;
        }
        self.matchers.invalidate();
        info!(
            "Loaded {} policy rows and {} grouping rows",
            self.model.section("p").map(|(_, a)| a.policy().len()).sum::<usize>(),
            self.model.section("g").map(|(_, a)| a.policy().len()).sum::<usize>()
        );
        Ok(())
    }

    /// Decide one request under the default types
    ///
    /// # Examples
    ///
    /// ```
    /// use rampart::Enforcer;
    ///
    /// # fn main() -> rampart::Result<()> {
    /// let mut e = Enforcer::from_text(
    ///     "[request_definition]\nr = sub, obj, act\n\
    ///      [policy_definition]\np = sub, obj, act\n\
    ///      [role_definition]\ng = _, _\n\
    ///      [policy_effect]\ne = some(where (p.eft == allow))\n\
    ///      [matchers]\nm = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act\n",
    /// )?;
    /// e.add_policy(["admin", "data1", "read"])?;
    /// e.add_grouping_policy(["alice", "admin"])?;
    ///
    /// assert!(e.enforce(["alice", "data1", "read"])?);
    /// assert!(!e.enforce(["bob", "data1", "read"])?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn enforce<I, V>(&self, request: I) -> Result<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Ok(self
            .evaluate(&EnforceContext::default(), None, collect_request(request))?
            .allowed)
    }

    /// Like [`Enforcer::enforce`], also returning the rows that decided
    pub fn enforce_ex<I, V>(&self, request: I) -> Result<(bool, Vec<Vec<String>>)>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let evaluation = self.evaluate(&EnforceContext::default(), None, collect_request(request))?;
        Ok((evaluation.allowed, evaluation.rows))
    }

    /// Decide with ad-hoc matcher text instead of the model's `m`
    pub fn enforce_with_matcher<I, V>(&self, matcher: &str, request: I) -> Result<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Ok(self
            .evaluate(&EnforceContext::default(), Some(matcher), collect_request(request))?
            .allowed)
    }

    /// Decide under the request/policy/effect/matcher types of `ctx`
    pub fn enforce_with_context<I, V>(&self, ctx: &EnforceContext, request: I) -> Result<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Ok(self.evaluate(ctx, None, collect_request(request))?.allowed)
    }

    /// Like [`Enforcer::enforce_with_context`], also returning the rows that decided
    pub fn enforce_ex_with_context<I, V>(
        &self,
        ctx: &EnforceContext,
        request: I,
    ) -> Result<(bool, Vec<Vec<String>>)>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let evaluation = self.evaluate(ctx, None, collect_request(request))?;
        Ok((evaluation.allowed, evaluation.rows))
    }

    /// Never fails: errors come back inside a denying [`Decision`]
    pub fn decide<I, V>(&self, request: I) -> Decision
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        match self.evaluate(&EnforceContext::default(), None, collect_request(request)) {
            Ok(evaluation) => Decision {
                allowed: evaluation.allowed,
                matched_rows: evaluation.rows,
                error: None,
            },
            Err(e) => {
                debug!("Request denied with error: {}", e);
                Decision::denied(e)
            }
        }
    }

    /// Decide each request independently; a failing request is denied
    pub fn batch_enforce<R, I, V>(&self, requests: R) -> Vec<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.batch_decide(requests)
            .into_iter()
            .map(|decision| decision.allowed)
            .collect()
    }

    /// Like [`Enforcer::batch_enforce`], keeping matched rows and errors
    pub fn batch_decide<R, I, V>(&self, requests: R) -> Vec<Decision>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        requests.into_iter().map(|request| self.decide(request)).collect()
    }

    fn resolve<'a>(&self, sec: &'a str, wanted: &'a str) -> &'a str {
        if self.model.get(sec, wanted).is_some() {
            wanted
        } else {
            sec
        }
    }

    fn parse_json_values(request: &mut [Value]) -> Result<()> {
        for (index, value) in request.iter_mut().enumerate() {
            let Value::String(text) = value else {
                continue;
            };
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                let parsed = Value::from_json_str(text).map_err(|e| {
                    RampartError::InvalidJsonRequest {
                        index,
                        message: e.to_string(),
                    }
                })?;
                *value = parsed;
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        ctx: &EnforceContext,
        matcher: Option<&str>,
        mut request: Vec<Value>,
    ) -> Result<Evaluation> {
        if !self.options.enabled {
            return Ok(Evaluation {
                allowed: true,
                rows: Vec::new(),
            });
        }

        let r_type = self.resolve("r", &ctx.r_type);
        let p_type = self.resolve("p", &ctx.p_type);
        let e_type = self.resolve("e", &ctx.e_type);
        let m_type = self.resolve("m", &ctx.m_type);

        let r = self.model.assertion("r", r_type)?;
        let p = self.model.assertion("p", p_type)?;
        if request.len() != r.tokens().len() {
            return Err(RampartError::RequestArity {
                expected: r.tokens().len(),
                got: request.len(),
            });
        }
        if self.options.accept_json_request {
            Self::parse_json_values(&mut request)?;
        }

        let program = match matcher {
            Some(text) => self
                .expressions
                .get_or_try_insert(text, || compile(text).map(Arc::new))?,
            None => {
                let m = self.model.assertion("m", m_type)?;
                self.matchers.get_or_compile(m_type, m.value())?
            }
        };
        let effector = self
            .effectors
            .get(e_type)
            .ok_or_else(|| RampartError::UnknownPolicyType {
                sec: "e".to_string(),
                ptype: e_type.to_string(),
            })?;

        let evaluator = Evaluator::new(
            &self.model,
            &self.functions,
            &self.expressions,
            r.tokens(),
            &request,
            p.tokens(),
        );
        let mut stream = effector.stream(r.tokens(), &request);
        let rows = p.policy();

        if rows.is_empty() {
            let matched = !program.references_prefix(&format!("{}_", p_type))
                && evaluator.eval_match(&program, None)?;
            stream.push(0, matched, Effect::Allow);
            let outcome = stream.finish();
            debug!("Request {:?} -> {} (no policy rows)", request, outcome.allowed);
            return Ok(Evaluation {
                allowed: outcome.allowed,
                rows: Vec::new(),
            });
        }

        let eft_token = format!("{}_eft", p_type);
        let eft_index = p.tokens().iter().position(|t| *t == eft_token);
        for (index, row) in rows.iter().enumerate() {
            let matched = evaluator.eval_match(&program, Some(row.as_slice()))?;
            let effect = match eft_index {
                Some(column) => row
                    .get(column)
                    .map_or(Effect::Indeterminate, |eft| Effect::from_eft(eft)),
                None => Effect::Allow,
            };
            if stream.push(index, matched, effect) {
                break;
            }
        }

        let outcome = stream.finish();
        if let Some(reason) = outcome.indeterminate {
            warn!("Indeterminate decision for {:?}: {}", request, reason);
            return Err(RampartError::Indeterminate(reason));
        }
        debug!(
            "Request {:?} -> {} (rows {:?})",
            request, outcome.allowed, outcome.explain
        );
        Ok(Evaluation {
            allowed: outcome.allowed,
            rows: outcome
                .explain
                .iter()
                .filter_map(|i| rows.get(*i).cloned())
                .collect(),
        })
    }
}

impl fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enforcer")
            .field("model", &self.model)
            .field("functions", &self.functions)
            .field("compiled_matchers", &self.matchers.len())
            .field("options", &self.options)
            .field("adapter", &self.adapter.is_some())
            .finish()
    }
}

//! Enforcement core
//!
//! - `model`: parsed model sections and policy rows
//! - `rbac`: role managers
//! - `matcher`: matcher compiler, evaluator and builtin functions
//! - `effect`: effect combinators and rate limiting
//! - `enforcer`: the enforce loop plus policy and RBAC management

pub mod adapter;
pub mod config;
pub mod effect;
pub mod enforcer;
pub mod error;
mod management;
pub mod matcher;
pub mod model;
pub mod options;
pub mod rbac;
mod rbac_api;

pub use adapter::{Adapter, StringAdapter};
pub use effect::{Effect, EffectKind, Effector};
pub use enforcer::{Decision, EnforceContext, Enforcer};
pub use error::{ErrorKind, RampartError, Result};
pub use matcher::{FunctionMap, MatcherFn, Value};
pub use model::{Assertion, Model, PolicyOp};
pub use options::{EnforcerBuilder, EnforcerOptions};
pub use rbac::{DefaultRoleManager, LinkConditionFn, MatchingFn, RoleManager};

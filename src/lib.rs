//! # Rampart - Authorization Enforcement Engine
//!
//! `rampart` decides whether a request `(subject, object, action, ...)` is allowed by a set
//! of policy rows, under an access control model written as INI-style text:
//!
//! - **Models** with request, policy, role, effect, matcher and constraint sections
//! - **Role hierarchies** with domains, pattern matching and conditional links
//! - **Matchers** compiled to a small expression language, including block matchers and `eval()`
//! - **Effects**: allow-override, deny-override, priority, unique match and rate limiting
//!
//! ## Quick Start
//!
//! ```rust
//! use rampart::{Enforcer, Result};
//!
//! # fn main() -> Result<()> {
//! let mut e = Enforcer::from_text(
//!     r#"
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && r.act == p.act
//! "#,
//! )?;
//!
//! e.add_policy(["reader", "/books/:id", "GET"])?;
//! e.add_role_for_user("alice", "reader", None)?;
//!
//! assert!(e.enforce(["alice", "/books/42", "GET"])?);
//! assert!(!e.enforce(["alice", "/books/42", "DELETE"])?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust
//! use rampart::{EnforcerBuilder, Result, StringAdapter, Value};
//!
//! # fn main() -> Result<()> {
//! let e = EnforcerBuilder::new()
//!     .model_text(
//!         "[request_definition]\nr = sub, obj, act\n\
//!          [policy_definition]\np = sub, obj, act\n\
//!          [policy_effect]\ne = some(where (p.eft == allow))\n\
//!          [matchers]\nm = r.sub == p.sub && isOwner(r.sub, r.obj) && r.act == p.act\n",
//!     )
//!     .adapter(StringAdapter::new("p, alice, doc1, read"))
//!     .function("isOwner", |args: &[Value]| {
//!         Ok(Value::Bool(args.first() == Some(&Value::from("alice"))))
//!     })
//!     .build()?;
//!
//! assert!(e.enforce(["alice", "doc1", "read"])?);
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    adapter::{Adapter, StringAdapter},
    effect::{Effect, EffectKind},
    enforcer::{Decision, EnforceContext, Enforcer},
    error::{ErrorKind, RampartError, Result},
    matcher::{builtins, FunctionMap, MatcherFn, Value},
    model::{Assertion, Model, PolicyOp},
    options::{EnforcerBuilder, EnforcerOptions},
    rbac::{DefaultRoleManager, LinkConditionFn, MatchingFn, RoleManager},
};

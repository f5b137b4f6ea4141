//! Policy effects
//!
//! An [`EffectKind`] is parsed once from the `[policy_effect]` text. Each enforce call
//! opens an [`EffectStream`] and pushes per-row outcomes into it, in row order, until the
//! stream reports a final decision.
//!
//! Supported expressions (whitespace-insensitive, `p_eft` may be written `p.eft`/`p2_eft`):
//!
//! - `some(where (p_eft == allow))`
//! - `!some(where (p_eft == deny))`
//! - `some(where (p_eft == allow)) && !some(where (p_eft == deny))`
//! - `priority(p_eft) || deny`
//! - `subjectPriority(p_eft) || deny`
//! - `unique(where (p_eft == allow))`
//! - `rate_limit(max, unit, count, bucket)`

mod rate_limit;
mod stream;

pub use rate_limit::{BucketField, CountMode, RateLimit, RateLimiter};
pub use stream::{EffectOutcome, EffectStream};

use crate::core::error::{RampartError, Result};
use crate::core::matcher::{cached_regex, Value};
use std::fmt;
use std::str::FromStr;

/// Effect of a single policy row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    Allow,
    Deny,
    /// Any `eft` value other than allow/deny; such rows never decide
    Indeterminate,
}

impl Effect {
    /// Interpret a row's `eft` column
    pub fn from_eft(eft: &str) -> Effect {
        match eft {
            "allow" => Effect::Allow,
            "deny" => Effect::Deny,
            _ => Effect::Indeterminate,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "allow"),
            Effect::Deny => write!(f, "deny"),
            Effect::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// How row outcomes combine into one decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectKind {
    /// Allow once any row matches with allow
    AllowOverride,
    /// Deny once any row matches with deny; otherwise allow iff some row matched allow
    DenyOverride,
    /// Allow iff some allow match and no deny match
    AllowAndDeny,
    /// The first matching row decides
    Priority,
    /// The first matching row decides; rows are ordered by subject depth first
    SubjectPriority,
    /// Exactly one row may match
    UniqueMatch,
    /// First matching row decides unless its bucket is over the limit
    RateLimit(RateLimit),
}

impl EffectKind {
    /// Parse an effect expression
    pub fn parse(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let eft = cached_regex(r"p\d*[._]eft")
            .map_err(|e| RampartError::InvalidEffect(e.to_string()))?;
        let normalized = eft.replace_all(&compact, "p_eft");

        let kind = match normalized.as_ref() {
            "some(where(p_eft==allow))" => EffectKind::AllowOverride,
            "!some(where(p_eft==deny))" => EffectKind::DenyOverride,
            "some(where(p_eft==allow))&&!some(where(p_eft==deny))" => EffectKind::AllowAndDeny,
            "priority(p_eft)||deny" => EffectKind::Priority,
            "subjectPriority(p_eft)||deny" => EffectKind::SubjectPriority,
            "unique(where(p_eft==allow))" => EffectKind::UniqueMatch,
            other => {
                let args = other
                    .strip_prefix("rate_limit(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| RampartError::InvalidEffect(text.trim().to_string()))?;
                EffectKind::RateLimit(RateLimit::parse_args(args)?)
            }
        };
        Ok(kind)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, EffectKind::RateLimit(_))
    }
}

impl FromStr for EffectKind {
    type Err = RampartError;

    fn from_str(s: &str) -> Result<Self> {
        EffectKind::parse(s)
    }
}

/// A parsed effect plus the counter state it owns
#[derive(Debug)]
pub struct Effector {
    kind: EffectKind,
    limiter: RateLimiter,
}

impl Effector {
    pub fn new(kind: EffectKind) -> Self {
        Effector {
            kind,
            limiter: RateLimiter::new(),
        }
    }

    pub fn kind(&self) -> &EffectKind {
        &self.kind
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Start combining the rows of one request
    pub fn stream(&self, request_tokens: &[String], request: &[Value]) -> EffectStream<'_> {
        let bucket = match &self.kind {
            EffectKind::RateLimit(limit) => Some(limit.bucket_key(request_tokens, request)),
            _ => None,
        };
        EffectStream::new(&self.kind, &self.limiter, bucket)
    }
}

use super::rate_limit::{CountMode, RateLimiter};
use super::{Effect, EffectKind};

/// Final result of an effect stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectOutcome {
    pub allowed: bool,
    /// Indices of the rows that produced the decision
    pub explain: Vec<usize>,
    /// Set when the rows could not be combined (e.g. two rows under a unique match)
    pub indeterminate: Option<String>,
    /// Set when a rate-limit bucket overflowed
    pub rate_limited: bool,
}

/// Incremental combination of row outcomes for one request
///
/// Rows must be pushed in stored order. Once [`EffectStream::push`] returns `true`
/// the decision is final and further rows need not be evaluated.
#[derive(Debug)]
pub struct EffectStream<'a> {
    kind: &'a EffectKind,
    limiter: &'a RateLimiter,
    bucket: Option<String>,
    outcome: EffectOutcome,
    first_allow: Option<usize>,
    matches: Vec<usize>,
    done: bool,
}

impl<'a> EffectStream<'a> {
    pub(super) fn new(kind: &'a EffectKind, limiter: &'a RateLimiter, bucket: Option<String>) -> Self {
        EffectStream {
            kind,
            limiter,
            bucket,
            outcome: EffectOutcome::default(),
            first_allow: None,
            matches: Vec::new(),
            done: false,
        }
    }

    /// Feed the outcome of row `index`; returns true once the decision is final
    pub fn push(&mut self, index: usize, matched: bool, effect: Effect) -> bool {
        if self.done {
            return true;
        }

        if let EffectKind::RateLimit(limit) = self.kind {
            let counted = match limit.count {
                CountMode::All => true,
                CountMode::Allow => matched && effect == Effect::Allow,
                CountMode::Deny => matched && effect != Effect::Indeterminate,
            };
            if counted {
                let key = self.bucket.as_deref().unwrap_or("bucket:all");
                if self.limiter.hit(key, limit.max, limit.window) {
                    self.outcome.rate_limited = true;
                    return self.decide(false, Vec::new());
                }
            }
        }

        if !matched || effect == Effect::Indeterminate {
            return false;
        }

        match self.kind {
            EffectKind::AllowOverride => {
                if effect == Effect::Allow {
                    return self.decide(true, vec![index]);
                }
            }
            EffectKind::DenyOverride | EffectKind::AllowAndDeny => {
                if effect == Effect::Deny {
                    return self.decide(false, vec![index]);
                }
                self.first_allow.get_or_insert(index);
            }
            EffectKind::Priority | EffectKind::SubjectPriority | EffectKind::RateLimit(_) => {
                return self.decide(effect == Effect::Allow, vec![index]);
            }
            EffectKind::UniqueMatch => {
                self.matches.push(index);
                if self.matches.len() > 1 {
                    self.outcome.indeterminate = Some(format!(
                        "unique match violated by rows {:?}",
                        self.matches
                    ));
                    let rows = std::mem::take(&mut self.matches);
                    return self.decide(false, rows);
                }
            }
        }
        false
    }

    /// Close the stream after the last row
    pub fn finish(mut self) -> EffectOutcome {
        if !self.done {
            match self.kind {
                EffectKind::DenyOverride | EffectKind::AllowAndDeny => {
                    if let Some(index) = self.first_allow {
                        self.outcome.allowed = true;
                        self.outcome.explain = vec![index];
                    }
                }
                EffectKind::UniqueMatch => {
                    if let [index] = self.matches.as_slice() {
                        self.outcome.allowed = true;
                        self.outcome.explain = vec![*index];
                    }
                }
                _ => {}
            }
        }
        self.outcome
    }

    fn decide(&mut self, allowed: bool, explain: Vec<usize>) -> bool {
        self.outcome.allowed = allowed;
        self.outcome.explain = explain;
        self.done = true;
        true
    }
}

//! Matcher evaluation
//!
//! Matcher text is compiled once into a [`Program`] and evaluated per policy row:
//!
//! - **Expressions**: `&& || ! == != < <= > >= =~ in + - * / %`, calls, dotted attributes
//! - **Blocks**: `{ let x = ...; if c { return ... } return ... }`
//! - **Functions**: builtins, role functions (`g`, `g2`, ...), `eval()`, user functions

pub mod builtins;
mod cache;
mod eval;
mod functions;
mod lexer;
mod parser;
mod value;

pub use cache::{cached_regex, CompileCache, DEFAULT_PATTERN_CACHE_CAPACITY};
pub use eval::Evaluator;
pub use functions::{string_args, FunctionMap, MatcherFn};
pub use lexer::Span;
pub use parser::{BinaryOp, Expr, Program, Stmt, UnaryOp};
pub use value::Value;

use crate::core::error::Result;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Rewrite `r.` / `p.` / `r2.` token prefixes to `r_` / `p_` / `r2_`
///
/// Only a prefix that starts an identifier is rewritten, and quoted strings are left alone,
/// so `r.sub.Name == "r.txt"` becomes `r_sub.Name == "r.txt"`.
pub fn escape_assertion(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                }
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            out.push(c);
            i += 1;
            continue;
        }

        let starts_ident = i == 0 || {
            let prev = chars[i - 1];
            !(prev.is_alphanumeric() || prev == '_' || prev == '.')
        };
        if starts_ident && (c == 'r' || c == 'p') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            let followed_by_ident = chars
                .get(j + 1)
                .is_some_and(|n| n.is_alphabetic() || *n == '_');
            if chars.get(j) == Some(&'.') && followed_by_ident {
                out.extend(&chars[i..j]);
                out.push('_');
                i = j + 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }
    out
}

/// Compile matcher text (with `r.`/`p.` prefixes) into a program
pub fn compile(text: &str) -> Result<Program> {
    Program::parse(&escape_assertion(text))
}

/// Compiled matchers keyed by matcher ptype (`m`, `m2`, ...)
///
/// Readers share the read lock; a miss compiles and inserts under the write lock.
/// Any change to the model or its role managers must call [`MatcherCache::invalidate`].
#[derive(Debug, Default)]
pub struct MatcherCache {
    compiled: RwLock<AHashMap<String, Arc<Program>>>,
}

impl MatcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the compiled program for `key`, compiling `text` on a miss
    pub fn get_or_compile(&self, key: &str, text: &str) -> Result<Arc<Program>> {
        if let Some(program) = self.compiled.read().get(key) {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(compile(text)?);
        debug!("Compiled matcher {}", key);
        self.compiled
            .write()
            .insert(key.to_string(), Arc::clone(&program));
        Ok(program)
    }

    /// Drop every compiled program
    pub fn invalidate(&self) {
        self.compiled.write().clear();
    }

    pub fn len(&self) -> usize {
        self.compiled.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_assertion() {
        assert_eq!(
            escape_assertion("r.sub == p.sub && r.obj == p.obj"),
            "r_sub == p_sub && r_obj == p_obj"
        );
        assert_eq!(
            escape_assertion("r2.sub.Age > 18 && p2.eft == \"allow\""),
            "r2_sub.Age > 18 && p2_eft == \"allow\""
        );
        assert_eq!(escape_assertion("g(r.sub, p.sub)"), "g(r_sub, p_sub)");
        assert_eq!(escape_assertion("r.obj == \"r.txt\""), "r_obj == \"r.txt\"");
        assert_eq!(escape_assertion("keyMatch(r.obj, p.obj)"), "keyMatch(r_obj, p_obj)");
        assert_eq!(escape_assertion("user.name == 'x'"), "user.name == 'x'");
        assert_eq!(escape_assertion("rp.sub"), "rp.sub");
    }

    #[test]
    fn test_matcher_cache() {
        let cache = MatcherCache::new();
        let first = cache.get_or_compile("m", "r.sub == p.sub").unwrap();
        let second = cache.get_or_compile("m", "ignored on hit").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.get_or_compile("m", "r.sub ==").is_err());
    }
}

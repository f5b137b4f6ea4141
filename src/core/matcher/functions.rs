//! Function table available to matchers
//!
//! Holds the builtins plus functions registered through `Enforcer::add_function`.
//! Role functions (`g`, `g2`, ...) are not stored here; they are resolved against the
//! model's role managers at evaluation time.

use super::builtins;
use super::value::Value;
use crate::core::error::{RampartError, Result};
use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;

/// A variadic matcher function
pub type MatcherFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Name -> function table
#[derive(Clone)]
pub struct FunctionMap {
    functions: AHashMap<String, MatcherFn>,
}

/// Check arity and collect string arguments
pub fn string_args<'a>(function: &str, args: &'a [Value], expected: usize) -> Result<Vec<&'a str>> {
    if args.len() != expected {
        return Err(RampartError::argument(
            function,
            format!("expected {} arguments, but got {}", expected, args.len()),
        ));
    }
    args.iter()
        .map(|arg| {
            arg.as_str().ok_or_else(|| {
                RampartError::argument(
                    function,
                    format!("argument must be a string, got {}", arg.type_name()),
                )
            })
        })
        .collect()
}

fn bool_fn(name: &'static str, f: fn(&str, &str) -> bool) -> MatcherFn {
    Arc::new(move |args: &[Value]| -> Result<Value> {
        let args = string_args(name, args, 2)?;
        Ok(Value::Bool(f(args[0], args[1])))
    })
}

fn fallible_bool_fn(name: &'static str, f: fn(&str, &str) -> Result<bool>) -> MatcherFn {
    Arc::new(move |args: &[Value]| -> Result<Value> {
        let args = string_args(name, args, 2)?;
        Ok(Value::Bool(f(args[0], args[1])?))
    })
}

impl FunctionMap {
    /// An empty table
    pub fn empty() -> Self {
        FunctionMap {
            functions: AHashMap::new(),
        }
    }

    /// A table with every builtin registered
    pub fn with_builtins() -> Self {
        let mut map = Self::empty();
        map.add("keyMatch", bool_fn("keyMatch", builtins::key_match));
        map.add("keyMatch2", bool_fn("keyMatch2", builtins::key_match2));
        map.add("keyMatch3", bool_fn("keyMatch3", builtins::key_match3));
        map.add("keyMatch4", bool_fn("keyMatch4", builtins::key_match4));
        map.add("keyMatch5", bool_fn("keyMatch5", builtins::key_match5));
        map.add("regexMatch", fallible_bool_fn("regexMatch", builtins::regex_match));
        map.add("ipMatch", fallible_bool_fn("ipMatch", builtins::ip_match));
        map.add("globMatch", fallible_bool_fn("globMatch", builtins::glob_match));
        map.add(
            "keyGet",
            Arc::new(|args: &[Value]| -> Result<Value> {
                let args = string_args("keyGet", args, 2)?;
                Ok(Value::String(builtins::key_get(args[0], args[1])))
            }),
        );
        map.add(
            "keyGet2",
            Arc::new(|args: &[Value]| -> Result<Value> {
                let args = string_args("keyGet2", args, 3)?;
                Ok(Value::String(builtins::key_get2(args[0], args[1], args[2])))
            }),
        );
        map.add(
            "keyGet3",
            Arc::new(|args: &[Value]| -> Result<Value> {
                let args = string_args("keyGet3", args, 3)?;
                Ok(Value::String(builtins::key_get3(args[0], args[1], args[2])))
            }),
        );
        map
    }

    /// Register or replace a function
    pub fn add(&mut self, name: &str, f: MatcherFn) {
        self.functions.insert(name.to_string(), f);
    }

    pub fn get(&self, name: &str) -> Option<&MatcherFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl Default for FunctionMap {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionMap").field("functions", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(map: &FunctionMap, name: &str, args: &[Value]) -> Result<Value> {
        let f = map.get(name).unwrap();
        f(args)
    }

    #[test]
    fn test_builtins_registered() {
        let map = FunctionMap::default();
        for name in [
            "keyMatch",
            "keyGet",
            "keyMatch2",
            "keyGet2",
            "keyMatch3",
            "keyGet3",
            "keyMatch4",
            "keyMatch5",
            "regexMatch",
            "ipMatch",
            "globMatch",
        ] {
            assert!(map.contains(name), "missing builtin {}", name);
        }
        assert!(!FunctionMap::empty().contains("keyMatch"));
    }

    #[test]
    fn test_builtin_calls() {
        let map = FunctionMap::default();
        assert_eq!(
            call(&map, "keyMatch2", &["/book/1".into(), "/book/:id".into()]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            call(&map, "keyGet2", &["/book/1".into(), "/book/:id".into(), "id".into()]).unwrap(),
            Value::from("1")
        );
    }

    #[test]
    fn test_argument_validation() {
        let map = FunctionMap::default();
        assert!(matches!(
            call(&map, "keyMatch", &["/a".into()]),
            Err(RampartError::FunctionArgument { .. })
        ));
        assert!(matches!(
            call(&map, "keyMatch", &["/a".into(), Value::Number(1.0)]),
            Err(RampartError::FunctionArgument { .. })
        ));
        assert!(call(&map, "ipMatch", &["nope".into(), "10.0.0.0/8".into()]).is_err());
    }

    #[test]
    fn test_custom_function_replaces() {
        let mut map = FunctionMap::default();
        map.add("keyMatch", Arc::new(|_: &[Value]| -> Result<Value> { Ok(Value::Bool(false)) }));
        assert_eq!(
            call(&map, "keyMatch", &["/a".into(), "/a".into()]).unwrap(),
            Value::Bool(false)
        );
    }
}

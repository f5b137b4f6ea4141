//! Tree-walking evaluator for compiled matchers

use super::cache::{cached_regex, CompileCache};
use super::functions::FunctionMap;
use super::parser::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use super::value::Value;
use super::escape_assertion;
use crate::core::error::{RampartError, Result};
use crate::core::model::Model;
use crate::core::rbac::RoleManager;
use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Nesting limit for `eval()` inside `eval()`
const MAX_EVAL_DEPTH: usize = 16;

fn runtime(message: impl Into<String>) -> RampartError {
    RampartError::MatcherRuntime(message.into())
}

/// Per-request evaluation state
///
/// Built once per enforce call and reused for every policy row, so role lookups are
/// memoized across rows of the same request.
pub struct Evaluator<'a> {
    model: &'a Model,
    functions: &'a FunctionMap,
    expressions: &'a CompileCache<Arc<Program>>,
    request_tokens: &'a [String],
    request: &'a [Value],
    policy_tokens: &'a [String],
    role_memo: RefCell<AHashMap<(String, Vec<String>), bool>>,
    depth: Cell<usize>,
}

struct Frame<'r> {
    policy: Option<&'r [String]>,
    locals: Vec<(String, Value)>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        model: &'a Model,
        functions: &'a FunctionMap,
        expressions: &'a CompileCache<Arc<Program>>,
        request_tokens: &'a [String],
        request: &'a [Value],
        policy_tokens: &'a [String],
    ) -> Self {
        Evaluator {
            model,
            functions,
            expressions,
            request_tokens,
            request,
            policy_tokens,
            role_memo: RefCell::new(AHashMap::new()),
            depth: Cell::new(0),
        }
    }

    /// Run `program` against one policy row (or none, for permission-less models)
    pub fn eval(&self, program: &Program, policy: Option<&[String]>) -> Result<Value> {
        let mut frame = Frame {
            policy,
            locals: Vec::new(),
        };
        match program {
            Program::Expr(expr) => self.eval_expr(expr, &mut frame),
            Program::Block(stmts) => self
                .exec_block(stmts, &mut frame)?
                .ok_or_else(|| runtime("block matcher finished without a return")),
        }
    }

    /// Run `program` and coerce the result to a match decision
    pub fn eval_match(&self, program: &Program, policy: Option<&[String]>) -> Result<bool> {
        match self.eval(program, policy)? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n != 0.0),
            other => Err(runtime(format!(
                "matcher result should be bool or number, got {}",
                other.type_name()
            ))),
        }
    }

    fn exec_block(&self, stmts: &[Stmt], frame: &mut Frame<'_>) -> Result<Option<Value>> {
        let scope = frame.locals.len();
        for stmt in stmts {
            match stmt {
                Stmt::Let(name, expr) => {
                    let value = self.eval_expr(expr, frame)?;
                    frame.locals.push((name.clone(), value));
                }
                Stmt::Return(expr) => {
                    let value = self.eval_expr(expr, frame)?;
                    frame.locals.truncate(scope);
                    return Ok(Some(value));
                }
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let branch = if self.eval_bool(cond, frame, "if condition")? {
                        then
                    } else {
                        otherwise
                    };
                    if let Some(value) = self.exec_block(branch, frame)? {
                        frame.locals.truncate(scope);
                        return Ok(Some(value));
                    }
                }
            }
        }
        frame.locals.truncate(scope);
        Ok(None)
    }

    fn lookup(&self, name: &str, frame: &Frame<'_>) -> Result<Value> {
        if let Some((_, value)) = frame.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        if let Some(i) = self.request_tokens.iter().position(|t| t == name) {
            return self
                .request
                .get(i)
                .cloned()
                .ok_or_else(|| runtime(format!("request value for {} is missing", name)));
        }
        if let Some(i) = self.policy_tokens.iter().position(|t| t == name) {
            return match frame.policy {
                Some(row) => Ok(row
                    .get(i)
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or(Value::String(String::new()))),
                None => Ok(Value::String(String::new())),
            };
        }
        Err(runtime(format!("unknown identifier {}", name)))
    }

    fn eval_bool(&self, expr: &Expr, frame: &mut Frame<'_>, what: &str) -> Result<bool> {
        match self.eval_expr(expr, frame)? {
            Value::Bool(b) => Ok(b),
            other => Err(runtime(format!(
                "{} must be bool, got {}",
                what,
                other.type_name()
            ))),
        }
    }

    fn eval_expr(&self, expr: &Expr, frame: &mut Frame<'_>) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name, frame),
            Expr::Member(base, field) => {
                let base = self.eval_expr(base, frame)?;
                match &base {
                    Value::Map(map) => map.get(field).cloned().ok_or_else(|| {
                        runtime(format!("attribute {} not found", field))
                    }),
                    other => Err(runtime(format!(
                        "cannot access attribute {} on {}",
                        field,
                        other.type_name()
                    ))),
                }
            }
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval_expr(item, frame))
                    .collect::<Result<_>>()?,
            )),
            Expr::Call(name, args) => self.call(name, args, frame),
            Expr::Unary(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!self.eval_bool(operand, frame, "operand of !")?))
            }
            Expr::Unary(UnaryOp::Neg, operand) => match self.eval_expr(operand, frame)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(runtime(format!("cannot negate {}", other.type_name()))),
            },
            Expr::Binary(BinaryOp::And, lhs, rhs) => Ok(Value::Bool(
                self.eval_bool(lhs, frame, "operand of &&")?
                    && self.eval_bool(rhs, frame, "operand of &&")?,
            )),
            Expr::Binary(BinaryOp::Or, lhs, rhs) => Ok(Value::Bool(
                self.eval_bool(lhs, frame, "operand of ||")?
                    || self.eval_bool(rhs, frame, "operand of ||")?,
            )),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(lhs, frame)?;
                let rhs = self.eval_expr(rhs, frame)?;
                binary(*op, lhs, rhs)
            }
        }
    }

    fn call(&self, name: &str, args: &[Expr], frame: &mut Frame<'_>) -> Result<Value> {
        let values = args
            .iter()
            .map(|arg| self.eval_expr(arg, frame))
            .collect::<Result<Vec<_>>>()?;

        if name == "eval" {
            return self.call_eval(&values, frame);
        }
        if let Some(assertion) = self.model.get("g", name) {
            return self.call_role(name, assertion.role_manager(), &values);
        }
        match self.functions.get(name) {
            Some(f) => f(&values),
            None => Err(RampartError::UnknownFunction(name.to_string())),
        }
    }

    fn call_eval(&self, values: &[Value], frame: &Frame<'_>) -> Result<Value> {
        let [Value::String(text)] = values else {
            return Err(RampartError::argument(
                "eval",
                "expected a single string argument",
            ));
        };
        let depth = self.depth.get();
        if depth >= MAX_EVAL_DEPTH {
            return Err(runtime("eval() nested too deeply"));
        }
        let program = self.expressions.get_or_try_insert(text, || {
            Program::parse(&escape_assertion(text)).map(Arc::new)
        })?;
        self.depth.set(depth + 1);
        let result = self.eval(&program, frame.policy);
        self.depth.set(depth);
        result
    }

    fn call_role(
        &self,
        name: &str,
        role_manager: Option<&Arc<dyn RoleManager>>,
        values: &[Value],
    ) -> Result<Value> {
        if values.len() < 2 {
            return Err(RampartError::argument(
                name,
                format!("expected at least 2 arguments, but got {}", values.len()),
            ));
        }
        let args = values
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    RampartError::argument(
                        name,
                        format!("argument must be a string, got {}", v.type_name()),
                    )
                })
            })
            .collect::<Result<Vec<String>>>()?;

        let Some(rm) = role_manager else {
            return Ok(Value::Bool(args[0] == args[1]));
        };

        let key = (name.to_string(), args);
        if let Some(hit) = self.role_memo.borrow().get(&key) {
            return Ok(Value::Bool(*hit));
        }
        let args = &key.1;
        let domain: Vec<&str> = args[2..].iter().map(String::as_str).collect();
        let result = rm.has_link(&args[0], &args[1], &domain)?;
        self.role_memo.borrow_mut().insert(key, result);
        Ok(Value::Bool(result))
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    let mismatch = |lhs: &Value, rhs: &Value, symbol: &str| {
        runtime(format!(
            "cannot apply {} to {} and {}",
            symbol,
            lhs.type_name(),
            rhs.type_name()
        ))
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(mismatch(&lhs, &rhs, "comparison")),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::RegexEq => match (&lhs, &rhs) {
            (Value::String(text), Value::String(pattern)) => {
                let re = cached_regex(pattern)
                    .map_err(|e| runtime(format!("invalid regex {}: {}", pattern, e)))?;
                Ok(Value::Bool(re.is_match(text)))
            }
            _ => Err(mismatch(&lhs, &rhs, "=~")),
        },
        BinaryOp::In => match &rhs {
            Value::List(items) => Ok(Value::Bool(items.contains(&lhs))),
            Value::Map(map) => match &lhs {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Err(mismatch(&lhs, &rhs, "in")),
            },
            _ => Err(mismatch(&lhs, &rhs, "in")),
        },
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), Value::String(_) | Value::Number(_) | Value::Bool(_))
            | (Value::Number(_) | Value::Bool(_), Value::String(_)) => {
                Ok(Value::String(format!("{}{}", lhs, rhs)))
            }
            _ => Err(mismatch(&lhs, &rhs, "+")),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) else {
                return Err(mismatch(&lhs, &rhs, "arithmetic"));
            };
            Ok(Value::Number(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            }))
        }
        BinaryOp::And | BinaryOp::Or => Err(runtime("logical operators are short-circuited")),
    }
}

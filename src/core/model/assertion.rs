use super::constraint::Constraint;
use crate::core::effect::EffectKind;
use crate::core::error::{RampartError, Result};
use crate::core::matcher::compile;
use crate::core::rbac::{DefaultRoleManager, RoleManager};
use ahash::{AHashMap, AHashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Direction of an incremental role-link update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOp {
    Add,
    Remove,
}

/// One definition line of a model (`r = sub, obj, act`, `g = _, _`, `m = ...`)
///
/// `p` and `g` assertions also own their policy rows; `g` assertions own the role
/// manager the rows are linked into.
#[derive(Clone)]
pub struct Assertion {
    sec: String,
    key: String,
    value: String,
    tokens: Vec<String>,
    link_columns: usize,
    policy: Vec<Vec<String>>,
    rows: AHashSet<Vec<String>>,
    field_index: AHashMap<String, usize>,
    role_manager: Option<Arc<dyn RoleManager>>,
    effect: Option<EffectKind>,
    constraint: Option<Constraint>,
}

impl Assertion {
    /// Build an assertion for section `sec` (`r`, `p`, `g`, `e`, `m` or `c`)
    pub fn new(sec: &str, key: &str, value: &str) -> Result<Self> {
        let value = value.trim();
        let mut assertion = Assertion {
            sec: sec.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            tokens: Vec::new(),
            link_columns: 0,
            policy: Vec::new(),
            rows: AHashSet::new(),
            field_index: AHashMap::new(),
            role_manager: None,
            effect: None,
            constraint: None,
        };

        match sec {
            "r" | "p" => {
                assertion.tokens = value
                    .split(',')
                    .map(|token| format!("{}_{}", key, token.trim()))
                    .collect();
            }
            "g" => {
                // `g = _, _, _, (_, _)`: the parenthesized tail holds condition parameters
                let links = value.split('(').next().unwrap_or_default();
                let count = links.split(',').filter(|t| t.trim() == "_").count();
                if !(2..=3).contains(&count) {
                    return Err(RampartError::ModelParse(format!(
                        "role definition {} needs 2 or 3 '_' placeholders (user, role, optional domain), got '{}'",
                        key, value
                    )));
                }
                assertion.link_columns = count;
                assertion.tokens = (0..count).map(|i| format!("{}_{}", key, i)).collect();
                assertion.role_manager = Some(Arc::new(DefaultRoleManager::default()));
            }
            "e" => {
                let text = value.split('#').next().unwrap_or_default().trim();
                assertion.value = text.to_string();
                assertion.effect = Some(EffectKind::parse(text)?);
            }
            "m" => {
                compile(value)?;
            }
            "c" => {
                assertion.constraint = Some(Constraint::parse(key, value)?);
            }
            other => {
                return Err(RampartError::ModelParse(format!(
                    "unknown section '{}' for {}",
                    other, key
                )))
            }
        }
        Ok(assertion)
    }

    pub fn sec(&self) -> &str {
        &self.sec
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Definition text as written (effect text has trailing comments removed)
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Prefixed token names (`r_sub`, `p_obj`, ...)
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Number of `_` columns a `g` row links on (user, role, domain...)
    pub fn link_columns(&self) -> usize {
        self.link_columns
    }

    pub fn policy(&self) -> &[Vec<String>] {
        &self.policy
    }

    pub fn role_manager(&self) -> Option<&Arc<dyn RoleManager>> {
        self.role_manager.as_ref()
    }

    pub fn set_role_manager(&mut self, rm: Arc<dyn RoleManager>) {
        self.role_manager = Some(rm);
    }

    pub fn effect(&self) -> Option<&EffectKind> {
        self.effect.as_ref()
    }

    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    /// Column of `field` (`priority`, `sub`, `dom`, ...), explicit overrides first
    pub fn field_index(&self, field: &str) -> Option<usize> {
        if let Some(index) = self.field_index.get(field) {
            return Some(*index);
        }
        let token = format!("{}_{}", self.key, field);
        self.tokens.iter().position(|t| *t == token)
    }

    pub fn set_field_index(&mut self, field: &str, index: usize) {
        self.field_index.insert(field.to_string(), index);
    }

    /// Validate a row's arity against this definition
    pub fn check_row(&self, row: &[String]) -> Result<()> {
        let ok = match self.sec.as_str() {
            "g" => row.len() >= self.link_columns,
            _ => row.len() == self.tokens.len(),
        };
        if ok {
            Ok(())
        } else {
            Err(RampartError::PolicyArity {
                ptype: self.key.clone(),
                expected: if self.sec == "g" {
                    self.link_columns
                } else {
                    self.tokens.len()
                },
                got: row.len(),
            })
        }
    }

    pub fn has(&self, row: &[String]) -> bool {
        self.rows.contains(row)
    }

    /// Append a row; returns false if it was already present
    ///
    /// With a `priority` column, the row is placed after every row of lower or equal
    /// priority.
    pub fn add(&mut self, row: Vec<String>) -> Result<bool> {
        self.check_row(&row)?;
        if self.rows.contains(&row) {
            return Ok(false);
        }
        self.rows.insert(row.clone());

        let priority = match self.sec.as_str() {
            "p" => self
                .field_index("priority")
                .and_then(|i| priority_of(&row, i).map(|p| (i, p))),
            _ => None,
        };
        match priority {
            Some((column, value)) => {
                let mut at = self.policy.len();
                while at > 0 {
                    match priority_of(&self.policy[at - 1], column) {
                        Some(previous) if previous > value => at -= 1,
                        _ => break,
                    }
                }
                self.policy.insert(at, row);
            }
            None => self.policy.push(row),
        }
        Ok(true)
    }

    /// Remove a row; returns false if it was absent
    pub fn remove(&mut self, row: &[String]) -> bool {
        if !self.rows.remove(row) {
            return false;
        }
        self.policy.retain(|existing| existing.as_slice() != row);
        true
    }

    /// Replace `old` in place; false if `old` is absent
    pub fn update(&mut self, old: &[String], new: Vec<String>) -> Result<bool> {
        self.check_row(&new)?;
        let Some(position) = self.policy.iter().position(|row| row.as_slice() == old) else {
            return Ok(false);
        };
        if old != new.as_slice() && self.rows.contains(&new) {
            return Ok(false);
        }
        self.rows.remove(old);
        self.rows.insert(new.clone());
        self.policy[position] = new;
        Ok(true)
    }

    /// Rows whose columns from `field_index` on equal `values` (empty string matches anything)
    pub fn filtered(&self, field_index: usize, values: &[&str]) -> Vec<Vec<String>> {
        self.policy
            .iter()
            .filter(|row| row_matches(row, field_index, values))
            .cloned()
            .collect()
    }

    /// Remove the rows [`Assertion::filtered`] selects, returning them
    pub fn remove_filtered(&mut self, field_index: usize, values: &[&str]) -> Vec<Vec<String>> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.policy)
            .into_iter()
            .partition(|row| row_matches(row, field_index, values));
        self.policy = kept;
        for row in &removed {
            self.rows.remove(row);
        }
        removed
    }

    /// Distinct values of one column, in row order
    pub fn values_for_field(&self, field_index: usize) -> Vec<String> {
        let mut seen = AHashSet::new();
        self.policy
            .iter()
            .filter_map(|row| row.get(field_index))
            .filter(|value| seen.insert(value.as_str()))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.policy.clear();
        self.rows.clear();
    }

    /// Stable sort on the numeric `priority` column; rows with unparsable priority go last
    pub fn sort_by_priority(&mut self) {
        let Some(column) = self.field_index("priority") else {
            return;
        };
        self.policy
            .sort_by_key(|row| priority_of(row, column).unwrap_or(i64::MAX));
    }

    pub(crate) fn sort_by_key_desc(&mut self, key: impl Fn(&[String]) -> i64) {
        self.policy.sort_by_key(|row| std::cmp::Reverse(key(row)));
    }

    /// Split a `g` row into (user, role, domain, condition parameters)
    pub fn link_parts<'r>(&self, row: &'r [String]) -> (&'r str, &'r str, Vec<&'r str>, &'r [String]) {
        let links = self.link_columns.min(row.len());
        let domain = row
            .get(2..links)
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .collect();
        (
            row.first().map(String::as_str).unwrap_or_default(),
            row.get(1).map(String::as_str).unwrap_or_default(),
            domain,
            row.get(links..).unwrap_or_default(),
        )
    }

    /// Rebuild the role manager from every row
    pub fn build_role_links(&self) -> Result<()> {
        let Some(rm) = &self.role_manager else {
            return Ok(());
        };
        rm.clear();
        for row in &self.policy {
            self.link(rm.as_ref(), PolicyOp::Add, row)?;
        }
        debug!("Built {} role links for {}", self.policy.len(), self.key);
        Ok(())
    }

    /// Apply added or removed rows to the role manager
    pub fn build_incremental_role_links(&self, op: PolicyOp, rows: &[Vec<String>]) -> Result<()> {
        let Some(rm) = &self.role_manager else {
            return Ok(());
        };
        for row in rows {
            self.link(rm.as_ref(), op, row)?;
        }
        Ok(())
    }

    fn link(&self, rm: &dyn RoleManager, op: PolicyOp, row: &[String]) -> Result<()> {
        self.check_row(row)?;
        let (user, role, domain, params) = self.link_parts(row);
        match op {
            PolicyOp::Add => {
                rm.add_link(user, role, &domain)?;
                if !params.is_empty() {
                    rm.set_link_condition_params(user, role, &domain, params)?;
                }
            }
            PolicyOp::Remove => rm.delete_link(user, role, &domain)?,
        }
        Ok(())
    }
}

fn priority_of(row: &[String], column: usize) -> Option<i64> {
    row.get(column).and_then(|p| p.trim().parse().ok())
}

fn row_matches(row: &[String], field_index: usize, values: &[&str]) -> bool {
    values.iter().enumerate().all(|(i, value)| {
        value.is_empty()
            || row
                .get(field_index + i)
                .is_some_and(|column| column == value)
    })
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assertion")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("tokens", &self.tokens)
            .field("rows", &self.policy.len())
            .field("role_manager", &self.role_manager.is_some())
            .finish()
    }
}

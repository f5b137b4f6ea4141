//! Policy row management on a [`Model`]
//!
//! These operations only touch rows. Keeping role managers and constraints in step is
//! the enforcer's job.

use super::{Model, PolicyOp};
use crate::core::error::{RampartError, Result};
use ahash::{AHashMap, AHashSet};
use std::collections::VecDeque;
use tracing::{debug, info};

const DEFAULT_DOMAIN: &str = "";

impl Model {
    /// All rows of `sec.ptype`; empty for an unknown ptype
    pub fn get_policy(&self, sec: &str, ptype: &str) -> Vec<Vec<String>> {
        self.get(sec, ptype)
            .map(|a| a.policy().to_vec())
            .unwrap_or_default()
    }

    /// Rows whose columns from `field_index` on equal `values` ("" is a wildcard)
    pub fn get_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Vec<Vec<String>> {
        self.get(sec, ptype)
            .map(|a| a.filtered(field_index, values))
            .unwrap_or_default()
    }

    pub fn has_policy(&self, sec: &str, ptype: &str, row: &[String]) -> bool {
        self.get(sec, ptype).is_some_and(|a| a.has(row))
    }

    /// Add one row; false if already present
    pub fn add_policy(&mut self, sec: &str, ptype: &str, row: Vec<String>) -> Result<bool> {
        self.assertion_mut(sec, ptype)?.add(row)
    }

    /// Add rows all-or-nothing: nothing is added if any row exists or is malformed
    pub fn add_policies(&mut self, sec: &str, ptype: &str, rows: &[Vec<String>]) -> Result<bool> {
        let assertion = self.assertion_mut(sec, ptype)?;
        for row in rows {
            assertion.check_row(row)?;
        }
        let mut distinct = AHashSet::new();
        if rows.iter().any(|row| assertion.has(row) || !distinct.insert(row)) {
            return Ok(false);
        }
        for row in rows {
            assertion.add(row.clone())?;
        }
        Ok(true)
    }

    /// Remove one row; false if absent
    pub fn remove_policy(&mut self, sec: &str, ptype: &str, row: &[String]) -> Result<bool> {
        Ok(self.assertion_mut(sec, ptype)?.remove(row))
    }

    /// Remove rows all-or-nothing: nothing is removed unless every row exists
    pub fn remove_policies(&mut self, sec: &str, ptype: &str, rows: &[Vec<String>]) -> Result<bool> {
        let assertion = self.assertion_mut(sec, ptype)?;
        if !rows.iter().all(|row| assertion.has(row)) {
            return Ok(false);
        }
        for row in rows {
            assertion.remove(row);
        }
        Ok(true)
    }

    /// Replace `old` with `new` in place; false if `old` is absent
    pub fn update_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: Vec<String>,
    ) -> Result<bool> {
        self.assertion_mut(sec, ptype)?.update(old, new)
    }

    /// Remove every row [`Model::get_filtered_policy`] selects, returning them
    pub fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<Vec<Vec<String>>> {
        Ok(self
            .assertion_mut(sec, ptype)?
            .remove_filtered(field_index, values))
    }

    /// Distinct values of one column
    pub fn get_values_for_field_in_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
    ) -> Vec<String> {
        self.get(sec, ptype)
            .map(|a| a.values_for_field(field_index))
            .unwrap_or_default()
    }

    /// Drop every `p` and `g` row
    pub fn clear_policy(&mut self) {
        for sec in ["p", "g"] {
            for assertion in self.section_mut(sec) {
                assertion.clear();
            }
        }
    }

    /// Column of `field` in policy type `ptype`
    pub fn get_field_index(&self, ptype: &str, field: &str) -> Option<usize> {
        self.get("p", ptype).and_then(|a| a.field_index(field))
    }

    pub fn set_field_index(&mut self, ptype: &str, field: &str, index: usize) -> Result<()> {
        self.assertion_mut("p", ptype)?.set_field_index(field, index);
        Ok(())
    }

    /// Stable-sort every policy type that has a `priority` column
    pub fn sort_policies_by_priority(&mut self) {
        for assertion in self.section_mut("p") {
            assertion.sort_by_priority();
        }
    }

    /// Order rows so subjects deeper in the `g` hierarchy come first
    ///
    /// Only applies when the model's effect is `subjectPriority(p_eft) || deny`.
    pub fn sort_policies_by_subject_hierarchy(&mut self) -> Result<()> {
        if !self.uses_subject_priority() {
            return Ok(());
        }
        let depths = subject_depths(&self.get_policy("g", "g"))?;
        for assertion in self.section_mut("p") {
            let domain_index = assertion.field_index("dom");
            assertion.sort_by_key_desc(|row| {
                let domain = domain_index
                    .and_then(|i| row.get(i))
                    .map_or(DEFAULT_DOMAIN, String::as_str);
                let subject = row.first().map_or("", String::as_str);
                depths
                    .get(&qualified(domain, subject))
                    .copied()
                    .unwrap_or(0)
            });
        }
        debug!("Sorted policies by subject hierarchy");
        Ok(())
    }

    /// Rebuild every role manager from the current `g` rows
    pub fn build_role_links(&self) -> Result<()> {
        for (_, assertion) in self.section("g") {
            assertion.build_role_links()?;
        }
        info!("Rebuilt role links");
        Ok(())
    }

    /// Apply added/removed `g` rows to the role manager of `ptype`
    pub fn build_incremental_role_links(
        &self,
        op: PolicyOp,
        ptype: &str,
        rows: &[Vec<String>],
    ) -> Result<()> {
        self.assertion("g", ptype)?
            .build_incremental_role_links(op, rows)
    }

    /// Check every constraint against the `g` rows
    pub fn validate_constraints(&self) -> Result<()> {
        if !self.has_section("c") {
            return Ok(());
        }
        let grouping = self
            .get("g", "g")
            .ok_or(RampartError::ConstraintRequiresRoles)?
            .policy();
        for (_, assertion) in self.section("c") {
            if let Some(constraint) = assertion.constraint() {
                constraint.validate(grouping)?;
            }
        }
        Ok(())
    }
}

fn qualified(domain: &str, name: &str) -> String {
    format!("{}::{}", domain, name)
}

/// Depth of every name in the grouping forest; roots are 0
fn subject_depths(grouping: &[Vec<String>]) -> Result<AHashMap<String, i64>> {
    let mut children: AHashMap<String, Vec<String>> = AHashMap::new();
    let mut has_parent: AHashMap<String, bool> = AHashMap::new();

    for row in grouping {
        if row.len() < 2 {
            return Err(RampartError::PolicyArity {
                ptype: "g".to_string(),
                expected: 2,
                got: row.len(),
            });
        }
        let domain = row.get(2).map_or(DEFAULT_DOMAIN, String::as_str);
        let child = qualified(domain, &row[0]);
        let parent = qualified(domain, &row[1]);
        children.entry(parent.clone()).or_default().push(child.clone());
        has_parent.entry(parent).or_insert(false);
        has_parent.insert(child, true);
    }

    let mut depths = AHashMap::new();
    let mut queue = VecDeque::new();
    for (name, _) in has_parent.iter().filter(|(_, child)| !**child) {
        queue.push_back((name.clone(), 0));
    }
    while let Some((name, depth)) = queue.pop_front() {
        if depths.contains_key(&name) {
            continue;
        }
        if let Some(kids) = children.get(&name) {
            for kid in kids {
                queue.push_back((kid.clone(), depth + 1));
            }
        }
        depths.insert(name, depth);
    }
    Ok(depths)
}

//! Policy management on an [`Enforcer`]
//!
//! Every mutation of grouping rows is checked against the model's constraints and
//! rolled back when one is violated. With `auto_build_role_links` on, role managers
//! follow added and removed grouping rows incrementally; if the role manager rejects a
//! change, the rows are restored and links rebuilt from them.

use crate::core::enforcer::Enforcer;
use crate::core::error::Result;
use crate::core::model::PolicyOp;
use tracing::{debug, warn};

fn to_row<I, S>(row: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    row.into_iter().map(Into::into).collect()
}

fn to_rows<R, I, S>(rows: R) -> Vec<Vec<String>>
where
    R: IntoIterator<Item = I>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    rows.into_iter().map(to_row).collect()
}

impl Enforcer {
    // Read

    pub fn get_policy(&self) -> Vec<Vec<String>> {
        self.get_named_policy("p")
    }

    pub fn get_named_policy(&self, ptype: &str) -> Vec<Vec<String>> {
        self.model.get_policy("p", ptype)
    }

    /// Rows of `p` whose columns from `field_index` on equal `values` ("" is a wildcard)
    pub fn get_filtered_policy(&self, field_index: usize, values: &[&str]) -> Vec<Vec<String>> {
        self.get_filtered_named_policy("p", field_index, values)
    }

    pub fn get_filtered_named_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Vec<Vec<String>> {
        self.model.get_filtered_policy("p", ptype, field_index, values)
    }

    pub fn get_grouping_policy(&self) -> Vec<Vec<String>> {
        self.get_named_grouping_policy("g")
    }

    pub fn get_named_grouping_policy(&self, ptype: &str) -> Vec<Vec<String>> {
        self.model.get_policy("g", ptype)
    }

    pub fn get_filtered_grouping_policy(&self, field_index: usize, values: &[&str]) -> Vec<Vec<String>> {
        self.get_filtered_named_grouping_policy("g", field_index, values)
    }

    pub fn get_filtered_named_grouping_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Vec<Vec<String>> {
        self.model.get_filtered_policy("g", ptype, field_index, values)
    }

    pub fn has_policy<I, S>(&self, row: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has_named_policy("p", row)
    }

    pub fn has_named_policy<I, S>(&self, ptype: &str, row: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model.has_policy("p", ptype, &to_row(row))
    }

    pub fn has_grouping_policy<I, S>(&self, row: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has_named_grouping_policy("g", row)
    }

    pub fn has_named_grouping_policy<I, S>(&self, ptype: &str, row: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model.has_policy("g", ptype, &to_row(row))
    }

    fn policy_column(&self, field: &str, fallback: usize) -> Vec<String> {
        let index = self.model.get_field_index("p", field).unwrap_or(fallback);
        self.model.get_values_for_field_in_policy("p", "p", index)
    }

    /// Distinct subjects of `p` (the `sub` column, else column 0)
    pub fn get_all_subjects(&self) -> Vec<String> {
        self.policy_column("sub", 0)
    }

    pub fn get_all_objects(&self) -> Vec<String> {
        self.policy_column("obj", 1)
    }

    pub fn get_all_actions(&self) -> Vec<String> {
        self.policy_column("act", 2)
    }

    /// Distinct roles named in `g` rows
    pub fn get_all_roles(&self) -> Vec<String> {
        self.model.get_values_for_field_in_policy("g", "g", 1)
    }

    // Write: policy rows

    /// Add one `p` row; false if it already exists
    pub fn add_policy<I, S>(&mut self, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_named_policy("p", row)
    }

    pub fn add_named_policy<I, S>(&mut self, ptype: &str, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rows("p", ptype, vec![to_row(row)])
    }

    /// Add rows all-or-nothing; false (and nothing added) if any row exists
    pub fn add_policies<R, I, S>(&mut self, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_named_policies("p", rows)
    }

    pub fn add_named_policies<R, I, S>(&mut self, ptype: &str, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rows("p", ptype, to_rows(rows))
    }

    pub fn remove_policy<I, S>(&mut self, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_named_policy("p", row)
    }

    pub fn remove_named_policy<I, S>(&mut self, ptype: &str, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rows("p", ptype, vec![to_row(row)])
    }

    /// Remove rows all-or-nothing; false (and nothing removed) unless all exist
    pub fn remove_policies<R, I, S>(&mut self, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_named_policies("p", rows)
    }

    pub fn remove_named_policies<R, I, S>(&mut self, ptype: &str, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rows("p", ptype, to_rows(rows))
    }

    pub fn remove_filtered_policy(&mut self, field_index: usize, values: &[&str]) -> Result<bool> {
        self.remove_filtered_named_policy("p", field_index, values)
    }

    pub fn remove_filtered_named_policy(
        &mut self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool> {
        self.remove_filtered("p", ptype, field_index, values)
    }

    /// Replace `old` in place; false if `old` is absent or `new` already exists
    pub fn update_policy<I, J, S, T>(&mut self, old: I, new: J) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.update_named_policy("p", old, new)
    }

    pub fn update_named_policy<I, J, S, T>(&mut self, ptype: &str, old: I, new: J) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.update_row("p", ptype, to_row(old), to_row(new))
    }

    // Write: grouping rows

    pub fn add_grouping_policy<I, S>(&mut self, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_named_grouping_policy("g", row)
    }

    pub fn add_named_grouping_policy<I, S>(&mut self, ptype: &str, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rows("g", ptype, vec![to_row(row)])
    }

    pub fn add_grouping_policies<R, I, S>(&mut self, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_named_grouping_policies("g", rows)
    }

    pub fn add_named_grouping_policies<R, I, S>(&mut self, ptype: &str, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_rows("g", ptype, to_rows(rows))
    }

    pub fn remove_grouping_policy<I, S>(&mut self, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_named_grouping_policy("g", row)
    }

    pub fn remove_named_grouping_policy<I, S>(&mut self, ptype: &str, row: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rows("g", ptype, vec![to_row(row)])
    }

    pub fn remove_grouping_policies<R, I, S>(&mut self, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_named_grouping_policies("g", rows)
    }

    pub fn remove_named_grouping_policies<R, I, S>(&mut self, ptype: &str, rows: R) -> Result<bool>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_rows("g", ptype, to_rows(rows))
    }

    pub fn remove_filtered_grouping_policy(&mut self, field_index: usize, values: &[&str]) -> Result<bool> {
        self.remove_filtered_named_grouping_policy("g", field_index, values)
    }

    pub fn remove_filtered_named_grouping_policy(
        &mut self,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool> {
        self.remove_filtered("g", ptype, field_index, values)
    }

    pub fn update_grouping_policy<I, J, S, T>(&mut self, old: I, new: J) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.update_named_grouping_policy("g", old, new)
    }

    pub fn update_named_grouping_policy<I, J, S, T>(
        &mut self,
        ptype: &str,
        old: I,
        new: J,
    ) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.update_row("g", ptype, to_row(old), to_row(new))
    }

    /// Drop every policy and grouping row
    pub fn clear_policy(&mut self) -> Result<()> {
        self.model.clear_policy();
        if self.options.auto_build_role_links {
            self.model.build_role_links()?;
        }
        Ok(())
    }

    // Shared flow

    fn sync_links(&self, op: PolicyOp, ptype: &str, rows: &[Vec<String>]) -> Result<()> {
        if self.options.auto_build_role_links {
            self.model.build_incremental_role_links(op, ptype, rows)?;
        }
        Ok(())
    }

    /// Full rebuild after a failed incremental sync left the role manager partially updated
    fn resync_links(&self) -> Result<()> {
        if self.options.auto_build_role_links {
            self.model.build_role_links()?;
        }
        Ok(())
    }

    fn add_rows(&mut self, sec: &str, ptype: &str, rows: Vec<Vec<String>>) -> Result<bool> {
        if !self.model.add_policies(sec, ptype, &rows)? {
            return Ok(false);
        }
        if sec == "g" {
            let checked = self
                .model
                .validate_constraints()
                .and_then(|()| self.sync_links(PolicyOp::Add, ptype, &rows));
            if let Err(e) = checked {
                warn!("Rolled back {} rows added to {}: {}", rows.len(), ptype, e);
                self.model.remove_policies(sec, ptype, &rows)?;
                self.resync_links()?;
                return Err(e);
            }
        }
        debug!("Added {} rows to {}", rows.len(), ptype);
        Ok(true)
    }

    fn remove_rows(&mut self, sec: &str, ptype: &str, rows: Vec<Vec<String>>) -> Result<bool> {
        if !self.model.remove_policies(sec, ptype, &rows)? {
            return Ok(false);
        }
        self.after_remove(sec, ptype, &rows)?;
        debug!("Removed {} rows from {}", rows.len(), ptype);
        Ok(true)
    }

    fn remove_filtered(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[&str],
    ) -> Result<bool> {
        let removed = self
            .model
            .remove_filtered_policy(sec, ptype, field_index, values)?;
        if removed.is_empty() {
            return Ok(false);
        }
        self.after_remove(sec, ptype, &removed)?;
        debug!("Removed {} filtered rows from {}", removed.len(), ptype);
        Ok(true)
    }

    fn after_remove(&mut self, sec: &str, ptype: &str, rows: &[Vec<String>]) -> Result<()> {
        if sec != "g" {
            return Ok(());
        }
        let checked = self
            .model
            .validate_constraints()
            .and_then(|()| self.sync_links(PolicyOp::Remove, ptype, rows));
        if let Err(e) = checked {
            warn!("Rolled back {} rows removed from {}: {}", rows.len(), ptype, e);
            self.model.add_policies(sec, ptype, rows)?;
            self.resync_links()?;
            return Err(e);
        }
        Ok(())
    }

    fn update_row(&mut self, sec: &str, ptype: &str, old: Vec<String>, new: Vec<String>) -> Result<bool> {
        if !self.model.update_policy(sec, ptype, &old, new.clone())? {
            return Ok(false);
        }
        if sec == "g" {
            let checked = self.model.validate_constraints().and_then(|()| {
                self.sync_links(PolicyOp::Remove, ptype, std::slice::from_ref(&old))?;
                self.sync_links(PolicyOp::Add, ptype, std::slice::from_ref(&new))
            });
            if let Err(e) = checked {
                warn!("Rolled back update of {}: {}", ptype, e);
                self.model.update_policy(sec, ptype, &new, old)?;
                self.resync_links()?;
                return Err(e);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RampartError;

    const RBAC: &str = "[request_definition]\nr = sub, obj, act\n\
                        [policy_definition]\np = sub, obj, act\n\
                        [role_definition]\ng = _, _\n\
                        [policy_effect]\ne = some(where (p.eft == allow))\n\
                        [matchers]\nm = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act\n";

    fn enforcer() -> Enforcer {
        let mut e = Enforcer::from_text(RBAC).unwrap();
        e.add_policies([
            ["admin", "data1", "read"],
            ["admin", "data1", "write"],
            ["bob", "data2", "write"],
        ])
        .unwrap();
        e.add_grouping_policy(["alice", "admin"]).unwrap();
        e
    }

    #[test]
    fn test_reads() {
        let e = enforcer();
        assert_eq!(e.get_policy().len(), 3);
        assert_eq!(e.get_filtered_policy(0, &["admin"]).len(), 2);
        assert_eq!(e.get_filtered_policy(1, &["", "write"]).len(), 2);
        assert!(e.has_policy(["bob", "data2", "write"]));
        assert!(e.has_grouping_policy(["alice", "admin"]));
        assert_eq!(e.get_all_subjects(), vec!["admin", "bob"]);
        assert_eq!(e.get_all_objects(), vec!["data1", "data2"]);
        assert_eq!(e.get_all_actions(), vec!["read", "write"]);
        assert_eq!(e.get_all_roles(), vec!["admin"]);
    }

    #[test]
    fn test_grouping_changes_reach_enforce() {
        let mut e = enforcer();
        assert!(e.enforce(["alice", "data1", "read"]).unwrap());

        assert!(e.remove_grouping_policy(["alice", "admin"]).unwrap());
        assert!(!e.enforce(["alice", "data1", "read"]).unwrap());
        assert!(!e.remove_grouping_policy(["alice", "admin"]).unwrap());

        assert!(e.add_grouping_policy(["carol", "admin"]).unwrap());
        assert!(e.update_grouping_policy(["carol", "admin"], ["dave", "admin"]).unwrap());
        assert!(!e.enforce(["carol", "data1", "read"]).unwrap());
        assert!(e.enforce(["dave", "data1", "write"]).unwrap());

        assert!(e.remove_filtered_grouping_policy(1, &["admin"]).unwrap());
        assert!(!e.enforce(["dave", "data1", "write"]).unwrap());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut e = enforcer();
        assert!(!e
            .add_policies([["carol", "data3", "read"], ["bob", "data2", "write"]])
            .unwrap());
        assert!(!e.has_policy(["carol", "data3", "read"]));

        assert!(!e
            .remove_policies([["bob", "data2", "write"], ["nobody", "x", "y"]])
            .unwrap());
        assert!(e.has_policy(["bob", "data2", "write"]));
    }

    #[test]
    fn test_update_and_filtered_removal() {
        let mut e = enforcer();
        assert!(e
            .update_policy(["bob", "data2", "write"], ["bob", "data2", "read"])
            .unwrap());
        assert!(e.enforce(["bob", "data2", "read"]).unwrap());
        assert!(!e
            .update_policy(["bob", "data2", "write"], ["bob", "data9", "read"])
            .unwrap());

        assert!(e.remove_filtered_policy(0, &["admin"]).unwrap());
        assert!(!e.remove_filtered_policy(0, &["admin"]).unwrap());
        assert_eq!(e.get_policy(), vec![vec!["bob", "data2", "read"]]);
    }

    #[test]
    fn test_arity_checked() {
        let mut e = enforcer();
        assert!(matches!(
            e.add_policy(["alice", "data1"]),
            Err(RampartError::PolicyArity { .. })
        ));
        assert!(e.add_named_policy("p9", ["a", "b", "c"]).is_err());
    }

    #[test]
    fn test_manual_role_links() {
        let mut e = enforcer();
        e.enable_auto_build_role_links(false);
        e.add_grouping_policy(["carol", "admin"]).unwrap();
        assert!(!e.enforce(["carol", "data1", "read"]).unwrap());
        e.build_role_links().unwrap();
        assert!(e.enforce(["carol", "data1", "read"]).unwrap());
    }

    #[test]
    fn test_clear_policy() {
        let mut e = enforcer();
        e.clear_policy().unwrap();
        assert!(e.get_policy().is_empty());
        assert!(e.get_grouping_policy().is_empty());
        assert!(!e.get_role_manager().unwrap().has_link("alice", "admin", &[]).unwrap());
    }
}

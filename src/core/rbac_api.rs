//! Role-based access control API
//!
//! Convenience operations over the `g` role definition and the `p` policy type. The
//! optional `domain` argument scopes role queries for models with `g = _, _, _`.

use crate::core::enforcer::Enforcer;
use crate::core::error::{RampartError, Result};
use crate::core::rbac::RoleManager;
use ahash::AHashSet;
use std::collections::VecDeque;
use std::sync::Arc;

impl Enforcer {
    fn default_role_manager(&self) -> Result<Arc<dyn RoleManager>> {
        self.get_role_manager()
            .ok_or_else(|| RampartError::UnknownPolicyType {
                sec: "g".to_string(),
                ptype: "g".to_string(),
            })
    }

    fn subject_index(&self) -> usize {
        self.model.get_field_index("p", "sub").unwrap_or(0)
    }

    fn grouping_row(user: &str, role: &str, domain: Option<&str>) -> Vec<String> {
        let mut row = vec![user.to_string(), role.to_string()];
        row.extend(domain.map(str::to_string));
        row
    }

    /// Direct roles of `name`
    pub fn get_roles_for_user(&self, name: &str, domain: Option<&str>) -> Result<Vec<String>> {
        self.default_role_manager()?.get_roles(name, domain.as_slice())
    }

    /// Direct members of `role`
    pub fn get_users_for_role(&self, role: &str, domain: Option<&str>) -> Result<Vec<String>> {
        self.default_role_manager()?.get_users(role, domain.as_slice())
    }

    /// Whether `name` holds `role` directly
    pub fn has_role_for_user(&self, name: &str, role: &str, domain: Option<&str>) -> Result<bool> {
        Ok(self
            .get_roles_for_user(name, domain)?
            .iter()
            .any(|r| r == role))
    }

    pub fn add_role_for_user(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<bool> {
        self.add_grouping_policy(Self::grouping_row(user, role, domain))
    }

    pub fn delete_role_for_user(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<bool> {
        self.remove_grouping_policy(Self::grouping_row(user, role, domain))
    }

    /// Remove every role of `user` (within `domain` when given)
    pub fn delete_roles_for_user(&mut self, user: &str, domain: Option<&str>) -> Result<bool> {
        match domain {
            Some(domain) => self.remove_filtered_grouping_policy(0, &[user, "", domain]),
            None => self.remove_filtered_grouping_policy(0, &[user]),
        }
    }

    /// Remove `user` from every grouping and policy row
    pub fn delete_user(&mut self, user: &str) -> Result<bool> {
        let grouping = self.remove_filtered_grouping_policy(0, &[user])?;
        let sub = self.subject_index();
        let policy = self.remove_filtered_policy(sub, &[user])?;
        Ok(grouping || policy)
    }

    /// Remove `role` from every grouping and policy row
    pub fn delete_role(&mut self, role: &str) -> Result<bool> {
        let members = self.remove_filtered_grouping_policy(1, &[role])?;
        let sub = self.subject_index();
        let policy = self.remove_filtered_policy(sub, &[role])?;
        Ok(members || policy)
    }

    /// `p` rows whose subject is `user` (and whose `dom` column is `domain`, when given)
    pub fn get_permissions_for_user(&self, user: &str, domain: Option<&str>) -> Vec<Vec<String>> {
        let sub = self.subject_index();
        let dom = self.model.get_field_index("p", "dom");
        self.get_policy()
            .into_iter()
            .filter(|row| row.get(sub).is_some_and(|s| s == user))
            .filter(|row| match (domain, dom) {
                (Some(domain), Some(column)) => row.get(column).is_some_and(|d| d == domain),
                _ => true,
            })
            .collect()
    }

    /// Add the row `[user, permission...]`
    pub fn add_permission_for_user<I, S>(&mut self, user: &str, permission: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row: Vec<String> = std::iter::once(user.to_string())
            .chain(permission.into_iter().map(Into::into))
            .collect();
        self.add_policy(row)
    }

    pub fn delete_permission_for_user<I, S>(&mut self, user: &str, permission: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row: Vec<String> = std::iter::once(user.to_string())
            .chain(permission.into_iter().map(Into::into))
            .collect();
        self.remove_policy(row)
    }

    pub fn delete_permissions_for_user(&mut self, user: &str) -> Result<bool> {
        let sub = self.subject_index();
        self.remove_filtered_policy(sub, &[user])
    }

    /// Whether the row `[user, permission...]` exists
    pub fn has_permission_for_user<I, S>(&self, user: &str, permission: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row: Vec<String> = std::iter::once(user.to_string())
            .chain(permission.into_iter().map(Into::into))
            .collect();
        self.has_policy(row)
    }

    /// Every role `name` reaches, nearest first
    pub fn get_implicit_roles_for_user(&self, name: &str, domain: Option<&str>) -> Result<Vec<String>> {
        let rm = self.default_role_manager()?;
        walk(name, |n| rm.get_roles(n, domain.as_slice()))
    }

    /// Every user that reaches `role`, nearest first
    pub fn get_implicit_users_for_role(&self, role: &str, domain: Option<&str>) -> Result<Vec<String>> {
        let rm = self.default_role_manager()?;
        walk(role, |n| rm.get_users(n, domain.as_slice()))
    }

    /// Rows granted to `user` directly or through any reachable role
    pub fn get_implicit_permissions_for_user(
        &self,
        user: &str,
        domain: Option<&str>,
    ) -> Result<Vec<Vec<String>>> {
        let mut subjects = vec![user.to_string()];
        subjects.extend(self.get_implicit_roles_for_user(user, domain)?);
        Ok(subjects
            .iter()
            .flat_map(|subject| self.get_permissions_for_user(subject, domain))
            .collect())
    }

    pub fn get_roles_for_user_in_domain(&self, name: &str, domain: &str) -> Result<Vec<String>> {
        self.get_roles_for_user(name, Some(domain))
    }

    pub fn get_users_for_role_in_domain(&self, role: &str, domain: &str) -> Result<Vec<String>> {
        self.get_users_for_role(role, Some(domain))
    }

    /// Domains in which `name` has any role link
    pub fn get_domains_for_user(&self, name: &str) -> Result<Vec<String>> {
        self.default_role_manager()?.get_domains(name)
    }

    pub fn get_all_domains(&self) -> Result<Vec<String>> {
        self.default_role_manager()?.get_all_domains()
    }
}

/// Breadth-first closure of `next` from `start`, excluding `start`
fn walk<F>(start: &str, next: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Result<Vec<String>>,
{
    let mut seen = AHashSet::new();
    seen.insert(start.to_string());
    let mut queue = VecDeque::from([start.to_string()]);
    let mut found = Vec::new();

    while let Some(name) = queue.pop_front() {
        for neighbour in next(&name)? {
            if seen.insert(neighbour.clone()) {
                found.push(neighbour.clone());
                queue.push_back(neighbour);
            }
        }
    }
    Ok(found)
}

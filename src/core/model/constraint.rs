//! Role assignment constraints (`[constraint_definition]`)
//!
//! Constraints are checked against the direct `g` rows (user, role) after every change
//! to grouping rows.

use crate::core::error::{RampartError, Result};
use crate::core::matcher::cached_regex;
use std::collections::{BTreeMap, BTreeSet};

const SOD: &str = r#"^sod\s*\(\s*"([^"]+)"\s*,\s*"([^"]+)"\s*\)$"#;
const SOD_MAX: &str = r#"^sodMax\s*\(\s*\[([^\]]+)\]\s*,\s*(\d+)\s*\)$"#;
const ROLE_MAX: &str = r#"^roleMax\s*\(\s*"([^"]+)"\s*,\s*(\d+)\s*\)$"#;
const ROLE_PRE: &str = r#"^rolePre\s*\(\s*"([^"]+)"\s*,\s*"([^"]+)"\s*\)$"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintRule {
    /// No user may hold both roles
    SeparationOfDuty(String, String),
    /// No user may hold more than `max` of `roles`
    SeparationOfDutyMax { roles: Vec<String>, max: usize },
    /// At most `max` users may hold `role`
    RoleMax { role: String, max: usize },
    /// Holders of `role` must also hold `prerequisite`
    RolePrerequisite { role: String, prerequisite: String },
}

/// A named constraint (`c`, `c2`, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub key: String,
    pub rule: ConstraintRule,
}

fn parse_error(key: &str, message: impl std::fmt::Display) -> RampartError {
    RampartError::ConstraintParse(format!("{}: {}", key, message))
}

fn captures(pattern: &str, value: &str, key: &str) -> Result<Option<Vec<String>>> {
    let re = cached_regex(pattern).map_err(|e| parse_error(key, e))?;
    Ok(re.captures(value).map(|caps| {
        caps.iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect()
    }))
}

fn parse_count(key: &str, text: &str) -> Result<usize> {
    text.parse()
        .map_err(|_| parse_error(key, format!("invalid count '{}'", text)))
}

impl Constraint {
    /// Parse one constraint definition
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let value = value.trim();

        let rule = if let Some(caps) = captures(SOD, value, key)? {
            ConstraintRule::SeparationOfDuty(caps[0].clone(), caps[1].clone())
        } else if let Some(caps) = captures(SOD_MAX, value, key)? {
            let roles: Vec<String> = caps[0]
                .split(',')
                .map(|role| role.trim().trim_matches('"').to_string())
                .filter(|role| !role.is_empty())
                .collect();
            if roles.is_empty() {
                return Err(parse_error(key, "sodMax requires at least one role"));
            }
            ConstraintRule::SeparationOfDutyMax {
                roles,
                max: parse_count(key, &caps[1])?,
            }
        } else if let Some(caps) = captures(ROLE_MAX, value, key)? {
            ConstraintRule::RoleMax {
                role: caps[0].clone(),
                max: parse_count(key, &caps[1])?,
            }
        } else if let Some(caps) = captures(ROLE_PRE, value, key)? {
            ConstraintRule::RolePrerequisite {
                role: caps[0].clone(),
                prerequisite: caps[1].clone(),
            }
        } else {
            return Err(parse_error(key, format!("unrecognized constraint '{}'", value)));
        };

        Ok(Constraint {
            key: key.to_string(),
            rule,
        })
    }

    /// Check the constraint against grouping rows
    pub fn validate(&self, grouping: &[Vec<String>]) -> Result<()> {
        let violation = |message: String| RampartError::ConstraintViolation {
            name: self.key.clone(),
            message,
        };

        let mut user_roles: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for row in grouping.iter().filter(|row| row.len() >= 2) {
            user_roles
                .entry(row[0].as_str())
                .or_default()
                .insert(row[1].as_str());
        }

        match &self.rule {
            ConstraintRule::SeparationOfDuty(first, second) => {
                for (user, roles) in &user_roles {
                    if roles.contains(first.as_str()) && roles.contains(second.as_str()) {
                        return Err(violation(format!(
                            "user '{}' cannot have both roles '{}' and '{}'",
                            user, first, second
                        )));
                    }
                }
            }
            ConstraintRule::SeparationOfDutyMax { roles, max } => {
                for (user, held) in &user_roles {
                    let count = roles.iter().filter(|r| held.contains(r.as_str())).count();
                    if count > *max {
                        return Err(violation(format!(
                            "user '{}' has {} roles from {:?}, exceeds maximum of {}",
                            user, count, roles, max
                        )));
                    }
                }
            }
            ConstraintRule::RoleMax { role, max } => {
                let count = user_roles
                    .values()
                    .filter(|held| held.contains(role.as_str()))
                    .count();
                if count > *max {
                    return Err(violation(format!(
                        "role '{}' assigned to {} users, exceeds maximum of {}",
                        role, count, max
                    )));
                }
            }
            ConstraintRule::RolePrerequisite { role, prerequisite } => {
                for (user, held) in &user_roles {
                    if held.contains(role.as_str()) && !held.contains(prerequisite.as_str()) {
                        return Err(violation(format!(
                            "user '{}' has role '{}' but lacks prerequisite role '{}'",
                            user, role, prerequisite
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> Vec<Vec<String>> {
        pairs
            .iter()
            .map(|(u, r)| vec![u.to_string(), r.to_string()])
            .collect()
    }

    #[test]
    fn test_parse_constraints() {
        assert_eq!(
            Constraint::parse("c", r#"sod("finance_requester", "finance_approver")"#)
                .unwrap()
                .rule,
            ConstraintRule::SeparationOfDuty("finance_requester".into(), "finance_approver".into())
        );
        assert_eq!(
            Constraint::parse("c2", r#"sodMax(["payroll_view", "payroll_edit", "payroll_approve"], 1)"#)
                .unwrap()
                .rule,
            ConstraintRule::SeparationOfDutyMax {
                roles: vec![
                    "payroll_view".into(),
                    "payroll_edit".into(),
                    "payroll_approve".into()
                ],
                max: 1
            }
        );
        assert_eq!(
            Constraint::parse("c3", r#"roleMax("superadmin", 2)"#).unwrap().rule,
            ConstraintRule::RoleMax {
                role: "superadmin".into(),
                max: 2
            }
        );
        assert_eq!(
            Constraint::parse("c4", r#"rolePre("db_admin", "security_trained")"#)
                .unwrap()
                .rule,
            ConstraintRule::RolePrerequisite {
                role: "db_admin".into(),
                prerequisite: "security_trained".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!(
            Constraint::parse("c", "limit(admin)"),
            Err(RampartError::ConstraintParse(_))
        ));
        assert!(Constraint::parse("c", r#"roleMax("admin", -1)"#).is_err());
        assert!(Constraint::parse("c", r#"sodMax([""], 1)"#).is_err());
    }

    #[test]
    fn test_sod() {
        let c = Constraint::parse("c", r#"sod("a", "b")"#).unwrap();
        assert!(c.validate(&rows(&[("alice", "a"), ("bob", "b")])).is_ok());
        let err = c
            .validate(&rows(&[("alice", "a"), ("alice", "b")]))
            .unwrap_err();
        assert!(matches!(err, RampartError::ConstraintViolation { ref name, .. } if name == "c"));
    }

    #[test]
    fn test_sod_max_and_role_max() {
        let c = Constraint::parse("c", r#"sodMax(["a", "b", "c"], 2)"#).unwrap();
        assert!(c.validate(&rows(&[("u", "a"), ("u", "b")])).is_ok());
        assert!(c.validate(&rows(&[("u", "a"), ("u", "b"), ("u", "c")])).is_err());

        let c = Constraint::parse("c", r#"roleMax("admin", 1)"#).unwrap();
        assert!(c.validate(&rows(&[("alice", "admin")])).is_ok());
        assert!(c
            .validate(&rows(&[("alice", "admin"), ("bob", "admin")]))
            .is_err());
    }

    #[test]
    fn test_role_pre() {
        let c = Constraint::parse("c", r#"rolePre("db_admin", "trained")"#).unwrap();
        assert!(c
            .validate(&rows(&[("alice", "trained"), ("alice", "db_admin")]))
            .is_ok());
        assert!(c.validate(&rows(&[("bob", "db_admin")])).is_err());
    }
}

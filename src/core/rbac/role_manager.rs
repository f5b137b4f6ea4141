//! Default role manager: per-domain adjacency maps with optional pattern matching

use super::{LinkConditionFn, MatchingFn, RoleManager, DEFAULT_MAX_HIERARCHY_LEVEL};
use crate::core::error::{RampartError, Result};
use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use std::fmt;
use tracing::{debug, info, trace};

/// Links of a single domain
#[derive(Default)]
struct RoleGraph {
    /// member -> direct roles
    roles: AHashMap<String, AHashSet<String>>,
    /// role -> direct members
    users: AHashMap<String, AHashSet<String>>,
    /// (member, role) -> link condition parameters
    params: AHashMap<(String, String), Vec<String>>,
}

impl RoleGraph {
    fn add(&mut self, user: &str, role: &str) {
        self.roles
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string());
        self.users
            .entry(role.to_string())
            .or_default()
            .insert(user.to_string());
    }

    fn remove(&mut self, user: &str, role: &str) {
        if let Some(roles) = self.roles.get_mut(user) {
            roles.remove(role);
            if roles.is_empty() {
                self.roles.remove(user);
            }
        }
        if let Some(users) = self.users.get_mut(role) {
            users.remove(user);
            if users.is_empty() {
                self.users.remove(role);
            }
        }
        self.params.remove(&(user.to_string(), role.to_string()));
    }

    fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name) || self.users.contains_key(name)
    }

    fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

struct Inner {
    domains: AHashMap<String, RoleGraph>,
    /// (domain, member, role) -> predicate; survives `clear()`
    conditions: AHashMap<(String, String, String), LinkConditionFn>,
    matching_fn: Option<(String, MatchingFn)>,
    domain_matching_fn: Option<(String, MatchingFn)>,
}

impl Inner {
    fn matches(&self, name: &str, pattern: &str) -> bool {
        self.matching_fn
            .as_ref()
            .is_some_and(|(_, f)| f(name, pattern))
    }

    /// Graphs taking part in a query for `domain`
    fn graphs<'a>(&'a self, domain: &str) -> Vec<(&'a str, &'a RoleGraph)> {
        match &self.domain_matching_fn {
            None => self
                .domains
                .get_key_value(domain)
                .map(|(k, g)| (k.as_str(), g))
                .into_iter()
                .collect(),
            Some((_, f)) => self
                .domains
                .iter()
                .filter(|(k, _)| k.as_str() == domain || f(domain, k))
                .map(|(k, g)| (k.as_str(), g))
                .collect(),
        }
    }

    fn link_allowed(&self, domain: &str, user: &str, role: &str, graph: &RoleGraph) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let key = (domain.to_string(), user.to_string(), role.to_string());
        let Some(condition) = self.conditions.get(&key) else {
            return true;
        };
        let params = graph
            .params
            .get(&(key.1, key.2))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        match condition(params) {
            Ok(allowed) => allowed,
            Err(err) => {
                debug!("Link condition {} -> {} failed: {}", user, role, err);
                false
            }
        }
    }

    /// One hop from `name`: exact edges plus edges of patterns matching `name`
    fn direct_roles(&self, name: &str, graphs: &[(&str, &RoleGraph)], out: &mut Vec<String>) {
        for (domain, graph) in graphs {
            if let Some(roles) = graph.roles.get(name) {
                for role in roles {
                    if self.link_allowed(domain, name, role, graph) {
                        out.push(role.clone());
                    }
                }
            }
            if self.matching_fn.is_none() {
                continue;
            }
            for (pattern, roles) in &graph.roles {
                if pattern != name && self.matches(name, pattern) {
                    for role in roles {
                        if self.link_allowed(domain, pattern, role, graph) {
                            out.push(role.clone());
                        }
                    }
                }
            }
        }
    }

    /// Known names matched by the patterns in `reached`
    fn expand_matched(&self, graphs: &[(&str, &RoleGraph)], reached: &mut Vec<String>) {
        let patterns = reached.len();
        for i in 0..patterns {
            for (_, graph) in graphs {
                for known in graph.roles.keys().chain(graph.users.keys()) {
                    if known != &reached[i] && self.matches(known, &reached[i]) {
                        reached.push(known.clone());
                    }
                }
            }
        }
    }
}

/// Role manager with domains, pattern matching and conditional links
///
/// # Examples
///
/// ```
/// use rampart::{DefaultRoleManager, RoleManager};
///
/// let rm = DefaultRoleManager::new(10);
/// rm.add_link("alice", "admin", &[]).unwrap();
/// rm.add_link("admin", "root", &[]).unwrap();
/// assert!(rm.has_link("alice", "root", &[]).unwrap());
/// assert!(!rm.has_link("root", "alice", &[]).unwrap());
/// ```
pub struct DefaultRoleManager {
    max_hierarchy_level: usize,
    inner: RwLock<Inner>,
}

impl DefaultRoleManager {
    /// Create a role manager that follows at most `max_hierarchy_level` links
    pub fn new(max_hierarchy_level: usize) -> Self {
        DefaultRoleManager {
            max_hierarchy_level,
            inner: RwLock::new(Inner {
                domains: AHashMap::new(),
                conditions: AHashMap::new(),
                matching_fn: None,
                domain_matching_fn: None,
            }),
        }
    }

    /// Maximum traversal depth
    pub fn max_hierarchy_level(&self) -> usize {
        self.max_hierarchy_level
    }
}

impl Default for DefaultRoleManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HIERARCHY_LEVEL)
    }
}

impl fmt::Debug for DefaultRoleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DefaultRoleManager")
            .field("max_hierarchy_level", &self.max_hierarchy_level)
            .field("domains", &inner.domains.len())
            .field(
                "matching_fn",
                &inner.matching_fn.as_ref().map(|(name, _)| name),
            )
            .field(
                "domain_matching_fn",
                &inner.domain_matching_fn.as_ref().map(|(name, _)| name),
            )
            .finish()
    }
}

fn domain_key<'a>(domain: &[&'a str]) -> Result<&'a str> {
    match domain {
        [] => Ok(""),
        [d] => Ok(*d),
        _ => Err(RampartError::DomainParameter(domain.len())),
    }
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names.dedup();
    names
}

impl RoleManager for DefaultRoleManager {
    fn clear(&self) {
        self.inner.write().domains.clear();
    }

    fn add_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<()> {
        let domain = domain_key(domain)?;
        self.inner
            .write()
            .domains
            .entry(domain.to_string())
            .or_default()
            .add(name1, name2);
        trace!("Added link {} -> {} (domain '{}')", name1, name2, domain);
        Ok(())
    }

    fn delete_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<()> {
        let domain = domain_key(domain)?;
        let mut inner = self.inner.write();
        if let Some(graph) = inner.domains.get_mut(domain) {
            graph.remove(name1, name2);
            if graph.is_empty() {
                inner.domains.remove(domain);
            }
        }
        trace!("Deleted link {} -> {} (domain '{}')", name1, name2, domain);
        Ok(())
    }

    fn has_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<bool> {
        let domain = domain_key(domain)?;
        let inner = self.inner.read();

        if name1 == name2 || inner.matches(name1, name2) {
            return Ok(true);
        }

        let graphs = inner.graphs(domain);
        if graphs.is_empty() {
            return Ok(false);
        }

        let mut visited = AHashSet::new();
        visited.insert(name1.to_string());
        let mut frontier = vec![name1.to_string()];

        for _ in 0..self.max_hierarchy_level {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for node in &frontier {
                let mut reached = Vec::new();
                inner.direct_roles(node, &graphs, &mut reached);
                if inner.matching_fn.is_some() {
                    inner.expand_matched(&graphs, &mut reached);
                }
                for role in reached {
                    if role == name2 || inner.matches(&role, name2) || inner.matches(name2, &role)
                    {
                        trace!("{} reaches {} via {}", name1, name2, node);
                        return Ok(true);
                    }
                    if visited.insert(role.clone()) {
                        next.push(role);
                    }
                }
            }
            frontier = next;
        }

        Ok(false)
    }

    fn get_roles(&self, name: &str, domain: &[&str]) -> Result<Vec<String>> {
        let domain = domain_key(domain)?;
        let inner = self.inner.read();
        let graphs = inner.graphs(domain);
        let mut roles = Vec::new();
        inner.direct_roles(name, &graphs, &mut roles);
        Ok(sorted(roles))
    }

    fn get_users(&self, name: &str, domain: &[&str]) -> Result<Vec<String>> {
        let domain = domain_key(domain)?;
        let inner = self.inner.read();
        let mut users = Vec::new();
        for (dom, graph) in inner.graphs(domain) {
            for (role, members) in &graph.users {
                if role != name && !inner.matches(name, role) {
                    continue;
                }
                for user in members {
                    if inner.link_allowed(dom, user, role, graph) {
                        users.push(user.clone());
                    }
                }
            }
        }
        Ok(sorted(users))
    }

    fn get_domains(&self, name: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let domains = inner
            .domains
            .iter()
            .filter(|(domain, graph)| !domain.is_empty() && graph.contains(name))
            .map(|(domain, _)| domain.clone())
            .collect();
        Ok(sorted(domains))
    }

    fn get_all_domains(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let domains = inner
            .domains
            .keys()
            .filter(|domain| !domain.is_empty())
            .cloned()
            .collect();
        Ok(sorted(domains))
    }

    fn delete_domain(&self, domain: &str) -> Result<()> {
        self.inner.write().domains.remove(domain);
        debug!("Deleted domain '{}'", domain);
        Ok(())
    }

    fn add_matching_fn(&self, name: &str, f: MatchingFn) {
        let mut inner = self.inner.write();
        if let Some((previous, _)) = &inner.matching_fn {
            debug!("Matching function '{}' replaced by '{}'", previous, name);
        }
        inner.matching_fn = Some((name.to_string(), f));
    }

    fn clear_matching_fn(&self) {
        self.inner.write().matching_fn = None;
    }

    fn add_domain_matching_fn(&self, name: &str, f: MatchingFn) {
        let mut inner = self.inner.write();
        if let Some((previous, _)) = &inner.domain_matching_fn {
            debug!("Domain matching function '{}' replaced by '{}'", previous, name);
        }
        inner.domain_matching_fn = Some((name.to_string(), f));
    }

    fn clear_domain_matching_fn(&self) {
        self.inner.write().domain_matching_fn = None;
    }

    fn add_link_condition_fn(&self, user: &str, role: &str, f: LinkConditionFn) {
        self.add_domain_link_condition_fn(user, role, "", f);
    }

    fn add_domain_link_condition_fn(&self, user: &str, role: &str, domain: &str, f: LinkConditionFn) {
        self.inner.write().conditions.insert(
            (domain.to_string(), user.to_string(), role.to_string()),
            f,
        );
    }

    fn set_link_condition_params(
        &self,
        user: &str,
        role: &str,
        domain: &[&str],
        params: &[String],
    ) -> Result<()> {
        let domain = domain_key(domain)?;
        self.inner
            .write()
            .domains
            .entry(domain.to_string())
            .or_default()
            .params
            .insert((user.to_string(), role.to_string()), params.to_vec());
        Ok(())
    }

    fn print_roles(&self) {
        let inner = self.inner.read();
        let mut domains: Vec<_> = inner.domains.iter().collect();
        domains.sort_by(|a, b| a.0.cmp(b.0));
        for (domain, graph) in domains {
            let mut members: Vec<_> = graph.roles.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            for (user, roles) in members {
                let mut roles: Vec<_> = roles.iter().map(String::as_str).collect();
                roles.sort_unstable();
                if domain.is_empty() {
                    info!("{} < {}", user, roles.join(", "));
                } else {
                    info!("[{}] {} < {}", domain, user, roles.join(", "));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::matcher::builtins::{key_match, key_match2};
    use std::sync::Arc;

    fn has(rm: &DefaultRoleManager, a: &str, b: &str) -> bool {
        rm.has_link(a, b, &[]).unwrap()
    }

    #[test]
    fn test_basic_hierarchy() {
        let rm = DefaultRoleManager::default();
        rm.add_link("u1", "g1", &[]).unwrap();
        rm.add_link("u2", "g1", &[]).unwrap();
        rm.add_link("u3", "g2", &[]).unwrap();
        rm.add_link("u4", "g2", &[]).unwrap();
        rm.add_link("u4", "g3", &[]).unwrap();
        rm.add_link("g1", "g3", &[]).unwrap();

        assert!(has(&rm, "u1", "g1"));
        assert!(!has(&rm, "u1", "g2"));
        assert!(has(&rm, "u1", "g3"));
        assert!(has(&rm, "u4", "g2"));
        assert!(has(&rm, "u4", "g3"));
        assert!(!has(&rm, "u4", "g1"));

        assert_eq!(rm.get_roles("u4", &[]).unwrap(), vec!["g2", "g3"]);
        assert_eq!(rm.get_users("g1", &[]).unwrap(), vec!["u1", "u2"]);
        assert_eq!(rm.get_users("g3", &[]).unwrap(), vec!["g1", "u4"]);
    }

    #[test]
    fn test_unknown_principal_is_false() {
        let rm = DefaultRoleManager::default();
        assert!(!has(&rm, "nobody", "admin"));
        assert!(has(&rm, "nobody", "nobody"));
        assert!(rm.get_roles("nobody", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_delete_link() {
        let rm = DefaultRoleManager::default();
        rm.add_link("u1", "g1", &[]).unwrap();
        rm.add_link("g1", "g2", &[]).unwrap();
        assert!(has(&rm, "u1", "g2"));

        rm.delete_link("g1", "g2", &[]).unwrap();
        assert!(!has(&rm, "u1", "g2"));
        assert!(has(&rm, "u1", "g1"));

        // Deleting a missing link is a no-op
        rm.delete_link("g1", "g2", &[]).unwrap();
    }

    #[test]
    fn test_cycle_terminates() {
        let rm = DefaultRoleManager::default();
        rm.add_link("a", "b", &[]).unwrap();
        rm.add_link("b", "c", &[]).unwrap();
        rm.add_link("c", "a", &[]).unwrap();
        assert!(has(&rm, "a", "c"));
        assert!(!has(&rm, "a", "d"));
    }

    #[test]
    fn test_max_hierarchy_level() {
        let rm = DefaultRoleManager::new(2);
        rm.add_link("a", "b", &[]).unwrap();
        rm.add_link("b", "c", &[]).unwrap();
        rm.add_link("c", "d", &[]).unwrap();
        assert!(has(&rm, "a", "c"));
        assert!(!has(&rm, "a", "d"));
    }

    #[test]
    fn test_domains_are_isolated() {
        let rm = DefaultRoleManager::default();
        rm.add_link("alice", "admin", &["domain1"]).unwrap();
        rm.add_link("bob", "admin", &["domain2"]).unwrap();

        assert!(rm.has_link("alice", "admin", &["domain1"]).unwrap());
        assert!(!rm.has_link("alice", "admin", &["domain2"]).unwrap());
        assert!(!rm.has_link("alice", "admin", &[]).unwrap());
        assert_eq!(rm.get_domains("alice").unwrap(), vec!["domain1"]);
        assert_eq!(rm.get_all_domains().unwrap(), vec!["domain1", "domain2"]);

        rm.delete_domain("domain1").unwrap();
        assert!(!rm.has_link("alice", "admin", &["domain1"]).unwrap());
        assert_eq!(rm.get_all_domains().unwrap(), vec!["domain2"]);
    }

    #[test]
    fn test_domain_parameter_count() {
        let rm = DefaultRoleManager::default();
        assert!(matches!(
            rm.add_link("a", "b", &["d1", "d2"]),
            Err(RampartError::DomainParameter(2))
        ));
        assert!(matches!(
            rm.has_link("a", "b", &["d1", "d2"]),
            Err(RampartError::DomainParameter(2))
        ));
    }

    #[test]
    fn test_pattern_matching_fn() {
        let rm = DefaultRoleManager::default();
        assert!(!has(&rm, "/book/1", "/book/:id"));

        rm.add_matching_fn("keyMatch2", Arc::new(key_match2));
        assert!(has(&rm, "/book/1", "/book/:id"));

        rm.clear_matching_fn();
        assert!(!has(&rm, "/book/1", "/book/:id"));
    }

    #[test]
    fn test_pattern_edges_expand_frontier() {
        let rm = DefaultRoleManager::default();
        rm.add_matching_fn("keyMatch2", Arc::new(key_match2));
        rm.add_link("/book/:id", "book_group", &[]).unwrap();
        rm.add_link("book_group", "library", &[]).unwrap();
        rm.add_link("alice", "/pen/:id", &[]).unwrap();

        assert!(has(&rm, "/book/1", "book_group"));
        assert!(has(&rm, "/book/1", "library"));
        assert!(!has(&rm, "/pen/1", "book_group"));
        assert!(has(&rm, "alice", "/pen/3"));
        assert_eq!(rm.get_roles("/book/2", &[]).unwrap(), vec!["book_group"]);
    }

    #[test]
    fn test_last_matching_fn_wins() {
        let rm = DefaultRoleManager::default();
        rm.add_matching_fn("keyMatch2", Arc::new(key_match2));
        rm.add_matching_fn("keyMatch", Arc::new(key_match));
        assert!(!has(&rm, "/book/1", "/book/:id"));
        assert!(has(&rm, "/book/1", "/book/*"));
    }

    #[test]
    fn test_domain_matching_fn() {
        let rm = DefaultRoleManager::default();
        rm.add_domain_matching_fn("keyMatch", Arc::new(key_match));
        rm.add_link("alice", "admin", &["*"]).unwrap();
        rm.add_link("bob", "admin", &["domain1"]).unwrap();

        assert!(rm.has_link("alice", "admin", &["domain1"]).unwrap());
        assert!(rm.has_link("alice", "admin", &["domain2"]).unwrap());
        assert!(rm.has_link("bob", "admin", &["domain1"]).unwrap());
        assert!(!rm.has_link("bob", "admin", &["domain2"]).unwrap());
        assert_eq!(
            rm.get_users("admin", &["domain1"]).unwrap(),
            vec!["alice", "bob"]
        );
    }

    #[test]
    fn test_link_conditions() {
        let rm = DefaultRoleManager::default();
        rm.add_link("alice", "data_reader", &[]).unwrap();
        rm.add_link("bob", "data_reader", &[]).unwrap();
        rm.set_link_condition_params("alice", "data_reader", &[], &["open".to_string()])
            .unwrap();
        rm.set_link_condition_params("bob", "data_reader", &[], &["closed".to_string()])
            .unwrap();

        let gate: LinkConditionFn = Arc::new(|params: &[String]| -> Result<bool> {
            Ok(params.first().map(String::as_str) == Some("open"))
        });
        rm.add_link_condition_fn("alice", "data_reader", gate.clone());
        rm.add_link_condition_fn("bob", "data_reader", gate);

        assert!(has(&rm, "alice", "data_reader"));
        assert!(!has(&rm, "bob", "data_reader"));
        assert_eq!(rm.get_users("data_reader", &[]).unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_failing_condition_blocks_link() {
        let rm = DefaultRoleManager::default();
        rm.add_link("alice", "admin", &["d1"]).unwrap();
        rm.add_domain_link_condition_fn(
            "alice",
            "admin",
            "d1",
            Arc::new(|_: &[String]| -> Result<bool> {
                Err(RampartError::MatcherRuntime("boom".into()))
            }),
        );
        assert!(!rm.has_link("alice", "admin", &["d1"]).unwrap());
    }

    #[test]
    fn test_clear_keeps_functions() {
        let rm = DefaultRoleManager::default();
        rm.add_matching_fn("keyMatch2", Arc::new(key_match2));
        rm.add_link("u", "g", &[]).unwrap();
        rm.clear();
        assert!(!has(&rm, "u", "g"));
        assert!(has(&rm, "/a/1", "/a/:x"));
    }
}

//! Role hierarchy management
//!
//! A [`RoleManager`] answers "does `a` inherit `b` (within a domain)?" for one role
//! definition (`g`, `g2`, ...). [`DefaultRoleManager`] keeps an exact-name adjacency map
//! per domain and falls back to a pattern scan only when a matching function is set.

mod role_manager;

pub use role_manager::DefaultRoleManager;

use crate::core::error::Result;
use std::sync::Arc;

/// Default traversal depth for [`DefaultRoleManager`]
pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

/// Name equivalence function: `(name, pattern) -> matches`
pub type MatchingFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Predicate guarding a conditional role link, called with the link's stored parameters
pub type LinkConditionFn = Arc<dyn Fn(&[String]) -> Result<bool> + Send + Sync>;

/// Role graph for a single role definition
///
/// All methods take `&self`; implementations synchronize internally so that a shared
/// `Arc<dyn RoleManager>` can be queried from many enforce calls at once.
pub trait RoleManager: Send + Sync {
    /// Remove every link and domain (registered functions are kept)
    fn clear(&self);

    /// Add `name1 -> name2`, optionally within one domain
    fn add_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<()>;

    /// Remove `name1 -> name2`; a missing link is not an error
    fn delete_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<()>;

    /// Whether `name1` reaches `name2`
    fn has_link(&self, name1: &str, name2: &str, domain: &[&str]) -> Result<bool>;

    /// Direct roles of `name`
    fn get_roles(&self, name: &str, domain: &[&str]) -> Result<Vec<String>>;

    /// Direct members of role `name`
    fn get_users(&self, name: &str, domain: &[&str]) -> Result<Vec<String>>;

    /// Domains in which `name` has any link
    fn get_domains(&self, name: &str) -> Result<Vec<String>>;

    /// Every domain that holds links
    fn get_all_domains(&self) -> Result<Vec<String>>;

    /// Drop all links of one domain
    fn delete_domain(&self, domain: &str) -> Result<()>;

    /// Install the node matching function; replaces any previous one
    fn add_matching_fn(&self, name: &str, f: MatchingFn);

    /// Return to exact-name matching
    fn clear_matching_fn(&self);

    /// Install the domain matching function; replaces any previous one
    fn add_domain_matching_fn(&self, name: &str, f: MatchingFn);

    /// Return to exact domain matching
    fn clear_domain_matching_fn(&self);

    /// Guard the link `user -> role` with a predicate
    fn add_link_condition_fn(&self, user: &str, role: &str, f: LinkConditionFn);

    /// Guard the link `user -> role` inside `domain` with a predicate
    fn add_domain_link_condition_fn(&self, user: &str, role: &str, domain: &str, f: LinkConditionFn);

    /// Store the parameters handed to the link's predicate
    fn set_link_condition_params(
        &self,
        user: &str,
        role: &str,
        domain: &[&str],
        params: &[String],
    ) -> Result<()>;

    /// Dump the graph through `tracing`
    fn print_roles(&self);
}

//! Access control models
//!
//! A [`Model`] is built from INI-style text:
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
//! ```
//!
//! Each definition becomes an [`Assertion`], addressed by section (`r`, `p`, `g`, `e`,
//! `m`, `c`) and ptype (`p`, `p2`, `g2`, ...).

mod assertion;
mod constraint;
mod policy;

pub use assertion::{Assertion, PolicyOp};
pub use constraint::{Constraint, ConstraintRule};

use crate::core::config::ModelConfig;
use crate::core::effect::EffectKind;
use crate::core::error::{RampartError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Section short names and their headers, in load order
const SECTIONS: [(&str, &str); 6] = [
    ("r", "request_definition"),
    ("p", "policy_definition"),
    ("g", "role_definition"),
    ("e", "policy_effect"),
    ("m", "matchers"),
    ("c", "constraint_definition"),
];

const REQUIRED_SECTIONS: [&str; 4] = ["r", "p", "e", "m"];

/// Parsed model: section -> ptype -> assertion
#[derive(Debug, Clone, Default)]
pub struct Model {
    sections: BTreeMap<String, BTreeMap<String, Assertion>>,
}

impl Model {
    /// An empty model, to be filled with [`Model::add_def`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate model text
    pub fn from_text(text: &str) -> Result<Self> {
        let config = ModelConfig::parse(text)?;
        let mut model = Model::new();
        for (sec, header) in SECTIONS {
            for (key, value) in config.keys(header) {
                model.add_def(sec, key, value)?;
            }
        }
        model.validate()?;
        info!(
            "Loaded model with {} assertions",
            model.sections.values().map(BTreeMap::len).sum::<usize>()
        );
        Ok(model)
    }

    /// Read, parse and validate a model file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_text(&text)
    }

    /// Add one definition; an empty value is ignored and returns false
    pub fn add_def(&mut self, sec: &str, key: &str, value: &str) -> Result<bool> {
        if value.trim().is_empty() {
            return Ok(false);
        }
        let assertion = Assertion::new(sec, key, value)?;
        self.sections
            .entry(sec.to_string())
            .or_default()
            .insert(key.to_string(), assertion);
        Ok(true)
    }

    /// Check required sections and cross-section rules
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_SECTIONS
            .iter()
            .filter(|sec| !self.has_section(sec))
            .map(|sec| section_header(sec))
            .collect();
        if !missing.is_empty() {
            return Err(RampartError::MissingSections(missing.join(", ")));
        }
        if self.has_section("c") && !self.has_section("g") {
            return Err(RampartError::ConstraintRequiresRoles);
        }
        Ok(())
    }

    pub fn has_section(&self, sec: &str) -> bool {
        self.sections.get(sec).is_some_and(|s| !s.is_empty())
    }

    pub fn get(&self, sec: &str, ptype: &str) -> Option<&Assertion> {
        self.sections.get(sec).and_then(|s| s.get(ptype))
    }

    pub fn get_mut(&mut self, sec: &str, ptype: &str) -> Option<&mut Assertion> {
        self.sections.get_mut(sec).and_then(|s| s.get_mut(ptype))
    }

    /// Like [`Model::get`], failing with `UnknownPolicyType`
    pub fn assertion(&self, sec: &str, ptype: &str) -> Result<&Assertion> {
        self.get(sec, ptype).ok_or_else(|| unknown(sec, ptype))
    }

    pub fn assertion_mut(&mut self, sec: &str, ptype: &str) -> Result<&mut Assertion> {
        self.get_mut(sec, ptype).ok_or_else(|| unknown(sec, ptype))
    }

    /// Assertions of one section, ordered by ptype
    pub fn section(&self, sec: &str) -> impl Iterator<Item = (&str, &Assertion)> {
        self.sections
            .get(sec)
            .into_iter()
            .flat_map(|s| s.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub(crate) fn section_mut(&mut self, sec: &str) -> impl Iterator<Item = &mut Assertion> {
        self.sections.get_mut(sec).into_iter().flat_map(|s| s.values_mut())
    }

    /// Whether the default effect uses subject priority ordering
    pub fn uses_subject_priority(&self) -> bool {
        self.section("e")
            .any(|(_, e)| e.effect() == Some(&EffectKind::SubjectPriority))
    }

    /// Log every definition
    pub fn print_model(&self) {
        for (sec, assertions) in &self.sections {
            for (ptype, assertion) in assertions {
                info!("{}.{} = {}", sec, ptype, assertion.value());
            }
        }
    }

    /// Re-serialize to model text
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (sec, header) in SECTIONS {
            if !self.has_section(sec) {
                continue;
            }
            out.push_str(&format!("[{}]\n", header));
            for (ptype, assertion) in self.section(sec) {
                out.push_str(&format!("{} = {}\n", ptype, assertion.value()));
            }
            out.push('\n');
        }
        out
    }
}

impl FromStr for Model {
    type Err = RampartError;

    fn from_str(s: &str) -> Result<Self> {
        Model::from_text(s)
    }
}

fn section_header(sec: &str) -> &'static str {
    SECTIONS
        .iter()
        .find(|(short, _)| *short == sec)
        .map_or("unknown", |(_, header)| header)
}

fn unknown(sec: &str, ptype: &str) -> RampartError {
    RampartError::UnknownPolicyType {
        sec: sec.to_string(),
        ptype: ptype.to_string(),
    }
}

//! Row loading contract
//!
//! An [`Adapter`] fills a model with policy and grouping rows. Storage formats live
//! outside this crate; [`StringAdapter`] reads the line format used in tests and docs:
//!
//! ```text
//! p, alice, data1, read
//! g, alice, admin
//! ```

use crate::core::error::{RampartError, Result};
use crate::core::model::Model;
use tracing::debug;

/// Source of policy rows
pub trait Adapter: Send + Sync {
    /// Add every stored row to `model`
    fn load_policy(&self, model: &mut Model) -> Result<()>;
}

/// Section of a ptype: `p`, `p2` -> `p`; `g`, `g2` -> `g`
pub fn section_of(ptype: &str) -> Result<&'static str> {
    match ptype.chars().next() {
        Some('p') => Ok("p"),
        Some('g') => Ok("g"),
        _ => Err(RampartError::UnknownPolicyType {
            sec: String::new(),
            ptype: ptype.to_string(),
        }),
    }
}

/// Split one line into trimmed fields; double quotes protect commas and `""` is a literal quote
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// Add the row described by one line; blank lines and `#` comments are skipped
pub fn load_policy_line(line: &str, model: &mut Model) -> Result<()> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(());
    }
    let mut fields = split_fields(line);
    let ptype = fields.remove(0);
    let sec = section_of(&ptype)?;
    model.add_policy(sec, &ptype, fields)?;
    Ok(())
}

/// Rows held in memory as text
#[derive(Debug, Clone, Default)]
pub struct StringAdapter {
    text: String,
}

impl StringAdapter {
    pub fn new<S: Into<String>>(text: S) -> Self {
        StringAdapter { text: text.into() }
    }
}

impl Adapter for StringAdapter {
    fn load_policy(&self, model: &mut Model) -> Result<()> {
        let mut count = 0;
        for line in self.text.lines() {
            load_policy_line(line, model)?;
            count += 1;
        }
        debug!("Loaded {} policy lines", count);
        Ok(())
    }
}

//! INI-style model text reader
//!
//! Reads the `[section]` / `key = value` layout used by model definitions:
//!
//! - `#` and `;` start full-line comments
//! - a trailing `\` continues the value on the next line
//! - a value opening with `{` runs until the matching `}` (block matchers)

use crate::core::error::{RampartError, Result};
use std::collections::BTreeMap;

/// Parsed model text: section name -> key -> raw value
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ModelConfig {
    /// Parse model text
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = ModelConfig::default();
        let mut section: Option<String> = None;
        let mut lines = text.lines().enumerate();

        while let Some((lineno, raw)) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                if !line.ends_with(']') {
                    return Err(RampartError::ModelParse(format!(
                        "line {}: unterminated section header '{}'",
                        lineno + 1,
                        line
                    )));
                }
                section = Some(line[1..line.len() - 1].trim().to_string());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(RampartError::ModelParse(format!(
                    "line {}: expected 'key = value', got '{}'",
                    lineno + 1,
                    line
                )));
            };
            let Some(current) = section.as_ref() else {
                return Err(RampartError::ModelParse(format!(
                    "line {}: key '{}' outside of any section",
                    lineno + 1,
                    key.trim()
                )));
            };

            let mut value = value.trim().to_string();

            if value.starts_with('{') {
                let mut depth = brace_depth(&value);
                while depth > 0 {
                    let Some((_, next)) = lines.next() else {
                        return Err(RampartError::ModelParse(format!(
                            "line {}: unterminated block for '{}'",
                            lineno + 1,
                            key.trim()
                        )));
                    };
                    depth += brace_depth(next);
                    value.push('\n');
                    value.push_str(next.trim());
                }
            } else {
                while let Some(stripped) = value.strip_suffix('\\') {
                    let mut joined = stripped.trim_end().to_string();
                    if let Some((_, next)) = lines.next() {
                        let next = next.trim();
                        if !next.is_empty() && !joined.is_empty() {
                            joined.push(' ');
                        }
                        joined.push_str(next);
                    }
                    value = joined;
                }
            }

            config
                .sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value);
        }

        Ok(config)
    }

    /// Get a raw value
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|keys| keys.get(key))
            .map(String::as_str)
    }

    /// Iterate over the keys of a section, in sorted order
    pub fn keys(&self, section: &str) -> impl Iterator<Item = (&str, &str)> {
        self.sections
            .get(section)
            .into_iter()
            .flat_map(|keys| keys.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Names of all sections present
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}

fn brace_depth(line: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => depth -= 1,
            _ => {}
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_sections() {
        let text = r#"
# comment
[request_definition]
r = sub, obj, act

; another comment
[matchers]
m = r.sub == p.sub
"#;
        let config = ModelConfig::parse(text).unwrap();
        assert_eq!(config.get("request_definition", "r"), Some("sub, obj, act"));
        assert_eq!(config.get("matchers", "m"), Some("r.sub == p.sub"));
        assert_eq!(config.get("matchers", "m2"), None);
    }

    #[test]
    fn test_line_continuation() {
        let text = "[matchers]\nm = r.sub==p.sub \\\n  && r.obj==p.obj\n";
        let config = ModelConfig::parse(text).unwrap();
        assert_eq!(
            config.get("matchers", "m"),
            Some("r.sub==p.sub && r.obj==p.obj")
        );
    }

    #[test]
    fn test_multiple_continuations() {
        let text = "[matchers]\nm = r.sub==p.sub \\\n && \\\n r.obj==p.obj\n";
        let config = ModelConfig::parse(text).unwrap();
        assert_eq!(
            config.get("matchers", "m"),
            Some("r.sub==p.sub && r.obj==p.obj")
        );
    }

    #[test]
    fn test_block_value() {
        let text = r#"[matchers]
m = {
    let role_match = g(r.sub, p.sub)
    if r.sub == "root" {
        return true
    }
    return role_match && r.obj == p.obj
}

[policy_effect]
e = some(where (p.eft == allow))
"#;
        let config = ModelConfig::parse(text).unwrap();
        let block = config.get("matchers", "m").unwrap();
        assert!(block.starts_with('{'));
        assert!(block.ends_with('}'));
        assert!(block.contains("let role_match = g(r.sub, p.sub)"));
        assert_eq!(
            config.get("policy_effect", "e"),
            Some("some(where (p.eft == allow))")
        );
    }

    #[test]
    fn test_unterminated_block() {
        let text = "[matchers]\nm = {\n return true\n";
        assert!(matches!(
            ModelConfig::parse(text),
            Err(RampartError::ModelParse(_))
        ));
    }

    #[test]
    fn test_key_outside_section() {
        assert!(ModelConfig::parse("r = sub").is_err());
        assert!(ModelConfig::parse("[broken\nr = sub").is_err());
        assert!(ModelConfig::parse("[r]\nnot a pair").is_err());
    }
}

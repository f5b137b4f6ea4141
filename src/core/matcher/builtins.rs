//! Built-in matcher operators
//!
//! Path-style key matching, regex, glob and IP matching. The `key_match*` family has the
//! `(name, pattern) -> bool` shape expected by [`MatchingFn`](crate::MatchingFn), so any of
//! them can be handed to a role manager as its node or domain matching function.

use super::cache::cached_regex;
use crate::core::error::{RampartError, Result};
use glob::{MatchOptions, Pattern};
use ipnet::IpNet;
use std::net::IpAddr;

#[derive(Clone, Copy)]
enum ParamStyle {
    /// `:name`, running to the next `/`
    Colon,
    /// `{name}`
    Brace,
}

/// Replace path parameters in `pattern`, returning the new text and the parameter names
fn substitute_params(pattern: &str, style: ParamStyle, replacement: &str) -> (String, Vec<String>) {
    let open = match style {
        ParamStyle::Colon => ':',
        ParamStyle::Brace => '{',
    };
    let mut out = String::with_capacity(pattern.len() + 16);
    let mut names = Vec::new();
    let mut rest = pattern;

    while let Some(pos) = rest.find(open) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let segment = &after[..after.find('/').unwrap_or(after.len())];
        let name_end = match style {
            ParamStyle::Colon => Some(segment.len()).filter(|len| *len > 0),
            ParamStyle::Brace => segment
                .char_indices()
                .skip(1)
                .find(|(_, c)| *c == '}')
                .map(|(i, _)| i),
        };
        match name_end {
            Some(end) => {
                names.push(after[..end].to_string());
                out.push_str(replacement);
                rest = match style {
                    ParamStyle::Colon => &after[end..],
                    ParamStyle::Brace => &after[end + 1..],
                };
            }
            None => {
                out.push(open);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    (out, names)
}

fn matches_anchored(key: &str, pattern: &str) -> bool {
    cached_regex(&format!("^{}$", pattern)).is_ok_and(|re| re.is_match(key))
}

/// `key2` may end in `*`: "/foo/bar" matches "/foo/*"
pub fn key_match(key1: &str, key2: &str) -> bool {
    match key2.find('*') {
        None => key1 == key2,
        Some(i) => {
            let prefix = &key2.as_bytes()[..i];
            if key1.len() > i {
                &key1.as_bytes()[..i] == prefix
            } else {
                key1.as_bytes() == prefix
            }
        }
    }
}

/// The part of `key1` covered by the `*` in `key2`, or an empty string
pub fn key_get(key1: &str, key2: &str) -> String {
    let Some(i) = key2.find('*') else {
        return String::new();
    };
    if key1.len() > i && key1.as_bytes()[..i] == key2.as_bytes()[..i] {
        return key1.get(i..).unwrap_or_default().to_string();
    }
    String::new()
}

/// RESTful match with `:param` segments: "/resource1" matches "/:resource"
pub fn key_match2(key1: &str, key2: &str) -> bool {
    let (pattern, _) = substitute_params(&key2.replace("/*", "/.*"), ParamStyle::Colon, "[^/]+");
    matches_anchored(key1, &pattern)
}

/// Value of the `:path_var` segment of `key2` within `key1`
pub fn key_get2(key1: &str, key2: &str, path_var: &str) -> String {
    let (pattern, names) =
        substitute_params(&key2.replace("/*", "/.*"), ParamStyle::Colon, "([^/]+)");
    extract_var(key1, &pattern, &names, path_var)
}

/// RESTful match with `{param}` segments: "/resource1" matches "/{resource}"
pub fn key_match3(key1: &str, key2: &str) -> bool {
    let (pattern, _) = substitute_params(&key2.replace("/*", "/.*"), ParamStyle::Brace, "[^/]+");
    matches_anchored(key1, &pattern)
}

/// Value of the `{path_var}` segment of `key2` within `key1`
pub fn key_get3(key1: &str, key2: &str, path_var: &str) -> String {
    let (pattern, names) =
        substitute_params(&key2.replace("/*", "/.*"), ParamStyle::Brace, "([^/]+?)");
    extract_var(key1, &pattern, &names, path_var)
}

fn extract_var(key: &str, pattern: &str, names: &[String], path_var: &str) -> String {
    let Ok(re) = cached_regex(&format!("^{}$", pattern)) else {
        return String::new();
    };
    let Some(caps) = re.captures(key) else {
        return String::new();
    };
    names
        .iter()
        .position(|name| *name == path_var)
        .and_then(|i| caps.get(i + 1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Like [`key_match3`], but repeated `{name}` segments must hold equal values:
/// "/parent/123/child/123" matches "/parent/{id}/child/{id}", "/parent/123/child/456" does not
pub fn key_match4(key1: &str, key2: &str) -> bool {
    let (pattern, names) =
        substitute_params(&key2.replace("/*", "/.*"), ParamStyle::Brace, "([^/]+)");
    let Ok(re) = cached_regex(&format!("^{}$", pattern)) else {
        return false;
    };
    let Some(caps) = re.captures(key1) else {
        return false;
    };

    let mut seen: Vec<(&str, &str)> = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let Some(value) = caps.get(i + 1).map(|m| m.as_str()) else {
            return false;
        };
        match seen.iter().find(|(n, _)| *n == name.as_str()) {
            Some((_, first)) if *first != value => return false,
            Some(_) => {}
            None => seen.push((name.as_str(), value)),
        }
    }
    true
}

/// [`key_match3`] ignoring any `?query` suffix of `key1`
pub fn key_match5(key1: &str, key2: &str) -> bool {
    let key1 = key1.split_once('?').map_or(key1, |(path, _)| path);
    key_match3(key1, key2)
}

/// Unanchored regex search of `pattern` in `key`
pub fn regex_match(key: &str, pattern: &str) -> Result<bool> {
    let re = cached_regex(pattern).map_err(|e| RampartError::argument("regexMatch", e.to_string()))?;
    Ok(re.is_match(key))
}

/// `ip2` is an address or a CIDR block: "192.168.2.123" matches "192.168.2.0/24"
pub fn ip_match(ip1: &str, ip2: &str) -> Result<bool> {
    let addr: IpAddr = ip1.parse().map_err(|_| {
        RampartError::argument("ipMatch", format!("'{}' is not an IP address", ip1))
    })?;

    if !ip2.contains('/') {
        let other: IpAddr = ip2.parse().map_err(|_| {
            RampartError::argument(
                "ipMatch",
                format!("'{}' is neither an IP address nor a CIDR", ip2),
            )
        })?;
        return Ok(addr == other);
    }

    let net: IpNet = ip2
        .parse()
        .map_err(|_| RampartError::argument("ipMatch", format!("'{}' is not a valid CIDR", ip2)))?;

    // IPv4-mapped IPv6 requests still match IPv4 networks
    let addr = match (addr, net) {
        (IpAddr::V6(v6), IpNet::V4(_)) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => return Ok(false),
        },
        _ => addr,
    };
    Ok(net.contains(&addr))
}

/// Shell-style glob where `*` and `?` stop at `/`: "/foo/bar" matches "/foo/*"
pub fn glob_match(key: &str, pattern: &str) -> Result<bool> {
    let compiled = Pattern::new(pattern)
        .map_err(|e| RampartError::argument("globMatch", format!("bad pattern '{}': {}", pattern, e)))?;
    Ok(compiled.matches_with(key, GLOB_OPTIONS))
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

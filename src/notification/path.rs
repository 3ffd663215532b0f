//! Structured data paths.
//!
//! Paths are written in the usual bracketed form:
//! `/interface[name=ethernet-1/1]/statistics/in-octets`. Key values may
//! contain `/`, so splitting only happens outside of brackets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("unbalanced brackets in path '{0}'")]
    Unbalanced(String),
    #[error("malformed key '{key}' in path '{path}'")]
    MalformedKey { path: String, key: String },
    #[error("empty element name in path '{0}'")]
    EmptyElement(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElem {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elem: Vec<PathElem>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

impl PathElem {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), key: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_key(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.key.insert(k.into(), v.into());
        self
    }
}

impl Path {
    /// A prefix path that only names a target.
    #[must_use]
    pub fn with_target(target: impl Into<String>) -> Self {
        Self { target: target.into(), ..Default::default() }
    }

    /// Concatenate `self` (a prefix) with `other`, keeping the prefix origin
    /// unless `other` sets its own.
    #[must_use]
    pub fn join(&self, other: &Path) -> Path {
        let mut elem = self.elem.clone();
        elem.extend(other.elem.iter().cloned());
        Path {
            origin: if other.origin.is_empty() { self.origin.clone() } else { other.origin.clone() },
            elem,
            target: String::new(),
        }
    }

    /// Element-wise prefix test. Keys in `self` must match exactly; an element
    /// of `self` without keys matches any keys.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        if self.elem.len() > other.elem.len() {
            return false;
        }
        self.elem.iter().zip(&other.elem).all(|(a, b)| {
            a.name == b.name && a.key.iter().all(|(k, v)| b.key.get(k) == Some(v))
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.origin.is_empty() {
            write!(f, "{}:", self.origin)?;
        }
        if self.elem.is_empty() {
            return f.write_str("/");
        }
        for e in &self.elem {
            write!(f, "/{}", e.name)?;
            for (k, v) in &e.key {
                write!(f, "[{}={}]", k, v)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut elem = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;

        for (i, c) in trimmed.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| PathError::Unbalanced(s.to_string()))?;
                }
                '/' if depth == 0 => {
                    if i > start {
                        elem.push(parse_elem(s, &trimmed[start..i])?);
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(PathError::Unbalanced(s.to_string()));
        }
        if start < trimmed.len() {
            elem.push(parse_elem(s, &trimmed[start..])?);
        }

        Ok(Path { elem, ..Default::default() })
    }
}

fn parse_elem(path: &str, raw: &str) -> Result<PathElem, PathError> {
    let (name, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    if name.is_empty() {
        return Err(PathError::EmptyElement(path.to_string()));
    }

    let mut elem = PathElem::new(name);
    while !rest.is_empty() {
        // rest starts with '[' here
        let close = rest
            .find(']')
            .ok_or_else(|| PathError::Unbalanced(path.to_string()))?;
        let kv = &rest[1..close];
        let (k, v) = kv.split_once('=').ok_or_else(|| PathError::MalformedKey {
            path: path.to_string(),
            key: kv.to_string(),
        })?;
        if k.is_empty() {
            return Err(PathError::MalformedKey { path: path.to_string(), key: kv.to_string() });
        }
        elem.key.insert(k.to_string(), v.to_string());
        rest = &rest[close + 1..];
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(PathError::MalformedKey { path: path.to_string(), key: rest.to_string() });
        }
    }
    Ok(elem)
}

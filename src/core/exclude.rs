//! Purpose: Composable property exclusion predicates evaluated during row assembly.
//! Exports: `PropertyExcluder`, `PropertyExclusions`, `AllowedProperties`, `ConditionalExclude`.
//! Role: Decide whether a (property, path) pair is dropped from the output row.
//! Invariants: A list of excluders is OR-combined: excluded if any source excludes.
//! Invariants: Paths are full paths from the root row, including sub-query prefixes.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait PropertyExcluder: Send + Sync {
    fn exclude(&self, property: &str, path: &[String]) -> bool;
}

impl<F> PropertyExcluder for F
where
    F: Fn(&str, &[String]) -> bool + Send + Sync,
{
    fn exclude(&self, property: &str, path: &[String]) -> bool {
        self(property, path)
    }
}

pub type ConditionalExclude = Arc<dyn Fn(&str, &[String]) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct PropertyExclusions(Vec<Arc<dyn PropertyExcluder>>);

impl PropertyExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, excluder: Arc<dyn PropertyExcluder>) {
        self.0.push(excluder);
    }

    pub fn with(mut self, excluder: impl PropertyExcluder + 'static) -> Self {
        self.0.push(Arc::new(excluder));
        self
    }

    pub fn extend_from(&mut self, other: &PropertyExclusions) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PropertyExcluder for PropertyExclusions {
    fn exclude(&self, property: &str, path: &[String]) -> bool {
        self.0
            .iter()
            .any(|excluder| excluder.exclude(property, path))
    }
}

impl fmt::Debug for PropertyExclusions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyExclusions")
            .field(&self.0.len())
            .finish()
    }
}

/// Allow-list: listed properties are kept (unless their condition excludes
/// them), every other property is excluded.
#[derive(Clone, Default)]
pub struct AllowedProperties(HashMap<String, Option<ConditionalExclude>>);

impl AllowedProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, property: impl Into<String>) -> Self {
        self.0.insert(property.into(), None);
        self
    }

    pub fn allow_when<F>(mut self, property: impl Into<String>, exclude: F) -> Self
    where
        F: Fn(&str, &[String]) -> bool + Send + Sync + 'static,
    {
        self.0.insert(property.into(), Some(Arc::new(exclude)));
        self
    }
}

impl<S: Into<String>> FromIterator<S> for AllowedProperties {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(|p| (p.into(), None)).collect())
    }
}

impl PropertyExcluder for AllowedProperties {
    fn exclude(&self, property: &str, path: &[String]) -> bool {
        match self.0.get(property) {
            Some(Some(condition)) => condition(property, path),
            Some(None) => false,
            None => true,
        }
    }
}

impl fmt::Debug for AllowedProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        f.debug_tuple("AllowedProperties").field(&keys).finish()
    }
}

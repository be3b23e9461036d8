//! Secret values handed through to steps.
//!
//! The core never inspects or logs a secret's value; `Debug` and `Display`
//! both print a mask.

use std::collections::HashMap;
use std::fmt;

#[derive(Clone)]
pub struct SecretValue {
    value: String,
}

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Expose the raw value. Only step executors should call this.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Named secrets available to a run.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    secrets: HashMap<String, SecretValue>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SecretValue) {
        self.secrets.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.secrets.get(name)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Secrets restricted to the requested names. Unknown names are dropped.
    pub fn select<'a, I>(&self, names: I) -> HashMap<String, SecretValue>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .filter_map(|name| self.secrets.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Read the given names from the process environment, skipping unset ones.
    pub fn from_env<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut store = Self::new();
        for name in names {
            if let Ok(value) = std::env::var(name) {
                store.insert(name, SecretValue::new(value));
            }
        }
        store
    }
}

impl FromIterator<(String, SecretValue)> for SecretStore {
    fn from_iter<T: IntoIterator<Item = (String, SecretValue)>>(iter: T) -> Self {
        Self {
            secrets: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_value() {
        let secret = SecretValue::new("hunter2");
        assert_eq!(format!("{:?}", secret), "SecretValue(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_select_only_requested() {
        let mut store = SecretStore::new();
        store.insert("TOKEN", SecretValue::new("abc"));
        store.insert("OTHER", SecretValue::new("def"));

        let wanted = vec!["TOKEN".to_string(), "MISSING".to_string()];
        let selected = store.select(&wanted);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected["TOKEN"].expose(), "abc");
        assert!(!format!("{:?}", store).contains("def"));
    }
}

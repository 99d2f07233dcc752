//! Property keys and descriptors for stand-in access

use super::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// Host-only unique key token.
///
/// Symbols have no engine representation: reads through them yield
/// `Undefined`, writes fail with
/// [`VmError::UnsupportedKeyType`](crate::VmError::UnsupportedKeyType).
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Option<Arc<str>>,
}

impl Symbol {
    pub fn new(description: Option<&str>) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: description.map(Arc::from),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description().unwrap_or(""))
    }
}

/// Key of a stand-in property access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    Name(String),
    Index(u32),
    Symbol(Symbol),
}

impl PropertyKey {
    /// Engine-side property name; `None` for keys the engine cannot represent.
    pub fn engine_name(&self) -> Option<String> {
        match self {
            PropertyKey::Name(name) => Some(name.clone()),
            PropertyKey::Index(index) => Some(index.to_string()),
            PropertyKey::Symbol(_) => None,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(name) => write!(f, "{}", name),
            PropertyKey::Index(index) => write!(f, "{}", index),
            PropertyKey::Symbol(symbol) => write!(f, "{}", symbol),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(name)
    }
}

impl From<&String> for PropertyKey {
    fn from(name: &String) -> Self {
        PropertyKey::Name(name.clone())
    }
}

impl From<u32> for PropertyKey {
    fn from(index: u32) -> Self {
        PropertyKey::Index(index)
    }
}

impl From<usize> for PropertyKey {
    fn from(index: usize) -> Self {
        match u32::try_from(index) {
            Ok(index) => PropertyKey::Index(index),
            Err(_) => PropertyKey::Name(index.to_string()),
        }
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        PropertyKey::Symbol(symbol)
    }
}

/// Property descriptor for [`StandIn::define_property`](super::StandIn::define_property)
///
/// Attributes left unset default to `false`. A descriptor with `get` or `set`
/// is an accessor descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
    pub get: Option<Value>,
    pub set: Option<Value>,
}

impl PropertyDescriptor {
    /// Data descriptor holding `value`
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn accessor(get: Option<Value>, set: Option<Value>) -> Self {
        Self {
            get,
            set,
            ..Self::default()
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn enumerable(mut self, enumerable: bool) -> Self {
        self.enumerable = enumerable;
        self
    }

    pub fn configurable(mut self, configurable: bool) -> Self {
        self.configurable = configurable;
        self
    }

    pub fn is_accessor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names() {
        assert_eq!(PropertyKey::from("a").engine_name().as_deref(), Some("a"));
        assert_eq!(PropertyKey::from(3u32).engine_name().as_deref(), Some("3"));
        assert_eq!(PropertyKey::from(Symbol::new(Some("s"))).engine_name(), None);
    }

    #[test]
    fn test_symbols_are_unique() {
        let a = Symbol::new(Some("tag"));
        let b = Symbol::new(Some("tag"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.to_string(), "Symbol(tag)");
    }

    #[test]
    fn test_descriptor_builder() {
        let d = PropertyDescriptor::data(1.0).enumerable(true);
        assert!(!d.is_accessor());
        assert!(d.enumerable && !d.writable && !d.configurable);
        assert!(PropertyDescriptor::accessor(Some(Value::Undefined), None).is_accessor());
    }
}

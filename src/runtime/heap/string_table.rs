use std::sync::Arc;

use dashmap::DashMap;

use crate::runtime::{Oop, Runtime, VmResult, famous_classes::STRING_CLASS, require_class};

/// Canonical `java/lang/String` instances, one per content.
#[derive(Debug, Default)]
pub struct StringTable {
    map: DashMap<Arc<str>, Oop>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, runtime: &Runtime, value: &str) -> VmResult<Oop> {
        if let Some(interned) = self.map.get(value) {
            return Ok(Arc::clone(interned.value()));
        }
        let string_class = require_class(None, runtime, STRING_CLASS)?;
        let candidate = runtime.heap().allocate_string(&string_class, value)?;
        // a racing thread may have inserted first; its object wins
        let interned = self.map.entry(Arc::from(value)).or_insert(candidate);
        Ok(Arc::clone(interned.value()))
    }

    pub fn get(&self, value: &str) -> Option<Oop> {
        self.map.get(value).map(|interned| Arc::clone(interned.value()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_runtime;

    #[test]
    fn test_intern_is_canonical() {
        let runtime = test_runtime();
        let table = runtime.string_table();
        let a = table.intern(&runtime, "hello").unwrap();
        let b = table.intern(&runtime, "hello").unwrap();
        let c = table.intern(&runtime, "world").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.string_value(), Some("hello"));
        assert_eq!(a.klass().name().as_ref(), STRING_CLASS);
        assert!(table.get("world").is_some());
        assert!(table.get("absent").is_none());
    }
}

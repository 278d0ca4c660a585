use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering::Relaxed},
};

use parking_lot::RwLock;

use crate::runtime::{
    Exception, Injected, Klass, KlassKind, Object, ObjectBody, Oop, TypeArrayStorage, Value,
    VmResult, famous_classes::OUT_OF_MEMORY_ERROR, zeroed_slice,
};

mod reflection;
mod string_table;

pub use reflection::ensure_mirror;
pub use string_table::StringTable;

/// Allocation front end. Objects are reference counted, so the heap itself
/// only hands out zeroed objects of the right shape and counts them.
#[derive(Debug, Default)]
pub struct Heap {
    allocated: AtomicUsize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_instance(&self, klass: &Arc<Klass>) -> VmResult<Oop> {
        self.allocate_instance_with(klass, Injected::None)
    }

    fn allocate_instance_with(&self, klass: &Arc<Klass>, injected: Injected) -> VmResult<Oop> {
        let instance = klass.require_instance()?;
        if !instance.is_linked() {
            return Err(Exception::internal(format!(
                "cannot allocate {} before it is linked",
                klass.name()
            )));
        }
        let layout = instance.instance_fields();
        let mut fields = Vec::new();
        fields.try_reserve_exact(layout.len()).map_err(|_| {
            Exception::runtime(
                OUT_OF_MEMORY_ERROR,
                format!("cannot allocate an instance of {}", klass.name()),
            )
        })?;
        fields.extend(layout.iter().map(|field_id| {
            field_id
                .field()
                .map_or_else(Value::null, |field| Value::default_for(field.value_type()))
        }));
        Ok(self.track(Object::new(
            Arc::clone(klass),
            ObjectBody::Instance {
                fields: RwLock::new(fields.into_boxed_slice()),
                injected,
            },
        )))
    }

    pub fn allocate_type_array(&self, klass: &Arc<Klass>, length: usize) -> VmResult<Oop> {
        let KlassKind::TypeArray(array) = klass.kind() else {
            return Err(Exception::internal(format!(
                "{} is not a primitive array class",
                klass.name()
            )));
        };
        let storage = TypeArrayStorage::zeroed(array.element_type(), length)?;
        Ok(self.track(Object::new(
            Arc::clone(klass),
            ObjectBody::TypeArray(storage),
        )))
    }

    pub fn allocate_object_array(&self, klass: &Arc<Klass>, length: usize) -> VmResult<Oop> {
        if klass.as_object_array().is_none() {
            return Err(Exception::internal(format!(
                "{} is not a reference array class",
                klass.name()
            )));
        }
        let elements = zeroed_slice::<Option<Oop>>(length)?;
        Ok(self.track(Object::new(
            Arc::clone(klass),
            ObjectBody::ObjectArray(RwLock::new(elements)),
        )))
    }

    /// A `java/lang/String` instance carrying `value`. Use
    /// [`StringTable::intern`] for canonical strings.
    pub fn allocate_string(&self, string_class: &Arc<Klass>, value: &str) -> VmResult<Oop> {
        self.allocate_instance_with(string_class, Injected::StringValue(Arc::from(value)))
    }

    /// A `java/lang/Class` instance standing for `target`.
    pub fn allocate_mirror(&self, class_class: &Arc<Klass>, target: &Arc<Klass>) -> VmResult<Oop> {
        self.allocate_instance_with(class_class, Injected::ClassMirror(Arc::downgrade(target)))
    }

    pub fn allocated_objects(&self) -> usize {
        self.allocated.load(Relaxed)
    }

    fn track(&self, object: Object) -> Oop {
        self.allocated.fetch_add(1, Relaxed);
        Arc::new(object)
    }
}

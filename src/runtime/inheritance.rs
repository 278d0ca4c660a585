use std::sync::Arc;

use crate::runtime::{
    Klass, KlassKind,
    famous_classes::{CLONEABLE_CLASS, OBJECT_CLASS, SERIALIZABLE_CLASS},
};

/// Whether a value of class `source` may be stored where `target` is
/// expected: `checkcast`, `instanceof` and reference array stores.
pub fn is_assignable(source: &Arc<Klass>, target: &Arc<Klass>) -> bool {
    if Arc::ptr_eq(source, target) {
        return true;
    }
    match source.kind() {
        KlassKind::Instance(_) => {
            if target.is_interface() {
                implements(source, target)
            } else {
                is_subclass_of(source, target)
            }
        }
        KlassKind::TypeArray(source_array) => match target.kind() {
            KlassKind::TypeArray(target_array) => {
                source_array.element_type() == target_array.element_type()
            }
            KlassKind::ObjectArray(_) => false,
            KlassKind::Instance(_) => is_array_supertype(target),
        },
        KlassKind::ObjectArray(source_array) => match target.kind() {
            KlassKind::ObjectArray(target_array) => {
                is_assignable(source_array.component(), target_array.component())
            }
            KlassKind::TypeArray(_) => false,
            KlassKind::Instance(_) => is_array_supertype(target),
        },
    }
}

// every array is an Object, a Cloneable and a Serializable
fn is_array_supertype(target: &Klass) -> bool {
    if target.is_interface() {
        matches!(target.name().as_ref(), CLONEABLE_CLASS | SERIALIZABLE_CLASS)
    } else {
        target.name().as_ref() == OBJECT_CLASS
    }
}

/// `class` is `target` or one of its subclasses.
pub fn is_subclass_of(class: &Arc<Klass>, target: &Arc<Klass>) -> bool {
    let mut current = Some(Arc::clone(class));
    while let Some(klass) = current {
        if Arc::ptr_eq(&klass, target) {
            return true;
        }
        current = klass.super_class();
    }
    false
}

pub fn implements(class: &Arc<Klass>, interface: &Arc<Klass>) -> bool {
    if Arc::ptr_eq(class, interface) {
        return true;
    }
    match class.kind() {
        KlassKind::Instance(instance) => instance
            .get_interface(interface.name())
            .is_some_and(|found| Arc::ptr_eq(&found, interface)),
        KlassKind::TypeArray(_) | KlassKind::ObjectArray(_) => is_array_supertype(interface),
    }
}

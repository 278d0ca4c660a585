use std::sync::{Arc, Weak};

use crate::{
    consts::FieldAccessFlag,
    descriptor::{FieldType, ValueType},
    runtime::{
        Exception, Klass, VmResult,
        famous_classes::NO_SUCH_FIELD_ERROR,
    },
};

#[derive(Debug)]
pub struct Field {
    owner: Weak<Klass>,
    owner_name: Arc<str>,
    name: Arc<str>,
    descriptor: Arc<str>,
    field_type: FieldType,
    access_flags: FieldAccessFlag,
    // index of the ConstantValue literal, static fields only
    constant_value_index: Option<u16>,
}

impl Field {
    pub(crate) fn new(
        owner: Weak<Klass>,
        owner_name: Arc<str>,
        name: Arc<str>,
        descriptor: Arc<str>,
        field_type: FieldType,
        access_flags: FieldAccessFlag,
        constant_value_index: Option<u16>,
    ) -> Self {
        Self {
            owner,
            owner_name,
            name,
            descriptor,
            field_type,
            access_flags,
            constant_value_index,
        }
    }

    pub fn make_identity(class_name: &str, name: &str, descriptor: &str) -> String {
        format!("{class_name} {name} {descriptor}")
    }

    /// `"<declaring class> <name> <descriptor>"`, unique across a hierarchy
    /// even when a subclass hides a field of its superclass.
    pub fn identity(&self) -> String {
        Self::make_identity(&self.owner_name, &self.name, &self.descriptor)
    }

    pub fn owner(&self) -> VmResult<Arc<Klass>> {
        self.owner.upgrade().ok_or_else(|| {
            Exception::internal(format!("declaring class of {} is gone", self.identity()))
        })
    }

    pub fn owner_name(&self) -> &Arc<str> {
        &self.owner_name
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn descriptor(&self) -> &Arc<str> {
        &self.descriptor
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn value_type(&self) -> ValueType {
        self.field_type.value_type()
    }

    pub fn access_flags(&self) -> FieldAccessFlag {
        self.access_flags
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlag::STATIC)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(FieldAccessFlag::FINAL)
    }

    pub fn constant_value_index(&self) -> Option<u16> {
        self.constant_value_index
    }
}

/// A field together with its storage slot. Offsets index the instance field
/// array for instance fields and the owning class's static array otherwise.
///
/// Lookups return an id without a field when nothing matched; use
/// [`FieldId::require_field`] before touching storage.
#[derive(Debug, Clone)]
pub struct FieldId {
    offset: usize,
    field: Option<Arc<Field>>,
}

impl FieldId {
    pub(crate) fn new(offset: usize, field: Arc<Field>) -> Self {
        Self {
            offset,
            field: Some(field),
        }
    }

    pub fn not_found() -> Self {
        Self {
            offset: 0,
            field: None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.field.is_some()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn field(&self) -> Option<&Arc<Field>> {
        self.field.as_ref()
    }

    pub fn require_field(&self, describe: impl FnOnce() -> String) -> VmResult<&Arc<Field>> {
        self.field
            .as_ref()
            .ok_or_else(|| Exception::linkage(NO_SUCH_FIELD_ERROR, describe()))
    }
}

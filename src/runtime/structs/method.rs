use std::sync::{Arc, Weak};

use crate::{
    consts::MethodAccessFlag,
    descriptor::{FieldType, MethodDescriptor, ValueType},
    runtime::{CodeAttribute, Exception, Klass, VmResult},
};

#[derive(Debug)]
pub struct Method {
    owner: Weak<Klass>,
    owner_name: Arc<str>,
    name: Arc<str>,
    descriptor: Arc<str>,
    signature: MethodDescriptor,
    access_flags: MethodAccessFlag,
    code: Option<CodeAttribute>,
}

impl Method {
    pub(crate) fn new(
        owner: Weak<Klass>,
        owner_name: Arc<str>,
        name: Arc<str>,
        descriptor: Arc<str>,
        signature: MethodDescriptor,
        access_flags: MethodAccessFlag,
        code: Option<CodeAttribute>,
    ) -> Self {
        Self {
            owner,
            owner_name,
            name,
            descriptor,
            signature,
            access_flags,
            code,
        }
    }

    pub fn make_identity(name: &str, descriptor: &str) -> String {
        format!("{name} {descriptor}")
    }

    pub fn identity(&self) -> String {
        Self::make_identity(&self.name, &self.descriptor)
    }

    pub fn owner(&self) -> VmResult<Arc<Klass>> {
        self.owner.upgrade().ok_or_else(|| {
            Exception::internal(format!(
                "declaring class of {}.{} is gone",
                self.owner_name,
                self.identity()
            ))
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

    pub fn parameters(&self) -> &[FieldType] {
        self.signature.parameters()
    }

    pub fn return_value_type(&self) -> ValueType {
        self.signature.return_value_type()
    }

    pub fn access_flags(&self) -> MethodAccessFlag {
        self.access_flags
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.code.as_ref()
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::STATIC)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::FINAL)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::PRIVATE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::NATIVE)
    }
}

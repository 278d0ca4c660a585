use std::sync::Arc;

mod java_str;

pub use java_str::*;

use crate::consts::{ClassAccessFlag, ConstantTag, FieldAccessFlag, MethodAccessFlag};

/// A class file as produced by the parser. Nothing here is resolved: every
/// reference is still a constant pool index.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    /// slot `i` holds constant pool index `i + 1`
    pub constant_pool: Vec<ConstantPoolInfo>,
    pub access_flags: ClassAccessFlag,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn constant(&self, index: u16) -> Option<&ConstantPoolInfo> {
        if index == 0 {
            return None;
        }
        self.constant_pool.get(index as usize - 1)
    }

    pub fn utf8(&self, index: u16) -> Option<&[u8]> {
        match self.constant(index)? {
            ConstantPoolInfo::Utf8(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn utf8_str(&self, index: u16) -> Option<Arc<str>> {
        decode_modified_utf8_arc(self.utf8(index)?)
    }

    /// Name behind a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> Option<Arc<str>> {
        match self.constant(index)? {
            ConstantPoolInfo::Class { name_index } => self.utf8_str(*name_index),
            _ => None,
        }
    }

    pub fn this_class_name(&self) -> Option<Arc<str>> {
        self.class_name(self.this_class)
    }

    pub fn attribute_name(&self, attribute: &AttributeInfo) -> Option<Arc<str>> {
        self.utf8_str(attribute.attribute_name_index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolInfo {
    Utf8(Arc<[u8]>),
    Integer(i32),
    /// raw IEEE-754 bits
    Float(u32),
    Long {
        high_bytes: u32,
        low_bytes: u32,
    },
    Double {
        high_bytes: u32,
        low_bytes: u32,
    },
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
    Empty,
}

impl ConstantPoolInfo {
    pub fn tag(&self) -> ConstantTag {
        match self {
            ConstantPoolInfo::Utf8(_) => ConstantTag::Utf8,
            ConstantPoolInfo::Integer(_) => ConstantTag::Integer,
            ConstantPoolInfo::Float(_) => ConstantTag::Float,
            ConstantPoolInfo::Long { .. } => ConstantTag::Long,
            ConstantPoolInfo::Double { .. } => ConstantTag::Double,
            ConstantPoolInfo::Class { .. } => ConstantTag::Class,
            ConstantPoolInfo::String { .. } => ConstantTag::String,
            ConstantPoolInfo::Fieldref { .. } => ConstantTag::Fieldref,
            ConstantPoolInfo::Methodref { .. } => ConstantTag::Methodref,
            ConstantPoolInfo::InterfaceMethodref { .. } => ConstantTag::InterfaceMethodref,
            ConstantPoolInfo::NameAndType { .. } => ConstantTag::NameAndType,
            ConstantPoolInfo::MethodHandle { .. } => ConstantTag::MethodHandle,
            ConstantPoolInfo::MethodType { .. } => ConstantTag::MethodType,
            ConstantPoolInfo::Dynamic { .. } => ConstantTag::Dynamic,
            ConstantPoolInfo::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
            ConstantPoolInfo::Module { .. } => ConstantTag::Module,
            ConstantPoolInfo::Package { .. } => ConstantTag::Package,
            ConstantPoolInfo::Empty => ConstantTag::Empty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlag,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlag,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub info: Vec<u8>,
}

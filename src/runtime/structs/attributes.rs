use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) code: Arc<[u8]>,
    pub(crate) exception_table: Vec<ExceptionTableItem>,
}

impl CodeAttribute {
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn exception_table(&self) -> &[ExceptionTableItem] {
        &self.exception_table
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableItem {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    /// 0 catches everything
    pub(crate) catch_type: u16,
}

/// Class-level attributes kept after linking. Anything not listed here is
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct ClassAttributes {
    pub(crate) source_file: Option<Arc<str>>,
    pub(crate) signature: Option<Arc<str>>,
    pub(crate) inner_classes: Vec<InnerClass>,
    pub(crate) enclosing_method: Option<EnclosingMethod>,
    pub(crate) bootstrap_methods: Vec<BootstrapMethod>,
}

impl ClassAttributes {
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn inner_classes(&self) -> &[InnerClass] {
        &self.inner_classes
    }

    pub fn enclosing_method(&self) -> Option<&EnclosingMethod> {
        self.enclosing_method.as_ref()
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerClass {
    pub(crate) inner_class_info_index: u16,
    pub(crate) outer_class_info_index: u16,
    pub(crate) inner_name_index: u16,
    pub(crate) inner_class_access_flags: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnclosingMethod {
    pub(crate) class_index: u16,
    /// 0 when not enclosed by a method or constructor
    pub(crate) method_index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    pub(crate) bootstrap_method_ref: u16,
    pub(crate) bootstrap_arguments: Vec<u16>,
}

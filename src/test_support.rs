use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    class::{AttributeInfo, ClassFile, ConstantPoolInfo, FieldInfo, MethodInfo, encode_modified_utf8},
    consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag},
    descriptor::ValueType,
    runtime::{
        ClassSource, JavaThread, MemorySource, Method, Runtime, Value, VmOptions, VmResult,
        famous_classes::{CLASS_CLASS, OBJECT_CLASS, STRING_CLASS},
    },
};

/// `return`
const RETURN_ONLY: [u8; 1] = [0xb1];

pub enum Literal<'a> {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Str(&'a str),
}

/// Assembles a [`ClassFile`] in memory. Non-interface classes get a public
/// `<init>()V` unless one is declared.
pub struct ClassFileBuilder {
    constant_pool: Vec<ConstantPoolInfo>,
    utf8_indices: HashMap<String, u16>,
    class_indices: HashMap<String, u16>,
    access_flags: ClassAccessFlag,
    this_class: u16,
    super_class: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    attributes: Vec<AttributeInfo>,
}

impl ClassFileBuilder {
    pub fn new(name: &str) -> Self {
        let mut builder = Self {
            constant_pool: Vec::new(),
            utf8_indices: HashMap::new(),
            class_indices: HashMap::new(),
            access_flags: ClassAccessFlag::PUBLIC | ClassAccessFlag::SUPER,
            this_class: 0,
            super_class: (name != OBJECT_CLASS).then(|| OBJECT_CLASS.to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        };
        builder.this_class = builder.class(name);
        builder
    }

    fn push(&mut self, entry: ConstantPoolInfo) -> u16 {
        self.constant_pool.push(entry);
        self.constant_pool.len() as u16
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8_indices.get(value) {
            return index;
        }
        let bytes = encode_modified_utf8(value);
        let index = self.push(ConstantPoolInfo::Utf8(Arc::from(bytes.as_ref())));
        self.utf8_indices.insert(value.to_string(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.class_indices.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        let index = self.push(ConstantPoolInfo::Class { name_index });
        self.class_indices.insert(name.to_string(), index);
        index
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        self.push(ConstantPoolInfo::String { string_index })
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(ConstantPoolInfo::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.push(ConstantPoolInfo::Float(value.to_bits()))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        let bits = value as u64;
        let index = self.push(ConstantPoolInfo::Long {
            high_bytes: (bits >> 32) as u32,
            low_bytes: bits as u32,
        });
        self.push(ConstantPoolInfo::Empty);
        index
    }

    pub fn double(&mut self, value: f64) -> u16 {
        let bits = value.to_bits();
        let index = self.push(ConstantPoolInfo::Double {
            high_bytes: (bits >> 32) as u32,
            low_bytes: bits as u32,
        });
        self.push(ConstantPoolInfo::Empty);
        index
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push(ConstantPoolInfo::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(ConstantPoolInfo::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(ConstantPoolInfo::Methodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(ConstantPoolInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn super_class(mut self, name: Option<&str>) -> Self {
        self.super_class = name.map(str::to_string);
        self
    }

    pub fn flags(mut self, access_flags: ClassAccessFlag) -> Self {
        self.access_flags = access_flags;
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn field(self, name: &str, descriptor: &str) -> Self {
        self.field_with_flags(name, descriptor, FieldAccessFlag::PUBLIC)
    }

    pub fn field_with_flags(mut self, name: &str, descriptor: &str, access_flags: FieldAccessFlag) -> Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        self
    }

    pub fn static_final_constant(mut self, name: &str, descriptor: &str, literal: Literal<'_>) -> Self {
        let value_index = match literal {
            Literal::Int(value) => self.integer(value),
            Literal::Float(value) => self.float(value),
            Literal::Long(value) => self.long(value),
            Literal::Double(value) => self.double(value),
            Literal::Str(value) => self.string(value),
        };
        let attribute_name_index = self.utf8("ConstantValue");
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(FieldInfo {
            access_flags: FieldAccessFlag::PUBLIC | FieldAccessFlag::STATIC | FieldAccessFlag::FINAL,
            name_index,
            descriptor_index,
            attributes: vec![AttributeInfo {
                attribute_name_index,
                info: value_index.to_be_bytes().to_vec(),
            }],
        });
        self
    }

    /// Concrete methods get a `Code` attribute that just returns.
    pub fn method(mut self, name: &str, descriptor: &str, access_flags: MethodAccessFlag) -> Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut attributes = Vec::new();
        if !access_flags.intersects(MethodAccessFlag::ABSTRACT | MethodAccessFlag::NATIVE) {
            attributes.push(self.code_attribute(&RETURN_ONLY));
        }
        self.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        self
    }

    fn code_attribute(&mut self, code: &[u8]) -> AttributeInfo {
        let attribute_name_index = self.utf8("Code");
        let mut info = Vec::new();
        info.extend_from_slice(&2u16.to_be_bytes());
        info.extend_from_slice(&2u16.to_be_bytes());
        info.extend_from_slice(&(code.len() as u32).to_be_bytes());
        info.extend_from_slice(code);
        // no exception table, no nested attributes
        info.extend_from_slice(&[0, 0, 0, 0]);
        AttributeInfo {
            attribute_name_index,
            info,
        }
    }

    pub fn attribute(mut self, name: &str, info: Vec<u8>) -> Self {
        let attribute_name_index = self.utf8(name);
        self.attributes.push(AttributeInfo {
            attribute_name_index,
            info,
        });
        self
    }

    pub fn build(mut self) -> ClassFile {
        let is_interface = self.access_flags.contains(ClassAccessFlag::INTERFACE);
        let has_constructor = self.methods.iter().any(|method| {
            self.utf8_indices.get("<init>") == Some(&method.name_index)
        });
        if !is_interface && !has_constructor {
            self = self.method("<init>", "()V", MethodAccessFlag::PUBLIC);
        }
        let super_class = match self.super_class.take() {
            Some(name) => self.class(&name),
            None => 0,
        };
        let interfaces = std::mem::take(&mut self.interfaces)
            .iter()
            .map(|name| self.class(name))
            .collect();
        ClassFile {
            minor_version: 0,
            major_version: 61,
            constant_pool: self.constant_pool,
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class,
            interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        }
    }
}

pub fn test_runtime() -> Runtime {
    test_runtime_with(vec![])
}

/// A bootstrapped runtime whose only class source holds minimal
/// `java/lang/Object`, `java/lang/String`, `java/lang/Class` and `classes`.
pub fn test_runtime_with(classes: Vec<ClassFile>) -> Runtime {
    let runtime = unbooted_runtime_with(classes);
    runtime.bootstrap().unwrap();
    runtime
}

/// Same class source as [`test_runtime_with`], but nothing is loaded yet.
pub fn unbooted_runtime_with(classes: Vec<ClassFile>) -> Runtime {
    let mut source = MemorySource::new();
    let core = [
        ClassFileBuilder::new(OBJECT_CLASS)
            .super_class(None)
            .method("hashCode", "()I", MethodAccessFlag::PUBLIC | MethodAccessFlag::NATIVE)
            .build(),
        ClassFileBuilder::new(STRING_CLASS)
            .flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::FINAL | ClassAccessFlag::SUPER)
            .build(),
        ClassFileBuilder::new(CLASS_CLASS)
            .flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::FINAL | ClassAccessFlag::SUPER)
            .build(),
    ];
    for class_file in core.into_iter().chain(classes) {
        source.insert(class_file).unwrap();
    }
    let sources: Vec<Box<dyn ClassSource>> = vec![Box::new(source)];
    Runtime::with_sources(VmOptions::default(), sources)
}

type Handler = Box<dyn Fn(&Runtime, &Arc<Method>, &[Value]) -> VmResult<Option<Value>> + Send + Sync>;

/// Stands in for the bytecode interpreter: logs every call as
/// `owner.name` followed by the descriptor and returns the handler's result, or the default
/// value of the return type.
#[derive(Default)]
pub struct RecordingThread {
    calls: Mutex<Vec<String>>,
    handler: Option<Handler>,
}

impl RecordingThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(
        handler: impl Fn(&Runtime, &Arc<Method>, &[Value]) -> VmResult<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Some(Box::new(handler)),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl JavaThread for RecordingThread {
    fn run_method(&self, runtime: &Runtime, method: &Arc<Method>, args: Vec<Value>) -> VmResult<Option<Value>> {
        self.calls.lock().push(format!(
            "{}.{}{}",
            method.owner_name(),
            method.name(),
            method.descriptor()
        ));
        if let Some(handler) = &self.handler {
            return handler(runtime, method, &args);
        }
        Ok(match method.return_value_type() {
            ValueType::Void => None,
            value_type => Some(Value::default_for(value_type)),
        })
    }
}

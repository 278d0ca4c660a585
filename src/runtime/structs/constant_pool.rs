use std::{
    fmt::{self, Debug},
    sync::{Arc, Weak},
};

use once_cell::sync::OnceCell;

use crate::{
    class::{ClassFile, ConstantPoolInfo, decode_modified_utf8_arc},
    consts::ConstantTag,
    runtime::{
        Exception, FieldId, Klass, Method, Oop, Runtime, VmResult, famous_classes::CLASS_FORMAT_ERROR,
        require_class,
    },
};

/// Which sub-pool a lookup goes through. Each kind accepts exactly one raw
/// tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantKind {
    Class,
    String,
    Method,
    InterfaceMethod,
    Field,
    NameAndType,
    Utf8,
    Int,
    Float,
    Long,
    Double,
}

impl ConstantKind {
    pub fn tag(self) -> ConstantTag {
        match self {
            ConstantKind::Class => ConstantTag::Class,
            ConstantKind::String => ConstantTag::String,
            ConstantKind::Method => ConstantTag::Methodref,
            ConstantKind::InterfaceMethod => ConstantTag::InterfaceMethodref,
            ConstantKind::Field => ConstantTag::Fieldref,
            ConstantKind::NameAndType => ConstantTag::NameAndType,
            ConstantKind::Utf8 => ConstantTag::Utf8,
            ConstantKind::Int => ConstantTag::Integer,
            ConstantKind::Float => ConstantTag::Float,
            ConstantKind::Long => ConstantTag::Long,
            ConstantKind::Double => ConstantTag::Double,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Entry {
    Class(Arc<Klass>),
    String(Oop),
    Method(Option<Arc<Method>>),
    InterfaceMethod(Option<Arc<Method>>),
    Field(FieldId),
    NameAndType(Arc<str>, Arc<str>),
    Utf8(Arc<str>),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
}

struct SubPool<T> {
    tag: ConstantTag,
    // one cell per constant pool slot, allocated on first use
    entries: OnceCell<Box<[OnceCell<T>]>>,
}

impl<T: Clone> SubPool<T> {
    const fn new(tag: ConstantTag) -> Self {
        Self {
            tag,
            entries: OnceCell::new(),
        }
    }

    fn find_or_new(
        &self,
        raw: &ClassFile,
        index: u16,
        create: impl FnOnce(&ConstantPoolInfo) -> VmResult<T>,
    ) -> VmResult<T> {
        let entry = raw.constant(index).ok_or_else(|| {
            Exception::linkage(
                CLASS_FORMAT_ERROR,
                format!("constant pool index {index} out of range"),
            )
        })?;
        if entry.tag() != self.tag {
            return Err(Exception::internal(format!(
                "accessing an incompatible constant entry: #{index} is {:?}, expected {:?}",
                entry.tag(),
                self.tag
            )));
        }
        let entries = self
            .entries
            .get_or_init(|| (0..raw.constant_pool.len()).map(|_| OnceCell::new()).collect());
        let cell = &entries[index as usize - 1];
        cell.get_or_try_init(|| create(entry)).cloned()
    }

    fn resolved(&self, index: u16) -> bool {
        self.entries
            .get()
            .and_then(|entries| entries.get((index as usize).checked_sub(1)?))
            .is_some_and(|cell| cell.get().is_some())
    }
}

/// Lazily resolved view of a class's constant pool. Every index is resolved
/// at most once per kind; later lookups return the memoized entry.
pub struct RuntimeConstantPool {
    owner: Weak<Klass>,
    raw: OnceCell<Arc<ClassFile>>,
    classes: SubPool<Arc<Klass>>,
    strings: SubPool<Oop>,
    methods: SubPool<Option<Arc<Method>>>,
    interface_methods: SubPool<Option<Arc<Method>>>,
    fields: SubPool<FieldId>,
    names_and_types: SubPool<(Arc<str>, Arc<str>)>,
    utf8s: SubPool<Arc<str>>,
    ints: SubPool<i32>,
    floats: SubPool<f32>,
    longs: SubPool<i64>,
    doubles: SubPool<f64>,
}

impl RuntimeConstantPool {
    pub(crate) fn new(owner: Weak<Klass>) -> Self {
        Self {
            owner,
            raw: OnceCell::new(),
            classes: SubPool::new(ConstantTag::Class),
            strings: SubPool::new(ConstantTag::String),
            methods: SubPool::new(ConstantTag::Methodref),
            interface_methods: SubPool::new(ConstantTag::InterfaceMethodref),
            fields: SubPool::new(ConstantTag::Fieldref),
            names_and_types: SubPool::new(ConstantTag::NameAndType),
            utf8s: SubPool::new(ConstantTag::Utf8),
            ints: SubPool::new(ConstantTag::Integer),
            floats: SubPool::new(ConstantTag::Float),
            longs: SubPool::new(ConstantTag::Long),
            doubles: SubPool::new(ConstantTag::Double),
        }
    }

    pub(crate) fn attach(&self, class_file: Arc<ClassFile>) -> VmResult<()> {
        self.raw
            .set(class_file)
            .map_err(|_| Exception::internal("constant pool attached twice"))
    }

    pub fn is_attached(&self) -> bool {
        self.raw.get().is_some()
    }

    fn raw(&self) -> VmResult<&ClassFile> {
        self.raw
            .get()
            .map(Arc::as_ref)
            .ok_or_else(|| Exception::internal("constant pool used before linking"))
    }

    fn owner(&self) -> VmResult<Arc<Klass>> {
        self.owner
            .upgrade()
            .ok_or_else(|| Exception::internal("constant pool outlived its class"))
    }

    pub fn tag_at(&self, index: u16) -> VmResult<ConstantTag> {
        self.raw()?
            .constant(index)
            .map(ConstantPoolInfo::tag)
            .ok_or_else(|| {
                Exception::linkage(
                    CLASS_FORMAT_ERROR,
                    format!("constant pool index {index} out of range"),
                )
            })
    }

    /// Whether `index` has already been resolved as `kind`.
    pub fn is_resolved(&self, kind: ConstantKind, index: u16) -> bool {
        match kind {
            ConstantKind::Class => self.classes.resolved(index),
            ConstantKind::String => self.strings.resolved(index),
            ConstantKind::Method => self.methods.resolved(index),
            ConstantKind::InterfaceMethod => self.interface_methods.resolved(index),
            ConstantKind::Field => self.fields.resolved(index),
            ConstantKind::NameAndType => self.names_and_types.resolved(index),
            ConstantKind::Utf8 => self.utf8s.resolved(index),
            ConstantKind::Int => self.ints.resolved(index),
            ConstantKind::Float => self.floats.resolved(index),
            ConstantKind::Long => self.longs.resolved(index),
            ConstantKind::Double => self.doubles.resolved(index),
        }
    }

    pub fn resolve(&self, runtime: &Runtime, kind: ConstantKind, index: u16) -> VmResult<Entry> {
        let entry = match kind {
            ConstantKind::Class => Entry::Class(self.get_class(runtime, index)?),
            ConstantKind::String => Entry::String(self.get_string(runtime, index)?),
            ConstantKind::Method => Entry::Method(self.get_method(runtime, index)?),
            ConstantKind::InterfaceMethod => {
                Entry::InterfaceMethod(self.get_interface_method(runtime, index)?)
            }
            ConstantKind::Field => Entry::Field(self.get_field(runtime, index)?),
            ConstantKind::NameAndType => {
                let (name, descriptor) = self.get_name_and_type(index)?;
                Entry::NameAndType(name, descriptor)
            }
            ConstantKind::Utf8 => Entry::Utf8(self.get_utf8(index)?),
            ConstantKind::Int => Entry::Int(self.get_int(index)?),
            ConstantKind::Float => Entry::Float(self.get_float(index)?),
            ConstantKind::Long => Entry::Long(self.get_long(index)?),
            ConstantKind::Double => Entry::Double(self.get_double(index)?),
        };
        Ok(entry)
    }

    /// Resolves through the defining loader of the owning class.
    pub fn get_class(&self, runtime: &Runtime, index: u16) -> VmResult<Arc<Klass>> {
        let raw = self.raw()?;
        self.classes.find_or_new(raw, index, |entry| {
            let ConstantPoolInfo::Class { name_index } = entry else {
                return Err(mismatch(index));
            };
            let name = self.get_utf8(*name_index)?;
            let loader = self.owner()?.class_loader();
            require_class(loader.as_deref(), runtime, &name)
        })
    }

    pub fn get_string(&self, runtime: &Runtime, index: u16) -> VmResult<Oop> {
        let raw = self.raw()?;
        self.strings.find_or_new(raw, index, |entry| {
            let ConstantPoolInfo::String { string_index } = entry else {
                return Err(mismatch(index));
            };
            let value = self.get_utf8(*string_index)?;
            runtime.string_table().intern(runtime, &value)
        })
    }

    pub fn get_method(&self, runtime: &Runtime, index: u16) -> VmResult<Option<Arc<Method>>> {
        let raw = self.raw()?;
        self.methods.find_or_new(raw, index, |entry| {
            let ConstantPoolInfo::Methodref {
                class_index,
                name_and_type_index,
            } = entry
            else {
                return Err(mismatch(index));
            };
            self.lookup_method(runtime, *class_index, *name_and_type_index)
        })
    }

    pub fn get_interface_method(
        &self,
        runtime: &Runtime,
        index: u16,
    ) -> VmResult<Option<Arc<Method>>> {
        let raw = self.raw()?;
        self.interface_methods.find_or_new(raw, index, |entry| {
            let ConstantPoolInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } = entry
            else {
                return Err(mismatch(index));
            };
            self.lookup_method(runtime, *class_index, *name_and_type_index)
        })
    }

    fn lookup_method(
        &self,
        runtime: &Runtime,
        class_index: u16,
        name_and_type_index: u16,
    ) -> VmResult<Option<Arc<Method>>> {
        let klass = self.get_class(runtime, class_index)?;
        let (name, descriptor) = self.get_name_and_type(name_and_type_index)?;
        let instance = klass.as_instance().ok_or_else(|| {
            Exception::internal(format!(
                "method {name}{descriptor} referenced on non-instance class {}",
                klass.name()
            ))
        })?;
        Ok(instance.find_method(&name, &descriptor))
    }

    pub fn get_field(&self, runtime: &Runtime, index: u16) -> VmResult<FieldId> {
        let raw = self.raw()?;
        self.fields.find_or_new(raw, index, |entry| {
            let ConstantPoolInfo::Fieldref {
                class_index,
                name_and_type_index,
            } = entry
            else {
                return Err(mismatch(index));
            };
            let klass = self.get_class(runtime, *class_index)?;
            let (name, descriptor) = self.get_name_and_type(*name_and_type_index)?;
            let instance = klass.as_instance().ok_or_else(|| {
                Exception::internal(format!(
                    "field {name}:{descriptor} referenced on non-instance class {}",
                    klass.name()
                ))
            })?;
            Ok(instance.find_field(&name, &descriptor))
        })
    }

    pub fn get_name_and_type(&self, index: u16) -> VmResult<(Arc<str>, Arc<str>)> {
        let raw = self.raw()?;
        self.names_and_types.find_or_new(raw, index, |entry| {
            let ConstantPoolInfo::NameAndType {
                name_index,
                descriptor_index,
            } = entry
            else {
                return Err(mismatch(index));
            };
            Ok((
                self.get_utf8(*name_index)?,
                self.get_utf8(*descriptor_index)?,
            ))
        })
    }

    pub fn get_utf8(&self, index: u16) -> VmResult<Arc<str>> {
        let raw = self.raw()?;
        self.utf8s.find_or_new(raw, index, |entry| {
            let ConstantPoolInfo::Utf8(bytes) = entry else {
                return Err(mismatch(index));
            };
            decode_modified_utf8_arc(bytes).ok_or_else(|| {
                Exception::linkage(
                    CLASS_FORMAT_ERROR,
                    format!("constant #{index} is not valid modified UTF-8"),
                )
            })
        })
    }

    pub fn get_int(&self, index: u16) -> VmResult<i32> {
        let raw = self.raw()?;
        self.ints.find_or_new(raw, index, |entry| match entry {
            ConstantPoolInfo::Integer(value) => Ok(*value),
            _ => Err(mismatch(index)),
        })
    }

    pub fn get_float(&self, index: u16) -> VmResult<f32> {
        let raw = self.raw()?;
        self.floats.find_or_new(raw, index, |entry| match entry {
            ConstantPoolInfo::Float(bits) => Ok(decode_float(*bits)),
            _ => Err(mismatch(index)),
        })
    }

    pub fn get_long(&self, index: u16) -> VmResult<i64> {
        let raw = self.raw()?;
        self.longs.find_or_new(raw, index, |entry| match entry {
            ConstantPoolInfo::Long {
                high_bytes,
                low_bytes,
            } => Ok(decode_long(*high_bytes, *low_bytes)),
            _ => Err(mismatch(index)),
        })
    }

    pub fn get_double(&self, index: u16) -> VmResult<f64> {
        let raw = self.raw()?;
        self.doubles.find_or_new(raw, index, |entry| match entry {
            ConstantPoolInfo::Double {
                high_bytes,
                low_bytes,
            } => Ok(decode_double(*high_bytes, *low_bytes)),
            _ => Err(mismatch(index)),
        })
    }
}

impl Debug for RuntimeConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConstantPool")
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

fn mismatch(index: u16) -> Exception {
    Exception::internal(format!("accessing an incompatible constant entry #{index}"))
}

pub fn decode_float(bits: u32) -> f32 {
    match bits {
        0x7f80_0000 => f32::INFINITY,
        0xff80_0000 => f32::NEG_INFINITY,
        0x7f80_0001..=0x7fff_ffff | 0xff80_0001..=0xffff_ffff => f32::NAN,
        _ => f32::from_bits(bits),
    }
}

pub fn decode_long(high_bytes: u32, low_bytes: u32) -> i64 {
    ((u64::from(high_bytes) << 32) | u64::from(low_bytes)) as i64
}

pub fn decode_double(high_bytes: u32, low_bytes: u32) -> f64 {
    let bits = (u64::from(high_bytes) << 32) | u64::from(low_bytes);
    match bits {
        0x7ff0_0000_0000_0000 => f64::INFINITY,
        0xfff0_0000_0000_0000 => f64::NEG_INFINITY,
        0x7ff0_0000_0000_0001..=0x7fff_ffff_ffff_ffff
        | 0xfff0_0000_0000_0001..=0xffff_ffff_ffff_ffff => f64::NAN,
        _ => f64::from_bits(bits),
    }
}

use std::{
    fmt::{self, Debug},
    sync::{Arc, Weak},
};

use parking_lot::RwLock;

use crate::{
    descriptor::ValueType,
    runtime::{
        Exception, FieldId, Klass, VmResult,
        famous_classes::{
            ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, CLASS_CAST_EXCEPTION, OUT_OF_MEMORY_ERROR,
        },
    },
};

pub type Oop = Arc<Object>;

/// A value as it lives in a field, an array slot or on the operand stack.
/// Every int-like type shares the 32-bit `Int` cell.
#[derive(Clone, Debug)]
pub enum Value {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Reference(Option<Oop>),
}

impl Value {
    pub fn null() -> Self {
        Value::Reference(None)
    }

    pub fn reference(oop: &Oop) -> Self {
        Value::Reference(Some(Arc::clone(oop)))
    }

    pub fn default_for(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Float => Value::Float(0.0),
            ValueType::Long => Value::Long(0),
            ValueType::Double => Value::Double(0.0),
            ValueType::Object | ValueType::Array | ValueType::Void => Value::Reference(None),
            ValueType::Byte
            | ValueType::Boolean
            | ValueType::Char
            | ValueType::Short
            | ValueType::Int => Value::Int(0),
        }
    }

    /// Whether this value has the storage shape of `value_type`.
    pub fn fits(&self, value_type: ValueType) -> bool {
        match self {
            Value::Int(_) => value_type.is_int_like(),
            Value::Float(_) => value_type == ValueType::Float,
            Value::Long(_) => value_type == ValueType::Long,
            Value::Double(_) => value_type == ValueType::Double,
            Value::Reference(_) => value_type.is_reference(),
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Reference(_) => "reference",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Reference(a), Value::Reference(b)) => match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// VM data attached to instances of a few well-known classes.
#[derive(Debug, Clone)]
pub enum Injected {
    None,
    ClassMirror(Weak<Klass>),
    StringValue(Arc<str>),
}

pub struct Object {
    klass: Arc<Klass>,
    body: ObjectBody,
}

pub(crate) enum ObjectBody {
    Instance {
        fields: RwLock<Box<[Value]>>,
        injected: Injected,
    },
    TypeArray(TypeArrayStorage),
    ObjectArray(RwLock<Box<[Option<Oop>]>>),
}

pub enum TypeArrayStorage {
    Boolean(RwLock<Box<[i8]>>),
    Byte(RwLock<Box<[i8]>>),
    Char(RwLock<Box<[u16]>>),
    Short(RwLock<Box<[i16]>>),
    Int(RwLock<Box<[i32]>>),
    Long(RwLock<Box<[i64]>>),
    Float(RwLock<Box<[f32]>>),
    Double(RwLock<Box<[f64]>>),
}

pub(crate) fn zeroed_slice<T: Default + Clone>(length: usize) -> VmResult<Box<[T]>> {
    let mut elements = Vec::new();
    elements.try_reserve_exact(length).map_err(|_| {
        Exception::runtime(
            OUT_OF_MEMORY_ERROR,
            format!("cannot allocate {length} elements"),
        )
    })?;
    elements.resize(length, T::default());
    Ok(elements.into_boxed_slice())
}

impl TypeArrayStorage {
    pub(crate) fn zeroed(element: ValueType, length: usize) -> VmResult<Self> {
        let storage = match element {
            ValueType::Boolean => TypeArrayStorage::Boolean(RwLock::new(zeroed_slice(length)?)),
            ValueType::Byte => TypeArrayStorage::Byte(RwLock::new(zeroed_slice(length)?)),
            ValueType::Char => TypeArrayStorage::Char(RwLock::new(zeroed_slice(length)?)),
            ValueType::Short => TypeArrayStorage::Short(RwLock::new(zeroed_slice(length)?)),
            ValueType::Int => TypeArrayStorage::Int(RwLock::new(zeroed_slice(length)?)),
            ValueType::Long => TypeArrayStorage::Long(RwLock::new(zeroed_slice(length)?)),
            ValueType::Float => TypeArrayStorage::Float(RwLock::new(zeroed_slice(length)?)),
            ValueType::Double => TypeArrayStorage::Double(RwLock::new(zeroed_slice(length)?)),
            other => {
                return Err(Exception::internal(format!(
                    "{other:?} is not a primitive array element type"
                )));
            }
        };
        Ok(storage)
    }

    pub fn len(&self) -> usize {
        match self {
            TypeArrayStorage::Boolean(e) | TypeArrayStorage::Byte(e) => e.read().len(),
            TypeArrayStorage::Char(e) => e.read().len(),
            TypeArrayStorage::Short(e) => e.read().len(),
            TypeArrayStorage::Int(e) => e.read().len(),
            TypeArrayStorage::Long(e) => e.read().len(),
            TypeArrayStorage::Float(e) => e.read().len(),
            TypeArrayStorage::Double(e) => e.read().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ValueType {
        match self {
            TypeArrayStorage::Boolean(_) => ValueType::Boolean,
            TypeArrayStorage::Byte(_) => ValueType::Byte,
            TypeArrayStorage::Char(_) => ValueType::Char,
            TypeArrayStorage::Short(_) => ValueType::Short,
            TypeArrayStorage::Int(_) => ValueType::Int,
            TypeArrayStorage::Long(_) => ValueType::Long,
            TypeArrayStorage::Float(_) => ValueType::Float,
            TypeArrayStorage::Double(_) => ValueType::Double,
        }
    }
}

/// Rust element types of primitive arrays. `read`/`write` return `None` when
/// the storage holds a different element type; bounds are checked by the
/// caller.
pub trait ArrayElement: Copy + Debug {
    fn read(storage: &TypeArrayStorage, index: usize) -> Option<Self>;
    fn write(storage: &TypeArrayStorage, index: usize, value: Self) -> Option<()>;
}

macro_rules! array_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ArrayElement for $ty {
                fn read(storage: &TypeArrayStorage, index: usize) -> Option<Self> {
                    match storage {
                        TypeArrayStorage::$variant(elements) => elements.read().get(index).copied(),
                        _ => None,
                    }
                }

                fn write(storage: &TypeArrayStorage, index: usize, value: Self) -> Option<()> {
                    match storage {
                        TypeArrayStorage::$variant(elements) => {
                            *elements.write().get_mut(index)? = value;
                            Some(())
                        }
                        _ => None,
                    }
                }
            }
        )*
    };
}

array_element! {
    u16 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
}

// baload/bastore serve both byte and boolean arrays
impl ArrayElement for i8 {
    fn read(storage: &TypeArrayStorage, index: usize) -> Option<Self> {
        match storage {
            TypeArrayStorage::Boolean(elements) | TypeArrayStorage::Byte(elements) => {
                elements.read().get(index).copied()
            }
            _ => None,
        }
    }

    fn write(storage: &TypeArrayStorage, index: usize, value: Self) -> Option<()> {
        match storage {
            TypeArrayStorage::Boolean(elements) => {
                *elements.write().get_mut(index)? = value & 1;
                Some(())
            }
            TypeArrayStorage::Byte(elements) => {
                *elements.write().get_mut(index)? = value;
                Some(())
            }
            _ => None,
        }
    }
}

fn check_index(index: i32, length: usize) -> VmResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < length)
        .ok_or_else(|| {
            Exception::runtime(
                ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION,
                format!("Index {index} out of bounds for length {length}"),
            )
        })
}

impl Object {
    pub(crate) fn new(klass: Arc<Klass>, body: ObjectBody) -> Self {
        Self { klass, body }
    }

    pub fn klass(&self) -> &Arc<Klass> {
        &self.klass
    }

    pub fn is_array(&self) -> bool {
        !matches!(self.body, ObjectBody::Instance { .. })
    }

    pub fn array_length(&self) -> Option<usize> {
        match &self.body {
            ObjectBody::Instance { .. } => None,
            ObjectBody::TypeArray(storage) => Some(storage.len()),
            ObjectBody::ObjectArray(elements) => Some(elements.read().len()),
        }
    }

    fn instance_fields(&self) -> VmResult<&RwLock<Box<[Value]>>> {
        match &self.body {
            ObjectBody::Instance { fields, .. } => Ok(fields),
            _ => Err(Exception::internal(format!(
                "{} has no instance fields",
                self.klass.name()
            ))),
        }
    }

    pub fn get_field(&self, field_id: &FieldId) -> VmResult<Value> {
        let field = field_id.require_field(|| format!("field of {}", self.klass.name()))?;
        let fields = self.instance_fields()?.read();
        let value = fields.get(field_id.offset()).ok_or_else(|| {
            Exception::internal(format!(
                "offset {} of {} is outside {}",
                field_id.offset(),
                field.identity(),
                self.klass.name()
            ))
        })?;
        if !value.fits(field.value_type()) {
            return Err(Exception::internal(format!(
                "{} holds a {} value",
                field.identity(),
                value.shape()
            )));
        }
        Ok(value.clone())
    }

    pub fn put_field(&self, field_id: &FieldId, value: Value) -> VmResult<()> {
        let field = field_id.require_field(|| format!("field of {}", self.klass.name()))?;
        if !value.fits(field.value_type()) {
            return Err(Exception::internal(format!(
                "cannot store a {} value into {}",
                value.shape(),
                field.identity()
            )));
        }
        let mut fields = self.instance_fields()?.write();
        let slot = fields.get_mut(field_id.offset()).ok_or_else(|| {
            Exception::internal(format!(
                "offset {} of {} is outside {}",
                field_id.offset(),
                field.identity(),
                self.klass.name()
            ))
        })?;
        *slot = value;
        Ok(())
    }

    fn type_array(&self) -> VmResult<&TypeArrayStorage> {
        match &self.body {
            ObjectBody::TypeArray(storage) => Ok(storage),
            _ => Err(Exception::runtime(
                CLASS_CAST_EXCEPTION,
                format!("{} is not a primitive array", self.klass.name()),
            )),
        }
    }

    fn object_array(&self) -> VmResult<&RwLock<Box<[Option<Oop>]>>> {
        match &self.body {
            ObjectBody::ObjectArray(elements) => Ok(elements),
            _ => Err(Exception::runtime(
                CLASS_CAST_EXCEPTION,
                format!("{} is not a reference array", self.klass.name()),
            )),
        }
    }

    pub fn get_element<T: ArrayElement>(&self, index: i32) -> VmResult<T> {
        let storage = self.type_array()?;
        let index = check_index(index, storage.len())?;
        T::read(storage, index).ok_or_else(|| self.element_mismatch::<T>(storage))
    }

    pub fn put_element<T: ArrayElement>(&self, index: i32, value: T) -> VmResult<()> {
        let storage = self.type_array()?;
        let index = check_index(index, storage.len())?;
        T::write(storage, index, value).ok_or_else(|| self.element_mismatch::<T>(storage))
    }

    fn element_mismatch<T>(&self, storage: &TypeArrayStorage) -> Exception {
        Exception::runtime(
            CLASS_CAST_EXCEPTION,
            format!(
                "{} holds {:?} elements, not {}",
                self.klass.name(),
                storage.element_type(),
                std::any::type_name::<T>()
            ),
        )
    }

    pub fn get_reference_element(&self, index: i32) -> VmResult<Option<Oop>> {
        let elements = self.object_array()?.read();
        let index = check_index(index, elements.len())?;
        Ok(elements[index].clone())
    }

    pub fn put_reference_element(&self, index: i32, value: Option<Oop>) -> VmResult<()> {
        let mut elements = self.object_array()?.write();
        let index = check_index(index, elements.len())?;
        elements[index] = value;
        Ok(())
    }

    /// Content of an interned `java/lang/String`.
    pub fn string_value(&self) -> Option<&str> {
        match &self.body {
            ObjectBody::Instance {
                injected: Injected::StringValue(value),
                ..
            } => Some(value),
            _ => None,
        }
    }

    /// The class a `java/lang/Class` instance stands for.
    pub fn mirror_target(&self) -> Option<Arc<Klass>> {
        match &self.body {
            ObjectBody::Instance {
                injected: Injected::ClassMirror(target),
                ..
            } => target.upgrade(),
            _ => None,
        }
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Object");
        s.field("klass", &self.klass.name());
        if let Some(length) = self.array_length() {
            s.field("length", &length);
        }
        if let Some(value) = self.string_value() {
            s.field("value", &value);
        }
        s.finish()
    }
}

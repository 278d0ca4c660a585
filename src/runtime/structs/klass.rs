use std::{
    collections::HashMap,
    fmt::{self, Debug},
    sync::{Arc, Weak},
};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::{
    class::ClassFile,
    consts::ClassAccessFlag,
    descriptor::ValueType,
    runtime::{
        ClassAttributes, ClassLoader, Exception, Field, FieldId, Method, Oop,
        RuntimeConstantPool, Value, VmResult, famous_classes::CLASS_FORMAT_ERROR,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassState {
    Allocated,
    Linked,
    BeingInitialized,
    FullyInitialized,
    InitializationError,
}

impl ClassState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClassState::FullyInitialized | ClassState::InitializationError
        )
    }

    fn can_advance_to(self, next: ClassState) -> bool {
        if next == ClassState::InitializationError {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (ClassState::Allocated, ClassState::Linked)
                | (ClassState::Linked, ClassState::BeingInitialized)
                | (ClassState::BeingInitialized, ClassState::FullyInitialized)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassType {
    InstanceClass,
    TypeArrayClass,
    ObjectArrayClass,
}

/// A loaded type. The variant-specific part lives in [`KlassKind`]; inspect
/// [`Klass::class_type`] or use the `as_*` accessors before touching it.
pub struct Klass {
    name: Arc<str>,
    access_flags: ClassAccessFlag,
    // None for the bootstrap loader
    loader: Option<Weak<dyn ClassLoader>>,
    state: Mutex<ClassState>,
    pub(crate) init_lock: ReentrantMutex<()>,
    mirror: OnceCell<Oop>,
    kind: KlassKind,
}

pub enum KlassKind {
    Instance(InstanceKlass),
    TypeArray(TypeArrayKlass),
    ObjectArray(ObjectArrayKlass),
}

impl Klass {
    /// Wraps a parsed class file into a class in `Allocated` state. Nothing
    /// is resolved until [`crate::runtime::link_and_init`] runs.
    pub(crate) fn allocate_instance(
        class_file: Arc<ClassFile>,
        loader: Option<Weak<dyn ClassLoader>>,
    ) -> VmResult<Arc<Klass>> {
        let name = class_file
            .this_class_name()
            .ok_or_else(|| Exception::linkage(CLASS_FORMAT_ERROR, "invalid this_class entry"))?;
        let access_flags = class_file.access_flags;
        Ok(Arc::new_cyclic(|this| Klass {
            name,
            access_flags,
            loader,
            state: Mutex::new(ClassState::Allocated),
            init_lock: ReentrantMutex::new(()),
            mirror: OnceCell::new(),
            kind: KlassKind::Instance(InstanceKlass::new(this.clone(), class_file)),
        }))
    }

    pub(crate) fn new_type_array(
        element_type: ValueType,
        super_class: Arc<Klass>,
        interfaces: Vec<Arc<Klass>>,
    ) -> VmResult<Arc<Klass>> {
        let descriptor = element_type.primitive_descriptor().ok_or_else(|| {
            Exception::internal(format!("{element_type:?} arrays are not primitive arrays"))
        })?;
        Ok(Arc::new(Klass {
            name: Arc::from(format!("[{descriptor}")),
            access_flags: ClassAccessFlag::PUBLIC | ClassAccessFlag::FINAL | ClassAccessFlag::ABSTRACT,
            loader: None,
            state: Mutex::new(ClassState::FullyInitialized),
            init_lock: ReentrantMutex::new(()),
            mirror: OnceCell::new(),
            kind: KlassKind::TypeArray(TypeArrayKlass {
                element_type,
                super_class,
                interfaces,
            }),
        }))
    }

    pub(crate) fn new_object_array(
        component: Arc<Klass>,
        super_class: Arc<Klass>,
        interfaces: Vec<Arc<Klass>>,
    ) -> Arc<Klass> {
        let name = if component.is_array() {
            format!("[{}", component.name)
        } else {
            format!("[L{};", component.name)
        };
        let access_flags = (component.access_flags & ClassAccessFlag::PUBLIC)
            | ClassAccessFlag::FINAL
            | ClassAccessFlag::ABSTRACT;
        Arc::new(Klass {
            name: Arc::from(name),
            access_flags,
            loader: component.loader.clone(),
            state: Mutex::new(ClassState::FullyInitialized),
            init_lock: ReentrantMutex::new(()),
            mirror: OnceCell::new(),
            kind: KlassKind::ObjectArray(ObjectArrayKlass {
                dimension: component.dimension() + 1,
                component,
                super_class,
                interfaces,
            }),
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn access_flags(&self) -> ClassAccessFlag {
        self.access_flags
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::INTERFACE)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::FINAL)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::ABSTRACT)
    }

    pub fn class_type(&self) -> ClassType {
        match self.kind {
            KlassKind::Instance(_) => ClassType::InstanceClass,
            KlassKind::TypeArray(_) => ClassType::TypeArrayClass,
            KlassKind::ObjectArray(_) => ClassType::ObjectArrayClass,
        }
    }

    pub fn kind(&self) -> &KlassKind {
        &self.kind
    }

    pub fn is_array(&self) -> bool {
        !matches!(self.kind, KlassKind::Instance(_))
    }

    pub fn as_instance(&self) -> Option<&InstanceKlass> {
        match &self.kind {
            KlassKind::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn require_instance(&self) -> VmResult<&InstanceKlass> {
        self.as_instance().ok_or_else(|| {
            Exception::internal(format!("{} is not an instance class", self.name))
        })
    }

    pub fn as_type_array(&self) -> Option<&TypeArrayKlass> {
        match &self.kind {
            KlassKind::TypeArray(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object_array(&self) -> Option<&ObjectArrayKlass> {
        match &self.kind {
            KlassKind::ObjectArray(array) => Some(array),
            _ => None,
        }
    }

    /// Defining loader; `None` means the bootstrap loader.
    pub fn class_loader(&self) -> Option<Arc<dyn ClassLoader>> {
        self.loader.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn loader_ref(&self) -> Option<&Weak<dyn ClassLoader>> {
        self.loader.as_ref()
    }

    pub fn super_class(&self) -> Option<Arc<Klass>> {
        match &self.kind {
            KlassKind::Instance(instance) => instance.super_class(),
            KlassKind::TypeArray(array) => Some(Arc::clone(&array.super_class)),
            KlassKind::ObjectArray(array) => Some(Arc::clone(&array.super_class)),
        }
    }

    /// Directly implemented interfaces.
    pub fn interfaces(&self) -> &[Arc<Klass>] {
        match &self.kind {
            KlassKind::Instance(instance) => instance.declared_interfaces(),
            KlassKind::TypeArray(array) => &array.interfaces,
            KlassKind::ObjectArray(array) => &array.interfaces,
        }
    }

    /// Number of array dimensions, 0 for instance classes.
    pub fn dimension(&self) -> usize {
        match &self.kind {
            KlassKind::Instance(_) => 0,
            KlassKind::TypeArray(_) => 1,
            KlassKind::ObjectArray(array) => array.dimension,
        }
    }

    /// Element type of an object array, i.e. the type one dimension down.
    pub fn component_type(&self) -> Option<&Arc<Klass>> {
        self.as_object_array().map(|array| &array.component)
    }

    pub fn state(&self) -> ClassState {
        *self.state.lock()
    }

    /// Moves the class one step forward. Skipping a state or moving back is
    /// an internal error.
    pub(crate) fn transition(&self, next: ClassState) -> VmResult<()> {
        let mut state = self.state.lock();
        if !state.can_advance_to(next) {
            return Err(Exception::internal(format!(
                "{}: illegal state transition {:?} -> {next:?}",
                self.name, *state
            )));
        }
        *state = next;
        Ok(())
    }

    pub(crate) fn mark_initialization_error(&self) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = ClassState::InitializationError;
        }
    }

    pub fn mirror(&self) -> Option<&Oop> {
        self.mirror.get()
    }

    /// Returns false if a mirror was already installed.
    pub(crate) fn set_mirror(&self, mirror: Oop) -> bool {
        self.mirror.set(mirror).is_ok()
    }
}

impl Debug for Klass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Klass")
            .field("name", &self.name)
            .field("type", &self.class_type())
            .field("state", &self.state())
            .finish()
    }
}

pub struct TypeArrayKlass {
    element_type: ValueType,
    super_class: Arc<Klass>,
    interfaces: Vec<Arc<Klass>>,
}

impl TypeArrayKlass {
    pub fn element_type(&self) -> ValueType {
        self.element_type
    }
}

pub struct ObjectArrayKlass {
    component: Arc<Klass>,
    dimension: usize,
    super_class: Arc<Klass>,
    interfaces: Vec<Arc<Klass>>,
}

impl ObjectArrayKlass {
    pub fn component(&self) -> &Arc<Klass> {
        &self.component
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

pub struct InstanceKlass {
    this: Weak<Klass>,
    class_file: Arc<ClassFile>,
    constant_pool: RuntimeConstantPool,
    linkage: OnceCell<Linkage>,
}

/// Everything the linker computes. Set once, when the class becomes `Linked`.
pub(crate) struct Linkage {
    pub(crate) super_class: Option<Arc<Klass>>,
    pub(crate) declared_interfaces: Vec<Arc<Klass>>,
    // declared interfaces and their superinterfaces
    pub(crate) interfaces: HashMap<Arc<str>, Arc<Klass>>,
    pub(crate) methods: HashMap<String, Arc<Method>>,
    pub(crate) vtable: HashMap<String, Arc<Method>>,
    pub(crate) pftable: HashMap<String, Arc<Method>>,
    pub(crate) stable: HashMap<String, Arc<Method>>,
    // index == offset
    pub(crate) instance_fields: Vec<FieldId>,
    pub(crate) instance_field_index: HashMap<String, usize>,
    pub(crate) static_fields: HashMap<String, FieldId>,
    pub(crate) static_values: RwLock<Box<[Value]>>,
    pub(crate) attributes: ClassAttributes,
}

impl InstanceKlass {
    fn new(this: Weak<Klass>, class_file: Arc<ClassFile>) -> Self {
        Self {
            constant_pool: RuntimeConstantPool::new(this.clone()),
            this,
            class_file,
            linkage: OnceCell::new(),
        }
    }

    pub fn class_file(&self) -> &Arc<ClassFile> {
        &self.class_file
    }

    pub fn constant_pool(&self) -> &RuntimeConstantPool {
        &self.constant_pool
    }

    pub(crate) fn this_klass(&self) -> VmResult<Arc<Klass>> {
        self.this
            .upgrade()
            .ok_or_else(|| Exception::internal("instance class outlived its Klass"))
    }

    pub(crate) fn this_weak(&self) -> &Weak<Klass> {
        &self.this
    }

    pub fn is_linked(&self) -> bool {
        self.linkage.get().is_some()
    }

    pub(crate) fn set_linkage(&self, linkage: Linkage) -> VmResult<()> {
        self.linkage
            .set(linkage)
            .map_err(|_| Exception::internal("class linked twice"))
    }

    fn linked(&self) -> VmResult<&Linkage> {
        self.linkage
            .get()
            .ok_or_else(|| Exception::internal("class is not linked"))
    }

    pub fn super_class(&self) -> Option<Arc<Klass>> {
        self.linkage.get()?.super_class.clone()
    }

    pub fn declared_interfaces(&self) -> &[Arc<Klass>] {
        self.linkage
            .get()
            .map(|linkage| linkage.declared_interfaces.as_slice())
            .unwrap_or_default()
    }

    pub fn get_interface(&self, name: &str) -> Option<Arc<Klass>> {
        self.linkage.get()?.interfaces.get(name).cloned()
    }

    /// Every interface this class implements, directly or through its
    /// superclasses and superinterfaces.
    pub fn all_interfaces(&self) -> impl Iterator<Item = &Arc<Klass>> {
        self.linkage
            .get()
            .into_iter()
            .flat_map(|linkage| linkage.interfaces.values())
    }

    /// Any method declared by this class, looked up by name and descriptor.
    pub fn get_this_class_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        let key = Method::make_identity(name, descriptor);
        self.linkage.get()?.methods.get(&key).cloned()
    }

    pub fn get_virtual_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        let key = Method::make_identity(name, descriptor);
        self.linkage.get()?.vtable.get(&key).cloned()
    }

    pub fn get_non_virtual_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        let key = Method::make_identity(name, descriptor);
        self.linkage.get()?.pftable.get(&key).cloned()
    }

    pub fn get_static_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        let key = Method::make_identity(name, descriptor);
        self.linkage.get()?.stable.get(&key).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<Method>> {
        self.linkage
            .get()
            .into_iter()
            .flat_map(|linkage| linkage.methods.values())
    }

    pub fn vtable(&self) -> impl Iterator<Item = (&String, &Arc<Method>)> {
        self.linkage
            .get()
            .into_iter()
            .flat_map(|linkage| linkage.vtable.iter())
    }

    /// Method resolution: declared methods, then the superclass chain, then
    /// superinterfaces.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        let key = Method::make_identity(name, descriptor);
        self.find_class_method(&key)
            .or_else(|| self.find_interface_method(&key))
    }

    fn find_class_method(&self, key: &str) -> Option<Arc<Method>> {
        let linkage = self.linkage.get()?;
        if let Some(method) = linkage.methods.get(key) {
            return Some(Arc::clone(method));
        }
        linkage
            .super_class
            .as_ref()?
            .as_instance()?
            .find_class_method(key)
    }

    fn find_interface_method(&self, key: &str) -> Option<Arc<Method>> {
        let linkage = self.linkage.get()?;
        for interface in &linkage.declared_interfaces {
            let Some(interface) = interface.as_instance() else {
                continue;
            };
            if let Some(method) = interface.linkage.get().and_then(|l| l.methods.get(key)) {
                return Some(Arc::clone(method));
            }
            if let Some(method) = interface.find_interface_method(key) {
                return Some(method);
            }
        }
        linkage
            .super_class
            .as_ref()?
            .as_instance()?
            .find_interface_method(key)
    }

    pub fn get_instance_field(&self, class_name: &str, name: &str, descriptor: &str) -> FieldId {
        let Some(linkage) = self.linkage.get() else {
            return FieldId::not_found();
        };
        let key = Field::make_identity(class_name, name, descriptor);
        linkage
            .instance_field_index
            .get(&key)
            .map_or_else(FieldId::not_found, |&offset| {
                linkage.instance_fields[offset].clone()
            })
    }

    pub fn get_static_field(&self, class_name: &str, name: &str, descriptor: &str) -> FieldId {
        let Some(linkage) = self.linkage.get() else {
            return FieldId::not_found();
        };
        let key = Field::make_identity(class_name, name, descriptor);
        linkage
            .static_fields
            .get(&key)
            .cloned()
            .unwrap_or_else(FieldId::not_found)
    }

    /// A field declared by this class: instance fields first, then statics.
    pub fn get_this_class_field(&self, name: &str, descriptor: &str) -> FieldId {
        let Some(this) = self.this.upgrade() else {
            return FieldId::not_found();
        };
        let field = self.get_instance_field(this.name(), name, descriptor);
        if field.is_found() {
            return field;
        }
        self.get_static_field(this.name(), name, descriptor)
    }

    /// Field resolution: declared fields, then superinterfaces, then the
    /// superclass chain.
    pub fn find_field(&self, name: &str, descriptor: &str) -> FieldId {
        let field = self.get_this_class_field(name, descriptor);
        if field.is_found() {
            return field;
        }
        let Some(linkage) = self.linkage.get() else {
            return FieldId::not_found();
        };
        for interface in &linkage.declared_interfaces {
            if let Some(interface) = interface.as_instance() {
                let field = interface.find_field(name, descriptor);
                if field.is_found() {
                    return field;
                }
            }
        }
        linkage
            .super_class
            .as_ref()
            .and_then(|super_class| super_class.as_instance())
            .map_or_else(FieldId::not_found, |super_class| {
                super_class.find_field(name, descriptor)
            })
    }

    /// Instance fields ordered by offset, inherited ones first.
    pub fn instance_fields(&self) -> &[FieldId] {
        self.linkage
            .get()
            .map(|linkage| linkage.instance_fields.as_slice())
            .unwrap_or_default()
    }

    pub fn static_fields(&self) -> impl Iterator<Item = &FieldId> {
        self.linkage
            .get()
            .into_iter()
            .flat_map(|linkage| linkage.static_fields.values())
    }

    fn static_field_slot<'a>(&self, field_id: &'a FieldId) -> VmResult<(&'a Arc<Field>, usize)> {
        let field = field_id.require_field(|| "static field".to_string())?;
        let this = self.this_klass()?;
        if !field.is_static() || field.owner_name() != this.name() {
            return Err(Exception::internal(format!(
                "{} is not a static field of {}",
                field.identity(),
                this.name()
            )));
        }
        Ok((field, field_id.offset()))
    }

    pub fn get_static_value(&self, field_id: &FieldId) -> VmResult<Value> {
        let (field, offset) = self.static_field_slot(field_id)?;
        let values = self.linked()?.static_values.read();
        let value = values
            .get(offset)
            .ok_or_else(|| Exception::internal(format!("no static slot for {}", field.identity())))?;
        if !value.fits(field.value_type()) {
            return Err(Exception::internal(format!(
                "{} holds a {} value",
                field.identity(),
                value.shape()
            )));
        }
        Ok(value.clone())
    }

    pub fn set_static_value(&self, field_id: &FieldId, value: Value) -> VmResult<()> {
        let (field, offset) = self.static_field_slot(field_id)?;
        if !value.fits(field.value_type()) {
            return Err(Exception::internal(format!(
                "cannot store a {} value into {}",
                value.shape(),
                field.identity()
            )));
        }
        let mut values = self.linked()?.static_values.write();
        let slot = values
            .get_mut(offset)
            .ok_or_else(|| Exception::internal(format!("no static slot for {}", field.identity())))?;
        *slot = value;
        Ok(())
    }

    pub fn attributes(&self) -> Option<&ClassAttributes> {
        self.linkage.get().map(|linkage| &linkage.attributes)
    }
}

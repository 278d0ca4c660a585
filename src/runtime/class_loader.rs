use std::{
    fmt::Debug,
    sync::{Arc, Weak},
    thread::{self, ThreadId},
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::{
    descriptor::{FieldType, ValueType, parse_field_descriptor},
    runtime::{
        Exception, Klass, Runtime, VmResult,
        famous_classes::{
            CLASS_CIRCULARITY_ERROR, CLONEABLE_CLASS, LINKAGE_ERROR, NO_CLASS_DEF_FOUND_ERROR,
            OBJECT_CLASS, SERIALIZABLE_CLASS,
        },
        heap::ensure_mirror,
        linker,
    },
};

mod bootstrap;
mod source;

pub use bootstrap::BootstrapClassLoader;
pub use source::*;

pub trait ClassLoader: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Loads `name`, delegating as the loader sees fit. `Ok(None)` means no
    /// loader in the chain knows the class.
    fn load_class(&self, runtime: &Runtime, name: &str) -> VmResult<Option<Arc<Klass>>>;

    /// Classes this loader defined.
    fn directory(&self) -> &ClassDirectory;

    fn parent(&self) -> Option<Arc<dyn ClassLoader>> {
        None
    }
}

/// `None` is the bootstrap loader.
pub fn load_class(
    loader: Option<&dyn ClassLoader>,
    runtime: &Runtime,
    name: &str,
) -> VmResult<Option<Arc<Klass>>> {
    match loader {
        Some(loader) => loader.load_class(runtime, name),
        None => runtime.bootstrap_loader().load_class(runtime, name),
    }
}

/// Like [`load_class`], but a missing class is a `NoClassDefFoundError`.
pub fn require_class(
    loader: Option<&dyn ClassLoader>,
    runtime: &Runtime,
    name: &str,
) -> VmResult<Arc<Klass>> {
    load_class(loader, runtime, name)?
        .ok_or_else(|| Exception::linkage(NO_CLASS_DEF_FOUND_ERROR, name.to_string()))
}

/// Name to class registry of one loader. A class shows up here only once its
/// definer has returned, i.e. after linking.
#[derive(Debug, Default)]
pub struct ClassDirectory {
    classes: DashMap<String, Arc<OnceCell<Option<Arc<Klass>>>>>,
    in_progress: DashMap<String, ThreadId>,
}

impl ClassDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, name: &str) -> Arc<OnceCell<Option<Arc<Klass>>>> {
        Arc::clone(self.classes.entry(name.to_string()).or_default().value())
    }

    pub fn find(&self, name: &str) -> Option<Arc<Klass>> {
        self.classes
            .get(name)
            .and_then(|cell| cell.get().cloned().flatten())
    }

    pub fn register(&self, klass: Arc<Klass>) -> VmResult<Arc<Klass>> {
        let cell = self.cell(klass.name());
        match cell.get_or_init(|| Some(Arc::clone(&klass))) {
            Some(registered) if Arc::ptr_eq(registered, &klass) => Ok(klass),
            _ => Err(Exception::linkage(
                LINKAGE_ERROR,
                format!("duplicate class definition for {}", klass.name()),
            )),
        }
    }

    /// Runs `define` at most once per name; concurrent callers for the same
    /// name wait for the winner. Re-entering from the defining thread is a
    /// `ClassCircularityError`.
    pub fn get_or_define(
        &self,
        name: &str,
        define: impl FnOnce() -> VmResult<Option<Arc<Klass>>>,
    ) -> VmResult<Option<Arc<Klass>>> {
        let cell = self.cell(name);
        if let Some(klass) = cell.get() {
            return Ok(klass.clone());
        }
        let current = thread::current().id();
        if self
            .in_progress
            .get(name)
            .is_some_and(|owner| *owner == current)
        {
            return Err(Exception::linkage(CLASS_CIRCULARITY_ERROR, name.to_string()));
        }
        cell.get_or_try_init(|| {
            self.in_progress.insert(name.to_string(), current);
            let defined = define();
            self.in_progress.remove(name);
            defined
        })
        .cloned()
    }

    pub fn classes(&self) -> Vec<Arc<Klass>> {
        self.classes
            .iter()
            .filter_map(|entry| entry.value().get().cloned().flatten())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.classes
            .iter()
            .filter(|entry| matches!(entry.value().get(), Some(Some(_))))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.classes.clear();
        self.in_progress.clear();
    }
}

/// A user-level loader over one class source. Parent first: the parent (or
/// the bootstrap loader) is asked before this loader's own source.
#[derive(Debug)]
pub struct DelegatingClassLoader {
    this: Weak<DelegatingClassLoader>,
    name: String,
    parent: Option<Arc<dyn ClassLoader>>,
    source: Box<dyn ClassSource>,
    directory: ClassDirectory,
}

impl DelegatingClassLoader {
    pub fn new(
        name: impl Into<String>,
        parent: Option<Arc<dyn ClassLoader>>,
        source: Box<dyn ClassSource>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name,
            parent,
            source,
            directory: ClassDirectory::new(),
        })
    }

    pub fn find_loaded_class(&self, name: &str) -> Option<Arc<Klass>> {
        self.directory.find(name)
    }

    fn define_class(&self, runtime: &Runtime, name: &str) -> VmResult<Option<Arc<Klass>>> {
        let Some(class_file) = self.source.find_class_file(name)? else {
            return Ok(None);
        };
        let loader: Weak<dyn ClassLoader> = self.this.clone();
        linker::define_instance_class(runtime, name, class_file, Some(loader)).map(Some)
    }
}

impl ClassLoader for DelegatingClassLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_class(&self, runtime: &Runtime, name: &str) -> VmResult<Option<Arc<Klass>>> {
        if let Some(klass) = self.directory.find(name) {
            return Ok(Some(klass));
        }
        if name.starts_with('[') {
            return load_array_class(Some(self as &dyn ClassLoader), runtime, name);
        }
        if let Some(klass) = load_class(self.parent.as_deref(), runtime, name)? {
            return Ok(Some(klass));
        }
        self.directory
            .get_or_define(name, || self.define_class(runtime, name))
    }

    fn directory(&self) -> &ClassDirectory {
        &self.directory
    }

    fn parent(&self) -> Option<Arc<dyn ClassLoader>> {
        self.parent.clone()
    }
}

/// Resolves an array class name. The component is loaded through
/// `initiating`; the array itself is defined by the component's loader.
pub(crate) fn load_array_class(
    initiating: Option<&dyn ClassLoader>,
    runtime: &Runtime,
    name: &str,
) -> VmResult<Option<Arc<Klass>>> {
    let (_, descriptor) = parse_field_descriptor(name).map_err(|_| {
        Exception::linkage(
            NO_CLASS_DEF_FOUND_ERROR,
            format!("invalid array class name {name}"),
        )
    })?;
    let FieldType::Array(component) = descriptor.into_field_type() else {
        return Err(Exception::internal(format!("{name} is not an array class")));
    };
    let component = match component.as_ref() {
        FieldType::Object(class_name) => load_class(initiating, runtime, class_name)?,
        FieldType::Array(_) => load_class(initiating, runtime, &component.to_descriptor())?,
        primitive => {
            return runtime
                .bootstrap_loader()
                .primitive_array_class(runtime, primitive.value_type())
                .map(Some);
        }
    };
    component
        .map(|component| object_array_class(runtime, &component))
        .transpose()
}

/// The array class whose elements are `component`, defined by the
/// component's loader.
pub(crate) fn object_array_class(runtime: &Runtime, component: &Arc<Klass>) -> VmResult<Arc<Klass>> {
    let name = if component.is_array() {
        format!("[{}", component.name())
    } else {
        format!("[L{};", component.name())
    };
    let define = || -> VmResult<Option<Arc<Klass>>> {
        let (super_class, interfaces) = array_supertypes(runtime)?;
        let klass = Klass::new_object_array(Arc::clone(component), super_class, interfaces);
        ensure_mirror(runtime, &klass)?;
        Ok(Some(klass))
    };
    let defining = component.class_loader();
    let directory = match &defining {
        Some(loader) => loader.directory(),
        None => runtime.bootstrap_loader().directory(),
    };
    directory
        .get_or_define(&name, define)?
        .ok_or_else(|| Exception::internal(format!("array class {name} was not defined")))
}

/// `[Z [C [F [D [B [S [I [J`, always defined by the bootstrap loader.
pub(crate) fn define_type_array_class(
    runtime: &Runtime,
    element_type: ValueType,
) -> VmResult<Arc<Klass>> {
    let (super_class, interfaces) = array_supertypes(runtime)?;
    let klass = Klass::new_type_array(element_type, super_class, interfaces)?;
    ensure_mirror(runtime, &klass)?;
    Ok(klass)
}

fn array_supertypes(runtime: &Runtime) -> VmResult<(Arc<Klass>, Vec<Arc<Klass>>)> {
    let object = require_class(None, runtime, OBJECT_CLASS)?;
    let mut interfaces = Vec::with_capacity(2);
    for name in [CLONEABLE_CLASS, SERIALIZABLE_CLASS] {
        if let Some(interface) = load_class(None, runtime, name)? {
            interfaces.push(interface);
        }
    }
    Ok((object, interfaces))
}

use std::sync::Arc;

use log::trace;

use crate::{
    descriptor::ValueType,
    runtime::{
        ClassDirectory, ClassLoader, ClassSource, Exception, Klass, Runtime, VmResult,
        class_loader::{define_type_array_class, load_array_class},
        linker,
    },
};

/// The terminal loader: no parent, reads from the class path and defines
/// every primitive array class.
#[derive(Debug)]
pub struct BootstrapClassLoader {
    sources: Vec<Box<dyn ClassSource>>,
    directory: ClassDirectory,
}

impl BootstrapClassLoader {
    pub(crate) fn new(sources: Vec<Box<dyn ClassSource>>) -> Self {
        Self {
            sources,
            directory: ClassDirectory::new(),
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &dyn ClassSource> {
        self.sources.iter().map(Box::as_ref)
    }

    pub fn find_loaded_class(&self, name: &str) -> Option<Arc<Klass>> {
        self.directory.find(name)
    }

    pub fn classes(&self) -> Vec<Arc<Klass>> {
        self.directory.classes()
    }

    pub fn primitive_array_class(
        &self,
        runtime: &Runtime,
        element_type: ValueType,
    ) -> VmResult<Arc<Klass>> {
        let descriptor = element_type.primitive_descriptor().ok_or_else(|| {
            Exception::internal(format!("{element_type:?} has no primitive array class"))
        })?;
        let name = format!("[{descriptor}");
        self.directory
            .get_or_define(&name, || {
                define_type_array_class(runtime, element_type).map(Some)
            })?
            .ok_or_else(|| Exception::internal(format!("array class {name} was not defined")))
    }

    fn define_class(&self, runtime: &Runtime, name: &str) -> VmResult<Option<Arc<Klass>>> {
        for source in &self.sources {
            if let Some(class_file) = source.find_class_file(name)? {
                trace!("found {name} in {}", source.name());
                return linker::define_instance_class(runtime, name, class_file, None).map(Some);
            }
        }
        Ok(None)
    }

    pub(crate) fn clear(&self) {
        self.directory.clear();
    }
}

impl ClassLoader for BootstrapClassLoader {
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn load_class(&self, runtime: &Runtime, name: &str) -> VmResult<Option<Arc<Klass>>> {
        if let Some(klass) = self.directory.find(name) {
            return Ok(Some(klass));
        }
        if name.starts_with('[') {
            return load_array_class(None, runtime, name);
        }
        self.directory
            .get_or_define(name, || self.define_class(runtime, name))
    }

    fn directory(&self) -> &ClassDirectory {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runtime::{ClassState, famous_classes::OBJECT_CLASS},
        test_support::test_runtime,
    };

    #[test]
    fn test_bootstrap_preloads_core_classes() {
        let runtime = test_runtime();
        let loader = runtime.bootstrap_loader();
        let object = loader.find_loaded_class(OBJECT_CLASS).unwrap();
        assert!(object.super_class().is_none());
        assert_eq!(object.state(), ClassState::Linked);
        assert!(loader.classes().len() >= 3);
    }

    #[test]
    fn test_primitive_array_classes_are_shared() {
        let runtime = test_runtime();
        let loader = runtime.bootstrap_loader();
        let bytes = loader.primitive_array_class(&runtime, ValueType::Byte).unwrap();
        assert_eq!(bytes.name().as_ref(), "[B");
        let again = loader.load_class(&runtime, "[B").unwrap().unwrap();
        assert!(Arc::ptr_eq(&bytes, &again));
        assert!(
            loader
                .primitive_array_class(&runtime, ValueType::Object)
                .unwrap_err()
                .is_internal()
        );
    }
}

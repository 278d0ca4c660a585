mod class_loader;
mod config;
pub mod famous_classes;
mod heap;
mod inheritance;
mod interpreter;
mod linker;
mod structs;

use log::{debug, info};

pub use class_loader::*;
pub use config::VmOptions;
pub use heap::{Heap, StringTable, ensure_mirror};
pub use inheritance::*;
pub use interpreter::*;
pub use linker::link_and_init;
pub use structs::*;

use famous_classes::{CLASS_CLASS, OBJECT_CLASS, STRING_CLASS};

/// Process-scoped VM state. Created once by the embedder and passed by
/// reference to every loading, linking and execution call.
#[derive(Debug)]
pub struct Runtime {
    options: VmOptions,
    bootstrap: BootstrapClassLoader,
    heap: Heap,
    string_table: StringTable,
}

impl Runtime {
    /// Builds the bootstrap class path from `options.class_path`.
    pub fn new(options: VmOptions) -> VmResult<Runtime> {
        let sources = sources_from_class_path(&options.class_path)?;
        Ok(Self::with_sources(options, sources))
    }

    pub fn with_sources(options: VmOptions, sources: Vec<Box<dyn ClassSource>>) -> Runtime {
        Runtime {
            options,
            bootstrap: BootstrapClassLoader::new(sources),
            heap: Heap::new(),
            string_table: StringTable::new(),
        }
    }

    /// Loads the classes everything else depends on. `java/lang/Class` comes
    /// last so the classes before it get their mirrors fixed up in one go.
    pub fn bootstrap(&self) -> VmResult<()> {
        for name in [OBJECT_CLASS, STRING_CLASS, CLASS_CLASS] {
            require_class(None, self, name)?;
        }
        let loaded = self.bootstrap.classes().len();
        if self.options.verbose_class_loading {
            info!("bootstrap complete, {loaded} classes loaded");
        } else {
            debug!("bootstrap complete, {loaded} classes loaded");
        }
        Ok(())
    }

    pub fn bootstrap_loader(&self) -> &BootstrapClassLoader {
        &self.bootstrap
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Drops every bootstrap class and interned string. Classes already
    /// handed out stay usable but are no longer found by name.
    pub fn shutdown(&self) {
        self.bootstrap.clear();
        self.string_table.clear();
        debug!("runtime shut down");
    }
}

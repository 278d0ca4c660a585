use std::sync::Arc;

use log::trace;

use crate::runtime::{Klass, Runtime, VmResult, famous_classes::CLASS_CLASS};

/// Gives `klass` its `java/lang/Class` instance. Before `java/lang/Class`
/// itself is defined this does nothing; defining it fixes up every class the
/// bootstrap loader has seen so far. Classes of other loaders defined that
/// early get their mirror on the next call, e.g. from `load_constant`.
pub fn ensure_mirror(runtime: &Runtime, klass: &Arc<Klass>) -> VmResult<()> {
    if klass.mirror().is_some() {
        return Ok(());
    }
    if klass.name().as_ref() == CLASS_CLASS && klass.loader_ref().is_none() {
        install_mirror(runtime, klass, klass)?;
        for loaded in runtime.bootstrap_loader().classes() {
            if loaded.mirror().is_none() {
                install_mirror(runtime, klass, &loaded)?;
            }
        }
        return Ok(());
    }
    let Some(class_class) = runtime.bootstrap_loader().find_loaded_class(CLASS_CLASS) else {
        return Ok(());
    };
    install_mirror(runtime, &class_class, klass)
}

fn install_mirror(runtime: &Runtime, class_class: &Arc<Klass>, target: &Arc<Klass>) -> VmResult<()> {
    let mirror = runtime.heap().allocate_mirror(class_class, target)?;
    if target.set_mirror(mirror) {
        trace!("installed mirror for {}", target.name());
    }
    Ok(())
}

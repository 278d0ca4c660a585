mod frame;
mod invocation;

use std::sync::Arc;

use log::debug;
use paste::paste;

pub use frame::*;
pub use invocation::*;

use crate::{
    consts::{ConstantTag, T_BOOLEAN, T_BYTE, T_CHAR, T_DOUBLE, T_FLOAT, T_INT, T_LONG, T_SHORT},
    descriptor::ValueType,
    runtime::{
        ClassState, Exception, FieldId, Klass, KlassKind, Method, Oop, RuntimeConstantPool, Value,
        VmResult,
        famous_classes::{
            ABSTRACT_METHOD_ERROR, ARRAY_STORE_EXCEPTION, CLASS_CAST_EXCEPTION,
            EXCEPTION_IN_INITIALIZER_ERROR, INCOMPATIBLE_CLASS_CHANGE_ERROR, INSTANTIATION_ERROR,
            NEGATIVE_ARRAY_SIZE_EXCEPTION, NO_CLASS_DEF_FOUND_ERROR, NO_SUCH_METHOD_ERROR,
            NULL_POINTER_EXCEPTION, VERIFY_ERROR,
        },
        ensure_mirror, is_assignable, require_class,
    },
};

const CLASS_INITIALIZER: (&str, &str) = ("<clinit>", "()V");
const DEFAULT_CONSTRUCTOR: (&str, &str) = ("<init>", "()V");

/// Runs the static initializer of `klass` once, superclasses first.
///
/// Initialization is serialized per class. A thread that re-enters while its
/// own initializer is running sees the class as in progress and returns; any
/// other thread waits for the initializer to finish. A failed initializer
/// leaves the class unusable: the first caller gets the failure wrapped in
/// `ExceptionInInitializerError`, later ones a `NoClassDefFoundError`.
pub fn initialize_class(env: VmEnv<'_>, klass: &Arc<Klass>) -> VmResult<()> {
    if klass.is_array() || klass.state() == ClassState::FullyInitialized {
        return Ok(());
    }
    let _guard = klass.init_lock.lock();
    match klass.state() {
        ClassState::Linked => {}
        ClassState::BeingInitialized | ClassState::FullyInitialized => return Ok(()),
        ClassState::InitializationError => {
            return Err(Exception::linkage(
                NO_CLASS_DEF_FOUND_ERROR,
                format!("could not initialize class {}", klass.name()),
            ));
        }
        ClassState::Allocated => {
            return Err(Exception::internal(format!(
                "{} is initialized before it is linked",
                klass.name()
            )));
        }
    }

    klass.transition(ClassState::BeingInitialized)?;
    debug!("initializing {}", klass.name());
    match run_initializer(env, klass) {
        Ok(()) => {
            klass.transition(ClassState::FullyInitialized)?;
            debug!("initialized {}", klass.name());
            Ok(())
        }
        Err(err) => {
            klass.mark_initialization_error();
            debug!("initialization of {} failed: {err}", klass.name());
            Err(match err {
                Exception::Runtime {
                    exception_class,
                    message,
                } => Exception::linkage(
                    EXCEPTION_IN_INITIALIZER_ERROR,
                    format!("{}: {message}", exception_class.replace('/', ".")),
                ),
                other => other,
            })
        }
    }
}

fn run_initializer(env: VmEnv<'_>, klass: &Arc<Klass>) -> VmResult<()> {
    if let Some(super_class) = klass.super_class() {
        initialize_class(env, &super_class)?;
    }
    let (name, descriptor) = CLASS_INITIALIZER;
    // only the class's own <clinit>, never an inherited one
    let Some(clinit) = klass.require_instance()?.get_this_class_method(name, descriptor) else {
        return Ok(());
    };
    if !clinit.is_static() {
        return Ok(());
    }
    env.thread.run_method(env.runtime, &clinit, Vec::new())?;
    Ok(())
}

fn null_pointer(what: impl std::fmt::Display) -> Exception {
    Exception::runtime(NULL_POINTER_EXCEPTION, format!("cannot {what} because it is null"))
}

fn resolve_field(env: VmEnv<'_>, pool: &RuntimeConstantPool, index: u16) -> VmResult<FieldId> {
    let field_id = pool.get_field(env.runtime, index)?;
    field_id.require_field(|| format!("field reference #{index}"))?;
    Ok(field_id)
}

/// Reads a field through its id. No receiver means a static field; a
/// receiver given for a static field, or an instance field without one, is
/// rejected. The declaring class is initialized first.
pub fn read_field(env: VmEnv<'_>, field_id: &FieldId, receiver: Option<&Oop>) -> VmResult<Value> {
    let field = field_id.require_field(|| "unresolved field".to_string())?;
    let owner = field.owner()?;
    initialize_class(env, &owner)?;
    match (field.is_static(), receiver) {
        (true, None) => owner.require_instance()?.get_static_value(field_id),
        (false, Some(object)) => object.get_field(field_id),
        (false, None) => Err(null_pointer(format!("read field {}", field.name()))),
        (true, Some(_)) => Err(incompatible_field(field_id, "an instance")),
    }
}

/// Writes a field through its id, narrowing int-like values to the declared
/// type. Receiver rules are those of [`read_field`].
pub fn write_field(
    env: VmEnv<'_>,
    field_id: &FieldId,
    receiver: Option<&Oop>,
    value: Value,
) -> VmResult<()> {
    let field = field_id.require_field(|| "unresolved field".to_string())?;
    let owner = field.owner()?;
    initialize_class(env, &owner)?;
    let value = narrow(field.value_type(), value);
    match (field.is_static(), receiver) {
        (true, None) => owner.require_instance()?.set_static_value(field_id, value),
        (false, Some(object)) => object.put_field(field_id, value),
        (false, None) => Err(null_pointer(format!("assign field {}", field.name()))),
        (true, Some(_)) => Err(incompatible_field(field_id, "an instance")),
    }
}

fn incompatible_field(field_id: &FieldId, expected: &str) -> Exception {
    let identity = field_id
        .field()
        .map_or_else(|| "unresolved field".to_string(), |field| field.identity());
    Exception::linkage(
        INCOMPATIBLE_CLASS_CHANGE_ERROR,
        format!("expected {expected} field, found {identity}"),
    )
}

fn require_static_field(field_id: &FieldId, is_static: bool) -> VmResult<()> {
    match field_id.field() {
        Some(field) if field.is_static() != is_static => Err(incompatible_field(
            field_id,
            if is_static { "a static" } else { "an instance" },
        )),
        _ => Ok(()),
    }
}

/// `getstatic`
pub fn get_static(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let field_id = resolve_field(env, pool, index)?;
    require_static_field(&field_id, true)?;
    stack.push(read_field(env, &field_id, None)?);
    Ok(())
}

/// `putstatic`
pub fn put_static(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let field_id = resolve_field(env, pool, index)?;
    require_static_field(&field_id, true)?;
    let value = stack.pop()?;
    write_field(env, &field_id, None, value)
}

/// `getfield`
pub fn get_field(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let field_id = resolve_field(env, pool, index)?;
    require_static_field(&field_id, false)?;
    let receiver = stack.pop_reference()?;
    let Some(receiver) = receiver else {
        return Err(null_pointer(format!("read field #{index}")));
    };
    stack.push(read_field(env, &field_id, Some(&receiver))?);
    Ok(())
}

/// `putfield`
pub fn put_field(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let field_id = resolve_field(env, pool, index)?;
    require_static_field(&field_id, false)?;
    let value = stack.pop()?;
    let Some(receiver) = stack.pop_reference()? else {
        return Err(null_pointer(format!("assign field #{index}")));
    };
    write_field(env, &field_id, Some(&receiver), value)
}

fn pop_array(stack: &mut dyn OperandStack) -> VmResult<Oop> {
    stack
        .pop_reference()?
        .ok_or_else(|| null_pointer("access an array element"))
}

macro_rules! primitive_array_access {
    ($($name:ident: $ty:ty, $pop:ident, $push:ident;)*) => {
        paste! {
            $(
                #[doc = "`" $name "` array element load: pops the index, then the array."]
                pub fn [<load_ $name _array_element>](stack: &mut dyn OperandStack) -> VmResult<()> {
                    let index = stack.pop_int()?;
                    let array = pop_array(stack)?;
                    let element: $ty = array.get_element(index)?;
                    stack.$push(element.into());
                    Ok(())
                }

                #[doc = "`" $name "` array element store: pops the value, the index, then the array."]
                pub fn [<store_ $name _array_element>](stack: &mut dyn OperandStack) -> VmResult<()> {
                    let value = stack.$pop()?;
                    let index = stack.pop_int()?;
                    let array = pop_array(stack)?;
                    array.put_element::<$ty>(index, value as $ty)
                }
            )*
        }
    };
}

// byte loads and stores also serve boolean arrays
primitive_array_access! {
    byte: i8, pop_int, push_int;
    char: u16, pop_int, push_int;
    short: i16, pop_int, push_int;
    int: i32, pop_int, push_int;
    long: i64, pop_long, push_long;
    float: f32, pop_float, push_float;
    double: f64, pop_double, push_double;
}

/// `aaload`
pub fn load_object_array_element(stack: &mut dyn OperandStack) -> VmResult<()> {
    let index = stack.pop_int()?;
    let array = pop_array(stack)?;
    stack.push_reference(array.get_reference_element(index)?);
    Ok(())
}

/// `aastore`: the stored object must be assignable to the array's
/// component type.
pub fn store_object_array_element(stack: &mut dyn OperandStack) -> VmResult<()> {
    let value = stack.pop_reference()?;
    let index = stack.pop_int()?;
    let array = pop_array(stack)?;
    if let Some(object) = &value {
        let component = array.klass().component_type().ok_or_else(|| {
            Exception::runtime(
                CLASS_CAST_EXCEPTION,
                format!("{} is not a reference array", array.klass().name()),
            )
        })?;
        if !is_assignable(object.klass(), component) {
            return Err(Exception::runtime(
                ARRAY_STORE_EXCEPTION,
                format!(
                    "{} cannot be stored into {}",
                    object.klass().name(),
                    array.klass().name()
                ),
            ));
        }
    }
    array.put_reference_element(index, value)
}

/// `arraylength`
pub fn array_length(stack: &mut dyn OperandStack) -> VmResult<()> {
    let array = stack
        .pop_reference()?
        .ok_or_else(|| null_pointer("read the array length"))?;
    let length = array.array_length().ok_or_else(|| {
        Exception::runtime(
            CLASS_CAST_EXCEPTION,
            format!("{} is not an array", array.klass().name()),
        )
    })?;
    stack.push_int(length as i32);
    Ok(())
}

/// `new`: allocates a zeroed instance of an initialized class.
pub fn new_instance(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let klass = pool.get_class(env.runtime, index)?;
    if klass.is_array() || klass.is_interface() || klass.is_abstract() {
        return Err(Exception::linkage(
            INSTANTIATION_ERROR,
            klass.name().to_string(),
        ));
    }
    initialize_class(env, &klass)?;
    let object = env.runtime.heap().allocate_instance(&klass)?;
    stack.push_reference(Some(object));
    Ok(())
}

fn array_length_operand(length: i32) -> VmResult<usize> {
    usize::try_from(length)
        .map_err(|_| Exception::runtime(NEGATIVE_ARRAY_SIZE_EXCEPTION, length.to_string()))
}

fn primitive_element_type(atype: i32) -> Option<ValueType> {
    let element_type = match atype {
        T_BOOLEAN => ValueType::Boolean,
        T_CHAR => ValueType::Char,
        T_FLOAT => ValueType::Float,
        T_DOUBLE => ValueType::Double,
        T_BYTE => ValueType::Byte,
        T_SHORT => ValueType::Short,
        T_INT => ValueType::Int,
        T_LONG => ValueType::Long,
        _ => return None,
    };
    Some(element_type)
}

/// `newarray`: pops the length and allocates a primitive array of the type
/// named by `atype`.
pub fn new_primitive_array(
    env: VmEnv<'_>,
    stack: &mut dyn OperandStack,
    atype: i32,
) -> VmResult<()> {
    let length = array_length_operand(stack.pop_int()?)?;
    let element_type = primitive_element_type(atype)
        .ok_or_else(|| Exception::internal(format!("invalid newarray type {atype}")))?;
    let klass = env
        .runtime
        .bootstrap_loader()
        .primitive_array_class(env.runtime, element_type)?;
    let array = env.runtime.heap().allocate_type_array(&klass, length)?;
    stack.push_reference(Some(array));
    Ok(())
}

/// The array class one dimension above `component`, defined by the
/// component's loader.
pub fn array_class_of(env: VmEnv<'_>, component: &Arc<Klass>) -> VmResult<Arc<Klass>> {
    let name = if component.is_array() {
        format!("[{}", component.name())
    } else {
        format!("[L{};", component.name())
    };
    let loader = component.class_loader();
    require_class(loader.as_deref(), env.runtime, &name)
}

/// `anewarray`: the constant may name an instance class or an array class.
pub fn new_object_array(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let length = array_length_operand(stack.pop_int()?)?;
    let component = pool.get_class(env.runtime, index)?;
    let klass = array_class_of(env, &component)?;
    let array = env.runtime.heap().allocate_object_array(&klass, length)?;
    stack.push_reference(Some(array));
    Ok(())
}

/// `multianewarray`: pops one length per dimension, outermost last popped.
/// The count must equal the dimension of the array class; this is checked
/// before anything is allocated.
pub fn new_multi_object_array(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
    dimensions: u8,
) -> VmResult<()> {
    let klass = pool.get_class(env.runtime, index)?;
    if !klass.is_array() || klass.dimension() != usize::from(dimensions) {
        return Err(Exception::linkage(
            VERIFY_ERROR,
            format!(
                "{} lengths given for {} of dimension {}",
                dimensions,
                klass.name(),
                klass.dimension()
            ),
        ));
    }
    let mut lengths = Vec::with_capacity(usize::from(dimensions));
    for _ in 0..dimensions {
        lengths.push(stack.pop_int()?);
    }
    lengths.reverse();
    let lengths = lengths
        .into_iter()
        .map(array_length_operand)
        .collect::<VmResult<Vec<_>>>()?;
    let array = allocate_multi_array(env, &klass, &lengths)?;
    stack.push_reference(Some(array));
    Ok(())
}

fn allocate_multi_array(env: VmEnv<'_>, klass: &Arc<Klass>, lengths: &[usize]) -> VmResult<Oop> {
    let Some((&length, rest)) = lengths.split_first() else {
        return Err(Exception::internal("no array length left"));
    };
    let heap = env.runtime.heap();
    match klass.kind() {
        KlassKind::TypeArray(_) if rest.is_empty() => heap.allocate_type_array(klass, length),
        KlassKind::ObjectArray(array) => {
            let outer = heap.allocate_object_array(klass, length)?;
            if rest.is_empty() {
                return Ok(outer);
            }
            for slot in 0..length {
                let inner = allocate_multi_array(env, array.component(), rest)?;
                outer.put_reference_element(slot as i32, Some(inner))?;
            }
            Ok(outer)
        }
        _ => Err(Exception::internal(format!(
            "{} cannot hold {} more dimensions",
            klass.name(),
            rest.len()
        ))),
    }
}

/// Resolves a method constant of either reference kind.
fn resolve_method(env: VmEnv<'_>, pool: &RuntimeConstantPool, index: u16) -> VmResult<Arc<Method>> {
    let method = match pool.tag_at(index)? {
        ConstantTag::InterfaceMethodref => pool.get_interface_method(env.runtime, index)?,
        _ => pool.get_method(env.runtime, index)?,
    };
    method.ok_or_else(|| {
        Exception::linkage(NO_SUCH_METHOD_ERROR, format!("method reference #{index}"))
    })
}

fn incompatible_method(method: &Method, expected: &str) -> Exception {
    Exception::linkage(
        INCOMPATIBLE_CLASS_CHANGE_ERROR,
        format!(
            "expected {expected} method, found {}.{}{}",
            method.owner_name(),
            method.name(),
            method.descriptor()
        ),
    )
}

/// `invokespecial`: constructors, private methods and `super` calls. The
/// resolved method runs as is.
pub fn invoke_special(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let method = resolve_method(env, pool, index)?;
    if method.is_static() {
        return Err(incompatible_method(&method, "an instance"));
    }
    if method.is_abstract() {
        return Err(abstract_method(&method));
    }
    InvocationContext::new(env, method).invoke(stack)
}

/// `invokestatic`: initializes the declaring class before the call.
pub fn invoke_static(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let method = resolve_method(env, pool, index)?;
    if !method.is_static() || method.is_abstract() {
        return Err(incompatible_method(&method, "a static"));
    }
    initialize_class(env, &method.owner()?)?;
    InvocationContext::new(env, method).invoke(stack)
}

/// `invokevirtual`
pub fn invoke_virtual(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let resolved = resolve_method(env, pool, index)?;
    invoke_dynamically(env, stack, resolved)
}

/// `invokeinterface`
pub fn invoke_interface(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let resolved = resolve_method(env, pool, index)?;
    invoke_dynamically(env, stack, resolved)
}

fn invoke_dynamically(
    env: VmEnv<'_>,
    stack: &mut dyn OperandStack,
    resolved: Arc<Method>,
) -> VmResult<()> {
    if resolved.is_static() {
        return Err(incompatible_method(&resolved, "an instance"));
    }
    let args = pop_arguments(&resolved, stack)?;
    let Some(Value::Reference(Some(receiver))) = args.first() else {
        return Err(Exception::internal("instance call without a receiver"));
    };
    let selected = select_method(receiver.klass(), &resolved);
    if selected.is_abstract() {
        return Err(abstract_method(&selected));
    }
    InvocationContext::new(env, selected).invoke_with(stack, args)
}

/// Virtual dispatch: the receiver class's vtable entry for the resolved
/// name and descriptor, or the resolved method itself when the receiver has
/// none (private methods and array receivers).
pub fn select_method(receiver_class: &Klass, resolved: &Arc<Method>) -> Arc<Method> {
    if resolved.is_private() {
        return Arc::clone(resolved);
    }
    receiver_class
        .as_instance()
        .and_then(|instance| instance.get_virtual_method(resolved.name(), resolved.descriptor()))
        .unwrap_or_else(|| Arc::clone(resolved))
}

fn abstract_method(method: &Method) -> Exception {
    Exception::linkage(
        ABSTRACT_METHOD_ERROR,
        format!(
            "{}.{}{}",
            method.owner_name(),
            method.name(),
            method.descriptor()
        ),
    )
}

/// Runs `<init>()V` of the object's class on a freshly allocated object.
pub fn call_default_constructor(env: VmEnv<'_>, object: &Oop) -> VmResult<()> {
    let klass = object.klass();
    let (name, descriptor) = DEFAULT_CONSTRUCTOR;
    let constructor = klass
        .require_instance()?
        .get_this_class_method(name, descriptor)
        .ok_or_else(|| {
            Exception::linkage(
                NO_SUCH_METHOD_ERROR,
                format!("{}.{name}{descriptor}", klass.name()),
            )
        })?;
    env.thread
        .run_method(env.runtime, &constructor, vec![Value::reference(object)])?;
    Ok(())
}

/// `ldc`, `ldc_w` and `ldc2_w`.
pub fn load_constant(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    match pool.tag_at(index)? {
        ConstantTag::Integer => stack.push_int(pool.get_int(index)?),
        ConstantTag::Float => stack.push_float(pool.get_float(index)?),
        ConstantTag::Long => stack.push_long(pool.get_long(index)?),
        ConstantTag::Double => stack.push_double(pool.get_double(index)?),
        ConstantTag::String => stack.push_reference(Some(pool.get_string(env.runtime, index)?)),
        ConstantTag::Class => {
            let klass = pool.get_class(env.runtime, index)?;
            // classes of other loaders defined before java/lang/Class get theirs here
            ensure_mirror(env.runtime, &klass)?;
            let mirror = klass.mirror().cloned().ok_or_else(|| {
                Exception::internal(format!("{} has no java/lang/Class mirror yet", klass.name()))
            })?;
            stack.push_reference(Some(mirror));
        }
        tag => {
            return Err(Exception::internal(format!(
                "cannot load a {tag:?} constant (#{index})"
            )));
        }
    }
    Ok(())
}

/// `instanceof`: pushes 1 when the popped reference is non-null and
/// assignable to the named class.
pub fn instance_of(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let Some(object) = stack.pop_reference()? else {
        stack.push_int(0);
        return Ok(());
    };
    let target = pool.get_class(env.runtime, index)?;
    stack.push_int(i32::from(is_assignable(object.klass(), &target)));
    Ok(())
}

/// `checkcast`: leaves the reference on the stack; null always passes.
pub fn check_cast(
    env: VmEnv<'_>,
    pool: &RuntimeConstantPool,
    stack: &mut dyn OperandStack,
    index: u16,
) -> VmResult<()> {
    let value = stack.pop_reference()?;
    if let Some(object) = &value {
        let target = pool.get_class(env.runtime, index)?;
        if !is_assignable(object.klass(), &target) {
            return Err(Exception::runtime(
                CLASS_CAST_EXCEPTION,
                format!(
                    "class {} cannot be cast to class {}",
                    object.klass().name().replace('/', "."),
                    target.name().replace('/', ".")
                ),
            ));
        }
    }
    stack.push_reference(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag},
        runtime::{
            ClassLoader, DelegatingClassLoader, MemorySource, Runtime,
            famous_classes::{ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, STRING_CLASS},
        },
        test_support::{ClassFileBuilder, RecordingThread, test_runtime_with, unbooted_runtime_with},
    };

    fn load(runtime: &Runtime, name: &str) -> Arc<Klass> {
        require_class(None, runtime, name).unwrap()
    }

    fn pool(klass: &Klass) -> &RuntimeConstantPool {
        klass.as_instance().unwrap().constant_pool()
    }

    #[test]
    fn test_initialization_runs_superclass_first_and_once() {
        let runtime = test_runtime_with(vec![
            ClassFileBuilder::new("demo/Base")
                .method("<clinit>", "()V", MethodAccessFlag::STATIC)
                .build(),
            ClassFileBuilder::new("demo/Child")
                .super_class(Some("demo/Base"))
                .method("<clinit>", "()V", MethodAccessFlag::STATIC)
                .build(),
        ]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let child = load(&runtime, "demo/Child");
        assert_eq!(child.state(), ClassState::Linked);

        initialize_class(env, &child).unwrap();
        initialize_class(env, &child).unwrap();
        initialize_class(env, &load(&runtime, "demo/Base")).unwrap();
        assert_eq!(
            thread.calls(),
            vec!["demo/Base.<clinit>()V", "demo/Child.<clinit>()V"]
        );
        assert_eq!(child.state(), ClassState::FullyInitialized);
    }

    #[test]
    fn test_racing_threads_run_the_initializer_once() {
        let runtime = test_runtime_with(vec![
            ClassFileBuilder::new("demo/Slow")
                .method("<clinit>", "()V", MethodAccessFlag::STATIC)
                .build(),
        ]);
        let thread = RecordingThread::with_handler(|_, _, _| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(None)
        });
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Slow");
        let klass = &klass;

        let states: Vec<ClassState> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        initialize_class(env, klass).unwrap();
                        klass.state()
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .collect()
        });
        assert!(states.iter().all(|state| *state == ClassState::FullyInitialized));
        assert_eq!(thread.calls(), vec!["demo/Slow.<clinit>()V"]);
    }

    #[test]
    fn test_inherited_initializer_does_not_run() {
        let runtime = test_runtime_with(vec![
            ClassFileBuilder::new("demo/Base")
                .method("<clinit>", "()V", MethodAccessFlag::STATIC)
                .build(),
            ClassFileBuilder::new("demo/Child")
                .super_class(Some("demo/Base"))
                .build(),
        ]);
        let thread = RecordingThread::new();
        let child = load(&runtime, "demo/Child");
        initialize_class(VmEnv::new(&runtime, &thread), &child).unwrap();
        assert_eq!(thread.calls(), vec!["demo/Base.<clinit>()V"]);
        assert_eq!(child.state(), ClassState::FullyInitialized);
    }

    #[test]
    fn test_recursive_initialization_from_the_same_thread() {
        let runtime = test_runtime_with(vec![
            ClassFileBuilder::new("demo/Loop")
                .method("<clinit>", "()V", MethodAccessFlag::STATIC)
                .build(),
        ]);
        let thread = RecordingThread::with_handler(|runtime, method, _| {
            let klass = method.owner()?;
            let nested = RecordingThread::new();
            initialize_class(VmEnv::new(runtime, &nested), &klass)?;
            assert_eq!(klass.state(), ClassState::BeingInitialized);
            assert!(nested.calls().is_empty());
            Ok(None)
        });
        let klass = load(&runtime, "demo/Loop");
        initialize_class(VmEnv::new(&runtime, &thread), &klass).unwrap();
        assert_eq!(thread.calls().len(), 1);
        assert_eq!(klass.state(), ClassState::FullyInitialized);
    }

    #[test]
    fn test_failed_initializer_poisons_the_class() {
        let runtime = test_runtime_with(vec![
            ClassFileBuilder::new("demo/Broken")
                .method("<clinit>", "()V", MethodAccessFlag::STATIC)
                .build(),
        ]);
        let thread = RecordingThread::with_handler(|_, _, _| {
            Err(Exception::runtime(NULL_POINTER_EXCEPTION, "boom"))
        });
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Broken");

        let err = initialize_class(env, &klass).unwrap_err();
        assert_eq!(err.java_class_name(), Some(EXCEPTION_IN_INITIALIZER_ERROR));
        assert_eq!(klass.state(), ClassState::InitializationError);

        let err = initialize_class(env, &klass).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NO_CLASS_DEF_FOUND_ERROR));
        assert_eq!(thread.calls().len(), 1);
    }

    #[test]
    fn test_static_fields() {
        let mut builder = ClassFileBuilder::new("demo/Counter")
            .field_with_flags("count", "I", FieldAccessFlag::STATIC)
            .field_with_flags("small", "B", FieldAccessFlag::STATIC)
            .field("instance", "I")
            .method("<clinit>", "()V", MethodAccessFlag::STATIC);
        let count = builder.field_ref("demo/Counter", "count", "I");
        let small = builder.field_ref("demo/Counter", "small", "B");
        let instance = builder.field_ref("demo/Counter", "instance", "I");
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Counter");
        let pool = pool(&klass);
        let mut stack = Stack::new();

        stack.push_int(7);
        put_static(env, pool, &mut stack, count).unwrap();
        assert_eq!(thread.calls(), vec!["demo/Counter.<clinit>()V"]);
        get_static(env, pool, &mut stack, count).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 7);

        stack.push_int(300);
        put_static(env, pool, &mut stack, small).unwrap();
        get_static(env, pool, &mut stack, small).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 44);

        stack.push_float(1.0);
        let err = put_static(env, pool, &mut stack, count).unwrap_err();
        assert!(err.is_internal());

        let err = get_static(env, pool, &mut stack, instance).unwrap_err();
        assert_eq!(err.java_class_name(), Some(INCOMPATIBLE_CLASS_CHANGE_ERROR));
    }

    #[test]
    fn test_instance_fields() {
        let mut builder = ClassFileBuilder::new("demo/Point")
            .field("x", "I")
            .field("label", "Ljava/lang/String;");
        let point = builder.class("demo/Point");
        let x = builder.field_ref("demo/Point", "x", "I");
        let label = builder.field_ref("demo/Point", "label", "Ljava/lang/String;");
        let text = builder.string("origin");
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Point");
        let pool = pool(&klass);
        let mut stack = Stack::new();

        new_instance(env, pool, &mut stack, point).unwrap();
        let object = stack.pop_reference().unwrap().unwrap();
        assert_eq!(object.klass().name().as_ref(), "demo/Point");

        stack.push_reference(Some(Arc::clone(&object)));
        get_field(env, pool, &mut stack, x).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 0);

        stack.push_reference(Some(Arc::clone(&object)));
        stack.push_int(5);
        put_field(env, pool, &mut stack, x).unwrap();
        stack.push_reference(Some(Arc::clone(&object)));
        load_constant(env, pool, &mut stack, text).unwrap();
        put_field(env, pool, &mut stack, label).unwrap();

        stack.push_reference(Some(Arc::clone(&object)));
        get_field(env, pool, &mut stack, x).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 5);
        stack.push_reference(Some(Arc::clone(&object)));
        get_field(env, pool, &mut stack, label).unwrap();
        let value = stack.pop_reference().unwrap().unwrap();
        assert_eq!(value.string_value(), Some("origin"));

        stack.push_reference(None);
        let err = get_field(env, pool, &mut stack, x).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NULL_POINTER_EXCEPTION));

        stack.push_reference(None);
        stack.push_int(9);
        let err = put_field(env, pool, &mut stack, x).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NULL_POINTER_EXCEPTION));
        assert!(stack.is_empty());

        let err = put_static(env, pool, &mut stack, x).unwrap_err();
        assert_eq!(err.java_class_name(), Some(INCOMPATIBLE_CLASS_CHANGE_ERROR));
    }

    #[test]
    fn test_field_access_through_ids() {
        let runtime = test_runtime_with(vec![
            ClassFileBuilder::new("demo/Flag")
                .field("on", "Z")
                .field_with_flags("total", "J", FieldAccessFlag::STATIC)
                .build(),
        ]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Flag");
        let instance = klass.as_instance().unwrap();
        let on = instance.find_field("on", "Z");
        let total = instance.find_field("total", "J");
        let object = runtime.heap().allocate_instance(&klass).unwrap();

        write_field(env, &on, Some(&object), Value::Int(3)).unwrap();
        assert_eq!(read_field(env, &on, Some(&object)).unwrap(), Value::Int(1));
        write_field(env, &total, None, Value::Long(1 << 33)).unwrap();
        assert_eq!(read_field(env, &total, None).unwrap(), Value::Long(1 << 33));

        let err = read_field(env, &on, None).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NULL_POINTER_EXCEPTION));
        let err = read_field(env, &total, Some(&object)).unwrap_err();
        assert_eq!(err.java_class_name(), Some(INCOMPATIBLE_CLASS_CHANGE_ERROR));
        assert_eq!(klass.state(), ClassState::FullyInitialized);
    }

    #[test]
    fn test_new_instance_of_abstract_class() {
        let mut builder = ClassFileBuilder::new("demo/Shape")
            .flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::ABSTRACT);
        let shape = builder.class("demo/Shape");
        let int_array = builder.class("[I");
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Shape");
        let mut stack = Stack::new();

        let err = new_instance(env, pool(&klass), &mut stack, shape).unwrap_err();
        assert_eq!(err.java_class_name(), Some(INSTANTIATION_ERROR));
        let err = new_instance(env, pool(&klass), &mut stack, int_array).unwrap_err();
        assert_eq!(err.java_class_name(), Some(INSTANTIATION_ERROR));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_primitive_arrays() {
        let runtime = test_runtime_with(vec![]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let mut stack = Stack::new();

        stack.push_int(3);
        new_primitive_array(env, &mut stack, T_INT).unwrap();
        let ints = stack.pop_reference().unwrap().unwrap();
        assert_eq!(ints.klass().name().as_ref(), "[I");

        stack.push_reference(Some(Arc::clone(&ints)));
        stack.push_int(1);
        stack.push_int(42);
        store_int_array_element(&mut stack).unwrap();
        stack.push_reference(Some(Arc::clone(&ints)));
        stack.push_int(1);
        load_int_array_element(&mut stack).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 42);

        stack.push_reference(Some(Arc::clone(&ints)));
        stack.push_int(3);
        let err = load_int_array_element(&mut stack).unwrap_err();
        assert_eq!(err.java_class_name(), Some(ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION));

        stack.push_reference(Some(Arc::clone(&ints)));
        stack.push_int(0);
        let err = load_long_array_element(&mut stack).unwrap_err();
        assert_eq!(err.java_class_name(), Some(CLASS_CAST_EXCEPTION));

        stack.push_reference(None);
        stack.push_int(0);
        let err = load_int_array_element(&mut stack).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NULL_POINTER_EXCEPTION));

        stack.push_reference(Some(Arc::clone(&ints)));
        array_length(&mut stack).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 3);

        stack.push_int(-1);
        let err = new_primitive_array(env, &mut stack, T_LONG).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NEGATIVE_ARRAY_SIZE_EXCEPTION));

        stack.push_int(1);
        assert!(new_primitive_array(env, &mut stack, 99).unwrap_err().is_internal());
    }

    #[test]
    fn test_narrow_array_elements() {
        let runtime = test_runtime_with(vec![]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let mut stack = Stack::new();

        stack.push_int(1);
        new_primitive_array(env, &mut stack, T_BOOLEAN).unwrap();
        let booleans = stack.pop_reference().unwrap().unwrap();
        stack.push_reference(Some(Arc::clone(&booleans)));
        stack.push_int(0);
        stack.push_int(3);
        store_byte_array_element(&mut stack).unwrap();
        stack.push_reference(Some(booleans));
        stack.push_int(0);
        load_byte_array_element(&mut stack).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 1);

        stack.push_int(1);
        new_primitive_array(env, &mut stack, T_CHAR).unwrap();
        let chars = stack.pop_reference().unwrap().unwrap();
        stack.push_reference(Some(Arc::clone(&chars)));
        stack.push_int(0);
        stack.push_int(-1);
        store_char_array_element(&mut stack).unwrap();
        stack.push_reference(Some(chars));
        stack.push_int(0);
        load_char_array_element(&mut stack).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 0xffff);
    }

    #[test]
    fn test_object_arrays() {
        let mut builder = ClassFileBuilder::new("demo/Holder");
        let strings = builder.class(STRING_CLASS);
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let holder = load(&runtime, "demo/Holder");
        let mut stack = Stack::new();

        stack.push_int(2);
        new_object_array(env, pool(&holder), &mut stack, strings).unwrap();
        let array = stack.pop_reference().unwrap().unwrap();
        assert_eq!(array.klass().name().as_ref(), "[Ljava/lang/String;");

        let hello = runtime.string_table().intern(&runtime, "hello").unwrap();
        stack.push_reference(Some(Arc::clone(&array)));
        stack.push_int(1);
        stack.push_reference(Some(Arc::clone(&hello)));
        store_object_array_element(&mut stack).unwrap();
        stack.push_reference(Some(Arc::clone(&array)));
        stack.push_int(1);
        load_object_array_element(&mut stack).unwrap();
        assert!(Arc::ptr_eq(&stack.pop_reference().unwrap().unwrap(), &hello));

        let other = runtime.heap().allocate_instance(&holder).unwrap();
        stack.push_reference(Some(Arc::clone(&array)));
        stack.push_int(0);
        stack.push_reference(Some(other));
        let err = store_object_array_element(&mut stack).unwrap_err();
        assert_eq!(err.java_class_name(), Some(ARRAY_STORE_EXCEPTION));

        stack.push_reference(Some(array));
        stack.push_int(0);
        stack.push_reference(None);
        store_object_array_element(&mut stack).unwrap();

        stack.push_int(-5);
        let err = new_object_array(env, pool(&holder), &mut stack, strings).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NEGATIVE_ARRAY_SIZE_EXCEPTION));
    }

    #[test]
    fn test_multi_dimensional_arrays() {
        let mut builder = ClassFileBuilder::new("demo/Grid");
        let matrix = builder.class("[[I");
        let names = builder.class("[[Ljava/lang/String;");
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let grid = load(&runtime, "demo/Grid");
        let pool = pool(&grid);
        let mut stack = Stack::new();

        stack.push_int(3);
        stack.push_int(4);
        new_multi_object_array(env, pool, &mut stack, matrix, 2).unwrap();
        let outer = stack.pop_reference().unwrap().unwrap();
        assert_eq!(outer.klass().name().as_ref(), "[[I");
        assert_eq!(outer.array_length(), Some(3));
        for row in 0..3 {
            let inner = outer.get_reference_element(row).unwrap().unwrap();
            assert_eq!(inner.klass().name().as_ref(), "[I");
            assert_eq!(inner.array_length(), Some(4));
        }

        stack.push_int(2);
        stack.push_int(0);
        new_multi_object_array(env, pool, &mut stack, names, 2).unwrap();
        let outer = stack.pop_reference().unwrap().unwrap();
        let inner = outer.get_reference_element(1).unwrap().unwrap();
        assert_eq!(inner.klass().name().as_ref(), "[Ljava/lang/String;");
        assert_eq!(inner.array_length(), Some(0));
    }

    #[test]
    fn test_multi_dimensional_array_errors_allocate_nothing() {
        let mut builder = ClassFileBuilder::new("demo/Grid");
        let matrix = builder.class("[[I");
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let grid = load(&runtime, "demo/Grid");
        let pool = pool(&grid);
        let mut stack = Stack::new();
        // resolve the array class up front so its mirror is not counted
        pool.get_class(&runtime, matrix).unwrap();
        let allocated = runtime.heap().allocated_objects();

        stack.push_int(3);
        let err = new_multi_object_array(env, pool, &mut stack, matrix, 1).unwrap_err();
        assert_eq!(err.java_class_name(), Some(VERIFY_ERROR));

        let mut stack = Stack::new();
        stack.push_int(3);
        stack.push_int(-1);
        let err = new_multi_object_array(env, pool, &mut stack, matrix, 2).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NEGATIVE_ARRAY_SIZE_EXCEPTION));
        assert_eq!(runtime.heap().allocated_objects(), allocated);
    }

    #[test]
    fn test_load_constant() {
        let mut builder = ClassFileBuilder::new("demo/Literals");
        let int = builder.integer(-7);
        let float = builder.float(2.5);
        let long = builder.long(1 << 40);
        let double = builder.double(-0.25);
        let first = builder.string("jexec");
        let second = builder.string("jexec");
        let class = builder.class("demo/Literals");
        let field = builder.field_ref("demo/Literals", "missing", "I");
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Literals");
        let pool = pool(&klass);
        let mut stack = Stack::new();

        for index in [int, float, long, double, first, second, class] {
            load_constant(env, pool, &mut stack, index).unwrap();
        }
        let mirror = stack.pop_reference().unwrap().unwrap();
        assert!(Arc::ptr_eq(&mirror.mirror_target().unwrap(), &klass));
        let second = stack.pop_reference().unwrap().unwrap();
        let first = stack.pop_reference().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.string_value(), Some("jexec"));
        assert_eq!(stack.pop_double().unwrap(), -0.25);
        assert_eq!(stack.pop_long().unwrap(), 1 << 40);
        assert_eq!(stack.pop_float().unwrap(), 2.5);
        assert_eq!(stack.pop_int().unwrap(), -7);

        assert!(load_constant(env, pool, &mut stack, field).unwrap_err().is_internal());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_class_constant_of_a_class_defined_before_java_lang_class() {
        let runtime = unbooted_runtime_with(vec![]);
        let mut builder = ClassFileBuilder::new("demo/Plugin");
        let this = builder.class("demo/Plugin");
        let mut source = MemorySource::new();
        source.insert(builder.build()).unwrap();
        let loader = DelegatingClassLoader::new("plugins", None, Box::new(source));

        let plugin = loader.load_class(&runtime, "demo/Plugin").unwrap().unwrap();
        runtime.bootstrap().unwrap();
        assert!(plugin.mirror().is_none());

        let thread = RecordingThread::new();
        let mut stack = Stack::new();
        load_constant(VmEnv::new(&runtime, &thread), pool(&plugin), &mut stack, this).unwrap();
        let mirror = stack.pop_reference().unwrap().unwrap();
        assert!(Arc::ptr_eq(&mirror.mirror_target().unwrap(), &plugin));
        assert!(Arc::ptr_eq(plugin.mirror().unwrap(), &mirror));
    }

    #[test]
    fn test_invoke_static_initializes_owner() {
        let mut builder = ClassFileBuilder::new("demo/Util")
            .method("<clinit>", "()V", MethodAccessFlag::STATIC)
            .method("twice", "(I)I", MethodAccessFlag::PUBLIC | MethodAccessFlag::STATIC)
            .method("run", "()V", MethodAccessFlag::PUBLIC);
        let twice = builder.method_ref("demo/Util", "twice", "(I)I");
        let run = builder.method_ref("demo/Util", "run", "()V");
        let missing = builder.method_ref("demo/Util", "gone", "()V");
        let runtime = test_runtime_with(vec![builder.build()]);
        let thread = RecordingThread::with_handler(|_, method, args| match method.name().as_ref() {
            "twice" => match args {
                [Value::Int(value)] => Ok(Some(Value::Int(value * 2))),
                _ => Err(Exception::internal("bad arguments")),
            },
            _ => Ok(None),
        });
        let env = VmEnv::new(&runtime, &thread);
        let klass = load(&runtime, "demo/Util");
        let pool = pool(&klass);
        let mut stack = Stack::new();

        stack.push_int(21);
        invoke_static(env, pool, &mut stack, twice).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 42);
        assert_eq!(
            thread.calls(),
            vec!["demo/Util.<clinit>()V", "demo/Util.twice(I)I"]
        );

        let err = invoke_static(env, pool, &mut stack, run).unwrap_err();
        assert_eq!(err.java_class_name(), Some(INCOMPATIBLE_CLASS_CHANGE_ERROR));
        let err = invoke_static(env, pool, &mut stack, missing).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NO_SUCH_METHOD_ERROR));
    }

    #[test]
    fn test_virtual_and_special_dispatch() {
        let mut builder = ClassFileBuilder::new("demo/Animal")
            .method("speak", "()I", MethodAccessFlag::PUBLIC)
            .method("hidden", "()V", MethodAccessFlag::PRIVATE);
        let speak = builder.method_ref("demo/Animal", "speak", "()I");
        let hidden = builder.method_ref("demo/Animal", "hidden", "()V");
        let dog_class = builder.class("demo/Dog");
        let runtime = test_runtime_with(vec![
            builder.build(),
            ClassFileBuilder::new("demo/Dog")
                .super_class(Some("demo/Animal"))
                .method("speak", "()I", MethodAccessFlag::PUBLIC)
                .build(),
        ]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let animal = load(&runtime, "demo/Animal");
        let pool = pool(&animal);
        let mut stack = Stack::new();

        new_instance(env, pool, &mut stack, dog_class).unwrap();
        let dog = stack.pop_reference().unwrap().unwrap();
        call_default_constructor(env, &dog).unwrap();

        stack.push_reference(Some(Arc::clone(&dog)));
        invoke_virtual(env, pool, &mut stack, speak).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 0);

        stack.push_reference(Some(Arc::clone(&dog)));
        invoke_special(env, pool, &mut stack, speak).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 0);

        stack.push_reference(Some(Arc::clone(&dog)));
        invoke_virtual(env, pool, &mut stack, hidden).unwrap();
        assert!(stack.is_empty());

        assert_eq!(
            thread.calls(),
            vec![
                "demo/Dog.<init>()V",
                "demo/Dog.speak()I",
                "demo/Animal.speak()I",
                "demo/Animal.hidden()V",
            ]
        );

        stack.push_reference(None);
        let err = invoke_virtual(env, pool, &mut stack, speak).unwrap_err();
        assert_eq!(err.java_class_name(), Some(NULL_POINTER_EXCEPTION));
    }

    #[test]
    fn test_interface_dispatch() {
        let mut builder = ClassFileBuilder::new("demo/Greeter")
            .flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::INTERFACE | ClassAccessFlag::ABSTRACT)
            .method("greet", "()V", MethodAccessFlag::PUBLIC | MethodAccessFlag::ABSTRACT)
            .method("wave", "()V", MethodAccessFlag::PUBLIC);
        let greet = builder.interface_method_ref("demo/Greeter", "greet", "()V");
        let wave = builder.interface_method_ref("demo/Greeter", "wave", "()V");
        let runtime = test_runtime_with(vec![
            builder.build(),
            ClassFileBuilder::new("demo/Polite")
                .interface("demo/Greeter")
                .method("greet", "()V", MethodAccessFlag::PUBLIC)
                .build(),
            ClassFileBuilder::new("demo/Rude")
                .flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::ABSTRACT)
                .interface("demo/Greeter")
                .build(),
        ]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let greeter = load(&runtime, "demo/Greeter");
        let pool = pool(&greeter);
        let polite = runtime
            .heap()
            .allocate_instance(&load(&runtime, "demo/Polite"))
            .unwrap();
        let mut stack = Stack::new();

        stack.push_reference(Some(Arc::clone(&polite)));
        invoke_interface(env, pool, &mut stack, greet).unwrap();
        stack.push_reference(Some(polite));
        invoke_interface(env, pool, &mut stack, wave).unwrap();
        assert_eq!(
            thread.calls(),
            vec!["demo/Polite.greet()V", "demo/Greeter.wave()V"]
        );

        let rude = runtime
            .heap()
            .allocate_instance(&load(&runtime, "demo/Rude"))
            .unwrap();
        stack.push_reference(Some(rude));
        let err = invoke_interface(env, pool, &mut stack, greet).unwrap_err();
        assert_eq!(err.java_class_name(), Some(ABSTRACT_METHOD_ERROR));
    }

    #[test]
    fn test_instance_of_and_check_cast() {
        let mut builder = ClassFileBuilder::new("demo/Derived").super_class(Some("demo/Base"));
        let base = builder.class("demo/Base");
        let string = builder.class(STRING_CLASS);
        let runtime = test_runtime_with(vec![
            ClassFileBuilder::new("demo/Base").build(),
            builder.build(),
        ]);
        let thread = RecordingThread::new();
        let env = VmEnv::new(&runtime, &thread);
        let derived = load(&runtime, "demo/Derived");
        let pool = pool(&derived);
        let object = runtime.heap().allocate_instance(&derived).unwrap();
        let mut stack = Stack::new();

        stack.push_reference(Some(Arc::clone(&object)));
        instance_of(env, pool, &mut stack, base).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 1);
        stack.push_reference(Some(Arc::clone(&object)));
        instance_of(env, pool, &mut stack, string).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 0);
        stack.push_reference(None);
        instance_of(env, pool, &mut stack, base).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 0);

        stack.push_reference(Some(Arc::clone(&object)));
        check_cast(env, pool, &mut stack, base).unwrap();
        assert!(Arc::ptr_eq(&stack.pop_reference().unwrap().unwrap(), &object));
        stack.push_reference(None);
        check_cast(env, pool, &mut stack, string).unwrap();
        assert!(stack.pop_reference().unwrap().is_none());

        stack.push_reference(Some(object));
        let err = check_cast(env, pool, &mut stack, string).unwrap_err();
        assert_eq!(err.java_class_name(), Some(CLASS_CAST_EXCEPTION));
    }
}

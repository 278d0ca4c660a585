use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use log::{debug, info, trace, warn};
use nom::{
    IResult, Parser,
    bytes::complete::take,
    multi::count,
    number::complete::{be_u16, be_u32},
};
use parking_lot::RwLock;

use crate::{
    class::{AttributeInfo, ClassFile, ConstantPoolInfo, FieldInfo, MethodInfo},
    descriptor::{ValueType, parse_field_descriptor, parse_method_descriptor},
    runtime::{
        BootstrapMethod, ClassAttributes, ClassLoader, ClassState, CodeAttribute,
        EnclosingMethod, Exception, ExceptionTableItem, Field, FieldId, InnerClass,
        InstanceKlass, Klass, Linkage, Method, Runtime, Value, VmResult, decode_double,
        decode_float, decode_long, ensure_mirror,
        famous_classes::{
            CLASS_FORMAT_ERROR, INCOMPATIBLE_CLASS_CHANGE_ERROR, NO_CLASS_DEF_FOUND_ERROR,
            OBJECT_CLASS, STRING_CLASS, VERIFY_ERROR,
        },
        require_class,
    },
};

const CONSTRUCTOR_NAME: &str = "<init>";

/// Turns a parsed class file into a linked class defined by `loader`.
pub(crate) fn define_instance_class(
    runtime: &Runtime,
    name: &str,
    class_file: Arc<ClassFile>,
    loader: Option<Weak<dyn ClassLoader>>,
) -> VmResult<Arc<Klass>> {
    let klass = Klass::allocate_instance(class_file, loader)?;
    if klass.name().as_ref() != name {
        return Err(Exception::linkage(
            NO_CLASS_DEF_FOUND_ERROR,
            format!("{name} (wrong name: {})", klass.name()),
        ));
    }
    link_and_init(runtime, &klass)?;
    ensure_mirror(runtime, &klass)?;

    let loader_name = klass
        .class_loader()
        .map_or_else(|| "bootstrap".to_string(), |loader| loader.name().to_string());
    if runtime.options().verbose_class_loading {
        info!("defined {name} by {loader_name}");
    } else {
        debug!("defined {name} by {loader_name}");
    }
    Ok(klass)
}

/// Links an `Allocated` instance class: superclass, interfaces, method
/// tables, field layout, constant pool and class attributes. On failure the
/// class ends in `InitializationError` with nothing published.
pub fn link_and_init(runtime: &Runtime, klass: &Arc<Klass>) -> VmResult<()> {
    let instance = klass.require_instance()?;
    if klass.state() != ClassState::Allocated {
        return Err(Exception::internal(format!(
            "{} is already {:?}",
            klass.name(),
            klass.state()
        )));
    }
    let linked = link(runtime, klass, instance)
        .and_then(|linkage| instance.set_linkage(linkage))
        .and_then(|()| instance.constant_pool().attach(Arc::clone(instance.class_file())))
        .and_then(|()| klass.transition(ClassState::Linked));
    if let Err(err) = &linked {
        klass.mark_initialization_error();
        warn!("failed to link {}: {err}", klass.name());
    }
    linked
}

fn link(runtime: &Runtime, klass: &Arc<Klass>, instance: &InstanceKlass) -> VmResult<Linkage> {
    let class_file = instance.class_file();
    let loader = klass.class_loader();
    let loader = loader.as_deref();

    let super_class = link_super_class(runtime, loader, klass, class_file)?;
    let super_instance = super_class.as_ref().and_then(|s| s.as_instance());

    // interfaces
    let mut declared_interfaces = Vec::with_capacity(class_file.interfaces.len());
    let mut interfaces: HashMap<Arc<str>, Arc<Klass>> = super_instance
        .into_iter()
        .flat_map(|super_class| super_class.all_interfaces())
        .map(|interface| (Arc::clone(interface.name()), Arc::clone(interface)))
        .collect();
    for &index in &class_file.interfaces {
        let name = class_name(class_file, index)?;
        let interface = require_class(loader, runtime, &name)?;
        let Some(interface_instance) = interface.as_instance() else {
            return Err(Exception::linkage(
                VERIFY_ERROR,
                format!("{} implements non-instance type {name}", klass.name()),
            ));
        };
        if !interface.is_interface() {
            return Err(Exception::linkage(
                INCOMPATIBLE_CLASS_CHANGE_ERROR,
                format!("{} implements class {name}", klass.name()),
            ));
        }
        for inherited in interface_instance.all_interfaces() {
            interfaces.insert(Arc::clone(inherited.name()), Arc::clone(inherited));
        }
        interfaces.insert(name, Arc::clone(&interface));
        declared_interfaces.push(interface);
    }

    // methods
    let mut methods = HashMap::with_capacity(class_file.methods.len());
    let mut vtable: HashMap<String, Arc<Method>> = super_instance
        .into_iter()
        .flat_map(|super_class| super_class.vtable())
        .map(|(key, method)| (key.clone(), Arc::clone(method)))
        .collect();
    let mut pftable = HashMap::new();
    let mut stable = HashMap::new();
    for info in &class_file.methods {
        let method = Arc::new(parse_method(class_file, info, instance.this_weak(), klass.name())?);
        let key = method.identity();
        if methods.contains_key(&key) {
            return Err(Exception::linkage(
                CLASS_FORMAT_ERROR,
                format!("{} declares {key} twice", klass.name()),
            ));
        }
        if method.is_static() {
            stable.insert(key.clone(), Arc::clone(&method));
        } else if method.is_private() || method.name().as_ref() == CONSTRUCTOR_NAME {
            pftable.insert(key.clone(), Arc::clone(&method));
        } else {
            if let Some(overridden) = vtable.get(&key) {
                if overridden.is_final() {
                    return Err(Exception::linkage(
                        VERIFY_ERROR,
                        format!(
                            "{} overrides final method {key} of {}",
                            klass.name(),
                            overridden.owner_name()
                        ),
                    ));
                }
            }
            if method.is_final() {
                pftable.insert(key.clone(), Arc::clone(&method));
            }
            // overwrite: the subclass always wins over the copied entry
            vtable.insert(key.clone(), Arc::clone(&method));
        }
        methods.insert(key, method);
    }
    // default and abstract interface methods the class chain does not provide
    for interface in &declared_interfaces {
        let Some(interface) = interface.as_instance() else {
            continue;
        };
        for (key, method) in interface.vtable() {
            if !vtable.contains_key(key) {
                vtable.insert(key.clone(), Arc::clone(method));
            }
        }
    }

    // fields: superclass layout is kept as is, then interfaces, then own
    let mut instance_fields: Vec<FieldId> = super_instance
        .map(|super_class| super_class.instance_fields().to_vec())
        .unwrap_or_default();
    let mut instance_field_index: HashMap<String, usize> = instance_fields
        .iter()
        .enumerate()
        .filter_map(|(offset, field_id)| Some((field_id.field()?.identity(), offset)))
        .collect();
    for interface in declared_interfaces.iter().filter_map(|i| i.as_instance()) {
        for field in interface.instance_fields().iter().filter_map(FieldId::field) {
            let key = field.identity();
            if instance_field_index.contains_key(&key) {
                continue;
            }
            let offset = instance_fields.len();
            instance_field_index.insert(key, offset);
            instance_fields.push(FieldId::new(offset, Arc::clone(field)));
        }
    }
    let mut static_fields = HashMap::new();
    let mut static_values = Vec::new();
    for info in &class_file.fields {
        let field = Arc::new(parse_field(class_file, info, instance.this_weak(), klass.name())?);
        let key = field.identity();
        if instance_field_index.contains_key(&key) || static_fields.contains_key(&key) {
            return Err(Exception::linkage(
                CLASS_FORMAT_ERROR,
                format!("{} declares field {key} twice", klass.name()),
            ));
        }
        if field.is_static() {
            let offset = static_values.len();
            static_values.push(static_initial_value(runtime, class_file, &field)?);
            trace!("{}: static {key} @{offset}", klass.name());
            static_fields.insert(key, FieldId::new(offset, field));
        } else {
            let offset = instance_fields.len();
            trace!("{}: field {key} @{offset}", klass.name());
            instance_field_index.insert(key, offset);
            instance_fields.push(FieldId::new(offset, field));
        }
    }

    let attributes = parse_class_attributes(class_file)?;

    if log::log_enabled!(log::Level::Trace) {
        for (key, method) in &vtable {
            trace!("{} vtable: {key} -> {}", klass.name(), method.owner_name());
        }
    }

    Ok(Linkage {
        super_class,
        declared_interfaces,
        interfaces,
        methods,
        vtable,
        pftable,
        stable,
        instance_fields,
        instance_field_index,
        static_fields,
        static_values: RwLock::new(static_values.into_boxed_slice()),
        attributes,
    })
}

fn link_super_class(
    runtime: &Runtime,
    loader: Option<&dyn ClassLoader>,
    klass: &Klass,
    class_file: &ClassFile,
) -> VmResult<Option<Arc<Klass>>> {
    let is_object = klass.name().as_ref() == OBJECT_CLASS;
    if class_file.super_class == 0 {
        if is_object {
            return Ok(None);
        }
        return Err(Exception::linkage(
            VERIFY_ERROR,
            format!("{} has no superclass", klass.name()),
        ));
    }
    if is_object {
        return Err(Exception::linkage(
            VERIFY_ERROR,
            format!("{OBJECT_CLASS} must not have a superclass"),
        ));
    }
    let name = class_name(class_file, class_file.super_class)?;
    let super_class = require_class(loader, runtime, &name)?;
    if super_class.as_instance().is_none() {
        return Err(Exception::linkage(
            VERIFY_ERROR,
            format!("{} extends non-instance type {name}", klass.name()),
        ));
    }
    if super_class.is_interface() {
        return Err(Exception::linkage(
            INCOMPATIBLE_CLASS_CHANGE_ERROR,
            format!("class {} has interface {name} as super class", klass.name()),
        ));
    }
    if super_class.is_final() {
        return Err(Exception::linkage(
            VERIFY_ERROR,
            format!("cannot inherit from final class {name}"),
        ));
    }
    Ok(Some(super_class))
}

fn utf8(class_file: &ClassFile, index: u16) -> VmResult<Arc<str>> {
    class_file.utf8_str(index).ok_or_else(|| {
        Exception::linkage(
            CLASS_FORMAT_ERROR,
            format!("constant #{index} is not a valid Utf8 entry"),
        )
    })
}

fn class_name(class_file: &ClassFile, index: u16) -> VmResult<Arc<str>> {
    class_file.class_name(index).ok_or_else(|| {
        Exception::linkage(
            CLASS_FORMAT_ERROR,
            format!("constant #{index} is not a valid Class entry"),
        )
    })
}

fn attribute_name(class_file: &ClassFile, attribute: &AttributeInfo) -> VmResult<Arc<str>> {
    utf8(class_file, attribute.attribute_name_index)
}

fn parse_method(
    class_file: &ClassFile,
    info: &MethodInfo,
    owner: &Weak<Klass>,
    owner_name: &Arc<str>,
) -> VmResult<Method> {
    let name = utf8(class_file, info.name_index)?;
    let descriptor = utf8(class_file, info.descriptor_index)?;
    let (_, signature) = parse_method_descriptor(&descriptor).map_err(|_| {
        Exception::linkage(
            CLASS_FORMAT_ERROR,
            format!("invalid method descriptor {descriptor} for {name}"),
        )
    })?;
    let mut code = None;
    for attribute in &info.attributes {
        if attribute_name(class_file, attribute)?.as_ref() == "Code" {
            let (_, parsed) = parse_code_attribute(&attribute.info)?;
            code = Some(parsed);
        }
    }
    Ok(Method::new(
        owner.clone(),
        Arc::clone(owner_name),
        name,
        descriptor,
        signature,
        info.access_flags,
        code,
    ))
}

fn parse_field(
    class_file: &ClassFile,
    info: &FieldInfo,
    owner: &Weak<Klass>,
    owner_name: &Arc<str>,
) -> VmResult<Field> {
    let name = utf8(class_file, info.name_index)?;
    let descriptor = utf8(class_file, info.descriptor_index)?;
    let (_, field_type) = parse_field_descriptor(&descriptor).map_err(|_| {
        Exception::linkage(
            CLASS_FORMAT_ERROR,
            format!("invalid field descriptor {descriptor} for {name}"),
        )
    })?;
    let mut constant_value_index = None;
    for attribute in &info.attributes {
        if attribute_name(class_file, attribute)?.as_ref() == "ConstantValue" {
            let (_, index) = be_u16(attribute.info.as_slice())?;
            constant_value_index = Some(index);
        }
    }
    Ok(Field::new(
        owner.clone(),
        Arc::clone(owner_name),
        name,
        descriptor,
        field_type.into_field_type(),
        info.access_flags,
        constant_value_index,
    ))
}

/// Static finals with a `ConstantValue` take their literal, everything else
/// starts at the type default and is left to `<clinit>`.
fn static_initial_value(runtime: &Runtime, class_file: &ClassFile, field: &Field) -> VmResult<Value> {
    let value_type = field.value_type();
    let (true, Some(index)) = (field.is_final(), field.constant_value_index()) else {
        return Ok(Value::default_for(value_type));
    };
    let mismatch = || {
        Exception::linkage(
            VERIFY_ERROR,
            format!(
                "constant value #{index} does not fit field {}",
                field.identity()
            ),
        )
    };
    let constant = class_file.constant(index).ok_or_else(mismatch)?;
    let value = match (constant, value_type) {
        (ConstantPoolInfo::Integer(value), value_type) if value_type.is_int_like() => {
            Value::Int(*value)
        }
        (ConstantPoolInfo::Float(bits), ValueType::Float) => Value::Float(decode_float(*bits)),
        (
            ConstantPoolInfo::Long {
                high_bytes,
                low_bytes,
            },
            ValueType::Long,
        ) => Value::Long(decode_long(*high_bytes, *low_bytes)),
        (
            ConstantPoolInfo::Double {
                high_bytes,
                low_bytes,
            },
            ValueType::Double,
        ) => Value::Double(decode_double(*high_bytes, *low_bytes)),
        (ConstantPoolInfo::String { string_index }, ValueType::Object)
            if field.descriptor().as_ref() == format!("L{STRING_CLASS};") =>
        {
            let value = utf8(class_file, *string_index)?;
            Value::Reference(Some(runtime.string_table().intern(runtime, &value)?))
        }
        _ => return Err(mismatch()),
    };
    Ok(value)
}

fn parse_code_attribute(input: &[u8]) -> IResult<&[u8], CodeAttribute> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;
    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length).parse(input)?;
    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) =
        count(parse_exception_table_item, exception_table_length as usize).parse(input)?;
    // nested attributes (LineNumberTable and friends) are not kept
    let (input, attributes_count) = be_u16(input)?;
    let (input, _) = count(skip_attribute, attributes_count as usize).parse(input)?;
    Ok((
        input,
        CodeAttribute {
            max_stack,
            max_locals,
            code: Arc::from(code),
            exception_table,
        },
    ))
}

fn parse_exception_table_item(input: &[u8]) -> IResult<&[u8], ExceptionTableItem> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;
    Ok((
        input,
        ExceptionTableItem {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

fn skip_attribute(input: &[u8]) -> IResult<&[u8], ()> {
    let (input, _) = be_u16(input)?;
    let (input, length) = be_u32(input)?;
    let (input, _) = take(length).parse(input)?;
    Ok((input, ()))
}

fn parse_class_attributes(class_file: &ClassFile) -> VmResult<ClassAttributes> {
    let mut attributes = ClassAttributes::default();
    for attribute in &class_file.attributes {
        let input = attribute.info.as_slice();
        match attribute_name(class_file, attribute)?.as_ref() {
            "SourceFile" => {
                let (_, index) = be_u16(input)?;
                attributes.source_file = Some(utf8(class_file, index)?);
            }
            "Signature" => {
                let (_, index) = be_u16(input)?;
                attributes.signature = Some(utf8(class_file, index)?);
            }
            "InnerClasses" => {
                let (input, number_of_classes) = be_u16(input)?;
                let (_, inner_classes) =
                    count(parse_inner_class, number_of_classes as usize).parse(input)?;
                attributes.inner_classes = inner_classes;
            }
            "EnclosingMethod" => {
                let (input, class_index) = be_u16(input)?;
                let (_, method_index) = be_u16(input)?;
                attributes.enclosing_method = Some(EnclosingMethod {
                    class_index,
                    method_index,
                });
            }
            "BootstrapMethods" => {
                let (input, num_bootstrap_methods) = be_u16(input)?;
                let (_, bootstrap_methods) =
                    count(parse_bootstrap_method, num_bootstrap_methods as usize).parse(input)?;
                attributes.bootstrap_methods = bootstrap_methods;
            }
            _ => {}
        }
    }
    Ok(attributes)
}

fn parse_inner_class(input: &[u8]) -> IResult<&[u8], InnerClass> {
    let (input, inner_class_info_index) = be_u16(input)?;
    let (input, outer_class_info_index) = be_u16(input)?;
    let (input, inner_name_index) = be_u16(input)?;
    let (input, inner_class_access_flags) = be_u16(input)?;
    Ok((
        input,
        InnerClass {
            inner_class_info_index,
            outer_class_info_index,
            inner_name_index,
            inner_class_access_flags,
        },
    ))
}

fn parse_bootstrap_method(input: &[u8]) -> IResult<&[u8], BootstrapMethod> {
    let (input, bootstrap_method_ref) = be_u16(input)?;
    let (input, num_bootstrap_arguments) = be_u16(input)?;
    let (input, bootstrap_arguments) =
        count(be_u16, num_bootstrap_arguments as usize).parse(input)?;
    Ok((
        input,
        BootstrapMethod {
            bootstrap_method_ref,
            bootstrap_arguments,
        },
    ))
}

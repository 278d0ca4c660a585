use std::sync::Arc;

use crate::{
    descriptor::ValueType,
    runtime::{
        Exception, Method, OperandStack, Runtime, Value, VmResult,
        famous_classes::NULL_POINTER_EXCEPTION,
    },
};

/// The part of a Java thread the execution engine calls back into: running
/// a method means pushing a frame and interpreting it until it returns.
pub trait JavaThread: Send + Sync {
    /// `args` holds the receiver first for instance methods. Returns `None`
    /// for `void` methods.
    fn run_method(
        &self,
        runtime: &Runtime,
        method: &Arc<Method>,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>>;
}

/// What every execution-engine operation runs against.
#[derive(Clone, Copy)]
pub struct VmEnv<'a> {
    pub runtime: &'a Runtime,
    pub thread: &'a dyn JavaThread,
}

impl<'a> VmEnv<'a> {
    pub fn new(runtime: &'a Runtime, thread: &'a dyn JavaThread) -> Self {
        Self { runtime, thread }
    }
}

/// A call about to be made: moves the arguments from the caller's operand
/// stack into the callee and the result back.
pub struct InvocationContext<'e> {
    env: VmEnv<'e>,
    method: Arc<Method>,
}

impl<'e> InvocationContext<'e> {
    pub fn new(env: VmEnv<'e>, method: Arc<Method>) -> Self {
        Self { env, method }
    }

    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    /// Pops the declared parameters, then the receiver for instance methods.
    /// The returned arguments are in declaration order, receiver first.
    pub fn pop_arguments(&self, stack: &mut dyn OperandStack) -> VmResult<Vec<Value>> {
        pop_arguments(&self.method, stack)
    }

    pub fn invoke(self, stack: &mut dyn OperandStack) -> VmResult<()> {
        let args = self.pop_arguments(stack)?;
        self.invoke_with(stack, args)
    }

    /// Runs the method with arguments already taken off the stack.
    pub fn invoke_with(self, stack: &mut dyn OperandStack, args: Vec<Value>) -> VmResult<()> {
        let result = self
            .env
            .thread
            .run_method(self.env.runtime, &self.method, args)?;
        push_result(stack, &self.method, result)
    }
}

pub(crate) fn pop_arguments(method: &Method, stack: &mut dyn OperandStack) -> VmResult<Vec<Value>> {
    let parameters = method.parameters();
    let mut args = Vec::with_capacity(parameters.len() + 1);
    for parameter in parameters.iter().rev() {
        args.push(pop_typed(stack, parameter.value_type())?);
    }
    if !method.is_static() {
        let receiver = stack.pop_reference()?.ok_or_else(|| {
            Exception::runtime(
                NULL_POINTER_EXCEPTION,
                format!(
                    "cannot invoke {}.{}{} on null",
                    method.owner_name(),
                    method.name(),
                    method.descriptor()
                ),
            )
        })?;
        args.push(Value::Reference(Some(receiver)));
    }
    args.reverse();
    Ok(args)
}

fn push_result(stack: &mut dyn OperandStack, method: &Method, result: Option<Value>) -> VmResult<()> {
    let return_type = method.return_value_type();
    match (return_type, result) {
        (ValueType::Void, None) => Ok(()),
        (ValueType::Void, Some(value)) => Err(Exception::internal(format!(
            "void method {}.{} returned a {} value",
            method.owner_name(),
            method.name(),
            value.shape()
        ))),
        (_, None) => Err(Exception::internal(format!(
            "{}.{}{} returned nothing",
            method.owner_name(),
            method.name(),
            method.descriptor()
        ))),
        (return_type, Some(value)) => {
            if !value.fits(return_type) {
                return Err(Exception::internal(format!(
                    "{}.{}{} returned a {} value",
                    method.owner_name(),
                    method.name(),
                    method.descriptor(),
                    value.shape()
                )));
            }
            stack.push(narrow(return_type, value));
            Ok(())
        }
    }
}

/// Pops a value of the given storage shape, narrowing int-like values.
pub fn pop_typed(stack: &mut dyn OperandStack, value_type: ValueType) -> VmResult<Value> {
    let value = match value_type {
        ValueType::Float => Value::Float(stack.pop_float()?),
        ValueType::Long => Value::Long(stack.pop_long()?),
        ValueType::Double => Value::Double(stack.pop_double()?),
        ValueType::Object | ValueType::Array => Value::Reference(stack.pop_reference()?),
        ValueType::Void => return Err(Exception::internal("cannot pop a void value")),
        int_like => Value::Int(narrow_int(int_like, stack.pop_int()?)),
    };
    Ok(value)
}

/// Truncates an int to the range of a narrower int-like type: booleans keep
/// bit 0, bytes and shorts sign-extend, chars zero-extend.
pub fn narrow_int(value_type: ValueType, value: i32) -> i32 {
    match value_type {
        ValueType::Boolean => value & 1,
        ValueType::Byte => value as i8 as i32,
        ValueType::Short => value as i16 as i32,
        ValueType::Char => value as u16 as i32,
        _ => value,
    }
}

pub(crate) fn narrow(value_type: ValueType, value: Value) -> Value {
    match value {
        Value::Int(int) => Value::Int(narrow_int(value_type, int)),
        other => other,
    }
}

use crate::runtime::{Exception, Oop, Value, VmResult};

/// The operand stack as the execution engine sees it. Implementors only
/// provide untyped `push`/`pop`; the typed accessors check the shape of
/// every popped value.
pub trait OperandStack {
    fn push(&mut self, value: Value);

    fn pop(&mut self) -> VmResult<Value>;

    fn push_int(&mut self, value: i32) {
        self.push(Value::Int(value));
    }

    fn pop_int(&mut self) -> VmResult<i32> {
        match self.pop()? {
            Value::Int(value) => Ok(value),
            other => Err(shape_mismatch("int", &other)),
        }
    }

    fn push_float(&mut self, value: f32) {
        self.push(Value::Float(value));
    }

    fn pop_float(&mut self) -> VmResult<f32> {
        match self.pop()? {
            Value::Float(value) => Ok(value),
            other => Err(shape_mismatch("float", &other)),
        }
    }

    fn push_long(&mut self, value: i64) {
        self.push(Value::Long(value));
    }

    fn pop_long(&mut self) -> VmResult<i64> {
        match self.pop()? {
            Value::Long(value) => Ok(value),
            other => Err(shape_mismatch("long", &other)),
        }
    }

    fn push_double(&mut self, value: f64) {
        self.push(Value::Double(value));
    }

    fn pop_double(&mut self) -> VmResult<f64> {
        match self.pop()? {
            Value::Double(value) => Ok(value),
            other => Err(shape_mismatch("double", &other)),
        }
    }

    fn push_reference(&mut self, value: Option<Oop>) {
        self.push(Value::Reference(value));
    }

    fn pop_reference(&mut self) -> VmResult<Option<Oop>> {
        match self.pop()? {
            Value::Reference(value) => Ok(value),
            other => Err(shape_mismatch("reference", &other)),
        }
    }
}

fn shape_mismatch(expected: &str, found: &Value) -> Exception {
    Exception::internal(format!(
        "expected {expected} on the operand stack, found {}",
        found.shape()
    ))
}

/// `Vec`-backed operand stack. Long and double values take one slot.
#[derive(Debug, Default, Clone)]
pub struct Stack {
    slots: Vec<Value>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_stack: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_stack),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.slots.last()
    }
}

impl OperandStack for Stack {
    fn push(&mut self, value: Value) {
        self.slots.push(value);
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.slots
            .pop()
            .ok_or_else(|| Exception::internal("operand stack underflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_push_pop() {
        let mut stack = Stack::with_capacity(4);
        stack.push_int(-3);
        stack.push_long(1 << 40);
        stack.push_double(0.5);
        stack.push_reference(None);
        assert_eq!(stack.len(), 4);

        assert!(stack.pop_reference().unwrap().is_none());
        assert_eq!(stack.pop_double().unwrap(), 0.5);
        assert_eq!(stack.pop_long().unwrap(), 1 << 40);
        assert_eq!(stack.pop_int().unwrap(), -3);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_shape_mismatch_is_internal() {
        let mut stack = Stack::new();
        stack.push_float(1.0);
        let err = stack.pop_int().unwrap_err();
        assert!(err.is_internal());
        assert!(stack.pop().unwrap_err().is_internal());
    }
}

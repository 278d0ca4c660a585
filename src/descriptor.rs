use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_until,
    character::complete::{anychar, char},
    combinator::{eof, map, map_opt, value},
    multi::many0,
    sequence::{delimited, preceded, terminated},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor(pub(crate) FieldType);

impl FieldDescriptor {
    pub fn field_type(&self) -> &FieldType {
        &self.0
    }

    pub fn into_field_type(self) -> FieldType {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub(crate) parameters: Vec<FieldType>,
    pub(crate) return_type: ReturnType,
}

impl MethodDescriptor {
    pub fn parameters(&self) -> &[FieldType] {
        &self.parameters
    }

    pub fn return_type(&self) -> Option<&FieldType> {
        self.return_type.as_ref()
    }

    pub fn return_value_type(&self) -> ValueType {
        self.return_type
            .as_ref()
            .map_or(ValueType::Void, FieldType::value_type)
    }
}

pub type ReturnType = Option<FieldType>;

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Object(String),
    Short,
    Boolean,
    Array(Box<FieldType>),
}

/// The storage shape of a value, as seen by field and stack operations.
///
/// `Byte`, `Boolean`, `Char`, `Short` and `Int` all live in a 32-bit signed
/// cell; the distinction only matters when narrowing a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Void,
    Byte,
    Boolean,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Object,
    Array,
}

impl ValueType {
    pub fn is_int_like(self) -> bool {
        matches!(
            self,
            ValueType::Byte
                | ValueType::Boolean
                | ValueType::Char
                | ValueType::Short
                | ValueType::Int
        )
    }

    pub fn is_reference(self) -> bool {
        matches!(self, ValueType::Object | ValueType::Array)
    }

    pub fn primitive_descriptor(self) -> Option<char> {
        let ch = match self {
            ValueType::Byte => 'B',
            ValueType::Boolean => 'Z',
            ValueType::Char => 'C',
            ValueType::Short => 'S',
            ValueType::Int => 'I',
            ValueType::Float => 'F',
            ValueType::Long => 'J',
            ValueType::Double => 'D',
            ValueType::Void | ValueType::Object | ValueType::Array => return None,
        };
        Some(ch)
    }
}

impl FieldType {
    pub fn is_long(&self) -> bool {
        matches!(self, FieldType::Long | FieldType::Double)
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            FieldType::Byte => ValueType::Byte,
            FieldType::Char => ValueType::Char,
            FieldType::Double => ValueType::Double,
            FieldType::Float => ValueType::Float,
            FieldType::Int => ValueType::Int,
            FieldType::Long => ValueType::Long,
            FieldType::Short => ValueType::Short,
            FieldType::Boolean => ValueType::Boolean,
            FieldType::Object(_) => ValueType::Object,
            FieldType::Array(_) => ValueType::Array,
        }
    }

    pub fn to_descriptor(&self) -> String {
        match self {
            FieldType::Object(class_name) => format!("L{class_name};"),
            FieldType::Array(component) => format!("[{}", component.to_descriptor()),
            primitive => primitive
                .value_type()
                .primitive_descriptor()
                .map(String::from)
                .unwrap_or_default(),
        }
    }

    /// Number of `[` prefixes, 0 for non-array types.
    pub fn dimension(&self) -> usize {
        match self {
            FieldType::Array(element) => 1 + element.dimension(),
            _ => 0,
        }
    }
}

pub fn parse_field_descriptor(input: &str) -> IResult<&str, FieldDescriptor> {
    map(terminated(field_type, eof), FieldDescriptor).parse(input)
}

pub fn parse_method_descriptor(input: &str) -> IResult<&str, MethodDescriptor> {
    map(
        terminated(
            (
                delimited(char('('), many0(field_type), char(')')),
                parse_return_type_descriptor,
            ),
            eof,
        ),
        |(parameters, return_type)| MethodDescriptor {
            parameters,
            return_type,
        },
    )
    .parse(input)
}

/// A field type, or `V` for `None`.
pub fn parse_return_type_descriptor(input: &str) -> IResult<&str, ReturnType> {
    alt((map(field_type, Some), value(None, char('V')))).parse(input)
}

fn field_type(input: &str) -> IResult<&str, FieldType> {
    alt((
        map_opt(anychar, primitive_type),
        map(delimited(char('L'), take_until(";"), char(';')), |name: &str| {
            FieldType::Object(name.to_string())
        }),
        map(preceded(char('['), field_type), |component| {
            FieldType::Array(Box::new(component))
        }),
    ))
    .parse(input)
}

fn primitive_type(ch: char) -> Option<FieldType> {
    Some(match ch {
        'Z' => FieldType::Boolean,
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'S' => FieldType::Short,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'F' => FieldType::Float,
        'D' => FieldType::Double,
        _ => return None,
    })
}

use std::fmt::{self, Display};

pub use attributes::*;
pub use constant_pool::*;
pub use field::*;
pub use klass::*;
pub use method::*;
pub use object::*;

use crate::runtime::famous_classes::{CLASS_FORMAT_ERROR, NO_CLASS_DEF_FOUND_ERROR};

mod attributes;
mod constant_pool;
mod field;
mod klass;
mod method;
mod object;

/// Everything that can go wrong while loading, linking or executing.
///
/// `Linkage` and `Runtime` carry the internal name of the Java throwable the
/// interpreter is expected to raise; `Internal` marks a broken invariant of
/// this crate and is never caused by well-formed bytecode alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    Linkage {
        error_class: &'static str,
        message: String,
    },
    Runtime {
        exception_class: &'static str,
        message: String,
    },
    Internal(String),
}

impl Exception {
    pub(crate) fn linkage(error_class: &'static str, message: impl Into<String>) -> Self {
        Exception::Linkage {
            error_class,
            message: message.into(),
        }
    }

    pub(crate) fn runtime(exception_class: &'static str, message: impl Into<String>) -> Self {
        Exception::Runtime {
            exception_class,
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Exception::Internal(message.into())
    }

    /// Internal name of the Java throwable, if this error maps to one.
    pub fn java_class_name(&self) -> Option<&'static str> {
        match self {
            Exception::Linkage { error_class, .. } => Some(*error_class),
            Exception::Runtime {
                exception_class, ..
            } => Some(*exception_class),
            Exception::Internal(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Exception::Linkage { message, .. }
            | Exception::Runtime { message, .. }
            | Exception::Internal(message) => message,
        }
    }

    pub fn is_linkage_error(&self) -> bool {
        matches!(self, Exception::Linkage { .. })
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Exception::Internal(_))
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::Linkage {
                error_class,
                message,
            } => write!(f, "{}: {message}", error_class.replace('/', ".")),
            Exception::Runtime {
                exception_class,
                message,
            } => write!(f, "{}: {message}", exception_class.replace('/', ".")),
            Exception::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for Exception {}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Exception {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        let message = match err {
            nom::Err::Incomplete(_) => "truncated class file".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                format!("{:?} with {} bytes left", e.code, e.input.len())
            }
        };
        Exception::linkage(CLASS_FORMAT_ERROR, message)
    }
}

impl From<std::io::Error> for Exception {
    fn from(err: std::io::Error) -> Self {
        Exception::linkage(NO_CLASS_DEF_FOUND_ERROR, err.to_string())
    }
}

impl From<zip::result::ZipError> for Exception {
    fn from(err: zip::result::ZipError) -> Self {
        Exception::linkage(NO_CLASS_DEF_FOUND_ERROR, err.to_string())
    }
}

pub type VmResult<T> = ::std::result::Result<T, Exception>;

use std::sync::Arc;

use log::warn;
use nom::{
    IResult, Parser,
    bytes::complete::tag,
    combinator::{eof, map},
    error::{ErrorKind, make_error},
    multi::{length_count, length_data},
    number::complete::{be_i32, be_u16, be_u32, u8},
};

use crate::{
    class::{AttributeInfo, ClassFile, ConstantPoolInfo, FieldInfo, MethodInfo},
    consts::{ClassAccessFlag, ConstantTag, FieldAccessFlag, MethodAccessFlag},
};

type ParseResult<'a, T> = IResult<&'a [u8], T>;

const MAGIC: [u8; 4] = [0xca, 0xfe, 0xba, 0xbe];

/// Parses a whole class file. Constants are kept raw: numbers as their bit
/// patterns, strings as modified UTF-8 bytes.
pub fn class_file(input: &[u8]) -> Result<ClassFile, nom::Err<nom::error::Error<&[u8]>>> {
    let (input, (minor_version, major_version)) = header(input)?;
    let (input, constant_pool) = constant_pool(input)?;
    let (input, (access_flags, this_class, super_class)) = class_header(input)?;
    let (input, interfaces) = interfaces(input)?;
    let (input, fields) = length_count(be_u16, field_info).parse(input)?;
    let (input, methods) = length_count(be_u16, method_info).parse(input)?;
    let (input, attributes) = attributes(input)?;
    eof(input)?;

    Ok(ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags: ClassAccessFlag::from_bits_retain(access_flags),
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn header(input: &[u8]) -> ParseResult<'_, (u16, u16)> {
    let (input, _) = tag(&MAGIC[..]).parse(input)?;
    (be_u16, be_u16).parse(input)
}

fn class_header(input: &[u8]) -> ParseResult<'_, (u16, u16, u16)> {
    (be_u16, be_u16, be_u16).parse(input)
}

fn interfaces(input: &[u8]) -> ParseResult<'_, Vec<u16>> {
    length_count(be_u16, be_u16).parse(input)
}

fn constant_pool(input: &[u8]) -> ParseResult<'_, Vec<ConstantPoolInfo>> {
    let (mut input, count) = be_u16(input)?;
    // index 0 is never stored
    let slots = usize::from(count).saturating_sub(1);
    let mut entries = Vec::with_capacity(slots);
    while entries.len() < slots {
        let entry;
        (input, entry) = constant(input)?;
        let wide = matches!(entry.tag(), ConstantTag::Long | ConstantTag::Double);
        entries.push(entry);
        if wide {
            entries.push(ConstantPoolInfo::Empty);
        }
    }
    Ok((input, entries))
}

fn index_pair(input: &[u8]) -> ParseResult<'_, (u16, u16)> {
    (be_u16, be_u16).parse(input)
}

fn wide_bits(input: &[u8]) -> ParseResult<'_, (u32, u32)> {
    (be_u32, be_u32).parse(input)
}

fn constant(input: &[u8]) -> ParseResult<'_, ConstantPoolInfo> {
    let (input, raw_tag) = u8(input)?;
    let Some(constant_tag) = ConstantTag::from_u8(raw_tag) else {
        warn!("unknown constant pool tag {raw_tag}");
        return Err(nom::Err::Error(make_error(input, ErrorKind::Tag)));
    };
    match constant_tag {
        ConstantTag::Utf8 => map(length_data(be_u16), |bytes: &[u8]| {
            ConstantPoolInfo::Utf8(Arc::from(bytes))
        })
        .parse(input),
        ConstantTag::Integer => map(be_i32, ConstantPoolInfo::Integer).parse(input),
        ConstantTag::Float => map(be_u32, ConstantPoolInfo::Float).parse(input),
        ConstantTag::Long => map(wide_bits, |(high_bytes, low_bytes)| ConstantPoolInfo::Long {
            high_bytes,
            low_bytes,
        })
        .parse(input),
        ConstantTag::Double => map(wide_bits, |(high_bytes, low_bytes)| {
            ConstantPoolInfo::Double {
                high_bytes,
                low_bytes,
            }
        })
        .parse(input),
        ConstantTag::Class => {
            map(be_u16, |name_index| ConstantPoolInfo::Class { name_index }).parse(input)
        }
        ConstantTag::String => {
            map(be_u16, |string_index| ConstantPoolInfo::String { string_index }).parse(input)
        }
        ConstantTag::Fieldref => map(index_pair, |(class_index, name_and_type_index)| {
            ConstantPoolInfo::Fieldref {
                class_index,
                name_and_type_index,
            }
        })
        .parse(input),
        ConstantTag::Methodref => map(index_pair, |(class_index, name_and_type_index)| {
            ConstantPoolInfo::Methodref {
                class_index,
                name_and_type_index,
            }
        })
        .parse(input),
        ConstantTag::InterfaceMethodref => {
            map(index_pair, |(class_index, name_and_type_index)| {
                ConstantPoolInfo::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                }
            })
            .parse(input)
        }
        ConstantTag::NameAndType => map(index_pair, |(name_index, descriptor_index)| {
            ConstantPoolInfo::NameAndType {
                name_index,
                descriptor_index,
            }
        })
        .parse(input),
        ConstantTag::MethodHandle => map((u8, be_u16), |(reference_kind, reference_index)| {
            ConstantPoolInfo::MethodHandle {
                reference_kind,
                reference_index,
            }
        })
        .parse(input),
        ConstantTag::MethodType => map(be_u16, |descriptor_index| {
            ConstantPoolInfo::MethodType { descriptor_index }
        })
        .parse(input),
        ConstantTag::Dynamic => map(
            index_pair,
            |(bootstrap_method_attr_index, name_and_type_index)| ConstantPoolInfo::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            },
        )
        .parse(input),
        ConstantTag::InvokeDynamic => map(
            index_pair,
            |(bootstrap_method_attr_index, name_and_type_index)| {
                ConstantPoolInfo::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
            },
        )
        .parse(input),
        ConstantTag::Module => {
            map(be_u16, |name_index| ConstantPoolInfo::Module { name_index }).parse(input)
        }
        ConstantTag::Package => {
            map(be_u16, |name_index| ConstantPoolInfo::Package { name_index }).parse(input)
        }
        ConstantTag::Empty => Err(nom::Err::Error(make_error(input, ErrorKind::Tag))),
    }
}

/// Fields and methods share one layout: flags, name, descriptor, attributes.
fn member(input: &[u8]) -> ParseResult<'_, (u16, u16, u16, Vec<AttributeInfo>)> {
    (be_u16, be_u16, be_u16, attributes).parse(input)
}

fn field_info(input: &[u8]) -> ParseResult<'_, FieldInfo> {
    map(member, |(flags, name_index, descriptor_index, attributes)| FieldInfo {
        access_flags: FieldAccessFlag::from_bits_retain(flags),
        name_index,
        descriptor_index,
        attributes,
    })
    .parse(input)
}

fn method_info(input: &[u8]) -> ParseResult<'_, MethodInfo> {
    map(member, |(flags, name_index, descriptor_index, attributes)| MethodInfo {
        access_flags: MethodAccessFlag::from_bits_retain(flags),
        name_index,
        descriptor_index,
        attributes,
    })
    .parse(input)
}

fn attributes(input: &[u8]) -> ParseResult<'_, Vec<AttributeInfo>> {
    length_count(be_u16, attribute).parse(input)
}

fn attribute(input: &[u8]) -> ParseResult<'_, AttributeInfo> {
    map((be_u16, length_data(be_u32)), |(attribute_name_index, info): (u16, &[u8])| {
        AttributeInfo {
            attribute_name_index,
            info: info.to_vec(),
        }
    })
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    // public class Empty extends java/lang/Object, no members
    fn empty_class_bytes() -> Vec<u8> {
        let mut bytes = vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 61];
        // five constants in six slots, the long takes two
        bytes.extend_from_slice(&[0, 7]);
        bytes.extend_from_slice(&[1, 0, 5]);
        bytes.extend_from_slice(b"Empty");
        bytes.extend_from_slice(&[7, 0, 1]);
        bytes.extend_from_slice(&[1, 0, 16]);
        bytes.extend_from_slice(b"java/lang/Object");
        bytes.extend_from_slice(&[7, 0, 3]);
        bytes.extend_from_slice(&[5, 0, 0, 0, 1, 0, 0, 0, 2]);
        // access flags, this, super
        bytes.extend_from_slice(&[0, 0x21, 0, 2, 0, 4]);
        // interfaces, fields, methods, attributes
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        bytes
    }

    #[test]
    fn test_parse_minimal_class() {
        let bytes = empty_class_bytes();
        let class = class_file(&bytes).unwrap();
        assert_eq!(class.major_version, 61);
        assert_eq!(class.constant_pool.len(), 6);
        assert_eq!(class.this_class_name().as_deref(), Some("Empty"));
        assert_eq!(class.class_name(class.super_class).as_deref(), Some("java/lang/Object"));
        assert!(class.access_flags.contains(ClassAccessFlag::PUBLIC | ClassAccessFlag::SUPER));
        assert_eq!(
            class.constant(5),
            Some(&ConstantPoolInfo::Long {
                high_bytes: 1,
                low_bytes: 2
            })
        );
        assert_eq!(class.constant(6).map(ConstantPoolInfo::tag), Some(ConstantTag::Empty));
    }

    #[test]
    fn test_truncated_class_is_error() {
        let bytes = empty_class_bytes();
        assert!(class_file(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_bad_magic_is_error() {
        let mut bytes = empty_class_bytes();
        bytes[0] = 0;
        assert!(class_file(&bytes).is_err());
    }
}

//! Descriptor validation, run once when a tag definition is built

use std::collections::HashSet;

use crate::descriptor::{Descriptor, EnumTable, FieldKind, Fields};
use crate::errors::{Error, Result};

/// Validate a descriptor tree
pub fn validate(root: &Descriptor) -> Result<()> {
    if !root.kind.is_block() {
        return Err(Error::schema(
            "<root>",
            &root.name,
            format!("root must form a Block, not a {}", root.kind.type_name()),
        ));
    }
    DescriptorValidator.check(root, "<root>")
}

struct DescriptorValidator;

impl DescriptorValidator {
    /// Validate one descriptor; `block` names the enclosing descriptor
    fn check(&self, desc: &Descriptor, block: &str) -> Result<()> {
        self.check_kind(desc, block)?;
        self.check_common(desc, block)
    }

    fn check_kind(&self, desc: &Descriptor, block: &str) -> Result<()> {
        let fail = |message: String| Err(Error::schema(block, &desc.name, message));
        match &desc.kind {
            FieldKind::Int(spec) => {
                if !(1..=8).contains(&spec.width) {
                    return fail(format!("integer width {} is not between 1 and 8 bytes", spec.width));
                }
                if let Some(table) = &spec.table {
                    check_table(table, block, &desc.name)?;
                }
                Ok(())
            }
            FieldKind::Float { width, .. } => {
                if *width != 4 && *width != 8 {
                    return fail(format!("float width {} is neither 4 nor 8 bytes", width));
                }
                Ok(())
            }
            FieldKind::Str(spec) => {
                if desc.size.is_none() && !spec.terminated {
                    return fail("string needs a size or a terminator".to_string());
                }
                Ok(())
            }
            FieldKind::Bytes => {
                if desc.size.is_none() {
                    return fail("raw bytes need a size".to_string());
                }
                Ok(())
            }
            FieldKind::Pad(_) | FieldKind::Void => Ok(()),
            FieldKind::BitStruct { width, fields, .. } => {
                if !(1..=8).contains(width) {
                    return fail(format!("bit-struct width {} is not between 1 and 8 bytes", width));
                }
                let mut total = 0u32;
                for member in fields.members() {
                    match &member.kind {
                        FieldKind::Bits(spec) => {
                            if spec.bits == 0 {
                                return Err(Error::schema(&desc.name, &member.name, "bit-field has no width"));
                            }
                            if let Some(table) = &spec.table {
                                check_table(table, &desc.name, &member.name)?;
                            }
                            total += spec.bits;
                        }
                        FieldKind::BitPad(bits) => total += bits,
                        _ => {
                            return Err(Error::schema(
                                &desc.name,
                                &member.name,
                                "only bit-fields may appear in a bit-struct",
                            ))
                        }
                    }
                }
                if total as usize != width * 8 {
                    return fail(format!(
                        "bit-fields cover {} bits of a {}-bit integer",
                        total,
                        width * 8
                    ));
                }
                check_names(fields, &desc.name)
            }
            FieldKind::Bits(_) | FieldKind::BitPad(_) => fail("bit-field outside a bit-struct".to_string()),
            FieldKind::Struct(fields) => {
                for member in fields.members() {
                    if member.pointer.is_none() && member.fixed_size().is_none() {
                        return Err(Error::schema(
                            &desc.name,
                            &member.name,
                            "member has no static size; use a container",
                        ));
                    }
                }
                self.check_members(fields, &desc.name)
            }
            FieldKind::Container(fields) => self.check_members(fields, &desc.name),
            FieldKind::Array(sub) => {
                if desc.size.is_none() {
                    return fail("array needs an element count".to_string());
                }
                self.check(sub, &desc.name)
            }
            FieldKind::WhileArray { sub, .. } => self.check(sub, &desc.name),
            FieldKind::Switch { cases, default, .. } => {
                for case in cases.values().chain([default]) {
                    if !case.kind.is_block() {
                        return fail(format!(
                            "case '{}' is a {}; switch cases must form Blocks",
                            case.name,
                            case.kind.type_name()
                        ));
                    }
                    self.check(case, block)?;
                }
                Ok(())
            }
        }
    }

    fn check_common(&self, desc: &Descriptor, block: &str) -> Result<()> {
        if let Some(align) = desc.align {
            if !align.is_power_of_two() {
                return Err(Error::schema(
                    block,
                    &desc.name,
                    format!("alignment {} is not a power of two", align),
                ));
            }
        }
        if let Some(child) = &desc.child {
            let holds_child = desc.kind.is_block() && !matches!(desc.kind, FieldKind::BitStruct { .. });
            if !holds_child {
                return Err(Error::schema(
                    block,
                    &desc.name,
                    "only structs, containers and arrays can carry a trailing child",
                ));
            }
            self.check(child, &desc.name)?;
        }
        Ok(())
    }

    fn check_members(&self, fields: &Fields, block: &str) -> Result<()> {
        for member in fields.members() {
            self.check(member, block)?;
        }
        check_names(fields, block)
    }
}

fn check_names(fields: &Fields, block: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for member in fields.members() {
        if !member.name.is_empty() && !seen.insert(member.name.as_str()) {
            return Err(Error::schema(block, &member.name, "duplicate member name"));
        }
    }
    Ok(())
}

fn check_table(table: &EnumTable, block: &str, attr: &str) -> Result<()> {
    let mut names = HashSet::new();
    let mut values = HashSet::new();
    for (name, value) in table.options() {
        if !names.insert(name.as_str()) {
            return Err(Error::schema(block, attr, format!("duplicate enumerated name '{}'", name)));
        }
        if !values.insert(*value) {
            return Err(Error::schema(block, attr, format!("duplicate enumerated value {}", value)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::*;
    use crate::primitives::{Encoding, Endian};

    fn schema_attr(result: Result<()>) -> String {
        match result {
            Err(Error::Schema { attr, .. }) => attr,
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_tree_passes() {
        let desc = container(
            "file",
            vec![
                structure("header", vec![str_sized("magic", Encoding::Ascii, 4), uint16("n", Endian::Little)]),
                bit_struct("flags", 1, Endian::Little, vec![bit_uint("a", 3), bit_pad(4), bit("b")]),
                array("items", ".header.n", uint8("item")),
                while_array("rest", uint8("byte"), until_byte(0)),
            ],
        );
        assert!(validate(&desc).is_ok());
    }

    #[test]
    fn test_root_must_be_block() {
        assert!(validate(&uint8("n")).is_err());
    }

    #[test]
    fn test_bits_must_partition_width() {
        let desc = container(
            "c",
            vec![bit_struct("flags", 1, Endian::Little, vec![bit_uint("a", 3), bit_uint("b", 4)])],
        );
        assert_eq!(schema_attr(validate(&desc)), "flags");
    }

    #[test]
    fn test_bit_field_outside_bit_struct() {
        let desc = container("c", vec![bit_uint("loose", 3)]);
        assert_eq!(schema_attr(validate(&desc)), "loose");
    }

    #[test]
    fn test_struct_rejects_variable_members() {
        let desc = structure("s", vec![uint8("len"), bytes("data", ".len")]);
        assert_eq!(schema_attr(validate(&desc)), "data");
    }

    #[test]
    fn test_missing_sizes() {
        let no_count = container(
            "c",
            vec![crate::descriptor::Descriptor::new(
                "items",
                FieldKind::Array(std::rc::Rc::new(uint8("item"))),
            )],
        );
        assert_eq!(schema_attr(validate(&no_count)), "items");

        let no_len = container(
            "c",
            vec![crate::descriptor::Descriptor::new("blob", FieldKind::Bytes)],
        );
        assert_eq!(schema_attr(validate(&no_len)), "blob");
    }

    #[test]
    fn test_duplicates_rejected() {
        let desc = container("c", vec![uint8("a"), uint8("a")]);
        assert_eq!(schema_attr(validate(&desc)), "a");

        let table = EnumTable::new([("x", 1), ("y", 1)]);
        let desc = container("c", vec![uenum("e", 1, Endian::Little, table)]);
        assert_eq!(schema_attr(validate(&desc)), "e");
    }

    #[test]
    fn test_switch_cases_must_be_blocks() {
        let desc = container(
            "c",
            vec![switch("body", peek_byte(1, 0), vec![(1, uint8("one"))], container("other", vec![]))],
        );
        assert_eq!(schema_attr(validate(&desc)), "body");
    }

    #[test]
    fn test_illegal_widths() {
        let desc = container("c", vec![uint("wide", 9, Endian::Little)]);
        assert_eq!(schema_attr(validate(&desc)), "wide");
        let desc = container("c", vec![crate::descriptor::Descriptor::new(
            "half",
            FieldKind::Float { width: 2, endian: Some(Endian::Little) },
        )]);
        assert_eq!(schema_attr(validate(&desc)), "half");
    }
}

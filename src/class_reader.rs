use std::collections::{BTreeMap, BTreeSet};

use crate::constants::{
    ACC_INTERFACE, ATTR_CODE, ATTR_LINE_NUMBER_TABLE, ATTR_LOCAL_VARIABLE_TABLE,
    ATTR_LOCAL_VARIABLE_TYPE_TABLE, ATTR_STACK_MAP_TABLE,
};
use crate::error::ClassReadError;
use crate::hierarchy::ClassInfo;
use crate::insn::{
    AbstractInsnNode, FieldInsnNode, IincInsnNode, Insn, InsnList, InsnNode, IntInsnNode,
    InvokeDynamicInsnNode, JumpInsnNode, LabelNode, LdcConstant, LdcInsnNode, LineNumberInsnNode,
    LookupSwitchInsnNode, MethodInsnNode, MultiANewArrayInsnNode, TableSwitchInsnNode,
    TypeInsnNode, VarInsnNode,
};
use crate::nodes::{
    ClassDefinition, FieldDefinition, LocalVariableKind, LocalVariableNode, MethodDefinition,
    RawAttribute, TryCatchBlockNode,
};
use crate::opcodes;

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    Unusable,
    Utf8(String),
    /// A `CONSTANT_Utf8` holding an unpaired surrogate. `text` is a lossy
    /// decoding used for lookups; `raw` is written back unchanged.
    Utf8Unpaired {
        text: String,
        raw: Vec<u8>,
    },
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

/// Parses a complete class file, decoding every method body.
pub fn read_class(bytes: &[u8]) -> Result<ClassDefinition, ClassReadError> {
    let mut reader = ByteReader::new(bytes);
    let (minor_version, major_version) = read_header(&mut reader)?;
    let constant_pool = read_constant_pool(&mut reader)?;
    let access_flags = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let super_class = reader.read_u2()?;
    let interface_indices = read_u2_table(&mut reader)?;

    let name = cp_class_name(&constant_pool, this_class)?.to_string();
    let super_name = if super_class == 0 {
        None
    } else {
        Some(cp_class_name(&constant_pool, super_class)?.to_string())
    };
    let mut interfaces = Vec::with_capacity(interface_indices.len());
    for index in &interface_indices {
        interfaces.push(cp_class_name(&constant_pool, *index)?.to_string());
    }

    let fields = read_fields(&mut reader)?;
    let methods = read_methods(&mut reader, &constant_pool)?;
    let attributes = read_attributes(&mut reader)?;

    Ok(ClassDefinition {
        minor_version,
        major_version,
        access_flags,
        constant_pool,
        this_class,
        super_class,
        name,
        super_name,
        interfaces,
        interface_indices,
        fields,
        methods,
        attributes,
    })
}

/// Parses only what hierarchy queries need: name, superclass, interfaces.
pub fn read_class_info(bytes: &[u8]) -> Result<ClassInfo, ClassReadError> {
    let mut reader = ByteReader::new(bytes);
    read_header(&mut reader)?;
    let constant_pool = read_constant_pool(&mut reader)?;
    let access_flags = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let super_class = reader.read_u2()?;
    let interface_indices = read_u2_table(&mut reader)?;

    let super_name = if super_class == 0 {
        None
    } else {
        Some(cp_class_name(&constant_pool, super_class)?.to_string())
    };
    let interfaces = interface_indices
        .iter()
        .map(|index| cp_class_name(&constant_pool, *index).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClassInfo {
        name: cp_class_name(&constant_pool, this_class)?.to_string(),
        super_name,
        interfaces,
        is_interface: access_flags & ACC_INTERFACE != 0,
    })
}

fn read_header(reader: &mut ByteReader<'_>) -> Result<(u16, u16), ClassReadError> {
    let magic = reader.read_u4()?;
    if magic != 0xCAFEBABE {
        return Err(ClassReadError::InvalidMagic(magic));
    }
    let minor_version = reader.read_u2()?;
    let major_version = reader.read_u2()?;
    Ok((minor_version, major_version))
}

fn read_constant_pool(reader: &mut ByteReader<'_>) -> Result<Vec<CpInfo>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut pool = Vec::with_capacity(count);
    pool.push(CpInfo::Unusable);

    let mut index = 1;
    while index < count {
        let tag = reader.read_u1()?;
        let entry = match tag {
            1 => {
                let len = reader.read_u2()? as usize;
                let bytes = reader.read_bytes(len)?;
                decode_utf8_entry(bytes)?
            }
            3 => CpInfo::Integer(reader.read_u4()? as i32),
            4 => CpInfo::Float(f32::from_bits(reader.read_u4()?)),
            5 => CpInfo::Long(reader.read_u8()? as i64),
            6 => CpInfo::Double(f64::from_bits(reader.read_u8()?)),
            7 => CpInfo::Class {
                name_index: reader.read_u2()?,
            },
            8 => CpInfo::String {
                string_index: reader.read_u2()?,
            },
            9 => CpInfo::Fieldref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            10 => CpInfo::Methodref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            11 => CpInfo::InterfaceMethodref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            12 => CpInfo::NameAndType {
                name_index: reader.read_u2()?,
                descriptor_index: reader.read_u2()?,
            },
            15 => CpInfo::MethodHandle {
                reference_kind: reader.read_u1()?,
                reference_index: reader.read_u2()?,
            },
            16 => CpInfo::MethodType {
                descriptor_index: reader.read_u2()?,
            },
            17 => CpInfo::Dynamic {
                bootstrap_method_attr_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            18 => CpInfo::InvokeDynamic {
                bootstrap_method_attr_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            19 => CpInfo::Module {
                name_index: reader.read_u2()?,
            },
            20 => CpInfo::Package {
                name_index: reader.read_u2()?,
            },
            _ => return Err(ClassReadError::InvalidConstantPoolTag(tag)),
        };

        pool.push(entry);

        if tag == 5 || tag == 6 {
            pool.push(CpInfo::Unusable);
            index += 2;
        } else {
            index += 1;
        }
    }

    Ok(pool)
}

fn read_u2_table(reader: &mut ByteReader<'_>) -> Result<Vec<u16>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(reader.read_u2()?);
    }
    Ok(values)
}

fn read_fields(reader: &mut ByteReader<'_>) -> Result<Vec<FieldDefinition>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(FieldDefinition {
            access_flags: reader.read_u2()?,
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
            attributes: read_attributes(reader)?,
        });
    }
    Ok(fields)
}

fn read_methods(
    reader: &mut ByteReader<'_>,
    cp: &[CpInfo],
) -> Result<Vec<MethodDefinition>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut methods = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name_index = reader.read_u2()?;
        let descriptor_index = reader.read_u2()?;
        let name = cp_utf8(cp, name_index)?.to_string();
        let descriptor = cp_utf8(cp, descriptor_index)?.to_string();

        let mut code = None;
        let mut attributes = Vec::new();
        for attribute in read_attributes(reader)? {
            if code.is_none() && cp_utf8(cp, attribute.name_index)? == ATTR_CODE {
                code = Some(attribute);
            } else {
                attributes.push(attribute);
            }
        }

        let mut method = MethodDefinition::parsed(
            access_flags,
            name_index,
            descriptor_index,
            name,
            descriptor,
            attributes,
        );
        if let Some(code) = code {
            read_code(&mut method, &code.info, cp)?;
            method.has_code = true;
            method.original_code = Some(code);
        }
        methods.push(method);
    }
    Ok(methods)
}

fn read_attributes(reader: &mut ByteReader<'_>) -> Result<Vec<RawAttribute>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_bytes(length)?.to_vec();
        attributes.push(RawAttribute { name_index, info });
    }
    Ok(attributes)
}

/// Assigns label ids in order of first reference, one label per offset.
#[derive(Default)]
struct LabelTable {
    by_offset: BTreeMap<u32, LabelNode>,
}

impl LabelTable {
    fn at(&mut self, offset: i64) -> Result<LabelNode, ClassReadError> {
        let offset = u32::try_from(offset)
            .map_err(|_| ClassReadError::InvalidBranchTarget { target: offset })?;
        let next_id = self.by_offset.len();
        Ok(*self
            .by_offset
            .entry(offset)
            .or_insert(LabelNode { id: next_id }))
    }
}

fn read_code(
    method: &mut MethodDefinition,
    info: &[u8],
    cp: &[CpInfo],
) -> Result<(), ClassReadError> {
    let mut reader = ByteReader::new(info);
    method.max_stack = reader.read_u2()?;
    method.max_locals = reader.read_u2()?;
    let code_length = reader.read_u4()? as usize;
    let code = reader.read_bytes(code_length)?;

    let mut labels = LabelTable::default();
    let instructions = read_instructions(code, cp, &mut labels)?;

    let exception_count = reader.read_u2()? as usize;
    for _ in 0..exception_count {
        let start = labels.at(reader.read_u2()? as i64)?;
        let end = labels.at(reader.read_u2()? as i64)?;
        let handler = labels.at(reader.read_u2()? as i64)?;
        let catch_index = reader.read_u2()?;
        let catch_type = if catch_index == 0 {
            None
        } else {
            Some(cp_class_name(cp, catch_index)?.to_string())
        };
        method.try_catch_blocks.push(TryCatchBlockNode {
            start,
            end,
            handler,
            catch_type,
        });
    }

    let mut line_numbers: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
    for attribute in read_attributes(&mut reader)? {
        let name = cp_utf8(cp, attribute.name_index)?;
        let mut table = ByteReader::new(&attribute.info);
        match name {
            ATTR_LINE_NUMBER_TABLE => {
                let count = table.read_u2()? as usize;
                for _ in 0..count {
                    let start_pc = table.read_u2()?;
                    let line = table.read_u2()?;
                    labels.at(start_pc as i64)?;
                    line_numbers.entry(start_pc as u32).or_default().push(line);
                }
            }
            ATTR_LOCAL_VARIABLE_TABLE | ATTR_LOCAL_VARIABLE_TYPE_TABLE => {
                let kind = if name == ATTR_LOCAL_VARIABLE_TABLE {
                    LocalVariableKind::Descriptor
                } else {
                    LocalVariableKind::Signature
                };
                let count = table.read_u2()? as usize;
                for _ in 0..count {
                    let start_pc = table.read_u2()? as i64;
                    let length = table.read_u2()? as i64;
                    let name_index = table.read_u2()?;
                    let descriptor_index = table.read_u2()?;
                    let index = table.read_u2()?;
                    method.local_variables.push(LocalVariableNode {
                        kind,
                        name_index,
                        descriptor_index,
                        index,
                        start: labels.at(start_pc)?,
                        end: labels.at(start_pc + length)?,
                    });
                }
            }
            // Recomputed whenever the body is re-encoded.
            ATTR_STACK_MAP_TABLE => {}
            other => method.dropped_code_attributes.push(other.to_string()),
        }
    }

    let boundaries: BTreeSet<u32> = instructions.iter().map(|(offset, _)| *offset).collect();
    for offset in labels.by_offset.keys() {
        if *offset as usize != code_length && !boundaries.contains(offset) {
            return Err(ClassReadError::InvalidBranchTarget {
                target: *offset as i64,
            });
        }
    }

    let mut nodes = Vec::with_capacity(instructions.len() + labels.by_offset.len());
    let emit_position = |nodes: &mut Vec<AbstractInsnNode>, offset: u32| {
        if let Some(label) = labels.by_offset.get(&offset) {
            nodes.push(AbstractInsnNode::Label(*label));
            for line in line_numbers.get(&offset).into_iter().flatten() {
                nodes.push(AbstractInsnNode::LineNumber(LineNumberInsnNode {
                    line: *line,
                    start: *label,
                }));
            }
        }
    };
    for (offset, insn) in instructions {
        emit_position(&mut nodes, offset);
        nodes.push(AbstractInsnNode::Insn(insn));
    }
    emit_position(&mut nodes, code_length as u32);

    let next_label = labels.by_offset.len();
    method.instructions = InsnList::from_parsed(nodes, next_label);
    Ok(())
}

fn read_instructions(
    code: &[u8],
    cp: &[CpInfo],
    labels: &mut LabelTable,
) -> Result<Vec<(u32, Insn)>, ClassReadError> {
    let mut reader = ByteReader::new(code);
    let mut insns = Vec::new();

    while reader.remaining() > 0 {
        let offset = reader.pos();
        let base = offset as i64;
        let opcode = reader.read_u1()?;
        let insn = match opcode {
            opcodes::NOP..=opcodes::DCONST_1 => Insn::Simple(opcode.into()),
            opcodes::BIPUSH => IntInsnNode::new(opcode, reader.read_u1()? as i8 as i32).into(),
            opcodes::SIPUSH => IntInsnNode::new(opcode, reader.read_u2()? as i16 as i32).into(),
            opcodes::LDC => read_ldc(cp, reader.read_u1()? as u16, opcodes::LDC)?,
            opcodes::LDC_W => read_ldc(cp, reader.read_u2()?, opcodes::LDC)?,
            opcodes::LDC2_W => read_ldc(cp, reader.read_u2()?, opcodes::LDC2_W)?,
            opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
                VarInsnNode::new(opcode, reader.read_u1()? as u16).into()
            }
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let relative = opcode - opcodes::ILOAD_0;
                VarInsnNode::new(opcodes::ILOAD + relative / 4, (relative % 4) as u16).into()
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let relative = opcode - opcodes::ISTORE_0;
                VarInsnNode::new(opcodes::ISTORE + relative / 4, (relative % 4) as u16).into()
            }
            opcodes::IALOAD..=opcodes::SALOAD | opcodes::IASTORE..=opcodes::LXOR => {
                Insn::Simple(opcode.into())
            }
            opcodes::IINC => IincInsnNode::new(reader.read_u1()? as u16, reader.read_u1()? as i8 as i16).into(),
            opcodes::I2L..=opcodes::DCMPG => Insn::Simple(opcode.into()),
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                let target = labels.at(base + reader.read_u2()? as i16 as i64)?;
                JumpInsnNode::new(opcode, target).into()
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let target = labels.at(base + reader.read_u4()? as i32 as i64)?;
                let normalized = if opcode == opcodes::GOTO_W {
                    opcodes::GOTO
                } else {
                    opcodes::JSR
                };
                JumpInsnNode::new(normalized, target).into()
            }
            opcodes::TABLESWITCH => {
                reader.align4(offset)?;
                let default = labels.at(base + reader.read_u4()? as i32 as i64)?;
                let low = reader.read_u4()? as i32;
                let high = reader.read_u4()? as i32;
                let count = if high < low {
                    0
                } else {
                    (high as i64 - low as i64 + 1) as u64
                };
                check_switch_fits(offset, count, 4, reader.remaining())?;
                let mut targets = Vec::with_capacity((count as usize).min(code.len()));
                for _ in 0..count {
                    targets.push(labels.at(base + reader.read_u4()? as i32 as i64)?);
                }
                Insn::TableSwitch(TableSwitchInsnNode {
                    insn: opcode.into(),
                    default,
                    low,
                    high,
                    targets,
                })
            }
            opcodes::LOOKUPSWITCH => {
                reader.align4(offset)?;
                let default = labels.at(base + reader.read_u4()? as i32 as i64)?;
                let npairs = reader.read_u4()? as usize;
                check_switch_fits(offset, npairs as u64, 8, reader.remaining())?;
                let mut pairs = Vec::with_capacity(npairs.min(code.len()));
                for _ in 0..npairs {
                    let key = reader.read_u4()? as i32;
                    pairs.push((key, labels.at(base + reader.read_u4()? as i32 as i64)?));
                }
                Insn::LookupSwitch(LookupSwitchInsnNode {
                    insn: opcode.into(),
                    default,
                    pairs,
                })
            }
            opcodes::IRETURN..=opcodes::RETURN
            | opcodes::ARRAYLENGTH
            | opcodes::ATHROW
            | opcodes::MONITORENTER
            | opcodes::MONITOREXIT => Insn::Simple(opcode.into()),
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let (owner, name, descriptor) = cp_field_ref(cp, reader.read_u2()?)?;
                FieldInsnNode::new(opcode, owner, name, descriptor).into()
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                let (owner, name, descriptor, is_interface) = cp_method_ref(cp, reader.read_u2()?)?;
                if opcode == opcodes::INVOKEINTERFACE {
                    reader.read_u2()?;
                }
                Insn::Method(MethodInsnNode {
                    insn: opcode.into(),
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                    is_interface,
                })
            }
            opcodes::INVOKEDYNAMIC => {
                let index = reader.read_u2()?;
                reader.read_u2()?;
                let (name, descriptor) = cp_invoke_dynamic(cp, index)?;
                Insn::InvokeDynamic(InvokeDynamicInsnNode {
                    insn: opcode.into(),
                    index,
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                TypeInsnNode::new(opcode, cp_class_name(cp, reader.read_u2()?)?).into()
            }
            opcodes::NEWARRAY => IntInsnNode::new(opcode, reader.read_u1()? as i32).into(),
            opcodes::WIDE => read_wide(&mut reader)?,
            opcodes::MULTIANEWARRAY => {
                let type_name = cp_class_name(cp, reader.read_u2()?)?.to_string();
                Insn::MultiANewArray(MultiANewArrayInsnNode {
                    insn: opcode.into(),
                    type_name,
                    dimensions: reader.read_u1()?,
                })
            }
            _ => return Err(ClassReadError::InvalidOpcode { opcode, offset }),
        };
        insns.push((offset as u32, insn));
    }

    Ok(insns)
}

fn read_wide(reader: &mut ByteReader<'_>) -> Result<Insn, ClassReadError> {
    let opcode = reader.read_u1()?;
    match opcode {
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Ok(VarInsnNode::new(opcode, reader.read_u2()?).into())
        }
        opcodes::IINC => Ok(IincInsnNode::new(reader.read_u2()?, reader.read_u2()? as i16).into()),
        _ => Err(ClassReadError::InvalidOpcode {
            opcode,
            offset: reader.pos().saturating_sub(1),
        }),
    }
}

fn read_ldc(cp: &[CpInfo], index: u16, opcode: u8) -> Result<Insn, ClassReadError> {
    Ok(Insn::Ldc(LdcInsnNode {
        insn: InsnNode::new(opcode),
        value: cp_ldc_constant(cp, index)?,
    }))
}

pub(crate) fn cp_utf8(cp: &[CpInfo], index: u16) -> Result<&str, ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Utf8(value)) | Some(CpInfo::Utf8Unpaired { text: value, .. }) => {
            Ok(value.as_str())
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

pub(crate) fn cp_class_name(cp: &[CpInfo], index: u16) -> Result<&str, ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Class { name_index }) => cp_utf8(cp, *name_index),
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

pub(crate) fn cp_name_and_type(cp: &[CpInfo], index: u16) -> Result<(&str, &str), ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::NameAndType {
            name_index,
            descriptor_index,
        }) => Ok((cp_utf8(cp, *name_index)?, cp_utf8(cp, *descriptor_index)?)),
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_field_ref(cp: &[CpInfo], index: u16) -> Result<(&str, &str, &str), ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Fieldref {
            class_index,
            name_and_type_index,
        }) => {
            let owner = cp_class_name(cp, *class_index)?;
            let (name, desc) = cp_name_and_type(cp, *name_and_type_index)?;
            Ok((owner, name, desc))
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_method_ref(cp: &[CpInfo], index: u16) -> Result<(&str, &str, &str, bool), ClassReadError> {
    let (class_index, name_and_type_index, is_interface) = match cp.get(index as usize) {
        Some(CpInfo::Methodref {
            class_index,
            name_and_type_index,
        }) => (*class_index, *name_and_type_index, false),
        Some(CpInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        }) => (*class_index, *name_and_type_index, true),
        _ => return Err(ClassReadError::InvalidIndex(index)),
    };
    let owner = cp_class_name(cp, class_index)?;
    let (name, desc) = cp_name_and_type(cp, name_and_type_index)?;
    Ok((owner, name, desc, is_interface))
}

fn cp_invoke_dynamic(cp: &[CpInfo], index: u16) -> Result<(&str, &str), ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::InvokeDynamic {
            name_and_type_index,
            ..
        }) => cp_name_and_type(cp, *name_and_type_index),
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_ldc_constant(cp: &[CpInfo], index: u16) -> Result<LdcConstant, ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Integer(value)) => Ok(LdcConstant::Integer(*value)),
        Some(CpInfo::Float(value)) => Ok(LdcConstant::Float(*value)),
        Some(CpInfo::Long(value)) => Ok(LdcConstant::Long(*value)),
        Some(CpInfo::Double(value)) => Ok(LdcConstant::Double(*value)),
        Some(CpInfo::String { string_index }) => match cp.get(*string_index as usize) {
            Some(CpInfo::Utf8Unpaired { .. }) => Ok(LdcConstant::RawString(index)),
            _ => Ok(LdcConstant::String(cp_utf8(cp, *string_index)?.to_string())),
        },
        Some(CpInfo::Class { name_index }) => {
            Ok(LdcConstant::Class(cp_utf8(cp, *name_index)?.to_string()))
        }
        Some(CpInfo::MethodType { descriptor_index }) => Ok(LdcConstant::MethodType(
            cp_utf8(cp, *descriptor_index)?.to_string(),
        )),
        Some(CpInfo::MethodHandle { .. }) => Ok(LdcConstant::MethodHandle(index)),
        Some(CpInfo::Dynamic {
            name_and_type_index,
            ..
        }) => {
            let (_, descriptor) = cp_name_and_type(cp, *name_and_type_index)?;
            Ok(LdcConstant::Dynamic {
                index,
                descriptor: descriptor.to_string(),
            })
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

/// Rejects a switch whose jump table would run past the end of the code.
fn check_switch_fits(
    offset: usize,
    entries: u64,
    entry_size: u64,
    remaining: usize,
) -> Result<(), ClassReadError> {
    if entries.saturating_mul(entry_size) > remaining as u64 {
        return Err(ClassReadError::SwitchTooLarge {
            offset,
            entries,
            remaining,
        });
    }
    Ok(())
}

/// Decodes a `CONSTANT_Utf8` body. Text that is not valid Unicode keeps its
/// bytes so it can be written back as read.
fn decode_utf8_entry(bytes: &[u8]) -> Result<CpInfo, ClassReadError> {
    let units = decode_modified_utf8(bytes)?;
    Ok(match String::from_utf16(&units) {
        Ok(text) => CpInfo::Utf8(text),
        Err(_) => CpInfo::Utf8Unpaired {
            text: String::from_utf16_lossy(&units),
            raw: bytes.to_vec(),
        },
    })
}

fn decode_modified_utf8(bytes: &[u8]) -> Result<Vec<u16>, ClassReadError> {
    let mut code_units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte & 0x80 == 0 {
            code_units.push(byte as u16);
            i += 1;
        } else if byte & 0xE0 == 0xC0 {
            if i + 1 >= bytes.len() {
                return Err(ClassReadError::Utf8Error("truncated 2-byte".to_string()));
            }
            let byte2 = bytes[i + 1];
            if byte2 & 0xC0 != 0x80 {
                return Err(ClassReadError::Utf8Error("invalid 2-byte".to_string()));
            }
            code_units.push((((byte & 0x1F) as u16) << 6) | ((byte2 & 0x3F) as u16));
            i += 2;
        } else if byte & 0xF0 == 0xE0 {
            if i + 2 >= bytes.len() {
                return Err(ClassReadError::Utf8Error("truncated 3-byte".to_string()));
            }
            let byte2 = bytes[i + 1];
            let byte3 = bytes[i + 2];
            if byte2 & 0xC0 != 0x80 || byte3 & 0xC0 != 0x80 {
                return Err(ClassReadError::Utf8Error("invalid 3-byte".to_string()));
            }
            code_units.push(
                (((byte & 0x0F) as u16) << 12)
                    | (((byte2 & 0x3F) as u16) << 6)
                    | ((byte3 & 0x3F) as u16),
            );
            i += 3;
        } else {
            return Err(ClassReadError::Utf8Error("invalid leading byte".to_string()));
        }
    }

    Ok(code_units)
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    /// Skips switch padding; operands start on a 4-byte boundary of the code.
    fn align4(&mut self, opcode_offset: usize) -> Result<(), ClassReadError> {
        let padding = (4 - ((opcode_offset + 1) % 4)) % 4;
        self.read_bytes(padding)?;
        Ok(())
    }

    fn read_u1(&mut self) -> Result<u8, ClassReadError> {
        let value = *self.data.get(self.pos).ok_or(ClassReadError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    fn read_u2(&mut self) -> Result<u16, ClassReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u8(&mut self) -> Result<u64, ClassReadError> {
        let high = self.read_u4()? as u64;
        let low = self.read_u4()? as u64;
        Ok((high << 32) | low)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassReadError> {
        if self.pos + len > self.data.len() {
            return Err(ClassReadError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_modified_utf8_handles_embedded_nul() {
        assert_eq!(
            decode_utf8_entry(&[0x61, 0xC0, 0x80, 0x62]).unwrap(),
            CpInfo::Utf8("a\0b".to_string())
        );
    }

    #[test]
    fn test_unpaired_surrogate_keeps_raw_bytes() {
        let raw = [0x41, 0xED, 0xA0, 0x80];
        match decode_utf8_entry(&raw).unwrap() {
            CpInfo::Utf8Unpaired { text, raw: kept } => {
                assert_eq!(text, "A\u{FFFD}");
                assert_eq!(kept, raw.to_vec());
            }
            other => panic!("expected an unpaired entry, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_tableswitch_is_rejected() {
        let mut labels = LabelTable::default();
        // tableswitch at 0, three padding bytes, then default/low/high and no table.
        let mut code = vec![opcodes::TABLESWITCH, 0, 0, 0];
        code.extend_from_slice(&16i32.to_be_bytes());
        code.extend_from_slice(&i32::MIN.to_be_bytes());
        code.extend_from_slice(&i32::MAX.to_be_bytes());
        code.push(opcodes::RETURN);
        let err = read_instructions(&code, &[CpInfo::Unusable], &mut labels).unwrap_err();
        assert!(matches!(
            err,
            ClassReadError::SwitchTooLarge {
                offset: 0,
                entries: 4_294_967_296,
                remaining: 1,
            }
        ));
    }

    #[test]
    fn test_oversized_lookupswitch_is_rejected() {
        let mut labels = LabelTable::default();
        let mut code = vec![opcodes::LOOKUPSWITCH, 0, 0, 0];
        code.extend_from_slice(&12i32.to_be_bytes());
        code.extend_from_slice(&u32::MAX.to_be_bytes());
        let err = read_instructions(&code, &[CpInfo::Unusable], &mut labels).unwrap_err();
        assert!(matches!(err, ClassReadError::SwitchTooLarge { .. }));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let err = read_class(&[0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 52]).unwrap_err();
        assert!(matches!(err, ClassReadError::InvalidMagic(0xCAFEBABF)));
    }

    #[test]
    fn test_truncated_input_is_eof() {
        let err = read_class(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]).unwrap_err();
        assert!(matches!(err, ClassReadError::UnexpectedEof));
    }

    #[test]
    fn test_compact_forms_are_normalized() {
        let mut labels = LabelTable::default();
        let code = [opcodes::ALOAD_0, opcodes::ISTORE_3, opcodes::RETURN];
        let insns = read_instructions(&code, &[CpInfo::Unusable], &mut labels).unwrap();
        assert_eq!(insns[0].1, VarInsnNode::new(opcodes::ALOAD, 0).into());
        assert_eq!(insns[1].1, VarInsnNode::new(opcodes::ISTORE, 3).into());
        assert_eq!(insns[2].0, 2);
    }

    #[test]
    fn test_jump_targets_become_labels() {
        let mut labels = LabelTable::default();
        // 0: goto +3; 3: return
        let code = [opcodes::GOTO, 0x00, 0x03, opcodes::RETURN];
        let insns = read_instructions(&code, &[CpInfo::Unusable], &mut labels).unwrap();
        let target = labels.by_offset.get(&3).copied().unwrap();
        assert_eq!(insns[0].1, JumpInsnNode::new(opcodes::GOTO, target).into());
    }

    #[test]
    fn test_wide_iinc() {
        let mut labels = LabelTable::default();
        let code = [opcodes::WIDE, opcodes::IINC, 0x01, 0x00, 0xFF, 0xFE];
        let insns = read_instructions(&code, &[CpInfo::Unusable], &mut labels).unwrap();
        assert_eq!(insns[0].1, IincInsnNode::new(256, -2).into());
    }
}

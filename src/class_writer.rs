use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::class_reader::CpInfo;
use crate::constants::{
    ATTR_CODE, ATTR_LINE_NUMBER_TABLE, ATTR_LOCAL_VARIABLE_TABLE, ATTR_LOCAL_VARIABLE_TYPE_TABLE,
    ATTR_STACK_MAP_TABLE, V1_6,
};
use crate::error::ClassWriteError;
use crate::frames::{self, Frame, FrameType, Handler, MethodContext};
use crate::hierarchy::SafeTypeResolver;
use crate::insn::{AbstractInsnNode, Insn, LabelNode, LdcConstant};
use crate::nodes::{ClassDefinition, LocalVariableKind, MethodDefinition, RawAttribute};
use crate::opcodes;

const THROWABLE: &str = "java/lang/Throwable";

/// A builder for the constant pool of a class.
///
/// Entries are deduplicated. When seeded from an existing pool every entry
/// keeps its index and new entries are appended after it.
#[derive(Debug, Default)]
pub struct ConstantPoolBuilder {
    cp: Vec<CpInfo>,
    utf8: HashMap<String, u16>,
    class: HashMap<String, u16>,
    string: HashMap<String, u16>,
    method_type: HashMap<String, u16>,
    name_and_type: HashMap<(String, String), u16>,
    member_ref: HashMap<(u8, String, String, String), u16>,
    integer: HashMap<i32, u16>,
    float: HashMap<u32, u16>,
    long: HashMap<i64, u16>,
    double: HashMap<u64, u16>,
}

const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;

impl ConstantPoolBuilder {
    /// Creates a new, empty `ConstantPoolBuilder`.
    ///
    /// The constant pool starts with a dummy entry at index 0; index 0 is never referenced.
    pub fn new() -> Self {
        Self {
            cp: vec![CpInfo::Unusable],
            ..Default::default()
        }
    }

    /// Continues an existing pool. The first occurrence of a duplicated
    /// entry is the one handed out.
    pub fn from_pool(pool: Vec<CpInfo>) -> Self {
        let mut builder = Self {
            cp: pool,
            ..Default::default()
        };
        if builder.cp.is_empty() {
            builder.cp.push(CpInfo::Unusable);
        }
        let utf8_at = |pool: &[CpInfo], index: u16| match pool.get(index as usize) {
            Some(CpInfo::Utf8(value)) => Some(value.clone()),
            _ => None,
        };
        for index in 1..builder.cp.len() {
            let Ok(slot) = u16::try_from(index) else {
                break;
            };
            let pool = &builder.cp;
            match &pool[index] {
                CpInfo::Utf8(value) => {
                    builder.utf8.entry(value.clone()).or_insert(slot);
                }
                CpInfo::Integer(value) => {
                    builder.integer.entry(*value).or_insert(slot);
                }
                CpInfo::Float(value) => {
                    builder.float.entry(value.to_bits()).or_insert(slot);
                }
                CpInfo::Long(value) => {
                    builder.long.entry(*value).or_insert(slot);
                }
                CpInfo::Double(value) => {
                    builder.double.entry(value.to_bits()).or_insert(slot);
                }
                CpInfo::Class { name_index } => {
                    if let Some(name) = utf8_at(pool, *name_index) {
                        builder.class.entry(name).or_insert(slot);
                    }
                }
                CpInfo::String { string_index } => {
                    if let Some(value) = utf8_at(pool, *string_index) {
                        builder.string.entry(value).or_insert(slot);
                    }
                }
                CpInfo::MethodType { descriptor_index } => {
                    if let Some(value) = utf8_at(pool, *descriptor_index) {
                        builder.method_type.entry(value).or_insert(slot);
                    }
                }
                CpInfo::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    if let (Some(name), Some(descriptor)) =
                        (utf8_at(pool, *name_index), utf8_at(pool, *descriptor_index))
                    {
                        builder.name_and_type.entry((name, descriptor)).or_insert(slot);
                    }
                }
                CpInfo::Fieldref {
                    class_index,
                    name_and_type_index,
                }
                | CpInfo::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | CpInfo::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    let tag = match &pool[index] {
                        CpInfo::Fieldref { .. } => TAG_FIELDREF,
                        CpInfo::Methodref { .. } => TAG_METHODREF,
                        _ => TAG_INTERFACE_METHODREF,
                    };
                    let owner = match pool.get(*class_index as usize) {
                        Some(CpInfo::Class { name_index }) => utf8_at(pool, *name_index),
                        _ => None,
                    };
                    let name_and_type = match pool.get(*name_and_type_index as usize) {
                        Some(CpInfo::NameAndType {
                            name_index,
                            descriptor_index,
                        }) => utf8_at(pool, *name_index).zip(utf8_at(pool, *descriptor_index)),
                        _ => None,
                    };
                    if let (Some(owner), Some((name, descriptor))) = (owner, name_and_type) {
                        builder
                            .member_ref
                            .entry((tag, owner, name, descriptor))
                            .or_insert(slot);
                    }
                }
                _ => {}
            }
        }
        builder
    }

    /// Consumes the builder and returns the raw vector of `CpInfo` entries.
    pub fn into_pool(self) -> Vec<CpInfo> {
        self.cp
    }

    /// Number of slots, including the unusable slot 0.
    pub fn len(&self) -> usize {
        self.cp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cp.len() <= 1
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8.get(value) {
            return *index;
        }
        let index = self.push(CpInfo::Utf8(value.to_string()));
        self.utf8.insert(value.to_string(), index);
        index
    }

    /// Adds a Class constant to the pool.
    ///
    /// This will recursively add the UTF-8 name of the class.
    pub fn class(&mut self, name: &str) -> u16 {
        if let Some(index) = self.class.get(name) {
            return *index;
        }
        let name_index = self.utf8(name);
        let index = self.push(CpInfo::Class { name_index });
        self.class.insert(name.to_string(), index);
        index
    }

    pub fn string(&mut self, value: &str) -> u16 {
        if let Some(index) = self.string.get(value) {
            return *index;
        }
        let string_index = self.utf8(value);
        let index = self.push(CpInfo::String { string_index });
        self.string.insert(value.to_string(), index);
        index
    }

    pub fn method_type(&mut self, descriptor: &str) -> u16 {
        if let Some(index) = self.method_type.get(descriptor) {
            return *index;
        }
        let descriptor_index = self.utf8(descriptor);
        let index = self.push(CpInfo::MethodType { descriptor_index });
        self.method_type.insert(descriptor.to_string(), index);
        index
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let key = (name.to_string(), descriptor.to_string());
        if let Some(index) = self.name_and_type.get(&key) {
            return *index;
        }
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let index = self.push(CpInfo::NameAndType {
            name_index,
            descriptor_index,
        });
        self.name_and_type.insert(key, index);
        index
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(TAG_FIELDREF, owner, name, descriptor)
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str, is_interface: bool) -> u16 {
        let tag = if is_interface {
            TAG_INTERFACE_METHODREF
        } else {
            TAG_METHODREF
        };
        self.member_ref(tag, owner, name, descriptor)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        if let Some(index) = self.integer.get(&value) {
            return *index;
        }
        let index = self.push(CpInfo::Integer(value));
        self.integer.insert(value, index);
        index
    }

    pub fn float(&mut self, value: f32) -> u16 {
        if let Some(index) = self.float.get(&value.to_bits()) {
            return *index;
        }
        let index = self.push(CpInfo::Float(value));
        self.float.insert(value.to_bits(), index);
        index
    }

    pub fn long(&mut self, value: i64) -> u16 {
        if let Some(index) = self.long.get(&value) {
            return *index;
        }
        let index = self.push(CpInfo::Long(value));
        self.cp.push(CpInfo::Unusable);
        self.long.insert(value, index);
        index
    }

    pub fn double(&mut self, value: f64) -> u16 {
        if let Some(index) = self.double.get(&value.to_bits()) {
            return *index;
        }
        let index = self.push(CpInfo::Double(value));
        self.cp.push(CpInfo::Unusable);
        self.double.insert(value.to_bits(), index);
        index
    }

    /// Pool index for an `ldc` operand.
    pub fn constant(&mut self, value: &LdcConstant) -> u16 {
        match value {
            LdcConstant::Integer(value) => self.integer(*value),
            LdcConstant::Float(value) => self.float(*value),
            LdcConstant::Long(value) => self.long(*value),
            LdcConstant::Double(value) => self.double(*value),
            LdcConstant::String(value) => self.string(value),
            LdcConstant::Class(name) => self.class(name),
            LdcConstant::MethodType(descriptor) => self.method_type(descriptor),
            LdcConstant::MethodHandle(index) | LdcConstant::RawString(index) => *index,
            LdcConstant::Dynamic { index, .. } => *index,
        }
    }

    fn member_ref(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let key = (tag, owner.to_string(), name.to_string(), descriptor.to_string());
        if let Some(index) = self.member_ref.get(&key) {
            return *index;
        }
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        let entry = match tag {
            TAG_FIELDREF => CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            },
            TAG_METHODREF => CpInfo::Methodref {
                class_index,
                name_and_type_index,
            },
            _ => CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            },
        };
        let index = self.push(entry);
        self.member_ref.insert(key, index);
        index
    }

    fn push(&mut self, entry: CpInfo) -> u16 {
        self.cp.push(entry);
        (self.cp.len() - 1) as u16
    }
}

/// Serializes a class.
///
/// Methods whose bodies were not edited are copied from their original `Code`
/// attribute. Edited and newly built methods are assembled and get fresh
/// `max_stack`, `max_locals` and (for version 50 and later) a `StackMapTable`.
pub fn write_class(
    class: &ClassDefinition,
    resolver: &SafeTypeResolver<'_>,
) -> Result<Vec<u8>, ClassWriteError> {
    let mut cp = ConstantPoolBuilder::from_pool(class.constant_pool.clone());

    let mut methods = Vec::new();
    write_u2(&mut methods, class.methods.len() as u16);
    for method in &class.methods {
        let name_index = method.name_index.unwrap_or_else(|| cp.utf8(&method.name));
        let descriptor_index = method
            .descriptor_index
            .unwrap_or_else(|| cp.utf8(&method.descriptor));
        let code = match (&method.original_code, method.has_code, method.is_modified()) {
            (_, false, _) => None,
            (Some(original), true, false) => Some(original.clone()),
            _ => Some(RawAttribute {
                name_index: cp.utf8(ATTR_CODE),
                info: encode_code(class, method, &mut cp, resolver)?,
            }),
        };

        write_u2(&mut methods, method.access_flags);
        write_u2(&mut methods, name_index);
        write_u2(&mut methods, descriptor_index);
        write_u2(&mut methods, (method.attributes.len() + usize::from(code.is_some())) as u16);
        if let Some(code) = &code {
            write_attribute(&mut methods, code)?;
        }
        for attribute in &method.attributes {
            write_attribute(&mut methods, attribute)?;
        }
    }

    let pool = cp.into_pool();
    if pool.len() > u16::MAX as usize {
        return Err(ClassWriteError::ConstantPoolOverflow(pool.len()));
    }

    let mut out = Vec::new();
    write_u4(&mut out, 0xCAFEBABE);
    write_u2(&mut out, class.minor_version);
    write_u2(&mut out, class.major_version);
    write_constant_pool(&mut out, &pool)?;
    write_u2(&mut out, class.access_flags);
    write_u2(&mut out, class.this_class);
    write_u2(&mut out, class.super_class);
    write_u2(&mut out, class.interface_indices.len() as u16);
    for index in &class.interface_indices {
        write_u2(&mut out, *index);
    }
    write_u2(&mut out, class.fields.len() as u16);
    for field in &class.fields {
        write_u2(&mut out, field.access_flags);
        write_u2(&mut out, field.name_index);
        write_u2(&mut out, field.descriptor_index);
        write_u2(&mut out, field.attributes.len() as u16);
        for attribute in &field.attributes {
            write_attribute(&mut out, attribute)?;
        }
    }
    out.extend_from_slice(&methods);
    write_u2(&mut out, class.attributes.len() as u16);
    for attribute in &class.attributes {
        write_attribute(&mut out, attribute)?;
    }
    Ok(out)
}

struct Assembled {
    code: Vec<u8>,
    /// Offset of each real instruction, by position.
    insn_offsets: Vec<u32>,
    label_offsets: HashMap<LabelNode, u32>,
}

#[derive(Debug, Clone, Copy)]
struct JumpFixup {
    /// Where the offset operand is written.
    at: usize,
    /// Offset of the instruction owning the operand.
    base: usize,
    target: LabelNode,
    wide: bool,
}

fn encode_code(
    class: &ClassDefinition,
    method: &MethodDefinition,
    cp: &mut ConstantPoolBuilder,
    resolver: &SafeTypeResolver<'_>,
) -> Result<Vec<u8>, ClassWriteError> {
    let signature = format!("{}.{}{}", class.name, method.name, method.descriptor);
    for attribute in &method.dropped_code_attributes {
        log::debug!("Dropping {attribute} from re-encoded {signature}");
    }

    let nodes: Vec<&AbstractInsnNode> = method.instructions.nodes().collect();
    let mut insns: Vec<&Insn> = Vec::new();
    let mut label_positions = HashMap::new();
    for node in &nodes {
        match node {
            AbstractInsnNode::Label(label) => {
                label_positions.insert(*label, insns.len());
            }
            AbstractInsnNode::Insn(insn) => insns.push(insn),
            AbstractInsnNode::LineNumber(_) => {}
        }
    }
    if insns
        .iter()
        .any(|insn| matches!(insn.opcode(), opcodes::JSR | opcodes::RET))
    {
        return Err(ClassWriteError::UnsupportedSubroutine(signature));
    }

    let assembled = assemble(&nodes, cp, &signature)?;
    let code_end = assembled.code.len() as u32;
    let offset_of = |position: usize| {
        assembled
            .insn_offsets
            .get(position)
            .copied()
            .unwrap_or(code_end)
    };
    let label_offset = |label: LabelNode| {
        assembled
            .label_offsets
            .get(&label)
            .copied()
            .ok_or_else(|| ClassWriteError::MissingLabel(label.id, signature.clone()))
    };
    let label_position = |label: LabelNode| {
        label_positions
            .get(&label)
            .copied()
            .ok_or_else(|| ClassWriteError::MissingLabel(label.id, signature.clone()))
    };

    let mut handlers = Vec::with_capacity(method.try_catch_blocks.len());
    for block in &method.try_catch_blocks {
        handlers.push(Handler {
            start: label_position(block.start)?,
            end: label_position(block.end)?,
            handler: label_position(block.handler)?,
            catch_type: block.catch_type.clone().unwrap_or_else(|| THROWABLE.to_string()),
        });
    }

    let context = MethodContext {
        owner: &class.name,
        access_flags: method.access_flags,
        name: &method.name,
        descriptor: &method.descriptor,
        signature: &signature,
    };
    let analysis = frames::analyze(&context, &insns, &label_positions, &handlers, resolver)?;

    // Unreachable code becomes nop ... athrow so that it still verifies.
    let mut code = assembled.code.clone();
    let mut dead_ranges: Vec<(u32, u32)> = Vec::new();
    let mut position = 0;
    while position < insns.len() {
        if analysis.frames[position].is_some() {
            position += 1;
            continue;
        }
        let first = position;
        while position < insns.len() && analysis.frames[position].is_none() {
            position += 1;
        }
        let (from, to) = (offset_of(first) as usize, offset_of(position) as usize);
        code[from..to - 1].fill(opcodes::NOP);
        code[to - 1] = opcodes::ATHROW;
        dead_ranges.push((from as u32, to as u32));
    }

    let mut max_stack = analysis.max_stack;
    if !dead_ranges.is_empty() {
        max_stack = max_stack.max(1);
    }
    let max_locals = analysis.max_locals.max(local_extent(&insns));

    let mut out = Vec::new();
    write_u2(&mut out, max_stack);
    write_u2(&mut out, max_locals);
    write_u4(&mut out, code.len() as u32);
    out.extend_from_slice(&code);

    let mut exception_table = Vec::new();
    for block in &method.try_catch_blocks {
        let handler = label_offset(block.handler)?;
        let catch_type = match &block.catch_type {
            Some(name) => cp.class(name),
            None => 0,
        };
        let range = (label_offset(block.start)?, label_offset(block.end)?);
        for (start, end) in subtract_ranges(range, &dead_ranges) {
            exception_table.push([start as u16, end as u16, handler as u16, catch_type]);
        }
    }
    write_u2(&mut out, exception_table.len() as u16);
    for entry in &exception_table {
        for value in entry {
            write_u2(&mut out, *value);
        }
    }

    let mut attributes = Vec::new();
    if class.major_version >= V1_6 {
        let mut frame_positions = BTreeSet::new();
        for insn in &insns {
            for label in insn.targets() {
                frame_positions.insert(label_position(label)?);
            }
        }
        for handler in &handlers {
            frame_positions.insert(handler.handler);
        }
        let mut entries: BTreeMap<u32, Frame> = BTreeMap::new();
        for position in frame_positions {
            if let Some(Some(frame)) = analysis.frames.get(position) {
                entries.insert(offset_of(position), frame.clone());
            }
        }
        for (from, _) in &dead_ranges {
            entries.insert(
                *from,
                Frame {
                    locals: Vec::new(),
                    stack: vec![FrameType::Object(THROWABLE.to_string())],
                },
            );
        }
        if !entries.is_empty() {
            let info = encode_stack_map(&entries, &offset_of, cp);
            attributes.push(RawAttribute {
                name_index: cp.utf8(ATTR_STACK_MAP_TABLE),
                info,
            });
        }
    }

    let mut lines = Vec::new();
    for node in &nodes {
        if let AbstractInsnNode::LineNumber(line) = node {
            lines.push((label_offset(line.start)?, line.line));
        }
    }
    if !lines.is_empty() {
        let mut info = Vec::new();
        write_u2(&mut info, lines.len() as u16);
        for (start_pc, line) in lines {
            write_u2(&mut info, start_pc as u16);
            write_u2(&mut info, line);
        }
        attributes.push(RawAttribute {
            name_index: cp.utf8(ATTR_LINE_NUMBER_TABLE),
            info,
        });
    }

    for (kind, name) in [
        (LocalVariableKind::Descriptor, ATTR_LOCAL_VARIABLE_TABLE),
        (LocalVariableKind::Signature, ATTR_LOCAL_VARIABLE_TYPE_TABLE),
    ] {
        let mut entries = Vec::new();
        for variable in method.local_variables.iter().filter(|variable| variable.kind == kind) {
            let start = label_offset(variable.start)?;
            let end = label_offset(variable.end)?;
            if end < start {
                log::debug!("Dropping inverted local variable range {start}..{end} in {signature}");
                continue;
            }
            entries.push([
                start as u16,
                (end - start) as u16,
                variable.name_index,
                variable.descriptor_index,
                variable.index,
            ]);
        }
        if entries.is_empty() {
            continue;
        }
        let mut info = Vec::new();
        write_u2(&mut info, entries.len() as u16);
        for entry in entries {
            for value in entry {
                write_u2(&mut info, value);
            }
        }
        attributes.push(RawAttribute {
            name_index: cp.utf8(name),
            info,
        });
    }

    write_u2(&mut out, attributes.len() as u16);
    for attribute in &attributes {
        write_attribute(&mut out, attribute)?;
    }
    Ok(out)
}

/// Highest local slot touched by a load, store or iinc, plus one.
fn local_extent(insns: &[&Insn]) -> u16 {
    insns
        .iter()
        .map(|insn| match insn {
            Insn::Var(node) => {
                let width = match node.insn.opcode {
                    opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => 2,
                    _ => 1,
                };
                node.var_index.saturating_add(width)
            }
            Insn::Iinc(node) => node.var_index.saturating_add(1),
            _ => 0,
        })
        .max()
        .unwrap_or(0)
}

/// Cuts dead ranges out of a protected range.
fn subtract_ranges(range: (u32, u32), dead: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut live = vec![range];
    for (dead_start, dead_end) in dead {
        live = live
            .into_iter()
            .flat_map(|(start, end)| {
                if *dead_end <= start || *dead_start >= end {
                    return vec![(start, end)];
                }
                let mut kept = Vec::new();
                if start < *dead_start {
                    kept.push((start, *dead_start));
                }
                if *dead_end < end {
                    kept.push((*dead_end, end));
                }
                kept
            })
            .collect();
    }
    live.retain(|(start, end)| start < end);
    live
}

fn encode_stack_map(
    entries: &BTreeMap<u32, Frame>,
    offset_of: &dyn Fn(usize) -> u32,
    cp: &mut ConstantPoolBuilder,
) -> Vec<u8> {
    let mut info = Vec::new();
    write_u2(&mut info, entries.len() as u16);
    let mut previous: Option<u32> = None;
    for (offset, frame) in entries {
        let delta = match previous {
            None => *offset,
            Some(previous) => offset - previous - 1,
        };
        previous = Some(*offset);
        let locals = frame.compact_locals();
        write_u1(&mut info, 255);
        write_u2(&mut info, delta as u16);
        write_u2(&mut info, locals.len() as u16);
        for value in &locals {
            write_verification_type(&mut info, value, offset_of, cp);
        }
        write_u2(&mut info, frame.stack.len() as u16);
        for value in &frame.stack {
            write_verification_type(&mut info, value, offset_of, cp);
        }
    }
    info
}

fn write_verification_type(
    out: &mut Vec<u8>,
    value: &FrameType,
    offset_of: &dyn Fn(usize) -> u32,
    cp: &mut ConstantPoolBuilder,
) {
    match value {
        FrameType::Top => write_u1(out, 0),
        FrameType::Integer => write_u1(out, 1),
        FrameType::Float => write_u1(out, 2),
        FrameType::Double => write_u1(out, 3),
        FrameType::Long => write_u1(out, 4),
        FrameType::Null => write_u1(out, 5),
        FrameType::UninitializedThis => write_u1(out, 6),
        FrameType::Object(name) => {
            write_u1(out, 7);
            write_u2(out, cp.class(name));
        }
        FrameType::Uninitialized(position) => {
            write_u1(out, 8);
            write_u2(out, offset_of(*position) as u16);
        }
    }
}

fn assemble(
    nodes: &[&AbstractInsnNode],
    cp: &mut ConstantPoolBuilder,
    signature: &str,
) -> Result<Assembled, ClassWriteError> {
    let mut code = Vec::new();
    let mut insn_offsets = Vec::new();
    let mut label_offsets = HashMap::new();
    let mut fixups = Vec::new();
    for node in nodes {
        match node {
            AbstractInsnNode::Label(label) => {
                label_offsets.insert(*label, code.len() as u32);
            }
            AbstractInsnNode::LineNumber(_) => {}
            AbstractInsnNode::Insn(insn) => {
                insn_offsets.push(code.len() as u32);
                emit_insn(&mut code, insn, cp, &mut fixups)?;
            }
        }
    }
    if code.len() > u16::MAX as usize {
        return Err(ClassWriteError::CodeTooLarge(signature.to_string()));
    }

    for fixup in fixups {
        let target = label_offsets
            .get(&fixup.target)
            .copied()
            .ok_or_else(|| ClassWriteError::MissingLabel(fixup.target.id, signature.to_string()))?;
        let relative = target as i64 - fixup.base as i64;
        if fixup.wide {
            write_i4_at(&mut code, fixup.at, relative as i32);
        } else {
            let short = i16::try_from(relative).map_err(|_| ClassWriteError::JumpOverflow {
                offset: relative,
                method: signature.to_string(),
            })?;
            write_i2_at(&mut code, fixup.at, short);
        }
    }

    Ok(Assembled {
        code,
        insn_offsets,
        label_offsets,
    })
}

fn emit_insn(
    code: &mut Vec<u8>,
    insn: &Insn,
    cp: &mut ConstantPoolBuilder,
    fixups: &mut Vec<JumpFixup>,
) -> Result<(), ClassWriteError> {
    let offset = code.len();
    match insn {
        Insn::Simple(node) => code.push(node.opcode),
        Insn::Int(node) => {
            code.push(node.insn.opcode);
            match node.insn.opcode {
                opcodes::BIPUSH => write_i1(code, node.operand as i8),
                opcodes::SIPUSH => write_i2(code, node.operand as i16),
                _ => write_u1(code, node.operand as u8),
            }
        }
        Insn::Var(node) => {
            let opcode = node.insn.opcode;
            let index = node.var_index;
            if index <= 3 && opcode != opcodes::RET {
                let compact = match opcode {
                    opcodes::ILOAD..=opcodes::ALOAD => {
                        opcodes::ILOAD_0 + (opcode - opcodes::ILOAD) * 4
                    }
                    _ => opcodes::ISTORE_0 + (opcode - opcodes::ISTORE) * 4,
                };
                code.push(compact + index as u8);
            } else if index > u8::MAX as u16 {
                code.push(opcodes::WIDE);
                code.push(opcode);
                write_u2(code, index);
            } else {
                code.push(opcode);
                write_u1(code, index as u8);
            }
        }
        Insn::Type(node) => {
            code.push(node.insn.opcode);
            write_u2(code, cp.class(&node.type_name));
        }
        Insn::Field(node) => {
            code.push(node.insn.opcode);
            write_u2(code, cp.field_ref(&node.owner, &node.name, &node.descriptor));
        }
        Insn::Method(node) => {
            let index = cp.method_ref(&node.owner, &node.name, &node.descriptor, node.is_interface);
            code.push(node.insn.opcode);
            write_u2(code, index);
            if node.insn.opcode == opcodes::INVOKEINTERFACE {
                let (params, _) = frames::parse_method_descriptor(&node.descriptor)?;
                let count: usize = params.iter().map(|param| param.slots()).sum::<usize>() + 1;
                write_u1(code, count as u8);
                write_u1(code, 0);
            }
        }
        Insn::InvokeDynamic(node) => {
            code.push(opcodes::INVOKEDYNAMIC);
            write_u2(code, node.index);
            write_u2(code, 0);
        }
        Insn::Jump(node) => {
            code.push(node.insn.opcode);
            fixups.push(JumpFixup {
                at: code.len(),
                base: offset,
                target: node.target,
                wide: false,
            });
            write_i2(code, 0);
        }
        Insn::Ldc(node) => {
            let index = cp.constant(&node.value);
            if node.insn.opcode == opcodes::LDC2_W || node.value.is_wide() {
                code.push(opcodes::LDC2_W);
                write_u2(code, index);
            } else if index <= u8::MAX as u16 {
                code.push(opcodes::LDC);
                write_u1(code, index as u8);
            } else {
                code.push(opcodes::LDC_W);
                write_u2(code, index);
            }
        }
        Insn::Iinc(node) => {
            if node.var_index > u8::MAX as u16 || i8::try_from(node.increment).is_err() {
                code.push(opcodes::WIDE);
                code.push(opcodes::IINC);
                write_u2(code, node.var_index);
                write_i2(code, node.increment);
            } else {
                code.push(opcodes::IINC);
                write_u1(code, node.var_index as u8);
                write_i1(code, node.increment as i8);
            }
        }
        Insn::TableSwitch(node) => {
            code.push(opcodes::TABLESWITCH);
            write_switch_padding(code, offset);
            let mut wide_fixup = |code: &mut Vec<u8>, target: LabelNode| {
                fixups.push(JumpFixup {
                    at: code.len(),
                    base: offset,
                    target,
                    wide: true,
                });
                write_i4(code, 0);
            };
            wide_fixup(code, node.default);
            write_i4(code, node.low);
            write_i4(code, node.high);
            for target in &node.targets {
                wide_fixup(code, *target);
            }
        }
        Insn::LookupSwitch(node) => {
            code.push(opcodes::LOOKUPSWITCH);
            write_switch_padding(code, offset);
            fixups.push(JumpFixup {
                at: code.len(),
                base: offset,
                target: node.default,
                wide: true,
            });
            write_i4(code, 0);
            let mut pairs = node.pairs.clone();
            pairs.sort_by_key(|(key, _)| *key);
            write_i4(code, pairs.len() as i32);
            for (key, target) in pairs {
                write_i4(code, key);
                fixups.push(JumpFixup {
                    at: code.len(),
                    base: offset,
                    target,
                    wide: true,
                });
                write_i4(code, 0);
            }
        }
        Insn::MultiANewArray(node) => {
            code.push(opcodes::MULTIANEWARRAY);
            write_u2(code, cp.class(&node.type_name));
            write_u1(code, node.dimensions);
        }
    }
    Ok(())
}

fn write_attribute(out: &mut Vec<u8>, attribute: &RawAttribute) -> Result<(), ClassWriteError> {
    let length = u32::try_from(attribute.info.len()).map_err(|_| ClassWriteError::InvalidConstantPool)?;
    write_u2(out, attribute.name_index);
    write_u4(out, length);
    out.extend_from_slice(&attribute.info);
    Ok(())
}

fn write_constant_pool(out: &mut Vec<u8>, cp: &[CpInfo]) -> Result<(), ClassWriteError> {
    write_u2(out, cp.len() as u16);
    for entry in cp.iter().skip(1) {
        match entry {
            CpInfo::Unusable => {}
            CpInfo::Utf8(value) => {
                let bytes = encode_modified_utf8(value);
                let len = u16::try_from(bytes.len()).map_err(|_| ClassWriteError::InvalidConstantPool)?;
                write_u1(out, 1);
                write_u2(out, len);
                out.extend_from_slice(&bytes);
            }
            CpInfo::Utf8Unpaired { raw, .. } => {
                let len = u16::try_from(raw.len()).map_err(|_| ClassWriteError::InvalidConstantPool)?;
                write_u1(out, 1);
                write_u2(out, len);
                out.extend_from_slice(raw);
            }
            CpInfo::Integer(value) => {
                write_u1(out, 3);
                write_u4(out, *value as u32);
            }
            CpInfo::Float(value) => {
                write_u1(out, 4);
                write_u4(out, value.to_bits());
            }
            CpInfo::Long(value) => {
                write_u1(out, 5);
                write_u8(out, *value as u64);
            }
            CpInfo::Double(value) => {
                write_u1(out, 6);
                write_u8(out, value.to_bits());
            }
            CpInfo::Class { name_index } => {
                write_u1(out, 7);
                write_u2(out, *name_index);
            }
            CpInfo::String { string_index } => {
                write_u1(out, 8);
                write_u2(out, *string_index);
            }
            CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            } => {
                write_u1(out, 9);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::Methodref {
                class_index,
                name_and_type_index,
            } => {
                write_u1(out, 10);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                write_u1(out, 11);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => {
                write_u1(out, 12);
                write_u2(out, *name_index);
                write_u2(out, *descriptor_index);
            }
            CpInfo::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                write_u1(out, 15);
                write_u1(out, *reference_kind);
                write_u2(out, *reference_index);
            }
            CpInfo::MethodType { descriptor_index } => {
                write_u1(out, 16);
                write_u2(out, *descriptor_index);
            }
            CpInfo::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                write_u1(out, 17);
                write_u2(out, *bootstrap_method_attr_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                write_u1(out, 18);
                write_u2(out, *bootstrap_method_attr_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::Module { name_index } => {
                write_u1(out, 19);
                write_u2(out, *name_index);
            }
            CpInfo::Package { name_index } => {
                write_u1(out, 20);
                write_u2(out, *name_index);
            }
        }
    }
    Ok(())
}

fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

fn write_u1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn write_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_u8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i1(out: &mut Vec<u8>, value: i8) {
    out.push(value as u8);
}

fn write_i2(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i4(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i2_at(out: &mut [u8], pos: usize, value: i16) {
    out[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
}

fn write_i4_at(out: &mut [u8], pos: usize, value: i32) {
    out[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
}

fn write_switch_padding(out: &mut Vec<u8>, opcode_offset: usize) {
    let padding = (4 - ((opcode_offset + 1) % 4)) % 4;
    out.extend(std::iter::repeat(0).take(padding));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool_deduplication() {
        let mut cp = ConstantPoolBuilder::new();
        let i1 = cp.utf8("Hello");
        let i2 = cp.utf8("World");
        let i3 = cp.utf8("Hello");

        assert_eq!(i1, 1);
        assert_eq!(i2, 2);
        assert_eq!(i3, 1, "Duplicate UTF8 should return existing index");

        let c1 = cp.class("java/lang/Object");
        let c2 = cp.class("java/lang/Object");
        assert_eq!(c1, c2, "Duplicate Class should return existing index");
    }

    #[test]
    fn test_seeded_pool_keeps_indices_and_appends() {
        let pool = vec![
            CpInfo::Unusable,
            CpInfo::Utf8("game/Entity".to_string()),
            CpInfo::Class { name_index: 1 },
            CpInfo::Long(7),
            CpInfo::Unusable,
        ];
        let mut cp = ConstantPoolBuilder::from_pool(pool);
        assert_eq!(cp.class("game/Entity"), 2);
        assert_eq!(cp.long(7), 3);
        assert_eq!(cp.utf8("update"), 5);
        assert_eq!(cp.double(1.5), 6);
        assert_eq!(cp.integer(1), 8, "double occupies two slots");
        assert_eq!(cp.len(), 9);
    }

    #[test]
    fn test_member_refs_are_keyed_by_kind() {
        let mut cp = ConstantPoolBuilder::new();
        let method = cp.method_ref("game/Hooks", "tick", "()V", false);
        let interface = cp.method_ref("game/Hooks", "tick", "()V", true);
        let field = cp.field_ref("game/Hooks", "tick", "()V");
        assert_ne!(method, interface);
        assert_ne!(method, field);
        assert_eq!(cp.method_ref("game/Hooks", "tick", "()V", false), method);
    }

    #[test]
    fn test_modified_utf8_encoding() {
        assert_eq!(encode_modified_utf8("a\0b"), vec![0x61, 0xC0, 0x80, 0x62]);
        assert_eq!(encode_modified_utf8("\u{00e9}"), vec![0xC3, 0xA9]);
        // Supplementary characters are written as surrogate pairs.
        assert_eq!(encode_modified_utf8("\u{1F600}").len(), 6);
    }

    #[test]
    fn test_subtract_ranges() {
        assert_eq!(subtract_ranges((0, 20), &[(5, 10)]), vec![(0, 5), (10, 20)]);
        assert_eq!(subtract_ranges((5, 10), &[(0, 20)]), Vec::<(u32, u32)>::new());
        assert_eq!(subtract_ranges((0, 4), &[(4, 8)]), vec![(0, 4)]);
    }

    #[test]
    fn test_switch_padding_aligns_operands() {
        let mut code = vec![opcodes::NOP, opcodes::TABLESWITCH];
        write_switch_padding(&mut code, 1);
        assert_eq!(code.len(), 4);
    }
}

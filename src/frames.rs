//! Data-flow over a method body: operand stack depth, local usage and the
//! verification frames a `StackMapTable` needs.
//!
//! The analysis runs over real instructions only. Positions are indices into
//! that instruction slice; labels are resolved to the position of the first
//! instruction that follows them.

use std::collections::{HashMap, VecDeque};

use crate::constants::{ACC_STATIC, OBJECT};
use crate::error::ClassWriteError;
use crate::hierarchy::SafeTypeResolver;
use crate::insn::{Insn, LabelNode, LdcConstant};
use crate::opcodes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal name for classes, descriptor for arrays.
    Object(String),
    /// Result of the `new` at this instruction position, before `<init>`.
    Uninitialized(usize),
}

impl FrameType {
    fn object(name: &str) -> Self {
        FrameType::Object(name.to_string())
    }

    fn is_category2(&self) -> bool {
        matches!(self, FrameType::Long | FrameType::Double)
    }

    fn slots(&self) -> usize {
        if self.is_category2() { 2 } else { 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Frame {
    pub locals: Vec<FrameType>,
    pub stack: Vec<FrameType>,
}

impl Frame {
    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(FrameType::slots).sum()
    }

    /// Locals as a `StackMapTable` lists them: one entry per value, trailing
    /// `Top`s dropped.
    pub fn compact_locals(&self) -> Vec<FrameType> {
        let mut out = Vec::with_capacity(self.locals.len());
        let mut i = 0usize;
        while i < self.locals.len() {
            let value = &self.locals[i];
            out.push(value.clone());
            i += if value.is_category2() { 2 } else { 1 };
        }
        while matches!(out.last(), Some(FrameType::Top)) {
            out.pop();
        }
        out
    }
}

/// An exception table entry in instruction positions.
#[derive(Debug, Clone)]
pub(crate) struct Handler {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub catch_type: String,
}

impl Handler {
    fn covers(&self, position: usize) -> bool {
        position >= self.start && position < self.end
    }
}

#[derive(Debug)]
pub(crate) struct Analysis {
    /// Frame on entry to each instruction; `None` when unreachable.
    pub frames: Vec<Option<Frame>>,
    pub max_stack: u16,
    pub max_locals: u16,
}

pub(crate) struct MethodContext<'a> {
    pub owner: &'a str,
    pub access_flags: u16,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub signature: &'a str,
}

/// Runs the worklist until every reachable instruction has a stable frame.
pub(crate) fn analyze(
    method: &MethodContext<'_>,
    insns: &[&Insn],
    label_positions: &HashMap<LabelNode, usize>,
    handlers: &[Handler],
    resolver: &SafeTypeResolver<'_>,
) -> Result<Analysis, ClassWriteError> {
    let mut frames: Vec<Option<Frame>> = vec![None; insns.len()];
    let initial = initial_frame(method)?;
    let mut max_stack = 0usize;
    let mut max_locals = initial.locals.len();
    if insns.is_empty() {
        return Err(ClassWriteError::FrameComputation(format!(
            "{} has an empty body",
            method.signature
        )));
    }

    let mut worklist = VecDeque::new();
    let mut queued = vec![false; insns.len()];
    frames[0] = Some(initial);
    worklist.push_back(0usize);
    queued[0] = true;

    while let Some(position) = worklist.pop_front() {
        queued[position] = false;
        let Some(frame) = frames[position].clone() else {
            continue;
        };
        let insn = insns[position];
        let out = execute(insn, &frame, position, insns, method)?;
        max_stack = max_stack.max(frame.stack_slots()).max(out.stack_slots());
        max_locals = max_locals.max(out.locals.len());

        let mut successors = Vec::new();
        for target in successors_of(insn, position, label_positions, method)? {
            successors.push((target, out.clone()));
        }
        for handler in handlers.iter().filter(|handler| handler.covers(position)) {
            let catch = vec![FrameType::Object(handler.catch_type.clone())];
            successors.push((
                handler.handler,
                Frame {
                    locals: frame.locals.clone(),
                    stack: catch.clone(),
                },
            ));
            successors.push((
                handler.handler,
                Frame {
                    locals: out.locals.clone(),
                    stack: catch,
                },
            ));
        }

        for (target, incoming) in successors {
            if target >= insns.len() {
                return Err(ClassWriteError::FrameComputation(format!(
                    "execution falls off the end of {}",
                    method.signature
                )));
            }
            let changed = match &frames[target] {
                None => {
                    frames[target] = Some(incoming);
                    true
                }
                Some(existing) => match merge_frames(existing, &incoming, resolver, method)? {
                    Some(merged) => {
                        frames[target] = Some(merged);
                        true
                    }
                    None => false,
                },
            };
            if changed && !queued[target] {
                queued[target] = true;
                worklist.push_back(target);
            }
        }
    }

    Ok(Analysis {
        frames,
        max_stack: clamp_u16(max_stack, method)?,
        max_locals: clamp_u16(max_locals, method)?,
    })
}

fn clamp_u16(value: usize, method: &MethodContext<'_>) -> Result<u16, ClassWriteError> {
    u16::try_from(value).map_err(|_| ClassWriteError::CodeTooLarge(method.signature.to_string()))
}

fn successors_of(
    insn: &Insn,
    position: usize,
    label_positions: &HashMap<LabelNode, usize>,
    method: &MethodContext<'_>,
) -> Result<Vec<usize>, ClassWriteError> {
    let resolve = |label: LabelNode| {
        label_positions
            .get(&label)
            .copied()
            .ok_or_else(|| ClassWriteError::MissingLabel(label.id, method.signature.to_string()))
    };
    let opcode = insn.opcode();
    let mut successors = Vec::new();
    match insn {
        Insn::Jump(node) => {
            if opcode != opcodes::GOTO {
                successors.push(position + 1);
            }
            successors.push(resolve(node.target)?);
        }
        Insn::TableSwitch(_) | Insn::LookupSwitch(_) => {
            for label in insn.targets() {
                successors.push(resolve(label)?);
            }
        }
        _ if matches!(opcode, opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW) => {}
        _ => successors.push(position + 1),
    }
    Ok(successors)
}

fn merge_frames(
    existing: &Frame,
    incoming: &Frame,
    resolver: &SafeTypeResolver<'_>,
    method: &MethodContext<'_>,
) -> Result<Option<Frame>, ClassWriteError> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(ClassWriteError::FrameComputation(format!(
            "inconsistent stack height ({} vs {}) in {}",
            existing.stack.len(),
            incoming.stack.len(),
            method.signature
        )));
    }
    let len = existing.locals.len().max(incoming.locals.len());
    let mut locals = Vec::with_capacity(len);
    for i in 0..len {
        let left = existing.locals.get(i).unwrap_or(&FrameType::Top);
        let right = incoming.locals.get(i).unwrap_or(&FrameType::Top);
        locals.push(merge_type(left, right, resolver)?);
    }
    let mut stack = Vec::with_capacity(existing.stack.len());
    for (left, right) in existing.stack.iter().zip(&incoming.stack) {
        stack.push(merge_type(left, right, resolver)?);
    }
    let merged = Frame { locals, stack };
    Ok(if merged == *existing { None } else { Some(merged) })
}

fn merge_type(
    left: &FrameType,
    right: &FrameType,
    resolver: &SafeTypeResolver<'_>,
) -> Result<FrameType, ClassWriteError> {
    if left == right {
        return Ok(left.clone());
    }
    Ok(match (left, right) {
        (FrameType::Null, FrameType::Object(name)) | (FrameType::Object(name), FrameType::Null) => {
            FrameType::Object(name.clone())
        }
        (FrameType::Object(left), FrameType::Object(right)) => {
            FrameType::Object(common_reference(left, right, resolver)?)
        }
        _ => FrameType::Top,
    })
}

/// Common supertype of two reference types, arrays included.
fn common_reference(
    left: &str,
    right: &str,
    resolver: &SafeTypeResolver<'_>,
) -> Result<String, ClassWriteError> {
    if left == right {
        return Ok(left.to_string());
    }
    match (left.strip_prefix('['), right.strip_prefix('[')) {
        (Some(left_element), Some(right_element)) => {
            match (element_reference(left_element), element_reference(right_element)) {
                (Some(left_ref), Some(right_ref)) => {
                    let merged = common_reference(left_ref, right_ref, resolver)?;
                    Ok(format!("[{}", reference_descriptor(&merged)))
                }
                _ => Ok(OBJECT.to_string()),
            }
        }
        (None, None) => Ok(resolver.common_super_class(left, right)?),
        _ => Ok(OBJECT.to_string()),
    }
}

/// `Lfoo/Bar;` -> `foo/Bar`, `[I` -> `[I`, primitives -> `None`.
fn element_reference(element: &str) -> Option<&str> {
    if element.starts_with('[') {
        Some(element)
    } else {
        element.strip_prefix('L').and_then(|rest| rest.strip_suffix(';'))
    }
}

fn reference_descriptor(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{name};")
    }
}

fn initial_frame(method: &MethodContext<'_>) -> Result<Frame, ClassWriteError> {
    let mut locals = Vec::new();
    if method.access_flags & ACC_STATIC == 0 {
        if method.name == "<init>" && method.owner != OBJECT {
            locals.push(FrameType::UninitializedThis);
        } else {
            locals.push(FrameType::object(method.owner));
        }
    }
    let (params, _) = parse_method_descriptor(method.descriptor)?;
    for param in params {
        let value = param.frame_type();
        let wide = value.is_category2();
        locals.push(value);
        if wide {
            locals.push(FrameType::Top);
        }
    }
    Ok(Frame {
        locals,
        stack: Vec::new(),
    })
}

fn execute(
    insn: &Insn,
    frame: &Frame,
    position: usize,
    insns: &[&Insn],
    method: &MethodContext<'_>,
) -> Result<Frame, ClassWriteError> {
    let mut locals = frame.locals.clone();
    let mut stack = frame.stack.clone();
    let underflow = || {
        ClassWriteError::FrameComputation(format!(
            "stack underflow at {insn} in {}",
            method.signature
        ))
    };
    let pop = |stack: &mut Vec<FrameType>| -> Result<FrameType, ClassWriteError> {
        stack.pop().ok_or_else(underflow)
    };
    let pop_n = |stack: &mut Vec<FrameType>, count: usize| -> Result<(), ClassWriteError> {
        for _ in 0..count {
            stack.pop().ok_or_else(underflow)?;
        }
        Ok(())
    };
    // Values covering exactly `slots` stack slots from the top, bottom first.
    let take_slots = |stack: &mut Vec<FrameType>, slots: usize| -> Result<Vec<FrameType>, ClassWriteError> {
        let mut taken = Vec::new();
        let mut covered = 0;
        while covered < slots {
            let value = stack.pop().ok_or_else(underflow)?;
            covered += value.slots();
            taken.insert(0, value);
        }
        if covered != slots {
            return Err(ClassWriteError::FrameComputation(format!(
                "{insn} splits a long or double in {}",
                method.signature
            )));
        }
        Ok(taken)
    };

    let opcode = insn.opcode();
    match insn {
        Insn::Simple(_) => match opcode {
            opcodes::NOP => {}
            opcodes::ACONST_NULL => stack.push(FrameType::Null),
            opcodes::ICONST_M1..=opcodes::ICONST_5 => stack.push(FrameType::Integer),
            opcodes::LCONST_0 | opcodes::LCONST_1 => stack.push(FrameType::Long),
            opcodes::FCONST_0..=opcodes::FCONST_2 => stack.push(FrameType::Float),
            opcodes::DCONST_0 | opcodes::DCONST_1 => stack.push(FrameType::Double),
            opcodes::IALOAD..=opcodes::SALOAD => {
                pop(&mut stack)?;
                let array = pop(&mut stack)?;
                stack.push(match opcode {
                    opcodes::LALOAD => FrameType::Long,
                    opcodes::FALOAD => FrameType::Float,
                    opcodes::DALOAD => FrameType::Double,
                    opcodes::AALOAD => array_element_type(&array),
                    _ => FrameType::Integer,
                });
            }
            opcodes::IASTORE..=opcodes::SASTORE => pop_n(&mut stack, 3)?,
            opcodes::POP => {
                take_slots(&mut stack, 1)?;
            }
            opcodes::POP2 => {
                take_slots(&mut stack, 2)?;
            }
            opcodes::DUP | opcodes::DUP_X1 | opcodes::DUP_X2 => {
                let top = take_slots(&mut stack, 1)?;
                let under = match opcode {
                    opcodes::DUP => Vec::new(),
                    opcodes::DUP_X1 => take_slots(&mut stack, 1)?,
                    _ => take_slots(&mut stack, 2)?,
                };
                stack.extend(top.iter().cloned());
                stack.extend(under);
                stack.extend(top);
            }
            opcodes::DUP2 | opcodes::DUP2_X1 | opcodes::DUP2_X2 => {
                let top = take_slots(&mut stack, 2)?;
                let under = match opcode {
                    opcodes::DUP2 => Vec::new(),
                    opcodes::DUP2_X1 => take_slots(&mut stack, 1)?,
                    _ => take_slots(&mut stack, 2)?,
                };
                stack.extend(top.iter().cloned());
                stack.extend(under);
                stack.extend(top);
            }
            opcodes::SWAP => {
                let top = take_slots(&mut stack, 1)?;
                let under = take_slots(&mut stack, 1)?;
                stack.extend(top);
                stack.extend(under);
            }
            opcodes::IADD..=opcodes::DREM => {
                pop_n(&mut stack, 2)?;
                stack.push(arithmetic_type(opcode - opcodes::IADD));
            }
            opcodes::INEG..=opcodes::DNEG => {
                pop(&mut stack)?;
                stack.push(arithmetic_type(opcode - opcodes::INEG));
            }
            opcodes::ISHL..=opcodes::LXOR => {
                pop_n(&mut stack, 2)?;
                stack.push(arithmetic_type((opcode - opcodes::ISHL) % 2));
            }
            opcodes::I2L..=opcodes::I2S => {
                pop(&mut stack)?;
                stack.push(match opcode {
                    opcodes::I2L | opcodes::F2L | opcodes::D2L => FrameType::Long,
                    opcodes::I2F | opcodes::L2F | opcodes::D2F => FrameType::Float,
                    opcodes::I2D | opcodes::L2D | opcodes::F2D => FrameType::Double,
                    _ => FrameType::Integer,
                });
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                pop_n(&mut stack, 2)?;
                stack.push(FrameType::Integer);
            }
            opcodes::IRETURN..=opcodes::ARETURN
            | opcodes::ATHROW
            | opcodes::MONITORENTER
            | opcodes::MONITOREXIT => {
                pop(&mut stack)?;
            }
            opcodes::RETURN => {}
            opcodes::ARRAYLENGTH => {
                pop(&mut stack)?;
                stack.push(FrameType::Integer);
            }
            _ => return Err(unsupported(insn, method)),
        },
        Insn::Int(node) => match opcode {
            opcodes::NEWARRAY => {
                pop(&mut stack)?;
                stack.push(FrameType::Object(newarray_descriptor(node.operand, method)?));
            }
            _ => stack.push(FrameType::Integer),
        },
        Insn::Var(node) => match opcode {
            opcodes::ILOAD => stack.push(FrameType::Integer),
            opcodes::LLOAD => stack.push(FrameType::Long),
            opcodes::FLOAD => stack.push(FrameType::Float),
            opcodes::DLOAD => stack.push(FrameType::Double),
            opcodes::ALOAD => stack.push(
                locals
                    .get(node.var_index as usize)
                    .cloned()
                    .unwrap_or(FrameType::Top),
            ),
            opcodes::ISTORE..=opcodes::ASTORE => {
                let value = pop(&mut stack)?;
                store_local(&mut locals, node.var_index, value);
            }
            _ => return Err(ClassWriteError::UnsupportedSubroutine(method.signature.to_string())),
        },
        Insn::Iinc(node) => store_local(&mut locals, node.var_index, FrameType::Integer),
        Insn::Type(node) => match opcode {
            opcodes::NEW => stack.push(FrameType::Uninitialized(position)),
            opcodes::ANEWARRAY => {
                pop(&mut stack)?;
                stack.push(FrameType::Object(format!(
                    "[{}",
                    reference_descriptor(&node.type_name)
                )));
            }
            opcodes::CHECKCAST => {
                pop(&mut stack)?;
                stack.push(FrameType::object(&node.type_name));
            }
            _ => {
                pop(&mut stack)?;
                stack.push(FrameType::Integer);
            }
        },
        Insn::Field(node) => {
            let value = parse_field_descriptor(&node.descriptor)?.frame_type();
            match opcode {
                opcodes::GETSTATIC => stack.push(value),
                opcodes::PUTSTATIC => pop_n(&mut stack, 1)?,
                opcodes::GETFIELD => {
                    pop(&mut stack)?;
                    stack.push(value);
                }
                _ => pop_n(&mut stack, 2)?,
            }
        }
        Insn::Method(node) => {
            let (params, ret) = parse_method_descriptor(&node.descriptor)?;
            pop_n(&mut stack, params.len())?;
            if opcode != opcodes::INVOKESTATIC {
                let receiver = pop(&mut stack)?;
                if opcode == opcodes::INVOKESPECIAL && node.name == "<init>" {
                    let initialized = match &receiver {
                        FrameType::UninitializedThis => FrameType::object(method.owner),
                        FrameType::Uninitialized(at) => match insns.get(*at) {
                            Some(Insn::Type(new)) => FrameType::object(&new.type_name),
                            _ => FrameType::object(&node.owner),
                        },
                        _ => receiver.clone(),
                    };
                    for value in locals.iter_mut().chain(stack.iter_mut()) {
                        if *value == receiver {
                            *value = initialized.clone();
                        }
                    }
                }
            }
            if let Some(value) = ret {
                stack.push(value.frame_type());
            }
        }
        Insn::InvokeDynamic(node) => {
            let (params, ret) = parse_method_descriptor(&node.descriptor)?;
            pop_n(&mut stack, params.len())?;
            if let Some(value) = ret {
                stack.push(value.frame_type());
            }
        }
        Insn::Jump(_) => match opcode {
            opcodes::GOTO => {}
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => pop_n(&mut stack, 2)?,
            opcodes::JSR => {
                return Err(ClassWriteError::UnsupportedSubroutine(method.signature.to_string()))
            }
            _ => pop_n(&mut stack, 1)?,
        },
        Insn::Ldc(node) => stack.push(ldc_type(&node.value)?),
        Insn::TableSwitch(_) | Insn::LookupSwitch(_) => pop_n(&mut stack, 1)?,
        Insn::MultiANewArray(node) => {
            pop_n(&mut stack, node.dimensions as usize)?;
            stack.push(FrameType::object(&node.type_name));
        }
    }

    Ok(Frame { locals, stack })
}

fn unsupported(insn: &Insn, method: &MethodContext<'_>) -> ClassWriteError {
    ClassWriteError::FrameComputation(format!("unsupported instruction {insn} in {}", method.signature))
}

/// Result type of an opcode laid out in `I, L, F, D` order.
fn arithmetic_type(offset: u8) -> FrameType {
    match offset % 4 {
        0 => FrameType::Integer,
        1 => FrameType::Long,
        2 => FrameType::Float,
        _ => FrameType::Double,
    }
}

fn store_local(locals: &mut Vec<FrameType>, index: u16, value: FrameType) {
    let idx = index as usize;
    let width = value.slots();
    if locals.len() < idx + width {
        locals.resize(idx + width, FrameType::Top);
    }
    if idx > 0 && locals[idx - 1].is_category2() {
        locals[idx - 1] = FrameType::Top;
    }
    locals[idx] = value;
    if width == 2 {
        locals[idx + 1] = FrameType::Top;
    }
}

fn array_element_type(array: &FrameType) -> FrameType {
    let element = match array {
        FrameType::Object(desc) => desc.strip_prefix('['),
        _ => None,
    };
    match element {
        Some(element) => match parse_field_descriptor(element) {
            Ok(field) => field.frame_type(),
            Err(_) => FrameType::object(OBJECT),
        },
        // aaload on null still yields a reference
        None => FrameType::Null,
    }
}

fn newarray_descriptor(atype: i32, method: &MethodContext<'_>) -> Result<String, ClassWriteError> {
    let desc = match atype {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        _ => {
            return Err(ClassWriteError::FrameComputation(format!(
                "invalid newarray type {atype} in {}",
                method.signature
            )));
        }
    };
    Ok(desc.to_string())
}

fn ldc_type(value: &LdcConstant) -> Result<FrameType, ClassWriteError> {
    Ok(match value {
        LdcConstant::Integer(_) => FrameType::Integer,
        LdcConstant::Float(_) => FrameType::Float,
        LdcConstant::Long(_) => FrameType::Long,
        LdcConstant::Double(_) => FrameType::Double,
        LdcConstant::String(_) | LdcConstant::RawString(_) => FrameType::object("java/lang/String"),
        LdcConstant::Class(_) => FrameType::object("java/lang/Class"),
        LdcConstant::MethodType(_) => FrameType::object("java/lang/invoke/MethodType"),
        LdcConstant::MethodHandle(_) => FrameType::object("java/lang/invoke/MethodHandle"),
        LdcConstant::Dynamic { descriptor, .. } => parse_field_descriptor(descriptor)?.frame_type(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FieldType {
    Int,
    Float,
    Long,
    Double,
    /// Internal name, or descriptor for arrays.
    Reference(String),
}

impl FieldType {
    fn frame_type(&self) -> FrameType {
        match self {
            FieldType::Int => FrameType::Integer,
            FieldType::Float => FrameType::Float,
            FieldType::Long => FrameType::Long,
            FieldType::Double => FrameType::Double,
            FieldType::Reference(name) => FrameType::Object(name.clone()),
        }
    }

    pub fn slots(&self) -> usize {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }
}

fn bad_descriptor(desc: &str) -> ClassWriteError {
    ClassWriteError::FrameComputation(format!("bad descriptor {desc}"))
}

pub(crate) fn parse_field_descriptor(desc: &str) -> Result<FieldType, ClassWriteError> {
    let (field, rest) = parse_field_type(desc).ok_or_else(|| bad_descriptor(desc))?;
    if !rest.is_empty() {
        return Err(bad_descriptor(desc));
    }
    Ok(field)
}

/// Parameter types and return type (`None` for `void`).
pub(crate) fn parse_method_descriptor(
    desc: &str,
) -> Result<(Vec<FieldType>, Option<FieldType>), ClassWriteError> {
    let mut rest = desc.strip_prefix('(').ok_or_else(|| bad_descriptor(desc))?;
    let mut params = Vec::new();
    while !rest.starts_with(')') {
        let (param, tail) = parse_field_type(rest).ok_or_else(|| bad_descriptor(desc))?;
        params.push(param);
        rest = tail;
    }
    let ret = &rest[1..];
    if ret == "V" {
        return Ok((params, None));
    }
    Ok((params, Some(parse_field_descriptor(ret)?)))
}

fn parse_field_type(desc: &str) -> Option<(FieldType, &str)> {
    let first = desc.chars().next()?;
    let rest = &desc[first.len_utf8()..];
    match first {
        'Z' | 'B' | 'C' | 'S' | 'I' => Some((FieldType::Int, rest)),
        'F' => Some((FieldType::Float, rest)),
        'J' => Some((FieldType::Long, rest)),
        'D' => Some((FieldType::Double, rest)),
        'L' => {
            let end = rest.find(';')?;
            Some((FieldType::Reference(rest[..end].to_string()), &rest[end + 1..]))
        }
        '[' => {
            let (_, tail) = parse_field_type(rest)?;
            let consumed = desc.len() - tail.len();
            Some((FieldType::Reference(desc[..consumed].to_string()), tail))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{ClassInfo, StaticHierarchy};
    use crate::insn::{InsnNode, JumpInsnNode, MethodInsnNode, TypeInsnNode, VarInsnNode};

    fn context<'a>(descriptor: &'a str) -> MethodContext<'a> {
        MethodContext {
            owner: "game/Sample",
            access_flags: ACC_STATIC,
            name: "run",
            descriptor,
            signature: "run",
        }
    }

    #[test]
    fn test_parse_method_descriptor() {
        let (params, ret) = parse_method_descriptor("(IJ[[Ljava/lang/String;Lgame/Entity;)Z").unwrap();
        assert_eq!(
            params,
            vec![
                FieldType::Int,
                FieldType::Long,
                FieldType::Reference("[[Ljava/lang/String;".to_string()),
                FieldType::Reference("game/Entity".to_string()),
            ]
        );
        assert_eq!(ret, Some(FieldType::Int));
        assert!(parse_method_descriptor("(L;").is_err());
    }

    #[test]
    fn test_non_ascii_descriptors_are_rejected() {
        assert!(matches!(
            parse_method_descriptor("(\u{e9})V"),
            Err(ClassWriteError::FrameComputation(_))
        ));
        assert!(parse_field_descriptor("[\u{e9}").is_err());
        assert!(parse_method_descriptor("()\u{e9}").is_err());
    }

    #[test]
    fn test_compact_locals_collapses_wide_values() {
        let frame = Frame {
            locals: vec![
                FrameType::Long,
                FrameType::Top,
                FrameType::Integer,
                FrameType::Top,
                FrameType::Top,
            ],
            stack: Vec::new(),
        };
        assert_eq!(frame.compact_locals(), vec![FrameType::Long, FrameType::Integer]);
    }

    #[test]
    fn test_branch_merge_uses_common_superclass() {
        let mut hierarchy = StaticHierarchy::with_platform_types();
        hierarchy
            .insert(ClassInfo::class("game/Entity", OBJECT, &[]))
            .insert(ClassInfo::class("game/EntityPig", "game/Entity", &[]))
            .insert(ClassInfo::class("game/EntityCow", "game/Entity", &[]));
        let resolver = SafeTypeResolver::new(&hierarchy);

        let else_label = LabelNode { id: 0 };
        let join_label = LabelNode { id: 1 };
        let new_pig: Insn = TypeInsnNode::new(opcodes::NEW, "game/EntityPig").into();
        let new_cow: Insn = TypeInsnNode::new(opcodes::NEW, "game/EntityCow").into();
        let insns: Vec<Insn> = vec![
            VarInsnNode::new(opcodes::ILOAD, 0).into(),
            JumpInsnNode::new(opcodes::IFEQ, else_label).into(),
            new_pig,
            InsnNode::new(opcodes::DUP).into(),
            MethodInsnNode::new(opcodes::INVOKESPECIAL, "game/EntityPig", "<init>", "()V").into(),
            JumpInsnNode::new(opcodes::GOTO, join_label).into(),
            new_cow,
            InsnNode::new(opcodes::DUP).into(),
            MethodInsnNode::new(opcodes::INVOKESPECIAL, "game/EntityCow", "<init>", "()V").into(),
            InsnNode::new(opcodes::ARETURN).into(),
        ];
        let refs: Vec<&Insn> = insns.iter().collect();
        let labels = HashMap::from([(else_label, 6), (join_label, 9)]);
        let method = context("(Z)Lgame/Entity;");

        let analysis = analyze(&method, &refs, &labels, &[], &resolver).unwrap();
        let join = analysis.frames[9].as_ref().unwrap();
        assert_eq!(join.stack, vec![FrameType::object("game/Entity")]);
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(analysis.max_locals, 1);
    }

    #[test]
    fn test_unreachable_code_has_no_frame() {
        let hierarchy = StaticHierarchy::with_platform_types();
        let resolver = SafeTypeResolver::new(&hierarchy);
        let insns: Vec<Insn> = vec![
            InsnNode::new(opcodes::RETURN).into(),
            InsnNode::new(opcodes::NOP).into(),
            InsnNode::new(opcodes::RETURN).into(),
        ];
        let refs: Vec<&Insn> = insns.iter().collect();
        let analysis = analyze(&context("()V"), &refs, &HashMap::new(), &[], &resolver).unwrap();
        assert!(analysis.frames[0].is_some());
        assert!(analysis.frames[1].is_none());
        assert!(analysis.frames[2].is_none());
    }

    #[test]
    fn test_dup2_x2_on_four_words() {
        let hierarchy = StaticHierarchy::with_platform_types();
        let resolver = SafeTypeResolver::new(&hierarchy);
        let insns: Vec<Insn> = vec![
            InsnNode::new(opcodes::ICONST_1).into(),
            InsnNode::new(opcodes::FCONST_1).into(),
            InsnNode::new(opcodes::ACONST_NULL).into(),
            InsnNode::new(opcodes::ICONST_2).into(),
            InsnNode::new(opcodes::DUP2_X2).into(),
            InsnNode::new(opcodes::RETURN).into(),
        ];
        let refs: Vec<&Insn> = insns.iter().collect();
        let analysis = analyze(&context("()V"), &refs, &HashMap::new(), &[], &resolver).unwrap();
        let before_return = analysis.frames[5].as_ref().unwrap();
        assert_eq!(
            before_return.stack,
            vec![
                FrameType::Null,
                FrameType::Integer,
                FrameType::Integer,
                FrameType::Float,
                FrameType::Null,
                FrameType::Integer,
            ]
        );
        assert_eq!(analysis.max_stack, 6);
    }
}

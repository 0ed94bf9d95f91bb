use std::collections::HashMap;
use std::fmt;

use crate::opcodes;

/// A position marker inside an instruction list.
///
/// Labels are plain ids; they are only meaningful relative to the list that
/// defines them. Splicing a fragment into another list renumbers the labels the
/// fragment defines (see [`InsnList::insert`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelNode {
    pub id: usize,
}

/// Identity of one node inside an [`InsnList`].
///
/// Ids are never reused by the list that handed them out, so an id taken before
/// an edit still names the same node afterwards (or nothing, once removed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(u32);

#[derive(Debug, Clone, PartialEq)]
pub struct InsnNode {
    pub opcode: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntInsnNode {
    pub insn: InsnNode,
    pub operand: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarInsnNode {
    pub insn: InsnNode,
    pub var_index: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeInsnNode {
    pub insn: InsnNode,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInsnNode {
    pub insn: InsnNode,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInsnNode {
    pub insn: InsnNode,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

/// `invokedynamic` keeps its constant pool index; the pool is append-only, so
/// the bootstrap reference stays valid across a rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeDynamicInsnNode {
    pub insn: InsnNode,
    pub index: u16,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JumpInsnNode {
    pub insn: InsnNode,
    pub target: LabelNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LdcInsnNode {
    pub insn: InsnNode,
    pub value: LdcConstant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IincInsnNode {
    pub insn: InsnNode,
    pub var_index: u16,
    pub increment: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSwitchInsnNode {
    pub insn: InsnNode,
    pub default: LabelNode,
    pub low: i32,
    pub high: i32,
    pub targets: Vec<LabelNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupSwitchInsnNode {
    pub insn: InsnNode,
    pub default: LabelNode,
    pub pairs: Vec<(i32, LabelNode)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiANewArrayInsnNode {
    pub insn: InsnNode,
    pub type_name: String,
    pub dimensions: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineNumberInsnNode {
    pub line: u16,
    pub start: LabelNode,
}

/// Value pushed by `ldc`, `ldc_w` or `ldc2_w`.
#[derive(Debug, Clone, PartialEq)]
pub enum LdcConstant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    /// Constant pool index of a `CONSTANT_MethodHandle`.
    MethodHandle(u16),
    /// Constant pool index of a `CONSTANT_String` whose text is not valid
    /// Unicode (an unpaired surrogate).
    RawString(u16),
    /// Constant pool index of a `CONSTANT_Dynamic` plus its field descriptor.
    Dynamic { index: u16, descriptor: String },
}

impl LdcConstant {
    pub fn is_wide(&self) -> bool {
        match self {
            LdcConstant::Long(_) | LdcConstant::Double(_) => true,
            LdcConstant::Dynamic { descriptor, .. } => descriptor == "J" || descriptor == "D",
            _ => false,
        }
    }
}

impl From<i32> for LdcConstant {
    fn from(value: i32) -> Self {
        LdcConstant::Integer(value)
    }
}

impl From<f32> for LdcConstant {
    fn from(value: f32) -> Self {
        LdcConstant::Float(value)
    }
}

impl From<i64> for LdcConstant {
    fn from(value: i64) -> Self {
        LdcConstant::Long(value)
    }
}

impl From<f64> for LdcConstant {
    fn from(value: f64) -> Self {
        LdcConstant::Double(value)
    }
}

impl From<&str> for LdcConstant {
    fn from(value: &str) -> Self {
        LdcConstant::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbstractInsnNode {
    Label(LabelNode),
    LineNumber(LineNumberInsnNode),
    Insn(Insn),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Simple(InsnNode),
    Int(IntInsnNode),
    Var(VarInsnNode),
    Type(TypeInsnNode),
    Field(FieldInsnNode),
    Method(MethodInsnNode),
    InvokeDynamic(InvokeDynamicInsnNode),
    Jump(JumpInsnNode),
    Ldc(LdcInsnNode),
    Iinc(IincInsnNode),
    TableSwitch(TableSwitchInsnNode),
    LookupSwitch(LookupSwitchInsnNode),
    MultiANewArray(MultiANewArrayInsnNode),
}

impl Insn {
    pub fn opcode(&self) -> u8 {
        match self {
            Insn::Simple(node) => node.opcode,
            Insn::Int(node) => node.insn.opcode,
            Insn::Var(node) => node.insn.opcode,
            Insn::Type(node) => node.insn.opcode,
            Insn::Field(node) => node.insn.opcode,
            Insn::Method(node) => node.insn.opcode,
            Insn::InvokeDynamic(node) => node.insn.opcode,
            Insn::Jump(node) => node.insn.opcode,
            Insn::Ldc(node) => node.insn.opcode,
            Insn::Iinc(node) => node.insn.opcode,
            Insn::TableSwitch(node) => node.insn.opcode,
            Insn::LookupSwitch(node) => node.insn.opcode,
            Insn::MultiANewArray(node) => node.insn.opcode,
        }
    }

    /// Labels this instruction may transfer control to.
    pub fn targets(&self) -> Vec<LabelNode> {
        match self {
            Insn::Jump(node) => vec![node.target],
            Insn::TableSwitch(node) => {
                let mut targets = vec![node.default];
                targets.extend(node.targets.iter().copied());
                targets
            }
            Insn::LookupSwitch(node) => {
                let mut targets = vec![node.default];
                targets.extend(node.pairs.iter().map(|(_, label)| *label));
                targets
            }
            _ => Vec::new(),
        }
    }

    fn map_labels(&mut self, map: &impl Fn(LabelNode) -> LabelNode) {
        match self {
            Insn::Jump(node) => node.target = map(node.target),
            Insn::TableSwitch(node) => {
                node.default = map(node.default);
                for target in &mut node.targets {
                    *target = map(*target);
                }
            }
            Insn::LookupSwitch(node) => {
                node.default = map(node.default);
                for (_, target) in &mut node.pairs {
                    *target = map(*target);
                }
            }
            _ => {}
        }
    }
}

impl AbstractInsnNode {
    /// Opcode of a real instruction; labels and line numbers have none.
    pub fn opcode(&self) -> Option<u8> {
        match self {
            AbstractInsnNode::Insn(insn) => Some(insn.opcode()),
            _ => None,
        }
    }

    pub fn as_insn(&self) -> Option<&Insn> {
        match self {
            AbstractInsnNode::Insn(insn) => Some(insn),
            _ => None,
        }
    }

    pub fn as_method_insn(&self) -> Option<&MethodInsnNode> {
        match self {
            AbstractInsnNode::Insn(Insn::Method(node)) => Some(node),
            _ => None,
        }
    }

    pub fn as_ldc(&self) -> Option<&LdcConstant> {
        match self {
            AbstractInsnNode::Insn(Insn::Ldc(node)) => Some(&node.value),
            _ => None,
        }
    }

    fn map_labels(&mut self, map: &impl Fn(LabelNode) -> LabelNode) {
        match self {
            AbstractInsnNode::Label(label) => *label = map(*label),
            AbstractInsnNode::LineNumber(line) => line.start = map(line.start),
            AbstractInsnNode::Insn(insn) => insn.map_labels(map),
        }
    }
}

/// An ordered, editable instruction sequence.
///
/// Every node gets an [`InsnId`] when it enters the list. Edits are expressed
/// relative to those ids, mirroring how tree-based bytecode editors splice
/// fragments around a located node.
#[derive(Debug, Clone, Default)]
pub struct InsnList {
    nodes: Vec<(InsnId, AbstractInsnNode)>,
    next_id: u32,
    next_label: usize,
    modified: bool,
}

impl InsnList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the list of a freshly parsed method; it starts out unmodified.
    pub(crate) fn from_parsed(nodes: Vec<AbstractInsnNode>, next_label: usize) -> Self {
        let mut list = Self {
            next_label,
            ..Self::default()
        };
        for node in nodes {
            let id = list.allocate_id();
            list.nodes.push((id, node));
        }
        list
    }

    pub fn add<T: Into<AbstractInsnNode>>(&mut self, node: T) -> &mut Self {
        let id = self.allocate_id();
        self.nodes.push((id, node.into()));
        self.modified = true;
        self
    }

    /// Allocates a label unique within this list. Place it with `add(label)`.
    pub fn new_label(&mut self) -> LabelNode {
        let label = LabelNode {
            id: self.next_label,
        };
        self.next_label += 1;
        label
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of real instructions, ignoring labels and line numbers.
    pub fn insn_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|(_, node)| matches!(node, AbstractInsnNode::Insn(_)))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InsnId, &AbstractInsnNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &AbstractInsnNode> {
        self.nodes.iter().map(|(_, node)| node)
    }

    pub fn ids(&self) -> Vec<InsnId> {
        self.nodes.iter().map(|(id, _)| *id).collect()
    }

    pub fn first(&self) -> Option<InsnId> {
        self.nodes.first().map(|(id, _)| *id)
    }

    pub fn get(&self, id: InsnId) -> Option<&AbstractInsnNode> {
        self.position(id).map(|index| &self.nodes[index].1)
    }

    pub fn position(&self, id: InsnId) -> Option<usize> {
        self.nodes.iter().position(|(node_id, _)| *node_id == id)
    }

    /// Whether any edit has been made since the list was parsed.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Splices `list` immediately before the node `id`. Returns false when `id`
    /// is not in this list.
    pub fn insert_before(&mut self, id: InsnId, list: InsnList) -> bool {
        match self.position(id) {
            Some(index) => {
                self.splice_at(index, list);
                true
            }
            None => false,
        }
    }

    /// Splices `list` immediately after the node `id`.
    pub fn insert(&mut self, id: InsnId, list: InsnList) -> bool {
        match self.position(id) {
            Some(index) => {
                self.splice_at(index + 1, list);
                true
            }
            None => false,
        }
    }

    /// Splices `list` in front of everything else (a method preamble).
    pub fn insert_at_start(&mut self, list: InsnList) {
        self.splice_at(0, list);
    }

    pub fn remove(&mut self, id: InsnId) -> Option<AbstractInsnNode> {
        let index = self.position(id)?;
        self.modified = true;
        Some(self.nodes.remove(index).1)
    }

    /// Replaces the node `id` by `list`.
    pub fn replace(&mut self, id: InsnId, list: InsnList) -> bool {
        if !self.insert(id, list) {
            return false;
        }
        self.remove(id).is_some()
    }

    /// Discards the whole body and takes `list` as the new one.
    pub fn replace_all(&mut self, list: InsnList) {
        self.nodes.clear();
        self.splice_at(0, list);
    }

    pub(crate) fn next_label_id(&self) -> usize {
        self.next_label
    }

    fn allocate_id(&mut self) -> InsnId {
        let id = InsnId(self.next_id);
        self.next_id += 1;
        id
    }

    fn splice_at(&mut self, index: usize, list: InsnList) {
        let mut mapping = HashMap::new();
        for node in list.nodes() {
            if let AbstractInsnNode::Label(label) = node {
                mapping.entry(*label).or_insert_with(|| {
                    let fresh = LabelNode {
                        id: self.next_label,
                    };
                    self.next_label += 1;
                    fresh
                });
            }
        }
        let remap = |label: LabelNode| mapping.get(&label).copied().unwrap_or(label);

        let mut incoming = Vec::with_capacity(list.nodes.len());
        for (_, mut node) in list.nodes {
            node.map_labels(&remap);
            incoming.push((self.allocate_id(), node));
        }
        self.nodes.splice(index..index, incoming);
        self.modified = true;
    }
}

impl From<Insn> for AbstractInsnNode {
    fn from(value: Insn) -> Self {
        AbstractInsnNode::Insn(value)
    }
}

impl From<LabelNode> for AbstractInsnNode {
    fn from(value: LabelNode) -> Self {
        AbstractInsnNode::Label(value)
    }
}

impl From<LineNumberInsnNode> for AbstractInsnNode {
    fn from(value: LineNumberInsnNode) -> Self {
        AbstractInsnNode::LineNumber(value)
    }
}

macro_rules! insn_conversions {
    ($($node:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$node> for Insn {
                fn from(value: $node) -> Self {
                    Insn::$variant(value)
                }
            }

            impl From<$node> for AbstractInsnNode {
                fn from(value: $node) -> Self {
                    AbstractInsnNode::Insn(Insn::$variant(value))
                }
            }
        )*
    };
}

insn_conversions! {
    InsnNode => Simple,
    IntInsnNode => Int,
    VarInsnNode => Var,
    TypeInsnNode => Type,
    FieldInsnNode => Field,
    MethodInsnNode => Method,
    InvokeDynamicInsnNode => InvokeDynamic,
    JumpInsnNode => Jump,
    LdcInsnNode => Ldc,
    IincInsnNode => Iinc,
    TableSwitchInsnNode => TableSwitch,
    LookupSwitchInsnNode => LookupSwitch,
    MultiANewArrayInsnNode => MultiANewArray,
}

impl From<u8> for InsnNode {
    fn from(opcode: u8) -> Self {
        InsnNode { opcode }
    }
}

impl InsnNode {
    pub fn new(opcode: u8) -> Self {
        Self { opcode }
    }
}

impl IntInsnNode {
    pub fn new(opcode: u8, operand: i32) -> Self {
        Self {
            insn: opcode.into(),
            operand,
        }
    }
}

impl VarInsnNode {
    pub fn new(opcode: u8, var_index: u16) -> Self {
        Self {
            insn: opcode.into(),
            var_index,
        }
    }
}

impl TypeInsnNode {
    pub fn new(opcode: u8, type_name: &str) -> Self {
        Self {
            insn: opcode.into(),
            type_name: type_name.to_string(),
        }
    }
}

impl FieldInsnNode {
    pub fn new(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            insn: opcode.into(),
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

impl MethodInsnNode {
    pub fn new(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            insn: opcode.into(),
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_interface: opcode == opcodes::INVOKEINTERFACE,
        }
    }
}

impl JumpInsnNode {
    pub fn new(opcode: u8, target: LabelNode) -> Self {
        Self {
            insn: opcode.into(),
            target,
        }
    }
}

impl LdcInsnNode {
    pub fn new<T: Into<LdcConstant>>(value: T) -> Self {
        let value = value.into();
        let opcode = if value.is_wide() {
            opcodes::LDC2_W
        } else {
            opcodes::LDC
        };
        Self {
            insn: opcode.into(),
            value,
        }
    }
}

impl IincInsnNode {
    pub fn new(var_index: u16, increment: i16) -> Self {
        Self {
            insn: opcodes::IINC.into(),
            var_index,
            increment,
        }
    }
}

impl fmt::Display for LabelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.id)
    }
}

impl fmt::Display for LdcConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdcConstant::Integer(value) => write!(f, "{value}"),
            LdcConstant::Float(value) => write!(f, "{value}F"),
            LdcConstant::Long(value) => write!(f, "{value}L"),
            LdcConstant::Double(value) => write!(f, "{value}D"),
            LdcConstant::String(value) => write!(f, "{value:?}"),
            LdcConstant::Class(name) => write!(f, "L{name};.class"),
            LdcConstant::MethodType(descriptor) => write!(f, "{descriptor}"),
            LdcConstant::MethodHandle(index) | LdcConstant::RawString(index) => write!(f, "#{index}"),
            LdcConstant::Dynamic { index, descriptor } => write!(f, "#{index} : {descriptor}"),
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = opcodes::mnemonic(self.opcode());
        match self {
            Insn::Simple(_) => write!(f, "{name}"),
            Insn::Int(node) => write!(f, "{name} {}", node.operand),
            Insn::Var(node) => write!(f, "{name} {}", node.var_index),
            Insn::Type(node) => write!(f, "{name} {}", node.type_name),
            Insn::Field(node) => {
                write!(f, "{name} {}.{} : {}", node.owner, node.name, node.descriptor)
            }
            Insn::Method(node) => {
                write!(f, "{name} {}.{} {}", node.owner, node.name, node.descriptor)
            }
            Insn::InvokeDynamic(node) => write!(f, "{name} {} {}", node.name, node.descriptor),
            Insn::Jump(node) => write!(f, "{name} {}", node.target),
            Insn::Ldc(node) => write!(f, "{name} {}", node.value),
            Insn::Iinc(node) => write!(f, "{name} {} {}", node.var_index, node.increment),
            Insn::TableSwitch(node) => {
                write!(f, "{name} {}..{} default: {}", node.low, node.high, node.default)
            }
            Insn::LookupSwitch(node) => {
                write!(f, "{name} {} keys default: {}", node.pairs.len(), node.default)
            }
            Insn::MultiANewArray(node) => write!(f, "{name} {} {}", node.type_name, node.dimensions),
        }
    }
}

impl fmt::Display for AbstractInsnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractInsnNode::Label(label) => write!(f, "{label}"),
            AbstractInsnNode::LineNumber(line) => write!(f, "LINENUMBER {} {}", line.line, line.start),
            AbstractInsnNode::Insn(insn) => write!(f, "{insn}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_survive_edits() {
        let mut list = InsnList::new();
        list.add(InsnNode::new(opcodes::NOP));
        list.add(VarInsnNode::new(opcodes::ALOAD, 0));
        list.add(InsnNode::new(opcodes::RETURN));
        let ids = list.ids();

        let mut fragment = InsnList::new();
        fragment.add(InsnNode::new(opcodes::ACONST_NULL));
        fragment.add(InsnNode::new(opcodes::POP));
        assert!(list.insert_before(ids[1], fragment));

        assert_eq!(list.len(), 5);
        assert_eq!(list.position(ids[1]), Some(3));
        assert_eq!(list.get(ids[2]).and_then(|node| node.opcode()), Some(opcodes::RETURN));

        assert!(list.remove(ids[0]).is_some());
        assert!(list.get(ids[0]).is_none());
        assert!(!list.insert(ids[0], InsnList::new()));
    }

    #[test]
    fn test_spliced_labels_are_renumbered() {
        let mut method = InsnList::new();
        let exit = method.new_label();
        method.add(JumpInsnNode::new(opcodes::GOTO, exit));
        method.add(exit);
        method.add(InsnNode::new(opcodes::RETURN));

        let mut fragment = InsnList::new();
        let skip = fragment.new_label();
        assert_eq!(skip, exit, "both lists start numbering at zero");
        fragment.add(JumpInsnNode::new(opcodes::GOTO, skip));
        fragment.add(skip);
        method.insert_at_start(fragment);

        let labels: Vec<LabelNode> = method
            .nodes()
            .filter_map(|node| match node {
                AbstractInsnNode::Label(label) => Some(*label),
                _ => None,
            })
            .collect();
        assert_eq!(labels.len(), 2);
        assert_ne!(labels[0], labels[1]);

        let jump_targets: Vec<LabelNode> = method
            .nodes()
            .filter_map(|node| node.as_insn())
            .flat_map(|insn| insn.targets())
            .collect();
        assert_eq!(jump_targets, labels);
    }

    #[test]
    fn test_parsed_list_is_unmodified_until_edited() {
        let mut list = InsnList::from_parsed(
            vec![AbstractInsnNode::Insn(Insn::Simple(InsnNode::new(opcodes::RETURN)))],
            0,
        );
        assert!(!list.is_modified());
        let first = list.first().expect("one node");
        list.insert_before(first, InsnList::new());
        assert!(list.is_modified());
    }

    #[test]
    fn test_display_matches_textual_form() {
        let node: AbstractInsnNode = MethodInsnNode::new(
            opcodes::INVOKEVIRTUAL,
            "net/minecraft/client/model/ModelBase",
            "render",
            "(Lnet/minecraft/entity/Entity;FFFFFF)V",
        )
        .into();
        assert_eq!(
            node.to_string(),
            "INVOKEVIRTUAL net/minecraft/client/model/ModelBase.render (Lnet/minecraft/entity/Entity;FFFFFF)V"
        );
        let ldc: AbstractInsnNode = LdcInsnNode::new(-8372020).into();
        assert_eq!(ldc.to_string(), "LDC -8372020");
    }
}

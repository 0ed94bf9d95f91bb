use crate::class_reader::CpInfo;
use crate::constants::{ACC_ABSTRACT, ACC_NATIVE};
use crate::insn::{InsnList, LabelNode};

/// An attribute kept as undecoded bytes and written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

/// A parsed class file.
///
/// Only method bodies are decoded into an editable form. Fields, class-level
/// attributes and non-code method attributes travel through as raw bytes, and
/// the constant pool is kept so a rewrite can only append to it.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    pub constant_pool: Vec<CpInfo>,
    pub this_class: u16,
    pub super_class: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub interface_indices: Vec<u16>,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<MethodDefinition>,
    pub attributes: Vec<RawAttribute>,
}

impl ClassDefinition {
    pub fn is_interface(&self) -> bool {
        self.access_flags & crate::constants::ACC_INTERFACE != 0
    }

    /// Whether any method body has been edited since the class was read.
    pub fn is_modified(&self) -> bool {
        self.methods.iter().any(MethodDefinition::is_modified)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodDefinition> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<RawAttribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryCatchBlockNode {
    pub start: LabelNode,
    pub end: LabelNode,
    pub handler: LabelNode,
    /// `None` catches everything (`finally`).
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalVariableKind {
    /// An entry of `LocalVariableTable`; `descriptor_index` names a descriptor.
    Descriptor,
    /// An entry of `LocalVariableTypeTable`; `descriptor_index` names a signature.
    Signature,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariableNode {
    pub kind: LocalVariableKind,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
    pub start: LabelNode,
    pub end: LabelNode,
}

#[derive(Debug, Clone)]
pub struct MethodDefinition {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlockNode>,
    pub local_variables: Vec<LocalVariableNode>,
    pub max_stack: u16,
    pub max_locals: u16,
    /// Non-code attributes (`Exceptions`, `Signature`, annotations, ...).
    pub attributes: Vec<RawAttribute>,
    pub(crate) name_index: Option<u16>,
    pub(crate) descriptor_index: Option<u16>,
    pub(crate) has_code: bool,
    /// The `Code` attribute as read, reused when the body is left alone.
    pub(crate) original_code: Option<RawAttribute>,
    /// Code sub-attributes that cannot survive a re-encoding.
    pub(crate) dropped_code_attributes: Vec<String>,
    touched: bool,
}

impl MethodDefinition {
    /// A new method with an empty body (or none, when abstract or native).
    pub fn new(access_flags: u16, name: &str, descriptor: &str) -> Self {
        Self {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            instructions: InsnList::new(),
            try_catch_blocks: Vec::new(),
            local_variables: Vec::new(),
            max_stack: 0,
            max_locals: 0,
            attributes: Vec::new(),
            name_index: None,
            descriptor_index: None,
            has_code: access_flags & (ACC_ABSTRACT | ACC_NATIVE) == 0,
            original_code: None,
            dropped_code_attributes: Vec::new(),
            touched: true,
        }
    }

    pub fn has_code(&self) -> bool {
        self.has_code
    }

    /// Forces the body to be re-encoded even though no instruction changed,
    /// e.g. after editing the exception table directly.
    pub fn touch(&mut self) {
        self.touched = true;
    }

    pub fn is_modified(&self) -> bool {
        self.touched || self.instructions.is_modified()
    }

    pub(crate) fn parsed(
        access_flags: u16,
        name_index: u16,
        descriptor_index: u16,
        name: String,
        descriptor: String,
        attributes: Vec<RawAttribute>,
    ) -> Self {
        Self {
            access_flags,
            name,
            descriptor,
            instructions: InsnList::new(),
            try_catch_blocks: Vec::new(),
            local_variables: Vec::new(),
            max_stack: 0,
            max_locals: 0,
            attributes,
            name_index: Some(name_index),
            descriptor_index: Some(descriptor_index),
            has_code: false,
            original_code: None,
            dropped_code_attributes: Vec::new(),
            touched: false,
        }
    }
}

use crate::class_writer::{self, ConstantPoolBuilder};
use crate::constants::{ACC_SUPER, OBJECT, V1_8};
use crate::error::ClassWriteError;
use crate::hierarchy::SafeTypeResolver;
use crate::insn::{InsnList, LabelNode};
use crate::nodes::{ClassDefinition, FieldDefinition, MethodDefinition, TryCatchBlockNode};

/// Assembles a [`ClassDefinition`] from scratch.
///
/// The result behaves like a freshly read class whose methods are all
/// modified, so `write_class` assembles every body and computes its frames.
pub struct ClassBuilder {
    minor_version: u16,
    major_version: u16,
    access_flags: u16,
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldBuilder>,
    methods: Vec<MethodBuilder>,
    cp: ConstantPoolBuilder,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: &str) -> Self {
        Self {
            minor_version: 0,
            major_version: V1_8,
            access_flags: ACC_SUPER,
            name: name.to_string(),
            super_name: Some(super_name.to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            cp: ConstantPoolBuilder::new(),
        }
    }

    /// A public class extending `java/lang/Object`.
    pub fn object(name: &str) -> Self {
        Self::new(name, OBJECT)
    }

    pub fn version(&mut self, major: u16, minor: u16) -> &mut Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn access_flags(&mut self, flags: u16) -> &mut Self {
        self.access_flags = flags;
        self
    }

    pub fn add_interface(&mut self, name: &str) -> &mut Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn add_field(&mut self, field: FieldBuilder) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn add_method(&mut self, method: MethodBuilder) -> &mut Self {
        self.methods.push(method);
        self
    }

    pub fn build(mut self) -> ClassDefinition {
        let this_class = self.cp.class(&self.name);
        let super_class = match self.super_name.as_deref() {
            Some(name) => self.cp.class(name),
            None => 0,
        };

        let mut interface_indices = Vec::with_capacity(self.interfaces.len());
        for name in &self.interfaces {
            interface_indices.push(self.cp.class(name));
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            fields.push(FieldDefinition {
                access_flags: field.access_flags,
                name_index: self.cp.utf8(&field.name),
                descriptor_index: self.cp.utf8(&field.descriptor),
                attributes: Vec::new(),
            });
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for builder in self.methods {
            let mut method = MethodDefinition::new(builder.access_flags, &builder.name, &builder.descriptor);
            method.name_index = Some(self.cp.utf8(&builder.name));
            method.descriptor_index = Some(self.cp.utf8(&builder.descriptor));
            method.instructions = builder.insns;
            method.try_catch_blocks = builder.try_catch_blocks;
            methods.push(method);
        }

        ClassDefinition {
            minor_version: self.minor_version,
            major_version: self.major_version,
            access_flags: self.access_flags,
            constant_pool: self.cp.into_pool(),
            this_class,
            super_class,
            name: self.name,
            super_name: self.super_name,
            interfaces: self.interfaces,
            interface_indices,
            fields,
            methods,
            attributes: Vec::new(),
        }
    }

    /// Builds and serializes in one step.
    pub fn to_bytes(self, resolver: &SafeTypeResolver<'_>) -> Result<Vec<u8>, ClassWriteError> {
        class_writer::write_class(&self.build(), resolver)
    }
}

pub struct FieldBuilder {
    access_flags: u16,
    name: String,
    descriptor: String,
}

impl FieldBuilder {
    pub fn new(access_flags: u16, name: &str, descriptor: &str) -> Self {
        Self {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

pub struct MethodBuilder {
    access_flags: u16,
    name: String,
    descriptor: String,
    insns: InsnList,
    try_catch_blocks: Vec<TryCatchBlockNode>,
}

impl MethodBuilder {
    pub fn new(access_flags: u16, name: &str, descriptor: &str) -> Self {
        Self {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            insns: InsnList::new(),
            try_catch_blocks: Vec::new(),
        }
    }

    /// The body, for appending instructions and allocating labels.
    pub fn code(&mut self) -> &mut InsnList {
        &mut self.insns
    }

    pub fn set_code(&mut self, insns: InsnList) -> &mut Self {
        self.insns = insns;
        self
    }

    pub fn add_try_catch(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.try_catch_blocks.push(TryCatchBlockNode {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_reader::read_class;
    use crate::constants::{ACC_PUBLIC, ACC_STATIC};
    use crate::hierarchy::StaticHierarchy;
    use crate::insn::{Insn, InsnNode, JumpInsnNode, MethodInsnNode, VarInsnNode};
    use crate::opcodes;

    fn resolver_bytes(builder: ClassBuilder) -> Vec<u8> {
        let hierarchy = StaticHierarchy::with_platform_types();
        let resolver = SafeTypeResolver::new(&hierarchy);
        builder.to_bytes(&resolver).expect("class should serialize")
    }

    #[test]
    fn test_basic_class_generation() {
        let mut builder = ClassBuilder::object("demo/Counter");
        builder.add_field(FieldBuilder::new(ACC_PUBLIC, "count", "I"));
        let mut method = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "identity", "(I)I");
        method
            .code()
            .add(VarInsnNode::new(opcodes::ILOAD, 0))
            .add(InsnNode::new(opcodes::IRETURN));
        builder.add_method(method);

        let bytes = resolver_bytes(builder);
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        let class = read_class(&bytes).expect("generated class should parse");
        assert_eq!(class.name, "demo/Counter");
        assert_eq!(class.super_name.as_deref(), Some(OBJECT));
        assert_eq!(class.fields.len(), 1);
        let method = class.method("identity", "(I)I").expect("method present");
        assert_eq!(method.max_stack, 1);
        assert_eq!(method.max_locals, 1);
        assert_eq!(method.instructions.insn_count(), 2);
        assert!(!class.is_modified());
    }

    #[test]
    fn test_unmodified_round_trip_is_byte_identical() {
        let mut builder = ClassBuilder::object("demo/Branchy");
        let mut method = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "sign", "(I)I");
        let code = method.code();
        let negative = code.new_label();
        code.add(VarInsnNode::new(opcodes::ILOAD, 0))
            .add(JumpInsnNode::new(opcodes::IFLT, negative))
            .add(InsnNode::new(opcodes::ICONST_1))
            .add(InsnNode::new(opcodes::IRETURN))
            .add(negative)
            .add(InsnNode::new(opcodes::ICONST_M1))
            .add(InsnNode::new(opcodes::IRETURN));
        builder.add_method(method);

        let first = resolver_bytes(builder);
        let class = read_class(&first).expect("parse");
        let hierarchy = StaticHierarchy::with_platform_types();
        let second = class_writer::write_class(&class, &SafeTypeResolver::new(&hierarchy))
            .expect("rewrite");
        assert_eq!(first, second);

        let method = class.method("sign", "(I)I").expect("method present");
        let jump = method
            .instructions
            .nodes()
            .filter_map(|node| node.as_insn())
            .find(|insn| matches!(insn, Insn::Jump(_)));
        assert!(jump.is_some());
    }

    #[test]
    fn test_try_catch_survives_build() {
        let mut builder = ClassBuilder::object("demo/Guarded");
        let mut method = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "run", "()V");
        let code = method.code();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.add(start)
            .add(InsnNode::new(opcodes::NOP))
            .add(end)
            .add(InsnNode::new(opcodes::RETURN))
            .add(handler)
            .add(InsnNode::new(opcodes::POP))
            .add(InsnNode::new(opcodes::RETURN));
        method.add_try_catch(start, end, handler, Some("java/lang/Exception"));
        builder.add_method(method);

        let class = read_class(&resolver_bytes(builder)).expect("parse");
        let method = class.method("run", "()V").expect("method present");
        assert_eq!(method.try_catch_blocks.len(), 1);
        assert_eq!(
            method.try_catch_blocks[0].catch_type.as_deref(),
            Some("java/lang/Exception")
        );
        assert_eq!(method.max_stack, 1);
    }

    #[test]
    fn test_non_ascii_descriptor_is_a_write_error() {
        let mut builder = ClassBuilder::object("demo/Caller");
        let mut method = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "run", "()V");
        method
            .code()
            .add(InsnNode::new(opcodes::ICONST_0))
            .add(MethodInsnNode::new(opcodes::INVOKESTATIC, "p/D", "h", "(\u{e9})V"))
            .add(InsnNode::new(opcodes::RETURN));
        builder.add_method(method);

        let hierarchy = StaticHierarchy::with_platform_types();
        let err = builder
            .to_bytes(&SafeTypeResolver::new(&hierarchy))
            .unwrap_err();
        assert!(matches!(err, ClassWriteError::FrameComputation(_)));
    }
}

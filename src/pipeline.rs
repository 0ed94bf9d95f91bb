use std::borrow::Cow;

use crate::class_reader::read_class;
use crate::class_writer::write_class;
use crate::error::Error;
use crate::hierarchy::{ClassHierarchy, SafeTypeResolver};
use crate::nodes::ClassDefinition;
use crate::registry::Capabilities;
use crate::scan::MethodAction;
use crate::signature::MethodSignature;

/// One edit of one method.
#[derive(Debug, Clone)]
pub struct PatchRule {
    pub signature: MethodSignature,
    pub action: MethodAction,
    /// A class whose presence disables this rule.
    pub unless_present: Option<String>,
}

impl PatchRule {
    pub fn new(signature: MethodSignature, action: MethodAction) -> Self {
        Self {
            signature,
            action,
            unless_present: None,
        }
    }

    /// Skips the rule when `marker` (an internal or dotted class name) exists.
    pub fn unless_present(mut self, marker: &str) -> Self {
        self.unless_present = Some(marker.replace('.', "/"));
        self
    }

    fn disabled_by<'a>(&'a self, capabilities: &Capabilities) -> Option<&'a str> {
        self.unless_present
            .as_deref()
            .filter(|marker| capabilities.is_present(marker))
    }
}

/// Parses `bytes`, runs `rules` in order and reserializes when anything
/// changed. An untouched class comes back as the very same buffer.
pub fn transform<'a>(
    bytes: &'a [u8],
    rules: &[PatchRule],
    capabilities: &Capabilities,
    hierarchy: &dyn ClassHierarchy,
) -> Result<Cow<'a, [u8]>, Error> {
    let mut class = read_class(bytes)?;
    for rule in rules {
        if let Some(marker) = rule.disabled_by(capabilities) {
            log::info!("{marker} detected. Disabling patch for {}", rule.signature);
            continue;
        }
        log::info!("Applying transformation to method ({})", rule.signature);
        apply_rule(&mut class, rule);
    }

    if !class.is_modified() {
        return Ok(Cow::Borrowed(bytes));
    }
    let resolver = SafeTypeResolver::new(hierarchy);
    Ok(Cow::Owned(write_class(&class, &resolver)?))
}

/// Runs one rule against the first method it matches. Returns the action's
/// verdict, or false when no method with a body matches.
pub fn apply_rule(class: &mut ClassDefinition, rule: &PatchRule) -> bool {
    let Some(method) = class
        .methods
        .iter_mut()
        .find(|method| rule.signature.matches_method(method))
    else {
        log::warn!("Failed to locate the method!");
        return false;
    };
    if !method.has_code() {
        log::warn!("{} has no body to patch", rule.signature);
        return false;
    }

    log::debug!("Located method, patching...");
    let result = rule.action.run(method);
    log::info!("Patch result: {result}");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ClassBuilder, MethodBuilder};
    use crate::constants::{ACC_ABSTRACT, ACC_PUBLIC, ACC_STATIC};
    use crate::hierarchy::StaticHierarchy;
    use crate::class_reader::CpInfo;
    use crate::error::ClassReadError;
    use crate::insn::{
        AbstractInsnNode, Insn, InsnId, InsnList, InsnNode, LdcConstant, LdcInsnNode,
        TableSwitchInsnNode, VarInsnNode,
    };
    use crate::nodes::MethodDefinition;
    use crate::opcodes;
    use crate::scan::{combine, opcode_is, whole_method};

    fn class_bytes() -> Vec<u8> {
        let mut builder = ClassBuilder::object("demo/Target");
        let mut tick = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "tick", "(I)I");
        tick.code()
            .add(VarInsnNode::new(opcodes::ILOAD, 0))
            .add(InsnNode::new(opcodes::IRETURN));
        builder.add_method(tick);
        builder.add_method(MethodBuilder::new(ACC_PUBLIC | ACC_ABSTRACT, "shape", "()V"));
        let hierarchy = StaticHierarchy::with_platform_types();
        builder
            .to_bytes(&SafeTypeResolver::new(&hierarchy))
            .expect("fixture class")
    }

    fn negate_before_return() -> MethodAction {
        combine(
            opcode_is(opcodes::IRETURN),
            |method: &mut MethodDefinition, id: InsnId| {
                let mut negate = InsnList::new();
                negate.add(InsnNode::new(opcodes::INEG));
                method.instructions.insert_before(id, negate);
                true
            },
        )
    }

    fn insn_count(bytes: &[u8], name: &str, descriptor: &str) -> usize {
        read_class(bytes)
            .expect("parse")
            .method(name, descriptor)
            .expect("method")
            .instructions
            .insn_count()
    }

    #[test]
    fn test_unmatched_rules_return_input_buffer() {
        let bytes = class_bytes();
        let hierarchy = StaticHierarchy::with_platform_types();
        let rules = vec![
            PatchRule::new(MethodSignature::named("tock", "(I)I"), negate_before_return()),
            PatchRule::new(MethodSignature::named("tick", "(J)I"), negate_before_return()),
        ];
        let out = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("transform");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_ptr(), bytes.as_ptr());
    }

    #[test]
    fn test_rule_applies_and_later_rules_still_run() {
        let bytes = class_bytes();
        let hierarchy = StaticHierarchy::with_platform_types();
        let rules = vec![
            PatchRule::new(MethodSignature::named("missing", "()V"), negate_before_return()),
            PatchRule::new(MethodSignature::named("tick", "(I)I"), negate_before_return()),
        ];
        let out = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("transform");
        assert!(matches!(out, Cow::Owned(_)));
        assert_eq!(insn_count(&out, "tick", "(I)I"), 3);
    }

    #[test]
    fn test_capability_guard_skips_rule() {
        let bytes = class_bytes();
        let hierarchy = StaticHierarchy::with_platform_types();
        let rules = vec![PatchRule::new(MethodSignature::named("tick", "(I)I"), negate_before_return())
            .unless_present("optifine.OptiFineTweaker")];
        let capabilities = Capabilities::detect(["optifine/OptiFineTweaker"], |_| true);
        let out = transform(&bytes, &rules, &capabilities, &hierarchy).expect("transform");
        assert!(matches!(out, Cow::Borrowed(_)));

        let out = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("transform");
        assert_eq!(insn_count(&out, "tick", "(I)I"), 3);
    }

    #[test]
    fn test_methods_without_body_are_skipped() {
        let bytes = class_bytes();
        let hierarchy = StaticHierarchy::with_platform_types();
        let preamble = whole_method(|method: &mut MethodDefinition| {
            let mut nop = InsnList::new();
            nop.add(InsnNode::new(opcodes::NOP));
            method.instructions.insert_at_start(nop);
            true
        });
        let rules = vec![PatchRule::new(MethodSignature::named("shape", "()V"), preamble)];
        let out = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("transform");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_malformed_input_is_fatal() {
        let hierarchy = StaticHierarchy::with_platform_types();
        let rules = vec![PatchRule::new(MethodSignature::named("tick", "(I)I"), negate_before_return())];
        let err = transform(&[0xCA, 0xFE], &rules, &Capabilities::none(), &hierarchy).unwrap_err();
        assert!(matches!(err, Error::ClassRead(_)));
    }

    #[test]
    fn test_output_is_deterministic() {
        let bytes = class_bytes();
        let hierarchy = StaticHierarchy::with_platform_types();
        let rules = vec![PatchRule::new(MethodSignature::named("tick", "(I)I"), negate_before_return())];
        let first = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("first");
        let again = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("again");
        assert_eq!(first, again);
        let class = read_class(&first).expect("parse");
        let ops: Vec<u8> = class
            .method("tick", "(I)I")
            .expect("method")
            .instructions
            .nodes()
            .filter_map(AbstractInsnNode::opcode)
            .collect();
        assert_eq!(ops, vec![opcodes::ILOAD, opcodes::INEG, opcodes::IRETURN]);
    }

    fn find(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
            .expect("byte pattern present")
    }

    fn serialize(builder: ClassBuilder) -> Vec<u8> {
        let hierarchy = StaticHierarchy::with_platform_types();
        builder
            .to_bytes(&SafeTypeResolver::new(&hierarchy))
            .expect("fixture class")
    }

    #[test]
    fn test_huge_tableswitch_range_is_a_read_error() {
        let mut builder = ClassBuilder::object("demo/Router");
        let mut route = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "route", "(I)I");
        let code = route.code();
        let zero = code.new_label();
        code.add(VarInsnNode::new(opcodes::ILOAD, 0))
            .add(TableSwitchInsnNode {
                insn: InsnNode::new(opcodes::TABLESWITCH),
                default: zero,
                low: 0,
                high: 0,
                targets: vec![zero],
            })
            .add(zero)
            .add(InsnNode::new(opcodes::ICONST_0))
            .add(InsnNode::new(opcodes::IRETURN));
        builder.add_method(route);
        let mut bytes = serialize(builder);

        // iload_0; tableswitch; 2 padding bytes; default, low, high, one target.
        let mut switch = vec![opcodes::ILOAD_0, opcodes::TABLESWITCH, 0, 0];
        switch.extend_from_slice(&19i32.to_be_bytes());
        switch.extend_from_slice(&0i32.to_be_bytes());
        switch.extend_from_slice(&0i32.to_be_bytes());
        switch.extend_from_slice(&19i32.to_be_bytes());
        let at = find(&bytes, &switch);
        bytes[at + 8..at + 12].copy_from_slice(&i32::MIN.to_be_bytes());
        bytes[at + 12..at + 16].copy_from_slice(&i32::MAX.to_be_bytes());

        let hierarchy = StaticHierarchy::with_platform_types();
        let rules = vec![PatchRule::new(MethodSignature::named("route", "(I)I"), negate_before_return())];
        let err = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).unwrap_err();
        assert!(matches!(
            err,
            Error::ClassRead(ClassReadError::SwitchTooLarge { .. })
        ));
    }

    /// `tick` loads a string whose constant is an unpaired surrogate.
    fn surrogate_class_bytes() -> Vec<u8> {
        let mut builder = ClassBuilder::object("demo/Target");
        let mut tick = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "tick", "(I)I");
        tick.code()
            .add(LdcInsnNode::new("@@@"))
            .add(InsnNode::new(opcodes::POP))
            .add(VarInsnNode::new(opcodes::ILOAD, 0))
            .add(InsnNode::new(opcodes::IRETURN));
        builder.add_method(tick);
        let mut bytes = serialize(builder);
        let at = find(&bytes, &[1, 0, 3, b'@', b'@', b'@']);
        bytes[at + 3..at + 6].copy_from_slice(&[0xED, 0xA0, 0x80]);
        bytes
    }

    #[test]
    fn test_unpaired_surrogate_constant_round_trips() {
        let bytes = surrogate_class_bytes();
        let hierarchy = StaticHierarchy::with_platform_types();

        let class = read_class(&bytes).expect("class with unpaired surrogate parses");
        let rewritten = write_class(&class, &SafeTypeResolver::new(&hierarchy)).expect("rewrite");
        assert_eq!(rewritten, bytes);

        let rules = vec![PatchRule::new(MethodSignature::named("tock", "(I)I"), negate_before_return())];
        let out = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("transform");
        assert_eq!(out.as_ref(), bytes.as_slice());
    }

    #[test]
    fn test_unpaired_surrogate_constant_survives_re_encoding() {
        let bytes = surrogate_class_bytes();
        let hierarchy = StaticHierarchy::with_platform_types();
        let rules = vec![PatchRule::new(MethodSignature::named("tick", "(I)I"), negate_before_return())];
        let out = transform(&bytes, &rules, &Capabilities::none(), &hierarchy).expect("transform");
        assert!(matches!(out, Cow::Owned(_)));
        find(&out, &[1, 0, 3, 0xED, 0xA0, 0x80]);

        let class = read_class(&out).expect("parse");
        let method = class.method("tick", "(I)I").expect("method");
        let ldc = method
            .instructions
            .nodes()
            .find_map(AbstractInsnNode::as_ldc)
            .expect("ldc kept");
        let LdcConstant::RawString(index) = ldc else {
            panic!("expected a raw string constant, got {ldc}");
        };
        let Some(CpInfo::String { string_index }) = class.constant_pool.get(*index as usize) else {
            panic!("ldc should point at a string constant");
        };
        assert!(matches!(
            class.constant_pool.get(*string_index as usize),
            Some(CpInfo::Utf8Unpaired { raw, .. }) if raw.as_slice() == [0xEDu8, 0xA0, 0x80]
        ));
        let ops: Vec<u8> = method
            .instructions
            .nodes()
            .filter_map(AbstractInsnNode::as_insn)
            .map(Insn::opcode)
            .collect();
        assert_eq!(
            ops,
            vec![opcodes::LDC, opcodes::POP, opcodes::ILOAD, opcodes::INEG, opcodes::IRETURN]
        );
    }
}

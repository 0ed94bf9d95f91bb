//! Locating instructions inside a method and editing around them.
//!
//! Every edit is a [`MethodAction`]: either a filter/action pair driven by
//! [`scan`], or an action that runs once against the whole method.

use std::fmt;
use std::sync::Arc;

use crate::insn::{AbstractInsnNode, InsnId, LdcConstant};
use crate::nodes::MethodDefinition;
use crate::signature::MethodSignature;

/// Decides whether a node is a patch site.
pub trait InsnFilter {
    fn test(&self, node: &AbstractInsnNode) -> bool;
}

impl<F> InsnFilter for F
where
    F: Fn(&AbstractInsnNode) -> bool,
{
    fn test(&self, node: &AbstractInsnNode) -> bool {
        self(node)
    }
}

/// Edits a method around the located node `id`.
///
/// Returning `true` ends the scan after this site; `false` keeps looking for
/// further sites.
pub trait InsnAction {
    fn apply(&self, method: &mut MethodDefinition, id: InsnId) -> bool;
}

impl<F> InsnAction for F
where
    F: Fn(&mut MethodDefinition, InsnId) -> bool,
{
    fn apply(&self, method: &mut MethodDefinition, id: InsnId) -> bool {
        self(method, id)
    }
}

/// Edits a method without looking for a site first. Returns whether it
/// changed anything.
pub trait WholeMethodAction {
    fn apply(&self, method: &mut MethodDefinition) -> bool;
}

impl<F> WholeMethodAction for F
where
    F: Fn(&mut MethodDefinition) -> bool,
{
    fn apply(&self, method: &mut MethodDefinition) -> bool {
        self(method)
    }
}

#[derive(Clone)]
pub enum MethodAction {
    Scan {
        filter: Arc<dyn InsnFilter + Send + Sync>,
        action: Arc<dyn InsnAction + Send + Sync>,
    },
    WholeMethod(Arc<dyn WholeMethodAction + Send + Sync>),
}

impl MethodAction {
    /// Runs the action against `method`, returning whether it was patched.
    pub fn run(&self, method: &mut MethodDefinition) -> bool {
        match self {
            MethodAction::Scan { filter, action } => scan(method, filter.as_ref(), action.as_ref()),
            MethodAction::WholeMethod(action) => action.apply(method),
        }
    }
}

impl fmt::Debug for MethodAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodAction::Scan { .. } => f.write_str("MethodAction::Scan"),
            MethodAction::WholeMethod(_) => f.write_str("MethodAction::WholeMethod"),
        }
    }
}

/// Pairs a filter with the action to run at each site it selects.
pub fn combine<F, A>(filter: F, action: A) -> MethodAction
where
    F: InsnFilter + Send + Sync + 'static,
    A: InsnAction + Send + Sync + 'static,
{
    MethodAction::Scan {
        filter: Arc::new(filter),
        action: Arc::new(action),
    }
}

pub fn whole_method<A>(action: A) -> MethodAction
where
    A: WholeMethodAction + Send + Sync + 'static,
{
    MethodAction::WholeMethod(Arc::new(action))
}

/// Walks the instructions of `method` once, in their original order.
///
/// The walk covers the nodes present when it starts: nodes an action removes
/// are skipped, nodes an action inserts are never visited. Returns whether
/// the filter selected at least one node.
pub fn scan<F, A>(method: &mut MethodDefinition, filter: &F, action: &A) -> bool
where
    F: InsnFilter + ?Sized,
    A: InsnAction + ?Sized,
{
    let mut found = false;
    for id in method.instructions.ids() {
        let Some(node) = method.instructions.get(id) else {
            continue;
        };
        if !filter.test(node) {
            continue;
        }
        log::info!("Located patch target node {node}");
        found = true;
        if action.apply(method, id) {
            break;
        }
    }
    found
}

/// Selects every instruction with the given opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeIs(pub u8);

pub fn opcode_is(opcode: u8) -> OpcodeIs {
    OpcodeIs(opcode)
}

impl InsnFilter for OpcodeIs {
    fn test(&self, node: &AbstractInsnNode) -> bool {
        node.opcode() == Some(self.0)
    }
}

/// Selects call sites of one method, invoked with one opcode.
#[derive(Debug, Clone)]
pub struct Invokes {
    opcode: u8,
    target: MethodSignature,
}

pub fn invokes(opcode: u8, target: MethodSignature) -> Invokes {
    Invokes { opcode, target }
}

impl InsnFilter for Invokes {
    fn test(&self, node: &AbstractInsnNode) -> bool {
        node.as_method_insn().is_some_and(|call| {
            call.insn.opcode == self.opcode && self.target.matches_insn(call)
        })
    }
}

/// Selects `ldc` instructions loading one `int` constant.
#[derive(Debug, Clone, Copy)]
pub struct LdcInt(pub i32);

pub fn ldc_int(value: i32) -> LdcInt {
    LdcInt(value)
}

impl InsnFilter for LdcInt {
    fn test(&self, node: &AbstractInsnNode) -> bool {
        matches!(node.as_ldc(), Some(LdcConstant::Integer(value)) if *value == self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::{InsnList, InsnNode, LdcInsnNode, MethodInsnNode};
    use crate::opcodes;

    /// `[NOP, ICONST_1, NOP, ICONST_1, RETURN]` where `ICONST_1` is the site.
    fn method() -> MethodDefinition {
        let mut method = MethodDefinition::new(0, "run", "()V");
        method
            .instructions
            .add(InsnNode::new(opcodes::NOP))
            .add(InsnNode::new(opcodes::ICONST_1))
            .add(InsnNode::new(opcodes::NOP))
            .add(InsnNode::new(opcodes::ICONST_1))
            .add(InsnNode::new(opcodes::RETURN));
        method
    }

    fn opcodes_of(method: &MethodDefinition) -> Vec<u8> {
        method.instructions.nodes().filter_map(AbstractInsnNode::opcode).collect()
    }

    fn mark_after(single_shot: bool) -> impl Fn(&mut MethodDefinition, InsnId) -> bool {
        move |method: &mut MethodDefinition, id: InsnId| {
            let mut marker = InsnList::new();
            marker.add(InsnNode::new(opcodes::POP));
            method.instructions.insert(id, marker);
            single_shot
        }
    }

    #[test]
    fn test_single_shot_patches_first_site_only() {
        let mut method = method();
        assert!(scan(&mut method, &opcode_is(opcodes::ICONST_1), &mark_after(true)));
        assert_eq!(
            opcodes_of(&method),
            vec![
                opcodes::NOP,
                opcodes::ICONST_1,
                opcodes::POP,
                opcodes::NOP,
                opcodes::ICONST_1,
                opcodes::RETURN
            ]
        );
    }

    #[test]
    fn test_multi_shot_patches_every_site() {
        let mut method = method();
        assert!(scan(&mut method, &opcode_is(opcodes::ICONST_1), &mark_after(false)));
        assert_eq!(
            opcodes_of(&method)
                .iter()
                .filter(|opcode| **opcode == opcodes::POP)
                .count(),
            2
        );
    }

    #[test]
    fn test_no_site_leaves_method_untouched() {
        let mut method = MethodDefinition::new(0, "run", "()V");
        method.instructions.add(InsnNode::new(opcodes::RETURN));
        let before = opcodes_of(&method);
        assert!(!scan(&mut method, &opcode_is(opcodes::ICONST_1), &mark_after(false)));
        assert_eq!(opcodes_of(&method), before);
    }

    #[test]
    fn test_inserted_nodes_are_not_visited() {
        let mut method = method();
        let grow = |method: &mut MethodDefinition, id: InsnId| {
            let mut copy = InsnList::new();
            copy.add(InsnNode::new(opcodes::ICONST_1));
            method.instructions.insert(id, copy);
            false
        };
        scan(&mut method, &opcode_is(opcodes::ICONST_1), &grow);
        let count = opcodes_of(&method)
            .iter()
            .filter(|opcode| **opcode == opcodes::ICONST_1)
            .count();
        assert_eq!(count, 4);
    }

    #[test]
    fn test_removed_nodes_are_skipped() {
        let mut method = method();
        let visited = std::cell::Cell::new(0);
        let remove_next = |method: &mut MethodDefinition, id: InsnId| {
            visited.set(visited.get() + 1);
            let ids = method.instructions.ids();
            let position = ids.iter().position(|other| *other == id).unwrap_or(0);
            // Drops the nodes between the first site and the final return.
            for later in &ids[position + 1..ids.len() - 1] {
                method.instructions.remove(*later);
            }
            false
        };
        scan(&mut method, &opcode_is(opcodes::ICONST_1), &remove_next);
        assert_eq!(visited.get(), 1);
    }

    #[test]
    fn test_filter_helpers() {
        let call = AbstractInsnNode::from(MethodInsnNode::new(
            opcodes::INVOKEVIRTUAL,
            "game/Container",
            "mergeItemStack",
            "(Lgame/ItemStack;IIZ)Z",
        ));
        let merge = MethodSignature::named("mergeItemStack", "(Lgame/ItemStack;IIZ)Z");
        assert!(invokes(opcodes::INVOKEVIRTUAL, merge.clone()).test(&call));
        assert!(!invokes(opcodes::INVOKESTATIC, merge).test(&call));

        let ldc = AbstractInsnNode::from(LdcInsnNode::new(-8372020));
        assert!(ldc_int(-8372020).test(&ldc));
        assert!(!ldc_int(7).test(&ldc));
        assert!(!ldc_int(7).test(&call));
    }

    #[test]
    fn test_method_action_dispatch() {
        let mut method = method();
        let action = whole_method(|method: &mut MethodDefinition| {
            let mut preamble = InsnList::new();
            preamble.add(InsnNode::new(opcodes::NOP));
            method.instructions.insert_at_start(preamble);
            true
        });
        assert!(action.run(&mut method));
        assert_eq!(method.instructions.insn_count(), 6);
        assert_eq!(format!("{action:?}"), "MethodAction::WholeMethod");
    }
}

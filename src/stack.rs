//! Operand stack shuffles for edits that have no spare local slot.
//!
//! Every primitive works on category-1 values (`int`, `float`, references).
//! Stacks are written bottom to top, so `[Z, A, B]` has `B` on top.

use thiserror::Error;

use crate::insn::{AbstractInsnNode, InsnList, InsnNode};
use crate::opcodes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shuffle {
    /// `[a, b] -> [b, a]`
    Swap,
    /// `[a, b] -> [b, a]`, encoded as `dup_x1; pop`.
    RotateUnder1,
    /// `[a, b, c] -> [c, a, b]`
    RotateUnder2,
    /// `[a, b] -> [b, a, b]`
    DupUnder1,
    /// `[a, b] -> [a, b, a, b]`
    DupPair,
    /// `[a, b, c, d] -> [c, d, a, b, c, d]`
    DupPairUnder2,
    /// `[a, b, c, d] -> [c, d, a, b]`
    SwapPairs,
    Drop,
    DropPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{shuffle:?} needs {needed} stack values, found {found}")]
pub struct StackUnderflow {
    pub shuffle: Shuffle,
    pub needed: usize,
    pub found: usize,
}

impl Shuffle {
    /// The instructions performing this shuffle.
    pub fn opcodes(self) -> &'static [u8] {
        match self {
            Shuffle::Swap => &[opcodes::SWAP],
            Shuffle::RotateUnder1 => &[opcodes::DUP_X1, opcodes::POP],
            Shuffle::RotateUnder2 => &[opcodes::DUP_X2, opcodes::POP],
            Shuffle::DupUnder1 => &[opcodes::DUP_X1],
            Shuffle::DupPair => &[opcodes::DUP2],
            Shuffle::DupPairUnder2 => &[opcodes::DUP2_X2],
            Shuffle::SwapPairs => &[opcodes::DUP2_X2, opcodes::POP2],
            Shuffle::Drop => &[opcodes::POP],
            Shuffle::DropPair => &[opcodes::POP2],
        }
    }

    pub fn emit(self, list: &mut InsnList) {
        for opcode in self.opcodes() {
            list.add(InsnNode::new(*opcode));
        }
    }

    /// How many values the shuffle reads, and where each output comes from
    /// (indices into those values, bottom first).
    fn layout(self) -> (usize, &'static [usize]) {
        match self {
            Shuffle::Swap | Shuffle::RotateUnder1 => (2, &[1, 0]),
            Shuffle::RotateUnder2 => (3, &[2, 0, 1]),
            Shuffle::DupUnder1 => (2, &[1, 0, 1]),
            Shuffle::DupPair => (2, &[0, 1, 0, 1]),
            Shuffle::DupPairUnder2 => (4, &[2, 3, 0, 1, 2, 3]),
            Shuffle::SwapPairs => (4, &[2, 3, 0, 1]),
            Shuffle::Drop => (1, &[]),
            Shuffle::DropPair => (2, &[]),
        }
    }

    /// Applies the shuffle to a modelled stack (top is the last element).
    pub fn apply<T: Clone>(self, stack: &mut Vec<T>) -> Result<(), StackUnderflow> {
        let (needed, outputs) = self.layout();
        if stack.len() < needed {
            return Err(StackUnderflow {
                shuffle: self,
                needed,
                found: stack.len(),
            });
        }
        let top = stack.split_off(stack.len() - needed);
        stack.extend(outputs.iter().map(|index| top[*index].clone()));
        Ok(())
    }
}

/// One step of a recipe: a shuffle, or a call consuming the two top values
/// and pushing one result.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<C> {
    Shuffle(Shuffle),
    Call(C),
}

/// `[Z, A, B] -> [R1, R2, Z]` with `R1 = f(A, B)` and `R2 = g(R1, B)`.
pub fn chain_beneath<C>(f: C, g: C) -> Vec<Step<C>> {
    vec![
        Step::Shuffle(Shuffle::DupPair),
        Step::Call(f),
        Step::Shuffle(Shuffle::DupUnder1),
        Step::Shuffle(Shuffle::Swap),
        Step::Call(g),
        Step::Shuffle(Shuffle::DupPairUnder2),
        Step::Shuffle(Shuffle::DropPair),
        Step::Shuffle(Shuffle::Drop),
    ]
}

/// `[A, B, Z] -> [f(A, B), g(A, B), Z]`.
///
/// This is the shape of a slot-range call such as
/// `mergeItemStack(stack, start, end, reverse)` when the two bounds are both
/// rewritten from the original pair.
pub fn pair_beneath_top<C>(f: C, g: C) -> Vec<Step<C>> {
    vec![
        Step::Shuffle(Shuffle::RotateUnder2),
        Step::Shuffle(Shuffle::DupPair),
        Step::Call(f),
        Step::Shuffle(Shuffle::RotateUnder2),
        Step::Call(g),
        Step::Shuffle(Shuffle::RotateUnder2),
        Step::Shuffle(Shuffle::RotateUnder2),
    ]
}

/// Lowers a recipe to instructions.
pub fn assemble<C: Into<AbstractInsnNode>>(steps: Vec<Step<C>>) -> InsnList {
    let mut list = InsnList::new();
    for step in steps {
        match step {
            Step::Shuffle(shuffle) => shuffle.emit(&mut list),
            Step::Call(call) => {
                list.add(call);
            }
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::MethodInsnNode;

    const Z: i64 = 999;

    fn run(steps: Vec<Step<fn(i64, i64) -> i64>>, mut stack: Vec<i64>) -> Vec<i64> {
        for step in steps {
            match step {
                Step::Shuffle(shuffle) => shuffle.apply(&mut stack).expect("stack deep enough"),
                Step::Call(call) => {
                    let b = stack.pop().expect("second operand");
                    let a = stack.pop().expect("first operand");
                    stack.push(call(a, b));
                }
            }
        }
        stack
    }

    #[test]
    fn test_primitives() {
        let mut stack = vec![1, 2, 3];
        Shuffle::RotateUnder2.apply(&mut stack).unwrap();
        assert_eq!(stack, vec![3, 1, 2]);

        let mut stack = vec![1, 2, 3, 4];
        Shuffle::DupPairUnder2.apply(&mut stack).unwrap();
        assert_eq!(stack, vec![3, 4, 1, 2, 3, 4]);

        let mut stack = vec![1, 2, 3, 4];
        Shuffle::SwapPairs.apply(&mut stack).unwrap();
        assert_eq!(stack, vec![3, 4, 1, 2]);

        let mut stack = vec![1, 2];
        Shuffle::RotateUnder1.apply(&mut stack).unwrap();
        assert_eq!(stack, vec![2, 1]);
    }

    #[test]
    fn test_underflow_leaves_stack_alone() {
        let mut stack = vec![1];
        let err = Shuffle::DupPair.apply(&mut stack).unwrap_err();
        assert_eq!(err.needed, 2);
        assert_eq!(err.found, 1);
        assert_eq!(stack, vec![1]);
    }

    #[test]
    fn test_chain_beneath() {
        let add: fn(i64, i64) -> i64 = |a, b| a + b;
        let mul: fn(i64, i64) -> i64 = |a, b| a * b;
        assert_eq!(run(chain_beneath(add, mul), vec![Z, 3, 5]), vec![8, 40, Z]);
    }

    #[test]
    fn test_pair_beneath_top() {
        let add: fn(i64, i64) -> i64 = |a, b| a + b;
        let mul: fn(i64, i64) -> i64 = |a, b| a * b;
        assert_eq!(run(pair_beneath_top(add, mul), vec![3, 5, Z]), vec![8, 15, Z]);
    }

    #[test]
    fn test_recipe_keeps_values_below_region() {
        let add: fn(i64, i64) -> i64 = |a, b| a + b;
        let sub: fn(i64, i64) -> i64 = |a, b| a - b;
        assert_eq!(
            run(pair_beneath_top(add, sub), vec![7, 3, 5, Z]),
            vec![7, 8, -2, Z]
        );
    }

    #[test]
    fn test_assemble_lowers_to_shuffle_opcodes() {
        let hook = |name: &str| MethodInsnNode::new(opcodes::INVOKESTATIC, "game/Hooks", name, "(II)I");
        let list = assemble(pair_beneath_top(hook("low"), hook("high")));
        let ops: Vec<u8> = list.nodes().filter_map(AbstractInsnNode::opcode).collect();
        assert_eq!(
            ops,
            vec![
                opcodes::DUP_X2,
                opcodes::POP,
                opcodes::DUP2,
                opcodes::INVOKESTATIC,
                opcodes::DUP_X2,
                opcodes::POP,
                opcodes::INVOKESTATIC,
                opcodes::DUP_X2,
                opcodes::POP,
                opcodes::DUP_X2,
                opcodes::POP,
            ]
        );
    }
}

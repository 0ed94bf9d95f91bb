/// Builds an `InsnList` fragment from a compact, bracketed syntax.
///
/// Labels are declared up front with `let name;` and can then be placed with
/// `[label name]` and targeted by jumps. They belong to the fragment, so they
/// are renumbered when the fragment is spliced into a method.
///
/// # Syntax
///
/// * `[OPCODE]`: no operands, e.g. `[RETURN]`
/// * `[int OPCODE value]`: `BIPUSH`, `SIPUSH`, `NEWARRAY`
/// * `[var OPCODE index]`: loads and stores
/// * `[type OPCODE "name"]`: `NEW`, `CHECKCAST`, ...
/// * `[field OPCODE "owner", "name", "descriptor"]`
/// * `[method OPCODE "owner", "name", "descriptor"]`
/// * `[call hook]`: `invokestatic` of a `HookSymbol`
/// * `[ldc value]`: an `i32`, `f32`, `i64`, `f64` or `&str` constant
/// * `[jump OPCODE label]`
/// * `[label label]`
/// * `[iinc index, increment]`
///
/// # Example
///
/// ```rust
/// use classpatch::hooks::HookSymbol;
/// use classpatch::insn::{AbstractInsnNode, Insn};
/// use classpatch::{insn_list, opcodes};
///
/// const ASLEEP: HookSymbol = HookSymbol::new("game/Hooks", "isEveryoneAsleep", "(Lgame/World;)I");
///
/// let list = insn_list! {
///     let proceed;
///     [var ALOAD 0]
///     [call ASLEEP]
///     [DUP]
///     [jump IFEQ proceed]
///     [ICONST_1]
///     [ISUB]
///     [IRETURN]
///     [label proceed]
///     [POP]
/// };
///
/// assert_eq!(list.len(), 9);
/// assert_eq!(list.insn_count(), 8);
///
/// let nodes: Vec<&AbstractInsnNode> = list.nodes().collect();
/// match (nodes[3], nodes[7]) {
///     (AbstractInsnNode::Insn(Insn::Jump(jump)), AbstractInsnNode::Label(label)) => {
///         assert_eq!(jump.insn.opcode, opcodes::IFEQ);
///         assert_eq!(jump.target, *label);
///     }
///     other => panic!("unexpected nodes {other:?}"),
/// }
/// ```
#[macro_export]
macro_rules! insn_list {
    ( $( let $label:ident; )* $( [ $($instruction:tt)+ ] )* ) => {
        {
            let mut list = $crate::insn::InsnList::new();
            $(
                let $label = list.new_label();
            )*
            $(
                $crate::insn_list!(@dispatch list, $($instruction)+);
            )*
            list
        }
    };

    (@dispatch $list:ident, int $opcode:ident $operand:expr) => {
        $list.add($crate::insn::IntInsnNode::new($crate::opcodes::$opcode, $operand as i32));
    };

    (@dispatch $list:ident, var $opcode:ident $index:expr) => {
        $list.add($crate::insn::VarInsnNode::new($crate::opcodes::$opcode, $index as u16));
    };

    (@dispatch $list:ident, type $opcode:ident $name:expr) => {
        $list.add($crate::insn::TypeInsnNode::new($crate::opcodes::$opcode, $name));
    };

    (@dispatch $list:ident, field $opcode:ident $owner:expr, $name:expr, $desc:expr) => {
        $list.add($crate::insn::FieldInsnNode::new(
            $crate::opcodes::$opcode,
            $owner,
            $name,
            $desc
        ));
    };

    (@dispatch $list:ident, method $opcode:ident $owner:expr, $name:expr, $desc:expr) => {
        $list.add($crate::insn::MethodInsnNode::new(
            $crate::opcodes::$opcode,
            $owner,
            $name,
            $desc
        ));
    };

    (@dispatch $list:ident, call $hook:expr) => {
        $list.add($hook.invoke());
    };

    (@dispatch $list:ident, ldc $value:expr) => {
        $list.add($crate::insn::LdcInsnNode::new($value));
    };

    (@dispatch $list:ident, jump $opcode:ident $target:expr) => {
        $list.add($crate::insn::JumpInsnNode::new($crate::opcodes::$opcode, $target));
    };

    (@dispatch $list:ident, label $label:expr) => {
        $list.add($label);
    };

    (@dispatch $list:ident, iinc $var:expr, $incr:expr) => {
        $list.add($crate::insn::IincInsnNode::new($var as u16, $incr as i16));
    };

    (@dispatch $list:ident, $opcode:ident) => {
        $list.add($crate::insn::InsnNode::new($crate::opcodes::$opcode));
    };
}

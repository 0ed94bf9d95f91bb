use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::insn::MethodInsnNode;
use crate::opcodes;

/// A static method implemented outside the patched code and called from the
/// instructions a rule inserts.
///
/// The descriptor is trusted as written; a hook whose real signature drifts
/// produces classes that fail to link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HookSymbol {
    pub owner: Cow<'static, str>,
    pub name: Cow<'static, str>,
    pub descriptor: Cow<'static, str>,
}

impl HookSymbol {
    pub const fn new(owner: &'static str, name: &'static str, descriptor: &'static str) -> Self {
        Self {
            owner: Cow::Borrowed(owner),
            name: Cow::Borrowed(name),
            descriptor: Cow::Borrowed(descriptor),
        }
    }

    /// A hook whose owner is only known at runtime.
    pub fn owned(owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            owner: Cow::Owned(owner.to_string()),
            name: Cow::Owned(name.to_string()),
            descriptor: Cow::Owned(descriptor.to_string()),
        }
    }

    /// The `invokestatic` calling this hook.
    pub fn invoke(&self) -> MethodInsnNode {
        MethodInsnNode::new(opcodes::INVOKESTATIC, &self.owner, &self.name, &self.descriptor)
    }
}

impl fmt::Display for HookSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// A process-wide "do this once" flag, owned by whoever needs the guarantee.
#[derive(Debug, Default)]
pub struct OneShot {
    fired: AtomicBool,
}

impl OneShot {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// True for exactly one caller, however many race for it.
    pub fn first(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    const UPDATE: HookSymbol = HookSymbol::new("game/Hooks", "update", "(Lgame/Entity;)V");

    #[test]
    fn test_hook_invoke() {
        let call = UPDATE.invoke();
        assert_eq!(call.insn.opcode, opcodes::INVOKESTATIC);
        assert_eq!(call.owner, "game/Hooks");
        assert_eq!(call.name, "update");
        assert!(!call.is_interface);
        assert_eq!(UPDATE.to_string(), "game/Hooks.update(Lgame/Entity;)V");
        assert_eq!(HookSymbol::owned("game/Hooks", "update", "(Lgame/Entity;)V"), UPDATE);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let guard = OneShot::new();
        assert!(!guard.has_fired());
        assert!(guard.first());
        assert!(!guard.first());
        assert!(guard.has_fired());
    }

    #[test]
    fn test_one_shot_under_threads() {
        let guard = Arc::new(OneShot::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    for _ in 0..100 {
                        if guard.first() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}

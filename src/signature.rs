use std::fmt;

use crate::insn::MethodInsnNode;
use crate::nodes::MethodDefinition;

/// A method identified by a set of name aliases and one exact descriptor.
///
/// Aliases cover the readable name and the obfuscated name the same method
/// carries at runtime. Matching never looks at overloads or covariance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    aliases: Vec<String>,
    descriptor: String,
}

impl MethodSignature {
    /// A method known under a readable and an obfuscated name.
    pub fn new(name: &str, obfuscated: &str, descriptor: &str) -> Self {
        Self {
            aliases: vec![name.to_string(), obfuscated.to_string()],
            descriptor: descriptor.to_string(),
        }
    }

    /// A method that is only ever known under one name.
    pub fn named(name: &str, descriptor: &str) -> Self {
        Self {
            aliases: vec![name.to_string()],
            descriptor: descriptor.to_string(),
        }
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        descriptor == self.descriptor && self.aliases.iter().any(|alias| alias == name)
    }

    pub fn matches_method(&self, method: &MethodDefinition) -> bool {
        self.matches(&method.name, &method.descriptor)
    }

    /// Call-site matching: the owner of the invoked method is not compared.
    pub fn matches_insn(&self, insn: &MethodInsnNode) -> bool {
        self.matches(&insn.name, &insn.descriptor)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Names [{}] Descriptor {}",
            self.aliases.join(", "),
            self.descriptor
        )
    }
}

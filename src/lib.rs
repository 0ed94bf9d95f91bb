//! Targeted rewriting of JVM class files as they are loaded.
//!
//! A [`TransformerRegistry`] maps class names to [`PatchRule`]s. Each rule
//! finds one method by [`MethodSignature`], locates instructions inside it and
//! splices calls to external hooks around them. Patched classes are written
//! back with recomputed `max_stack`, `max_locals` and stack map frames; classes
//! nobody patched come back as the very buffer that went in.

mod macros;

pub mod builder;
pub mod catalogue;
pub mod class_reader;
pub mod class_writer;
pub mod constants;
pub mod error;
mod frames;
pub mod hierarchy;
pub mod hooks;
pub mod insn;
pub mod nodes;
pub mod opcodes;
pub mod pipeline;
pub mod registry;
pub mod scan;
pub mod signature;
pub mod stack;

pub use class_reader::{read_class, read_class_info};
pub use class_writer::write_class;
pub use error::{ClassReadError, ClassWriteError, Error, TypeResolveError};
pub use hierarchy::{ClassHierarchy, ClassInfo, LoaderHierarchy, SafeTypeResolver, StaticHierarchy};
pub use hooks::{HookSymbol, OneShot};
pub use pipeline::{transform, PatchRule};
pub use registry::{Capabilities, RegistryBuilder, TransformerRegistry};
pub use scan::{combine, scan, whole_method, MethodAction};
pub use signature::MethodSignature;

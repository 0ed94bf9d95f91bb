pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

/// Root of every class hierarchy.
pub const OBJECT: &str = "java/lang/Object";

/// First class-file major version whose verifier requires a `StackMapTable`.
pub const V1_6: u16 = 50;
pub const V1_8: u16 = 52;

pub(crate) const ATTR_CODE: &str = "Code";
pub(crate) const ATTR_STACK_MAP_TABLE: &str = "StackMapTable";
pub(crate) const ATTR_LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub(crate) const ATTR_LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub(crate) const ATTR_LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";

use crate::jvm::class_file::HandleKind;
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::jvm::descriptors::RenderDescriptor;
use std::fmt;

/// Symbolic reference to a field
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

/// Symbolic reference to a method
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Array types show up here for things like `clone` on arrays
    pub class: RefType,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,

    /// Is the class an interface? (decides between `Methodref` and `InterfaceMethodref`)
    pub is_interface: bool,
}

impl MethodRef {
    /// Is this method a constructor?
    pub fn is_init(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberRef {
    Field(FieldRef),
    Method(MethodRef),
}

/// Method handle constant
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: HandleKind,
    pub member: MemberRef,
}

/// Loadable constants (arguments of `ldc` and bootstrap methods)
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantData {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType),
    MethodType(MethodDescriptor),
    MethodHandle(Handle),
}

impl ConstantData {
    /// Does the constant need `ldc2_w`?
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantData::Long(_) | ConstantData::Double(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapData {
    pub handle: Handle,
    pub arguments: Vec<ConstantData>,
}

/// Operand of `invokedynamic`
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicCallSite {
    pub bootstrap: BootstrapData,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.name, self.descriptor.render())
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{}",
            self.class.class_info_name(),
            self.name,
            self.descriptor.render()
        )
    }
}

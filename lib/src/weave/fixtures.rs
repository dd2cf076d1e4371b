//! Library classes and methods shared by the weaving unit tests
//!
//! `me/alec/Lib` declares a handful of factories and parameter fields with the default
//! annotations, `me/alec/Twice` is an interface with two candidate methods, and `me/alec/Task` is
//! an abstract class with an accessible no-argument constructor.

use super::AnnotationConventions;
use crate::jvm::class_builder::ClassBuilder;
use crate::jvm::class_graph::{CachingResolver, InMemoryClasses};
use crate::jvm::code::{FieldRef, Instruction, LocalVariable, MethodRef, MethodUnit};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, ParseDescriptor, RefType, UnqualifiedName,
};

pub const FACTORIES: [(&str, &str); 9] = [
    ("fn", "(II)Ljava/util/function/IntUnaryOperator;"),
    ("fn2", "(III)Ljava/util/function/IntBinaryOperator;"),
    ("fnObject", "(ILjava/lang/Object;)Ljava/util/function/IntFunction;"),
    ("supply", "(I)Ljava/util/function/IntSupplier;"),
    ("supplyObject", "(Ljava/lang/Object;)Ljava/util/function/Supplier;"),
    ("consume", "(II)Ljava/util/function/IntConsumer;"),
    ("generic", "(ILjava/lang/Object;)Ljava/lang/Object;"),
    ("nothing", "()Ljava/lang/Runnable;"),
    ("twice", "(II)Lme/alec/Twice;"),
];

pub fn name<N: Name>(name: &str) -> N {
    N::from_string(name.to_owned()).unwrap()
}

pub fn lib() -> BinaryName {
    name("me/alec/Lib")
}

pub fn demo() -> BinaryName {
    name("me/alec/Demo")
}

pub fn int_supplier() -> BinaryName {
    name("java/util/function/IntSupplier")
}

fn parameter(field: &str, field_type: FieldType) -> FieldRef {
    FieldRef {
        class: lib(),
        name: name(field),
        descriptor: field_type,
    }
}

pub fn param_x() -> FieldRef {
    parameter("x", FieldType::int())
}

pub fn param_y() -> FieldRef {
    parameter("y", FieldType::int())
}

pub fn param_l() -> FieldRef {
    parameter("l", FieldType::long())
}

/// Reference to one of the factories in `me/alec/Lib`
pub fn factory(factory: &str) -> MethodRef {
    let (_, descriptor) = FACTORIES
        .iter()
        .find(|(name, _)| *name == factory)
        .unwrap();
    method_ref("me/alec/Lib", factory, descriptor)
}

pub fn method_ref(class: &str, method: &str, descriptor: &str) -> MethodRef {
    MethodRef {
        class: RefType::Object(name(class)),
        name: name(method),
        descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        is_interface: false,
    }
}

pub fn conventions() -> AnnotationConventions {
    AnnotationConventions::new(BinaryName::LAMBDA_ANNOTATION, BinaryName::PARAM_ANNOTATION)
}

fn library_classes() -> Vec<ClassBuilder> {
    let abstract_method = MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT;

    let mut lib = ClassBuilder::new(lib(), BinaryName::OBJECT, ClassAccessFlags::PUBLIC);
    for (factory, descriptor) in FACTORIES {
        lib.add_annotated_method(
            abstract_method | MethodAccessFlags::STATIC,
            name(factory),
            MethodDescriptor::parse(descriptor).unwrap(),
            None,
            vec![BinaryName::LAMBDA_ANNOTATION],
        );
    }
    for (field, descriptor) in [("x", "I"), ("y", "I"), ("l", "J"), ("s", "Ljava/lang/String;")] {
        lib.add_annotated_field(
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
            name(field),
            FieldType::parse(descriptor).unwrap(),
            vec![BinaryName::PARAM_ANNOTATION],
        );
    }

    let mut twice = ClassBuilder::new(
        name("me/alec/Twice"),
        BinaryName::OBJECT,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
    );
    for method in ["first", "second"] {
        let descriptor = MethodDescriptor::parse("(I)I").unwrap();
        twice.add_method(abstract_method, name(method), descriptor, None);
    }

    let mut task = ClassBuilder::new(
        name("me/alec/Task"),
        BinaryName::OBJECT,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT,
    );
    task.add_method(
        MethodAccessFlags::PUBLIC,
        UnqualifiedName::INIT,
        MethodDescriptor::parse("()V").unwrap(),
        None,
    );
    let descriptor = MethodDescriptor::parse("(I)J").unwrap();
    task.add_method(abstract_method, name("compute"), descriptor, None);

    vec![lib, twice, task]
}

pub fn resolver() -> CachingResolver<InMemoryClasses> {
    let builtin = CachingResolver::builtin();
    let mut source = InMemoryClasses::new();
    for class in library_classes() {
        source.insert(class.class_name().clone(), class.build_bytes(&builtin).unwrap());
    }
    CachingResolver::new(source)
}

/// Static method `me/alec/Demo.run` with a local variable table (initially empty)
pub fn method(descriptor: &str, instructions: Vec<Instruction>) -> MethodUnit {
    let descriptor = MethodDescriptor::parse(descriptor).unwrap();
    let max_locals = descriptor.parameter_length(false) as u16;
    MethodUnit {
        owner: demo(),
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name: name("run"),
        descriptor,
        instructions,
        exception_handlers: vec![],
        local_variables: vec![],
        has_local_variable_table: true,
        line_numbers: vec![],
        max_locals,
    }
}

pub fn local(
    variable: &str,
    descriptor: FieldType,
    slot: u16,
    start: usize,
    end: usize,
) -> LocalVariable {
    LocalVariable {
        start,
        end,
        name: name(variable),
        descriptor,
        slot,
    }
}

//! Classes shared by the integration tests
//!
//! `me/alec/Lib` declares the factories and parameter fields (with the default annotations) and
//! `me/alec/Twice` is an interface with two abstract methods of the same arity. Test classes are
//! built as `me/alec/Demo` out of static methods.

#![allow(dead_code)]

pub mod machine;

use closureweave::jvm::class_builder::ClassBuilder;
use closureweave::jvm::class_graph::{CachingResolver, InMemoryClasses};
use closureweave::jvm::code::{BuiltCode, Instruction, LocalVariable, MethodRef, SourceLine};
use closureweave::jvm::{
    BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, ParseDescriptor, RefType,
};
use closureweave::jvm::code::FieldRef;

pub const FACTORIES: [(&str, &str); 6] = [
    ("fn", "(II)Ljava/util/function/IntUnaryOperator;"),
    ("fn2", "(III)Ljava/util/function/IntBinaryOperator;"),
    ("supply", "(I)Ljava/util/function/IntSupplier;"),
    ("consume", "(II)Ljava/util/function/IntConsumer;"),
    ("boxed", "(I)Ljava/lang/Object;"),
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

/// Parameter field `x` or `y` of `me/alec/Lib`
pub fn param(field: &str) -> FieldRef {
    FieldRef {
        class: lib(),
        name: name(field),
        descriptor: FieldType::int(),
    }
}

pub fn method_ref(class: &str, method: &str, descriptor: &str, is_interface: bool) -> MethodRef {
    MethodRef {
        class: RefType::Object(name(class)),
        name: name(method),
        descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        is_interface,
    }
}

/// `invokestatic` of a factory in `me/alec/Lib`
pub fn factory(factory: &str) -> Instruction {
    let (_, descriptor) = FACTORIES.iter().find(|(name, _)| *name == factory).unwrap();
    Instruction::Invoke(
        closureweave::jvm::code::InvokeType::Static,
        method_ref("me/alec/Lib", factory, descriptor, false),
    )
}

/// `invokeinterface` of a functional interface method
pub fn call(interface: &str, method: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke(
        closureweave::jvm::code::InvokeType::Interface,
        method_ref(interface, method, descriptor, true),
    )
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
    for field in ["x", "y"] {
        lib.add_annotated_field(
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
            name(field),
            FieldType::int(),
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

    vec![lib, twice]
}

/// Resolver knowing about the library classes (and the built-in JDK classes)
pub fn resolver() -> CachingResolver<InMemoryClasses> {
    let builtin = CachingResolver::builtin();
    let mut source = InMemoryClasses::new();
    for class in library_classes() {
        source.insert(class.class_name().clone(), class.build_bytes(&builtin).unwrap());
    }
    CachingResolver::new(source)
}

/// Local variable table entry: name, descriptor, slot, and scope
pub type Local<'a> = (&'a str, &'a str, u16, usize, usize);

/// Builds `me/alec/Demo` one static method at a time
pub struct Demo {
    class: ClassBuilder,
}

impl Demo {
    pub fn new() -> Demo {
        Demo {
            class: ClassBuilder::new(
                demo(),
                BinaryName::OBJECT,
                ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            ),
        }
    }

    /// Add a public static method whose code starts on some source line
    pub fn method(
        mut self,
        method: &str,
        descriptor: &str,
        line: u16,
        instructions: Vec<Instruction>,
        locals: &[Local],
    ) -> Demo {
        let local_variables = locals
            .iter()
            .map(|(variable, descriptor, slot, start, end)| LocalVariable {
                start: *start,
                end: *end,
                name: name(variable),
                descriptor: FieldType::parse(descriptor).unwrap(),
                slot: *slot,
            })
            .collect();
        self.class.add_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name(method),
            MethodDescriptor::parse(descriptor).unwrap(),
            Some(BuiltCode {
                instructions,
                exception_handlers: vec![],
                local_variables,
                line_numbers: vec![SourceLine { start: 0, line }],
            }),
        );
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.class.build_bytes(&resolver()).unwrap()
    }
}

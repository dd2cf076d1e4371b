//! How lambda factories and parameter fields are recognized
//!
//! Sources mark a static factory method, whose last argument is the closure body and whose other
//! arguments bind named parameters:
//!
//! ```java
//! @Lambda static IntUnaryOperator fn(int x, int body) { ... }
//! @Param static int x;
//!
//! IntUnaryOperator inc = fn(x, x + 1);
//! ```

use super::Error;
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::{Instruction, MethodRef};
use crate::jvm::{
    BinaryName, FieldAccessFlags, FieldType, MethodDescriptor, RefType, UnqualifiedName,
};
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Predicates for recognizing lambda factories and parameter fields
///
/// Lookups go through the resolver given, since the class being woven may itself declare the
/// factory or the parameter fields.
pub trait Conventions {
    /// Is this static method a lambda factory?
    fn is_factory(
        &self,
        resolver: &dyn TypeResolver,
        owner: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Result<bool, Error>;

    /// Is this static field a named lambda parameter?
    fn is_parameter_field(
        &self,
        resolver: &dyn TypeResolver,
        owner: &BinaryName,
        name: &UnqualifiedName,
    ) -> Result<bool, Error>;
}

type MethodKey = (BinaryName, UnqualifiedName, MethodDescriptor);
type FieldKey = (BinaryName, UnqualifiedName);

/// Conventions based on annotations: factories and parameter fields carry marker annotations
///
/// Answers are memoized for as long as the conventions live (one weaving session). Classes that
/// can't be resolved are assumed not to declare factories or parameters, since every static call
/// in a method gets checked (including calls into classes that are not on the class path).
pub struct AnnotationConventions {
    factory_annotation: BinaryName,
    parameter_annotation: BinaryName,
    factories: Mutex<HashMap<MethodKey, bool>>,
    parameters: Mutex<HashMap<FieldKey, bool>>,
}

impl AnnotationConventions {
    pub fn new(
        factory_annotation: BinaryName,
        parameter_annotation: BinaryName,
    ) -> AnnotationConventions {
        AnnotationConventions {
            factory_annotation,
            parameter_annotation,
            factories: Mutex::new(HashMap::new()),
            parameters: Mutex::new(HashMap::new()),
        }
    }
}

impl Conventions for AnnotationConventions {
    fn is_factory(
        &self,
        resolver: &dyn TypeResolver,
        owner: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Result<bool, Error> {
        let key = (owner.clone(), name.clone(), descriptor.clone());
        let mut factories = self.factories.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = factories.get(&key) {
            return Ok(*known);
        }
        let is_factory = match resolver.find_method(owner, name, descriptor) {
            Ok(Some((_, method))) => {
                method.access_flags.is_static() && method.has_annotation(&self.factory_annotation)
            }
            Ok(None) | Err(crate::jvm::Error::MissingClass(_)) => false,
            Err(err) => return Err(Error::from(err)),
        };
        if is_factory {
            debug!("{}.{} is a lambda factory", owner, name);
        }
        factories.insert(key, is_factory);
        Ok(is_factory)
    }

    fn is_parameter_field(
        &self,
        resolver: &dyn TypeResolver,
        owner: &BinaryName,
        name: &UnqualifiedName,
    ) -> Result<bool, Error> {
        let key = (owner.clone(), name.clone());
        let mut parameters = self.parameters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = parameters.get(&key) {
            return Ok(*known);
        }
        let is_parameter = match resolver.find_field(owner, name) {
            Ok(Some((_, field))) => {
                field.access_flags.contains(FieldAccessFlags::STATIC)
                    && field.has_annotation(&self.parameter_annotation)
            }
            Ok(None) | Err(crate::jvm::Error::MissingClass(_)) => false,
            Err(err) => return Err(Error::from(err)),
        };
        parameters.insert(key, is_parameter);
        Ok(is_parameter)
    }
}

/// Interface or class a lambda site implements
///
/// This is the return type of the factory, unless that type is `Object`. Generic factories (eg.
/// `static <T> T fn(...)`) erase to `Object`, and then the compiler inserts a `checkcast` to the
/// real type right after the call. `None` means the target can't be determined.
pub fn target_type(
    factory: &MethodRef,
    following: Option<&Instruction>,
) -> Option<(BinaryName, bool)> {
    match &factory.descriptor.return_type {
        Some(FieldType::Ref(RefType::Object(class))) if class != &BinaryName::OBJECT => {
            Some((class.clone(), false))
        }
        Some(FieldType::Ref(RefType::Object(_))) => match following {
            Some(Instruction::CheckCast(RefType::Object(class))) => Some((class.clone(), true)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_builder::ClassBuilder;
    use crate::jvm::class_graph::{CachingResolver, InMemoryClasses};
    use crate::jvm::code::Instruction;
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags, Name, ParseDescriptor};

    fn name<N: Name>(name: &str) -> N {
        N::from_string(name.to_owned()).unwrap()
    }

    fn resolver() -> CachingResolver<InMemoryClasses> {
        let lib: BinaryName = name("me/alec/Lib");
        let mut class =
            ClassBuilder::new(lib.clone(), BinaryName::OBJECT, ClassAccessFlags::PUBLIC);
        class.add_annotated_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::ABSTRACT,
            name("fn"),
            MethodDescriptor::parse("(II)Ljava/util/function/IntUnaryOperator;").unwrap(),
            None,
            vec![BinaryName::LAMBDA_ANNOTATION],
        );
        class.add_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::ABSTRACT,
            name("plain"),
            MethodDescriptor::parse("(I)I").unwrap(),
            None,
        );
        class.add_annotated_field(
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
            name("x"),
            FieldType::int(),
            vec![BinaryName::PARAM_ANNOTATION],
        );
        class.add_annotated_field(
            FieldAccessFlags::PUBLIC,
            name("y"),
            FieldType::int(),
            vec![BinaryName::PARAM_ANNOTATION],
        );

        let mut source = InMemoryClasses::new();
        source.insert(lib, class.build_bytes(&CachingResolver::builtin()).unwrap());
        CachingResolver::new(source)
    }

    #[test]
    fn annotated_members() {
        let resolver = resolver();
        let conventions =
            AnnotationConventions::new(BinaryName::LAMBDA_ANNOTATION, BinaryName::PARAM_ANNOTATION);
        let lib: BinaryName = name("me/alec/Lib");

        let factory = MethodDescriptor::parse("(II)Ljava/util/function/IntUnaryOperator;").unwrap();
        assert!(conventions.is_factory(&resolver, &lib, &name("fn"), &factory).unwrap());
        assert!(conventions.is_factory(&resolver, &lib, &name("fn"), &factory).unwrap());
        let plain = MethodDescriptor::parse("(I)I").unwrap();
        assert!(!conventions.is_factory(&resolver, &lib, &name("plain"), &plain).unwrap());

        assert!(conventions.is_parameter_field(&resolver, &lib, &name("x")).unwrap());
        // only static fields are parameters
        assert!(!conventions.is_parameter_field(&resolver, &lib, &name("y")).unwrap());

        // unknown classes have no factories
        let missing: BinaryName = name("a/Missing");
        assert!(!conventions.is_factory(&resolver, &missing, &name("fn"), &plain).unwrap());
    }

    #[test]
    fn generic_factories_use_the_cast() {
        let mut factory = crate::jvm::code::MethodRef {
            class: RefType::Object(name("me/alec/Lib")),
            name: name("fn"),
            descriptor: MethodDescriptor::parse("(I)Ljava/util/function/IntSupplier;").unwrap(),
            is_interface: false,
        };
        let (target, absorbed) = target_type(&factory, None).unwrap();
        assert_eq!(target.as_str(), "java/util/function/IntSupplier");
        assert!(!absorbed);

        factory.descriptor = MethodDescriptor::parse("(I)Ljava/lang/Object;").unwrap();
        assert_eq!(target_type(&factory, None), None);
        let cast = Instruction::CheckCast(RefType::Object(BinaryName::RUNNABLE));
        assert_eq!(target_type(&factory, Some(&cast)), Some((BinaryName::RUNNABLE, true)));
    }
}

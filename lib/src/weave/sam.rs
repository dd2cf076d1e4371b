//! Choosing the abstract method a closure implements
//!
//! The closure method takes the site's parameters as arguments, but parameters with defaults may
//! be left off the end. So the search starts at the full parameter count and works down to the
//! number of parameters without defaults, taking the first arity for which the target has an
//! abstract method.

use super::site::LambdaSite;
use super::{Context, Error};
use crate::jvm::class_graph::{ClassMetadata, MethodMetadata, TypeResolver};
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, UnqualifiedName};
use log::debug;

/// Single abstract method implemented by a closure
#[derive(Debug, Clone, PartialEq)]
pub struct Sam {
    /// Class or interface declaring the method
    pub owner: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub is_interface: bool,
}

impl Sam {
    /// Number of leading site parameters the method supplies
    pub fn arity(&self) -> usize {
        self.descriptor.parameters.len()
    }
}

/// Find the method the closure for a site implements
pub fn resolve_sam(
    site: &LambdaSite,
    resolver: &dyn TypeResolver,
    context: &Context,
) -> Result<Sam, Error> {
    let most = site.parameters.len();
    let fewest = site.required_parameters();
    for arity in (fewest..=most).rev() {
        if let Some(sam) = find_abstract(&site.target, &site.target, arity, resolver, context)? {
            debug!(
                "Lambda site #{} implements {}.{} ({} of {} parameters)",
                site.id, sam.owner, sam.name, arity, most
            );
            return Ok(sam);
        }
    }

    let message = if fewest == most {
        format!("no candidate abstract method taking {} arguments", most)
    } else {
        format!(
            "no candidate abstract method taking between {} and {} arguments",
            fewest, most
        )
    };
    Err(Error::UnresolvedSam {
        context: context.clone(),
        target: site.target.clone(),
        message,
    })
}

/// Look for the abstract method of some arity: first in the class itself, then in its interfaces,
/// then in its superclass
fn find_abstract(
    target: &BinaryName,
    class: &BinaryName,
    arity: usize,
    resolver: &dyn TypeResolver,
    context: &Context,
) -> Result<Option<Sam>, Error> {
    let metadata = resolver
        .resolve(class)
        .map_err(|err| Error::from_jvm(context, err))?;

    let mut candidates = vec![];
    for method in &metadata.methods {
        if method.access_flags.is_abstract()
            && !method.access_flags.is_static()
            && method.descriptor.parameters.len() == arity
            && !is_object_method(method, resolver, context)?
            && !is_implemented(target, method, resolver, context)?
        {
            candidates.push(method);
        }
    }

    match candidates.as_slice() {
        [] => (),
        [method] => return Ok(Some(sam(metadata, method))),
        _ => {
            let names: Vec<&str> = candidates.iter().map(|method| method.name.as_ref()).collect();
            return Err(Error::UnresolvedSam {
                context: context.clone(),
                target: target.clone(),
                message: format!(
                    "ambiguous abstract methods taking {} arguments: {}",
                    arity,
                    names.join(", ")
                ),
            });
        }
    }

    for interface in &metadata.interfaces {
        if let Some(sam) = find_abstract(target, interface, arity, resolver, context)? {
            return Ok(Some(sam));
        }
    }
    match &metadata.super_class {
        Some(super_class) => find_abstract(target, super_class, arity, resolver, context),
        None => Ok(None),
    }
}

fn sam(class: &ClassMetadata, method: &MethodMetadata) -> Sam {
    Sam {
        owner: class.name.clone(),
        name: method.name.clone(),
        descriptor: method.descriptor.clone(),
        is_interface: class.is_interface(),
    }
}

/// Interfaces redeclare public `Object` methods (eg. `Comparator.equals`) without them counting
fn is_object_method(
    method: &MethodMetadata,
    resolver: &dyn TypeResolver,
    context: &Context,
) -> Result<bool, Error> {
    let object = resolver
        .resolve(&BinaryName::OBJECT)
        .map_err(|err| Error::from_jvm(context, err))?;
    Ok(object
        .method(&method.name, &method.descriptor)
        .map_or(false, |inherited| inherited.access_flags.contains(MethodAccessFlags::PUBLIC)))
}

/// Does a concrete class between the target and `Object` implement the method?
fn is_implemented(
    target: &BinaryName,
    method: &MethodMetadata,
    resolver: &dyn TypeResolver,
    context: &Context,
) -> Result<bool, Error> {
    let classes = resolver
        .superclasses(target)
        .map_err(|err| Error::from_jvm(context, err))?;
    Ok(classes.iter().any(|class| {
        class
            .method(&method.name, &method.descriptor)
            .map_or(false, |found| !found.access_flags.is_abstract())
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::weave::fixtures::*;
    use crate::weave::site::Parameter;
    use crate::jvm::Name;

    fn site(target: &str, defaults: &[bool]) -> LambdaSite {
        let parameters = defaults
            .iter()
            .enumerate()
            .map(|(i, has_default)| Parameter {
                field: None,
                range: i..i + 1,
                default: if *has_default { Some(i..i + 1) } else { None },
            })
            .collect();
        LambdaSite {
            id: 0,
            line: None,
            factory: factory("fn"),
            target: name(target),
            parameters,
            body: defaults.len()..defaults.len() + 1,
            call: defaults.len() + 1,
            end: defaults.len() + 2,
            parent: None,
        }
    }

    #[test]
    fn functional_interfaces() {
        let resolver = resolver();
        let context = Context::default();
        let target = site("java/util/function/IntBinaryOperator", &[false, false]);
        let sam = resolve_sam(&target, &resolver, &context).unwrap();
        assert_eq!(sam.name.as_str(), "applyAsInt");
        assert_eq!(sam.arity(), 2);
        assert!(sam.is_interface);

        // inherited from `Function`
        let target = site("java/util/function/UnaryOperator", &[false]);
        let sam = resolve_sam(&target, &resolver, &context).unwrap();
        assert_eq!(sam.owner.as_str(), "java/util/function/Function");
        assert_eq!(sam.name.as_str(), "apply");
    }

    #[test]
    fn object_methods_do_not_count() {
        let resolver = resolver();
        let target = site("java/util/Comparator", &[false, false]);
        let sam = resolve_sam(&target, &resolver, &Context::default()).unwrap();
        assert_eq!(sam.name.as_str(), "compare");
    }

    #[test]
    fn defaulted_parameters_may_be_dropped() {
        let resolver = resolver();
        // `IntSupplier.getAsInt` takes nothing, so both defaulted parameters get left off
        let target = site("java/util/function/IntSupplier", &[true, true]);
        let sam = resolve_sam(&target, &resolver, &Context::default()).unwrap();
        assert_eq!(sam.arity(), 0);

        // ...but a parameter without a default can't be
        let target = site("java/util/function/IntSupplier", &[false, true]);
        let err = resolve_sam(&target, &resolver, &Context::default()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedSam { ref message, .. }
            if message.contains("between 1 and 2")));
    }

    #[test]
    fn abstract_classes() {
        let resolver = resolver();
        let target = site("me/alec/Task", &[false]);
        let sam = resolve_sam(&target, &resolver, &Context::default()).unwrap();
        assert_eq!(sam.name.as_str(), "compute");
        assert!(!sam.is_interface);
    }

    #[test]
    fn ambiguous_targets() {
        let resolver = resolver();
        let target = site("me/alec/Twice", &[false]);
        let err = resolve_sam(&target, &resolver, &Context::default()).unwrap_err();
        match err {
            Error::UnresolvedSam { target, message, .. } => {
                assert_eq!(target.as_str(), "me/alec/Twice");
                assert_eq!(message, "ambiguous abstract methods taking 1 arguments: first, second");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}

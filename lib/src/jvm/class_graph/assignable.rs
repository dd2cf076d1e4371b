//! Subtyping queries over resolved class metadata
//!
//! These follow the `isJavaAssignable` predicate of the JVM verifier, except that assignability to
//! an interface is actually checked (the verifier treats all interfaces like `Object`).

use crate::jvm::class_graph::TypeResolver;
use crate::jvm::{ArrayType, BinaryName, Error, RefType};

/// Is the first type assignable to the second?
pub fn is_assignable<R: TypeResolver + ?Sized>(
    resolver: &R,
    sub_type: &RefType,
    super_type: &RefType,
) -> Result<bool, Error> {
    if sub_type == super_type {
        return Ok(true);
    }
    match (sub_type, super_type) {
        (_, RefType::Object(object)) if object == &BinaryName::OBJECT => Ok(true),

        // Special superclass and interfaces of all arrays
        (RefType::PrimitiveArray(_) | RefType::ObjectArray(_), RefType::Object(object)) => Ok(
            object == &BinaryName::CLONEABLE || object == &BinaryName::SERIALIZABLE,
        ),

        (RefType::Object(sub_class), RefType::Object(super_class)) => {
            is_subclass(resolver, sub_class, super_class)
        }

        // `int[][]` is an `Object[]`, but `int[]` is only ever an `int[]`
        (RefType::PrimitiveArray(sub_array), RefType::ObjectArray(super_array)) => Ok(
            sub_array.additional_dimensions > super_array.additional_dimensions
                && is_array_root(&super_array.element_type),
        ),
        (_, RefType::PrimitiveArray(_)) => Ok(false),

        (RefType::ObjectArray(sub_array), RefType::ObjectArray(super_array)) => {
            let dimensions = sub_array.additional_dimensions;
            let super_dimensions = super_array.additional_dimensions;
            if dimensions == super_dimensions {
                is_subclass(resolver, &sub_array.element_type, &super_array.element_type)
            } else if dimensions > super_dimensions {
                // `String[][]` is an `Object[]`
                Ok(is_array_root(&super_array.element_type))
            } else {
                Ok(false)
            }
        }

        (RefType::Object(_), RefType::ObjectArray(_)) => Ok(false),
    }
}

/// Is this a supertype of every array?
fn is_array_root(class: &BinaryName) -> bool {
    class == &BinaryName::OBJECT
        || class == &BinaryName::CLONEABLE
        || class == &BinaryName::SERIALIZABLE
}

/// Does the first class extend or implement the second?
fn is_subclass<R: TypeResolver + ?Sized>(
    resolver: &R,
    sub_class: &BinaryName,
    super_class: &BinaryName,
) -> Result<bool, Error> {
    if super_class == &BinaryName::OBJECT {
        return Ok(true);
    }
    let mut to_visit = vec![sub_class.clone()];
    let mut visited: Vec<BinaryName> = vec![];

    // Optimization: if the super type is a class, then skip visiting interfaces
    let super_is_class = !resolver.resolve(super_class)?.is_interface();

    while let Some(class_name) = to_visit.pop() {
        if &class_name == super_class {
            return Ok(true);
        }
        if visited.contains(&class_name) {
            continue;
        }
        let class = resolver.resolve(&class_name)?;
        to_visit.extend(class.super_class.iter().cloned());
        if !super_is_class {
            to_visit.extend(class.interfaces.iter().cloned());
        }
        visited.push(class_name);
    }
    Ok(false)
}

/// Closest common superclass
pub fn common_superclass<R: TypeResolver + ?Sized>(
    resolver: &R,
    first: &BinaryName,
    second: &BinaryName,
) -> Result<BinaryName, Error> {
    if first == second {
        return Ok(first.clone());
    }
    let first_chain = resolver.superclasses(first)?;
    if first_chain[0].is_interface() {
        return Ok(BinaryName::OBJECT);
    }
    for class in resolver.superclasses(second)? {
        if class.is_interface() {
            return Ok(BinaryName::OBJECT);
        }
        if first_chain.iter().any(|other| other.name == class.name) {
            return Ok(class.name.clone());
        }
    }
    Ok(BinaryName::OBJECT)
}

/// Closest common supertype of two reference types (used for merging frames)
pub fn common_supertype<R: TypeResolver + ?Sized>(
    resolver: &R,
    first: &RefType,
    second: &RefType,
) -> Result<RefType, Error> {
    if first == second {
        return Ok(first.clone());
    }
    match (first, second) {
        (RefType::Object(first), RefType::Object(second)) => {
            Ok(RefType::Object(common_superclass(resolver, first, second)?))
        }
        (RefType::ObjectArray(first), RefType::ObjectArray(second))
            if first.additional_dimensions == second.additional_dimensions =>
        {
            Ok(RefType::ObjectArray(ArrayType {
                additional_dimensions: first.additional_dimensions,
                element_type: common_superclass(
                    resolver,
                    &first.element_type,
                    &second.element_type,
                )?,
            }))
        }
        _ => Ok(RefType::OBJECT),
    }
}

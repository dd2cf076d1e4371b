//! Converting values between the types of the closure method and those of the body
//!
//! Closure methods often don't have exactly the types the body was compiled with. Erased
//! targets pass `Object` where the parameter field is an `int`, the body of a `Runnable` factory
//! leaves a value that has to be dropped, and so on. Conversions are what Java would do for an
//! assignment (with a cast): widen or narrow primitives, box, unbox, and cast references.

use super::{Context, Error};
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::{Instruction, InvokeType, MethodRef};
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodDescriptor, RefType, RenderDescriptor, UnqualifiedName,
};

/// Instructions turning a value of type `from` on the top of the stack into one of type `to`
///
/// `None` stands for "no value": converting to `None` drops the value, and converting from `None`
/// pushes the default value of the target type.
pub fn conversion<L>(
    from: Option<&FieldType>,
    to: Option<&FieldType>,
    resolver: &dyn TypeResolver,
    context: &Context,
) -> Result<Vec<Instruction<L>>, Error> {
    let (from, to) = match (from, to) {
        (None, None) => return Ok(vec![]),
        (Some(from), None) => return Ok(vec![pop(from)]),
        (None, Some(to)) => return Ok(vec![default_value(to)]),
        (Some(from), Some(to)) => (from, to),
    };
    if from == to {
        return Ok(vec![]);
    }

    let unsupported = || {
        Error::malformed(
            context,
            format!("cannot convert {} to {}", from.render(), to.render()),
        )
    };
    match (from, to) {
        (FieldType::Base(from), FieldType::Base(to)) => Ok(primitive(*from, *to)),

        (FieldType::Base(from), FieldType::Ref(to)) => {
            let mut code = vec![];
            let boxed = match to {
                RefType::Object(class) => match BaseType::unboxed_from(class) {
                    Some(unboxed) => {
                        code.extend(primitive(*from, unboxed));
                        unboxed
                    }
                    None => *from,
                },
                _ => return Err(unsupported()),
            };
            code.push(box_value(boxed));
            let boxed_type = RefType::Object(boxed.boxed_class());
            if !resolver
                .is_assignable(&boxed_type, to)
                .map_err(|err| Error::from_jvm(context, err))?
            {
                return Err(unsupported());
            }
            Ok(code)
        }

        (FieldType::Ref(from), FieldType::Base(to)) => {
            let mut code = vec![];
            let unboxed = match from {
                RefType::Object(class) => match BaseType::unboxed_from(class) {
                    Some(unboxed) => unboxed,
                    None => {
                        code.push(Instruction::CheckCast(RefType::Object(to.boxed_class())));
                        *to
                    }
                },
                _ => return Err(unsupported()),
            };
            code.push(unbox_value(unboxed));
            code.extend(primitive(unboxed, *to));
            Ok(code)
        }

        (FieldType::Ref(from), FieldType::Ref(to)) => {
            let needs_cast = to != &RefType::OBJECT
                && !resolver
                    .is_assignable(from, to)
                    .map_err(|err| Error::from_jvm(context, err))?;
            if needs_cast {
                Ok(vec![Instruction::CheckCast(to.clone())])
            } else {
                Ok(vec![])
            }
        }
    }
}

/// Primitive widening and narrowing
fn primitive<L>(from: BaseType, to: BaseType) -> Vec<Instruction<L>> {
    use BaseType::*;

    if from == to {
        return vec![];
    }
    let mut code = match (from, to) {
        (Long, Float) => vec![Instruction::L2F],
        (Long, Double) => vec![Instruction::L2D],
        (Float, Long) => vec![Instruction::F2L],
        (Float, Double) => vec![Instruction::F2D],
        (Double, Long) => vec![Instruction::D2L],
        (Double, Float) => vec![Instruction::D2F],
        (from, Long) if from.is_int_like() => vec![Instruction::I2L],
        (from, Float) if from.is_int_like() => vec![Instruction::I2F],
        (from, Double) if from.is_int_like() => vec![Instruction::I2D],
        (Long, _) => vec![Instruction::L2I],
        (Float, _) => vec![Instruction::F2I],
        (Double, _) => vec![Instruction::D2I],
        _ => vec![],
    };

    // Narrow what is now an `int`
    if from != Boolean {
        match to {
            Byte => code.push(Instruction::I2B),
            Char => code.push(Instruction::I2C),
            Short => code.push(Instruction::I2S),
            _ => (),
        }
    }
    code
}

fn box_value<L>(base: BaseType) -> Instruction<L> {
    let class = base.boxed_class();
    Instruction::Invoke(
        InvokeType::Static,
        MethodRef {
            class: RefType::Object(class.clone()),
            name: UnqualifiedName::VALUEOF,
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::Base(base)],
                return_type: Some(FieldType::object(class)),
            },
            is_interface: false,
        },
    )
}

fn unbox_value<L>(base: BaseType) -> Instruction<L> {
    let name = match base {
        BaseType::Byte => UnqualifiedName::BYTEVALUE,
        BaseType::Char => UnqualifiedName::CHARVALUE,
        BaseType::Double => UnqualifiedName::DOUBLEVALUE,
        BaseType::Float => UnqualifiedName::FLOATVALUE,
        BaseType::Int => UnqualifiedName::INTVALUE,
        BaseType::Long => UnqualifiedName::LONGVALUE,
        BaseType::Short => UnqualifiedName::SHORTVALUE,
        BaseType::Boolean => UnqualifiedName::BOOLEANVALUE,
    };
    Instruction::Invoke(
        InvokeType::Virtual,
        MethodRef {
            class: RefType::Object(base.boxed_class()),
            name,
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::Base(base)),
            },
            is_interface: false,
        },
    )
}

/// Drop a value of some type from the top of the stack
pub fn pop<L>(field_type: &FieldType) -> Instruction<L> {
    if field_type.is_wide() {
        Instruction::Pop2
    } else {
        Instruction::Pop
    }
}

/// Push the zero value of a type
pub fn default_value<L>(field_type: &FieldType) -> Instruction<L> {
    match field_type {
        FieldType::Base(BaseType::Long) => Instruction::LConst(0),
        FieldType::Base(BaseType::Float) => Instruction::FConst(0.0),
        FieldType::Base(BaseType::Double) => Instruction::DConst(0.0),
        FieldType::Base(_) => Instruction::IConst(0),
        FieldType::Ref(_) => Instruction::AConstNull,
    }
}

/// Is the type a box class (`java/lang/Integer` etc.)?
pub fn is_box(class: &BinaryName) -> bool {
    BaseType::unboxed_from(class).is_some()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::CachingResolver;

    fn convert(from: Option<&str>, to: Option<&str>) -> Result<Vec<Instruction>, Error> {
        use crate::jvm::ParseDescriptor;

        let from = from.map(|desc| FieldType::parse(desc).unwrap());
        let to = to.map(|desc| FieldType::parse(desc).unwrap());
        let resolver = CachingResolver::builtin();
        conversion(from.as_ref(), to.as_ref(), &resolver, &Context::default())
    }

    fn mnemonics(code: Vec<Instruction>) -> Vec<&'static str> {
        code.iter().map(|insn| insn.mnemonic()).collect()
    }

    #[test]
    fn primitives() {
        assert_eq!(mnemonics(convert(Some("I"), Some("J")).unwrap()), ["i2l"]);
        assert_eq!(mnemonics(convert(Some("J"), Some("B")).unwrap()), ["l2i", "i2b"]);
        assert_eq!(mnemonics(convert(Some("C"), Some("I")).unwrap()), Vec::<&str>::new());
        assert_eq!(mnemonics(convert(Some("Z"), Some("I")).unwrap()), Vec::<&str>::new());
        assert_eq!(mnemonics(convert(Some("D"), Some("F")).unwrap()), ["d2f"]);
    }

    #[test]
    fn boxing() {
        let code = convert(Some("I"), Some("Ljava/lang/Object;")).unwrap();
        assert!(matches!(&code[..], [Instruction::Invoke(InvokeType::Static, method)]
            if method.class == RefType::Object(BinaryName::INTEGER)
                && method.name == UnqualifiedName::VALUEOF));

        // boxing into a different box converts first
        let code = convert(Some("I"), Some("Ljava/lang/Long;")).unwrap();
        assert_eq!(mnemonics(code), ["i2l", "invokestatic"]);

        assert!(convert(Some("I"), Some("Ljava/lang/String;")).is_err());
        assert!(convert(Some("I"), Some("[I")).is_err());
    }

    #[test]
    fn unboxing() {
        let code = convert(Some("Ljava/lang/Integer;"), Some("J")).unwrap();
        assert_eq!(mnemonics(code), ["invokevirtual", "i2l"]);

        let code = convert(Some("Ljava/lang/Object;"), Some("I")).unwrap();
        assert!(matches!(
            &code[..],
            [
                Instruction::CheckCast(RefType::Object(class)),
                Instruction::Invoke(InvokeType::Virtual, method),
            ] if class == &BinaryName::INTEGER && method.name == UnqualifiedName::INTVALUE
        ));
    }

    #[test]
    fn references() {
        let widen = convert(Some("Ljava/lang/String;"), Some("Ljava/lang/Object;"));
        assert!(widen.unwrap().is_empty());
        let widen = convert(Some("Ljava/lang/Integer;"), Some("Ljava/lang/Number;"));
        assert!(widen.unwrap().is_empty());
        let code = convert(Some("Ljava/lang/Object;"), Some("Ljava/lang/String;")).unwrap();
        assert_eq!(code, vec![Instruction::CheckCast(RefType::STRING)]);
    }

    #[test]
    fn missing_values() {
        assert_eq!(convert(Some("J"), None).unwrap(), vec![Instruction::Pop2]);
        assert_eq!(convert(Some("Ljava/lang/String;"), None).unwrap(), vec![Instruction::Pop]);
        assert_eq!(convert(None, Some("I")).unwrap(), vec![Instruction::IConst(0)]);
        assert_eq!(
            convert(None, Some("Ljava/lang/Object;")).unwrap(),
            vec![Instruction::AConstNull]
        );
        assert!(convert(None, None).unwrap().is_empty());
    }
}

use crate::jvm::class_file::{
    ClassConstantIndex, ConstantsPool, ConstantsWriter, Deserialize, Serialize,
};
use crate::jvm::{BaseType, BinaryName, Error, FieldType, RefType};
use crate::util::Width;
use byteorder::{ReadBytesExt, WriteBytesExt};

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable value (an unset local, the second half of a `long` or `double`, or the result of
    /// merging incompatible types)
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called by `<init>` has not been called
    ///
    ///   - during analysis, we use `usize` for `U`: the index of the `new` instruction (the type
    ///     that will be initialized is the operand of that instruction)
    ///   - when serializing into a classfile, we use `u16` for `U`, corresponding to the offset of
    ///     the `new` instruction from the start of the method body
    Uninitialized(U),
}

/// Type used during flow analysis
pub type VType = VerificationType<RefType, usize>;

/// Type as it appears in a `StackMapTable`
pub type SerializableVerificationType = VerificationType<ClassConstantIndex, u16>;

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    /// Is this a reference to an object whose constructor has run (or `null`)?
    pub fn is_initialized_reference(&self) -> bool {
        matches!(self, VerificationType::Null | VerificationType::Object(_))
    }
}

impl<C, U> From<FieldType<C>> for VerificationType<RefType<C>, U> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl VType {
    /// Object type for a class name
    pub fn object(class: BinaryName) -> VType {
        VerificationType::Object(RefType::Object(class))
    }

    /// Resolve the type into its serializable form
    ///
    /// `offsets` maps instruction indices to bytecode offsets.
    pub fn into_serializable(
        &self,
        constants: &mut ConstantsPool,
        offsets: &[usize],
    ) -> Result<SerializableVerificationType, Error> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(ref_type) => {
                VerificationType::Object(ref_type.constant_index(constants)?)
            }
            VerificationType::Uninitialized(index) => {
                let offset = offsets
                    .get(*index)
                    .copied()
                    .ok_or(Error::InvalidJumpTarget(*index))?;
                VerificationType::Uninitialized(offset as u16)
            }
        })
    }
}

impl Serialize for SerializableVerificationType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for SerializableVerificationType {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(match u8::deserialize(reader)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex::deserialize(reader)?),
            8 => VerificationType::Uninitialized(u16::deserialize(reader)?),
            tag => {
                return Err(Error::MalformedCode {
                    offset: 0,
                    message: format!("invalid verification type tag {}", tag),
                })
            }
        })
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantIndex;

    #[test]
    fn field_types_to_verification_types() {
        assert_eq!(VType::from(FieldType::boolean()), VerificationType::Integer);
        assert_eq!(VType::from(FieldType::long()), VerificationType::Long);
        assert_eq!(
            VType::from(FieldType::object(BinaryName::STRING)),
            VType::object(BinaryName::STRING)
        );
        assert_eq!(VType::from(FieldType::double()).width(), 2);
    }

    #[test]
    fn serialized_tags() {
        let mut bytes = vec![];
        let types: [SerializableVerificationType; 3] = [
            VerificationType::Top,
            VerificationType::Object(ClassConstantIndex(ConstantIndex(7))),
            VerificationType::Uninitialized(300),
        ];
        for typ in &types {
            typ.serialize(&mut bytes).unwrap();
        }
        assert_eq!(bytes, vec![0, 7, 0, 7, 8, 1, 44]);

        let mut reader = bytes.as_slice();
        for typ in &types {
            assert_eq!(&SerializableVerificationType::deserialize(&mut reader).unwrap(), typ);
        }
    }
}

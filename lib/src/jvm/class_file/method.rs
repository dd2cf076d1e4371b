use crate::jvm::class_file::{
    Attribute, Code, ConstantsPool, Deserialize, Serialize, Utf8ConstantIndex,
};
use crate::jvm::{Error, MethodAccessFlags};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    /// Decode the `Code` attribute, if there is one
    pub fn code(&self, constants: &ConstantsPool) -> Result<Option<Code>, Error> {
        Attribute::find::<Code>(&self.attributes, constants)
    }

    /// Swap out the `Code` attribute (other attributes stay where they are)
    pub fn replace_code(&mut self, code: Attribute, constants: &ConstantsPool) {
        match self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.is::<Code>(constants))
        {
            Some(existing) => *existing = code,
            None => self.attributes.push(code),
        }
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Method {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(Method {
            access_flags: MethodAccessFlags::deserialize(reader)?,
            name_index: Utf8ConstantIndex::deserialize(reader)?,
            descriptor_index: Utf8ConstantIndex::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

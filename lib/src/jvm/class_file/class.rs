use crate::jvm::class_file::{
    Attribute, BootstrapMethods, ClassConstantIndex, Constant, ConstantsPool,
    ConstantsReader, Deserialize, Field, Method, Serialize, Version,
};
use crate::jvm::descriptors::ParseDescriptor;
use crate::jvm::{BinaryName, ClassAccessFlags, Error, MethodDescriptor, UnqualifiedName};
use crate::jvm::names::Name;
use crate::util::OffsetVec;
use byteorder::WriteBytesExt;
use std::fs;
use std::path::Path;

/// Representation of the [`class` file format of the JVM][0]
///
/// The constants are held in a [`ConstantsPool`] so that a parsed class can have new constants
/// appended to it without disturbing any existing index.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: ClassConstantIndex,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Parse a class file from its bytes
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = bytes;
        let magic = u32::deserialize(&mut reader)?;
        if magic != u32::from_be_bytes(ClassFile::MAGIC) {
            return Err(Error::BadMagic(magic));
        }
        let version = Version::deserialize(&mut reader)?;
        let constants = OffsetVec::<Constant>::deserialize(&mut reader)?;
        let access_flags = ClassAccessFlags::deserialize(&mut reader)?;
        let this_class = ClassConstantIndex::deserialize(&mut reader)?;
        let super_class = ClassConstantIndex::deserialize(&mut reader)?;
        let interfaces = Vec::deserialize(&mut reader)?;
        let fields = Vec::deserialize(&mut reader)?;
        let methods = Vec::deserialize(&mut reader)?;
        let attributes: Vec<Attribute> = Vec::deserialize(&mut reader)?;

        let mut constants = ConstantsPool::from_existing(constants, vec![]);
        if let Some(BootstrapMethods(bootstrap_methods)) =
            Attribute::find::<BootstrapMethods>(&attributes, &constants)?
        {
            constants.seed_bootstrap_methods(bootstrap_methods);
        }

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Name of the class
    pub fn this_class_name(&self) -> Result<BinaryName, Error> {
        BinaryName::from_constant_index(self.this_class, &self.constants)
    }

    /// Name of the super class (`None` only for `java/lang/Object`)
    pub fn super_class_name(&self) -> Result<Option<BinaryName>, Error> {
        if self.super_class.0 .0 == 0 {
            Ok(None)
        } else {
            BinaryName::from_constant_index(self.super_class, &self.constants).map(Some)
        }
    }

    /// Names of the directly implemented interfaces
    pub fn interface_names(&self) -> Result<Vec<BinaryName>, Error> {
        self.interfaces
            .iter()
            .map(|interface| BinaryName::from_constant_index(*interface, &self.constants))
            .collect()
    }

    /// Name and descriptor of a method
    pub fn method_signature(
        &self,
        method: &Method,
    ) -> Result<(UnqualifiedName, MethodDescriptor), Error> {
        let name = self.constants.utf8(method.name_index)?;
        let descriptor = self.constants.utf8(method.descriptor_index)?;
        Ok((
            UnqualifiedName::from_string(name.to_owned()).map_err(Error::BadDescriptor)?,
            MethodDescriptor::parse_class_file(descriptor)?,
        ))
    }

    /// Make sure the `BootstrapMethods` attribute reflects the pool's bootstrap table
    ///
    /// The attribute is left untouched unless new bootstrap methods were added, so classes whose
    /// call sites all already existed keep their attribute bytes.
    pub fn sync_bootstrap_methods(&mut self) -> Result<(), Error> {
        if !self.constants.added_bootstrap_methods() {
            return Ok(());
        }
        let table = BootstrapMethods(self.constants.bootstrap_methods().to_vec());
        let attribute = self.constants.get_attribute(table)?;
        let constants = &self.constants;
        match self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.is::<BootstrapMethods>(constants))
        {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        Ok(())
    }

    /// Serialize the class (after syncing the bootstrap methods)
    pub fn into_bytes(mut self) -> Result<Vec<u8>, Error> {
        self.sync_bootstrap_methods()?;
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut class_file = fs::File::create(path)?;
        self.serialize(&mut class_file)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.constants().serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0xCA, 0xFE, 0xD0, 0x0D, 0, 0, 0, 52];
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::BadMagic(0xCAFED00D))
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0, 0];
        assert!(ClassFile::parse(&bytes).is_err());
    }
}

use crate::jvm::class_file::{annotation_types, ClassFile};
use crate::jvm::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, ParseDescriptor, RefType, UnqualifiedName,
};

/// Structural information about a class, without any code
///
/// This is all that is needed to answer questions about classes that are referenced but not
/// transformed: their supertypes, which members they declare, and which annotations those members
/// carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetadata {
    pub name: BinaryName,

    /// `None` only for `java/lang/Object`
    pub super_class: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
    pub access_flags: ClassAccessFlags,
    pub fields: Vec<FieldMetadata>,
    pub methods: Vec<MethodMetadata>,
    pub annotations: Vec<BinaryName>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetadata {
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
    pub access_flags: FieldAccessFlags,
    pub annotations: Vec<BinaryName>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodMetadata {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub annotations: Vec<BinaryName>,
}

impl ClassMetadata {
    /// Extract the metadata from a parsed class file
    pub fn from_class_file(class: &ClassFile) -> Result<ClassMetadata, Error> {
        let constants = &class.constants;

        let mut fields = vec![];
        for field in &class.fields {
            let name = constants.utf8(field.name_index)?;
            fields.push(FieldMetadata {
                name: UnqualifiedName::from_string(name.to_owned()).map_err(Error::BadDescriptor)?,
                descriptor: FieldType::parse_class_file(constants.utf8(field.descriptor_index)?)?,
                access_flags: field.access_flags,
                annotations: annotation_names(annotation_types(&field.attributes, constants)?)?,
            });
        }

        let mut methods = vec![];
        for method in &class.methods {
            let (name, descriptor) = class.method_signature(method)?;
            methods.push(MethodMetadata {
                name,
                descriptor,
                access_flags: method.access_flags,
                annotations: annotation_names(annotation_types(&method.attributes, constants)?)?,
            });
        }

        Ok(ClassMetadata {
            name: class.this_class_name()?,
            super_class: class.super_class_name()?,
            interfaces: class.interface_names()?,
            access_flags: class.access_flags,
            fields,
            methods,
            annotations: annotation_names(annotation_types(&class.attributes, constants)?)?,
        })
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    /// Find a method declared directly on this class
    pub fn method(
        &self,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<&MethodMetadata> {
        self.methods
            .iter()
            .find(|method| &method.name == name && &method.descriptor == descriptor)
    }

    /// Find a field declared directly on this class
    pub fn field(&self, name: &UnqualifiedName) -> Option<&FieldMetadata> {
        self.fields.iter().find(|field| &field.name == name)
    }
}

impl MethodMetadata {
    pub fn has_annotation(&self, annotation: &BinaryName) -> bool {
        self.annotations.contains(annotation)
    }
}

impl FieldMetadata {
    pub fn has_annotation(&self, annotation: &BinaryName) -> bool {
        self.annotations.contains(annotation)
    }
}

/// Annotation types are stored as field descriptors (eg. `Lme/alec/Lambda;`)
fn annotation_names(descriptors: Vec<&str>) -> Result<Vec<BinaryName>, Error> {
    descriptors
        .into_iter()
        .map(|descriptor| match FieldType::parse_class_file(descriptor)? {
            FieldType::Ref(RefType::Object(name)) => Ok(name),
            _ => Err(Error::BadDescriptor(format!(
                "annotation type {} is not a class",
                descriptor
            ))),
        })
        .collect()
}

//! Build new classes from symbolic members
//!
//! Members are collected symbolically and only turned into constant pool entries when the class is
//! built. Methods with code go through [`MethodUnit::assemble`], so frames and stack sizes are
//! computed against a resolver that also knows about the class being built.

use crate::jvm::class_file::{
    Annotation, Attribute, ClassFile, ConstantsPool, ConstantsWriter, Field, Method,
    RuntimeInvisibleAnnotations, Version,
};
use crate::jvm::class_graph::{
    ClassMetadata, FieldMetadata, MethodMetadata, OverlayResolver, TypeResolver,
};
use crate::jvm::code::{BuiltCode, MethodUnit};
use crate::jvm::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, RenderDescriptor, UnqualifiedName,
};

pub struct ClassBuilder {
    /// Class file version
    version: Version,

    /// Class access flags
    access_flags: ClassAccessFlags,

    /// Class name
    this_class: BinaryName,

    /// Superclass name
    super_class: BinaryName,

    /// Implemented interfaces
    interfaces: Vec<BinaryName>,

    /// Fields
    fields: Vec<FieldMetadata>,

    /// Methods, along with their code (`None` for abstract methods)
    methods: Vec<(MethodMetadata, Option<BuiltCode>)>,
}

impl ClassBuilder {
    /// Create a new class builder
    pub fn new(
        this_class: BinaryName,
        super_class: BinaryName,
        access_flags: ClassAccessFlags,
    ) -> ClassBuilder {
        ClassBuilder {
            version: Version::JAVA8,
            access_flags,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn class_name(&self) -> &BinaryName {
        &self.this_class
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn add_interface(&mut self, interface: BinaryName) {
        self.interfaces.push(interface);
    }

    /// Add a field to the class
    pub fn add_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: UnqualifiedName,
        descriptor: FieldType,
    ) {
        self.add_annotated_field(access_flags, name, descriptor, vec![]);
    }

    /// Add a field with (element-less) annotations to the class
    pub fn add_annotated_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: UnqualifiedName,
        descriptor: FieldType,
        annotations: Vec<BinaryName>,
    ) {
        self.fields.push(FieldMetadata {
            name,
            descriptor,
            access_flags,
            annotations,
        });
    }

    /// Add a method to the class
    pub fn add_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        code: Option<BuiltCode>,
    ) {
        self.add_annotated_method(access_flags, name, descriptor, code, vec![]);
    }

    /// Add a method with (element-less) annotations to the class
    pub fn add_annotated_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        code: Option<BuiltCode>,
        annotations: Vec<BinaryName>,
    ) {
        let method = MethodMetadata {
            name,
            descriptor,
            access_flags,
            annotations,
        };
        self.methods.push((method, code));
    }

    /// Does the class already have a method with this name and descriptor?
    pub fn has_method(&self, name: &UnqualifiedName, descriptor: &MethodDescriptor) -> bool {
        self.methods
            .iter()
            .any(|(method, _)| &method.name == name && &method.descriptor == descriptor)
    }

    /// Structural view of the class, as it will be once built
    pub fn metadata(&self) -> ClassMetadata {
        ClassMetadata {
            name: self.this_class.clone(),
            super_class: Some(self.super_class.clone()),
            interfaces: self.interfaces.clone(),
            access_flags: self.access_flags,
            fields: self.fields.clone(),
            methods: self.methods.iter().map(|(method, _)| method.clone()).collect(),
            annotations: vec![],
        }
    }

    /// Assemble all of the methods and produce the class file
    pub fn build(&self, resolver: &dyn TypeResolver) -> Result<ClassFile, Error> {
        let overlay = OverlayResolver::new(resolver);
        overlay.add(self.metadata());

        let mut constants = ConstantsPool::new();
        let this_class = self.this_class.constant_index(&mut constants)?;
        let super_class = self.super_class.constant_index(&mut constants)?;
        let interfaces = self
            .interfaces
            .iter()
            .map(|interface| interface.constant_index(&mut constants))
            .collect::<Result<Vec<_>, Error>>()?;

        let mut fields = vec![];
        for field in &self.fields {
            fields.push(Field {
                access_flags: field.access_flags,
                name_index: constants.get_utf8(field.name.as_str())?,
                descriptor_index: constants.get_utf8(field.descriptor.render())?,
                attributes: annotation_attributes(&field.annotations, &mut constants)?,
            });
        }

        let mut methods = vec![];
        for (method, code) in &self.methods {
            let mut attributes = vec![];
            if let Some(code) = code {
                let unit = MethodUnit::from_built(
                    self.this_class.clone(),
                    method.access_flags,
                    method.name.clone(),
                    method.descriptor.clone(),
                    code.clone(),
                );
                let code = unit.assemble(&mut constants, &overlay, self.version)?;
                attributes.push(constants.get_attribute(code)?);
            }
            attributes.extend(annotation_attributes(&method.annotations, &mut constants)?);
            methods.push(Method {
                access_flags: method.access_flags,
                name_index: constants.get_utf8(method.name.as_str())?,
                descriptor_index: constants.get_utf8(method.descriptor.render())?,
                attributes,
            });
        }

        Ok(ClassFile {
            version: self.version,
            constants,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes: vec![],
        })
    }

    /// Build the class and serialize it
    pub fn build_bytes(&self, resolver: &dyn TypeResolver) -> Result<Vec<u8>, Error> {
        self.build(resolver)?.into_bytes()
    }
}

fn annotation_attributes(
    annotations: &[BinaryName],
    constants: &mut ConstantsPool,
) -> Result<Vec<Attribute>, Error> {
    if annotations.is_empty() {
        return Ok(vec![]);
    }
    let annotations = annotations
        .iter()
        .map(|annotation| {
            let descriptor = FieldType::object(annotation.clone()).render();
            Ok(Annotation {
                type_index: constants.get_utf8(descriptor)?,
                elements: vec![],
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(vec![
        constants.get_attribute(RuntimeInvisibleAnnotations(annotations))?
    ])
}

//! Static accessors for private members that closure bodies use
//!
//! A body moved into a synthesized class can no longer touch the private members of the class
//! it came from. Each such access is redirected through a package-private static `access$N`
//! method added to the original class, taking the same operands off the stack as the access it
//! replaces.

use super::{Context, Error};
use crate::jvm;
use crate::jvm::class_file::{ClassFile, Method};
use crate::jvm::class_graph::{ClassMetadata, TypeResolver};
use crate::jvm::code::{
    BuiltCode, CodeBuilder, FieldRef, Instruction, InvokeType, Label, LocalKind, MethodRef,
    MethodUnit,
};
use crate::jvm::{
    BinaryName, FieldAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, Name, RefType,
    RenderDescriptor, UnqualifiedName,
};
use crate::util::Width;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Member access that needs an accessor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Access {
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef),
}

/// Accessor method to add to the class being woven
#[derive(Debug, Clone)]
pub struct Bridge {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub code: BuiltCode,
}

/// Accessors needed by the closures of one class, memoized by the member accessed
pub struct Bridges {
    owner: BinaryName,
    private_fields: HashSet<UnqualifiedName>,
    private_methods: HashSet<(UnqualifiedName, MethodDescriptor)>,
    taken_names: HashSet<UnqualifiedName>,
    next_index: usize,
    accessors: HashMap<Access, usize>,
    bridges: Vec<Bridge>,
}

impl Bridges {
    pub fn new(owner: &ClassMetadata) -> Bridges {
        let private_fields = owner
            .fields
            .iter()
            .filter(|field| field.access_flags.contains(FieldAccessFlags::PRIVATE))
            .map(|field| field.name.clone())
            .collect();
        let private_methods = owner
            .methods
            .iter()
            .filter(|method| method.access_flags.contains(MethodAccessFlags::PRIVATE))
            .map(|method| (method.name.clone(), method.descriptor.clone()))
            .collect();
        Bridges {
            owner: owner.name.clone(),
            private_fields,
            private_methods,
            taken_names: owner.methods.iter().map(|method| method.name.clone()).collect(),
            next_index: 0,
            accessors: HashMap::new(),
            bridges: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }

    fn is_private_field(&self, field: &FieldRef) -> bool {
        field.class == self.owner && self.private_fields.contains(&field.name)
    }

    fn is_private_method(&self, method: &MethodRef) -> bool {
        method.class == RefType::Object(self.owner.clone())
            && self
                .private_methods
                .contains(&(method.name.clone(), method.descriptor.clone()))
    }

    /// Accessor to call instead of an instruction moved out of the owner class
    ///
    /// Returns `None` if the instruction can stay as it is.
    pub fn redirect(
        &mut self,
        insn: &Instruction,
        context: &Context,
    ) -> Result<Option<MethodRef>, Error> {
        let access = match insn {
            Instruction::GetStatic(field) if self.is_private_field(field) => {
                Access::GetStatic(field.clone())
            }
            Instruction::PutStatic(field) if self.is_private_field(field) => {
                Access::PutStatic(field.clone())
            }
            Instruction::GetField(field) if self.is_private_field(field) => {
                Access::GetField(field.clone())
            }
            Instruction::PutField(field) if self.is_private_field(field) => {
                Access::PutField(field.clone())
            }
            Instruction::Invoke(InvokeType::Special, method) if method.is_init() => {
                if self.is_private_method(method) {
                    return Err(Error::malformed(
                        context,
                        format!("private constructor of {} called inside a lambda", self.owner),
                    ));
                }
                return Ok(None);
            }
            Instruction::Invoke(InvokeType::Special, method) => {
                if !self.is_private_method(method) {
                    return Err(Error::malformed(
                        context,
                        format!(
                            "super call to {}.{} inside a lambda",
                            method.class.class_info_name(),
                            method.name
                        ),
                    ));
                }
                Access::Invoke(InvokeType::Special, method.clone())
            }
            Instruction::Invoke(invoke_type, method) if self.is_private_method(method) => {
                Access::Invoke(*invoke_type, method.clone())
            }
            _ => return Ok(None),
        };

        let index = match self.accessors.get(&access) {
            Some(index) => *index,
            None => {
                let bridge = self.make_bridge(&access, context)?;
                debug!("Accessor {}.{} for {:?}", self.owner, bridge.name, access);
                self.bridges.push(bridge);
                self.accessors.insert(access, self.bridges.len() - 1);
                self.bridges.len() - 1
            }
        };
        let bridge = &self.bridges[index];
        Ok(Some(MethodRef {
            class: RefType::Object(self.owner.clone()),
            name: bridge.name.clone(),
            descriptor: bridge.descriptor.clone(),
            is_interface: false,
        }))
    }

    fn fresh_name(&mut self) -> Result<UnqualifiedName, Error> {
        loop {
            let name = UnqualifiedName::from_string(format!("access${}", self.next_index))
                .map_err(Error::InvalidSettings)?;
            self.next_index += 1;
            if self.taken_names.insert(name.clone()) {
                return Ok(name);
            }
        }
    }

    fn make_bridge(&mut self, access: &Access, context: &Context) -> Result<Bridge, Error> {
        let owner = FieldType::object(self.owner.clone());
        let (parameters, return_type, target): (
            Vec<FieldType>,
            Option<FieldType>,
            Instruction<Label>,
        ) = match access {
            Access::GetStatic(field) => (
                vec![],
                Some(field.descriptor.clone()),
                Instruction::GetStatic(field.clone()),
            ),
            Access::PutStatic(field) => (
                vec![field.descriptor.clone()],
                None,
                Instruction::PutStatic(field.clone()),
            ),
            Access::GetField(field) => (
                vec![owner],
                Some(field.descriptor.clone()),
                Instruction::GetField(field.clone()),
            ),
            Access::PutField(field) => (
                vec![owner, field.descriptor.clone()],
                None,
                Instruction::PutField(field.clone()),
            ),
            Access::Invoke(invoke_type, method) => {
                let mut parameters = vec![];
                if *invoke_type != InvokeType::Static {
                    parameters.push(owner);
                }
                parameters.extend(method.descriptor.parameters.iter().cloned());
                (
                    parameters,
                    method.descriptor.return_type.clone(),
                    Instruction::Invoke(*invoke_type, method.clone()),
                )
            }
        };

        let mut code = CodeBuilder::new();
        let mut slot: u16 = 0;
        for parameter in &parameters {
            code.push(Instruction::Load(LocalKind::of(parameter), slot));
            slot += parameter.width() as u16;
        }
        code.push(target);
        code.push(Instruction::Return(return_type.as_ref().map(LocalKind::of)));

        Ok(Bridge {
            name: self.fresh_name()?,
            descriptor: MethodDescriptor {
                parameters,
                return_type,
            },
            code: code.finish().map_err(|err| Error::from_jvm(context, err))?,
        })
    }

    /// Assemble the accessors and add them to the class
    pub fn install(
        &self,
        class: &mut ClassFile,
        resolver: &dyn TypeResolver,
        context: &Context,
    ) -> Result<(), Error> {
        for bridge in &self.bridges {
            let method = assemble_bridge(bridge, &self.owner, class, resolver)
                .map_err(|err| Error::from_jvm(context, err))?;
            class.methods.push(method);
        }
        Ok(())
    }
}

fn assemble_bridge(
    bridge: &Bridge,
    owner: &BinaryName,
    class: &mut ClassFile,
    resolver: &dyn TypeResolver,
) -> Result<Method, jvm::Error> {
    let access_flags = MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC;
    let unit = MethodUnit::from_built(
        owner.clone(),
        access_flags,
        bridge.name.clone(),
        bridge.descriptor.clone(),
        bridge.code.clone(),
    );
    let code = unit.assemble(&mut class.constants, resolver, class.version)?;
    let code = class.constants.get_attribute(code)?;
    Ok(Method {
        access_flags,
        name_index: class.constants.get_utf8(bridge.name.as_str())?,
        descriptor_index: class.constants.get_utf8(bridge.descriptor.render())?,
        attributes: vec![code],
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::FieldMetadata;
    use crate::jvm::class_graph::MethodMetadata;
    use crate::jvm::ParseDescriptor;
    use crate::weave::fixtures::*;

    fn owner() -> ClassMetadata {
        ClassMetadata {
            name: demo(),
            super_class: Some(BinaryName::OBJECT),
            interfaces: vec![],
            access_flags: crate::jvm::ClassAccessFlags::PUBLIC,
            fields: vec![FieldMetadata {
                name: name("secret"),
                descriptor: FieldType::long(),
                access_flags: FieldAccessFlags::PRIVATE,
                annotations: vec![],
            }],
            methods: vec![
                MethodMetadata {
                    name: name("helper"),
                    descriptor: MethodDescriptor::parse("(I)I").unwrap(),
                    access_flags: MethodAccessFlags::PRIVATE,
                    annotations: vec![],
                },
                MethodMetadata {
                    name: name("access$0"),
                    descriptor: MethodDescriptor::parse("()V").unwrap(),
                    access_flags: MethodAccessFlags::STATIC,
                    annotations: vec![],
                },
            ],
            annotations: vec![],
        }
    }

    fn secret() -> FieldRef {
        FieldRef {
            class: demo(),
            name: name("secret"),
            descriptor: FieldType::long(),
        }
    }

    #[test]
    fn private_fields_get_accessors() {
        let mut bridges = Bridges::new(&owner());
        let context = Context::default();
        let getter = bridges
            .redirect(&Instruction::GetField(secret()), &context)
            .unwrap()
            .unwrap();
        // `access$0` is already taken
        assert_eq!(getter.name.as_str(), "access$1");
        assert_eq!(getter.descriptor.render(), "(Lme/alec/Demo;)J");

        let again = bridges.redirect(&Instruction::GetField(secret()), &context).unwrap();
        assert_eq!(again, Some(getter));

        let setter = bridges
            .redirect(&Instruction::PutField(secret()), &context)
            .unwrap()
            .unwrap();
        assert_eq!(setter.descriptor.render(), "(Lme/alec/Demo;J)V");
        assert_eq!(bridges.bridges().len(), 2);
        assert_eq!(
            bridges.bridges()[1].code.instructions,
            vec![
                Instruction::Load(LocalKind::Reference, 0),
                Instruction::Load(LocalKind::Long, 1),
                Instruction::PutField(secret()),
                Instruction::Return(None),
            ]
        );
    }

    #[test]
    fn private_methods_get_accessors() {
        let mut bridges = Bridges::new(&owner());
        let helper = method_ref("me/alec/Demo", "helper", "(I)I");
        let accessor = bridges
            .redirect(
                &Instruction::Invoke(InvokeType::Virtual, helper.clone()),
                &Context::default(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(accessor.descriptor.render(), "(Lme/alec/Demo;I)I");

        // public members are left alone
        let public = method_ref("me/alec/Demo", "other", "(I)I");
        let call = Instruction::Invoke(InvokeType::Virtual, public);
        let redirected = bridges.redirect(&call, &Context::default());
        assert_eq!(redirected.unwrap(), None);
    }

    #[test]
    fn super_calls_are_rejected() {
        let mut bridges = Bridges::new(&owner());
        let to_string = method_ref("java/lang/Object", "toString", "()Ljava/lang/String;");
        let err = bridges
            .redirect(&Instruction::Invoke(InvokeType::Special, to_string), &Context::default())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedSite { .. }));

        let init = method_ref("java/lang/Object", "<init>", "()V");
        let call = Instruction::Invoke(InvokeType::Special, init);
        let redirected = bridges.redirect(&call, &Context::default());
        assert_eq!(redirected.unwrap(), None);
    }
}

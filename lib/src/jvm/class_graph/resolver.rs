use crate::jvm::class_file::ClassFile;
use crate::jvm::class_graph::{
    assignable, java_library_class, ClassMetadata, ClassSource, FieldMetadata, InMemoryClasses,
    MethodMetadata,
};
use crate::jvm::{BinaryName, Error, MethodDescriptor, Name, RefType, UnqualifiedName};
use log::trace;

/// Pull-based provider of class metadata
///
/// Implementations are expected to cache: the same class gets resolved many times over.
pub trait TypeResolver {
    /// Get the metadata for a class
    fn resolve(&self, name: &BinaryName) -> Result<&ClassMetadata, Error>;

    /// Superclass chain of a class, starting with the class itself
    fn superclasses(&self, name: &BinaryName) -> Result<Vec<&ClassMetadata>, Error> {
        let mut chain = vec![];
        let mut next = Some(name.clone());
        while let Some(name) = next {
            let class = self.resolve(&name)?;
            next = class.super_class.clone();
            chain.push(class);
        }
        Ok(chain)
    }

    /// Find a method by looking in the class, then its superclasses, then its interfaces
    fn find_method(
        &self,
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Result<Option<(&ClassMetadata, &MethodMetadata)>, Error> {
        let mut to_visit = vec![class.clone()];
        let mut visited = vec![];
        while let Some(class_name) = to_visit.pop() {
            if visited.contains(&class_name) {
                continue;
            }
            let class = self.resolve(&class_name)?;
            if let Some(method) = class.method(name, descriptor) {
                return Ok(Some((class, method)));
            }
            to_visit.extend(class.interfaces.iter().rev().cloned());
            to_visit.extend(class.super_class.iter().cloned());
            visited.push(class_name);
        }
        Ok(None)
    }

    /// Find a field by looking in the class, then its superclasses, then its interfaces
    fn find_field(
        &self,
        class: &BinaryName,
        name: &UnqualifiedName,
    ) -> Result<Option<(&ClassMetadata, &FieldMetadata)>, Error> {
        let mut to_visit = vec![class.clone()];
        let mut visited = vec![];
        while let Some(class_name) = to_visit.pop() {
            if visited.contains(&class_name) {
                continue;
            }
            let class = self.resolve(&class_name)?;
            if let Some(field) = class.field(name) {
                return Ok(Some((class, field)));
            }
            to_visit.extend(class.interfaces.iter().rev().cloned());
            to_visit.extend(class.super_class.iter().cloned());
            visited.push(class_name);
        }
        Ok(None)
    }

    /// Is the first type assignable to the second?
    fn is_assignable(&self, sub_type: &RefType, super_type: &RefType) -> Result<bool, Error> {
        assignable::is_assignable(self, sub_type, super_type)
    }

    /// Closest common superclass of two classes (interfaces are treated like `Object`)
    fn common_superclass(
        &self,
        first: &BinaryName,
        second: &BinaryName,
    ) -> Result<BinaryName, Error> {
        assignable::common_superclass(self, first, second)
    }
}

/// Resolver that parses classes from a [`ClassSource`] on demand
///
/// Parsed metadata is kept for the lifetime of the resolver, so it should be shared across a
/// weaving session (it is `Sync` if the source is). Classes that are missing from the source fall
/// back to the built-in JDK metadata.
pub struct CachingResolver<S> {
    source: S,
    cache: elsa::sync::FrozenMap<BinaryName, Box<ClassMetadata>>,
}

impl<S: ClassSource> CachingResolver<S> {
    pub fn new(source: S) -> CachingResolver<S> {
        CachingResolver {
            source,
            cache: elsa::sync::FrozenMap::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl CachingResolver<InMemoryClasses> {
    /// Resolver that only knows about the built-in JDK classes
    pub fn builtin() -> CachingResolver<InMemoryClasses> {
        CachingResolver::new(InMemoryClasses::new())
    }
}

impl<S: ClassSource> TypeResolver for CachingResolver<S> {
    fn resolve(&self, name: &BinaryName) -> Result<&ClassMetadata, Error> {
        if let Some(metadata) = self.cache.get(name) {
            return Ok(metadata);
        }
        let metadata = match self.source.load(name)? {
            Some(bytes) => {
                trace!("Loading metadata for {}", name);
                ClassMetadata::from_class_file(&ClassFile::parse(&bytes)?)?
            }
            None => java_library_class(name)?
                .ok_or_else(|| Error::MissingClass(name.as_str().to_owned()))?,
        };
        Ok(self.cache.insert(name.clone(), Box::new(metadata)))
    }
}

/// Resolver that adds some extra classes over top of another resolver
///
/// This is used while transforming a class: the class being transformed and the classes being
/// synthesized for it must be visible before they are written anywhere.
pub struct OverlayResolver<'a> {
    base: &'a dyn TypeResolver,
    extra: elsa::FrozenMap<BinaryName, Box<ClassMetadata>>,
}

impl<'a> OverlayResolver<'a> {
    pub fn new(base: &'a dyn TypeResolver) -> OverlayResolver<'a> {
        OverlayResolver {
            base,
            extra: elsa::FrozenMap::new(),
        }
    }

    /// Add (or shadow) a class
    pub fn add(&self, metadata: ClassMetadata) {
        self.extra.insert(metadata.name.clone(), Box::new(metadata));
    }
}

impl<'a> TypeResolver for OverlayResolver<'a> {
    fn resolve(&self, name: &BinaryName) -> Result<&ClassMetadata, Error> {
        match self.extra.get(name) {
            Some(metadata) => Ok(metadata),
            None => self.base.resolve(name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_builder::ClassBuilder;
    use crate::jvm::{ClassAccessFlags, Name};

    #[test]
    fn builtin_fallback_and_caching() {
        let resolver = CachingResolver::builtin();
        let first = resolver.resolve(&BinaryName::INTEGER).unwrap() as *const ClassMetadata;
        let second = resolver.resolve(&BinaryName::INTEGER).unwrap() as *const ClassMetadata;
        assert_eq!(first, second);
        assert!(matches!(
            resolver.resolve(&BinaryName::from_string(String::from("a/Missing")).unwrap()),
            Err(Error::MissingClass(_))
        ));
    }

    #[test]
    fn classes_from_source() {
        let name = BinaryName::from_string(String::from("me/alec/Widget")).unwrap();
        let class = ClassBuilder::new(name.clone(), BinaryName::NUMBER, ClassAccessFlags::PUBLIC);
        let bytes = class.build_bytes(&CachingResolver::builtin()).unwrap();

        let mut source = InMemoryClasses::new();
        source.insert(name.clone(), bytes);
        let resolver = CachingResolver::new(source);
        let chain = resolver.superclasses(&name).unwrap();
        let names: Vec<&str> = chain.iter().map(|class| class.name.as_str()).collect();
        assert_eq!(names, vec!["me/alec/Widget", "java/lang/Number", "java/lang/Object"]);
    }

    #[test]
    fn overlay_shadows_base() {
        let base = CachingResolver::builtin();
        let overlay = OverlayResolver::new(&base);
        let name = BinaryName::from_string(String::from("me/alec/Synthetic")).unwrap();
        assert!(overlay.resolve(&name).is_err());
        overlay.add(ClassMetadata {
            name: name.clone(),
            super_class: Some(BinaryName::OBJECT),
            interfaces: vec![BinaryName::RUNNABLE],
            access_flags: ClassAccessFlags::PUBLIC,
            fields: vec![],
            methods: vec![],
            annotations: vec![],
        });
        assert!(overlay
            .is_assignable(&RefType::Object(name), &RefType::Object(BinaryName::RUNNABLE))
            .unwrap());
    }
}

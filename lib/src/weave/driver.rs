//! Weaving whole class files
//!
//! A class is woven in two passes. The first pass plans every method: sites, captures, abstract
//! methods and closure names. Only once every method has a plan does the second pass synthesize
//! closures and rewrite code, so a class either gets woven entirely or not at all.

use super::{
    analyze_captures, closure_class_names, detect_sites, factory_calls, resolve_sam,
    rewrite_method, synthesize_closure, AnnotationConventions, Bridges, Context, Conventions,
    Error, MethodPlan, Settings, WeaveCache,
};
use crate::jvm::class_builder::ClassBuilder;
use crate::jvm::class_file::ClassFile;
use crate::jvm::class_graph::{ClassMetadata, OverlayResolver, TypeResolver};
use crate::jvm::code::MethodUnit;
use crate::jvm::verifier::FlowAnalysis;
use crate::jvm::BinaryName;
use log::{debug, info};
use std::sync::Arc;

/// Weaves classes for one session
///
/// The resolver must be able to load everything the woven classes refer to (factories, parameter
/// fields, target types). Synthesized classes are recorded in the cache.
pub struct Weaver<'a> {
    settings: Settings,
    resolver: &'a dyn TypeResolver,
    cache: &'a WeaveCache,
    conventions: Box<dyn Conventions + 'a>,
}

/// Result of weaving one class
#[derive(Debug)]
pub struct WeaveOutput {
    pub class_name: BinaryName,

    /// Rewritten class (the input bytes, if there was nothing to weave)
    pub bytes: Vec<u8>,

    /// Closure classes synthesized for the sites of the class
    pub synthesized: Vec<(BinaryName, Arc<[u8]>)>,
}

impl WeaveOutput {
    /// Did the class have any lambda sites?
    pub fn is_woven(&self) -> bool {
        !self.synthesized.is_empty()
    }
}

/// Method with sites, planned but not yet rewritten
struct PlannedMethod {
    /// Index in the class' method table
    index: usize,
    unit: MethodUnit,
    plan: MethodPlan,
    context: Context,
}

/// Bytes of a synthesized closure class
enum Closure {
    /// Already produced earlier in the session
    Cached(Arc<[u8]>),
    Built(Vec<u8>),
}

impl<'a> Weaver<'a> {
    /// Weaver recognizing sites by the annotations in the settings
    pub fn new(
        settings: Settings,
        resolver: &'a dyn TypeResolver,
        cache: &'a WeaveCache,
    ) -> Weaver<'a> {
        let conventions = AnnotationConventions::new(
            settings.factory_annotation.clone(),
            settings.parameter_annotation.clone(),
        );
        Weaver::with_conventions(settings, resolver, cache, Box::new(conventions))
    }

    pub fn with_conventions(
        settings: Settings,
        resolver: &'a dyn TypeResolver,
        cache: &'a WeaveCache,
        conventions: Box<dyn Conventions + 'a>,
    ) -> Weaver<'a> {
        Weaver {
            settings,
            resolver,
            cache,
            conventions,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Bytes of a closure class synthesized earlier in the session
    pub fn synthesized_class(&self, name: &BinaryName) -> Option<Arc<[u8]>> {
        self.cache.get(name)
    }

    /// Weave one class file
    pub fn weave_class(&self, bytes: &[u8]) -> Result<WeaveOutput, Error> {
        let class = ClassFile::parse(bytes)?;
        let class_name = class.this_class_name()?;
        if !self.settings.filter.accepts(&class_name) {
            debug!("Skipping {} (filtered out)", class_name);
            return Ok(WeaveOutput {
                class_name,
                bytes: bytes.to_vec(),
                synthesized: vec![],
            });
        }
        let context = Context::class(class_name.clone());
        self.weave_parsed(class, bytes, class_name)
            .map_err(|err| err.within(&context))
    }

    fn weave_parsed(
        &self,
        mut class: ClassFile,
        input: &[u8],
        class_name: BinaryName,
    ) -> Result<WeaveOutput, Error> {
        let context = Context::class(class_name.clone());
        let jvm_error = |err| Error::from_jvm(&context, err);

        let owner = ClassMetadata::from_class_file(&class).map_err(jvm_error)?;
        let resolver = OverlayResolver::new(self.resolver);
        resolver.add(owner.clone());

        let planned = self.plan_methods(&class, &resolver)?;
        if planned.is_empty() {
            debug!("No lambda sites in {}", class_name);
            return Ok(WeaveOutput {
                class_name,
                bytes: input.to_vec(),
                synthesized: vec![],
            });
        }

        // Closures first, since the rewritten methods construct them
        let version = self.settings.version_for(class.version);
        let mut bridges = Bridges::new(&owner);
        let mut closures: Vec<ClassBuilder> = vec![];
        for method in &planned {
            for index in 0..method.plan.sites.len() {
                let closure = synthesize_closure(
                    &method.unit,
                    &method.plan,
                    index,
                    &mut bridges,
                    &resolver,
                    version,
                    &method.context,
                )?;
                resolver.add(closure.metadata());
                closures.push(closure);
            }
        }

        class.version = version;
        for method in &planned {
            let rewritten = rewrite_method(&method.unit, &method.plan, &method.context)?;
            let code = rewritten
                .assemble(&mut class.constants, &resolver, version)
                .map_err(|err| Error::from_jvm(&method.context, err))?;
            let code = class
                .constants
                .get_attribute(code)
                .map_err(|err| Error::from_jvm(&method.context, err))?;
            class.methods[method.index].replace_code(code, &class.constants);
        }
        bridges.install(&mut class, &resolver, &context)?;
        let bytes = class.into_bytes().map_err(jvm_error)?;

        // Nothing goes in the cache until the whole class has been woven
        let mut built = vec![];
        for closure in &closures {
            let name = closure.class_name().clone();
            let bytes = match self.cache.get(&name) {
                Some(cached) => Closure::Cached(cached),
                None => Closure::Built(closure.build_bytes(&resolver).map_err(|err| {
                    Error::from_jvm(&Context::class(name.clone()), err)
                })?),
            };
            built.push((name, bytes));
        }
        let synthesized: Vec<(BinaryName, Arc<[u8]>)> = built
            .into_iter()
            .map(|(name, bytes)| {
                let bytes = match bytes {
                    Closure::Built(fresh) => self.cache.insert(name.clone(), fresh),
                    Closure::Cached(cached) => cached,
                };
                info!("Synthesized {} ({} bytes)", name, bytes.len());
                (name, bytes)
            })
            .collect();

        info!(
            "Wove {}: {} lambda sites in {} methods, {} accessors",
            class_name,
            synthesized.len(),
            planned.len(),
            bridges.bridges().len()
        );
        Ok(WeaveOutput {
            class_name,
            bytes,
            synthesized,
        })
    }

    /// Plan every method that calls a factory
    fn plan_methods(
        &self,
        class: &ClassFile,
        resolver: &dyn TypeResolver,
    ) -> Result<Vec<PlannedMethod>, Error> {
        let conventions = &*self.conventions;
        let mut planned = vec![];
        let mut next_id = 0;

        for (index, method) in class.methods.iter().enumerate() {
            let unit = match MethodUnit::from_class_method(class, method)? {
                Some(unit) => unit,
                None => continue,
            };
            let context =
                Context::method(unit.owner.clone(), unit.name.clone(), unit.descriptor.clone());
            let calls = factory_calls(&unit, resolver, conventions)
                .map_err(|err| err.within(&context))?;
            if calls.is_empty() {
                continue;
            }

            let plan = self
                .plan_method(&unit, &calls, next_id, resolver, &context)
                .map_err(|err| err.within(&context))?;
            next_id += plan.sites.len();
            planned.push(PlannedMethod {
                index,
                unit,
                plan,
                context,
            });
        }
        Ok(planned)
    }

    fn plan_method(
        &self,
        unit: &MethodUnit,
        calls: &[usize],
        first_id: usize,
        resolver: &dyn TypeResolver,
        context: &Context,
    ) -> Result<MethodPlan, Error> {
        let conventions = &*self.conventions;
        let analysis =
            FlowAnalysis::analyze(unit, resolver).map_err(|err| Error::from_jvm(context, err))?;
        let sites = detect_sites(unit, &analysis, calls, first_id, resolver, conventions, context)?;
        let captures = analyze_captures(unit, &sites, resolver, conventions, context)?;
        let sams = sites
            .iter()
            .map(|site| resolve_sam(site, resolver, &context.at_line(site.line)))
            .collect::<Result<Vec<_>, Error>>()?;
        let class_names = closure_class_names(&sites, &unit.owner, &self.settings)?;
        Ok(MethodPlan {
            sites,
            captures,
            sams,
            class_names,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{BuiltCode, Instruction, InvokeType, LocalKind};
    use crate::jvm::{
        ClassAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
        RefType,
    };
    use crate::weave::fixtures::*;
    use Instruction::*;

    fn static_method(
        class: &mut ClassBuilder,
        method: &str,
        descriptor: &str,
        instructions: Vec<Instruction>,
        end: usize,
    ) {
        class.add_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name(method),
            MethodDescriptor::parse(descriptor).unwrap(),
            Some(BuiltCode {
                instructions,
                local_variables: vec![local("n", FieldType::int(), 0, 0, end)],
                ..BuiltCode::default()
            }),
        );
    }

    /// `me/alec/Demo` with an identity method and, optionally, a method with one site
    fn demo_class(site: Option<(&str, &str, Vec<Instruction>)>) -> Vec<u8> {
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        let mut class = ClassBuilder::new(demo(), BinaryName::OBJECT, flags);
        let identity = vec![Load(LocalKind::Int, 0), Return(Some(LocalKind::Int))];
        static_method(&mut class, "id", "(I)I", identity, 2);
        if let Some((method, descriptor, instructions)) = site {
            let end = instructions.len();
            static_method(&mut class, method, descriptor, instructions, end);
        }
        class.build_bytes(&resolver()).unwrap()
    }

    fn find_method<'c>(class: &'c ClassFile, method: &str) -> &'c crate::jvm::class_file::Method {
        class
            .methods
            .iter()
            .find(|candidate| class.method_signature(candidate).unwrap().0.as_str() == method)
            .unwrap()
    }

    #[test]
    fn classes_without_sites_are_unchanged() {
        let resolver = resolver();
        let cache = WeaveCache::new();
        let weaver = Weaver::new(Settings::default(), &resolver, &cache);

        let input = demo_class(None);
        let output = weaver.weave_class(&input).unwrap();
        assert_eq!(output.class_name, demo());
        assert_eq!(output.bytes, input);
        assert!(!output.is_woven());
        assert!(cache.is_empty());
    }

    #[test]
    fn sites_are_woven_into_closures() {
        let resolver = resolver();
        let cache = WeaveCache::new();
        let weaver = Weaver::new(Settings::default(), &resolver, &cache);

        // return supply(n);
        let input = demo_class(Some((
            "run",
            "(I)Ljava/util/function/IntSupplier;",
            vec![
                Load(LocalKind::Int, 0),
                Invoke(InvokeType::Static, factory("supply")),
                Return(Some(LocalKind::Reference)),
            ],
        )));
        let output = weaver.weave_class(&input).unwrap();
        assert!(output.is_woven());
        let closure: BinaryName = name("me/alec/Demo$IntSupplier$L0$0");
        assert_eq!(output.synthesized.len(), 1);
        assert_eq!(output.synthesized[0].0, closure);
        assert!(cache.contains(&closure));
        assert_eq!(weaver.synthesized_class(&closure), Some(output.synthesized[0].1.clone()));

        let synthesized = ClassFile::parse(&output.synthesized[0].1).unwrap();
        assert_eq!(synthesized.this_class_name().unwrap(), closure);
        assert_eq!(synthesized.interface_names().unwrap(), vec![int_supplier()]);

        let original = ClassFile::parse(&input).unwrap();
        let woven = ClassFile::parse(&output.bytes).unwrap();
        assert_eq!(find_method(&original, "id"), find_method(&woven, "id"));

        let run = MethodUnit::from_class_method(&woven, find_method(&woven, "run"))
            .unwrap()
            .unwrap();
        assert!(run
            .instructions
            .iter()
            .any(|insn| matches!(insn, New(class) if class == &closure)));
        assert!(!run
            .instructions
            .iter()
            .any(|insn| matches!(insn, Invoke(InvokeType::Static, method)
                if method.class == RefType::Object(lib()))));
    }

    #[test]
    fn filtered_classes_are_passed_through() {
        let resolver = resolver();
        let cache = WeaveCache::new();
        let mut settings = Settings::default();
        settings.filter.exclude("me/alec/**");
        let weaver = Weaver::new(settings, &resolver, &cache);

        let input = demo_class(Some((
            "run",
            "(I)Ljava/util/function/IntSupplier;",
            vec![
                Load(LocalKind::Int, 0),
                Invoke(InvokeType::Static, factory("supply")),
                Return(Some(LocalKind::Reference)),
            ],
        )));
        let output = weaver.weave_class(&input).unwrap();
        assert!(!output.is_woven());
        assert_eq!(output.bytes, input);
    }

    #[test]
    fn failures_leave_nothing_behind() {
        let resolver = resolver();
        let cache = WeaveCache::new();
        let weaver = Weaver::new(Settings::default(), &resolver, &cache);

        // `ok` is fine, but `Twice` has two abstract methods taking one argument
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        let mut class = ClassBuilder::new(demo(), BinaryName::OBJECT, flags);
        static_method(
            &mut class,
            "ok",
            "(I)Ljava/util/function/IntSupplier;",
            vec![
                Load(LocalKind::Int, 0),
                Invoke(InvokeType::Static, factory("supply")),
                Return(Some(LocalKind::Reference)),
            ],
            3,
        );
        static_method(
            &mut class,
            "bad",
            "(I)Lme/alec/Twice;",
            vec![
                GetStatic(param_x()),
                Load(LocalKind::Int, 0),
                Invoke(InvokeType::Static, factory("twice")),
                Return(Some(LocalKind::Reference)),
            ],
            4,
        );
        let input = class.build_bytes(&resolver).unwrap();

        let err = weaver.weave_class(&input).unwrap_err();
        match &err {
            Error::UnresolvedSam { context, target, .. } => {
                assert_eq!(target.as_str(), "me/alec/Twice");
                assert_eq!(context.class, Some(demo()));
                assert_eq!(context.method.as_ref().map(|(name, _)| name.as_str()), Some("bad"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(cache.is_empty());
    }
}

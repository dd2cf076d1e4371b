//! Classifying what each lambda site reads and writes from its surroundings
//!
//! Every site gets walked once (its parameter defaults and its body, skipping nested sites). A
//! local variable access is either to a variable declared inside the site, which the closure will
//! keep in a local of its own, or a capture. Parameter field accesses resolve against the site
//! and its ancestors: a parameter of an ancestor is captured like any other variable.
//!
//! Sites are walked innermost first, so that the captures of nested sites can be folded into the
//! site containing them: a nested site is constructed from inside its parent's body, so whatever
//! it captures its parent must either have at hand or capture too.
//!
//! Mutability is a property of the variable, not of the access. Any variable that gets stored to
//! outside of its initialization is mutable, and mutable captures are shared through one element
//! arrays ("boxes") so that every closure and the enclosing method see the same value.

use super::site::LambdaSite;
use super::{Context, Conventions, Error};
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::{FieldRef, Instruction, LocalKind, LocalVariable, MethodUnit};
use crate::jvm::{FieldType, Name, UnqualifiedName};
use crate::util::Width;
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

/// Identity of a variable a closure may capture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableKey {
    /// Local variable or formal parameter of the enclosing method, identified by its slot and the
    /// start of its scope (formal parameters start at 0)
    Local { slot: u16, start: usize },

    /// `this` in an instance method
    This,

    /// Named parameter bound by a site (index into the method's sorted sites)
    Parameter { site: usize, field: FieldRef },
}

/// Where a captured variable comes from
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    OuterLocal,
    OuterParameter,
    ParentParameter,

    /// The enclosing instance, through which the enclosing class' fields are reached
    EnclosingField,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub key: VariableKey,
    pub name: UnqualifiedName,
    pub field_type: FieldType,
    pub origin: Origin,
    pub mutable: bool,
}

impl Capture {
    /// Type of the value handed to the closure (the box, for mutable captures)
    pub fn stored_type(&self) -> FieldType {
        if self.mutable {
            FieldType::array(self.field_type.clone())
        } else {
            self.field_type.clone()
        }
    }
}

/// Captures of one site
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteCaptures {
    /// Captures, in constructor argument order
    pub captures: Vec<Capture>,

    /// Slots of variables declared inside the site, and whether they hold wide values
    pub internal: BTreeMap<u16, bool>,

    /// Own parameters which must be boxed, since a nested site writes to them
    pub boxed_parameters: Vec<FieldRef>,
}

/// Local of the enclosing method that gets replaced by a box
#[derive(Debug, Clone, PartialEq)]
pub struct BoxedLocal {
    pub key: VariableKey,
    pub slot: u16,

    /// Fresh slot holding the box
    pub box_slot: u16,
    pub field_type: FieldType,

    /// Formal parameters are boxed with their incoming value
    pub is_parameter: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodCaptures {
    /// Captures of every site, indexed like the sorted sites
    pub sites: Vec<SiteCaptures>,

    /// Locals of the enclosing method that are boxed from the start of the method
    pub boxes: Vec<BoxedLocal>,
}

impl MethodCaptures {
    pub fn boxed(&self, key: &VariableKey) -> Option<&BoxedLocal> {
        self.boxes.iter().find(|boxed| &boxed.key == key)
    }
}

/// Where an instruction sits, relative to the lambda sites of its method
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Code of the enclosing method proper
    Outside,

    /// Argument of a named parameter of a site
    InCapture { site: usize, parameter: usize },

    /// Body of a site (or its factory call)
    InBody { site: usize },
}

/// Scope of the innermost site containing an index
pub fn scope_at(sites: &[LambdaSite], index: usize) -> Scope {
    // Sorted by start, so the last site containing the index is the innermost one
    let innermost = sites
        .iter()
        .enumerate()
        .filter(|(_, site)| site.contains(index))
        .last();
    match innermost {
        None => Scope::Outside,
        Some((site_index, site)) => {
            match site.parameters.iter().position(|p| p.range.contains(&index)) {
                Some(parameter) => Scope::InCapture {
                    site: site_index,
                    parameter,
                },
                None => Scope::InBody { site: site_index },
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
    Increment,
}

/// Local variable instruction: slot, access, and kind of value
pub fn local_access(insn: &Instruction) -> Option<(u16, Access, LocalKind)> {
    match insn {
        Instruction::Load(kind, slot) => Some((*slot, Access::Load, *kind)),
        Instruction::Store(kind, slot) => Some((*slot, Access::Store, *kind)),
        Instruction::IInc(slot, _) => Some((*slot, Access::Increment, LocalKind::Int)),
        _ => None,
    }
}

/// Same local variable instruction, on another slot
pub fn relocate_local<L>(insn: &Instruction, slot: u16) -> Option<Instruction<L>> {
    match insn {
        Instruction::Load(kind, _) => Some(Instruction::Load(*kind, slot)),
        Instruction::Store(kind, _) => Some(Instruction::Store(*kind, slot)),
        Instruction::IInc(_, by) => Some(Instruction::IInc(slot, *by)),
        _ => None,
    }
}

/// Variable behind a local slot access
#[derive(Debug, Copy, Clone)]
pub enum LocalVar<'a> {
    This,
    Declared(&'a LocalVariable),

    /// Formal parameter without a `LocalVariableTable` entry
    Parameter(u16),
    Unknown,
}

impl<'a> LocalVar<'a> {
    pub fn key(&self) -> Option<VariableKey> {
        match self {
            LocalVar::This => Some(VariableKey::This),
            LocalVar::Declared(var) => Some(VariableKey::Local {
                slot: var.slot,
                start: var.start,
            }),
            LocalVar::Parameter(slot) => Some(VariableKey::Local {
                slot: *slot,
                start: 0,
            }),
            LocalVar::Unknown => None,
        }
    }
}

pub fn local_variable(unit: &MethodUnit, slot: u16, index: usize, access: Access) -> LocalVar<'_> {
    if !unit.is_static() && slot == 0 {
        return LocalVar::This;
    }
    let declared = match access {
        Access::Store => unit.variable_stored_at(slot, index),
        Access::Load | Access::Increment => unit.variable_at(slot, index),
    };
    match declared {
        Some(var) => LocalVar::Declared(var),
        None if slot < unit.parameter_slots() => LocalVar::Parameter(slot),
        None => LocalVar::Unknown,
    }
}

/// Type of the formal parameter in a slot
pub fn parameter_type(unit: &MethodUnit, slot: u16) -> Option<&FieldType> {
    let mut next = if unit.is_static() { 0 } else { 1 };
    for parameter in &unit.descriptor.parameters {
        if next == slot {
            return Some(parameter);
        }
        next += parameter.width() as u16;
    }
    None
}

fn is_formal_parameter(unit: &MethodUnit, slot: u16, start: usize) -> bool {
    start == 0 && slot < unit.parameter_slots()
}

/// Classify the captures of every site in a method
///
/// `sites` must be sorted and linked, as produced by [`super::site::detect_sites`].
pub fn analyze_captures(
    unit: &MethodUnit,
    sites: &[LambdaSite],
    resolver: &dyn TypeResolver,
    conventions: &dyn Conventions,
    context: &Context,
) -> Result<MethodCaptures, Error> {
    if sites.is_empty() {
        return Ok(MethodCaptures::default());
    }
    if !unit.has_local_variable_table && unit.max_locals > 0 {
        return Err(Error::MissingDebugInfo {
            context: context.at_line(sites[0].line),
            message: String::from("method has lambda sites but no local variable table"),
        });
    }

    let store_counts = store_counts(unit);
    let mut walker = Walker {
        unit,
        sites,
        resolver,
        conventions,
        walks: vec![SiteWalk::default(); sites.len()],
        parameter_writes: HashSet::new(),
    };
    for index in (0..sites.len()).rev() {
        let walk = walker.walk_site(index, &context.at_line(sites[index].line))?;
        walker.walks[index] = walk;
    }

    let Walker {
        walks,
        parameter_writes,
        ..
    } = walker;
    let is_mutable = |key: &VariableKey| -> bool {
        match key {
            VariableKey::Parameter { .. } => parameter_writes.contains(key),
            VariableKey::This => store_counts.get(key).is_some(),
            VariableKey::Local { slot, start } => {
                let stores = store_counts.get(key).copied().unwrap_or(0);
                if is_formal_parameter(unit, *slot, *start) {
                    stores >= 1
                } else {
                    stores >= 2
                }
            }
        }
    };

    let mut result = MethodCaptures::default();
    for (index, walk) in walks.into_iter().enumerate() {
        let site = &sites[index];
        let context = context.at_line(site.line);
        let mut site_captures = SiteCaptures {
            captures: walk.captures,
            internal: walk.internal,
            boxed_parameters: vec![],
        };

        for capture in &mut site_captures.captures {
            capture.mutable = is_mutable(&capture.key);
            if capture.mutable && capture.key == VariableKey::This {
                return Err(Error::malformed(&context, "`this` is reassigned and captured"));
            }
        }
        for key in &walk.provided {
            if !is_mutable(key) {
                continue;
            }
            match key {
                VariableKey::Parameter { field, .. } => {
                    site_captures.boxed_parameters.push(field.clone())
                }
                VariableKey::Local { slot, .. } => {
                    return Err(Error::malformed(
                        &context,
                        format!(
                            "local in slot {} is declared and modified inside a lambda, and \
                             captured by a nested lambda",
                            slot
                        ),
                    ))
                }
                VariableKey::This => (),
            }
        }

        // Constructor order: parameters of enclosing sites first
        site_captures
            .captures
            .sort_by_key(|capture| capture.origin != Origin::ParentParameter);

        for capture in &site_captures.captures {
            debug!(
                "Lambda site #{} captures {} ({:?}{})",
                site.id,
                capture.name,
                capture.origin,
                if capture.mutable { ", mutable" } else { "" }
            );
        }
        result.sites.push(site_captures);
    }

    // Box every mutable local of the method that some site captures
    for site_captures in &result.sites {
        for capture in &site_captures.captures {
            let slot = match capture.key {
                VariableKey::Local { slot, .. } if capture.mutable => slot,
                _ => continue,
            };
            if result.boxed(&capture.key).is_some() {
                continue;
            }
            let box_slot = unit
                .max_locals
                .checked_add(result.boxes.len() as u16)
                .ok_or_else(|| {
                    Error::from_jvm(
                        context,
                        crate::jvm::Error::MethodCodeMaxLocalsOverflow(
                            unit.max_locals as usize + result.boxes.len(),
                        ),
                    )
                })?;
            let is_parameter = matches!(
                capture.key,
                VariableKey::Local { slot, start } if is_formal_parameter(unit, slot, start)
            );
            debug!(
                "Boxing {} (slot {}) of {}.{} into slot {}",
                capture.name, slot, unit.owner, unit.name, box_slot
            );
            result.boxes.push(BoxedLocal {
                key: capture.key.clone(),
                slot,
                box_slot,
                field_type: capture.field_type.clone(),
                is_parameter,
            });
        }
    }

    Ok(result)
}

/// Number of stores to each variable, over the whole method
fn store_counts(unit: &MethodUnit) -> HashMap<VariableKey, usize> {
    let mut counts = HashMap::new();
    for (index, insn) in unit.instructions.iter().enumerate() {
        if let Some((slot, access, _)) = local_access(insn) {
            if access == Access::Load {
                continue;
            }
            if let Some(key) = local_variable(unit, slot, index, access).key() {
                *counts.entry(key).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[derive(Debug, Clone, Default)]
struct SiteWalk {
    captures: Vec<Capture>,
    internal: BTreeMap<u16, bool>,

    /// Captures of nested sites that this site supplies from its own parameters and locals
    provided: Vec<VariableKey>,
}

impl SiteWalk {
    fn capture(&mut self, capture: Capture) {
        if !self.captures.iter().any(|other| other.key == capture.key) {
            self.captures.push(capture);
        }
    }

    fn provide(&mut self, key: &VariableKey) {
        if !self.provided.contains(key) {
            self.provided.push(key.clone());
        }
    }

    fn internal(&mut self, slot: u16, wide: bool) {
        *self.internal.entry(slot).or_insert(false) |= wide;
    }
}

struct Walker<'a> {
    unit: &'a MethodUnit,
    sites: &'a [LambdaSite],
    resolver: &'a dyn TypeResolver,
    conventions: &'a dyn Conventions,

    /// Finished walks (filled in from the innermost sites out)
    walks: Vec<SiteWalk>,

    /// Parameters written to from some body
    parameter_writes: HashSet<VariableKey>,
}

impl<'a> Walker<'a> {
    fn walk_site(&mut self, index: usize, context: &Context) -> Result<SiteWalk, Error> {
        let site = &self.sites[index];
        let mut walk = SiteWalk::default();

        for (position, parameter) in site.parameters.iter().enumerate() {
            if let Some(default) = &parameter.default {
                let scope = Scope::InCapture {
                    site: index,
                    parameter: position,
                };
                self.walk_range(&mut walk, index, default.clone(), scope, context)?;
            }
        }
        let scope = Scope::InBody { site: index };
        self.walk_range(&mut walk, index, site.body.clone(), scope, context)?;

        for (position, parameter) in site.parameters.iter().enumerate() {
            if parameter.field.is_none() {
                return Err(Error::malformed(
                    context,
                    format!(
                        "missing binding for parameter #{} of {}",
                        position + 1,
                        site.factory
                    ),
                ));
            }
        }
        Ok(walk)
    }

    fn walk_range(
        &mut self,
        walk: &mut SiteWalk,
        index: usize,
        range: Range<usize>,
        scope: Scope,
        context: &Context,
    ) -> Result<(), Error> {
        let site = &self.sites[index];
        let mut position = range.start;
        while position < range.end {
            let child = (index + 1..self.sites.len()).find(|child| {
                self.sites[*child].parent == Some(index) && self.sites[*child].start() == position
            });
            if let Some(child) = child {
                self.fold_child(walk, index, child);
                position = self.sites[child].end;
                continue;
            }

            let insn = &self.unit.instructions[position];
            let context = context.at_line(self.unit.line_at(position));
            if let Some((slot, access, kind)) = local_access(insn) {
                self.visit_local(walk, site, position, slot, access, kind, &context)?;
            }
            match insn {
                Instruction::GetStatic(field) | Instruction::PutStatic(field) => {
                    let is_write = matches!(insn, Instruction::PutStatic(_));
                    if self
                        .conventions
                        .is_parameter_field(self.resolver, &field.class, &field.name)?
                    {
                        self.visit_parameter(walk, index, field, is_write, scope, &context)?;
                    }
                }
                Instruction::Return(_) => {
                    return Err(Error::malformed(&context, "return inside a lambda"));
                }
                _ => (),
            }
            position += 1;
        }
        Ok(())
    }

    fn fold_child(&self, walk: &mut SiteWalk, index: usize, child: usize) {
        let site = &self.sites[index];
        for capture in &self.walks[child].captures {
            match &capture.key {
                VariableKey::Parameter { site, .. } if *site == index => walk.provide(&capture.key),
                VariableKey::Local { slot, start } if site.declares(*start) => {
                    walk.provide(&capture.key);
                    walk.internal(*slot, capture.field_type.is_wide());
                }
                _ => walk.capture(capture.clone()),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_local(
        &self,
        walk: &mut SiteWalk,
        site: &LambdaSite,
        index: usize,
        slot: u16,
        access: Access,
        kind: LocalKind,
        context: &Context,
    ) -> Result<(), Error> {
        let unit = self.unit;
        match local_variable(unit, slot, index, access) {
            LocalVar::This => walk.capture(Capture {
                key: VariableKey::This,
                name: UnqualifiedName::OUTER_THIS,
                field_type: FieldType::object(unit.owner.clone()),
                origin: Origin::EnclosingField,
                mutable: false,
            }),
            LocalVar::Declared(var) if site.declares(var.start) => {
                if var.end > site.end {
                    return Err(Error::malformed(
                        context,
                        format!(
                            "variable {} is declared inside a lambda but used after it",
                            var.name
                        ),
                    ));
                }
                walk.internal(slot, var.descriptor.is_wide() || kind.width() == 2);
            }
            LocalVar::Declared(var) => {
                let origin = if is_formal_parameter(unit, var.slot, var.start) {
                    Origin::OuterParameter
                } else {
                    Origin::OuterLocal
                };
                walk.capture(Capture {
                    key: VariableKey::Local {
                        slot,
                        start: var.start,
                    },
                    name: var.name.clone(),
                    field_type: var.descriptor.clone(),
                    origin,
                    mutable: false,
                });
            }
            LocalVar::Parameter(slot) => {
                let field_type = parameter_type(unit, slot).cloned().ok_or_else(|| {
                    Error::malformed(
                        context,
                        format!("slot {} is in the middle of a parameter", slot),
                    )
                })?;
                let name = UnqualifiedName::from_string(format!("arg{}", slot))
                    .map_err(Error::InvalidSettings)?;
                walk.capture(Capture {
                    key: VariableKey::Local { slot, start: 0 },
                    name,
                    field_type,
                    origin: Origin::OuterParameter,
                    mutable: false,
                });
            }
            LocalVar::Unknown => {
                let stored_inside = site.range().any(|position| {
                    matches!(
                        local_access(&unit.instructions[position]),
                        Some((stored, Access::Store, _)) if stored == slot
                    )
                });
                if !stored_inside {
                    return Err(Error::MissingDebugInfo {
                        context: context.clone(),
                        message: format!(
                            "no local variable table entry for slot {} at {}",
                            slot, index
                        ),
                    });
                }
                walk.internal(slot, kind.width() == 2);
            }
        }
        Ok(())
    }

    fn visit_parameter(
        &mut self,
        walk: &mut SiteWalk,
        index: usize,
        field: &FieldRef,
        is_write: bool,
        scope: Scope,
        context: &Context,
    ) -> Result<(), Error> {
        let sites = self.sites;
        let binder = std::iter::successors(Some(index), |site| sites[*site].parent)
            .find(|site| sites[*site].binding(field).is_some())
            .ok_or_else(|| Error::malformed(context, format!("unbound parameter {}", field.name)))?;

        let key = VariableKey::Parameter {
            site: binder,
            field: field.clone(),
        };
        if binder == index {
            if let Scope::InCapture { .. } = scope {
                return Err(Error::malformed(
                    context,
                    format!(
                        "parameter {} is used in a default value of its own lambda",
                        field.name
                    ),
                ));
            }
        } else {
            walk.capture(Capture {
                key: key.clone(),
                name: field.name.clone(),
                field_type: field.descriptor.clone(),
                origin: Origin::ParentParameter,
                mutable: false,
            });
        }
        if is_write {
            self.parameter_writes.insert(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{InvokeType, LocalKind};
    use crate::jvm::verifier::FlowAnalysis;
    use crate::weave::fixtures::*;
    use crate::weave::site::{detect_sites, factory_calls};
    use Instruction::*;

    fn analyze(unit: &MethodUnit) -> Result<(Vec<LambdaSite>, MethodCaptures), Error> {
        let resolver = resolver();
        let conventions = conventions();
        let analysis = FlowAnalysis::analyze(unit, &resolver).unwrap();
        let calls = factory_calls(unit, &resolver, &conventions)?;
        let context = Context::default();
        let sites = detect_sites(unit, &analysis, &calls, 0, &resolver, &conventions, &context)?;
        let captures = analyze_captures(unit, &sites, &resolver, &conventions, &context)?;
        Ok((sites, captures))
    }

    /// int sum = 0; IntConsumer add = consume(x, sum += x);
    fn accumulator() -> MethodUnit {
        let mut unit = method(
            "()Ljava/util/function/IntConsumer;",
            vec![
                IConst(0),
                Store(LocalKind::Int, 0),
                GetStatic(param_x()),
                Load(LocalKind::Int, 0),
                GetStatic(param_x()),
                IAdd,
                Dup,
                Store(LocalKind::Int, 0),
                Invoke(InvokeType::Static, factory("consume")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        unit.local_variables.push(local("sum", FieldType::int(), 0, 2, 10));
        unit.max_locals = 1;
        unit
    }

    #[test]
    fn mutable_locals_are_boxed() {
        let (sites, captures) = analyze(&accumulator()).unwrap();
        assert_eq!(sites[0].body, 3..8);
        let site = &captures.sites[0];
        assert_eq!(site.captures.len(), 1);
        let sum = &site.captures[0];
        assert_eq!(sum.name.as_str(), "sum");
        assert_eq!(sum.origin, Origin::OuterLocal);
        assert!(sum.mutable);
        assert_eq!(sum.stored_type(), FieldType::array(FieldType::int()));

        assert_eq!(captures.boxes.len(), 1);
        assert_eq!(captures.boxes[0].box_slot, 1);
        assert!(!captures.boxes[0].is_parameter);
    }

    #[test]
    fn read_only_parameters_are_captured_by_value() {
        // supply(n * 2)
        let mut unit = method(
            "(I)Ljava/util/function/IntSupplier;",
            vec![
                Load(LocalKind::Int, 0),
                IConst(2),
                IMul,
                Invoke(InvokeType::Static, factory("supply")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        unit.local_variables.push(local("n", FieldType::int(), 0, 0, 5));
        let (_, captures) = analyze(&unit).unwrap();
        let n = &captures.sites[0].captures[0];
        assert_eq!(n.origin, Origin::OuterParameter);
        assert!(!n.mutable);
        assert!(captures.boxes.is_empty());
    }

    #[test]
    fn nested_sites_capture_through_their_parent() {
        // supplyObject(fn(y, fn(x, x + y)))... but with the inner site reading the outer parameter
        let unit = method(
            "()Ljava/util/function/IntUnaryOperator;",
            vec![
                GetStatic(param_y()),
                GetStatic(param_x()),
                GetStatic(param_x()),
                GetStatic(param_y()),
                IAdd,
                Invoke(InvokeType::Static, factory("fn")),
                Invoke(InvokeType::Static, factory("fnObject")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let (sites, captures) = analyze(&unit).unwrap();
        assert_eq!(sites[1].parent, Some(0));
        assert!(captures.sites[0].captures.is_empty());
        let inner = &captures.sites[1].captures;
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].origin, Origin::ParentParameter);
        assert_eq!(
            inner[0].key,
            VariableKey::Parameter {
                site: 0,
                field: param_y()
            }
        );
    }

    #[test]
    fn unbound_parameters_are_named() {
        // supply(y) where nothing binds y
        let unit = method(
            "()Ljava/util/function/IntSupplier;",
            vec![
                GetStatic(param_y()),
                Invoke(InvokeType::Static, factory("supply")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let err = analyze(&unit).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedSite { ref message, .. } if message == "unbound parameter y"
        ));
    }

    #[test]
    fn missing_bindings_are_reported() {
        // fn(3, 4): the first argument binds nothing
        let unit = method(
            "()Ljava/util/function/IntUnaryOperator;",
            vec![
                IConst(3),
                IConst(4),
                Invoke(InvokeType::Static, factory("fn")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let err = analyze(&unit).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedSite { ref message, .. }
                if message.starts_with("missing binding for parameter #1")
        ));
    }

    #[test]
    fn stripped_debug_info_is_refused() {
        let mut unit = accumulator();
        unit.local_variables.clear();
        unit.has_local_variable_table = false;
        assert!(matches!(analyze(&unit), Err(Error::MissingDebugInfo { .. })));
    }

    #[test]
    fn scopes_of_instructions() {
        let unit = accumulator();
        let (sites, _) = analyze(&unit).unwrap();
        assert_eq!(scope_at(&sites, 0), Scope::Outside);
        assert_eq!(scope_at(&sites, 2), Scope::InCapture { site: 0, parameter: 0 });
        assert_eq!(scope_at(&sites, 5), Scope::InBody { site: 0 });
        assert_eq!(scope_at(&sites, 9), Scope::Outside);
    }
}

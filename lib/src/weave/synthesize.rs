//! Building the class that replaces a lambda site
//!
//! The synthesized class has one field per capture, a constructor taking the captures in order,
//! and the single abstract method of the target with the site's body moved into it:
//!
//! ```text
//! public final synthetic class Demo$IntUnaryOperator$L12$0 implements IntUnaryOperator {
//!     final synthetic int offset;
//!
//!     Demo$IntUnaryOperator$L12$0(int offset) { super(); this.offset = offset; }
//!
//!     public int applyAsInt(int arg) {
//!         int x = arg;               // bound parameter, converted from the method's argument
//!         return x + this.offset;    // body, with captures read from fields
//!     }
//! }
//! ```
//!
//! Parameters the abstract method doesn't supply get their default values from `default$<name>`
//! accessors, evaluated once at the start of the method. Nested sites become constructions of
//! their own classes, with the captures loaded from wherever the enclosing closure keeps them.

use super::captures::{
    local_access, local_variable, relocate_local, Access, Capture, LocalVar, Origin, VariableKey,
};
use super::sam::Sam;
use super::site::LambdaSite;
use super::{conversion, Bridges, Context, Error, MethodCaptures};
use crate::jvm::class_builder::ClassBuilder;
use crate::jvm::class_file::Version;
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::{
    ArrayKind, CodeBuilder, FieldRef, Instruction, InvokeType, Label, LabelGenerator, LocalKind,
    MethodRef, MethodUnit,
};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, RefType, UnqualifiedName,
};
use crate::util::Width;
use log::{debug, trace};
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

/// Everything decided about the sites of one method before any code gets generated
#[derive(Debug, Clone)]
pub struct MethodPlan {
    /// Sites, sorted and linked
    pub sites: Vec<LambdaSite>,
    pub captures: MethodCaptures,

    /// Method implemented by each site's closure
    pub sams: Vec<Sam>,

    /// Name of each site's closure class
    pub class_names: Vec<BinaryName>,
}

impl MethodPlan {
    pub fn constructor_descriptor(&self, site: usize) -> MethodDescriptor {
        MethodDescriptor {
            parameters: self.captures.sites[site]
                .captures
                .iter()
                .map(Capture::stored_type)
                .collect(),
            return_type: None,
        }
    }

    /// Site nested directly in `parent` (or top-level, for `None`) that starts at an index
    pub fn site_starting_at(&self, parent: Option<usize>, index: usize) -> Option<usize> {
        self.sites
            .iter()
            .position(|site| site.parent == parent && site.start() == index)
    }

    /// Site in which a parameter field is bound, searching from a site outwards
    pub fn binder(&self, site: usize, field: &FieldRef) -> Option<usize> {
        std::iter::successors(Some(site), |site| self.sites[*site].parent)
            .find(|site| self.sites[*site].binding(field).is_some())
    }
}

/// Push `new C; dup; <captures>; invokespecial C.<init>` for a site
///
/// `load` pushes the value of one capture.
pub fn construct(
    code: &mut CodeBuilder,
    plan: &MethodPlan,
    site: usize,
    mut load: impl FnMut(&mut CodeBuilder, &Capture) -> Result<(), Error>,
) -> Result<(), Error> {
    let class = &plan.class_names[site];
    code.push(Instruction::New(class.clone()));
    code.push(Instruction::Dup);
    for capture in &plan.captures.sites[site].captures {
        load(code, capture)?;
    }
    code.push(Instruction::Invoke(
        InvokeType::Special,
        MethodRef {
            class: RefType::Object(class.clone()),
            name: UnqualifiedName::INIT,
            descriptor: plan.constructor_descriptor(site),
            is_interface: false,
        },
    ));
    Ok(())
}

/// Operation on a one element array standing in for a variable
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoxOp {
    /// `... -> ..., value`
    Load,

    /// `..., value -> ...`
    Store,

    /// `... -> ...`, for `iinc`
    Increment(i16),
}

impl BoxOp {
    fn of(access: Access, insn: &Instruction) -> BoxOp {
        match (access, insn) {
            (Access::Load, _) => BoxOp::Load,
            (Access::Store, _) => BoxOp::Store,
            (Access::Increment, Instruction::IInc(_, by)) => BoxOp::Increment(*by),
            (Access::Increment, _) => BoxOp::Increment(1),
        }
    }
}

/// Operate on a box, given the instructions that push the box
pub fn box_operation(
    code: &mut CodeBuilder,
    push_box: &[Instruction<Label>],
    element: &FieldType,
    operation: BoxOp,
) {
    let kind = ArrayKind::of(element);
    for insn in push_box {
        code.push(insn.clone());
    }
    match operation {
        BoxOp::Load => {
            code.push(Instruction::IConst(0));
            code.push(Instruction::ArrayLoad(kind));
        }
        BoxOp::Store if element.is_wide() => {
            code.push(Instruction::DupX2);
            code.push(Instruction::Pop);
            code.push(Instruction::IConst(0));
            code.push(Instruction::DupX2);
            code.push(Instruction::Pop);
            code.push(Instruction::ArrayStore(kind));
        }
        BoxOp::Store => {
            code.push(Instruction::Swap);
            code.push(Instruction::IConst(0));
            code.push(Instruction::Swap);
            code.push(Instruction::ArrayStore(kind));
        }
        BoxOp::Increment(by) => {
            code.push(Instruction::IConst(0));
            code.push(Instruction::Dup2);
            code.push(Instruction::ArrayLoad(kind));
            code.push(Instruction::IConst(by as i32));
            code.push(Instruction::IAdd);
            code.push(Instruction::ArrayStore(kind));
        }
    }
}

/// Push a fresh box holding the value pushed by `value`
pub fn new_box(
    code: &mut CodeBuilder,
    element: &FieldType,
    value: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
) -> Result<(), Error> {
    code.push(Instruction::IConst(1));
    match element {
        FieldType::Base(base) => code.push(Instruction::NewArray(*base)),
        FieldType::Ref(ref_type) => code.push(Instruction::ANewArray(ref_type.clone())),
    }
    code.push(Instruction::Dup);
    code.push(Instruction::IConst(0));
    value(code)?;
    code.push(Instruction::ArrayStore(ArrayKind::of(element)));
    Ok(())
}

/// Labels for every index of an instruction range (and its end)
struct Labels {
    start: usize,
    labels: Vec<Label>,
}

impl Labels {
    fn new(code: &mut CodeBuilder, range: &Range<usize>) -> Labels {
        Labels {
            start: range.start,
            labels: (range.start..=range.end).map(|_| code.fresh_label()).collect(),
        }
    }

    fn get(&self, index: usize) -> Option<Label> {
        index
            .checked_sub(self.start)
            .and_then(|offset| self.labels.get(offset))
            .copied()
    }
}

/// Assign consecutive slots to the internal locals of a site
fn allocate_locals(internal: &BTreeMap<u16, bool>, first: u16) -> BTreeMap<u16, u16> {
    let mut next = first;
    let mut slots = BTreeMap::new();
    for (slot, wide) in internal {
        slots.insert(*slot, next);
        next += if *wide { 2 } else { 1 };
    }
    slots
}

/// Field names for the captures of a site, made unique
fn field_names(captures: &[Capture]) -> Result<Vec<UnqualifiedName>, Error> {
    let mut taken = HashSet::new();
    let mut names = vec![];
    for capture in captures {
        let mut name = capture.name.clone();
        let mut suffix = 1;
        while !taken.insert(name.clone()) {
            name = UnqualifiedName::from_string(format!("{}${}", capture.name, suffix))
                .map_err(Error::InvalidSettings)?;
            suffix += 1;
        }
        names.push(name);
    }
    Ok(names)
}

fn default_accessor_name(field: &FieldRef) -> Result<UnqualifiedName, Error> {
    UnqualifiedName::from_string(format!("default${}", field.name)).map_err(Error::InvalidSettings)
}

/// Generates closure code for instructions of one site
struct Translator<'a> {
    unit: &'a MethodUnit,
    plan: &'a MethodPlan,
    index: usize,
    class_name: &'a BinaryName,
    fields: &'a [UnqualifiedName],

    /// Slot of each of the site's own parameters (`None` in default accessors)
    parameter_slots: Vec<Option<u16>>,

    /// Internal locals of the original method, remapped
    locals: BTreeMap<u16, u16>,
    bridges: &'a mut Bridges,
    context: &'a Context,
}

impl<'a> Translator<'a> {
    fn site(&self) -> &'a LambdaSite {
        &self.plan.sites[self.index]
    }

    fn captures(&self) -> &'a [Capture] {
        &self.plan.captures.sites[self.index].captures
    }

    fn is_boxed_parameter(&self, field: &FieldRef) -> bool {
        self.plan.captures.sites[self.index]
            .boxed_parameters
            .contains(field)
    }

    /// `aload_0; getfield` for the capture with some key
    fn capture_field(
        &self,
        key: &VariableKey,
        context: &Context,
    ) -> Result<(Vec<Instruction<Label>>, &'a Capture), Error> {
        let position = self
            .captures()
            .iter()
            .position(|capture| &capture.key == key)
            .ok_or_else(|| Error::malformed(context, format!("untracked capture {:?}", key)))?;
        let capture = &self.captures()[position];
        let field = FieldRef {
            class: self.class_name.clone(),
            name: self.fields[position].clone(),
            descriptor: capture.stored_type(),
        };
        Ok((
            vec![
                Instruction::Load(LocalKind::Reference, 0),
                Instruction::GetField(field),
            ],
            capture,
        ))
    }

    fn local_slot(&self, slot: u16, context: &Context) -> Result<u16, Error> {
        self.locals
            .get(&slot)
            .copied()
            .ok_or_else(|| {
                Error::malformed(context, format!("local in slot {} was not classified", slot))
            })
    }

    /// Push the value a nested site captures
    fn load_for_child(&self, code: &mut CodeBuilder, capture: &Capture) -> Result<(), Error> {
        let site = self.site();
        match &capture.key {
            VariableKey::Parameter { site: binder, field } if *binder == self.index => {
                let slot = site
                    .binding(field)
                    .and_then(|position| self.parameter_slots[position])
                    .ok_or_else(|| {
                        Error::malformed(
                            self.context,
                            format!("parameter {} is not available here", field.name),
                        )
                    })?;
                code.push(Instruction::Load(LocalKind::of(&capture.stored_type()), slot));
            }
            VariableKey::Local { slot, start } if site.declares(*start) => {
                let slot = self.local_slot(*slot, self.context)?;
                code.push(Instruction::Load(LocalKind::of(&capture.field_type), slot));
            }
            key => {
                let (push, _) = self.capture_field(key, self.context)?;
                for insn in push {
                    code.push(insn);
                }
            }
        }
        Ok(())
    }

    /// Translate a range of the original method (a body or a default value)
    fn translate(&mut self, code: &mut CodeBuilder, range: Range<usize>) -> Result<Labels, Error> {
        let labels = Labels::new(code, &range);
        let mut position = range.start;
        while position < range.end {
            if let Some(label) = labels.get(position) {
                code.place_label(label);
            }
            if let Some(line) = self.unit.line_numbers.iter().find(|line| line.start == position) {
                code.push_line(line.line);
            }

            if let Some(child) = self.plan.site_starting_at(Some(self.index), position) {
                trace!("Constructing nested lambda #{} at {}", self.plan.sites[child].id, position);
                construct(code, self.plan, child, |code, capture| {
                    self.load_for_child(code, capture)
                })?;
                let child_end = self.plan.sites[child].end;
                for inner in position + 1..child_end {
                    if let Some(label) = labels.get(inner) {
                        code.place_label(label);
                    }
                }
                position = child_end;
                continue;
            }

            self.translate_instruction(code, position, &range, &labels)?;
            position += 1;
        }
        if let Some(label) = labels.get(range.end) {
            code.place_label(label);
        }
        Ok(labels)
    }

    fn translate_instruction(
        &mut self,
        code: &mut CodeBuilder,
        position: usize,
        range: &Range<usize>,
        labels: &Labels,
    ) -> Result<(), Error> {
        let unit: &'a MethodUnit = self.unit;
        let insn = &unit.instructions[position];
        let context = self.context.at_line(unit.line_at(position));
        let site = self.site();

        if let Some((slot, access, _)) = local_access(insn) {
            let variable = local_variable(unit, slot, position, access);
            let internal = match variable {
                LocalVar::This => {
                    if access != Access::Load {
                        return Err(Error::malformed(
                            &context,
                            "`this` is reassigned inside a lambda",
                        ));
                    }
                    let (push, _) = self.capture_field(&VariableKey::This, &context)?;
                    for insn in push {
                        code.push(insn);
                    }
                    return Ok(());
                }
                LocalVar::Declared(var) => site.declares(var.start),
                LocalVar::Unknown => true,
                LocalVar::Parameter(_) => false,
            };

            if internal {
                let slot = self.local_slot(slot, &context)?;
                if let Some(relocated) = relocate_local(insn, slot) {
                    code.push(relocated);
                }
                return Ok(());
            }

            let key = variable
                .key()
                .ok_or_else(|| {
                    Error::malformed(&context, format!("unknown local in slot {}", slot))
                })?;
            let (push, capture) = self.capture_field(&key, &context)?;
            if capture.mutable {
                box_operation(code, &push, &capture.field_type, BoxOp::of(access, insn));
            } else if access == Access::Load {
                for insn in push {
                    code.push(insn);
                }
            } else {
                return Err(Error::malformed(
                    &context,
                    format!("captured variable {} is assigned inside a lambda", capture.name),
                ));
            }
            return Ok(());
        }

        match insn {
            Instruction::GetStatic(field) | Instruction::PutStatic(field) => {
                if let Some(binder) = self.plan.binder(self.index, field) {
                    let operation = if matches!(insn, Instruction::GetStatic(_)) {
                        BoxOp::Load
                    } else {
                        BoxOp::Store
                    };
                    return self.parameter_access(code, binder, field, operation, &context);
                }
            }
            _ => (),
        }

        if let Some(bridge) = self.bridges.redirect(insn, &context)? {
            code.push(Instruction::Invoke(InvokeType::Static, bridge));
            return Ok(());
        }

        for target in insn.jump_targets() {
            if *target < range.start || *target > range.end {
                return Err(Error::malformed(
                    &context,
                    format!("jump from {} to {} leaves the lambda", position, target),
                ));
            }
        }
        let mut missing = None;
        let mapped = insn.map_labels(|target| {
            labels.get(*target).unwrap_or_else(|| {
                missing = Some(*target);
                labels.labels[0]
            })
        });
        if let Some(target) = missing {
            return Err(Error::malformed(&context, format!("no label for jump target {}", target)));
        }
        code.push(mapped);
        Ok(())
    }

    fn parameter_access(
        &mut self,
        code: &mut CodeBuilder,
        binder: usize,
        field: &FieldRef,
        operation: BoxOp,
        context: &Context,
    ) -> Result<(), Error> {
        if binder != self.index {
            let key = VariableKey::Parameter {
                site: binder,
                field: field.clone(),
            };
            let (push, capture) = self.capture_field(&key, context)?;
            if capture.mutable {
                box_operation(code, &push, &field.descriptor, operation);
            } else if operation == BoxOp::Load {
                for insn in push {
                    code.push(insn);
                }
            } else {
                return Err(Error::malformed(
                    context,
                    format!("parameter {} is not writable here", field.name),
                ));
            }
            return Ok(());
        }

        let slot = self
            .site()
            .binding(field)
            .and_then(|position| self.parameter_slots[position])
            .ok_or_else(|| {
                Error::malformed(
                    context,
                    format!(
                        "parameter {} is used in a default value of its own lambda",
                        field.name
                    ),
                )
            })?;
        if self.is_boxed_parameter(field) {
            let load = [Instruction::Load(LocalKind::Reference, slot)];
            box_operation(code, &load, &field.descriptor, operation);
        } else {
            let kind = LocalKind::of(&field.descriptor);
            code.push(match operation {
                BoxOp::Store => Instruction::Store(kind, slot),
                _ => Instruction::Load(kind, slot),
            });
        }
        Ok(())
    }

    /// Copy the exception handlers of a body that belong to this site
    fn copy_exception_handlers(
        &self,
        code: &mut CodeBuilder,
        body: &Range<usize>,
        labels: &Labels,
    ) {
        let nested: Vec<Range<usize>> = self
            .plan
            .sites
            .iter()
            .enumerate()
            .filter(|(index, _)| {
                *index != self.index && self.site().contains(self.plan.sites[*index].start())
            })
            .map(|(_, site)| site.range())
            .collect();
        for handler in &self.unit.exception_handlers {
            let inside = body.start <= handler.start
                && handler.end <= body.end
                && body.contains(&handler.handler);
            let in_nested = nested
                .iter()
                .any(|range| range.start <= handler.start && handler.end <= range.end);
            if !inside || in_nested {
                continue;
            }
            if let (Some(start), Some(end), Some(target)) =
                (labels.get(handler.start), labels.get(handler.end), labels.get(handler.handler))
            {
                code.push_exception_handler(start, end, target, handler.catch_type.clone());
            }
        }
    }

    /// Debug information for the variables declared inside a body
    fn copy_local_variables(&self, code: &mut CodeBuilder, body: &Range<usize>, labels: &Labels) {
        let site = self.site();
        for var in &self.unit.local_variables {
            let nested = self.plan.sites.iter().enumerate().any(|(index, other)| {
                index != self.index && site.contains(other.start()) && other.contains(var.start)
            });
            if !site.declares(var.start) || !body.contains(&var.start) || nested {
                continue;
            }
            let (start, end, slot) = match (
                labels.get(var.start),
                labels.get(var.end.min(body.end)),
                self.locals.get(&var.slot),
            ) {
                (Some(start), Some(end), Some(slot)) => (start, end, *slot),
                _ => continue,
            };
            code.push_local_variable(start, end, var.name.clone(), var.descriptor.clone(), slot);
        }
    }
}

/// Build the closure class for one site
pub fn synthesize_closure(
    unit: &MethodUnit,
    plan: &MethodPlan,
    index: usize,
    bridges: &mut Bridges,
    resolver: &dyn TypeResolver,
    version: Version,
    context: &Context,
) -> Result<ClassBuilder, Error> {
    let site = &plan.sites[index];
    let sam = &plan.sams[index];
    let class_name = &plan.class_names[index];
    let site_captures = &plan.captures.sites[index];
    let context = context.at_line(site.line);
    let jvm_error = |err| Error::from_jvm(&context, err);

    let target = resolver.resolve(&site.target).map_err(jvm_error)?;
    let super_class = if target.is_interface() {
        BinaryName::OBJECT
    } else {
        let constructor = target.method(&UnqualifiedName::INIT, &no_arguments());
        let accessible = constructor
            .map_or(false, |init| !init.access_flags.contains(MethodAccessFlags::PRIVATE));
        if !accessible {
            return Err(Error::malformed(
                &context,
                format!("{} has no accessible no-argument constructor", site.target),
            ));
        }
        site.target.clone()
    };

    let mut class = ClassBuilder::new(
        class_name.clone(),
        super_class.clone(),
        ClassAccessFlags::PUBLIC
            | ClassAccessFlags::FINAL
            | ClassAccessFlags::SUPER
            | ClassAccessFlags::SYNTHETIC,
    );
    class.set_version(version);
    if target.is_interface() {
        class.add_interface(site.target.clone());
    }

    // Fields and constructor
    let fields = field_names(&site_captures.captures)?;
    for (capture, name) in site_captures.captures.iter().zip(&fields) {
        class.add_field(
            FieldAccessFlags::FINAL | FieldAccessFlags::SYNTHETIC,
            name.clone(),
            capture.stored_type(),
        );
    }
    class.add_method(
        MethodAccessFlags::empty(),
        UnqualifiedName::INIT,
        plan.constructor_descriptor(index),
        Some(
            constructor_code(class_name, &super_class, &site_captures.captures, &fields)
                .map_err(jvm_error)?,
        ),
    );

    // Default value accessors
    let arity = sam.arity();
    for (position, parameter) in site.parameters.iter().enumerate().skip(arity) {
        let (field, default) = match (&parameter.field, &parameter.default) {
            (Some(field), Some(default)) => (field, default.clone()),
            _ => {
                return Err(Error::malformed(
                    &context,
                    format!("parameter #{} of {} has no default value", position + 1, site.factory),
                ))
            }
        };
        let mut translator = Translator {
            unit,
            plan,
            index,
            class_name,
            fields: &fields,
            parameter_slots: vec![None; site.parameters.len()],
            locals: allocate_locals(&site_captures.internal, 1),
            bridges: &mut *bridges,
            context: &context,
        };
        let mut code = CodeBuilder::new();
        let start = code.here();
        translator.translate(&mut code, default)?;
        code.push(Instruction::Return(Some(LocalKind::of(&field.descriptor))));
        let end = code.here();
        let this_type = FieldType::object(class_name.clone());
        code.push_local_variable(start, end, UnqualifiedName::THIS, this_type, 0);
        class.add_method(
            MethodAccessFlags::FINAL | MethodAccessFlags::SYNTHETIC,
            default_accessor_name(field)?,
            MethodDescriptor {
                parameters: vec![],
                return_type: Some(field.descriptor.clone()),
            },
            Some(code.finish().map_err(jvm_error)?),
        );
    }

    // The abstract method
    let mut next_slot = 1;
    let mut sam_slots = vec![];
    for parameter in &sam.descriptor.parameters {
        sam_slots.push(next_slot);
        next_slot += parameter.width() as u16;
    }
    let mut parameter_slots = vec![];
    for parameter in &site.parameters {
        parameter_slots.push(next_slot);
        let field = parameter
            .field
            .as_ref()
            .ok_or_else(|| Error::malformed(&context, "unbound lambda parameter"))?;
        next_slot += if site_captures.boxed_parameters.contains(field) {
            1
        } else {
            field.descriptor.width() as u16
        };
    }
    let locals = allocate_locals(&site_captures.internal, next_slot);

    let mut code = CodeBuilder::new();
    let start = code.here();
    for (position, parameter) in site.parameters.iter().enumerate() {
        let field = parameter
            .field
            .as_ref()
            .ok_or_else(|| Error::malformed(&context, "unbound lambda parameter"))?;
        let push_value = |code: &mut CodeBuilder| -> Result<(), Error> {
            if position < arity {
                let argument = &sam.descriptor.parameters[position];
                code.push(Instruction::Load(LocalKind::of(argument), sam_slots[position]));
                let converted =
                    conversion(Some(argument), Some(&field.descriptor), resolver, &context)?;
                for insn in converted {
                    code.push(insn);
                }
            } else {
                code.push(Instruction::Load(LocalKind::Reference, 0));
                code.push(Instruction::Invoke(
                    InvokeType::Virtual,
                    MethodRef {
                        class: RefType::Object(class_name.clone()),
                        name: default_accessor_name(field)?,
                        descriptor: MethodDescriptor {
                            parameters: vec![],
                            return_type: Some(field.descriptor.clone()),
                        },
                        is_interface: false,
                    },
                ));
            }
            Ok(())
        };
        let slot = parameter_slots[position];
        if site_captures.boxed_parameters.contains(field) {
            new_box(&mut code, &field.descriptor, push_value)?;
            code.push(Instruction::Store(LocalKind::Reference, slot));
        } else {
            push_value(&mut code)?;
            code.push(Instruction::Store(LocalKind::of(&field.descriptor), slot));
        }
    }
    let body_start = code.here();

    let mut translator = Translator {
        unit,
        plan,
        index,
        class_name,
        fields: &fields,
        parameter_slots: parameter_slots.iter().copied().map(Some).collect(),
        locals,
        bridges: &mut *bridges,
        context: &context,
    };
    let labels = translator.translate(&mut code, site.body.clone())?;
    let return_type = sam.descriptor.return_type.as_ref();
    for insn in conversion(site.body_type(), return_type, resolver, &context)? {
        code.push(insn);
    }
    code.push(Instruction::Return(return_type.map(LocalKind::of)));
    let end = code.here();

    translator.copy_exception_handlers(&mut code, &site.body, &labels);
    translator.copy_local_variables(&mut code, &site.body, &labels);
    let this_type = FieldType::object(class_name.clone());
    code.push_local_variable(start, end, UnqualifiedName::THIS, this_type, 0);
    for (parameter, slot) in site.parameters.iter().zip(&parameter_slots) {
        if let Some(field) = &parameter.field {
            let descriptor = if site_captures.boxed_parameters.contains(field) {
                FieldType::array(field.descriptor.clone())
            } else {
                field.descriptor.clone()
            };
            code.push_local_variable(body_start, end, field.name.clone(), descriptor, *slot);
        }
    }

    class.add_method(
        MethodAccessFlags::PUBLIC,
        sam.name.clone(),
        sam.descriptor.clone(),
        Some(code.finish().map_err(jvm_error)?),
    );

    debug!(
        "Synthesized {} ({} capture(s), {} of {} parameter(s) from {}.{})",
        class_name,
        site_captures.captures.len(),
        arity,
        site.parameters.len(),
        sam.owner,
        sam.name,
    );
    for capture in &site_captures.captures {
        if capture.origin == Origin::EnclosingField {
            trace!("{} keeps a reference to the enclosing {}", class_name, unit.owner);
        }
    }
    Ok(class)
}

fn no_arguments() -> MethodDescriptor {
    MethodDescriptor {
        parameters: vec![],
        return_type: None,
    }
}

fn constructor_code(
    class_name: &BinaryName,
    super_class: &BinaryName,
    captures: &[Capture],
    fields: &[UnqualifiedName],
) -> Result<crate::jvm::code::BuiltCode, crate::jvm::Error> {
    let mut code = CodeBuilder::new();
    code.push(Instruction::Load(LocalKind::Reference, 0));
    code.push(Instruction::Invoke(
        InvokeType::Special,
        MethodRef {
            class: RefType::Object(super_class.clone()),
            name: UnqualifiedName::INIT,
            descriptor: no_arguments(),
            is_interface: false,
        },
    ));
    let mut slot = 1;
    for (capture, name) in captures.iter().zip(fields) {
        let stored = capture.stored_type();
        code.push(Instruction::Load(LocalKind::Reference, 0));
        code.push(Instruction::Load(LocalKind::of(&stored), slot));
        code.push(Instruction::PutField(FieldRef {
            class: class_name.clone(),
            name: name.clone(),
            descriptor: stored.clone(),
        }));
        slot += stored.width() as u16;
    }
    code.push(Instruction::Return(None));
    code.finish()
}

/// Names of the closure classes for every site of a method
pub fn closure_class_names(
    sites: &[LambdaSite],
    owner: &BinaryName,
    settings: &super::Settings,
) -> Result<Vec<BinaryName>, Error> {
    sites
        .iter()
        .map(|site| settings.closure_class_name(owner, &site.target, site.line, site.id))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::{ClassMetadata, OverlayResolver};
    use crate::jvm::verifier::FlowAnalysis;
    use crate::jvm::ParseDescriptor;
    use crate::weave::fixtures::*;
    use crate::weave::{analyze_captures, detect_sites, factory_calls, resolve_sam, Settings};
    use Instruction::*;

    fn plan_for(unit: &MethodUnit, resolver: &dyn TypeResolver) -> MethodPlan {
        let conventions = conventions();
        let analysis = FlowAnalysis::analyze(unit, resolver).unwrap();
        let calls = factory_calls(unit, resolver, &conventions).unwrap();
        let context = Context::default();
        let sites =
            detect_sites(unit, &analysis, &calls, 0, resolver, &conventions, &context).unwrap();
        let captures = analyze_captures(unit, &sites, resolver, &conventions, &context).unwrap();
        let sams = sites
            .iter()
            .map(|site| resolve_sam(site, resolver, &context).unwrap())
            .collect();
        let class_names = closure_class_names(&sites, &unit.owner, &Settings::default()).unwrap();
        MethodPlan {
            sites,
            captures,
            sams,
            class_names,
        }
    }

    fn owner_metadata() -> ClassMetadata {
        ClassMetadata {
            name: demo(),
            super_class: Some(BinaryName::OBJECT),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC,
            fields: vec![],
            methods: vec![],
            annotations: vec![],
        }
    }

    #[test]
    fn boxes() {
        let mut code = CodeBuilder::new();
        let long_box = [Load(LocalKind::Reference, 3)];
        let int_box = [Load(LocalKind::Reference, 4)];
        box_operation(&mut code, &long_box, &FieldType::long(), BoxOp::Store);
        box_operation(&mut code, &int_box, &FieldType::int(), BoxOp::Increment(-2));
        let built = code.finish().unwrap();
        assert_eq!(
            built.instructions,
            vec![
                Load(LocalKind::Reference, 3),
                DupX2,
                Pop,
                IConst(0),
                DupX2,
                Pop,
                ArrayStore(ArrayKind::Long),
                Load(LocalKind::Reference, 4),
                IConst(0),
                Dup2,
                ArrayLoad(ArrayKind::Int),
                IConst(-2),
                IAdd,
                ArrayStore(ArrayKind::Int),
            ]
        );
    }

    #[test]
    fn parameters_and_captures() {
        // int offset = ...; fn(x, x + offset)
        let mut unit = method(
            "(I)Ljava/util/function/IntUnaryOperator;",
            vec![
                GetStatic(param_x()),
                GetStatic(param_x()),
                Load(LocalKind::Int, 0),
                IAdd,
                Invoke(InvokeType::Static, factory("fn")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        unit.local_variables.push(local("offset", FieldType::int(), 0, 0, 6));
        let resolver = resolver();
        let plan = plan_for(&unit, &resolver);
        let mut bridges = Bridges::new(&owner_metadata());
        let context = Context::default();
        let class =
            synthesize_closure(&unit, &plan, 0, &mut bridges, &resolver, Version::JAVA8, &context)
                .unwrap();

        let metadata = class.metadata();
        assert_eq!(metadata.name.as_str(), "me/alec/Demo$IntUnaryOperator$L0$0");
        let interface = name::<BinaryName>("java/util/function/IntUnaryOperator");
        assert_eq!(metadata.interfaces, vec![interface]);
        assert_eq!(metadata.fields.len(), 1);
        assert_eq!(metadata.fields[0].name.as_str(), "offset");
        let init = MethodDescriptor::parse_class_file("(I)V").unwrap();
        assert!(metadata.method(&UnqualifiedName::INIT, &init).is_some());
        let apply = MethodDescriptor::parse_class_file("(I)I").unwrap();
        assert!(metadata.method(&name("applyAsInt"), &apply).is_some());

        // The class assembles (the flow analysis accepts every method)
        let overlay = OverlayResolver::new(&resolver);
        overlay.add(owner_metadata());
        class.build_bytes(&overlay).unwrap();
    }

    #[test]
    fn mutable_captures_go_through_the_box() {
        // int sum = 0; consume(x, sum += x)
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
        let resolver = resolver();
        let plan = plan_for(&unit, &resolver);
        let mut bridges = Bridges::new(&owner_metadata());
        let context = Context::default();
        let class =
            synthesize_closure(&unit, &plan, 0, &mut bridges, &resolver, Version::JAVA8, &context)
                .unwrap();

        let metadata = class.metadata();
        assert_eq!(metadata.fields[0].descriptor, FieldType::array(FieldType::int()));
        let overlay = OverlayResolver::new(&resolver);
        overlay.add(owner_metadata());
        class.build_bytes(&overlay).unwrap();
    }

    #[test]
    fn defaults_become_accessors() {
        // (IntSupplier) generic(7 -> x, valueOf(x))
        let unit = method(
            "()Ljava/lang/Object;",
            vec![
                IConst(7),
                Dup,
                PutStatic(param_x()),
                GetStatic(param_x()),
                Invoke(
                    InvokeType::Static,
                    method_ref("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
                ),
                Invoke(InvokeType::Static, factory("generic")),
                CheckCast(RefType::Object(int_supplier())),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let resolver = resolver();
        let plan = plan_for(&unit, &resolver);
        assert_eq!(plan.sams[0].arity(), 0);
        let mut bridges = Bridges::new(&owner_metadata());
        let context = Context::default();
        let class =
            synthesize_closure(&unit, &plan, 0, &mut bridges, &resolver, Version::JAVA8, &context)
                .unwrap();
        let metadata = class.metadata();
        let supplies_int = MethodDescriptor::parse_class_file("()I").unwrap();
        assert!(metadata.method(&name("default$x"), &supplies_int).is_some());
        assert!(metadata.method(&name("getAsInt"), &supplies_int).is_some());

        let overlay = OverlayResolver::new(&resolver);
        overlay.add(owner_metadata());
        class.build_bytes(&overlay).unwrap();
    }

    #[test]
    fn unique_field_names() {
        let capture = |slot, start| Capture {
            key: VariableKey::Local { slot, start },
            name: name("i"),
            field_type: FieldType::int(),
            origin: Origin::OuterLocal,
            mutable: false,
        };
        let names = field_names(&[capture(1, 3), capture(2, 8), capture(3, 9)]).unwrap();
        let names: Vec<&str> = names.iter().map(|name| name.as_str()).collect();
        assert_eq!(names, ["i", "i$1", "i$2"]);
    }
}

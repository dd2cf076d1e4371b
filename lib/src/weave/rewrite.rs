//! Replacing lambda sites in the method they appear in
//!
//! Every top-level site collapses into the construction of its closure class. The instructions
//! around the sites are replayed unchanged, except for accesses to boxed locals: those go through
//! the box, which gets allocated at the very start of the method.

use super::captures::{local_access, local_variable, Access, VariableKey};
use super::synthesize::{box_operation, construct, new_box, BoxOp, MethodPlan};
use super::{default_value, Context, Error};
use crate::jvm::code::{CodeBuilder, Instruction, Label, LabelGenerator, LocalKind, MethodUnit};
use crate::jvm::FieldType;
use log::trace;

/// Rewrite a method so that its top-level sites construct closures
pub fn rewrite_method(
    unit: &MethodUnit,
    plan: &MethodPlan,
    context: &Context,
) -> Result<MethodUnit, Error> {
    let jvm_error = |err| Error::from_jvm(context, err);
    let instruction_count = unit.instructions.len();
    let mut code = CodeBuilder::new();
    let labels: Vec<Label> = (0..=instruction_count).map(|_| code.fresh_label()).collect();

    for boxed in &plan.captures.boxes {
        new_box(&mut code, &boxed.field_type, |code| {
            if boxed.is_parameter {
                code.push(Instruction::Load(LocalKind::of(&boxed.field_type), boxed.slot));
            } else {
                code.push(default_value(&boxed.field_type));
            }
            Ok(())
        })?;
        code.push(Instruction::Store(LocalKind::Reference, boxed.box_slot));
    }

    let mut position = 0;
    while position < instruction_count {
        code.place_label(labels[position]);
        if let Some(line) = unit.line_numbers.iter().find(|line| line.start == position) {
            code.push_line(line.line);
        }

        if let Some(index) = plan.site_starting_at(None, position) {
            let site = &plan.sites[index];
            trace!(
                "Replacing {}..{} of {}.{} with {}",
                site.start(),
                site.end,
                unit.owner,
                unit.name,
                plan.class_names[index]
            );
            construct(&mut code, plan, index, |code, capture| {
                match &capture.key {
                    key @ VariableKey::Local { slot, .. } => match plan.captures.boxed(key) {
                        Some(boxed) => {
                            code.push(Instruction::Load(LocalKind::Reference, boxed.box_slot))
                        }
                        None => {
                            code.push(Instruction::Load(LocalKind::of(&capture.field_type), *slot))
                        }
                    },
                    VariableKey::This => code.push(Instruction::Load(LocalKind::Reference, 0)),
                    VariableKey::Parameter { field, .. } => {
                        return Err(Error::malformed(
                            context,
                            format!("top-level lambda captures parameter {}", field.name),
                        ))
                    }
                }
                Ok(())
            })?;
            for inner in position + 1..site.end {
                code.place_label(labels[inner]);
            }
            position = site.end;
            continue;
        }

        let insn = &unit.instructions[position];
        let boxed = local_access(insn).and_then(|(slot, access, _)| {
            let key = local_variable(unit, slot, position, access).key()?;
            plan.captures.boxed(&key).map(|boxed| (boxed, access))
        });
        match boxed {
            Some((boxed, access)) => {
                let operation = match (access, insn) {
                    (_, Instruction::IInc(_, by)) => BoxOp::Increment(*by),
                    (Access::Store, _) => BoxOp::Store,
                    _ => BoxOp::Load,
                };
                let push_box = [Instruction::Load(LocalKind::Reference, boxed.box_slot)];
                box_operation(&mut code, &push_box, &boxed.field_type, operation);
            }
            None => code.push(insn.map_labels(|target| labels[*target])),
        }
        position += 1;
    }
    code.place_label(labels[instruction_count]);

    // Handlers inside a replaced site moved with the body
    let top_level: Vec<_> = plan.sites.iter().filter(|site| site.parent.is_none()).collect();
    for handler in &unit.exception_handlers {
        let moved = top_level
            .iter()
            .any(|site| site.start() <= handler.start && handler.end <= site.end);
        if !moved {
            code.push_exception_handler(
                labels[handler.start],
                labels[handler.end],
                labels[handler.handler],
                handler.catch_type.clone(),
            );
        }
    }

    for var in &unit.local_variables {
        if top_level.iter().any(|site| site.declares(var.start)) {
            continue;
        }
        let key = VariableKey::Local {
            slot: var.slot,
            start: var.start,
        };
        let (slot, descriptor) = match plan.captures.boxed(&key) {
            Some(boxed) => (boxed.box_slot, FieldType::array(var.descriptor.clone())),
            None => (var.slot, var.descriptor.clone()),
        };
        code.push_local_variable(
            labels[var.start],
            labels[var.end],
            var.name.clone(),
            descriptor,
            slot,
        );
    }

    let built = code.finish().map_err(jvm_error)?;
    let max_locals = unit
        .max_locals
        .checked_add(plan.captures.boxes.len() as u16)
        .ok_or_else(|| {
            jvm_error(crate::jvm::Error::MethodCodeMaxLocalsOverflow(
                unit.max_locals as usize + plan.captures.boxes.len(),
            ))
        })?;
    Ok(MethodUnit {
        owner: unit.owner.clone(),
        access_flags: unit.access_flags,
        name: unit.name.clone(),
        descriptor: unit.descriptor.clone(),
        instructions: built.instructions,
        exception_handlers: built.exception_handlers,
        local_variables: built.local_variables,
        has_local_variable_table: unit.has_local_variable_table,
        line_numbers: built.line_numbers,
        max_locals,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{ArrayKind, InvokeType, SourceLine};
    use crate::jvm::verifier::FlowAnalysis;
    use crate::jvm::{BaseType, Name};
    use crate::weave::fixtures::*;
    use crate::weave::{
        analyze_captures, closure_class_names, detect_sites, factory_calls, resolve_sam, Settings,
    };
    use Instruction::*;

    fn plan_for(unit: &MethodUnit) -> MethodPlan {
        let resolver = resolver();
        let conventions = conventions();
        let analysis = FlowAnalysis::analyze(unit, &resolver).unwrap();
        let calls = factory_calls(unit, &resolver, &conventions).unwrap();
        let context = Context::default();
        let sites =
            detect_sites(unit, &analysis, &calls, 0, &resolver, &conventions, &context).unwrap();
        let captures =
            analyze_captures(unit, &sites, &resolver, &conventions, &context).unwrap();
        let sams = sites
            .iter()
            .map(|site| resolve_sam(site, &resolver, &context).unwrap())
            .collect();
        let class_names = closure_class_names(&sites, &unit.owner, &Settings::default()).unwrap();
        MethodPlan {
            sites,
            captures,
            sams,
            class_names,
        }
    }

    #[test]
    fn sites_become_constructions() {
        // int sum = 0; return consume(x, sum += x);
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
        unit.line_numbers.push(SourceLine { start: 0, line: 7 });
        unit.max_locals = 1;
        let plan = plan_for(&unit);
        let closure = plan.class_names[0].clone();
        assert_eq!(closure.as_str(), "me/alec/Demo$IntConsumer$L7$0");

        let rewritten = rewrite_method(&unit, &plan, &Context::default()).unwrap();
        assert_eq!(
            rewritten.instructions,
            vec![
                // box for `sum`
                IConst(1),
                NewArray(BaseType::Int),
                Dup,
                IConst(0),
                IConst(0),
                ArrayStore(ArrayKind::Int),
                Store(LocalKind::Reference, 1),
                // sum = 0
                IConst(0),
                Load(LocalKind::Reference, 1),
                Swap,
                IConst(0),
                Swap,
                ArrayStore(ArrayKind::Int),
                // the site
                New(closure.clone()),
                Dup,
                Load(LocalKind::Reference, 1),
                Invoke(InvokeType::Special, method_ref(closure.as_str(), "<init>", "([I)V")),
                Return(Some(LocalKind::Reference)),
            ]
        );
        assert_eq!(rewritten.max_locals, 2);
        assert_eq!(rewritten.line_numbers[0].start, 7);
        assert_eq!(rewritten.local_variables.len(), 1);
        assert_eq!(rewritten.local_variables[0].slot, 1);
        assert_eq!(rewritten.local_variables[0].descriptor, FieldType::array(FieldType::int()));
    }

    #[test]
    fn jumps_around_sites_are_kept() {
        // return flag ? supply(1) : null
        let mut unit = method(
            "(Z)Ljava/util/function/IntSupplier;",
            vec![
                Load(LocalKind::Int, 0),
                If(crate::jvm::code::OrdComparison::EQ, 5),
                IConst(1),
                Invoke(InvokeType::Static, factory("supply")),
                Goto(6),
                AConstNull,
                Return(Some(LocalKind::Reference)),
            ],
        );
        unit.local_variables.push(local("flag", FieldType::boolean(), 0, 0, 7));
        let plan = plan_for(&unit);
        let closure = plan.class_names[0].clone();
        let rewritten = rewrite_method(&unit, &plan, &Context::default()).unwrap();
        assert_eq!(
            rewritten.instructions,
            vec![
                Load(LocalKind::Int, 0),
                If(crate::jvm::code::OrdComparison::EQ, 6),
                New(closure.clone()),
                Dup,
                Invoke(InvokeType::Special, method_ref(closure.as_str(), "<init>", "()V")),
                Goto(7),
                AConstNull,
                Return(Some(LocalKind::Reference)),
            ]
        );
        assert_eq!(rewritten.max_locals, 1);
    }
}

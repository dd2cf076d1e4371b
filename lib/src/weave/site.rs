//! Finding lambda sites and delimiting their arguments
//!
//! A lambda site is a call to a factory method. Its arguments are evaluated right before the
//! call, so walking backwards from the call it is possible to find where each argument starts:
//! argument `j` of `n` starts at the last instruction before the end of the argument that sees
//! the stack at depth `depth(call) - n + j`. Conditionals are the tricky part, since the "else"
//! branch of a ternary also starts at that depth:
//!
//! ```text
//!  0: iload_1           <- real start (depth t)
//!  1: ifeq 4
//!  2: iconst_1
//!  3: goto 5
//!  4: iconst_2          <- first candidate (depth t)
//!  5: invokestatic fn
//! ```
//!
//! When the candidate start is preceded by a `goto` jumping further into the argument, or when
//! a conditional jump from before the candidate lands inside the argument, the start is moved
//! back to where the condition of that jump starts. Shapes that still don't form a contiguous
//! argument (jumps into the middle of the range from outside, or out of the range from inside)
//! are rejected rather than guessed at.

use super::conventions::target_type;
use super::{Context, Conventions, Error};
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::{FieldRef, Instruction, InvokeType, MethodRef, MethodUnit};
use crate::jvm::verifier::FlowAnalysis;
use crate::jvm::{BinaryName, FieldType, RefType};
use log::debug;
use std::ops::Range;

/// Call to a lambda factory, along with the instruction ranges of its arguments
///
/// All indices are into the instructions of the original method.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaSite {
    /// Sequential id, unique within the class
    pub id: usize,

    /// Source line where the site starts
    pub line: Option<u16>,
    pub factory: MethodRef,

    /// Type the synthesized closure implements or extends
    pub target: BinaryName,

    /// Named parameters, in factory argument order
    pub parameters: Vec<Parameter>,

    /// Range of the last factory argument
    pub body: Range<usize>,

    /// Index of the factory call
    pub call: usize,

    /// Exclusive end of the site (past the `checkcast` of generic factories)
    pub end: usize,

    /// Innermost enclosing site, as an index into the method's sorted sites
    pub parent: Option<usize>,
}

/// Argument of a factory call binding a named parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter field bound, if the argument has one of the binding forms
    ///
    ///   - `getstatic F` binds `F` without a default
    ///   - `<expr> dup putstatic F` binds `F` with `<expr>` as the default
    pub field: Option<FieldRef>,

    /// Range of the whole argument
    pub range: Range<usize>,

    /// Range of the default value expression
    pub default: Option<Range<usize>>,
}

impl LambdaSite {
    /// Index of the first instruction of the site
    pub fn start(&self) -> usize {
        self.parameters
            .first()
            .map_or(self.body.start, |parameter| parameter.range.start)
    }

    pub fn range(&self) -> Range<usize> {
        self.start()..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start() <= index && index < self.end
    }

    /// Ranges of all arguments, ending with the body
    pub fn argument_ranges(&self) -> impl Iterator<Item = &Range<usize>> + '_ {
        self.parameters
            .iter()
            .map(|parameter| &parameter.range)
            .chain(std::iter::once(&self.body))
    }

    /// Position of the parameter bound to a field
    pub fn binding(&self, field: &FieldRef) -> Option<usize> {
        self.parameters
            .iter()
            .position(|parameter| parameter.field.as_ref() == Some(field))
    }

    /// Fewest arguments the closure method can take (the other parameters all have defaults)
    pub fn required_parameters(&self) -> usize {
        self.parameters
            .iter()
            .rposition(|parameter| parameter.default.is_none())
            .map_or(0, |last| last + 1)
    }

    /// Type of the value the body leaves on the stack (`None` for an empty body)
    pub fn body_type(&self) -> Option<&FieldType> {
        if self.body.is_empty() {
            None
        } else {
            self.factory.descriptor.parameters.last()
        }
    }

    /// Is the variable scope starting at this index declared inside the site?
    ///
    /// Scopes usually start right after the store that initializes the variable.
    pub fn declares(&self, scope_start: usize) -> bool {
        self.start() < scope_start && scope_start <= self.call
    }
}

/// Indices of calls to lambda factories
pub fn factory_calls(
    unit: &MethodUnit,
    resolver: &dyn TypeResolver,
    conventions: &dyn Conventions,
) -> Result<Vec<usize>, Error> {
    let mut calls = vec![];
    for (index, insn) in unit.instructions.iter().enumerate() {
        if let Instruction::Invoke(InvokeType::Static, method) = insn {
            if let RefType::Object(owner) = &method.class {
                if conventions.is_factory(resolver, owner, &method.name, &method.descriptor)? {
                    calls.push(index);
                }
            }
        }
    }
    Ok(calls)
}

/// Detect the sites of the given factory calls
///
/// Sites come back sorted by start index (outer sites before the sites they contain) with
/// parents filled in and ids counting up from `first_id`.
pub fn detect_sites(
    unit: &MethodUnit,
    analysis: &FlowAnalysis,
    calls: &[usize],
    first_id: usize,
    resolver: &dyn TypeResolver,
    conventions: &dyn Conventions,
    context: &Context,
) -> Result<Vec<LambdaSite>, Error> {
    let mut sites = vec![];
    for &call in calls {
        let context = context.at_line(unit.line_at(call));
        let mut site = detect_site(unit, analysis, call, resolver, conventions, &context)?;
        site.line = unit.line_at(site.start());
        sites.push(site);
    }

    sites.sort_by(|a, b| a.start().cmp(&b.start()).then(b.end.cmp(&a.end)));
    link_parents(&mut sites, context)?;
    check_exception_handlers(unit, &sites, context)?;

    for (offset, site) in sites.iter_mut().enumerate() {
        site.id = first_id + offset;
        debug!(
            "Lambda site #{} in {}.{} (line {:?}): {} implementing {}, arguments {:?}",
            site.id,
            unit.owner,
            unit.name,
            site.line,
            site.factory,
            site.target,
            site.argument_ranges().collect::<Vec<_>>()
        );
    }
    Ok(sites)
}

fn detect_site(
    unit: &MethodUnit,
    analysis: &FlowAnalysis,
    call: usize,
    resolver: &dyn TypeResolver,
    conventions: &dyn Conventions,
    context: &Context,
) -> Result<LambdaSite, Error> {
    let factory = match &unit.instructions[call] {
        Instruction::Invoke(InvokeType::Static, method) => method.clone(),
        other => {
            return Err(Error::malformed(
                context,
                format!("expected a factory call, found {}", other.mnemonic()),
            ))
        }
    };
    analysis
        .require_reachable(call)
        .map_err(|err| Error::from_jvm(context, err))?;

    let (target, absorbs_cast) = target_type(&factory, unit.instructions.get(call + 1))
        .ok_or_else(|| {
            Error::malformed(
                context,
                format!("cannot tell which type {} produces", factory),
            )
        })?;
    let end = if absorbs_cast { call + 2 } else { call + 1 };

    // Partition the arguments, from the last one backwards
    let argument_count = factory.descriptor.parameters.len();
    let depth = stack_depth(analysis, call, context)?;
    if depth < argument_count {
        return Err(Error::malformed(
            context,
            format!("stack is too shallow for the {} arguments of {}", argument_count, factory),
        ));
    }
    let mut ranges = vec![];
    let mut argument_end = call;
    for argument in (0..argument_count).rev() {
        let argument_depth = depth - argument_count + argument;
        let start = argument_start(unit, analysis, argument_end, argument_depth, context)?;
        ranges.push(start..argument_end);
        argument_end = start;
    }
    ranges.reverse();

    let body = ranges.pop().unwrap_or(call..call);
    let mut parameters: Vec<Parameter> = vec![];
    for range in ranges {
        let parameter = parameter_binding(unit, range, resolver, conventions)?;
        if let Some(field) = &parameter.field {
            if parameters.iter().any(|other| other.field.as_ref() == Some(field)) {
                return Err(Error::malformed(
                    context,
                    format!("parameter {} is already bound", field.name),
                ));
            }
        }
        parameters.push(parameter);
    }

    Ok(LambdaSite {
        id: 0,
        line: None,
        factory,
        target,
        parameters,
        body,
        call,
        end,
        parent: None,
    })
}

fn stack_depth(analysis: &FlowAnalysis, index: usize, context: &Context) -> Result<usize, Error> {
    analysis
        .stack_depth(index)
        .ok_or_else(|| Error::malformed(context, format!("instruction {} is unreachable", index)))
}

/// Last instruction before `end` that sees the stack at the given depth
fn scan_back(
    analysis: &FlowAnalysis,
    end: usize,
    depth: usize,
    context: &Context,
) -> Result<usize, Error> {
    (0..end)
        .rev()
        .find(|index| analysis.stack_depth(*index) == Some(depth))
        .ok_or_else(|| {
            Error::malformed(
                context,
                format!("no instruction before {} starts at stack depth {}", end, depth),
            )
        })
}

/// Start of the argument that ends at `end` and starts at stack depth `depth`
fn argument_start(
    unit: &MethodUnit,
    analysis: &FlowAnalysis,
    end: usize,
    depth: usize,
    context: &Context,
) -> Result<usize, Error> {
    let instructions = &unit.instructions;
    let mut start = scan_back(analysis, end, depth, context)?;

    loop {
        let into_range = |target: &usize| start < *target && *target <= end;

        // Branches of a conditional that jump to (or past) the candidate start
        let mut branches: Vec<usize> = instructions[..start]
            .iter()
            .enumerate()
            .filter(|(_, insn)| {
                insn.is_conditional_jump() && insn.jump_targets().into_iter().any(into_range)
            })
            .map(|(index, _)| index)
            .collect();
        let else_branch = match start.checked_sub(1).map(|before| &instructions[before]) {
            Some(Instruction::Goto(target)) => into_range(target),
            _ => false,
        };
        if else_branch {
            let to_else = instructions[..start].iter().enumerate().filter(|(_, insn)| {
                insn.is_conditional_jump() && insn.jump_targets().contains(&&start)
            });
            let before = branches.len();
            branches.extend(to_else.map(|(index, _)| index));
            if branches.len() == before {
                return Err(Error::malformed(
                    context,
                    format!("unclassifiable conditional shape before instruction {}", start),
                ));
            }
        }
        if branches.is_empty() {
            break;
        }

        let mut earliest = start;
        for branch in branches {
            earliest = earliest.min(scan_back(analysis, branch, depth, context)?);
        }
        if earliest >= start {
            return Err(Error::malformed(
                context,
                format!("unclassifiable conditional shape before instruction {}", start),
            ));
        }
        start = earliest;
    }

    check_contiguous(unit, start..end, context)?;
    Ok(start)
}

/// Control flow may only enter the argument at its start and leave it at its end
fn check_contiguous(
    unit: &MethodUnit,
    range: Range<usize>,
    context: &Context,
) -> Result<(), Error> {
    for (index, insn) in unit.instructions.iter().enumerate() {
        let inside = range.contains(&index);
        for target in insn.jump_targets() {
            let allowed = if inside {
                range.start <= *target && *target <= range.end
            } else {
                *target <= range.start || *target > range.end
            };
            if !allowed {
                return Err(Error::malformed(
                    context,
                    format!(
                        "unclassifiable conditional shape: {} at {} jumps to {} \
                         across argument {:?}",
                        insn.mnemonic(),
                        index,
                        target,
                        range
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn parameter_binding(
    unit: &MethodUnit,
    range: Range<usize>,
    resolver: &dyn TypeResolver,
    conventions: &dyn Conventions,
) -> Result<Parameter, Error> {
    let is_parameter = |field: &FieldRef| {
        conventions.is_parameter_field(resolver, &field.class, &field.name)
    };

    let instructions = &unit.instructions[range.clone()];
    let (field, default) = match instructions {
        [Instruction::GetStatic(field)] => (field, None),
        [_, .., Instruction::Dup | Instruction::Dup2, Instruction::PutStatic(field)] => {
            (field, Some(range.start..range.end - 2))
        }
        _ => {
            return Ok(Parameter {
                field: None,
                range,
                default: None,
            })
        }
    };
    if !is_parameter(field)? {
        return Ok(Parameter {
            field: None,
            range,
            default: None,
        });
    }
    Ok(Parameter {
        field: Some(field.clone()),
        range,
        default,
    })
}

/// Fill in the parents of sorted sites, rejecting partial overlaps
fn link_parents(sites: &mut [LambdaSite], context: &Context) -> Result<(), Error> {
    let mut open: Vec<usize> = vec![];
    for index in 0..sites.len() {
        let (start, end) = (sites[index].start(), sites[index].end);
        while let Some(&top) = open.last() {
            if sites[top].end <= start {
                open.pop();
            } else {
                break;
            }
        }
        if let Some(&parent) = open.last() {
            let outer = &sites[parent];
            let context = context.at_line(outer.line);
            if end > outer.end {
                return Err(Error::malformed(
                    &context,
                    format!(
                        "lambda sites {:?} and {:?} partially overlap",
                        outer.range(),
                        start..end
                    ),
                ));
            }
            if start < outer.body.start || end > outer.body.end {
                return Err(Error::malformed(
                    &context,
                    "lambda nested inside a parameter of another lambda",
                ));
            }
            sites[index].parent = Some(parent);
        }
        open.push(index);
    }
    Ok(())
}

/// Exception handlers must either lie entirely inside a site body or not touch the site
///
/// A handler covering a whole site is fine, since the site becomes a single construction.
fn check_exception_handlers(
    unit: &MethodUnit,
    sites: &[LambdaSite],
    context: &Context,
) -> Result<(), Error> {
    for handler in &unit.exception_handlers {
        for site in sites {
            let body = &site.body;
            let inside_body = body.start <= handler.start
                && handler.end <= body.end
                && body.contains(&handler.handler);
            if inside_body {
                continue;
            }
            let range = site.range();
            let cuts_range = (range.start < handler.start && handler.start < range.end)
                || (range.start < handler.end && handler.end < range.end);
            if range.contains(&handler.handler) || cuts_range {
                return Err(Error::malformed(
                    &context.at_line(site.line),
                    format!(
                        "exception handler {}..{} -> {} crosses a lambda boundary",
                        handler.start, handler.end, handler.handler
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::LocalKind;
    use crate::jvm::code::OrdComparison;
    use crate::jvm::Name;
    use crate::weave::fixtures::*;
    use Instruction::*;

    fn detect(unit: &MethodUnit) -> Result<Vec<LambdaSite>, Error> {
        let resolver = resolver();
        let conventions = conventions();
        let analysis = FlowAnalysis::analyze(unit, &resolver).unwrap();
        let calls = factory_calls(unit, &resolver, &conventions)?;
        detect_sites(unit, &analysis, &calls, 0, &resolver, &conventions, &Context::default())
    }

    #[test]
    fn straight_line_arguments() {
        // IntUnaryOperator f = fn(x, x + n);
        let unit = method(
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
        let sites = detect(&unit).unwrap();
        assert_eq!(sites.len(), 1);
        let site = &sites[0];
        assert_eq!(site.parameters[0].range, 0..1);
        assert_eq!(site.parameters[0].field, Some(param_x()));
        assert_eq!(site.body, 1..4);
        assert_eq!(site.range(), 0..5);
        assert_eq!(site.target.as_str(), "java/util/function/IntUnaryOperator");
    }

    #[test]
    fn ternary_body_is_one_range() {
        // fn(x, x > 0 ? x : -x)
        let unit = method(
            "()Ljava/util/function/IntUnaryOperator;",
            vec![
                GetStatic(param_x()),
                GetStatic(param_x()),
                If(OrdComparison::LE, 5),
                GetStatic(param_x()),
                Goto(7),
                GetStatic(param_x()),
                INeg,
                Invoke(InvokeType::Static, factory("fn")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let sites = detect(&unit).unwrap();
        assert_eq!(sites[0].body, 1..7);
        assert_eq!(sites[0].parameters[0].range, 0..1);
    }

    #[test]
    fn short_circuit_condition_is_one_range() {
        // supply((a || b) ? 1 : 2)
        let unit = method(
            "(ZZ)Ljava/util/function/IntSupplier;",
            vec![
                Load(LocalKind::Int, 0),
                If(OrdComparison::NE, 4),
                Load(LocalKind::Int, 1),
                If(OrdComparison::EQ, 6),
                IConst(1),
                Goto(7),
                IConst(2),
                Invoke(InvokeType::Static, factory("supply")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let sites = detect(&unit).unwrap();
        assert_eq!(sites[0].body, 0..7);
    }

    #[test]
    fn defaults_and_generic_targets() {
        // (IntSupplier) generic(...) absorbing the cast, with a defaulted parameter
        let unit = method(
            "()Ljava/lang/Object;",
            vec![
                IConst(3),
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
        let sites = detect(&unit).unwrap();
        let site = &sites[0];
        assert_eq!(site.parameters[0].default, Some(0..1));
        assert_eq!(site.required_parameters(), 0);
        assert_eq!(site.end, 7);
        assert_eq!(site.target, int_supplier());
    }

    #[test]
    fn nested_sites_get_parents() {
        // supplyObject(fn(x, x + 1))
        let unit = method(
            "()Ljava/util/function/Supplier;",
            vec![
                GetStatic(param_x()),
                GetStatic(param_x()),
                IConst(1),
                IAdd,
                Invoke(InvokeType::Static, factory("fn")),
                Invoke(InvokeType::Static, factory("supplyObject")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let sites = detect(&unit).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].call, 5);
        assert_eq!(sites[0].body, 0..5);
        assert_eq!(sites[1].call, 4);
        assert_eq!(sites[1].parent, Some(0));
        assert_eq!((sites[0].id, sites[1].id), (0, 1));
    }

    #[test]
    fn duplicate_bindings_are_rejected() {
        let unit = method(
            "()Ljava/lang/Object;",
            vec![
                GetStatic(param_x()),
                GetStatic(param_x()),
                IConst(1),
                Invoke(InvokeType::Static, factory("fn2")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        let err = detect(&unit).unwrap_err();
        assert!(matches!(err, Error::MalformedSite { ref message, .. }
            if message.contains("already bound")));
    }

    #[test]
    fn ternary_inside_arithmetic() {
        // supply((c ? 1 : 2) + 3)
        let unit = method(
            "(Z)Ljava/util/function/IntSupplier;",
            vec![
                Load(LocalKind::Int, 0),
                If(OrdComparison::EQ, 4),
                IConst(1),
                Goto(5),
                IConst(2),
                IConst(3),
                IAdd,
                Invoke(InvokeType::Static, factory("supply")),
                Return(Some(LocalKind::Reference)),
            ],
        );
        assert_eq!(detect(&unit).unwrap()[0].body, 0..7);
    }

    #[test]
    fn jumps_into_an_argument_are_rejected() {
        let unit = method(
            "()V",
            vec![
                IConst(1),
                IConst(2),
                IAdd,
                Invoke(InvokeType::Static, factory("supply")),
                Store(LocalKind::Reference, 0),
                IConst(9),
                Goto(1),
            ],
        );
        let err = detect(&unit).unwrap_err();
        assert!(matches!(err, Error::MalformedSite { ref message, .. }
            if message.contains("unclassifiable")));
    }
}

use super::*;
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::MethodUnit;
use crate::jvm::{Error, UnqualifiedName, VerifierErrorKind};

/// Result of running the dataflow analysis over a method body
///
/// `frames[i]` is the frame right before instruction `i` runs, or `None` if the instruction can
/// never be reached.
#[derive(Debug, Clone)]
pub struct FlowAnalysis {
    pub frames: Vec<Option<VerifierFrame>>,

    /// Deepest the stack gets (counting wide values twice)
    pub max_stack: usize,

    /// Number of local slots touched
    pub max_locals: usize,
}

impl FlowAnalysis {
    /// Run the analysis to a fixpoint, starting from the method entry
    pub fn analyze(unit: &MethodUnit, resolver: &dyn TypeResolver) -> Result<FlowAnalysis, Error> {
        let instructions = &unit.instructions;
        let len = instructions.len();
        if len == 0 {
            return Err(Error::MalformedCode {
                offset: 0,
                message: String::from("method body is empty"),
            });
        }
        check_targets(unit)?;

        let entry = VerifierFrame::method_entry(
            &unit.owner,
            unit.is_static(),
            unit.name == UnqualifiedName::INIT,
            &unit.descriptor.parameters,
        );
        let mut analysis = FlowAnalysis {
            max_stack: 0,
            max_locals: entry.locals_size(),
            frames: vec![None; len],
        };
        analysis.frames[0] = Some(entry);

        let mut queued = vec![false; len];
        let mut worklist = vec![0];
        queued[0] = true;

        while let Some(index) = worklist.pop() {
            queued[index] = false;
            let before = match &analysis.frames[index] {
                Some(frame) => frame.clone(),
                None => continue,
            };
            let insn = &instructions[index];

            let mut after = before.clone();
            after
                .verify_instruction(insn, index, &unit.owner, instructions)
                .map_err(|kind| Error::VerifierError {
                    index,
                    instruction: insn.mnemonic().to_owned(),
                    kind,
                })?;
            analysis.max_stack = analysis.max_stack.max(after.stack_size());
            analysis.max_locals = analysis.max_locals.max(after.locals_size());

            // Exception edges see the locals both before and after the instruction
            for handler in &unit.exception_handlers {
                if handler.start <= index && index < handler.end {
                    let catch_type = handler.catch_type.as_ref();
                    for locals in [&before.locals, &after.locals] {
                        let entry = VerifierFrame::handler_entry(locals, catch_type);
                        analysis.max_stack = analysis.max_stack.max(entry.stack_size());
                        analysis.flow_into(
                            handler.handler,
                            entry,
                            unit,
                            resolver,
                            &mut worklist,
                            &mut queued,
                        )?;
                    }
                }
            }

            for target in insn.jump_targets() {
                analysis.flow_into(
                    *target,
                    after.clone(),
                    unit,
                    resolver,
                    &mut worklist,
                    &mut queued,
                )?;
            }
            if insn.falls_through() {
                if index + 1 >= len {
                    return Err(Error::VerifierError {
                        index,
                        instruction: insn.mnemonic().to_owned(),
                        kind: VerifierErrorKind::FallsOffEnd,
                    });
                }
                analysis.flow_into(index + 1, after, unit, resolver, &mut worklist, &mut queued)?;
            }
        }

        // Jumps out of live code must land on live code
        for (index, insn) in instructions.iter().enumerate() {
            if analysis.frames[index].is_some() {
                for target in insn.jump_targets() {
                    analysis.require_reachable(*target)?;
                }
            }
        }

        log::trace!(
            "Analyzed {}.{}: max stack {}, max locals {}",
            unit.owner,
            unit.name,
            analysis.max_stack,
            analysis.max_locals
        );
        Ok(analysis)
    }

    fn flow_into(
        &mut self,
        target: usize,
        incoming: VerifierFrame,
        unit: &MethodUnit,
        resolver: &dyn TypeResolver,
        worklist: &mut Vec<usize>,
        queued: &mut [bool],
    ) -> Result<(), Error> {
        let changed = match self.frames[target].as_mut() {
            None => {
                self.frames[target] = Some(incoming);
                true
            }
            Some(existing) => existing.merge(&incoming, resolver).map_err(|err| match err {
                MergeError::Verifier(kind) => Error::VerifierError {
                    index: target,
                    instruction: unit.instructions[target].mnemonic().to_owned(),
                    kind,
                },
                MergeError::Resolver(err) => err,
            })?,
        };
        if changed && !queued[target] {
            queued[target] = true;
            worklist.push(target);
        }
        Ok(())
    }

    /// Can the instruction at this index ever run?
    pub fn is_reachable(&self, index: usize) -> bool {
        matches!(self.frames.get(index), Some(Some(_)))
    }

    /// Frame before the instruction, failing if the instruction is dead
    pub fn require_reachable(&self, index: usize) -> Result<&VerifierFrame, Error> {
        match self.frames.get(index) {
            Some(Some(frame)) => Ok(frame),
            Some(None) => Err(Error::VerifierError {
                index,
                instruction: String::from("(dead code)"),
                kind: VerifierErrorKind::UnreachableCode(index),
            }),
            None => Err(Error::InvalidJumpTarget(index)),
        }
    }

    /// Number of values (not slots) on the stack before the instruction
    pub fn stack_depth(&self, index: usize) -> Option<usize> {
        self.frames
            .get(index)
            .and_then(Option::as_ref)
            .map(|frame| frame.stack.len())
    }
}

/// Every jump target and exception range must be inside the code
fn check_targets(unit: &MethodUnit) -> Result<(), Error> {
    let len = unit.instructions.len();
    for insn in &unit.instructions {
        for target in insn.jump_targets() {
            if *target >= len {
                return Err(Error::InvalidJumpTarget(*target));
            }
        }
    }
    for handler in &unit.exception_handlers {
        if handler.start > handler.end || handler.end > len {
            return Err(Error::InvalidJumpTarget(handler.end));
        }
        if handler.handler >= len {
            return Err(Error::InvalidJumpTarget(handler.handler));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::CachingResolver;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::{ExceptionRange, Instruction, LocalKind, OrdComparison};
    use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor};
    use VerificationType::*;

    fn unit(descriptor: &str, instructions: Vec<Instruction>) -> MethodUnit {
        MethodUnit {
            owner: BinaryName::from_string(String::from("me/alec/Flow")).unwrap(),
            access_flags: MethodAccessFlags::STATIC,
            name: UnqualifiedName::from_string(String::from("run")).unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            instructions,
            exception_handlers: vec![],
            local_variables: vec![],
            has_local_variable_table: false,
            line_numbers: vec![],
            max_locals: 0,
        }
    }

    #[test]
    fn straight_line_depths() {
        let resolver = CachingResolver::builtin();
        let unit = unit(
            "(J)J",
            vec![
                Load(LocalKind::Long, 0),
                LConst(1),
                LAdd,
                Return(Some(LocalKind::Long)),
            ],
        );
        let analysis = FlowAnalysis::analyze(&unit, &resolver).unwrap();
        assert_eq!(analysis.max_stack, 4);
        assert_eq!(analysis.max_locals, 2);
        assert_eq!(analysis.stack_depth(2), Some(2));
        assert_eq!(analysis.stack_depth(3), Some(1));
    }

    #[test]
    fn loops_reach_a_fixpoint() {
        // int i = 0; while (i < n) i++; return i;
        let resolver = CachingResolver::builtin();
        let unit = unit(
            "(I)I",
            vec![
                IConst(0),
                Store(LocalKind::Int, 1),
                Load(LocalKind::Int, 1),
                Load(LocalKind::Int, 0),
                IfICmp(OrdComparison::GE, 7),
                IInc(1, 1),
                Goto(2),
                Load(LocalKind::Int, 1),
                Return(Some(LocalKind::Int)),
            ],
        );
        let analysis = FlowAnalysis::analyze(&unit, &resolver).unwrap();
        let frame = analysis.require_reachable(2).unwrap();
        assert_eq!(frame.locals, vec![Integer, Integer]);
        assert_eq!(analysis.max_locals, 2);
    }

    #[test]
    fn merged_locals_lose_their_type() {
        let resolver = CachingResolver::builtin();
        let unit = unit(
            "(I)V",
            vec![
                Load(LocalKind::Int, 0),
                If(OrdComparison::EQ, 5),
                FConst(1.0),
                Store(LocalKind::Float, 1),
                Goto(7),
                IConst(1),
                Store(LocalKind::Int, 1),
                Return(None),
            ],
        );
        let analysis = FlowAnalysis::analyze(&unit, &resolver).unwrap();
        assert_eq!(analysis.require_reachable(7).unwrap().locals, vec![Integer, Top]);
    }

    #[test]
    fn handlers_see_the_caught_type() {
        let resolver = CachingResolver::builtin();
        let mut unit = unit(
            "()I",
            vec![
                IConst(1),
                IConst(0),
                IDiv,
                Return(Some(LocalKind::Int)),
                Pop,
                IConst(-1),
                Return(Some(LocalKind::Int)),
            ],
        );
        unit.exception_handlers.push(ExceptionRange {
            start: 0,
            end: 3,
            handler: 4,
            catch_type: Some(
                BinaryName::from_string(String::from("java/lang/ArithmeticException")).unwrap(),
            ),
        });
        let analysis = FlowAnalysis::analyze(&unit, &resolver).unwrap();
        let handler = analysis.require_reachable(4).unwrap();
        assert_eq!(handler.stack.len(), 1);
        assert_eq!(analysis.max_stack, 2);
    }

    #[test]
    fn dead_code_has_no_frame() {
        let resolver = CachingResolver::builtin();
        let unit = unit("()V", vec![Return(None), IConst(1), Pop, Return(None)]);
        let analysis = FlowAnalysis::analyze(&unit, &resolver).unwrap();
        assert!(analysis.is_reachable(0));
        assert!(!analysis.is_reachable(1));
        assert!(matches!(
            analysis.require_reachable(2),
            Err(Error::VerifierError {
                kind: VerifierErrorKind::UnreachableCode(2),
                ..
            })
        ));
        assert_eq!(analysis.frames.iter().filter(|frame| frame.is_some()).count(), 1);
    }

    #[test]
    fn bad_control_flow_is_rejected() {
        let resolver = CachingResolver::builtin();
        let falls_off = unit("()V", vec![IConst(1), Pop]);
        assert!(matches!(
            FlowAnalysis::analyze(&falls_off, &resolver),
            Err(Error::VerifierError {
                index: 1,
                kind: VerifierErrorKind::FallsOffEnd,
                ..
            })
        ));

        let out_of_bounds = unit("()V", vec![Goto(3), Return(None)]);
        assert!(matches!(
            FlowAnalysis::analyze(&out_of_bounds, &resolver),
            Err(Error::InvalidJumpTarget(3))
        ));

        let mismatched = unit(
            "(I)V",
            vec![
                Load(LocalKind::Int, 0),
                If(OrdComparison::EQ, 3),
                IConst(1),
                Return(None),
            ],
        );
        assert!(matches!(
            FlowAnalysis::analyze(&mismatched, &resolver),
            Err(Error::VerifierError {
                index: 3,
                kind: VerifierErrorKind::IncompatibleStacks,
                ..
            })
        ));
    }
}

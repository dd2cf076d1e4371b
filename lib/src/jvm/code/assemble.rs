//! Turn a [`MethodUnit`] back into a `Code` attribute
//!
//! Besides encoding the instructions, this is where everything the JVM needs on top of the code
//! array gets recomputed from a fresh flow analysis: `max_stack`, `max_locals`, and the
//! `StackMapTable`. Instructions that the analysis finds to be unreachable can't be described by a
//! frame, so they are overwritten with `nop ... athrow` (which verifies under the frame
//! `[] / [java/lang/Throwable]`) and exception ranges are cut around them.

use crate::jvm::class_file::{
    BytecodeArray, BytecodeIndex, ClassConstantIndex, Code, ConstantIndex, ConstantsPool,
    ConstantsWriter, ExceptionHandler, LineNumber, LineNumberTable, LocalVariableEntry,
    LocalVariableTable, StackMapTable, Version,
};
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::{
    encode, BuiltCode, ExceptionRange, Instruction, MethodUnit, MAX_CODE_LENGTH,
};
use crate::jvm::verifier::{FlowAnalysis, SerializableFrame, VerifierFrame};
use crate::jvm::{
    BinaryName, Error, MethodAccessFlags, MethodDescriptor, Name, RenderDescriptor,
    UnqualifiedName,
};
use std::collections::BTreeMap;

impl MethodUnit {
    /// Method unit for freshly generated code
    pub fn from_built(
        owner: BinaryName,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        code: BuiltCode,
    ) -> MethodUnit {
        let BuiltCode {
            instructions,
            exception_handlers,
            local_variables,
            line_numbers,
        } = code;
        let has_local_variable_table = !local_variables.is_empty();
        MethodUnit {
            owner,
            access_flags,
            name,
            descriptor,
            instructions,
            exception_handlers,
            local_variables,
            has_local_variable_table,
            line_numbers,
            max_locals: 0,
        }
    }

    /// Encode the method body, computing frames and stack/locals sizes
    ///
    /// New constants get added to `constants`. Sub-attributes of the code other than the line
    /// number and local variable tables are not carried over.
    pub fn assemble(
        &self,
        constants: &mut ConstantsPool,
        resolver: &dyn TypeResolver,
        version: Version,
    ) -> Result<Code, Error> {
        let analysis = FlowAnalysis::analyze(self, resolver)?;

        // Overwrite dead code, remembering where each dead run starts
        let mut instructions = self.instructions.clone();
        let mut dead_runs: Vec<(usize, usize)> = vec![];
        let mut index = 0;
        while index < instructions.len() {
            if analysis.is_reachable(index) {
                index += 1;
                continue;
            }
            let start = index;
            while index < instructions.len() && !analysis.is_reachable(index) {
                instructions[index] = Instruction::Nop;
                index += 1;
            }
            instructions[index - 1] = Instruction::AThrow;
            dead_runs.push((start, index));
        }
        if !dead_runs.is_empty() {
            log::trace!(
                "Replaced {} dead instruction run(s) in {}.{}",
                dead_runs.len(),
                self.owner,
                self.name
            );
        }

        let exception_handlers =
            split_exception_ranges(&self.exception_handlers, &dead_runs, &analysis);

        let encoded = encode(&instructions, constants)?;
        let offsets = &encoded.offsets;
        let code_len = encoded.bytes.len();
        if code_len > MAX_CODE_LENGTH {
            return Err(Error::MethodCodeOverflow(code_len));
        }
        if analysis.max_stack > u16::MAX as usize {
            return Err(Error::MethodCodeMaxStackOverflow(analysis.max_stack));
        }
        let max_locals = analysis
            .max_locals
            .max(self.parameter_slots() as usize)
            .max(self.max_locals as usize);
        if max_locals > u16::MAX as usize {
            return Err(Error::MethodCodeMaxLocalsOverflow(max_locals));
        }

        let mut attributes = vec![];

        if version.uses_stack_map_frames() {
            let frames = self.frame_points(
                &instructions,
                &analysis,
                &dead_runs,
                &exception_handlers,
                &encoded.widened_conditionals,
            );
            let entry = VerifierFrame::method_entry(
                &self.owner,
                self.is_static(),
                self.name == UnqualifiedName::INIT,
                &self.descriptor.parameters,
            )
            .into_serializable(constants, offsets)?;

            let mut stack_map_frames = vec![];
            let mut previous: Option<(usize, SerializableFrame)> = None;
            for (index, frame) in frames {
                let frame = frame.into_serializable(constants, offsets)?;
                let offset = offsets[index];
                let (delta, previous_frame) = match &previous {
                    None => (offset, &entry),
                    Some((previous_offset, previous_frame)) => {
                        (offset - previous_offset - 1, previous_frame)
                    }
                };
                stack_map_frames.push(frame.stack_map_frame(delta as u16, previous_frame));
                previous = Some((offset, frame));
            }
            if !stack_map_frames.is_empty() {
                attributes.push(constants.get_attribute(StackMapTable(stack_map_frames))?);
            }
        }

        let line_numbers: Vec<LineNumber> = self
            .line_numbers
            .iter()
            .filter(|line| line.start < instructions.len())
            .map(|line| LineNumber {
                start_pc: BytecodeIndex(offsets[line.start] as u16),
                line_number: line.line,
            })
            .collect();
        if !line_numbers.is_empty() {
            attributes.push(constants.get_attribute(LineNumberTable(line_numbers))?);
        }

        if self.has_local_variable_table {
            let mut entries = vec![];
            for variable in &self.local_variables {
                if variable.start >= variable.end || variable.end > instructions.len() {
                    continue;
                }
                let start = offsets[variable.start];
                entries.push(LocalVariableEntry {
                    start_pc: BytecodeIndex(start as u16),
                    length: (offsets[variable.end] - start) as u16,
                    name_index: constants.get_utf8(variable.name.as_str())?,
                    descriptor_index: constants.get_utf8(variable.descriptor.render())?,
                    index: variable.slot,
                });
            }
            attributes.push(constants.get_attribute(LocalVariableTable(entries))?);
        }

        let exception_table = exception_handlers
            .iter()
            .map(|range| {
                let catch_type = match &range.catch_type {
                    None => ClassConstantIndex(ConstantIndex::ZERO),
                    Some(class) => class.constant_index(constants)?,
                };
                Ok(ExceptionHandler {
                    start_pc: BytecodeIndex(offsets[range.start] as u16),
                    end_pc: BytecodeIndex(offsets[range.end] as u16),
                    handler_pc: BytecodeIndex(offsets[range.handler] as u16),
                    catch_type,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Code {
            max_stack: analysis.max_stack as u16,
            max_locals: max_locals as u16,
            code_array: BytecodeArray(encoded.bytes),
            exception_table,
            attributes,
        })
    }

    /// Frames needed in the `StackMapTable`, in increasing index order
    fn frame_points(
        &self,
        instructions: &[Instruction],
        analysis: &FlowAnalysis,
        dead_runs: &[(usize, usize)],
        exception_handlers: &[ExceptionRange],
        widened_conditionals: &[usize],
    ) -> BTreeMap<usize, VerifierFrame> {
        let mut points = BTreeMap::new();
        let mut add = |index: usize| {
            if let Some(Some(frame)) = analysis.frames.get(index) {
                points.entry(index).or_insert_with(|| frame.clone());
            }
        };

        for (index, insn) in instructions.iter().enumerate() {
            if !analysis.is_reachable(index) {
                continue;
            }
            for target in insn.jump_targets() {
                add(*target);
            }
            if !insn.falls_through() {
                add(index + 1);
            }
        }
        for range in exception_handlers {
            add(range.handler);
        }
        for index in widened_conditionals {
            add(index + 1);
        }

        for (start, _) in dead_runs {
            points.insert(*start, VerifierFrame::dead_code());
        }
        points
    }
}

/// Cut exception ranges so they don't cover dead code, and drop ranges whose handler is dead
fn split_exception_ranges(
    ranges: &[ExceptionRange],
    dead_runs: &[(usize, usize)],
    analysis: &FlowAnalysis,
) -> Vec<ExceptionRange> {
    let mut split = vec![];
    for range in ranges {
        if !analysis.is_reachable(range.handler) {
            continue;
        }
        let mut start = range.start;
        for (dead_start, dead_end) in dead_runs {
            if *dead_end <= start || *dead_start >= range.end {
                continue;
            }
            if start < *dead_start {
                split.push(ExceptionRange {
                    start,
                    end: *dead_start,
                    handler: range.handler,
                    catch_type: range.catch_type.clone(),
                });
            }
            start = *dead_end;
        }
        if start < range.end {
            split.push(ExceptionRange {
                start,
                end: range.end,
                handler: range.handler,
                catch_type: range.catch_type.clone(),
            });
        }
    }
    split
}

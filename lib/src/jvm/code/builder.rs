use crate::jvm::code::{ExceptionRange, Instruction, LocalVariable, SourceLine};
use crate::jvm::{BinaryName, Error, FieldType, UnqualifiedName};
use std::fmt;

/// Opaque label
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Label(usize);

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// Generates new labels
pub trait LabelGenerator<Lbl> {
    /// Generate a fresh label
    fn fresh_label(&mut self) -> Lbl;
}

/// Builds a new instruction stream, where jumps go to labels
///
/// Labels get placed in between instructions. Several labels can be placed at the same position,
/// and a label placed after the last instruction denotes the end of the code (useful for exception
/// ranges and variable scopes, not for jumps).
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instructions: Vec<Instruction<Label>>,

    /// Instruction index of every placed label
    label_positions: Vec<Option<usize>>,
    exception_handlers: Vec<ExceptionRange<Label>>,
    local_variables: Vec<LocalVariable<Label>>,
    line_numbers: Vec<SourceLine<Label>>,
}

/// Output of a [`CodeBuilder`], with labels resolved into instruction indices
#[derive(Debug, Clone, Default)]
pub struct BuiltCode {
    pub instructions: Vec<Instruction>,
    pub exception_handlers: Vec<ExceptionRange>,
    pub local_variables: Vec<LocalVariable>,
    pub line_numbers: Vec<SourceLine>,
}

impl LabelGenerator<Label> for CodeBuilder {
    fn fresh_label(&mut self) -> Label {
        let label = Label(self.label_positions.len());
        self.label_positions.push(None);
        label
    }
}

impl CodeBuilder {
    pub fn new() -> CodeBuilder {
        CodeBuilder::default()
    }

    /// Index the next instruction will have
    pub fn current_index(&self) -> usize {
        self.instructions.len()
    }

    /// Place a label at the current position
    ///
    /// Panics in debug builds if the label was already placed.
    pub fn place_label(&mut self, label: Label) {
        debug_assert!(self.label_positions[label.0].is_none(), "{:?} placed twice", label);
        self.label_positions[label.0] = Some(self.instructions.len());
    }

    /// Make a fresh label and place it at the current position
    pub fn here(&mut self) -> Label {
        let label = self.fresh_label();
        self.place_label(label);
        label
    }

    pub fn push(&mut self, instruction: Instruction<Label>) {
        self.instructions.push(instruction);
    }

    /// Last instruction pushed (if any)
    pub fn last(&self) -> Option<&Instruction<Label>> {
        self.instructions.last()
    }

    pub fn push_exception_handler(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<BinaryName>,
    ) {
        self.exception_handlers.push(ExceptionRange {
            start,
            end,
            handler,
            catch_type,
        });
    }

    pub fn push_local_variable(
        &mut self,
        start: Label,
        end: Label,
        name: UnqualifiedName,
        descriptor: FieldType,
        slot: u16,
    ) {
        self.local_variables.push(LocalVariable {
            start,
            end,
            name,
            descriptor,
            slot,
        });
    }

    /// Mark the next instruction as starting a source line
    pub fn push_line(&mut self, line: u16) {
        let start = self.here();
        self.line_numbers.push(SourceLine { start, line });
    }

    /// Resolve labels into indices
    pub fn finish(self) -> Result<BuiltCode, Error> {
        let CodeBuilder {
            instructions,
            label_positions,
            exception_handlers,
            local_variables,
            line_numbers,
        } = self;
        let instruction_count = instructions.len();

        let mut unplaced = None;
        let mut resolve = |label: &Label| match label_positions[label.0] {
            Some(index) => index,
            None => {
                unplaced.get_or_insert(label.0);
                instruction_count
            }
        };

        let instructions = instructions
            .iter()
            .map(|insn| insn.map_labels(&mut resolve))
            .collect();
        let exception_handlers = exception_handlers
            .iter()
            .map(|handler| handler.map_labels(&mut resolve))
            .collect();
        let local_variables = local_variables
            .iter()
            .map(|var| var.map_labels(&mut resolve))
            .collect();
        let line_numbers = line_numbers
            .iter()
            .map(|line| line.map_labels(&mut resolve))
            .collect();

        if let Some(label) = unplaced {
            return Err(Error::MalformedCode {
                offset: label,
                message: String::from("jump to a label that was never placed"),
            });
        }

        Ok(BuiltCode {
            instructions,
            exception_handlers,
            local_variables,
            line_numbers,
        })
    }
}

use crate::jvm::class_file::{
    Attribute, BytecodeIndex, ClassFile, Code, ConstantIndex, ConstantsReader,
    LineNumberTable, LocalVariableTable, Method,
};
use crate::jvm::code::{decode, DecodedCode, Instruction};
use crate::jvm::{
    BinaryName, Error, FieldType, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
    UnqualifiedName,
};

/// One method body, decoded into instructions with symbolic operands
///
/// Everything that refers to a position in the code (jumps, exception ranges, local variable
/// scopes, line numbers) is expressed as an index into `instructions`. An index equal to the
/// number of instructions denotes the end of the code.
#[derive(Debug, Clone)]
pub struct MethodUnit {
    pub owner: BinaryName,
    pub access_flags: MethodAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub instructions: Vec<Instruction>,
    pub exception_handlers: Vec<ExceptionRange>,
    pub local_variables: Vec<LocalVariable>,

    /// Was there a `LocalVariableTable` at all?
    pub has_local_variable_table: bool,
    pub line_numbers: Vec<SourceLine>,
    pub max_locals: u16,
}

/// Entry in the exception table
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRange<L = usize> {
    pub start: L,

    /// Exclusive end of the protected range
    pub end: L,
    pub handler: L,

    /// `None` catches everything (used for `finally`)
    pub catch_type: Option<BinaryName>,
}

/// Debug information about a local variable slot
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable<L = usize> {
    pub start: L,

    /// Exclusive end of the scope
    pub end: L,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
    pub slot: u16,
}

/// Source line starting at an instruction
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine<L = usize> {
    pub start: L,
    pub line: u16,
}

impl<L> ExceptionRange<L> {
    pub fn map_labels<L2>(&self, mut map_label: impl FnMut(&L) -> L2) -> ExceptionRange<L2> {
        ExceptionRange {
            start: map_label(&self.start),
            end: map_label(&self.end),
            handler: map_label(&self.handler),
            catch_type: self.catch_type.clone(),
        }
    }
}

impl<L> LocalVariable<L> {
    pub fn map_labels<L2>(&self, mut map_label: impl FnMut(&L) -> L2) -> LocalVariable<L2> {
        LocalVariable {
            start: map_label(&self.start),
            end: map_label(&self.end),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
            slot: self.slot,
        }
    }
}

impl<L> SourceLine<L> {
    pub fn map_labels<L2>(&self, mut map_label: impl FnMut(&L) -> L2) -> SourceLine<L2> {
        SourceLine {
            start: map_label(&self.start),
            line: self.line,
        }
    }
}

impl MethodUnit {
    /// Decode a method of a parsed class (`None` for abstract and native methods)
    pub fn from_class_method(
        class: &ClassFile,
        method: &Method,
    ) -> Result<Option<MethodUnit>, Error> {
        let code = match method.code(&class.constants)? {
            None => return Ok(None),
            Some(code) => code,
        };
        let (name, descriptor) = class.method_signature(method)?;
        let owner = class.this_class_name()?;
        MethodUnit::from_code(owner, method.access_flags, name, descriptor, &code, class)
            .map(Some)
    }

    fn from_code(
        owner: BinaryName,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        code: &Code,
        class: &ClassFile,
    ) -> Result<MethodUnit, Error> {
        let constants = &class.constants;
        let decoded = decode(&code.code_array.0, constants)?;
        let index_of = |BytecodeIndex(offset): BytecodeIndex| -> Result<usize, Error> {
            decoded
                .index_of(offset as usize)
                .ok_or(Error::InvalidJumpTarget(offset as usize))
        };

        let exception_handlers = code
            .exception_table
            .iter()
            .map(|handler| {
                let catch_type = if handler.catch_type.0 == ConstantIndex::ZERO {
                    None
                } else {
                    Some(BinaryName::from_constant_index(handler.catch_type, constants)?)
                };
                Ok(ExceptionRange {
                    start: index_of(handler.start_pc)?,
                    end: index_of(handler.end_pc)?,
                    handler: index_of(handler.handler_pc)?,
                    catch_type,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let local_variable_table =
            Attribute::find::<LocalVariableTable>(&code.attributes, constants)?;
        let has_local_variable_table = local_variable_table.is_some();
        let mut local_variables = vec![];
        for entry in local_variable_table.map_or(vec![], |table| table.0) {
            let end = entry.start_pc.0 as usize + entry.length as usize;
            let name = constants.utf8(entry.name_index)?;
            local_variables.push(LocalVariable {
                start: index_of(entry.start_pc)?,
                end: decoded
                    .index_of(end)
                    .ok_or(Error::InvalidJumpTarget(end))?,
                name: UnqualifiedName::from_string(name.to_owned())
                    .map_err(Error::BadDescriptor)?,
                descriptor: FieldType::parse_class_file(constants.utf8(entry.descriptor_index)?)?,
                slot: entry.index,
            });
        }

        let mut line_numbers = vec![];
        for attribute in &code.attributes {
            // `javac` emits one table, but the format allows several
            if attribute.is::<LineNumberTable>(constants) {
                for entry in attribute.decode::<LineNumberTable>()?.0 {
                    line_numbers.push(SourceLine {
                        start: index_of(entry.start_pc)?,
                        line: entry.line_number,
                    });
                }
            }
        }
        line_numbers.sort_by_key(|line| line.start);

        let DecodedCode { instructions, .. } = decoded;
        Ok(MethodUnit {
            owner,
            access_flags,
            name,
            descriptor,
            instructions,
            exception_handlers,
            local_variables,
            has_local_variable_table,
            line_numbers,
            max_locals: code.max_locals,
        })
    }

    /// Is this a static method (no `this` in slot 0)?
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Number of local slots taken up by parameters (including `this`)
    pub fn parameter_slots(&self) -> u16 {
        self.descriptor.parameter_length(!self.is_static()) as u16
    }

    /// Debug information for the variable in a slot, if it is in scope at an index
    pub fn variable_at(&self, slot: u16, index: usize) -> Option<&LocalVariable> {
        self.local_variables
            .iter()
            .find(|var| var.slot == slot && var.start <= index && index < var.end)
    }

    /// Debug information for the variable a store at `index` writes into
    ///
    /// The scope of a variable usually starts right after the store that initializes it.
    pub fn variable_stored_at(&self, slot: u16, index: usize) -> Option<&LocalVariable> {
        self.variable_at(slot, index)
            .or_else(|| self.variable_at(slot, index + 1))
    }

    /// Source line of the instruction at an index
    pub fn line_at(&self, index: usize) -> Option<u16> {
        self.line_numbers
            .iter()
            .take_while(|line| line.start <= index)
            .last()
            .map(|line| line.line)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::LocalKind;

    fn unit() -> MethodUnit {
        MethodUnit {
            owner: BinaryName::from_string(String::from("me/alec/Demo")).unwrap(),
            access_flags: MethodAccessFlags::STATIC,
            name: UnqualifiedName::from_string(String::from("run")).unwrap(),
            descriptor: MethodDescriptor::parse("(IJ)V").unwrap(),
            instructions: vec![
                Instruction::IConst(1),
                Instruction::Store(LocalKind::Int, 3),
                Instruction::Load(LocalKind::Int, 3),
                Instruction::Store(LocalKind::Int, 0),
                Instruction::Return(None),
            ],
            exception_handlers: vec![],
            local_variables: vec![
                LocalVariable {
                    start: 0,
                    end: 5,
                    name: UnqualifiedName::from_string(String::from("a")).unwrap(),
                    descriptor: FieldType::int(),
                    slot: 0,
                },
                LocalVariable {
                    start: 2,
                    end: 5,
                    name: UnqualifiedName::from_string(String::from("x")).unwrap(),
                    descriptor: FieldType::int(),
                    slot: 3,
                },
            ],
            has_local_variable_table: true,
            line_numbers: vec![
                SourceLine { start: 0, line: 10 },
                SourceLine { start: 2, line: 11 },
            ],
            max_locals: 4,
        }
    }

    #[test]
    fn variables_by_scope() {
        let unit = unit();
        assert!(unit.variable_at(3, 1).is_none());
        assert_eq!(unit.variable_stored_at(3, 1).unwrap().name.as_str(), "x");
        assert_eq!(unit.variable_at(0, 4).unwrap().name.as_str(), "a");
        assert_eq!(unit.parameter_slots(), 3);
    }

    #[test]
    fn lines_by_index() {
        let unit = unit();
        assert_eq!(unit.line_at(0), Some(10));
        assert_eq!(unit.line_at(1), Some(10));
        assert_eq!(unit.line_at(4), Some(11));
    }
}

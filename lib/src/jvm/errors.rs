use super::class_file::{Constant, ConstantIndex};
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// The input does not start with `0xCAFEBABE`
    BadMagic(u32),

    /// The input ended before a complete structure could be read
    UnexpectedEof {
        what: &'static str,
    },

    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },

    /// Constant at the index is missing or is not of the expected kind
    BadConstant {
        index: ConstantIndex,
        expected: &'static str,
    },

    /// A descriptor or name failed to parse
    BadDescriptor(String),

    /// Opcode is not one we can decode (eg. `jsr`/`ret`)
    UnsupportedOpcode {
        opcode: u8,
        offset: usize,
    },

    /// Bytecode could not be decoded (bad jump target, truncated instruction, etc.)
    MalformedCode {
        offset: usize,
        message: String,
    },

    MethodCodeOverflow(usize),
    MethodCodeMaxStackOverflow(usize),
    MethodCodeMaxLocalsOverflow(usize),

    /// Jump or exception handler points outside the instruction list
    InvalidJumpTarget(usize),

    /// Error while computing frames
    VerifierError {
        index: usize,
        instruction: String,
        kind: VerifierErrorKind,
    },

    /// Class could not be found by the type resolver
    MissingClass(String),
}

#[derive(Debug)]
pub enum VerifierErrorKind {
    EmptyStack,
    InvalidWidth(usize),
    NotArrayType,
    InvalidIndex(u16),
    InvalidType,

    /// Stacks at a join point have different depths or incompatible entries
    IncompatibleStacks,

    /// Instruction at this index is never reached, but something depends on it
    UnreachableCode(usize),

    /// Execution falls off the end of the method
    FallsOffEnd,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::BadMagic(magic) => write!(f, "bad class file magic {:#010x}", magic),
            Error::UnexpectedEof { what } => write!(f, "unexpected end of input reading {}", what),
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "constant pool overflow at offset {} inserting {:?}",
                offset, constant
            ),
            Error::BadConstant { index, expected } => {
                write!(f, "constant #{} is not a valid {}", index.0, expected)
            }
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
            Error::UnsupportedOpcode { opcode, offset } => write!(
                f,
                "unsupported opcode {:#04x} at bytecode offset {}",
                opcode, offset
            ),
            Error::MalformedCode { offset, message } => {
                write!(f, "malformed code at bytecode offset {}: {}", offset, message)
            }
            Error::MethodCodeOverflow(len) => write!(f, "method code is too long ({} bytes)", len),
            Error::MethodCodeMaxStackOverflow(size) => {
                write!(f, "method operand stack is too deep ({})", size)
            }
            Error::MethodCodeMaxLocalsOverflow(size) => {
                write!(f, "method uses too many locals ({})", size)
            }
            Error::InvalidJumpTarget(index) => write!(f, "invalid jump target {}", index),
            Error::VerifierError {
                index,
                instruction,
                kind,
            } => write!(
                f,
                "flow analysis failed at instruction {} ({}): {:?}",
                index, instruction, kind
            ),
            Error::MissingClass(name) => write!(f, "cannot resolve class {}", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

//! Read, analyze, and write JVM classes
//!
//! The layers here build on each other:
//!
//!   - [`class_file`] is the raw binary format, with constant pool indices everywhere
//!   - [`code`] decodes method bodies into instructions with symbolic operands (and encodes them
//!     back into bytes)
//!   - [`verifier`] runs a forward dataflow analysis over decoded instructions, producing the
//!     frames needed both for analysis and for `StackMapTable` attributes
//!   - [`class_graph`] answers structural questions about classes that are referenced but not
//!     being transformed (supertypes, members, annotations)
//!
//! ### Building a class
//!
//! ```
//! use closureweave::jvm::class_builder::ClassBuilder;
//! use closureweave::jvm::class_file::ClassFile;
//! use closureweave::jvm::class_graph::CachingResolver;
//! use closureweave::jvm::code::{CodeBuilder, Instruction::*, LocalKind};
//! use closureweave::jvm::*;
//!
//! # fn build() -> Result<(), Error> {
//! let mut class = ClassBuilder::new(
//!     BinaryName::from_string(String::from("me/alec/Point")).unwrap(),
//!     BinaryName::OBJECT,
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//! );
//! let mut code = CodeBuilder::new();
//! code.push(IConst(2));
//! code.push(IConst(3));
//! code.push(IAdd);
//! code.push(Return(Some(LocalKind::Int)));
//! class.add_method(
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!     UnqualifiedName::from_string(String::from("five")).unwrap(),
//!     MethodDescriptor::parse("()I")?,
//!     Some(code.finish()?),
//! );
//!
//! let bytes: Vec<u8> = class.build_bytes(&CachingResolver::builtin())?;
//! let class_file = ClassFile::parse(&bytes)?;
//! assert_eq!(class_file.methods.len(), 1);
//! # Ok(())
//! # }
//! ```

mod access_flags;
pub mod class_builder;
pub mod class_file;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;

//! Method bodies as lists of symbolic instructions
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. Rather than working on raw bytes, method bodies get decoded into a
//! [`MethodUnit`]: a flat list of [`Instruction`]s in which jump targets, exception ranges, local
//! variable scopes, and line numbers all refer to _instruction indices_ instead of byte offsets.
//! That makes it possible to splice instruction ranges in and out of a method without having to
//! track offsets by hand.
//!
//! ### Code generation
//!
//! Instructions get turned back into bytes by [`MethodUnit::assemble`]. This picks the shortest
//! encoding for every instruction, widens jumps that don't fit in 16 bits, and (since the JVM
//! needs a little bit more, see [`crate::jvm::verifier`]) recomputes `max_stack`, `max_locals`,
//! and the `StackMapTable`. Fresh code is generated top to bottom with a [`CodeBuilder`], using
//! [`Label`]s for jump targets that haven't been placed yet.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod assemble;
mod builder;
mod decode;
mod encode;
mod instructions;
mod method_unit;
mod operands;

pub use builder::*;
pub use decode::*;
pub use encode::*;
pub use instructions::*;
pub use method_unit::*;
pub use operands::*;

//! Extracting lambda sites into synthesized closure classes
//!
//! ### Sites
//!
//! A lambda site is a call to a static factory method (recognized through [`Conventions`]). The
//! last argument of the factory is the body of the closure, and the arguments before that bind
//! named parameters: static fields used as placeholders for the closure's arguments.
//!
//! ```java
//! IntBinaryOperator add = fn2(x, y, x + y);
//! ```
//!
//! Weaving a class happens in phases, one method at a time:
//!
//!   1. `site` finds the factory calls and delimits the instruction range of each argument
//!   2. `captures` classifies the variables every site uses from its surroundings
//!   3. `sam` picks the method each closure implements
//!   4. `synthesize` builds a class per site, with the body moved into that method
//!   5. `rewrite` replaces each site in the original method with a constructor call
//!
//! [`Weaver`] drives all of this for whole class files.

mod bridges;
mod cache;
mod captures;
mod conventions;
mod conversions;
mod driver;
mod errors;
mod rewrite;
mod sam;
mod settings;
mod site;
mod synthesize;

#[cfg(test)]
pub(crate) mod fixtures;

pub use bridges::*;
pub use cache::*;
pub use captures::*;
pub use conventions::*;
pub use conversions::*;
pub use driver::*;
pub use errors::*;
pub use rewrite::*;
pub use sam::*;
pub use settings::*;
pub use site::*;
pub use synthesize::*;

//! Structural information about classes that are referenced, but not being transformed
//!
//! Everything is pull-based: a [`TypeResolver`] is asked for the metadata of a class by name and
//! hands back a [`ClassMetadata`] (loading and caching it as needed). Nothing here needs a running
//! JVM, and the parts of the JDK that weaving depends on are built in.

pub mod assignable;
mod java_lib;
mod metadata;
mod resolver;
mod source;

pub use java_lib::*;
pub use metadata::*;
pub use resolver::*;
pub use source::*;

//! Extract closure expressions out of JVM bytecode into synthesized classes
//!
//! A call to a static "factory" method whose last argument is an expression (and whose leading
//! arguments bind named parameter fields) gets rewritten into the construction of a new class
//! implementing the factory's target type. The expression becomes the body of that class' single
//! abstract method.
//!
//! The crate is split into two layers:
//!
//!   - [`jvm`] reads, represents, analyzes, and writes class files
//!   - [`weave`] finds the lambda sites in a class and performs the transformation
//!
//! ```no_run
//! use closureweave::jvm::class_graph::{CachingResolver, ClassPath};
//! use closureweave::weave::{Settings, WeaveCache, Weaver};
//!
//! # fn weave() -> Result<(), closureweave::weave::Error> {
//! let resolver = CachingResolver::new(ClassPath::directories(["target/classes"]));
//! let cache = WeaveCache::new();
//! let weaver = Weaver::new(Settings::default(), &resolver, &cache);
//!
//! let input = std::fs::read("target/classes/me/alec/Demo.class")?;
//! let output = weaver.weave_class(&input)?;
//! for (name, bytes) in &output.synthesized {
//!     println!("synthesized {:?} ({} bytes)", name, bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod jvm;
pub mod util;
pub mod weave;

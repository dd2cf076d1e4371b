use crate::jvm::{BinaryName, Error, Name};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Somewhere class file bytes can be loaded from
pub trait ClassSource {
    /// Load the bytes of a class (`Ok(None)` if this source doesn't have the class)
    fn load(&self, name: &BinaryName) -> Result<Option<Vec<u8>>, Error>;
}

/// Directories of class files, laid out by package
#[derive(Debug, Clone, Default)]
pub struct ClassPath {
    directories: Vec<PathBuf>,
}

impl ClassPath {
    pub fn directories<P: Into<PathBuf>>(directories: impl IntoIterator<Item = P>) -> ClassPath {
        ClassPath {
            directories: directories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, directory: impl Into<PathBuf>) {
        self.directories.push(directory.into());
    }
}

impl ClassSource for ClassPath {
    fn load(&self, name: &BinaryName) -> Result<Option<Vec<u8>>, Error> {
        for directory in &self.directories {
            let mut path = directory.clone();
            path.extend(name.as_str().split('/'));
            path.set_extension("class");
            match fs::read(&path) {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(Error::IoError(err)),
            }
        }
        Ok(None)
    }
}

/// Class files held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryClasses {
    classes: HashMap<BinaryName, Vec<u8>>,
}

impl InMemoryClasses {
    pub fn new() -> InMemoryClasses {
        InMemoryClasses::default()
    }

    pub fn insert(&mut self, name: BinaryName, bytes: Vec<u8>) {
        self.classes.insert(name, bytes);
    }
}

impl ClassSource for InMemoryClasses {
    fn load(&self, name: &BinaryName) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.classes.get(name).cloned())
    }
}

/// Try several sources, in order
#[derive(Default)]
pub struct SourceChain {
    sources: Vec<Box<dyn ClassSource + Send + Sync>>,
}

impl SourceChain {
    pub fn new() -> SourceChain {
        SourceChain::default()
    }

    pub fn with(mut self, source: impl ClassSource + Send + Sync + 'static) -> SourceChain {
        self.sources.push(Box::new(source));
        self
    }
}

impl ClassSource for SourceChain {
    fn load(&self, name: &BinaryName) -> Result<Option<Vec<u8>>, Error> {
        for source in &self.sources {
            if let Some(bytes) = source.load(name)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_tries_sources_in_order() {
        let name = BinaryName::from_string(String::from("me/alec/Demo")).unwrap();
        let mut first = InMemoryClasses::new();
        first.insert(name.clone(), vec![1]);
        let mut second = InMemoryClasses::new();
        second.insert(name.clone(), vec![2]);

        let chain = SourceChain::new()
            .with(ClassPath::directories(["/nonexistent/classes"]))
            .with(first)
            .with(second);
        assert_eq!(chain.load(&name).unwrap(), Some(vec![1]));
        assert_eq!(chain.load(&BinaryName::OBJECT).unwrap(), None);
    }
}

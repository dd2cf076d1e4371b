use super::Error;
use crate::jvm::class_file::Version;
use crate::jvm::{BinaryName, Name, UnqualifiedName};

pub struct Settings {
    /// Annotation marking static factory methods, written as `my/pkg/Lambda`
    ///
    /// The last parameter of a factory is the closure body, and the others bind closure
    /// parameters. The return type (or, if that is `Object`, the `checkcast` right after the call)
    /// is the type the closure implements.
    pub factory_annotation: BinaryName,

    /// Annotation marking the static fields used as named closure parameters
    pub parameter_annotation: BinaryName,

    /// Marker put in front of the line number in synthesized class names
    ///
    /// Synthesized classes are named `{owner}${target}${marker}{line}${id}`.
    pub line_marker: UnqualifiedName,

    /// Class file version of rewritten and synthesized classes
    pub output_version: OutputVersion,

    /// Classes offered for weaving (others are passed through untouched)
    pub filter: ClassFilter,
}

/// Which class file version output classes get
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputVersion {
    /// Same version as the class being woven
    KeepInput,

    /// Always this version
    Fixed(Version),
}

impl Settings {
    pub fn new(factory_annotation: &str, parameter_annotation: &str) -> Result<Settings, Error> {
        fn make_name<N: Name>(name: &str) -> Result<N, Error> {
            N::from_string(name.to_owned()).map_err(Error::InvalidSettings)
        }

        let factory_annotation: BinaryName = make_name(factory_annotation)?;
        let parameter_annotation: BinaryName = make_name(parameter_annotation)?;
        if factory_annotation == parameter_annotation {
            return Err(Error::InvalidSettings(format!(
                "factory and parameter annotations are both {}",
                factory_annotation
            )));
        }

        Ok(Settings {
            factory_annotation,
            parameter_annotation,
            line_marker: UnqualifiedName::LINE_MARKER,
            output_version: OutputVersion::KeepInput,
            filter: ClassFilter::default(),
        })
    }

    /// Version to use for output, given the version of the input
    pub fn version_for(&self, input: Version) -> Version {
        match self.output_version {
            OutputVersion::KeepInput => input,
            OutputVersion::Fixed(version) => version,
        }
    }

    /// Name of the class synthesized for a lambda site
    pub fn closure_class_name(
        &self,
        owner: &BinaryName,
        target: &BinaryName,
        line: Option<u16>,
        id: usize,
    ) -> Result<BinaryName, Error> {
        let line = line.map_or(String::from("0"), |line| line.to_string());
        let name = format!(
            "{}${}${}{}${}",
            owner.as_str(),
            target.simple_name(),
            self.line_marker.as_str(),
            line,
            id
        );
        BinaryName::from_string(name).map_err(Error::InvalidSettings)
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            factory_annotation: BinaryName::LAMBDA_ANNOTATION,
            parameter_annotation: BinaryName::PARAM_ANNOTATION,
            line_marker: UnqualifiedName::LINE_MARKER,
            output_version: OutputVersion::KeepInput,
            filter: ClassFilter::default(),
        }
    }
}

/// Which classes get woven, by binary name
///
/// In patterns, `*` matches within one package segment and `**` matches across segments, so
/// `me/alec/**` covers every class under `me/alec` while `me/alec/*` only covers the classes
/// directly in it. A class is woven if it matches an include (or there are no includes) and
/// matches no exclude.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl ClassFilter {
    pub fn include(&mut self, pattern: impl Into<String>) -> &mut ClassFilter {
        self.includes.push(pattern.into());
        self
    }

    pub fn exclude(&mut self, pattern: impl Into<String>) -> &mut ClassFilter {
        self.excludes.push(pattern.into());
        self
    }

    pub fn accepts(&self, class: &BinaryName) -> bool {
        let name = class.as_str().as_bytes();
        let included = self.includes.is_empty()
            || self.includes.iter().any(|pattern| glob_matches(pattern.as_bytes(), name));
        included && !self.excludes.iter().any(|pattern| glob_matches(pattern.as_bytes(), name))
    }
}

fn glob_matches(pattern: &[u8], name: &[u8]) -> bool {
    match pattern {
        [] => name.is_empty(),
        [b'*', b'*', rest @ ..] => (0..=name.len()).any(|split| glob_matches(rest, &name[split..])),
        [b'*', rest @ ..] => {
            let segment = name.iter().position(|b| *b == b'/').unwrap_or(name.len());
            (0..=segment).any(|split| glob_matches(rest, &name[split..]))
        }
        [first, rest @ ..] => name.first() == Some(first) && glob_matches(rest, &name[1..]),
    }
}

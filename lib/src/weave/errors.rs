use crate::jvm;
use crate::jvm::{BinaryName, MethodDescriptor, RenderDescriptor, UnqualifiedName};
use std::fmt;

/// Where in the input an error happened
///
/// Every part is optional since errors get tagged with more context as they bubble up (eg. a
/// conversion error has no idea which method it is in).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    pub class: Option<BinaryName>,
    pub method: Option<(UnqualifiedName, MethodDescriptor)>,
    pub line: Option<u16>,
}

/// Fatal weaving errors
///
/// None of these are recoverable: a class that hits one is not woven at all.
#[derive(Debug)]
pub enum Error {
    /// Method has lambda sites but no `LocalVariableTable`
    MissingDebugInfo { context: Context, message: String },

    /// Lambda site doesn't fit the factory conventions (arity mismatch, unbound parameters, an
    /// argument range that can't be delimited, unsupported accesses in a body, etc.)
    MalformedSite { context: Context, message: String },

    /// The target type has no (or more than one) candidate abstract method
    UnresolvedSam {
        context: Context,
        target: BinaryName,
        message: String,
    },

    /// Metadata for a referenced class couldn't be loaded
    UnresolvedType { context: Context, name: String },

    /// Class file could not be read, analyzed, or written
    ClassFile {
        context: Context,
        error: jvm::Error,
    },

    /// Settings are not usable
    InvalidSettings(String),

    IoError(std::io::Error),
}

impl Context {
    pub fn class(class: BinaryName) -> Context {
        Context {
            class: Some(class),
            ..Context::default()
        }
    }

    pub fn method(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Context {
        Context {
            class: Some(class),
            method: Some((name, descriptor)),
            line: None,
        }
    }

    pub fn at_line(&self, line: Option<u16>) -> Context {
        Context {
            line: line.or(self.line),
            ..self.clone()
        }
    }

    /// Fill in whatever is missing from another context
    fn fill_from(&mut self, other: &Context) {
        if self.class.is_none() {
            self.class = other.class.clone();
        }
        if self.method.is_none() {
            self.method = other.method.clone();
        }
        if self.line.is_none() {
            self.line = other.line;
        }
    }
}

impl Error {
    pub fn malformed(context: &Context, message: impl Into<String>) -> Error {
        Error::MalformedSite {
            context: context.clone(),
            message: message.into(),
        }
    }

    /// Turn a class file error into a weaving error (missing classes become `UnresolvedType`)
    pub fn from_jvm(context: &Context, error: jvm::Error) -> Error {
        match error {
            jvm::Error::MissingClass(name) => Error::UnresolvedType {
                context: context.clone(),
                name,
            },
            error => Error::ClassFile {
                context: context.clone(),
                error,
            },
        }
    }

    /// Add context to the error, without overwriting any context it already has
    pub fn within(mut self, outer: &Context) -> Error {
        if let Some(context) = self.context_mut() {
            context.fill_from(outer);
        }
        self
    }

    pub fn context(&self) -> Option<&Context> {
        match self {
            Error::MissingDebugInfo { context, .. }
            | Error::MalformedSite { context, .. }
            | Error::UnresolvedSam { context, .. }
            | Error::UnresolvedType { context, .. }
            | Error::ClassFile { context, .. } => Some(context),
            Error::InvalidSettings(_) | Error::IoError(_) => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut Context> {
        match self {
            Error::MissingDebugInfo { context, .. }
            | Error::MalformedSite { context, .. }
            | Error::UnresolvedSam { context, .. }
            | Error::UnresolvedType { context, .. }
            | Error::ClassFile { context, .. } => Some(context),
            Error::InvalidSettings(_) | Error::IoError(_) => None,
        }
    }
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::from_jvm(&Context::default(), err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class {
            Some(class) => write!(f, "{}", class)?,
            None => write!(f, "<unknown class>")?,
        }
        if let Some((name, descriptor)) = &self.method {
            write!(f, ".{}{}", name, descriptor.render())?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingDebugInfo { context, message } => {
                write!(f, "{}: missing debug information: {}", context, message)
            }
            Error::MalformedSite { context, message } => {
                write!(f, "{}: malformed lambda site: {}", context, message)
            }
            Error::UnresolvedSam {
                context,
                target,
                message,
            } => write!(
                f,
                "{}: cannot find the abstract method of {}: {}",
                context, target, message
            ),
            Error::UnresolvedType { context, name } => {
                write!(f, "{}: cannot resolve type {}", context, name)
            }
            Error::ClassFile { context, error } => write!(f, "{}: {}", context, error),
            Error::InvalidSettings(message) => write!(f, "invalid settings: {}", message),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ClassFile { error, .. } => Some(error),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{Name, ParseDescriptor};

    #[test]
    fn context_is_filled_in_not_overwritten() {
        let class = BinaryName::from_string(String::from("me/alec/Demo")).unwrap();
        let method = Context::method(
            class.clone(),
            UnqualifiedName::from_string(String::from("run")).unwrap(),
            MethodDescriptor::parse("(I)V").unwrap(),
        );
        let err = Error::malformed(&Context::default().at_line(Some(12)), "unbound parameter y");
        let err = err.within(&method).within(&Context::class(class));

        let context = err.context().unwrap();
        assert_eq!(context.line, Some(12));
        assert!(context.method.is_some());
        assert_eq!(
            err.to_string(),
            "me/alec/Demo.run(I)V (line 12): malformed lambda site: unbound parameter y"
        );
    }

    #[test]
    fn missing_classes_are_unresolved_types() {
        let err = Error::from(jvm::Error::MissingClass(String::from("a/B")));
        assert!(matches!(err, Error::UnresolvedType { name, .. } if name == "a/B"));
    }
}

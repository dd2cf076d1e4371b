//! Built-in metadata for the parts of the JDK that weaving relies on
//!
//! Weaving needs to know about boxes (for conversions), `Object` and `Throwable` (for flow
//! analysis), and the common functional interfaces (as closure targets). Having these built in
//! means no JDK image is needed on the class path.

use crate::jvm::class_graph::{ClassMetadata, MethodMetadata};
use crate::jvm::{
    BinaryName, ClassAccessFlags, Error, MethodAccessFlags, MethodDescriptor, Name,
    ParseDescriptor, UnqualifiedName,
};

struct JavaClass {
    name: &'static str,
    super_class: Option<&'static str>,
    interfaces: &'static [&'static str],
    access_flags: u16,
    methods: &'static [(&'static str, &'static str, u16)],
}

const PUBLIC_CLASS: u16 = 0x0001 | 0x0020;
const PUBLIC_FINAL_CLASS: u16 = 0x0001 | 0x0010 | 0x0020;
const PUBLIC_ABSTRACT_CLASS: u16 = 0x0001 | 0x0020 | 0x0400;
const PUBLIC_INTERFACE: u16 = 0x0001 | 0x0200 | 0x0400;

const PUBLIC: u16 = 0x0001;
const PUBLIC_STATIC: u16 = 0x0001 | 0x0008;
const PUBLIC_ABSTRACT: u16 = 0x0001 | 0x0400;

const OBJECT: Option<&str> = Some("java/lang/Object");
const NUMBER: Option<&str> = Some("java/lang/Number");

macro_rules! functional_interface {
    ($name:literal, $method:literal, $descriptor:literal) => {
        JavaClass {
            name: $name,
            super_class: OBJECT,
            interfaces: &[],
            access_flags: PUBLIC_INTERFACE,
            methods: &[($method, $descriptor, PUBLIC_ABSTRACT)],
        }
    };
}

macro_rules! box_class {
    ($name:literal, $primitive:literal, $unbox:literal) => {
        JavaClass {
            name: $name,
            super_class: NUMBER,
            interfaces: &["java/lang/Comparable", "java/io/Serializable"],
            access_flags: PUBLIC_FINAL_CLASS,
            methods: &[
                (
                    "valueOf",
                    concat!("(", $primitive, ")L", $name, ";"),
                    PUBLIC_STATIC,
                ),
                ($unbox, concat!("()", $primitive), PUBLIC),
            ],
        }
    };
}

const JAVA_CLASSES: &[JavaClass] = &[
    JavaClass {
        name: "java/lang/Object",
        super_class: None,
        interfaces: &[],
        access_flags: PUBLIC_CLASS,
        methods: &[
            ("<init>", "()V", PUBLIC),
            ("equals", "(Ljava/lang/Object;)Z", PUBLIC),
            ("hashCode", "()I", PUBLIC),
            ("toString", "()Ljava/lang/String;", PUBLIC),
        ],
    },
    JavaClass {
        name: "java/io/Serializable",
        super_class: OBJECT,
        interfaces: &[],
        access_flags: PUBLIC_INTERFACE,
        methods: &[],
    },
    JavaClass {
        name: "java/lang/Cloneable",
        super_class: OBJECT,
        interfaces: &[],
        access_flags: PUBLIC_INTERFACE,
        methods: &[],
    },
    JavaClass {
        name: "java/lang/CharSequence",
        super_class: OBJECT,
        interfaces: &[],
        access_flags: PUBLIC_INTERFACE,
        methods: &[
            ("length", "()I", PUBLIC_ABSTRACT),
            ("charAt", "(I)C", PUBLIC_ABSTRACT),
        ],
    },
    JavaClass {
        name: "java/lang/String",
        super_class: OBJECT,
        interfaces: &[
            "java/io/Serializable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
        ],
        access_flags: PUBLIC_FINAL_CLASS,
        methods: &[
            ("length", "()I", PUBLIC),
            ("valueOf", "(Ljava/lang/Object;)Ljava/lang/String;", PUBLIC_STATIC),
        ],
    },
    JavaClass {
        name: "java/lang/Class",
        super_class: OBJECT,
        interfaces: &["java/io/Serializable"],
        access_flags: PUBLIC_FINAL_CLASS,
        methods: &[],
    },
    JavaClass {
        name: "java/lang/Number",
        super_class: OBJECT,
        interfaces: &["java/io/Serializable"],
        access_flags: PUBLIC_ABSTRACT_CLASS,
        methods: &[
            ("<init>", "()V", PUBLIC),
            ("intValue", "()I", PUBLIC_ABSTRACT),
            ("longValue", "()J", PUBLIC_ABSTRACT),
            ("floatValue", "()F", PUBLIC_ABSTRACT),
            ("doubleValue", "()D", PUBLIC_ABSTRACT),
            ("byteValue", "()B", PUBLIC),
            ("shortValue", "()S", PUBLIC),
        ],
    },
    box_class!("java/lang/Integer", "I", "intValue"),
    box_class!("java/lang/Long", "J", "longValue"),
    box_class!("java/lang/Float", "F", "floatValue"),
    box_class!("java/lang/Double", "D", "doubleValue"),
    box_class!("java/lang/Short", "S", "shortValue"),
    box_class!("java/lang/Byte", "B", "byteValue"),
    JavaClass {
        name: "java/lang/Boolean",
        super_class: OBJECT,
        interfaces: &["java/lang/Comparable", "java/io/Serializable"],
        access_flags: PUBLIC_FINAL_CLASS,
        methods: &[
            ("valueOf", "(Z)Ljava/lang/Boolean;", PUBLIC_STATIC),
            ("booleanValue", "()Z", PUBLIC),
        ],
    },
    JavaClass {
        name: "java/lang/Character",
        super_class: OBJECT,
        interfaces: &["java/lang/Comparable", "java/io/Serializable"],
        access_flags: PUBLIC_FINAL_CLASS,
        methods: &[
            ("valueOf", "(C)Ljava/lang/Character;", PUBLIC_STATIC),
            ("charValue", "()C", PUBLIC),
        ],
    },
    JavaClass {
        name: "java/lang/Throwable",
        super_class: OBJECT,
        interfaces: &["java/io/Serializable"],
        access_flags: PUBLIC_CLASS,
        methods: &[("<init>", "()V", PUBLIC)],
    },
    JavaClass {
        name: "java/lang/Exception",
        super_class: Some("java/lang/Throwable"),
        interfaces: &[],
        access_flags: PUBLIC_CLASS,
        methods: &[("<init>", "()V", PUBLIC)],
    },
    JavaClass {
        name: "java/lang/RuntimeException",
        super_class: Some("java/lang/Exception"),
        interfaces: &[],
        access_flags: PUBLIC_CLASS,
        methods: &[("<init>", "()V", PUBLIC)],
    },
    JavaClass {
        name: "java/lang/Error",
        super_class: Some("java/lang/Throwable"),
        interfaces: &[],
        access_flags: PUBLIC_CLASS,
        methods: &[("<init>", "()V", PUBLIC)],
    },
    functional_interface!("java/lang/Runnable", "run", "()V"),
    functional_interface!("java/lang/Comparable", "compareTo", "(Ljava/lang/Object;)I"),
    functional_interface!("java/util/concurrent/Callable", "call", "()Ljava/lang/Object;"),
    JavaClass {
        name: "java/util/Comparator",
        super_class: OBJECT,
        interfaces: &[],
        access_flags: PUBLIC_INTERFACE,
        methods: &[
            ("compare", "(Ljava/lang/Object;Ljava/lang/Object;)I", PUBLIC_ABSTRACT),
            ("equals", "(Ljava/lang/Object;)Z", PUBLIC_ABSTRACT),
        ],
    },
    functional_interface!(
        "java/util/function/Function",
        "apply",
        "(Ljava/lang/Object;)Ljava/lang/Object;"
    ),
    functional_interface!(
        "java/util/function/BiFunction",
        "apply",
        "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;"
    ),
    JavaClass {
        name: "java/util/function/UnaryOperator",
        super_class: OBJECT,
        interfaces: &["java/util/function/Function"],
        access_flags: PUBLIC_INTERFACE,
        methods: &[],
    },
    JavaClass {
        name: "java/util/function/BinaryOperator",
        super_class: OBJECT,
        interfaces: &["java/util/function/BiFunction"],
        access_flags: PUBLIC_INTERFACE,
        methods: &[],
    },
    functional_interface!("java/util/function/Supplier", "get", "()Ljava/lang/Object;"),
    functional_interface!("java/util/function/Consumer", "accept", "(Ljava/lang/Object;)V"),
    functional_interface!(
        "java/util/function/BiConsumer",
        "accept",
        "(Ljava/lang/Object;Ljava/lang/Object;)V"
    ),
    functional_interface!("java/util/function/Predicate", "test", "(Ljava/lang/Object;)Z"),
    functional_interface!(
        "java/util/function/BiPredicate",
        "test",
        "(Ljava/lang/Object;Ljava/lang/Object;)Z"
    ),
    functional_interface!("java/util/function/IntFunction", "apply", "(I)Ljava/lang/Object;"),
    functional_interface!("java/util/function/IntUnaryOperator", "applyAsInt", "(I)I"),
    functional_interface!("java/util/function/IntBinaryOperator", "applyAsInt", "(II)I"),
    functional_interface!("java/util/function/IntPredicate", "test", "(I)Z"),
    functional_interface!("java/util/function/IntSupplier", "getAsInt", "()I"),
    functional_interface!("java/util/function/IntConsumer", "accept", "(I)V"),
    functional_interface!(
        "java/util/function/ToIntFunction",
        "applyAsInt",
        "(Ljava/lang/Object;)I"
    ),
    functional_interface!("java/util/function/LongUnaryOperator", "applyAsLong", "(J)J"),
    functional_interface!("java/util/function/LongBinaryOperator", "applyAsLong", "(JJ)J"),
    functional_interface!("java/util/function/LongSupplier", "getAsLong", "()J"),
    functional_interface!("java/util/function/DoubleUnaryOperator", "applyAsDouble", "(D)D"),
    functional_interface!("java/util/function/DoubleBinaryOperator", "applyAsDouble", "(DD)D"),
    functional_interface!("java/util/function/DoubleSupplier", "getAsDouble", "()D"),
    functional_interface!("java/util/function/BooleanSupplier", "getAsBoolean", "()Z"),
];

/// Metadata for a built-in JDK class
pub fn java_library_class(name: &BinaryName) -> Result<Option<ClassMetadata>, Error> {
    match JAVA_CLASSES.iter().find(|class| class.name == name.as_str()) {
        None => Ok(None),
        Some(class) => class.metadata().map(Some),
    }
}

impl JavaClass {
    fn metadata(&self) -> Result<ClassMetadata, Error> {
        let binary_name =
            |name: &str| BinaryName::from_string(name.to_owned()).map_err(Error::BadDescriptor);

        let methods = self
            .methods
            .iter()
            .map(|(name, descriptor, flags)| {
                Ok(MethodMetadata {
                    name: UnqualifiedName::from_string((*name).to_owned())
                        .map_err(Error::BadDescriptor)?,
                    descriptor: MethodDescriptor::parse_class_file(descriptor)?,
                    access_flags: MethodAccessFlags::from_bits_truncate(*flags),
                    annotations: vec![],
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(ClassMetadata {
            name: binary_name(self.name)?,
            super_class: self.super_class.map(binary_name).transpose()?,
            interfaces: self
                .interfaces
                .iter()
                .map(|name| binary_name(name))
                .collect::<Result<_, _>>()?,
            access_flags: ClassAccessFlags::from_bits_truncate(self.access_flags),
            fields: vec![],
            methods,
            annotations: vec![],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn all_builtins_are_well_formed() {
        for class in JAVA_CLASSES {
            let metadata = class.metadata().unwrap();
            assert_eq!(metadata.name.as_str(), class.name);
        }
    }

    #[test]
    fn boxes_have_conversions() {
        let integer = java_library_class(&BinaryName::INTEGER).unwrap().unwrap();
        assert_eq!(integer.super_class, Some(BinaryName::NUMBER));
        assert!(integer
            .method(
                &UnqualifiedName::VALUEOF,
                &MethodDescriptor::parse("(I)Ljava/lang/Integer;").unwrap()
            )
            .is_some());
        assert!(java_library_class(&BinaryName::from_string(String::from("a/B")).unwrap())
            .unwrap()
            .is_none());
    }
}

use crate::jvm::class_file::{
    read_bytes, Attribute, AttributeLike, BootstrapMethod, Deserialize, Serialize,
};
use crate::jvm::code::{ConstantData, DynamicCallSite, FieldRef, Handle, MemberRef, MethodRef};
use crate::jvm::descriptors::{ParseDescriptor, RenderDescriptor};
use crate::jvm::names::Name;
use crate::jvm::{
    BinaryName, Error, FieldType, MethodDescriptor, RefType, UnqualifiedName,
};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::result::Result;

/// Class file constants pool
///
/// The pool is append only: indices that have been handed out (or that were read in from an
/// existing class file) never change. This is what lets a rewritten class keep its original
/// constants as an exact prefix of the new pool, so methods that are not rewritten keep their
/// bytecode untouched.
///
/// The pool also owns the class' bootstrap method table, since `CONSTANT_InvokeDynamic_info`
/// entries point into it.
#[derive(Debug, Clone)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,

    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<u32, ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<u64, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    utf8s: HashMap<String, Utf8ConstantIndex>,
    method_handles: HashMap<(HandleKind, ConstantIndex), ConstantIndex>,
    method_types: HashMap<Utf8ConstantIndex, ConstantIndex>,
    invoke_dynamics: HashMap<(u16, NameAndTypeConstantIndex), InvokeDynamicConstantIndex>,

    bootstrap_methods: Vec<BootstrapMethod>,
    bootstrap_lookup: HashMap<BootstrapMethod, u16>,
    initial_bootstrap_methods: usize,
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            classes: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            utf8s: HashMap::new(),
            method_handles: HashMap::new(),
            method_types: HashMap::new(),
            invoke_dynamics: HashMap::new(),
            bootstrap_methods: vec![],
            bootstrap_lookup: HashMap::new(),
            initial_bootstrap_methods: 0,
        }
    }

    /// Seed a pool from the constants (and bootstrap methods) of an existing class
    ///
    /// Existing entries are registered for deduplication, so asking for a constant that is
    /// already present returns its original index.
    pub fn from_existing(
        constants: OffsetVec<Constant>,
        bootstrap_methods: Vec<BootstrapMethod>,
    ) -> ConstantsPool {
        let mut pool = ConstantsPool::new();
        for (offset, _, constant) in &constants {
            let index = ConstantIndex(offset.0 as u16);
            pool.register_existing(index, constant);
        }
        pool.constants = constants;
        pool.seed_bootstrap_methods(bootstrap_methods);
        pool
    }

    /// Replace the bootstrap method table with the one read from an existing class
    pub fn seed_bootstrap_methods(&mut self, bootstrap_methods: Vec<BootstrapMethod>) {
        self.bootstrap_lookup.clear();
        for (idx, bootstrap_method) in bootstrap_methods.iter().enumerate() {
            self.bootstrap_lookup
                .entry(bootstrap_method.clone())
                .or_insert(idx as u16);
        }
        self.initial_bootstrap_methods = bootstrap_methods.len();
        self.bootstrap_methods = bootstrap_methods;
    }

    /// Remember an existing constant (the first occurrence wins if there are duplicates)
    fn register_existing(&mut self, index: ConstantIndex, constant: &Constant) {
        match constant {
            Constant::Class(name) => {
                self.classes.entry(*name).or_insert(ClassConstantIndex(index));
            }
            Constant::FieldRef(class, name_and_type) => {
                self.fieldrefs
                    .entry((*class, *name_and_type))
                    .or_insert(FieldRefConstantIndex(index));
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                self.methodrefs
                    .entry((*class, *name_and_type, *is_interface))
                    .or_insert(MethodRefConstantIndex(index));
            }
            Constant::String(utf8) => {
                self.strings.entry(*utf8).or_insert(StringConstantIndex(index));
            }
            Constant::Integer(integer) => {
                self.integers.entry(*integer).or_insert(index);
            }
            Constant::Float(float) => {
                self.floats.entry(float.to_bits()).or_insert(index);
            }
            Constant::Long(long) => {
                self.longs.entry(*long).or_insert(index);
            }
            Constant::Double(double) => {
                self.doubles.entry(double.to_bits()).or_insert(index);
            }
            Constant::NameAndType { name, descriptor } => {
                self.name_and_types
                    .entry((*name, *descriptor))
                    .or_insert(NameAndTypeConstantIndex(index));
            }
            Constant::Utf8(string) => {
                self.utf8s
                    .entry(string.clone())
                    .or_insert(Utf8ConstantIndex(index));
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                self.method_handles
                    .entry((*handle_kind, *member))
                    .or_insert(index);
            }
            Constant::MethodType { descriptor } => {
                self.method_types.entry(*descriptor).or_insert(index);
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                self.invoke_dynamics
                    .entry((*bootstrap_method, *method_descriptor))
                    .or_insert(InvokeDynamicConstantIndex(index));
            }
            Constant::Dynamic { .. } | Constant::Module(_) | Constant::Package(_) => (),
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        // Compute the offset at which this constant will be inserted
        let offset = self.constants.offset_len().0;

        // Detect if the next constant would overflow the pool
        if offset + constant.width() > u16::MAX as usize {
            return Err(ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }

        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    /// Number of slots used so far (the `constant_pool_count` of the class file)
    pub fn offset_len(&self) -> usize {
        self.constants.offset_len().0
    }

    /// Constants in the pool so far
    pub fn constants(&self) -> &OffsetVec<Constant> {
        &self.constants
    }

    /// Consume the pool and return the final vector of constants and bootstrap methods
    pub fn into_parts(self) -> (OffsetVec<Constant>, Vec<BootstrapMethod>) {
        (self.constants, self.bootstrap_methods)
    }

    /// Bootstrap methods registered so far
    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    /// Have bootstrap methods been added since the pool was created?
    pub fn added_bootstrap_methods(&self) -> bool {
        self.bootstrap_methods.len() != self.initial_bootstrap_methods
    }

    /// Look up a constant
    pub fn get(&self, index: ConstantIndex) -> Result<&Constant, Error> {
        self.constants
            .get_offset(Offset(index.0 as usize))
            .ok()
            .ok_or(Error::BadConstant {
                index,
                expected: "constant",
            })
    }

    /// Look up a utf8 constant
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index.0) {
            Ok(Constant::Utf8(string)) => Ok(string),
            _ => Err(Error::BadConstant {
                index: index.0,
                expected: "utf8",
            }),
        }
    }

    /// Look up a name and type constant
    pub fn name_and_type(
        &self,
        index: NameAndTypeConstantIndex,
    ) -> Result<(&str, &str), Error> {
        match self.get(index.0) {
            Ok(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(Error::BadConstant {
                index: index.0,
                expected: "name and type",
            }),
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(
        &mut self,
        utf8: Utf8ConstantIndex,
    ) -> Result<StringConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            let constant = Constant::String(utf8);
            let idx = StringConstantIndex(self.push_constant(constant)?);
            self.strings.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant from the constant pool
    pub fn get_class(
        &mut self,
        name: Utf8ConstantIndex,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(name))?);
            self.classes.insert(name, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name_and_type_key = (name, descriptor);
        if let Some(idx) = self.name_and_types.get(&name_and_type_key) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert(name_and_type_key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a method handle constant from the constant pool
    fn get_method_handle(
        &mut self,
        handle_kind: HandleKind,
        member: ConstantIndex,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let handle_key = (handle_kind, member);
        if let Some(idx) = self.method_handles.get(&handle_key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodHandle {
                handle_kind,
                member,
            };
            let idx = self.push_constant(constant)?;
            self.method_handles.insert(handle_key, idx);
            Ok(idx)
        }
    }

    /// Get or insert an invoke dynamic constant from the constant pool
    pub fn get_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    ) -> Result<InvokeDynamicConstantIndex, ConstantPoolOverflow> {
        let indy_key = (bootstrap_method, method_descriptor);
        if let Some(idx) = self.invoke_dynamics.get(&indy_key) {
            Ok(*idx)
        } else {
            let constant = Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            };
            let idx = InvokeDynamicConstantIndex(self.push_constant(constant)?);
            self.invoke_dynamics.insert(indy_key, idx);
            Ok(idx)
        }
    }

    /// Get or insert an entry in the bootstrap methods table
    pub fn get_bootstrap_method(&mut self, bootstrap_method: BootstrapMethod) -> u16 {
        if let Some(idx) = self.bootstrap_lookup.get(&bootstrap_method) {
            *idx
        } else {
            let idx = self.bootstrap_methods.len() as u16;
            self.bootstrap_lookup.insert(bootstrap_method.clone(), idx);
            self.bootstrap_methods.push(bootstrap_method);
            idx
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info).map_err(Error::IoError)?;

        Ok(Attribute { name_index, info })
    }

    /// Find the index of a utf8 constant, without inserting it
    pub fn find_utf8(&self, utf8: &str) -> Option<Utf8ConstantIndex> {
        self.utf8s.get(utf8).copied()
    }
}

impl Default for ConstantsPool {
    fn default() -> ConstantsPool {
        ConstantsPool::new()
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow {
            constant: overflow.constant,
            offset: overflow.offset,
        }
    }
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant (only ever carried through, never generated)
    Dynamic {
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Module (only in `module-info` classes)
    Module(Utf8ConstantIndex),

    /// Package (only in `module-info` classes)
    Package(Utf8ConstantIndex),
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let constant = match u8::deserialize(reader)? {
            1 => {
                let len = u16::deserialize(reader)?;
                let bytes = read_bytes(reader, len as usize, "utf8 constant")?;
                Constant::Utf8(decode_modified_utf8(&bytes))
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            tag @ (10 | 11) => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            tag => {
                return Err(Error::BadConstant {
                    index: ConstantIndex(tag as u16),
                    expected: "known constant tag",
                })
            }
        };
        Ok(constant)
    }
}

/// Constant pool count is the offset of the next entry (so one more than the last index)
impl Serialize for OffsetVec<Constant> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.offset_len().0 as u16).serialize(writer)?;
        for (_, _, constant) in self {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for OffsetVec<Constant> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let count = u16::deserialize(reader)? as usize;
        let mut constants = OffsetVec::new_starting_at(Offset(1));
        while constants.offset_len().0 < count {
            constants.push(Constant::deserialize(reader)?);
        }
        Ok(constants)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x0F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Unpaired surrogates (which Java strings allow but Rust strings do not) and malformed sequences
/// decode to `U+FFFD`.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    // First decode into UTF-16 code units, then let the standard library pair up surrogates
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        let b0 = bytes[idx] as u16;
        if b0 & 0x80 == 0 {
            units.push(b0);
            idx += 1;
        } else if b0 & 0xE0 == 0xC0 && idx + 1 < bytes.len() {
            let b1 = bytes[idx + 1] as u16;
            units.push((b0 & 0x1F) << 6 | (b1 & 0x3F));
            idx += 2;
        } else if b0 & 0xF0 == 0xE0 && idx + 2 < bytes.len() {
            let b1 = bytes[idx + 1] as u16;
            let b2 = bytes[idx + 2] as u16;
            units.push((b0 & 0x0F) << 12 | (b1 & 0x3F) << 6 | (b2 & 0x3F));
            idx += 3;
        } else {
            units.push(0xFFFD);
            idx += 1;
        }
    }
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]), "a\x00a");
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(decode_modified_utf8(b"hel10_World"), "hel10_World");
    }

    #[test]
    fn two_and_three_byte_encodings() {
        let two_byte = "ĄǍǞǠǺȀȂȦȺӐӒ";
        let encoded = encode_modified_utf8(two_byte);
        assert_eq!(&encoded[..4], &[196, 132, 199, 141]);
        assert_eq!(decode_modified_utf8(&encoded), two_byte);

        let three_byte = "ऄअॲঅਅઅଅஅఅಅഅะະ༁ཨ";
        let encoded = encode_modified_utf8(three_byte);
        assert_eq!(&encoded[..3], &[224, 164, 132]);
        assert_eq!(decode_modified_utf8(&encoded), three_byte);
    }

    #[test]
    fn supplementary_characters() {
        let encoded = encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}");
        assert_eq!(
            encoded,
            vec![
                237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237,
                191, 191
            ]
        );
        assert_eq!(
            decode_modified_utf8(&encoded),
            "\u{10000}\u{dffff}\u{10FFFF}"
        );
    }

    #[test]
    fn unpaired_surrogate() {
        assert_eq!(decode_modified_utf8(&[237, 160, 128, 97]), "\u{FFFD}a");
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

impl ConstantIndex {
    /// Used for optional references (eg. the `catch_type` of a `finally` handler)
    pub const ZERO: ConstantIndex = ConstantIndex(0);
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(ConstantIndex(u16::deserialize(reader)?))
    }
}

macro_rules! typed_constant_index {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
        pub struct $name(pub ConstantIndex);

        impl From<$name> for ConstantIndex {
            fn from(index: $name) -> ConstantIndex {
                index.0
            }
        }

        impl Serialize for $name {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }

        impl Deserialize for $name {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
                Ok($name(ConstantIndex::deserialize(reader)?))
            }
        }
    };
}

typed_constant_index!(Utf8ConstantIndex);
typed_constant_index!(StringConstantIndex);
typed_constant_index!(NameAndTypeConstantIndex);
typed_constant_index!(ClassConstantIndex);
typed_constant_index!(FieldRefConstantIndex);
typed_constant_index!(
    /// Points to either a `Methodref` or an `InterfaceMethodref`
    MethodRefConstantIndex
);
typed_constant_index!(InvokeDynamicConstantIndex);

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    const ALL: [HandleKind; 9] = [
        HandleKind::GetField,
        HandleKind::GetStatic,
        HandleKind::PutField,
        HandleKind::PutStatic,
        HandleKind::InvokeVirtual,
        HandleKind::InvokeStatic,
        HandleKind::InvokeSpecial,
        HandleKind::NewInvokeSpecial,
        HandleKind::InvokeInterface,
    ];

    /// Does the handle point to a field (as opposed to a method)?
    pub fn is_field(&self) -> bool {
        matches!(
            self,
            HandleKind::GetField
                | HandleKind::GetStatic
                | HandleKind::PutField
                | HandleKind::PutStatic
        )
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Deserialize for HandleKind {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let byte = u8::deserialize(reader)?;
        match byte {
            1..=9 => Ok(HandleKind::ALL[byte as usize - 1]),
            _ => Err(Error::BadConstant {
                index: ConstantIndex(byte as u16),
                expected: "method handle kind",
            }),
        }
    }
}

/// Symbolic value that can be put in the constant pool
pub trait ConstantsWriter<Index = ConstantIndex> {
    /// Get or insert a constant into the constant pool and return the associated index
    fn constant_index(&self, constants_pool: &mut ConstantsPool) -> Result<Index, Error>;
}

/// Symbolic value that can be read back out of the constant pool
pub trait ConstantsReader<Index = ConstantIndex>: Sized {
    /// Resolve the constant at the index into its symbolic form
    fn from_constant_index(index: Index, constants_pool: &ConstantsPool) -> Result<Self, Error>;
}

/// Write a `CONSTANT_Class_info`
impl ConstantsWriter<ClassConstantIndex> for RefType<BinaryName> {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ClassConstantIndex, Error> {
        let name = constants.get_utf8(self.class_info_name())?;
        Ok(constants.get_class(name)?)
    }
}

impl ConstantsWriter<ClassConstantIndex> for BinaryName {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ClassConstantIndex, Error> {
        let name = constants.get_utf8(self.as_str())?;
        Ok(constants.get_class(name)?)
    }
}

impl ConstantsReader<ClassConstantIndex> for RefType<BinaryName> {
    fn from_constant_index(
        index: ClassConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Self, Error> {
        match constants.get(index.0)? {
            Constant::Class(name) => RefType::from_class_info_name(constants.utf8(*name)?),
            _ => Err(Error::BadConstant {
                index: index.0,
                expected: "class",
            }),
        }
    }
}

impl ConstantsReader<ClassConstantIndex> for BinaryName {
    fn from_constant_index(
        index: ClassConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Self, Error> {
        match RefType::from_constant_index(index, constants)? {
            RefType::Object(name) => Ok(name),
            _ => Err(Error::BadConstant {
                index: index.0,
                expected: "non-array class",
            }),
        }
    }
}

/// Write a `CONSTANT_Fieldref_info`
impl ConstantsWriter<FieldRefConstantIndex> for FieldRef {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class_idx = self.class.constant_index(constants)?;
        let field_utf8 = constants.get_utf8(self.name.as_str())?;
        let desc_utf8 = constants.get_utf8(self.descriptor.render())?;
        let name_and_type_idx = constants.get_name_and_type(field_utf8, desc_utf8)?;

        let key = (class_idx, name_and_type_idx);
        if let Some(idx) = constants.fieldrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef(class_idx, name_and_type_idx);
            let idx = FieldRefConstantIndex(constants.push_constant(constant)?);
            constants.fieldrefs.insert(key, idx);
            Ok(idx)
        }
    }
}

impl ConstantsReader<FieldRefConstantIndex> for FieldRef {
    fn from_constant_index(
        index: FieldRefConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Self, Error> {
        match constants.get(index.0)? {
            Constant::FieldRef(class, name_and_type) => {
                let class = BinaryName::from_constant_index(*class, constants)?;
                let (name, descriptor) = constants.name_and_type(*name_and_type)?;
                Ok(FieldRef {
                    class,
                    name: UnqualifiedName::from_string(name.to_owned())
                        .map_err(Error::BadDescriptor)?,
                    descriptor: FieldType::parse_class_file(descriptor)?,
                })
            }
            _ => Err(Error::BadConstant {
                index: index.0,
                expected: "field reference",
            }),
        }
    }
}

/// Write a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
impl ConstantsWriter<MethodRefConstantIndex> for MethodRef {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class_idx = self.class.constant_index(constants)?;
        let method_utf8 = constants.get_utf8(self.name.as_str())?;
        let desc_utf8 = constants.get_utf8(self.descriptor.render())?;
        let name_and_type_idx = constants.get_name_and_type(method_utf8, desc_utf8)?;

        let key = (class_idx, name_and_type_idx, self.is_interface);
        if let Some(idx) = constants.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class: class_idx,
                name_and_type: name_and_type_idx,
                is_interface: self.is_interface,
            };
            let idx = MethodRefConstantIndex(constants.push_constant(constant)?);
            constants.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }
}

impl ConstantsReader<MethodRefConstantIndex> for MethodRef {
    fn from_constant_index(
        index: MethodRefConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Self, Error> {
        match constants.get(index.0)? {
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let class = RefType::from_constant_index(*class, constants)?;
                let (name, descriptor) = constants.name_and_type(*name_and_type)?;
                Ok(MethodRef {
                    class,
                    name: UnqualifiedName::from_string(name.to_owned())
                        .map_err(Error::BadDescriptor)?,
                    descriptor: MethodDescriptor::parse_class_file(descriptor)?,
                    is_interface: *is_interface,
                })
            }
            _ => Err(Error::BadConstant {
                index: index.0,
                expected: "method reference",
            }),
        }
    }
}

/// Write a `CONSTANT_MethodHandle_info`
impl ConstantsWriter<ConstantIndex> for Handle {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        let member: ConstantIndex = match &self.member {
            MemberRef::Field(field) => field.constant_index(constants)?.into(),
            MemberRef::Method(method) => method.constant_index(constants)?.into(),
        };
        Ok(constants.get_method_handle(self.kind, member)?)
    }
}

impl ConstantsReader<ConstantIndex> for Handle {
    fn from_constant_index(index: ConstantIndex, constants: &ConstantsPool) -> Result<Self, Error> {
        match constants.get(index)? {
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                let member = if handle_kind.is_field() {
                    MemberRef::Field(FieldRef::from_constant_index(
                        FieldRefConstantIndex(*member),
                        constants,
                    )?)
                } else {
                    MemberRef::Method(MethodRef::from_constant_index(
                        MethodRefConstantIndex(*member),
                        constants,
                    )?)
                };
                Ok(Handle {
                    kind: *handle_kind,
                    member,
                })
            }
            _ => Err(Error::BadConstant {
                index,
                expected: "method handle",
            }),
        }
    }
}

/// Write a constant which can be loaded up using `ldc` or `ldc2_w` (or used as a bootstrap
/// argument)
impl ConstantsWriter<ConstantIndex> for ConstantData {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        match self {
            ConstantData::String(string) => {
                let str_utf8 = constants.get_utf8(string.as_str())?;
                let str_idx = constants.get_string(str_utf8)?;
                Ok(str_idx.into())
            }
            ConstantData::Class(class) => Ok(class.constant_index(constants)?.into()),
            ConstantData::Integer(integer) => {
                if let Some(idx) = constants.integers.get(integer) {
                    Ok(*idx)
                } else {
                    let idx = constants.push_constant(Constant::Integer(*integer))?;
                    constants.integers.insert(*integer, idx);
                    Ok(idx)
                }
            }
            ConstantData::Long(long) => {
                if let Some(idx) = constants.longs.get(long) {
                    Ok(*idx)
                } else {
                    let idx = constants.push_constant(Constant::Long(*long))?;
                    constants.longs.insert(*long, idx);
                    Ok(idx)
                }
            }
            ConstantData::Float(float) => {
                let bits = float.to_bits();
                if let Some(idx) = constants.floats.get(&bits) {
                    Ok(*idx)
                } else {
                    let idx = constants.push_constant(Constant::Float(*float))?;
                    constants.floats.insert(bits, idx);
                    Ok(idx)
                }
            }
            ConstantData::Double(double) => {
                let bits = double.to_bits();
                if let Some(idx) = constants.doubles.get(&bits) {
                    Ok(*idx)
                } else {
                    let idx = constants.push_constant(Constant::Double(*double))?;
                    constants.doubles.insert(bits, idx);
                    Ok(idx)
                }
            }
            ConstantData::MethodHandle(handle) => handle.constant_index(constants),
            ConstantData::MethodType(method) => {
                let descriptor = constants.get_utf8(method.render())?;
                if let Some(idx) = constants.method_types.get(&descriptor) {
                    Ok(*idx)
                } else {
                    let constant = Constant::MethodType { descriptor };
                    let idx = constants.push_constant(constant)?;
                    constants.method_types.insert(descriptor, idx);
                    Ok(idx)
                }
            }
        }
    }
}

impl ConstantsReader<ConstantIndex> for ConstantData {
    fn from_constant_index(index: ConstantIndex, constants: &ConstantsPool) -> Result<Self, Error> {
        let data = match constants.get(index)? {
            Constant::Integer(integer) => ConstantData::Integer(*integer),
            Constant::Float(float) => ConstantData::Float(*float),
            Constant::Long(long) => ConstantData::Long(*long),
            Constant::Double(double) => ConstantData::Double(*double),
            Constant::String(utf8) => ConstantData::String(constants.utf8(*utf8)?.to_owned()),
            Constant::Class(_) => ConstantData::Class(RefType::from_constant_index(
                ClassConstantIndex(index),
                constants,
            )?),
            Constant::MethodType { descriptor } => ConstantData::MethodType(
                MethodDescriptor::parse_class_file(constants.utf8(*descriptor)?)?,
            ),
            Constant::MethodHandle { .. } => {
                ConstantData::MethodHandle(Handle::from_constant_index(index, constants)?)
            }
            _ => {
                return Err(Error::BadConstant {
                    index,
                    expected: "loadable constant",
                })
            }
        };
        Ok(data)
    }
}

/// Write a `CONSTANT_InvokeDynamic_info` (registering the bootstrap method if needed)
impl ConstantsWriter<InvokeDynamicConstantIndex> for DynamicCallSite {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        let bootstrap_method = self.bootstrap.handle.constant_index(constants)?;
        let bootstrap_arguments = self
            .bootstrap
            .arguments
            .iter()
            .map(|argument| argument.constant_index(constants))
            .collect::<Result<Vec<_>, Error>>()?;
        let bootstrap_idx = constants.get_bootstrap_method(BootstrapMethod {
            bootstrap_method,
            bootstrap_arguments,
        });

        let name_utf8 = constants.get_utf8(self.name.as_str())?;
        let desc_utf8 = constants.get_utf8(self.descriptor.render())?;
        let name_and_type = constants.get_name_and_type(name_utf8, desc_utf8)?;
        Ok(constants.get_invoke_dynamic(bootstrap_idx, name_and_type)?)
    }
}

impl ConstantsReader<InvokeDynamicConstantIndex> for DynamicCallSite {
    fn from_constant_index(
        index: InvokeDynamicConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Self, Error> {
        match constants.get(index.0)? {
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                let bootstrap = constants
                    .bootstrap_methods
                    .get(*bootstrap_method as usize)
                    .ok_or(Error::BadConstant {
                        index: index.0,
                        expected: "invokedynamic with a valid bootstrap method",
                    })?;
                let handle = Handle::from_constant_index(bootstrap.bootstrap_method, constants)?;
                let arguments = bootstrap
                    .bootstrap_arguments
                    .iter()
                    .map(|argument| ConstantData::from_constant_index(*argument, constants))
                    .collect::<Result<Vec<_>, Error>>()?;
                let (name, descriptor) = constants.name_and_type(*method_descriptor)?;
                Ok(DynamicCallSite {
                    bootstrap: crate::jvm::code::BootstrapData { handle, arguments },
                    name: UnqualifiedName::from_string(name.to_owned())
                        .map_err(Error::BadDescriptor)?,
                    descriptor: MethodDescriptor::parse_class_file(descriptor)?,
                })
            }
            _ => Err(Error::BadConstant {
                index: index.0,
                expected: "invokedynamic",
            }),
        }
    }
}

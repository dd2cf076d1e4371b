use crate::jvm::Error;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Counterpart of [`Serialize`] for reading class files back in
///
/// Structures that contain constant pool indices are read as raw indices: resolving them is left
/// to the [`ConstantsPool`](super::ConstantsPool).
pub trait Deserialize: Sized {
    /// Deserialize construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error>;
}

macro_rules! big_endian_binary_format {
    ($typ:ty, $write:ident, $read:ident) => {
        impl Serialize for $typ {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }

        impl Deserialize for $typ {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
                Ok(reader.$read::<BigEndian>()?)
            }
        }
    };
}

big_endian_binary_format!(u16, write_u16, read_u16);
big_endian_binary_format!(u32, write_u32, read_u32);
big_endian_binary_format!(u64, write_u64, read_u64);
big_endian_binary_format!(i16, write_i16, read_i16);
big_endian_binary_format!(i32, write_i32, read_i32);
big_endian_binary_format!(i64, write_i64, read_i64);
big_endian_binary_format!(f32, write_f32, read_f32);
big_endian_binary_format!(f64, write_f64, read_f64);

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        Ok(reader.read_u8()?)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Deserialize for i8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        Ok(reader.read_i8()?)
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::result::Result<Self, Error> {
        let len = u16::deserialize(reader)?;
        (0..len).map(|_| A::deserialize(reader)).collect()
    }
}

/// Read exactly `len` bytes
pub fn read_bytes<R: ReadBytesExt>(
    reader: &mut R,
    len: usize,
    what: &'static str,
) -> std::result::Result<Vec<u8>, Error> {
    let mut buffer = vec![0; len];
    reader
        .read_exact(&mut buffer)
        .map_err(|_| Error::UnexpectedEof { what })?;
    Ok(buffer)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_round_trip() {
        let mut buffer = vec![];
        0xCAFEu16.serialize(&mut buffer).unwrap();
        (-2i32).serialize(&mut buffer).unwrap();
        vec![1u8, 2, 3].serialize(&mut buffer).unwrap();
        assert_eq!(
            buffer,
            vec![0xCA, 0xFE, 0xFF, 0xFF, 0xFF, 0xFE, 0x00, 0x03, 1, 2, 3]
        );

        let mut reader: &[u8] = &buffer;
        assert_eq!(u16::deserialize(&mut reader).unwrap(), 0xCAFE);
        assert_eq!(i32::deserialize(&mut reader).unwrap(), -2);
        assert_eq!(Vec::<u8>::deserialize(&mut reader).unwrap(), vec![1, 2, 3]);
        assert!(u8::deserialize(&mut reader).is_err());
    }
}

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Error, ErrorKind, Result};

/// Utility trait for serializing fixed-layout binary data (class file headers and snapshots)
///
/// Everything is big endian. When serializing a sequence, the length of the sequence is a `u16`
/// unless the format says otherwise.
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Inverse of [`Serialize`]
pub trait Deserialize: Sized {
    /// Read the construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self>;
}

macro_rules! big_endian_number {
    ($typ:ty, $write:ident, $read:ident) => {
        impl Serialize for $typ {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }

        impl Deserialize for $typ {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
                reader.$read::<BigEndian>()
            }
        }
    };
}

big_endian_number!(u16, write_u16, read_u16);
big_endian_number!(u32, write_u32, read_u32);
big_endian_number!(i32, write_i32, read_i32);
big_endian_number!(i64, write_i64, read_i64);

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u8()
    }
}

/// Floats are written as their raw bits, so `NaN` payloads survive
impl Serialize for f32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.to_bits().serialize(writer)
    }
}

impl Deserialize for f32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        u32::deserialize(reader).map(f32::from_bits)
    }
}

impl Serialize for f64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<BigEndian>(self.to_bits())
    }
}

impl Deserialize for f64 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u64::<BigEndian>().map(f64::from_bits)
    }
}

/// Length in `u16` followed by UTF-8 bytes
impl Serialize for String {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let len = u16::try_from(self.len())
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "string too long"))?;
        len.serialize(writer)?;
        writer.write_all(self.as_bytes())
    }
}

impl Deserialize for String {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u16::deserialize(reader)?;
        let mut bytes = vec![0; len as usize];
        reader.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|err| Error::new(ErrorKind::InvalidData, err))
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let len = u16::try_from(self.len())
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "sequence too long"))?;
        len.serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u16::deserialize(reader)?;
        (0..len).map(|_| A::deserialize(reader)).collect()
    }
}

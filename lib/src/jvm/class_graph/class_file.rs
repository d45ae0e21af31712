use super::{ClassHierarchy, TypeInfo};
use crate::jvm::{BinaryName, ClassAccessFlags, Error, Name};
use crate::util::{Deserialize, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Result as IoResult};

const MAGIC: u32 = 0xCAFE_BABE;

/// Leading part of a class file: everything up to and including the interfaces
///
/// The hierarchy only ever needs this much of a class, so fields, methods and attributes are
/// never parsed.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.1
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassHeader {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: ClassAccessFlags,
    pub name: BinaryName,
    pub superclass: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
}

/// The few constant pool entries the header refers to
enum PoolEntry {
    Utf8(String),
    Class(u16),
    Other,
}

impl ClassHeader {
    /// Parse the header out of the bytes of a class file
    pub fn parse(bytes: &[u8]) -> Result<ClassHeader, Error> {
        let mut reader = Cursor::new(bytes);
        Self::parse_from(&mut reader).map_err(|err| Error::MalformedClassFile(err.to_string()))?
    }

    fn parse_from<R: ReadBytesExt>(reader: &mut R) -> IoResult<Result<ClassHeader, Error>> {
        let magic = u32::deserialize(reader)?;
        if magic != MAGIC {
            let msg = format!("bad magic {:#010x}", magic);
            return Ok(Err(Error::MalformedClassFile(msg)));
        }
        let minor_version = u16::deserialize(reader)?;
        let major_version = u16::deserialize(reader)?;

        // Constant pool (indices start at 1, and 8-byte constants take two slots)
        let pool_count = u16::deserialize(reader)?;
        let mut pool: HashMap<u16, PoolEntry> = HashMap::new();
        let mut index = 1;
        while index < pool_count {
            let tag = u8::deserialize(reader)?;
            let (entry, slots) = match tag {
                1 => (PoolEntry::Utf8(read_modified_utf8(reader)?), 1),
                7 => (PoolEntry::Class(u16::deserialize(reader)?), 1),
                3 | 4 => (skip(reader, 4)?, 1),
                5 | 6 => (skip(reader, 8)?, 2),
                8 | 16 | 19 | 20 => (skip(reader, 2)?, 1),
                15 => (skip(reader, 3)?, 1),
                9 | 10 | 11 | 12 | 17 | 18 => (skip(reader, 4)?, 1),
                other => {
                    let msg = format!("unknown constant pool tag {} at {}", other, index);
                    return Ok(Err(Error::MalformedClassFile(msg)));
                }
            };
            pool.insert(index, entry);
            index += slots;
        }

        let access_flags = ClassAccessFlags::from_bits_truncate(u16::deserialize(reader)?);
        let this_class = u16::deserialize(reader)?;
        let super_class = u16::deserialize(reader)?;
        let interface_indices: Vec<u16> = Vec::deserialize(reader)?;

        let class_name = |class_index: u16| -> Result<BinaryName, Error> {
            let utf8_index = match pool.get(&class_index) {
                Some(PoolEntry::Class(utf8_index)) => *utf8_index,
                _ => {
                    let msg = format!("constant {} is not a class", class_index);
                    return Err(Error::MalformedClassFile(msg));
                }
            };
            match pool.get(&utf8_index) {
                Some(PoolEntry::Utf8(name)) => {
                    BinaryName::from_str(name).map_err(Error::MalformedClassFile)
                }
                _ => {
                    let msg = format!("constant {} is not UTF-8", utf8_index);
                    Err(Error::MalformedClassFile(msg))
                }
            }
        };

        let header = (|| -> Result<ClassHeader, Error> {
            Ok(ClassHeader {
                minor_version,
                major_version,
                access_flags,
                name: class_name(this_class)?,
                superclass: match super_class {
                    0 => None,
                    idx => Some(class_name(idx)?),
                },
                interfaces: interface_indices
                    .into_iter()
                    .map(&class_name)
                    .collect::<Result<_, _>>()?,
            })
        })();
        Ok(header)
    }

    /// Hierarchy information in the header
    pub fn type_info(&self) -> TypeInfo {
        TypeInfo {
            name: self.name.clone(),
            superclass: self.superclass.clone(),
            interfaces: self.interfaces.clone(),
            is_interface: self.access_flags.contains(ClassAccessFlags::INTERFACE),
        }
    }
}

/// Writes a complete (but member-less) class file, so headers can be produced for tests and tools
impl Serialize for ClassHeader {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> IoResult<()> {
        MAGIC.serialize(writer)?;
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;

        // Every class is a `Utf8` followed by the `Class` pointing at it
        let classes: Vec<&BinaryName> = std::iter::once(&self.name)
            .chain(self.superclass.as_ref())
            .chain(&self.interfaces)
            .collect();
        let pool_count = 1 + 2 * classes.len() as u16;
        pool_count.serialize(writer)?;
        for (idx, class) in classes.iter().enumerate() {
            1u8.serialize(writer)?;
            class.as_str().to_owned().serialize(writer)?;
            7u8.serialize(writer)?;
            (1 + 2 * idx as u16).serialize(writer)?;
        }
        let class_index = |idx: usize| 2 + 2 * idx as u16;

        self.access_flags.bits().serialize(writer)?;
        class_index(0).serialize(writer)?;
        let interface_start = if self.superclass.is_some() {
            class_index(1).serialize(writer)?;
            2
        } else {
            0u16.serialize(writer)?;
            1
        };
        let interfaces: Vec<u16> = (0..self.interfaces.len())
            .map(|i| class_index(interface_start + i))
            .collect();
        interfaces.serialize(writer)?;

        // No fields, methods, or attributes
        0u16.serialize(writer)?;
        0u16.serialize(writer)?;
        0u16.serialize(writer)
    }
}

/// Class files store "modified UTF-8", which only differs from UTF-8 for `NUL` and supplementary
/// characters. Neither shows up in binary names, so standard UTF-8 decoding is close enough here.
fn read_modified_utf8<R: ReadBytesExt>(reader: &mut R) -> IoResult<String> {
    let len = u16::deserialize(reader)?;
    let mut bytes = vec![0; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn skip<R: ReadBytesExt>(reader: &mut R, count: usize) -> IoResult<PoolEntry> {
    let mut bytes = vec![0; count];
    reader.read_exact(&mut bytes)?;
    Ok(PoolEntry::Other)
}

/// Hierarchy which reads class file headers on demand from a resource loader
///
/// The loader maps a class name to the bytes of its class file. The class itself is never loaded
/// or instrumented.
pub struct ClassBytesHierarchy<F> {
    loader: F,
}

impl<F: Fn(&BinaryName) -> Option<Vec<u8>>> ClassBytesHierarchy<F> {
    pub fn new(loader: F) -> Self {
        ClassBytesHierarchy { loader }
    }
}

impl<F: Fn(&BinaryName) -> Option<Vec<u8>>> ClassHierarchy for ClassBytesHierarchy<F> {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        let bytes = (self.loader)(name)?;
        match ClassHeader::parse(&bytes) {
            Ok(header) if &header.name == name => Some(header.type_info()),
            Ok(header) => {
                log::warn!("Resource for {} contains class {}", name, header.name);
                None
            }
            Err(err) => {
                log::warn!("Could not read class file for {}: {}", name, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn header(name: &str, superclass: Option<&str>, interfaces: &[&str]) -> ClassHeader {
        ClassHeader {
            minor_version: 0,
            major_version: 55,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            name: BinaryName::from_str(name).unwrap(),
            superclass: superclass.map(|s| BinaryName::from_str(s).unwrap()),
            interfaces: interfaces
                .iter()
                .map(|i| BinaryName::from_str(i).unwrap())
                .collect(),
        }
    }

    #[test]
    fn header_round_trip() {
        let original = header(
            "me/alec/Worker",
            Some("java/lang/Thread"),
            &["java/lang/Runnable", "java/io/Serializable"],
        );
        let mut bytes = vec![];
        original.serialize(&mut bytes).unwrap();
        assert_eq!(ClassHeader::parse(&bytes).unwrap(), original);

        let object = header("java/lang/Object", None, &[]);
        let mut bytes = vec![];
        object.serialize(&mut bytes).unwrap();
        assert_eq!(ClassHeader::parse(&bytes).unwrap().superclass, None);
    }

    #[test]
    fn bad_input() {
        assert!(matches!(
            ClassHeader::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]),
            Err(Error::MalformedClassFile(_))
        ));
        assert!(matches!(
            ClassHeader::parse(&[0xDE, 0xAD, 0xBE, 0xEF]),
            Err(Error::MalformedClassFile(msg)) if msg.contains("magic")
        ));
    }

    #[test]
    fn loader_backed_lookup() {
        let worker = header("me/alec/Worker", Some("java/lang/Object"), &["java/lang/Runnable"]);
        let mut worker_bytes = vec![];
        worker.serialize(&mut worker_bytes).unwrap();

        let hierarchy = ClassBytesHierarchy::new(move |name: &BinaryName| {
            match name.as_str() {
                "me/alec/Worker" => Some(worker_bytes.clone()),
                "me/alec/Liar" => Some(worker_bytes.clone()),
                "me/alec/Garbage" => Some(vec![1, 2, 3]),
                _ => None,
            }
        });

        let info = hierarchy
            .lookup(&BinaryName::from_str("me/alec/Worker").unwrap())
            .unwrap();
        assert_eq!(info.interfaces, vec![BinaryName::from_str("java/lang/Runnable").unwrap()]);
        assert!(!info.is_interface);
        assert!(hierarchy.lookup(&BinaryName::from_str("me/alec/Liar").unwrap()).is_none());
        assert!(hierarchy.lookup(&BinaryName::from_str("me/alec/Garbage").unwrap()).is_none());
        assert!(hierarchy.lookup(&BinaryName::from_str("me/alec/Nope").unwrap()).is_none());
    }
}

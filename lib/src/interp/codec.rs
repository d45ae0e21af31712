use super::{HeapObject, Machine, ObjRef, Value};
use crate::jvm::{BinaryName, Name, ParseDescriptor, RefType, RenderDescriptor, UnqualifiedName};
use crate::snapshot::{Error, ObjectCodec};
use crate::util::{Deserialize, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, HashMap};

const TAG_NULL: u8 = 0;
const TAG_BACKREF: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_INSTANCE: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_HANDLE: u8 = 5;
const TAG_PRINT_STREAM: u8 = 6;
const TAG_INT: u8 = 7;
const TAG_LONG: u8 = 8;
const TAG_FLOAT: u8 = 9;
const TAG_DOUBLE: u8 = 10;

/// Writes and reads objects on a [`Machine`] heap
///
/// Every object gets an index the first time it is written (or read), in the same order on both
/// sides, and is written as a back reference to that index after that. This keeps aliasing intact
/// and handles cycles.
///
/// Layout of an object:
///
///   - `null`: tag `0`
///   - back reference: tag `1`, then the `u32` index
///   - string: tag `2`, then the string
///   - instance: tag `3`, class name, `u16` field count, then each field name and value
///   - array: tag `4`, array descriptor, `u32` length, then each element
///   - continuation handle, wherever it is referenced: tag `5`
///   - `System.out`: tag `6`
///   - primitive values (array elements and fields): tags `7` to `10`, then the value
///
/// Strings are interned when read, so they stay identical to literals in the code.
pub struct HeapObjectCodec<'m> {
    machine: &'m mut Machine,
    handle: ObjRef,
    written: HashMap<ObjRef, u32>,
    read: Vec<ObjRef>,
}

impl<'m> HeapObjectCodec<'m> {
    /// Codec for one snapshot, where `handle` is the continuation of the coroutine
    pub fn new(machine: &'m mut Machine, handle: ObjRef) -> HeapObjectCodec<'m> {
        HeapObjectCodec {
            machine,
            handle,
            written: HashMap::new(),
            read: vec![],
        }
    }

    fn write_reference<W: WriteBytesExt>(&mut self, obj: ObjRef, writer: &mut W) -> Result<(), Error> {
        if obj == self.handle {
            TAG_HANDLE.serialize(writer)?;
            return Ok(());
        }
        if let Some(index) = self.written.get(&obj) {
            TAG_BACKREF.serialize(writer)?;
            index.serialize(writer)?;
            return Ok(());
        }
        let index = self.written.len() as u32;
        self.written.insert(obj, index);

        let object = self
            .machine
            .object(obj)
            .map_err(|err| Error::Object(err.to_string()))?
            .clone();
        match object {
            HeapObject::String(string) => {
                TAG_STRING.serialize(writer)?;
                string.serialize(writer)?;
            }
            HeapObject::Instance { class, fields } => {
                TAG_INSTANCE.serialize(writer)?;
                class.as_str().to_owned().serialize(writer)?;
                let count = u16::try_from(fields.len())
                    .map_err(|_| Error::Object(format!("too many fields in {}", class)))?;
                count.serialize(writer)?;
                for (name, value) in &fields {
                    name.as_str().to_owned().serialize(writer)?;
                    self.write_object(value, writer)?;
                }
            }
            HeapObject::Array { array_type, values } => {
                TAG_ARRAY.serialize(writer)?;
                array_type.render().serialize(writer)?;
                let len = u32::try_from(values.len())
                    .map_err(|_| Error::Object(String::from("array too long")))?;
                len.serialize(writer)?;
                for value in &values {
                    self.write_object(value, writer)?;
                }
            }
            HeapObject::PrintStream => TAG_PRINT_STREAM.serialize(writer)?,
            other => {
                return Err(Error::Object(format!(
                    "{} objects cannot be written",
                    other.class_type().render()
                )))
            }
        }
        Ok(())
    }

    fn remember(&mut self, object: HeapObject) -> ObjRef {
        let obj = self.machine.alloc(object);
        self.read.push(obj);
        obj
    }

    fn read_name<N: Name, R: ReadBytesExt>(reader: &mut R) -> Result<N, Error> {
        N::from_string(String::deserialize(reader)?).map_err(Error::Object)
    }
}

impl<'m> ObjectCodec<Value> for HeapObjectCodec<'m> {
    fn write_object<W: WriteBytesExt>(&mut self, object: &Value, writer: &mut W) -> Result<(), Error> {
        match *object {
            Value::Null | Value::Top => TAG_NULL.serialize(writer)?,
            Value::Int(value) => {
                TAG_INT.serialize(writer)?;
                value.serialize(writer)?;
            }
            Value::Long(value) => {
                TAG_LONG.serialize(writer)?;
                value.serialize(writer)?;
            }
            Value::Float(value) => {
                TAG_FLOAT.serialize(writer)?;
                value.serialize(writer)?;
            }
            Value::Double(value) => {
                TAG_DOUBLE.serialize(writer)?;
                value.serialize(writer)?;
            }
            Value::Ref(obj) => self.write_reference(obj, writer)?,
        }
        Ok(())
    }

    fn write_null<W: WriteBytesExt>(&mut self, writer: &mut W) -> Result<(), Error> {
        TAG_NULL.serialize(writer)?;
        Ok(())
    }

    fn read_object<R: ReadBytesExt>(&mut self, reader: &mut R) -> Result<Value, Error> {
        let tag = u8::deserialize(reader)?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_INT => Value::Int(i32::deserialize(reader)?),
            TAG_LONG => Value::Long(i64::deserialize(reader)?),
            TAG_FLOAT => Value::Float(f32::deserialize(reader)?),
            TAG_DOUBLE => Value::Double(f64::deserialize(reader)?),
            TAG_HANDLE => Value::Ref(self.handle),
            TAG_PRINT_STREAM => {
                let print_stream = self.machine.print_stream();
                self.read.push(print_stream);
                Value::Ref(print_stream)
            }
            TAG_BACKREF => {
                let index = u32::deserialize(reader)?;
                let obj = self.read.get(index as usize).copied().ok_or_else(|| {
                    Error::Object(format!("back reference to unknown object {}", index))
                })?;
                Value::Ref(obj)
            }
            TAG_STRING => {
                let string = String::deserialize(reader)?;
                let obj = self.machine.intern(&string);
                self.read.push(obj);
                Value::Ref(obj)
            }
            TAG_INSTANCE => {
                let class: BinaryName = Self::read_name(reader)?;
                let obj = self.remember(HeapObject::Instance {
                    class,
                    fields: BTreeMap::new(),
                });
                let count = u16::deserialize(reader)?;
                let mut fields = BTreeMap::new();
                for _ in 0..count {
                    let name: UnqualifiedName = Self::read_name(reader)?;
                    let value = self.read_object(reader)?;
                    fields.insert(name, value);
                }
                if let Ok(HeapObject::Instance { fields: slot, .. }) = self.machine.object_mut(obj) {
                    *slot = fields;
                }
                Value::Ref(obj)
            }
            TAG_ARRAY => {
                let array_type = RefType::parse(&String::deserialize(reader)?)?;
                let obj = self.remember(HeapObject::Array {
                    array_type,
                    values: vec![],
                });
                let len = u32::deserialize(reader)?;
                let mut values = vec![];
                for _ in 0..len {
                    values.push(self.read_object(reader)?);
                }
                if let Ok(HeapObject::Array { values: slot, .. }) = self.machine.object_mut(obj) {
                    *slot = values;
                }
                Value::Ref(obj)
            }
            other => return Err(Error::Object(format!("unknown object tag {}", other))),
        };
        Ok(value)
    }

    fn continuation_handle(&mut self) -> Value {
        Value::Ref(self.handle)
    }
}

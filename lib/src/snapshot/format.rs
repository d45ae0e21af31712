use super::{CoroutineState, Data, Error, Frame, VersionedFrame};
use crate::util::{Deserialize, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// First four bytes of every snapshot (`CORO` in ASCII)
pub const SNAPSHOT_MAGIC: u32 = 0x434F524F;

/// Version of the layout written by [`write_snapshot`]
pub const SNAPSHOT_VERSION: u16 = 1;

/// Writes and reads the objects inside of a snapshot
///
/// Implementations should preserve aliasing: an object written twice in the same snapshot
/// should be read back as the same object twice. The same codec value is used for a whole
/// snapshot, so it can remember what it has already seen.
pub trait ObjectCodec<O> {
    fn write_object<W: WriteBytesExt>(&mut self, object: &O, writer: &mut W) -> Result<(), Error>;

    /// Write something that reads back as `null`
    fn write_null<W: WriteBytesExt>(&mut self, writer: &mut W) -> Result<(), Error>;

    fn read_object<R: ReadBytesExt>(&mut self, reader: &mut R) -> Result<O, Error>;

    /// Continuation handle of the reading process
    fn continuation_handle(&mut self) -> O;
}

fn write_len<W: WriteBytesExt>(len: usize, writer: &mut W) -> Result<(), Error> {
    let len = u32::try_from(len).map_err(|_| Error::Object(String::from("sequence too long")))?;
    len.serialize(writer)?;
    Ok(())
}

fn write_values<A: Serialize, W: WriteBytesExt>(values: &[A], writer: &mut W) -> Result<(), Error> {
    write_len(values.len(), writer)?;
    for value in values {
        value.serialize(writer)?;
    }
    Ok(())
}

fn read_values<A: Deserialize, R: ReadBytesExt>(reader: &mut R) -> Result<Vec<A>, Error> {
    let len = u32::deserialize(reader)?;
    let mut values = vec![];
    for _ in 0..len {
        values.push(A::deserialize(reader)?);
    }
    Ok(values)
}

fn write_data<O, W: WriteBytesExt, C: ObjectCodec<O>>(
    data: &Data<O>,
    writer: &mut W,
    codec: &mut C,
) -> Result<(), Error> {
    write_values(&data.ints, writer)?;
    write_values(&data.longs, writer)?;
    write_values(&data.floats, writer)?;
    write_values(&data.doubles, writer)?;

    write_len(data.objects.len(), writer)?;
    for (idx, object) in data.objects.iter().enumerate() {
        if data.continuation_indexes.contains(&(idx as u32)) {
            codec.write_null(writer)?;
        } else {
            codec.write_object(object, writer)?;
        }
    }
    write_values(&data.continuation_indexes, writer)
}

fn read_data<O, R: ReadBytesExt, C: ObjectCodec<O>>(
    reader: &mut R,
    codec: &mut C,
) -> Result<Data<O>, Error> {
    let ints = read_values(reader)?;
    let longs = read_values(reader)?;
    let floats = read_values(reader)?;
    let doubles = read_values(reader)?;

    let object_count = u32::deserialize(reader)?;
    let mut objects = vec![];
    for _ in 0..object_count {
        objects.push(codec.read_object(reader)?);
    }

    let continuation_indexes: Vec<u32> = read_values(reader)?;
    for idx in &continuation_indexes {
        let slot = objects.get_mut(*idx as usize).ok_or_else(|| {
            Error::Object(format!(
                "continuation index {} out of {} objects",
                idx, object_count
            ))
        })?;
        *slot = codec.continuation_handle();
    }

    Ok(Data {
        ints,
        longs,
        floats,
        doubles,
        objects,
        continuation_indexes,
    })
}

fn write_frame<O, W: WriteBytesExt, C: ObjectCodec<O>>(
    frame: &Frame<O>,
    writer: &mut W,
    codec: &mut C,
) -> Result<(), Error> {
    frame.class_name.serialize(writer)?;
    frame.method_id.serialize(writer)?;
    frame.method_version.serialize(writer)?;
    frame.continuation_point.serialize(writer)?;

    write_len(frame.monitors.len(), writer)?;
    for monitor in &frame.monitors {
        codec.write_object(monitor, writer)?;
    }

    write_data(&frame.locals, writer, codec)?;
    write_data(&frame.stack, writer, codec)
}

fn read_frame<O, R: ReadBytesExt, C: ObjectCodec<O>>(
    reader: &mut R,
    codec: &mut C,
) -> Result<Frame<O>, Error> {
    let class_name = String::deserialize(reader)?;
    let method_id = i32::deserialize(reader)?;
    let method_version = i32::deserialize(reader)?;
    let continuation_point = i32::deserialize(reader)?;

    let monitor_count = u32::deserialize(reader)?;
    let mut monitors = vec![];
    for _ in 0..monitor_count {
        monitors.push(codec.read_object(reader)?);
    }

    let locals = read_data(reader, codec)?;
    let stack = read_data(reader, codec)?;
    Ok(Frame {
        class_name,
        method_id,
        method_version,
        continuation_point,
        monitors,
        locals,
        stack,
    })
}

/// Write a snapshot
///
/// Layout (everything big endian):
///
///   - magic number `u32` ([`SNAPSHOT_MAGIC`]) and format version `u16` ([`SNAPSHOT_VERSION`])
///   - payload object
///   - frame count `u32`, then each versioned frame, innermost first
///   - versioned frame: representation count `u16`, then each representation
///   - representation: class name (`u16` length and UTF-8), method id, method version and
///     continuation point (`i32` each), monitors (`u32` count and objects), locals, stack
///   - data: ints, longs, floats, doubles (each a `u32` count and raw values, floating point as
///     bits), objects (`u32` count and objects), continuation indexes (`u32` count and `u32`s)
pub fn write_snapshot<O, W: WriteBytesExt, C: ObjectCodec<O>>(
    state: &CoroutineState<O>,
    writer: &mut W,
    codec: &mut C,
) -> Result<(), Error> {
    SNAPSHOT_MAGIC.serialize(writer)?;
    SNAPSHOT_VERSION.serialize(writer)?;
    codec.write_object(&state.payload, writer)?;

    write_len(state.frames.len(), writer)?;
    for versioned in state.frames.iter().rev() {
        let count = u16::try_from(versioned.representations.len())
            .map_err(|_| Error::Object(String::from("too many frame representations")))?;
        count.serialize(writer)?;
        for frame in &versioned.representations {
            write_frame(frame, writer, codec)?;
        }
    }
    Ok(())
}

/// Read a snapshot written with [`write_snapshot`]
pub fn read_snapshot<O, R: ReadBytesExt, C: ObjectCodec<O>>(
    reader: &mut R,
    codec: &mut C,
) -> Result<CoroutineState<O>, Error> {
    let magic = u32::deserialize(reader)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let version = u16::deserialize(reader)?;
    if version != SNAPSHOT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let payload = codec.read_object(reader)?;

    let frame_count = u32::deserialize(reader)?;
    let mut frames = vec![];
    for _ in 0..frame_count {
        let count = u16::deserialize(reader)?;
        let representations = (0..count)
            .map(|_| read_frame(reader, codec))
            .collect::<Result<Vec<_>, Error>>()?;
        frames.push(VersionedFrame { representations });
    }
    frames.reverse();

    Ok(CoroutineState { payload, frames })
}

#[cfg(test)]
mod test {
    use super::*;

    /// Objects are optional strings, the handle is `<handle>`
    struct StringCodec;

    impl ObjectCodec<Option<String>> for StringCodec {
        fn write_object<W: WriteBytesExt>(
            &mut self,
            object: &Option<String>,
            writer: &mut W,
        ) -> Result<(), Error> {
            match object {
                None => self.write_null(writer),
                Some(string) => {
                    writer.write_u8(1)?;
                    string.serialize(writer)?;
                    Ok(())
                }
            }
        }

        fn write_null<W: WriteBytesExt>(&mut self, writer: &mut W) -> Result<(), Error> {
            writer.write_u8(0)?;
            Ok(())
        }

        fn read_object<R: ReadBytesExt>(&mut self, reader: &mut R) -> Result<Option<String>, Error> {
            match reader.read_u8()? {
                0 => Ok(None),
                1 => Ok(Some(String::deserialize(reader)?)),
                tag => Err(Error::Object(format!("unknown tag {}", tag))),
            }
        }

        fn continuation_handle(&mut self) -> Option<String> {
            Some(String::from("<handle>"))
        }
    }

    fn frame(class_name: &str, point: i32) -> Frame<Option<String>> {
        let mut locals = Data::new();
        locals.ints = vec![1, -2];
        locals.longs = vec![i64::MIN];
        locals.floats = vec![f32::NAN];
        locals.doubles = vec![0.5];
        locals.objects = vec![Some(String::from("old handle")), None, Some(String::from("x"))];
        locals.continuation_indexes = vec![0];
        Frame {
            class_name: String::from(class_name),
            method_id: 7,
            method_version: -8,
            continuation_point: point,
            monitors: vec![Some(String::from("lock"))],
            locals,
            stack: Data::new(),
        }
    }

    #[test]
    fn frames_keep_their_order() {
        let state = CoroutineState {
            payload: Some(String::from("payload")),
            frames: vec![
                VersionedFrame {
                    representations: vec![frame("me/Outer", 0)],
                },
                VersionedFrame {
                    representations: vec![frame("me/Inner", 3), frame("me/Inner", 4)],
                },
            ],
        };

        let mut bytes = vec![];
        write_snapshot(&state, &mut bytes, &mut StringCodec).unwrap();
        assert_eq!(&bytes[0..6], &[0x43, 0x4F, 0x52, 0x4F, 0, 1]);

        let read = read_snapshot(&mut bytes.as_slice(), &mut StringCodec).unwrap();
        assert_eq!(read.payload, state.payload);
        assert_eq!(read.frames.len(), 2);
        assert_eq!(read.frames[0].representations[0].class_name, "me/Outer");
        assert_eq!(read.frames[1].representations[1].continuation_point, 4);

        let locals = &read.frames[0].representations[0].locals;
        assert_eq!(
            locals.objects,
            vec![
                Some(String::from("<handle>")),
                None,
                Some(String::from("x"))
            ],
            "handle is swapped for the reader's"
        );
        assert!(locals.floats[0].is_nan());
        assert_eq!(locals.longs, vec![i64::MIN]);
    }

    #[test]
    fn bad_input() {
        let state = CoroutineState {
            payload: None,
            frames: vec![VersionedFrame {
                representations: vec![frame("me/Outer", 0)],
            }],
        };
        let mut bytes = vec![];
        write_snapshot(&state, &mut bytes, &mut StringCodec).unwrap();

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = 0;
        assert!(matches!(
            read_snapshot(&mut wrong_magic.as_slice(), &mut StringCodec),
            Err(Error::BadMagic(0x004F524F))
        ));

        let mut wrong_version = bytes.clone();
        wrong_version[5] = 9;
        assert!(matches!(
            read_snapshot(&mut wrong_version.as_slice(), &mut StringCodec),
            Err(Error::UnsupportedVersion(9))
        ));

        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            read_snapshot(&mut &truncated[..], &mut StringCodec),
            Err(Error::Truncated)
        ));
    }
}

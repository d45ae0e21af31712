//! Portable snapshots of suspended coroutines
//!
//! A suspended coroutine is a payload object plus the saved frame of every instrumented method
//! on its call stack. Each [`Frame`] records which code it belongs to (class name, method id,
//! method version, continuation point, together a [`FrameKey`]) and the values it held, split by
//! type into [`Data`] bundles.
//!
//! Code changes between the time a snapshot is written and the time it is read. To cope with
//! that, every frame is written as a [`VersionedFrame`]: a chain of equivalent representations
//! produced by [`FrameUpdatePoint`] rules. When reading, the first representation that the
//! running code can load (according to a [`FrameResolver`]) wins. [`FrameInterceptPoint`] rules
//! fix up values without changing which code a frame belongs to.
//!
//! The binary layout is described in [`write_snapshot`]. Objects are written by a pluggable
//! [`ObjectCodec`], which is expected to preserve aliasing.

mod format;
mod resolver;
mod rules;

pub use format::*;
pub use resolver::*;
pub use rules::*;

use std::fmt;

/// Identifies the code a frame can be loaded into
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub class_name: String,
    pub method_id: i32,
    pub method_version: i32,
    pub continuation_point: i32,
}

impl FrameKey {
    pub fn new(
        class_name: impl Into<String>,
        method_id: i32,
        method_version: i32,
        continuation_point: i32,
    ) -> FrameKey {
        FrameKey {
            class_name: class_name.into(),
            method_id,
            method_version,
            continuation_point,
        }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{:08x}/{:08x}@{}",
            self.class_name, self.method_id as u32, self.method_version as u32, self.continuation_point
        )
    }
}

/// Values of one category of storage (locals or operand stack), split by type
#[derive(Clone, Debug, PartialEq)]
pub struct Data<O> {
    pub ints: Vec<i32>,
    pub longs: Vec<i64>,
    pub floats: Vec<f32>,
    pub doubles: Vec<f64>,
    pub objects: Vec<O>,

    /// Indices into `objects` which hold the continuation handle
    ///
    /// The handle is process specific, so it is never written out. A fresh handle gets put back
    /// at these indices when reading.
    pub continuation_indexes: Vec<u32>,
}

impl<O> Data<O> {
    pub fn new() -> Data<O> {
        Data {
            ints: vec![],
            longs: vec![],
            floats: vec![],
            doubles: vec![],
            objects: vec![],
            continuation_indexes: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ints.is_empty()
            && self.longs.is_empty()
            && self.floats.is_empty()
            && self.doubles.is_empty()
            && self.objects.is_empty()
    }
}

impl<O> Default for Data<O> {
    fn default() -> Self {
        Data::new()
    }
}

/// Saved state of one method activation
#[derive(Clone, Debug, PartialEq)]
pub struct Frame<O> {
    pub class_name: String,
    pub method_id: i32,
    pub method_version: i32,
    pub continuation_point: i32,

    /// Monitors held, in the order they were entered
    pub monitors: Vec<O>,

    pub locals: Data<O>,
    pub stack: Data<O>,
}

impl<O> Frame<O> {
    pub fn key(&self) -> FrameKey {
        FrameKey {
            class_name: self.class_name.clone(),
            method_id: self.method_id,
            method_version: self.method_version,
            continuation_point: self.continuation_point,
        }
    }

    /// Point this frame at different code, keeping its values
    pub fn set_key(&mut self, key: FrameKey) {
        self.class_name = key.class_name;
        self.method_id = key.method_id;
        self.method_version = key.method_version;
        self.continuation_point = key.continuation_point;
    }
}

/// Equivalent representations of one saved frame, for different versions of the code
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedFrame<O> {
    pub representations: Vec<Frame<O>>,
}

/// Everything needed to resume a coroutine
#[derive(Clone, Debug, PartialEq)]
pub struct CoroutineState<O> {
    /// The coroutine object itself
    pub payload: O,

    /// Saved frames, outermost first
    pub frames: Vec<VersionedFrame<O>>,
}

#[derive(Debug)]
pub enum Error {
    /// Two rules of the same kind for the same key
    DuplicateRule(FrameKey),

    /// An intercept rule returned a frame with a different key
    InterceptChangedKey(FrameKey),

    /// An update rule returned a frame with the same key
    UpdateKeptKey(FrameKey),

    /// Following update rules came back to an earlier key
    UpdateCycle(FrameKey),

    /// None of the representations of a frame can be loaded (the keys tried are included)
    NoLoadableFrame(Vec<FrameKey>),

    /// Input doesn't start with the snapshot magic number
    BadMagic(u32),

    UnsupportedVersion(u16),

    /// Input ended early
    Truncated,

    Io(std::io::Error),

    /// Error from the object codec
    Object(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::Truncated,
            _ => Error::Io(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateRule(key) => write!(f, "more than one rule of a kind for {}", key),
            Error::InterceptChangedKey(key) => {
                write!(f, "intercept rule for {} changed the frame key", key)
            }
            Error::UpdateKeptKey(key) => {
                write!(f, "update rule for {} did not change the frame key", key)
            }
            Error::UpdateCycle(key) => write!(f, "update rules loop back to {}", key),
            Error::NoLoadableFrame(keys) => {
                write!(f, "no loadable frame or updatable frame detected (tried")?;
                for key in keys {
                    write!(f, " {}", key)?;
                }
                write!(f, ")")
            }
            Error::BadMagic(magic) => write!(f, "bad snapshot magic number {:#010x}", magic),
            Error::UnsupportedVersion(version) => {
                write!(f, "unsupported snapshot format version {}", version)
            }
            Error::Truncated => write!(f, "snapshot is truncated"),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Object(msg) => write!(f, "object codec error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

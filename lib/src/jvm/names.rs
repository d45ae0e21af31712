use std::borrow::Cow;
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Names of methods, fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

/// Extracts the raw underlying string name
impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Extracts the raw underlying string name
impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extact the raw underlying string data
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extact the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;

    /// Try to construct a name from a string slice
    fn from_str(name: &str) -> Result<Self, String> {
        Self::from_string(name.to_owned())
    }
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if name.is_empty() {
            Err(format!("Unqualified name '{}' is empty", name))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(UnqualifiedName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Binary name '{}' is empty", name))
        } else {
            name.split('/').map(UnqualifiedName::check_valid).collect()
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(BinaryName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Display for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    // Special unqualified names - only these are allowed to have angle brackets in them
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");

    // JDK names
    pub const OUT: Self = Self::name("out");
    pub const PRINTLN: Self = Self::name("println");

    // Runtime names
    pub const SUSPEND: Self = Self::name("suspend");
    pub const GETMODE: Self = Self::name("getMode");
    pub const SETMODE: Self = Self::name("setMode");
    pub const RESET: Self = Self::name("reset");
    pub const LOADNEXTMETHODSTATE: Self = Self::name("loadNextMethodState");
    pub const PUSHNEWMETHODSTATE: Self = Self::name("pushNewMethodState");
    pub const INVALIDCONTINUATIONPOINT: Self = Self::name("invalidContinuationPoint");
    pub const CREATE: Self = Self::name("create");
    pub const GETCONTINUATIONPOINT: Self = Self::name("getContinuationPoint");
    pub const GETMETHODID: Self = Self::name("getMethodId");
    pub const GETMETHODVERSION: Self = Self::name("getMethodVersion");
    pub const GETLOCKSTATE: Self = Self::name("getLockState");
    pub const GETLOCALS: Self = Self::name("getLocals");
    pub const GETSTACK: Self = Self::name("getStack");
    pub const GETINTS: Self = Self::name("getInts");
    pub const GETLONGS: Self = Self::name("getLongs");
    pub const GETFLOATS: Self = Self::name("getFloats");
    pub const GETDOUBLES: Self = Self::name("getDoubles");
    pub const GETOBJECTS: Self = Self::name("getObjects");
    pub const ENTER: Self = Self::name("enter");
    pub const EXIT: Self = Self::name("exit");
    pub const TOARRAY: Self = Self::name("toArray");
    pub const ALLOCATEINTARRAY: Self = Self::name("allocateIntArray");
    pub const ALLOCATELONGARRAY: Self = Self::name("allocateLongArray");
    pub const ALLOCATEFLOATARRAY: Self = Self::name("allocateFloatArray");
    pub const ALLOCATEDOUBLEARRAY: Self = Self::name("allocateDoubleArray");
    pub const ALLOCATEOBJECTARRAY: Self = Self::name("allocateObjectArray");
    pub const COMMIT: Self = Self::name("commit");
    pub const ROLLBACK: Self = Self::name("rollback");
    pub const RUN: Self = Self::name("run");
    pub const RECORD: Self = Self::name("record");
    pub const MONITORS: Self = Self::name("monitors");
    pub const MESSAGE: Self = Self::name("message");
}

impl BinaryName {
    /// Join segments from the other name onto the end of this binary name
    pub fn join(&self, other: impl Name) -> BinaryName {
        BinaryName(Cow::Owned(format!("{}/{}", self.as_str(), other.as_str())))
    }

    /// Last segment of the name (the simple class name)
    pub fn simple_name(&self) -> &str {
        self.as_str().rsplit('/').next().unwrap_or_else(|| self.as_str())
    }

    pub(crate) const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    // JDK names
    pub const CHARSEQUENCE: Self = Self::name("java/lang/CharSequence");
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const CLONEABLE: Self = Self::name("java/lang/Cloneable");
    pub const COMPARABLE: Self = Self::name("java/lang/Comparable");
    pub const ERROR: Self = Self::name("java/lang/Error");
    pub const EXCEPTION: Self = Self::name("java/lang/Exception");
    pub const ILLEGALMONITORSTATEEXCEPTION: Self =
        Self::name("java/lang/IllegalMonitorStateException");
    pub const ILLEGALSTATEEXCEPTION: Self = Self::name("java/lang/IllegalStateException");
    pub const INTEGER: Self = Self::name("java/lang/Integer");
    pub const METHODHANDLE: Self = Self::name("java/lang/invoke/MethodHandle");
    pub const METHODTYPE: Self = Self::name("java/lang/invoke/MethodType");
    pub const NUMBER: Self = Self::name("java/lang/Number");
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const PRINTSTREAM: Self = Self::name("java/io/PrintStream");
    pub const RUNTIMEEXCEPTION: Self = Self::name("java/lang/RuntimeException");
    pub const SERIALIZABLE: Self = Self::name("java/io/Serializable");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const SYSTEM: Self = Self::name("java/lang/System");
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");
    pub const ARITHMETICEXCEPTION: Self = Self::name("java/lang/ArithmeticException");
    pub const NULLPOINTEREXCEPTION: Self = Self::name("java/lang/NullPointerException");
    pub const ARRAYINDEXOUTOFBOUNDSEXCEPTION: Self =
        Self::name("java/lang/ArrayIndexOutOfBoundsException");
    pub const CLASSCASTEXCEPTION: Self = Self::name("java/lang/ClassCastException");
    pub const NEGATIVEARRAYSIZEEXCEPTION: Self =
        Self::name("java/lang/NegativeArraySizeException");
    pub const UNSUPPORTEDOPERATIONEXCEPTION: Self =
        Self::name("java/lang/UnsupportedOperationException");

    // Runtime names
    pub const CONTINUATION: Self = Self::name("coroutines/user/Continuation");
    pub const COROUTINE: Self = Self::name("coroutines/user/Coroutine");
    pub const METHODSTATE: Self = Self::name("coroutines/user/MethodState");
    pub const LOCKSTATE: Self = Self::name("coroutines/user/LockState");
    pub const DATA: Self = Self::name("coroutines/user/Data");
    pub const SUSPENDABLE: Self = Self::name("coroutines/user/Suspendable");
    pub const PROBE: Self = Self::name("coroutines/test/Probe");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation() {
        assert!(BinaryName::from_str("java/lang/Object").is_ok());
        assert!(BinaryName::from_str("java//Object").is_err(), "empty segment");
        assert!(BinaryName::from_str("").is_err());
        assert!(UnqualifiedName::from_str("run").is_ok());
        assert!(UnqualifiedName::from_str("a.b").is_err());
        assert!(UnqualifiedName::from_str("a/b").is_err());
    }

    #[test]
    fn simple_names() {
        assert_eq!(BinaryName::CONTINUATION.simple_name(), "Continuation");
        assert_eq!(BinaryName::from_str("Top").unwrap().simple_name(), "Top");
    }
}

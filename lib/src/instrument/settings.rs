use super::{ContinuationParameterPolicy, SuspendPolicy};
use crate::jvm::BinaryName;

pub struct Settings {
    /// Extra instructions marking the generated regions of a method
    pub debug_markers: DebugMarkers,

    /// Keep `LineNumber` pseudo-instructions from the input
    ///
    /// Dropping them makes stack traces less useful, but also makes the output smaller.
    pub preserve_line_numbers: bool,

    /// How arrays for saved frames get allocated
    pub frame_allocator: FrameAllocator,

    /// Which calls are continuation points
    pub suspend_policy: Box<dyn SuspendPolicy>,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            debug_markers: DebugMarkers::None,
            preserve_line_numbers: true,
            frame_allocator: FrameAllocator::Default,
            suspend_policy: Box::new(ContinuationParameterPolicy),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new()
    }
}

/// Where generated code announces what it is doing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugMarkers {
    None,

    /// `ldc "marker"; pop` (visible when disassembling, no runtime effect)
    ConstantPool,

    /// `System.out.println("marker")`
    StdoutPrint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameAllocator {
    /// `newarray`/`anewarray`
    Default,

    /// Static `allocateIntArray(I)[I` (and so on for longs, floats, doubles and objects) methods
    /// on the given class
    ///
    /// The class also has static `commit()V`, called after each frame is pushed, and
    /// `rollback()V`, called when loading a frame fails.
    Custom(BinaryName),
}

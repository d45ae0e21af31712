use super::SynLabel;
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodDescriptor, RefType, RenderDescriptor, UnqualifiedName,
};

/// Symbolic JVM instruction
///
/// Unlike the binary encoding, jumps refer to [`SynLabel`]s and the labels themselves (as well as
/// line numbers) are pseudo-instructions in the same list. This makes inserting glue code
/// anywhere in a method a plain `Vec` splice.
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-6.html#jvms-6.5>
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// Position that jumps and handlers can refer to
    Label(SynLabel),

    /// Source line of the following instructions
    LineNumber(u16),

    Nop,
    AConstNull,
    IConst(i32),
    LConst(i64),
    FConst(f32),
    DConst(f64),
    Ldc(Constant),

    ILoad(u16),
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,

    IStore(u16),
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,

    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,

    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType),
    LSh(ShiftType),
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16),

    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,

    LCmp,
    FCmp(CompareMode),
    DCmp(CompareMode),

    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),

    Invoke(InvokeType, MethodRef),
    InvokeDynamic(InvokeDynamicRef),

    New(BinaryName),
    NewArray(BaseType),
    ANewArray(RefType),
    MultiANewArray(RefType, u8),
    ArrayLength,
    CheckCast(RefType),
    InstanceOf(RefType),

    MonitorEnter,
    MonitorExit,

    If(OrdComparison, SynLabel),
    IfICmp(OrdComparison, SynLabel),
    IfACmp(EqComparison, SynLabel),
    IfNull(EqComparison, SynLabel),
    Goto(SynLabel),
    Jsr(SynLabel),
    Ret(u16),
    TableSwitch {
        low: i32,
        default: SynLabel,
        targets: Vec<SynLabel>,
    },
    LookupSwitch {
        default: SynLabel,
        targets: Vec<(i32, SynLabel)>,
    },

    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl Instruction {
    /// Labels this instruction may transfer control to (not counting falling through)
    pub fn jump_targets(&self) -> Vec<SynLabel> {
        match self {
            Instruction::If(_, lbl)
            | Instruction::IfICmp(_, lbl)
            | Instruction::IfACmp(_, lbl)
            | Instruction::IfNull(_, lbl)
            | Instruction::Goto(lbl)
            | Instruction::Jsr(lbl) => vec![*lbl],
            Instruction::TableSwitch {
                default, targets, ..
            } => {
                let mut labels = targets.clone();
                labels.push(*default);
                labels
            }
            Instruction::LookupSwitch { default, targets } => {
                let mut labels: Vec<SynLabel> = targets.iter().map(|(_, lbl)| *lbl).collect();
                labels.push(*default);
                labels
            }
            _ => vec![],
        }
    }

    /// Can control continue to the next instruction in the list?
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Goto(_)
                | Instruction::Jsr(_)
                | Instruction::Ret(_)
                | Instruction::TableSwitch { .. }
                | Instruction::LookupSwitch { .. }
                | Instruction::IReturn
                | Instruction::LReturn
                | Instruction::FReturn
                | Instruction::DReturn
                | Instruction::AReturn
                | Instruction::Return
                | Instruction::AThrow
        )
    }

    /// Labels and line numbers don't execute anything
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Instruction::Label(_) | Instruction::LineNumber(_))
    }

    /// Rewrite every label mentioned by the instruction (including a placed label)
    pub fn map_labels(&self, mut map_label: impl FnMut(SynLabel) -> SynLabel) -> Instruction {
        match self {
            Instruction::Label(lbl) => Instruction::Label(map_label(*lbl)),
            Instruction::If(cmp, lbl) => Instruction::If(*cmp, map_label(*lbl)),
            Instruction::IfICmp(cmp, lbl) => Instruction::IfICmp(*cmp, map_label(*lbl)),
            Instruction::IfACmp(cmp, lbl) => Instruction::IfACmp(*cmp, map_label(*lbl)),
            Instruction::IfNull(cmp, lbl) => Instruction::IfNull(*cmp, map_label(*lbl)),
            Instruction::Goto(lbl) => Instruction::Goto(map_label(*lbl)),
            Instruction::Jsr(lbl) => Instruction::Jsr(map_label(*lbl)),
            Instruction::TableSwitch {
                low,
                default,
                targets,
            } => Instruction::TableSwitch {
                low: *low,
                default: map_label(*default),
                targets: targets.iter().map(|lbl| map_label(*lbl)).collect(),
            },
            Instruction::LookupSwitch { default, targets } => Instruction::LookupSwitch {
                default: map_label(*default),
                targets: targets
                    .iter()
                    .map(|(key, lbl)| (*key, map_label(*lbl)))
                    .collect(),
            },
            other => other.clone(),
        }
    }

    /// Is this a call to the given method?
    pub fn is_call_to(&self, class: &BinaryName, name: &UnqualifiedName) -> bool {
        matches!(self, Instruction::Invoke(_, method) if &method.class == class && &method.name == name)
    }
}

/// Constants loadable with `ldc`
///
/// Numeric constants get their own instructions (`IConst`, `LConst`, ...) since picking the
/// encoding is a serialization concern.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    String(String),
    Class(RefType),
    MethodType(MethodDescriptor),
}

/// Reference to a field
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

/// Reference to a method
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

impl MethodRef {
    pub fn new(class: BinaryName, name: UnqualifiedName, descriptor: MethodDescriptor) -> Self {
        MethodRef {
            class,
            name,
            descriptor,
        }
    }

    /// Human readable `class.name descriptor`
    pub fn pretty(&self) -> String {
        format!("{}.{}{}", self.class, self.name, self.descriptor.render())
    }
}

/// Dynamic call-site
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InvokeDynamicRef {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface,
}

/// Comparison against zero (or between two integers)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OrdComparison {
    EQ,
    NE,
    LT,
    GE,
    GT,
    LE,
}

impl OrdComparison {
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            OrdComparison::EQ => ordering == Equal,
            OrdComparison::NE => ordering != Equal,
            OrdComparison::LT => ordering == Less,
            OrdComparison::GE => ordering != Less,
            OrdComparison::GT => ordering == Greater,
            OrdComparison::LE => ordering != Greater,
        }
    }
}

/// Reference (or null) equality comparison
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl EqComparison {
    pub fn holds(&self, equal: bool) -> bool {
        match self {
            EqComparison::EQ => equal,
            EqComparison::NE => !equal,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShiftType {
    Left,
    ArithmeticRight,
    LogicalRight,
}

/// How to order `NaN` in a floating point comparison
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompareMode {
    /// `NaN` compares as less (`fcmpl`/`dcmpl`)
    L,

    /// `NaN` compares as greater (`fcmpg`/`dcmpg`)
    G,
}

use crate::jvm::code::{Instruction, LabelGenerator, SynLabel, SynLabelGenerator};
use crate::jvm::verifier::StackMapFrame;
use crate::jvm::{BinaryName, Error};
use std::collections::HashMap;
use std::ops::Range;

/// Semantic representation of a method body
#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    /// Maximum size of locals through the method
    pub max_locals: u16,

    /// Maximum size of stack through the method
    pub max_stack: u16,

    /// Instructions, including label and line number pseudo-instructions
    pub instructions: Vec<Instruction>,

    /// Exception handlers, in priority order
    pub exception_handlers: Vec<ExceptionHandler>,

    /// Stack map table, once it has been computed
    pub stack_map: Option<Vec<StackMapFrame>>,

    /// Generator to produce the next label
    pub label_generator: SynLabelGenerator,
}

/// Entry in the exception table
///
/// The covered range starts at the `start` label (inclusive) and stops at the `end` label
/// (exclusive).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: SynLabel,
    pub end: SynLabel,
    pub handler: SynLabel,

    /// Type of exception caught (`None` means everything)
    pub catch_type: Option<BinaryName>,
}

impl Code {
    /// Code with no computed limits or stack map
    ///
    /// The label generator is set up to never collide with a label already in the instructions.
    pub fn new(instructions: Vec<Instruction>, exception_handlers: Vec<ExceptionHandler>) -> Code {
        let mut used_labels: Vec<SynLabel> = vec![];
        for insn in &instructions {
            if let Instruction::Label(lbl) = insn {
                used_labels.push(*lbl);
            }
            used_labels.extend(insn.jump_targets());
        }
        for handler in &exception_handlers {
            used_labels.extend([handler.start, handler.end, handler.handler]);
        }
        Code {
            max_locals: 0,
            max_stack: 0,
            instructions,
            exception_handlers,
            stack_map: None,
            label_generator: SynLabelGenerator::after(&used_labels),
        }
    }

    /// Get a label not yet used in this code
    pub fn fresh_label(&mut self) -> SynLabel {
        self.label_generator.fresh_label()
    }

    /// Index in the instruction list of every placed label
    pub fn label_positions(&self) -> Result<HashMap<SynLabel, usize>, Error> {
        let mut positions = HashMap::new();
        for (idx, insn) in self.instructions.iter().enumerate() {
            if let Instruction::Label(lbl) = insn {
                if positions.insert(*lbl, idx).is_some() {
                    return Err(Error::DuplicateLabel(*lbl));
                }
            }
        }
        Ok(positions)
    }

    /// Instruction index ranges covered by each exception handler, along with the index of the
    /// handler entry point
    pub fn handler_ranges(&self) -> Result<Vec<(Range<usize>, usize)>, Error> {
        let positions = self.label_positions()?;
        let lookup = |lbl: &SynLabel| {
            positions
                .get(lbl)
                .copied()
                .ok_or(Error::UnplacedLabel(*lbl))
        };
        self.exception_handlers
            .iter()
            .map(|handler| {
                let start = lookup(&handler.start)?;
                let end = lookup(&handler.end)?;
                let entry = lookup(&handler.handler)?;
                Ok((start..end, entry))
            })
            .collect()
    }

    /// Does any instruction satisfy the predicate?
    pub fn contains(&self, predicate: impl Fn(&Instruction) -> bool) -> bool {
        self.instructions.iter().any(predicate)
    }
}

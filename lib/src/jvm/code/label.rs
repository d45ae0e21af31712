use std::fmt;

/// Opaque label
///
/// Labels are placed in the instruction list with [`super::Instruction::Label`] and are the only
/// way instructions and exception handlers refer to positions in the code.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SynLabel(usize);

impl SynLabel {
    /// First label handed out by a fresh generator
    pub const START: SynLabel = SynLabel(0);

    /// Get the next fresh label
    pub fn next(&self) -> SynLabel {
        SynLabel(self.0 + 1)
    }
}

/// Generates new labels
pub trait LabelGenerator<Label> {
    /// Generate a fresh label
    fn fresh_label(&mut self) -> Label;
}

/// Label generator for [`SynLabel`]
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynLabelGenerator(SynLabel);

impl SynLabelGenerator {
    pub fn new(start: SynLabel) -> SynLabelGenerator {
        SynLabelGenerator(start)
    }

    /// Generator that will never produce any of the given labels
    pub fn after<'a>(used: impl IntoIterator<Item = &'a SynLabel>) -> SynLabelGenerator {
        let start = used
            .into_iter()
            .max()
            .map_or(SynLabel::START, SynLabel::next);
        SynLabelGenerator(start)
    }
}

impl Default for SynLabelGenerator {
    fn default() -> Self {
        SynLabelGenerator::new(SynLabel::START)
    }
}

impl LabelGenerator<SynLabel> for SynLabelGenerator {
    fn fresh_label(&mut self) -> SynLabel {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl fmt::Debug for SynLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

use super::{Analysis, Analyzer, Frame, VerificationType};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::code::{Code, SynLabel};
use crate::jvm::model::Method;
use crate::jvm::{BinaryName, Error};
use crate::util::Width;
use std::collections::BTreeMap;

/// Entry in a stack map table
///
/// Each entry describes the frame at a label relative to the previous entry (the first entry is
/// relative to the frame on method entry). Locals are in their compact form: a `long` or
/// `double` takes only one entry and trailing `Top` locals are dropped.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.7.4
#[derive(Clone, Debug, PartialEq)]
pub enum StackMapFrame {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    Same { label: SynLabel },

    /// Frame has the same locals as the previous frame and number of stack items is one
    SameLocalsOneStack {
        label: SynLabel,
        stack: VerificationType,
    },

    /// Frame is like the previous frame, but without the last `chopped` locals
    ///
    /// Note: `chopped` is in the range 1 to 3 inclusive
    Chop { label: SynLabel, chopped: u8 },

    /// Frame is like the previous frame, but with up to 3 extra locals
    Append {
        label: SynLabel,
        locals: Vec<VerificationType>,
    },

    /// Frame has exactly the locals and stack specified
    Full {
        label: SynLabel,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    pub fn label(&self) -> SynLabel {
        match self {
            StackMapFrame::Same { label }
            | StackMapFrame::SameLocalsOneStack { label, .. }
            | StackMapFrame::Chop { label, .. }
            | StackMapFrame::Append { label, .. }
            | StackMapFrame::Full { label, .. } => *label,
        }
    }
}

/// Frame in the compact form used by stack map tables
#[derive(Clone, Debug, PartialEq)]
struct CompactFrame {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

impl From<&Frame> for CompactFrame {
    fn from(frame: &Frame) -> CompactFrame {
        let mut locals = vec![];
        let mut slot = 0;
        while slot < frame.locals.len() {
            let local = &frame.locals[slot];
            locals.push(local.clone());
            slot += local.width();
        }
        while locals.last() == Some(&VerificationType::Top) {
            locals.pop();
        }
        CompactFrame {
            locals,
            stack: frame.stack.iter().map(|(_, _, t)| t.clone()).collect(),
        }
    }
}

impl CompactFrame {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option only if none of the other stack map frame
    /// variants are enough to encode the transition.
    fn stack_map_frame(&self, label: SynLabel, previous_frame: &CompactFrame) -> StackMapFrame {
        match self.stack.len() {
            0 => {
                let this_locals_len = self.locals.len();
                let prev_locals_len = previous_frame.locals.len();

                if this_locals_len <= prev_locals_len {
                    let len_difference = prev_locals_len - this_locals_len;
                    let this_is_prefix_of_prev = previous_frame.locals.starts_with(&self.locals);
                    if len_difference < 4 && this_is_prefix_of_prev {
                        if len_difference == 0 {
                            return StackMapFrame::Same { label };
                        } else {
                            return StackMapFrame::Chop {
                                label,
                                chopped: len_difference as u8,
                            };
                        }
                    }
                } else if this_locals_len - prev_locals_len < 4
                    && self.locals.starts_with(&previous_frame.locals)
                {
                    return StackMapFrame::Append {
                        label,
                        locals: self.locals[prev_locals_len..].to_vec(),
                    };
                }
            }
            1 if self.locals == previous_frame.locals => {
                return StackMapFrame::SameLocalsOneStack {
                    label,
                    stack: self.stack[0].clone(),
                }
            }
            _ => (),
        }

        StackMapFrame::Full {
            label,
            locals: self.locals.clone(),
            stack: self.stack.clone(),
        }
    }
}

/// Build the stack map table of analyzed code
///
/// There is one entry for every label that is reachable and is either a jump target or the start
/// of an exception handler, in code order.
pub fn stack_map_table(code: &Code, analysis: &Analysis) -> Result<Vec<StackMapFrame>, Error> {
    let positions = code.label_positions()?;

    let mut needs_frame: Vec<SynLabel> = code
        .instructions
        .iter()
        .enumerate()
        .filter(|(idx, _)| analysis.is_reachable(*idx))
        .flat_map(|(_, insn)| insn.jump_targets())
        .collect();
    needs_frame.extend(code.exception_handlers.iter().map(|h| h.handler));

    let mut ordered: BTreeMap<usize, SynLabel> = BTreeMap::new();
    for label in needs_frame {
        let position = *positions
            .get(&label)
            .ok_or(Error::UnplacedLabel(label))?;
        if analysis.is_reachable(position) {
            ordered.insert(position, label);
        }
    }

    let mut previous = CompactFrame::from(analysis.frame(0)?);
    let mut table = Vec::with_capacity(ordered.len());
    for (position, label) in ordered {
        let frame = CompactFrame::from(analysis.frame(position)?);
        table.push(frame.stack_map_frame(label, &previous));
        previous = frame;
    }
    Ok(table)
}

/// Recompute `max_stack`, `max_locals` and the stack map table of a method
pub fn compute_metadata(
    this_class: &BinaryName,
    method: &mut Method,
    hierarchy: &dyn ClassHierarchy,
) -> Result<Analysis, Error> {
    let analysis = Analyzer::new(hierarchy).analyze(this_class, method)?;
    let code = method
        .code
        .as_mut()
        .ok_or_else(|| Error::Inconsistent(String::from("analyzed method has no code")))?;
    let table = stack_map_table(code, &analysis)?;
    log::debug!(
        "Computed {} stack map entries for {}.{}",
        table.len(),
        this_class,
        method.name
    );

    code.max_stack = analysis.max_stack;
    code.max_locals = analysis.max_locals;
    code.stack_map = Some(table);
    Ok(analysis)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::JavaLibraryHierarchy;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::{ExceptionHandler, LabelGenerator, OrdComparison, SynLabelGenerator};
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName};

    fn static_method(descriptor: &str, code: Code) -> Method {
        Method::new(
            UnqualifiedName::from_str("test").unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            MethodAccessFlags::STATIC,
            Some(code),
        )
    }

    #[test]
    fn frame_kinds() {
        let java = JavaLibraryHierarchy::new();
        let this_class = BinaryName::from_str("me/Kinds").unwrap();
        let mut gen = SynLabelGenerator::default();
        let (l_append, l_one, l_join, l_chop) = (
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
        );

        let mut method = static_method(
            "(I)I",
            Code::new(
                vec![
                    ILoad(0),
                    If(OrdComparison::EQ, l_append),
                    Goto(l_append),
                    Label(l_append),
                    LConst(1),
                    LStore(1),
                    ILoad(0),
                    If(OrdComparison::EQ, l_one),
                    IConst(3),
                    Goto(l_join),
                    Label(l_one),
                    IConst(4),
                    Label(l_join),
                    IStore(0),
                    ILoad(0),
                    If(OrdComparison::NE, l_chop),
                    Goto(l_chop),
                    Label(l_chop),
                    ILoad(0),
                    IReturn,
                ],
                vec![],
            ),
        );
        compute_metadata(&this_class, &mut method, &java).unwrap();
        let code = method.code.unwrap();

        assert_eq!(code.max_locals, 3);
        assert_eq!(code.max_stack, 2);
        let table = code.stack_map.unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table[0], StackMapFrame::Same { label: l_append });
        assert_eq!(
            table[1],
            StackMapFrame::Append {
                label: l_one,
                locals: vec![VerificationType::Long],
            }
        );
        assert_eq!(
            table[2],
            StackMapFrame::SameLocalsOneStack {
                label: l_join,
                stack: VerificationType::Integer,
            }
        );
        assert_eq!(table[3], StackMapFrame::Same { label: l_chop });
    }

    #[test]
    fn chopped_locals() {
        let label = SynLabel::START;
        let previous = CompactFrame {
            locals: vec![
                VerificationType::Integer,
                VerificationType::Long,
                VerificationType::Float,
            ],
            stack: vec![],
        };
        let frame = CompactFrame {
            locals: vec![VerificationType::Integer],
            stack: vec![],
        };
        assert_eq!(
            frame.stack_map_frame(label, &previous),
            StackMapFrame::Chop { label, chopped: 2 }
        );

        let unrelated = CompactFrame {
            locals: vec![VerificationType::Float],
            stack: vec![],
        };
        assert!(matches!(
            unrelated.stack_map_frame(label, &previous),
            StackMapFrame::Full { .. }
        ));
    }

    #[test]
    fn append_and_full() {
        let java = JavaLibraryHierarchy::new();
        let this_class = BinaryName::from_str("me/Kinds").unwrap();
        let mut gen = SynLabelGenerator::default();
        let (first, second, start, end, handler) = (
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
        );

        let mut method = static_method(
            "()V",
            Code::new(
                vec![
                    IConst(1),
                    IStore(0),
                    DConst(2.0),
                    DStore(1),
                    Goto(first),
                    Label(first),
                    Label(start),
                    IConst(0),
                    IStore(1),
                    Goto(second),
                    Label(second),
                    Label(end),
                    Return,
                    Label(handler),
                    Pop,
                    Return,
                ],
                vec![ExceptionHandler {
                    start,
                    end,
                    handler,
                    catch_type: None,
                }],
            ),
        );
        compute_metadata(&this_class, &mut method, &java).unwrap();
        let table = method.code.unwrap().stack_map.unwrap();

        assert_eq!(
            table,
            vec![
                StackMapFrame::Append {
                    label: first,
                    locals: vec![VerificationType::Integer, VerificationType::Double],
                },
                StackMapFrame::Full {
                    label: second,
                    locals: vec![VerificationType::Integer, VerificationType::Integer],
                    stack: vec![],
                },
                StackMapFrame::Full {
                    label: handler,
                    locals: vec![VerificationType::Integer],
                    stack: vec![VerificationType::object(BinaryName::THROWABLE)],
                },
            ]
        );
    }
}

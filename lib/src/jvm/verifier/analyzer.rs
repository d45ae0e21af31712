use super::{Frame, MethodContext};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::code::{Code, Instruction, SynLabel};
use crate::jvm::model::Method;
use crate::jvm::{BinaryName, Error, MethodDescriptor, UnqualifiedName};
use std::collections::HashMap;
use std::ops::Range;

/// Forward dataflow analysis computing the frame before every instruction
pub struct Analyzer<'h> {
    hierarchy: &'h dyn ClassHierarchy,
}

/// Result of analyzing a method body
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Frame before each instruction (`None` for unreachable instructions)
    pub frames: Vec<Option<Frame>>,

    /// Indices into the exception table of the handlers covering each instruction
    pub handlers: Vec<Vec<usize>>,

    /// Maximum stack depth in words
    pub max_stack: u16,

    /// Number of local variable slots, including slots only mentioned by instructions
    pub max_locals: u16,
}

impl Analysis {
    /// Frame before an instruction, failing if the instruction is unreachable
    pub fn frame(&self, index: usize) -> Result<&Frame, Error> {
        self.frames
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Inconsistent(format!("no frame computed at {}", index)))
    }

    pub fn is_reachable(&self, index: usize) -> bool {
        matches!(self.frames.get(index), Some(Some(_)))
    }
}

/// Exception handler with its label ranges resolved to instruction indices
struct ResolvedHandler {
    range: Range<usize>,
    entry: usize,
    catch_type: Option<BinaryName>,
}

impl<'h> Analyzer<'h> {
    pub fn new(hierarchy: &'h dyn ClassHierarchy) -> Analyzer<'h> {
        Analyzer { hierarchy }
    }

    /// Analyze the code of a method
    ///
    /// Subroutines must already have been inlined (see [`super::inline_subroutines`]).
    pub fn analyze(&self, this_class: &BinaryName, method: &Method) -> Result<Analysis, Error> {
        let code = method.code.as_ref().ok_or_else(|| {
            Error::Unanalyzable(format!("{} has no code", method.signature()))
        })?;
        self.analyze_code(
            this_class,
            &method.name,
            &method.descriptor,
            method.is_static(),
            code,
        )
    }

    /// Analyze a method body given the parts of the method signature that matter
    pub fn analyze_code(
        &self,
        this_class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
        is_static: bool,
        code: &Code,
    ) -> Result<Analysis, Error> {
        let instructions = &code.instructions;
        if instructions.is_empty() {
            return Err(Error::Unanalyzable(String::from("empty method body")));
        }

        let positions = code.label_positions()?;
        let handlers: Vec<ResolvedHandler> = code
            .handler_ranges()?
            .into_iter()
            .zip(&code.exception_handlers)
            .map(|((range, entry), handler)| ResolvedHandler {
                range,
                entry,
                catch_type: handler.catch_type.clone(),
            })
            .collect();

        let locals_len = instructions
            .iter()
            .map(local_extent)
            .chain([
                code.max_locals as usize,
                descriptor.parameter_length(!is_static),
            ])
            .max()
            .unwrap_or(0);
        let max_locals = u16::try_from(locals_len)
            .map_err(|_| Error::Unanalyzable(format!("{} locals is too many", locals_len)))?;

        let mut frames: Vec<Option<Frame>> = vec![None; instructions.len()];
        frames[0] = Some(Frame::entry(
            this_class,
            name,
            descriptor,
            is_static,
            locals_len,
        ));
        let mut worklist: Vec<usize> = vec![0];
        let mut queued: Vec<bool> = vec![false; instructions.len()];
        queued[0] = true;

        let context = MethodContext {
            this_class,
            return_type: &descriptor.return_type,
        };
        let mut max_stack: usize = 0;

        while let Some(index) = worklist.pop() {
            queued[index] = false;
            let insn = &instructions[index];
            let before = match &frames[index] {
                Some(frame) => frame.clone(),
                None => {
                    return Err(Error::Inconsistent(format!(
                        "instruction {} queued without a frame",
                        index
                    )))
                }
            };

            if let Instruction::Jsr(_) | Instruction::Ret(_) = insn {
                return Err(Error::Unanalyzable(format!(
                    "subroutine instruction {:?} at {} must be inlined first",
                    insn, index
                )));
            }

            let mut after = before.clone();
            after
                .verify_instruction(insn, index, &context)
                .map_err(|kind| {
                    log::error!(
                        "Verification failed at {} ({:?}) with frame {:?}: {:?}",
                        index,
                        insn,
                        before,
                        kind
                    );
                    Error::VerifierError {
                        instruction: format!("{:?}", insn),
                        index,
                        kind,
                    }
                })?;
            max_stack = max_stack.max(before.stack_words()).max(after.stack_words());

            let mut edges: Vec<(usize, Frame)> = vec![];

            // Exceptions can be thrown before or after the instruction's effect on locals
            for handler in handlers.iter().filter(|h| h.range.contains(&index)) {
                let from_before = before.handler_frame(&handler.catch_type);
                let from_after = after.handler_frame(&handler.catch_type);
                let handler_frame = from_before.merge(&from_after, self.hierarchy)?;
                max_stack = max_stack.max(handler_frame.stack_words());
                edges.push((handler.entry, handler_frame));
            }

            for target in insn.jump_targets() {
                let target_index = *positions
                    .get(&target)
                    .ok_or(Error::UnplacedLabel(target))?;
                edges.push((target_index, after.clone()));
            }

            if insn.falls_through() {
                if index + 1 >= instructions.len() {
                    return Err(Error::Unanalyzable(String::from(
                        "execution can fall off the end of the code",
                    )));
                }
                edges.push((index + 1, after));
            }

            for (target_index, incoming) in edges {
                let updated = match &frames[target_index] {
                    None => incoming,
                    Some(existing) => {
                        let merged = existing
                            .merge(&incoming, self.hierarchy)
                            .map_err(|err| incompatible(err, target_index, &positions, existing, &incoming))?;
                        if &merged == existing {
                            continue;
                        }
                        merged
                    }
                };
                frames[target_index] = Some(updated);
                if !queued[target_index] {
                    queued[target_index] = true;
                    worklist.push(target_index);
                }
            }
        }

        let covering = (0..instructions.len())
            .map(|index| {
                handlers
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| h.range.contains(&index))
                    .map(|(handler_idx, _)| handler_idx)
                    .collect()
            })
            .collect();

        let max_stack = u16::try_from(max_stack)
            .map_err(|_| Error::Unanalyzable(format!("stack of {} words is too deep", max_stack)))?;

        log::trace!(
            "Analyzed {}.{}: max_stack = {}, max_locals = {}",
            this_class,
            name,
            max_stack,
            max_locals
        );

        Ok(Analysis {
            frames,
            handlers: covering,
            max_stack,
            max_locals,
        })
    }
}

/// Report a failed merge against the label at the target (if there is one)
fn incompatible(
    err: Error,
    target_index: usize,
    positions: &HashMap<SynLabel, usize>,
    existing: &Frame,
    incoming: &Frame,
) -> Error {
    if let Error::Unanalyzable(_) = err {
        let label = positions
            .iter()
            .find(|(_, idx)| **idx == target_index)
            .map(|(lbl, _)| *lbl);
        if let Some(label) = label {
            return Error::IncompatibleFrames(
                label,
                format!("{:?}", existing),
                format!("{:?}", incoming),
            );
        }
    }
    err
}

/// One past the highest local variable slot the instruction touches
fn local_extent(insn: &Instruction) -> usize {
    use Instruction::*;
    match insn {
        ILoad(idx) | FLoad(idx) | ALoad(idx) | IStore(idx) | FStore(idx) | AStore(idx)
        | IInc(idx, _) | Ret(idx) => *idx as usize + 1,
        LLoad(idx) | DLoad(idx) | LStore(idx) | DStore(idx) => *idx as usize + 2,
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::JavaLibraryHierarchy;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::{ExceptionHandler, LabelGenerator, OrdComparison, SynLabelGenerator};
    use crate::jvm::verifier::VerificationType;
    use crate::jvm::{MethodAccessFlags, Name, ParseDescriptor};

    fn method(descriptor: &str, flags: MethodAccessFlags, code: Code) -> Method {
        Method::new(
            UnqualifiedName::from_str("test").unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            flags,
            Some(code),
        )
    }

    #[test]
    fn loop_merges_to_fixpoint() {
        let java = JavaLibraryHierarchy::new();
        let this_class = BinaryName::from_str("me/Loop").unwrap();
        let mut gen = SynLabelGenerator::default();
        let (top, done) = (gen.fresh_label(), gen.fresh_label());

        // int x = 0; Object o = null; while (x < n) { o = "s"; x++; } return x;
        let code = Code::new(
            vec![
                IConst(0),
                IStore(1),
                AConstNull,
                AStore(2),
                Label(top),
                ILoad(1),
                ILoad(0),
                IfICmp(OrdComparison::GE, done),
                Ldc(crate::jvm::code::Constant::String(String::from("s"))),
                AStore(2),
                IInc(1, 1),
                Goto(top),
                Label(done),
                ILoad(1),
                IReturn,
            ],
            vec![],
        );
        let method = method("(I)I", MethodAccessFlags::STATIC, code);
        let analysis = Analyzer::new(&java).analyze(&this_class, &method).unwrap();

        let at_top = analysis.frames[4].as_ref().unwrap();
        assert_eq!(
            at_top.locals,
            vec![
                VerificationType::Integer,
                VerificationType::Integer,
                VerificationType::object(BinaryName::STRING),
            ],
            "null merged with string"
        );
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(analysis.max_locals, 3);
    }

    #[test]
    fn handler_frames() {
        let java = JavaLibraryHierarchy::new();
        let this_class = BinaryName::from_str("me/Catch").unwrap();
        let mut gen = SynLabelGenerator::default();
        let (start, end, handler) = (gen.fresh_label(), gen.fresh_label(), gen.fresh_label());

        let code = Code::new(
            vec![
                Label(start),
                IConst(1),
                IStore(0),
                FConst(2.0),
                FStore(0),
                Label(end),
                Return,
                Label(handler),
                AStore(1),
                Return,
            ],
            vec![ExceptionHandler {
                start,
                end,
                handler,
                catch_type: Some(BinaryName::RUNTIMEEXCEPTION),
            }],
        );
        let method = method("()V", MethodAccessFlags::STATIC, code);
        let analysis = Analyzer::new(&java).analyze(&this_class, &method).unwrap();

        let at_handler = analysis.frames[7].as_ref().unwrap();
        assert_eq!(
            at_handler.locals,
            vec![VerificationType::Top, VerificationType::Top],
            "local 0 is int or float or unset"
        );
        assert_eq!(
            at_handler.stack.iter().map(|(_, _, t)| t.clone()).collect::<Vec<_>>(),
            vec![VerificationType::object(BinaryName::RUNTIMEEXCEPTION)]
        );
        assert_eq!(analysis.handlers[2], vec![0]);
        assert!(analysis.handlers[6].is_empty());
    }

    #[test]
    fn unreachable_code_has_no_frame() {
        let java = JavaLibraryHierarchy::new();
        let this_class = BinaryName::from_str("me/Dead").unwrap();
        let code = Code::new(vec![Return, IConst(1), Pop, Return], vec![]);
        let method = method("()V", MethodAccessFlags::STATIC, code);
        let analysis = Analyzer::new(&java).analyze(&this_class, &method).unwrap();
        assert!(analysis.is_reachable(0));
        assert!(!analysis.is_reachable(1));
        assert!(matches!(analysis.frame(2), Err(Error::Inconsistent(_))));
    }

    #[test]
    fn rejected_code() {
        let java = JavaLibraryHierarchy::new();
        let this_class = BinaryName::from_str("me/Bad").unwrap();
        let analyzer = Analyzer::new(&java);

        let falls_off = method("()V", MethodAccessFlags::STATIC, Code::new(vec![Nop], vec![]));
        assert!(matches!(
            analyzer.analyze(&this_class, &falls_off),
            Err(Error::Unanalyzable(_))
        ));

        let bad_types = method(
            "()V",
            MethodAccessFlags::STATIC,
            Code::new(vec![IConst(1), FConst(1.0), IAdd, Pop, Return], vec![]),
        );
        assert!(matches!(
            analyzer.analyze(&this_class, &bad_types),
            Err(Error::VerifierError { index: 2, .. })
        ));

        let mut gen = SynLabelGenerator::default();
        let join = gen.fresh_label();
        let mismatch = method(
            "(I)V",
            MethodAccessFlags::STATIC,
            Code::new(
                vec![
                    IConst(1),
                    ILoad(0),
                    crate::jvm::code::Instruction::If(OrdComparison::EQ, join),
                    Pop,
                    Label(join),
                    Return,
                ],
                vec![],
            ),
        );
        assert!(matches!(
            analyzer.analyze(&this_class, &mismatch),
            Err(Error::IncompatibleFrames(lbl, _, _)) if lbl == join
        ));
    }
}

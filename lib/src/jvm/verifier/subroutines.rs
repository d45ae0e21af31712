use crate::jvm::code::{Code, ExceptionHandler, Instruction, SynLabel};
use crate::jvm::Error;
use std::collections::{BTreeSet, HashMap};

/// Replace every `jsr` with an inlined copy of the subroutine it calls
///
/// Each copy keeps the subroutine's leading `astore` (fed by an `aconst_null` in place of the
/// return address) and turns every `ret` into a `goto` to the instruction following the `jsr`.
/// Labels inside a copy are fresh, and exception handlers covering the subroutine body are
/// duplicated for the copy (right after the handler they are copied from). Subroutines nested
/// inside subroutines are inlined recursively. The original subroutine bodies stay where they
/// are, but nothing reaches them anymore.
///
/// Code without any `jsr` is returned unchanged.
pub fn inline_subroutines(code: &Code) -> Result<Code, Error> {
    if !code.contains(|insn| matches!(insn, Instruction::Jsr(_))) {
        return Ok(code.clone());
    }

    let mut inliner = Inliner {
        code,
        positions: code.label_positions()?,
        fresh: code.clone(),
        emitted: vec![],
        copies: vec![],
    };

    for (index, insn) in code.instructions.iter().enumerate() {
        match insn {
            Instruction::Jsr(target) => inliner.inline_call(index, *target, &mut vec![])?,
            _ => inliner.emit(insn.clone(), Some(index), None),
        }
    }

    inliner.finish()
}

/// Instruction in the output, along with where it came from
struct Emitted {
    insn: Instruction,

    /// Index of the original instruction (`None` for glue)
    origin: Option<usize>,

    /// Which subroutine copy the instruction belongs to (`None` outside of copies)
    copy: Option<usize>,
}

struct Inliner<'a> {
    code: &'a Code,
    positions: HashMap<SynLabel, usize>,

    /// Only used as a source of fresh labels
    fresh: Code,

    emitted: Vec<Emitted>,

    /// For each copy, the renaming of labels placed inside the subroutine body
    copies: Vec<HashMap<SynLabel, SynLabel>>,
}

impl<'a> Inliner<'a> {
    fn emit(&mut self, insn: Instruction, origin: Option<usize>, copy: Option<usize>) {
        self.emitted.push(Emitted { insn, origin, copy });
    }

    /// Inline the subroutine at `target` in place of the `jsr` at `call_index`
    fn inline_call(
        &mut self,
        call_index: usize,
        target: SynLabel,
        active: &mut Vec<SynLabel>,
    ) -> Result<(), Error> {
        if active.contains(&target) {
            return Err(Error::Unanalyzable(format!(
                "recursive subroutine at {:?}",
                target
            )));
        }

        let code = self.code;
        let start = *self
            .positions
            .get(&target)
            .ok_or(Error::UnplacedLabel(target))?;
        let return_var = match code.instructions[start..]
            .iter()
            .find(|insn| !insn.is_pseudo())
        {
            Some(Instruction::AStore(var)) => *var,
            _ => {
                return Err(Error::Unanalyzable(format!(
                    "subroutine at {:?} does not start by storing its return address",
                    target
                )))
            }
        };

        let body = self.subroutine_body(start)?;
        let copy_id = self.copies.len();
        let mut renaming = HashMap::new();
        for index in &body {
            if let Instruction::Label(lbl) = &code.instructions[*index] {
                renaming.insert(*lbl, self.fresh.fresh_label());
            }
        }
        self.copies.push(renaming.clone());
        let return_label = self.fresh.fresh_label();
        let rename = |lbl: SynLabel| *renaming.get(&lbl).unwrap_or(&lbl);

        self.emit(Instruction::AConstNull, Some(call_index), Some(copy_id));
        active.push(target);
        for index in body {
            match &code.instructions[index] {
                Instruction::Ret(var) if *var == return_var => {
                    self.emit(Instruction::Goto(return_label), Some(index), Some(copy_id));
                }
                Instruction::Ret(var) => {
                    return Err(Error::Unanalyzable(format!(
                        "subroutine at {:?} returns through variable {} instead of {}",
                        target, var, return_var
                    )))
                }
                Instruction::Jsr(nested) => self.inline_call(index, *nested, active)?,
                insn => self.emit(insn.map_labels(rename), Some(index), Some(copy_id)),
            }
        }
        active.pop();
        self.emit(Instruction::Label(return_label), None, None);
        Ok(())
    }

    /// Indices (in code order) of instructions reachable from the subroutine entry without going
    /// through `ret`
    fn subroutine_body(&self, start: usize) -> Result<BTreeSet<usize>, Error> {
        let instructions = &self.code.instructions;
        let mut body = BTreeSet::new();
        let mut worklist = vec![start];
        while let Some(index) = worklist.pop() {
            if index >= instructions.len() {
                return Err(Error::Unanalyzable(String::from(
                    "subroutine falls off the end of the code",
                )));
            }
            if !body.insert(index) {
                continue;
            }
            let insn = &instructions[index];
            match insn {
                Instruction::Ret(_) => continue,

                // The nested subroutine gets its own copy, only the return point matters here
                Instruction::Jsr(_) => worklist.push(index + 1),

                _ => {
                    for target in insn.jump_targets() {
                        let target_index = *self
                            .positions
                            .get(&target)
                            .ok_or(Error::UnplacedLabel(target))?;
                        worklist.push(target_index);
                    }
                    if insn.falls_through() {
                        worklist.push(index + 1);
                    }
                }
            }
        }
        Ok(body)
    }

    /// Place the extra handler labels and build the final code
    fn finish(mut self) -> Result<Code, Error> {
        let mut extra_handlers: Vec<(usize, ExceptionHandler)> = vec![];
        let mut labels_before: HashMap<usize, Vec<SynLabel>> = HashMap::new();
        let ranges = self.code.handler_ranges()?;

        for (handler_idx, (range, _)) in ranges.iter().enumerate() {
            let handler = &self.code.exception_handlers[handler_idx];
            let covered = |emitted: &Emitted| {
                emitted.copy.is_some() && emitted.origin.map_or(false, |o| range.contains(&o))
            };

            let mut run_start: Option<usize> = None;
            for position in 0..=self.emitted.len() {
                let continues = match (run_start, self.emitted.get(position)) {
                    (Some(start), Some(emitted)) => {
                        covered(emitted) && emitted.copy == self.emitted[start].copy
                    }
                    (None, Some(emitted)) => {
                        if covered(emitted) {
                            run_start = Some(position);
                        }
                        continue;
                    }
                    (_, None) => false,
                };
                if continues {
                    continue;
                }
                if let Some(start) = run_start.take() {
                    let copy = self.emitted[start].copy.unwrap_or(0);
                    let start_label = self.fresh.fresh_label();
                    let end_label = self.fresh.fresh_label();
                    labels_before.entry(start).or_default().push(start_label);
                    labels_before.entry(position).or_default().push(end_label);
                    let target = *self.copies[copy]
                        .get(&handler.handler)
                        .unwrap_or(&handler.handler);
                    extra_handlers.push((
                        handler_idx,
                        ExceptionHandler {
                            start: start_label,
                            end: end_label,
                            handler: target,
                            catch_type: handler.catch_type.clone(),
                        },
                    ));

                    // The instruction ending this run may start the next one
                    if self.emitted.get(position).map_or(false, &covered) {
                        run_start = Some(position);
                    }
                }
            }
        }

        let emitted_len = self.emitted.len();
        let mut instructions = Vec::with_capacity(emitted_len + 2 * extra_handlers.len());
        for (position, emitted) in std::mem::take(&mut self.emitted).into_iter().enumerate() {
            if let Some(labels) = labels_before.remove(&position) {
                instructions.extend(labels.into_iter().map(Instruction::Label));
            }
            instructions.push(emitted.insn);
        }
        if let Some(labels) = labels_before.remove(&emitted_len) {
            instructions.extend(labels.into_iter().map(Instruction::Label));
        }

        let mut exception_handlers = vec![];
        for (handler_idx, handler) in self.code.exception_handlers.iter().enumerate() {
            exception_handlers.push(handler.clone());
            exception_handlers.extend(
                extra_handlers
                    .iter()
                    .filter(|(idx, _)| *idx == handler_idx)
                    .map(|(_, extra)| extra.clone()),
            );
        }

        log::debug!(
            "Inlined subroutines: {} instructions became {}",
            self.code.instructions.len(),
            instructions.len()
        );

        let mut inlined = Code::new(instructions, exception_handlers);
        inlined.max_locals = self.code.max_locals;
        Ok(inlined)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::JavaLibraryHierarchy;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::{LabelGenerator, SynLabelGenerator};
    use crate::jvm::verifier::Analyzer;
    use crate::jvm::{BinaryName, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName};

    /// `try { x = 1; } finally { x += 2; }` the way old compilers wrote it
    fn finally_code() -> (Code, SynLabel) {
        let mut gen = SynLabelGenerator::default();
        let (start, end, handler, sub, exit) = (
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
        );
        let code = Code::new(
            vec![
                IConst(0),
                IStore(0),
                Label(start),
                IConst(1),
                IStore(0),
                Label(end),
                Jsr(sub),
                Goto(exit),
                Label(handler),
                AStore(1),
                Jsr(sub),
                ALoad(1),
                AThrow,
                Label(sub),
                AStore(2),
                IInc(0, 2),
                Ret(2),
                Label(exit),
                Return,
            ],
            vec![ExceptionHandler {
                start,
                end,
                handler,
                catch_type: None,
            }],
        );
        (code, sub)
    }

    #[test]
    fn finally_blocks_are_copied() {
        let (code, _) = finally_code();
        let inlined = inline_subroutines(&code).unwrap();

        assert!(!inlined.contains(|insn| matches!(insn, Jsr(_))));
        let copies = inlined
            .instructions
            .iter()
            .filter(|insn| matches!(insn, IInc(0, 2)))
            .count();
        assert_eq!(copies, 3, "two copies plus the unreachable original");

        // The result must be analyzable
        let java = JavaLibraryHierarchy::new();
        let analysis = Analyzer::new(&java)
            .analyze_code(
                &BinaryName::from_str("me/Finally").unwrap(),
                &UnqualifiedName::from_str("run").unwrap(),
                &MethodDescriptor::parse("()V").unwrap(),
                true,
                &inlined,
            )
            .unwrap();
        let original_ret = inlined
            .instructions
            .iter()
            .position(|insn| matches!(insn, Ret(_)))
            .unwrap();
        assert!(!analysis.is_reachable(original_ret));
    }

    #[test]
    fn handlers_cover_copies() {
        let mut gen = SynLabelGenerator::default();
        let (start, end, handler, sub) = (
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
            gen.fresh_label(),
        );
        let code = Code::new(
            vec![
                Jsr(sub),
                Return,
                Label(handler),
                Pop,
                Return,
                Label(sub),
                AStore(0),
                Label(start),
                IConst(1),
                IConst(0),
                IDiv,
                Pop,
                Label(end),
                Ret(0),
            ],
            vec![ExceptionHandler {
                start,
                end,
                handler,
                catch_type: Some(BinaryName::ARITHMETICEXCEPTION),
            }],
        );
        let inlined = inline_subroutines(&code).unwrap();

        assert_eq!(inlined.exception_handlers.len(), 2);
        assert_eq!(inlined.exception_handlers[0], code.exception_handlers[0]);
        let copied = &inlined.exception_handlers[1];
        assert_eq!(copied.handler, handler);
        assert_eq!(copied.catch_type, Some(BinaryName::ARITHMETICEXCEPTION));

        let ranges = inlined.handler_ranges().unwrap();
        let covered: Vec<&Instruction> = inlined.instructions[ranges[1].0.clone()]
            .iter()
            .filter(|insn| !insn.is_pseudo())
            .collect();
        assert_eq!(covered, vec![&IConst(1), &IConst(0), &IDiv, &Pop]);
    }

    #[test]
    fn rejected_subroutines() {
        let mut gen = SynLabelGenerator::default();
        let sub = gen.fresh_label();

        let recursive = Code::new(
            vec![Jsr(sub), Return, Label(sub), AStore(0), Jsr(sub), Ret(0)],
            vec![],
        );
        assert!(matches!(
            inline_subroutines(&recursive),
            Err(Error::Unanalyzable(msg)) if msg.contains("recursive")
        ));

        let no_store = Code::new(vec![Jsr(sub), Return, Label(sub), Pop, Return], vec![]);
        assert!(matches!(
            inline_subroutines(&no_store),
            Err(Error::Unanalyzable(_))
        ));

        let wrong_ret = Code::new(
            vec![Jsr(sub), Return, Label(sub), AStore(0), Ret(1)],
            vec![],
        );
        assert!(matches!(
            inline_subroutines(&wrong_ret),
            Err(Error::Unanalyzable(msg)) if msg.contains("variable 1")
        ));

        let plain = Code::new(vec![Return], vec![]);
        assert_eq!(inline_subroutines(&plain).unwrap(), plain);
    }
}

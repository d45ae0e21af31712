//! Save and restore code generation
//!
//! An instrumented method looks like this:
//!
//! ```text
//!         C = <continuation parameter>
//!         LS = LockState.create()                       (only if the method has monitors)
//! start:  if (C.getMode() != LOADING) goto original
//!         MS = C.loadNextMethodState()
//!         if (MS.getMethodId() != id || MS.getMethodVersion() != version) goto invalid
//!         LS = MS.getLockState(); monitorenter every monitor in LS (only with monitors)
//!         switch (MS.getContinuationPoint()) { case 0: goto restore0 ... default: goto invalid }
//! invalid:
//!         throw Continuation.invalidContinuationPoint()
//! original:
//!         <original code, with every continuation point expanded into a save sequence>
//! restore0:
//!         <restore locals and operand stack of point 0, then jump back into the original code>
//!         ...
//! end:
//! handler:
//!         if (C.getMode() == LOADING) C.reset()
//!         rethrow
//! ```
//!
//! The handler is the last entry in the exception table, covering `start` to `end`.

use super::{ContinuationPoint, DebugMarkers, FrameAllocator, PointKind, Settings};
use super::{Ticket, VariableKind, VariableTable};
use crate::jvm::code::{
    Code, Constant, ExceptionHandler, Instruction, InvokeType, LabelGenerator, MethodRef,
    OrdComparison, SynLabel, SynLabelGenerator,
};
use crate::jvm::model::Method;
use crate::jvm::verifier::{Analysis, VerificationType};
use crate::jvm::{BaseType, BinaryName, Error, FieldType, Name, RefType};
use crate::runtime::{Mode, RuntimeMembers};
use crate::util::Width;

/// Everything known about a method about to be rewritten
pub struct MethodPlan<'a> {
    pub class_name: &'a BinaryName,

    /// Method being instrumented (its code is not used)
    pub method: &'a Method,

    /// Code to instrument, with subroutines already inlined
    pub code: &'a Code,

    /// Analysis of `code`
    pub analysis: &'a Analysis,

    /// Reachable continuation points of `code`
    pub points: &'a [ContinuationPoint],

    /// Local variable holding the continuation parameter
    pub continuation_slot: u16,

    pub method_id: i32,
    pub method_version: i32,
}

/// Produce the instrumented version of the code
///
/// The result has no stack map and no limits computed (see
/// [`crate::jvm::verifier::compute_metadata`]).
pub fn synthesize(
    settings: &Settings,
    members: &RuntimeMembers,
    plan: &MethodPlan,
) -> Result<Code, Error> {
    let has_monitors = plan
        .code
        .contains(|insn| matches!(insn, Instruction::MonitorEnter | Instruction::MonitorExit));

    let mut variables = VariableTable::new(plan.analysis.max_locals);
    let continuation = variables.acquire(VariableKind::Object)?;
    let method_state = variables.acquire(VariableKind::Object)?;
    let monitors = if has_monitors {
        Some(MonitorVariables {
            lock_state: variables.acquire(VariableKind::Object)?,
            array: variables.acquire(VariableKind::Object)?,
            index: variables.acquire(VariableKind::Int)?,
            monitor: variables.acquire(VariableKind::Object)?,
        })
    } else {
        None
    };

    let synthesizer = Synthesizer {
        settings,
        members,
        plan,
        out: vec![],
        restore_blocks: vec![],
        labels: plan.code.label_generator.clone(),
        variables,
        continuation,
        method_state,
        monitors,
        location: format!("{}.{}", plan.class_name, plan.method.signature()),
    };
    synthesizer.method()
}

/// Scratch variables used to track monitors
struct MonitorVariables {
    /// `LockState` of the current activation
    lock_state: Ticket,

    /// Array of monitors being entered or exited
    array: Ticket,

    /// Position in `array`
    index: Ticket,

    /// Object of a `monitorenter`/`monitorexit`
    monitor: Ticket,
}

/// Value saved into a `Data` object, along with where it is restored to
struct SavedValue {
    kind: VariableKind,
    slot: u16,

    /// Type to cast objects to when restoring
    cast: Option<RefType>,
}

struct Synthesizer<'a> {
    settings: &'a Settings,
    members: &'a RuntimeMembers,
    plan: &'a MethodPlan<'a>,

    /// Instructions of the block being generated
    out: Vec<Instruction>,

    /// Restore blocks generated so far (placed after the original code)
    restore_blocks: Vec<Instruction>,

    labels: SynLabelGenerator,
    variables: VariableTable,
    continuation: Ticket,
    method_state: Ticket,
    monitors: Option<MonitorVariables>,

    /// `class.name descriptor` of the method, for markers
    location: String,
}

impl<'a> Synthesizer<'a> {
    fn method(mut self) -> Result<Code, Error> {
        let plan = self.plan;
        let body_start = self.labels.fresh_label();
        let body_end = self.labels.fresh_label();
        let handler = self.labels.fresh_label();
        let original = self.labels.fresh_label();
        let invalid = self.labels.fresh_label();
        let restore_labels: Vec<SynLabel> =
            plan.points.iter().map(|_| self.labels.fresh_label()).collect();

        // Prologue
        self.marker(String::from("entry"));
        self.out.push(Instruction::ALoad(plan.continuation_slot));
        self.out.push(self.continuation.store());
        if let Some(monitors) = &self.monitors {
            self.out.push(Instruction::Invoke(
                InvokeType::Static,
                self.members.lock_state.create.clone(),
            ));
            self.out.push(monitors.lock_state.store());
        }
        self.out.push(Instruction::Label(body_start));
        self.mode_check(Mode::Loading, original);
        self.marker(String::from("loading"));
        self.load_method_state(invalid);
        self.out.push(self.method_state.load());
        self.out.push(Instruction::Invoke(
            InvokeType::Virtual,
            self.members.method_state.get_continuation_point.clone(),
        ));
        self.out.push(Instruction::TableSwitch {
            low: 0,
            default: invalid,
            targets: restore_labels.clone(),
        });
        self.out.push(Instruction::Label(invalid));
        self.out.push(Instruction::Invoke(
            InvokeType::Static,
            self.members.continuation.invalid_continuation_point.clone(),
        ));
        self.out.push(Instruction::AThrow);
        self.out.push(Instruction::Label(original));

        // Original code
        let mut points = plan.points.iter().peekable();
        for (index, insn) in plan.code.instructions.iter().enumerate() {
            if let Some(point) = points.next_if(|point| point.index == index) {
                self.continuation_point(point, insn, restore_labels[point.id as usize])?;
                continue;
            }
            match insn {
                Instruction::LineNumber(_) if !self.settings.preserve_line_numbers => (),
                Instruction::MonitorEnter | Instruction::MonitorExit if self.monitors.is_some() => {
                    self.monitor_glue(insn)
                }
                _ => self.out.push(insn.clone()),
            }
        }

        // Restore blocks
        let restore_blocks = std::mem::take(&mut self.restore_blocks);
        self.out.extend(restore_blocks);
        self.out.push(Instruction::Label(body_end));

        // Reset the continuation if anything goes wrong while loading
        let rethrow = self.labels.fresh_label();
        self.out.push(Instruction::Label(handler));
        self.mode_check(Mode::Loading, rethrow);
        self.out.push(self.continuation.load());
        self.out.push(Instruction::Invoke(
            InvokeType::Virtual,
            self.members.continuation.reset.clone(),
        ));
        if let FrameAllocator::Custom(class) = &self.settings.frame_allocator {
            self.out.push(Instruction::Invoke(
                InvokeType::Static,
                RuntimeMembers::allocator_rollback(class),
            ));
        }
        self.out.push(Instruction::Label(rethrow));
        self.out.push(Instruction::AThrow);

        let mut exception_handlers = plan.code.exception_handlers.clone();
        exception_handlers.push(ExceptionHandler {
            start: body_start,
            end: body_end,
            handler,
            catch_type: None,
        });

        log::trace!(
            "Generated {} instructions for {} (from {})",
            self.out.len(),
            self.location,
            plan.code.instructions.len()
        );
        Ok(Code::new(self.out, exception_handlers))
    }

    /// Skip to the label unless the continuation is in the given mode
    fn mode_check(&mut self, mode: Mode, otherwise: SynLabel) {
        self.out.push(self.continuation.load());
        self.out.push(Instruction::Invoke(
            InvokeType::Virtual,
            self.members.continuation.get_mode.clone(),
        ));
        self.out.push(Instruction::IConst(mode.as_int()));
        self.out.push(Instruction::IfICmp(OrdComparison::NE, otherwise));
    }

    fn set_mode(&mut self, mode: Mode) {
        self.out.push(self.continuation.load());
        self.out.push(Instruction::IConst(mode.as_int()));
        self.out.push(Instruction::Invoke(
            InvokeType::Virtual,
            self.members.continuation.set_mode.clone(),
        ));
    }

    fn marker(&mut self, what: String) {
        let message = format!("{}: {}", self.location, what);
        match self.settings.debug_markers {
            DebugMarkers::None => (),
            DebugMarkers::ConstantPool => {
                self.out.push(Instruction::Ldc(Constant::String(message)));
                self.out.push(Instruction::Pop);
            }
            DebugMarkers::StdoutPrint => {
                self.out
                    .push(Instruction::GetStatic(self.members.print.out.clone()));
                self.out.push(Instruction::Ldc(Constant::String(message)));
                self.out.push(Instruction::Invoke(
                    InvokeType::Virtual,
                    self.members.print.println.clone(),
                ));
            }
        }
    }

    /// Load the next method state, check it belongs to this code, and re-enter its monitors
    fn load_method_state(&mut self, invalid: SynLabel) {
        self.out.push(self.continuation.load());
        self.out.push(Instruction::Invoke(
            InvokeType::Virtual,
            self.members.continuation.load_next_method_state.clone(),
        ));
        self.out.push(self.method_state.store());

        let checks = [
            (
                self.members.method_state.get_method_id.clone(),
                self.plan.method_id,
            ),
            (
                self.members.method_state.get_method_version.clone(),
                self.plan.method_version,
            ),
        ];
        for (getter, expected) in checks {
            self.out.push(self.method_state.load());
            self.out.push(Instruction::Invoke(InvokeType::Virtual, getter));
            self.out.push(Instruction::IConst(expected));
            self.out.push(Instruction::IfICmp(OrdComparison::NE, invalid));
        }

        if let Some(monitors) = &self.monitors {
            let loop_start = self.labels.fresh_label();
            let loop_end = self.labels.fresh_label();
            self.out.extend([
                self.method_state.load(),
                Instruction::Invoke(
                    InvokeType::Virtual,
                    self.members.method_state.get_lock_state.clone(),
                ),
                monitors.lock_state.store(),
                monitors.lock_state.load(),
                Instruction::Invoke(
                    InvokeType::Virtual,
                    self.members.lock_state.to_array.clone(),
                ),
                monitors.array.store(),
                Instruction::IConst(0),
                monitors.index.store(),
                Instruction::Label(loop_start),
                monitors.index.load(),
                monitors.array.load(),
                Instruction::ArrayLength,
                Instruction::IfICmp(OrdComparison::GE, loop_end),
                monitors.array.load(),
                monitors.index.load(),
                Instruction::AALoad,
                Instruction::MonitorEnter,
                Instruction::IInc(monitors.index.slot(), 1),
                Instruction::Goto(loop_start),
                Instruction::Label(loop_end),
            ]);
        }
    }

    /// Monitor instruction that also records the change in the lock state
    fn monitor_glue(&mut self, insn: &Instruction) {
        let monitors = match &self.monitors {
            Some(monitors) => monitors,
            None => return self.out.push(insn.clone()),
        };
        let record = match insn {
            Instruction::MonitorEnter => self.members.lock_state.enter.clone(),
            _ => self.members.lock_state.exit.clone(),
        };
        self.out.extend([
            Instruction::Dup,
            monitors.monitor.store(),
            insn.clone(),
            monitors.lock_state.load(),
            monitors.monitor.load(),
            Instruction::Invoke(InvokeType::Virtual, record),
        ]);
    }

    /// Expand a continuation point into its save sequence and generate its restore block
    fn continuation_point(
        &mut self,
        point: &ContinuationPoint,
        insn: &Instruction,
        restore_label: SynLabel,
    ) -> Result<(), Error> {
        let stack: Vec<VerificationType> = point
            .frame
            .stack
            .iter()
            .map(|(_, _, typ)| typ.clone())
            .collect();
        let saved_stack_len = match point.kind {
            PointKind::Invoke => stack.len(),
            PointKind::Suspend => stack.len().saturating_sub(1),
        };
        let saved_stack = &stack[..saved_stack_len];

        // Suspend replaces the call, so its receiver is not needed
        if point.kind == PointKind::Suspend {
            self.out.push(Instruction::Pop);
        }

        // Spill the stack (top first) into scratch variables
        let mut stack_tickets: Vec<Option<Ticket>> = vec![];
        for typ in saved_stack.iter().rev() {
            match VariableKind::of(typ) {
                Some(kind) => {
                    let ticket = self.variables.acquire(kind)?;
                    self.out.push(ticket.store());
                    stack_tickets.push(Some(ticket));
                }
                None => {
                    self.out.push(Instruction::Pop);
                    stack_tickets.push(None);
                }
            }
        }
        stack_tickets.reverse();

        let resume = self.labels.fresh_label();
        match point.kind {
            PointKind::Invoke => {
                self.out.push(Instruction::Label(resume));
                self.reload_stack(&stack_tickets);
                self.out.push(insn.clone());

                let after = self.labels.fresh_label();
                self.mode_check(Mode::Saving, after);
                self.marker(format!("saving continuation point {}", point.id));
                self.pop_after_call(insn, saved_stack);
                self.save(point, saved_stack, &stack_tickets)?;
                self.out.push(Instruction::Label(after));
            }
            PointKind::Suspend => {
                self.set_mode(Mode::Saving);
                self.marker(format!("saving continuation point {}", point.id));
                self.save(point, saved_stack, &stack_tickets)?;
                self.out.push(Instruction::Label(resume));
            }
        }

        // Restore block, generated on the side
        let main = std::mem::take(&mut self.out);
        self.restore(point, saved_stack, &stack_tickets, restore_label, resume)?;
        let block = std::mem::replace(&mut self.out, main);
        self.restore_blocks.extend(block);

        for ticket in stack_tickets.into_iter().flatten() {
            self.variables.release(ticket);
        }
        Ok(())
    }

    /// Push spilled stack values back onto the stack (bottom first)
    fn reload_stack(&mut self, stack_tickets: &[Option<Ticket>]) {
        for ticket in stack_tickets {
            match ticket {
                Some(ticket) => self.out.push(ticket.load()),
                None => self.out.push(Instruction::AConstNull),
            }
        }
    }

    /// Clear the operand stack after a call returned in saving mode
    fn pop_after_call(&mut self, insn: &Instruction, saved_stack: &[VerificationType]) {
        let (invoke_type, callee) = match insn {
            Instruction::Invoke(invoke_type, callee) => (invoke_type, callee),
            _ => return,
        };
        match callee.descriptor.return_type.as_ref().map(Width::width) {
            None => (),
            Some(1) => self.out.push(Instruction::Pop),
            Some(_) => self.out.push(Instruction::Pop2),
        }

        let consumed =
            callee.descriptor.parameters.len() + usize::from(*invoke_type != InvokeType::Static);
        let remaining = saved_stack.len().saturating_sub(consumed);
        for typ in saved_stack[..remaining].iter().rev() {
            if typ.width() == 2 {
                self.out.push(Instruction::Pop2);
            } else {
                self.out.push(Instruction::Pop);
            }
        }
    }

    /// Locals of the frame that get saved
    fn saved_locals(point: &ContinuationPoint) -> Vec<SavedValue> {
        let mut values = vec![];
        let mut slot = 0;
        while slot < point.frame.locals.len() {
            let typ = &point.frame.locals[slot];
            if let Some(kind) = VariableKind::of(typ) {
                values.push(SavedValue {
                    kind,
                    slot: slot as u16,
                    cast: cast_type(typ),
                });
            }
            slot += typ.width();
        }
        values
    }

    /// Spilled stack values that get saved
    fn saved_stack(saved_stack: &[VerificationType], tickets: &[Option<Ticket>]) -> Vec<SavedValue> {
        saved_stack
            .iter()
            .zip(tickets)
            .filter_map(|(typ, ticket)| {
                ticket.as_ref().map(|ticket| SavedValue {
                    kind: ticket.kind(),
                    slot: ticket.slot(),
                    cast: cast_type(typ),
                })
            })
            .collect()
    }

    /// Build the method state, push it onto the continuation, release monitors and return
    fn save(
        &mut self,
        point: &ContinuationPoint,
        saved_stack: &[VerificationType],
        stack_tickets: &[Option<Ticket>],
    ) -> Result<(), Error> {
        let locals = Self::saved_locals(point);
        let stack = Self::saved_stack(saved_stack, stack_tickets);

        self.out.push(self.continuation.load());
        self.out.push(Instruction::Ldc(Constant::String(
            self.plan.class_name.as_str().to_owned(),
        )));
        self.out.push(Instruction::IConst(self.plan.method_id));
        self.out.push(Instruction::IConst(self.plan.method_version));
        self.out.push(Instruction::IConst(point.id as i32));
        match &self.monitors {
            Some(monitors) => self.out.push(monitors.lock_state.load()),
            None => self.out.push(Instruction::AConstNull),
        }
        self.build_data(&locals);
        self.build_data(&stack);
        self.out.push(Instruction::Invoke(
            InvokeType::Static,
            self.members.method_state.create.clone(),
        ));
        self.out.push(Instruction::Invoke(
            InvokeType::Virtual,
            self.members.continuation.push_new_method_state.clone(),
        ));
        if let FrameAllocator::Custom(class) = &self.settings.frame_allocator {
            self.out.push(Instruction::Invoke(
                InvokeType::Static,
                RuntimeMembers::allocator_commit(class),
            ));
        }

        // Exit monitors, most recent first
        if let Some(monitors) = &self.monitors {
            let loop_start = self.labels.fresh_label();
            let loop_end = self.labels.fresh_label();
            self.out.extend([
                monitors.lock_state.load(),
                Instruction::Invoke(
                    InvokeType::Virtual,
                    self.members.lock_state.to_array.clone(),
                ),
                monitors.array.store(),
                monitors.array.load(),
                Instruction::ArrayLength,
                monitors.index.store(),
                Instruction::Label(loop_start),
                monitors.index.load(),
                Instruction::If(OrdComparison::LE, loop_end),
                Instruction::IInc(monitors.index.slot(), -1),
                monitors.array.load(),
                monitors.index.load(),
                Instruction::AALoad,
                Instruction::MonitorExit,
                Instruction::Goto(loop_start),
                Instruction::Label(loop_end),
            ]);
        }

        self.dummy_return();
        Ok(())
    }

    /// Push a `Data` object holding the values
    fn build_data(&mut self, values: &[SavedValue]) {
        for kind in VariableKind::ALL {
            let of_kind: Vec<&SavedValue> = values.iter().filter(|v| v.kind == kind).collect();
            if of_kind.is_empty() {
                self.out.push(Instruction::AConstNull);
                continue;
            }
            self.out.push(Instruction::IConst(of_kind.len() as i32));
            self.allocate_array(kind);
            for (idx, value) in of_kind.iter().enumerate() {
                self.out.push(Instruction::Dup);
                self.out.push(Instruction::IConst(idx as i32));
                self.out.push(kind.load(value.slot));
                self.out.push(kind.array_store());
            }
        }
        self.out.push(Instruction::Invoke(
            InvokeType::Static,
            self.members.data.create.clone(),
        ));
    }

    /// Allocate an array for saved values (the length is on the stack)
    fn allocate_array(&mut self, kind: VariableKind) {
        let insn = match &self.settings.frame_allocator {
            FrameAllocator::Custom(class) => Instruction::Invoke(
                InvokeType::Static,
                RuntimeMembers::allocator(class, &kind.element_type()),
            ),
            FrameAllocator::Default => match kind {
                VariableKind::Int => Instruction::NewArray(BaseType::Int),
                VariableKind::Long => Instruction::NewArray(BaseType::Long),
                VariableKind::Float => Instruction::NewArray(BaseType::Float),
                VariableKind::Double => Instruction::NewArray(BaseType::Double),
                VariableKind::Object => Instruction::ANewArray(RefType::OBJECT),
            },
        };
        self.out.push(insn);
    }

    /// Return a placeholder value (the caller is saving too, so it will ignore it)
    fn dummy_return(&mut self) {
        let return_type = &self.plan.method.descriptor.return_type;
        let (value, ret) = match return_type {
            None => (None, Instruction::Return),
            Some(FieldType::Base(BaseType::Long)) => {
                (Some(Instruction::LConst(0)), Instruction::LReturn)
            }
            Some(FieldType::Base(BaseType::Float)) => {
                (Some(Instruction::FConst(0.0)), Instruction::FReturn)
            }
            Some(FieldType::Base(BaseType::Double)) => {
                (Some(Instruction::DConst(0.0)), Instruction::DReturn)
            }
            Some(FieldType::Base(_)) => (Some(Instruction::IConst(0)), Instruction::IReturn),
            Some(FieldType::Ref(_)) => (Some(Instruction::AConstNull), Instruction::AReturn),
        };
        self.out.extend(value);
        self.out.push(ret);
    }

    /// Restore block of a continuation point
    fn restore(
        &mut self,
        point: &ContinuationPoint,
        saved_stack: &[VerificationType],
        stack_tickets: &[Option<Ticket>],
        restore_label: SynLabel,
        resume: SynLabel,
    ) -> Result<(), Error> {
        self.out.push(Instruction::Label(restore_label));
        self.marker(format!("restoring continuation point {}", point.id));

        let locals = Self::saved_locals(point);
        let getter = self.members.method_state.get_locals.clone();
        self.restore_data(getter, &locals)?;

        // `null` is never saved
        let mut slot = 0;
        while slot < point.frame.locals.len() {
            if point.frame.locals[slot] == VerificationType::Null {
                self.out.push(Instruction::AConstNull);
                self.out.push(Instruction::AStore(slot as u16));
            }
            slot += point.frame.locals[slot].width();
        }

        let stack = Self::saved_stack(saved_stack, stack_tickets);
        let getter = self.members.method_state.get_stack.clone();
        self.restore_data(getter, &stack)?;

        if point.kind == PointKind::Suspend {
            self.set_mode(Mode::Normal);
            self.reload_stack(stack_tickets);
        }
        self.out.push(Instruction::Goto(resume));
        Ok(())
    }

    /// Copy values out of a `Data` object of the method state into local variables
    fn restore_data(
        &mut self,
        data_getter: MethodRef,
        values: &[SavedValue],
    ) -> Result<(), Error> {
        for kind in VariableKind::ALL {
            let of_kind: Vec<&SavedValue> = values.iter().filter(|v| v.kind == kind).collect();
            if of_kind.is_empty() {
                continue;
            }
            let array = self.variables.acquire(VariableKind::Object)?;
            let array_getter = self.array_getter(kind);
            self.out.push(self.method_state.load());
            self.out
                .push(Instruction::Invoke(InvokeType::Virtual, data_getter.clone()));
            self.out
                .push(Instruction::Invoke(InvokeType::Virtual, array_getter));
            self.out.push(array.store());

            for (idx, value) in of_kind.iter().enumerate() {
                self.out.push(array.load());
                self.out.push(Instruction::IConst(idx as i32));
                self.out.push(kind.array_load());
                if let Some(cast) = &value.cast {
                    self.out.push(Instruction::CheckCast(cast.clone()));
                }
                self.out.push(kind.store(value.slot));
            }
            self.variables.release(array);
        }
        Ok(())
    }

    fn array_getter(&self, kind: VariableKind) -> MethodRef {
        let data = &self.members.data;
        match kind {
            VariableKind::Int => data.get_ints.clone(),
            VariableKind::Long => data.get_longs.clone(),
            VariableKind::Float => data.get_floats.clone(),
            VariableKind::Double => data.get_doubles.clone(),
            VariableKind::Object => data.get_objects.clone(),
        }
    }
}

/// Cast needed to turn an element of an `Object[]` back into a value of this type
fn cast_type(typ: &VerificationType) -> Option<RefType> {
    match typ {
        VerificationType::Object(ref_type) if ref_type != &RefType::OBJECT => {
            Some(ref_type.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instrument::locate;
    use crate::jvm::class_graph::JavaLibraryHierarchy;
    use crate::jvm::verifier::{compute_metadata, Analyzer};
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, ParseDescriptor, UnqualifiedName};

    fn suspend_method(descriptor: &str, instructions: Vec<Instruction>) -> Method {
        Method::new(
            UnqualifiedName::RUN,
            MethodDescriptor::parse(descriptor).unwrap(),
            MethodAccessFlags::STATIC,
            Some(Code::new(instructions, vec![])),
        )
    }

    fn instrument(settings: &Settings, method: &Method) -> (Method, usize) {
        let java = JavaLibraryHierarchy::new();
        let class_name = BinaryName::from_str("me/Gen").unwrap();
        let code = method.code.as_ref().unwrap();
        let analysis = Analyzer::new(&java).analyze(&class_name, method).unwrap();
        let points = locate(code, &analysis, settings.suspend_policy.as_ref());
        let members = RuntimeMembers::new();
        let plan = MethodPlan {
            class_name: &class_name,
            method,
            code,
            analysis: &analysis,
            points: &points,
            continuation_slot: 0,
            method_id: 1,
            method_version: 2,
        };
        let mut output = method.clone();
        output.code = Some(synthesize(settings, &members, &plan).unwrap());
        compute_metadata(&class_name, &mut output, &java).unwrap();
        (output, points.len())
    }

    #[test]
    fn suspend_point_layout() {
        use Instruction::*;
        let suspend = MethodRef::new(
            BinaryName::CONTINUATION,
            UnqualifiedName::SUSPEND,
            MethodDescriptor::parse("()V").unwrap(),
        );
        let method = suspend_method(
            "(Lcoroutines/user/Continuation;J)J",
            vec![
                LLoad(1),
                ALoad(0),
                Instruction::Invoke(InvokeType::Virtual, suspend),
                LReturn,
            ],
        );

        let (output, point_count) = instrument(&Settings::new(), &method);
        assert_eq!(point_count, 1);
        let code = output.code.unwrap();

        assert_eq!(
            code.exception_handlers.len(),
            1,
            "only the catch-all reset handler"
        );
        assert!(
            code.instructions
                .iter()
                .any(|insn| matches!(insn, TableSwitch { targets, .. } if targets.len() == 1)),
            "dispatch on continuation point"
        );
        assert!(
            !code.instructions.iter().any(|insn| insn.is_call_to(
                &BinaryName::CONTINUATION,
                &UnqualifiedName::SUSPEND
            )),
            "suspend call is replaced"
        );
        assert!(
            code.instructions.contains(&LStore(5)),
            "long on the stack is spilled after the continuation and method state"
        );
        assert!(code.stack_map.is_some());
        assert!(code.max_locals >= 7);
    }

    #[test]
    fn markers_and_allocator() {
        use Instruction::*;
        let echo = MethodRef::new(
            BinaryName::from_str("me/Gen").unwrap(),
            UnqualifiedName::from_str("echo").unwrap(),
            MethodDescriptor::parse("(Lcoroutines/user/Continuation;)I").unwrap(),
        );
        let method = suspend_method(
            "(Lcoroutines/user/Continuation;)I",
            vec![
                IConst(5),
                IStore(1),
                ALoad(0),
                Invoke(InvokeType::Static, echo),
                IReturn,
            ],
        );

        let mut settings = Settings::new();
        settings.debug_markers = DebugMarkers::StdoutPrint;
        settings.frame_allocator = FrameAllocator::Custom(BinaryName::from_str("me/Alloc").unwrap());
        let (output, _) = instrument(&settings, &method);
        let code = output.code.unwrap();

        let printed: Vec<&String> = code
            .instructions
            .iter()
            .filter_map(|insn| match insn {
                Ldc(Constant::String(message)) if message.starts_with("me/Gen.") => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(printed.len(), 4, "entry, loading, save and restore: {:?}", printed);
        assert!(code.instructions.iter().any(|insn| insn.is_call_to(
            &BinaryName::from_str("me/Alloc").unwrap(),
            &UnqualifiedName::ALLOCATEINTARRAY
        )));
        assert!(
            !code.instructions.iter().any(|insn| matches!(insn, NewArray(_))),
            "custom allocator replaces newarray"
        );

        let alloc = BinaryName::from_str("me/Alloc").unwrap();
        let position = |name: &UnqualifiedName| {
            code.instructions
                .iter()
                .position(|insn| insn.is_call_to(&alloc, name))
        };
        let push = code
            .instructions
            .iter()
            .position(|insn| {
                matches!(insn, Invoke(_, method) if method.name.as_str() == "pushNewMethodState")
            })
            .unwrap();
        let reset = code
            .instructions
            .iter()
            .position(|insn| matches!(insn, Invoke(_, method) if method.name.as_str() == "reset"))
            .unwrap();
        assert_eq!(position(&UnqualifiedName::COMMIT), Some(push + 1), "commit follows the push");
        assert_eq!(position(&UnqualifiedName::ROLLBACK), Some(reset + 1), "rollback follows the reset");
    }
}

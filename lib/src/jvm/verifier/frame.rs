use super::{UninitializedRefType, VerificationType};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::code::{Constant, Instruction, InvokeType};
use crate::jvm::{
    BinaryName, Error, FieldType, MethodDescriptor, RefType, RenderDescriptor, UnqualifiedName,
    VerifierErrorKind,
};
use crate::util::{OffsetVec, Width};

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Locals are one entry per slot: a `long` or `double` in slot `n` is followed by `Top` in slot
/// `n + 1`. The stack is an [`OffsetVec`], so its offset length is the stack depth in words.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame {
    /// Local variables in scope
    pub locals: Vec<VerificationType>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType>,
}

/// What the transfer function needs to know about the method being analyzed
pub struct MethodContext<'a> {
    pub this_class: &'a BinaryName,
    pub return_type: &'a Option<FieldType>,
}

impl Frame {
    /// Frame on entry to a method
    pub fn entry(
        this_class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
        is_static: bool,
        locals_len: usize,
    ) -> Frame {
        let mut locals = vec![];
        if !is_static {
            if name == &UnqualifiedName::INIT && this_class != &BinaryName::OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::object(this_class.clone()));
            }
        }
        for parameter in &descriptor.parameters {
            let typ = VerificationType::from(parameter);
            let wide = typ.width() == 2;
            locals.push(typ);
            if wide {
                locals.push(VerificationType::Top);
            }
        }
        if locals.len() < locals_len {
            locals.resize(locals_len, VerificationType::Top);
        }
        Frame {
            locals,
            stack: OffsetVec::new(),
        }
    }

    /// Frame at the start of an exception handler covering an instruction with this frame
    pub fn handler_frame(&self, catch_type: &Option<BinaryName>) -> Frame {
        let catch_type = catch_type.clone().unwrap_or(BinaryName::THROWABLE);
        let mut stack = OffsetVec::new();
        stack.push(VerificationType::object(catch_type));
        Frame {
            locals: self.locals.clone(),
            stack,
        }
    }

    /// Merge the frames from two control flow edges
    ///
    /// Locals merge slot by slot (mismatches become `Top`), but the stacks must agree in depth
    /// and no stack slot may become unusable.
    pub fn merge<H: ClassHierarchy + ?Sized>(
        &self,
        other: &Frame,
        hierarchy: &H,
    ) -> Result<Frame, Error> {
        if self.stack.len() != other.stack.len() {
            return Err(Error::Unanalyzable(format!(
                "stack depth mismatch: {:?} vs {:?}",
                self.stack, other.stack
            )));
        }

        let mut stack = OffsetVec::new();
        for ((_, _, t1), (_, _, t2)) in self.stack.iter().zip(other.stack.iter()) {
            let merged = t1.merge(t2, hierarchy)?;
            if merged == VerificationType::Top {
                return Err(Error::Unanalyzable(format!(
                    "incompatible stack types: {:?} vs {:?}",
                    t1, t2
                )));
            }
            stack.push(merged);
        }

        let locals_len = self.locals.len().max(other.locals.len());
        let mut locals = Vec::with_capacity(locals_len);
        for idx in 0..locals_len {
            let t1 = self.locals.get(idx).unwrap_or(&VerificationType::Top);
            let t2 = other.locals.get(idx).unwrap_or(&VerificationType::Top);
            locals.push(t1.merge(t2, hierarchy)?);
        }

        // Half of a wide value is as good as nothing
        for idx in 0..locals_len {
            let wide = locals[idx].width() == 2;
            if wide && locals.get(idx + 1) != Some(&VerificationType::Top) {
                locals[idx] = VerificationType::Top;
            }
        }

        Ok(Frame { locals, stack })
    }

    /// Update the frame to reflect the effects of the given instruction
    ///
    /// `insn_index` is the index of the instruction in the method's instruction list (used to
    /// identify uninitialized objects).
    pub fn verify_instruction(
        &mut self,
        insn: &Instruction,
        insn_index: usize,
        method: &MethodContext,
    ) -> Result<(), VerifierErrorKind> {
        verify_instruction(self, insn, insn_index, method)
    }

    /// Size of the stack in words
    pub fn stack_words(&self) -> usize {
        self.stack.offset_len().0
    }

    /// Does any stack or local slot hold an object that has not been initialized?
    pub fn has_uninitialized(&self) -> bool {
        self.stack.iter().any(|(_, _, t)| t.is_uninitialized())
            || self.locals.iter().any(VerificationType::is_uninitialized)
    }
}

fn verify_instruction(
    frame: &mut Frame,
    insn: &Instruction,
    insn_index: usize,
    method: &MethodContext,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let Frame { stack, locals } = frame;

    match insn {
        Label(_) | LineNumber(_) | Nop => (),
        AConstNull => {
            stack.push(Null);
        }
        IConst(_) => {
            stack.push(Integer);
        }
        LConst(_) => {
            stack.push(Long);
        }
        FConst(_) => {
            stack.push(Float);
        }
        DConst(_) => {
            stack.push(Double);
        }
        Ldc(constant) => {
            stack.push(match constant {
                Constant::String(_) => VerificationType::object(BinaryName::STRING),
                Constant::Class(_) => VerificationType::object(BinaryName::CLASS),
                Constant::MethodType(_) => VerificationType::object(BinaryName::METHODTYPE),
            });
        }

        ILoad(offset) => {
            get_local_expecting_type(locals, *offset, Integer)?;
            stack.push(Integer);
        }
        LLoad(offset) => {
            get_local_expecting_type(locals, *offset, Long)?;
            stack.push(Long);
        }
        FLoad(offset) => {
            get_local_expecting_type(locals, *offset, Float)?;
            stack.push(Float);
        }
        DLoad(offset) => {
            get_local_expecting_type(locals, *offset, Double)?;
            stack.push(Double);
        }
        ALoad(offset) => {
            let typ = get_local(locals, *offset)?;
            if !typ.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
            stack.push(typ);
        }

        IALoad | BALoad | CALoad | SALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
            stack.push(Integer);
        }
        LALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
            stack.push(Long);
        }
        FALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
            stack.push(Float);
        }
        DALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
            stack.push(Double);
        }
        AALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            let element_type = match pop_array(stack)? {
                Some(array_type) => match array_type.element_type() {
                    Some(FieldType::Ref(ref_type)) => Object(ref_type),
                    _ => return Err(VerifierErrorKind::NotArrayType),
                },
                None => Null,
            };
            stack.push(element_type);
        }

        IStore(offset) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            update_local_type(locals, *offset, Integer)?;
        }
        FStore(offset) => {
            pop_offset_vec_expecting_type(stack, Float)?;
            update_local_type(locals, *offset, Float)?;
        }
        LStore(offset) => {
            pop_offset_vec_expecting_type(stack, Long)?;
            update_local_type(locals, *offset, Long)?;
        }
        DStore(offset) => {
            pop_offset_vec_expecting_type(stack, Double)?;
            update_local_type(locals, *offset, Double)?;
        }
        AStore(offset) => {
            let popped_type = pop_offset_vec(stack)?;
            if !popped_type.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
            update_local_type(locals, *offset, popped_type)?;
        }

        IAStore | BAStore | CAStore | SAStore => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
        }
        LAStore => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
        }
        FAStore => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
        }
        DAStore => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
        }
        AAStore => {
            let elem_type = pop_offset_vec(stack)?;
            if !elem_type.fits(&VerificationType::OBJECT) {
                return Err(VerifierErrorKind::InvalidType);
            }
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_array(stack)?;
        }

        Pop => {
            let _ = pop_offset_vec_expecting_width(stack, 1)?;
        }

        Pop2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let _ = pop_offset_vec_expecting_width(stack, 1)?;
                }

                // Form 2
                2 => (),

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg1);
        }

        DupX1 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg2);
            stack.push(arg1);
        }

        DupX2 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec(stack)?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2X1 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2X2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    let arg3 = pop_offset_vec(stack)?;
                    match arg3.width() {
                        // Form 1
                        1 => {
                            let arg4 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg4);
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 3
                        2 => {
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                2 => {
                    let arg2 = pop_offset_vec(stack)?;
                    match arg2.width() {
                        // Form 2
                        1 => {
                            let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 4
                        2 => {
                            stack.push(arg1.clone());
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Swap => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1);
            stack.push(arg2);
        }

        IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }

        LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        FAdd | FSub | FDiv | FMul | FRem => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Float);
        }

        DAdd | DSub | DDiv | DMul | DRem => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Double);
        }

        INeg | I2B | I2C | I2S => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }

        LNeg => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        FNeg => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Float);
        }

        DNeg => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Double);
        }

        LSh(_) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        IInc(offset, _) => {
            get_local_expecting_type(locals, *offset, Integer)?;
        }

        I2L => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Long);
        }
        I2F => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Float);
        }
        I2D => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Double);
        }

        L2I => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Integer);
        }
        L2F => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Float);
        }
        L2D => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Double);
        }

        F2I => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Integer);
        }
        F2L => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Long);
        }
        F2D => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Double);
        }

        D2I => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Integer);
        }
        D2L => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Long);
        }
        D2F => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Float);
        }

        LCmp => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Integer);
        }
        FCmp(_) => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Integer);
        }
        DCmp(_) => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Integer);
        }

        GetStatic(field) => {
            stack.push(VerificationType::from(&field.descriptor));
        }
        PutStatic(field) => {
            pop_offset_vec_fitting(stack, &VerificationType::from(&field.descriptor))?;
        }
        GetField(field) => {
            pop_reference(stack)?;
            stack.push(VerificationType::from(&field.descriptor));
        }
        PutField(field) => {
            pop_offset_vec_fitting(stack, &VerificationType::from(&field.descriptor))?;

            // Fields of `this` can be set before the super constructor is called
            let receiver = pop_offset_vec(stack)?;
            if !receiver.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
        }

        Invoke(invoke_type, method_ref) => {
            let is_init = method_ref.name == UnqualifiedName::INIT;
            let desc = &method_ref.descriptor;

            // Check that all the arguments match
            for expected_arg_type in desc.parameters.iter().rev() {
                let expected = VerificationType::from(expected_arg_type);
                let found_arg_type = pop_offset_vec(stack)?;
                if !found_arg_type.fits(&expected) {
                    log::error!(
                        "Incompatible argument types: found {:?} but expected {:?} (for {})",
                        found_arg_type,
                        expected_arg_type,
                        desc.render(),
                    );
                    return Err(VerifierErrorKind::InvalidType);
                }
            }

            if let (InvokeType::Special, true) = (invoke_type, is_init) {
                // Initialize
                match pop_offset_vec(stack)? {
                    UninitializedThis => {
                        let this_type = VerificationType::object(method.this_class.clone());
                        replace_all(stack, locals, &UninitializedThis, &this_type);
                    }

                    uninitialized @ Uninitialized(_) => {
                        let initialized = match &uninitialized {
                            Uninitialized(UninitializedRefType { class, .. }) => {
                                VerificationType::object(class.clone())
                            }
                            _ => unreachable!(),
                        };
                        replace_all(stack, locals, &uninitialized, &initialized);
                    }

                    _ => return Err(VerifierErrorKind::InvalidType),
                }

                if desc.return_type.is_some() {
                    return Err(VerifierErrorKind::InvalidType);
                }
            } else {
                // Pop off the receiver type
                if *invoke_type != InvokeType::Static {
                    let found_receiver = pop_offset_vec(stack)?;
                    if !found_receiver.fits(&VerificationType::OBJECT) {
                        log::error!(
                            "Incompatible receiver: found {:?} for {}",
                            found_receiver,
                            method_ref.pretty(),
                        );
                        return Err(VerifierErrorKind::InvalidType);
                    }
                }

                // Push the return type
                if let Some(return_type) = &desc.return_type {
                    stack.push(VerificationType::from(return_type));
                }
            }
        }

        InvokeDynamic(invoke_dynamic) => {
            for expected_arg_type in invoke_dynamic.descriptor.parameters.iter().rev() {
                pop_offset_vec_fitting(stack, &VerificationType::from(expected_arg_type))?;
            }
            if let Some(return_type) = &invoke_dynamic.descriptor.return_type {
                stack.push(VerificationType::from(return_type));
            }
        }

        New(class) => {
            stack.push(Uninitialized(UninitializedRefType {
                class: class.clone(),
                new_index: insn_index,
            }));
        }
        NewArray(base_type) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        ANewArray(ref_type) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Ref(ref_type.clone()))));
        }
        MultiANewArray(ref_type, dimensions) => {
            if *dimensions == 0 || !ref_type.is_array() {
                return Err(VerifierErrorKind::NotArrayType);
            }
            for _ in 0..*dimensions {
                pop_offset_vec_expecting_type(stack, Integer)?;
            }
            stack.push(Object(ref_type.clone()));
        }
        ArrayLength => {
            pop_array(stack)?;
            stack.push(Integer);
        }

        CheckCast(ref_type) => {
            pop_reference(stack)?;
            stack.push(Object(ref_type.clone()));
        }
        InstanceOf(_) => {
            pop_reference(stack)?;
            stack.push(Integer);
        }

        MonitorEnter | MonitorExit => {
            pop_reference(stack)?;
        }

        If(_, _) => pop_offset_vec_expecting_type(stack, Integer)?,
        IfICmp(_, _) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
        }
        IfACmp(_, _) => {
            let atype_1 = pop_offset_vec(stack)?;
            let atype_2 = pop_offset_vec(stack)?;
            if !atype_1.is_reference() || !atype_2.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
        }
        IfNull(_, _) => {
            let atype = pop_offset_vec(stack)?;
            if !atype.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
        }
        Goto(_) => (),
        TableSwitch { .. } | LookupSwitch { .. } => {
            pop_offset_vec_expecting_type(stack, Integer)?
        }

        // Subroutines must have been inlined before analysis
        Jsr(_) | Ret(_) => return Err(VerifierErrorKind::InvalidType),

        IReturn => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            expect_return(method, Some(Integer))?;
        }
        LReturn => {
            pop_offset_vec_expecting_type(stack, Long)?;
            expect_return(method, Some(Long))?;
        }
        FReturn => {
            pop_offset_vec_expecting_type(stack, Float)?;
            expect_return(method, Some(Float))?;
        }
        DReturn => {
            pop_offset_vec_expecting_type(stack, Double)?;
            expect_return(method, Some(Double))?;
        }
        AReturn => {
            let atype = pop_offset_vec(stack)?;
            let is_compatible_return = match method.return_type {
                Some(ret_type @ FieldType::Ref(_)) => atype.fits(&VerificationType::from(ret_type)),
                _ => false,
            };
            if !is_compatible_return {
                return Err(VerifierErrorKind::InvalidType);
            }
        }
        Return => expect_return(method, None)?,
        AThrow => {
            let atype = pop_reference(stack)?;
            stack.clear();
            stack.push(atype);
        }
    }

    Ok(())
}

fn expect_return(
    method: &MethodContext,
    expected: Option<VerificationType>,
) -> Result<(), VerifierErrorKind> {
    let declared = method.return_type.as_ref().map(VerificationType::from);
    if declared == expected {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

fn replace_all(
    stack: &mut OffsetVec<VerificationType>,
    locals: &mut [VerificationType],
    original: &VerificationType,
    updated: &VerificationType,
) {
    let mut replaced: OffsetVec<VerificationType> = std::mem::take(stack)
        .into_iter()
        .map(|(_, _, ty)| if ty == *original { updated.clone() } else { ty })
        .collect();
    std::mem::swap(stack, &mut replaced);

    for local in locals.iter_mut() {
        if local == original {
            *local = updated.clone();
        }
    }
}

fn get_local(locals: &[VerificationType], offset: u16) -> Result<VerificationType, VerifierErrorKind> {
    locals
        .get(offset as usize)
        .cloned()
        .ok_or(VerifierErrorKind::InvalidIndex)
}

fn get_local_expecting_type(
    locals: &[VerificationType],
    offset: u16,
    expected_type: VerificationType,
) -> Result<(), VerifierErrorKind> {
    if get_local(locals, offset)? == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

/// Store into a local, invalidating any wide value it overlaps
fn update_local_type(
    locals: &mut Vec<VerificationType>,
    offset: u16,
    new_type: VerificationType,
) -> Result<(), VerifierErrorKind> {
    let offset = offset as usize;
    let width = new_type.width();
    if offset + width > locals.len() {
        return Err(VerifierErrorKind::InvalidIndex);
    }
    if offset > 0 && locals[offset - 1].width() == 2 {
        locals[offset - 1] = VerificationType::Top;
    }
    if width == 2 {
        locals[offset + 1] = VerificationType::Top;
    }
    locals[offset] = new_type;
    Ok(())
}

fn pop_offset_vec(stack: &mut OffsetVec<VerificationType>) -> Result<VerificationType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_reference(
    stack: &mut OffsetVec<VerificationType>,
) -> Result<VerificationType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ.is_reference() {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

/// Pop an array reference, returning its type (or `None` for `null`)
fn pop_array(stack: &mut OffsetVec<VerificationType>) -> Result<Option<RefType>, VerifierErrorKind> {
    match pop_offset_vec(stack)? {
        VerificationType::Null => Ok(None),
        VerificationType::Object(ref_type) if ref_type.is_array() => Ok(Some(ref_type)),
        VerificationType::Object(_) => Err(VerifierErrorKind::NotArrayType),
        _ => Err(VerifierErrorKind::InvalidType),
    }
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VerificationType>,
    expected_width: usize,
) -> Result<VerificationType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_offset_vec_expecting_type(
    stack: &mut OffsetVec<VerificationType>,
    expected_type: VerificationType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

fn pop_offset_vec_fitting(
    stack: &mut OffsetVec<VerificationType>,
    expected_type: &VerificationType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ.fits(expected_type) {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::MethodRef;
    use crate::jvm::{Name, ParseDescriptor};
    use VerificationType::*;

    fn new_frame<const N: usize, const M: usize>(
        locals: [VerificationType; N],
        stack: [VerificationType; M],
    ) -> Frame {
        Frame {
            locals: Vec::from(locals),
            stack: OffsetVec::from(stack),
        }
    }

    fn context<'a>(this_class: &'a BinaryName, return_type: &'a Option<FieldType>) -> MethodContext<'a> {
        MethodContext {
            this_class,
            return_type,
        }
    }

    #[test]
    fn arithmetic() {
        let this_class = BinaryName::from_str("MyClass").unwrap();
        let return_type = None;
        let ctx = context(&this_class, &return_type);

        let binops = [
            (Integer, vec![IAdd, ISub, IDiv, IMul, IRem, IAnd, IOr, IXor]),
            (Long, vec![LAdd, LSub, LDiv, LMul, LRem, LAnd, LOr, LXor]),
            (Float, vec![FAdd, FSub, FDiv, FMul, FRem]),
            (Double, vec![DAdd, DSub, DDiv, DMul, DRem]),
        ];

        for (good_typ, instructions) in binops {
            for instruction in instructions {
                for typ in [Integer, Long, Float, Double, Null, UninitializedThis] {
                    let mut frame_in = new_frame([], [typ.clone(), typ.clone()]);
                    let frame_out = new_frame([], [typ.clone()]);
                    let result = frame_in.verify_instruction(&instruction, 0, &ctx);
                    if typ == good_typ {
                        assert!(result.is_ok(), "Verification of {:?}", instruction);
                        assert_eq!(
                            frame_in, frame_out,
                            "Verification output frame of {:?}",
                            instruction
                        );
                    } else {
                        assert!(
                            matches!(result, Err(VerifierErrorKind::InvalidType)),
                            "Verification of {:?}",
                            instruction
                        );
                    }
                }

                // Try with a stack that is too small
                let mut frame_in = new_frame([], [good_typ.clone()]);
                assert!(
                    matches!(
                        frame_in.verify_instruction(&instruction, 0, &ctx),
                        Err(VerifierErrorKind::EmptyStack),
                    ),
                    "Verification of {:?}",
                    instruction
                );
            }
        }
    }

    #[test]
    fn wide_locals() {
        let this_class = BinaryName::from_str("MyClass").unwrap();
        let return_type = None;
        let ctx = context(&this_class, &return_type);

        let mut frame = new_frame([Top, Top, Top, Top], [Long]);
        frame.verify_instruction(&LStore(1), 0, &ctx).unwrap();
        assert_eq!(frame.locals, vec![Top, Long, Top, Top]);

        // Overwriting the second half kills the first half
        frame.stack.push(Integer);
        frame.verify_instruction(&IStore(2), 1, &ctx).unwrap();
        assert_eq!(frame.locals, vec![Top, Top, Integer, Top]);

        assert!(matches!(
            frame.verify_instruction(&LLoad(1), 2, &ctx),
            Err(VerifierErrorKind::InvalidType)
        ));
        frame.stack.push(Double);
        assert!(matches!(
            frame.verify_instruction(&DStore(3), 3, &ctx),
            Err(VerifierErrorKind::InvalidIndex)
        ));
    }

    #[test]
    fn constructor_initializes() {
        let this_class = BinaryName::from_str("MyClass").unwrap();
        let return_type = None;
        let ctx = context(&this_class, &return_type);
        let init = MethodRef::new(
            BinaryName::STRING,
            UnqualifiedName::INIT,
            MethodDescriptor::parse("()V").unwrap(),
        );

        let mut frame = new_frame([UninitializedThis], []);
        frame.verify_instruction(&New(BinaryName::STRING), 4, &ctx).unwrap();
        frame.verify_instruction(&Dup, 5, &ctx).unwrap();
        assert!(frame.has_uninitialized());
        frame
            .verify_instruction(&Invoke(InvokeType::Special, init.clone()), 6, &ctx)
            .unwrap();
        assert_eq!(
            frame.stack,
            OffsetVec::from([VerificationType::object(BinaryName::STRING)])
        );

        frame.verify_instruction(&Pop, 7, &ctx).unwrap();
        frame.verify_instruction(&ALoad(0), 8, &ctx).unwrap();
        frame
            .verify_instruction(&Invoke(InvokeType::Special, init), 9, &ctx)
            .unwrap();
        assert_eq!(frame.locals, vec![VerificationType::object(this_class.clone())]);
        assert!(!frame.has_uninitialized());
    }

    #[test]
    fn merging_frames() {
        let java = crate::jvm::class_graph::JavaLibraryHierarchy::new();
        let string = VerificationType::object(BinaryName::STRING);

        let frame1 = new_frame([Integer, Null, Long, Top], [string.clone()]);
        let frame2 = new_frame([Float, string.clone(), Long, Top], [Null]);
        let merged = frame1.merge(&frame2, &java).unwrap();
        assert_eq!(merged.locals, vec![Top, string.clone(), Long, Top]);
        assert_eq!(merged.stack, OffsetVec::from([string.clone()]));

        let frame3 = new_frame([], [Integer]);
        assert!(frame1.merge(&frame3, &java).is_err(), "stack types incompatible");
        let frame4 = new_frame([], []);
        assert!(frame1.merge(&frame4, &java).is_err(), "stack depths differ");
    }
}

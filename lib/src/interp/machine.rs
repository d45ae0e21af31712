use super::{natives, Abrupt, Error, HeapObject, ObjRef, Value};
use crate::jvm::class_graph::{
    is_subclass, Assignable, ClassHierarchy, JavaLibraryHierarchy, TypeInfo,
};
use crate::jvm::code::{
    Code, CompareMode, Constant, Instruction, InvokeType, MethodRef, ShiftType, SynLabel,
};
use crate::jvm::model::Class;
use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodDescriptor, RefType, RenderDescriptor, UnqualifiedName,
};
use crate::util::Width;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::rc::Rc;

/// Method implemented in Rust
///
/// Arguments include the receiver for non-static methods.
pub type Native = fn(&mut Machine, &[Value]) -> Result<Option<Value>, Abrupt>;

/// Bookkeeping of a custom frame allocator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramePool {
    /// Arrays handed out since the last commit or rollback
    pub pending: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

/// Default limit on nested calls
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Single-threaded interpreter
pub struct Machine {
    classes: HashMap<BinaryName, Rc<Class>>,
    initialized: HashSet<BinaryName>,
    library: JavaLibraryHierarchy,
    heap: Vec<HeapObject>,
    statics: HashMap<(BinaryName, UnqualifiedName), Value>,
    strings: HashMap<String, ObjRef>,
    natives: HashMap<(BinaryName, UnqualifiedName, MethodDescriptor), Native>,

    /// Held monitors in acquisition order, with their re-entry count
    monitors: Vec<(ObjRef, usize)>,

    print_stream: ObjRef,
    output: String,
    probes: Vec<Value>,
    monitor_probes: Vec<Vec<ObjRef>>,
    frame_pool: FramePool,
    depth: usize,

    /// Limit on nested calls
    pub max_depth: usize,
}

impl Machine {
    pub fn new() -> Machine {
        let print_stream = ObjRef(0);
        let mut machine = Machine {
            classes: HashMap::new(),
            initialized: HashSet::new(),
            library: JavaLibraryHierarchy::new(),
            heap: vec![HeapObject::PrintStream],
            statics: HashMap::new(),
            strings: HashMap::new(),
            natives: HashMap::new(),
            monitors: vec![],
            print_stream,
            output: String::new(),
            probes: vec![],
            monitor_probes: vec![],
            frame_pool: FramePool::default(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        };
        machine.statics.insert(
            (BinaryName::SYSTEM, UnqualifiedName::OUT),
            Value::Ref(print_stream),
        );
        natives::register(&mut machine);
        machine
    }

    pub fn load_class(&mut self, class: Class) {
        log::debug!("Loading {} ({} methods)", class.name, class.methods.len());
        self.classes.insert(class.name.clone(), Rc::new(class));
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values().map(|class| class.as_ref())
    }

    pub fn class(&self, name: &BinaryName) -> Option<&Class> {
        self.classes.get(name).map(|class| class.as_ref())
    }

    /// Implement a method in Rust
    ///
    /// Natives are matched on the class named at the call site (not the receiver class) and
    /// take priority over loaded code.
    pub fn register_native(&mut self, method: MethodRef, native: Native) {
        self.natives
            .insert((method.class, method.name, method.descriptor), native);
    }

    pub fn alloc(&mut self, object: HeapObject) -> ObjRef {
        let obj = ObjRef(self.heap.len());
        self.heap.push(object);
        obj
    }

    pub fn object(&self, obj: ObjRef) -> Result<&HeapObject, Error> {
        self.heap
            .get(obj.0)
            .ok_or_else(|| Error::BadReference(format!("{:?} is not on the heap", obj)))
    }

    pub fn object_mut(&mut self, obj: ObjRef) -> Result<&mut HeapObject, Error> {
        self.heap
            .get_mut(obj.0)
            .ok_or_else(|| Error::BadReference(format!("{:?} is not on the heap", obj)))
    }

    /// String object for a literal (the same object every time)
    pub fn intern(&mut self, string: &str) -> ObjRef {
        if let Some(obj) = self.strings.get(string) {
            return *obj;
        }
        let obj = self.alloc(HeapObject::String(string.to_owned()));
        self.strings.insert(string.to_owned(), obj);
        obj
    }

    pub fn string_value(&self, obj: ObjRef) -> Result<&str, Error> {
        match self.object(obj)? {
            HeapObject::String(string) => Ok(string),
            _ => Err(Error::BadReference(format!("{:?} is not a string", obj))),
        }
    }

    /// Object behind `System.out`
    pub fn print_stream(&self) -> ObjRef {
        self.print_stream
    }

    /// Everything printed so far
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Values passed to `coroutines/test/Probe.record`
    pub fn probes(&self) -> &[Value] {
        &self.probes
    }

    /// Held monitors at each call to `coroutines/test/Probe.monitors`
    pub fn monitor_probes(&self) -> &[Vec<ObjRef>] {
        &self.monitor_probes
    }

    /// State of the allocator registered with `register_allocators`
    pub fn frame_pool(&self) -> FramePool {
        self.frame_pool
    }

    pub(super) fn frame_pool_mut(&mut self) -> &mut FramePool {
        &mut self.frame_pool
    }

    /// Monitors currently held, in acquisition order
    pub fn held_monitors(&self) -> Vec<ObjRef> {
        self.monitors.iter().map(|(obj, _)| *obj).collect()
    }

    pub(super) fn write_line(&mut self, line: &str) {
        self.output.push_str(line);
        self.output.push('\n');
    }

    pub(super) fn record_probe(&mut self, value: Value) {
        self.probes.push(value);
    }

    pub(super) fn record_monitors(&mut self) {
        let held = self.held_monitors();
        self.monitor_probes.push(held);
    }

    /// Printed form of a value (as `println` would show it)
    pub fn render(&self, value: Value) -> Result<String, Error> {
        Ok(match value {
            Value::Int(i) => i.to_string(),
            Value::Long(l) => l.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Double(d) => format!("{:?}", d),
            Value::Null | Value::Top => String::from("null"),
            Value::Ref(obj) => match self.object(obj)? {
                HeapObject::String(string) => string.clone(),
                other => format!("{}{:?}", other.class_type().render(), obj),
            },
        })
    }

    /// Allocate an exception with a message
    pub fn new_throwable(&mut self, class: BinaryName, message: &str) -> ObjRef {
        let message = self.intern(message);
        let mut fields = BTreeMap::new();
        fields.insert(UnqualifiedName::MESSAGE, Value::Ref(message));
        self.alloc(HeapObject::Instance { class, fields })
    }

    pub fn throw(&mut self, class: BinaryName, message: &str) -> Abrupt {
        Abrupt::Throw(self.new_throwable(class, message))
    }

    /// Error for an exception that nothing caught
    pub fn uncaught(&self, exception: ObjRef) -> Error {
        match self.object(exception) {
            Ok(HeapObject::Instance { class, fields }) => {
                let message = fields
                    .get(&UnqualifiedName::MESSAGE)
                    .and_then(|message| message.object())
                    .and_then(|message| self.string_value(message).ok())
                    .map(str::to_owned);
                Error::Uncaught {
                    class: class.clone(),
                    message,
                }
            }
            Ok(_) => Error::BadReference(format!("{:?} thrown but not a throwable", exception)),
            Err(err) => err,
        }
    }

    fn non_null(&mut self, obj: Option<ObjRef>) -> Result<ObjRef, Abrupt> {
        match obj {
            Some(obj) => Ok(obj),
            None => Err(self.throw(BinaryName::NULLPOINTEREXCEPTION, "null reference")),
        }
    }

    /// Allocate an object with all instance fields at their default value
    pub fn new_instance(&mut self, class: &BinaryName) -> Result<ObjRef, Abrupt> {
        self.initialize(class)?;
        let mut fields = BTreeMap::new();
        let mut current = self.classes.get(class).cloned();
        while let Some(loaded) = current {
            for field in loaded.fields.iter().filter(|field| !field.is_static()) {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| default_value(&field.descriptor));
            }
            current = loaded
                .superclass
                .as_ref()
                .and_then(|superclass| self.classes.get(superclass))
                .cloned();
        }
        Ok(self.alloc(HeapObject::Instance {
            class: class.clone(),
            fields,
        }))
    }

    /// Allocate an object and run its no-argument constructor
    pub fn construct(&mut self, class: &BinaryName) -> Result<ObjRef, Abrupt> {
        let obj = self.new_instance(class)?;
        let init = MethodRef::new(
            class.clone(),
            UnqualifiedName::INIT,
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
        self.invoke(InvokeType::Special, &init, vec![Value::Ref(obj)])?;
        Ok(obj)
    }

    /// Run `<clinit>` the first time a loaded class is used
    fn initialize(&mut self, class: &BinaryName) -> Result<(), Abrupt> {
        if self.initialized.contains(class) {
            return Ok(());
        }
        let loaded = match self.classes.get(class) {
            Some(loaded) => loaded.clone(),
            None => return Ok(()),
        };
        self.initialized.insert(class.clone());
        if let Some(superclass) = &loaded.superclass {
            self.initialize(superclass)?;
        }
        for field in loaded.fields.iter().filter(|field| field.is_static()) {
            self.statics
                .entry((class.clone(), field.name.clone()))
                .or_insert_with(|| default_value(&field.descriptor));
        }
        if let Some(index) = loaded
            .methods
            .iter()
            .position(|method| method.name == UnqualifiedName::CLINIT)
        {
            log::trace!("Initializing {}", class);
            self.run_method(loaded, index, vec![])?;
        }
        Ok(())
    }

    /// Call a method
    pub fn invoke(
        &mut self,
        invoke_type: InvokeType,
        method: &MethodRef,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Abrupt> {
        let key = (
            method.class.clone(),
            method.name.clone(),
            method.descriptor.clone(),
        );
        if let Some(native) = self.natives.get(&key).copied() {
            log::trace!("Native call to {}", method.pretty());
            return native(self, &args);
        }

        let target = match invoke_type {
            InvokeType::Static => {
                self.initialize(&method.class)?;
                method.class.clone()
            }
            InvokeType::Special => {
                self.non_null(args.first().and_then(|receiver| receiver.object()))?;
                method.class.clone()
            }
            InvokeType::Virtual | InvokeType::Interface => {
                let receiver = self.non_null(args.first().and_then(|receiver| receiver.object()))?;
                match self.object(receiver)? {
                    HeapObject::Instance { class, .. } => class.clone(),
                    _ => method.class.clone(),
                }
            }
        };

        match self.resolve(&target, &method.name, &method.descriptor) {
            Some((class, index)) => self.run_method(class, index, args),
            None if method.name == UnqualifiedName::INIT => {
                self.library_constructor(&args)?;
                Ok(None)
            }
            None => Err(Error::NoSuchMethod(method.pretty()).into()),
        }
    }

    /// Constructors of classes that aren't loaded only keep their message (if any)
    fn library_constructor(&mut self, args: &[Value]) -> Result<(), Abrupt> {
        if let [Value::Ref(obj), message @ Value::Ref(_), ..] = args {
            if let HeapObject::Instance { fields, .. } = self.object_mut(*obj)? {
                fields.insert(UnqualifiedName::MESSAGE, *message);
            }
        }
        Ok(())
    }

    /// Find the implementation of a method, starting at a class and going up superclasses
    fn resolve(
        &self,
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<(Rc<Class>, usize)> {
        let mut current = self.classes.get(class);
        while let Some(loaded) = current {
            let found = loaded
                .methods
                .iter()
                .position(|method| method.matches(name, descriptor) && method.code.is_some());
            if let Some(index) = found {
                return Some((loaded.clone(), index));
            }
            current = loaded
                .superclass
                .as_ref()
                .and_then(|superclass| self.classes.get(superclass));
        }
        None
    }

    fn run_method(
        &mut self,
        class: Rc<Class>,
        index: usize,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Abrupt> {
        if self.depth >= self.max_depth {
            return Err(Error::StackOverflow(self.max_depth).into());
        }
        let method = &class.methods[index];
        let location = format!("{}.{}", class.name, method.signature());
        let code = method
            .code
            .as_ref()
            .ok_or_else(|| Error::NoSuchMethod(location.clone()))?;

        let mut locals = vec![];
        for arg in args {
            locals.push(arg);
            if arg.width() == 2 {
                locals.push(Value::Top);
            }
        }

        self.depth += 1;
        let result = self.interpret(location, code, locals);
        self.depth -= 1;
        result
    }

    fn interpret(
        &mut self,
        location: String,
        code: &Code,
        locals: Vec<Value>,
    ) -> Result<Option<Value>, Abrupt> {
        log::trace!("Entering {} ({} locals)", location, locals.len());
        let positions = code.label_positions()?;
        let handlers = code.handler_ranges()?;
        let mut frame = ExecFrame {
            location,
            locals,
            stack: vec![],
            pc: 0,
        };

        loop {
            let insn = code
                .instructions
                .get(frame.pc)
                .ok_or_else(|| frame.bad_code("execution ran off the end of the code"))?;
            let next = match self.step(&mut frame, insn) {
                Ok(Step::Next) => frame.pc + 1,
                Ok(Step::Jump(label)) => *positions
                    .get(&label)
                    .ok_or_else(|| frame.bad_code(format!("jump to unplaced {:?}", label)))?,
                Ok(Step::Return(value)) => return Ok(value),
                Err(Abrupt::Throw(exception)) => {
                    match self.find_handler(exception, frame.pc, code, &handlers)? {
                        Some(handler) => {
                            frame.stack.clear();
                            frame.stack.push(Value::Ref(exception));
                            handler
                        }
                        None => return Err(Abrupt::Throw(exception)),
                    }
                }
                Err(err) => return Err(err),
            };
            frame.pc = next;
        }
    }

    /// First handler (in table order) covering the instruction and catching the exception
    fn find_handler(
        &self,
        exception: ObjRef,
        pc: usize,
        code: &Code,
        handlers: &[(Range<usize>, usize)],
    ) -> Result<Option<usize>, Abrupt> {
        let thrown = self.object(exception)?.class_type();
        for ((range, handler), entry) in handlers.iter().zip(&code.exception_handlers) {
            if !range.contains(&pc) {
                continue;
            }
            let caught = match (&entry.catch_type, &thrown) {
                (None, _) => true,
                (Some(catch_type), RefType::Object(class)) => {
                    is_subclass(class, catch_type, self)?
                }
                (Some(_), _) => false,
            };
            if caught {
                return Ok(Some(*handler));
            }
        }
        Ok(None)
    }

    fn is_instance(&self, obj: ObjRef, target: &RefType) -> Result<bool, Error> {
        let actual = self.object(obj)?.class_type();
        let result = match (&actual, target) {
            (RefType::Object(sub_type), RefType::Object(super_type)) => {
                is_subclass(sub_type, super_type, self)?
            }
            _ => actual.is_assignable(target, self)?,
        };
        Ok(result)
    }

    /// Allocate an array with every element at its default value
    pub fn allocate_array(&mut self, array_type: RefType, count: i32) -> Result<ObjRef, Abrupt> {
        let len = match usize::try_from(count) {
            Ok(len) => len,
            Err(_) => {
                return Err(self.throw(
                    BinaryName::NEGATIVEARRAYSIZEEXCEPTION,
                    &count.to_string(),
                ))
            }
        };
        let element_type = array_type
            .element_type()
            .ok_or_else(|| Error::Unsupported(format!("array of {:?}", array_type)))?;
        let values = vec![default_value(&element_type); len];
        Ok(self.alloc(HeapObject::Array { array_type, values }))
    }

    fn new_multi_array(&mut self, array_type: &RefType, counts: &[i32]) -> Result<ObjRef, Abrupt> {
        let (first, rest) = counts
            .split_first()
            .ok_or_else(|| Error::Unsupported(String::from("zero dimension array")))?;
        let array = self.allocate_array(array_type.clone(), *first)?;
        if rest.is_empty() {
            return Ok(array);
        }
        let inner_type = match array_type.element_type() {
            Some(FieldType::Ref(inner_type)) => inner_type,
            _ => {
                return Err(Error::Unsupported(format!(
                    "{} dimensions for {:?}",
                    counts.len(),
                    array_type
                ))
                .into())
            }
        };
        for index in 0..*first {
            let inner = self.new_multi_array(&inner_type, rest)?;
            self.set_array_element(Some(array), index, Value::Ref(inner))?;
        }
        Ok(array)
    }

    fn array_element(&mut self, array: Option<ObjRef>, index: i32) -> Result<Value, Abrupt> {
        let array = self.non_null(array)?;
        let found = match self.object(array)? {
            HeapObject::Array { values, .. } => usize::try_from(index)
                .ok()
                .and_then(|idx| values.get(idx).copied())
                .ok_or(values.len()),
            _ => return Err(Error::BadReference(format!("{:?} is not an array", array)).into()),
        };
        match found {
            Ok(value) => Ok(value),
            Err(len) => Err(self.throw(
                BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION,
                &format!("Index {} out of bounds for length {}", index, len),
            )),
        }
    }

    fn set_array_element(
        &mut self,
        array: Option<ObjRef>,
        index: i32,
        value: Value,
    ) -> Result<(), Abrupt> {
        let array = self.non_null(array)?;
        let missed = match self.object_mut(array)? {
            HeapObject::Array { values, .. } => {
                let len = values.len();
                match usize::try_from(index).ok().and_then(|idx| values.get_mut(idx)) {
                    Some(slot) => {
                        *slot = value;
                        None
                    }
                    None => Some(len),
                }
            }
            _ => return Err(Error::BadReference(format!("{:?} is not an array", array)).into()),
        };
        match missed {
            None => Ok(()),
            Some(len) => Err(self.throw(
                BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION,
                &format!("Index {} out of bounds for length {}", index, len),
            )),
        }
    }

    fn enter_monitor(&mut self, obj: ObjRef) {
        match self.monitors.iter_mut().find(|(held, _)| *held == obj) {
            Some((_, count)) => *count += 1,
            None => self.monitors.push((obj, 1)),
        }
    }

    fn exit_monitor(&mut self, obj: ObjRef) -> Result<(), Abrupt> {
        let position = self.monitors.iter().position(|(held, _)| *held == obj);
        match position {
            Some(position) => {
                let count = &mut self.monitors[position].1;
                *count -= 1;
                if *count == 0 {
                    self.monitors.remove(position);
                }
                Ok(())
            }
            None => Err(self.throw(
                BinaryName::ILLEGALMONITORSTATEEXCEPTION,
                "current thread is not owner",
            )),
        }
    }

    fn step(&mut self, frame: &mut ExecFrame, insn: &Instruction) -> Result<Step, Abrupt> {
        use Instruction::*;

        match insn {
            Label(_) | LineNumber(_) | Nop => (),

            AConstNull => frame.push(Value::Null),
            IConst(value) => frame.push(Value::Int(*value)),
            LConst(value) => frame.push(Value::Long(*value)),
            FConst(value) => frame.push(Value::Float(*value)),
            DConst(value) => frame.push(Value::Double(*value)),
            Ldc(Constant::String(string)) => {
                let obj = self.intern(string);
                frame.push(Value::Ref(obj));
            }
            Ldc(other) => return Err(Error::Unsupported(format!("ldc {:?}", other)).into()),

            ILoad(slot) | LLoad(slot) | FLoad(slot) | DLoad(slot) | ALoad(slot) => {
                let value = frame.load(*slot)?;
                frame.push(value);
            }
            IStore(slot) | LStore(slot) | FStore(slot) | DStore(slot) | AStore(slot) => {
                let value = frame.pop()?;
                frame.store(*slot, value);
            }
            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad => {
                let index = frame.pop_int()?;
                let array = frame.pop_ref()?;
                let value = self.array_element(array, index)?;
                frame.push(value);
            }
            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
                let value = match (insn, frame.pop()?) {
                    (BAStore, Value::Int(i)) => Value::Int(i as i8 as i32),
                    (CAStore, Value::Int(i)) => Value::Int(i as u16 as i32),
                    (SAStore, Value::Int(i)) => Value::Int(i as i16 as i32),
                    (_, value) => value,
                };
                let index = frame.pop_int()?;
                let array = frame.pop_ref()?;
                self.set_array_element(array, index, value)?;
            }

            Pop => {
                frame.pop_words(1)?;
            }
            Pop2 => {
                frame.pop_words(2)?;
            }
            Dup => frame.dup_x(1, 0)?,
            DupX1 => frame.dup_x(1, 1)?,
            DupX2 => frame.dup_x(1, 2)?,
            Dup2 => frame.dup_x(2, 0)?,
            Dup2X1 => frame.dup_x(2, 1)?,
            Dup2X2 => frame.dup_x(2, 2)?,
            Swap => {
                let top = frame.pop()?;
                let under = frame.pop()?;
                frame.push(top);
                frame.push(under);
            }

            IAdd => frame.int_op(i32::wrapping_add)?,
            ISub => frame.int_op(i32::wrapping_sub)?,
            IMul => frame.int_op(i32::wrapping_mul)?,
            IAnd => frame.int_op(|a, b| a & b)?,
            IOr => frame.int_op(|a, b| a | b)?,
            IXor => frame.int_op(|a, b| a ^ b)?,
            LAdd => frame.long_op(i64::wrapping_add)?,
            LSub => frame.long_op(i64::wrapping_sub)?,
            LMul => frame.long_op(i64::wrapping_mul)?,
            LAnd => frame.long_op(|a, b| a & b)?,
            LOr => frame.long_op(|a, b| a | b)?,
            LXor => frame.long_op(|a, b| a ^ b)?,
            FAdd => frame.float_op(|a, b| a + b)?,
            FSub => frame.float_op(|a, b| a - b)?,
            FMul => frame.float_op(|a, b| a * b)?,
            FDiv => frame.float_op(|a, b| a / b)?,
            FRem => frame.float_op(|a, b| a % b)?,
            DAdd => frame.double_op(|a, b| a + b)?,
            DSub => frame.double_op(|a, b| a - b)?,
            DMul => frame.double_op(|a, b| a * b)?,
            DDiv => frame.double_op(|a, b| a / b)?,
            DRem => frame.double_op(|a, b| a % b)?,
            IDiv | IRem => {
                let divisor = frame.pop_int()?;
                let dividend = frame.pop_int()?;
                if divisor == 0 {
                    return Err(self.throw(BinaryName::ARITHMETICEXCEPTION, "/ by zero"));
                }
                frame.push(Value::Int(if matches!(insn, IDiv) {
                    dividend.wrapping_div(divisor)
                } else {
                    dividend.wrapping_rem(divisor)
                }));
            }
            LDiv | LRem => {
                let divisor = frame.pop_long()?;
                let dividend = frame.pop_long()?;
                if divisor == 0 {
                    return Err(self.throw(BinaryName::ARITHMETICEXCEPTION, "/ by zero"));
                }
                frame.push(Value::Long(if matches!(insn, LDiv) {
                    dividend.wrapping_div(divisor)
                } else {
                    dividend.wrapping_rem(divisor)
                }));
            }
            INeg => {
                let value = frame.pop_int()?;
                frame.push(Value::Int(value.wrapping_neg()));
            }
            LNeg => {
                let value = frame.pop_long()?;
                frame.push(Value::Long(value.wrapping_neg()));
            }
            FNeg => {
                let value = frame.pop_float()?;
                frame.push(Value::Float(-value));
            }
            DNeg => {
                let value = frame.pop_double()?;
                frame.push(Value::Double(-value));
            }
            ISh(shift) => {
                let amount = frame.pop_int()? as u32;
                let value = frame.pop_int()?;
                frame.push(Value::Int(match shift {
                    ShiftType::Left => value.wrapping_shl(amount),
                    ShiftType::ArithmeticRight => value.wrapping_shr(amount),
                    ShiftType::LogicalRight => (value as u32).wrapping_shr(amount) as i32,
                }));
            }
            LSh(shift) => {
                let amount = frame.pop_int()? as u32;
                let value = frame.pop_long()?;
                frame.push(Value::Long(match shift {
                    ShiftType::Left => value.wrapping_shl(amount),
                    ShiftType::ArithmeticRight => value.wrapping_shr(amount),
                    ShiftType::LogicalRight => (value as u64).wrapping_shr(amount) as i64,
                }));
            }
            IInc(slot, delta) => match frame.load(*slot)? {
                Value::Int(value) => frame.store(*slot, Value::Int(value.wrapping_add(*delta as i32))),
                other => {
                    return Err(frame
                        .bad_code(format!("iinc on {:?}", other))
                        .into())
                }
            },

            I2L => {
                let value = frame.pop_int()?;
                frame.push(Value::Long(value as i64));
            }
            I2F => {
                let value = frame.pop_int()?;
                frame.push(Value::Float(value as f32));
            }
            I2D => {
                let value = frame.pop_int()?;
                frame.push(Value::Double(value as f64));
            }
            L2I => {
                let value = frame.pop_long()?;
                frame.push(Value::Int(value as i32));
            }
            L2F => {
                let value = frame.pop_long()?;
                frame.push(Value::Float(value as f32));
            }
            L2D => {
                let value = frame.pop_long()?;
                frame.push(Value::Double(value as f64));
            }
            F2I => {
                let value = frame.pop_float()?;
                frame.push(Value::Int(value as i32));
            }
            F2L => {
                let value = frame.pop_float()?;
                frame.push(Value::Long(value as i64));
            }
            F2D => {
                let value = frame.pop_float()?;
                frame.push(Value::Double(value as f64));
            }
            D2I => {
                let value = frame.pop_double()?;
                frame.push(Value::Int(value as i32));
            }
            D2L => {
                let value = frame.pop_double()?;
                frame.push(Value::Long(value as i64));
            }
            D2F => {
                let value = frame.pop_double()?;
                frame.push(Value::Float(value as f32));
            }
            I2B => {
                let value = frame.pop_int()?;
                frame.push(Value::Int(value as i8 as i32));
            }
            I2C => {
                let value = frame.pop_int()?;
                frame.push(Value::Int(value as u16 as i32));
            }
            I2S => {
                let value = frame.pop_int()?;
                frame.push(Value::Int(value as i16 as i32));
            }

            LCmp => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Int(a.cmp(&b) as i32));
            }
            FCmp(mode) => {
                let b = frame.pop_float()?;
                let a = frame.pop_float()?;
                frame.push(Value::Int(compare_floats(a.partial_cmp(&b), *mode)));
            }
            DCmp(mode) => {
                let b = frame.pop_double()?;
                let a = frame.pop_double()?;
                frame.push(Value::Int(compare_floats(a.partial_cmp(&b), *mode)));
            }

            GetStatic(field) => {
                self.initialize(&field.class)?;
                let value = self
                    .statics
                    .get(&(field.class.clone(), field.name.clone()))
                    .copied()
                    .unwrap_or_else(|| default_value(&field.descriptor));
                frame.push(value);
            }
            PutStatic(field) => {
                self.initialize(&field.class)?;
                let value = frame.pop()?;
                self.statics
                    .insert((field.class.clone(), field.name.clone()), value);
            }
            GetField(field) => {
                let obj = frame.pop_ref()?;
                let obj = self.non_null(obj)?;
                let value = match self.object(obj)? {
                    HeapObject::Instance { fields, .. } => fields
                        .get(&field.name)
                        .copied()
                        .unwrap_or_else(|| default_value(&field.descriptor)),
                    _ => return Err(Error::BadReference(format!("{:?} has no fields", obj)).into()),
                };
                frame.push(value);
            }
            PutField(field) => {
                let value = frame.pop()?;
                let obj = frame.pop_ref()?;
                let obj = self.non_null(obj)?;
                match self.object_mut(obj)? {
                    HeapObject::Instance { fields, .. } => {
                        fields.insert(field.name.clone(), value);
                    }
                    _ => return Err(Error::BadReference(format!("{:?} has no fields", obj)).into()),
                }
            }

            Invoke(invoke_type, method) => {
                let arg_count = method.descriptor.parameters.len()
                    + usize::from(*invoke_type != InvokeType::Static);
                if frame.stack.len() < arg_count {
                    return Err(frame.bad_code("not enough arguments on the stack").into());
                }
                let args = frame.stack.split_off(frame.stack.len() - arg_count);
                if let Some(result) = self.invoke(*invoke_type, method, args)? {
                    frame.push(result);
                }
            }
            InvokeDynamic(_) => {
                return Err(Error::Unsupported(String::from("invokedynamic")).into())
            }

            New(class) => {
                let obj = self.new_instance(class)?;
                frame.push(Value::Ref(obj));
            }
            NewArray(base_type) => {
                let count = frame.pop_int()?;
                let obj = self.allocate_array(RefType::array(FieldType::Base(*base_type)), count)?;
                frame.push(Value::Ref(obj));
            }
            ANewArray(element_type) => {
                let count = frame.pop_int()?;
                let array_type = RefType::array(FieldType::Ref(element_type.clone()));
                let obj = self.allocate_array(array_type, count)?;
                frame.push(Value::Ref(obj));
            }
            MultiANewArray(array_type, dimensions) => {
                let mut counts = vec![];
                for _ in 0..*dimensions {
                    counts.push(frame.pop_int()?);
                }
                counts.reverse();
                let obj = self.new_multi_array(array_type, &counts)?;
                frame.push(Value::Ref(obj));
            }
            ArrayLength => {
                let array = frame.pop_ref()?;
                let array = self.non_null(array)?;
                let len = match self.object(array)? {
                    HeapObject::Array { values, .. } => values.len(),
                    _ => return Err(Error::BadReference(format!("{:?} is not an array", array)).into()),
                };
                frame.push(Value::Int(len as i32));
            }
            CheckCast(target) => {
                let value = frame.pop()?;
                if let Value::Ref(obj) = value {
                    if !self.is_instance(obj, target)? {
                        let message = format!(
                            "{} cannot be cast to {}",
                            self.object(obj)?.class_type().render(),
                            target.render()
                        );
                        return Err(self.throw(BinaryName::CLASSCASTEXCEPTION, &message));
                    }
                }
                frame.push(value);
            }
            InstanceOf(target) => {
                let is_instance = match frame.pop()? {
                    Value::Ref(obj) => self.is_instance(obj, target)?,
                    _ => false,
                };
                frame.push(Value::Int(i32::from(is_instance)));
            }

            MonitorEnter => {
                let obj = frame.pop_ref()?;
                let obj = self.non_null(obj)?;
                self.enter_monitor(obj);
            }
            MonitorExit => {
                let obj = frame.pop_ref()?;
                let obj = self.non_null(obj)?;
                self.exit_monitor(obj)?;
            }

            If(comparison, label) => {
                let value = frame.pop_int()?;
                if comparison.holds(value.cmp(&0)) {
                    return Ok(Step::Jump(*label));
                }
            }
            IfICmp(comparison, label) => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if comparison.holds(a.cmp(&b)) {
                    return Ok(Step::Jump(*label));
                }
            }
            IfACmp(comparison, label) => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                if comparison.holds(a == b) {
                    return Ok(Step::Jump(*label));
                }
            }
            IfNull(comparison, label) => {
                let value = frame.pop()?;
                if comparison.holds(value == Value::Null) {
                    return Ok(Step::Jump(*label));
                }
            }
            Goto(label) => return Ok(Step::Jump(*label)),
            Jsr(_) | Ret(_) => {
                return Err(Error::Unsupported(String::from("subroutines")).into())
            }
            TableSwitch {
                low,
                default,
                targets,
            } => {
                let value = frame.pop_int()?;
                let target = value
                    .checked_sub(*low)
                    .and_then(|offset| usize::try_from(offset).ok())
                    .and_then(|offset| targets.get(offset))
                    .unwrap_or(default);
                return Ok(Step::Jump(*target));
            }
            LookupSwitch { default, targets } => {
                let value = frame.pop_int()?;
                let target = targets
                    .iter()
                    .find(|(key, _)| *key == value)
                    .map_or(default, |(_, label)| label);
                return Ok(Step::Jump(*target));
            }

            IReturn | LReturn | FReturn | DReturn | AReturn => {
                return Ok(Step::Return(Some(frame.pop()?)))
            }
            Return => return Ok(Step::Return(None)),
            AThrow => {
                let exception = frame.pop_ref()?;
                let exception = self.non_null(exception)?;
                return Err(Abrupt::Throw(exception));
            }
        }

        Ok(Step::Next)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

/// Loaded classes first, then the built-in library types
impl ClassHierarchy for Machine {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        match self.classes.get(name) {
            Some(class) => Some(TypeInfo {
                name: class.name.clone(),
                superclass: class.superclass.clone(),
                interfaces: class.interfaces.clone(),
                is_interface: class.is_interface(),
            }),
            None => self.library.lookup(name),
        }
    }
}

/// Initial value of fields and array elements
pub fn default_value(field_type: &FieldType) -> Value {
    match field_type {
        FieldType::Base(BaseType::Long) => Value::Long(0),
        FieldType::Base(BaseType::Float) => Value::Float(0.0),
        FieldType::Base(BaseType::Double) => Value::Double(0.0),
        FieldType::Base(_) => Value::Int(0),
        FieldType::Ref(_) => Value::Null,
    }
}

fn compare_floats(ordering: Option<std::cmp::Ordering>, mode: CompareMode) -> i32 {
    match (ordering, mode) {
        (Some(ordering), _) => ordering as i32,
        (None, CompareMode::L) => -1,
        (None, CompareMode::G) => 1,
    }
}

enum Step {
    Next,
    Jump(SynLabel),
    Return(Option<Value>),
}

/// Locals and operand stack of a method being executed
struct ExecFrame {
    location: String,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
}

impl ExecFrame {
    fn bad_code(&self, message: impl Into<String>) -> Error {
        Error::BadCode {
            method: self.location.clone(),
            index: self.pc,
            message: message.into(),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, Error> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.bad_code("operand stack underflow")),
        }
    }

    fn pop_int(&mut self) -> Result<i32, Error> {
        match self.pop()? {
            Value::Int(value) => Ok(value),
            other => Err(self.bad_code(format!("expected int, found {:?}", other))),
        }
    }

    fn pop_long(&mut self) -> Result<i64, Error> {
        match self.pop()? {
            Value::Long(value) => Ok(value),
            other => Err(self.bad_code(format!("expected long, found {:?}", other))),
        }
    }

    fn pop_float(&mut self) -> Result<f32, Error> {
        match self.pop()? {
            Value::Float(value) => Ok(value),
            other => Err(self.bad_code(format!("expected float, found {:?}", other))),
        }
    }

    fn pop_double(&mut self) -> Result<f64, Error> {
        match self.pop()? {
            Value::Double(value) => Ok(value),
            other => Err(self.bad_code(format!("expected double, found {:?}", other))),
        }
    }

    /// Pop a reference (`None` for `null`)
    fn pop_ref(&mut self) -> Result<Option<ObjRef>, Error> {
        match self.pop()? {
            Value::Ref(obj) => Ok(Some(obj)),
            Value::Null => Ok(None),
            other => Err(self.bad_code(format!("expected reference, found {:?}", other))),
        }
    }

    /// Pop values adding up to a number of stack words
    fn pop_words(&mut self, words: usize) -> Result<Vec<Value>, Error> {
        let mut popped = vec![];
        let mut count = 0;
        while count < words {
            let value = self.pop()?;
            count += value.width();
            popped.push(value);
        }
        if count != words {
            return Err(self.bad_code("stack manipulation splits a long or double"));
        }
        popped.reverse();
        Ok(popped)
    }

    /// Duplicate the top `top` words, inserting the copy `under` words down
    fn dup_x(&mut self, top: usize, under: usize) -> Result<(), Error> {
        let top_values = self.pop_words(top)?;
        let under_values = self.pop_words(under)?;
        self.stack.extend_from_slice(&top_values);
        self.stack.extend(under_values);
        self.stack.extend(top_values);
        Ok(())
    }

    fn int_op(&mut self, op: impl FnOnce(i32, i32) -> i32) -> Result<(), Error> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int(op(a, b)));
        Ok(())
    }

    fn long_op(&mut self, op: impl FnOnce(i64, i64) -> i64) -> Result<(), Error> {
        let b = self.pop_long()?;
        let a = self.pop_long()?;
        self.push(Value::Long(op(a, b)));
        Ok(())
    }

    fn float_op(&mut self, op: impl FnOnce(f32, f32) -> f32) -> Result<(), Error> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::Float(op(a, b)));
        Ok(())
    }

    fn double_op(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Result<(), Error> {
        let b = self.pop_double()?;
        let a = self.pop_double()?;
        self.push(Value::Double(op(a, b)));
        Ok(())
    }

    fn load(&self, slot: u16) -> Result<Value, Error> {
        match self.locals.get(slot as usize) {
            Some(Value::Top) | None => {
                Err(self.bad_code(format!("local {} is not initialized", slot)))
            }
            Some(value) => Ok(*value),
        }
    }

    fn store(&mut self, slot: u16, value: Value) {
        let slot = slot as usize;
        let end = slot + value.width();
        if self.locals.len() < end {
            self.locals.resize(end, Value::Top);
        }
        // Overwriting half of a long or double ruins it
        if slot > 0 && self.locals[slot - 1].width() == 2 {
            self.locals[slot - 1] = Value::Top;
        }
        self.locals[slot] = value;
        if value.width() == 2 {
            self.locals[slot + 1] = Value::Top;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{ExceptionHandler, Instruction::*, LabelGenerator, OrdComparison, SynLabelGenerator};
    use crate::jvm::model::Method;
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags, Name, ParseDescriptor};

    fn run_static(instructions: Vec<Instruction>, handlers: Vec<ExceptionHandler>) -> Result<Option<Value>, Abrupt> {
        let mut class = Class::new(BinaryName::from_str("me/Calc").unwrap(), ClassAccessFlags::PUBLIC);
        class.add_method(Method::new(
            UnqualifiedName::RUN,
            MethodDescriptor::parse("()I").unwrap(),
            MethodAccessFlags::STATIC,
            Some(Code::new(instructions, handlers)),
        ));
        let mut machine = Machine::new();
        machine.load_class(class);
        let run = MethodRef::new(
            BinaryName::from_str("me/Calc").unwrap(),
            UnqualifiedName::RUN,
            MethodDescriptor::parse("()I").unwrap(),
        );
        machine.invoke(InvokeType::Static, &run, vec![])
    }

    #[test]
    fn arithmetic_and_loops() {
        let mut gen = SynLabelGenerator::default();
        let (top, done) = (gen.fresh_label(), gen.fresh_label());

        // sum of 1..=10 in a loop, as a long, then narrowed
        let result = run_static(
            vec![
                LConst(0),
                LStore(0),
                IConst(1),
                IStore(2),
                Label(top),
                ILoad(2),
                IConst(10),
                IfICmp(OrdComparison::GT, done),
                LLoad(0),
                ILoad(2),
                I2L,
                LAdd,
                LStore(0),
                IInc(2, 1),
                Goto(top),
                Label(done),
                LLoad(0),
                L2I,
                IReturn,
            ],
            vec![],
        );
        assert!(matches!(result, Ok(Some(Value::Int(55)))), "{:?}", result);
    }

    #[test]
    fn exceptions_are_caught() {
        let mut gen = SynLabelGenerator::default();
        let (start, end, handler) = (gen.fresh_label(), gen.fresh_label(), gen.fresh_label());

        let result = run_static(
            vec![
                Label(start),
                IConst(1),
                IConst(0),
                IDiv,
                IReturn,
                Label(end),
                Label(handler),
                Pop,
                IConst(-1),
                IReturn,
            ],
            vec![ExceptionHandler {
                start,
                end,
                handler,
                catch_type: Some(BinaryName::ARITHMETICEXCEPTION),
            }],
        );
        assert!(matches!(result, Ok(Some(Value::Int(-1)))), "{:?}", result);

        // Not caught by a handler for an unrelated type
        let result = run_static(
            vec![
                Label(start),
                AConstNull,
                ArrayLength,
                IReturn,
                Label(end),
                Label(handler),
                IConst(-1),
                IReturn,
            ],
            vec![ExceptionHandler {
                start,
                end,
                handler,
                catch_type: Some(BinaryName::ARITHMETICEXCEPTION),
            }],
        );
        assert!(matches!(result, Err(Abrupt::Throw(_))), "{:?}", result);
    }

    #[test]
    fn monitors_are_reentrant() {
        let mut machine = Machine::new();
        let a = machine.intern("A");
        let b = machine.intern("B");
        machine.enter_monitor(a);
        machine.enter_monitor(b);
        machine.enter_monitor(a);
        assert_eq!(machine.held_monitors(), vec![a, b]);

        assert!(machine.exit_monitor(a).is_ok());
        assert_eq!(machine.held_monitors(), vec![a, b], "a is still held once");
        assert!(machine.exit_monitor(b).is_ok());
        assert!(machine.exit_monitor(a).is_ok());
        assert!(machine.held_monitors().is_empty());
        assert!(matches!(machine.exit_monitor(a), Err(Abrupt::Throw(_))));
    }
}

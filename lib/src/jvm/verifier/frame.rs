use super::*;
use crate::jvm::class_file::{ConstantsPool, StackMapFrame};
use crate::jvm::class_graph::{assignable, TypeResolver};
use crate::jvm::code::{ArrayKind, ConstantData, Instruction, InvokeType, LocalKind};
use crate::jvm::{ArrayType, BaseType, BinaryName, Error, FieldType, RefType, VerifierErrorKind};
use crate::util::{OffsetVec, Width};

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Locals are tracked per slot: a `long` or `double` is followed by a `Top` in the next slot.
/// The stack is an [`OffsetVec`], so its offset length is the stack depth in slots while its
/// length is the number of values on it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<Cls, U> {
    /// Local variables, one entry per slot
    pub locals: Vec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls, U>>,
}

/// Stack map frame stored during verification
pub type VerifierFrame = Frame<RefType, usize>;

/// Frame in the compact form used by the `StackMapTable`
///
/// Wide locals take up one entry, and trailing `Top` locals are dropped.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SerializableFrame {
    pub locals: Vec<SerializableVerificationType>,
    pub stack: Vec<SerializableVerificationType>,
}

impl VerifierFrame {
    /// Frame on entry to a method
    pub fn method_entry(
        this_class: &BinaryName,
        is_static: bool,
        is_constructor: bool,
        parameters: &[FieldType],
    ) -> VerifierFrame {
        let mut locals = vec![];
        if !is_static {
            if is_constructor && this_class != &BinaryName::OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VType::object(this_class.clone()));
            }
        }
        for parameter in parameters {
            let typ = VType::from(parameter.clone());
            let wide = typ.width() == 2;
            locals.push(typ);
            if wide {
                locals.push(VerificationType::Top);
            }
        }
        Frame {
            locals,
            stack: OffsetVec::new(),
        }
    }

    /// Frame at the start of an exception handler, given the locals of a covered instruction
    pub fn handler_entry(locals: &[VType], catch_type: Option<&BinaryName>) -> VerifierFrame {
        let caught = catch_type.cloned().unwrap_or(BinaryName::THROWABLE);
        let mut stack = OffsetVec::new();
        stack.push(VType::object(caught));
        Frame {
            locals: locals.to_vec(),
            stack,
        }
    }

    /// Frame used for dead code replaced by `nop ... athrow`
    pub fn dead_code() -> VerifierFrame {
        VerifierFrame::handler_entry(&[], None)
    }

    /// Update the frame to reflect the effects of the given instruction
    ///
    /// `instructions` is the whole method body (used to find the class of uninitialized objects
    /// from their `new` instruction).
    pub fn verify_instruction(
        &mut self,
        insn: &Instruction,
        insn_index: usize,
        this_class: &BinaryName,
        instructions: &[Instruction],
    ) -> Result<(), VerifierErrorKind> {
        verify_instruction(self, insn, insn_index, this_class, instructions)
    }

    /// Merge another frame into this one, returning whether this frame changed
    ///
    /// Locals that don't merge become `Top`, but the stacks must be compatible.
    pub fn merge(
        &mut self,
        other: &VerifierFrame,
        resolver: &dyn TypeResolver,
    ) -> Result<bool, MergeError> {
        if self.stack.len() != other.stack.len() {
            return Err(MergeError::Verifier(VerifierErrorKind::IncompatibleStacks));
        }
        let mut changed = false;

        let mut stack = OffsetVec::new();
        for ((_, _, ours), (_, _, theirs)) in self.stack.iter().zip(other.stack.iter()) {
            let merged = merge_types(resolver, ours, theirs)?
                .ok_or(MergeError::Verifier(VerifierErrorKind::IncompatibleStacks))?;
            changed |= &merged != ours;
            stack.push(merged);
        }

        let top = VerificationType::Top;
        let slots = self.locals.len().max(other.locals.len());
        let mut locals = Vec::with_capacity(slots);
        for slot in 0..slots {
            let ours = self.locals.get(slot).unwrap_or(&top);
            let theirs = other.locals.get(slot).unwrap_or(&top);
            let merged = merge_types(resolver, ours, theirs)?.unwrap_or(VerificationType::Top);
            changed |= &merged != ours;
            locals.push(merged);
        }

        // The slot after a wide value that got merged away is no longer the second half
        for slot in 0..locals.len() {
            if locals[slot].width() == 2 && locals.get(slot + 1) != Some(&VerificationType::Top) {
                locals[slot] = VerificationType::Top;
                changed = true;
            }
        }

        self.stack = stack;
        self.locals = locals;
        Ok(changed)
    }

    /// Number of local slots used
    pub fn locals_size(&self) -> usize {
        self.locals.len()
    }

    /// Depth of the stack (counting wide values twice)
    pub fn stack_size(&self) -> usize {
        self.stack.offset_len().0
    }

    /// Resolve the frame into its serializable form
    pub fn into_serializable(
        &self,
        constants_pool: &mut ConstantsPool,
        offsets: &[usize],
    ) -> Result<SerializableFrame, Error> {
        let mut locals = vec![];
        let mut slot = 0;
        while let Some(typ) = self.locals.get(slot) {
            locals.push(typ.into_serializable(constants_pool, offsets)?);
            slot += typ.width();
        }
        while locals.last() == Some(&VerificationType::Top) {
            locals.pop();
        }

        let stack = self
            .stack
            .iter()
            .map(|(_, _, t)| t.into_serializable(constants_pool, offsets))
            .collect::<Result<_, _>>()?;

        Ok(SerializableFrame { locals, stack })
    }
}

/// Failure to merge two frames
#[derive(Debug)]
pub enum MergeError {
    Verifier(VerifierErrorKind),

    /// A class needed to find a common superclass could not be resolved
    Resolver(Error),
}

impl From<Error> for MergeError {
    fn from(err: Error) -> MergeError {
        MergeError::Resolver(err)
    }
}

/// Merge two types, returning `None` if they have nothing in common
fn merge_types(
    resolver: &dyn TypeResolver,
    first: &VType,
    second: &VType,
) -> Result<Option<VType>, Error> {
    use VerificationType::*;
    if first == second {
        return Ok(Some(first.clone()));
    }
    Ok(match (first, second) {
        (Null, Object(_)) => Some(second.clone()),
        (Object(_), Null) => Some(first.clone()),
        (Object(first), Object(second)) => Some(Object(assignable::common_supertype(
            resolver, first, second,
        )?)),
        _ => None,
    })
}

impl SerializableFrame {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option using [`Self::full_stack_map_frame`] only if none
    /// of the other stack map frame variants are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        match self.stack.len() {
            0 => {
                let this_locals_len = self.locals.len();
                let prev_locals_len = previous_frame.locals.len();

                if this_locals_len <= prev_locals_len {
                    let len_difference = prev_locals_len - this_locals_len;
                    let this_is_prefix_of_prev = previous_frame.locals.starts_with(&self.locals);
                    if len_difference < 4 && this_is_prefix_of_prev {
                        if len_difference == 0 {
                            return StackMapFrame::SameLocalsNoStack { offset_delta };
                        } else {
                            return StackMapFrame::ChopLocalsNoStack {
                                offset_delta,
                                chopped_k: len_difference as u8,
                            };
                        }
                    }
                } else if this_locals_len - prev_locals_len < 4
                    && self.locals.starts_with(&previous_frame.locals)
                {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: self.locals[prev_locals_len..].to_vec(),
                    };
                }
            }
            1 if self.locals == previous_frame.locals => {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: self.stack[0],
                }
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.clone(),
            locals: self.locals.clone(),
        }
    }
}

fn local_type(kind: LocalKind) -> VType {
    match kind {
        LocalKind::Int => VerificationType::Integer,
        LocalKind::Long => VerificationType::Long,
        LocalKind::Float => VerificationType::Float,
        LocalKind::Double => VerificationType::Double,
        LocalKind::Reference => VerificationType::Null,
    }
}

/// Does a value fit where a value of the given kind is expected?
fn matches_kind(typ: &VType, kind: LocalKind) -> bool {
    match kind {
        LocalKind::Reference => typ.is_reference(),
        _ => typ == &local_type(kind),
    }
}

/// Does a value fit where a value of the given field type is expected?
///
/// References are only checked to be initialized references: subtyping is left to the JVM.
fn matches_field_type(typ: &VType, field_type: &FieldType) -> bool {
    match field_type {
        FieldType::Ref(_) => typ.is_initialized_reference(),
        FieldType::Base(base) => typ == &VType::from(FieldType::Base(*base)),
    }
}

fn verify_instruction(
    frame: &mut VerifierFrame,
    insn: &Instruction,
    insn_index: usize,
    this_class: &BinaryName,
    instructions: &[Instruction],
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let Frame {
        ref mut stack,
        ref mut locals,
    } = frame;

    match insn {
        Nop => (),
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
                ConstantData::Integer(_) => Integer,
                ConstantData::Float(_) => Float,
                ConstantData::Long(_) => Long,
                ConstantData::Double(_) => Double,
                ConstantData::String(_) => VType::object(BinaryName::STRING),
                ConstantData::Class(_) => VType::object(BinaryName::CLASS),
                ConstantData::MethodType(_) => VType::object(BinaryName::METHODTYPE),
                ConstantData::MethodHandle(_) => VType::object(BinaryName::METHODHANDLE),
            });
        }

        Load(kind, slot) => {
            let typ = get_local(locals, *slot)?;
            if !matches_kind(&typ, *kind) {
                return Err(VerifierErrorKind::InvalidType);
            }
            stack.push(typ);
        }
        Store(kind, slot) => {
            let typ = pop_offset_vec(stack)?;
            if !matches_kind(&typ, *kind) {
                return Err(VerifierErrorKind::InvalidType);
            }
            update_local_type(locals, *slot, typ);
        }
        IInc(slot, _) => {
            get_local_expecting_type(locals, *slot, Integer)?;
        }

        ArrayLoad(kind) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            let array_type = pop_offset_vec(stack)?;
            let element = array_element(&array_type, *kind)?;
            stack.push(element);
        }
        ArrayStore(kind) => {
            let value = pop_offset_vec(stack)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            let array_type = pop_offset_vec(stack)?;
            array_element(&array_type, *kind)?;
            if !matches_kind(&value, kind.local_kind()) {
                return Err(VerifierErrorKind::InvalidType);
            }
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

        I2L | I2F | I2D | L2I | L2F | L2D | F2I | F2L | F2D | D2I | D2L | D2F => {
            let (from, to) = match insn {
                I2L => (Integer, Long),
                I2F => (Integer, Float),
                I2D => (Integer, Double),
                L2I => (Long, Integer),
                L2F => (Long, Float),
                L2D => (Long, Double),
                F2I => (Float, Integer),
                F2L => (Float, Long),
                F2D => (Float, Double),
                D2I => (Double, Integer),
                D2L => (Double, Long),
                _ => (Double, Float),
            };
            pop_offset_vec_expecting_type(stack, from)?;
            stack.push(to);
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

        If(_, _) => pop_offset_vec_expecting_type(stack, Integer)?,
        IfICmp(_, _) => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
        }
        IfACmp(_, _) => {
            pop_reference(stack)?;
            pop_reference(stack)?;
        }
        IfNull(_, _) => {
            pop_reference(stack)?;
        }
        Goto(_) => (),
        TableSwitch { .. } | LookupSwitch { .. } => {
            pop_offset_vec_expecting_type(stack, Integer)?
        }
        Return(None) => (),
        Return(Some(kind)) => {
            let typ = pop_offset_vec(stack)?;
            if !matches_kind(&typ, *kind) {
                return Err(VerifierErrorKind::InvalidType);
            }
        }
        AThrow => {
            pop_reference(stack)?;
        }

        GetStatic(field) => {
            stack.push(VType::from(field.descriptor.clone()));
        }
        PutStatic(field) => {
            let arg_type = pop_offset_vec(stack)?;
            if !matches_field_type(&arg_type, &field.descriptor) {
                return Err(VerifierErrorKind::InvalidType);
            }
        }
        GetField(field) => {
            pop_reference(stack)?;
            stack.push(VType::from(field.descriptor.clone()));
        }
        PutField(field) => {
            let arg_type = pop_offset_vec(stack)?;
            if !matches_field_type(&arg_type, &field.descriptor) {
                return Err(VerifierErrorKind::InvalidType);
            }
            // Fields of `this` can be set before the super constructor is called
            pop_reference(stack)?;
        }

        Invoke(invoke_type, method) => {
            let desc = &method.descriptor;

            // Check that all the arguments match
            for expected_arg_type in desc.parameters.iter().rev() {
                let found_arg_type = pop_offset_vec(stack)?;
                if !matches_field_type(&found_arg_type, expected_arg_type) {
                    log::debug!(
                        "Incompatible argument types: found {:?} but expected {:?} (for {})",
                        found_arg_type,
                        expected_arg_type,
                        method,
                    );
                    return Err(VerifierErrorKind::InvalidType);
                }
            }

            if let (InvokeType::Special, true) = (invoke_type, method.is_init()) {
                // Initialize
                let receiver = pop_offset_vec(stack)?;
                let initialized = match &receiver {
                    UninitializedThis => VType::object(this_class.clone()),
                    Uninitialized(new_index) => match instructions.get(*new_index) {
                        Some(New(class)) => VType::object(class.clone()),
                        _ => return Err(VerifierErrorKind::InvalidType),
                    },
                    _ => return Err(VerifierErrorKind::InvalidType),
                };
                replace_all(stack, locals, &receiver, &initialized);
                if desc.return_type.is_some() {
                    return Err(VerifierErrorKind::InvalidType);
                }
            } else {
                if invoke_type.has_receiver() {
                    pop_reference(stack)?;
                }
                if let Some(return_type) = &desc.return_type {
                    stack.push(VType::from(return_type.clone()));
                }
            }
        }

        InvokeDynamic(call_site) => {
            for expected_arg_type in call_site.descriptor.parameters.iter().rev() {
                let found_arg_type = pop_offset_vec(stack)?;
                if !matches_field_type(&found_arg_type, expected_arg_type) {
                    return Err(VerifierErrorKind::InvalidType);
                }
            }
            if let Some(return_type) = &call_site.descriptor.return_type {
                stack.push(VType::from(return_type.clone()));
            }
        }

        New(_) => {
            stack.push(Uninitialized(insn_index));
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
            for _ in 0..*dimensions {
                pop_offset_vec_expecting_type(stack, Integer)?;
            }
            stack.push(Object(ref_type.clone()));
        }
        ArrayLength => {
            match pop_offset_vec(stack)? {
                Null | Object(RefType::PrimitiveArray(_) | RefType::ObjectArray(_)) => (),
                _ => return Err(VerifierErrorKind::NotArrayType),
            }
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
    }

    Ok(())
}

/// Type of the elements of an array, checking it against the kind of array instruction
fn array_element(array_type: &VType, kind: ArrayKind) -> Result<VType, VerifierErrorKind> {
    use VerificationType::*;
    match (array_type, kind) {
        // Loading from a `null` array throws, so any type works
        (Null, ArrayKind::Reference) => Ok(Null),
        (Null, kind) => Ok(local_type(kind.local_kind())),
        (Object(RefType::ObjectArray(arr)), ArrayKind::Reference) => {
            Ok(match arr.additional_dimensions {
                0 => Object(RefType::Object(arr.element_type.clone())),
                n => Object(RefType::ObjectArray(ArrayType {
                    additional_dimensions: n - 1,
                    element_type: arr.element_type.clone(),
                })),
            })
        }
        (Object(RefType::PrimitiveArray(arr)), ArrayKind::Reference)
            if arr.additional_dimensions > 0 =>
        {
            Ok(Object(RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type,
            })))
        }
        (Object(RefType::PrimitiveArray(arr)), kind) if arr.additional_dimensions == 0 => {
            let matches = match (arr.element_type, kind) {
                (BaseType::Int, ArrayKind::Int)
                | (BaseType::Long, ArrayKind::Long)
                | (BaseType::Float, ArrayKind::Float)
                | (BaseType::Double, ArrayKind::Double)
                | (BaseType::Byte | BaseType::Boolean, ArrayKind::Byte)
                | (BaseType::Char, ArrayKind::Char)
                | (BaseType::Short, ArrayKind::Short) => true,
                _ => false,
            };
            if matches {
                Ok(local_type(kind.local_kind()))
            } else {
                Err(VerifierErrorKind::InvalidType)
            }
        }
        _ => Err(VerifierErrorKind::NotArrayType),
    }
}

/// Once `<init>` is called, every copy of the uninitialized value becomes initialized
fn replace_all(
    stack: &mut OffsetVec<VType>,
    locals: &mut [VType],
    original: &VType,
    updated: &VType,
) {
    let mut replaced: OffsetVec<VType> = std::mem::take(stack)
        .into_iter()
        .map(|(_, _, ty)| if &ty == original { updated.clone() } else { ty })
        .collect();
    std::mem::swap(stack, &mut replaced);

    for local in locals.iter_mut() {
        if local == original {
            *local = updated.clone();
        }
    }
}

fn get_local(locals: &[VType], slot: u16) -> Result<VType, VerifierErrorKind> {
    locals
        .get(slot as usize)
        .cloned()
        .ok_or(VerifierErrorKind::InvalidIndex(slot))
}

fn get_local_expecting_type(
    locals: &[VType],
    slot: u16,
    expected_type: VType,
) -> Result<(), VerifierErrorKind> {
    if get_local(locals, slot)? == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

/// Store into a local, invalidating any wide value that gets partially overwritten
fn update_local_type(locals: &mut Vec<VType>, slot: u16, new_type: VType) {
    let slot = slot as usize;
    let width = new_type.width();
    if locals.len() < slot + width {
        locals.resize(slot + width, VerificationType::Top);
    }
    if slot > 0 && locals[slot - 1].width() == 2 {
        locals[slot - 1] = VerificationType::Top;
    }
    locals[slot] = new_type;
    if width == 2 {
        locals[slot + 1] = VerificationType::Top;
    }
}

fn pop_offset_vec(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VType>,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_offset_vec_expecting_type(
    stack: &mut OffsetVec<VType>,
    expected_type: VType,
) -> Result<(), VerifierErrorKind> {
    if pop_offset_vec(stack)? == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

fn pop_reference(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ.is_reference() {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex};
    use crate::jvm::class_graph::CachingResolver;
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::MethodRef;
    use crate::jvm::{MethodDescriptor, Name, ParseDescriptor, UnqualifiedName};
    use VerificationType::*;

    fn new_frame<const N: usize, const M: usize>(
        locals: [VType; N],
        stack: [VType; M],
    ) -> VerifierFrame {
        Frame {
            locals: locals.to_vec(),
            stack: stack.into_iter().collect(),
        }
    }

    fn my_class() -> BinaryName {
        BinaryName::from_string(String::from("MyClass")).unwrap()
    }

    #[test]
    fn arithmetic() {
        let binops = [
            (Integer, vec![IAdd, ISub, IDiv, IMul, IRem, IAnd, IOr, IXor]),
            (Long, vec![LAdd, LSub, LDiv, LMul, LRem, LAnd, LOr, LXor]),
            (Float, vec![FAdd, FSub, FDiv, FMul, FRem]),
            (Double, vec![DAdd, DSub, DDiv, DMul, DRem]),
        ];

        for (good_typ, instructions) in binops {
            for instruction in instructions {
                // Try a bunch of different types
                for typ in [Integer, Long, Float, Double, Null, UninitializedThis] {
                    let mut frame_in = new_frame([], [typ.clone(), typ.clone()]);
                    let frame_out = new_frame([], [typ.clone()]);
                    let result = frame_in.verify_instruction(&instruction, 0, &my_class(), &[]);
                    if typ == good_typ {
                        assert!(result.is_ok(), "Verification of {:?}", instruction);
                        assert_eq!(frame_in, frame_out, "Output frame of {:?}", instruction);
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
                        frame_in.verify_instruction(&instruction, 0, &my_class(), &[]),
                        Err(VerifierErrorKind::EmptyStack),
                    ),
                    "Verification of {:?}",
                    instruction
                );
            }
        }
    }

    #[test]
    fn wide_stores_occupy_two_slots() {
        let mut frame = new_frame([Integer, Integer, Integer], [Long]);
        frame
            .verify_instruction(&Store(LocalKind::Long, 1), 0, &my_class(), &[])
            .unwrap();
        assert_eq!(frame.locals, vec![Integer, Long, Top]);

        // Overwriting the second half of the `long` kills it
        frame.stack.push(Float);
        frame
            .verify_instruction(&Store(LocalKind::Float, 2), 0, &my_class(), &[])
            .unwrap();
        assert_eq!(frame.locals, vec![Integer, Top, Float]);
        assert!(matches!(
            frame.verify_instruction(&Load(LocalKind::Long, 1), 0, &my_class(), &[]),
            Err(VerifierErrorKind::InvalidType)
        ));
    }

    #[test]
    fn constructor_initializes_all_copies() {
        let widget = BinaryName::from_string(String::from("Widget")).unwrap();
        let init = MethodRef {
            class: RefType::Object(widget.clone()),
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor::parse("()V").unwrap(),
            is_interface: false,
        };
        let instructions = vec![
            New(widget.clone()),
            Dup,
            Invoke(InvokeType::Special, init),
        ];
        let mut frame = new_frame([], []);
        for (index, insn) in instructions.iter().enumerate() {
            frame
                .verify_instruction(insn, index, &my_class(), &instructions)
                .unwrap();
        }
        assert_eq!(frame, new_frame([], [VType::object(widget)]));
    }

    #[test]
    fn merging_frames() {
        let resolver = CachingResolver::builtin();
        let mut frame = new_frame(
            [VType::object(BinaryName::INTEGER), Long, Top, Integer],
            [Null],
        );
        let other = new_frame(
            [VType::object(BinaryName::DOUBLE), Integer, Float],
            [VType::object(BinaryName::STRING)],
        );
        assert!(frame.merge(&other, &resolver).unwrap());
        assert_eq!(
            frame,
            new_frame(
                [VType::object(BinaryName::NUMBER), Top, Top, Top],
                [VType::object(BinaryName::STRING)],
            )
        );
        assert!(!frame.clone().merge(&frame, &resolver).unwrap());

        let deeper = new_frame([], [Integer, Integer]);
        assert!(matches!(
            frame.merge(&deeper, &resolver),
            Err(MergeError::Verifier(VerifierErrorKind::IncompatibleStacks))
        ));
    }

    #[test]
    fn serializing_drops_wide_halves_and_trailing_tops() {
        let mut constants = ConstantsPool::new();
        let frame = new_frame([Integer, Double, Top, Float, Top, Top], [Uninitialized(2)]);
        let serializable = frame.into_serializable(&mut constants, &[0, 3, 7]).unwrap();
        assert_eq!(serializable.locals, vec![Integer, Double, Float]);
        assert_eq!(serializable.stack, vec![Uninitialized(7)]);
    }

    #[test]
    fn compressed_stack_map_frames() {
        let object = |idx: u16| VerificationType::Object(ClassConstantIndex(ConstantIndex(idx)));
        let frame =
            |locals: Vec<SerializableVerificationType>, stack| SerializableFrame { locals, stack };
        let base = frame(vec![Integer, object(3)], vec![]);

        assert_eq!(
            base.stack_map_frame(4, &base),
            StackMapFrame::SameLocalsNoStack { offset_delta: 4 }
        );
        assert_eq!(
            frame(vec![Integer], vec![]).stack_map_frame(5, &base),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 5,
                chopped_k: 1
            }
        );
        assert_eq!(
            frame(vec![Integer, object(3), Long], vec![]).stack_map_frame(6, &base),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 6,
                locals: vec![Long]
            }
        );
        assert_eq!(
            frame(vec![Integer, object(3)], vec![Null]).stack_map_frame(7, &base),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 7,
                stack: Null
            }
        );
        assert_eq!(
            frame(vec![Float], vec![Null, Null]).stack_map_frame(8, &base),
            StackMapFrame::Full {
                offset_delta: 8,
                locals: vec![Float],
                stack: vec![Null, Null],
            }
        );
    }
}

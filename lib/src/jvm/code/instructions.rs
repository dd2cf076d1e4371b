//! JVM bytecode instructions with symbolic operands
//!
//! The representation is slightly different from the usual presentation to make it more
//! convenient to analyze and construct bytecode. For instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Families of instructions (the loads, stores, constants, branches) get abstracted into one
//!     instruction with a field. This helps with repetitive pattern matches and also simplifies
//!     tasks like inverting a branch condition.
//!
//!   - Constant pool indices are replaced by the constants they point to, so instructions can be
//!     moved between classes freely
//!
//!   - `jsr` and `ret` are omitted. Modern compilers don't emit them and they are not allowed in
//!     class files that use `StackMapTable`.

use crate::jvm::code::{ConstantData, DynamicCallSite, FieldRef, MethodRef};
use crate::jvm::{BaseType, BinaryName, FieldType, RefType};
use std::ops::Not;

/// JVM bytecode instruction
///
/// `L` is the representation of jump targets: an index into the instruction list once decoded,
/// or a label while the code is being generated.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction<L = usize> {
    Nop,
    AConstNull,
    IConst(i32), // covers `iconst_<n>`, `bipush`, `sipush`, and `ldc` of an integer
    LConst(i64), // covers `lconst_<n>` and `ldc2_w` of a long
    FConst(f32), // covers `fconst_<n>` and `ldc` of a float
    DConst(f64), // covers `dconst_<n>` and `ldc2_w` of a double
    Ldc(ConstantData), // strings, classes, method types, and method handles
    Load(LocalKind, u16), // covers `iload`, `iload_<n>`, `wide iload`, etc.
    Store(LocalKind, u16), // covers `istore`, `istore_<n>`, `wide istore`, etc.
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
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
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
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
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    If(OrdComparison, L), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, L), // covers `if_icmpeq`, `if_icmpne`, ... `if_icmple`
    IfACmp(EqComparison, L), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, L), // covers `ifnull`, `ifnonnull`
    Goto(L), // covers `goto` and `goto_w`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: L,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<L>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: L,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, L)>,
    },
    Return(Option<LocalKind>), // `None` is `return`
    AThrow,
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef),
    InvokeDynamic(DynamicCallSite),
    New(BinaryName),
    NewArray(BaseType),
    ANewArray(RefType),
    ArrayLength,
    CheckCast(RefType),
    InstanceOf(RefType),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(RefType, u8),
}

impl<L> Instruction<L> {
    /// Jump targets of the instruction (not including the fallthrough)
    pub fn jump_targets(&self) -> Vec<&L> {
        match self {
            Instruction::If(_, target)
            | Instruction::IfICmp(_, target)
            | Instruction::IfACmp(_, target)
            | Instruction::IfNull(_, target)
            | Instruction::Goto(target) => vec![target],
            Instruction::TableSwitch {
                default, targets, ..
            } => std::iter::once(default).chain(targets.iter()).collect(),
            Instruction::LookupSwitch { default, targets } => std::iter::once(default)
                .chain(targets.iter().map(|(_, target)| target))
                .collect(),
            _ => vec![],
        }
    }

    /// Can control pass to the next instruction?
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Goto(_)
                | Instruction::TableSwitch { .. }
                | Instruction::LookupSwitch { .. }
                | Instruction::Return(_)
                | Instruction::AThrow
        )
    }

    /// Is this a two-way conditional branch?
    pub fn is_conditional_jump(&self) -> bool {
        matches!(
            self,
            Instruction::If(..)
                | Instruction::IfICmp(..)
                | Instruction::IfACmp(..)
                | Instruction::IfNull(..)
        )
    }

    /// Replace the jump targets
    pub fn map_labels<L2>(&self, mut map_label: impl FnMut(&L) -> L2) -> Instruction<L2> {
        use Instruction::*;
        match self {
            Nop => Nop,
            AConstNull => AConstNull,
            IConst(i) => IConst(*i),
            LConst(l) => LConst(*l),
            FConst(f) => FConst(*f),
            DConst(d) => DConst(*d),
            Ldc(constant) => Ldc(constant.clone()),
            Load(kind, idx) => Load(*kind, *idx),
            Store(kind, idx) => Store(*kind, *idx),
            IInc(idx, by) => IInc(*idx, *by),
            ArrayLoad(kind) => ArrayLoad(*kind),
            ArrayStore(kind) => ArrayStore(*kind),
            Pop => Pop,
            Pop2 => Pop2,
            Dup => Dup,
            DupX1 => DupX1,
            DupX2 => DupX2,
            Dup2 => Dup2,
            Dup2X1 => Dup2X1,
            Dup2X2 => Dup2X2,
            Swap => Swap,
            IAdd => IAdd,
            LAdd => LAdd,
            FAdd => FAdd,
            DAdd => DAdd,
            ISub => ISub,
            LSub => LSub,
            FSub => FSub,
            DSub => DSub,
            IMul => IMul,
            LMul => LMul,
            FMul => FMul,
            DMul => DMul,
            IDiv => IDiv,
            LDiv => LDiv,
            FDiv => FDiv,
            DDiv => DDiv,
            IRem => IRem,
            LRem => LRem,
            FRem => FRem,
            DRem => DRem,
            INeg => INeg,
            LNeg => LNeg,
            FNeg => FNeg,
            DNeg => DNeg,
            ISh(s) => ISh(*s),
            LSh(s) => LSh(*s),
            IAnd => IAnd,
            LAnd => LAnd,
            IOr => IOr,
            LOr => LOr,
            IXor => IXor,
            LXor => LXor,
            I2L => I2L,
            I2F => I2F,
            I2D => I2D,
            L2I => L2I,
            L2F => L2F,
            L2D => L2D,
            F2I => F2I,
            F2L => F2L,
            F2D => F2D,
            D2I => D2I,
            D2L => D2L,
            D2F => D2F,
            I2B => I2B,
            I2C => I2C,
            I2S => I2S,
            LCmp => LCmp,
            FCmp(m) => FCmp(*m),
            DCmp(m) => DCmp(*m),
            If(op, target) => If(*op, map_label(target)),
            IfICmp(op, target) => IfICmp(*op, map_label(target)),
            IfACmp(op, target) => IfACmp(*op, map_label(target)),
            IfNull(op, target) => IfNull(*op, map_label(target)),
            Goto(target) => Goto(map_label(target)),
            TableSwitch {
                default,
                low,
                targets,
            } => TableSwitch {
                default: map_label(default),
                low: *low,
                targets: targets.iter().map(&mut map_label).collect(),
            },
            LookupSwitch { default, targets } => LookupSwitch {
                default: map_label(default),
                targets: targets
                    .iter()
                    .map(|(key, target)| (*key, map_label(target)))
                    .collect(),
            },
            Return(kind) => Return(*kind),
            AThrow => AThrow,
            GetStatic(field) => GetStatic(field.clone()),
            PutStatic(field) => PutStatic(field.clone()),
            GetField(field) => GetField(field.clone()),
            PutField(field) => PutField(field.clone()),
            Invoke(typ, method) => Invoke(*typ, method.clone()),
            InvokeDynamic(call_site) => InvokeDynamic(call_site.clone()),
            New(class) => New(class.clone()),
            NewArray(bt) => NewArray(*bt),
            ANewArray(class) => ANewArray(class.clone()),
            ArrayLength => ArrayLength,
            CheckCast(class) => CheckCast(class.clone()),
            InstanceOf(class) => InstanceOf(class.clone()),
            MonitorEnter => MonitorEnter,
            MonitorExit => MonitorExit,
            MultiANewArray(class, dims) => MultiANewArray(class.clone(), *dims),
        }
    }

    /// Mnemonic of the instruction (for error messages and logs)
    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;
        match self {
            Nop => "nop",
            AConstNull => "aconst_null",
            IConst(_) => "iconst",
            LConst(_) => "lconst",
            FConst(_) => "fconst",
            DConst(_) => "dconst",
            Ldc(_) => "ldc",
            Load(kind, _) => match kind {
                LocalKind::Int => "iload",
                LocalKind::Long => "lload",
                LocalKind::Float => "fload",
                LocalKind::Double => "dload",
                LocalKind::Reference => "aload",
            },
            Store(kind, _) => match kind {
                LocalKind::Int => "istore",
                LocalKind::Long => "lstore",
                LocalKind::Float => "fstore",
                LocalKind::Double => "dstore",
                LocalKind::Reference => "astore",
            },
            IInc(..) => "iinc",
            ArrayLoad(kind) => match kind {
                ArrayKind::Int => "iaload",
                ArrayKind::Long => "laload",
                ArrayKind::Float => "faload",
                ArrayKind::Double => "daload",
                ArrayKind::Reference => "aaload",
                ArrayKind::Byte => "baload",
                ArrayKind::Char => "caload",
                ArrayKind::Short => "saload",
            },
            ArrayStore(kind) => match kind {
                ArrayKind::Int => "iastore",
                ArrayKind::Long => "lastore",
                ArrayKind::Float => "fastore",
                ArrayKind::Double => "dastore",
                ArrayKind::Reference => "aastore",
                ArrayKind::Byte => "bastore",
                ArrayKind::Char => "castore",
                ArrayKind::Short => "sastore",
            },
            Pop => "pop",
            Pop2 => "pop2",
            Dup => "dup",
            DupX1 => "dup_x1",
            DupX2 => "dup_x2",
            Dup2 => "dup2",
            Dup2X1 => "dup2_x1",
            Dup2X2 => "dup2_x2",
            Swap => "swap",
            IAdd => "iadd",
            LAdd => "ladd",
            FAdd => "fadd",
            DAdd => "dadd",
            ISub => "isub",
            LSub => "lsub",
            FSub => "fsub",
            DSub => "dsub",
            IMul => "imul",
            LMul => "lmul",
            FMul => "fmul",
            DMul => "dmul",
            IDiv => "idiv",
            LDiv => "ldiv",
            FDiv => "fdiv",
            DDiv => "ddiv",
            IRem => "irem",
            LRem => "lrem",
            FRem => "frem",
            DRem => "drem",
            INeg => "ineg",
            LNeg => "lneg",
            FNeg => "fneg",
            DNeg => "dneg",
            ISh(shift) => match shift {
                ShiftType::Left => "ishl",
                ShiftType::ArithmeticRight => "ishr",
                ShiftType::LogicalRight => "iushr",
            },
            LSh(shift) => match shift {
                ShiftType::Left => "lshl",
                ShiftType::ArithmeticRight => "lshr",
                ShiftType::LogicalRight => "lushr",
            },
            IAnd => "iand",
            LAnd => "land",
            IOr => "ior",
            LOr => "lor",
            IXor => "ixor",
            LXor => "lxor",
            I2L => "i2l",
            I2F => "i2f",
            I2D => "i2d",
            L2I => "l2i",
            L2F => "l2f",
            L2D => "l2d",
            F2I => "f2i",
            F2L => "f2l",
            F2D => "f2d",
            D2I => "d2i",
            D2L => "d2l",
            D2F => "d2f",
            I2B => "i2b",
            I2C => "i2c",
            I2S => "i2s",
            LCmp => "lcmp",
            FCmp(CompareMode::L) => "fcmpl",
            FCmp(CompareMode::G) => "fcmpg",
            DCmp(CompareMode::L) => "dcmpl",
            DCmp(CompareMode::G) => "dcmpg",
            If(comparison, _) => match comparison {
                OrdComparison::EQ => "ifeq",
                OrdComparison::NE => "ifne",
                OrdComparison::LT => "iflt",
                OrdComparison::GE => "ifge",
                OrdComparison::GT => "ifgt",
                OrdComparison::LE => "ifle",
            },
            IfICmp(comparison, _) => match comparison {
                OrdComparison::EQ => "if_icmpeq",
                OrdComparison::NE => "if_icmpne",
                OrdComparison::LT => "if_icmplt",
                OrdComparison::GE => "if_icmpge",
                OrdComparison::GT => "if_icmpgt",
                OrdComparison::LE => "if_icmple",
            },
            IfACmp(EqComparison::EQ, _) => "if_acmpeq",
            IfACmp(EqComparison::NE, _) => "if_acmpne",
            IfNull(EqComparison::EQ, _) => "ifnull",
            IfNull(EqComparison::NE, _) => "ifnonnull",
            Goto(_) => "goto",
            TableSwitch { .. } => "tableswitch",
            LookupSwitch { .. } => "lookupswitch",
            Return(kind) => match kind {
                None => "return",
                Some(LocalKind::Int) => "ireturn",
                Some(LocalKind::Long) => "lreturn",
                Some(LocalKind::Float) => "freturn",
                Some(LocalKind::Double) => "dreturn",
                Some(LocalKind::Reference) => "areturn",
            },
            AThrow => "athrow",
            GetStatic(_) => "getstatic",
            PutStatic(_) => "putstatic",
            GetField(_) => "getfield",
            PutField(_) => "putfield",
            Invoke(InvokeType::Virtual, _) => "invokevirtual",
            Invoke(InvokeType::Special, _) => "invokespecial",
            Invoke(InvokeType::Static, _) => "invokestatic",
            Invoke(InvokeType::Interface, _) => "invokeinterface",
            InvokeDynamic(_) => "invokedynamic",
            New(_) => "new",
            NewArray(_) => "newarray",
            ANewArray(_) => "anewarray",
            ArrayLength => "arraylength",
            CheckCast(_) => "checkcast",
            InstanceOf(_) => "instanceof",
            MonitorEnter => "monitorenter",
            MonitorExit => "monitorexit",
            MultiANewArray(..) => "multianewarray",
        }
    }
}

/// Kinds of local variables (and of values returned from methods)
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LocalKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl LocalKind {
    /// Kind used to load/store/return a value of this type
    pub fn of<C>(field_type: &FieldType<C>) -> LocalKind {
        match field_type {
            FieldType::Base(BaseType::Long) => LocalKind::Long,
            FieldType::Base(BaseType::Float) => LocalKind::Float,
            FieldType::Base(BaseType::Double) => LocalKind::Double,
            FieldType::Base(_) => LocalKind::Int,
            FieldType::Ref(_) => LocalKind::Reference,
        }
    }

    /// Number of local slots (and stack units) taken up
    pub fn width(&self) -> usize {
        match self {
            LocalKind::Long | LocalKind::Double => 2,
            _ => 1,
        }
    }
}

/// Kinds of array element accesses (`baload` and `bastore` cover both `byte` and `boolean`)
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    Byte,
    Char,
    Short,
}

impl ArrayKind {
    /// Kind used to access elements of an array of this type
    pub fn of<C>(element_type: &FieldType<C>) -> ArrayKind {
        match element_type {
            FieldType::Base(BaseType::Int) => ArrayKind::Int,
            FieldType::Base(BaseType::Long) => ArrayKind::Long,
            FieldType::Base(BaseType::Float) => ArrayKind::Float,
            FieldType::Base(BaseType::Double) => ArrayKind::Double,
            FieldType::Base(BaseType::Byte) | FieldType::Base(BaseType::Boolean) => {
                ArrayKind::Byte
            }
            FieldType::Base(BaseType::Char) => ArrayKind::Char,
            FieldType::Base(BaseType::Short) => ArrayKind::Short,
            FieldType::Ref(_) => ArrayKind::Reference,
        }
    }

    /// Kind of value that gets loaded or stored
    pub fn local_kind(&self) -> LocalKind {
        match self {
            ArrayKind::Long => LocalKind::Long,
            ArrayKind::Float => LocalKind::Float,
            ArrayKind::Double => LocalKind::Double,
            ArrayKind::Reference => LocalKind::Reference,
            ArrayKind::Int | ArrayKind::Byte | ArrayKind::Char | ArrayKind::Short => {
                LocalKind::Int
            }
        }
    }
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not to a
/// `Constant::MethodRef`. The argument count of `invokeinterface` is derived from the descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeType {
    /// Does the call take a receiver argument?
    pub fn has_receiver(&self) -> bool {
        !matches!(self, InvokeType::Static)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use Instruction::*;

    #[test]
    fn inverted_comparisons() {
        for op in [
            OrdComparison::EQ,
            OrdComparison::GE,
            OrdComparison::GT,
            OrdComparison::LE,
            OrdComparison::LT,
            OrdComparison::NE,
        ] {
            assert_ne!(!op, op);
            assert_eq!(!!op, op);
        }
        assert_eq!(!EqComparison::EQ, EqComparison::NE);
    }

    #[test]
    fn switch_targets() {
        let insn: Instruction<usize> = Instruction::LookupSwitch {
            default: 9,
            targets: vec![(1, 4), (7, 6)],
        };
        assert_eq!(insn.jump_targets(), vec![&9, &4, &6]);
        assert!(!insn.falls_through());

        let relabelled = insn.map_labels(|target| target * 2);
        assert_eq!(relabelled.jump_targets(), vec![&18, &8, &12]);
    }

    #[test]
    fn mnemonics_name_the_opcode() {
        let code: Vec<Instruction> = vec![
            I2L,
            L2I,
            I2B,
            D2F,
            IAdd,
            DSub,
            LSh(ShiftType::LogicalRight),
            FCmp(CompareMode::G),
            ArrayLoad(ArrayKind::Char),
            ArrayStore(ArrayKind::Reference),
            IfICmp(OrdComparison::LE, 0),
            IfNull(EqComparison::NE, 0),
            Return(Some(LocalKind::Int)),
            Return(None),
        ];
        let mnemonics: Vec<&str> = code.iter().map(Instruction::mnemonic).collect();
        assert_eq!(
            mnemonics,
            [
                "i2l",
                "l2i",
                "i2b",
                "d2f",
                "iadd",
                "dsub",
                "lushr",
                "fcmpg",
                "caload",
                "aastore",
                "if_icmple",
                "ifnonnull",
                "ireturn",
                "return",
            ]
        );
    }
}

//! Encode instructions back into a code array
//!
//! Most of the work here is picking encodings: loads, stores, and constants get their shortest
//! form, and jumps that don't fit in a signed 16-bit relative offset get widened.
//!
//! ### Widening
//!
//! `goto` just turns into `goto_w`. Conditional jumps have no wide form, so they become an
//! inverted conditional jump over a `goto_w`:
//!
//! ```text,ignore,no_run
//!                           ifnot* L1
//!     if* L2                goto_w L2
//! L1: ...         =>    L1: ...
//!     ...                   ...
//! L2: ...               L2: ...
//! ```
//!
//! Widening a jump makes the code longer, which can push other jumps out of range (and shift switch
//! padding). Layout is recomputed until no new jump needs widening. This terminates since jumps are
//! only ever widened, never narrowed.

use crate::jvm::class_file::{
    ClassConstantIndex, ConstantIndex, ConstantsPool, ConstantsWriter, FieldRefConstantIndex,
    InvokeDynamicConstantIndex, MethodRefConstantIndex, Serialize,
};
use crate::jvm::code::{
    ArrayKind, CompareMode, ConstantData, EqComparison, Instruction, InvokeType, LocalKind,
    OrdComparison, ShiftType,
};
use crate::jvm::{BaseType, Error};
use std::ops::{RangeBounds, RangeInclusive};

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<isize> =
    RangeInclusive::new(i16::MIN as isize, i16::MAX as isize);

/// Largest code array the class file format allows
pub const MAX_CODE_LENGTH: usize = 65535;

/// Result of encoding a list of instructions
#[derive(Debug, Clone)]
pub struct EncodedCode {
    pub bytes: Vec<u8>,

    /// Byte offset of every instruction, followed by the length of the code array
    pub offsets: Vec<usize>,

    /// Indices of conditional jumps that were rewritten over a `goto_w`
    ///
    /// The instruction following such a jump becomes a jump target (of the inverted condition),
    /// so it needs a stack map frame.
    pub widened_conditionals: Vec<usize>,
}

/// Encode instructions whose jump targets are instruction indices
pub fn encode(
    instructions: &[Instruction],
    constants: &mut ConstantsPool,
) -> Result<EncodedCode, Error> {
    encode_with_jump_range(instructions, constants, &SIGNED_16BIT_JUMP_RANGE)
}

/// Same as [`encode`], with a configurable range for short jumps (only useful for tests)
pub fn encode_with_jump_range(
    instructions: &[Instruction],
    constants: &mut ConstantsPool,
    small_jump_range: &impl RangeBounds<isize>,
) -> Result<EncodedCode, Error> {
    let pool_indices = instructions
        .iter()
        .map(|insn| pool_index(insn, constants))
        .collect::<Result<Vec<_>, Error>>()?;

    let mut widened = vec![false; instructions.len()];
    let offsets = loop {
        let offsets = layout(instructions, &pool_indices, &widened);
        let mut changed = false;
        for (idx, insn) in instructions.iter().enumerate() {
            if widened[idx] {
                continue;
            }
            let target = match insn {
                Instruction::Goto(target)
                | Instruction::If(_, target)
                | Instruction::IfICmp(_, target)
                | Instruction::IfACmp(_, target)
                | Instruction::IfNull(_, target) => *target,
                _ => continue,
            };
            let distance = offset_of(&offsets, target)? as isize - offsets[idx] as isize;
            if !small_jump_range.contains(&distance) {
                widened[idx] = true;
                changed = true;
            }
        }
        if !changed {
            break offsets;
        }
    };

    let code_len = offsets[instructions.len()];
    if code_len > MAX_CODE_LENGTH {
        return Err(Error::MethodCodeOverflow(code_len));
    }

    let mut bytes = Vec::with_capacity(code_len);
    for (idx, insn) in instructions.iter().enumerate() {
        emit(
            insn,
            offsets[idx],
            pool_indices[idx],
            widened[idx],
            &offsets,
            &mut bytes,
        )?;
        debug_assert_eq!(bytes.len(), offsets[idx + 1]);
    }

    let widened_conditionals = instructions
        .iter()
        .enumerate()
        .filter(|(idx, insn)| widened[*idx] && insn.is_conditional_jump())
        .map(|(idx, _)| idx)
        .collect();

    Ok(EncodedCode {
        bytes,
        offsets,
        widened_conditionals,
    })
}

fn offset_of(offsets: &[usize], target: usize) -> Result<usize, Error> {
    // The last entry is the end of the code, which is not a valid target
    if target + 1 < offsets.len() {
        Ok(offsets[target])
    } else {
        Err(Error::InvalidJumpTarget(target))
    }
}

/// Does the integer fit the `iconst_*` instructions?
fn is_iconst(value: i32) -> bool {
    (-1..=5).contains(&value)
}

fn is_fconst(value: f32) -> bool {
    value.to_bits() == 0 || value == 1.0 || value == 2.0
}

fn is_dconst(value: f64) -> bool {
    value.to_bits() == 0 || value == 1.0
}

/// Constant pool entry the instruction needs, if any
fn pool_index(insn: &Instruction, constants: &mut ConstantsPool) -> Result<Option<u16>, Error> {
    use Instruction::*;

    let index: ConstantIndex = match insn {
        IConst(i) if !is_iconst(*i) && i16::try_from(*i).is_err() => {
            ConstantData::Integer(*i).constant_index(constants)?
        }
        LConst(l) if *l != 0 && *l != 1 => ConstantData::Long(*l).constant_index(constants)?,
        FConst(f) if !is_fconst(*f) => ConstantData::Float(*f).constant_index(constants)?,
        DConst(d) if !is_dconst(*d) => ConstantData::Double(*d).constant_index(constants)?,
        Ldc(data) => data.constant_index(constants)?,
        GetStatic(field) | PutStatic(field) | GetField(field) | PutField(field) => {
            let FieldRefConstantIndex(index) = field.constant_index(constants)?;
            index
        }
        Invoke(_, method) => {
            let MethodRefConstantIndex(index) = method.constant_index(constants)?;
            index
        }
        InvokeDynamic(call_site) => {
            let InvokeDynamicConstantIndex(index) = call_site.constant_index(constants)?;
            index
        }
        New(class) => {
            let ClassConstantIndex(index) = class.constant_index(constants)?;
            index
        }
        ANewArray(ref_type)
        | CheckCast(ref_type)
        | InstanceOf(ref_type)
        | MultiANewArray(ref_type, _) => {
            let ClassConstantIndex(index) = ref_type.constant_index(constants)?;
            index
        }
        _ => return Ok(None),
    };
    Ok(Some(index.0))
}

/// Padding after a switch opcode at the given offset
fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn local_width(slot: u16) -> usize {
    match slot {
        0..=3 => 1,
        4..=255 => 2,
        _ => 4,
    }
}

/// Encoded size of an instruction
fn size(insn: &Instruction, offset: usize, pool_index: Option<u16>, widened: bool) -> usize {
    use Instruction::*;

    let ldc_size = |index: Option<u16>| match index {
        Some(idx) if idx <= 255 => 2,
        _ => 3,
    };

    match insn {
        IConst(i) if is_iconst(*i) => 1,
        IConst(i) if i8::try_from(*i).is_ok() => 2,
        IConst(i) if i16::try_from(*i).is_ok() => 3,
        IConst(_) => ldc_size(pool_index),
        LConst(_) | DConst(_) if pool_index.is_some() => 3,
        FConst(_) if pool_index.is_some() => ldc_size(pool_index),
        Ldc(data) if data.is_wide() => 3,
        Ldc(_) => ldc_size(pool_index),
        Load(_, slot) | Store(_, slot) => local_width(*slot),
        IInc(slot, amount) if *slot <= 255 && i8::try_from(*amount).is_ok() => 3,
        IInc(_, _) => 6,
        Goto(_) if widened => 5,
        If(_, _) | IfICmp(_, _) | IfACmp(_, _) | IfNull(_, _) if widened => 8,
        Goto(_) | If(_, _) | IfICmp(_, _) | IfACmp(_, _) | IfNull(_, _) => 3,
        TableSwitch { targets, .. } => 1 + switch_padding(offset) + 12 + 4 * targets.len(),
        LookupSwitch { targets, .. } => 1 + switch_padding(offset) + 8 + 8 * targets.len(),
        GetStatic(_) | PutStatic(_) | GetField(_) | PutField(_) => 3,
        Invoke(InvokeType::Interface, _) => 5,
        Invoke(_, _) => 3,
        InvokeDynamic(_) => 5,
        New(_) | ANewArray(_) | CheckCast(_) | InstanceOf(_) => 3,
        NewArray(_) => 2,
        MultiANewArray(_, _) => 4,
        _ => 1,
    }
}

fn layout(
    instructions: &[Instruction],
    pool_indices: &[Option<u16>],
    widened: &[bool],
) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0;
    for (idx, insn) in instructions.iter().enumerate() {
        offsets.push(offset);
        offset += size(insn, offset, pool_indices[idx], widened[idx]);
    }
    offsets.push(offset);
    offsets
}

fn emit(
    insn: &Instruction,
    offset: usize,
    pool_index: Option<u16>,
    widened: bool,
    offsets: &[usize],
    bytes: &mut Vec<u8>,
) -> Result<(), Error> {
    use Instruction::*;

    let relative = |target: &usize| -> Result<i32, Error> {
        Ok((offset_of(offsets, *target)? as isize - offset as isize) as i32)
    };
    let pool = pool_index.unwrap_or(0);

    match insn {
        Nop => bytes.push(0x00),
        AConstNull => bytes.push(0x01),
        IConst(i) if is_iconst(*i) => bytes.push((0x03 + *i) as u8),
        IConst(i) if i8::try_from(*i).is_ok() => bytes.extend([0x10, *i as i8 as u8]),
        IConst(i) if i16::try_from(*i).is_ok() => {
            bytes.push(0x11);
            (*i as i16).serialize(bytes)?;
        }
        LConst(l) if pool_index.is_none() => bytes.push(0x09 + *l as u8),
        FConst(f) if pool_index.is_none() => bytes.push(0x0b + *f as u8),
        DConst(d) if pool_index.is_none() => bytes.push(0x0e + *d as u8),
        LConst(_) | DConst(_) | Ldc(ConstantData::Long(_) | ConstantData::Double(_)) => {
            bytes.push(0x14);
            pool.serialize(bytes)?;
        }
        IConst(_) | FConst(_) | Ldc(_) => {
            if pool <= 255 {
                bytes.extend([0x12, pool as u8]);
            } else {
                bytes.push(0x13);
                pool.serialize(bytes)?;
            }
        }
        Load(kind, slot) => emit_local(bytes, 0x15, 0x1a, kind, *slot)?,
        Store(kind, slot) => emit_local(bytes, 0x36, 0x3b, kind, *slot)?,
        IInc(slot, amount) => {
            if *slot <= 255 && i8::try_from(*amount).is_ok() {
                bytes.extend([0x84, *slot as u8, *amount as i8 as u8]);
            } else {
                bytes.extend([0xc4, 0x84]);
                slot.serialize(bytes)?;
                amount.serialize(bytes)?;
            }
        }
        ArrayLoad(kind) => bytes.push(0x2e + array_kind_code(kind)),
        ArrayStore(kind) => bytes.push(0x4f + array_kind_code(kind)),
        Pop => bytes.push(0x57),
        Pop2 => bytes.push(0x58),
        Dup => bytes.push(0x59),
        DupX1 => bytes.push(0x5a),
        DupX2 => bytes.push(0x5b),
        Dup2 => bytes.push(0x5c),
        Dup2X1 => bytes.push(0x5d),
        Dup2X2 => bytes.push(0x5e),
        Swap => bytes.push(0x5f),
        IAdd => bytes.push(0x60),
        LAdd => bytes.push(0x61),
        FAdd => bytes.push(0x62),
        DAdd => bytes.push(0x63),
        ISub => bytes.push(0x64),
        LSub => bytes.push(0x65),
        FSub => bytes.push(0x66),
        DSub => bytes.push(0x67),
        IMul => bytes.push(0x68),
        LMul => bytes.push(0x69),
        FMul => bytes.push(0x6a),
        DMul => bytes.push(0x6b),
        IDiv => bytes.push(0x6c),
        LDiv => bytes.push(0x6d),
        FDiv => bytes.push(0x6e),
        DDiv => bytes.push(0x6f),
        IRem => bytes.push(0x70),
        LRem => bytes.push(0x71),
        FRem => bytes.push(0x72),
        DRem => bytes.push(0x73),
        INeg => bytes.push(0x74),
        LNeg => bytes.push(0x75),
        FNeg => bytes.push(0x76),
        DNeg => bytes.push(0x77),
        ISh(shift) => bytes.push(0x78 + shift_code(shift)),
        LSh(shift) => bytes.push(0x79 + shift_code(shift)),
        IAnd => bytes.push(0x7e),
        LAnd => bytes.push(0x7f),
        IOr => bytes.push(0x80),
        LOr => bytes.push(0x81),
        IXor => bytes.push(0x82),
        LXor => bytes.push(0x83),
        I2L => bytes.push(0x85),
        I2F => bytes.push(0x86),
        I2D => bytes.push(0x87),
        L2I => bytes.push(0x88),
        L2F => bytes.push(0x89),
        L2D => bytes.push(0x8a),
        F2I => bytes.push(0x8b),
        F2L => bytes.push(0x8c),
        F2D => bytes.push(0x8d),
        D2I => bytes.push(0x8e),
        D2L => bytes.push(0x8f),
        D2F => bytes.push(0x90),
        I2B => bytes.push(0x91),
        I2C => bytes.push(0x92),
        I2S => bytes.push(0x93),
        LCmp => bytes.push(0x94),
        FCmp(CompareMode::L) => bytes.push(0x95),
        FCmp(CompareMode::G) => bytes.push(0x96),
        DCmp(CompareMode::L) => bytes.push(0x97),
        DCmp(CompareMode::G) => bytes.push(0x98),
        Goto(target) if widened => {
            bytes.push(0xc8);
            relative(target)?.serialize(bytes)?;
        }
        Goto(target) => {
            bytes.push(0xa7);
            (relative(target)? as i16).serialize(bytes)?;
        }
        If(_, target) | IfICmp(_, target) | IfACmp(_, target) | IfNull(_, target) => {
            if widened {
                // inverted condition jumps over the `goto_w`
                bytes.push(conditional_opcode(&insn.map_labels(|_| ()), true));
                8i16.serialize(bytes)?;
                bytes.push(0xc8);
                (relative(target)? - 3).serialize(bytes)?;
            } else {
                bytes.push(conditional_opcode(&insn.map_labels(|_| ()), false));
                (relative(target)? as i16).serialize(bytes)?;
            }
        }
        TableSwitch {
            default,
            low,
            targets,
        } => {
            bytes.push(0xaa);
            bytes.extend(std::iter::repeat(0).take(switch_padding(offset)));
            relative(default)?.serialize(bytes)?;
            low.serialize(bytes)?;
            (*low + targets.len() as i32 - 1).serialize(bytes)?;
            for target in targets {
                relative(target)?.serialize(bytes)?;
            }
        }
        LookupSwitch { default, targets } => {
            bytes.push(0xab);
            bytes.extend(std::iter::repeat(0).take(switch_padding(offset)));
            relative(default)?.serialize(bytes)?;
            (targets.len() as i32).serialize(bytes)?;
            let mut sorted: Vec<&(i32, usize)> = targets.iter().collect();
            sorted.sort_by_key(|(key, _)| *key);
            for (key, target) in sorted {
                key.serialize(bytes)?;
                relative(target)?.serialize(bytes)?;
            }
        }
        Return(None) => bytes.push(0xb1),
        Return(Some(kind)) => bytes.push(0xac + local_kind_code(kind)),
        AThrow => bytes.push(0xbf),
        GetStatic(_) => emit_indexed(bytes, 0xb2, pool)?,
        PutStatic(_) => emit_indexed(bytes, 0xb3, pool)?,
        GetField(_) => emit_indexed(bytes, 0xb4, pool)?,
        PutField(_) => emit_indexed(bytes, 0xb5, pool)?,
        Invoke(InvokeType::Virtual, _) => emit_indexed(bytes, 0xb6, pool)?,
        Invoke(InvokeType::Special, _) => emit_indexed(bytes, 0xb7, pool)?,
        Invoke(InvokeType::Static, _) => emit_indexed(bytes, 0xb8, pool)?,
        Invoke(InvokeType::Interface, method) => {
            emit_indexed(bytes, 0xb9, pool)?;
            let count = method.descriptor.parameter_length(true);
            bytes.extend([count as u8, 0]);
        }
        InvokeDynamic(_) => {
            emit_indexed(bytes, 0xba, pool)?;
            0u16.serialize(bytes)?;
        }
        New(_) => emit_indexed(bytes, 0xbb, pool)?,
        NewArray(base_type) => bytes.extend([0xbc, atype(base_type)]),
        ANewArray(_) => emit_indexed(bytes, 0xbd, pool)?,
        ArrayLength => bytes.push(0xbe),
        CheckCast(_) => emit_indexed(bytes, 0xc0, pool)?,
        InstanceOf(_) => emit_indexed(bytes, 0xc1, pool)?,
        MonitorEnter => bytes.push(0xc2),
        MonitorExit => bytes.push(0xc3),
        MultiANewArray(_, dimensions) => {
            emit_indexed(bytes, 0xc5, pool)?;
            bytes.push(*dimensions);
        }
    }
    Ok(())
}

fn emit_indexed(bytes: &mut Vec<u8>, opcode: u8, index: u16) -> std::io::Result<()> {
    bytes.push(opcode);
    index.serialize(bytes)
}

/// Emit a load or store (`general` is the opcode with an explicit index, `short` is the first of
/// the `*load_0` style opcodes)
fn emit_local(
    bytes: &mut Vec<u8>,
    general: u8,
    short: u8,
    kind: &LocalKind,
    slot: u16,
) -> std::io::Result<()> {
    let kind_code = local_kind_code(kind);
    match slot {
        0..=3 => bytes.push(short + kind_code * 4 + slot as u8),
        4..=255 => bytes.extend([general + kind_code, slot as u8]),
        _ => {
            bytes.extend([0xc4, general + kind_code]);
            slot.serialize(bytes)?;
        }
    }
    Ok(())
}

fn local_kind_code(kind: &LocalKind) -> u8 {
    match kind {
        LocalKind::Int => 0,
        LocalKind::Long => 1,
        LocalKind::Float => 2,
        LocalKind::Double => 3,
        LocalKind::Reference => 4,
    }
}

fn array_kind_code(kind: &ArrayKind) -> u8 {
    match kind {
        ArrayKind::Int => 0,
        ArrayKind::Long => 1,
        ArrayKind::Float => 2,
        ArrayKind::Double => 3,
        ArrayKind::Reference => 4,
        ArrayKind::Byte => 5,
        ArrayKind::Char => 6,
        ArrayKind::Short => 7,
    }
}

fn shift_code(shift: &ShiftType) -> u8 {
    match shift {
        ShiftType::Left => 0,
        ShiftType::ArithmeticRight => 2,
        ShiftType::LogicalRight => 4,
    }
}

fn atype(base_type: &BaseType) -> u8 {
    match base_type {
        BaseType::Boolean => 4,
        BaseType::Char => 5,
        BaseType::Float => 6,
        BaseType::Double => 7,
        BaseType::Byte => 8,
        BaseType::Short => 9,
        BaseType::Int => 10,
        BaseType::Long => 11,
    }
}

/// Opcode of a conditional jump (optionally with the condition inverted)
fn conditional_opcode(insn: &Instruction<()>, invert: bool) -> u8 {
    let ord = |comparison: &OrdComparison| {
        let comparison = if invert { !*comparison } else { *comparison };
        match comparison {
            OrdComparison::EQ => 0,
            OrdComparison::NE => 1,
            OrdComparison::LT => 2,
            OrdComparison::GE => 3,
            OrdComparison::GT => 4,
            OrdComparison::LE => 5,
        }
    };
    let eq = |comparison: &EqComparison| {
        let comparison = if invert { !*comparison } else { *comparison };
        match comparison {
            EqComparison::EQ => 0,
            EqComparison::NE => 1,
        }
    };
    match insn {
        Instruction::If(comparison, _) => 0x99 + ord(comparison),
        Instruction::IfICmp(comparison, _) => 0x9f + ord(comparison),
        Instruction::IfACmp(comparison, _) => 0xa5 + eq(comparison),
        Instruction::IfNull(comparison, _) => 0xc6 + eq(comparison),
        _ => 0x00,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::decode;

    fn encode_plain(instructions: &[Instruction]) -> EncodedCode {
        encode(instructions, &mut ConstantsPool::new()).unwrap()
    }

    #[test]
    fn shortest_constants() {
        use Instruction::*;

        let encoded = encode_plain(&[
            IConst(-1),
            IConst(100),
            IConst(-300),
            IConst(70000),
            LConst(1),
            FConst(2.0),
            DConst(0.0),
            Pop2,
            Pop2,
            Pop,
            Pop,
            Pop,
            Pop,
            Pop,
            Return(None),
        ]);
        assert_eq!(&encoded.bytes[..9], &[0x02, 0x10, 100, 0x11, 0xfe, 0xd4, 0x12, 1, 0x0a]);
        assert_eq!(encoded.bytes[9], 0x0d);
        assert_eq!(encoded.bytes[10], 0x0e);
    }

    #[test]
    fn negative_zero_is_not_fconst() {
        let mut constants = ConstantsPool::new();
        let encoded = encode(
            &[Instruction::FConst(-0.0), Instruction::Return(Some(LocalKind::Float))],
            &mut constants,
        )
        .unwrap();
        assert_eq!(encoded.bytes[0], 0x12);
    }

    #[test]
    fn shortest_locals() {
        use Instruction::*;

        let encoded = encode_plain(&[
            Load(LocalKind::Reference, 0),
            Store(LocalKind::Reference, 7),
            Load(LocalKind::Long, 300),
            Store(LocalKind::Long, 2),
            IInc(4, -1),
            IInc(4, 200),
            Return(None),
        ]);
        assert_eq!(
            encoded.bytes,
            vec![
                0x2a, 0x3a, 7, 0xc4, 0x16, 0x01, 0x2c, 0x41, 0x84, 4, 0xff, 0xc4, 0x84, 0, 4, 0,
                200, 0xb1,
            ]
        );
        assert_eq!(encoded.offsets, vec![0, 1, 3, 7, 8, 11, 17, 18]);
    }

    #[test]
    fn widens_jumps_to_fixpoint() {
        use Instruction::*;

        // With a tiny jump range, both the conditional and the `goto` need widening
        let instructions = vec![
            Load(LocalKind::Int, 0),
            If(OrdComparison::EQ, 5),
            Nop,
            Nop,
            Goto(6),
            Nop,
            Return(None),
        ];
        let mut constants = ConstantsPool::new();
        let encoded = encode_with_jump_range(&instructions, &mut constants, &(-3..=3)).unwrap();
        assert_eq!(encoded.widened_conditionals, vec![1]);
        assert_eq!(encoded.offsets, vec![0, 1, 9, 10, 11, 16, 17, 18]);
        assert_eq!(&encoded.bytes[1..9], &[0x9a, 0, 8, 0xc8, 0, 0, 0, 12]);

        // Decoding sees the expanded form
        let decoded = decode(&encoded.bytes, &constants).unwrap();
        assert_eq!(decoded.instructions[1], If(OrdComparison::NE, 3));
        assert_eq!(decoded.instructions[2], Goto(6));
    }

    #[test]
    fn switch_padding_follows_offset() {
        use Instruction::*;

        let instructions = vec![
            Load(LocalKind::Int, 0),
            LookupSwitch {
                default: 2,
                targets: vec![(10, 3), (-5, 2)],
            },
            Return(None),
            Return(None),
        ];
        let encoded = encode_plain(&instructions);
        // opcode at 1, two bytes of padding, then default/npairs/pairs
        assert_eq!(encoded.offsets[2], 1 + 1 + 2 + 8 + 16);
        let decoded = decode(&encoded.bytes, &ConstantsPool::new()).unwrap();
        assert_eq!(
            decoded.instructions[1],
            LookupSwitch {
                default: 2,
                targets: vec![(-5, 2), (10, 3)],
            }
        );
    }
}

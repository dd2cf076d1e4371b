use crate::jvm::class_file::{
    ClassConstantIndex, ConstantIndex, ConstantsPool, ConstantsReader, Deserialize,
    FieldRefConstantIndex, InvokeDynamicConstantIndex, MethodRefConstantIndex,
};
use crate::jvm::code::{
    ArrayKind, CompareMode, ConstantData, DynamicCallSite, EqComparison, FieldRef, Instruction,
    InvokeType, LocalKind, MethodRef, OrdComparison, ShiftType,
};
use crate::jvm::{BaseType, BinaryName, Error, RefType};
use std::io::Cursor;

/// Instructions decoded from a code array
#[derive(Debug, Clone)]
pub struct DecodedCode {
    pub instructions: Vec<Instruction>,

    /// Byte offset of every instruction, followed by the length of the code array
    pub offsets: Vec<usize>,
}

impl DecodedCode {
    /// Find the instruction index starting at a byte offset (the length of the code maps to the
    /// number of instructions)
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }
}

/// Decode a code array into symbolic instructions
///
/// Jump targets are turned from relative byte offsets into instruction indices.
pub fn decode(code: &[u8], constants: &ConstantsPool) -> Result<DecodedCode, Error> {
    let mut cursor = Cursor::new(code);
    let mut offsets = vec![];
    let mut with_offsets: Vec<Instruction<usize>> = vec![];

    while (cursor.position() as usize) < code.len() {
        let offset = cursor.position() as usize;
        offsets.push(offset);
        let insn = decode_instruction(&mut cursor, offset, code.len(), constants)?;
        with_offsets.push(insn);
    }
    offsets.push(code.len());

    let mut bad_target = None;
    let instructions = with_offsets
        .iter()
        .map(|insn| {
            insn.map_labels(|target| match offsets.binary_search(target) {
                Ok(idx) if idx + 1 < offsets.len() => idx,
                _ => {
                    bad_target.get_or_insert(*target);
                    0
                }
            })
        })
        .collect();
    if let Some(target) = bad_target {
        return Err(Error::InvalidJumpTarget(target));
    }

    Ok(DecodedCode {
        instructions,
        offsets,
    })
}

fn truncated(offset: usize) -> Error {
    Error::MalformedCode {
        offset,
        message: String::from("truncated instruction"),
    }
}

/// Decode one instruction, leaving jump targets as absolute byte offsets
fn decode_instruction(
    cursor: &mut Cursor<&[u8]>,
    offset: usize,
    code_len: usize,
    constants: &ConstantsPool,
) -> Result<Instruction<usize>, Error> {
    use Instruction::*;

    let u8_operand = |cursor: &mut Cursor<&[u8]>| -> Result<u8, Error> {
        u8::deserialize(cursor).map_err(|_| truncated(offset))
    };
    let u16_operand = |cursor: &mut Cursor<&[u8]>| -> Result<u16, Error> {
        u16::deserialize(cursor).map_err(|_| truncated(offset))
    };
    let i32_operand = |cursor: &mut Cursor<&[u8]>| -> Result<i32, Error> {
        i32::deserialize(cursor).map_err(|_| truncated(offset))
    };
    let target = |relative: i64| -> Result<usize, Error> {
        let absolute = offset as i64 + relative;
        if absolute < 0 || absolute >= code_len as i64 {
            Err(Error::InvalidJumpTarget(absolute.max(0) as usize))
        } else {
            Ok(absolute as usize)
        }
    };

    let opcode = u8_operand(cursor)?;
    let insn = match opcode {
        0x00 => Nop,
        0x01 => AConstNull,
        0x02..=0x08 => IConst(opcode as i32 - 0x03),
        0x09..=0x0a => LConst(opcode as i64 - 0x09),
        0x0b..=0x0d => FConst((opcode - 0x0b) as f32),
        0x0e..=0x0f => DConst((opcode - 0x0e) as f64),
        0x10 => IConst(u8_operand(cursor)? as i8 as i32),
        0x11 => IConst(u16_operand(cursor)? as i16 as i32),
        0x12 => ldc(ConstantIndex(u8_operand(cursor)? as u16), constants)?,
        0x13 | 0x14 => ldc(ConstantIndex(u16_operand(cursor)?), constants)?,
        0x15..=0x19 => Load(local_kind(opcode - 0x15), u8_operand(cursor)? as u16),
        0x1a..=0x2d => Load(local_kind((opcode - 0x1a) / 4), ((opcode - 0x1a) % 4) as u16),
        0x2e..=0x35 => ArrayLoad(array_kind(opcode - 0x2e)),
        0x36..=0x3a => Store(local_kind(opcode - 0x36), u8_operand(cursor)? as u16),
        0x3b..=0x4e => Store(local_kind((opcode - 0x3b) / 4), ((opcode - 0x3b) % 4) as u16),
        0x4f..=0x56 => ArrayStore(array_kind(opcode - 0x4f)),
        0x57 => Pop,
        0x58 => Pop2,
        0x59 => Dup,
        0x5a => DupX1,
        0x5b => DupX2,
        0x5c => Dup2,
        0x5d => Dup2X1,
        0x5e => Dup2X2,
        0x5f => Swap,
        0x60 => IAdd,
        0x61 => LAdd,
        0x62 => FAdd,
        0x63 => DAdd,
        0x64 => ISub,
        0x65 => LSub,
        0x66 => FSub,
        0x67 => DSub,
        0x68 => IMul,
        0x69 => LMul,
        0x6a => FMul,
        0x6b => DMul,
        0x6c => IDiv,
        0x6d => LDiv,
        0x6e => FDiv,
        0x6f => DDiv,
        0x70 => IRem,
        0x71 => LRem,
        0x72 => FRem,
        0x73 => DRem,
        0x74 => INeg,
        0x75 => LNeg,
        0x76 => FNeg,
        0x77 => DNeg,
        0x78 => ISh(ShiftType::Left),
        0x79 => LSh(ShiftType::Left),
        0x7a => ISh(ShiftType::ArithmeticRight),
        0x7b => LSh(ShiftType::ArithmeticRight),
        0x7c => ISh(ShiftType::LogicalRight),
        0x7d => LSh(ShiftType::LogicalRight),
        0x7e => IAnd,
        0x7f => LAnd,
        0x80 => IOr,
        0x81 => LOr,
        0x82 => IXor,
        0x83 => LXor,
        0x84 => IInc(u8_operand(cursor)? as u16, u8_operand(cursor)? as i8 as i16),
        0x85 => I2L,
        0x86 => I2F,
        0x87 => I2D,
        0x88 => L2I,
        0x89 => L2F,
        0x8a => L2D,
        0x8b => F2I,
        0x8c => F2L,
        0x8d => F2D,
        0x8e => D2I,
        0x8f => D2L,
        0x90 => D2F,
        0x91 => I2B,
        0x92 => I2C,
        0x93 => I2S,
        0x94 => LCmp,
        0x95 => FCmp(CompareMode::L),
        0x96 => FCmp(CompareMode::G),
        0x97 => DCmp(CompareMode::L),
        0x98 => DCmp(CompareMode::G),
        0x99..=0x9e => If(
            ord_comparison(opcode - 0x99),
            target(u16_operand(cursor)? as i16 as i64)?,
        ),
        0x9f..=0xa4 => IfICmp(
            ord_comparison(opcode - 0x9f),
            target(u16_operand(cursor)? as i16 as i64)?,
        ),
        0xa5 => IfACmp(EqComparison::EQ, target(u16_operand(cursor)? as i16 as i64)?),
        0xa6 => IfACmp(EqComparison::NE, target(u16_operand(cursor)? as i16 as i64)?),
        0xa7 => Goto(target(u16_operand(cursor)? as i16 as i64)?),
        0xaa => {
            skip_switch_padding(cursor, offset)?;
            let default = target(i32_operand(cursor)? as i64)?;
            let low = i32_operand(cursor)?;
            let high = i32_operand(cursor)?;
            if high < low {
                return Err(Error::MalformedCode {
                    offset,
                    message: format!("tableswitch with low {} above high {}", low, high),
                });
            }
            let targets = (low..=high)
                .map(|_| target(i32_operand(cursor)? as i64))
                .collect::<Result<Vec<_>, Error>>()?;
            TableSwitch {
                default,
                low,
                targets,
            }
        }
        0xab => {
            skip_switch_padding(cursor, offset)?;
            let default = target(i32_operand(cursor)? as i64)?;
            let npairs = i32_operand(cursor)?;
            let targets = (0..npairs.max(0))
                .map(|_| {
                    let key = i32_operand(cursor)?;
                    Ok((key, target(i32_operand(cursor)? as i64)?))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            LookupSwitch { default, targets }
        }
        0xac => Return(Some(LocalKind::Int)),
        0xad => Return(Some(LocalKind::Long)),
        0xae => Return(Some(LocalKind::Float)),
        0xaf => Return(Some(LocalKind::Double)),
        0xb0 => Return(Some(LocalKind::Reference)),
        0xb1 => Return(None),
        0xb2..=0xb5 => {
            let index = FieldRefConstantIndex(ConstantIndex(u16_operand(cursor)?));
            let field = FieldRef::from_constant_index(index, constants)?;
            match opcode {
                0xb2 => GetStatic(field),
                0xb3 => PutStatic(field),
                0xb4 => GetField(field),
                _ => PutField(field),
            }
        }
        0xb6..=0xb9 => {
            let index = MethodRefConstantIndex(ConstantIndex(u16_operand(cursor)?));
            let method = MethodRef::from_constant_index(index, constants)?;
            let invoke_type = match opcode {
                0xb6 => InvokeType::Virtual,
                0xb7 => InvokeType::Special,
                0xb8 => InvokeType::Static,
                _ => {
                    // count and a zero byte
                    u8_operand(cursor)?;
                    u8_operand(cursor)?;
                    InvokeType::Interface
                }
            };
            Invoke(invoke_type, method)
        }
        0xba => {
            let index = InvokeDynamicConstantIndex(ConstantIndex(u16_operand(cursor)?));
            u16_operand(cursor)?;
            InvokeDynamic(DynamicCallSite::from_constant_index(index, constants)?)
        }
        0xbb => New(class_operand::<BinaryName>(cursor, offset, constants)?),
        0xbc => NewArray(match u8_operand(cursor)? {
            4 => BaseType::Boolean,
            5 => BaseType::Char,
            6 => BaseType::Float,
            7 => BaseType::Double,
            8 => BaseType::Byte,
            9 => BaseType::Short,
            10 => BaseType::Int,
            11 => BaseType::Long,
            atype => {
                return Err(Error::MalformedCode {
                    offset,
                    message: format!("bad newarray type {}", atype),
                })
            }
        }),
        0xbd => ANewArray(class_operand::<RefType>(cursor, offset, constants)?),
        0xbe => ArrayLength,
        0xbf => AThrow,
        0xc0 => CheckCast(class_operand::<RefType>(cursor, offset, constants)?),
        0xc1 => InstanceOf(class_operand::<RefType>(cursor, offset, constants)?),
        0xc2 => MonitorEnter,
        0xc3 => MonitorExit,
        0xc4 => {
            let modified = u8_operand(cursor)?;
            let index = u16_operand(cursor)?;
            match modified {
                0x15..=0x19 => Load(local_kind(modified - 0x15), index),
                0x36..=0x3a => Store(local_kind(modified - 0x36), index),
                0x84 => IInc(index, u16_operand(cursor)? as i16),
                _ => return Err(Error::UnsupportedOpcode { opcode: modified, offset }),
            }
        }
        0xc5 => {
            let class = class_operand::<RefType>(cursor, offset, constants)?;
            MultiANewArray(class, u8_operand(cursor)?)
        }
        0xc6 => IfNull(EqComparison::EQ, target(u16_operand(cursor)? as i16 as i64)?),
        0xc7 => IfNull(EqComparison::NE, target(u16_operand(cursor)? as i16 as i64)?),
        0xc8 => Goto(target(i32_operand(cursor)? as i64)?),

        // `jsr`, `ret`, `jsr_w`, and reserved opcodes
        _ => return Err(Error::UnsupportedOpcode { opcode, offset }),
    };
    Ok(insn)
}

fn class_operand<C: ConstantsReader<ClassConstantIndex>>(
    cursor: &mut Cursor<&[u8]>,
    offset: usize,
    constants: &ConstantsPool,
) -> Result<C, Error> {
    let index = u16::deserialize(cursor).map_err(|_| truncated(offset))?;
    C::from_constant_index(ClassConstantIndex(ConstantIndex(index)), constants)
}

/// Numeric constants are normalized into the constant instructions
fn ldc(index: ConstantIndex, constants: &ConstantsPool) -> Result<Instruction<usize>, Error> {
    Ok(match ConstantData::from_constant_index(index, constants)? {
        ConstantData::Integer(i) => Instruction::IConst(i),
        ConstantData::Long(l) => Instruction::LConst(l),
        ConstantData::Float(f) => Instruction::FConst(f),
        ConstantData::Double(d) => Instruction::DConst(d),
        other => Instruction::Ldc(other),
    })
}

/// `tableswitch` and `lookupswitch` operands start at a multiple of four bytes
fn skip_switch_padding(cursor: &mut Cursor<&[u8]>, offset: usize) -> Result<(), Error> {
    while cursor.position() % 4 != 0 {
        u8::deserialize(cursor).map_err(|_| truncated(offset))?;
    }
    Ok(())
}

fn local_kind(n: u8) -> LocalKind {
    match n {
        0 => LocalKind::Int,
        1 => LocalKind::Long,
        2 => LocalKind::Float,
        3 => LocalKind::Double,
        _ => LocalKind::Reference,
    }
}

fn array_kind(n: u8) -> ArrayKind {
    match n {
        0 => ArrayKind::Int,
        1 => ArrayKind::Long,
        2 => ArrayKind::Float,
        3 => ArrayKind::Double,
        4 => ArrayKind::Reference,
        5 => ArrayKind::Byte,
        6 => ArrayKind::Char,
        _ => ArrayKind::Short,
    }
}

fn ord_comparison(n: u8) -> OrdComparison {
    match n {
        0 => OrdComparison::EQ,
        1 => OrdComparison::NE,
        2 => OrdComparison::LT,
        3 => OrdComparison::GE,
        4 => OrdComparison::GT,
        _ => OrdComparison::LE,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_straight_line() {
        // iconst_2; bipush -3; iadd; istore 5; wide iinc 300 1000; ireturn
        let code = [
            0x05, 0x10, 0xfd, 0x60, 0x36, 0x05, 0xc4, 0x84, 0x01, 0x2c, 0x03, 0xe8, 0xac,
        ];
        let decoded = decode(&code, &ConstantsPool::new()).unwrap();
        assert_eq!(
            decoded.instructions,
            vec![
                Instruction::IConst(2),
                Instruction::IConst(-3),
                Instruction::IAdd,
                Instruction::Store(LocalKind::Int, 5),
                Instruction::IInc(300, 1000),
                Instruction::Return(Some(LocalKind::Int)),
            ]
        );
        assert_eq!(decoded.offsets, vec![0, 1, 3, 4, 6, 12, 13]);
    }

    #[test]
    fn jumps_become_indices() {
        // 0: iload_0; 1: ifeq +7 (-> 8); 4: iconst_1; 5: goto +4 (-> 9); 8: iconst_0; 9: ireturn
        let code = [0x1a, 0x99, 0x00, 0x07, 0x04, 0xa7, 0x00, 0x04, 0x03, 0xac];
        let decoded = decode(&code, &ConstantsPool::new()).unwrap();
        assert_eq!(decoded.instructions[1], Instruction::If(OrdComparison::EQ, 4));
        assert_eq!(decoded.instructions[3], Instruction::Goto(5));
        assert_eq!(decoded.index_of(9), Some(5));
    }

    #[test]
    fn tableswitch_padding() {
        // 0: iload_0; 1: tableswitch (pad 2) default -> 24, 0..=1 -> 24, 25
        let mut code = vec![0x1a, 0xaa, 0x00, 0x00];
        for operand in [23i32, 0, 1, 23, 24] {
            code.extend_from_slice(&operand.to_be_bytes());
        }
        code.push(0xb1);
        code.push(0xb1);
        let decoded = decode(&code, &ConstantsPool::new()).unwrap();
        assert_eq!(
            decoded.instructions[1],
            Instruction::TableSwitch {
                default: 2,
                low: 0,
                targets: vec![2, 3],
            }
        );
    }

    #[test]
    fn rejects_subroutines_and_bad_targets() {
        assert!(matches!(
            decode(&[0xa8, 0x00, 0x03, 0xb1], &ConstantsPool::new()),
            Err(Error::UnsupportedOpcode { opcode: 0xa8, .. })
        ));
        assert!(matches!(
            decode(&[0xa7, 0x00, 0x02, 0xb1], &ConstantsPool::new()),
            Err(Error::InvalidJumpTarget(2))
        ));
    }
}

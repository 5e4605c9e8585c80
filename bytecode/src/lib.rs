mod op;
mod instruction;
mod builder;
mod decoder;
mod header;

pub use op::Op;
pub use instruction::Instruction;
pub use builder::{BytecodeBuilder, Label, MethodBuilder};
pub use decoder::{BytecodeDecoder, DecodeError, SWITCH_CASE_SIZE, switch_case};
pub use header::{
    EXC_ENTRY_SIZE, ExceptionEntry, FUNC_HEADER_SIZE, FunctionHeader, LineEntry,
    exception_table, line_for_offset,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .collect::<Result<_, _>>()
            .expect("well-formed bytecode")
    }

    #[test]
    fn shortest_encodings() {
        let mut b = BytecodeBuilder::new();
        b.emit(Instruction::PushInt { value: 0 });
        b.emit(Instruction::PushInt { value: 1 });
        b.emit(Instruction::PushInt { value: -5 });
        b.emit(Instruction::PushInt { value: 100_000 });
        b.emit(Instruction::GetLcl { lcl: 3 });
        b.emit(Instruction::GetLcl { lcl: 300 });

        assert_eq!(
            b.as_bytes(),
            &[
                Op::Push0 as u8,
                Op::Push1 as u8,
                Op::PushInt8 as u8,
                0xFB,
                Op::PushInt as u8,
                0xA0,
                0x86,
                0x01,
                0x00,
                Op::GetLclN3 as u8,
                Op::GetLcl2 as u8,
                0x2C,
                0x01,
            ]
        );
    }

    #[test]
    fn round_trip_calls() {
        let mut b = BytecodeBuilder::new();
        b.emit(Instruction::Call { argc: 2, ofs: 0xDEAD_BEEF });
        b.emit(Instruction::CallProp { argc: 1, prop: 77 });
        b.emit(Instruction::ObjCallProp { argc: 0, obj: 12, prop: 5 });
        b.emit(Instruction::CallPropLcl1 { argc: 3, lcl: 4, prop: 9 });
        b.emit(Instruction::ExpInherit { argc: 1, prop: 8, obj: 40 });
        b.emit(Instruction::Builtin { argc: 1, set: 2, index: 7 });
        b.emit(Instruction::Builtin { argc: 0, set: 9, index: 3 });
        b.emit(Instruction::Builtin { argc: 0, set: 1, index: 400 });
        b.emit(Instruction::New { argc: 2, meta: 3, transient: true });
        b.emit(Instruction::New { argc: 1, meta: 300, transient: false });
        b.emit(Instruction::RetVal);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::Call { argc: 2, ofs: 0xDEAD_BEEF },
            Instruction::CallProp { argc: 1, prop: 77 },
            Instruction::ObjCallProp { argc: 0, obj: 12, prop: 5 },
            Instruction::CallPropLcl1 { argc: 3, lcl: 4, prop: 9 },
            Instruction::ExpInherit { argc: 1, prop: 8, obj: 40 },
            Instruction::Builtin { argc: 1, set: 2, index: 7 },
            Instruction::Builtin { argc: 0, set: 9, index: 3 },
            Instruction::Builtin { argc: 0, set: 1, index: 400 },
            Instruction::New { argc: 2, meta: 3, transient: true },
            Instruction::New { argc: 1, meta: 300, transient: false },
            Instruction::RetVal,
        ]);
    }

    #[test]
    fn forward_jump() {
        let mut b = BytecodeBuilder::new();
        b.emit(Instruction::PushInt { value: 0 });
        let label = b.jump(Op::Jf);
        b.emit(Instruction::PushInt { value: 1 });
        b.bind(label);
        b.emit(Instruction::Ret);

        // PUSH_0 @0, JF @1 (offset field @2), PUSH_1 @4, RET @5
        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushInt { value: 0 },
            Instruction::Jf { target: 5 },
            Instruction::PushInt { value: 1 },
            Instruction::Ret,
        ]);
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        b.emit(Instruction::Nop);
        let loop_top = b.current_offset();
        b.emit(Instruction::GetLcl { lcl: 0 });
        b.jump_back(Op::Jt, loop_top);

        let bytes = b.into_bytes();
        assert_eq!(decode_all(&bytes), vec![
            Instruction::Nop,
            Instruction::GetLcl { lcl: 0 },
            Instruction::Jt { target: 1 },
        ]);
        // offset is relative to the offset field at 3
        assert_eq!(i16::from_le_bytes([bytes[3], bytes[4]]), -2);
    }

    #[test]
    fn switch_table() {
        let mut b = BytecodeBuilder::new();
        let (cases, default) = b.switch(&[[7, 1, 0, 0, 0], [7, 2, 0, 0, 0]]);
        let mut targets = Vec::new();
        for case in cases {
            targets.push(b.current_offset() as u32);
            b.bind(case);
            b.emit(Instruction::RetTrue);
        }
        let default_target = b.current_offset() as u32;
        b.bind(default);
        b.emit(Instruction::RetNil);

        let bytes = b.into_bytes();
        let mut d = BytecodeDecoder::new(&bytes);
        let Ok(Instruction::Switch { count, table, default }) = d.decode_next() else {
            panic!("expected switch");
        };
        assert_eq!(count, 2);
        assert_eq!(default, default_target);
        assert_eq!(switch_case(&bytes, table, 0), Some(([7, 1, 0, 0, 0], targets[0])));
        assert_eq!(switch_case(&bytes, table, 1), Some(([7, 2, 0, 0, 0], targets[1])));
        assert_eq!(switch_case(&bytes, table, 2), None);
    }

    #[test]
    fn inline_string_is_skipped() {
        let mut b = BytecodeBuilder::new();
        b.push_str_inline(b"hi!");
        b.emit(Instruction::SayVal);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushStrI { start: 3, len: 3 },
            Instruction::SayVal,
        ]);
    }

    #[test]
    fn unknown_and_truncated() {
        assert_eq!(
            BytecodeDecoder::new(&[0x00]).decode_next(),
            Err(DecodeError::UnknownOpcode { byte: 0, at: 0 })
        );
        assert_eq!(
            BytecodeDecoder::new(&[Op::PushInt as u8, 1, 2]).decode_next(),
            Err(DecodeError::Truncated { at: 1 })
        );
        let results: Vec<_> = BytecodeDecoder::new(&[Op::Nop as u8, 0xFF, Op::Nop as u8]).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn varargc_override() {
        let call = Instruction::CallProp { argc: 0, prop: 3 };
        assert_eq!(call.with_argc(5), Some(Instruction::CallProp { argc: 5, prop: 3 }));
        assert_eq!(Instruction::Add.with_argc(5), None);
        assert_eq!(Instruction::New { argc: 1, meta: 0, transient: false }.argc(), Some(1));
        assert!(Op::Builtin2.has_argc());
        assert!(!Op::GetProp.has_argc());
    }

    #[test]
    fn method_header_and_tables() {
        let mut m = MethodBuilder::new(1, 2).optional(1);
        m.line(10);
        let start = m.current_offset();
        m.emit(Instruction::GetArg { arg: 0 });
        m.emit(Instruction::Throw);
        let end = m.current_offset() - 1;
        m.line(12);
        let handler = m.current_offset();
        m.emit(Instruction::RetVal);
        m.catch(start, end, 0, handler);
        let bytes = m.finish();

        let header = FunctionHeader::parse(&bytes, 0).expect("header");
        assert_eq!(header.min_argc, 1);
        assert_eq!(header.locals, 2);
        assert!(header.accepts(1) && header.accepts(2));
        assert!(!header.accepts(0) && !header.accepts(3));

        let table = exception_table(&bytes, 0, &header).expect("table");
        assert_eq!(table, vec![ExceptionEntry { start: 10, end: 11, class: 0, handler: 12 }]);
        assert!(table[0].covers(11) && !table[0].covers(12));

        assert_eq!(line_for_offset(&bytes, 0, &header, 10), Some(10));
        assert_eq!(line_for_offset(&bytes, 0, &header, 12), Some(12));
        assert_eq!(line_for_offset(&bytes, 0, &header, 5), None);
    }

    #[test]
    fn varargs_header() {
        let m = MethodBuilder::new(2, 0).varargs();
        let bytes = m.finish();
        let header = FunctionHeader::parse(&bytes, 0).expect("header");
        assert!(header.varargs);
        assert_eq!(header.min_argc, 2);
        assert!(header.accepts(9));
        assert!(!header.accepts(1));
        assert_eq!(bytes[0], 0x82);
    }

    #[test]
    fn display_instructions() {
        assert_eq!(Instruction::CallProp { argc: 2, prop: 5 }.to_string(), "CALLPROP (2) &5");
        assert_eq!(Instruction::Jmp { target: 0x20 }.to_string(), "JMP ->0x20");
        assert_eq!(Instruction::AddILcl { lcl: 1, value: -3 }.to_string(), "ADDILCL l1 -3");
        assert_eq!(Op::BuiltinA.to_string(), "BUILTIN_A");
    }

    #[test]
    fn opcode_byte_round_trip() {
        for byte in 0..=u8::MAX {
            if let Ok(op) = Op::try_from(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Op::try_from(0x53), Err(0x53));
    }
}

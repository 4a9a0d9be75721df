use super::*;
use crate::types::encoding::Encode;
use crate::utils::test_utils::utils::*;
use crate::virtual_machine::isa::Instruction::*;
use crate::virtual_machine::program::{CodeElement, DataItem, Program, Section};
use crate::virtual_machine::validator::assemble;

/// Runs `code` followed by `HALT` and returns the stack top.
fn eval(code: impl IntoIterator<Item = CodeElement>) -> u16 {
    let mut code: Vec<_> = code.into_iter().collect();
    code.push(op(Halt));
    run(&code_only(code))
}

/// Returns true if `instr`, after `operands` are pushed, jumps.
fn branches(operands: &[u16], instr: Instruction) -> bool {
    let mut code: Vec<_> = operands.iter().map(|v| push(*v)).collect();
    code.extend([
        push_label("taken"),
        op(instr),
        push(0),
        op(Halt),
        label("taken"),
        push(1),
        op(Halt),
    ]);
    run(&code_only(code)) == 1
}

fn greeting_program() -> Program {
    Program::new()
        .with_section(Section::new("data", 0x0000).with("greeting", DataItem::Ascii("Hi".into())))
        .with_code([
            push(0),
            push_label("main"),
            op(Call),
            op(Halt),
            label("main"),
            push(0x2A),
            op(Ret),
        ])
}

// ==========================
// Loading
// ==========================

#[test]
fn load_places_sections_and_code() {
    let vm = load(&greeting_program());
    assert_eq!(vm.read_u16(0), u16::from_le_bytes(*b"Hi"));
    assert_eq!(vm.entry_point(), 2);
    assert_eq!(vm.read_u16(2) & 0xFF, Push.opcode() as u16);
    assert_eq!(vm.registers(), Registers::at_entry(2));
    assert!(!vm.is_halted());
    assert_eq!(vm.steps(), 0);
}

#[test]
fn load_without_sections_starts_at_zero() {
    let vm = load(&code_only([op(Halt)]));
    assert_eq!(vm.entry_point(), 0);
    let regs = vm.registers();
    assert_eq!((regs.ip, regs.sp, regs.fp, regs.fs), (0, 0xFFFB, 0xFFFB, 0));
}

#[test]
fn bad_magic_is_rejected() {
    let mut image = assemble(&greeting_program()).unwrap();
    image[..4].copy_from_slice(b"XXXX");
    assert!(matches!(
        VM::load(&image),
        Err(VMError::InvalidFormat { .. })
    ));
}

#[test]
fn failed_load_writes_nothing() {
    let mut vm = load(&greeting_program());
    vm.step().unwrap();
    let memory_before = vm.memory_dump(0, 64);
    let regs_before = vm.registers();

    let other = Program::new()
        .with_section(Section::new("d", 0).with("x", DataItem::Words(vec![0xDEAD, 0xBEEF])))
        .with_code([op(Nop), op(Halt)]);
    let mut bad_magic = assemble(&other).unwrap();
    bad_magic[0] = b'W';
    assert!(matches!(
        vm.load_image(&bad_magic),
        Err(VMError::InvalidFormat { .. })
    ));

    let mut truncated = assemble(&other).unwrap();
    truncated.truncate(truncated.len() - 1);
    assert!(matches!(
        vm.load_image(&truncated),
        Err(VMError::InvalidFormat { .. })
    ));

    assert_eq!(vm.memory_dump(0, 64), memory_before);
    assert_eq!(vm.registers(), regs_before);
    assert_eq!(vm.steps(), 1);
}

#[test]
fn reload_resets_machine() {
    let mut vm = load(&code_only([push(3), op(Halt)]));
    assert_eq!(vm.run().unwrap(), 3);
    assert!(vm.is_halted());

    let image = assemble(&code_only([push(4), op(Halt)])).unwrap();
    vm.load_image(&image).unwrap();
    assert!(!vm.is_halted());
    assert_eq!(vm.steps(), 0);
    assert_eq!(vm.run().unwrap(), 4);
}

// ==========================
// Execution loop
// ==========================

#[test]
fn call_returns_literal() {
    assert_eq!(run(&greeting_program()), 0x2A);
}

#[test]
fn step_reports_halt_and_stays_halted() {
    let mut vm = load(&code_only([push(1), op(Halt)]));
    assert!(!vm.step().unwrap());
    assert!(vm.step().unwrap());
    assert!(vm.is_halted());
    assert_eq!(vm.steps(), 2);

    let regs = vm.registers();
    assert!(vm.step().unwrap());
    assert_eq!(vm.registers(), regs);
    assert_eq!(vm.steps(), 2);
    assert_eq!(vm.run().unwrap(), 1);
}

#[test]
fn unimplemented_opcode_is_fatal() {
    let header = Header {
        sections: vec![],
        code_pointer: Header::len_for(0) as u16,
        code_length: 2,
    };
    let mut image = header.to_bytes();
    image.extend_from_slice(&[Nop.opcode(), 0xEE]);

    let mut vm = VM::load(&image).unwrap();
    assert!(!vm.step().unwrap());
    assert_eq!(
        vm.step(),
        Err(VMError::UnimplementedOpcode {
            opcode: 0xEE,
            address: 1
        })
    );

    let mut vm = VM::load(&image).unwrap();
    assert!(matches!(
        vm.run(),
        Err(VMError::UnimplementedOpcode { opcode: 0xEE, .. })
    ));
}

#[test]
fn step_limit_stops_infinite_loop() {
    let program = code_only([label("spin"), push_label("spin"), op(Jmp)]);
    let mut vm = load_with(
        &program,
        VmConfig {
            max_steps: Some(10),
            ..VmConfig::default()
        },
    );
    assert_eq!(vm.run(), Err(VMError::StepLimitExceeded { limit: 10 }));
    assert_eq!(vm.steps(), 10);
}

#[test]
fn step_limit_allows_halt_on_last_step() {
    let mut vm = load_with(
        &code_only([push(1), op(Halt)]),
        VmConfig {
            max_steps: Some(2),
            ..VmConfig::default()
        },
    );
    assert_eq!(vm.run().unwrap(), 1);
}

// ==========================
// Calling convention
// ==========================

#[test]
fn call_frame_layout_and_restore() {
    let mut vm = load(&code_only([
        push(0),
        push_label("main"),
        op(Call),
        op(Halt),
        label("main"),
        push(0x2A),
        op(Ret),
    ]));
    let before = vm.registers();

    vm.step().unwrap();
    vm.step().unwrap();
    vm.step().unwrap();
    let in_callee = vm.registers();
    assert_eq!(in_callee.ip, 8);
    assert_eq!(in_callee.fs, 0);
    assert_eq!(in_callee.sp, in_callee.fp);
    // return address is just past CALL, saved fs is the caller's empty frame
    assert_eq!(vm.read_u16(in_callee.fp), 7);
    assert_eq!(vm.read_u16(in_callee.fp.wrapping_add(2)), 0);

    vm.step().unwrap();
    vm.step().unwrap();
    let after = vm.registers();
    assert_eq!(after.ip, 7);
    assert_eq!(after.fp, before.fp);
    assert_eq!(after.fs, before.fs + 2);
    assert_eq!(after.sp, before.sp - 2);
    assert_eq!(vm.top(), 0x2A);
}

#[test]
fn n_argument_sum() {
    let program = code_only([
        push(0x7777),
        push(10),
        push(20),
        push(30),
        push(40),
        push(4),
        push_label("sum"),
        op(Call),
        op(Halt),
        label("sum"),
        CodeElement::op_arg(Cps, 2u16),
        CodeElement::op_arg(Cps, 4u16),
        op(Add),
        CodeElement::op_arg(Cps, 6u16),
        op(Add),
        CodeElement::op_arg(Cps, 8u16),
        op(Add),
        op(Ret),
    ]);
    let mut vm = load(&program);
    assert_eq!(vm.run().unwrap(), 100);

    let regs = vm.registers();
    assert_eq!(regs.fp, 0xFFFB);
    assert_eq!(regs.fs, 4);
    assert_eq!(vm.read_u16(regs.sp.wrapping_add(2)), 0x7777);
}

#[test]
fn arguments_keep_their_order() {
    // arg0 sits at fp - 2, arg1 at fp - 4; the callee computes arg1 - arg0
    let program = code_only([
        push(3),
        push(10),
        push(2),
        push_label("diff"),
        op(Call),
        op(Halt),
        label("diff"),
        CodeElement::op_arg(Cps, 2u16),
        CodeElement::op_arg(Cps, 4u16),
        op(Sub),
        op(Ret),
    ]);
    assert_eq!(run(&program), 7);
}

#[test]
fn nested_calls_restore_outer_frame() {
    let program = code_only([
        push(5),
        push(1),
        push_label("outer"),
        op(Call),
        op(Halt),
        label("outer"),
        CodeElement::op_arg(Cps, 2u16),
        push(7),
        push(2),
        push_label("inner"),
        op(Call),
        push(100),
        op(Add),
        op(Ret),
        label("inner"),
        CodeElement::op_arg(Cps, 2u16),
        CodeElement::op_arg(Cps, 4u16),
        op(Add),
        op(Ret),
    ]);
    let mut vm = load(&program);
    for _ in 0..4 {
        vm.step().unwrap();
    }
    let outer = vm.registers();
    assert_eq!(outer.ip, 11);
    assert_eq!((outer.fp, outer.fs), (0xFFF7, 2));

    // CPS, PUSH, PUSH, PUSH, CALL, then CPS, CPS, ADD, RET in inner
    for _ in 0..9 {
        vm.step().unwrap();
    }
    let back = vm.registers();
    assert_eq!(back.ip, 24);
    assert_eq!(back.fp, outer.fp);
    assert_eq!(back.fs, outer.fs + 2);
    assert_eq!(back.sp, outer.sp - 2);
    assert_eq!(vm.top(), 12);

    assert_eq!(vm.run().unwrap(), 112);
    assert_eq!(vm.registers().fp, 0xFFFB);
}

// ==========================
// Arithmetic / bitwise
// ==========================

#[test]
fn arithmetic_pops_a_then_b() {
    assert_eq!(eval([push(2), push(3), op(Add)]), 5);
    assert_eq!(eval([push(7), push(3), op(Sub)]), 3u16.wrapping_sub(7));
    assert_eq!(eval([push(3), push(7), op(Sub)]), 4);
    assert_eq!(eval([push(6), push(7), op(Mul)]), 42);
}

#[test]
fn arithmetic_wraps() {
    assert_eq!(eval([push(0xFFFF), push(2), op(Add)]), 1);
    assert_eq!(eval([push(0x100), push(0x100), op(Mul)]), 0);
    assert_eq!(eval([push(0xFFFF), op(Inc)]), 0);
    assert_eq!(eval([push(0), op(Dec)]), 0xFFFF);
}

#[test]
fn inc_dec_do_not_pop() {
    let mut vm = load(&code_only([push(1), op(Inc), op(Inc), op(Dec), op(Halt)]));
    vm.run().unwrap();
    assert_eq!(vm.top(), 2);
    assert_eq!(vm.registers().fs, 2);
}

#[test]
fn shifts_pop_amount_first() {
    assert_eq!(eval([push(1), push(4), op(Lsf)]), 16);
    assert_eq!(eval([push(0x80), push(3), op(Rsf)]), 0x10);
    assert_eq!(eval([push(0x8001), push(1), op(Lsf)]), 2);
    assert_eq!(eval([push(0xFFFF), push(16), op(Lsf)]), 0);
    assert_eq!(eval([push(0xFFFF), push(40), op(Rsf)]), 0);
}

#[test]
fn bitwise_ops() {
    assert_eq!(eval([push(0b1100), push(0b1010), op(And)]), 0b1000);
    assert_eq!(eval([push(0b1100), push(0b1010), op(Or)]), 0b1110);
    assert_eq!(eval([push(0b1100), push(0b1010), op(Xor)]), 0b0110);
    assert_eq!(eval([push(0x00FF), op(Not)]), 0xFF00);
}

// ==========================
// Stack / register pushes and stores
// ==========================

fn with_data(code: impl IntoIterator<Item = CodeElement>) -> Program {
    let mut code: Vec<_> = code.into_iter().collect();
    code.push(op(Halt));
    Program::new()
        .with_section(
            Section::new("vars", 0x0100)
                .with("word", DataItem::Words(vec![0xBEEF]))
                .with("slot", DataItem::Reserve(2)),
        )
        .with_code(code)
}

#[test]
fn pip_and_psp() {
    assert_eq!(eval([op(Pip)]), 1);
    assert_eq!(eval([op(Psp)]), 0xFFFB);
}

#[test]
fn pms_reads_memory() {
    assert_eq!(run(&with_data([push_data("word"), op(Pms)])), 0xBEEF);
}

#[test]
fn pmf_copies_into_frame() {
    // offset 0xFFFE is fp - 2 once wrapped
    let program = with_data([
        push(0xFFFE),
        push_data("word"),
        op(Pmf),
        CodeElement::op_arg(Cps, 2u16),
    ]);
    let mut vm = load(&program);
    assert_eq!(vm.run().unwrap(), 0xBEEF);
    assert_eq!(vm.read_u16(0xFFF9), 0xBEEF);
}

#[test]
fn smv_cps_and_cpos_address_the_frame() {
    assert_eq!(
        eval([
            push(0x55),
            CodeElement::op_arg(Smv, 6u16),
            CodeElement::op_arg(Cps, 6u16)
        ]),
        0x55
    );
    assert_eq!(
        eval([
            push(0x66),
            CodeElement::op_arg(Smv, 8u16),
            push(8),
            op(Cpos)
        ]),
        0x66
    );
}

#[test]
fn msm_stores_top_without_popping_it() {
    let mut vm = load(&with_data([push(0xAB), push_data("slot"), op(Msm)]));
    assert_eq!(vm.run().unwrap(), 0xAB);
    assert_eq!(vm.read_u16(0x0102), 0xAB);
    assert_eq!(vm.registers().fs, 2);
}

// ==========================
// Register adjustment
// ==========================

#[test]
fn isp_dsp_move_sp_only() {
    let mut vm = load(&code_only([push(1), push(2), op(Isp), op(Halt)]));
    assert_eq!(vm.run().unwrap(), 1);
    assert_eq!(vm.registers().fs, 4);

    assert_eq!(eval([push(1), push(2), op(Isp), op(Dsp)]), 2);
}

#[test]
fn ssp_sets_sp() {
    let mut vm = load(&code_only([push(0x1000), op(Ssp), op(Halt)]));
    vm.run().unwrap();
    assert_eq!(vm.registers().sp, 0x1000);
}

#[test]
fn iip_skips_two_bytes() {
    assert_eq!(
        run(&code_only([op(Iip), op(Halt), op(Halt), push(9), op(Halt)])),
        9
    );
}

#[test]
fn dip_steps_back_two_bytes() {
    let mut vm = load(&code_only([
        push(0x77),
        push_label("end"),
        op(Jmp),
        op(Halt),
        label("end"),
        op(Dip),
    ]));
    assert_eq!(vm.run().unwrap(), 0x77);
    assert_eq!(vm.steps(), 5);
}

// ==========================
// Control
// ==========================

#[test]
fn nop_and_dbg_leave_state_alone() {
    let mut vm = load(&code_only([push(4), op(Nop), op(Dbg), op(Halt)]));
    vm.step().unwrap();
    let regs = vm.registers();
    vm.step().unwrap();
    vm.step().unwrap();
    let after = vm.registers();
    assert_eq!(after.ip, regs.ip + 2);
    assert_eq!((after.sp, after.fp, after.fs), (regs.sp, regs.fp, regs.fs));
    assert_eq!(vm.run().unwrap(), 4);
}

// ==========================
// Branching
// ==========================

#[test]
fn unconditional_jump() {
    assert!(branches(&[], Jmp));
}

#[test]
fn zero_tests() {
    assert!(branches(&[5], Jnz));
    assert!(!branches(&[0], Jnz));
    assert!(branches(&[0], Jz));
    assert!(!branches(&[5], Jz));
}

#[test]
fn comparisons_test_against_cmp() {
    // operands are pushed test first, then cmp
    assert!(branches(&[3, 3], Jeq));
    assert!(!branches(&[3, 4], Jeq));
    assert!(branches(&[3, 4], Jne));
    assert!(branches(&[5, 3], Jgt));
    assert!(!branches(&[3, 5], Jgt));
    assert!(branches(&[3, 5], Jlt));
    assert!(!branches(&[5, 3], Jlt));
    assert!(branches(&[5, 5], Jge));
    assert!(!branches(&[4, 5], Jge));
    assert!(branches(&[5, 5], Jle));
    assert!(!branches(&[6, 5], Jle));
}

#[test]
fn comparisons_are_unsigned() {
    assert!(branches(&[0xFFFF, 1], Jgt));
    assert!(!branches(&[0xFFFF, 1], Jlt));
}

// ==========================
// Memory guard
// ==========================

#[test]
fn unguarded_program_may_overwrite_code() {
    let program = code_only([push(0x1234), push(0), op(Msm), op(Halt)]);
    let mut vm = load(&program);
    assert_eq!(vm.run().unwrap(), 0x1234);
    assert_eq!(vm.read_u16(0), 0x1234);
}

#[test]
fn strict_guard_rejects_code_writes() {
    let program = code_only([push(0x1234), push(0), op(Msm), op(Halt)]);
    let mut vm = load_with(
        &program,
        VmConfig {
            guard: MemoryGuard::Strict,
            ..VmConfig::default()
        },
    );
    assert!(matches!(
        vm.run(),
        Err(VMError::MemoryFault { address: 0, .. })
    ));
}

#[test]
fn strict_guard_rejects_fetch_outside_code() {
    let program = code_only([push(0x4000), op(Jmp)]);

    let mut strict = load_with(
        &program,
        VmConfig {
            guard: MemoryGuard::Strict,
            ..VmConfig::default()
        },
    );
    assert!(matches!(
        strict.run(),
        Err(VMError::MemoryFault { address: 0x4000, .. })
    ));

    // without the guard the zeroed byte there is simply not an opcode
    assert_eq!(
        load(&program).run(),
        Err(VMError::UnimplementedOpcode {
            opcode: 0x00,
            address: 0x4000
        })
    );
}

// ==========================
// Diagnostics
// ==========================

#[test]
fn stack_dump_marks_sp_and_fp() {
    let mut vm = load(&code_only([push(0x2A), op(Halt)]));
    assert!(vm.stack_dump().contains("0xfffb: 0x0000  <- SP"));

    vm.step().unwrap();
    let dump = vm.stack_dump();
    assert!(dump.contains("0xfff9: 0x002a  <- SP"));
    assert!(dump.contains("0xfffb: 0x0000  <- FP"));
    assert_eq!(dump.lines().next(), Some("0xffef: 0x0000"));
    vm.debug_stack();
}

#[test]
fn memory_dump_rows() {
    let program = Program::new()
        .with_section(Section::new("d", 0x10).with("b", DataItem::Bytes((1..=18).collect())))
        .with_code([op(Halt)]);
    let vm = load(&program);
    assert_eq!(vm.memory_dump(0x10, 3), "0010: 01 02 03\n");
    let dump = vm.memory_dump(0x10, 18);
    let rows: Vec<_> = dump.lines().collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1], "0020: 11 12");
}

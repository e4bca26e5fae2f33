use crate::ast::reg_consts::*;
use crate::diag::{DiagnosticKind, Severity};

use super::debug::{Breakpoint, Comparator};
use super::mem::Width;
use super::snapshot::Snapshot;
use super::{HaltReason, SimErr, SimFlags, Simulator};

fn load(src: &[&str]) -> Simulator {
    let mut sim = Simulator::new(Default::default());
    sim.load_program(src);
    sim
}
fn run_to_halt(sim: &mut Simulator) {
    // bounded, so a broken program cannot hang the test
    for _ in 0..10_000 {
        if !sim.step() { return; }
    }
    panic!("program did not halt");
}

#[test]
fn test_add_ecall() {
    let mut sim = load(&[
        "addi x1, x0, 5",
        "addi x2, x0, 10",
        "add x3, x1, x2",
        "ecall",
    ]);

    assert!(sim.step());
    assert!(sim.step());
    assert!(sim.step());
    assert!(!sim.step());
    assert_eq!(sim.reg_file[X3], 15);
    assert_eq!(sim.halt_reason(), Some(&HaltReason::Ecall));
    assert_eq!(sim.pc, 12);
    assert_eq!(sim.instructions_run, 4);

    // halted: no-op
    let before = sim.snapshot();
    assert!(!sim.step());
    assert_eq!(sim.step_in(), Ok(false));
    assert_eq!(sim.snapshot(), before);
    assert_eq!(sim.instructions_run, 4);
}

#[test]
fn test_initial_state() {
    let sim = load(&["nop"]);
    assert_eq!(sim.pc, 0);
    assert_eq!(sim.reg_file[SP], 4096);
    assert_eq!(sim.reg_file[GP], 2048);
    assert!(sim.memory().iter().all(|&b| b == 0));
    assert!(!sim.is_halted());

    let mut sim = Simulator::new(SimFlags { mem_size: 256, ..Default::default() });
    sim.load_program(&["nop"]);
    assert_eq!(sim.reg_file[SP], 256);
    assert_eq!(sim.reg_file[GP], 128);
}

#[test]
fn test_store_out_of_bounds() {
    let mut sim = load(&[
        "li t0, 4096",
        "addi x1, x0, 77",
        "sw x1, 0(t0)",
        "ecall",
    ]);
    assert!(sim.step()); // lui
    assert!(sim.step()); // addi (from li)
    assert!(sim.step());

    let before = sim.snapshot();
    let regs_before = sim.reg_file;
    assert_eq!(
        sim.step_in(),
        Err(SimErr::AccessOutOfBounds { addr: 4096, width: Width::Word })
    );
    assert!(sim.is_halted());
    assert_eq!(sim.pc, 12);
    assert_eq!(sim.reg_file, regs_before);
    assert_eq!(sim.snapshot(), before);
    assert!(sim.memory().iter().all(|&b| b == 0));

    // halted after the fault
    assert!(!sim.step());

    let fault = sim.diagnostics().iter().last().unwrap();
    assert_eq!(fault.severity(), Severity::Error);
    assert_eq!(fault.line, Some(2));
    assert_eq!(fault.pc, Some(12));
}

#[test]
fn test_misaligned_load_halts() {
    let mut sim = load(&["addi t0, x0, 2", "lw a0, 0(t0)", "ecall"]);
    assert!(sim.step());
    assert!(!sim.step());
    assert_eq!(
        sim.halt_reason(),
        Some(&HaltReason::Fault(SimErr::MisalignedAccess { addr: 2, width: Width::Word }))
    );
    assert_eq!(sim.pc, 4);
    assert_eq!(sim.reg_file[A0], 0);
}

#[test]
fn test_sw_offset_wraps_to_12_bits() {
    // 4096 sign-extends from 12 bits to 0
    let mut sim = load(&["addi x1, x0, 9", "sw x1, 4096(x0)", "ecall"]);
    run_to_halt(&mut sim);
    assert_eq!(sim.halt_reason(), Some(&HaltReason::Ecall));
    assert_eq!(sim.mem.read(0, Width::Word), Ok(9));
}

#[test]
fn test_jal_link() {
    let mut sim = load(&[
        "jal x5, target",
        "addi a0, x0, 1",
        "addi a0, x0, 2",
        "target:",
        "ecall",
    ]);
    assert!(sim.step());
    assert_eq!(sim.reg_file[X5], 4);
    assert_eq!(sim.pc, 12);
    assert!(sim.observer.pc_jumped());
    assert!(!sim.step());
    assert_eq!(sim.reg_file[A0], 0);
}

#[test]
fn test_call_and_return() {
    let mut sim = load(&[
        "main:",
        "    li a0, 6",
        "    jal ra, double",
        "    mv s0, a0",
        "    ecall",
        "double:",
        "    add a0, a0, a0",
        "    ret",
    ]);
    run_to_halt(&mut sim);
    assert_eq!(sim.reg_file[S0], 12);
    assert_eq!(sim.reg_file[RA], 8);
    assert_eq!(sim.halt_reason(), Some(&HaltReason::Ecall));
}

#[test]
fn test_jalr_same_register() {
    // target uses rs1 before rd is written
    let mut sim = load(&[
        "la t0, dest",
        "jalr t0, 0(t0)",
        "ecall",
        "dest: ecall",
    ]);
    assert!(sim.step());
    assert_eq!(sim.reg_file[T0], 12);
    assert!(sim.step());
    assert_eq!(sim.pc, 12);
    assert_eq!(sim.reg_file[T0], 8);
}

#[test]
fn test_jalr_clears_low_bit() {
    let mut sim = load(&["addi t0, x0, 9", "jalr x0, t0, 0", "nop", "ecall"]);
    assert!(sim.step());
    assert!(sim.step());
    assert_eq!(sim.pc, 8);
}

#[test]
fn test_li_equivalence() {
    let mut a = load(&["li x5, 5", "ecall"]);
    let mut b = load(&["addi x5, x0, 5", "ecall"]);
    run_to_halt(&mut a);
    run_to_halt(&mut b);
    assert_eq!(a.reg_file, b.reg_file);
    assert_eq!(a.mem, b.mem);

    let mut a = load(&["li x5, 100000", "ecall"]);
    let mut b = load(&["lui x5, 24", "addi x5, x5, 1696", "ecall"]);
    run_to_halt(&mut a);
    run_to_halt(&mut b);
    assert_eq!(a.reg_file[X5], 100000);
    assert_eq!(a.reg_file, b.reg_file);

    for value in [-2048, 2047, 2048, -2049, 0x7FFF_FFFF, i32::MIN, -1, 0x800] {
        let mut sim = load(&[&format!("li t1, {value}"), "ecall"]);
        run_to_halt(&mut sim);
        assert_eq!(sim.reg_file[T1], value, "li t1, {value}");
    }
}

#[test]
fn test_branch_label_literal_symmetry() {
    let run = |src: &[&str]| {
        let mut sim = load(src);
        run_to_halt(&mut sim);
        sim.reg_file
    };

    let by_label = run(&[
        "addi t0, x0, 3",
        "loop:",
        "addi a0, a0, 2",
        "addi t0, t0, -1",
        "bne t0, x0, loop",
        "ecall",
    ]);
    let by_offset = run(&[
        "addi t0, x0, 3",
        "addi a0, a0, 2",
        "addi t0, t0, -1",
        "bne t0, x0, -8",
        "ecall",
    ]);
    assert_eq!(by_label[A0], 6);
    assert_eq!(by_label, by_offset);

    let forward_label = run(&["beq x0, x0, skip", "addi a0, x0, 1", "skip: ecall"]);
    let forward_offset = run(&["beq x0, x0, 8", "addi a0, x0, 1", "ecall"]);
    assert_eq!(forward_label[A0], 0);
    assert_eq!(forward_label, forward_offset);
}

#[test]
fn test_branch_conditions() {
    let mut sim = load(&[
        "addi t0, x0, -1",
        "addi t1, x0, 1",
        "blt t0, t1, a",      // taken (signed)
        "addi s0, s0, 1",
        "a: bltu t0, t1, b",  // not taken (unsigned)
        "addi s1, s1, 1",
        "b: bgeu t0, t1, c",  // taken
        "addi s2, s2, 1",
        "c: bge t0, t1, d",   // not taken
        "addi s3, s3, 1",
        "d: ecall",
    ]);
    run_to_halt(&mut sim);
    assert_eq!(
        [S0, S1, S2, S3].map(|r| sim.reg_file[r]),
        [0, 1, 0, 1]
    );
}

#[test]
fn test_unresolved_targets_fall_through() {
    let mut sim = load(&[
        "beq x0, x0, nowhere",
        "jal ra, nowhere",
        "la a0, nowhere",
        "ecall",
    ]);
    run_to_halt(&mut sim);
    assert_eq!(sim.pc, 12);
    assert_eq!(sim.reg_file[RA], 0);
    assert_eq!(sim.reg_file[A0], 0);

    let unresolved = sim.diagnostics().iter()
        .filter(|d| matches!(&d.kind, DiagnosticKind::UnresolvedLabel(l) if l == "nowhere"))
        .count();
    assert_eq!(unresolved, 3);
}

#[test]
fn test_x0_invariant() {
    let mut sim = load(&[
        "addi x0, x0, 5",
        "lui zero, 1",
        "jal x0, next",
        "next: add x0, sp, sp",
        "lw x0, -4(sp)",
        "ecall",
    ]);
    while sim.step() {
        assert_eq!(sim.reg_file[X0], 0);
    }
    assert_eq!(sim.reg_file[X0], 0);
    assert!(!sim.observer.reg_changed(X0));
}

#[test]
fn test_load_store_widths() {
    let mut sim = load(&[
        "li t0, -2",            // 0xFFFFFFFE
        "sw t0, 0(gp)",
        "lb a0, 0(gp)",
        "lbu a1, 0(gp)",
        "lh a2, 2(gp)",
        "lhu a3, 2(gp)",
        "addi t1, x0, 0x7F",
        "sb t1, 4(gp)",
        "sh t0, 6(gp)",
        "lw a4, 4(gp)",
        "ecall",
    ]);
    run_to_halt(&mut sim);
    assert_eq!(sim.halt_reason(), Some(&HaltReason::Ecall));
    assert_eq!(sim.reg_file[A0], -2);
    assert_eq!(sim.reg_file[A1], 0xFE);
    assert_eq!(sim.reg_file[A2], -1);
    assert_eq!(sim.reg_file[A3], 0xFFFF);
    assert_eq!(sim.reg_file[A4], 0xFFFE_007F_u32 as i32);
}

#[test]
fn test_upper_immediates() {
    let mut sim = load(&["nop", "auipc a0, 1", "lui a1, 0xFFFFF", "ecall"]);
    run_to_halt(&mut sim);
    assert_eq!(sim.reg_file[A0], 0x1004);
    assert_eq!(sim.reg_file[A1], 0xFFFF_F000_u32 as i32);
}

#[test]
fn test_run_off_end() {
    let mut sim = load(&["addi a0, x0, 1", "addi a0, a0, 1"]);
    assert!(sim.step());
    assert!(sim.step());
    assert!(!sim.step());
    assert_eq!(sim.halt_reason(), Some(&HaltReason::PcOutOfRange(8)));
    assert_eq!(sim.reg_file[A0], 2);

    let mut empty = load(&[]);
    assert!(!empty.step());
    assert_eq!(empty.halt_reason(), Some(&HaltReason::PcOutOfRange(0)));
}

#[test]
fn test_unknown_opcode_is_nop() {
    let mut sim = load(&["fence", "addi a0, x0, 3", "ecall"]);
    run_to_halt(&mut sim);
    assert_eq!(sim.reg_file[A0], 3);
    assert!(sim.diagnostics().iter().any(|d| d.kind == DiagnosticKind::UnknownOpcode("FENCE".into())));
}

#[test]
fn test_load_determinism() {
    let src = [
        "li a0, 1234",
        "sw a0, 8(x0)",
        "addi a1, a0, -4",
        "ecall",
    ];
    let mut sim = load(&src);
    run_to_halt(&mut sim);
    let first = sim.dump_state();

    sim.load_program(&src);
    assert_eq!(sim.pc, 0);
    assert!(!sim.is_halted());
    assert!(sim.memory().iter().all(|&b| b == 0));
    run_to_halt(&mut sim);
    assert_eq!(sim.dump_state(), first);

    // loading another program fully replaces state
    sim.load_program(&["ecall"]);
    assert_eq!(sim.reg_file[A0], 0);
    assert_eq!(sim.program().len(), 1);
}

#[test]
fn test_reset_restarts_program() {
    let mut sim = load(&["addi a0, a0, 1", "ecall"]);
    run_to_halt(&mut sim);
    assert_eq!(sim.reg_file[A0], 1);

    sim.reset();
    assert!(!sim.is_halted());
    assert_eq!(sim.reg_file[A0], 0);
    run_to_halt(&mut sim);
    assert_eq!(sim.reg_file[A0], 1);
}

#[test]
fn test_dump_state() {
    let mut sim = load(&["addi t0, x0, -1", "sw t0, 4(x0)", "ecall"]);
    run_to_halt(&mut sim);

    let dump = sim.dump_state();
    let lines: Vec<_> = dump.lines().collect();
    assert_eq!(lines[0], "PC=0x8");
    assert!(lines[1].contains("x02=       4096  x03=       2048"));
    assert!(lines[1].ends_with("x05=         -1  x06=          0  x07=          0"));
    assert!(lines[6].starts_with("Memory[words 0..63]: 0(0x0) 4294967295(0xffffffff) 0(0x0) "));

    let snap: Snapshot = dump.parse().unwrap();
    assert_eq!(snap.pc, 8);
    assert_eq!(snap.regs[5], -1);
    assert_eq!(snap.words.len(), 64);
    assert_eq!(snap, sim.snapshot());

    // small memories shrink the window
    let mut small = Simulator::new(SimFlags { mem_size: 16, ..Default::default() });
    small.load_program(&["ecall"]);
    assert!(small.dump_state().contains("Memory[words 0..3]: 0(0x0) 0(0x0) 0(0x0) 0(0x0) \n"));
}

#[test]
fn test_source_line_for_pc() {
    let sim = load(&[
        "# comment",
        "start:",
        "  li a0, 0x12345",
        "",
        "  ecall",
    ]);
    assert_eq!(sim.source_line_for_pc(0), 2);
    assert_eq!(sim.source_line_for_pc(4), 2);
    assert_eq!(sim.source_line_for_pc(8), 4);
    assert_eq!(sim.source_line_for_pc(12), -1);
    assert_eq!(sim.source_line_for_pc(2), -1);
    assert_eq!(sim.source_line_for_pc(-4), -1);
}

#[test]
fn test_breakpoints() {
    let mut sim = load(&[
        "loop:",
        "addi a0, a0, 1",
        "sw a0, 0(x0)",
        "blt a0, a1, loop",
        "ecall",
    ]);
    sim.reg_file.set(A1, 10);

    sim.breakpoints.insert(Breakpoint::Reg { reg: A0, value: Comparator::Eq(3) });
    sim.run().unwrap();
    assert!(sim.hit_breakpoint());
    assert_eq!(sim.reg_file[A0], 3);
    sim.breakpoints.clear();

    sim.breakpoints.insert(Breakpoint::Mem { addr: 0, value: Comparator::Ge(5) });
    sim.run().unwrap();
    assert!(sim.hit_breakpoint());
    assert_eq!(sim.mem.read(0, Width::Word), Ok(5));
    sim.breakpoints.clear();

    sim.breakpoints.insert(Breakpoint::Line(4));
    sim.run().unwrap();
    assert!(sim.hit_breakpoint());
    assert_eq!(sim.pc, 12);
    assert_eq!(sim.reg_file[A0], 10);

    sim.run().unwrap();
    assert!(sim.hit_halt());
    assert!(!sim.hit_breakpoint());
}

#[test]
fn test_run_with_limit() {
    let mut sim = load(&["loop: j loop"]);
    sim.run_with_limit(25).unwrap();
    assert_eq!(sim.instructions_run, 25);
    assert!(!sim.hit_halt());
    assert!(!sim.is_halted());

    let mut sim = load(&["li t0, 4096", "lw a0, 0(t0)"]);
    assert_eq!(
        sim.run_with_limit(100),
        Err(SimErr::AccessOutOfBounds { addr: 4096, width: Width::Word })
    );
    assert!(!sim.hit_halt());
    assert!(sim.is_halted());
}

#[test]
fn test_observer() {
    let mut sim = load(&["addi a0, x0, 7", "sw a0, 16(x0)", "sw a0, 16(x0)", "lw a1, 16(x0)", "ecall"]);

    sim.step();
    assert_eq!(sim.observer.changed_regs().collect::<Vec<_>>(), [A0]);

    // only the low byte of 7 differs from the zeroed memory
    sim.step();
    assert!(sim.observer.get_mem_accesses(16).modified());
    for addr in 17..20 {
        assert!(sim.observer.get_mem_accesses(addr).written());
        assert!(!sim.observer.get_mem_accesses(addr).modified());
    }
    assert!(!sim.observer.get_mem_accesses(20).accessed());
    assert_eq!(sim.observer.changed_regs().count(), 0);

    // same value again: written, not modified
    sim.step();
    assert!(sim.observer.get_mem_accesses(16).written());
    assert!(!sim.observer.get_mem_accesses(16).modified());

    sim.step();
    assert!(sim.observer.get_mem_accesses(16).read());
    assert!(sim.observer.reg_changed(A1));
}

#[test]
fn test_diagnostics() {
    let mut sim = load(&[
        "dup: nop",
        "dup: addi a0, q7, 1",
        "mv a0",
        "ecall",
    ]);
    let load_diags = sim.take_diagnostics();
    assert!(load_diags.iter().any(|d| d.kind == DiagnosticKind::DuplicateLabel("dup".into()) && d.line == Some(1)));
    assert!(load_diags.iter().any(|d| matches!(d.kind, DiagnosticKind::MalformedPseudo(_)) && d.line == Some(2)));
    assert!(matches!(
        load_diags.last().map(|d| &d.kind),
        Some(DiagnosticKind::ProgramLoaded { instructions: 4, labels: 1 })
    ));

    let rx = sim.subscribe();
    run_to_halt(&mut sim);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), sim.diagnostics().len());
    assert!(events.iter().any(|d| d.severity() == Severity::Warning && d.pc == Some(4)));
    assert_eq!(events.last().map(|d| &d.kind), Some(&DiagnosticKind::Ecall));
    assert_eq!(sim.diagnostics().count_at_least(Severity::Error), 0);
}

#[test]
fn test_trace() {
    let mut sim = Simulator::new(SimFlags { trace: true, ..Default::default() });
    sim.load_program(&["li a0, 1", "ecall"]);
    sim.take_diagnostics();
    run_to_halt(&mut sim);

    let executed: Vec<_> = sim.diagnostics().iter()
        .filter_map(|d| match &d.kind {
            DiagnosticKind::Executed(s) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(executed, ["ADDI a0, x0, 1", "ECALL"]);
}

#[test]
fn test_division() {
    let mut sim = load(&[
        "addi t0, x0, -7",
        "addi t1, x0, 2",
        "div a0, t0, t1",
        "rem a1, t0, t1",
        "div a2, t0, x0",
        "rem a3, t0, x0",
        "mul a4, t0, t1",
        "ecall",
    ]);
    run_to_halt(&mut sim);
    assert_eq!(
        [A0, A1, A2, A3, A4].map(|r| sim.reg_file[r]),
        [-3, -1, 0, 0, -14]
    );
}

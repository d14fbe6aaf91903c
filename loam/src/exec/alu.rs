//! Arithmetic, logic and high-register handlers.

use super::{add_carry, add_overflow, neg, sub_carry, sub_overflow};
use crate::cpu::PC;
use crate::vm::Vm;

fn add_with_flags(vm: &mut Vm, dest: usize, lhs: u32, rhs: u32) {
    let res = lhs.wrapping_add(rhs);
    vm.cpu.reg[dest] = res;
    vm.cpu.z_flag = res == 0;
    vm.cpu.n_flag = neg(res);
    vm.cpu.c_flag = add_carry(lhs, rhs, res);
    vm.cpu.v_flag = add_overflow(lhs, rhs, res);
}

fn sub_with_flags(vm: &mut Vm, dest: usize, lhs: u32, rhs: u32) {
    let res = lhs.wrapping_sub(rhs);
    vm.cpu.reg[dest] = res;
    vm.cpu.z_flag = res == 0;
    vm.cpu.n_flag = neg(res);
    vm.cpu.c_flag = sub_carry(lhs, rhs, res);
    vm.cpu.v_flag = sub_overflow(lhs, rhs, res);
}

fn compare(vm: &mut Vm, lhs: u32, rhs: u32) {
    let res = lhs.wrapping_sub(rhs);
    vm.cpu.z_flag = res == 0;
    vm.cpu.n_flag = neg(res);
    vm.cpu.c_flag = sub_carry(lhs, rhs, res);
    vm.cpu.v_flag = sub_overflow(lhs, rhs, res);
}

fn set_nz(vm: &mut Vm, value: u32) {
    vm.cpu.n_flag = neg(value);
    vm.cpu.z_flag = value == 0;
}

// ADD Rd, Rs, Rn
pub(crate) fn add_reg<const RN: usize>(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let source = ((op >> 3) & 7) as usize;
    let lhs = vm.cpu.reg[source];
    let rhs = vm.cpu.reg[RN];
    add_with_flags(vm, dest, lhs, rhs);
}

// SUB Rd, Rs, Rn
pub(crate) fn sub_reg<const RN: usize>(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let source = ((op >> 3) & 7) as usize;
    let lhs = vm.cpu.reg[source];
    let rhs = vm.cpu.reg[RN];
    sub_with_flags(vm, dest, lhs, rhs);
}

// ADD Rd, Rs, #Offset3
pub(crate) fn add_imm3<const IMM: u32>(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let source = ((op >> 3) & 7) as usize;
    let lhs = vm.cpu.reg[source];
    add_with_flags(vm, dest, lhs, IMM);
}

// SUB Rd, Rs, #Offset3
pub(crate) fn sub_imm3<const IMM: u32>(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let source = ((op >> 3) & 7) as usize;
    let lhs = vm.cpu.reg[source];
    sub_with_flags(vm, dest, lhs, IMM);
}

// MOV Rd, #Offset8
pub(crate) fn mov_imm8<const RD: usize>(vm: &mut Vm, op: u16) {
    let value = (op & 255) as u32;
    vm.cpu.reg[RD] = value;
    vm.cpu.n_flag = false;
    vm.cpu.z_flag = value == 0;
}

// CMP Rd, #Offset8
pub(crate) fn cmp_imm8<const RD: usize>(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[RD];
    compare(vm, lhs, (op & 255) as u32);
}

// ADD Rd, #Offset8
pub(crate) fn add_imm8<const RD: usize>(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[RD];
    add_with_flags(vm, RD, lhs, (op & 255) as u32);
}

// SUB Rd, #Offset8
pub(crate) fn sub_imm8<const RD: usize>(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[RD];
    sub_with_flags(vm, RD, lhs, (op & 255) as u32);
}

// AND Rd, Rs
pub(crate) fn and_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let value = vm.cpu.reg[dest] & vm.cpu.reg[((op >> 3) & 7) as usize];
    vm.cpu.reg[dest] = value;
    set_nz(vm, value);
}

// EOR Rd, Rs
pub(crate) fn eor_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let value = vm.cpu.reg[dest] ^ vm.cpu.reg[((op >> 3) & 7) as usize];
    vm.cpu.reg[dest] = value;
    set_nz(vm, value);
}

// LSL Rd, Rs
pub(crate) fn lsl_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let amount = vm.cpu.reg[((op >> 3) & 7) as usize] & 0xFF;
    if amount != 0 {
        let value = if amount == 32 {
            vm.cpu.c_flag = vm.cpu.reg[dest] & 1 != 0;
            0
        } else if amount < 32 {
            vm.cpu.c_flag = (vm.cpu.reg[dest] >> (32 - amount)) & 1 != 0;
            vm.cpu.reg[dest] << amount
        } else {
            vm.cpu.c_flag = false;
            0
        };
        vm.cpu.reg[dest] = value;
    }
    let value = vm.cpu.reg[dest];
    set_nz(vm, value);
}

// LSR Rd, Rs
pub(crate) fn lsr_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let amount = vm.cpu.reg[((op >> 3) & 7) as usize] & 0xFF;
    if amount != 0 {
        let value = if amount == 32 {
            vm.cpu.c_flag = neg(vm.cpu.reg[dest]);
            0
        } else if amount < 32 {
            vm.cpu.c_flag = (vm.cpu.reg[dest] >> (amount - 1)) & 1 != 0;
            vm.cpu.reg[dest] >> amount
        } else {
            vm.cpu.c_flag = false;
            0
        };
        vm.cpu.reg[dest] = value;
    }
    let value = vm.cpu.reg[dest];
    set_nz(vm, value);
}

// ASR Rd, Rs
pub(crate) fn asr_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let amount = vm.cpu.reg[((op >> 3) & 7) as usize] & 0xFF;
    if amount != 0 {
        if amount < 32 {
            vm.cpu.c_flag = ((vm.cpu.reg[dest] as i32) >> (amount - 1)) & 1 != 0;
            vm.cpu.reg[dest] = ((vm.cpu.reg[dest] as i32) >> amount) as u32;
        } else if neg(vm.cpu.reg[dest]) {
            vm.cpu.reg[dest] = 0xFFFF_FFFF;
            vm.cpu.c_flag = true;
        } else {
            vm.cpu.reg[dest] = 0;
            vm.cpu.c_flag = false;
        }
    }
    let value = vm.cpu.reg[dest];
    set_nz(vm, value);
}

// ADC Rd, Rs
pub(crate) fn adc_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let lhs = vm.cpu.reg[dest];
    let rhs = vm.cpu.reg[((op >> 3) & 7) as usize];
    let res = lhs.wrapping_add(rhs).wrapping_add(vm.cpu.c_flag as u32);
    vm.cpu.reg[dest] = res;
    vm.cpu.z_flag = res == 0;
    vm.cpu.n_flag = neg(res);
    vm.cpu.c_flag = add_carry(lhs, rhs, res);
    vm.cpu.v_flag = add_overflow(lhs, rhs, res);
}

// SBC Rd, Rs
pub(crate) fn sbc_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let lhs = vm.cpu.reg[dest];
    let rhs = vm.cpu.reg[((op >> 3) & 7) as usize];
    let res = lhs.wrapping_sub(rhs).wrapping_sub(!vm.cpu.c_flag as u32);
    vm.cpu.reg[dest] = res;
    vm.cpu.z_flag = res == 0;
    vm.cpu.n_flag = neg(res);
    vm.cpu.c_flag = sub_carry(lhs, rhs, res);
    vm.cpu.v_flag = sub_overflow(lhs, rhs, res);
}

// ROR Rd, Rs
pub(crate) fn ror_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let amount = vm.cpu.reg[((op >> 3) & 7) as usize] & 0xFF;
    if amount != 0 {
        let amount = amount & 0x1F;
        if amount == 0 {
            vm.cpu.c_flag = neg(vm.cpu.reg[dest]);
        } else {
            vm.cpu.c_flag = (vm.cpu.reg[dest] >> (amount - 1)) & 1 != 0;
            vm.cpu.reg[dest] = vm.cpu.reg[dest].rotate_right(amount);
        }
    }
    let value = vm.cpu.reg[dest];
    set_nz(vm, value);
}

// TST Rd, Rs
pub(crate) fn tst_reg(vm: &mut Vm, op: u16) {
    let value = vm.cpu.reg[(op & 7) as usize] & vm.cpu.reg[((op >> 3) & 7) as usize];
    set_nz(vm, value);
}

// NEG Rd, Rs
pub(crate) fn neg_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let source = ((op >> 3) & 7) as usize;
    let rhs = vm.cpu.reg[source];
    sub_with_flags(vm, dest, 0, rhs);
}

// CMP Rd, Rs
pub(crate) fn cmp_reg(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[(op & 7) as usize];
    let rhs = vm.cpu.reg[((op >> 3) & 7) as usize];
    compare(vm, lhs, rhs);
}

// CMN Rd, Rs
pub(crate) fn cmn_reg(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[(op & 7) as usize];
    let rhs = vm.cpu.reg[((op >> 3) & 7) as usize];
    let res = lhs.wrapping_add(rhs);
    vm.cpu.z_flag = res == 0;
    vm.cpu.n_flag = neg(res);
    vm.cpu.c_flag = add_carry(lhs, rhs, res);
    vm.cpu.v_flag = add_overflow(lhs, rhs, res);
}

// ORR Rd, Rs
pub(crate) fn orr_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let value = vm.cpu.reg[dest] | vm.cpu.reg[((op >> 3) & 7) as usize];
    vm.cpu.reg[dest] = value;
    set_nz(vm, value);
}

// MUL Rd, Rs
pub(crate) fn mul_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let value = vm.cpu.reg[((op >> 3) & 7) as usize].wrapping_mul(vm.cpu.reg[dest]);
    vm.cpu.reg[dest] = value;
    set_nz(vm, value);
}

// BIC Rd, Rs
pub(crate) fn bic_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let value = vm.cpu.reg[dest] & !vm.cpu.reg[((op >> 3) & 7) as usize];
    vm.cpu.reg[dest] = value;
    set_nz(vm, value);
}

// MVN Rd, Rs
pub(crate) fn mvn_reg(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    let value = !vm.cpu.reg[((op >> 3) & 7) as usize];
    vm.cpu.reg[dest] = value;
    set_nz(vm, value);
}

// The high-register forms encode Rd low and its high bit in the row; a
// destination of PC refills the pipeline.

fn pipeline_if_pc(vm: &mut Vm, dest: usize) {
    if dest == PC {
        vm.cpu.reg[PC] &= !1;
        vm.cpu.flush_pipeline();
    }
}

// ADD Rd, Rs
pub(crate) fn add_hi_rr(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    vm.cpu.reg[dest] = vm.cpu.reg[dest].wrapping_add(vm.cpu.reg[((op >> 3) & 7) as usize]);
}

// ADD Rd, Hs
pub(crate) fn add_hi_rh(vm: &mut Vm, op: u16) {
    let dest = (op & 7) as usize;
    vm.cpu.reg[dest] = vm.cpu.reg[dest].wrapping_add(vm.cpu.reg[(((op >> 3) & 7) + 8) as usize]);
}

// ADD Hd, Rs
pub(crate) fn add_hi_hr(vm: &mut Vm, op: u16) {
    let dest = ((op & 7) + 8) as usize;
    vm.cpu.reg[dest] = vm.cpu.reg[dest].wrapping_add(vm.cpu.reg[((op >> 3) & 7) as usize]);
    pipeline_if_pc(vm, dest);
}

// ADD Hd, Hs
pub(crate) fn add_hi_hh(vm: &mut Vm, op: u16) {
    let dest = ((op & 7) + 8) as usize;
    vm.cpu.reg[dest] = vm.cpu.reg[dest].wrapping_add(vm.cpu.reg[(((op >> 3) & 7) + 8) as usize]);
    pipeline_if_pc(vm, dest);
}

// CMP Rd, Hs
pub(crate) fn cmp_hi_rh(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[(op & 7) as usize];
    let rhs = vm.cpu.reg[(((op >> 3) & 7) + 8) as usize];
    compare(vm, lhs, rhs);
}

// CMP Hd, Rs
pub(crate) fn cmp_hi_hr(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[((op & 7) + 8) as usize];
    let rhs = vm.cpu.reg[((op >> 3) & 7) as usize];
    compare(vm, lhs, rhs);
}

// CMP Hd, Hs
pub(crate) fn cmp_hi_hh(vm: &mut Vm, op: u16) {
    let lhs = vm.cpu.reg[((op & 7) + 8) as usize];
    let rhs = vm.cpu.reg[(((op >> 3) & 7) + 8) as usize];
    compare(vm, lhs, rhs);
}

// MOV Rd, Rs
pub(crate) fn mov_hi_rr(vm: &mut Vm, op: u16) {
    vm.cpu.reg[(op & 7) as usize] = vm.cpu.reg[((op >> 3) & 7) as usize];
}

// MOV Rd, Hs
pub(crate) fn mov_hi_rh(vm: &mut Vm, op: u16) {
    vm.cpu.reg[(op & 7) as usize] = vm.cpu.reg[(((op >> 3) & 7) + 8) as usize];
}

// MOV Hd, Rs
pub(crate) fn mov_hi_hr(vm: &mut Vm, op: u16) {
    let dest = ((op & 7) + 8) as usize;
    vm.cpu.reg[dest] = vm.cpu.reg[((op >> 3) & 7) as usize];
    pipeline_if_pc(vm, dest);
}

// MOV Hd, Hs
pub(crate) fn mov_hi_hh(vm: &mut Vm, op: u16) {
    let dest = ((op & 7) + 8) as usize;
    vm.cpu.reg[dest] = vm.cpu.reg[(((op >> 3) & 7) + 8) as usize];
    pipeline_if_pc(vm, dest);
}

//! Module handles change observers,
//! which store which registers and memory bytes were accessed since the last clear.
//!
//! You would typically access an observer via the [`Simulator::observer`] field.
//! Stepping ([`Simulator::step`], [`Simulator::step_in`]) clears the observer before
//! executing, so after a step the observer describes exactly that step.
//! [`Simulator::run_while`] clears it once, so it accumulates over the whole run.
//!
//! [`Simulator::observer`]: crate::sim::Simulator::observer
//! [`Simulator::step`]: crate::sim::Simulator::step
//! [`Simulator::step_in`]: crate::sim::Simulator::step_in
//! [`Simulator::run_while`]: crate::sim::Simulator::run_while

use std::collections::BTreeMap;

use crate::ast::Reg;

/// The set of accesses which have occurred at a memory byte.
///
/// ## Example
///
/// ```
/// # use rv32i_stepper::sim::observer::AccessSet;
///
/// let accesses = AccessSet::READ;
/// assert!(accesses.accessed());
/// assert!(accesses.read());
/// assert!(!accesses.written());
/// assert!(!accesses.modified());
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct AccessSet(u8);
impl AccessSet {
    /// Set with only the read flag enabled.
    pub const READ: Self = Self(1 << 0);
    /// Set with only the write flag enabled.
    pub const WRITTEN: Self = Self(1 << 1);
    /// Set with only the modify flag enabled.
    pub const MODIFIED: Self = Self(1 << 2);

    /// True if any access has occurred.
    pub fn accessed(&self) -> bool {
        self.0 != 0
    }

    /// True if a load read this byte.
    pub fn read(&self) -> bool {
        self.0 & Self::READ.0 != 0
    }
    /// True if a store wrote this byte (the data does not have to change).
    pub fn written(&self) -> bool {
        self.0 & Self::WRITTEN.0 != 0
    }
    /// True if a store changed this byte.
    pub fn modified(&self) -> bool {
        self.0 & Self::MODIFIED.0 != 0
    }
}
impl std::ops::BitOr for AccessSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
impl std::ops::BitOrAssign for AccessSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}
impl std::fmt::Debug for AccessSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessSet")
            .field("read", &self.read())
            .field("written", &self.written())
            .field("modified", &self.modified())
            .finish()
    }
}

/// A struct that tracks register changes and memory accesses.
#[derive(Debug, Default, Clone)]
pub struct ChangeObserver {
    /// Bit `n` is set if register `xn` changed.
    regs: u32,
    /// Whether the PC moved somewhere other than the next instruction.
    pc_jumped: bool,
    mem: BTreeMap<i32, AccessSet>,
}
impl ChangeObserver {
    /// Creates a new change observer.
    pub fn new() -> Self {
        Default::default()
    }

    /// Clears all recorded changes.
    pub fn clear(&mut self) {
        std::mem::take(self);
    }

    /// Marks a register as changed.
    pub fn set_reg_changed(&mut self, reg: Reg) {
        self.regs |= 1 << reg.reg_no();
    }

    /// Whether the register changed since the last clear.
    pub fn reg_changed(&self, reg: Reg) -> bool {
        self.regs & (1 << reg.reg_no()) != 0
    }

    /// Iterates over every changed register, in register order.
    pub fn changed_regs(&self) -> impl Iterator<Item=Reg> + '_ {
        (0..32u8)
            .filter(|&n| self.regs & (1 << n) != 0)
            .map(Reg)
    }

    /// Marks that control flow left the straight-line path (taken branch or jump).
    pub fn set_pc_jumped(&mut self) {
        self.pc_jumped = true;
    }

    /// Whether a taken branch or jump occurred since the last clear.
    pub fn pc_jumped(&self) -> bool {
        self.pc_jumped
    }

    /// Gets the access set for the given memory byte.
    pub fn get_mem_accesses(&self, addr: i32) -> AccessSet {
        self.mem.get(&addr).copied().unwrap_or_default()
    }

    /// Adds new flags to the access set for every byte in `addr..addr + len`.
    pub fn update_mem_accesses(&mut self, addr: i32, len: usize, set: AccessSet) {
        for a in (addr..).take(len) {
            *self.mem.entry(a).or_default() |= set;
        }
    }

    /// Takes all memory accesses which have occurred since last clear,
    /// as well as clearing memory accesses.
    ///
    /// This iterator is sorted in address order.
    pub fn take_mem_accesses(&mut self) -> impl Iterator<Item=(i32, AccessSet)> {
        std::mem::take(&mut self.mem).into_iter()
    }
}

//! Memory handling for the RV32I simulator.
//!
//! This module consists of:
//! - [`Mem`]: The byte-addressable, little-endian memory.
//! - [`RegFile`]: The register file.
//! - [`Width`]: The width of a memory access.

use crate::ast::Reg;

use super::SimErr;

/// The width of a memory access.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Width {
    /// 1 byte (`LB`, `LBU`, `SB`).
    Byte,
    /// 2 bytes (`LH`, `LHU`, `SH`).
    Half,
    /// 4 bytes (`LW`, `SW`).
    Word,
}
impl Width {
    /// The number of bytes in an access of this width.
    pub fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }
}
impl std::fmt::Display for Width {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Width::Byte => f.write_str("byte"),
            Width::Half => f.write_str("halfword"),
            Width::Word => f.write_str("word"),
        }
    }
}

/// Memory.
///
/// This is a fixed-length byte array. Multi-byte values are little-endian,
/// and every access is checked:
/// 1. halfword accesses must be 2-byte aligned and word accesses must be 4-byte aligned,
/// 2. every byte of the access must be in bounds.
///
/// A failed check returns an error and leaves memory unchanged.
///
/// # Example
///
/// ```
/// use rv32i_stepper::sim::mem::{Mem, Width};
///
/// let mut mem = Mem::new(64);
/// mem.write(8, Width::Word, 0x1234_5678).unwrap();
/// assert_eq!(mem.read(8, Width::Word), Ok(0x1234_5678));
/// assert_eq!(mem.read(8, Width::Byte), Ok(0x78));
/// assert_eq!(mem.read(10, Width::Half), Ok(0x1234));
///
/// assert!(mem.read(9, Width::Half).is_err());  // misaligned
/// assert!(mem.write(64, Width::Byte, 0).is_err()); // out of bounds
/// ```
#[derive(PartialEq, Eq, Clone)]
pub struct Mem(Box<[u8]>);
impl Mem {
    /// Creates zeroed memory of the given size (in bytes).
    pub fn new(size: usize) -> Self {
        Self(vec![0; size].into_boxed_slice())
    }

    /// The size of memory in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether memory has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read-only view of the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Zeroes all memory.
    pub fn clear(&mut self) {
        self.0.fill(0);
    }

    /// Verifies an access, returning the byte range it covers.
    fn check(&self, addr: i32, width: Width) -> Result<std::ops::Range<usize>, SimErr> {
        let size = width.bytes();
        if addr.rem_euclid(size as i32) != 0 {
            return Err(SimErr::MisalignedAccess { addr, width });
        }

        usize::try_from(addr).ok()
            .and_then(|start| Some(start..start.checked_add(size)?))
            .filter(|range| range.end <= self.len())
            .ok_or(SimErr::AccessOutOfBounds { addr, width })
    }

    /// Reads a value of the given width, zero-extended to 32 bits.
    pub fn read(&self, addr: i32, width: Width) -> Result<u32, SimErr> {
        let range = self.check(addr, width)?;

        let value = self.0[range].iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        Ok(value)
    }

    /// Writes the low bytes of `value` with the given width.
    pub fn write(&mut self, addr: i32, width: Width, value: u32) -> Result<(), SimErr> {
        let range = self.check(addr, width)?;
        let size = range.len();

        self.0[range].copy_from_slice(&value.to_le_bytes()[..size]);
        Ok(())
    }

    /// Reads the `n`-th aligned word, or `None` if it is past the end of memory.
    pub fn word(&self, n: usize) -> Option<u32> {
        let bytes = self.0.get(n.checked_mul(4)?..)?.get(..4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
impl std::fmt::Debug for Mem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nonzero = self.0.iter().filter(|&&b| b != 0).count();
        f.debug_struct("Mem")
            .field("len", &self.len())
            .field("nonzero_bytes", &nonzero)
            .finish()
    }
}

/// The register file.
///
/// `x0` is hard-wired to zero: writes to it are discarded.
///
/// # Example
///
/// ```
/// use rv32i_stepper::sim::mem::RegFile;
/// use rv32i_stepper::ast::reg_consts::{ZERO, A0};
///
/// let mut reg = RegFile::new();
/// reg.set(A0, 11);
/// reg.set(ZERO, 11);
/// assert_eq!(reg[A0], 11);
/// assert_eq!(reg[ZERO], 0);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct RegFile([i32; 32]);
impl RegFile {
    /// Creates a register file with all registers set to 0.
    pub fn new() -> Self {
        Default::default()
    }

    /// Writes a register. Writes to `x0` have no effect.
    pub fn set(&mut self, reg: Reg, value: i32) {
        if reg.reg_no() != 0 {
            self.0[usize::from(reg)] = value;
        }
    }

    /// All 32 register values, indexed by register number.
    pub fn as_array(&self) -> &[i32; 32] {
        &self.0
    }

    /// Forces `x0` back to zero.
    pub(crate) fn clear_zero(&mut self) {
        self.0[0] = 0;
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = i32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}

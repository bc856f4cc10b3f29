//! Allocatable and scratch register sets

use crate::isa::{regs, registers, Register, RegisterClass, RegisterFile};

/// Integer registers reserved for spill reloads and stores
pub const GPR_SCRATCH: [Register; 2] = [regs::T0, regs::T6];
/// Float registers reserved for spill reloads and stores
pub const FPR_SCRATCH: [Register; 3] = [regs::FT0, regs::FT1, regs::FT2];

/// Spill scratch registers of a file
pub fn scratch(file: RegisterFile) -> &'static [Register] {
    match file {
        RegisterFile::Gpr => &GPR_SCRATCH,
        RegisterFile::Fpr => &FPR_SCRATCH,
    }
}

/// Registers the allocator may hand out, per file, in architectural order
#[derive(Debug, Clone)]
pub struct RegisterPool {
    gprs: Vec<Register>,
    fprs: Vec<Register>,
}

impl Default for RegisterPool {
    fn default() -> Self {
        Self {
            gprs: allocatable(RegisterFile::Gpr),
            fprs: allocatable(RegisterFile::Fpr),
        }
    }
}

fn allocatable(file: RegisterFile) -> Vec<Register> {
    registers(file)
        .iter()
        .filter(|r| r.class() != RegisterClass::Special && !scratch(file).contains(r))
        .copied()
        .collect()
}

impl RegisterPool {
    /// Full pool: every non-special, non-scratch register
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool truncated to the first `gprs` integer and `fprs` float registers
    pub fn limited(gprs: usize, fprs: usize) -> Self {
        let mut pool = Self::default();
        pool.gprs.truncate(gprs);
        pool.fprs.truncate(fprs);
        pool
    }

    /// Allocatable registers of one file
    pub fn registers(&self, file: RegisterFile) -> &[Register] {
        match file {
            RegisterFile::Gpr => &self.gprs,
            RegisterFile::Fpr => &self.fprs,
        }
    }

    /// Allocatable registers of `file` outside `excluded`
    pub fn candidates(&self, file: RegisterFile, excluded: &[Register]) -> Vec<Register> {
        self.registers(file)
            .iter()
            .filter(|r| !excluded.contains(r))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_excludes_special_and_scratch() {
        let pool = RegisterPool::new();
        let gprs = pool.registers(RegisterFile::Gpr);
        assert_eq!(gprs.len(), 25);
        for name in ["zero", "ra", "sp", "gp", "tp", "t0", "t6"] {
            assert!(gprs.iter().all(|r| r.name() != name), "{} allocatable", name);
        }
        assert_eq!(pool.registers(RegisterFile::Fpr).len(), 29);
    }

    #[test]
    fn test_candidates_and_limits() {
        let pool = RegisterPool::limited(3, 2);
        assert_eq!(pool.registers(RegisterFile::Gpr).len(), 3);
        let first = pool.registers(RegisterFile::Gpr)[0];
        assert_eq!(pool.candidates(RegisterFile::Gpr, &[first]).len(), 2);
    }
}

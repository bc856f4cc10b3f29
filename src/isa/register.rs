//! RISC-V integer and floating point register tables

use std::fmt;

/// Register file a register belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterFile {
    /// x0-x31
    Gpr,
    /// f0-f31
    Fpr,
}

/// ABI role of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// zero, ra, sp, gp, tp: never handed out by the allocator
    Special,
    /// Caller-saved temporaries
    Temporary,
    /// Callee-saved registers
    Saved,
    /// Argument / return value registers
    Argument,
}

/// Physical register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    name: &'static str,
    index: u8,
    file: RegisterFile,
    class: RegisterClass,
}

impl Register {
    const fn new(index: u8, name: &'static str, file: RegisterFile, class: RegisterClass) -> Self {
        Self {
            name,
            index,
            file,
            class,
        }
    }

    /// ABI name (`t0`, `fa1`, ...)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Architectural index within its file
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Register file
    pub fn file(&self) -> RegisterFile {
        self.file
    }

    /// ABI class
    pub fn class(&self) -> RegisterClass {
        self.class
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

use RegisterClass::{Argument as A, Saved as S, Special as X, Temporary as T};
use RegisterFile::{Fpr, Gpr};

/// Integer registers, indexed by number
pub static GPRS: [Register; 32] = [
    Register::new(0, "zero", Gpr, X),
    Register::new(1, "ra", Gpr, X),
    Register::new(2, "sp", Gpr, X),
    Register::new(3, "gp", Gpr, X),
    Register::new(4, "tp", Gpr, X),
    Register::new(5, "t0", Gpr, T),
    Register::new(6, "t1", Gpr, T),
    Register::new(7, "t2", Gpr, T),
    Register::new(8, "s0", Gpr, S),
    Register::new(9, "s1", Gpr, S),
    Register::new(10, "a0", Gpr, A),
    Register::new(11, "a1", Gpr, A),
    Register::new(12, "a2", Gpr, A),
    Register::new(13, "a3", Gpr, A),
    Register::new(14, "a4", Gpr, A),
    Register::new(15, "a5", Gpr, A),
    Register::new(16, "a6", Gpr, A),
    Register::new(17, "a7", Gpr, A),
    Register::new(18, "s2", Gpr, S),
    Register::new(19, "s3", Gpr, S),
    Register::new(20, "s4", Gpr, S),
    Register::new(21, "s5", Gpr, S),
    Register::new(22, "s6", Gpr, S),
    Register::new(23, "s7", Gpr, S),
    Register::new(24, "s8", Gpr, S),
    Register::new(25, "s9", Gpr, S),
    Register::new(26, "s10", Gpr, S),
    Register::new(27, "s11", Gpr, S),
    Register::new(28, "t3", Gpr, T),
    Register::new(29, "t4", Gpr, T),
    Register::new(30, "t5", Gpr, T),
    Register::new(31, "t6", Gpr, T),
];

/// Floating point registers, indexed by number
pub static FPRS: [Register; 32] = [
    Register::new(0, "ft0", Fpr, T),
    Register::new(1, "ft1", Fpr, T),
    Register::new(2, "ft2", Fpr, T),
    Register::new(3, "ft3", Fpr, T),
    Register::new(4, "ft4", Fpr, T),
    Register::new(5, "ft5", Fpr, T),
    Register::new(6, "ft6", Fpr, T),
    Register::new(7, "ft7", Fpr, T),
    Register::new(8, "fs0", Fpr, S),
    Register::new(9, "fs1", Fpr, S),
    Register::new(10, "fa0", Fpr, A),
    Register::new(11, "fa1", Fpr, A),
    Register::new(12, "fa2", Fpr, A),
    Register::new(13, "fa3", Fpr, A),
    Register::new(14, "fa4", Fpr, A),
    Register::new(15, "fa5", Fpr, A),
    Register::new(16, "fa6", Fpr, A),
    Register::new(17, "fa7", Fpr, A),
    Register::new(18, "fs2", Fpr, S),
    Register::new(19, "fs3", Fpr, S),
    Register::new(20, "fs4", Fpr, S),
    Register::new(21, "fs5", Fpr, S),
    Register::new(22, "fs6", Fpr, S),
    Register::new(23, "fs7", Fpr, S),
    Register::new(24, "fs8", Fpr, S),
    Register::new(25, "fs9", Fpr, S),
    Register::new(26, "fs10", Fpr, S),
    Register::new(27, "fs11", Fpr, S),
    Register::new(28, "ft8", Fpr, T),
    Register::new(29, "ft9", Fpr, T),
    Register::new(30, "ft10", Fpr, T),
    Register::new(31, "ft11", Fpr, T),
];

/// Frequently named registers
pub mod regs {
    use super::{Register, RegisterClass, RegisterFile};

    /// x0
    pub const ZERO: Register = Register::new(0, "zero", RegisterFile::Gpr, RegisterClass::Special);
    /// Return address
    pub const RA: Register = Register::new(1, "ra", RegisterFile::Gpr, RegisterClass::Special);
    /// Stack pointer
    pub const SP: Register = Register::new(2, "sp", RegisterFile::Gpr, RegisterClass::Special);
    /// First temporary, integer spill scratch
    pub const T0: Register = Register::new(5, "t0", RegisterFile::Gpr, RegisterClass::Temporary);
    /// Clobbered by runtime API directives
    pub const T1: Register = Register::new(6, "t1", RegisterFile::Gpr, RegisterClass::Temporary);
    /// Runtime API value register
    pub const T2: Register = Register::new(7, "t2", RegisterFile::Gpr, RegisterClass::Temporary);
    /// x31, clobbered by runtime API directives and second integer spill scratch
    pub const T6: Register = Register::new(31, "t6", RegisterFile::Gpr, RegisterClass::Temporary);
    /// Float spill scratch
    pub const FT0: Register = Register::new(0, "ft0", RegisterFile::Fpr, RegisterClass::Temporary);
    /// Float spill scratch
    pub const FT1: Register = Register::new(1, "ft1", RegisterFile::Fpr, RegisterClass::Temporary);
    /// Float spill scratch
    pub const FT2: Register = Register::new(2, "ft2", RegisterFile::Fpr, RegisterClass::Temporary);
}

/// All registers of one file
pub fn registers(file: RegisterFile) -> &'static [Register] {
    match file {
        RegisterFile::Gpr => &GPRS,
        RegisterFile::Fpr => &FPRS,
    }
}

/// Look up a register by ABI name (`t0`, `ft3`), numeric name (`x5`, `f3`)
/// or the frame pointer alias `fp`
pub fn lookup(name: &str) -> Option<Register> {
    if name == "fp" {
        return Some(GPRS[8]);
    }
    if let Some(reg) = GPRS.iter().chain(FPRS.iter()).find(|r| r.name == name) {
        return Some(*reg);
    }
    let (file, digits) = if let Some(rest) = name.strip_prefix('x') {
        (&GPRS, rest)
    } else if let Some(rest) = name.strip_prefix('f') {
        (&FPRS, rest)
    } else {
        return None;
    };
    let idx: usize = digits.parse().ok()?;
    file.get(idx).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_aliases() {
        assert_eq!(lookup("x31"), Some(regs::T6));
        assert_eq!(lookup("t2"), Some(regs::T2));
        assert_eq!(lookup("f0"), Some(regs::FT0));
        assert_eq!(lookup("fp").map(|r| r.name()), Some("s0"));
        assert_eq!(lookup("x32"), None);
        assert_eq!(lookup("q1"), None);
    }

    #[test]
    fn test_tables_indexed_by_number() {
        for (i, r) in GPRS.iter().enumerate() {
            assert_eq!(r.index() as usize, i);
            assert_eq!(r.file(), RegisterFile::Gpr);
        }
        for (i, r) in FPRS.iter().enumerate() {
            assert_eq!(r.index() as usize, i);
            assert_eq!(r.file(), RegisterFile::Fpr);
        }
        assert_eq!(
            GPRS.iter()
                .filter(|r| r.class() == RegisterClass::Special)
                .count(),
            5
        );
    }
}

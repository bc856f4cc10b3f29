//! Resolved test environment

use serde::{Deserialize, Serialize};
use std::fmt;

/// Register width of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Xlen {
    /// 32-bit
    Rv32,
    /// 64-bit
    #[default]
    Rv64,
}

impl Xlen {
    /// Register width in bytes
    pub fn bytes(self) -> i64 {
        match self {
            Xlen::Rv32 => 4,
            Xlen::Rv64 => 8,
        }
    }
}

/// Privilege mode tests run in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeMode {
    /// M-mode
    #[default]
    Machine,
    /// S-mode
    Supervisor,
    /// U-mode
    User,
}

impl PrivilegeMode {
    /// Rank with machine mode most privileged (0)
    pub fn rank(self) -> u8 {
        match self {
            PrivilegeMode::Machine => 0,
            PrivilegeMode::Supervisor => 1,
            PrivilegeMode::User => 2,
        }
    }

    /// Lowest privilege a CSR is accessible from, derived from its name.
    ///
    /// `m*`/`s*`/`u*` map directly, hypervisor CSRs count as supervisor,
    /// `v*` CSRs take their second letter; anything else is user-level.
    pub fn of_csr(csr_name: &str) -> Self {
        let mut chars = csr_name.chars();
        let mut prefix = chars.next();
        match prefix {
            Some('h') => prefix = Some('s'),
            Some('v') => prefix = chars.next(),
            _ => {}
        }
        match prefix {
            Some('m') => PrivilegeMode::Machine,
            Some('s') => PrivilegeMode::Supervisor,
            _ => PrivilegeMode::User,
        }
    }
}

/// Address translation scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagingMode {
    /// No translation
    #[default]
    Bare,
    /// Three-level
    Sv39,
    /// Four-level
    Sv48,
    /// Five-level
    Sv57,
}

impl PagingMode {
    /// Index of the leaf page table level
    pub fn leaf_level(self) -> u8 {
        match self {
            PagingMode::Sv48 => 3,
            PagingMode::Sv57 => 4,
            PagingMode::Sv39 | PagingMode::Bare => 2,
        }
    }
}

impl fmt::Display for PagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Runtime walks default to sv39 when paging is off
        let s = match self {
            PagingMode::Sv48 => "sv48",
            PagingMode::Sv57 => "sv57",
            PagingMode::Sv39 | PagingMode::Bare => "sv39",
        };
        f.write_str(s)
    }
}

/// Environment a batch is lowered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestEnv {
    /// Privilege mode the test body runs in
    #[serde(default, rename = "priv")]
    pub priv_mode: PrivilegeMode,
    /// Active translation scheme
    #[serde(default)]
    pub paging_mode: PagingMode,
    /// Register width
    #[serde(default)]
    pub xlen: Xlen,
}

impl TestEnv {
    /// Whether `csr_name` must go through the runtime CSR API instead of a
    /// direct CSR instruction
    pub fn needs_csr_api(&self, csr_name: &str) -> bool {
        self.priv_mode.rank() > PrivilegeMode::of_csr(csr_name).rank()
    }
}

//! Abstract test steps and scenarios

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Input of a step: a reference to another step or an integer immediate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepInput {
    /// Integer immediate
    Imm(i64),
    /// Id of another step in the same scenario
    Ref(String),
}

impl StepInput {
    /// Referenced step id
    pub fn as_ref_id(&self) -> Option<&str> {
        match self {
            StepInput::Ref(id) => Some(id),
            StepInput::Imm(_) => None,
        }
    }
}

impl From<&str> for StepInput {
    fn from(id: &str) -> Self {
        StepInput::Ref(id.to_string())
    }
}

impl From<i64> for StepInput {
    fn from(v: i64) -> Self {
        StepInput::Imm(v)
    }
}

/// Page granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PageSize {
    /// 4 KiB
    #[default]
    #[serde(rename = "4k")]
    Size4K,
    /// 2 MiB
    #[serde(rename = "2m")]
    Size2M,
    /// 1 GiB
    #[serde(rename = "1g")]
    Size1G,
    /// 512 GiB
    #[serde(rename = "512g")]
    Size512G,
}

impl PageSize {
    /// Size in bytes
    pub fn bytes(self) -> u64 {
        match self {
            PageSize::Size4K => 0x1000,
            PageSize::Size2M => 0x20_0000,
            PageSize::Size1G => 0x4000_0000,
            PageSize::Size512G => 0x80_0000_0000,
        }
    }
}

bitflags! {
    /// Page permissions
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
    pub struct PageFlags: u8 {
        /// Readable
        const READ = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Executable
        const EXECUTE = 1 << 2;
        /// Accessible from user mode
        const USER = 1 << 3;
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        PageFlags::READ | PageFlags::WRITE
    }
}

/// Memory reservation parameters shared by data and code pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpec {
    /// Bytes to reserve
    #[serde(default = "default_size")]
    pub size: u64,
    /// Page granularity
    #[serde(default)]
    pub page_size: PageSize,
    /// Permissions
    #[serde(default)]
    pub flags: PageFlags,
    /// Number of pages
    #[serde(default = "default_num_pages")]
    pub num_pages: u32,
    /// Allow accesses to straddle a page boundary
    #[serde(default)]
    pub page_cross_en: bool,
    /// Page tables for this page are modified by the test
    #[serde(default)]
    pub modify: bool,
}

fn default_size() -> u64 {
    0x1000
}

fn default_num_pages() -> u32 {
    1
}

impl MemorySpec {
    /// Single page of `size` bytes with the given permissions
    pub fn new(size: u64, flags: PageFlags) -> Self {
        Self {
            size,
            page_size: PageSize::Size4K,
            flags,
            num_pages: 1,
            page_cross_en: false,
            modify: false,
        }
    }
}

impl Default for MemorySpec {
    fn default() -> Self {
        Self::new(default_size(), PageFlags::default())
    }
}

/// Synchronous exception cause, valued as in `mcause`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionCause {
    /// 0
    InstructionAddressMisaligned,
    /// 1
    InstructionAccessFault,
    /// 2
    IllegalInstruction,
    /// 3
    Breakpoint,
    /// 4
    LoadAddressMisaligned,
    /// 5
    LoadAccessFault,
    /// 6
    StoreAddressMisaligned,
    /// 7
    StoreAccessFault,
    /// 8
    EcallFromUser,
    /// 9
    EcallFromSupervisor,
    /// 11
    EcallFromMachine,
    /// 12
    InstructionPageFault,
    /// 13
    LoadPageFault,
    /// 15
    StorePageFault,
}

impl ExceptionCause {
    /// `mcause` code
    pub fn code(self) -> i64 {
        match self {
            ExceptionCause::InstructionAddressMisaligned => 0,
            ExceptionCause::InstructionAccessFault => 1,
            ExceptionCause::IllegalInstruction => 2,
            ExceptionCause::Breakpoint => 3,
            ExceptionCause::LoadAddressMisaligned => 4,
            ExceptionCause::LoadAccessFault => 5,
            ExceptionCause::StoreAddressMisaligned => 6,
            ExceptionCause::StoreAccessFault => 7,
            ExceptionCause::EcallFromUser => 8,
            ExceptionCause::EcallFromSupervisor => 9,
            ExceptionCause::EcallFromMachine => 11,
            ExceptionCause::InstructionPageFault => 12,
            ExceptionCause::LoadPageFault => 13,
            ExceptionCause::StorePageFault => 15,
        }
    }
}

/// Kind-specific step payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Integer or float computation
    Arithmetic {
        /// Pinned opcode
        #[serde(default)]
        op: Option<String>,
    },
    /// Memory read
    Load {
        /// Byte offset from the base address
        #[serde(default)]
        offset: i64,
        /// Access width in bytes (1, 2, 4, 8)
        #[serde(default)]
        access_size: Option<u8>,
        /// Pinned opcode
        #[serde(default)]
        op: Option<String>,
    },
    /// Memory write
    Store {
        /// Byte offset from the base address
        #[serde(default)]
        offset: i64,
        /// Access width in bytes (1, 2, 4, 8)
        #[serde(default)]
        access_size: Option<u8>,
        /// Pinned opcode
        #[serde(default)]
        op: Option<String>,
    },
    /// Data page reservation
    Memory(MemorySpec),
    /// Function body placed on its own code page
    CodePage(MemorySpec),
    /// Call of a code page
    Call,
    /// CSR read
    CsrRead {
        /// CSR name
        csr_name: String,
        /// Bypass the runtime's privilege emulation
        #[serde(default)]
        direct_read: bool,
    },
    /// CSR write, set or clear
    CsrWrite {
        /// CSR name
        csr_name: String,
        /// Value to write
        #[serde(default)]
        value: Option<i64>,
        /// Bits to set
        #[serde(default)]
        set_mask: Option<i64>,
        /// Bits to clear
        #[serde(default)]
        clear_mask: Option<i64>,
        /// Bypass the runtime's privilege emulation
        #[serde(default)]
        direct_write: bool,
    },
    /// Fail the test unless both inputs are equal
    AssertEqual,
    /// Fail the test if both inputs are equal
    AssertNotEqual,
    /// Fail the test unless the nested code raises `cause`
    AssertException {
        /// Expected exception
        cause: ExceptionCause,
    },
    /// Read a page table entry
    ReadPte {
        /// Table level
        level: u8,
    },
    /// Write a page table entry
    WritePte {
        /// Table level
        level: u8,
    },
    /// Read the leaf page table entry
    ReadLeafPte,
    /// Write the leaf page table entry
    WriteLeafPte,
    /// Point a table entry at the next level's table
    ModifyPte {
        /// Table level
        level: u8,
        /// Make the entry point back into its own table
        #[serde(default)]
        make_recursive: bool,
    },
    /// Named system instruction
    System {
        /// Mnemonic
        instruction: String,
    },
    /// Comment line in the output
    Comment {
        /// Comment text
        text: String,
    },
}

/// Fieldless discriminant of [`StepKind`], the key of the action registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepTag {
    Arithmetic,
    Load,
    Store,
    Memory,
    CodePage,
    Call,
    CsrRead,
    CsrWrite,
    AssertEqual,
    AssertNotEqual,
    AssertException,
    ReadPte,
    WritePte,
    ReadLeafPte,
    WriteLeafPte,
    ModifyPte,
    System,
    Comment,
}

impl fmt::Display for StepTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl StepKind {
    /// Registry key
    pub fn tag(&self) -> StepTag {
        match self {
            StepKind::Arithmetic { .. } => StepTag::Arithmetic,
            StepKind::Load { .. } => StepTag::Load,
            StepKind::Store { .. } => StepTag::Store,
            StepKind::Memory(_) => StepTag::Memory,
            StepKind::CodePage(_) => StepTag::CodePage,
            StepKind::Call => StepTag::Call,
            StepKind::CsrRead { .. } => StepTag::CsrRead,
            StepKind::CsrWrite { .. } => StepTag::CsrWrite,
            StepKind::AssertEqual => StepTag::AssertEqual,
            StepKind::AssertNotEqual => StepTag::AssertNotEqual,
            StepKind::AssertException { .. } => StepTag::AssertException,
            StepKind::ReadPte { .. } => StepTag::ReadPte,
            StepKind::WritePte { .. } => StepTag::WritePte,
            StepKind::ReadLeafPte => StepTag::ReadLeafPte,
            StepKind::WriteLeafPte => StepTag::WriteLeafPte,
            StepKind::ModifyPte { .. } => StepTag::ModifyPte,
            StepKind::System { .. } => StepTag::System,
            StepKind::Comment { .. } => StepTag::Comment,
        }
    }

    /// Whether steps of this kind may own nested code
    pub fn accepts_code(&self) -> bool {
        matches!(
            self,
            StepKind::CodePage(_) | StepKind::AssertException { .. }
        )
    }

    /// Whether this step reserves memory that other steps reference by label
    pub fn is_memory(&self) -> bool {
        matches!(self, StepKind::Memory(_) | StepKind::CodePage(_))
    }
}

/// Abstract operation supplied by a test plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique id within the scenario
    pub id: String,
    /// Kind and payload
    #[serde(flatten)]
    pub kind: StepKind,
    /// Ordered inputs
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    /// Nested steps (code pages and exception assertions only)
    #[serde(default)]
    pub code: Vec<Step>,
}

impl Step {
    /// Create a step with no inputs
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: Vec::new(),
            code: Vec::new(),
        }
    }

    /// Builder: set inputs
    pub fn with_inputs<I: Into<StepInput>>(mut self, inputs: impl IntoIterator<Item = I>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set nested code
    pub fn with_code(mut self, code: Vec<Step>) -> Self {
        self.code = code;
        self
    }
}

/// Named, ordered list of steps lowered as one test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestScenario {
    /// Test name, used for labels and the stack page
    pub name: String,
    /// Steps in program order
    pub steps: Vec<Step>,
}

impl TestScenario {
    /// Create a scenario
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Parse a scenario from JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_from_json() {
        let json = r#"{
            "name": "load_add",
            "steps": [
                {"id": "mem", "kind": "memory", "size": 8192, "flags": "READ | WRITE"},
                {"id": "ld", "kind": "load", "offset": 16, "inputs": ["mem"]},
                {"id": "sum", "kind": "arithmetic", "op": "addi", "inputs": ["ld", 5]},
                {"id": "fn", "kind": "code_page", "code": [
                    {"id": "c", "kind": "comment", "text": "inside"}
                ]},
                {"id": "call", "kind": "call", "inputs": ["fn"]}
            ]
        }"#;
        let scenario = TestScenario::from_json(json).unwrap();
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(scenario.steps[0].kind.tag(), StepTag::Memory);
        match &scenario.steps[0].kind {
            StepKind::Memory(spec) => {
                assert_eq!(spec.size, 8192);
                assert_eq!(spec.num_pages, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            scenario.steps[2].inputs,
            vec![StepInput::Ref("ld".into()), StepInput::Imm(5)]
        );
        assert_eq!(scenario.steps[3].code.len(), 1);
        assert!(scenario.steps[3].kind.accepts_code());
    }

    #[test]
    fn test_bad_kind_is_config_error() {
        let err = TestScenario::from_json(r#"{"name": "x", "steps": [{"id": "a", "kind": "teleport"}]}"#)
            .unwrap_err();
        assert_eq!(err.classify(), crate::ErrorKind::Content);
    }

    #[test]
    fn test_exception_codes() {
        assert_eq!(ExceptionCause::IllegalInstruction.code(), 2);
        assert_eq!(ExceptionCause::StorePageFault.code(), 15);
    }
}

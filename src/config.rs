//! Lowering options

use crate::Result;
use serde::Deserialize;

/// Options for one lowering run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoweringOptions {
    /// Seed for every random choice in the batch
    pub seed: u64,
    /// Size in bytes of each test's stack page
    pub stack_page_size: u64,
    /// Data page receiving CSR values saved around runtime CSR API calls
    pub csr_storage_name: String,
    /// Symbol holding the address of the shared failure handler
    pub failed_addr_symbol: String,
    /// Symbol holding the address of the shared pass handler
    pub passed_addr_symbol: String,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            stack_page_size: 0x1000,
            csr_storage_name: "tp_csr_storage".to_string(),
            failed_addr_symbol: "failed_addr".to_string(),
            passed_addr_symbol: "passed_addr".to_string(),
        }
    }
}

impl LoweringOptions {
    /// Default options with a given seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Parse options from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

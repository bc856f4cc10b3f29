//! Registry of reserved data and code pages
//!
//! Memory and code page actions are the sole owners of their page metadata
//! until canonicalization moves it here; everything else refers to a page by
//! its canonical id.

use crate::plan::MemorySpec;
use crate::{Error, Result};
use std::collections::HashMap;

/// Reserved data page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPage {
    /// Canonical id, also the page's assembly label
    pub name: String,
    /// Reservation parameters
    pub spec: MemorySpec,
}

/// Reserved code page holding one lowered function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePage {
    /// Canonical code id, also the function label
    pub name: String,
    /// Reservation parameters
    pub spec: MemorySpec,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Data(usize),
    Code(usize),
}

/// Id-keyed page registry, iterated in registration order
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    data: Vec<DataPage>,
    code: Vec<CodePage>,
    index: HashMap<String, Slot>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data page
    pub fn allocate_data(&mut self, id: &str, spec: &MemorySpec) -> Result<()> {
        self.claim(id, Slot::Data(self.data.len()))?;
        self.data.push(DataPage {
            name: id.to_string(),
            spec: spec.clone(),
        });
        Ok(())
    }

    /// Register a code page
    pub fn allocate_code(&mut self, id: &str, spec: &MemorySpec) -> Result<()> {
        self.claim(id, Slot::Code(self.code.len()))?;
        self.code.push(CodePage {
            name: id.to_string(),
            spec: spec.clone(),
        });
        Ok(())
    }

    fn claim(&mut self, id: &str, slot: Slot) -> Result<()> {
        if self.index.contains_key(id) {
            return Err(Error::DuplicateId {
                id: id.to_string(),
                scope: "memory registry".to_string(),
            });
        }
        self.index.insert(id.to_string(), slot);
        Ok(())
    }

    /// Data page by id
    pub fn get_data_page(&self, id: &str) -> Result<&DataPage> {
        match self.index.get(id) {
            Some(Slot::Data(i)) => Ok(&self.data[*i]),
            _ => Err(Error::PageNotFound { id: id.to_string() }),
        }
    }

    /// Code page by id
    pub fn get_code_page(&self, id: &str) -> Result<&CodePage> {
        match self.index.get(id) {
            Some(Slot::Code(i)) => Ok(&self.code[*i]),
            _ => Err(Error::PageNotFound { id: id.to_string() }),
        }
    }

    /// Whether `id` names a registered data or code page
    pub fn is_memory_label(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Data pages in registration order
    pub fn data_pages(&self) -> &[DataPage] {
        &self.data
    }

    /// Code pages in registration order
    pub fn code_pages(&self) -> &[CodePage] {
        &self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PageFlags;

    #[test]
    fn test_allocate_and_lookup() {
        let mut reg = MemoryRegistry::new();
        reg.allocate_data("mem0", &MemorySpec::new(0x2000, PageFlags::READ))
            .unwrap();
        reg.allocate_code("code_mem1", &MemorySpec::default()).unwrap();

        assert_eq!(reg.get_data_page("mem0").unwrap().spec.size, 0x2000);
        assert!(reg.get_code_page("code_mem1").is_ok());
        assert!(reg.is_memory_label("mem0"));
        assert!(reg.is_memory_label("code_mem1"));
        assert!(!reg.is_memory_label("r3"));
    }

    #[test]
    fn test_lookup_wrong_kind_is_not_found() {
        let mut reg = MemoryRegistry::new();
        reg.allocate_data("mem0", &MemorySpec::default()).unwrap();
        assert!(matches!(
            reg.get_code_page("mem0"),
            Err(Error::PageNotFound { .. })
        ));
        assert!(matches!(
            reg.get_data_page("missing"),
            Err(Error::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut reg = MemoryRegistry::new();
        reg.allocate_data("mem0", &MemorySpec::default()).unwrap();
        assert!(matches!(
            reg.allocate_code("mem0", &MemorySpec::default()),
            Err(Error::DuplicateId { .. })
        ));
    }
}

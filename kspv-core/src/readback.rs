//! Loads a produced binary back into an `rspirv` data representation so its
//! structure can be inspected.

use rspirv::binary::parse_words;
use rspirv::dr::{Loader, Module};

use crate::error::{ProducerError, Result};

pub fn load_module(words: &[u32]) -> Result<Module> {
    let mut loader = Loader::new();
    parse_words(words, &mut loader)
        .map_err(|e| ProducerError::Readback(format!("failed to parse SPIR-V: {:?}", e)))?;
    Ok(loader.module())
}

pub fn load_bytes(bytes: &[u8]) -> Result<Module> {
    if bytes.len() % 4 != 0 {
        return Err(ProducerError::Readback(format!(
            "binary length {} is not a multiple of four",
            bytes.len()
        )));
    }
    load_module(&crate::writer::words_from_bytes(bytes))
}

/// Short structural summary used by the command-line `check` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    pub bound: u32,
    pub entry_points: Vec<String>,
    pub functions: usize,
    pub types_and_globals: usize,
    pub annotations: usize,
}

pub fn summarize(module: &Module) -> ModuleSummary {
    let entry_points = module
        .entry_points
        .iter()
        .filter_map(|ep| match ep.operands.get(2) {
            Some(rspirv::dr::Operand::LiteralString(name)) => Some(name.clone()),
            _ => None,
        })
        .collect();
    ModuleSummary {
        bound: module.header.as_ref().map_or(0, |h| h.bound),
        entry_points,
        functions: module.functions.len(),
        types_and_globals: module.types_global_values.len(),
        annotations: module.annotations.len(),
    }
}

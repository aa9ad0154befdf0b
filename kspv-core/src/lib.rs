pub mod builtins;
pub mod cfg;
pub mod descriptor_map;
pub mod error;
pub mod ids;
pub mod instruction;
pub mod layout;
pub mod module;
pub mod options;
pub mod producer;
pub mod readback;
pub mod tables;
pub mod writer;

#[cfg(test)]
mod integration_tests;

pub use descriptor_map::DescriptorMap;
pub use error::{Location, ProducerError, Result};
pub use module::SpirvModule;
pub use options::{Options, OutputFormat, SamplerMap};
pub use producer::{produce, Output};

/// Parses kernel IR text and lowers it with `options`.
pub fn compile(source: &str, options: &Options) -> Result<Output> {
    let module = kir::parse_module(source)?;
    produce(&module, options)
}

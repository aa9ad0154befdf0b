pub mod error;
pub mod ir;
pub mod parser;

pub use error::{ParseError, Result};
pub use ir::*;
pub use parser::{parse_function, parse_module, parse_type};

//! Producer configuration.

use std::path::Path;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit1, hex_digit1, space0},
    combinator::{all_consuming, map_res, rest, verify},
    sequence::{delimited, preceded, separated_pair},
};

use crate::error::{ProducerError, Result};

fn sampler_literal(input: &str) -> IResult<&str, u32> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |s: &str| {
            u32::from_str_radix(s, 16)
        }),
        map_res(digit1, |s: &str| s.parse::<u32>()),
    ))(input)
}

/// `literal , expression`; the expression runs to the end of the line.
fn sampler_line(input: &str) -> IResult<&str, (u32, &str)> {
    all_consuming(separated_pair(
        delimited(space0, sampler_literal, space0),
        char(','),
        verify(rest, |s: &str| !s.trim().is_empty()),
    ))(input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Binary,
    Assembly,
    /// Binary words rendered as a C initializer list.
    CInitList,
}

/// One `literal,expression` line of a sampler map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerEntry {
    pub literal: u32,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SamplerMap {
    pub entries: Vec<SamplerEntry>,
}

impl SamplerMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parses `literal,expression` lines. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<SamplerMap> {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (_, (literal, expression)) = sampler_line(line).map_err(|e| {
                ProducerError::SamplerMap(format!(
                    "line {}: expected `literal,expression`: {}",
                    lineno + 1,
                    e
                ))
            })?;
            entries.push(SamplerEntry {
                literal,
                expression: expression.trim().to_string(),
            });
        }
        Ok(SamplerMap { entries })
    }

    pub fn from_file(path: &Path) -> Result<SamplerMap> {
        let text = std::fs::read_to_string(path)?;
        SamplerMap::parse(&text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Keep `constant` globals in one storage buffer instead of private memory.
    pub module_constants_in_storage_buffer: bool,
    /// Pass plain-old-data kernel arguments in uniform buffers.
    pub pod_args_in_uniform_buffer: bool,
    /// Give every kernel its own descriptor set.
    pub distinct_kernel_descriptor_sets: bool,
    /// Emit numeric undef values as OpConstantNull.
    pub hack_undef: bool,
    /// Store the workgroup size into its builtin variable at each kernel entry.
    pub hack_initializers: bool,
    /// Log the id assigned to each function.
    pub show_ids: bool,
    pub output: OutputFormat,
    pub sampler_map: SamplerMap,
}

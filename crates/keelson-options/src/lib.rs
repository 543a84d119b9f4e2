//! Dynamic option schema and sealed configuration for the Keelson kernel.
//!
//! This crate defines the configuration layer: features register sections and
//! typed options at startup (`OptionRegistry`), the command line is parsed
//! against the accumulated schema (`parse_args`), and the registry is then
//! sealed into a read-only snapshot that can be queried through typed getters
//! or exported as a structured JSON document (`to_structured`).

pub mod parser;
pub mod registry;
pub mod value;

pub use parser::{help_section, parse_args};
pub use registry::{OptionRegistry, OptionSpec, Section};
pub use value::OptionValue;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("options are sealed; cannot {0}")]
    Sealed(&'static str),
    #[error("unknown option '--{0}'")]
    UnknownOption(String),
    #[error("duplicate option '--{0}'")]
    DuplicateOption(String),
    #[error("option '--{option}' references unknown section '{section}'")]
    UnknownSection { section: String, option: String },
    #[error("invalid value '{value}' for option '--{option}': expected {expected}")]
    InvalidValue {
        option: String,
        value: String,
        expected: &'static str,
    },
    #[error("option '--{option}' is a {actual}, not a {expected}")]
    TypeMismatch {
        option: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{0}")]
    Parse(String),
}

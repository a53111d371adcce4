//! Unit conversion and formatting for threshold comparison and alert text

pub mod converter;
pub mod formatter;

pub use converter::{convert, converter_name, UnitCategory};
pub use formatter::format;

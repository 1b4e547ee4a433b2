//! Quote math and Brazilian-format amount handling.
//!
//! Everything money-related runs on `rust_decimal` with explicit
//! truncation (operator convention: amounts truncate at two decimals,
//! rates at four; never round).

pub mod amounts;
pub mod spread;

pub use amounts::{extract_amount, format_amount, format_rate, parse_amount, ExtractedAmount};
pub use spread::{apply_spread, brl_from_usdt, invert_spread, usdt_from_brl};

//! Normalization of temperature readings.
//!
//! A raw reading goes through two text stages before it is handed out:
//!
//! 1. fixed-point rendering with exactly four digits after the point,
//! 2. a field of width six and precision six, which cuts the rendered text
//!    after six characters and pads shorter text with trailing spaces.
//!
//! The second stage truncates, it never rounds, so the result differs from a
//! plain `round(4)` as soon as the rendered text is longer than six
//! characters (`1234.56789` becomes `1234.5`, not `1234.5679`).

use std::num::ParseFloatError;

/// Digits after the decimal point in the first stage.
pub const FIXED_DECIMALS: usize = 4;

/// Width and precision of the second stage.
pub const FIELD_WIDTH: usize = 6;

/// Render a raw reading through both text stages.
pub fn render(raw: f64) -> String {
    let fixed = format!("{:.*}", FIXED_DECIMALS, raw);
    format!("{:<width$.width$}", fixed, width = FIELD_WIDTH)
}

/// Normalize a raw reading into the value reported to callers.
pub fn normalize(raw: f64) -> Result<f64, ParseFloatError> {
    render(raw).trim().parse()
}

/// Format a normalized value for line output.
///
/// Whole numbers keep a trailing `.0` (`100.0`, not `100`) and non-finite
/// values print as `nan`, `inf` and `-inf`.
pub fn display(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        format!("{}inf", sign)
    } else {
        format!("{:?}", value)
    }
}

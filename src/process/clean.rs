use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::UnitMode;
use crate::error::RecordFailure;

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<num>[+-]?(?:\d+(?:\.\d*)?|\.\d+))(?P<unit>kHz|MHz)?$")
        .expect("quantity regex compiles")
});

static LINE_BREAKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\r\n]+\s*").expect("line break regex compiles"));

/// Parse a frequency-table cell such as `"12.5 MHz"` or `"500 kHz"`.
///
/// Whitespace is removed before matching. In [`UnitMode::Strip`] the unit is
/// dropped and the magnitude kept as written; in [`UnitMode::Megahertz`]
/// kHz values are divided by 1000.
pub fn parse_quantity(raw: &str, mode: UnitMode) -> Result<f64, RecordFailure> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let caps = QUANTITY
        .captures(&compact)
        .ok_or_else(|| RecordFailure::parse(raw, "a number with optional kHz/MHz unit"))?;
    let value: f64 = caps["num"]
        .parse()
        .map_err(|_| RecordFailure::parse(raw, "a number with optional kHz/MHz unit"))?;

    let khz = caps.name("unit").map(|u| u.as_str()) == Some("kHz");
    Ok(match mode {
        UnitMode::Megahertz if khz => value / 1000.0,
        _ => value,
    })
}

/// Header cell text with embedded line breaks flattened to one space.
pub fn flatten_header(raw: &str) -> String {
    LINE_BREAKS.replace_all(raw.trim(), " ").into_owned()
}

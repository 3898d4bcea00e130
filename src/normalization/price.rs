use serde_json::Value;

/// Coerce an upstream price into a positive finite amount.
///
/// Accepts JSON numbers and numeric strings (a lone decimal comma is read as a
/// decimal point; trailing text after the number is ignored). Anything
/// unparseable, non-finite, zero or negative yields `None`; the offer is
/// dropped rather than stored at zero.
pub fn parse_price(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_price_str(s)?,
        _ => return None,
    };
    (n.is_finite() && n > 0.0).then_some(n)
}

// Reads the leading numeric run like a lenient float parse, so unit suffixes
// such as "12.50 TL" are ignored.
fn parse_price_str(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| {
            let numeric = c.is_ascii_digit() || c == '.' || c == ',';
            !(numeric || (i == 0 && (c == '-' || c == '+')))
        })
        .map_or(s.len(), |(i, _)| i);
    let num = &s[..end];
    if num.is_empty() {
        return None;
    }
    if let Ok(n) = num.parse::<f64>() {
        return Some(n);
    }
    if num.contains(',') && !num.contains('.') {
        return num.replacen(',', ".", 1).parse::<f64>().ok();
    }
    None
}

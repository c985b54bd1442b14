//! Topic construction for bridged JSON messages
//!
//! A topic is the configured prefix, followed by one sanitized segment per
//! configured key that is present in the object, followed by the optional
//! suffix. Keys missing from an object are skipped, so messages of different
//! shapes can share one prefix.

use serde_json::{Map, Number, Value};

/// Characters that collide with MQTT level separators or wildcards, plus the
/// ones that read confusingly in a topic tree.
const UNSAFE_TOPIC_CHARS: [char; 6] = [' ', '/', '.', '+', '#', '&'];

/// Replace every unsafe topic character with `_`.
///
/// Everything else, including non-ASCII text, is left untouched.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if UNSAFE_TOPIC_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Render a JSON value as the text used for a topic segment.
///
/// Strings lose their quotes. Booleans and null render as `True`, `False` and
/// `None`. Arrays and objects use compact JSON. See [`number_text`] for numbers.
pub fn segment_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_text(n),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Render a number the way the rest of the tooling around these topics
/// prints it.
///
/// Integer literals keep every digit, however large. Anything with a fraction
/// or exponent is a double printed with the shortest round-trip digits: fixed
/// notation with at least one decimal for exponents in `-4..16`, otherwise
/// `d.ddde+XX`. Values that overflow a double print as `inf`.
pub fn number_text(number: &Number) -> String {
    let text = number.to_string();
    if !text.contains(['.', 'e', 'E']) {
        return if text == "-0" { "0".to_string() } else { text };
    }
    match text.parse::<f64>() {
        Ok(value) => float_text(value),
        Err(_) => text,
    }
}

fn float_text(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // `{:e}` gives the shortest round-trip digits, e.g. `2.15e1`
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if (-4..16).contains(&exponent) {
        let point = exponent + 1;
        let body = if point <= 0 {
            format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
        } else {
            let point = point as usize;
            if point >= digits.len() {
                format!("{digits}{}.0", "0".repeat(point - digits.len()))
            } else {
                format!("{}.{}", &digits[..point], &digits[point..])
            }
        };
        format!("{sign}{body}")
    } else {
        let (lead, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{sign}{lead}{fraction}e{exponent_sign}{:02}",
            exponent.unsigned_abs()
        )
    }
}

/// Build the publish topic for `object`.
pub fn build_topic(
    prefix: &str,
    object: &Map<String, Value>,
    keys: &[String],
    suffix: Option<&str>,
) -> String {
    let mut topic = prefix.to_string();

    for value in keys.iter().filter_map(|key| object.get(key)) {
        topic.push('/');
        topic.push_str(&sanitize(&segment_text(value)));
    }

    if let Some(suffix) = suffix {
        topic.push('/');
        topic.push_str(suffix);
    }

    topic
}

/// True when `topic` contains an MQTT wildcard and therefore cannot be
/// published to.
pub fn contains_wildcard(topic: &str) -> bool {
    topic.contains('+') || topic.contains('#')
}

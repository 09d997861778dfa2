//! Scalar parsers for annotation values.
//!
//! Annotation values follow the conventions of the control plane tooling, so booleans and
//! durations accept the same vocabulary as Go's `strconv.ParseBool` and `time.ParseDuration`.

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(format!("parsing \"{}\": invalid syntax", s)),
    }
}

/// Parses a duration like `1m30s`, `250ms` or `1.5h` into nanoseconds.
pub fn parse_duration(s: &str) -> Result<i64, String> {
    go_parse_duration::parse_duration(s)
        .map_err(|e| format!("time: invalid duration \"{}\": {:?}", s, e))
}

/// Seconds as a float, computed the same way the control plane does so that
/// truncation artifacts (`1.001s` is `1000ms`) are identical.
pub fn duration_seconds(nanos: i64) -> f64 {
    let secs = nanos / NANOS_PER_SECOND;
    let rest = nanos % NANOS_PER_SECOND;
    secs as f64 + rest as f64 / 1e9
}

/// Renders a duration annotation in the proxy's millisecond form, `<N>ms`.
pub fn duration_as_millis(s: &str) -> Result<String, String> {
    parse_duration(s).map(|nanos| format!("{}ms", (duration_seconds(nanos) * 1000.0) as i64))
}

/// Renders a duration annotation in the proxy's second form, `<N>s`.
pub fn duration_as_secs(s: &str) -> Result<String, String> {
    parse_duration(s).map(|nanos| format!("{}s", duration_seconds(nanos) as i64))
}

/// Unsigned base 10 integer. An explicit sign is rejected.
pub fn parse_u64(s: &str) -> Result<u64, String> {
    if s.starts_with('+') {
        return Err(format!("parsing \"{}\": invalid syntax", s));
    }
    s.parse::<u64>()
        .map_err(|e| format!("parsing \"{}\": {}", s, e))
}

use std::time::Duration;

/// Parses `250ms`, `5s`, `2m`, or `1h`; a bare number is milliseconds.
pub(crate) fn parse_duration_value(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("Duration must not be empty.".to_owned());
    }

    let digits_len = value.chars().take_while(char::is_ascii_digit).count();
    if digits_len == 0 {
        return Err(format!("Invalid duration '{}'.", value));
    }
    let (num_part, unit_part) = value.split_at(digits_len);
    let number: u64 = num_part
        .parse()
        .map_err(|err| format!("Invalid duration '{}': {}", value, err))?;

    let millis_per_unit: u64 = match unit_part.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        unit => return Err(format!("Invalid duration unit '{}'.", unit)),
    };
    let millis = number
        .checked_mul(millis_per_unit)
        .ok_or_else(|| "Duration overflow.".to_owned())?;
    if millis == 0 {
        return Err("Duration must be > 0.".to_owned());
    }
    Ok(Duration::from_millis(millis))
}

// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared formatting utilities.

use std::time::Duration;

/// Format a number with thousand separators.
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<_> = s.chars().collect();
    let len = chars.len();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Render an elapsed time in the largest unit that keeps it above one,
/// with two decimals: `"42.10 secs"`, `"1.50 mins"`, `"2.00 hrs"`.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 3600.0 {
        format!("{:.2} hrs", secs / 3600.0)
    } else if secs >= 60.0 {
        format!("{:.2} mins", secs / 60.0)
    } else {
        format!("{:.2} secs", secs)
    }
}

/// Dollar amount with four decimals, enough for single-call costs.
pub fn format_cost(cost: f64) -> String {
    format!("${:.4}", cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(48234), "48,234");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_duration_units() {
        assert_eq!(format_duration(Duration::from_millis(4210)), "4.21 secs");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.50 mins");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2.00 hrs");
        assert_eq!(format_duration(Duration::ZERO), "0.00 secs");
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0105), "$0.0105");
        assert_eq!(format_cost(0.0), "$0.0000");
    }
}

//! STAT and URL formatting utilities

use std::time::Duration;

/// Format an interval for the STAT table: `MMmSS`, switching to `HHhMM`
/// once the interval reaches 100 minutes.
#[inline]
pub fn format_interval(interval: Duration) -> String {
    let total = interval.as_secs();
    let minutes = total / 60;
    if minutes >= 100 {
        format!("{:02}h{:02}", total / 3600, (total % 3600) / 60)
    } else {
        format!("{:02}m{:02}", minutes, total % 60)
    }
}

/// Percent-encode a query-string value with lowercase hex escapes.
///
/// The controller decodes lowercase escapes; unreserved characters pass
/// through untouched.
pub fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02x}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_interval_minutes() {
        assert_eq!(format_interval(Duration::from_secs(0)), "00m00");
        assert_eq!(format_interval(Duration::from_secs(5 * 60 + 30)), "05m30");
        assert_eq!(format_interval(Duration::from_secs(99 * 60 + 59)), "99m59");
    }

    #[test]
    fn test_format_interval_switches_to_hours() {
        assert_eq!(format_interval(Duration::from_secs(100 * 60)), "01h40");
        assert_eq!(format_interval(Duration::from_secs(2 * 3600 + 5 * 60)), "02h05");
        assert_eq!(format_interval(Duration::from_secs(26 * 3600)), "26h00");
    }

    #[test]
    fn test_urlencode_unreserved_passthrough() {
        assert_eq!(urlencode("Handle42"), "Handle42");
        assert_eq!(urlencode("a-b_c.d~e"), "a-b_c.d~e");
    }

    #[test]
    fn test_urlencode_lowercase_hex() {
        assert_eq!(
            urlencode("urn:x:serviceId:X1"),
            "urn%3ax%3aserviceId%3aX1"
        );
        assert_eq!(urlencode("a b"), "a%20b");
        assert_eq!(urlencode("x/y"), "x%2fy");
    }
}

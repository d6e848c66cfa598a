use crate::{CoreError, Result};

/// Parse a volume size into KiB (e.g., "4096", "512Mi", "10Gi", "1Ti")
///
/// A plain number is taken as KiB already.
pub fn parse_size_kib(s: &str) -> Result<u64> {
    let s = s.trim();
    let parse = |num: &str, factor: u64| -> Result<u64> {
        num.trim()
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(factor))
            .ok_or_else(|| CoreError::invalid_size(s))
    };

    if let Some(num) = s.strip_suffix("Ki") {
        parse(num, 1)
    } else if let Some(num) = s.strip_suffix("Mi") {
        parse(num, 1024)
    } else if let Some(num) = s.strip_suffix("Gi") {
        parse(num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix("Ti") {
        parse(num, 1024 * 1024 * 1024)
    } else {
        parse(s, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_kib() {
        assert_eq!(parse_size_kib("1024").unwrap(), 1024);
        assert_eq!(parse_size_kib("8Ki").unwrap(), 8);
        assert_eq!(parse_size_kib("128Mi").unwrap(), 128 * 1024);
        assert_eq!(parse_size_kib("1Gi").unwrap(), 1024 * 1024);
        assert_eq!(parse_size_kib("2Ti").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_kib_invalid() {
        assert!(parse_size_kib("").is_err());
        assert!(parse_size_kib("ten").is_err());
        assert!(parse_size_kib("-1Gi").is_err());
        assert!(matches!(
            parse_size_kib("1.5Gi"),
            Err(CoreError::InvalidSize { .. })
        ));
    }
}

//! ISBN helpers.

/// Strip everything but digits (and a trailing `X` check digit)
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X' || *c == 'x')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Whether the value is a 13-digit ISBN (digits only, no checksum test)
pub fn is_isbn13(value: &str) -> bool {
    value.len() == 13 && value.chars().all(|c| c.is_ascii_digit())
}

/// Convert an ISBN-10 to its ISBN-13 form with a recomputed check digit
pub fn isbn10_to_isbn13(raw: &str) -> Option<String> {
    let isbn10 = normalize(raw);
    if isbn10.len() != 10 || !isbn10[..9].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let body = format!("978{}", &isbn10[..9]);
    let sum: u32 = body
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let digit = c.to_digit(10).unwrap_or(0);
            if i % 2 == 0 {
                digit
            } else {
                digit * 3
            }
        })
        .sum();
    let check = (10 - (sum % 10)) % 10;

    Some(format!("{}{}", body, check))
}

/// Convert a `978`-prefixed ISBN-13 back to ISBN-10
///
/// `979` ISBNs have no ISBN-10 form and yield `None`.
pub fn isbn13_to_isbn10(raw: &str) -> Option<String> {
    let isbn13 = normalize(raw);
    if !is_isbn13(&isbn13) || !isbn13.starts_with("978") {
        return None;
    }

    let body = &isbn13[3..12];
    let sum: u32 = body
        .chars()
        .enumerate()
        .map(|(i, c)| c.to_digit(10).unwrap_or(0) * (10 - i as u32))
        .sum();
    let check = (11 - (sum % 11)) % 11;
    let check = if check == 10 {
        'X'
    } else {
        char::from_digit(check, 10)?
    };

    Some(format!("{}{}", body, check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("978-0-441-01359-3"), "9780441013593");
        assert_eq!(normalize("0-8044-2957-x"), "080442957X");
    }

    #[test]
    fn test_isbn10_to_isbn13() {
        assert_eq!(isbn10_to_isbn13("0441013597").as_deref(), Some("9780441013593"));
        assert_eq!(isbn10_to_isbn13("123"), None);
    }

    #[test]
    fn test_isbn13_to_isbn10() {
        assert_eq!(isbn13_to_isbn10("9780441013593").as_deref(), Some("0441013597"));
        assert_eq!(isbn13_to_isbn10("9791032305690"), None);
    }

    #[test]
    fn test_is_isbn13() {
        assert!(is_isbn13("9780441013593"));
        assert!(!is_isbn13("978044101359"));
        assert!(!is_isbn13("978044101359X"));
    }
}

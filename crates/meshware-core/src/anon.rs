//! Identifier masking for logs and dump output

const MASK: &str = "******";
const MIN_ID_LEN: usize = 3;
const SHORT_ID_LEN: usize = 20;
const PLAINTEXT_LEN: usize = 4;

/// Mask an identifier, keeping only a few leading and trailing characters.
///
/// Ids shorter than 3 chars are fully masked; ids up to 20 chars keep one
/// char on each side; longer ids keep four.
pub fn anonymize(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len();
    if len < MIN_ID_LEN {
        return MASK.to_string();
    }
    let keep = if len <= SHORT_ID_LEN { 1 } else { PLAINTEXT_LEN };
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[len - keep..].iter().collect();
    format!("{head}{MASK}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymize() {
        assert_eq!(anonymize(""), "******");
        assert_eq!(anonymize("ab"), "******");
        assert_eq!(anonymize("abc"), "a******c");
        assert_eq!(anonymize("camera_0123456789"), "c******9");
        assert_eq!(
            anonymize("0123456789abcdef0123456789"),
            "0123******6789"
        );
    }
}

/// Canonical form of a question used for cache keys and embedding.
///
/// Trims, lowercases, drops control characters and collapses runs of
/// whitespace into a single space.
pub fn normalize_question(question: &str) -> String {
    let lowered = question.trim().to_lowercase();

    let mut result = String::with_capacity(lowered.len());
    let mut prev_was_space = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else if !ch.is_control() {
            result.push(ch);
            prev_was_space = false;
        }
    }

    result.trim().to_string()
}

/// 16 hex digit farmhash of an already normalized question
pub fn fingerprint(normalized: &str) -> String {
    format!("{:016x}", farmhash::hash64(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_variants_agree() {
        let variants = [
            "灭火器怎么用",
            "  灭火器怎么用 ",
            "灭火器怎么用\u{0007}",
            "\t灭火器怎么用\n",
        ];
        let expected = normalize_question(variants[0]);
        for v in variants {
            assert_eq!(normalize_question(v), expected);
            assert_eq!(fingerprint(&normalize_question(v)), fingerprint(&expected));
        }
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(normalize_question("  How   do I\tuse AN Extinguisher? "), "how do i use an extinguisher?");
        assert_eq!(normalize_question(" \u{0000}\u{0001} "), "");
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint("fire");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(fp, fingerprint("fires"));
    }
}

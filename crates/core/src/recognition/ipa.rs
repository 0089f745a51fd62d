use crate::MouthShape;

/// Preston-Blair mouth shape for an IPA symbol emitted by the recognizer.
/// Symbols missing from the table are shown as `rest`.
pub fn ipa_to_mouth_shape(symbol: &str) -> MouthShape {
    match symbol {
        "b" | "m" | "p" => MouthShape::Mbp,
        "f" | "v" => MouthShape::Fv,
        "n" | "s" | "z" => MouthShape::Etc,
        "ð" | "l" | "r" | "ɹ" | "ɻ" => MouthShape::L,
        "ɑ" | "æ" | "ɪ" | "aɪ" | "a" => MouthShape::Ai,
        "ɔ" | "o" | "ɒ" => MouthShape::O,
        "ʊ" | "u" | "ɯ" => MouthShape::U,
        "ʧ" | "ʤ" | "ʃ" | "ʒ" | "w" | "ɚ" | "ɝ" | "aʊ" | "oʊ" | "ɔɪ" => MouthShape::Wq,
        "d" | "g" | "ɡ" | "h" | "k" | "ŋ" | "t" | "θ" | "j" | "ə" | "ʌ" | "ɛ" | "i" | "eɪ"
        | "e" => MouthShape::E,
        "x" => MouthShape::Other("N".to_string()),
        _ => MouthShape::Rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_consonants_and_vowels() {
        assert_eq!(ipa_to_mouth_shape("m"), MouthShape::Mbp);
        assert_eq!(ipa_to_mouth_shape("θ"), MouthShape::E);
        assert_eq!(ipa_to_mouth_shape("aɪ"), MouthShape::Ai);
        assert_eq!(ipa_to_mouth_shape("oʊ"), MouthShape::Wq);
        assert_eq!(ipa_to_mouth_shape("ɡ"), MouthShape::E);
        assert_eq!(ipa_to_mouth_shape("x").to_string(), "N");
    }

    #[test]
    fn unknown_and_silence_symbols_rest() {
        assert_eq!(ipa_to_mouth_shape("ʔ"), MouthShape::Rest);
        assert_eq!(ipa_to_mouth_shape("-"), MouthShape::Rest);
        assert_eq!(ipa_to_mouth_shape("q"), MouthShape::Rest);
        assert_eq!(ipa_to_mouth_shape(""), MouthShape::Rest);
    }
}

use serde_json::{Map, Value};
use std::borrow::Cow;

const FALLBACK_LOCALE: &str = "en";

/// Page text in `locale`, falling back to English. Pages store either plain
/// text or a JSON envelope with one `text_content_<lang>` field per language.
pub fn display_text<'a>(raw: &'a str, locale: &str) -> Cow<'a, str> {
    if !raw.trim_start().starts_with('{') {
        return Cow::Borrowed(raw);
    }
    let Ok(envelope) = serde_json::from_str::<Map<String, Value>>(raw) else {
        return Cow::Borrowed(raw);
    };
    [locale, FALLBACK_LOCALE]
        .iter()
        .find_map(|lang| {
            envelope
                .get(&format!("text_content_{}", lang))
                .and_then(Value::as_str)
        })
        .map(|text| Cow::Owned(text.to_string()))
        .unwrap_or(Cow::Borrowed(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE: &str = r#"{"text_content_en": "The dragon sneezed flowers.", "text_content_fr": "Le dragon éternuait des fleurs."}"#;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(display_text("Once upon a time.", "fr"), "Once upon a time.");
    }

    #[test]
    fn test_envelope_follows_locale() {
        assert_eq!(display_text(ENVELOPE, "en"), "The dragon sneezed flowers.");
        assert_eq!(display_text(ENVELOPE, "fr"), "Le dragon éternuait des fleurs.");
    }

    #[test]
    fn test_unknown_locale_falls_back_to_english() {
        assert_eq!(display_text(ENVELOPE, "ja"), "The dragon sneezed flowers.");
    }

    #[test]
    fn test_envelope_without_match_is_left_alone() {
        let raw = r#"{"text_content_fr": "Le dragon"}"#;
        assert_eq!(display_text(raw, "es"), raw);
        assert_eq!(display_text("{not json", "en"), "{not json");
    }
}

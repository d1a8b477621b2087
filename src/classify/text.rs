//! Text classification rules
//!
//! Rule order matters: URL and email matches only annotate, code detection
//! runs last and decides the final type over URL.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::Classification;
use crate::clipboard::{ContentType, Metadata};

/// Encoding label recorded for every text item
pub const TEXT_ENCODING: &str = "UTF-8";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static CODE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:def|class|function|import|from|if|for|while|try|catch)\s").unwrap()
});

/// Languages in detection priority order
static LANGUAGE_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            "python",
            vec![
                Regex::new(r"\bdef\s+\w+\s*\(").unwrap(),
                Regex::new(r"(?m)^\s*(?:from\s+[\w.]+\s+)?import\s+[\w.]+").unwrap(),
                Regex::new(r"\bprint\s*\(").unwrap(),
                Regex::new(r"\belif\b").unwrap(),
                Regex::new(r"\bself\.").unwrap(),
                Regex::new(r"(?m)^\s*(?:if|for|while|def|class)\b[^\n]*:\s*$").unwrap(),
            ],
        ),
        (
            "javascript",
            vec![
                Regex::new(r"\bfunction\s*\w*\s*\(").unwrap(),
                Regex::new(r"\b(?:const|let|var)\s+\w+\s*=").unwrap(),
                Regex::new(r"=>").unwrap(),
                Regex::new(r"\bconsole\.\w+\s*\(").unwrap(),
                Regex::new(r"\bdocument\.\w+").unwrap(),
                Regex::new(r"\brequire\s*\(").unwrap(),
            ],
        ),
        (
            "html",
            vec![
                Regex::new(r"(?i)<!doctype\s+html").unwrap(),
                Regex::new(
                    r"(?i)<\s*(?:html|head|body|div|span|p|a|ul|li|table|script|style|img|form|input)\b[^>]*>",
                )
                .unwrap(),
                Regex::new(r"</\s*[A-Za-z][\w-]*\s*>").unwrap(),
            ],
        ),
        (
            "css",
            vec![
                Regex::new(r"\{\s*[\w-]+\s*:\s*[^;{}]+;").unwrap(),
                Regex::new(r"@(?:media|import|keyframes|font-face)\b").unwrap(),
                Regex::new(r"\b(?:color|margin|padding|font-size|display|background)\s*:").unwrap(),
            ],
        ),
        (
            "sql",
            vec![
                Regex::new(r"(?is)\bselect\b.+?\bfrom\b").unwrap(),
                Regex::new(r"(?i)\binsert\s+into\b").unwrap(),
                Regex::new(r"(?i)\bcreate\s+table\b").unwrap(),
                Regex::new(r"(?i)\bupdate\s+\w+\s+set\b").unwrap(),
                Regex::new(r"(?i)\bdelete\s+from\b").unwrap(),
            ],
        ),
    ]
});

/// Classify inline text
pub fn classify_text(text: &str) -> Classification {
    let mut content_type = ContentType::Text;
    let mut metadata = Metadata::new();
    let mut patterns = Map::new();

    let urls = find_all(&URL_PATTERN, text);
    if !urls.is_empty() {
        content_type = ContentType::Url;
        patterns.insert("url".to_string(), json!(urls));
    }

    let emails = find_all(&EMAIL_PATTERN, text);
    if !emails.is_empty() {
        patterns.insert("email".to_string(), json!(emails));
    }

    if CODE_KEYWORDS.is_match(text) {
        content_type = ContentType::Code;
        metadata.insert("language".to_string(), json!(detect_language(text)));
    }

    if !patterns.is_empty() {
        metadata.insert("patterns".to_string(), Value::Object(patterns));
    }
    metadata.insert("length".to_string(), json!(text.chars().count()));
    metadata.insert("encoding".to_string(), json!(TEXT_ENCODING));

    Classification {
        content_type,
        metadata,
    }
}

/// First language, in priority order, with any matching pattern
pub fn detect_language(code: &str) -> &'static str {
    LANGUAGE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(code)))
        .map(|(language, _)| *language)
        .unwrap_or("unknown")
}

fn find_all(pattern: &Regex, text: &str) -> Vec<String> {
    pattern.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("import requests\nrequests.get(url)", "python")]
    #[case("def greet(name):\n    return name", "python")]
    #[case("function greet(name) { console.log(name); }", "javascript")]
    #[case("if (ready) { const total = a + b; }", "javascript")]
    #[case("<div class=\"box\">for example</div>", "html")]
    #[case("if you style it: .btn { color: red; }", "css")]
    #[case("select name from users where id = 1", "sql")]
    #[case("while true do nothing", "unknown")]
    fn test_language_detection(#[case] input: &str, #[case] language: &str) {
        let classification = classify_text(input);
        assert_eq!(classification.content_type, ContentType::Code);
        assert_eq!(classification.metadata["language"], json!(language));
    }

    #[test]
    fn test_plain_text() {
        let classification = classify_text("Hello world");
        assert_eq!(classification.content_type, ContentType::Text);
        assert!(!classification.metadata.contains_key("patterns"));
        assert_eq!(classification.metadata["length"], json!(11));
        assert_eq!(classification.metadata["encoding"], json!("UTF-8"));
    }

    #[test]
    fn test_url_detection() {
        let classification = classify_text("see https://example.com/a?b=1 and http://x.io");
        assert_eq!(classification.content_type, ContentType::Url);
        assert_eq!(
            classification.metadata["patterns"]["url"],
            json!(["https://example.com/a?b=1", "http://x.io"])
        );
    }

    #[test]
    fn test_email_annotates_without_changing_type() {
        let classification = classify_text("Contact me at a@b.com");
        assert_eq!(classification.content_type, ContentType::Text);
        assert_eq!(classification.metadata["patterns"]["email"], json!(["a@b.com"]));
        assert!(classification.metadata["patterns"].get("url").is_none());
    }

    #[test]
    fn test_code_wins_over_url() {
        let classification = classify_text("import requests # see http://example.com");
        assert_eq!(classification.content_type, ContentType::Code);
        assert_eq!(classification.metadata["language"], json!("python"));
        assert_eq!(
            classification.metadata["patterns"]["url"],
            json!(["http://example.com"])
        );
    }

    #[test]
    fn test_keyword_needs_trailing_whitespace() {
        assert_eq!(classify_text("classify").content_type, ContentType::Text);
        assert_eq!(classify_text("iffy").content_type, ContentType::Text);
        assert_eq!(classify_text("trying").content_type, ContentType::Text);
    }

    #[test]
    fn test_keyword_must_be_a_whole_word() {
        assert_eq!(classify_text("elif x").content_type, ContentType::Text);
    }

    #[test]
    fn test_length_counts_characters() {
        let classification = classify_text("héllo");
        assert_eq!(classification.metadata["length"], json!(5));
    }
}

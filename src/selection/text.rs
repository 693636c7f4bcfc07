//! Best-effort text extraction from stored engine responses.

use serde_json::Value;

use crate::models::DocumentPage;

const SEPARATOR: &str = "\n\n";

/// Page text from a `pages` array: `text` if present, else `content`.
fn page_fragments(pages: &Value) -> Vec<&str> {
    pages
        .as_array()
        .map(|pages| {
            pages
                .iter()
                .filter_map(|page| match page.get("text") {
                    Some(text) => text.as_str(),
                    None => page.get("content").and_then(Value::as_str),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Concatenate page text from a vendor response.
///
/// The first recognised shape wins, by key presence:
/// 1. top-level `pages[].text|content`
/// 2. `document.pages[].text|content`
/// 3. top-level `text`
/// 4. `fullTextAnnotation.text`
/// 5. `responses[].fullTextAnnotation.text`
///
/// Anything else yields an empty string.
pub fn extract_text(response: &Value) -> String {
    let fragments: Vec<&str> = if let Some(pages) = response.get("pages") {
        page_fragments(pages)
    } else if let Some(pages) = response.get("document").and_then(|d| d.get("pages")) {
        page_fragments(pages)
    } else if let Some(text) = response.get("text") {
        text.as_str().into_iter().collect()
    } else if let Some(annotation) = response.get("fullTextAnnotation") {
        annotation
            .get("text")
            .and_then(Value::as_str)
            .into_iter()
            .collect()
    } else if let Some(responses) = response.get("responses").and_then(Value::as_array) {
        responses
            .iter()
            .filter_map(|r| r.get("fullTextAnnotation")?.get("text")?.as_str())
            .collect()
    } else {
        Vec::new()
    };

    fragments.join(SEPARATOR)
}

/// Persisted pages joined in page order, skipping empty pages.
pub fn join_pages(pages: &[DocumentPage]) -> String {
    let mut ordered: Vec<&DocumentPage> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_number);
    ordered
        .iter()
        .map(|p| p.text_content.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_top_level_pages() {
        let v = json!({"pages": [{"text": "one"}, {"content": "two"}, {"lines": []}]});
        assert_eq!(extract_text(&v), "one\n\ntwo");
    }

    #[test]
    fn test_nested_document_pages() {
        let v = json!({"document": {"pages": [{"content": "a"}, {"content": "b"}]}});
        assert_eq!(extract_text(&v), "a\n\nb");
    }

    #[test]
    fn test_text_and_annotations() {
        assert_eq!(extract_text(&json!({"text": "plain"})), "plain");
        assert_eq!(
            extract_text(&json!({"fullTextAnnotation": {"text": "vision"}})),
            "vision"
        );
        let v = json!({"responses": [
            {"fullTextAnnotation": {"text": "p1"}},
            {"error": {"code": 3}},
            {"fullTextAnnotation": {"text": "p2"}}
        ]});
        assert_eq!(extract_text(&v), "p1\n\np2");
    }

    #[test]
    fn test_first_shape_wins_even_if_empty() {
        let v = json!({"pages": [], "text": "ignored"});
        assert_eq!(extract_text(&v), "");
    }

    #[test]
    fn test_unrecognised_shapes_are_empty() {
        assert_eq!(extract_text(&json!({"blocks": ["x"]})), "");
        assert_eq!(extract_text(&json!("just a string")), "");
        assert_eq!(extract_text(&json!({"text": 42})), "");
    }

    #[test]
    fn test_join_pages_orders_by_number() {
        let page = |n: i32, text: &str| DocumentPage {
            id: n,
            document_id: "d".into(),
            ocr_run_id: "r".into(),
            page_number: n,
            text_content: text.into(),
            word_count: 0,
            confidence_score: None,
            created_at: Utc::now(),
        };
        let pages = vec![page(2, "second"), page(3, ""), page(1, "first")];
        assert_eq!(join_pages(&pages), "first\n\nsecond");
        assert_eq!(join_pages(&[]), "");
    }
}

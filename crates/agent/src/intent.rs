//! Best-effort guess of which tool a request will start with.
//!
//! Only used for telemetry: the loop logs the guess next to the tool the
//! model actually picked. Nothing branches on it.

const INTENTS: &[(&[&str], &str)] = &[
    (&["screenshot", "capture the screen"], "screenshot"),
    (&["go to", "navigate", "open ", "visit", "http://", "https://"], "navigate"),
    (&["scroll"], "scroll"),
    (&["type ", "fill", "enter ", "search for", "write "], "type_text"),
    (&["click", "press the", "select ", "tap "], "click"),
    (&["press ", "hit enter", "keyboard"], "press_key"),
    (&["wait"], "wait"),
    (&["read", "summar", "what is", "what's", "extract", "title", "describe"], "get_page_context"),
];

/// The tool a request most likely needs first, if any keyword matches.
pub fn expected_tool_for_intent(request: &str) -> Option<&'static str> {
    let lower = request.to_lowercase();
    INTENTS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, tool)| *tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_wins_over_reading() {
        assert_eq!(
            expected_tool_for_intent("navigate to example.com and read the title"),
            Some("navigate")
        );
    }

    #[test]
    fn reading_requests() {
        assert_eq!(expected_tool_for_intent("Summarize this page"), Some("get_page_context"));
    }

    #[test]
    fn no_match() {
        assert_eq!(expected_tool_for_intent("hello there"), None);
    }
}

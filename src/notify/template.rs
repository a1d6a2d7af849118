//! Notification message rendering

use std::collections::BTreeMap;

/// Renders a message template for one new item
///
/// `{target}` expands to the target's display name and `{url}` to the item
/// URL; any other `{name}` placeholder expands to the extracted field of
/// that name. A missing field expands to the empty string, so a gap in the
/// message never drops the notification. Braces without a closing partner
/// pass through literally.
pub fn render_message(
    template: &str,
    target_name: &str,
    url: &str,
    fields: &BTreeMap<String, String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match key {
                    "target" => out.push_str(target_name),
                    "url" => out.push_str(url),
                    field => {
                        if let Some(value) = fields.get(field) {
                            out.push_str(value);
                        }
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Whether a rendered message contains any configured ignore token
///
/// Matching is case-insensitive substring containment.
pub fn contains_ignore_token(message: &str, tokens: &[String]) -> bool {
    if tokens.is_empty() {
        return false;
    }
    let haystack = message.to_lowercase();
    tokens
        .iter()
        .any(|token| !token.is_empty() && haystack.contains(&token.to_lowercase()))
}

//! Placeholder substitution for prompt and rendering templates.

/// Fill `{name}` placeholders in a single left-to-right pass.
///
/// Substituted values are never re-scanned, so a value that itself contains
/// `{content}` is emitted verbatim. Unknown placeholders stay as written.
///
/// ```rust,ignore
/// let out = format_template("{key}: {value}", &[("key", "a"), ("value", "{b}")]);
/// assert_eq!(out, "a: {b}");
/// ```
pub fn format_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
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

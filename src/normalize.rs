//! Canonicalisation of avatar URLs scraped out of upstream markup.

const ESCAPES: &[(&str, &str)] = &[
    ("\\u002F", "/"),
    ("\\u002f", "/"),
    ("\\u0026", "&"),
    ("\\/", "/"),
];

/// Turns a scraped, possibly escaped or protocol-relative URL into an absolute
/// one. Returns `None` for empty input.
///
/// Escapes are resolved to a fixpoint before `//host/...` is promoted to
/// `https://host/...`, so `normalize_url(normalize_url(x)) == normalize_url(x)`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = raw.trim().to_string();
    if url.is_empty() {
        return None;
    }

    loop {
        let unescaped = ESCAPES
            .iter()
            .fold(url.clone(), |acc, (from, to)| acc.replace(from, to));
        if unescaped == url {
            break;
        }
        url = unescaped;
    }

    if url.starts_with("//") {
        url = format!("https:{}", url);
    }
    Some(url)
}

use std::borrow::Cow;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Decodes XML and HTML character references in `s`.
///
/// Handles the five XML builtins (`&amp;`, `&lt;`, `&gt;`, `&quot;`, `&apos;`),
/// decimal and hexadecimal numeric references, and the HTML named entities
/// podcast feeds routinely use (`&nbsp;`, `&eacute;`, ...). Unknown references
/// are left as-is.
///
/// Returns `Cow::Borrowed` when `s` contains no `&` (common case).
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    html_escape::decode_html_entities(s)
}

/// Normalizes raw `<title>` inner text into the key used to correlate items
/// between the parsed feed and the original bytes.
///
/// - trims surrounding whitespace
/// - strips a surrounding `<![CDATA[...]]>` wrapper (and trims again)
/// - decodes entities
/// - trims the decoded result
///
/// # Examples
///
/// ```
/// use rss_proxy::util::normalize_title;
///
/// assert_eq!(normalize_title("  KEEP ME "), "KEEP ME");
/// assert_eq!(normalize_title("<![CDATA[ CDATA KEEP ]]>"), "CDATA KEEP");
/// assert_eq!(normalize_title("Fish &amp; Chips"), "Fish & Chips");
/// ```
pub fn normalize_title(raw: &str) -> String {
    let mut s = raw.trim();

    if let Some(inner) = s
        .strip_prefix(CDATA_OPEN)
        .and_then(|rest| rest.strip_suffix(CDATA_CLOSE))
    {
        s = inner.trim();
    }

    decode_entities(s).trim().to_owned()
}

//! URL, query-string and cookie encoding helpers.
//!
//! Names and values are percent-encoded RFC 3986 style: everything except
//! ASCII alphanumerics and `-_.~` is escaped, spaces become `%20`.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const RAW_URL: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a single string.
pub fn encode_string(s: &str) -> String {
    utf8_percent_encode(s, RAW_URL).to_string()
}

/// Reverse [`encode_string`]. Invalid UTF-8 is replaced, never rejected.
pub fn decode_string(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Encode key/value pairs as `k1=v1&k2=v2`, in the given order.
pub fn build_query<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_string(k.as_ref()), encode_string(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append an encoded query to `url`, reusing an existing `?`.
pub fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = match url.find('?') {
        None => "?",
        Some(pos) if pos + 1 == url.len() || url.ends_with('&') => "",
        Some(_) => "&",
    };
    format!("{url}{separator}{query}")
}

/// Render cookies as a `Cookie` header value: `name=value; name=value`.
///
/// Returns an empty string when there are no cookies.
pub fn encode_cookies<'a, I>(cookies: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    cookies
        .into_iter()
        .map(|(name, value)| format!("{}={}", encode_string(name), encode_string(value)))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a `Cookie` header value back into decoded name/value pairs.
///
/// Segments without `=` are skipped.
pub fn decode_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|segment| {
            let (name, value) = segment.trim().split_once('=')?;
            Some((decode_string(name), decode_string(value)))
        })
        .collect()
}

//! Escaping helpers for values that end up inside URLs or SOAP envelopes.
//!
//! Metadata keys are user controlled. Every key interpolated into a REST
//! path goes through [`url::encode_param`], every value written into a
//! SOAP body goes through [`xml::escape`].

/// URL encoding utilities.
pub mod url {
    /// URL-encode a path or query parameter value.
    ///
    /// ```rust
    /// use mcsync_client::security::url;
    ///
    /// assert_eq!(url::encode_param("a/b c"), "a%2Fb%20c");
    /// ```
    #[must_use]
    pub fn encode_param(value: &str) -> String {
        urlencoding::encode(value).into_owned()
    }

    /// Validate that an external key is safe for use in REST paths without
    /// surprising the server: non-empty, no control characters.
    #[must_use]
    pub fn is_valid_key(key: &str) -> bool {
        !key.is_empty() && !key.chars().any(char::is_control)
    }
}

/// XML escaping utilities.
pub mod xml {
    /// Escape a string for safe inclusion in XML content.
    ///
    /// ```rust
    /// use mcsync_client::security::xml;
    ///
    /// assert_eq!(xml::escape("a < b & 'c'"), "a &lt; b &amp; &apos;c&apos;");
    /// ```
    #[must_use]
    pub fn escape(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len() + 16);
        for ch in value.chars() {
            match ch {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                '\'' => escaped.push_str("&apos;"),
                _ => escaped.push(ch),
            }
        }
        escaped
    }
}

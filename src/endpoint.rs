use std::sync::OnceLock;

use regex::Regex;

/// Plain HTTP scheme, tokens must only travel over TLS
const HTTP_SCHEME: &str = r"^http:";

/// The `query` method at the end of a dataselect URL
const QUERY_METHOD: &str = r"query$";

struct Patterns {
    scheme: Regex,
    query: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        scheme: Regex::new(HTTP_SCHEME).expect("static regex"),
        query: Regex::new(QUERY_METHOD).expect("static regex"),
    })
}

/// URL of the token exchange: `https` and `.../auth` in place of `.../query`
pub fn auth_url(query_url: &str) -> String {
    let p = patterns();
    let secure = p.scheme.replace(query_url, "https:");
    p.query.replace(&secure, "auth").into_owned()
}

/// URL of the digest-protected dataselect method: `.../queryauth` in place of `.../query`
pub fn queryauth_url(query_url: &str) -> String {
    patterns()
        .query
        .replace(query_url, "queryauth")
        .into_owned()
}

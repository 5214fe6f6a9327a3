//! Invitation links
//!
//! The initiator shares `<base>?invite=<token>`. The responder's entry point
//! hands whatever the user supplied (full link, bare query string or the
//! token itself) to [`inbound_token`], and the presence of a result decides
//! the call's role.

use url::form_urlencoded;
use url::Url;

/// Query parameter carrying the encoded offer.
pub const INVITE_PARAM: &str = "invite";

/// Build the shareable link for an encoded offer.
///
/// Other query parameters of `base` are kept; a stale `invite` value and any
/// fragment are dropped.
pub fn invitation_link(base: &Url, token: &str) -> Url {
    let mut link = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != INVITE_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    link.set_fragment(None);
    link.set_query(None);
    link.query_pairs_mut()
        .extend_pairs(kept)
        .append_pair(INVITE_PARAM, token);
    link
}

/// Extract the inbound token from user input.
///
/// Returns `None` when the input is empty or is a link/query string without
/// an `invite` parameter.
pub fn inbound_token(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(input) {
        if url.has_host() {
            return token_from_pairs(url.query_pairs());
        }
    }

    if let Some(query) = input.strip_prefix('?') {
        return token_from_pairs(form_urlencoded::parse(query.as_bytes()));
    }

    if input.starts_with(&format!("{}=", INVITE_PARAM)) || input.contains(&format!("&{}=", INVITE_PARAM)) {
        return token_from_pairs(form_urlencoded::parse(input.as_bytes()));
    }

    Some(input.to_string())
}

fn token_from_pairs<'a>(
    pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
) -> Option<String> {
    pairs
        .filter(|(key, _)| key == INVITE_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .find(|value| !value.is_empty())
        // Form decoding turns '+' into a space; standard base64 tokens need it back.
        .map(|value| value.replace(' ', "+"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://zero-call.org/").unwrap()
    }

    #[test]
    fn test_link_carries_token() {
        let link = invitation_link(&base(), "eyJ0eXBlIjoib2ZmZXIifQ");
        assert_eq!(
            link.as_str(),
            "https://zero-call.org/?invite=eyJ0eXBlIjoib2ZmZXIifQ"
        );
    }

    #[test]
    fn test_link_keeps_other_params_and_replaces_invite() {
        let base = Url::parse("https://example.com/call?lang=fr&invite=old#top").unwrap();
        let link = invitation_link(&base, "new_token-1");
        assert_eq!(
            link.as_str(),
            "https://example.com/call?lang=fr&invite=new_token-1"
        );
    }

    #[test]
    fn test_inbound_from_link_query_and_bare_token() {
        let link = invitation_link(&base(), "abc-DEF_123");
        assert_eq!(inbound_token(link.as_str()).as_deref(), Some("abc-DEF_123"));
        assert_eq!(inbound_token("?invite=abc").as_deref(), Some("abc"));
        assert_eq!(inbound_token("lang=en&invite=xyz").as_deref(), Some("xyz"));
        assert_eq!(inbound_token("  tokenvalue \n").as_deref(), Some("tokenvalue"));
    }

    #[test]
    fn test_no_inbound_token() {
        assert_eq!(inbound_token(""), None);
        assert_eq!(inbound_token("https://zero-call.org/?lang=fr"), None);
        assert_eq!(inbound_token("?invite="), None);
    }

    #[test]
    fn test_plus_survives_form_decoding() {
        assert_eq!(
            inbound_token("https://zero-call.org/?invite=ab+cd/ef==").as_deref(),
            Some("ab+cd/ef==")
        );
    }
}

use relayd_pool::UpstreamKind;

pub type Headers = Vec<(String, String)>;

/// Attaches the upstream credential at the wire position its kind expects.
/// Returns the query string suffix (empty unless Gemini).
pub fn attach(kind: UpstreamKind, credential: &str, headers: &mut Headers) -> String {
    match kind {
        UpstreamKind::Claude => {
            headers.push(("x-api-key".to_string(), credential.to_string()));
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("anthropic-version")) {
                headers.push(("anthropic-version".to_string(), "2023-06-01".to_string()));
            }
            String::new()
        }
        UpstreamKind::Openai => {
            headers.push(("Authorization".to_string(), format!("Bearer {credential}")));
            String::new()
        }
        UpstreamKind::Gemini => format!("?key={credential}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_uses_header_credential_and_default_version() {
        let mut headers = Headers::new();
        let query = attach(UpstreamKind::Claude, "sk-ant", &mut headers);
        assert!(query.is_empty());
        assert!(headers.contains(&("x-api-key".to_string(), "sk-ant".to_string())));
        assert!(headers.iter().any(|(k, _)| k == "anthropic-version"));
    }

    #[test]
    fn openai_uses_bearer_header() {
        let mut headers = Headers::new();
        attach(UpstreamKind::Openai, "sk-oai", &mut headers);
        assert!(headers.contains(&("Authorization".to_string(), "Bearer sk-oai".to_string())));
    }

    #[test]
    fn gemini_uses_query_parameter() {
        let mut headers = Headers::new();
        let query = attach(UpstreamKind::Gemini, "AIza", &mut headers);
        assert_eq!(query, "?key=AIza");
        assert!(headers.is_empty());
    }
}

use regex::Regex;
use log::debug;

use crate::utils::MidnightError;

const DOMAIN_GRAMMAR: &str = r"^(https?://)?([a-z0-9-]+\.)+[a-z]{2,6}$";

/// Compiled predicate selecting which URLs are eligible for transformation.
///
/// Built from a single domain such as `example.com` or `https://api.example.co`.
/// Only the registrable label (`example`) is kept: any scheme among http/https,
/// any chain of subdomains and any 2-6 letter top-level label are accepted.
#[derive(Clone, Debug)]
pub struct TargetRule {
    label: String,
    re: Regex
}

impl TargetRule {
    pub fn compile(domain: &str) -> Result<Self, MidnightError> {
        let domain = domain.trim().to_lowercase();

        let grammar = Regex::new(DOMAIN_GRAMMAR)?;
        if !grammar.is_match(&domain) {
            return Err(
                MidnightError::InvalidDomainFormat(format!("'{}' is not a domain name", domain))
            );
        }

        let host = domain
            .trim_start_matches("https://")
            .trim_start_matches("http://");

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 2 {
            return Err(
                MidnightError::InvalidDomainFormat(format!("'{}' has no registrable label", domain))
            );
        }

        let label = labels[labels.len() - 2].to_string();
        let url_re = format!(
            r"(?i)^https?://([a-z0-9-]+\.)*{}\.[a-z]{{2,6}}(:[0-9]+)?([/?#].*)?$",
            regex::escape(&label)
        );
        debug!("Target rule for '{}': {}", domain, &url_re);

        Ok(
            TargetRule {
                label,
                re: Regex::new(&url_re)?
            }
        )
    }

    pub fn matches(&self, url: &str) -> bool {
        self.re.is_match(url)
    }

    /// Registrable (second-level) label the rule was built around
    pub fn label(&self) -> &str {
        &self.label
    }
}

// ---------------------------------------------------------------------------------------------- //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_subdomains_and_paths() {
        let rule = TargetRule::compile("example.com").unwrap();
        assert_eq!(rule.label(), "example");

        assert!(rule.matches("https://example.com"));
        assert!(rule.matches("https://example.com/"));
        assert!(rule.matches("http://api.example.com/submit"));
        assert!(rule.matches("https://a.b.example.org/any/path?x=1"));
        assert!(rule.matches("https://example.io:8443/v1"));
        assert!(rule.matches("HTTPS://API.EXAMPLE.COM/Upper"));
    }

    #[test]
    fn rejects_lookalikes() {
        let rule = TargetRule::compile("example.com").unwrap();

        assert!(!rule.matches("https://evil-example.com"));
        assert!(!rule.matches("https://notexample.com/"));
        assert!(!rule.matches("https://example.com.evil.net/"));
        assert!(!rule.matches("ftp://example.com/"));
        assert!(!rule.matches("example.com:443"));
        assert!(!rule.matches("https://other.com/example.com"));
    }

    #[test]
    fn normalizes_scheme_case_and_whitespace() {
        let rule = TargetRule::compile("  HTTPS://Shop.Example.CO.uk \n").unwrap();
        assert_eq!(rule.label(), "co");

        let rule = TargetRule::compile("http://impactrooms.com").unwrap();
        assert_eq!(rule.label(), "impactrooms");
        assert!(rule.matches("https://app.impactrooms.com/api"));
    }

    #[test]
    fn rejects_malformed_domains() {
        for bad in ["", "localhost", "example.", ".com", "exa mple.com", "example.c", "example.toolong", "ftp://example.com", "example.com/path"] {
            match TargetRule::compile(bad) {
                Err(MidnightError::InvalidDomainFormat(_)) => {},
                other => panic!("'{}' should be rejected, got {:?}", bad, other)
            }
        }
    }

    #[test]
    fn property_holds_for_accepted_domains() {
        for domain in ["example.com", "a-b.net", "x1.y2.io", "https://deep.sub.domain.travel"] {
            let rule = TargetRule::compile(domain).unwrap();
            let label = rule.label().to_string();

            assert!(rule.matches(&format!("https://sub.{}.com/any/path", label)), "{}", domain);
            assert!(!rule.matches(&format!("https://evil-{}.com", label)), "{}", domain);
        }
    }

    #[test]
    fn rule_is_shareable_across_threads() {
        let rule = std::sync::Arc::new(TargetRule::compile("example.com").unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let rule = rule.clone();
                std::thread::spawn(move || rule.matches(&format!("https://s{}.example.com/", i)))
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}

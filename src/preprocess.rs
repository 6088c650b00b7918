use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::shortener::{RedirectHttp, resolve_shortened_url};

/// URLs needed downstream of shortener handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedUrl {
    /// Resolved destination when a shortener was followed, otherwise the input.
    pub url_for_matching: String,
    /// Raw input, never modified.
    pub original_url: String,
    pub is_safelink: bool,
}

impl ProcessedUrl {
    fn passthrough(input: &str) -> Self {
        Self {
            url_for_matching: input.to_string(),
            original_url: input.to_string(),
            is_safelink: false,
        }
    }

    /// Safelink wrappers are launched as-is; everything else opens the resolved URL.
    pub fn launch_target(&self) -> &str {
        if self.is_safelink {
            &self.original_url
        } else {
            &self.url_for_matching
        }
    }
}

/// Resolve shortener links before matching. Never fails: every problem degrades
/// to matching against the input as given.
pub fn process_url(config: &Config, input: &str, http: &dyn RedirectHttp) -> ProcessedUrl {
    let parsed = match Url::parse(input) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(url = input, error = %err, "input is not an absolute URL, skipping shortener checks");
            return ProcessedUrl::passthrough(input);
        }
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        debug!(url = input, scheme = parsed.scheme(), "URL scheme is not http/https, skipping shortener checks");
        return ProcessedUrl::passthrough(input);
    }

    let Some(hostname) = parsed.host_str() else {
        return ProcessedUrl::passthrough(input);
    };

    let Some(shortener) = config.lookup_shortener(hostname) else {
        debug!(url = input, "URL is not a recognized shortener domain");
        return ProcessedUrl::passthrough(input);
    };

    info!(domain = hostname, safelink = shortener.is_safelink, "detected shortener domain, resolving");
    match resolve_shortened_url(input, http) {
        Ok(resolved) => {
            info!(original_url = input, resolved_url = %resolved, "resolved shortener URL");
            ProcessedUrl {
                url_for_matching: resolved,
                original_url: input.to_string(),
                is_safelink: shortener.is_safelink,
            }
        }
        Err(err) => {
            warn!(original_url = input, error = %err, "failed to resolve shortened URL, using original for matching");
            ProcessedUrl::passthrough(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shortener::{HopMethod, HopResponse, TransportError};
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct StubHttp {
        responses: HashMap<String, HopResponse>,
        calls: RefCell<usize>,
    }

    impl StubHttp {
        fn new(entries: Vec<(&str, u16, Option<&str>)>) -> Self {
            let responses = entries
                .into_iter()
                .map(|(url, status, location)| {
                    (
                        url.to_string(),
                        HopResponse {
                            status,
                            location: location.map(str::to_string),
                        },
                    )
                })
                .collect();
            Self {
                responses,
                calls: RefCell::new(0),
            }
        }
    }

    impl RedirectHttp for StubHttp {
        fn fetch(&self, _method: HopMethod, url: &str) -> Result<HopResponse, TransportError> {
            *self.calls.borrow_mut() += 1;
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| format!("no stub for {url}").into())
        }
    }

    #[test]
    fn plain_urls_pass_through_without_requests() {
        let config = Config::default();
        let stub = StubHttp::new(vec![]);
        for input in ["https://example.com/a", "http://example.com", "", "not a url", "mailto:a@b.c"] {
            let processed = process_url(&config, input, &stub);
            assert_eq!(processed.url_for_matching, input);
            assert_eq!(processed.original_url, input);
            assert!(!processed.is_safelink);
        }
        assert_eq!(*stub.calls.borrow(), 0);
    }

    #[test]
    fn non_http_scheme_on_shortener_domain_is_ignored() {
        let config = Config::default();
        let stub = StubHttp::new(vec![]);
        let processed = process_url(&config, "ftp://bit.ly/abc", &stub);
        assert_eq!(processed.url_for_matching, "ftp://bit.ly/abc");
        assert_eq!(*stub.calls.borrow(), 0);
    }

    #[test]
    fn builtin_shortener_is_resolved() {
        let config = Config::default();
        let stub = StubHttp::new(vec![
            ("https://bit.ly/abc", 301, Some("https://example.com/work")),
            ("https://example.com/work", 200, None),
        ]);
        let processed = process_url(&config, "https://bit.ly/abc", &stub);
        assert_eq!(processed.url_for_matching, "https://example.com/work");
        assert_eq!(processed.original_url, "https://bit.ly/abc");
        assert!(!processed.is_safelink);
        assert_eq!(processed.launch_target(), "https://example.com/work");
    }

    #[test]
    fn safelink_keeps_original_as_launch_target() {
        let mut config = Config::default();
        config.add_manual_shortener("safe.example.net", true).unwrap();
        let input = "https://safe.example.net/?url=https%3A%2F%2Fexample.com";
        let stub = StubHttp::new(vec![
            (input, 302, Some("https://example.com")),
            ("https://example.com", 200, None),
        ]);
        let processed = process_url(&config, input, &stub);
        assert_eq!(processed.url_for_matching, "https://example.com");
        assert_eq!(processed.original_url, input);
        assert!(processed.is_safelink);
        assert_eq!(processed.launch_target(), input);
    }

    #[test]
    fn resolution_failure_degrades_to_original() {
        let mut config = Config::default();
        config.add_manual_shortener("go.example.org", true).unwrap();
        let stub = StubHttp::new(vec![("https://go.example.org/x", 500, None)]);
        let processed = process_url(&config, "https://go.example.org/x", &stub);
        assert_eq!(processed.url_for_matching, "https://go.example.org/x");
        assert_eq!(processed.original_url, "https://go.example.org/x");
        assert!(!processed.is_safelink);
    }

    #[test]
    fn subdomain_of_shortener_is_not_matched() {
        let config = Config::default();
        let stub = StubHttp::new(vec![]);
        let processed = process_url(&config, "https://www.bit.ly/abc", &stub);
        assert_eq!(processed.url_for_matching, "https://www.bit.ly/abc");
        assert_eq!(*stub.calls.borrow(), 0);
    }
}

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::LOCATION;
use reqwest::{Method, redirect};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const USER_AGENT: &str = concat!("linkroute/", env!("CARGO_PKG_VERSION"));

pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopMethod {
    Head,
    Get,
}

impl From<HopMethod> for Method {
    fn from(method: HopMethod) -> Self {
        match method {
            HopMethod::Head => Method::HEAD,
            HopMethod::Get => Method::GET,
        }
    }
}

/// Status line and redirect target of a single response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopResponse {
    pub status: u16,
    pub location: Option<String>,
}

/// One request per call; implementations must not follow redirects themselves.
pub trait RedirectHttp {
    fn fetch(&self, method: HopMethod, url: &str) -> Result<HopResponse, TransportError>;
}

pub struct BlockingRedirectHttp {
    client: Client,
}

impl BlockingRedirectHttp {
    pub fn new() -> reqwest::Result<Self> {
        let client = Self::client_builder().build()?;
        Ok(Self { client })
    }

    /// Builder preconfigured with the resolver's user agent, timeout and redirect policy.
    pub fn client_builder() -> reqwest::blocking::ClientBuilder {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::none())
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl RedirectHttp for BlockingRedirectHttp {
    fn fetch(&self, method: HopMethod, url: &str) -> Result<HopResponse, TransportError> {
        let response = self.client.request(method.into(), url).send()?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        Ok(HopResponse {
            status: response.status().as_u16(),
            location,
        })
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to parse URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to perform request for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("redirect response for {url} had no Location header (status: {status})")]
    MissingLocation { url: String, status: u16 },
    #[error("failed to parse redirect location '{location}': {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unexpected status code {status} while resolving {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("too many redirects resolving {url}")]
    TooManyRedirects { url: String },
}

/// Follow a shortened URL hop by hop and return where it finally lands.
/// Absolute `Location` values are taken verbatim; relative ones are joined onto the current URL.
pub fn resolve_shortened_url(
    short_url: &str,
    http: &dyn RedirectHttp,
) -> Result<String, ResolveError> {
    Url::parse(short_url).map_err(|source| ResolveError::InvalidUrl {
        url: short_url.to_string(),
        source,
    })?;
    let mut current = short_url.to_string();

    for hop in 0..MAX_REDIRECTS {
        let response = match http.fetch(HopMethod::Head, &current) {
            Ok(response) => response,
            // Some shorteners reject HEAD; only the first hop gets a GET retry.
            Err(err) if hop == 0 => {
                debug!(url = %current, error = %err, "HEAD request failed, falling back to GET");
                http.fetch(HopMethod::Get, &current)
                    .map_err(|source| ResolveError::Request {
                        url: current.clone(),
                        source,
                    })?
            }
            Err(source) => {
                return Err(ResolveError::Request {
                    url: current,
                    source,
                });
            }
        };

        match response.status {
            300..=399 => {
                let location = response
                    .location
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| ResolveError::MissingLocation {
                        url: current.clone(),
                        status: response.status,
                    })?;
                let next = next_hop(&current, location)?;
                debug!(from = %current, to = %next, status = response.status, "following redirect");
                current = next;

                if hop == MAX_REDIRECTS - 1 {
                    return Err(ResolveError::TooManyRedirects {
                        url: short_url.to_string(),
                    });
                }
            }
            200..=299 => {
                debug!(url = %current, status = response.status, "resolved URL");
                return Ok(current);
            }
            status => {
                return Err(ResolveError::UnexpectedStatus {
                    url: current,
                    status,
                });
            }
        }
    }

    Err(ResolveError::TooManyRedirects {
        url: short_url.to_string(),
    })
}

fn next_hop(current: &str, location: String) -> Result<String, ResolveError> {
    if Url::parse(&location).is_ok() {
        return Ok(location);
    }
    let invalid = |source: url::ParseError| ResolveError::InvalidLocation {
        location: location.clone(),
        source,
    };
    let base = Url::parse(current).map_err(invalid)?;
    let joined = base.join(&location).map_err(invalid)?;
    Ok(joined.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    type StubReply = Result<HopResponse, &'static str>;

    /// Replays canned replies per URL and records every call.
    struct StubHttp {
        replies: RefCell<HashMap<String, VecDeque<StubReply>>>,
        calls: RefCell<Vec<(HopMethod, String)>>,
    }

    impl StubHttp {
        fn new(entries: Vec<(&str, StubReply)>) -> Self {
            let mut replies: HashMap<String, VecDeque<StubReply>> = HashMap::new();
            for (url, reply) in entries {
                replies.entry(url.to_string()).or_default().push_back(reply);
            }
            Self {
                replies: RefCell::new(replies),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(HopMethod, String)> {
            self.calls.borrow().clone()
        }
    }

    impl RedirectHttp for StubHttp {
        fn fetch(&self, method: HopMethod, url: &str) -> Result<HopResponse, TransportError> {
            self.calls.borrow_mut().push((method, url.to_string()));
            let reply = self
                .replies
                .borrow_mut()
                .get_mut(url)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Err("connection refused"));
            reply.map_err(|message| message.into())
        }
    }

    fn redirect(location: &str) -> StubReply {
        Ok(HopResponse {
            status: 301,
            location: Some(location.to_string()),
        })
    }

    fn ok() -> StubReply {
        Ok(HopResponse {
            status: 200,
            location: None,
        })
    }

    #[test]
    fn single_redirect_resolves_to_target() {
        let stub = StubHttp::new(vec![
            ("https://sho.rt/abc", redirect("https://example.com")),
            ("https://example.com", ok()),
        ]);
        let resolved = resolve_shortened_url("https://sho.rt/abc", &stub).unwrap();
        assert_eq!(resolved, "https://example.com");
    }

    #[test]
    fn absolute_location_is_kept_verbatim() {
        let stub = StubHttp::new(vec![
            ("https://sho.rt/abc", redirect("HTTPS://Example.com:443/Path")),
            ("HTTPS://Example.com:443/Path", ok()),
        ]);
        let resolved = resolve_shortened_url("https://sho.rt/abc", &stub).unwrap();
        assert_eq!(resolved, "HTTPS://Example.com:443/Path");
        assert_eq!(stub.calls()[1].1, "HTTPS://Example.com:443/Path");
    }

    #[test]
    fn non_redirect_returns_input_unchanged() {
        let stub = StubHttp::new(vec![("https://example.com", ok())]);
        let resolved = resolve_shortened_url("https://example.com", &stub).unwrap();
        assert_eq!(resolved, "https://example.com");
    }

    #[test]
    fn non_redirect_returns_input() {
        let stub = StubHttp::new(vec![("https://example.com/page", ok())]);
        let resolved = resolve_shortened_url("https://example.com/page", &stub).unwrap();
        assert_eq!(resolved, "https://example.com/page");
        assert_eq!(stub.calls().len(), 1);
    }

    #[test]
    fn relative_location_is_resolved_against_current_url() {
        let stub = StubHttp::new(vec![
            ("https://sho.rt/a/b", redirect("../landing?x=1")),
            ("https://sho.rt/landing?x=1", ok()),
        ]);
        let resolved = resolve_shortened_url("https://sho.rt/a/b", &stub).unwrap();
        assert_eq!(resolved, "https://sho.rt/landing?x=1");
    }

    #[test]
    fn four_redirects_then_success_is_within_cap() {
        let stub = StubHttp::new(vec![
            ("https://sho.rt/0", redirect("/1")),
            ("https://sho.rt/1", redirect("/2")),
            ("https://sho.rt/2", redirect("/3")),
            ("https://sho.rt/3", redirect("/4")),
            ("https://sho.rt/4", ok()),
        ]);
        let resolved = resolve_shortened_url("https://sho.rt/0", &stub).unwrap();
        assert_eq!(resolved, "https://sho.rt/4");
    }

    #[test]
    fn redirect_chain_beyond_cap_fails() {
        let stub = StubHttp::new(vec![
            ("https://sho.rt/0", redirect("/1")),
            ("https://sho.rt/1", redirect("/2")),
            ("https://sho.rt/2", redirect("/3")),
            ("https://sho.rt/3", redirect("/4")),
            ("https://sho.rt/4", redirect("/5")),
            ("https://sho.rt/5", redirect("/6")),
            ("https://sho.rt/6", ok()),
        ]);
        let err = resolve_shortened_url("https://sho.rt/0", &stub).unwrap_err();
        assert!(matches!(err, ResolveError::TooManyRedirects { .. }));
        assert!(err.to_string().contains("too many redirects"));
        assert_eq!(stub.calls().len(), MAX_REDIRECTS);
    }

    #[test]
    fn head_failure_on_first_hop_retries_with_get() {
        let stub = StubHttp::new(vec![
            ("https://sho.rt/x", Err("HEAD not allowed")),
            ("https://sho.rt/x", redirect("https://example.com/dest")),
            ("https://example.com/dest", ok()),
        ]);
        let resolved = resolve_shortened_url("https://sho.rt/x", &stub).unwrap();
        assert_eq!(resolved, "https://example.com/dest");
        let calls = stub.calls();
        assert_eq!(calls[0].0, HopMethod::Head);
        assert_eq!(calls[1].0, HopMethod::Get);
        assert_eq!(calls[2].0, HopMethod::Head);
    }

    #[test]
    fn failure_on_later_hop_is_terminal() {
        let stub = StubHttp::new(vec![
            ("https://sho.rt/x", redirect("https://example.com/dest")),
            ("https://example.com/dest", Err("timed out")),
        ]);
        let err = resolve_shortened_url("https://sho.rt/x", &stub).unwrap_err();
        assert!(matches!(err, ResolveError::Request { .. }));
        assert!(stub.calls().iter().all(|(method, _)| *method == HopMethod::Head));
    }

    #[test]
    fn redirect_without_location_fails() {
        let stub = StubHttp::new(vec![(
            "https://sho.rt/x",
            Ok(HopResponse {
                status: 302,
                location: Some(String::new()),
            }),
        )]);
        let err = resolve_shortened_url("https://sho.rt/x", &stub).unwrap_err();
        assert!(matches!(err, ResolveError::MissingLocation { status: 302, .. }));
    }

    #[test]
    fn redirect_without_location_header_fails() {
        let stub = StubHttp::new(vec![(
            "https://sho.rt/x",
            Ok(HopResponse {
                status: 301,
                location: None,
            }),
        )]);
        let err = resolve_shortened_url("https://sho.rt/x", &stub).unwrap_err();
        assert!(matches!(err, ResolveError::MissingLocation { status: 301, .. }));
        assert!(err.to_string().contains("no Location header"));
        assert_eq!(stub.calls().len(), 1);
    }

    #[test]
    fn error_status_fails() {
        let stub = StubHttp::new(vec![(
            "https://sho.rt/x",
            Ok(HopResponse {
                status: 404,
                location: None,
            }),
        )]);
        let err = resolve_shortened_url("https://sho.rt/x", &stub).unwrap_err();
        assert!(matches!(err, ResolveError::UnexpectedStatus { status: 404, .. }));
    }

    /// Serves `responses[i]` to the i-th connection, then stops.
    fn spawn_server(responses: Vec<String>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut request_lines = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                request_lines.push(line.trim_end().to_string());
                let mut header = String::new();
                let mut user_agent = String::new();
                while reader.read_line(&mut header).unwrap() > 0 {
                    if header.to_ascii_lowercase().starts_with("user-agent:") {
                        user_agent = header.trim_end().to_string();
                    }
                    if header == "\r\n" {
                        break;
                    }
                    header.clear();
                }
                request_lines.push(user_agent);
                stream.write_all(response.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
            request_lines
        });
        (base, handle)
    }

    #[test]
    fn blocking_transport_follows_chain_over_loopback() {
        let (base, handle) = spawn_server(vec![
            "HTTP/1.1 301 Moved Permanently\r\nLocation: /final\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into(),
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into(),
        ]);
        let client = BlockingRedirectHttp::client_builder()
            .no_proxy()
            .build()
            .unwrap();
        let http = BlockingRedirectHttp::from_client(client);

        let resolved = resolve_shortened_url(&format!("{base}/short"), &http).unwrap();
        assert_eq!(resolved, format!("{base}/final"));

        let lines = handle.join().unwrap();
        assert_eq!(lines[0], "HEAD /short HTTP/1.1");
        assert!(lines[1].contains(USER_AGENT));
        assert_eq!(lines[2], "HEAD /final HTTP/1.1");
    }
}

use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info};
use url::{ParseError, Url};

use crate::config::{Config, Rule, Scope};

/// Outcome of rule evaluation. `rule` is `None` when the default profile was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult<'a> {
    pub rule: Option<&'a Rule>,
    pub profile_id: String,
    pub incognito: bool,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("configuration is nil")]
    MissingConfig,
    #[error("failed to parse URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: ParseError,
    },
    #[error("profile '{profile_id}' specified in rule '{rule}' not found")]
    RuleProfileNotFound { rule: String, profile_id: String },
    #[error("no matching rule found and no default profile is configured")]
    NoDefaultProfile,
    #[error("default profile '{0}' not found")]
    DefaultProfileNotFound(String),
}

/// URL components that rule scopes select from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetUrl {
    /// `None` when the input was a bare `host/path` without a scheme.
    pub scheme: Option<String>,
    /// Host including any explicit port.
    pub host: String,
    pub hostname: String,
    pub path: String,
    pub query: Option<String>,
}

impl TargetUrl {
    pub fn parse(input: &str) -> Result<Self, RuleError> {
        match Url::parse(input) {
            Ok(url) => Ok(Self::from_url(&url, true)),
            Err(ParseError::RelativeUrlWithoutBase) => Ok(Self::from_relative(input)),
            Err(source) => Err(RuleError::InvalidUrl {
                url: input.to_string(),
                source,
            }),
        }
    }

    fn from_url(url: &Url, keep_scheme: bool) -> Self {
        let hostname = url
            .host_str()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default();
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        Self {
            scheme: keep_scheme.then(|| url.scheme().to_string()),
            host,
            hostname,
            path: url.path().to_string(),
            query: url.query().map(str::to_string),
        }
    }

    /// Bare inputs such as `example.com/foo` are read as `host/path`.
    fn from_relative(input: &str) -> Self {
        // `//host/path` names a host, not a path.
        if let Some(rest) = input.strip_prefix("//") {
            if let Ok(url) = Url::parse(&format!("http://{rest}")) {
                return Self::from_url(&url, false);
            }
        }
        if !input.is_empty() && !input.starts_with('/') {
            if let Ok(url) = Url::parse(&format!("http://{input}")) {
                return Self::from_url(&url, false);
            }
        }
        let (path, query) = match input.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (input, None),
        };
        let path = path.split_once('#').map_or(path, |(path, _)| path);
        Self {
            path: path.to_string(),
            query,
            ..Self::default()
        }
    }

    /// Substring a rule with `scope` is tested against.
    pub fn match_string(&self, scope: Scope) -> String {
        match scope {
            Scope::Domain => self.hostname.clone(),
            Scope::Path => self.path.clone(),
            Scope::Url => {
                let mut rendered = match &self.scheme {
                    Some(scheme) => format!("{scheme}://{}{}", self.host, self.path),
                    None => format!("{}{}", self.host, self.path),
                };
                if let Some(query) = self.query.as_deref().filter(|query| !query.is_empty()) {
                    rendered.push('?');
                    rendered.push_str(query);
                }
                rendered
            }
        }
    }
}

/// Pick the profile for `input`. Longer patterns are tried first and the first
/// match wins; without a match the configured default profile is used.
pub fn apply_rules<'a>(
    config: Option<&'a Config>,
    input: &str,
) -> Result<MatchResult<'a>, RuleError> {
    let config = config.ok_or(RuleError::MissingConfig)?;
    let target = TargetUrl::parse(input)?;
    debug!(
        input_url = input,
        scheme = target.scheme.as_deref().unwrap_or(""),
        host = %target.host,
        hostname = %target.hostname,
        path = %target.path,
        "URL parsing results"
    );

    let mut ordered: Vec<&Rule> = config.rules.iter().collect();
    ordered.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
    debug!(url = input, rule_count = ordered.len(), "applying rules (sorted by pattern length desc)");

    for rule in ordered {
        let pattern = match Regex::new(&rule.pattern) {
            Ok(pattern) => pattern,
            Err(err) => {
                error!(rule_name = %rule.name, pattern = %rule.pattern, error = %err, "invalid regex pattern in rule");
                continue;
            }
        };

        let candidate = target.match_string(rule.scope);
        let matches = pattern.is_match(&candidate);
        debug!(
            rule_name = %rule.name,
            pattern = %rule.pattern,
            scope = %rule.scope,
            match_string = %candidate,
            matches,
            "rule match attempt"
        );
        if !matches {
            continue;
        }

        if config.find_profile(&rule.profile_id).is_none() {
            error!(rule_name = %rule.name, profile_id = %rule.profile_id, "profile specified in matched rule not found");
            return Err(RuleError::RuleProfileNotFound {
                rule: rule.name.clone(),
                profile_id: rule.profile_id.clone(),
            });
        }

        info!(
            url = input,
            rule_name = %rule.name,
            profile_id = %rule.profile_id,
            incognito = rule.incognito,
            matched_part = %candidate,
            "rule matched"
        );
        return Ok(MatchResult {
            rule: Some(rule),
            profile_id: rule.profile_id.clone(),
            incognito: rule.incognito,
        });
    }

    if config.default_profile_id.is_empty() {
        error!("no rules matched and no default profile set");
        return Err(RuleError::NoDefaultProfile);
    }
    if config.find_profile(&config.default_profile_id).is_none() {
        error!(default_profile_id = %config.default_profile_id, "default profile specified in config not found");
        return Err(RuleError::DefaultProfileNotFound(
            config.default_profile_id.clone(),
        ));
    }

    info!(url = input, profile_id = %config.default_profile_id, "using default profile");
    Ok(MatchResult {
        rule: None,
        profile_id: config.default_profile_id.clone(),
        incognito: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn profile(id: &str) -> Profile {
        Profile {
            id: id.into(),
            name: id.into(),
            browser_id: "chrome".into(),
            profile_dir: "Default".into(),
        }
    }

    fn rule(name: &str, pattern: &str, scope: Scope, profile_id: &str, incognito: bool) -> Rule {
        Rule {
            name: name.into(),
            pattern: pattern.into(),
            scope,
            profile_id: profile_id.into(),
            incognito,
        }
    }

    fn config_with(rules: Vec<Rule>) -> Config {
        Config {
            default_profile_id: "default-profile".into(),
            profiles: vec![profile("default-profile"), profile("work-profile"), profile("personal")],
            rules,
            ..Config::default()
        }
    }

    #[test]
    fn missing_config_fails() {
        let err = apply_rules(None, "https://example.com").unwrap_err();
        assert!(matches!(err, RuleError::MissingConfig));
        assert_eq!(err.to_string(), "configuration is nil");
    }

    #[test]
    fn empty_rules_use_default_profile() {
        let config = config_with(vec![]);
        let result = apply_rules(Some(&config), "https://example.com").unwrap();
        assert_eq!(
            result,
            MatchResult {
                rule: None,
                profile_id: "default-profile".into(),
                incognito: false,
            }
        );
    }

    #[test]
    fn empty_rules_without_default_fail() {
        let mut config = config_with(vec![]);
        config.default_profile_id.clear();
        let err = apply_rules(Some(&config), "https://example.com").unwrap_err();
        assert!(matches!(err, RuleError::NoDefaultProfile));
    }

    #[test]
    fn dangling_default_profile_fails() {
        let mut config = config_with(vec![]);
        config.default_profile_id = "gone".into();
        let err = apply_rules(Some(&config), "https://example.com").unwrap_err();
        assert!(matches!(err, RuleError::DefaultProfileNotFound(ref id) if id == "gone"));
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let config = config_with(vec![
            rule("broken", "[invalid(regex", Scope::Url, "work-profile", true),
            rule("fine", "example", Scope::Domain, "personal", false),
        ]);
        let result = apply_rules(Some(&config), "https://example.com/page").unwrap();
        assert_eq!(result.rule.map(|rule| rule.name.as_str()), Some("fine"));
        assert_eq!(result.profile_id, "personal");
    }

    #[test]
    fn only_invalid_patterns_fall_back_to_default() {
        let config = config_with(vec![rule("broken", "(", Scope::Url, "work-profile", true)]);
        let result = apply_rules(Some(&config), "https://example.com").unwrap();
        assert!(result.rule.is_none());
        assert_eq!(result.profile_id, "default-profile");
    }

    #[test]
    fn matched_rule_with_unknown_profile_fails_loudly() {
        let config = config_with(vec![rule("ghost", "example", Scope::Url, "missing", false)]);
        let err = apply_rules(Some(&config), "https://example.com").unwrap_err();
        match err {
            RuleError::RuleProfileNotFound { rule, profile_id } => {
                assert_eq!(rule, "ghost");
                assert_eq!(profile_id, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn longer_pattern_wins_regardless_of_order() {
        let short = rule("short", "example", Scope::Url, "personal", false);
        let long = rule("long", r"example\.com/work", Scope::Url, "work-profile", true);
        for rules in [vec![short.clone(), long.clone()], vec![long.clone(), short.clone()]] {
            let config = config_with(rules);
            let result = apply_rules(Some(&config), "https://example.com/work/x").unwrap();
            assert_eq!(result.rule, Some(&long));
            assert_eq!(result.profile_id, "work-profile");
            assert!(result.incognito);
        }
    }

    #[test]
    fn caller_rule_order_is_untouched() {
        let config = config_with(vec![
            rule("a", "x", Scope::Url, "personal", false),
            rule("b", "xxxxxxxx", Scope::Url, "personal", false),
        ]);
        let _ = apply_rules(Some(&config), "https://example.com").unwrap();
        assert_eq!(config.rules[0].name, "a");
        assert_eq!(config.rules[1].name, "b");
    }

    #[test]
    fn scopes_select_expected_substrings() {
        let url = "https://work.example.com/path?x=1";
        let cases = [
            (Scope::Domain, r"^work\.example\.com$", true),
            (Scope::Path, r"^/path$", true),
            (Scope::Url, r"^https://work\.example\.com/path", true),
            (Scope::Url, r"^https://work\.example\.com/path$", false),
            (Scope::Url, r"^https://work\.example\.com/path\?x=1$", true),
        ];
        for (scope, pattern, expected) in cases {
            let config = config_with(vec![rule("scoped", pattern, scope, "work-profile", false)]);
            let result = apply_rules(Some(&config), url).unwrap();
            assert_eq!(result.rule.is_some(), expected, "{scope} {pattern}");
        }
    }

    #[test]
    fn bare_host_input_is_recovered_without_scheme() {
        let target = TargetUrl::parse("example.com/foo?q=1").unwrap();
        assert_eq!(target.scheme, None);
        assert_eq!(target.hostname, "example.com");
        assert_eq!(target.path, "/foo");
        assert_eq!(target.match_string(Scope::Url), "example.com/foo?q=1");

        let config = config_with(vec![rule("bare", r"^example\.com$", Scope::Domain, "personal", false)]);
        let result = apply_rules(Some(&config), "example.com/foo").unwrap();
        assert_eq!(result.profile_id, "personal");
    }

    #[test]
    fn scheme_relative_input_keeps_its_host() {
        let target = TargetUrl::parse("//example.com/x?q=1").unwrap();
        assert_eq!(target.scheme, None);
        assert_eq!(target.match_string(Scope::Domain), "example.com");
        assert_eq!(target.match_string(Scope::Path), "/x");
        assert_eq!(target.match_string(Scope::Url), "example.com/x?q=1");

        let host_rule = rule("host", r"^example\.com$", Scope::Domain, "personal", false);
        let config = config_with(vec![host_rule]);
        let result = apply_rules(Some(&config), "//example.com/x").unwrap();
        assert_eq!(result.profile_id, "personal");
        assert!(result.rule.is_some());
    }

    #[test]
    fn url_scope_keeps_port_but_domain_scope_drops_it() {
        let target = TargetUrl::parse("http://localhost:8080/app").unwrap();
        assert_eq!(target.match_string(Scope::Url), "http://localhost:8080/app");
        assert_eq!(target.match_string(Scope::Domain), "localhost");
    }

    #[test]
    fn path_only_input_has_no_host() {
        let target = TargetUrl::parse("/just/a/path?k=v").unwrap();
        assert_eq!(target.host, "");
        assert_eq!(target.path, "/just/a/path");
        assert_eq!(target.match_string(Scope::Url), "/just/a/path?k=v");
    }

    #[test]
    fn unparseable_url_is_fatal() {
        let config = config_with(vec![]);
        let err = apply_rules(Some(&config), "http://exa mple.com").unwrap_err();
        assert!(matches!(err, RuleError::InvalidUrl { .. }));
    }

    #[test]
    fn end_to_end_work_rule() {
        let config = config_with(vec![
            rule("Work", r"^https://example\.com/work", Scope::Url, "work-profile", true),
            rule("Personal", "example", Scope::Domain, "personal", false),
        ]);
        let result = apply_rules(Some(&config), "https://example.com/work/dashboard").unwrap();
        assert_eq!(result.rule.map(|rule| rule.name.as_str()), Some("Work"));
        assert_eq!(result.profile_id, "work-profile");
        assert!(result.incognito);
    }
}

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Part of a URL that a rule pattern is tested against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Reconstructed `scheme://host/path?query`.
    #[default]
    Url,
    /// Hostname only.
    Domain,
    /// Path component only.
    Path,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Url => "url",
            Scope::Domain => "domain",
            Scope::Path => "path",
        }
    }

    /// Lenient decoding used at the config boundary; unknown values map to `Url`.
    pub fn from_config_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "domain" => Scope::Domain,
            "path" => Scope::Path,
            _ => Scope::Url,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Scope::from_config_value(&raw))
    }
}

/// Installed browser application able to open profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Browser {
    pub browser_id: String,
    pub name: String,
    /// Binary path, or `flatpak run <app-id>` for Flatpak installs.
    pub executable: String,
    /// Profile selection template, e.g. `--profile-directory=%s`.
    #[serde(default)]
    pub profile_arg: String,
    #[serde(default)]
    pub incognito_arg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub browser_id: String,
    /// Identifier the browser expects in its profile argument.
    #[serde(default)]
    pub profile_dir: String,
}

/// Pattern rule mapping URLs onto a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    /// Regular expression source; matched unanchored.
    pub pattern: String,
    #[serde(default)]
    pub scope: Scope,
    pub profile_id: String,
    #[serde(default)]
    pub incognito: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortenerService {
    pub domain: String,
    /// Launch the original wrapper URL instead of the resolved destination.
    #[serde(default)]
    pub is_safelink: bool,
}

impl ShortenerService {
    pub fn new(domain: impl Into<String>, is_safelink: bool) -> Self {
        Self {
            domain: domain.into(),
            is_safelink,
        }
    }
}

/// Optional JSON log file output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub file: bool,
    /// Overrides the platform cache directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "LoggingSettings::default_max_files")]
    pub max_files: usize,
}

impl LoggingSettings {
    const fn default_max_files() -> usize {
        10
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: false,
            directory: None,
            max_files: Self::default_max_files(),
        }
    }
}

const BUILTIN_SHORTENER_DOMAINS: &[&str] = &[
    "t.co",
    "bit.ly",
    "goo.gl",
    "tinyurl.com",
    "73.nu",
    "bitly.kr",
    "bl.ink",
    "buff.ly",
    "clicky.me",
    "cutt.ly",
    "dub.co",
    "fox.ly",
    "gg.gg",
    "han.gl",
    "is.gd",
    "kurzelinks.de",
    "kutt.it",
    "lstu.fr",
    "lyn.bz",
    "oe.cd",
    "ow.ly",
    "rebrandly.com",
    "reduced.to",
    "rip.to",
    "san.aq",
    "short.io",
    "shorten-url.com",
    "shorturl.at",
    "sor.bz",
    "spoo.me",
    "switchy.io",
    "t.ly",
    "tinu.be",
    "urlr.me",
    "v.gd",
    "vo.la",
    "yaso.su",
    "zlnk.com",
];

const BUILTIN_SAFELINK_DOMAINS: &[&str] = &["safelinks.protection.outlook.com"];

/// Shortener domains shipped with the binary.
pub fn builtin_shorteners() -> Vec<ShortenerService> {
    BUILTIN_SHORTENER_DOMAINS
        .iter()
        .map(|domain| ShortenerService::new(*domain, false))
        .chain(
            BUILTIN_SAFELINK_DOMAINS
                .iter()
                .map(|domain| ShortenerService::new(*domain, true)),
        )
        .collect()
}

/// Complete routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_profile_id: String,
    #[serde(default)]
    pub browsers: Vec<Browser>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Built-in shorteners; not persisted.
    #[serde(skip, default = "builtin_shorteners")]
    pub shorteners: Vec<ShortenerService>,
    #[serde(default)]
    pub manual_shorteners: Vec<ShortenerService>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile_id: String::new(),
            browsers: Vec::new(),
            profiles: Vec::new(),
            rules: Vec::new(),
            shorteners: builtin_shorteners(),
            manual_shorteners: Vec::new(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from disk, writing defaults if missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config at {}", path.display()))?;
            Self::from_toml(&raw)
                .with_context(|| format!("Malformed config at {}", path.display()))
        } else {
            let config = Self::default();
            config
                .save(path)
                .with_context(|| format!("Failed to write default config to {}", path.display()))?;
            Ok(config)
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut parsed: Self = toml::from_str(raw)?;
        parsed.shorteners = builtin_shorteners();
        Ok(parsed)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let serialised = self.to_toml()?;
        fs::write(path, serialised)
            .with_context(|| format!("Failed to persist config to {}", path.display()))
    }

    pub fn find_profile(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|profile| profile.id == id)
    }

    pub fn find_browser(&self, id: &str) -> Option<&Browser> {
        self.browsers.iter().find(|browser| browser.browser_id == id)
    }

    pub fn profile_browser(&self, profile: &Profile) -> Option<&Browser> {
        self.find_browser(&profile.browser_id)
    }

    pub fn find_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn find_manual_shortener(&self, domain: &str) -> Option<&ShortenerService> {
        self.manual_shorteners
            .iter()
            .find(|service| service.domain == domain)
    }

    /// Manual entries take precedence over built-ins; domains match exactly.
    pub fn lookup_shortener(&self, host: &str) -> Option<&ShortenerService> {
        self.find_manual_shortener(host).or_else(|| {
            self.shorteners
                .iter()
                .find(|service| service.domain == host)
        })
    }

    pub fn set_default_profile(&mut self, id: &str) -> Result<()> {
        if self.find_profile(id).is_none() {
            bail!("profile '{id}' not found");
        }
        self.default_profile_id = id.to_string();
        Ok(())
    }

    pub fn add_browser(&mut self, browser: Browser) -> Result<()> {
        if self.find_browser(&browser.browser_id).is_some() {
            bail!("browser '{}' already exists", browser.browser_id);
        }
        check_browser(&browser)?;
        self.browsers.push(browser);
        Ok(())
    }

    /// Replace the browser with the same `browser_id`; ids are stable.
    pub fn update_browser(&mut self, browser: Browser) -> Result<()> {
        check_browser(&browser)?;
        let entry = self
            .browsers
            .iter_mut()
            .find(|existing| existing.browser_id == browser.browser_id)
            .with_context(|| format!("browser '{}' not found", browser.browser_id))?;
        *entry = browser;
        Ok(())
    }

    /// Refuses while any profile still uses the browser.
    pub fn remove_browser(&mut self, id: &str) -> Result<Browser> {
        let index = self
            .browsers
            .iter()
            .position(|browser| browser.browser_id == id)
            .with_context(|| format!("browser '{id}' not found"))?;
        let users: Vec<&str> = self
            .profiles
            .iter()
            .filter(|profile| profile.browser_id == id)
            .map(|profile| profile.id.as_str())
            .collect();
        if !users.is_empty() {
            bail!(
                "browser '{id}' is used by profile(s) {}; delete or edit them first",
                users.join(", ")
            );
        }
        Ok(self.browsers.remove(index))
    }

    pub fn add_profile(&mut self, profile: Profile) -> Result<()> {
        if self.find_profile(&profile.id).is_some() {
            bail!("profile '{}' already exists", profile.id);
        }
        self.check_profile(&profile)?;
        self.profiles.push(profile);
        Ok(())
    }

    /// Replace the profile called `id` in place. A changed id is carried
    /// over to the default profile and to every rule that referenced it.
    pub fn update_profile(&mut self, id: &str, profile: Profile) -> Result<()> {
        let index = self
            .profiles
            .iter()
            .position(|existing| existing.id == id)
            .with_context(|| format!("profile '{id}' not found"))?;
        if profile.id != id && self.find_profile(&profile.id).is_some() {
            bail!("profile '{}' already exists", profile.id);
        }
        self.check_profile(&profile)?;

        if profile.id != id {
            if self.default_profile_id == id {
                self.default_profile_id = profile.id.clone();
            }
            for rule in self.rules.iter_mut().filter(|rule| rule.profile_id == id) {
                rule.profile_id = profile.id.clone();
            }
        }
        self.profiles[index] = profile;
        Ok(())
    }

    /// Refuses to delete the default profile or one that rules still target.
    pub fn remove_profile(&mut self, id: &str) -> Result<Profile> {
        let index = self
            .profiles
            .iter()
            .position(|profile| profile.id == id)
            .with_context(|| format!("profile '{id}' not found"))?;
        if self.default_profile_id == id {
            bail!("profile '{id}' is the default profile; set another default first");
        }
        let users: Vec<&str> = self
            .rules
            .iter()
            .filter(|rule| rule.profile_id == id)
            .map(|rule| rule.name.as_str())
            .collect();
        if !users.is_empty() {
            bail!(
                "profile '{id}' is referenced by rule(s) {}; edit or delete them first",
                users.join(", ")
            );
        }
        Ok(self.profiles.remove(index))
    }

    fn check_profile(&self, profile: &Profile) -> Result<()> {
        if profile.id.trim().is_empty() || profile.id.contains(char::is_whitespace) {
            bail!("'{}' is not a valid profile id", profile.id);
        }
        if profile.name.trim().is_empty() {
            bail!("profile name must not be empty");
        }
        if self.find_browser(&profile.browser_id).is_none() {
            bail!(
                "browser '{}' referenced by profile '{}' not found",
                profile.browser_id,
                profile.id
            );
        }
        Ok(())
    }

    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        if self.find_rule(&rule.name).is_some() {
            bail!("rule '{}' already exists", rule.name);
        }
        self.check_rule(&rule)?;
        self.rules.push(rule);
        Ok(())
    }

    /// Replace the rule called `name` in place; the replacement may rename it.
    pub fn update_rule(&mut self, name: &str, rule: Rule) -> Result<()> {
        let index = self
            .rules
            .iter()
            .position(|existing| existing.name == name)
            .with_context(|| format!("rule '{name}' not found"))?;
        if rule.name != name && self.find_rule(&rule.name).is_some() {
            bail!("rule '{}' already exists", rule.name);
        }
        self.check_rule(&rule)?;
        self.rules[index] = rule;
        Ok(())
    }

    fn check_rule(&self, rule: &Rule) -> Result<()> {
        if rule.name.trim().is_empty() {
            bail!("rule name must not be empty");
        }
        Regex::new(&rule.pattern)
            .with_context(|| format!("invalid pattern for rule '{}'", rule.name))?;
        if self.find_profile(&rule.profile_id).is_none() {
            bail!(
                "profile '{}' referenced by rule '{}' not found",
                rule.profile_id,
                rule.name
            );
        }
        Ok(())
    }

    pub fn remove_rule(&mut self, name: &str) -> Result<Rule> {
        let index = self
            .rules
            .iter()
            .position(|rule| rule.name == name)
            .with_context(|| format!("rule '{name}' not found"))?;
        Ok(self.rules.remove(index))
    }

    pub fn add_manual_shortener(&mut self, domain: &str, is_safelink: bool) -> Result<()> {
        let domain = normalize_domain(domain)?;
        if self.find_manual_shortener(&domain).is_some() {
            bail!("shortener domain '{domain}' is already configured");
        }
        self.manual_shorteners
            .push(ShortenerService::new(domain, is_safelink));
        Ok(())
    }

    pub fn set_manual_shortener_safelink(&mut self, domain: &str, is_safelink: bool) -> Result<()> {
        let domain = normalize_domain(domain)?;
        let entry = self
            .manual_shorteners
            .iter_mut()
            .find(|service| service.domain == domain)
            .with_context(|| format!("manual shortener domain '{domain}' not found"))?;
        entry.is_safelink = is_safelink;
        Ok(())
    }

    pub fn remove_manual_shortener(&mut self, domain: &str) -> Result<ShortenerService> {
        let domain = normalize_domain(domain)?;
        match self
            .manual_shorteners
            .iter()
            .position(|service| service.domain == domain)
        {
            Some(index) => Ok(self.manual_shorteners.remove(index)),
            None if self.shorteners.iter().any(|service| service.domain == domain) => {
                bail!("'{domain}' is a built-in shortener domain and cannot be deleted")
            }
            None => bail!("manual shortener domain '{domain}' not found"),
        }
    }

    /// Replace browsers and profiles with a discovery result.
    pub fn merge_discovered(&mut self, browsers: Vec<Browser>, profiles: Vec<Profile>) {
        self.browsers = browsers;
        self.profiles = profiles;
        let default_missing = self.default_profile_id.is_empty()
            || self.find_profile(&self.default_profile_id).is_none();
        if default_missing {
            if let Some(first) = self.profiles.first() {
                self.default_profile_id = first.id.clone();
            }
        }
    }

    /// Cross-reference problems. Diagnostic only; routing checks lazily.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.default_profile_id.is_empty() {
            issues.push("no default profile configured".to_string());
        } else if self.find_profile(&self.default_profile_id).is_none() {
            issues.push(format!(
                "default profile '{}' not found",
                self.default_profile_id
            ));
        }

        for profile in &self.profiles {
            if self.profile_browser(profile).is_none() {
                issues.push(format!(
                    "profile '{}' references unknown browser '{}'",
                    profile.id, profile.browser_id
                ));
            }
        }

        for rule in &self.rules {
            if let Err(err) = Regex::new(&rule.pattern) {
                issues.push(format!("rule '{}' has an invalid pattern: {err}", rule.name));
            }
            if self.find_profile(&rule.profile_id).is_none() {
                issues.push(format!(
                    "rule '{}' references unknown profile '{}'",
                    rule.name, rule.profile_id
                ));
            }
        }

        issues
    }
}

fn check_browser(browser: &Browser) -> Result<()> {
    if browser.browser_id.trim().is_empty() || browser.browser_id.contains(char::is_whitespace) {
        bail!("'{}' is not a valid browser id", browser.browser_id);
    }
    if browser.name.trim().is_empty() {
        bail!("browser name must not be empty");
    }
    if browser.executable.trim().is_empty() {
        bail!("executable for browser '{}' must not be empty", browser.browser_id);
    }
    Ok(())
}

fn normalize_domain(domain: &str) -> Result<String> {
    let normalized = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if normalized.is_empty() || normalized.contains('/') || normalized.contains(char::is_whitespace)
    {
        bail!("'{domain}' is not a valid domain");
    }
    Ok(normalized)
}

/// Compute the default path to the routing configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "linkroute")
        .context("Unable to resolve platform config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Browser, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    Chromium,
    Firefox,
}

/// How a known browser is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Install {
    /// Binary name looked up on `PATH`.
    Binary(&'static str),
    /// Flatpak application id.
    Flatpak(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct KnownBrowser {
    pub browser_id: &'static str,
    pub name: &'static str,
    pub install: Install,
    pub family: BrowserFamily,
    /// Profile root relative to the home directory.
    pub profile_root: &'static str,
    pub profile_arg: &'static str,
    pub incognito_arg: &'static str,
}

const fn chromium(
    browser_id: &'static str,
    name: &'static str,
    install: Install,
    profile_root: &'static str,
    incognito_arg: &'static str,
) -> KnownBrowser {
    KnownBrowser {
        browser_id,
        name,
        install,
        family: BrowserFamily::Chromium,
        profile_root,
        profile_arg: "--profile-directory=%s",
        incognito_arg,
    }
}

const fn firefox(
    browser_id: &'static str,
    name: &'static str,
    install: Install,
    profile_root: &'static str,
) -> KnownBrowser {
    KnownBrowser {
        browser_id,
        name,
        install,
        family: BrowserFamily::Firefox,
        profile_root,
        profile_arg: "-P %s",
        incognito_arg: "--private-window",
    }
}

pub const KNOWN_BROWSERS: &[KnownBrowser] = &[
    chromium(
        "chrome",
        "Google Chrome",
        Install::Binary("google-chrome-stable"),
        ".config/google-chrome",
        "--incognito",
    ),
    chromium(
        "chrome-beta",
        "Google Chrome Beta",
        Install::Binary("google-chrome-beta"),
        ".config/google-chrome-beta",
        "--incognito",
    ),
    chromium(
        "chrome-flatpak",
        "Google Chrome (Flatpak)",
        Install::Flatpak("com.google.Chrome"),
        ".var/app/com.google.Chrome/config/google-chrome",
        "--incognito",
    ),
    chromium(
        "chromium",
        "Chromium",
        Install::Binary("chromium"),
        ".config/chromium",
        "--incognito",
    ),
    chromium(
        "edge",
        "Microsoft Edge",
        Install::Binary("microsoft-edge-stable"),
        ".config/microsoft-edge",
        "--inprivate",
    ),
    chromium(
        "edge-flatpak",
        "Microsoft Edge (Flatpak)",
        Install::Flatpak("com.microsoft.Edge"),
        ".var/app/com.microsoft.Edge/config/microsoft-edge",
        "--inprivate",
    ),
    chromium(
        "brave",
        "Brave",
        Install::Binary("brave-browser"),
        ".config/BraveSoftware/Brave-Browser",
        "--incognito",
    ),
    chromium(
        "brave-flatpak",
        "Brave (Flatpak)",
        Install::Flatpak("com.brave.Browser"),
        ".var/app/com.brave.Browser/config/BraveSoftware/Brave-Browser",
        "--incognito",
    ),
    chromium(
        "vivaldi",
        "Vivaldi",
        Install::Binary("vivaldi-stable"),
        ".config/vivaldi",
        "--incognito",
    ),
    chromium("opera", "Opera", Install::Binary("opera"), ".config/opera", "--private"),
    firefox("firefox", "Firefox", Install::Binary("firefox"), ".mozilla/firefox"),
    firefox(
        "firefox-dev",
        "Firefox Developer Edition",
        Install::Binary("firefox-developer-edition"),
        ".mozilla/firefox",
    ),
    firefox(
        "firefox-flatpak",
        "Firefox (Flatpak)",
        Install::Flatpak("org.mozilla.firefox"),
        ".var/app/org.mozilla.firefox/.mozilla/firefox",
    ),
    firefox("librewolf", "LibreWolf", Install::Binary("librewolf"), ".librewolf"),
];

pub fn known_browser(browser_id: &str) -> Option<&'static KnownBrowser> {
    KNOWN_BROWSERS
        .iter()
        .find(|known| known.browser_id == browser_id)
}

/// Resolves installs to an executable string usable in `Browser::executable`.
pub trait ExecutableLocator {
    fn locate(&self, install: Install) -> Option<String>;
}

pub struct SystemLocator;

impl ExecutableLocator for SystemLocator {
    fn locate(&self, install: Install) -> Option<String> {
        match install {
            Install::Binary(name) => which::which(name)
                .ok()
                .map(|path| path.to_string_lossy().into_owned()),
            Install::Flatpak(app_id) => {
                let flatpak = which::which("flatpak").ok()?;
                let installed = Command::new(&flatpak)
                    .args(["info", app_id])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map(|status| status.success())
                    .unwrap_or(false);
                installed.then(|| format!("flatpak run {app_id}"))
            }
        }
    }
}

/// Installed browsers from the known table, one per executable.
pub fn discover_browsers(locator: &dyn ExecutableLocator) -> Vec<Browser> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for known in KNOWN_BROWSERS {
        let Some(executable) = locator.locate(known.install) else {
            continue;
        };
        if !seen.insert(executable.clone()) {
            continue;
        }
        debug!(name = known.name, path = %executable, "discovered browser");
        found.push(Browser {
            browser_id: known.browser_id.into(),
            name: known.name.into(),
            executable,
            profile_arg: known.profile_arg.into(),
            incognito_arg: known.incognito_arg.into(),
        });
    }
    found
}

pub fn discover_profiles(browser: &Browser, home: &Path) -> Result<Vec<Profile>> {
    let Some(known) = known_browser(&browser.browser_id) else {
        warn!(
            browser_id = %browser.browser_id,
            "browser not in known table, using a single default profile"
        );
        return Ok(vec![default_profile(&browser.browser_id, "Default")]);
    };
    let root = home.join(known.profile_root);
    match known.family {
        BrowserFamily::Chromium => chromium_profiles(&root, &browser.browser_id),
        BrowserFamily::Firefox => firefox_profiles(&root, &browser.browser_id),
    }
}

/// Discover browsers and their profiles; per-browser failures are skipped.
pub fn detect_all(locator: &dyn ExecutableLocator, home: &Path) -> (Vec<Browser>, Vec<Profile>) {
    let browsers = discover_browsers(locator);
    let mut profiles = Vec::new();
    for browser in &browsers {
        match discover_profiles(browser, home) {
            Ok(found) => profiles.extend(found),
            Err(err) => {
                warn!(
                    browser_id = %browser.browser_id,
                    error = %err,
                    "failed to discover profiles for browser"
                );
            }
        }
    }
    debug!(
        browser_count = browsers.len(),
        profile_count = profiles.len(),
        "detection finished"
    );
    (browsers, profiles)
}

pub fn home_dir() -> Result<PathBuf> {
    let dirs = BaseDirs::new().context("Unable to resolve home directory")?;
    Ok(dirs.home_dir().to_path_buf())
}

fn profile_id(browser_id: &str, label: &str) -> String {
    format!("{browser_id}-{}", label.trim().replace(' ', "-").to_lowercase())
}

fn default_profile(browser_id: &str, profile_dir: &str) -> Profile {
    Profile {
        id: format!("{browser_id}-default"),
        name: "Default".into(),
        browser_id: browser_id.into(),
        profile_dir: profile_dir.into(),
    }
}

const CHROMIUM_SYSTEM_DIRS: &[&str] = &[
    "Crash Reports",
    "System Profile",
    "GrShaderCache",
    "ShaderCache",
    "Guest Profile",
];

fn chromium_profiles(root: &Path, browser_id: &str) -> Result<Vec<Profile>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(vec![default_profile(browser_id, "Default")]);
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read profiles directory {}", root.display()));
        }
    };
    let display_names = chromium_display_names(root);

    let mut profiles = Vec::new();
    for entry in entries.flatten() {
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        if CHROMIUM_SYSTEM_DIRS.contains(&dir_name.as_str()) {
            continue;
        }
        if !entry.path().join("Preferences").is_file() {
            continue;
        }
        let name = display_names
            .as_ref()
            .and_then(|names| names.get(&dir_name))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| dir_name.clone());
        debug!(browser = browser_id, profile = %dir_name, "found profile");
        profiles.push(Profile {
            id: profile_id(browser_id, &dir_name),
            name,
            browser_id: browser_id.into(),
            profile_dir: dir_name,
        });
    }

    if profiles.is_empty() {
        return Ok(vec![default_profile(browser_id, "Default")]);
    }
    profiles.sort_by(|a, b| a.profile_dir.cmp(&b.profile_dir));
    Ok(profiles)
}

/// `profile.info_cache` from Chromium's `Local State`, keyed by profile directory.
fn chromium_display_names(root: &Path) -> Option<serde_json::Map<String, Value>> {
    let raw = fs::read_to_string(root.join("Local State")).ok()?;
    let state: Value = serde_json::from_str(&raw).ok()?;
    let cache = state.get("profile")?.get("info_cache")?.as_object()?;
    Some(
        cache
            .iter()
            .filter_map(|(dir, info)| Some((dir.clone(), info.get("name")?.clone())))
            .collect(),
    )
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FirefoxProfileEntry {
    pub name: String,
    pub path: String,
    pub is_relative: bool,
    pub is_default: bool,
}

/// Parse the `[ProfileN]` sections of a Firefox `profiles.ini`.
pub fn parse_profiles_ini(raw: &str) -> Vec<FirefoxProfileEntry> {
    let mut entries = Vec::new();
    let mut current: Option<FirefoxProfileEntry> = None;

    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            entries.extend(current.take());
            if section.starts_with("Profile") {
                current = Some(FirefoxProfileEntry::default());
            }
            continue;
        }
        let (Some(entry), Some((key, value))) = (current.as_mut(), line.split_once('=')) else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Name" => entry.name = value.to_string(),
            "Path" => entry.path = value.to_string(),
            "IsRelative" => entry.is_relative = value == "1",
            "Default" => entry.is_default = value == "1",
            _ => {}
        }
    }
    entries.extend(current);
    entries.retain(|entry| !entry.path.is_empty());
    entries
}

fn firefox_profiles(root: &Path, browser_id: &str) -> Result<Vec<Profile>> {
    let ini_path = root.join("profiles.ini");
    let raw = match fs::read_to_string(&ini_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %ini_path.display(), "profiles.ini not found");
            return Ok(vec![default_profile(browser_id, &root.to_string_lossy())]);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", ini_path.display()));
        }
    };

    let profiles: Vec<Profile> = parse_profiles_ini(&raw)
        .into_iter()
        .map(|entry| {
            let name = if entry.name.is_empty() {
                entry.path.clone()
            } else {
                entry.name.clone()
            };
            // `-P` selects Firefox profiles by name.
            Profile {
                id: profile_id(browser_id, &name),
                name: name.clone(),
                browser_id: browser_id.into(),
                profile_dir: name,
            }
        })
        .collect();

    if profiles.is_empty() {
        return Ok(vec![default_profile(browser_id, &root.to_string_lossy())]);
    }
    Ok(profiles)
}

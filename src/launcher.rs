use std::{env, process::Command};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::config::{Browser, Config, Profile};

const FLATPAK_PREFIX: &str = "flatpak run ";
const CHROMIUM_PROFILE_FLAG: &str = "--profile-directory";

/// Materialised command specification ready to be spawned or logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, env: Vec<(String, String)>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    pub fn describe(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Session facts that influence browser flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchEnvironment {
    pub wayland: bool,
}

impl LaunchEnvironment {
    pub fn detect() -> Self {
        let wayland = cfg!(target_os = "linux")
            && env::var("XDG_SESSION_TYPE")
                .map(|value| value.eq_ignore_ascii_case("wayland"))
                .unwrap_or(false);
        Self { wayland }
    }
}

/// Build the argv that opens `url` in `profile_id`.
pub fn build_command(
    config: &Config,
    profile_id: &str,
    url: &str,
    incognito: bool,
    environment: LaunchEnvironment,
) -> Result<CommandSpec> {
    let profile = config
        .find_profile(profile_id)
        .with_context(|| format!("cannot launch profile: profile with ID '{profile_id}' not found"))?;
    let browser = config.profile_browser(profile).with_context(|| {
        format!(
            "cannot find browser '{}' for profile '{}'",
            profile.browser_id, profile.name
        )
    })?;
    command_for(browser, profile, url, incognito, environment)
}

fn command_for(
    browser: &Browser,
    profile: &Profile,
    url: &str,
    incognito: bool,
    environment: LaunchEnvironment,
) -> Result<CommandSpec> {
    let (program, mut args) = split_executable(&browser.executable)?;

    if !browser.profile_arg.is_empty() && !profile.profile_dir.is_empty() {
        args.extend(render_profile_arg(&browser.profile_arg, &profile.profile_dir));
    }

    if incognito && !browser.incognito_arg.is_empty() {
        args.push(browser.incognito_arg.clone());
    }

    if environment.wayland {
        if browser.profile_arg.contains(CHROMIUM_PROFILE_FLAG) {
            args.push("--enable-features=UseOzonePlatform".into());
            args.push("--ozone-platform=wayland".into());
        } else {
            debug!(browser = %browser.name, "Wayland session detected, skipping Wayland flags for non-Chromium browser");
        }
    }

    args.push(url.to_string());

    let spec = CommandSpec::new(program, args, Vec::new());
    debug!(
        browser = %browser.name,
        browser_id = %browser.browser_id,
        profile_dir = %profile.profile_dir,
        command = %spec.describe(),
        "prepared browser command"
    );
    Ok(spec)
}

fn split_executable(executable: &str) -> Result<(String, Vec<String>)> {
    let executable = executable.trim();
    if executable.is_empty() {
        bail!("browser executable is empty");
    }
    if executable.starts_with(FLATPAK_PREFIX) {
        let mut parts = executable.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "flatpak".into());
        return Ok((program, parts.collect()));
    }
    Ok((executable.to_string(), Vec::new()))
}

/// `--profile-directory=%s` stays one argument; `-P %s` becomes two.
fn render_profile_arg(template: &str, profile_dir: &str) -> Vec<String> {
    if !template.contains("%s") {
        return vec![template.to_string()];
    }
    match template.split_once(char::is_whitespace) {
        Some((flag, rest)) if rest.trim() == "%s" => {
            vec![flag.to_string(), profile_dir.to_string()]
        }
        _ => vec![template.replacen("%s", profile_dir, 1)],
    }
}

/// Start the browser without waiting for it; returns the child pid.
pub fn spawn_detached(spec: &CommandSpec) -> Result<u32> {
    let child = spec
        .to_command()
        .spawn()
        .with_context(|| format!("failed to start browser process {}", spec.describe()))?;
    Ok(child.id())
}

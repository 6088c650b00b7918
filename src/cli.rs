use std::{
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
};

use crate::{
    Router,
    config::{Browser, Config, Profile, Rule, Scope, default_config_path},
    discovery::{SystemLocator, detect_all, home_dir},
    launcher::LaunchEnvironment,
    logging,
};
use anyhow::{Context, Result, bail};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use dialoguer::Confirm;
use tracing::{Level, debug, info};

#[derive(Parser, Debug)]
#[command(
    name = "linkroute",
    version,
    about = "Open URLs in the right browser profile",
    long_about = "Routes a URL to a browser profile chosen by pattern rules. \
                  Shortened links are resolved before matching."
)]
pub struct Cli {
    /// Custom config path.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "error", global = true)]
    pub log_level: String,

    /// Decide and print the command without starting the browser.
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Print the browser command line after launching.
    #[arg(long, action = ArgAction::SetTrue)]
    pub print_command: bool,

    /// URL to open.
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or change the configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Show how a URL would be routed without launching anything.
    Explain {
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Print a shell completion script to stdout.
    Completion {
        #[arg(value_enum, value_name = "SHELL")]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the configuration file location.
    Path,
    /// Print the configuration.
    Show {
        /// Emit JSON instead of TOML.
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Check profile, browser and rule references.
    Validate,
    /// Set the profile used when no rule matches.
    Default {
        #[arg(value_name = "PROFILE")]
        profile: String,
    },
    /// Manage browsers.
    Browser {
        #[command(subcommand)]
        command: BrowserCommand,
    },
    /// Manage profiles.
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Manage routing rules.
    Rule {
        #[command(subcommand)]
        command: RuleCommand,
    },
    /// Manage URL shortener domains.
    Shorturl {
        #[command(subcommand)]
        command: ShortUrlCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum BrowserCommand {
    /// List configured browsers.
    List,
    /// Scan the system for installed browsers and their profiles.
    Detect {
        /// Replace configured browsers and profiles with the detected ones.
        #[arg(long, action = ArgAction::SetTrue)]
        save: bool,
    },
    /// Add a browser by hand.
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Binary path, or `flatpak run <app-id>`.
        #[arg(long)]
        executable: String,
        /// Profile selection template; `%s` is replaced by the profile directory.
        #[arg(long, default_value = "--profile-directory=%s", allow_hyphen_values = true)]
        profile_arg: String,
        #[arg(long, default_value = "--incognito", allow_hyphen_values = true)]
        incognito_arg: String,
    },
    /// Change fields of an existing browser.
    Edit {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        executable: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        profile_arg: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        incognito_arg: Option<String>,
    },
    /// Delete a browser that no profile uses.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
        /// Skip the confirmation prompt.
        #[arg(short, long, action = ArgAction::SetTrue)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// List configured profiles.
    List,
    /// Add a profile for a configured browser.
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Browser ID the profile belongs to.
        #[arg(long)]
        browser: String,
        /// Value substituted into the browser's profile argument.
        #[arg(long, value_name = "DIR", default_value = "")]
        dir: String,
        /// Also make this the default profile.
        #[arg(long, action = ArgAction::SetTrue)]
        default: bool,
    },
    /// Change fields of an existing profile. Renaming updates rules and the default.
    Edit {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(long, value_name = "ID")]
        rename: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        browser: Option<String>,
        #[arg(long, value_name = "DIR")]
        dir: Option<String>,
        /// Also make this the default profile.
        #[arg(long, action = ArgAction::SetTrue)]
        default: bool,
    },
    /// Delete a profile that is neither the default nor used by a rule.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
        /// Skip the confirmation prompt.
        #[arg(short, long, action = ArgAction::SetTrue)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum RuleCommand {
    /// List rules.
    List,
    /// Add a rule.
    Add {
        #[arg(long)]
        name: String,
        /// Regular expression tested against the selected scope.
        #[arg(long)]
        pattern: String,
        #[arg(long, value_enum, default_value_t = Scope::Url)]
        scope: Scope,
        /// Profile ID to open matching URLs in.
        #[arg(long)]
        profile: String,
        #[arg(long, action = ArgAction::SetTrue)]
        incognito: bool,
    },
    /// Change fields of an existing rule.
    Edit {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, value_name = "NAME")]
        rename: Option<String>,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long, value_enum)]
        scope: Option<Scope>,
        #[arg(long)]
        profile: Option<String>,
        #[arg(long, value_name = "BOOL")]
        incognito: Option<bool>,
    },
    /// Delete a rule.
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
        /// Skip the confirmation prompt.
        #[arg(short, long, action = ArgAction::SetTrue)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ShortUrlCommand {
    /// List manual shortener domains.
    List {
        /// Include the built-in domains.
        #[arg(long, action = ArgAction::SetTrue)]
        builtin: bool,
    },
    /// Add a manual shortener domain.
    Add {
        #[arg(value_name = "DOMAIN")]
        domain: String,
        /// Launch the original link instead of the resolved destination.
        #[arg(long, action = ArgAction::SetTrue)]
        safelink: bool,
    },
    /// Change the safelink flag of a manual shortener domain.
    Edit {
        #[arg(value_name = "DOMAIN")]
        domain: String,
        #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
        safelink: bool,
    },
    /// Delete a manual shortener domain.
    Delete {
        #[arg(value_name = "DOMAIN")]
        domain: String,
    },
}

fn resolve_config_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.command.is_none() && cli.url.is_none() {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }

    let level = logging::parse_level(&cli.log_level);
    let config_path = resolve_config_path(cli.config.clone())?;

    match cli.command {
        Some(Command::Completion { shell }) => {
            write_completions(shell, &mut io::stdout());
            Ok(())
        }
        Some(Command::Config { command }) => {
            let mut config = load_config(&config_path, level)?;
            run_config(command, &mut config, &config_path)
        }
        Some(Command::Explain { url }) => explain(load_config(&config_path, level)?, &url),
        None => {
            let url = cli.url.unwrap_or_default();
            let config = load_config(&config_path, level)?;
            open_url(config, &url, cli.dry_run, cli.print_command)
        }
    }
}

fn load_config(config_path: &Path, level: Level) -> Result<Config> {
    let config = Config::load_or_default(config_path)?;
    logging::init_tracing("linkroute", level, &config.logging)?;
    debug!(path = %config_path.display(), "loaded configuration");
    if let Some(log_file) = logging::current_log_file() {
        debug!(path = %log_file.display(), "writing JSON log");
    }
    Ok(config)
}

pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    clap_complete::generate(shell, &mut Cli::command(), "linkroute", out);
}

fn open_url(config: Config, url: &str, dry_run: bool, print_command: bool) -> Result<()> {
    let router = Router::new(config)?;
    let decision = router.route(url)?;
    let outcome = router.launch(&decision, !dry_run, LaunchEnvironment::detect())?;

    if outcome.executed() {
        info!(
            profile = %outcome.profile_id,
            route = %outcome.route_id,
            pid = outcome.pid(),
            "browser launched"
        );
        if print_command {
            println!("{}", outcome.command.describe());
        }
    } else {
        println!(
            "Dry run [{}]: {}",
            outcome.route_id,
            outcome.command.describe()
        );
    }
    Ok(())
}

fn explain(config: Config, url: &str) -> Result<()> {
    let router = Router::new(config)?;
    let decision = router.route(url)?;
    let config = router.config();

    println!("URL         : {url}");
    if decision.processed.url_for_matching != decision.processed.original_url {
        println!("Resolved    : {}", decision.processed.url_for_matching);
    }
    println!("Safelink    : {}", yes_no(decision.processed.is_safelink));
    match decision.matched.rule {
        Some(rule) => println!(
            "Rule        : {} ({} scope, pattern {})",
            rule.name, rule.scope, rule.pattern
        ),
        None => println!("Rule        : (none, default profile)"),
    }
    let profile_name = config
        .find_profile(decision.profile_id())
        .map(|profile| profile.name.as_str())
        .unwrap_or("?");
    println!("Profile     : {} ({profile_name})", decision.profile_id());
    println!("Incognito   : {}", yes_no(decision.incognito()));
    println!("Launch URL  : {}", decision.url_to_launch());
    match router.launch(&decision, false, LaunchEnvironment::detect()) {
        Ok(outcome) => println!("Command     : {}", outcome.command.describe()),
        Err(err) => println!("Command     : (unavailable) {err:#}"),
    }
    Ok(())
}

pub fn run_config(command: ConfigCommand, config: &mut Config, config_path: &Path) -> Result<()> {
    match command {
        ConfigCommand::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
        ConfigCommand::Validate => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration OK: {}", config_path.display());
                return Ok(());
            }
            for issue in &issues {
                println!("  - {issue}");
            }
            bail!("configuration has {} issue(s)", issues.len());
        }
        ConfigCommand::Default { profile } => {
            config.set_default_profile(&profile)?;
            config.save(config_path)?;
            println!("Default profile set to '{profile}'");
            Ok(())
        }
        ConfigCommand::Browser { command } => run_browser(command, config, config_path),
        ConfigCommand::Profile { command } => run_profile(command, config, config_path),
        ConfigCommand::Rule { command } => run_rule(command, config, config_path),
        ConfigCommand::Shorturl { command } => run_shorturl(command, config, config_path),
    }
}

fn run_browser(command: BrowserCommand, config: &mut Config, config_path: &Path) -> Result<()> {
    match command {
        BrowserCommand::List => {
            if config.browsers.is_empty() {
                println!("No browsers configured. Run `linkroute config browser detect --save`.");
                return Ok(());
            }
            for browser in &config.browsers {
                println!("- {} [{}]", browser.name, browser.browser_id);
                println!("    executable : {}", browser.executable);
                if !browser.profile_arg.is_empty() {
                    println!("    profile arg: {}", browser.profile_arg);
                }
                if !browser.incognito_arg.is_empty() {
                    println!("    incognito  : {}", browser.incognito_arg);
                }
            }
            Ok(())
        }
        BrowserCommand::Detect { save } => {
            let home = home_dir()?;
            let (browsers, profiles) = detect_all(&SystemLocator, &home);
            if browsers.is_empty() {
                println!("No supported browsers found.");
                return Ok(());
            }
            for browser in &browsers {
                println!("- {} [{}] {}", browser.name, browser.browser_id, browser.executable);
                for profile in profiles
                    .iter()
                    .filter(|profile| profile.browser_id == browser.browser_id)
                {
                    println!("    {} ({})", profile.id, profile.name);
                }
            }
            if save {
                config.merge_discovered(browsers, profiles);
                config.save(config_path)?;
                println!("Saved detected browsers to {}", config_path.display());
            } else {
                println!("Pass --save to store these in the configuration.");
            }
            Ok(())
        }
        BrowserCommand::Add {
            id,
            name,
            executable,
            profile_arg,
            incognito_arg,
        } => {
            config.add_browser(Browser {
                browser_id: id.clone(),
                name,
                executable,
                profile_arg,
                incognito_arg,
            })?;
            config.save(config_path)?;
            println!("Browser '{id}' added");
            Ok(())
        }
        BrowserCommand::Edit {
            id,
            name,
            executable,
            profile_arg,
            incognito_arg,
        } => {
            let mut browser = config
                .find_browser(&id)
                .cloned()
                .with_context(|| format!("browser '{id}' not found"))?;
            if let Some(name) = name {
                browser.name = name;
            }
            if let Some(executable) = executable {
                browser.executable = executable;
            }
            if let Some(profile_arg) = profile_arg {
                browser.profile_arg = profile_arg;
            }
            if let Some(incognito_arg) = incognito_arg {
                browser.incognito_arg = incognito_arg;
            }
            config.update_browser(browser)?;
            config.save(config_path)?;
            println!("Browser '{id}' updated");
            Ok(())
        }
        BrowserCommand::Delete { id, yes } => {
            if config.find_browser(&id).is_none() {
                bail!("browser '{id}' not found");
            }
            if !yes && !confirm(&format!("Delete browser '{id}'?"))? {
                println!("Aborted.");
                return Ok(());
            }
            config.remove_browser(&id)?;
            config.save(config_path)?;
            println!("Browser '{id}' deleted");
            Ok(())
        }
    }
}

fn run_profile(command: ProfileCommand, config: &mut Config, config_path: &Path) -> Result<()> {
    match command {
        ProfileCommand::List => {
            print_profiles(config);
            Ok(())
        }
        ProfileCommand::Add {
            id,
            name,
            browser,
            dir,
            default,
        } => {
            config.add_profile(Profile {
                id: id.clone(),
                name,
                browser_id: browser,
                profile_dir: dir,
            })?;
            if default || config.default_profile_id.is_empty() {
                config.set_default_profile(&id)?;
            }
            config.save(config_path)?;
            println!("Profile '{id}' added");
            Ok(())
        }
        ProfileCommand::Edit {
            id,
            rename,
            name,
            browser,
            dir,
            default,
        } => {
            let mut profile = config
                .find_profile(&id)
                .cloned()
                .with_context(|| format!("profile '{id}' not found"))?;
            if let Some(rename) = rename {
                profile.id = rename;
            }
            if let Some(name) = name {
                profile.name = name;
            }
            if let Some(browser) = browser {
                profile.browser_id = browser;
            }
            if let Some(dir) = dir {
                profile.profile_dir = dir;
            }
            let updated = profile.id.clone();
            config.update_profile(&id, profile)?;
            if default {
                config.set_default_profile(&updated)?;
            }
            config.save(config_path)?;
            println!("Profile '{updated}' updated");
            Ok(())
        }
        ProfileCommand::Delete { id, yes } => {
            if config.find_profile(&id).is_none() {
                bail!("profile '{id}' not found");
            }
            if !yes && !confirm(&format!("Delete profile '{id}'?"))? {
                println!("Aborted.");
                return Ok(());
            }
            config.remove_profile(&id)?;
            config.save(config_path)?;
            println!("Profile '{id}' deleted");
            Ok(())
        }
    }
}

fn print_profiles(config: &Config) {
    if config.profiles.is_empty() {
        println!("No profiles configured.");
        return;
    }
    for profile in &config.profiles {
        let marker = if profile.id == config.default_profile_id {
            "*"
        } else {
            " "
        };
        let browser = config
            .profile_browser(profile)
            .map(|browser| browser.name.as_str())
            .unwrap_or("(unknown browser)");
        println!(
            "{marker} {:<28} {:<20} {browser}  dir={}",
            profile.id, profile.name, profile.profile_dir
        );
    }
}

fn run_rule(command: RuleCommand, config: &mut Config, config_path: &Path) -> Result<()> {
    match command {
        RuleCommand::List => {
            if config.rules.is_empty() {
                println!("No rules configured.");
                return Ok(());
            }
            for rule in &config.rules {
                println!(
                    "- {} [{}] {} -> {}{}",
                    rule.name,
                    rule.scope,
                    rule.pattern,
                    rule.profile_id,
                    if rule.incognito { " (incognito)" } else { "" }
                );
            }
            Ok(())
        }
        RuleCommand::Add {
            name,
            pattern,
            scope,
            profile,
            incognito,
        } => {
            config.add_rule(Rule {
                name: name.clone(),
                pattern,
                scope,
                profile_id: profile,
                incognito,
            })?;
            config.save(config_path)?;
            println!("Rule '{name}' added");
            Ok(())
        }
        RuleCommand::Edit {
            name,
            rename,
            pattern,
            scope,
            profile,
            incognito,
        } => {
            let mut rule = config
                .find_rule(&name)
                .cloned()
                .with_context(|| format!("rule '{name}' not found"))?;
            if let Some(rename) = rename {
                rule.name = rename;
            }
            if let Some(pattern) = pattern {
                rule.pattern = pattern;
            }
            if let Some(scope) = scope {
                rule.scope = scope;
            }
            if let Some(profile) = profile {
                rule.profile_id = profile;
            }
            if let Some(incognito) = incognito {
                rule.incognito = incognito;
            }
            let updated = rule.name.clone();
            config.update_rule(&name, rule)?;
            config.save(config_path)?;
            println!("Rule '{updated}' updated");
            Ok(())
        }
        RuleCommand::Delete { name, yes } => {
            if config.find_rule(&name).is_none() {
                bail!("rule '{name}' not found");
            }
            if !yes && !confirm(&format!("Delete rule '{name}'?"))? {
                println!("Aborted.");
                return Ok(());
            }
            config.remove_rule(&name)?;
            config.save(config_path)?;
            println!("Rule '{name}' deleted");
            Ok(())
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        bail!("refusing to prompt in a non-interactive session; pass --yes");
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

fn run_shorturl(command: ShortUrlCommand, config: &mut Config, config_path: &Path) -> Result<()> {
    match command {
        ShortUrlCommand::List { builtin } => {
            if config.manual_shorteners.is_empty() {
                println!("No manual shortener domains configured.");
            } else {
                println!("Manual:");
                for service in &config.manual_shorteners {
                    let tag = if service.is_safelink { " (safelink)" } else { "" };
                    println!("  {}{tag}", service.domain);
                }
            }
            if builtin {
                println!("Built-in:");
                for service in &config.shorteners {
                    let tag = if service.is_safelink { " (safelink)" } else { "" };
                    println!("  {}{tag}", service.domain);
                }
            }
            Ok(())
        }
        ShortUrlCommand::Add { domain, safelink } => {
            config.add_manual_shortener(&domain, safelink)?;
            config.save(config_path)?;
            println!("Shortener domain '{domain}' added");
            Ok(())
        }
        ShortUrlCommand::Edit { domain, safelink } => {
            config.set_manual_shortener_safelink(&domain, safelink)?;
            config.save(config_path)?;
            println!("Shortener domain '{domain}' updated (safelink: {safelink})");
            Ok(())
        }
        ShortUrlCommand::Delete { domain } => {
            let removed = config.remove_manual_shortener(&domain)?;
            config.save(config_path)?;
            println!("Shortener domain '{}' deleted", removed.domain);
            Ok(())
        }
    }
}

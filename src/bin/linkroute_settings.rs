use std::{path::PathBuf, process};

use anyhow::{Result, bail};
use clap::Parser;
use dialoguer::{Confirm, FuzzySelect, Input, Select, theme::ColorfulTheme};
use linkroute::config::{Config, Rule, Scope, default_config_path};
use regex::Regex;

type SettingsResult<T> = Result<T>;

#[derive(Parser, Debug)]
#[command(
    name = "linkroute-settings",
    about = "Interactive linkroute configuration editor",
    version
)]
struct SettingsCli {
    /// Optional configuration file override.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print current configuration in JSON and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    print: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("linkroute-settings: {err:?}");
        process::exit(1);
    }
}

fn run() -> SettingsResult<()> {
    let args = SettingsCli::parse();
    let config_path = resolve_config_path(args.config.as_ref())?;
    let mut config = Config::load_or_default(&config_path)?;

    if args.print {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if config.profiles.is_empty() {
        bail!(
            "no profiles configured; run `linkroute config browser detect --save` first ({})",
            config_path.display()
        );
    }

    let theme = ColorfulTheme::default();

    edit_default_profile(&theme, &mut config);
    while Confirm::with_theme(&theme)
        .with_prompt("Add a routing rule?")
        .default(false)
        .interact()?
    {
        add_rule(&theme, &mut config)?;
    }
    delete_rules(&theme, &mut config)?;

    println!("\nReview:");
    println!("  default profile: {}", config.default_profile_id);
    if config.rules.is_empty() {
        println!("  rules          : (none)");
    } else {
        println!("  rules          :");
        for rule in &config.rules {
            println!(
                "    {} [{}] {} -> {}{}",
                rule.name,
                rule.scope,
                rule.pattern,
                rule.profile_id,
                if rule.incognito { " (incognito)" } else { "" }
            );
        }
    }

    if !Confirm::with_theme(&theme)
        .with_prompt("Save changes?")
        .default(true)
        .interact()?
    {
        println!("Changes discarded.");
        return Ok(());
    }

    let issues = config.validate();
    for issue in &issues {
        eprintln!("warning: {issue}");
    }
    config.save(&config_path)?;

    println!("Settings saved to {}", config_path.display());

    Ok(())
}

fn resolve_config_path(explicit: Option<&PathBuf>) -> SettingsResult<PathBuf> {
    match explicit {
        Some(path) => Ok(path.clone()),
        None => default_config_path(),
    }
}

fn profile_labels(config: &Config) -> Vec<String> {
    config
        .profiles
        .iter()
        .map(|profile| format!("{} ({})", profile.id, profile.name))
        .collect()
}

fn edit_default_profile(theme: &ColorfulTheme, config: &mut Config) {
    let labels = profile_labels(config);
    let default_index = config
        .profiles
        .iter()
        .position(|profile| profile.id == config.default_profile_id)
        .unwrap_or(0);
    if let Ok(selection) = FuzzySelect::with_theme(theme)
        .with_prompt("Default profile")
        .items(&labels)
        .default(default_index)
        .interact()
    {
        config.default_profile_id = config.profiles[selection].id.clone();
    }
}

fn add_rule(theme: &ColorfulTheme, config: &mut Config) -> SettingsResult<()> {
    let name: String = Input::with_theme(theme)
        .with_prompt("Rule name")
        .validate_with(|value: &String| -> Result<(), String> {
            if value.trim().is_empty() {
                Err("name must not be empty".into())
            } else if config.find_rule(value.trim()).is_some() {
                Err(format!("rule '{}' already exists", value.trim()))
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let pattern: String = Input::with_theme(theme)
        .with_prompt("Pattern (regular expression)")
        .validate_with(|value: &String| -> Result<(), String> {
            Regex::new(value).map(|_| ()).map_err(|err| err.to_string())
        })
        .interact_text()?;

    let scopes = [Scope::Url, Scope::Domain, Scope::Path];
    let scope_index = Select::with_theme(theme)
        .with_prompt("Match against")
        .items(&["full URL", "domain", "path"])
        .default(0)
        .interact()?;

    let labels = profile_labels(config);
    let profile_index = FuzzySelect::with_theme(theme)
        .with_prompt("Open in profile")
        .items(&labels)
        .default(0)
        .interact()?;

    let incognito = Confirm::with_theme(theme)
        .with_prompt("Open in incognito/private mode?")
        .default(false)
        .interact()?;

    let rule = Rule {
        name: name.trim().to_string(),
        pattern,
        scope: scopes[scope_index],
        profile_id: config.profiles[profile_index].id.clone(),
        incognito,
    };
    config.add_rule(rule)
}

fn delete_rules(theme: &ColorfulTheme, config: &mut Config) -> SettingsResult<()> {
    while !config.rules.is_empty()
        && Confirm::with_theme(theme)
            .with_prompt("Delete a rule?")
            .default(false)
            .interact()?
    {
        let names: Vec<String> = config.rules.iter().map(|rule| rule.name.clone()).collect();
        let selection = Select::with_theme(theme)
            .with_prompt("Rule to delete")
            .items(&names)
            .interact()?;
        config.remove_rule(&names[selection])?;
    }
    Ok(())
}

pub mod cli;
pub mod config;
pub mod discovery;
pub mod launcher;
pub mod logging;
pub mod preprocess;
pub mod rules;
pub mod shortener;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, info_span};
use uuid::Uuid;

use crate::config::Config;
use crate::launcher::{CommandSpec, LaunchEnvironment, build_command, spawn_detached};
use crate::preprocess::{ProcessedUrl, process_url};
use crate::rules::{MatchResult, apply_rules};
use crate::shortener::{BlockingRedirectHttp, RedirectHttp};

/// Routes incoming URLs to browser profiles.
pub struct Router {
    config: Config,
    http: Box<dyn RedirectHttp>,
}

impl Router {
    /// Construct a router that resolves shorteners over the network.
    pub fn new(config: Config) -> Result<Self> {
        let http = BlockingRedirectHttp::new()
            .context("Failed to build HTTP client for shortener resolution")?;
        Ok(Self::with_http(config, Box::new(http)))
    }

    pub fn with_http(config: Config, http: Box<dyn RedirectHttp>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve shorteners and pick the profile for `input`. Nothing is launched.
    pub fn route(&self, input: &str) -> Result<RouteDecision<'_>> {
        let route_id = Uuid::new_v4();
        let span = info_span!("router.route", route = %route_id, url = input);
        let _span_guard = span.enter();

        let processed = process_url(&self.config, input, self.http.as_ref());
        let matched = apply_rules(Some(&self.config), &processed.url_for_matching)
            .with_context(|| format!("Failed to route {input}"))?;

        match matched.rule {
            Some(rule) => info!(
                rule = %rule.name,
                profile = %matched.profile_id,
                incognito = matched.incognito,
                "matched rule"
            ),
            None => info!(profile = %matched.profile_id, "no rule matched, using default profile"),
        }

        Ok(RouteDecision {
            route_id,
            processed,
            matched,
        })
    }

    /// Build the browser command for a decision and spawn it when `execute` is set.
    pub fn launch(
        &self,
        decision: &RouteDecision<'_>,
        execute: bool,
        environment: LaunchEnvironment,
    ) -> Result<LaunchOutcome> {
        let span = info_span!(
            "router.launch",
            route = %decision.route_id,
            profile = %decision.matched.profile_id,
            execute
        );
        let _span_guard = span.enter();

        let command = build_command(
            &self.config,
            &decision.matched.profile_id,
            decision.url_to_launch(),
            decision.matched.incognito,
            environment,
        )?;

        info!(command = %command.describe(), "prepared launch command");

        let launched_at = Utc::now();
        let pid = if execute {
            let pid = spawn_detached(&command)?;
            info!(pid, "browser started");
            Some(pid)
        } else {
            None
        };

        Ok(LaunchOutcome {
            route_id: decision.route_id,
            profile_id: decision.matched.profile_id.clone(),
            command,
            launched_at,
            pid,
            executed: execute,
        })
    }
}

/// Preprocessed URL together with the rule decision for it.
#[derive(Debug, Clone)]
pub struct RouteDecision<'a> {
    pub route_id: Uuid,
    pub processed: ProcessedUrl,
    pub matched: MatchResult<'a>,
}

impl RouteDecision<'_> {
    pub fn url_to_launch(&self) -> &str {
        self.processed.launch_target()
    }

    pub fn profile_id(&self) -> &str {
        &self.matched.profile_id
    }

    pub fn incognito(&self) -> bool {
        self.matched.incognito
    }

    pub fn rule_name(&self) -> Option<&str> {
        self.matched.rule.map(|rule| rule.name.as_str())
    }
}

/// Result of handing a decision to the launcher.
#[derive(Debug)]
pub struct LaunchOutcome {
    pub route_id: Uuid,
    pub profile_id: String,
    pub command: CommandSpec,
    pub launched_at: DateTime<Utc>,
    pub pid: Option<u32>,
    executed: bool,
}

impl LaunchOutcome {
    pub fn executed(&self) -> bool {
        self.executed
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

//! Environment configuration for the dashboard.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use civmap_core::{feed::DEFAULT_CHANNEL, model::DepartmentId};
use civmap_provider_supabase::SupabaseConfig;

const URL_VAR: &str = "CIVMAP_SUPABASE_URL";
const KEY_VAR: &str = "CIVMAP_SUPABASE_KEY";
const TOKEN_VAR: &str = "CIVMAP_SUPABASE_TOKEN";
const POLL_VAR: &str = "CIVMAP_POLL_MS";
const CHANNEL_VAR: &str = "CIVMAP_CHANNEL";
const DEPARTMENT_VAR: &str = "CIVMAP_DEPARTMENT";
const LOG_FILE_VAR: &str = "CIVMAP_LOG_FILE";

const DEFAULT_LOG_FILE: &str = "civmap-tui.log";

/// Where complaints come from.
#[derive(Debug)]
pub(crate) enum Source {
    /// Seeded in-memory store.
    Demo,
    Supabase(SupabaseConfig),
}

#[derive(Debug)]
pub(crate) struct Config {
    pub source: Source,
    pub channel: String,
    pub department: Option<DepartmentId>,
    pub log_file: PathBuf,
}

impl Config {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok(), env::args().skip(1))
    }

    fn from_lookup<F, A>(lookup: F, args: A) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
        A: IntoIterator<Item = String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let demo_flag = args.into_iter().any(|arg| arg == "--demo");

        let source = match non_empty(URL_VAR) {
            Some(url) if !demo_flag => {
                let Some(api_key) = non_empty(KEY_VAR) else {
                    bail!("{KEY_VAR} must be set when {URL_VAR} is");
                };
                let mut supabase = SupabaseConfig::new(url, api_key);
                supabase.access_token = non_empty(TOKEN_VAR);
                if let Some(raw) = non_empty(POLL_VAR) {
                    let millis: u64 = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("{POLL_VAR} is not a number of milliseconds"))?;
                    if millis == 0 {
                        bail!("{POLL_VAR} must be greater than zero");
                    }
                    supabase.poll_interval = Duration::from_millis(millis);
                }
                Source::Supabase(supabase)
            }
            _ => Source::Demo,
        };

        Ok(Self {
            source,
            channel: non_empty(CHANNEL_VAR).unwrap_or_else(|| DEFAULT_CHANNEL.to_owned()),
            department: non_empty(DEPARTMENT_VAR).map(DepartmentId),
            log_file: non_empty(LOG_FILE_VAR)
                .map_or_else(|| PathBuf::from(DEFAULT_LOG_FILE), PathBuf::from),
        })
    }
}

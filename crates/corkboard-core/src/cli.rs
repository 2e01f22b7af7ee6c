use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Modifier keys accepted as `key:value` tokens after a command.
pub const MODIFIER_KEYS: &[&str] = &["due", "assign", "desc"];

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "corkboard",
    version,
    about = "Corkboard: command-line client for a shared Kanban board service",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls `rc.key=value` and `rc.key:value` tokens out of the argument list.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

/// A command word followed by positional words and `key:value` modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub flags: Vec<String>,
    pub modifiers: BTreeMap<String, String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let mut tokens = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string());

        let Some(first) = tokens.next() else {
            let command = cfg
                .get("default.command")
                .unwrap_or_else(|| "help".to_string());
            debug!(command = %command, "no explicit command, using default");
            return Ok(Self {
                command,
                args: vec![],
                flags: vec![],
                modifiers: BTreeMap::new(),
            });
        };

        let known = crate::commands::known_command_names();
        let command = crate::commands::expand_command_abbrev(&first, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {first}"))?
            .to_string();
        debug!(token = %first, expanded = %command, "resolved command token");

        let mut args = Vec::new();
        let mut flags = Vec::new();
        let mut modifiers = BTreeMap::new();
        for token in tokens {
            if let Some(flag) = token.strip_prefix("--") {
                flags.push(flag.to_string());
                continue;
            }
            if let Some((key, value)) = token.split_once(':')
                && MODIFIER_KEYS.contains(&key)
            {
                modifiers.insert(key.to_string(), value.to_string());
                continue;
            }
            args.push(token);
        }

        Ok(Self {
            command,
            args,
            flags,
            modifiers,
        })
    }

    pub fn arg(&self, index: usize, name: &str) -> anyhow::Result<&str> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("{} requires <{name}>", self.command))
    }

    /// Positional words from `index` on, joined by single spaces.
    pub fn text_from(&self, index: usize, name: &str) -> anyhow::Result<String> {
        let words = self.args.get(index..).unwrap_or_default();
        if words.is_empty() {
            return Err(anyhow!("{} requires <{name}>", self.command));
        }
        Ok(words.join(" "))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn modifier(&self, key: &str) -> Option<&str> {
        self.modifiers.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn rc_tokens_become_overrides() {
        let pre = preprocess_args(&os(&[
            "corkboard",
            "rc.api.base_url=http://board:9000",
            "show",
            "rc.color:off",
            "Alpha",
        ]))
        .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["corkboard", "show", "Alpha"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.api.base_url".to_string(), "http://board:9000".to_string()),
                ("rc.color".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn invocation_splits_words_flags_and_modifiers() {
        let inv = Invocation::parse(
            &Config::default(),
            os(&["ad", "Alpha", "12", "Write", "notes", "due:tomorrow", "assign:3", "--all"]),
        )
        .expect("parse");
        assert_eq!(inv.command, "add");
        assert_eq!(inv.arg(0, "workspace").expect("ws"), "Alpha");
        assert_eq!(inv.text_from(2, "title").expect("title"), "Write notes");
        assert_eq!(inv.modifier("due"), Some("tomorrow"));
        assert_eq!(inv.modifier("assign"), Some("3"));
        assert!(inv.has_flag("all"));
        assert!(inv.arg(5, "extra").is_err());
    }

    #[test]
    fn unknown_modifier_keys_stay_positional() {
        let inv = Invocation::parse(&Config::default(), os(&["rename-task", "Alpha", "7", "note:", "call", "Bo"]))
            .expect("parse");
        assert_eq!(inv.text_from(2, "title").expect("title"), "note: call Bo");
    }
}

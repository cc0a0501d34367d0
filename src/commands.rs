//! Turning `/whitelist <sub> <args...>` into something we can act on.
//!
//! Parsing never touches the whitelist, so a malformed command can't change anything.

use std::time::Duration;

use whitelist_store::{BulkOp, WhitelistError};

pub const USAGE: &str = "Usage: /whitelist <add|remove|temp|info|list|search|count|bulk|import|export|clear|reload|config> ...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subcommand {
    Add { id: String },
    Remove { id: String },
    /// Whitelisted for `duration`, starting now.
    Temp { id: String, duration: Duration },
    Info { id: String },
    List { page: usize },
    Search { term: String },
    Count,
    Bulk { op: BulkOp, ids: Vec<String> },
    /// Reads ids from a document in the data directory.
    Import { document: String },
    Export,
    Clear,
    Reload,
    Config,
}

fn usage(line: &str) -> WhitelistError {
    WhitelistError::BadArguments(format!("Usage: /whitelist {}", line))
}

fn exactly<'a>(args: &'a [String], n: usize, line: &str) -> Result<&'a [String], WhitelistError> {
    if args.len() == n {
        Ok(args)
    } else {
        Err(usage(line))
    }
}

impl Subcommand {
    /// `args` as the host gives them, i.e. without the command name itself.
    pub fn parse(args: &[String]) -> Result<Subcommand, WhitelistError> {
        let (sub, rest) = match args.split_first() {
            Some((sub, rest)) => (sub.to_ascii_lowercase(), rest),
            None => return Err(WhitelistError::BadArguments(USAGE.to_string())),
        };

        let cmd = match sub.as_str() {
            "add" => Subcommand::Add { id: exactly(rest, 1, "add <steamid>")?[0].clone() },
            "remove" | "rm" => Subcommand::Remove { id: exactly(rest, 1, "remove <steamid>")?[0].clone() },
            "info" => Subcommand::Info { id: exactly(rest, 1, "info <steamid>")?[0].clone() },
            "temp" => {
                let rest = exactly(rest, 2, "temp <steamid> <duration, e.g. 30m, 12h, 7d>")?;
                let duration = match humantime::parse_duration(&rest[1]) {
                    Ok(d) if !d.is_zero() => d,
                    _ => return Err(WhitelistError::BadArguments(format!(
                        "Invalid duration '{}'. Try something like 30m, 12h or 7d.", rest[1]
                    ))),
                };
                Subcommand::Temp { id: rest[0].clone(), duration }
            }
            "list" => match rest {
                [] => Subcommand::List { page: 1 },
                [page] => match page.parse::<usize>() {
                    Ok(page) => Subcommand::List { page },
                    Err(_) => return Err(usage("list [page]")),
                },
                _ => return Err(usage("list [page]")),
            },
            "search" => Subcommand::Search { term: exactly(rest, 1, "search <text>")?[0].clone() },
            "count" => { exactly(rest, 0, "count")?; Subcommand::Count },
            "bulk" => {
                let line = "bulk <add|remove> <steamid> [steamid...] (space or comma separated)";
                let (op, ids) = rest.split_first().ok_or_else(|| usage(line))?;
                let op = op.parse::<BulkOp>().map_err(|_| usage(line))?;
                let ids: Vec<String> = ids.iter()
                    .flat_map(|s| s.split(','))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect();
                if ids.is_empty() {
                    return Err(usage(line));
                }
                Subcommand::Bulk { op, ids }
            }
            "import" => Subcommand::Import { document: exactly(rest, 1, "import <document name>")?[0].clone() },
            "export" => { exactly(rest, 0, "export")?; Subcommand::Export },
            "clear" => { exactly(rest, 0, "clear")?; Subcommand::Clear },
            "reload" => { exactly(rest, 0, "reload")?; Subcommand::Reload },
            "config" => { exactly(rest, 0, "config")?; Subcommand::Config },
            _ => return Err(WhitelistError::BadArguments(USAGE.to_string())),
        };
        Ok(cmd)
    }

    /// Whether running this may change the whitelist.
    pub fn is_mutation(&self) -> bool {
        matches!(self,
            Subcommand::Add { .. }
            | Subcommand::Remove { .. }
            | Subcommand::Temp { .. }
            | Subcommand::Bulk { .. }
            | Subcommand::Import { .. }
            | Subcommand::Clear
            | Subcommand::Reload
        )
    }
}

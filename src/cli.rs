//! Command-line interface.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "backlog",
    version,
    about = "Game catalog and collection cache tooling"
)]
pub struct Args {
    /// Log output format
    #[arg(
        long,
        value_enum,
        global = true,
        default_value_t = default_tracing_format()
    )]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

/// Pretty output while developing, JSON in release builds.
fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a query against the upstream metadata API through the request cache
    Query {
        /// Endpoint name, e.g. `games`
        endpoint: String,
        /// Query-language body, e.g. `fields name; limit 5;`
        query: String,
        /// Cache lifetime in seconds for this result
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Inspect or maintain the persistent cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Read a user's cached collection aggregates
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print a cached entry's data, if still valid
    Get { key: String },
    /// Remove expired and malformed entries
    Sweep,
    /// Remove every key containing the pattern
    Invalidate { pattern: String },
    /// Remove every application cache key (logout)
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Every game in the user's collection, newest first
    Collection { uid: String },
    /// Game counts and average rating
    Stats { uid: String },
    /// The user's custom lists
    Lists { uid: String },
    /// The user's reviews, most recent first
    Reviews { uid: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_with_ttl() {
        let args = Args::parse_from([
            "backlog",
            "--tracing",
            "json",
            "query",
            "games",
            "fields name; limit 1;",
            "--ttl",
            "60",
        ]);
        assert_eq!(args.tracing, TracingFormat::Json);
        match args.command {
            Command::Query {
                endpoint,
                query,
                ttl,
            } => {
                assert_eq!(endpoint, "games");
                assert_eq!(query, "fields name; limit 1;");
                assert_eq!(ttl, Some(60));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_cache_invalidate() {
        let args = Args::parse_from(["backlog", "cache", "invalidate", "statsCache_"]);
        assert!(matches!(
            args.command,
            Command::Cache(CacheCommand::Invalidate { pattern }) if pattern == "statsCache_"
        ));
    }

    #[test]
    fn parses_user_stats() {
        let args = Args::parse_from(["backlog", "user", "stats", "u1"]);
        assert!(matches!(
            args.command,
            Command::User(UserCommand::Stats { uid }) if uid == "u1"
        ));
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}

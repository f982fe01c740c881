//! Command-line interface definitions.
//!
//! Options can be provided via command-line flags or environment variables;
//! a `.env` file in the working directory is read first.

use crate::render::RendererKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Aggregate and normalize news from Uzbek news sites.
///
/// # Examples
///
/// ```sh
/// # Sport news from the last week, printed to stdout
/// news_fetcher fetch sport
///
/// # Up to 20 business articles for a fixed range, written to ./json
/// news_fetcher fetch business -l 20 --date-from 2025-01-20 --date-to 2025-01-27 -j ./json
///
/// # Available categories
/// news_fetcher categories
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a settings YAML file (the bundled catalog is used otherwise)
    #[arg(short, long, global = true, env = "NEWS_FETCHER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, normalize and filter articles for one category
    Fetch(FetchArgs),
    /// List categories and their sources
    Categories,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Category name, e.g. `sport`
    pub category: String,

    /// Maximum number of articles (defaults to the configured limit)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Earliest publication date, YYYY-MM-DD (defaults to a week ago)
    #[arg(long)]
    pub date_from: Option<String>,

    /// Latest publication date, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    pub date_to: Option<String>,

    /// Output directory for the JSON file; prints to stdout when absent
    #[arg(short, long)]
    pub json_output_dir: Option<PathBuf>,

    /// Rendering engine, overriding the settings file
    #[arg(long, value_enum)]
    pub renderer: Option<RendererKind>,

    /// API key of the extraction model service
    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    pub api_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_parsing() {
        let cli = Cli::parse_from([
            "news_fetcher",
            "fetch",
            "sport",
            "--limit",
            "20",
            "--date-from",
            "2025-01-20",
            "--date-to",
            "2025-01-27",
            "--json-output-dir",
            "./json",
            "--renderer",
            "http",
            "--api-key",
            "secret",
        ]);

        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.category, "sport");
        assert_eq!(args.limit, Some(20));
        assert_eq!(args.date_from.as_deref(), Some("2025-01-20"));
        assert_eq!(args.date_to.as_deref(), Some("2025-01-27"));
        assert_eq!(args.json_output_dir, Some(PathBuf::from("./json")));
        assert_eq!(args.renderer, Some(RendererKind::Http));
        assert_eq!(args.api_key, "secret");
    }

    #[test]
    fn test_short_flags_and_global_config() {
        let cli = Cli::parse_from([
            "news_fetcher",
            "fetch",
            "business",
            "-l",
            "5",
            "-j",
            "/tmp/json",
            "--api-key",
            "k",
            "-c",
            "/etc/news.yaml",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("/etc/news.yaml")));
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.json_output_dir, Some(PathBuf::from("/tmp/json")));
        assert_eq!(args.renderer, None);
    }

    #[test]
    fn test_categories_needs_no_key() {
        let cli = Cli::parse_from(["news_fetcher", "categories"]);
        assert!(matches!(cli.command, Command::Categories));
    }

    #[test]
    fn test_bad_limit_is_rejected() {
        let result = Cli::try_parse_from(["news_fetcher", "fetch", "sport", "-l", "many", "--api-key", "k"]);
        assert!(result.is_err());
    }
}

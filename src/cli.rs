//! Minimal CLI parsing.
//!
//! ```text
//! indexer-pipeline [serve]
//! indexer-pipeline search [--indexer ID]... [--type TYPE] [--cat N,N] [--limit N] QUERY...
//! indexer-pipeline caps ID
//! indexer-pipeline list
//! ```

use std::env;

use anyhow::{Context, Result, anyhow, bail};

use crate::indexer::types::{SearchCriteria, SearchType};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Serve,
    Search {
        /// Empty means every configured indexer
        indexers: Vec<String>,
        search_type: SearchType,
        query: String,
        categories: Vec<i32>,
        limit: Option<u32>,
    },
    Caps {
        indexer: String,
    },
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub command: Command,
}

impl CliOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let command = match args.next().as_deref() {
            None | Some("serve") => Command::Serve,
            Some("list") => Command::List,
            Some("caps") => Command::Caps {
                indexer: args.next().context("caps requires an indexer id")?,
            },
            Some("search") => parse_search(args)?,
            Some(other) => bail!("Unknown command: {}", other),
        };
        Ok(Self { command })
    }
}

fn parse_search(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let mut indexers = vec![];
    let mut search_type = SearchType::Search;
    let mut categories = vec![];
    let mut limit = None;
    let mut terms = vec![];

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--indexer" | "-i" => indexers.push(args.next().context("--indexer requires a value")?),
            "--type" | "-t" => {
                let value = args.next().context("--type requires a value")?;
                search_type = value.parse().map_err(|e| anyhow!("{}", e))?;
            }
            "--cat" | "-c" => {
                let value = args.next().context("--cat requires a value")?;
                for cat in value.split(',').filter(|c| !c.trim().is_empty()) {
                    categories.push(
                        cat.trim()
                            .parse()
                            .with_context(|| format!("Invalid category {}", cat))?,
                    );
                }
            }
            "--limit" | "-l" => {
                let value = args.next().context("--limit requires a value")?;
                limit = Some(value.parse().context("Invalid --limit")?);
            }
            _ if arg.starts_with("--") => bail!("Unknown option: {}", arg),
            _ => terms.push(arg),
        }
    }

    Ok(Command::Search {
        indexers,
        search_type,
        query: terms.join(" "),
        categories,
        limit,
    })
}

impl Command {
    /// Criteria for a `search` command; the query fills the free-text term
    pub fn criteria(&self) -> Option<SearchCriteria> {
        let Command::Search {
            search_type,
            query,
            categories,
            limit,
            ..
        } = self
        else {
            return None;
        };

        let mut criteria = match search_type {
            SearchType::Search => SearchCriteria::Basic(Default::default()),
            SearchType::TvSearch => SearchCriteria::Tv(Default::default()),
            SearchType::MovieSearch => SearchCriteria::Movie(Default::default()),
            SearchType::MusicSearch => SearchCriteria::Music(Default::default()),
            SearchType::BookSearch => SearchCriteria::Book(Default::default()),
        };
        let common = criteria.common_mut();
        let query = query.trim();
        if query.is_empty() {
            common.is_rss_search = true;
        } else {
            common.search_term = Some(query.to_string());
        }
        common.categories = categories.clone();
        common.limit = *limit;
        Some(criteria)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_default_is_serve() {
        assert_eq!(parse(&[]).unwrap().command, Command::Serve);
        assert_eq!(parse(&["list"]).unwrap().command, Command::List);
    }

    #[test]
    fn test_search_options() {
        let options = parse(&[
            "search", "-i", "nzbgeek", "--type", "tvsearch", "--cat", "5030,5040", "the", "office",
        ])
        .unwrap();

        assert_eq!(
            options.command,
            Command::Search {
                indexers: vec!["nzbgeek".to_string()],
                search_type: SearchType::TvSearch,
                query: "the office".to_string(),
                categories: vec![5030, 5040],
                limit: None,
            }
        );

        let criteria = options.command.criteria().unwrap();
        assert_eq!(criteria.search_type(), SearchType::TvSearch);
        assert_eq!(criteria.common().term(), Some("the office"));
        assert!(!criteria.is_rss());
    }

    #[test]
    fn test_empty_search_is_rss() {
        let criteria = parse(&["search"]).unwrap().command.criteria().unwrap();
        assert!(criteria.is_rss());
    }

    #[test]
    fn test_errors() {
        assert!(parse(&["caps"]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["search", "--bogus"]).is_err());
        assert!(parse(&["search", "--type", "podcast"]).is_err());
    }
}

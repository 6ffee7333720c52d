//! Package search through the external `nix-search` tool

use std::process::Command;

use serde::Deserialize;

use crate::config::SearchConfig;
use crate::error::{ShelfError, ShelfResult};
use crate::models::{SearchResult, TrackingMetadata};
use crate::nix::validate_channel;
use crate::runner::SafeCommand;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Parse the search tool's `{"results": [...]}` document
pub fn parse_results(raw: &str) -> ShelfResult<Vec<SearchResult>> {
    let response: SearchResponse =
        serde_json::from_str(raw).map_err(|e| ShelfError::parse("search results", e))?;
    Ok(response.results)
}

#[derive(Debug, Clone)]
pub struct NixSearch {
    config: SearchConfig,
}

impl NixSearch {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn binary(&self) -> &str {
        &self.config.binary
    }

    /// `<bin> search --channel <channel> -j --limit <n> <query>`
    pub fn command(
        &self,
        query: &str,
        channel: &str,
        limit: Option<usize>,
    ) -> ShelfResult<SafeCommand> {
        let query = query.trim();
        if query.is_empty() || query.starts_with('-') {
            return Err(ShelfError::InvalidName {
                kind: "query",
                value: query.to_string(),
                reason: "must be non-empty and cannot start with '-'",
            });
        }
        validate_channel(channel)?;

        let limit = limit.unwrap_or(self.config.limit);
        Ok(SafeCommand::new(
            self.config.binary.clone(),
            vec![
                "search".into(),
                "--channel".into(),
                channel.to_string(),
                "-j".into(),
                "--limit".into(),
                limit.to_string(),
                query.to_string(),
            ],
        ))
    }

    pub fn search(
        &self,
        query: &str,
        channel: &str,
        limit: Option<usize>,
    ) -> ShelfResult<Vec<SearchResult>> {
        let cmd = self.command(query, channel, limit)?;
        tracing::debug!(command = %cmd, "searching");

        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .map_err(|source| ShelfError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ShelfError::Execution {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let results = parse_results(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!(count = results.len(), "search finished");
        Ok(results)
    }
}

impl From<&SearchResult> for TrackingMetadata {
    fn from(result: &SearchResult) -> Self {
        fn non_empty(list: &[String]) -> Option<Vec<String>> {
            (!list.is_empty()).then(|| list.to_vec())
        }

        Self {
            attr_name: Some(result.attr_name.clone()),
            description: result.description.clone().filter(|d| !d.is_empty()),
            homepage: result.homepage.first().cloned(),
            license_set: non_empty(&result.license_set),
            programs: non_empty(&result.programs),
            source_url: result.position.clone(),
        }
    }
}

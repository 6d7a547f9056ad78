use anyhow::{Context, Result};
use colored::Colorize;
use logicterm_commit::persistence::{read_alias_map, read_comment_map, read_commit_state};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Default, Serialize)]
pub(crate) struct StateSummary {
    pub database_sequence: u64,
    pub last_commit_time: Option<i64>,
    pub stamps: usize,
    pub concepts_with_checks: u64,
    pub concepts_no_checks: u64,
    pub sememes_with_checks: u64,
    pub sememes_no_checks: u64,
    pub stamp_aliases: usize,
    pub stamp_comments: usize,
}

pub(crate) fn summarize(data_dir: &Path) -> Result<StateSummary> {
    let state = read_commit_state(data_dir)
        .with_context(|| format!("reading commit state in {}", data_dir.display()))?
        .unwrap_or_default();
    let aliases = read_alias_map(data_dir)?;
    let comments = read_comment_map(data_dir)?;
    Ok(StateSummary {
        database_sequence: state.database_sequence,
        last_commit_time: state.last_commit_time,
        stamps: state.stamps.len(),
        concepts_with_checks: state.uncommitted.concepts_with_checks.len(),
        concepts_no_checks: state.uncommitted.concepts_no_checks.len(),
        sememes_with_checks: state.uncommitted.sememes_with_checks.len(),
        sememes_no_checks: state.uncommitted.sememes_no_checks.len(),
        stamp_aliases: aliases.len(),
        stamp_comments: comments.len(),
    })
}

pub(crate) fn cmd_commit_state(data_dir: &Path, json: bool) -> Result<()> {
    let summary = summarize(data_dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} {}", "Database sequence:".bold(), summary.database_sequence);
    match summary.last_commit_time {
        Some(time) => println!("{} {time} ms", "Last commit:".bold()),
        None => println!("{} {}", "Last commit:".bold(), "never".yellow()),
    }
    println!("{} {}", "Stamps:".bold(), summary.stamps);
    println!("{}", "Uncommitted:".bold());
    println!("  concepts (checked)   {}", summary.concepts_with_checks);
    println!("  concepts (unchecked) {}", summary.concepts_no_checks);
    println!("  sememes (checked)    {}", summary.sememes_with_checks);
    println!("  sememes (unchecked)  {}", summary.sememes_no_checks);
    println!("{} {}", "Stamp aliases:".bold(), summary.stamp_aliases);
    println!("{} {}", "Stamp comments:".bold(), summary.stamp_comments);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logicterm_commit::persistence::{write_alias_map, write_commit_state, CommitState};

    #[test]
    fn empty_directory_summarizes_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let summary = summarize(dir.path()).unwrap();
        assert_eq!(summary.database_sequence, 0);
        assert_eq!(summary.last_commit_time, None);
        assert_eq!(summary.stamp_aliases, 0);
    }

    #[test]
    fn counts_come_from_the_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = CommitState {
            database_sequence: 4,
            ..CommitState::default()
        };
        state.uncommitted.sememes_no_checks.insert(11);
        write_commit_state(dir.path(), &state).unwrap();
        write_alias_map(dir.path(), &[(1, 2)]).unwrap();

        let summary = summarize(dir.path()).unwrap();
        assert_eq!(summary.database_sequence, 4);
        assert_eq!(summary.sememes_no_checks, 1);
        assert_eq!(summary.stamp_aliases, 1);
        assert_eq!(summary.stamp_comments, 0);
    }
}

//! Scoreboard import
//!
//! Parses scoreboard exports of the form `player, rank, stat values...` into
//! per-player match stats. A header row, when present, decides which column
//! holds which stat; without one the columns are read as
//! `player, rank, score, kills, deaths, assists`.

use crate::error::{LadderError, Result};
use crate::types::{MatchResult, PlayerMatchStats, Team};
use anyhow::Context;
use std::path::Path;

/// Where each field lives in a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    player: usize,
    rank: Option<usize>,
    score: Option<usize>,
    kills: Option<usize>,
    deaths: Option<usize>,
    assists: Option<usize>,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            player: 0,
            rank: Some(1),
            score: Some(2),
            kills: Some(3),
            deaths: Some(4),
            assists: Some(5),
        }
    }
}

impl Columns {
    /// Read a header row, or `None` if the row looks like data
    fn from_header(fields: &[String]) -> Option<Self> {
        let find = |names: &[&str]| {
            fields
                .iter()
                .position(|f| names.iter().any(|n| f.eq_ignore_ascii_case(n)))
        };

        let player = find(&["player", "name", "username"])?;
        Some(Self {
            player,
            rank: find(&["rank"]),
            score: find(&["score", "acs"]),
            kills: find(&["kills", "k"]),
            deaths: find(&["deaths", "d"]),
            assists: find(&["assists", "a"]),
        })
    }
}

fn take_field(current: &mut String) -> String {
    std::mem::take(current).trim().to_string()
}

/// Split CSV text into records, honouring double quotes
///
/// Quoted fields may span lines. Each record carries the line it starts on;
/// blank lines are skipped.
fn split_records(text: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    let mut finish = |fields: &mut Vec<String>, record_line: usize| {
        let record = std::mem::take(fields);
        if !(record.len() == 1 && record[0].is_empty()) {
            records.push((record_line, record));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(take_field(&mut current)),
            '\r' if !quoted => {}
            '\n' if !quoted => {
                fields.push(take_field(&mut current));
                finish(&mut fields, record_line);
                line += 1;
                record_line = line;
            }
            '\n' => {
                current.push('\n');
                line += 1;
            }
            _ => current.push(c),
        }
    }

    if quoted {
        return Err(LadderError::InvalidResult {
            reason: format!("unterminated quoted field starting at line {}", record_line),
        }
        .into());
    }
    if !current.is_empty() || !fields.is_empty() {
        fields.push(take_field(&mut current));
        finish(&mut fields, record_line);
    }
    Ok(records)
}

fn stat(fields: &[String], column: Option<usize>, name: &str, line: usize) -> Result<u32> {
    let Some(raw) = column.and_then(|idx| fields.get(idx)) else {
        return Ok(0);
    };
    if raw.is_empty() {
        return Ok(0);
    }
    // Scoreboards sometimes export averages such as "243.5"
    raw.parse::<u32>()
        .or_else(|_| raw.parse::<f64>().map(|v| v.max(0.0).round() as u32))
        .with_context(|| format!("Invalid {} '{}' at line {}", name, raw, line))
}

/// Parse scoreboard CSV text into per-player stats
pub fn parse_scoreboard(text: &str) -> Result<Vec<PlayerMatchStats>> {
    let mut columns = Columns::default();
    let mut rows = Vec::new();
    let mut first_row = true;

    for (line_num, fields) in split_records(text)? {
        if std::mem::take(&mut first_row) {
            if let Some(header) = Columns::from_header(&fields) {
                columns = header;
                continue;
            }
        }

        let player_id = fields
            .get(columns.player)
            .filter(|p| !p.is_empty())
            .cloned()
            .ok_or_else(|| LadderError::InvalidResult {
                reason: format!("missing player at line {}", line_num),
            })?;

        let rank_label = columns
            .rank
            .and_then(|idx| fields.get(idx))
            .filter(|r| !r.is_empty())
            .cloned();

        rows.push(PlayerMatchStats {
            player_id,
            rank_label,
            score: stat(&fields, columns.score, "score", line_num)?,
            kills: stat(&fields, columns.kills, "kills", line_num)?,
            deaths: stat(&fields, columns.deaths, "deaths", line_num)?,
            assists: stat(&fields, columns.assists, "assists", line_num)?,
        });
    }

    if rows.is_empty() {
        return Err(LadderError::InvalidResult {
            reason: "scoreboard has no player rows".to_string(),
        }
        .into());
    }
    Ok(rows)
}

/// Load a scoreboard file and pair it with the winning side
pub fn load_result(path: &Path, winning_team: Team) -> Result<MatchResult> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(MatchResult {
        winning_team,
        stats: parse_scoreboard(&text)?,
    })
}

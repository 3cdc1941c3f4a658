//! Legacy bankroll discovery from trading log tails.
//!
//! This path only runs when every HTTP endpoint has failed. It reads a bounded
//! tail of the newest matching log file and scans it backwards for
//! `bankroll`, `available` and `invested` followed by a number. Matching is
//! case-insensitive and tolerates `:`, `=`, `$`, quotes and whitespace between
//! the keyword and the number.
//!
//! Precedence is fixed: any direct `bankroll` match wins, scanning from the
//! newest line. Failing that, the newest line carrying both `available` and
//! `invested` is summed. Log formats are not a contract, so treat results from
//! here as a best-effort read until a structured source is always available.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::Result;
use crate::types::AccountSnapshot;

/// Where to look for log artifacts and how much of them to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogScanConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// File names must start with this.
    pub prefix: String,
    /// File extension without the dot.
    pub extension: String,
    /// Lines kept from the end of the file.
    pub tail_lines: usize,
    /// Bytes read from the end of the file.
    pub max_tail_bytes: u64,
}

impl Default for LogScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("logs"),
            prefix: "arena".to_string(),
            extension: "log".to_string(),
            tail_lines: 200,
            max_tail_bytes: 64 * 1024,
        }
    }
}

/// Find the most recently modified file matching the prefix and extension.
pub fn latest_log(config: &LogScanConfig) -> Option<PathBuf> {
    let entries = match fs::read_dir(&config.dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %config.dir.display(), error = %e, "Log directory not readable");
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            let path = entry.path();
            let name_ok = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&config.prefix));
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(&config.extension));
            name_ok && ext_ok
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Read at most `max_lines` lines from the last `max_bytes` of a file,
/// oldest first.
pub fn read_tail(path: &Path, max_lines: usize, max_bytes: u64) -> Result<Vec<String>> {
    let mut file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    // one byte earlier tells us whether `start` sits on a line boundary
    let read_from = start.saturating_sub(1);
    file.seek(SeekFrom::Start(read_from))?;

    let mut buf = Vec::with_capacity((len - read_from) as usize);
    file.read_to_end(&mut buf)?;
    let cut_mid_line = start > 0 && buf.first() != Some(&b'\n');
    let body = if start > 0 { buf.get(1..).unwrap_or_default() } else { &buf[..] };
    let text = String::from_utf8_lossy(body);

    let mut lines: Vec<&str> = text.lines().collect();
    if cut_mid_line && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// Scan tail lines (oldest first) for a bankroll figure.
pub fn scan_lines(lines: &[String]) -> Option<AccountSnapshot> {
    let mut pair: Option<AccountSnapshot> = None;

    for line in lines.iter().rev() {
        let lower = line.to_ascii_lowercase();

        if let Some(bankroll) = capture_after(&lower, "bankroll", |v| v > Decimal::ZERO) {
            return Some(AccountSnapshot::from_equity(bankroll));
        }

        if pair.is_none() {
            if let (Some(available), Some(invested)) = (
                capture_after(&lower, "available", |v| v >= Decimal::ZERO),
                capture_after(&lower, "invested", |v| v >= Decimal::ZERO),
            ) {
                let snapshot = AccountSnapshot::from_parts(available, invested);
                if snapshot.equity > Decimal::ZERO {
                    pair = Some(snapshot);
                }
            }
        }
    }

    pair
}

/// Resolve a snapshot from the newest matching log.
pub fn scan_latest(config: &LogScanConfig) -> Option<(PathBuf, AccountSnapshot)> {
    let path = latest_log(config)?;
    let lines = match read_tail(&path, config.tail_lines, config.max_tail_bytes) {
        Ok(lines) => lines,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to read log tail");
            return None;
        }
    };
    scan_lines(&lines).map(|snapshot| (path, snapshot))
}

/// Number following the first standalone occurrence of `keyword` whose value
/// passes `accept`.
fn capture_after(line: &str, keyword: &str, accept: impl Fn(Decimal) -> bool) -> Option<Decimal> {
    let mut from = 0;
    while let Some(offset) = line[from..].find(keyword) {
        let start = from + offset;
        let end = start + keyword.len();
        from = end;

        let standalone = line[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_alphanumeric());
        if !standalone {
            continue;
        }

        let rest = line[end..].trim_start_matches(|c: char| {
            c.is_whitespace() || matches!(c, ':' | '=' | '$' | '"' | '\'')
        });
        let number: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
            .filter(|c| *c != ',')
            .collect();
        let number = number.trim_end_matches('.');

        match Decimal::from_str(number) {
            Ok(value) if accept(value) => return Some(value),
            _ => {}
        }
    }
    None
}

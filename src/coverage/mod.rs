//! The coverage ledger: an `engine::EventHook` observer that turns line-hit
//! events into a serializable per-file/per-line model (SPEC_FULL.md §4.E).

pub mod config;
pub mod report;

use crate::engine::{ArmingHandle, BreakPointInfo, EventHook};
use crate::engine::symbols::SymbolIndex;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoveredLine {
    pub number: u64,
    pub text: String,
    pub hits: u64,
    #[serde(rename = "isRelevant")]
    pub is_relevant: bool,
    #[serde(rename = "lastHit")]
    pub last_hit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoveredFile {
    pub path: PathBuf,
    #[serde(rename = "relativePath")]
    pub relative_path: PathBuf,
    pub lines: Vec<CoveredLine>,
    #[serde(rename = "totalLines")]
    pub total_lines: u64,
    #[serde(rename = "totalRelevantLines")]
    pub total_relevant_lines: u64,
    #[serde(rename = "relevantLinesHit")]
    pub relevant_lines_hit: u64,
    #[serde(rename = "averageHitsPerLine")]
    pub average_hits_per_line: f64,
    #[serde(rename = "totalHits")]
    pub total_hits: u64,
    #[serde(rename = "lastHit")]
    pub last_hit: i64,
    pub coverage: f64,
}

impl CoveredFile {
    fn new(path: PathBuf, relative_path: PathBuf) -> Self {
        Self {
            path,
            relative_path,
            lines: Vec::new(),
            total_lines: 0,
            total_relevant_lines: 0,
            relevant_lines_hit: 0,
            average_hits_per_line: 0.0,
            total_hits: 0,
            last_hit: 0,
            coverage: 0.0,
        }
    }

    fn recompute_aggregates(&mut self) {
        self.average_hits_per_line = if self.total_relevant_lines == 0 {
            0.0
        } else {
            self.total_hits as f64 / self.total_relevant_lines as f64
        };
        self.coverage = if self.total_relevant_lines == 0 {
            0.0
        } else {
            self.relevant_lines_hit as f64 / self.total_relevant_lines as f64 * 100.0
        };
    }
}

/// Strip `project_root` and a leading separator from `path`, matching the
/// original `to_relative_path`.
fn to_relative_path(project_root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(project_root) {
        Ok(stripped) => stripped.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub run: i64,
    pub files: Vec<CoveredFile>,
    pub hits: serde_json::Map<String, serde_json::Value>,
}

/// Observes the engine and materializes the ledger, using an arena
/// (`Vec<CoveredFile>`) plus a `HashMap<PathBuf, usize>` position index
/// instead of pointers into the vector (SPEC_FULL.md §9, "Back/weak
/// references").
pub struct CoverageObserver {
    ledger: Ledger,
    by_path: HashMap<PathBuf, usize>,
}

impl CoverageObserver {
    pub fn new(project_root: &Path, files: &[PathBuf]) -> Self {
        let mut ledger_files = Vec::with_capacity(files.len());
        let mut by_path = HashMap::with_capacity(files.len());

        for (idx, path) in files.iter().enumerate() {
            let relative = to_relative_path(project_root, path);
            ledger_files.push(CoveredFile::new(path.clone(), relative));
            by_path.insert(path.clone(), idx);
        }

        Self {
            ledger: Ledger {
                run: Utc::now().timestamp(),
                files: ledger_files,
                hits: serde_json::Map::new(),
            },
            by_path,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    fn covered_file_mut(&mut self, path: &Path) -> Option<&mut CoveredFile> {
        let idx = *self.by_path.get(path)?;
        self.ledger.files.get_mut(idx)
    }
}

impl EventHook for CoverageObserver {
    fn on_execution_started(
        &mut self,
        symbols: &SymbolIndex,
        engine: &mut ArmingHandle,
    ) -> Result<()> {
        for source_file in symbols.files() {
            let Some(idx) = self.by_path.get(&source_file.source).copied() else {
                continue;
            };

            let Ok(content) = fs::read_to_string(&source_file.source) else {
                continue;
            };

            let file = &mut self.ledger.files[idx];
            file.total_relevant_lines = source_file.lines.len() as u64;

            for (i, raw_line) in content.lines().enumerate() {
                let number = (i + 1) as u64;
                let text = raw_line.to_string();
                let is_relevant = source_file.contains_line(number);

                file.lines.push(CoveredLine {
                    number,
                    text,
                    hits: 0,
                    is_relevant,
                    last_hit: 0,
                });

                if is_relevant {
                    engine.append_break_point(&source_file.source, number)?;
                }
            }

            file.total_lines = file.lines.len() as u64;
            file.recompute_aggregates();
        }

        Ok(())
    }

    fn on_break_point(&mut self, bp: &BreakPointInfo) {
        let now = Utc::now().timestamp();
        let Some(file) = self.covered_file_mut(&bp.file) else {
            return;
        };

        let Some(line) = file.lines.iter_mut().find(|l| l.number == bp.line) else {
            return;
        };

        let first_hit = line.hits == 0;
        line.hits += 1;
        line.last_hit = now;

        file.last_hit = now;
        file.total_hits += 1;
        if first_hit {
            file.relevant_lines_hit += 1;
        }
        file.recompute_aggregates();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::symbols::{SourceFile, SourceLine};

    fn sample_observer() -> CoverageObserver {
        CoverageObserver::new(Path::new("/proj"), &[PathBuf::from("/proj/foo.c")])
    }

    #[test]
    fn new_seeds_relative_path() {
        let obs = sample_observer();
        assert_eq!(obs.ledger().files[0].relative_path, PathBuf::from("foo.c"));
        assert_eq!(obs.ledger().files[0].total_lines, 0);
    }

    #[test]
    fn recompute_aggregates_handles_zero_denominator() {
        let mut file = CoveredFile::new(PathBuf::from("/a"), PathBuf::from("a"));
        file.recompute_aggregates();
        assert_eq!(file.coverage, 0.0);
        assert_eq!(file.average_hits_per_line, 0.0);
    }

    #[test]
    fn on_break_point_counts_first_hit_once() {
        let mut obs = sample_observer();
        obs.ledger.files[0].total_relevant_lines = 1;
        obs.ledger.files[0].lines.push(CoveredLine {
            number: 10,
            text: "x".into(),
            hits: 0,
            is_relevant: true,
            last_hit: 0,
        });

        let bp = BreakPointInfo {
            file: PathBuf::from("/proj/foo.c"),
            line: 10,
            addr: 0x1000,
        };

        obs.on_break_point(&bp);
        obs.on_break_point(&bp);

        let file = &obs.ledger().files[0];
        assert_eq!(file.lines[0].hits, 2);
        assert_eq!(file.relevant_lines_hit, 1);
        assert_eq!(file.total_hits, 2);
        assert_eq!(file.coverage, 100.0);
    }

    #[test]
    fn to_relative_path_falls_back_when_not_prefixed() {
        let p = to_relative_path(Path::new("/proj"), Path::new("/other/foo.c"));
        assert_eq!(p, PathBuf::from("/other/foo.c"));
    }

    #[test]
    fn source_file_line_lookup_used_by_is_relevant() {
        let f = SourceFile {
            source: PathBuf::from("/proj/foo.c"),
            object: PathBuf::from("/proj/foo"),
            lines: vec![SourceLine { line: 3, address: 1 }],
        };
        assert!(f.contains_line(3));
        assert!(!f.contains_line(4));
    }
}

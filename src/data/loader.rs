// ============================================================
// Layer 4 - Record Loader
// ============================================================
// Reads a prompt/response dataset file.
//
// File format (UTF-8, one record per line):
//
//     <prompt>\t<response>
//
//   - blank lines are skipped
//   - the FIRST tab splits prompt from response, so responses
//     may themselves contain tabs
//   - a non-blank line with no tab is an error naming the line;
//     a silently dropped record would shift every later one
//
// Both fields go through the Preprocessor before being stored.
//
// Reference: Rust Book §9 (Error Handling), §12 (I/O)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::data::preprocessor::Preprocessor;
use crate::domain::record::PromptResponse;
use crate::domain::traits::RecordSource;
use crate::error::TrainError;

/// Loads prompt/response records from a tab-separated text file.
pub struct TsvRecordLoader {
    path: PathBuf,
}

impl TsvRecordLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse file contents. Split out from `load_all` so it can be
    /// tested without touching the filesystem.
    pub fn parse(&self, contents: &str) -> Result<Vec<PromptResponse>, TrainError> {
        let prep = Preprocessor::new();
        let mut records = Vec::new();

        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let Some((prompt, response)) = line.split_once('\t') else {
                return Err(TrainError::Data {
                    path:   self.path.display().to_string(),
                    line:   idx + 1,
                    reason: "expected '<prompt>\\t<response>'".into(),
                });
            };
            records.push(PromptResponse::new(prep.clean(prompt), prep.clean(response)));
        }

        Ok(records)
    }
}

impl RecordSource for TsvRecordLoader {
    fn load_all(&self) -> Result<Vec<PromptResponse>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read dataset '{}'", self.path.display()))?;

        let records = self.parse(&contents)?;
        tracing::info!(
            "Loaded {} records from '{}'",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parses_and_cleans_records() {
        let loader  = TsvRecordLoader::new("mem.tsv");
        let records = loader
            .parse("What is  2+2?\tFour\n\n  Capital of France?\tParis\textra  \n")
            .unwrap();
        assert_eq!(
            records,
            vec![
                PromptResponse::new("What is 2+2?", "Four"),
                PromptResponse::new("Capital of France?", "Paris extra"),
            ]
        );
    }

    #[test]
    fn test_line_without_tab_is_reported() {
        let loader = TsvRecordLoader::new("bad.tsv");
        let err    = loader.parse("ok\tfine\nbroken line\n").unwrap_err();
        match err {
            TrainError::Data { path, line, .. } => {
                assert_eq!(path, "bad.tsv");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_load_all_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hello\tworld").unwrap();
        let loader = TsvRecordLoader::new(file.path());
        assert_eq!(loader.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        let loader = TsvRecordLoader::new("/definitely/not/here.tsv");
        let err    = loader.load_all().unwrap_err();
        assert!(err.to_string().contains("Cannot read dataset"));
    }
}

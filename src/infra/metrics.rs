// ============================================================
// Layer 6 - Metrics Logger
// ============================================================
// Appends one CSV row per epoch so learning curves can be
// plotted after the run.
//
//   epoch,regime,train_loss,val_loss,optimizer_steps,learning_rate,checkpoint
//   0,gradient_ascent,0.812300,0.790100,125,0.000150,1
//
// Losses are the same scaled averages printed to the console.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

const HEADER: &str = "epoch,regime,train_loss,val_loss,optimizer_steps,learning_rate,checkpoint";

#[derive(Debug, Clone)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch:           usize,
    /// "gradient_ascent" or "newton"
    pub regime:          String,
    pub train_loss:      f64,
    pub val_loss:        f64,
    /// Optimizer steps taken so far in the run
    pub optimizer_steps: usize,
    /// Learning rate the next optimizer step will use
    pub learning_rate:   f64,
    /// Whether this epoch wrote a checkpoint
    pub checkpoint:      bool,
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the header when the file does not exist yet, so
    /// repeated runs into one directory append.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{},{:.6},{:.6},{},{:.8},{}",
            m.epoch,
            m.regime,
            m.train_loss,
            m.val_loss,
            m.optimizer_steps,
            m.learning_rate,
            u8::from(m.checkpoint),
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_once_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let row = EpochMetrics {
            epoch:           1,
            regime:          "newton".into(),
            train_loss:      0.5,
            val_loss:        0.25,
            optimizer_steps: 10,
            learning_rate:   1e-4,
            checkpoint:      true,
        };

        MetricsLogger::new(dir.path()).unwrap().log(&row).unwrap();
        // a second logger on the same directory must not repeat the header
        MetricsLogger::new(dir.path()).unwrap().log(&row).unwrap();

        let text  = fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "1,newton,0.500000,0.250000,10,0.00010000,1");
    }
}

// ============================================================
// Layer 6 - Prediction Log
// ============================================================
// Per-epoch qualitative output. Each validation example becomes
//
//   Input:<decoded input ids>
//   Label:<decoded non-ignored labels>
//   Result:<decoded argmax predictions>
//   <blank line>
//
// File: {dir}/output_at_{tag}.txt where tag is the zero-based
// epoch index (or "eval" for a standalone evaluation).

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};

use crate::domain::record::Prediction;

pub struct PredictionLog {
    dir: PathBuf,
}

impl PredictionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("output_at_{tag}.txt"))
    }

    pub fn write(&self, tag: &str, predictions: &[Prediction]) -> Result<PathBuf> {
        let path = self.path_for(tag);
        let file = File::create(&path)
            .with_context(|| format!("Cannot write predictions to '{}'", path.display()))?;

        let mut out = BufWriter::new(file);
        for p in predictions {
            write!(out, "Input:{}\nLabel:{}\nResult:{}\n\n", p.input, p.label, p.result)?;
        }
        out.flush()?;

        tracing::debug!("Wrote {} predictions to '{}'", predictions.len(), path.display());
        Ok(path)
    }
}

//! End-to-end ingestion job.
//!
//! [`run_job`] runs the passes in order:
//!
//! 1. merge the corpus into the NDJSON artifact
//! 2. wrap the NDJSON artifact into the JSON array artifact
//! 3. discover the schema from the NDJSON artifact and save it
//! 4. write the tabular artifact from the NDJSON artifact and the schema
//!
//! then saves a [`JobReport`] next to the artifacts. A step whose artifact already
//! exists is skipped unless [`JobConfig::overwrite`] is set, so a job that died in a
//! later pass can be rerun without repeating the earlier ones. Once a step runs, every
//! later step runs too: its kept artifact was derived from the old input.

use crate::config::JobConfig;
use crate::io::artifact::ArtifactWriter;
use crate::merge::{MergeStats, merge_to_ndjson};
use crate::schema::{Schema, discover_artifact};
use crate::tabular::{TabularStats, tabulate_artifact};
use crate::wrap::wrap_file;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Merge,
    Wrap,
    Schema,
    Tabulate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Step,
    pub output: PathBuf,
    /// `false` when an existing artifact was kept.
    pub ran: bool,
    pub elapsed_ms: u64,
}

/// Everything a job did, serialised to the report artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub shards: usize,
    pub merge: Option<MergeStats>,
    pub array_elements: Option<u64>,
    pub schema_fields: usize,
    pub schema_records: Option<u64>,
    pub tabular: Option<TabularStats>,
    pub steps: Vec<StepReport>,
    pub elapsed_ms: u64,
}

impl JobReport {
    /// # Errors
    /// Returns an error if the report cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut artifact = ArtifactWriter::create(path)?;
        serde_json::to_writer_pretty(&mut artifact, self)
            .with_context(|| format!("serialize report to {}", path.display()))?;
        artifact.write_all(b"\n")?;
        artifact.commit()?;
        Ok(())
    }
}

fn millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Run `step` unless its artifact exists, overwriting is off and no earlier step ran.
///
/// `upstream_ran` is set once a step runs.
fn run_step<T>(
    config: &JobConfig,
    report: &mut JobReport,
    upstream_ran: &mut bool,
    step: Step,
    output: PathBuf,
    run: impl FnOnce(&Path) -> Result<T>,
) -> Result<Option<T>> {
    let started = Instant::now();
    if output.exists() && !config.overwrite && !*upstream_ran {
        info!(step = ?step, output = %output.display(), "artifact exists, keeping it");
        report.steps.push(StepReport {
            step,
            output,
            ran: false,
            elapsed_ms: 0,
        });
        return Ok(None);
    }
    let value = run(&output).with_context(|| format!("{step:?} step failed"))?;
    *upstream_ran = true;
    report.steps.push(StepReport {
        step,
        output,
        ran: true,
        elapsed_ms: millis(started),
    });
    Ok(Some(value))
}

/// Run every pass of the job described by `config`.
///
/// # Errors
/// Returns an error if the corpus is empty or misconfigured, or if any artifact cannot
/// be written. Shard-level failures are not errors; they are recorded in the report.
pub fn run_job(config: &JobConfig) -> Result<JobReport> {
    let started = Instant::now();
    let corpus = config.corpus()?;
    let merge_options = config.merge_options();
    let tabular_options = config.tabular_options()?;
    let mut report = JobReport {
        shards: corpus.len(),
        ..JobReport::default()
    };
    info!(shards = corpus.len(), output_dir = %config.output_dir.display(), "job started");

    let mut ran = false;
    let ndjson = config.ndjson_path();
    report.merge = run_step(config, &mut report, &mut ran, Step::Merge, ndjson.clone(), |out| {
        merge_to_ndjson(&corpus, out, merge_options)
    })?;

    report.array_elements = run_step(config, &mut report, &mut ran, Step::Wrap, config.array_path(), |out| {
        wrap_file(&ndjson, out)
    })?;

    let schema_path = config.schema_path();
    let discovered = run_step(config, &mut report, &mut ran, Step::Schema, schema_path.clone(), |out| {
        let discovery = discover_artifact(&ndjson)?;
        discovery.schema.save(out)?;
        Ok(discovery)
    })?;
    let schema = match discovered {
        Some(discovery) => {
            report.schema_records = Some(discovery.records);
            discovery.schema
        }
        None => Schema::load(&schema_path)?,
    };
    report.schema_fields = schema.len();

    report.tabular = run_step(config, &mut report, &mut ran, Step::Tabulate, config.tabular_path(), |out| {
        tabulate_artifact(&ndjson, &schema, out, tabular_options)
    })?;

    report.elapsed_ms = millis(started);
    report.save(config.report_path())?;
    info!(
        elapsed_ms = report.elapsed_ms,
        report = %config.report_path().display(),
        "job complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn job(dir: &Path) -> Result<JobConfig> {
        let shards = dir.join("shards");
        fs::create_dir_all(&shards)?;
        fs::write(shards.join("1.json"), r#"[{"a":1},{"a":2}]"#)?;
        fs::write(shards.join("2.jsonl"), "{\"b\":3}\n{\"b\":4}\n")?;
        Ok(JobConfig {
            input_dir: Some(shards),
            output_dir: dir.join("out"),
            ..JobConfig::default()
        })
    }

    #[test]
    fn runs_every_step_and_writes_report() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job(dir.path())?;
        let report = run_job(&config)?;

        assert_eq!(report.shards, 2);
        assert_eq!(report.merge.as_ref().map(|m| m.records), Some(4));
        assert_eq!(report.array_elements, Some(4));
        assert_eq!(report.schema_fields, 2);
        assert_eq!(report.tabular.map(|t| t.rows), Some(4));
        assert!(report.steps.iter().all(|s| s.ran));
        assert_eq!(fs::read_to_string(config.tabular_path())?, "a,b\n1,\n2,\n,3\n,4\n");

        let saved: JobReport = serde_json::from_str(&fs::read_to_string(config.report_path())?)?;
        assert_eq!(saved, report);
        Ok(())
    }

    #[test]
    fn existing_artifacts_are_kept_unless_overwriting() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = job(dir.path())?;
        run_job(&config)?;
        let first = fs::read(config.tabular_path())?;

        let rerun = run_job(&config)?;
        assert!(rerun.steps.iter().all(|s| !s.ran));
        assert_eq!(rerun.schema_fields, 2);
        assert!(rerun.merge.is_none());

        config.overwrite = true;
        let forced = run_job(&config)?;
        assert!(forced.steps.iter().all(|s| s.ran));
        assert_eq!(fs::read(config.tabular_path())?, first);
        Ok(())
    }

    #[test]
    fn rebuilt_merge_rebuilds_every_later_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job(dir.path())?;
        run_job(&config)?;

        let shards = dir.path().join("shards");
        fs::write(shards.join("3.jsonl"), "{\"c\":5}\n")?;
        fs::remove_file(config.ndjson_path())?;

        let rerun = run_job(&config)?;
        assert!(rerun.steps.iter().all(|s| s.ran));
        assert_eq!(rerun.merge.as_ref().map(|m| m.records), Some(5));
        assert_eq!(rerun.array_elements, Some(5));
        assert_eq!(rerun.schema_fields, 3);
        assert_eq!(
            fs::read_to_string(config.tabular_path())?,
            "a,b,c\n1,,\n2,,\n,3,\n,4,\n,,5\n"
        );
        let array: Vec<serde_json::Value> = serde_json::from_str(&fs::read_to_string(config.array_path())?)?;
        assert_eq!(array.len(), 5);
        Ok(())
    }

    #[test]
    fn later_steps_alone_are_rebuilt_when_their_artifact_is_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job(dir.path())?;
        run_job(&config)?;
        fs::remove_file(config.schema_path())?;

        let rerun = run_job(&config)?;
        let ran: Vec<bool> = rerun.steps.iter().map(|s| s.ran).collect();
        assert_eq!(ran, [false, false, true, true]);
        assert_eq!(rerun.tabular.map(|t| t.rows), Some(4));
        Ok(())
    }
}

use std::path::Path;
use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the external OCR pipeline reports after running on one PDF. The
/// pipeline's artifacts land in the output directory; this summary only
/// carries control data and distribution statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per input page: how many pages it was split into. The sum is the
    /// post-split page count persisted per project.
    #[serde(default)]
    pub page_split_counts: Vec<u32>,
}

impl PipelineSummary {
    pub fn post_split_page_count(&self) -> u32 {
        self.page_split_counts.iter().sum()
    }
}

/// The image-level OCR/layout pipeline, treated as a black box.
#[async_trait]
pub trait OcrPipeline: Send + Sync {
    async fn run(&self, pdf_path: &Path, output_dir: &Path) -> anyhow::Result<PipelineSummary>;
}

/// Runs the pipeline as an external command. The input PDF and output
/// directory are passed via environment variables; the command prints a
/// `PipelineSummary` JSON document on stdout.
#[derive(Debug, Clone)]
pub struct CommandOcrPipeline {
    program: String,
    args: Vec<String>,
}

impl CommandOcrPipeline {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let program = std::env::var("OCR_PIPELINE_COMMAND")
            .map_err(|_| anyhow::anyhow!("OCR_PIPELINE_COMMAND is not set"))?;
        if program.trim().is_empty() {
            anyhow::bail!("OCR_PIPELINE_COMMAND is empty");
        }
        let args = std::env::var("OCR_PIPELINE_ARGS")
            .map(|raw| {
                raw.split_whitespace()
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Self::new(program, args))
    }
}

#[async_trait]
impl OcrPipeline for CommandOcrPipeline {
    async fn run(&self, pdf_path: &Path, output_dir: &Path) -> anyhow::Result<PipelineSummary> {
        tracing::info!(
            command = %self.program,
            pdf = %pdf_path.display(),
            output_dir = %output_dir.display(),
            "invoking ocr pipeline"
        );

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env("OCR_PIPELINE_INPUT", pdf_path)
            .env("OCR_PIPELINE_OUTPUT_DIR", output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .with_context(|| format!("spawn ocr pipeline: {}", self.program))?;

        if !output.status.success() {
            anyhow::bail!("ocr pipeline failed: {} ({})", self.program, output.status);
        }

        let stdout =
            String::from_utf8(output.stdout).context("ocr pipeline stdout is not valid UTF-8")?;
        parse_summary(&stdout)
    }
}

/// The pipeline may log freely before the summary; only the last non-empty
/// stdout line is treated as the summary document.
fn parse_summary(stdout: &str) -> anyhow::Result<PipelineSummary> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow::anyhow!("ocr pipeline produced no summary on stdout"))?;
    serde_json::from_str(line).with_context(|| format!("parse ocr pipeline summary: {line}"))
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;

use crate::classifier::{self, ContractRiskBundle, ContractRiskEntry};
use crate::event::IngestEvent;
use crate::gemini::GeminiConfig;
use crate::harvest;
use crate::pipeline::{OcrPipeline, PipelineSummary};
use crate::splitter;
use crate::storage::ObjectStore;
use crate::structurer::{self, ErrorSink};
use crate::taxonomy::RiskRepository;

pub const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 3600;

/// Per-event processing result, acknowledged to the transport layer as-is.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub success: bool,
    pub output_files: Vec<String>,
    /// URI of the published contract JSON, when one was published.
    pub structured_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_result: Option<PipelineSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output_files: Vec::new(),
            structured_json: None,
            pipeline_result: None,
            error: Some(error.into()),
        }
    }
}

/// Sequences one event end to end. All collaborators are injected; nothing
/// here owns global state.
pub struct Orchestrator {
    pub store: Arc<dyn ObjectStore>,
    pub pipeline: Arc<dyn OcrPipeline>,
    pub repository: Arc<dyn RiskRepository>,
    pub gemini: GeminiConfig,
    /// Scratch space for downloads and the shared pipeline output directory.
    pub work_dir: PathBuf,
    /// Publication bucket; defaults to the event's bucket.
    pub output_bucket: Option<String>,
    pub pipeline_timeout: Duration,
}

impl Orchestrator {
    /// Processes one inbound event:
    /// download → invoke pipeline → harvest → structure → split →
    /// classify per logical contract → merge → publish → cleanup.
    ///
    /// Classification and page-count persistence are best-effort; structuring
    /// failure degrades to a stub document. Cleanup runs whether or not the
    /// stages succeeded.
    pub async fn process_single_pdf(&self, event: &IngestEvent) -> ProcessOutcome {
        // Scratch space is keyed down to the document basename, so events for
        // different documents never share a directory even when processed on
        // the same instance.
        let event_dir = self
            .work_dir
            .join(&event.workspace_id)
            .join(&event.project_id)
            .join(event.basename());
        let local_name = event
            .filename
            .rsplit('/')
            .next()
            .unwrap_or(event.filename.as_str());
        let local_pdf = event_dir.join(local_name);
        let output_dir = event_dir.join("output");

        let outcome = self.run_stages(event, &local_pdf, &output_dir).await;

        cleanup(&event_dir);

        match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    workspace_id = %event.workspace_id,
                    project_id = %event.project_id,
                    file = %event.filename,
                    err = format!("{err:#}"),
                    "event processing failed"
                );
                ProcessOutcome::failure(format!("{err:#}"))
            }
        }
    }

    async fn run_stages(
        &self,
        event: &IngestEvent,
        local_pdf: &Path,
        output_dir: &Path,
    ) -> anyhow::Result<ProcessOutcome> {
        let basename = event.basename();

        self.store
            .download(&event.bucket, &event.object_path, local_pdf)
            .await
            .with_context(|| format!("download gs://{}/{}", event.bucket, event.object_path))?;

        harvest::reset_output_dir(output_dir).context("reset pipeline output dir")?;

        let summary = match tokio::time::timeout(
            self.pipeline_timeout,
            self.pipeline.run(local_pdf, output_dir),
        )
        .await
        {
            Err(_) => anyhow::bail!(
                "ocr pipeline timed out after {}s",
                self.pipeline_timeout.as_secs()
            ),
            Ok(result) => result.context("run ocr pipeline")?,
        };
        if !summary.success {
            anyhow::bail!(
                "ocr pipeline reported failure: {}",
                summary.error.as_deref().unwrap_or("unknown error")
            );
        }

        let output_bucket = self.output_bucket.as_deref().unwrap_or(&event.bucket);

        let harvested = harvest::harvest(
            self.store.as_ref(),
            output_bucket,
            &event.workspace_id,
            &event.project_id,
            basename,
            output_dir,
        )
        .await
        .context("harvest pipeline artifacts")?;

        let Some(raw_text) = harvested.text.as_deref() else {
            tracing::error!(basename, "no consolidated text artifact; nothing to structure");
            return Ok(ProcessOutcome {
                success: false,
                output_files: harvested.uploaded,
                structured_json: None,
                pipeline_result: Some(summary),
                error: Some("no consolidated text artifact produced by the ocr pipeline".into()),
            });
        };

        let errors = ErrorSink {
            store: self.store.as_ref(),
            bucket: output_bucket,
            workspace_id: &event.workspace_id,
            project_id: &event.project_id,
        };
        let structured = structurer::structure(&self.gemini, &errors, raw_text, basename)
            .await
            .unwrap_or_else(|| {
                crate::contract::StructuredContract::stub(
                    basename,
                    "OCR処理が実行されなかったか、結果の取得に失敗しました",
                )
            });

        let contracts = splitter::split(&structured.result.articles);
        tracing::info!(
            basename,
            logical_contracts = contracts.len(),
            "split structured document"
        );

        let risks = self.classify_contracts(event, &structured, &contracts).await;

        self.persist_page_count(event, &summary).await;

        let mut artifact =
            serde_json::to_value(&structured).context("serialize structured contract")?;
        artifact["risks"] = serde_json::to_value(&risks).context("serialize risk bundle")?;

        let object = format!(
            "{}/{}/after_ocr/{basename}.json",
            event.workspace_id, event.project_id
        );
        let structured_json = self
            .store
            .upload_json(output_bucket, &object, &artifact)
            .await
            .with_context(|| format!("publish contract json: {object}"))?;
        tracing::info!(uri = %structured_json, "published contract json");

        Ok(ProcessOutcome {
            success: true,
            output_files: harvested.uploaded,
            structured_json: Some(structured_json),
            pipeline_result: Some(summary),
            error: None,
        })
    }

    /// Risk classification never blocks publication. A contract whose
    /// classification call degraded (timeout, transport or API failure) is
    /// dropped from the bundle; a wholly degraded stage, an empty taxonomy
    /// included, publishes an empty contracts list.
    async fn classify_contracts(
        &self,
        event: &IngestEvent,
        structured: &crate::contract::StructuredContract,
        contracts: &[splitter::LogicalContract],
    ) -> ContractRiskBundle {
        if contracts.is_empty() {
            return ContractRiskBundle::default();
        }

        let taxonomy = self
            .repository
            .load_risk_types(None, &event.risk_type_ids)
            .await;
        tracing::info!(
            risk_types = taxonomy.len(),
            custom = !event.risk_type_ids.is_empty(),
            "loaded risk taxonomy"
        );
        if taxonomy.is_empty() {
            return ContractRiskBundle::default();
        }

        let mut bundle = ContractRiskBundle::default();
        for (idx, contract) in contracts.iter().enumerate() {
            let target_company = contract
                .info
                .as_ref()
                .and_then(|info| info.first_party())
                .or_else(|| structured.info.first_party())
                .unwrap_or("")
                .to_owned();

            let Some(risks) = classifier::classify(
                &self.gemini,
                &contract.articles,
                &target_company,
                &taxonomy,
            )
            .await
            else {
                tracing::warn!(
                    contract_index = idx + 1,
                    "classification degraded; dropping contract from risk bundle"
                );
                continue;
            };

            bundle.contracts.push(ContractRiskEntry {
                contract_index: idx + 1,
                target_company,
                article_count: contract.articles.len(),
                risks,
            });
        }
        bundle
    }

    async fn persist_page_count(&self, event: &IngestEvent, summary: &PipelineSummary) {
        let page_count = summary.post_split_page_count();
        if page_count == 0 {
            return;
        }
        if let Err(err) = self
            .repository
            .record_page_count(&event.project_id, page_count)
            .await
        {
            tracing::warn!(
                project_id = %event.project_id,
                page_count,
                ?err,
                "recording page count failed; continuing"
            );
        }
    }
}

/// The container's filesystem outlives the event; the whole scratch
/// directory, downloaded PDF and consumed text artifacts included, is removed
/// no matter how processing ended.
fn cleanup(event_dir: &Path) {
    if event_dir.exists()
        && let Err(err) = std::fs::remove_dir_all(event_dir)
    {
        tracing::warn!(path = %event_dir.display(), ?err, "failed to remove event scratch dir");
    }
}

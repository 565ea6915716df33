use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::storage::ObjectStore;

/// Artifacts selected from the external pipeline's output directory.
#[derive(Debug, Default)]
pub struct HarvestedArtifacts {
    /// Contents of the consolidated text artifact, when one qualified.
    pub text: Option<String>,
    /// Local paths of all text artifacts; consumed, never uploaded, deleted
    /// during cleanup.
    pub text_paths: Vec<PathBuf>,
    /// URIs of the pass-through artifacts uploaded to `ocr_results/`.
    pub uploaded: Vec<String>,
}

/// The pipeline's output directory is shared across instance lifetimes;
/// clearing it before each run is what makes harvest results attributable to
/// the current event.
pub fn reset_output_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("clear pipeline output dir: {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create pipeline output dir: {}", dir.display()))?;
    Ok(())
}

/// Scans the pipeline output directory and sorts artifacts into structuring
/// input and pass-through uploads.
///
/// Filters: names not containing the PDF basename are dropped as stale
/// leftovers; `.txt` files are consumed locally; everything else, pipeline
/// metadata included, is uploaded verbatim under
/// `{workspace}/{project}/ocr_results/`. The consolidated text is the first
/// `.txt` (name order) whose name contains `integrated`;
/// `integration_metadata` files never qualify as structuring input.
pub async fn harvest(
    store: &dyn ObjectStore,
    bucket: &str,
    workspace_id: &str,
    project_id: &str,
    basename: &str,
    output_dir: &Path,
) -> anyhow::Result<HarvestedArtifacts> {
    let mut entries = std::fs::read_dir(output_dir)
        .with_context(|| format!("read pipeline output dir: {}", output_dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("list pipeline output dir: {}", output_dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    let mut harvested = HarvestedArtifacts::default();

    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();

        if !name.contains(basename) {
            tracing::warn!(file = %name, basename, "skipping stale artifact from another run");
            continue;
        }

        if name.ends_with(".txt") {
            if harvested.text.is_none() && is_consolidated_text(&name) {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("read text artifact: {}", path.display()))?;
                harvested.text = Some(contents);
            }
            harvested.text_paths.push(path);
            continue;
        }

        let object = format!("{workspace_id}/{project_id}/ocr_results/{name}");
        let uri = store
            .upload_file(bucket, &object, &path)
            .await
            .with_context(|| format!("upload artifact: {name}"))?;
        harvested.uploaded.push(uri);
    }

    Ok(harvested)
}

fn is_consolidated_text(name: &str) -> bool {
    name.contains("integrated") && !name.contains("integration_metadata")
}

use anyhow::Context as _;
use chrono::Utc;

use crate::contract::{StructuredContract, TERMINATION_CONTENT, TERMINATION_TITLE};
use crate::gemini::{self, GeminiConfig};
use crate::storage::ObjectStore;

/// Where diagnostic evidence goes when a model response fails schema
/// validation.
pub struct ErrorSink<'a> {
    pub store: &'a dyn ObjectStore,
    pub bucket: &'a str,
    pub workspace_id: &'a str,
    pub project_id: &'a str,
}

/// Converts raw OCR text into a schema-validated contract document.
///
/// Returns `None` when structuring failed; the caller substitutes the
/// deterministic stub document. One extra attempt is made on timeout, and
/// only on timeout.
pub async fn structure(
    config: &GeminiConfig,
    errors: &ErrorSink<'_>,
    raw_text: &str,
    basename: &str,
) -> Option<StructuredContract> {
    if raw_text.trim().is_empty() {
        tracing::warn!(basename, "ocr text is blank; skipping model call");
        return None;
    }

    let prompt = build_prompt(raw_text, basename);
    let schema = contract_schema();

    for attempt in 1..=2u32 {
        let call = tokio::time::timeout(
            config.timeout,
            gemini::generate_json(config, &prompt, &schema),
        )
        .await;

        let raw = match call {
            Err(_) => {
                tracing::warn!(
                    basename,
                    attempt,
                    timeout_secs = config.timeout.as_secs(),
                    "structuring call timed out"
                );
                continue;
            }
            Ok(Err(err)) => {
                tracing::error!(basename, attempt, ?err, "structuring call failed");
                return None;
            }
            Ok(Ok(raw)) => raw,
        };

        return match serde_json::from_str::<StructuredContract>(&raw) {
            Ok(contract) => {
                tracing::info!(
                    basename,
                    articles = contract.result.articles.len(),
                    "structured contract"
                );
                Some(contract)
            }
            Err(err) => {
                tracing::error!(basename, %err, "model output failed schema validation");
                if let Err(persist_err) = persist_evidence(errors, basename, &raw, &err).await {
                    tracing::warn!(basename, ?persist_err, "failed to persist error evidence");
                }
                None
            }
        };
    }

    None
}

async fn persist_evidence(
    errors: &ErrorSink<'_>,
    basename: &str,
    raw_response: &str,
    error: &serde_json::Error,
) -> anyhow::Result<()> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let object = format!(
        "{}/{}/err/{basename}_error_{timestamp}.json",
        errors.workspace_id, errors.project_id
    );
    let evidence = serde_json::json!({
        "basename": basename,
        "error": error.to_string(),
        "raw_response": raw_response,
        "timestamp": Utc::now().to_rfc3339(),
    });
    errors
        .store
        .upload_json(errors.bucket, &object, &evidence)
        .await
        .context("upload error evidence")?;
    Ok(())
}

fn build_prompt(raw_text: &str, basename: &str) -> String {
    format!(
        "以下のOCR処理済みテキストを解析し、契約書の構造化データとして抽出してください。\n\
\n\
ファイル名: {basename}\n\
\n\
テキスト内容:\n\
{raw_text}\n\
\n\
抽出指示:\n\
1. success: 常にtrue\n\
2. info部分:\n\
   - title: 契約書のタイトル（見つからない場合はファイル名を使用）\n\
   - party: 契約当事者をカンマ区切りで記載（例: \"株式会社A,株式会社B\"）\n\
   - start_date: 契約開始日（YYYY-MM-DD形式、見つからない場合は空文字列）\n\
   - end_date: 契約終了日（YYYY-MM-DD形式、見つからない場合は空文字列）\n\
   - conclusion_date: 契約締結日（YYYY-MM-DD形式、見つからない場合は空文字列）\n\
3. result部分:\n\
   - articles: 契約条項の配列（全ての条項を漏れなく抽出）\n\
     - article_number: 条項番号（例: \"第1条\"、番号がない場合は\"署名欄\"等）\n\
     - title: 条項のタイトル（見出しがない場合は内容から要約）\n\
     - content: 条項の完全な内容（省略禁止）\n\
     - table_number: 表がある場合のみ表番号\n\
\n\
重要な注意事項:\n\
- テキスト内の全ての条項を必ず抽出してください（第1条から最後まで）\n\
- 各条項のcontentは完全にコピーし、省略や要約は行わないでください\n\
- 条項番号が明記されていない部分（前文、署名欄、付記等）も独立した条項として扱ってください\n\
- 署名欄も必ず1つの条項として扱ってください\n\
- 日付は可能な限りYYYY-MM-DD形式に変換してください\n\
- 表や図がある場合はHTML形式でcontentに含めてください\n\
\n\
複数契約書の扱い:\n\
- 1つのドキュメントに独立した契約書が複数含まれる場合、契約書の区切りごとにtitleを\"{TERMINATION_TITLE}\"、contentを\"{TERMINATION_CONTENT}\"とした条項を挿入してください\n\
- その直後に、次の契約書のtitle・party・start_date・end_date・conclusion_dateを持つ（article_numberとcontentを持たない）info要素を挿入してください\n\
- 別紙・付属書・約款・覚書内の見出しなど、文書内部の区切りは契約書の区切りとして扱わないでください\n\
- 出力は必ず完全なJSON形式で、途中で切れることなく最後まで出力してください\n"
    )
}

/// Contract schema for constrained decoding. Article items double as marker
/// shapes, so only `title` is required per item.
fn contract_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "success": { "type": "boolean" },
            "info": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "party": { "type": "string" },
                    "start_date": { "type": "string" },
                    "end_date": { "type": "string" },
                    "conclusion_date": { "type": "string" },
                },
                "required": ["title", "party"],
            },
            "result": {
                "type": "object",
                "properties": {
                    "articles": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "article_number": { "type": "string" },
                                "title": { "type": "string" },
                                "content": { "type": "string" },
                                "table_number": { "type": "string" },
                                "party": { "type": "string" },
                                "start_date": { "type": "string" },
                                "end_date": { "type": "string" },
                                "conclusion_date": { "type": "string" },
                            },
                            "required": ["title"],
                        },
                    },
                },
                "required": ["articles"],
            },
        },
        "required": ["success", "info", "result"],
    })
}

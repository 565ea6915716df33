use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::contract::Article;
use crate::gemini::{self, GeminiConfig};
use crate::taxonomy::RiskType;

pub const RISK_FUNCTION_NAME: &str = "record_contract_risks";

/// One risk finding. Ids are caller-generated at emission time, never taken
/// from the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskClassification {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub risk_type: i64,
    pub reason: String,
    /// `-1` when the page is unknown.
    pub page_number: i64,
    #[serde(default)]
    pub article_info: String,
    #[serde(default)]
    pub article_title: String,
    #[serde(default)]
    pub article_overview: String,
    #[serde(default)]
    pub specific_clause: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractRiskBundle {
    pub contracts: Vec<ContractRiskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRiskEntry {
    pub contract_index: usize,
    pub target_company: String,
    pub article_count: usize,
    pub risks: Vec<RiskClassification>,
}

/// Classifies one logical contract's clauses against the loaded taxonomy.
///
/// Returns `None` when the call degraded (empty taxonomy, timeout, transport
/// or API failure); the caller drops the contract from the published risk
/// bundle. A response without a function call is a successful zero-findings
/// outcome, `Some(vec![])`.
pub async fn classify(
    config: &GeminiConfig,
    articles: &[Article],
    target_company: &str,
    taxonomy: &[RiskType],
) -> Option<Vec<RiskClassification>> {
    if taxonomy.is_empty() {
        tracing::info!("risk taxonomy is empty; skipping classification");
        return None;
    }
    if articles.is_empty() {
        return Some(Vec::new());
    }

    let prompt = build_prompt(articles, target_company, taxonomy);
    let declaration = function_declaration(taxonomy);

    let call = tokio::time::timeout(
        config.timeout,
        gemini::generate_function_call(config, &prompt, &declaration, RISK_FUNCTION_NAME),
    )
    .await;

    let args = match call {
        Err(_) => {
            tracing::warn!(
                timeout_secs = config.timeout.as_secs(),
                "risk classification timed out; publishing without findings"
            );
            return None;
        }
        Ok(Err(err)) => {
            tracing::warn!(?err, "risk classification call failed; publishing without findings");
            return None;
        }
        Ok(Ok(None)) => return Some(Vec::new()),
        Ok(Ok(Some(args))) => args,
    };

    Some(parse_findings(&args, taxonomy))
}

fn build_prompt(articles: &[Article], target_company: &str, taxonomy: &[RiskType]) -> String {
    let clauses = articles
        .iter()
        .map(|a| {
            let number = a.article_number.as_deref().unwrap_or("");
            format!("{number} {}\n{}", a.title, a.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let categories = taxonomy
        .iter()
        .map(|t| format!("{}. {}: {}", t.id, t.title, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "あなたは「{target_company}」の顧問弁護士として、以下の契約書を\
{target_company}の立場からレビューしてください。\n\
\n\
リスク分類（typeにはこの一覧のidのみを使用すること）:\n\
{categories}\n\
\n\
契約条項:\n\
{clauses}\n\
\n\
指示:\n\
- {target_company}にとって不利益となり得る条項のみを、{RISK_FUNCTION_NAME}の呼び出しとして報告してください。\n\
- 根拠が不十分な場合、責任を負う当事者が条文から特定できない場合、またはリスク判断に確信が持てない場合は、その条項を報告しないでください。見落としより誤検出の方が有害です。\n\
- リスクが一件もない場合は、空のrisks配列で関数を呼び出してください。\n\
- pageNumberが特定できない場合は-1としてください。\n"
    )
}

/// Single callable tool whose `type` parameter enumerates exactly the loaded
/// taxonomy ids, so every finding references a real risk type.
fn function_declaration(taxonomy: &[RiskType]) -> serde_json::Value {
    let type_ids = taxonomy
        .iter()
        .map(|t| t.id.to_string())
        .collect::<Vec<_>>();

    serde_json::json!({
        "name": RISK_FUNCTION_NAME,
        "description": "契約書から検出したリスク条項の一覧を報告する",
        "parameters": {
            "type": "object",
            "properties": {
                "risks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": { "type": "string", "description": "リスクを含む条文の該当箇所（原文）" },
                            "type": { "type": "string", "enum": type_ids, "description": "リスク分類のid" },
                            "reason": { "type": "string", "description": "リスクと判断した理由" },
                            "pageNumber": { "type": "integer", "description": "該当ページ番号。不明なら-1" },
                            "articleInfo": { "type": "string" },
                            "articleTitle": { "type": "string" },
                            "articleOverview": { "type": "string" },
                            "specificClause": { "type": "string" },
                        },
                        "required": ["text", "type", "reason", "pageNumber"],
                    },
                },
            },
            "required": ["risks"],
        },
    })
}

fn parse_findings(args: &serde_json::Value, taxonomy: &[RiskType]) -> Vec<RiskClassification> {
    let admissible = taxonomy.iter().map(|t| t.id).collect::<HashSet<_>>();

    let Some(raw_risks) = args.get("risks").and_then(|v| v.as_array()) else {
        tracing::warn!("function call args carry no risks array");
        return Vec::new();
    };

    let mut findings = Vec::new();
    for raw in raw_risks {
        let Some(risk_type) = parse_risk_type(raw.get("type")) else {
            tracing::warn!(value = ?raw.get("type"), "dropping finding with unparsable type");
            continue;
        };
        if !admissible.contains(&risk_type) {
            tracing::warn!(risk_type, "dropping finding outside the loaded taxonomy");
            continue;
        }

        let text = raw.get("text").and_then(|v| v.as_str()).unwrap_or("");
        let reason = raw.get("reason").and_then(|v| v.as_str()).unwrap_or("");
        if text.is_empty() || reason.is_empty() {
            tracing::warn!("dropping finding without text or reason");
            continue;
        }

        let string_field = |key: &str| {
            raw.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_owned()
        };

        findings.push(RiskClassification {
            id: generate_finding_id(),
            text: text.to_owned(),
            risk_type,
            reason: reason.to_owned(),
            page_number: raw
                .get("pageNumber")
                .and_then(|v| v.as_i64())
                .unwrap_or(-1),
            article_info: string_field("articleInfo"),
            article_title: string_field("articleTitle"),
            article_overview: string_field("articleOverview"),
            specific_clause: string_field("specificClause"),
        });
    }

    findings
}

fn parse_risk_type(value: Option<&serde_json::Value>) -> Option<i64> {
    let value = value?;
    if let Some(id) = value.as_i64() {
        return Some(id);
    }
    value.as_str()?.trim().parse::<i64>().ok()
}

/// Time-based id with a random suffix; uniqueness never depends on the model.
fn generate_finding_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("risk_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

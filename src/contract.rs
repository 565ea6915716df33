use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Sentinel article title that closes one logical contract inside a
/// multi-contract document.
pub const TERMINATION_TITLE: &str = "契約書終了";

/// Fixed placeholder content carried by a termination marker.
pub const TERMINATION_CONTENT: &str = "（契約書区切り）";

/// Schema-validated representation of one structured document.
///
/// `info` always describes the first logical contract; subsequent logical
/// contracts are carried inline inside `result.articles` as termination
/// markers followed by their own info blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredContract {
    pub success: bool,
    pub info: ContractInfo,
    pub result: ContractBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StructuredContract {
    /// Deterministic fallback document published when structuring fails.
    pub fn stub(basename: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            info: ContractInfo {
                title: basename.to_owned(),
                ..ContractInfo::default()
            },
            result: ContractBody { articles: Vec::new() },
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    #[serde(default)]
    pub title: String,
    /// Comma-joined party names, e.g. `"株式会社A,株式会社B"`.
    #[serde(default)]
    pub party: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub conclusion_date: String,
}

impl ContractInfo {
    /// First comma-separated party name, used as the default review
    /// perspective for risk classification.
    pub fn first_party(&self) -> Option<&str> {
        self.party
            .split(',')
            .map(str::trim)
            .find(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractBody {
    #[serde(default)]
    pub articles: Vec<ArticleNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// `"第1条"`, `"署名欄"` and similar; absent for preamble-style blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_number: Option<String>,
    pub title: String,
    /// Verbatim source text; never summarized.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_number: Option<String>,
}

/// One element of a structured article list.
///
/// The model emits all three shapes inside the same `articles` array; they are
/// told apart exactly once, here, instead of branching on key presence
/// throughout the splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleNode {
    Article(Article),
    /// Opens the next logical contract; carries its info block.
    Info(ContractInfo),
    /// Closes the current logical contract.
    Termination,
}

impl ArticleNode {
    pub fn from_value(value: &serde_json::Value) -> anyhow::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("article entry is not a JSON object"))?;

        let title = obj.get("title").and_then(|v| v.as_str()).unwrap_or("");
        if title == TERMINATION_TITLE {
            return Ok(Self::Termination);
        }

        let has_article_number = obj
            .get("article_number")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty());
        let has_party = obj
            .get("party")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty());

        if !has_article_number && has_party && !obj.contains_key("content") {
            let info: ContractInfo = serde_json::from_value(value.clone())
                .map_err(|err| anyhow::anyhow!("parse contract info marker: {err}"))?;
            return Ok(Self::Info(info));
        }

        let article: Article = serde_json::from_value(value.clone())
            .map_err(|err| anyhow::anyhow!("parse article: {err}"))?;
        Ok(Self::Article(article))
    }
}

impl Serialize for ArticleNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Article(article) => article.serialize(serializer),
            Self::Info(info) => info.serialize(serializer),
            Self::Termination => Article {
                article_number: None,
                title: TERMINATION_TITLE.to_owned(),
                content: TERMINATION_CONTENT.to_owned(),
                table_number: None,
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ArticleNode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_with_article_number_parses_as_article() -> anyhow::Result<()> {
        let value = serde_json::json!({
            "article_number": "第1条",
            "title": "目的",
            "content": "本契約は……"
        });

        let node = ArticleNode::from_value(&value)?;
        let ArticleNode::Article(article) = node else {
            anyhow::bail!("expected article, got {node:?}");
        };
        assert_eq!(article.article_number.as_deref(), Some("第1条"));
        assert_eq!(article.content, "本契約は……");
        Ok(())
    }

    #[test]
    fn termination_title_parses_as_termination_marker() -> anyhow::Result<()> {
        let value = serde_json::json!({
            "title": TERMINATION_TITLE,
            "content": TERMINATION_CONTENT
        });
        assert_eq!(ArticleNode::from_value(&value)?, ArticleNode::Termination);
        Ok(())
    }

    #[test]
    fn info_block_without_article_number_parses_as_info_marker() -> anyhow::Result<()> {
        let value = serde_json::json!({
            "title": "業務委託契約書",
            "party": "株式会社A,株式会社B",
            "start_date": "2024-04-01",
            "end_date": "",
            "conclusion_date": "2024-03-15"
        });

        let node = ArticleNode::from_value(&value)?;
        let ArticleNode::Info(info) = node else {
            anyhow::bail!("expected info marker, got {node:?}");
        };
        assert_eq!(info.party, "株式会社A,株式会社B");
        assert_eq!(info.start_date, "2024-04-01");
        Ok(())
    }

    #[test]
    fn signature_block_without_number_stays_an_article() -> anyhow::Result<()> {
        let value = serde_json::json!({
            "title": "署名欄",
            "content": "甲 株式会社A 代表取締役 ……"
        });

        let node = ArticleNode::from_value(&value)?;
        assert!(matches!(node, ArticleNode::Article(_)));
        Ok(())
    }

    #[test]
    fn termination_marker_round_trips_through_wire_shape() -> anyhow::Result<()> {
        let json = serde_json::to_value(ArticleNode::Termination)?;
        assert_eq!(json["title"], TERMINATION_TITLE);
        assert_eq!(json["content"], TERMINATION_CONTENT);

        let back: ArticleNode = serde_json::from_value(json)?;
        assert_eq!(back, ArticleNode::Termination);
        Ok(())
    }

    #[test]
    fn stub_document_has_basename_title_and_no_articles() {
        let stub = StructuredContract::stub("agreement_2024", "structuring failed");
        assert!(!stub.success);
        assert_eq!(stub.info.title, "agreement_2024");
        assert!(stub.result.articles.is_empty());
        assert_eq!(stub.error.as_deref(), Some("structuring failed"));
    }

    #[test]
    fn first_party_skips_blank_segments() {
        let info = ContractInfo {
            party: " , 株式会社A ,株式会社B".to_owned(),
            ..ContractInfo::default()
        };
        assert_eq!(info.first_party(), Some("株式会社A"));
    }
}

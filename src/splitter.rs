use crate::contract::{Article, ArticleNode, ContractInfo};

/// One self-contained agreement within a possibly multi-agreement document.
///
/// `info` is `None` for the first logical contract, whose info block lives at
/// the document level rather than inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalContract {
    pub info: Option<ContractInfo>,
    pub articles: Vec<Article>,
}

/// Partitions an article sequence into logical contracts.
///
/// A termination marker closes the open contract; an info marker sets the
/// info block for the contract that follows it. Neither marker is kept in any
/// article buffer. A trailing non-empty buffer is emitted even without an
/// explicit terminator. Order is preserved and nothing is de-duplicated.
pub fn split(nodes: &[ArticleNode]) -> Vec<LogicalContract> {
    let mut contracts = Vec::new();
    let mut buffer: Vec<Article> = Vec::new();
    let mut pending_info: Option<ContractInfo> = None;

    for node in nodes {
        match node {
            ArticleNode::Article(article) => buffer.push(article.clone()),
            ArticleNode::Info(info) => pending_info = Some(info.clone()),
            ArticleNode::Termination => {
                contracts.push(LogicalContract {
                    info: pending_info.take(),
                    articles: std::mem::take(&mut buffer),
                });
            }
        }
    }

    if !buffer.is_empty() {
        contracts.push(LogicalContract {
            info: pending_info,
            articles: buffer,
        });
    }

    contracts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(number: &str, title: &str) -> ArticleNode {
        ArticleNode::Article(Article {
            article_number: Some(number.to_owned()),
            title: title.to_owned(),
            content: format!("{title}の内容"),
            table_number: None,
        })
    }

    fn info(title: &str, party: &str) -> ArticleNode {
        ArticleNode::Info(ContractInfo {
            title: title.to_owned(),
            party: party.to_owned(),
            ..ContractInfo::default()
        })
    }

    #[test]
    fn single_contract_without_terminator_is_one_contract() {
        let nodes = vec![article("第1条", "目的"), article("第2条", "定義")];
        let contracts = split(&nodes);

        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].info, None);
        assert_eq!(contracts[0].articles.len(), 2);
    }

    #[test]
    fn two_clauses_marker_info_one_clause_yields_two_contracts() {
        let nodes = vec![
            article("第1条", "目的"),
            article("第2条", "定義"),
            ArticleNode::Termination,
            info("覚書", "株式会社A,株式会社C"),
            article("第1条", "追加条項"),
        ];

        let contracts = split(&nodes);
        assert_eq!(contracts.len(), 2);

        assert_eq!(contracts[0].info, None);
        assert_eq!(contracts[0].articles.len(), 2);

        let second_info = contracts[1].info.as_ref().unwrap();
        assert_eq!(second_info.title, "覚書");
        assert_eq!(second_info.party, "株式会社A,株式会社C");
        assert_eq!(contracts[1].articles.len(), 1);
        assert_eq!(contracts[1].articles[0].title, "追加条項");
    }

    #[test]
    fn k_terminators_with_trailing_articles_yield_k_plus_one_contracts() {
        let nodes = vec![
            article("第1条", "a"),
            ArticleNode::Termination,
            article("第1条", "b"),
            ArticleNode::Termination,
            article("第1条", "c"),
        ];

        let contracts = split(&nodes);
        assert_eq!(contracts.len(), 3);
        for contract in &contracts {
            assert_eq!(contract.articles.len(), 1);
        }
    }

    #[test]
    fn concatenated_articles_equal_input_minus_markers_in_order() {
        let nodes = vec![
            article("第1条", "a"),
            article("第2条", "b"),
            ArticleNode::Termination,
            info("第二契約", "甲,乙"),
            article("第1条", "c"),
            article("第2条", "d"),
        ];

        let contracts = split(&nodes);
        let flattened = contracts
            .iter()
            .flat_map(|c| c.articles.iter())
            .map(|a| a.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(flattened, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn trailing_terminator_does_not_emit_an_empty_contract() {
        let nodes = vec![article("第1条", "a"), ArticleNode::Termination];
        let contracts = split(&nodes);
        assert_eq!(contracts.len(), 1);
    }

    #[test]
    fn empty_input_yields_no_contracts() {
        assert!(split(&[]).is_empty());
    }

    #[test]
    fn info_marker_replaces_earlier_pending_info() {
        let nodes = vec![
            article("第1条", "a"),
            ArticleNode::Termination,
            info("旧タイトル", "甲"),
            info("新タイトル", "甲,乙"),
            article("第1条", "b"),
        ];

        let contracts = split(&nodes);
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts[1].info.as_ref().unwrap().title, "新タイトル");
    }
}

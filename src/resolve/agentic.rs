//! Agentic searcher: an LLM crafts repository queries.
//!
//! The most expensive stage of the chain. The model proposes a handful of
//! lexical queries, the searcher executes them against the entity
//! repository, and the model then chooses among the numbered findings or
//! declines. Both calls degrade gracefully: any failure yields an empty
//! outcome and the chain falls through to the arbiter.

use super::searchers::{EntitySearcher, SearchOutcome};
use crate::Result;
use crate::llm::{LlmClient, parse_json_response};
use crate::models::{DataDictionary, NamedEntity, SuggestedEntity};
use crate::storage::EntityRepository;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

const QUERY_SYSTEM_PROMPT: &str = r#"<role>
You search a knowledge base for an entity mentioned in a conversation.
</role>

<task>
Propose up to three short lexical search queries likely to find the
entity. Vary the angle: full name, distinctive name parts, descriptive
phrases.
</task>

<output>
Respond with JSON only:
{"queries": ["...", "..."]}
</output>"#;

const CHOICE_SYSTEM_PROMPT: &str = r#"<role>
You decide whether any of the numbered search results is the entity
mentioned in a conversation.
</role>

<rules>
- Choose only on a clear referential match, not surface similarity.
- When unsure, decline.
</rules>

<output>
Respond with JSON only:
{"choice": <result index or null>}
</output>"#;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceResponse {
    choice: Option<usize>,
}

/// Optional final stage of the escalation chain.
pub struct AgenticSearcher {
    llm: Arc<dyn LlmClient>,
    repository: Arc<dyn EntityRepository>,
    max_queries: usize,
    per_query_limit: usize,
}

impl AgenticSearcher {
    /// Creates the searcher.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, repository: Arc<dyn EntityRepository>) -> Self {
        Self {
            llm,
            repository,
            max_queries: 3,
            per_query_limit: 5,
        }
    }

    fn run_queries(&self, queries: &[String]) -> Vec<NamedEntity> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for query in queries.iter().take(self.max_queries) {
            match self.repository.text_search(query, None, self.per_query_limit) {
                Ok(entities) => {
                    for entity in entities {
                        if seen.insert(entity.id.clone()) {
                            found.push(entity);
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "Agentic query failed, skipping");
                },
            }
        }
        found
    }
}

impl EntitySearcher for AgenticSearcher {
    fn name(&self) -> &'static str {
        "agentic"
    }

    fn search(
        &self,
        suggested: &SuggestedEntity,
        _dictionary: &DataDictionary,
    ) -> Result<SearchOutcome> {
        let mut request = format!("Mention: {}\n", suggested.name);
        if !suggested.labels.is_empty() {
            request.push_str(&format!("Labels: {}\n", suggested.labels.join(", ")));
        }
        if let Some(summary) = &suggested.summary {
            request.push_str(&format!("Summary: {summary}\n"));
        }

        let response = self.llm.complete_with_system(QUERY_SYSTEM_PROMPT, &request)?;
        let parsed: QueryResponse = parse_json_response("agentic_queries", &response)?;
        let found = self.run_queries(&parsed.queries);
        if found.is_empty() {
            return Ok(SearchOutcome::none());
        }

        let mut choice_request = request;
        choice_request.push_str("\nSearch results:\n");
        for (index, entity) in found.iter().enumerate() {
            choice_request.push_str(&format!(
                "{index}. {} [{}]\n",
                entity.name,
                entity.labels.join(", ")
            ));
        }
        let response = self
            .llm
            .complete_with_system(CHOICE_SYSTEM_PROMPT, &choice_request)?;
        let parsed: ChoiceResponse = parse_json_response("agentic_choice", &response)?;

        match parsed.choice {
            Some(index) if index < found.len() => {
                Ok(SearchOutcome::confident(found[index].clone()))
            },
            Some(index) => {
                tracing::warn!(
                    index = index,
                    offered = found.len(),
                    "Agentic searcher returned an out-of-range index, ignoring"
                );
                metrics::counter!("resolver_agentic_invalid_index_total").increment(1);
                Ok(SearchOutcome::with_candidates(found))
            },
            None => Ok(SearchOutcome::with_candidates(found)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::embedding::HashEmbedder;
    use crate::models::EntityId;
    use crate::storage::MemoryEntityRepository;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedClient {
        fn with(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(ToString::to_string).collect()),
            })
        }
    }

    impl LlmClient for ScriptedClient {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Llm {
                    operation: "complete".to_string(),
                    cause: "no scripted response".to_string(),
                })
        }
    }

    fn repository() -> Arc<MemoryEntityRepository> {
        let repo = MemoryEntityRepository::new(Arc::new(HashEmbedder::new()));
        repo.add(NamedEntity::new(
            "E1",
            "Johannes Brahms",
            vec!["Composer".to_string()],
        ));
        Arc::new(repo)
    }

    #[test]
    fn test_agentic_resolves_via_crafted_query() {
        let llm = ScriptedClient::with(&[
            r#"{"queries": ["Johannes Brahms", "Brahms composer"]}"#,
            r#"{"choice": 0}"#,
        ]);
        let searcher = AgenticSearcher::new(llm, repository());
        let suggested = SuggestedEntity::new("the composer Brahms", vec![]);
        let outcome = searcher
            .search(&suggested, &DataDictionary::new())
            .unwrap();
        assert_eq!(outcome.confident.unwrap().id, EntityId::new("E1"));
    }

    #[test]
    fn test_agentic_decline_keeps_candidates() {
        let llm = ScriptedClient::with(&[
            r#"{"queries": ["Brahms"]}"#,
            r#"{"choice": null}"#,
        ]);
        let searcher = AgenticSearcher::new(llm, repository());
        let suggested = SuggestedEntity::new("Brahms", vec![]);
        let outcome = searcher
            .search(&suggested, &DataDictionary::new())
            .unwrap();
        assert!(outcome.confident.is_none());
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn test_agentic_no_results_is_empty() {
        let llm = ScriptedClient::with(&[r#"{"queries": ["unknown person"]}"#]);
        let searcher = AgenticSearcher::new(llm, repository());
        let suggested = SuggestedEntity::new("Nobody Particular", vec![]);
        let outcome = searcher
            .search(&suggested, &DataDictionary::new())
            .unwrap();
        assert!(outcome.confident.is_none());
        assert!(outcome.candidates.is_empty());
    }
}

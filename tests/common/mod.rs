//! Shared fixtures for integration tests.

// Each integration test binary uses a different subset of these helpers.
#![allow(dead_code)]

use dice::embedding::Embedder;
use dice::llm::LlmClient;
use dice::models::{
    ContextId, EntityId, Mention, MentionRole, Proposition, PropositionId,
};
use dice::{Error, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// LLM client that replays scripted responses in order and records every
/// request it received.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(ToString::to_string).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client whose every call fails, for degradation tests.
    pub fn failing() -> Self {
        Self::new(&[])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

impl LlmClient for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(prompt.to_string());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| Error::Llm {
                operation: "complete".to_string(),
                cause: "no scripted response left".to_string(),
            })
    }
}

/// LLM client that panics when called. Proves a path never reaches the
/// model.
pub struct UnreachableLlm;

impl LlmClient for UnreachableLlm {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        panic!("LLM was called unexpectedly with: {prompt}");
    }
}

/// Embedder with per-text vector overrides and a deterministic hash
/// fallback, so tests can pin exact similarities between chosen texts.
pub struct KeyedEmbedder {
    overrides: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

impl KeyedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            overrides: HashMap::new(),
            dimensions,
        }
    }

    #[must_use]
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimensions, "override dimension mismatch");
        self.overrides.insert(text.to_string(), vector);
        self
    }
}

impl Embedder for KeyedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.overrides.get(text) {
            return Ok(vector.clone());
        }
        // Deterministic fallback: digest bytes spread over the dimensions.
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| f32::from(digest[i % digest.len()]) - 128.0)
            .collect();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

/// A level-0 proposition with one resolved subject mention.
pub fn proposition_about(
    context: &str,
    id: &str,
    entity: &str,
    text: &str,
) -> Proposition {
    let mut p = Proposition::new(ContextId::new(context), text, Utc::now());
    p.id = PropositionId::new(id);
    p.mentions = vec![
        Mention::new(MentionRole::Subject, entity, vec!["Person".to_string()])
            .with_entity_id(EntityId::new(format!("E-{entity}"))),
    ];
    p
}

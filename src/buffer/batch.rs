use crate::app::ConfigError;
use crate::domain::Envelope;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ordered group of envelopes transmitted (and stored) as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    id: String,
    envelopes: Vec<Envelope>,
}

impl Batch {
    pub fn new(envelopes: Vec<Envelope>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            envelopes,
        }
    }

    pub fn with_id(id: String, envelopes: Vec<Envelope>) -> Self {
        Self { id, envelopes }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.envelopes.len()
    }

    pub fn envelopes(&self) -> &[Envelope] {
        &self.envelopes
    }

    pub fn envelopes_mut(&mut self) -> &mut Vec<Envelope> {
        &mut self.envelopes
    }

    pub fn into_envelopes(self) -> Vec<Envelope> {
        self.envelopes
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

/// Slices envelopes into consecutive batches of at most `max_size`.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    max_size: usize,
}

impl Batcher {
    pub fn new(max_size: usize) -> Result<Self, ConfigError> {
        if max_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self { max_size })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Produces `ceil(n / max_size)` batches in input order; every batch is
    /// full except possibly the last.
    pub fn batches(&self, envelopes: Vec<Envelope>) -> Vec<Batch> {
        let mut batches = Vec::with_capacity(envelopes.len().div_ceil(self.max_size));
        let mut iter = envelopes.into_iter().peekable();

        while iter.peek().is_some() {
            let chunk: Vec<Envelope> = iter.by_ref().take(self.max_size).collect();
            batches.push(Batch::new(chunk));
        }

        batches
    }
}

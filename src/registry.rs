use crate::model::{Concept, ConceptKey, Taxonomy};
use ahash::AHashMap;

/// The concept set of one import: taxonomy definitions first, fact-derived
/// stubs for whatever the taxonomy does not define.
#[derive(Debug, Clone, Default)]
pub struct ConceptRegistry {
    concepts: AHashMap<ConceptKey, Concept>,
}

impl ConceptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_taxonomy(taxonomy: &Taxonomy) -> Self {
        Self {
            concepts: taxonomy.concepts.clone(),
        }
    }

    /// Register a stub unless the key is already known. Returns whether it
    /// was added.
    pub fn add_stub(&mut self, stub: Concept) -> bool {
        if self.concepts.contains_key(&stub.key) {
            return false;
        }
        self.concepts.insert(stub.key.clone(), stub);
        true
    }

    pub fn add_stubs<I: IntoIterator<Item = Concept>>(&mut self, stubs: I) -> usize {
        let mut added = 0;
        for stub in stubs {
            if self.add_stub(stub) {
                added += 1;
            }
        }
        added
    }

    /// Fold a definition in; existing values are only backfilled.
    pub fn merge(&mut self, concept: Concept) {
        match self.concepts.get_mut(&concept.key) {
            Some(existing) => existing.merge(concept),
            None => {
                self.concepts.insert(concept.key.clone(), concept);
            }
        }
    }

    pub fn get(&self, key: &ConceptKey) -> Option<&Concept> {
        self.concepts.get(key)
    }

    /// All concepts ordered by (namespace, local name)
    pub fn concepts(&self) -> Vec<&Concept> {
        let mut concepts: Vec<&Concept> = self.concepts.values().collect();
        concepts.sort_by(|a, b| a.key.cmp(&b.key));
        concepts
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

/// Durable row ids of persisted concepts, for linking facts to concepts
#[derive(Debug, Clone, Default)]
pub struct ConceptIdMap {
    ids: AHashMap<ConceptKey, i64>,
}

impl ConceptIdMap {
    pub fn insert(&mut self, key: ConceptKey, id: i64) {
        self.ids.insert(key, id);
    }

    pub fn get(&self, key: &ConceptKey) -> Option<i64> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

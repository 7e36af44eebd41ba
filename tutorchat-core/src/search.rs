// ABOUTME: Reactive search over the message log, filtered by query text and allowed kinds.
// ABOUTME: A derived view: results are cached per store revision and never mutate the store.

use crate::message::{ChatMessage, ContentKind};
use crate::store::MessageStore;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub query: String,
    pub kinds: HashSet<ContentKind>,
}

impl SearchFilter {
    /// Match `query` across every kind
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            kinds: ContentKind::ALL.iter().copied().collect(),
        }
    }

    pub fn with_kinds(mut self, kinds: &[ContentKind]) -> Self {
        self.kinds = kinds.iter().copied().collect();
        self
    }

    /// Case-insensitive substring match on content, restricted to allowed kinds
    pub fn matches(&self, message: &ChatMessage) -> bool {
        let needle = self.query.trim().to_lowercase();
        !needle.is_empty()
            && self.kinds.contains(&message.kind)
            && message.content.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Default)]
pub struct SearchIndex {
    filter: Option<SearchFilter>,
    /// Store revision and matching positions from the last computation
    cache: Option<(u64, Vec<usize>)>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.filter.is_some()
    }

    pub fn filter(&self) -> Option<&SearchFilter> {
        self.filter.as_ref()
    }

    pub fn set_filter(&mut self, filter: SearchFilter) {
        if self.filter.as_ref() != Some(&filter) {
            self.filter = Some(filter);
            self.cache = None;
        }
    }

    /// Update just the query, keeping the kind set
    pub fn set_query(&mut self, query: impl Into<String>) {
        let filter = match self.filter.take() {
            Some(mut filter) => {
                filter.query = query.into();
                filter
            }
            None => SearchFilter::new(query),
        };
        self.filter = Some(filter);
        self.cache = None;
    }

    /// Close search; the unfiltered log becomes the view again
    pub fn close(&mut self) {
        self.filter = None;
        self.cache = None;
    }

    /// Messages matching the current filter, in log order.
    /// Empty when search is closed or the query is blank.
    pub fn results<'s>(&mut self, store: &'s MessageStore) -> Vec<&'s ChatMessage> {
        let Some(filter) = &self.filter else {
            return Vec::new();
        };

        let stale = !matches!(&self.cache, Some((revision, _)) if *revision == store.revision());
        if stale {
            let positions = store
                .iter()
                .enumerate()
                .filter(|(_, m)| filter.matches(m))
                .map(|(i, _)| i)
                .collect();
            self.cache = Some((store.revision(), positions));
        }

        match &self.cache {
            Some((_, positions)) => positions.iter().filter_map(|&i| store.at(i)).collect(),
            None => Vec::new(),
        }
    }
}

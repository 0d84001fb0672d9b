//! Candidate registry: the known universe of upcoming and recent listings.
//!
//! Leaf component: no dependencies besides the domain types. Every other
//! component reads candidates from here and reports terminal outcomes back
//! through the `mark_*` methods.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Candidate, CandidateStatus};
use crate::feed::{FeedError, RawScoreRecord};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("duplicate candidate {ticker}: already tracked for listing on {existing}")]
    Duplicate {
        ticker: String,
        existing: NaiveDate,
        incoming: NaiveDate,
    },

    #[error("rejected feed record: {0}")]
    Feed(#[from] FeedError),
}

/// Registry slot: the immutable candidate plus its lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub candidate: Candidate,
    pub status: CandidateStatus,
}

/// Outcome of ingesting a whole feed.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub accepted: usize,
    /// Zero-based record index and why it was refused.
    pub rejected: Vec<(usize, RegistryError)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRegistry {
    entries: BTreeMap<String, RegistryEntry>,
    /// Terminal candidacies displaced by a later relisting of the same ticker.
    archived: Vec<RegistryEntry>,
    /// Calendar-day span within which two listings of one ticker overlap.
    overlap_days: i64,
}

impl CandidateRegistry {
    /// `window_sessions` is the listing monitor window in trading sessions.
    pub fn new(window_sessions: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            archived: Vec::new(),
            overlap_days: i64::from(window_sessions) * 7 / 5 + 1,
        }
    }

    /// Validate a raw feed record and insert it.
    pub fn ingest(&mut self, record: &RawScoreRecord) -> Result<&Candidate, RegistryError> {
        let candidate = record.validate()?;
        self.insert(candidate)
    }

    /// Insert an already-validated candidate.
    ///
    /// Fails with [`RegistryError::Duplicate`] if the ticker is still active or
    /// its tracked listing window overlaps the incoming one. The original is kept.
    pub fn insert(&mut self, candidate: Candidate) -> Result<&Candidate, RegistryError> {
        let ticker = candidate.ticker.clone();
        if let Some(existing) = self.entries.get(&ticker) {
            let gap = (candidate.listing_date - existing.candidate.listing_date)
                .num_days()
                .abs();
            if existing.status == CandidateStatus::Active || gap <= self.overlap_days {
                return Err(RegistryError::Duplicate {
                    ticker,
                    existing: existing.candidate.listing_date,
                    incoming: candidate.listing_date,
                });
            }
            if let Some(old) = self.entries.remove(&ticker) {
                debug!(ticker = %ticker, "archiving terminal candidacy for relisting");
                self.archived.push(old);
            }
        }

        let entry = self.entries.entry(ticker).or_insert(RegistryEntry {
            candidate,
            status: CandidateStatus::Active,
        });
        Ok(&entry.candidate)
    }

    /// Ingest every record, isolating failures per record.
    pub fn ingest_all<'a, I>(&mut self, records: I) -> IngestSummary
    where
        I: IntoIterator<Item = &'a RawScoreRecord>,
    {
        let mut summary = IngestSummary::default();
        for (index, record) in records.into_iter().enumerate() {
            match self.ingest(record) {
                Ok(_) => summary.accepted += 1,
                Err(err) => {
                    warn!(record = index, error = %err, "score record rejected");
                    summary.rejected.push((index, err));
                }
            }
        }
        summary
    }

    /// Candidates not yet entered, consumed or expired, sorted by ticker.
    pub fn get_active(&self) -> Vec<&Candidate> {
        self.entries
            .values()
            .filter(|e| e.status == CandidateStatus::Active)
            .map(|e| &e.candidate)
            .collect()
    }

    pub fn get(&self, ticker: &str) -> Option<&Candidate> {
        self.entries.get(ticker).map(|e| &e.candidate)
    }

    pub fn status(&self, ticker: &str) -> Option<CandidateStatus> {
        self.entries.get(ticker).map(|e| e.status)
    }

    pub fn mark_entered(&mut self, ticker: &str) -> bool {
        self.transition(ticker, CandidateStatus::Entered)
    }

    pub fn mark_consumed(&mut self, ticker: &str) -> bool {
        self.transition(ticker, CandidateStatus::Consumed)
    }

    pub fn mark_expired(&mut self, ticker: &str) -> bool {
        self.transition(ticker, CandidateStatus::Expired)
    }

    /// Only `Active` candidates move; terminal states are final.
    fn transition(&mut self, ticker: &str, to: CandidateStatus) -> bool {
        match self.entries.get_mut(ticker) {
            Some(entry) if entry.status == CandidateStatus::Active => {
                entry.status = to;
                true
            }
            _ => false,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn archived(&self) -> &[RegistryEntry] {
        &self.archived
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == CandidateStatus::Active)
            .count()
    }
}

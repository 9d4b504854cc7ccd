use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};

use crate::{
    errors::{FxError, Result},
    models::{ConversionRequest, ConversionResult, HistoryEntry},
    storage::StorageService,
};

#[derive(Default)]
struct LedgerState {
    entries: Vec<HistoryEntry>,
    last_id: u64,
}

/// Bounded, newest-first log of past conversions. Every mutation is written
/// through to storage before it returns; a failed write leaves the ledger
/// as it was.
pub struct HistoryLedger {
    storage: StorageService,
    capacity: usize,
    state: Mutex<LedgerState>,
}

impl HistoryLedger {
    pub fn load(storage: StorageService, capacity: usize) -> Self {
        let mut entries = storage.load_history().unwrap_or_else(|error| {
            log::warn!("history unavailable, starting empty: {error:#}");
            Vec::new()
        });
        entries.truncate(capacity);
        let last_id = entries.iter().map(|entry| entry.id).max().unwrap_or_default();

        Self {
            storage,
            capacity,
            state: Mutex::new(LedgerState { entries, last_id }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Builds an entry for a completed conversion and appends it.
    pub fn record(
        &self,
        request: &ConversionRequest,
        result: &ConversionResult,
    ) -> Result<HistoryEntry> {
        let mut state = self.lock();
        let now = Utc::now();
        let id = (now.timestamp_millis().max(0) as u64).max(state.last_id + 1);
        let entry = HistoryEntry {
            id,
            amount: request.amount,
            source: request.source.clone(),
            target: request.target.clone(),
            converted_amount: result.converted_amount,
            effective_rate: result.effective_rate,
            recorded_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.push_locked(&mut state, entry.clone())?;
        Ok(entry)
    }

    pub fn append(&self, entry: HistoryEntry) -> Result<()> {
        let mut state = self.lock();
        self.push_locked(&mut state, entry)
    }

    pub fn list(&self) -> Vec<HistoryEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn find_by_id(&self, id: u64) -> Option<HistoryEntry> {
        self.lock()
            .entries
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    /// The request that produced entry `id`, for restoring prior inputs.
    pub fn replay(&self, id: u64) -> Result<ConversionRequest> {
        self.find_by_id(id)
            .map(|entry| entry.request())
            .ok_or_else(|| FxError::NotFound(format!("history entry {id}")))
    }

    /// Confirmation is the shell's job; this clears unconditionally.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        self.storage.clear_history().map_err(FxError::storage)?;
        state.entries.clear();
        Ok(())
    }

    fn push_locked(&self, state: &mut LedgerState, entry: HistoryEntry) -> Result<()> {
        let mut next = Vec::with_capacity(self.capacity);
        let entry_id = entry.id;
        next.push(entry);
        next.extend(state.entries.iter().cloned());
        next.truncate(self.capacity);

        self.storage.save_history(&next).map_err(FxError::storage)?;
        state.entries = next;
        state.last_id = state.last_id.max(entry_id);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

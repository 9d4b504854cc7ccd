use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    errors::{FxError, Result},
    models::CurrencyCode,
    storage::StorageService,
};

/// Insertion-ordered set of pinned currencies. Presentation hint only.
pub struct FavoritesSet {
    storage: StorageService,
    codes: Mutex<Vec<CurrencyCode>>,
}

impl FavoritesSet {
    pub fn load(storage: StorageService) -> Self {
        let stored = storage.load_favorites().unwrap_or_else(|error| {
            log::warn!("favorites unavailable, using defaults: {error:#}");
            crate::models::default_favorites()
        });
        let mut codes: Vec<CurrencyCode> = Vec::with_capacity(stored.len());
        for code in stored {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }

        Self {
            storage,
            codes: Mutex::new(codes),
        }
    }

    /// Adds `code` at the end if absent, removes it if present. Returns the
    /// new membership.
    pub fn toggle(&self, code: &CurrencyCode) -> Result<bool> {
        let mut codes = self.lock();
        let mut next = codes.clone();
        let now_member = if let Some(index) = next.iter().position(|c| c == code) {
            next.remove(index);
            false
        } else {
            next.push(code.clone());
            true
        };

        self.storage.save_favorites(&next).map_err(FxError::storage)?;
        *codes = next;
        Ok(now_member)
    }

    pub fn contains(&self, code: &CurrencyCode) -> bool {
        self.lock().contains(code)
    }

    pub fn list(&self) -> Vec<CurrencyCode> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CurrencyCode>> {
        self.codes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

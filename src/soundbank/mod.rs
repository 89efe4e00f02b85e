//! Soundbanks shared by the sample players.
//!
//! Parsing SoundFont or DLS files happens elsewhere; a loader hands the
//! registry a finished [`SoundBank`]. Zone and sample data are immutable once
//! registered and shared between voices by `Arc`.

/// Per-voice playback of a zone list.
pub mod player;
/// Sample and zone records.
pub mod zone;

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, warn};

use crate::error::BankError;

pub use player::ZonePlayer;
pub use zone::{LoopMode, Sample, Zone, ZoneEnv, ZoneLfo, FILTER_OFF_CENTS};

/*
Bank Lifetime
=============

    registry ──lock(name)──→ BankHandle ──clone──→ BankHandle ...
       │                         │ drop                 │ drop
       │        lock count  ←────┴──────────────────────┘
       │
       └─unload(name): refused while the count is above zero

Templates and voices hold a `BankHandle`, so a bank that any instrument can
still play from is never unloaded. The count lives under the registry's
mutex; playback itself only touches the `Arc`.
*/

/// A (bank, program) instrument: its zones in search order.
#[derive(Debug, Clone)]
pub struct SbInstrument {
    pub name: String,
    pub bank: u16,
    pub program: u16,
    pub zones: Vec<Arc<Zone>>,
}

impl SbInstrument {
    pub fn new(name: impl Into<String>, bank: u16, program: u16) -> Self {
        Self {
            name: name.into(),
            bank,
            program,
            zones: Vec::new(),
        }
    }

    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.zones.push(Arc::new(zone));
        self
    }

    /// Every zone covering the key and velocity (stereo pairs give two).
    pub fn zones_for(&self, key: i32, velocity: u8) -> impl Iterator<Item = &Arc<Zone>> + '_ {
        self.zones.iter().filter(move |z| z.matches(key, velocity))
    }
}

#[derive(Debug, Clone)]
pub struct SoundBank {
    pub name: String,
    pub instruments: Vec<SbInstrument>,
}

impl SoundBank {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruments: Vec::new(),
        }
    }

    pub fn with_instrument(mut self, instrument: SbInstrument) -> Self {
        self.instruments.push(instrument);
        self
    }

    pub fn instrument(&self, bank: u16, program: u16) -> Option<&SbInstrument> {
        self.instruments.iter().find(|i| i.bank == bank && i.program == program)
    }

    /// Exact match, else the same program in bank 0 (GM fallback for
    /// variation banks). Percussion (bank 128) never falls back.
    pub fn find_instrument(&self, bank: u16, program: u16) -> Option<&SbInstrument> {
        self.instrument(bank, program).or_else(|| {
            if bank != 0 && bank != PERCUSSION_BANK {
                self.instrument(0, program)
            } else {
                None
            }
        })
    }
}

/// Bank number percussion kits live in.
pub const PERCUSSION_BANK: u16 = 128;

#[derive(Debug)]
struct Entry {
    bank: Arc<SoundBank>,
    locks: usize,
}

/// Loaded soundbanks by name, with a lock count each.
#[derive(Debug, Default)]
pub struct BankRegistry {
    banks: Mutex<HashMap<String, Entry>>,
}

impl BankRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.banks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a bank under its own name.
    pub fn insert(&self, bank: SoundBank) -> Result<(), BankError> {
        let mut banks = self.entries();
        if banks.contains_key(&bank.name) {
            return Err(BankError::AlreadyLoaded(bank.name));
        }
        debug!(name = %bank.name, instruments = bank.instruments.len(), "soundbank registered");
        banks.insert(
            bank.name.clone(),
            Entry {
                bank: Arc::new(bank),
                locks: 0,
            },
        );
        Ok(())
    }

    /// Run `loader` unless `name` is already registered.
    pub fn load_with<F>(&self, name: &str, loader: F) -> Result<(), BankError>
    where
        F: FnOnce() -> Result<SoundBank, String>,
    {
        if self.is_loaded(name) {
            return Ok(());
        }
        let mut bank = loader().map_err(|reason| BankError::LoadFailed {
            name: name.to_string(),
            reason,
        })?;
        bank.name = name.to_string();
        self.insert(bank)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn lock_count(&self, name: &str) -> Option<usize> {
        self.entries().get(name).map(|e| e.locks)
    }

    /// Take a lock on a bank. The lock is released when the handle (and
    /// every clone of it) is dropped.
    pub fn lock(self: &Arc<Self>, name: &str) -> Result<BankHandle, BankError> {
        let mut banks = self.entries();
        let entry = banks
            .get_mut(name)
            .ok_or_else(|| BankError::NotLoaded(name.to_string()))?;
        entry.locks += 1;
        Ok(BankHandle {
            registry: Arc::clone(self),
            name: name.to_string(),
            bank: Arc::clone(&entry.bank),
        })
    }

    fn unlock(&self, name: &str) {
        if let Some(entry) = self.entries().get_mut(name) {
            entry.locks = entry.locks.saturating_sub(1);
        }
    }

    /// Remove a bank nobody holds.
    pub fn unload(&self, name: &str) -> Result<Arc<SoundBank>, BankError> {
        let mut banks = self.entries();
        match banks.get(name) {
            None => Err(BankError::NotLoaded(name.to_string())),
            Some(e) if e.locks > 0 => {
                warn!(name, locks = e.locks, "soundbank still in use");
                Err(BankError::Locked {
                    name: name.to_string(),
                    locks: e.locks,
                })
            }
            Some(_) => {
                debug!(name, "soundbank unloaded");
                banks
                    .remove(name)
                    .map(|e| e.bank)
                    .ok_or_else(|| BankError::NotLoaded(name.to_string()))
            }
        }
    }
}

/// A counted reference to a registered bank.
#[derive(Debug)]
pub struct BankHandle {
    registry: Arc<BankRegistry>,
    name: String,
    bank: Arc<SoundBank>,
}

impl BankHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<BankRegistry> {
        &self.registry
    }
}

impl Clone for BankHandle {
    fn clone(&self) -> Self {
        if let Some(entry) = self.registry.entries().get_mut(&self.name) {
            entry.locks += 1;
        }
        Self {
            registry: Arc::clone(&self.registry),
            name: self.name.clone(),
            bank: Arc::clone(&self.bank),
        }
    }
}

impl Drop for BankHandle {
    fn drop(&mut self) {
        self.registry.unlock(&self.name);
    }
}

impl Deref for BankHandle {
    type Target = SoundBank;

    fn deref(&self) -> &SoundBank {
        &self.bank
    }
}

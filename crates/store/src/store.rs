//! In-memory authorization table with write-through persistence.
//!
//! Lookups take a shared lock on the table and never wait on storage. Updates
//! take the exclusive lock, compute the new value, draw a flush ticket and
//! release the table before touching the backend. Tickets are served strictly
//! in order, so the backend sees writes in the same order as the table did.

use crate::backend::PermissionBackend;
use capbridge_core::{PermissionEntry, Uid, FLAG_ALLOWED, FLAG_HIDDEN, MASK_ALL, MASK_PERMISSION};
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a masked update did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The computed flags equal the current flags; nothing was written.
    Unchanged,
    Inserted { flags: u32 },
    Updated { from: u32, to: u32 },
    /// The computed flags were zero and the entry was removed.
    Removed { from: u32 },
}

impl UpdateOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, UpdateOutcome::Unchanged)
    }

    /// Flags before the update.
    pub fn previous(&self) -> Option<u32> {
        match *self {
            UpdateOutcome::Unchanged | UpdateOutcome::Inserted { .. } => None,
            UpdateOutcome::Updated { from, .. } | UpdateOutcome::Removed { from } => Some(from),
        }
    }

    /// Flags after the update, 0 when absent.
    pub fn current(&self) -> Option<u32> {
        match *self {
            UpdateOutcome::Unchanged => None,
            UpdateOutcome::Inserted { flags } => Some(flags),
            UpdateOutcome::Updated { to, .. } => Some(to),
            UpdateOutcome::Removed { .. } => Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Write {
    Upsert(Uid, u32),
    Delete(Uid),
}

/// Serves flush tickets in the order they were drawn.
#[derive(Default)]
struct FlushSequencer {
    next_ticket: AtomicU64,
    served: Mutex<u64>,
    turn: Condvar,
}

impl FlushSequencer {
    /// Must be called while the table's write lock is held.
    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst)
    }

    fn run(&self, ticket: u64, flush: impl FnOnce()) {
        let mut served = self.served.lock();
        while *served != ticket {
            self.turn.wait(&mut served);
        }
        // Advance even if `flush` panics, or later writers wait forever.
        struct Advance<'a>(&'a FlushSequencer, &'a mut u64);
        impl Drop for Advance<'_> {
            fn drop(&mut self) {
                *self.1 += 1;
                self.0.turn.notify_all();
            }
        }
        let _advance = Advance(self, &mut *served);
        flush();
    }
}

/// The authorization table.
///
/// Absence of an entry is equivalent to flags 0: an update that computes 0
/// removes the entry, and no stored entry ever has flags 0.
pub struct AuthorizationStore {
    table: RwLock<IndexMap<Uid, u32>>,
    sequencer: FlushSequencer,
    backend: Arc<dyn PermissionBackend>,
}

impl std::fmt::Debug for AuthorizationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationStore")
            .field("entries", &self.table.read().len())
            .finish_non_exhaustive()
    }
}

impl AuthorizationStore {
    /// Load every persisted entry. A backend that cannot be read yields an
    /// empty table; later writes are still attempted.
    pub fn load(backend: Arc<dyn PermissionBackend>) -> Self {
        let mut table = IndexMap::new();
        match backend.read_all() {
            Ok(entries) => {
                for entry in entries {
                    if entry.flags == 0 {
                        continue;
                    }
                    table.insert(entry.uid, entry.flags);
                }
                info!(entries = table.len(), "loaded authorization table");
            }
            Err(e) => {
                error!("failed to read authorization table, starting empty: {e}");
            }
        }
        Self {
            table: RwLock::new(table),
            sequencer: FlushSequencer::default(),
            backend,
        }
    }

    /// Effective entry for `uid`.
    ///
    /// The implicitly allowed identities resolve to `FLAG_ALLOWED` without a
    /// table lookup. Any other identity, [`Uid::GLOBAL`] included, falls back
    /// to the default entry when it has no explicit entry; the returned entry
    /// carries the requested `uid` in that case.
    pub fn resolve(&self, uid: Uid) -> Option<PermissionEntry> {
        if uid.is_implicitly_allowed() {
            return Some(PermissionEntry::new(uid, FLAG_ALLOWED));
        }
        let table = self.table.read();
        if let Some(&flags) = table.get(&uid) {
            return Some(PermissionEntry::new(uid, flags));
        }
        table
            .get(&Uid::DEFAULT)
            .map(|&flags| PermissionEntry::new(uid, flags))
    }

    /// The entry stored for `uid`, without fallback or implicit grants.
    pub fn resolve_explicit(&self, uid: Uid) -> Option<PermissionEntry> {
        self.table
            .read()
            .get(&uid)
            .map(|&flags| PermissionEntry::new(uid, flags))
    }

    /// Replace the bits of `uid` selected by `mask` with the same bits of
    /// `values`. Other bits are kept.
    pub fn update(&self, uid: Uid, mask: u32, values: u32) -> UpdateOutcome {
        let mut table = self.table.write();
        let old = table.get(&uid).copied().unwrap_or(0);
        let new = (old & !mask) | (values & mask);
        if new == old {
            return UpdateOutcome::Unchanged;
        }

        let (outcome, write) = if new == 0 {
            table.shift_remove(&uid);
            (UpdateOutcome::Removed { from: old }, Write::Delete(uid))
        } else {
            table.insert(uid, new);
            let outcome = if old == 0 {
                UpdateOutcome::Inserted { flags: new }
            } else {
                UpdateOutcome::Updated { from: old, to: new }
            };
            (outcome, Write::Upsert(uid, new))
        };
        let ticket = self.sequencer.ticket();
        drop(table);

        debug!(%uid, mask = format_args!("{mask:#x}"), ?outcome, "authorization updated");
        self.sequencer.run(ticket, || self.persist(write));
        outcome
    }

    /// Remove any entry for `uid`. Returns whether one existed.
    pub fn remove(&self, uid: Uid) -> bool {
        self.update(uid, MASK_ALL, 0).changed()
    }

    /// Whether the effective entry for `uid` carries `FLAG_HIDDEN`.
    pub fn is_hidden(&self, uid: Uid) -> bool {
        self.resolve(uid).is_some_and(|entry| entry.is_hidden())
    }

    /// Permission bits of the default entry.
    pub fn default_permission_flags(&self) -> u32 {
        self.resolve_explicit(Uid::DEFAULT)
            .map_or(0, |entry| entry.flags & MASK_PERMISSION)
    }

    /// Set the permission bits of the default entry. Bits outside the
    /// permission sub-mask are ignored in `flags`. A value with no permission
    /// bits removes the default entry altogether.
    pub fn set_default_permission_flags(&self, flags: u32) -> UpdateOutcome {
        let flags = flags & MASK_PERMISSION;
        if flags == 0 {
            self.update(Uid::DEFAULT, MASK_ALL, 0)
        } else {
            self.update(Uid::DEFAULT, MASK_PERMISSION, flags)
        }
    }

    /// Broker-wide toggle flags, 0 when unset.
    pub fn global_settings(&self) -> u32 {
        self.resolve_explicit(Uid::GLOBAL).map_or(0, |entry| entry.flags)
    }

    pub fn set_global_settings(&self, flags: u32) -> UpdateOutcome {
        self.update(Uid::GLOBAL, MASK_ALL, flags)
    }

    /// Every stored entry, in first-insertion order.
    pub fn snapshot(&self) -> Vec<PermissionEntry> {
        self.table
            .read()
            .iter()
            .map(|(&uid, &flags)| PermissionEntry::new(uid, flags))
            .collect()
    }

    /// Real identities whose explicit entry carries `FLAG_HIDDEN`.
    pub fn hidden_identities(&self) -> Vec<Uid> {
        self.table
            .read()
            .iter()
            .filter(|(uid, flags)| !uid.is_sentinel() && **flags & FLAG_HIDDEN != 0)
            .map(|(&uid, _)| uid)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    fn persist(&self, write: Write) {
        let result = match write {
            Write::Upsert(uid, flags) => self.backend.upsert(uid, flags),
            Write::Delete(uid) => self.backend.delete(uid),
        };
        if let Err(e) = result {
            warn!(?write, "failed to persist authorization change: {e}");
        }
    }
}

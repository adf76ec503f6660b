//! Static worker-to-core placement for the dual-core target.
//!
//! Timing-critical protocol workers (classifier reader, command issuers,
//! supervisor) run on core A so modem turnaround latency is not disturbed by
//! bulk work. Bulk readers and the background drainer run on core B. Hosts
//! with fewer cores than the table expects fall back to "any core": the
//! worker simply runs unpinned.

use core_affinity::CoreId;
use tracing::debug;

/// Coarse worker classes used to key the placement table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerCategory {
    /// Latency-sensitive transport and supervision loops.
    Protocol,
    /// Throughput-oriented record readers.
    Bulk,
    /// Maintenance work that should never contend with the protocol core.
    Background,
}

impl WorkerCategory {
    /// Short name for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerCategory::Protocol => "protocol",
            WorkerCategory::Bulk => "bulk",
            WorkerCategory::Background => "background",
        }
    }
}

/// The static category-to-core table, resolved against the cores actually
/// available at startup.
#[derive(Debug, Clone)]
pub struct AffinityTable {
    protocol_core: Option<usize>,
    bulk_core: Option<usize>,
}

impl AffinityTable {
    /// Detect available cores and build the placement table.
    ///
    /// Core A is the first available core, core B the second. A single-core
    /// host gets an empty table and every worker runs unpinned.
    pub fn detect() -> Self {
        let available: Vec<usize> = core_affinity::get_core_ids()
            .map(|ids| ids.into_iter().map(|id| id.id).collect())
            .unwrap_or_else(|| (0..num_cpus::get()).collect());

        let table = if available.len() >= 2 {
            AffinityTable {
                protocol_core: available.first().copied(),
                bulk_core: available.get(1).copied(),
            }
        } else {
            AffinityTable {
                protocol_core: None,
                bulk_core: None,
            }
        };
        debug!(?table, cores = available.len(), "affinity table resolved");
        table
    }

    /// Table with explicit core assignments.
    pub fn manual(protocol_core: Option<usize>, bulk_core: Option<usize>) -> Self {
        AffinityTable {
            protocol_core,
            bulk_core,
        }
    }

    /// Table that pins nothing.
    pub fn unpinned() -> Self {
        AffinityTable {
            protocol_core: None,
            bulk_core: None,
        }
    }

    /// The core a worker of this category should be pinned to, or `None`
    /// for "any core".
    pub fn core_for(&self, category: WorkerCategory) -> Option<usize> {
        match category {
            WorkerCategory::Protocol => self.protocol_core,
            WorkerCategory::Bulk | WorkerCategory::Background => self.bulk_core,
        }
    }
}

/// Pin the current thread to the given core.
///
/// Returns `true` when pinning succeeded. Failure is not fatal; the worker
/// runs wherever the OS puts it.
pub(crate) fn pin_to_core(core_id: usize) -> bool {
    core_affinity::set_for_current(CoreId { id: core_id })
}

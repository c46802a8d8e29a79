//! Candidate registry and collection passes

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::breaker::CycleBreaker;
use crate::error::CircleError;
use crate::graph::{CycleGraphBuilder, FxIndexMap, ObjectInfo};
use crate::layout::LayoutCache;
use crate::object::{ObjId, ObjRef};
use crate::weak_ref::WeakRef;

/// Collector configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Stop a search as soon as its verdict is known (default: true)
    pub early_exit: bool,
    /// Clear the edges of leaked cycles; `false` only reports them (default: true)
    pub break_cycles: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            early_exit: true,
            break_cycles: true,
        }
    }
}

/// Cumulative collector statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectorStats {
    /// Number of collection passes
    pub collections: u64,
    /// Candidates searched across all passes
    pub candidates_searched: u64,
    /// Candidates dropped because they were already destroyed
    pub candidates_dropped: u64,
    /// Searches that found an unclaimed cycle
    pub cycles_found: u64,
    /// Unclaimed cycles whose edges were cleared
    pub cycles_broken: u64,
    /// Unclaimed cycles held through a container element
    pub unbreakable_cycles: u64,
    /// Slots cleared
    pub edges_cleared: u64,
    /// Slots left alone because they changed during breaking
    pub zeroing_conflicts: u64,
    /// Total time spent in collection passes
    pub total_time: Duration,
    /// Time spent in the last collection pass
    pub last_time: Duration,
}

/// Outcome of one collection pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectReport {
    /// Candidates resolved and searched
    pub searched: usize,
    /// Candidates dropped because they were already destroyed
    pub dropped: usize,
    /// Searches that found an unclaimed cycle
    pub cycles_found: usize,
    /// Unclaimed cycles whose edges were cleared
    pub cycles_broken: usize,
    /// Unclaimed cycles that could not be broken
    pub unbreakable: usize,
    /// Slots cleared
    pub edges_cleared: usize,
    /// Degraded conditions met during the pass
    pub diagnostics: Vec<CircleError>,
}

impl fmt::Display for CollectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "searched {}, dropped {}, cycles found {}, broken {}, unbreakable {}, edges cleared {}",
            self.searched,
            self.dropped,
            self.cycles_found,
            self.cycles_broken,
            self.unbreakable,
            self.edges_cleared
        )?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n  {diagnostic}")?;
        }
        Ok(())
    }
}

/// Everything a full search from one candidate found
#[derive(Debug, Clone)]
pub struct CandidateGraph {
    candidate: ObjId,
    infos: FxIndexMap<ObjId, ObjectInfo>,
    diagnostics: Vec<CircleError>,
}

impl CandidateGraph {
    /// Candidate the search started from
    pub fn candidate(&self) -> ObjId {
        self.candidate
    }

    /// Reachable objects in discovery order, candidate first
    pub fn infos(&self) -> &FxIndexMap<ObjId, ObjectInfo> {
        &self.infos
    }

    /// Degraded conditions met during the search, such as undescribed layouts
    pub fn diagnostics(&self) -> &[CircleError] {
        &self.diagnostics
    }

    /// Whether the candidate lies on an unclaimed cycle
    pub fn is_leaked(&self) -> bool {
        self.infos
            .get(&self.candidate)
            .is_some_and(ObjectInfo::leaked)
    }
}

impl fmt::Display for CandidateGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "candidate {} ({} objects{})",
            self.candidate,
            self.infos.len(),
            if self.is_leaked() { ", leaked" } else { "" }
        )?;
        writeln!(
            f,
            "  {:<16} {:<24} {:>6} {:>8} {:>8} {:>5}  referrers",
            "object", "type", "owners", "internal", "external", "cycle"
        )?;
        for (id, info) in &self.infos {
            let referrers: Vec<String> = info
                .referring_objects()
                .iter()
                .map(ToString::to_string)
                .collect();
            writeln!(
                f,
                "  {:<16} {:<24} {:>6} {:>8} {:>8} {:>5}  {}",
                id.to_string(),
                short_type_name(info.type_name()),
                info.owners(),
                info.internal_references(),
                if info.externally_referenced() { "yes" } else { "no" },
                if info.part_of_cycle() { "yes" } else { "no" },
                referrers.join(", ")
            )?;
        }
        for diagnostic in &self.diagnostics {
            writeln!(f, "  {diagnostic}")?;
        }
        Ok(())
    }
}

/// Drop module paths from a type name, keeping generic arguments readable.
fn short_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut segment = String::new();
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == ':' {
            segment.push(ch);
        } else {
            out.push_str(segment.rsplit("::").next().unwrap_or_default());
            segment.clear();
            out.push(ch);
        }
    }
    out.push_str(segment.rsplit("::").next().unwrap_or_default());
    out
}

/// Weakly held set of objects suspected of sitting on leaked cycles
///
/// Candidates are searched in the order they were added. A candidate stays
/// registered until it is removed or found destroyed at the start of its
/// search.
pub struct CandidateRegistry {
    candidates: FxIndexMap<ObjId, WeakRef>,
    cache: Arc<LayoutCache>,
    config: CollectorConfig,
    stats: CollectorStats,
}

impl CandidateRegistry {
    /// Create a registry with the default configuration and its own layout cache
    pub fn new() -> Self {
        Self::with_config(CollectorConfig::default())
    }

    /// Create a registry with a custom configuration
    pub fn with_config(config: CollectorConfig) -> Self {
        Self::with_cache(config, Arc::new(LayoutCache::new()))
    }

    /// Create a registry sharing a layout cache
    pub fn with_cache(config: CollectorConfig, cache: Arc<LayoutCache>) -> Self {
        Self {
            candidates: FxIndexMap::default(),
            cache,
            config,
            stats: CollectorStats::default(),
        }
    }

    /// Register `obj` as a candidate without taking ownership of it.
    ///
    /// Returns `false` if it was already registered.
    pub fn add_candidate(&mut self, obj: &ObjRef) -> bool {
        if self.candidates.contains_key(&obj.id()) {
            return false;
        }
        self.candidates.insert(obj.id(), obj.downgrade());
        true
    }

    /// Unregister `obj`, returning whether it was registered
    pub fn remove_candidate(&mut self, obj: &ObjRef) -> bool {
        self.candidates.shift_remove(&obj.id()).is_some()
    }

    /// Whether `obj` is registered
    pub fn contains(&self, obj: &ObjRef) -> bool {
        self.candidates.contains_key(&obj.id())
    }

    /// Number of registered candidates (including ones destroyed since the last pass)
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether no candidate is registered
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Search every candidate and break the unclaimed cycles found.
    pub fn collect(&mut self) -> CollectReport {
        let start = Instant::now();
        let builder = CycleGraphBuilder::new(&self.cache);
        let breaker = CycleBreaker::new();
        let gather_all = !self.config.early_exit;
        let mut report = CollectReport::default();

        tracing::debug!(
            target: "circle::gc",
            candidates = self.candidates.len(),
            early_exit = self.config.early_exit,
            break_cycles = self.config.break_cycles,
            "Collection starting"
        );

        let ids: Vec<ObjId> = self.candidates.keys().copied().collect();
        for id in ids {
            let Some(candidate) = self.candidates.get(&id).and_then(WeakRef::upgrade) else {
                self.candidates.shift_remove(&id);
                tracing::trace!(target: "circle::gc", candidate = %id, "Candidate gone");
                report.dropped += 1;
                report.diagnostics.push(CircleError::CandidateGone { id });
                continue;
            };

            report.searched += 1;
            let mut result = builder.search(&candidate, gather_all);
            report.diagnostics.extend(result.take_diagnostics());
            drop(candidate);

            if !result.is_unclaimed_cycle() {
                continue;
            }
            report.cycles_found += 1;

            if !result.is_breakable() {
                report.unbreakable += 1;
                tracing::warn!(
                    target: "circle::gc",
                    candidate = %id,
                    "Leaked cycle held through a container element; not breaking"
                );
                continue;
            }

            if !self.config.break_cycles {
                tracing::info!(
                    target: "circle::gc",
                    candidate = %id,
                    edges = result.edges_to_zero().len(),
                    "Leaked cycle found (dry run)"
                );
                continue;
            }

            let zeroed = breaker.zero(result.edges_to_zero(), result.retained());
            report.edges_cleared += zeroed.cleared;
            report.cycles_broken += 1;
            tracing::info!(
                target: "circle::gc",
                candidate = %id,
                objects = result.retained().len(),
                cleared = zeroed.cleared,
                conflicts = zeroed.conflicts.len(),
                "Broke leaked cycle"
            );
            report.diagnostics.extend(zeroed.conflicts);
            // Releases the retained handles; the cycle's members are destroyed here.
            drop(result);
        }

        let elapsed = start.elapsed();
        self.record(&report, elapsed);

        tracing::debug!(
            target: "circle::gc",
            searched = report.searched,
            dropped = report.dropped,
            broken = report.cycles_broken,
            cleared = report.edges_cleared,
            pause_us = elapsed.as_micros() as u64,
            "Collection complete"
        );

        report
    }

    /// Run a full search from every live candidate without breaking anything.
    ///
    /// Graphs are returned in candidate order; an object reachable from
    /// several candidates appears in each of their graphs.
    pub fn object_infos(&mut self) -> Vec<CandidateGraph> {
        let builder = CycleGraphBuilder::new(&self.cache);
        let mut graphs = Vec::with_capacity(self.candidates.len());

        self.candidates.retain(|id, weak| {
            let Some(candidate) = weak.upgrade() else {
                tracing::trace!(target: "circle::gc", candidate = %id, "Candidate gone");
                return false;
            };
            let mut result = builder.search(&candidate, true);
            let diagnostics = result.take_diagnostics();
            graphs.push(CandidateGraph {
                candidate: *id,
                infos: result.into_infos(),
                diagnostics,
            });
            true
        });

        graphs
    }

    fn record(&mut self, report: &CollectReport, elapsed: Duration) {
        let conflicts = report
            .diagnostics
            .iter()
            .filter(|d| matches!(d, CircleError::ZeroingConflict { .. }))
            .count();

        let stats = &mut self.stats;
        stats.collections += 1;
        stats.candidates_searched += report.searched as u64;
        stats.candidates_dropped += report.dropped as u64;
        stats.cycles_found += report.cycles_found as u64;
        stats.cycles_broken += report.cycles_broken as u64;
        stats.unbreakable_cycles += report.unbreakable as u64;
        stats.edges_cleared += report.edges_cleared as u64;
        stats.zeroing_conflicts += conflicts as u64;
        stats.total_time += elapsed;
        stats.last_time = elapsed;
    }

    /// Cumulative statistics
    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// Active configuration
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Layout cache used by this registry
    pub fn layout_cache(&self) -> &Arc<LayoutCache> {
        &self.cache
    }
}

impl Default for CandidateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CandidateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateRegistry")
            .field("candidates", &self.candidates.len())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

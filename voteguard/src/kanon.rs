use crate::*;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

/// Suppression parameters.
#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct KAnonConfig {
    /// No reported aggregate may describe fewer than k individuals.
    pub k: u64,

    /// Minimum non-suppressed cells a published breakdown dimension must
    /// keep; below this the whole dimension is suppressed.
    pub min_cells: usize,
}

impl Default for KAnonConfig {
    fn default() -> Self {
        KAnonConfig {
            k: 30,
            min_cells: 3,
        }
    }
}

/// A reported count. The true count survives inside `Suppressed` so that a
/// suppressed zero stays distinguishable from a suppressed non-zero
/// internally, but both serialize to the same external `"suppressed"`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CellValue {
    Count(u64),
    Suppressed(u64),
}

impl CellValue {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, CellValue::Suppressed(_))
    }

    /// The published value, if any.
    pub fn visible(&self) -> Option<u64> {
        match self {
            CellValue::Count(n) => Some(*n),
            CellValue::Suppressed(_) => None,
        }
    }

    fn raw(&self) -> u64 {
        match self {
            CellValue::Count(n) | CellValue::Suppressed(n) => *n,
        }
    }

    fn suppress(&mut self) {
        *self = CellValue::Suppressed(self.raw());
    }
}

impl Serialize for CellValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            CellValue::Count(n) => serializer.serialize_u64(*n),
            CellValue::Suppressed(_) => serializer.serialize_str("suppressed"),
        }
    }
}

/// A suppressed aggregate view over one ballot. A fully-suppressed view is a
/// valid response shape, not an error.
#[derive(Serialize, Clone, Debug)]
pub struct ResultView {
    pub ballot_id: Uuid,
    pub total: CellValue,
    pub options: IndexMap<String, CellValue>,
    pub breakdowns: IndexMap<String, IndexMap<String, CellValue>>,
}

/// The most recently served breakdown shape per ballot, kept as an explicit
/// keyed store with a clear-on-close operation rather than ambient state.
pub struct QueryShapeStore {
    inner: Mutex<HashMap<Uuid, BTreeSet<String>>>,
}

impl QueryShapeStore {
    pub fn new() -> Self {
        QueryShapeStore {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn last(&self, ballot_id: &Uuid) -> Result<Option<BTreeSet<String>>, Error> {
        Ok(self.lock()?.get(ballot_id).cloned())
    }

    fn record(&self, ballot_id: &Uuid, shape: BTreeSet<String>) -> Result<(), Error> {
        self.lock()?.insert(*ballot_id, shape);
        Ok(())
    }

    pub fn clear(&self, ballot_id: &Uuid) -> Result<(), Error> {
        self.lock()?.remove(ballot_id);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<HashMap<Uuid, BTreeSet<String>>>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::StoreUnavailable("query shape store lock poisoned".to_string()))
    }
}

impl Default for QueryShapeStore {
    fn default() -> Self {
        QueryShapeStore::new()
    }
}

/// Evaluates aggregate queries against the ledger, applying k-anonymity
/// suppression and rejecting query shapes that would enable a differencing
/// attack.
///
/// Suppression is deterministic throughout: the same query over the same
/// votes always returns the identical view.
pub struct KAnonEngine {
    config: KAnonConfig,
    shapes: QueryShapeStore,
}

impl KAnonEngine {
    pub fn new(config: KAnonConfig) -> Self {
        KAnonEngine {
            config,
            shapes: QueryShapeStore::new(),
        }
    }

    /// Aggregate results for a ballot, optionally broken down by demographic
    /// dimensions.
    ///
    /// Rejects with `OverlappingQuery` when the requested shape is a proper
    /// subset or proper superset of the most recently served breakdown for
    /// this ballot; the exact same shape may be re-queried freely.
    pub fn query_results(
        &self,
        ledger: &dyn VoteLedger,
        ballot_id: &Uuid,
        breakdown_dims: &[String],
    ) -> Result<ResultView, Error> {
        let shape: BTreeSet<String> = breakdown_dims.iter().cloned().collect();

        if !shape.is_empty() {
            if let Some(last) = self.shapes.last(ballot_id)? {
                let overlapping =
                    shape != last && (shape.is_subset(&last) || shape.is_superset(&last));
                if overlapping {
                    return Err(Error::OverlappingQuery(format!(
                        "breakdown [{}] differences against previously served breakdown [{}]",
                        join(&shape),
                        join(&last),
                    )));
                }
            }
        }

        let votes = ledger.votes(ballot_id)?;
        let total = votes.len() as u64;

        let mut option_counts: BTreeMap<String, u64> = BTreeMap::new();
        for vote in &votes {
            *option_counts.entry(vote.option_id.clone()).or_insert(0) += 1;
        }

        let mut dim_counts: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for dim in &shape {
            let counts = dim_counts.entry(dim.clone()).or_insert_with(BTreeMap::new);
            for vote in &votes {
                let bucket = vote
                    .demographics
                    .get(dim)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                *counts.entry(bucket).or_insert(0) += 1;
            }
        }

        let view = if total < self.config.k {
            // Below-threshold ballots are suppressed wholesale; the raw
            // counts stay inside the cells
            ResultView {
                ballot_id: *ballot_id,
                total: CellValue::Suppressed(total),
                options: suppress_all(option_counts),
                breakdowns: dim_counts
                    .into_iter()
                    .map(|(dim, counts)| (dim, suppress_all(counts)))
                    .collect(),
            }
        } else {
            let mut breakdowns = IndexMap::new();
            for (dim, counts) in dim_counts {
                let mut cells = self.suppress_cells(counts);
                let visible = cells.values().filter(|c| !c.is_suppressed()).count();
                if visible < self.config.min_cells {
                    for cell in cells.values_mut() {
                        cell.suppress();
                    }
                }
                breakdowns.insert(dim, cells);
            }

            ResultView {
                ballot_id: *ballot_id,
                total: CellValue::Count(total),
                options: self.suppress_cells(option_counts),
                breakdowns,
            }
        };

        if !shape.is_empty() {
            self.shapes.record(ballot_id, shape)?;
        }

        Ok(view)
    }

    /// Per-event-type counts over the audit chain, with the same cell
    /// suppression rule as result cells.
    pub fn security_event_counts(&self, rows: &[AuditRow]) -> IndexMap<String, CellValue> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for row in rows {
            *counts.entry(row.event_type.to_string()).or_insert(0) += 1;
        }
        self.suppress_cells(counts)
    }

    /// Forget the served-shape history for a ballot (on ballot close).
    pub fn clear_ballot(&self, ballot_id: &Uuid) -> Result<(), Error> {
        self.shapes.clear(ballot_id)
    }

    /// Cell suppression followed by complementary suppression.
    ///
    /// First pass hides every cell below k. Then, while the visible remainder
    /// is inferable - exactly one visible cell left, or the hidden cells sum
    /// to less than k - the smallest visible cell is hidden too, until at
    /// least two cells are mutually un-inferable or nothing is visible.
    /// BTreeMap input keeps the smallest-cell tiebreak deterministic.
    fn suppress_cells(&self, counts: BTreeMap<String, u64>) -> IndexMap<String, CellValue> {
        let k = self.config.k;

        let mut cells: IndexMap<String, CellValue> = counts
            .into_iter()
            .map(|(key, count)| {
                let cell = if count < k {
                    CellValue::Suppressed(count)
                } else {
                    CellValue::Count(count)
                };
                (key, cell)
            })
            .collect();

        loop {
            let visible: Vec<(usize, u64)> = cells
                .values()
                .enumerate()
                .filter_map(|(i, cell)| cell.visible().map(|n| (i, n)))
                .collect();
            if visible.is_empty() {
                break;
            }

            let hidden_sum: u64 = cells
                .values()
                .filter(|cell| cell.is_suppressed())
                .map(|cell| cell.raw())
                .sum();
            let hidden_any = cells.values().any(|cell| cell.is_suppressed());

            let inferable = visible.len() == 1 || (hidden_any && hidden_sum < k);
            if !inferable {
                break;
            }

            // Smallest visible cell, first key on ties
            let (smallest_idx, _) = visible
                .iter()
                .min_by_key(|(i, n)| (*n, *i))
                .copied()
                .expect("voteguard: visible set checked non-empty");
            cells[smallest_idx].suppress();
        }

        cells
    }
}

fn suppress_all(counts: BTreeMap<String, u64>) -> IndexMap<String, CellValue> {
    counts
        .into_iter()
        .map(|(key, count)| (key, CellValue::Suppressed(count)))
        .collect()
}

fn join(shape: &BTreeSet<String>) -> String {
    shape.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod test {
    use super::*;

    /// Ledger with `counts[i]` votes for option `opt-{i}`, each vote carrying
    /// gender/age buckets cycled from short lists.
    fn ledger_with(ballot_id: Uuid, counts: &[usize]) -> MemLedger {
        let ledger = MemLedger::new();
        let genders = ["f", "m"];
        let ages = ["18-24", "25-34", "35-44", "45-54"];

        let mut voter = 0u32;
        for (opt, count) in counts.iter().enumerate() {
            let option_id = format!("opt-{}", opt);
            for _ in 0..*count {
                let mut demographics = Demographics::new();
                demographics.insert(
                    "gender".to_string(),
                    genders[voter as usize % genders.len()].to_string(),
                );
                demographics.insert(
                    "age".to_string(),
                    ages[voter as usize % ages.len()].to_string(),
                );

                let nullifier = Nullifier(sha256(&[&voter.to_be_bytes()]).0);
                let created_at = util::now();
                let record = VoteRecord {
                    ballot_id,
                    leaf_hash: leaf_hash(&ballot_id, &option_id, &nullifier, created_at),
                    option_id: option_id.clone(),
                    demographics,
                    created_at,
                };
                ledger.insert_vote(&nullifier, record).unwrap();
                voter += 1;
            }
        }
        ledger
    }

    fn engine() -> KAnonEngine {
        KAnonEngine::new(KAnonConfig::default())
    }

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_below_threshold_total_suppressed() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[15, 10]);

        let view = engine().query_results(&ledger, &ballot_id, &[]).unwrap();
        assert_eq!(view.total, CellValue::Suppressed(25));
        assert!(view.options.values().all(|c| c.is_suppressed()));
    }

    #[test]
    fn test_suppressed_zero_distinct_internally() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[0, 10]);

        let view = engine().query_results(&ledger, &ballot_id, &[]).unwrap();
        // Zero is a valid true value; externally identical, internally intact
        assert_eq!(view.total.visible(), None);
        assert_eq!(view.total, CellValue::Suppressed(10));
        assert_ne!(view.total, CellValue::Suppressed(0));
    }

    #[test]
    fn test_complementary_suppression_39_1() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[39, 1]);

        let view = engine().query_results(&ledger, &ballot_id, &[]).unwrap();
        assert_eq!(view.total, CellValue::Count(40));
        // The 1-cell is below k, and publishing the 39-cell would let the
        // total give the 1-cell away by subtraction
        assert_eq!(view.options["opt-0"], CellValue::Suppressed(39));
        assert_eq!(view.options["opt-1"], CellValue::Suppressed(1));
    }

    #[test]
    fn test_two_safe_cells_published() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[40, 35]);

        let view = engine().query_results(&ledger, &ballot_id, &[]).unwrap();
        assert_eq!(view.options["opt-0"], CellValue::Count(40));
        assert_eq!(view.options["opt-1"], CellValue::Count(35));
    }

    #[test]
    fn test_small_hidden_sum_pulls_down_next_cell() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[5, 35, 40]);

        // 5 suppressed; hidden sum 5 < k, so 35 goes too; one visible cell
        // left, so 40 goes too
        let view = engine().query_results(&ledger, &ballot_id, &[]).unwrap();
        assert!(view.options.values().all(|c| c.is_suppressed()));
    }

    #[test]
    fn test_overlapping_shape_rejected() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[60, 60]);
        let engine = engine();

        engine
            .query_results(&ledger, &ballot_id, &dims(&["gender"]))
            .unwrap();

        // Superset of the served shape
        let err = engine
            .query_results(&ledger, &ballot_id, &dims(&["gender", "age"]))
            .unwrap_err();
        assert!(matches!(err, Error::OverlappingQuery(_)));

        // Same exact shape is fine, repeatedly
        engine
            .query_results(&ledger, &ballot_id, &dims(&["gender"]))
            .unwrap();
        engine
            .query_results(&ledger, &ballot_id, &dims(&["gender"]))
            .unwrap();
    }

    #[test]
    fn test_subset_shape_rejected() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[60, 60]);
        let engine = engine();

        engine
            .query_results(&ledger, &ballot_id, &dims(&["gender", "age"]))
            .unwrap();
        let err = engine
            .query_results(&ledger, &ballot_id, &dims(&["age"]))
            .unwrap_err();
        assert!(matches!(err, Error::OverlappingQuery(_)));

        // Disjoint shape is not a differencing risk under this rule
        engine
            .query_results(&ledger, &ballot_id, &dims(&["region"]))
            .unwrap();
    }

    #[test]
    fn test_clear_ballot_resets_shape_history() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[60, 60]);
        let engine = engine();

        engine
            .query_results(&ledger, &ballot_id, &dims(&["gender"]))
            .unwrap();
        engine.clear_ballot(&ballot_id).unwrap();
        engine
            .query_results(&ledger, &ballot_id, &dims(&["gender", "age"]))
            .unwrap();
    }

    #[test]
    fn test_min_cells_suppresses_dimension() {
        let ballot_id = Uuid::new_v4();
        // 120 votes; gender has only two buckets, so even with both cells
        // >= k the dimension cannot publish min_cells = 3 cells
        let ledger = ledger_with(ballot_id, &[60, 60]);

        let view = engine()
            .query_results(&ledger, &ballot_id, &dims(&["gender", "age"]))
            .unwrap();

        let gender = &view.breakdowns["gender"];
        assert!(gender.values().all(|c| c.is_suppressed()));

        // Age has four buckets of 30 each
        let age = &view.breakdowns["age"];
        assert_eq!(age.len(), 4);
        assert!(age.values().all(|c| *c == CellValue::Count(30)));
    }

    #[test]
    fn test_repeated_identical_query_identical_result() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[39, 1]);
        let engine = engine();

        let first = engine.query_results(&ledger, &ballot_id, &[]).unwrap();
        let second = engine.query_results(&ledger, &ballot_id, &[]).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_suppressed_serializes_opaque() {
        let ballot_id = Uuid::new_v4();
        let ledger = ledger_with(ballot_id, &[39, 1]);

        let view = engine().query_results(&ledger, &ballot_id, &[]).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["options"]["opt-0"], serde_json::json!("suppressed"));
        assert_eq!(json["options"]["opt-1"], serde_json::json!("suppressed"));
        assert_eq!(json["total"], serde_json::json!(40));
    }

    #[test]
    fn test_security_event_counts_suppressed() {
        let chain = AuditChain::new();
        for _ in 0..35 {
            chain
                .append(AuditEventType::VoteAccepted, serde_json::json!({}))
                .unwrap();
        }
        for _ in 0..2 {
            chain
                .append(AuditEventType::DuplicateNullifier, serde_json::json!({}))
                .unwrap();
        }

        let counts = engine().security_event_counts(&chain.rows().unwrap());
        // 2 < k hides the duplicate count; hidden sum 2 < k pulls the other
        // cell down with it
        assert!(counts["duplicate_nullifier"].is_suppressed());
        assert!(counts["vote_accepted"].is_suppressed());
    }
}

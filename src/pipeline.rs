// 🚚 Run Orchestrator - foundational → groups → malware → tools → relationships
//
// Row-level problems are collected as diagnostics and the run moves on.
// Store, fetch and table failures stop the run; whatever was already
// persisted stays persisted (the store is per-record, not transactional).

use crate::config::{BundleMode, Config};
use crate::entities::{Bundle, EntityKind, MarkingRefs, StixObject};
use crate::error::{Error, Result, StoreError};
use crate::fetch::RecordFetcher;
use crate::identity::IdentifierDeriver;
use crate::normalizer::{CandidateEntity, RecordContext, RecordNormalizer};
use crate::reconciliation::{Reconciler, UpsertOutcome};
use crate::relationships::{EndpointIndex, RelationshipResolver};
use crate::report::{Diagnostic, RunReport, TableStats};
use crate::source::{Row, TableSource};
use crate::store::ObjectStore;
use crate::temporal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Bundle plus the report of the run that produced it
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub bundle: Bundle,
    pub report: RunReport,
}

// ============================================================================
// OUTPUT SET
// ============================================================================

/// Touched records in processing order, one slot per id
#[derive(Debug, Default)]
struct OutputSet {
    objects: Vec<Value>,
    positions: HashMap<String, usize>,
}

impl OutputSet {
    /// Returns false when the id was already present (the new value replaces it in place)
    fn push(&mut self, id: &str, value: Value) -> bool {
        match self.positions.get(id) {
            Some(&pos) => {
                self.objects[pos] = value;
                false
            }
            None => {
                self.positions.insert(id.to_string(), self.objects.len());
                self.objects.push(value);
                true
            }
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct RunOrchestrator<'a> {
    config: &'a Config,
    source: &'a dyn TableSource,
    fetcher: &'a dyn RecordFetcher,
    deriver: IdentifierDeriver,
    run_time: DateTime<Utc>,
}

/// Mutable state threaded through one run
struct RunState<'s, S: ObjectStore + ?Sized> {
    reconciler: Reconciler<'s, S>,
    output: OutputSet,
    report: RunReport,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(config: &'a Config, source: &'a dyn TableSource, fetcher: &'a dyn RecordFetcher) -> Self {
        RunOrchestrator {
            config,
            source,
            fetcher,
            deriver: IdentifierDeriver::new(config.namespace),
            run_time: temporal::run_time(),
        }
    }

    /// Builder pattern: pin the run clock
    pub fn with_run_time(mut self, run_time: DateTime<Utc>) -> Self {
        self.run_time = temporal::truncate_to_millis(run_time);
        self
    }

    pub fn run<S: ObjectStore + ?Sized>(&self, store: &mut S) -> Result<RunOutput> {
        info!(
            source = %self.source.describe(),
            store = %store.describe(),
            run_time = %temporal::format_timestamp(&self.run_time),
            "starting run"
        );

        // Prerequisites: nothing is read from the tables until both are in hand
        let marking = self.fetcher.fetch(&self.config.marking_definition_url)?;
        let identity = self.fetcher.fetch(&self.config.identity_url)?;

        let (objects, mut report) = {
            let mut state = RunState {
                reconciler: Reconciler::new(&mut *store, self.run_time),
                output: OutputSet::default(),
                report: RunReport::default(),
            };

            let context = self.ingest_foundational(&mut state, marking, identity)?;
            let normalizer = RecordNormalizer::new(self.deriver, &self.config.columns, &context);

            let groups = self.ingest_table(&mut state, &normalizer, EntityKind::Group, &self.config.tables.groups)?;

            let mut index = EndpointIndex::new();
            for (kind, table) in [
                (EntityKind::MalwareFamily, &self.config.tables.malware),
                (EntityKind::Tool, &self.config.tables.tools),
            ] {
                for (row, candidate) in self.ingest_table(&mut state, &normalizer, kind, table)? {
                    if candidate.external_key.is_none() {
                        debug!(table = %table, row = row.index, name = %candidate.name(), "no external key; not referenceable");
                    } else if !index.insert(&candidate) {
                        warn!(
                            table = %table,
                            row = row.index,
                            key = ?candidate.external_key,
                            "duplicate external key; keeping the first record"
                        );
                    }
                }
            }

            let resolver = RelationshipResolver::new(self.deriver, &self.config.columns, &context);
            self.ingest_relationships(&mut state, &resolver, &groups, &index)?;

            (state.output.objects, state.report)
        };

        let bundle = Bundle::new(objects);
        let contents = bundle.to_pretty_json().map_err(|e| {
            Error::Store(StoreError::Corrupt {
                id: bundle.id.clone(),
                reason: e.to_string(),
            })
        })?;
        let location = store.put_document(&self.config.bundle_name, &contents)?;

        report.bundle_objects = bundle.count();
        report.bundle_location = Some(location.clone());
        info!(location = %location, objects = bundle.count(), "bundle written");
        info!("{}", report.summary());

        Ok(RunOutput { bundle, report })
    }

    /// Always overwritten, always emitted
    fn ingest_foundational<S: ObjectStore + ?Sized>(
        &self,
        state: &mut RunState<'_, S>,
        marking: Value,
        identity: Value,
    ) -> Result<RecordContext> {
        let marking_id = state.reconciler.force_put(&marking)?;
        let identity_id = state.reconciler.force_put(&identity)?;
        info!(marking = %marking_id, identity = %identity_id, "foundational records stored");

        state.output.push(&marking_id, marking);
        state.output.push(&identity_id, identity);
        state.report.foundational = 2;

        Ok(RecordContext {
            created_by_ref: identity_id,
            markings: MarkingRefs {
                classification: marking_id,
                secondary: self.config.secondary_marking_ref.clone(),
            },
            run_time: self.run_time,
        })
    }

    /// Normalize and reconcile every row of one table; returns the rows that
    /// made it through, paired with their candidates, for later passes
    fn ingest_table<S: ObjectStore + ?Sized>(
        &self,
        state: &mut RunState<'_, S>,
        normalizer: &RecordNormalizer<'_>,
        kind: EntityKind,
        table: &str,
    ) -> Result<Vec<(Row, CandidateEntity)>> {
        let records = self.source.read_table(table)?;
        let mut stats = TableStats {
            table: table.to_string(),
            rows: records.len(),
            failed: 0,
        };
        let mut accepted = Vec::new();

        for (position, record) in records.into_iter().enumerate() {
            let candidate = record.and_then(|row| {
                let candidate = normalizer.normalize(kind, &row)?;
                Ok((row, candidate))
            });

            let (row, candidate) = match candidate {
                Ok(pair) => pair,
                Err(e) => {
                    error!(table = %table, row = position, error = %e, "skipping row");
                    state.report.diagnostics.push(Diagnostic::row_error(table, position, e));
                    stats.failed += 1;
                    continue;
                }
            };

            info!(table = %table, row = row.index, name = %candidate.name(), "processing {}", kind.label());
            self.reconcile(state, table, row.index, candidate.object.clone())?;
            accepted.push((row, candidate));
        }

        state.report.tables.push(stats);
        Ok(accepted)
    }

    fn ingest_relationships<S: ObjectStore + ?Sized>(
        &self,
        state: &mut RunState<'_, S>,
        resolver: &RelationshipResolver<'_>,
        groups: &[(Row, CandidateEntity)],
        index: &EndpointIndex,
    ) -> Result<()> {
        let table = &self.config.tables.groups;

        for (row, group) in groups {
            let resolution = resolver.resolve(group, row, index);

            for problem in resolution.diagnostics {
                warn!(table = %table, row = row.index, error = %problem, "skipping relationship");
                state.report.diagnostics.push(Diagnostic::row_error(table, row.index, problem));
            }

            for relationship in resolution.relationships {
                state.report.relationships += 1;
                self.reconcile(state, table, row.index, relationship)?;
            }
        }

        Ok(())
    }

    /// Upsert one record and route the outcome into the output set
    fn reconcile<S: ObjectStore + ?Sized>(
        &self,
        state: &mut RunState<'_, S>,
        table: &str,
        row: usize,
        candidate: StixObject,
    ) -> Result<()> {
        let id = candidate.id.clone();
        let outcome = state.reconciler.upsert(candidate)?;
        state.report.record(&outcome);
        debug!(id = %id, outcome = outcome.label(), "reconciled");

        let emitted = match outcome {
            UpsertOutcome::Inserted(object) | UpsertOutcome::Updated(object) => {
                Some(object.to_value().map_err(|e| {
                    Error::Store(StoreError::Corrupt {
                        id: id.clone(),
                        reason: e.to_string(),
                    })
                })?)
            }
            UpsertOutcome::Unchanged => match self.config.bundle_mode {
                BundleMode::Full => state.reconciler.get(&id)?,
                BundleMode::Delta => None,
            },
        };

        if let Some(value) = emitted {
            if !state.output.push(&id, value) {
                error!(table = %table, row = row, id = %id, "record emitted twice in one run");
                state.report.diagnostics.push(Diagnostic::duplicate(table, row, &id));
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableNames;
    use crate::fetch::StaticFetcher;
    use crate::source::MemorySource;
    use crate::store::{FileSystemStore, SqliteStore};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    const MARKING_ID: &str = "marking-definition--221c1248-e62e-56e5-bbfb-7d5efc477271";
    const IDENTITY_ID: &str = "identity--221c1248-e62e-56e5-bbfb-7d5efc477271";

    fn fetcher(config: &Config) -> StaticFetcher {
        StaticFetcher::new()
            .with(
                &config.marking_definition_url,
                json!({
                    "type": "marking-definition",
                    "spec_version": "2.1",
                    "id": MARKING_ID,
                    "created": "2020-01-01T00:00:00.000Z",
                    "definition_type": "statement",
                    "definition": {"statement": "Ransomware KB"}
                }),
            )
            .with(
                &config.identity_url,
                json!({
                    "type": "identity",
                    "spec_version": "2.1",
                    "id": IDENTITY_ID,
                    "created": "2020-01-01T00:00:00.000Z",
                    "modified": "2020-01-01T00:00:00.000Z",
                    "name": "Ransomware KB",
                    "identity_class": "organization"
                }),
            )
    }

    fn dataset(group_description: &str, tools_used: &str) -> MemorySource {
        let tables = TableNames::default();
        MemorySource::new()
            .with_table(
                &tables.groups,
                vec![Row::new(0)
                    .with("name", "Wolf Team")
                    .with("description", group_description)
                    .with("aliases", "Lupus\n\n")
                    .with("ransomware_used", "M001")
                    .with("tools_used", tools_used)],
            )
            .with_table(
                &tables.malware,
                vec![Row::new(0)
                    .with("name", "Locker")
                    .with("external_id", "M001")
                    .with("platform.windows", "yes")],
            )
            .with_table(&tables.tools, vec![])
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn run(config: &Config, source: &MemorySource, store: &mut SqliteStore, at: DateTime<Utc>) -> RunOutput {
        let fetcher = fetcher(config);
        RunOrchestrator::new(config, source, &fetcher)
            .with_run_time(at)
            .run(store)
            .unwrap()
    }

    fn non_foundational(bundle: &Bundle) -> Vec<&Value> {
        bundle
            .objects
            .iter()
            .filter(|o| {
                let t = o["type"].as_str().unwrap_or_default();
                t != "marking-definition" && t != "identity"
            })
            .collect()
    }

    #[test]
    fn test_end_to_end_wolf_team_uses_locker() {
        let config = Config::default();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let output = run(&config, &dataset("Ransomware crew", ""), &mut store, t0());
        let bundle = &output.bundle;

        // Foundational records lead the bundle
        assert_eq!(bundle.objects[0]["id"], MARKING_ID);
        assert_eq!(bundle.objects[1]["id"], IDENTITY_ID);

        let objects = non_foundational(bundle);
        assert_eq!(objects.len(), 3);

        let group = bundle.of_type("intrusion-set").next().unwrap();
        let malware = bundle.of_type("malware").next().unwrap();
        let relationship = bundle.of_type("relationship").next().unwrap();

        assert_eq!(group["name"], "Wolf Team");
        assert_eq!(malware["name"], "Locker");
        assert_eq!(relationship["relationship_type"], "uses");
        assert_eq!(relationship["source_ref"], group["id"]);
        assert_eq!(relationship["target_ref"], malware["id"]);
        assert_eq!(group["created_by_ref"], IDENTITY_ID);
        assert_eq!(
            group["object_marking_refs"],
            json!([MARKING_ID, "marking-definition--94868c89-83c2-464b-929b-a1a8aa3c8487"])
        );

        assert_eq!(output.report.inserted, 3);
        assert_eq!(output.report.relationships, 1);
        assert!(output.report.diagnostics.is_empty());
        assert!(store.get_document(&config.bundle_name).unwrap().is_some());
    }

    #[test]
    fn test_second_run_over_same_data_touches_nothing() {
        let config = Config::default();
        let source = dataset("Ransomware crew", "");
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = run(&config, &source, &mut store, t0());
        let group_id = first.bundle.of_type("intrusion-set").next().unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let second = run(&config, &source, &mut store, t0() + Duration::days(1));
        let third = run(&config, &source, &mut store, t0() + Duration::days(2));

        assert_eq!(second.report.unchanged, 3);
        assert_eq!(second.report.touched(), 0);
        assert!(non_foundational(&second.bundle).is_empty());
        assert_eq!(second.bundle.ids(), third.bundle.ids());

        let stored = store.get(&group_id).unwrap().unwrap();
        assert_eq!(stored["modified"], "2024-03-01T09:00:00.000Z");
        assert_eq!(store.versions(&group_id).unwrap().len(), 1);
    }

    #[test]
    fn test_changed_description_creates_new_revision() {
        let config = Config::default();
        let mut store = SqliteStore::open_in_memory().unwrap();

        run(&config, &dataset("Ransomware crew", ""), &mut store, t0());
        let t1 = t0() + Duration::days(7);
        let output = run(&config, &dataset("Ransomware crew, now extorting", ""), &mut store, t1);

        assert_eq!(output.report.updated, 1);
        assert_eq!(output.report.unchanged, 2);

        let objects = non_foundational(&output.bundle);
        assert_eq!(objects.len(), 1);
        let group = StixObject::from_value(objects[0].clone()).unwrap();
        assert_eq!(group.created, t0());
        assert_eq!(group.modified, t1);
        assert_eq!(group.description.as_deref(), Some("Ransomware crew, now extorting"));
    }

    #[test]
    fn test_unknown_tool_key_is_a_diagnostic_not_a_crash() {
        let config = Config::default();
        let tables = TableNames::default();
        let source = dataset("Ransomware crew", "T001, T404").with_table(
            &tables.tools,
            vec![Row::new(0).with("name", "Rclone").with("external_id", "T001")],
        );
        let mut store = SqliteStore::open_in_memory().unwrap();

        let output = run(&config, &source, &mut store, t0());

        let relationships: Vec<_> = output.bundle.of_type("relationship").collect();
        assert_eq!(relationships.len(), 2); // Locker + Rclone
        assert_eq!(output.report.unresolved_references(), 1);
        let diagnostic = output
            .report
            .diagnostics
            .iter()
            .find(|d| d.is_unresolved_reference())
            .unwrap();
        assert_eq!(diagnostic.table, tables.groups);
        assert!(diagnostic.to_string().contains("T404"));
    }

    #[test]
    fn test_bad_rows_are_skipped_and_counted() {
        let config = Config::default();
        let tables = TableNames::default();
        let source = MemorySource::new()
            .with_table(&tables.groups, vec![Row::new(0).with("name", "  ")])
            .with_table(
                &tables.malware,
                vec![
                    Row::new(0).with("description", "nameless").with("platform.windows", "yes"),
                    Row::new(1).with("name", "Fine"),
                ],
            )
            .with_table(&tables.tools, vec![]);
        let mut store = SqliteStore::open_in_memory().unwrap();

        let output = run(&config, &source, &mut store, t0());

        assert_eq!(output.report.diagnostics.len(), 2);
        assert_eq!(output.report.inserted, 1);
        assert_eq!(output.report.tables[0].failed, 1);
        assert_eq!(output.report.tables[1].rows, 2);
        assert_eq!(output.report.tables[1].failed, 1);
        assert_eq!(output.report.diagnostics[1].row, 0);
    }

    #[test]
    fn test_free_text_platform_keeps_entity_and_edge() {
        let config = Config::default();
        let tables = TableNames::default();
        let source = dataset("Ransomware crew", "").with_table(
            &tables.malware,
            vec![Row::new(0)
                .with("name", "Locker")
                .with("external_id", "M001")
                .with("platform.windows", "Windows 10")],
        );
        let mut store = SqliteStore::open_in_memory().unwrap();

        let output = run(&config, &source, &mut store, t0());

        let malware = output.bundle.of_type("malware").next().unwrap();
        assert_eq!(malware["x_mitre_platforms"], json!(["windows"]));
        assert_eq!(output.bundle.of_type("relationship").count(), 1);
        assert!(output.report.diagnostics.is_empty());
    }

    #[test]
    fn test_empty_dataset_still_completes() {
        let config = Config::default();
        let tables = TableNames::default();
        let source = MemorySource::new()
            .with_table(&tables.groups, vec![])
            .with_table(&tables.malware, vec![])
            .with_table(&tables.tools, vec![]);
        let mut store = SqliteStore::open_in_memory().unwrap();

        let output = run(&config, &source, &mut store, t0());

        assert_eq!(output.bundle.count(), 2);
        assert_eq!(output.report.touched(), 0);
    }

    #[test]
    fn test_duplicate_names_keep_one_slot() {
        let config = Config::default();
        let tables = TableNames::default();
        let source = MemorySource::new()
            .with_table(&tables.groups, vec![])
            .with_table(&tables.malware, vec![])
            .with_table(
                &tables.tools,
                vec![
                    Row::new(0).with("name", "PsExec").with("description", "v1"),
                    Row::new(1).with("name", "PsExec").with("description", "v2"),
                ],
            );
        let mut store = SqliteStore::open_in_memory().unwrap();

        let output = run(&config, &source, &mut store, t0());

        let tools: Vec<_> = output.bundle.of_type("tool").collect();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["description"], "v2");
        assert!(matches!(
            output.report.diagnostics[0].problem,
            crate::report::Problem::DuplicateEntity { .. }
        ));
    }

    #[test]
    fn test_full_mode_emits_unchanged_records() {
        let config = Config::default().with_bundle_mode(BundleMode::Full);
        let source = dataset("Ransomware crew", "");
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = run(&config, &source, &mut store, t0());
        let second = run(&config, &source, &mut store, t0() + Duration::days(1));

        assert_eq!(second.report.unchanged, 3);
        assert_eq!(first.bundle.ids(), second.bundle.ids());
        assert_eq!(first.bundle.objects, second.bundle.objects);
    }

    #[test]
    fn test_fetch_failure_aborts_before_tables() {
        let config = Config::default();
        // Tables are deliberately missing: the fetch error must surface first
        let source = MemorySource::new();
        let fetcher = StaticFetcher::new();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let err = RunOrchestrator::new(&config, &source, &fetcher)
            .run(&mut store)
            .unwrap_err();

        assert!(matches!(err, Error::FoundationalFetch { .. }));
        assert_eq!(store.count_objects().unwrap(), 0);
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let config = Config::default();
        let source = MemorySource::new().with_table(&config.tables.groups, vec![]);
        let mut store = SqliteStore::open_in_memory().unwrap();
        let fetcher = fetcher(&config);

        let err = RunOrchestrator::new(&config, &source, &fetcher)
            .run(&mut store)
            .unwrap_err();

        assert!(matches!(err, Error::TableUnavailable { .. }));
    }

    /// Sqlite store that refuses generated records once the foundational writes are done
    struct FailingStore {
        inner: SqliteStore,
    }

    impl ObjectStore for FailingStore {
        fn get(&self, id: &str) -> std::result::Result<Option<Value>, StoreError> {
            self.inner.get(id)
        }

        fn put(&mut self, id: &str, _object: &Value) -> std::result::Result<(), StoreError> {
            let disk_full = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
            Err(StoreError::unavailable("put", id, disk_full))
        }

        fn replace(&mut self, id: &str, object: &Value) -> std::result::Result<(), StoreError> {
            self.inner.replace(id, object)
        }

        fn put_document(&mut self, name: &str, contents: &str) -> std::result::Result<String, StoreError> {
            self.inner.put_document(name, contents)
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn test_store_failure_aborts_without_bundle() {
        let config = Config::default();
        let source = dataset("Ransomware crew", "");
        let fetcher = fetcher(&config);
        let mut store = FailingStore {
            inner: SqliteStore::open_in_memory().unwrap(),
        };

        let err = RunOrchestrator::new(&config, &source, &fetcher)
            .with_run_time(t0())
            .run(&mut store)
            .unwrap_err();

        assert!(matches!(err, Error::Store(StoreError::Unavailable { .. })));
        assert!(store.inner.get_document(&config.bundle_name).unwrap().is_none());
        assert_eq!(store.inner.count_objects().unwrap(), 2);
    }

    #[test]
    fn test_filesystem_store_round() {
        let config = Config::default();
        let source = dataset("Ransomware crew", "");
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSystemStore::open(dir.path()).unwrap();
        let fetcher = fetcher(&config);

        let output = RunOrchestrator::new(&config, &source, &fetcher)
            .with_run_time(t0())
            .run(&mut store)
            .unwrap();
        let again = RunOrchestrator::new(&config, &source, &fetcher)
            .with_run_time(t0() + Duration::hours(1))
            .run(&mut store)
            .unwrap();

        assert_eq!(output.report.inserted, 3);
        assert_eq!(again.report.unchanged, 3);
        assert!(dir.path().join(&config.bundle_name).exists());
        assert!(dir.path().join("marking-definition").join(format!("{}.json", MARKING_ID)).exists());
    }
}

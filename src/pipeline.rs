use crate::classifier::RequestClassifier;
use crate::config::Config;
use crate::db::{BatchWriter, FlushStats, Watermark};
use crate::enrichment::{CountryLookup, EnrichmentCache, UserAgentLookup};
use crate::error::{Error, Result};
use crate::models::{IdentityKey, LogEntry};
use crate::record::RecordBuilder;
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{debug, info, trace};

/// Counters of one ingestion run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries read from the input.
    pub entries: usize,
    /// Records that passed classification and were buffered.
    pub processed: usize,
    pub older_than_watermark: usize,
    pub not_redirect: usize,
    pub local_host: usize,
    pub unclassified: usize,
    /// Repeats of an identity key within one flush cycle.
    pub repeated: usize,
    pub stored: FlushStats,
    /// Input consumption stopped because `max_records` was reached.
    pub capped: bool,
}

pub struct IngestionPipeline<'c, C, U> {
    config: &'c Config,
    classifier: RequestClassifier,
    enrichment: EnrichmentCache<C, U>,
}

impl<'c, C: CountryLookup, U: UserAgentLookup> IngestionPipeline<'c, C, U> {
    pub fn new(config: &'c Config, enrichment: EnrichmentCache<C, U>) -> Self {
        IngestionPipeline {
            config,
            classifier: RequestClassifier::new(),
            enrichment,
        }
    }

    pub fn enrichment(&self) -> &EnrichmentCache<C, U> {
        &self.enrichment
    }

    /// The limit is checked before each entry is pulled, so a limit of zero
    /// reads no input at all.
    fn cap_reached(&self, processed: usize) -> bool {
        matches!(self.config.max_records, Some(max) if processed >= max)
    }

    /// Ingests `entries` into the store behind `con`.
    ///
    /// Errors yielded by `entries` abort the run, records already flushed
    /// stay stored. Everything else that can go wrong with a single entry
    /// only skips that entry.
    pub fn run<I>(&mut self, con: &mut Connection, entries: I) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<LogEntry, Error>>,
    {
        let batch_size = self.config.batch_size.max(1);
        let watermark = Watermark::load(con)?;
        info!(%watermark, "newest stored record");

        let mut writer = BatchWriter::new(con);
        let mut emitted: HashSet<IdentityKey> = HashSet::new();
        let mut summary = RunSummary::default();

        let mut entries = entries.into_iter();
        loop {
            if self.cap_reached(summary.processed) {
                info!(processed = summary.processed, "record limit reached, stopping");
                summary.capped = true;
                break;
            }
            let entry = match entries.next() {
                Some(entry) => entry?,
                None => break,
            };
            summary.entries += 1;
            if summary.entries % batch_size == 0 {
                info!("Parsed {} rows", summary.entries);
            }

            if watermark.is_behind(&entry.timestamp) {
                summary.older_than_watermark += 1;
                continue;
            }
            if !self.config.is_redirect(entry.status) {
                summary.not_redirect += 1;
                continue;
            }
            if self.config.is_local_host(&entry.remote_host) {
                trace!(host = %entry.remote_host, forwarded_for = ?entry.forwarded_for, "local request");
                summary.local_host += 1;
                continue;
            }
            let classification = match self.classifier.classify(&entry.request_line) {
                Some(c) => c,
                None => {
                    trace!(request = %entry.request_line, "no identifier in request");
                    summary.unclassified += 1;
                    continue;
                }
            };

            let record = RecordBuilder::build(&entry, classification, &mut self.enrichment)?;
            if !emitted.insert(record.id.clone()) {
                debug!(id = %record.id, "repeated event in this batch");
                summary.repeated += 1;
                continue;
            }
            writer.add(record);
            summary.processed += 1;

            if summary.processed % batch_size == 0 {
                info!("Processed {} rows", summary.processed);
                summary.stored += writer.flush()?;
                emitted.clear();
            }
        }

        debug!(pending = writer.len(), "final flush");
        summary.stored += writer.flush()?;
        info!(
            processed = summary.processed,
            inserted = summary.stored.inserted,
            duplicates = summary.stored.duplicates,
            "Done."
        );
        Ok(summary)
    }
}

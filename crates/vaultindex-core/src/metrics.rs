//! Ingest metrics.
//!
//! Every counter is an OpenTelemetry instrument named `vaultindex.*`, so any
//! installed meter provider can export it over OTLP or Prometheus. Local
//! tallies are kept alongside for the end-of-run summary, which has to work
//! even when no provider is installed.

use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::{
    global,
    metrics::{Counter, Meter},
    KeyValue,
};
use serde::Serialize;

use crate::events::EventKind;

/// Instrumentation scope of every vaultindex instrument.
pub const METER_NAME: &str = "vaultindex";

/// Central metrics handle for the ingest pipeline.
pub struct IngestMetrics {
    blocks_processed: Counter<u64>,
    events_buffered: Counter<u64>,
    decode_failures: Counter<u64>,
    unknown_events: Counter<u64>,
    rows_inserted: Counter<u64>,
    duplicates_skipped: Counter<u64>,
    reconnections: Counter<u64>,
    tally: Tally,
}

#[derive(Default)]
struct Tally {
    blocks_processed: AtomicU64,
    events_buffered: AtomicU64,
    decode_failures: AtomicU64,
    unknown_events: AtomicU64,
    rows_inserted: AtomicU64,
    duplicates_skipped: AtomicU64,
    reconnections: AtomicU64,
}

/// Point-in-time copy of the local tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub blocks_processed: u64,
    pub events_buffered: u64,
    pub decode_failures: u64,
    pub unknown_events: u64,
    pub rows_inserted: u64,
    pub duplicates_skipped: u64,
    pub reconnections: u64,
}

impl IngestMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            blocks_processed: meter
                .u64_counter("vaultindex.blocks_processed")
                .with_description("Blocks fully persisted and reflected in the watermark")
                .build(),
            events_buffered: meter
                .u64_counter("vaultindex.events_buffered")
                .with_description("Decoded events appended to an ingestion buffer")
                .build(),
            decode_failures: meter
                .u64_counter("vaultindex.decode_failures")
                .with_description("Recognised events whose payload failed to decode")
                .build(),
            unknown_events: meter
                .u64_counter("vaultindex.unknown_events")
                .with_description("Events whose selector matched no known vault event")
                .build(),
            rows_inserted: meter
                .u64_counter("vaultindex.rows_inserted")
                .with_description("Rows written by bulk inserts")
                .build(),
            duplicates_skipped: meter
                .u64_counter("vaultindex.duplicates_skipped")
                .with_description("Rows skipped by bulk inserts because the key already existed")
                .build(),
            reconnections: meter
                .u64_counter("vaultindex.reconnections")
                .with_description("Reconnects after a transient stream failure")
                .build(),
            tally: Tally::default(),
        }
    }

    /// Metrics recorded on the globally installed meter provider.
    pub fn from_global() -> Self {
        Self::new(&global::meter(METER_NAME))
    }

    pub fn block_processed(&self) {
        self.blocks_processed.add(1, &[]);
        self.tally.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_buffered(&self, kind: EventKind) {
        self.events_buffered.add(1, &[kind_attr(kind)]);
        self.tally.events_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self, kind: EventKind) {
        self.decode_failures.add(1, &[kind_attr(kind)]);
        self.tally.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_event(&self) {
        self.unknown_events.add(1, &[]);
        self.tally.unknown_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self, code: u32) {
        self.reconnections
            .add(1, &[KeyValue::new("code", i64::from(code))]);
        self.tally.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one bulk insert.
    pub fn rows_flushed(&self, kind: EventKind, submitted: u64, inserted: u64) {
        let duplicates = submitted.saturating_sub(inserted);
        let attrs = [kind_attr(kind)];
        self.rows_inserted.add(inserted, &attrs);
        self.duplicates_skipped.add(duplicates, &attrs);
        self.tally.rows_inserted.fetch_add(inserted, Ordering::Relaxed);
        self.tally
            .duplicates_skipped
            .fetch_add(duplicates, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let t = &self.tally;
        MetricsSnapshot {
            blocks_processed: t.blocks_processed.load(Ordering::Relaxed),
            events_buffered: t.events_buffered.load(Ordering::Relaxed),
            decode_failures: t.decode_failures.load(Ordering::Relaxed),
            unknown_events: t.unknown_events.load(Ordering::Relaxed),
            rows_inserted: t.rows_inserted.load(Ordering::Relaxed),
            duplicates_skipped: t.duplicates_skipped.load(Ordering::Relaxed),
            reconnections: t.reconnections.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for IngestMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IngestMetrics").field(&self.snapshot()).finish()
    }
}

fn kind_attr(kind: EventKind) -> KeyValue {
    KeyValue::new("event", kind.name())
}

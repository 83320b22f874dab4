//! Stream orchestrator.
//!
//! Drives every selected stream, strictly in sequence:
//!
//! ```text
//! stream ─▶ site ─▶ sub-type ─▶ window ─▶ page ─▶ transform ─▶ filter ─▶ emit
//!                                          └────────── bookmark after every page
//! ```
//!
//! One (stream, site, sub-type) key is fully drained before the next one
//! starts, so the state snapshot has a single writer and at most one
//! fetched-but-unbookmarked page exists at any time. Fatal errors propagate
//! unchanged; the last persisted snapshot is the resume point.

use anyhow::{Context, Result};
use tracing::Instrument;

use crate::catalog::{Catalog, CatalogEntry};
use crate::client::Transport;
use crate::filter::{validate_primary_key, BookmarkTracker};
use crate::models::{Clock, SyncSettings};
use crate::paginate::{fetch_full_table, WindowPager};
use crate::sink::Sink;
use crate::state::{format_bookmark, parse_datetime, State, WatermarkStore};
use crate::streams::{find_stream, StreamDescriptor, StreamKind};
use crate::window::WindowPlanner;

/// Everything a sync run needs, passed explicitly.
pub struct SyncContext<'a> {
    pub transport: &'a dyn Transport,
    pub sink: &'a mut dyn Sink,
    pub clock: &'a dyn Clock,
    pub settings: &'a SyncSettings,
}

/// Totals for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub streams: usize,
    pub records: usize,
    pub pages: usize,
    pub skipped_sites: usize,
}

/// Run every selected stream and return the final state snapshot.
pub async fn run_sync(ctx: &mut SyncContext<'_>, catalog: &Catalog, state: State) -> Result<(State, SyncSummary)> {
    let mut store = WatermarkStore::new(state);
    let mut summary = SyncSummary::default();

    let resume = store.state().currently_syncing().map(str::to_string);
    if let Some(stream) = &resume {
        tracing::info!(stream = %stream, "resuming interrupted stream first");
    }

    for entry in catalog.selected_streams(resume.as_deref()) {
        let Some(stream) = find_stream(&entry.tap_stream_id) else {
            tracing::warn!(stream = %entry.tap_stream_id, "unknown stream in catalog, skipping");
            continue;
        };

        tracing::info!(stream = stream.id, "starting sync");
        store
            .set_currently_syncing(ctx.sink, Some(stream.id))
            .await?;

        let before = summary.records;
        sync_stream(ctx, &mut store, entry, stream, &mut summary)
            .await
            .with_context(|| format!("sync failed for stream '{}'", stream.id))?;

        store.set_currently_syncing(ctx.sink, None).await?;
        summary.streams += 1;
        tracing::info!(
            stream = stream.id,
            records = summary.records - before,
            "finished sync"
        );
    }

    Ok((store.into_state(), summary))
}

async fn sync_stream(
    ctx: &mut SyncContext<'_>,
    store: &mut WatermarkStore,
    entry: &CatalogEntry,
    stream: &StreamDescriptor,
    summary: &mut SyncSummary,
) -> Result<()> {
    let selection = entry.selection();
    ctx.sink
        .write_schema(
            stream.id,
            &entry.selected_schema(),
            &selection.key_properties,
            selection.replication_key.as_deref(),
        )
        .await?;

    match stream.kind {
        StreamKind::FullTable => sync_full_table(ctx, stream, &selection.key_properties, summary).await,
        StreamKind::IncrementalFixed | StreamKind::IncrementalDynamic => {
            let dimensions = requested_dimensions(stream, &selection.fields);
            let replication_key = replication_key(stream)?;
            let keys = &selection.key_properties;
            let settings = ctx.settings;

            for site in &settings.sites {
                for sub_type in stream.sub_types {
                    sync_report_key(
                        ctx,
                        store,
                        stream,
                        site,
                        sub_type,
                        &dimensions,
                        keys,
                        replication_key,
                        summary,
                    )
                    .await?;
                }
            }
            Ok(())
        }
    }
}

/// Replication key declared by an incremental stream.
pub fn replication_key(stream: &StreamDescriptor) -> Result<&'static str> {
    stream
        .replication_key
        .with_context(|| format!("stream '{}' declares no replication key", stream.id))
}

/// Dimensions to request: fixed streams use their own list; the dynamic
/// stream uses `date` plus every selected optional dimension.
pub fn requested_dimensions(stream: &StreamDescriptor, selected_fields: &[String]) -> Vec<String> {
    match stream.kind {
        StreamKind::IncrementalDynamic => stream
            .dimensions
            .iter()
            .filter(|d| **d == "date" || selected_fields.iter().any(|f| f == *d))
            .map(|d| d.to_string())
            .collect(),
        _ => stream.dimensions.iter().map(|d| d.to_string()).collect(),
    }
}

async fn sync_full_table(
    ctx: &mut SyncContext<'_>,
    stream: &StreamDescriptor,
    keys: &[String],
    summary: &mut SyncSummary,
) -> Result<()> {
    let settings = ctx.settings;
    for site in &settings.sites {
        if !stream.supports_site(site) {
            tracing::info!(stream = stream.id, site = %site, "skipping domain property");
            summary.skipped_sites += 1;
            continue;
        }

        let records = fetch_full_table(ctx.transport, stream, site).await?;
        let extracted = ctx.clock.now();
        summary.pages += 1;
        for record in &records {
            validate_primary_key(stream.id, record, keys)?;
            ctx.sink.write_record(stream.id, record, extracted).await?;
        }
        summary.records += records.len();
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn sync_report_key(
    ctx: &mut SyncContext<'_>,
    store: &mut WatermarkStore,
    stream: &StreamDescriptor,
    site: &str,
    sub_type: &str,
    dimensions: &[String],
    keys: &[String],
    replication_key: &str,
    summary: &mut SyncSummary,
) -> Result<()> {
    let default = format_bookmark(ctx.settings.start_date);
    let stored = store.get(stream.id, site, sub_type, &default);
    let watermark = parse_datetime(&stored)
        .with_context(|| format!("invalid bookmark for {}/{}/{}: '{}'", stream.id, site, sub_type, stored))?;

    let planner = WindowPlanner::new(
        ctx.clock.today(),
        ctx.settings.attribution_days,
        ctx.settings.window_size_days,
    );

    let mut last_bookmark = stored;
    for window in planner.windows(watermark.date_naive()) {
        // Floor is the watermark in force when this window begins.
        let floor = parse_datetime(&last_bookmark)?;
        let mut tracker = BookmarkTracker::new(floor);

        let span = tracing::info_span!(
            "window",
            stream = stream.id,
            site = %site,
            sub_type,
            start = %window.start,
            end = %window.end
        );

        async {
            tracing::debug!("fetching window");
            let mut pager = WindowPager::new(stream, site, sub_type, window, dimensions);
            while let Some(page) = pager.next_page(ctx.transport).await? {
                let extracted = ctx.clock.now();
                let fetched = page.records.len();
                let admitted = tracker.filter_page(stream.id, keys, replication_key, page.records)?;
                for record in &admitted {
                    ctx.sink.write_record(stream.id, record, extracted).await?;
                }

                last_bookmark = tracker.bookmark();
                store
                    .set(ctx.sink, stream.id, site, sub_type, &last_bookmark)
                    .await?;

                summary.pages += 1;
                summary.records += admitted.len();
                tracing::debug!(
                    start_row = page.start_row,
                    fetched,
                    admitted = admitted.len(),
                    bookmark = %last_bookmark,
                    "page done"
                );
            }
            Ok::<(), anyhow::Error>(())
        }
        .instrument(span)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::find_stream;

    fn fields(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dynamic_dimensions_follow_selection() {
        let custom = find_stream("performance_report_custom").unwrap();
        let dims = requested_dimensions(custom, &fields(&["site_url", "country", "query", "clicks"]));
        assert_eq!(dims, fields(&["date", "country", "query"]));

        let dims = requested_dimensions(custom, &fields(&["site_url"]));
        assert_eq!(dims, fields(&["date"]));
    }

    #[test]
    fn replication_key_comes_from_descriptor() {
        let date = find_stream("performance_report_date").unwrap();
        assert_eq!(replication_key(date).unwrap(), "date");

        let sites = find_stream("sites").unwrap();
        let err = replication_key(sites).unwrap_err();
        assert!(err.to_string().contains("sites"), "{}", err);
    }

    #[test]
    fn fixed_dimensions_ignore_selection() {
        let page = find_stream("performance_report_page").unwrap();
        assert_eq!(requested_dimensions(page, &[]), fields(&["date", "page"]));
    }
}

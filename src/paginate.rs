//! Request shaping and the page fetcher.
//!
//! Report streams page through a window by placing `startRow`/`rowLimit` in
//! the POST body. A page is the last one for its window when it yields fewer
//! records than the row cap, which includes empty pages and responses with
//! no `rows` key at all.

use anyhow::Result;
use serde_json::{json, Value};

use crate::client::Transport;
use crate::models::Record;
use crate::streams::{ApiMethod, StreamDescriptor, StreamKind};
use crate::transform::transform_page;
use crate::window::Window;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Sub-types that cannot be grouped by device.
fn drops_device(sub_type: &str) -> bool {
    sub_type == "discover"
}

/// Sub-types that reject the query dimension and explicit aggregation on the
/// dynamic-dimension stream.
fn is_discover_like(sub_type: &str) -> bool {
    matches!(sub_type, "discover" | "googleNews")
}

/// Dimension list and aggregation type actually sent for a sub-type.
pub fn adjusted_dimensions(
    stream: &StreamDescriptor,
    sub_type: &str,
    dimensions: &[String],
) -> (Vec<String>, Option<&'static str>) {
    let mut dims: Vec<String> = dimensions.to_vec();
    let mut aggregation = stream.aggregation_type;

    if drops_device(sub_type) {
        dims.retain(|d| d != "device");
    }
    if stream.kind == StreamKind::IncrementalDynamic && is_discover_like(sub_type) {
        dims.retain(|d| d != "query");
        aggregation = Some("auto");
    }
    (dims, aggregation)
}

/// Build one report request body, returning it with the dimension list the
/// response `keys` will follow.
pub fn build_request_body(
    stream: &StreamDescriptor,
    sub_type: &str,
    window: &Window,
    dimensions: &[String],
    start_row: usize,
) -> (Value, Vec<String>) {
    let (dims, aggregation) = adjusted_dimensions(stream, sub_type, dimensions);

    let mut body = json!({
        "type": sub_type,
        "startDate": window.start.format(DATE_FORMAT).to_string(),
        "endDate": window.last_day().format(DATE_FORMAT).to_string(),
        "dimensions": dims,
        "startRow": start_row,
        "rowLimit": stream.row_limit,
    });
    if let Some(agg) = aggregation {
        body["aggregationType"] = json!(agg);
    }
    (body, dims)
}

/// One transformed page.
#[derive(Debug)]
pub struct FetchedPage {
    pub start_row: usize,
    pub records: Vec<Record>,
    pub is_last: bool,
}

/// Pages through one (site, sub-type, window) of a report stream.
pub struct WindowPager<'a> {
    stream: &'a StreamDescriptor,
    site: &'a str,
    sub_type: &'a str,
    window: Window,
    dimensions: &'a [String],
    path: String,
    offset: usize,
    finished: bool,
}

impl<'a> WindowPager<'a> {
    pub fn new(
        stream: &'a StreamDescriptor,
        site: &'a str,
        sub_type: &'a str,
        window: Window,
        dimensions: &'a [String],
    ) -> Self {
        Self {
            stream,
            site,
            sub_type,
            window,
            dimensions,
            path: stream.path_for(site),
            offset: 0,
            finished: false,
        }
    }

    /// Fetch and transform the next page, or `None` once the last page has
    /// been returned.
    pub async fn next_page(&mut self, transport: &dyn Transport) -> Result<Option<FetchedPage>> {
        if self.finished {
            return Ok(None);
        }

        let (body, dims) = build_request_body(
            self.stream,
            self.sub_type,
            &self.window,
            self.dimensions,
            self.offset,
        );
        let raw = transport.post(&self.path, &body).await?;
        let records = transform_page(&raw, self.stream, self.site, self.sub_type, &dims);

        let start_row = self.offset;
        let is_last = records.len() < self.stream.row_limit;
        self.offset += self.stream.row_limit;
        self.finished = is_last;

        Ok(Some(FetchedPage {
            start_row,
            records,
            is_last,
        }))
    }
}

/// Fetch a full-table stream for one site in a single call.
pub async fn fetch_full_table(
    transport: &dyn Transport,
    stream: &StreamDescriptor,
    site: &str,
) -> Result<Vec<Record>> {
    let path = stream.path_for(site);
    let raw = match stream.method {
        ApiMethod::Get => transport.get(&path).await?,
        ApiMethod::Post => transport.post(&path, &json!({})).await?,
    };
    Ok(transform_page(&raw, stream, site, "", &[]))
}

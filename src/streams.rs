//! The closed set of streams this tap extracts.
//!
//! Streams are tagged data rather than a trait hierarchy: the transform,
//! fetch and filter stages branch on [`StreamKind`].
//!
//! | Stream | Kind | Endpoint |
//! |--------|------|----------|
//! | `sites` | full-table | `GET sites/{site}` |
//! | `sitemaps` | full-table | `GET sites/{site}/sitemaps` |
//! | `performance_report_*` | incremental | `POST sites/{site}/searchAnalytics/query` |

/// Replication shape of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Every run re-extracts everything; no bookmarks.
    FullTable,
    /// Report stream with a fixed dimension list.
    IncrementalFixed,
    /// Report stream whose dimensions follow the catalog field selection.
    IncrementalDynamic,
}

impl StreamKind {
    pub fn is_incremental(self) -> bool {
        !matches!(self, StreamKind::FullTable)
    }

    pub fn replication_method(self) -> &'static str {
        match self {
            StreamKind::FullTable => "FULL_TABLE",
            _ => "INCREMENTAL",
        }
    }
}

/// HTTP verb used by a stream's endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
}

/// Static description of one stream.
#[derive(Debug)]
pub struct StreamDescriptor {
    pub id: &'static str,
    pub kind: StreamKind,
    pub key_properties: &'static [&'static str],
    pub replication_key: Option<&'static str>,
    /// Path template; `{}` is replaced by the percent-encoded site.
    pub path: &'static str,
    pub method: ApiMethod,
    /// JSON key holding the row array; `None` means the body is one record.
    pub records_path: Option<&'static str>,
    pub aggregation_type: Option<&'static str>,
    /// Requested dimensions for fixed streams, candidate dimensions for the
    /// dynamic stream.
    pub dimensions: &'static [&'static str],
    pub sub_types: &'static [&'static str],
    pub row_limit: usize,
}

pub const REPORT_ROW_LIMIT: usize = 10_000;

/// Prefix marking a domain property, which the sitemaps endpoint rejects.
pub const DOMAIN_PROPERTY_PREFIX: &str = "sc-domain:";

const ALL_SUB_TYPES: &[&str] = &["web", "image", "video", "news", "discover", "googleNews"];
const REPORT_PATH: &str = "sites/{}/searchAnalytics/query";

pub static STREAMS: &[StreamDescriptor] = &[
    StreamDescriptor {
        id: "sites",
        kind: StreamKind::FullTable,
        key_properties: &["site_url"],
        replication_key: None,
        path: "sites/{}",
        method: ApiMethod::Get,
        records_path: None,
        aggregation_type: None,
        dimensions: &[],
        sub_types: &[],
        row_limit: 0,
    },
    StreamDescriptor {
        id: "sitemaps",
        kind: StreamKind::FullTable,
        key_properties: &["site_url", "path", "last_submitted"],
        replication_key: None,
        path: "sites/{}/sitemaps",
        method: ApiMethod::Get,
        records_path: Some("sitemap"),
        aggregation_type: None,
        dimensions: &[],
        sub_types: &[],
        row_limit: 0,
    },
    StreamDescriptor {
        id: "performance_report_custom",
        kind: StreamKind::IncrementalDynamic,
        key_properties: &["site_url", "search_type", "date", "dimensions_hash_key"],
        replication_key: Some("date"),
        path: REPORT_PATH,
        method: ApiMethod::Post,
        records_path: Some("rows"),
        aggregation_type: Some("auto"),
        dimensions: &["date", "country", "device", "page", "query"],
        sub_types: ALL_SUB_TYPES,
        row_limit: REPORT_ROW_LIMIT,
    },
    StreamDescriptor {
        id: "performance_report_date",
        kind: StreamKind::IncrementalFixed,
        key_properties: &["site_url", "search_type", "date"],
        replication_key: Some("date"),
        path: REPORT_PATH,
        method: ApiMethod::Post,
        records_path: Some("rows"),
        aggregation_type: Some("byProperty"),
        dimensions: &["date"],
        sub_types: ALL_SUB_TYPES,
        row_limit: REPORT_ROW_LIMIT,
    },
    StreamDescriptor {
        id: "performance_report_country",
        kind: StreamKind::IncrementalFixed,
        key_properties: &["site_url", "search_type", "date", "country"],
        replication_key: Some("date"),
        path: REPORT_PATH,
        method: ApiMethod::Post,
        records_path: Some("rows"),
        aggregation_type: Some("byProperty"),
        dimensions: &["date", "country"],
        sub_types: ALL_SUB_TYPES,
        row_limit: REPORT_ROW_LIMIT,
    },
    // Discover requests cannot be grouped by device.
    StreamDescriptor {
        id: "performance_report_device",
        kind: StreamKind::IncrementalFixed,
        key_properties: &["site_url", "search_type", "date", "device"],
        replication_key: Some("date"),
        path: REPORT_PATH,
        method: ApiMethod::Post,
        records_path: Some("rows"),
        aggregation_type: Some("byProperty"),
        dimensions: &["date", "device"],
        sub_types: &["googleNews", "image", "news", "video", "web"],
        row_limit: REPORT_ROW_LIMIT,
    },
    StreamDescriptor {
        id: "performance_report_page",
        kind: StreamKind::IncrementalFixed,
        key_properties: &["site_url", "search_type", "date", "page"],
        replication_key: Some("date"),
        path: REPORT_PATH,
        method: ApiMethod::Post,
        records_path: Some("rows"),
        aggregation_type: Some("byPage"),
        dimensions: &["date", "page"],
        sub_types: ALL_SUB_TYPES,
        row_limit: REPORT_ROW_LIMIT,
    },
    // Query is not a valid grouping for discover and googleNews.
    StreamDescriptor {
        id: "performance_report_query",
        kind: StreamKind::IncrementalFixed,
        key_properties: &["site_url", "search_type", "date", "query"],
        replication_key: Some("date"),
        path: REPORT_PATH,
        method: ApiMethod::Post,
        records_path: Some("rows"),
        aggregation_type: Some("byProperty"),
        dimensions: &["date", "query"],
        sub_types: &["image", "news", "video", "web"],
        row_limit: REPORT_ROW_LIMIT,
    },
];

/// Look up a stream descriptor by id.
pub fn find_stream(id: &str) -> Option<&'static StreamDescriptor> {
    STREAMS.iter().find(|s| s.id == id)
}

pub fn is_domain_property(site: &str) -> bool {
    site.starts_with(DOMAIN_PROPERTY_PREFIX)
}

impl StreamDescriptor {
    /// Endpoint path for a site, with the site percent-encoded.
    pub fn path_for(&self, site: &str) -> String {
        self.path.replace("{}", &uri_encode(site))
    }

    /// Sitemaps cannot be listed for domain properties.
    pub fn supports_site(&self, site: &str) -> bool {
        !(self.id == "sitemaps" && is_domain_property(site))
    }
}

/// URI-encode a string per RFC 3986, keeping only `A-Z a-z 0-9 - _ . ~`.
pub fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

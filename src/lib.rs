//! # Search Console Tap
//!
//! Incremental extraction of Google Search Console data (sites, sitemaps and
//! search-performance reports) as a Singer message stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────────┐   ┌──────────────┐
//! │  Transport  │──▶│ window ▶ page ▶ transform ▶  │──▶│     Sink     │
//! │ OAuth+retry │   │ filter ▶ bookmark (per page) │   │ stdout/SQLite│
//! └─────────────┘   └──────────────────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gsc-tap init                            # create the checkpoint database
//! gsc-tap check                           # verify site access
//! gsc-tap discover > catalog.json         # emit the catalog
//! gsc-tap sync --catalog catalog.json     # extract
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed errors |
//! | [`models`] | Shared types and the clock |
//! | [`streams`] | Stream descriptors |
//! | [`schema`] | Stream schemas and discovery metadata |
//! | [`catalog`] | Catalog, selection and stream order |
//! | [`transform`] | Raw page to flat records |
//! | [`state`] | State snapshot and watermark store |
//! | [`window`] | Date window planning |
//! | [`paginate`] | Request shaping and page fetching |
//! | [`filter`] | Key validation and admission |
//! | [`sync`] | Stream orchestrator |
//! | [`client`] | Search Console HTTP transport |
//! | [`sink`] | Output sinks |
//! | [`checkpoint`] | State snapshots in SQLite |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod check;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod paginate;
pub mod schema;
pub mod sink;
pub mod state;
pub mod streams;
pub mod sync;
pub mod transform;
pub mod window;

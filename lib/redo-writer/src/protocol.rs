//! The client wire protocol (spec.md §6, "Wire protocol to client").
//!
//! Framed as newline-delimited JSON, the same shape `redo_builder::codec`
//! uses for its own `Frame` encoding — the client protocol is just one more
//! instance of the "pick an `Encoder`" pattern this system uses throughout.

use redo_common::Scn;
use serde::{Deserialize, Serialize};

/// How a `START` request without a prior checkpoint picks where to begin
/// (spec.md §6: "one of: `scn`, `tms`, `tm_rel`, or none (meaning \"now\")").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    Scn(Scn),
    /// Absolute timestamp, Unix seconds.
    Tms(i64),
    /// Seconds relative to now.
    TmRel(i64),
    Now,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    Info {
        database_name: String,
    },
    Start {
        database_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<StartPosition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u32>,
    },
    Continue {
        database_name: String,
        c_scn: Scn,
        c_idx: u64,
    },
    Confirm {
        database_name: String,
        c_scn: Scn,
        c_idx: u64,
    },
}

/// A `STREAM` response batches one or more already-encoded frames (spec.md
/// §6: "payload[] where each payload is one of
/// `BEGIN/COMMIT/INSERT/UPDATE/DELETE/DDL/CHKPT`"). Each entry is exactly
/// the bytes a [`redo_builder::FrameEncoder`] produced for one
/// `BuilderMsg` — the Writer ships buffers opaquely (spec.md §4.6) and
/// leaves interpreting JSON vs. tagged-binary content to the client, which
/// already knows which encoding it asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    /// No prior state; expects `START`.
    Ready,
    /// Prior state exists; expects `CONTINUE` with `c_scn`/`c_idx`.
    Replicate { c_scn: Scn, c_idx: u64 },
    Stream { scn: Scn, c_scn: Scn, c_idx: u64, payload: Vec<Vec<u8>> },
}

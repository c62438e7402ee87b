//! Purpose: Define the stable public Rust API boundary for crashflow.
//! Exports: Core transformations, record model, errors, and the portal client.
//! Role: Public, additive-only surface; hides internal module layout.
//! Invariants: This module is the only public path callers should rely on.

mod client;

pub use crate::core::dequote::{MAX_UNWRAP_PASSES, decode_wrapped, fix_malformed_json};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::record::{CrashRecord, records_from_str, records_from_value};
pub use crate::core::sql::{DEFAULT_BATCH_SIZE, ScriptOptions, generate_sql};
pub use client::{PORTAL_BASE_URL, PortalClient, ReportWindow, TransportMode};

pub type ApiResult<T> = Result<T, Error>;

//! Structured logging schema and field name constants for tipledger.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Violated invariant (cache collision), requires operator attention |
//! | WARN  | Recoverable issue, fallback applied (oracle timeout, conflict flag) |
//! | INFO  | Lifecycle events, admissions, completions, session creation |
//! | DEBUG | Decision points: gate rule hits, classification verdicts, cache keys |
//! | TRACE | Per-field merge detail, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "gate", "classifier", "aggregator", "variance", "cache",
/// "reanalysis", "oracle", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "fingerprint", "pool", "memory_store"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "admit", "classify", "attach", "get_or_compute", "analyze"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Uploaded document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Trip UUID being operated on.
pub const TRIP_ID: &str = "trip_id";

/// Reanalysis session UUID.
pub const SESSION_ID: &str = "session_id";

/// Computation cache key.
pub const CACHE_KEY: &str = "cache_key";

/// Exact content hash of an upload (hex).
pub const EXACT_HASH: &str = "exact_hash";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Upload byte size.
pub const BYTE_SIZE: &str = "byte_size";

/// Number of candidate fields returned by the oracle.
pub const FIELD_COUNT: &str = "field_count";

/// Number of trips considered by an aggregate computation.
pub const TRIP_COUNT: &str = "trip_count";

// ─── Decision fields ───────────────────────────────────────────────────────

/// Duplicate gate rule that fired ("exact_hash", "similarity_hash",
/// "rapid_resubmit") or "accepted".
pub const GATE_RULE: &str = "gate_rule";

/// Document kind assigned by the classifier.
pub const DOC_KIND: &str = "doc_kind";

/// Trip state after a mutation.
pub const TRIP_STATE: &str = "trip_state";

/// Whether a cache lookup hit.
pub const CACHE_HIT: &str = "cache_hit";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

//! Stable contract types for the receiving ingestion pipeline.
//!
//! This crate defines the tenant-scoped data model and the external
//! collaborator traits every other `recv-*` crate is built against. It has
//! no transport, storage, or vendor dependency of its own: an HTTP layer, a
//! database, an OCR vendor, or an LLM vendor is always a separate crate that
//! implements one of the traits in [`interfaces`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod artifact;
pub mod audit;
pub mod auth;
pub mod catalog;
pub mod draft_line;
pub mod event;
pub mod interfaces;
pub mod ocr;
pub mod quantity;
pub mod session;

pub use artifact::{Artifact, ArtifactKind};
pub use audit::{AuditEntry, ZERO_HASH};
pub use auth::{AuthContext, Role};
pub use catalog::{PartRow, RecentPo, ShoppingListLine};
pub use draft_line::{Discrepancy, DiscrepancyKind, DraftLine, Match, PlannerDecisionRecord, ReasonCode};
pub use event::ReceivingEvent;
pub use interfaces::{AdmitDecision, BlobStore, Catalog, LLMClient, LLMCompletion, OCREngine};
pub use ocr::{BBox, EngineCapabilities, OCRLine, OCRResult};
pub use quantity::{Qty, Unit};
pub use session::{CostLedger, Session, SessionState};

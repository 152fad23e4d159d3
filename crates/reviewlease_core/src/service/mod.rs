//! Review use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into lease, decision and queue APIs.
//! - Keep callers decoupled from storage details.

pub mod lease_manager;
pub mod queue_service;
pub mod review_service;

//! Integration test suite for the colony coordination engine.
//!
//! These tests exercise full sessions from objective to terminal phase,
//! including consensus gating, circuit breaking, work stealing, topology
//! adaptation, and cancellation. All agent work runs through a scripted
//! mock executor, so the suite is deterministic and safe for CI.
//!
//! # Test Categories
//!
//! - `development_flow`: the linear design→code→test→docs pipeline
//! - `consensus_flow`: weighted voting, gating, and fallbacks
//! - `fault_tolerance`: circuit breakers and work stealing
//! - `topology`: routing shapes and validated runtime adaptation
//! - `concurrency`: cancellation, timeouts, and branch interleaving

mod fixtures;

mod concurrency;
mod consensus_flow;
mod development_flow;
mod fault_tolerance;

// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Deposit backend for scholarly works.
//!
//! Keeps a field-level audit trail of every edit and decides, per request,
//! who may read a work's metadata and files given its visibility, embargo
//! and draft state.

pub mod access;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod metrics;
pub mod model;
pub mod store;
pub mod visibility;

//! # catalog-sync
//!
//! Snapshot reconciliation and change history for archival catalog records.
//!
//! catalog-sync ingests full snapshots of catalog description records (and
//! their digital object URLs) into staging tables, then reconciles each
//! staging set against a persisted current table while preserving every
//! superseded row in an append-only history — a slowly-changing-dimension
//! pattern over SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────────┐
//! │ Snapshot  │──▶│   Staging    │──▶│   Reconciliation  │
//! │ JSON file │   │ catalog_temp │   │      engine       │
//! └───────────┘   │ object_url_* │   └───┬───────────┬───┘
//!                 └──────────────┘       ▼           ▼
//!                                  ┌──────────┐ ┌──────────┐
//!                                  │ current  │ │ history  │
//!                                  │  tables  │ │  tables  │
//!                                  └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! catsync init                     # create database
//! catsync clear                    # empty staging between runs
//! catsync load snapshot.json       # stage a fetched snapshot
//! catsync reconcile                # apply the three-phase diff
//! catsync status                   # row counts and last load
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`schema`] | Table layout declarations and validation |
//! | [`compare`] | Field-level record comparator |
//! | [`reconcile`] | Three-phase reconciliation engine |
//! | [`stage`] | Snapshot loader and staging cleanup |
//! | [`stats`] | Database status overview |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod compare;
pub mod config;
pub mod db;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod schema;
pub mod stage;
pub mod stats;

//! Shardsync - cross-server player data synchronization engine
//!
//! Keeps a per-player state blob (inventory, vitals, experience, statistics,
//! and so on) consistent across loosely-coupled game server processes that a
//! player may move between at any moment. Durable history lives in a
//! relational store; a Redis cache/bus tier accelerates server-to-server
//! handoff and answers cross-process data requests.

pub mod adapter;
pub mod bus;
pub mod config;
pub mod context;
pub mod player;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod utils;

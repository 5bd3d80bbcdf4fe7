//! skillgate host server.
//!
//! This crate provides the HTTP host for a bot that delegates parts of its
//! conversations to skills:
//! - `/api/messages` for channel activities, run through the adapter and host bot
//! - `/api/skills/v3/...` for skills calling back into host conversations
//! - Postgres-backed durable storage for skill conversation ids and state

pub mod adapter;
pub mod app;
pub mod bot;
pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod skill_handler;

#[cfg(test)]
pub(crate) mod testing;

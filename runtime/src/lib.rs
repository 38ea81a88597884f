// Copyright 2026 Schoolwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Schoolwatch runtime library: portal access, token acquisition, homework
//! fetching, notification, and the run coordinator.
//!
//! This library crate exposes the core modules for integration testing.

#![allow(clippy::new_without_default)]

pub mod acquisition;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod fetcher;
pub mod journal;
pub mod notify;
pub mod poll;
pub mod portal;
pub mod renderer;
pub mod schedule;

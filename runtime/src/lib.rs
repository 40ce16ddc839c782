// Copyright 2026 Facsimile Contributors
// SPDX-License-Identifier: Apache-2.0

//! Facsimile runtime: live-page capture, provider clients, the generation
//! orchestrator, and the CLI and HTTP surfaces around the `facsimile` core.

pub mod capture;
pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod renderer;
pub mod rest;

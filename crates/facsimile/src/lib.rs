// Copyright 2026 Facsimile Contributors
// SPDX-License-Identifier: Apache-2.0

//! Facsimile core library for turning a captured page into a static HTML
//! clone. Holds the visual manifest types, CSS consolidation, prompt
//! assembly, candidate validation and the provider retry policy.

pub mod consolidate;
pub mod css;
pub mod error;
pub mod manifest;
pub mod policy;
pub mod prompt;
pub mod sanitize;
pub mod types;
pub mod validate;

pub use consolidate::{consolidate, render_document, ConsolidatedBundle};
pub use error::{error_codes, CloneError, FacsimileResult, Phase, ProviderErrorKind};
pub use manifest::{CaptureLimits, ManifestBuilder, NodeDraft};
pub use policy::{AttemptState, Event, RetryPolicy, Step};
pub use prompt::{assemble, assemble_refinement, AssemblerConfig, GenerationParams, GenerationRequest, TruncationReport};
pub use sanitize::finalize_document;
pub use types::*;
pub use validate::{Rejection, Strategy, Validator, ValidatorConfig, Verdict};

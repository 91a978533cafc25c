// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

pub mod budget;
pub mod chunker;
pub mod client;
pub mod cost;
pub mod models;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod tokenizer;

pub use budget::{TokenAccountant, TokenLimit};
pub use chunker::{Chunk, ChunkPlanner};
pub use client::{Generation, LLMClient, RetryConfig};
pub use models::{ModelInfo, ModelTable, ProviderKind, TokenBudget};
pub use registry::{ProviderRegistry, ProviderSettings};
pub use tokenizer::{TiktokenTokenizer, Tokenizer, TokenizerModel};

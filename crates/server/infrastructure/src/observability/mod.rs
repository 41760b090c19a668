//! Observability Module - logging setup for the dispatch runtime
//!
//! Métricas y exportadores externos quedan fuera; solo `tracing` estructurado.

pub mod tracing;

pub use tracing::{TracingResult, build_filter, init_tracing};

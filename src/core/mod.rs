//! Core XML scanning primitives
//!
//! This module contains the fundamental building blocks for tolerant parsing:
//! - Scanner: SIMD-accelerated delimiter detection using memchr
//! - Tokenizer: Restartable state machine for editor token extraction
//! - DTD: Content models, attribute types and defaults of DTD declarations

pub mod dtd;
pub mod scanner;
pub mod tokenizer;

pub use tokenizer::{ScannerState, Token, TokenKind, Tokenizer};

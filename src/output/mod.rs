//! Output cleanup for shell channels.
//!
//! Probe and command output arrives through a PTY and may carry ANSI
//! escape sequences from shells that color their prompts or errors.
//! Framing and state parsing both work on the cleaned text.

mod sanitizer;

pub use sanitizer::OutputSanitizer;

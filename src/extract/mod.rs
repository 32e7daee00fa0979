//! Extraction: turning provider text (complete or streamed) into structured
//! tool-call content.

pub mod generate;
pub mod stream;

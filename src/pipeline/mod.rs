//! Pipeline stages for photo-to-variations analysis.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap backends without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ extract ──▶ postprocess ──▶ validate ──▶ fanout ──▶ synthesize
//! (path/URL) (base64)   (VLM)      (cleanup)       (rules)      (join)     (per directive)
//! ```
//!
//! 1. [`input`]: read a local path or download a URL into image bytes
//! 2. [`encode`]: sniff PNG/JPEG, downscale oversized photos, base64-wrap
//! 3. [`extract`]: drive the extraction backend with retry/backoff
//! 4. [`postprocess`]: deterministic cleanup of model quirks (fences, `$` math)
//! 5. [`validate`]: check the generation rules the schema cannot express
//! 6. [`fanout`]: schedule one diagram per figure variation and join them all
//! 7. [`synthesize`]: one diagram call; failures become an absent image

pub mod encode;
pub mod extract;
pub mod fanout;
pub mod input;
pub mod postprocess;
pub mod synthesize;
pub mod validate;

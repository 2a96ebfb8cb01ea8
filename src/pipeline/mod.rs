//! Pipeline stages for page-to-PDF assembly.
//!
//! Each submodule implements one step, so each can be tested without the
//! others (and without a network, apart from `markup` and `fetch`).
//!
//! ## Data Flow
//!
//! ```text
//! markup ──▶ extract ──▶ fetch ──▶ paginate ──▶ pdf
//! (GET page) (<img> URLs) (bounded)  (geometry)  (lopdf)
//! ```
//!
//! 1. [`markup`]    — fetch the page; also builds the shared HTTP client
//! 2. [`extract`]   — collect `<img>` sources in document order, resolving
//!    them with [`normalize`]
//! 3. [`fetch`]     — download at most N images at once into the working area
//! 4. [`paginate`]  — one page per image, sorted by origin; runs in
//!    `spawn_blocking` because decoding and compression are CPU-bound
//! 5. [`pdf`]       — image XObjects, page tree and serialisation

pub mod extract;
pub mod fetch;
pub mod markup;
pub mod normalize;
pub mod paginate;
pub mod pdf;

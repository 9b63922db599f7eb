//! Channel Patterns
//!
//! Channel names are `/`-separated segments. A pattern may replace any
//! segment with a named parameter (`users/:id`), which captures the
//! corresponding segment of a concrete channel name.
//!
//! ## Matching rules
//!
//! - Segment counts must be equal
//! - Literal segments compare exactly
//! - Parameter segments capture any non-empty segment
//! - When several patterns match, the first one in the list wins
//!
//! ```rust
//! use transmit::channel::{find_match, ChannelPattern};
//!
//! let patterns = vec![ChannelPattern::compile("users/:id").unwrap()];
//! let (pattern, params) = find_match("users/42", &patterns).unwrap();
//!
//! assert_eq!(pattern.as_str(), "users/:id");
//! assert_eq!(params["id"], "42");
//! ```

mod pattern;

pub use pattern::{find_match, ChannelParams, ChannelPattern, PatternError};

// Book-side data structures, no exchange knowledge in here
pub mod book;   // per-instrument snapshot + diff application
pub mod ladder; // ordered price -> level container
pub mod types;  // levels, diffs, actions

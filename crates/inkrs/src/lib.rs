//! inkrs - A runtime interpreter for compiled ink interactive-narrative stories
//!
//! ink is Inkle's branching-narrative scripting language, used in games like
//! *80 Days* and *Heaven's Vault*. This crate loads the JSON a story is
//! compiled to (by `inklecate` or an equivalent compiler) and steps through
//! it, producing narrative lines, choices, and tags for a host application
//! to render.
//!
//! # Features
//!
//! - **Arena-backed story graph**: nodes live in a flat arena, addressed by
//!   index rather than shared pointers or reference counting
//! - **Full call-stack model**: tunnels, functions, and threads, matching
//!   ink's stack-based divert semantics
//! - **Deterministic randomness**: a story-owned PRNG seeded once, so replays
//!   of the same choices reproduce the same `RANDOM()` results
//! - **Ink lists**: the full list type, including unions, intersections, and
//!   range queries
//! - **External functions**: bind host-side Rust closures that ink code can
//!   call by name
//! - **Variable observers**: subscribe to global variable changes as they
//!   commit
//!
//! # Quick Start
//!
//! ```
//! use inkrs::Story;
//!
//! let json = r#"{"inkVersion": 21, "root": ["^Hello, world!", "\n", "end", null]}"#;
//! let mut story = Story::from_json(json).unwrap();
//!
//! let text = story.continue_maximally().unwrap();
//! assert_eq!(text.trim(), "Hello, world!");
//! assert!(!story.can_continue());
//! ```
//!
//! # Story Model
//!
//! ## Content
//! - Knots, stitches, and gathers compile down to named [`Container`]s
//! - `->` diverts redirect the instruction pointer; `->>` tunnels and
//!   function calls push a [`call_stack`] frame so `->->` can return
//! - `<>` glue joins adjoining lines by suppressing the newline between them
//! - `#` tags attach metadata to a line without appearing in its text
//!
//! ## Choices
//! - `*` and `+` choice points become [`Choice`] values surfaced via
//!   [`Story::current_choices`]; `+` (sticky) choices survive being taken,
//!   `*` choices are consumed once chosen
//! - An invisible default choice (`* ->`) is taken automatically when it's
//!   the only option left
//!
//! ## Variables and Lists
//! - `VAR`/`temp` declarations, reads, and assignments resolve through a
//!   three-tier lookup: an in-flight patch, committed globals, then the
//!   default snapshot taken at load time
//! - `LIST` definitions and values use the full [`InkList`] operation set
//!
//! ## Flow Control
//! - `{condition: true | false}` and weave-style conditionals evaluate on an
//!   explicit evaluation stack, the same stack native functions and string
//!   expressions run on
//! - Visit and turn counts are tracked per container and queryable from ink
//!   via `READ_COUNT`, `TURNS`, and `TURNS_SINCE`
//!
//! # Non-goals
//!
//! This crate interprets already-compiled ink JSON. It does not compile
//! `.ink` source files, and it carries no CLI binary. [`Story::to_save_json`]
//! and [`Story::load_save_json`] round-trip a story's state through the same
//! JSON shape ink's own runtimes use, but the in-memory [`state::State`] is
//! always available for a host to inspect directly.

mod arena;
mod call_stack;
mod choice;
mod error;
mod flow;
mod list;
mod loader;
mod native_functions;
mod node;
mod output_stream;
mod path;
mod pointer;
mod profiler;
mod saver;
mod state;
mod state_patch;
mod story;
mod value;
mod variables_state;

pub use arena::NodeId;
pub use call_stack::{CallStack, PushPopType};
pub use choice::Choice;
pub use error::{Error, Result, Warning};
pub use list::{InkList, InkListItem, ListDefinition, ListDefinitions};
pub use node::Container;
pub use output_stream::{OutputItem, OutputStream};
pub use profiler::{Profiler, Report as ProfilerReport};
pub use state::State;
pub use story::{ExternalFunction, Limits, Story};
pub use value::{Value, ValueKind};
pub use variables_state::{Observer, VariablesState};

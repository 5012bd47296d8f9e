//! # Hub Agent
//!
//! A chat assistant that answers project questions from spreadsheet data.
//!
//! Each question is routed to the spreadsheet(s) that hold the answer, a
//! bounded slice of those tables is assembled as grounding context, and a
//! language model answers from that context. Conversation history is kept in
//! a spreadsheet too, so sessions survive restarts and can be resumed.
//!
//! ## Architecture
//!
//! ```text
//!  question
//!     │
//!     ▼
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌─────────┐
//! │ Session  │──▶│    Router    │──▶│ Assembler │──▶│  Model  │
//! │Controller│   │ lexical/model│   │ rows+cap  │   │ answer  │
//! └────┬─────┘   └──────┬───────┘   └─────┬─────┘   └─────────┘
//!      │                │                 │
//!      ▼                ▼                 ▼
//! ┌────────────────────────────────────────────┐
//! │        Tabular store (Sheets / memory)     │
//! │  history table · source map · data sheets  │
//! └────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hub sources                       # show the source map
//! hub route "Tudor House pricing"   # dry-run routing
//! hub ask "What tasks does Alice have?"
//! hub chat --latest                 # interactive, resume last session
//! hub serve                         # HTTP chat API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy and deadlines |
//! | [`store`] | Tabular store trait and backends |
//! | [`conversation`] | Persisted conversation history |
//! | [`source_map`] | Project → document directory with TTL cache |
//! | [`matcher`] | Longest-first lexical project detection |
//! | [`router`] | Two-tier routing |
//! | [`assembler`] | Context gathering and budget |
//! | [`prompts`] | Routing and answer prompts |
//! | [`llm`] | Completion model providers |
//! | [`pipeline`] | Per-turn route → gather → answer |
//! | [`session`] | Session lifecycle |
//! | [`server`] | HTTP chat server |

pub mod assembler;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod router;
pub mod server;
pub mod session;
pub mod source_map;
pub mod sources;
pub mod store;

//! Path rewriting middleware: redirect-and-forward request paths, with
//! an optional regex rule table.

mod config;
mod handler;
mod rules;

pub use config::{NoopRewriteCallback, RewriteCallback, RewriteConfig, RewriteFn};
pub use handler::PathRewriter;
pub use rules::RewriteRule;

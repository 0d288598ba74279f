// rmcc — RMC realization compiler
//
// Library root. Front end (lexer, parser, lower), analyses (cfg, path_cache,
// action, deps, classify), planners (greedy, optimal over smt), and the
// rewriting back end (emit, realize), driven by pipeline.

pub mod action;
pub mod ast;
pub mod cfg;
pub mod classify;
pub mod cut;
pub mod deps;
pub mod diag;
pub mod dot;
pub mod emit;
pub mod frequency;
pub mod greedy;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod optimal;
pub mod parser;
pub mod pass;
pub mod path_cache;
pub mod pipeline;
pub mod realize;
pub mod report;
pub mod smt;
pub mod target;

//! wordserve: a word-list chunk server with pluggable request scheduling.
//!
//! A server hands out an ordered word list in bounded chunks over a
//! newline-delimited TCP protocol. Clients may pipeline several requests
//! at once; the scheduling discipline (global FCFS or per-connection
//! round-robin) decides how much of that advantage is realized.

pub mod client;
pub mod config;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod words;

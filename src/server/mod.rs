//! Connection manager and serving loop.
//!
//! Accepts connections, multiplexes readability with a single blocking
//! poll, frames request lines out of the byte stream, and serves pending
//! requests in the order chosen by the configured scheduling discipline.

mod connection;
mod event_loop;

pub use event_loop::Server;

use crate::config::ServerConfig;
use crate::words::WordStore;
use std::io;

/// Load the word list, bind, and serve forever.
pub fn run(config: ServerConfig) -> io::Result<()> {
    let store = WordStore::load(&config.words)?;
    let server = Server::bind(&config, store)?;
    server.run()
}

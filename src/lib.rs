pub mod acceptor;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
pub mod http;
pub mod indexer;
pub mod resolver;
pub mod response;
pub mod stats;
pub mod upload;

/// Re-exports of common components for easier access
pub use acceptor::ConnectionAcceptor;
pub use cache::{CacheEntry, EntryKind, FileCache};
pub use config::ServerConfig;
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use error::{ServerError, ServerResult};
pub use event_loop::{EventLoop, EventPoller};
pub use http::{HttpParser, Method, Request, Response, Status};
pub use indexer::DirectoryIndexer;
pub use response::{RequestContext, ResponseBuilder};
pub use stats::{StatsRegistry, StatsSnapshot};
pub use upload::UploadHandler;

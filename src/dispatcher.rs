use crate::cache::FileCache;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::{Method, Request, Response, Status};
use crate::indexer::DirectoryIndexer;
use crate::resolver;
use crate::response::{RequestContext, ResponseBuilder};
use crate::stats::StatsRegistry;
use crate::upload::UploadHandler;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Routes each request to the stats endpoint, the upload endpoint, or the
/// file-serving pipeline, and records the pipeline's outcome counters.
///
/// One transition per request; requests share nothing beyond the cache and
/// the counters.
pub struct Dispatcher {
    root_dir: PathBuf,
    vhost: bool,
    cache: Arc<FileCache>,
    stats: Arc<StatsRegistry>,
    indexer: DirectoryIndexer,
    builder: ResponseBuilder,
    upload: UploadHandler,
}

impl Dispatcher {
    pub fn new(config: &ServerConfig) -> Self {
        let cache = Arc::new(FileCache::new(config.cache_ttl, config.cache_max_bytes));
        let stats = Arc::new(StatsRegistry::new());
        Self::with_shared(config, cache, stats)
    }

    /// Build a dispatcher around an existing cache and registry, for
    /// embedders that share them across dispatchers.
    pub fn with_shared(
        config: &ServerConfig,
        cache: Arc<FileCache>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            root_dir: config.root_dir.clone(),
            vhost: config.vhost,
            cache,
            stats,
            indexer: DirectoryIndexer::new(
                config.index_names.clone(),
                config.generate_index_pages,
            ),
            builder: ResponseBuilder::new(
                config.compress,
                config.accept_byte_range,
                config.cache_ttl,
            ),
            upload: UploadHandler::new(config.root_dir.clone(), config.max_upload_size),
        }
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        self.stats.clone()
    }

    pub fn cache(&self) -> Arc<FileCache> {
        self.cache.clone()
    }

    /// Handle one request end to end.
    pub fn dispatch(&self, request: &Request) -> Response {
        match request.path() {
            "/stats" => self.serve_stats(request),
            "/upload" => self.upload.handle(request),
            _ => {
                let response = self.serve_file(request);
                let body_bytes = response.body.len() as u64;
                self.stats.record(response.status, body_bytes);
                response
            }
        }
    }

    fn serve_stats(&self, request: &Request) -> Response {
        let filter = request.query_params.get("r").map(String::as_str);
        let mut response = Response::new(Status::Ok);
        response.set_header("Content-Type", "application/json; charset=utf-8");
        response.set_body(self.stats.to_json(filter).as_bytes());
        response
    }

    fn serve_file(&self, request: &Request) -> Response {
        if request.method != Method::Get {
            return Response::with_text(Status::MethodNotAllowed, "Method Not Allowed");
        }

        let host = if self.vhost {
            Some(
                request
                    .get_header("host")
                    .map(String::as_str)
                    .unwrap_or("")
                    .to_string(),
            )
        } else {
            None
        };

        let canonical = match resolver::resolve(&self.root_dir, &request.uri, host.as_deref()) {
            Ok(path) => path,
            Err(e) => {
                warn!("resolve failed for {}: {}", request.uri, e);
                return Response::with_text(e.status(), &short_body(&e));
            }
        };

        let ctx = RequestContext::new(request, canonical);

        let entry = match self.cache.get(&ctx.canonical_path) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("cache miss error for {}: {}", ctx.canonical_path.display(), e);
                return Response::with_text(e.status(), &short_body(&e));
            }
        };

        if entry.is_dir() {
            if let Some(index) = self.indexer.find_index(&ctx.canonical_path) {
                return match self.cache.get(&index) {
                    Ok(index_entry) => self.builder.build(&self.cache, &index_entry, &ctx),
                    Err(e) => Response::with_text(e.status(), &short_body(&e)),
                };
            }
            return match self.indexer.listing(&ctx.canonical_path, request.path()) {
                Ok(response) => response,
                Err(e) => Response::with_text(e.status(), &short_body(&e)),
            };
        }

        self.builder.build(&self.cache, &entry, &ctx)
    }
}

/// Short textual body for an error response; never echoes internal paths
/// for filesystem failures.
fn short_body(error: &ServerError) -> String {
    match error {
        ServerError::Forbidden(_) => "Forbidden".to_string(),
        ServerError::NotFound(_) => "Not Found".to_string(),
        ServerError::Io(_) => "Internal Server Error".to_string(),
        other => other.to_string(),
    }
}

use std::io;
use std::sync::{Arc, RwLock};

use actix_web::{App, HttpServer, web};
use log::info;

use cache::memory_cache::MemoryCache;
use cached_response::CacheEntry;
use config::{Config, CONFIG_PATH_VARIABLE, DEFAULT_CONFIG_PATH};
use fetcher::http_fetcher::HttpFetcher;
use gate::{CacheGate, SharedCache};
use http_cache::request_cache_handler::RequestCacheHandler;
use interceptor::{CachingInterceptor, Interceptor, InterceptorProvider};

mod cache;
mod cached_response;
mod config;
mod fetcher;
mod gate;
mod http_cache;
mod interceptor;
mod logger;
mod routes;

pub struct AppState {
    pub interceptors: InterceptorProvider,
    pub cache: SharedCache,
}

fn startup_error<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config_path = std::env::var(CONFIG_PATH_VARIABLE)
        .unwrap_or_else(|_| String::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path).map_err(startup_error)?;
    logger::init(&config).map_err(startup_error)?;
    info!("Loaded configuration from {}", config_path);

    let cache: SharedCache = Arc::new(RwLock::new(MemoryCache::<Arc<CacheEntry>>::new()));
    let fetcher = HttpFetcher::new(config.request_timeout()).map_err(startup_error)?;
    let gate = CacheGate::new(
        cache.clone(),
        Arc::new(fetcher),
        Arc::new(RequestCacheHandler::new(config.overridden_cache.clone())),
        config.default_ttl(),
        config.freshness_policy(),
    );
    let interceptor: Arc<dyn Interceptor + Sync + Send> =
        Arc::new(CachingInterceptor::new(gate, config.allow_from.clone()));

    let app_state = web::Data::new(AppState {
        interceptors: InterceptorProvider::new(vec![interceptor]),
        cache,
    });

    info!("Listening on {}", config.listen_address);
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .route("/health", web::get().to(routes::health::health))
            .route("/{tail:.*}", web::get().to(routes::index::index))
    })
    .bind(config.listen_address.as_str())?
    .run()
    .await
}

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, web};
use log::info;

use crate::AppState;
use crate::fetcher::FetchError;
use crate::gate::{CacheStatus, Served};

pub const X_CACHE: &str = "x-cache";

/// Connection-level headers that must not be replayed from the cached response.
const SKIPPED_HEADERS: [&str; 6] = [
    "connection",
    "content-length",
    "content-type",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

impl From<FetchError> for HttpResponse {
    fn from(e: FetchError) -> Self {
        return match e {
            FetchError::NotFound => HttpResponse::NotFound().body(e.to_string()),
            FetchError::NoAccess => HttpResponse::Forbidden().body(e.to_string()),
            FetchError::Timeout => HttpResponse::GatewayTimeout().body(e.to_string()),
            FetchError::FetchFailed(_) => HttpResponse::BadGateway().body(e.to_string()),
        };
    }
}

fn cache_label(status: CacheStatus) -> &'static str {
    match status {
        CacheStatus::Hit => "HIT",
        CacheStatus::HitRefreshing => "REFRESH",
        CacheStatus::Miss => "MISS",
        CacheStatus::Uncacheable => "BYPASS",
    }
}

fn respond(served: Served) -> HttpResponse {
    let metadata = served.entry.response();
    let status = StatusCode::from_u16(metadata.status).unwrap_or(StatusCode::OK);
    let mut response = HttpResponse::build(status);

    for (header_name, header_values) in metadata.headers.iter() {
        if SKIPPED_HEADERS.contains(&header_name.as_str()) {
            continue;
        }
        for header_value in header_values.iter() {
            response.append_header((header_name.clone(), header_value.clone()));
        }
    }
    response.insert_header((X_CACHE, cache_label(served.status)));

    response
        .content_type(metadata.mime.to_string())
        .body(served.entry.body().clone())
}

pub async fn index(req: HttpRequest, data: web::Data<AppState>) -> HttpResponse {
    let resource_url = req.match_info().get("tail").unwrap_or_default();
    let mut resource_uri = match urlencoding::decode(resource_url) {
        Ok(uri) => uri.into_owned(),
        Err(e) => return HttpResponse::BadRequest().body(format!("Invalid resource: {}", e)),
    };
    if !req.query_string().is_empty() {
        resource_uri = format!("{}?{}", resource_uri, req.query_string());
    }

    let interceptor = match data.interceptors.get(&resource_uri) {
        Some(interceptor) => interceptor,
        None => return HttpResponse::BadRequest().body(format!("Cannot intercept {}", resource_uri)),
    };

    match interceptor.intercept(&resource_uri).await {
        Ok(served) => {
            info!("{} {} ({} bytes)", cache_label(served.status), resource_uri, served.entry.body().len());
            respond(served)
        }
        Err(e) => {
            info!("Failed to serve {}: {}", resource_uri, e);
            e.into()
        }
    }
}

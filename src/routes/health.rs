use actix_web::{HttpResponse, web};

use crate::AppState;

pub async fn health(data: web::Data<AppState>) -> HttpResponse {
    match data.cache.read() {
        Ok(cache) => HttpResponse::Ok().body(format!("ok, {} cached", cache.count())),
        Err(e) => HttpResponse::InternalServerError().body(format!("{:#?}", e)),
    }
}

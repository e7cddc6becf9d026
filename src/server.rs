use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use actix_cors::Cors;
use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::time::Duration;

use square_autopost_lib::logger;
use square_autopost_lib::pairlist::{BinanceMarkets, PairCache, PairlistError, DEFAULT_ADDITIONAL_PAIRS};

/// Serves the spot USDT pairs that have no perpetual futures market.
#[derive(Parser, Debug)]
#[command(name = "pairlist-server", version)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    #[arg(long, default_value_t = 60)]
    cache_ttl_secs: u64,
}

/// Runs a cache operation on the blocking pool; the upstream client blocks.
async fn on_blocking_pool<F>(cache: web::Data<PairCache>, op: F) -> Result<String, String>
where
    F: FnOnce(&PairCache) -> Result<String, PairlistError> + Send + 'static,
{
    let cache = cache.into_inner();
    match web::block(move || op(cache.as_ref())).await {
        Ok(Ok(body)) => Ok(body),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

#[get("/spot_pairs_not_in_futures")]
async fn get_spot_pairs(cache: web::Data<PairCache>) -> impl Responder {
    match on_blocking_pool(cache, PairCache::get).await {
        Ok(body) => HttpResponse::Ok().content_type("application/json").body(body),
        Err(e) => {
            error!("Failed to compute pair list: {}", e);
            HttpResponse::BadGateway().body(e)
        }
    }
}

#[get("/refresh_cache")]
async fn refresh_cache(cache: web::Data<PairCache>) -> impl Responder {
    match on_blocking_pool(cache, PairCache::refresh).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({ "status": "Cache refreshed" })),
        Err(e) => {
            error!("Failed to refresh pair list: {}", e);
            HttpResponse::BadGateway().body(e)
        }
    }
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_spot_pairs).service(refresh_cache);
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logger::init(logger::parse_level("info"), None)?;

    // The blocking HTTP client has to be built outside the async runtime.
    let additional = DEFAULT_ADDITIONAL_PAIRS.iter().map(|s| s.to_string()).collect();
    let cache = web::Data::new(PairCache::new(
        Box::new(BinanceMarkets::new()?),
        additional,
        Duration::from_secs(args.cache_ttl_secs),
    ));

    info!("Starting pair list server at http://{}:{}", args.host, args.port);

    let state = cache.clone();
    let bind = (args.host.clone(), args.port);
    actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header();

            App::new()
                .wrap(cors)
                .app_data(state.clone())
                .configure(configure)
        })
        .bind(bind)?
        .run()
        .await
    })?;

    drop(cache);
    Ok(())
}

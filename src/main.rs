use anyhow::Result;
use chrono::Local;

use lss_overview::cache::{CacheStore, MemoryStore, SqliteStore};
use lss_overview::logging::{log, obj, v_num, v_str, Domain, Level};
use lss_overview::report::{render_json, render_text};
use lss_overview::source::HttpSource;
use lss_overview::{CacheManager, Config, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let as_json = args.iter().any(|a| a == "--json");
    let refresh = args.iter().any(|a| a == "--refresh");

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("base_url", v_str(&cfg.base_url)),
            ("listing", v_str(&format!("{:?}", cfg.course_listing))),
            ("batch_size", v_num(cfg.batch_size() as f64)),
            ("cache", v_str(cfg.cache_path.as_deref().unwrap_or("memory"))),
        ]),
    );

    let store: Box<dyn CacheStore> = match &cfg.cache_path {
        Some(path) => Box::new(SqliteStore::open(path)?),
        None => Box::new(MemoryStore::new()),
    };
    let pipeline = Pipeline::new(HttpSource::new(&cfg)?, &cfg);
    let cache = CacheManager::new(pipeline, store, cfg.validity());

    let now = Local::now();
    let result = if refresh {
        cache.force_refresh(now).await
    } else {
        cache.get_or_compute(now).await
    };

    match result {
        Ok(overview) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&render_json(&overview))?);
            } else {
                print!("{}", render_text(&overview, &now));
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("⚠️ Fehler beim Laden der Daten: {}", err);
            std::process::exit(1);
        }
    }
}

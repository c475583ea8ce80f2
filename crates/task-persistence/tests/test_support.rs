use once_cell::sync::Lazy;
use task_persistence::config::DbConfig;
use task_persistence::pg::{build_pool, PgPool};

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }
    let cfg = DbConfig::from_env();
    match build_pool(&cfg.url, 1, 1) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("could not build test pool: {e}");
            None
        }
    }
});

#[allow(dead_code)]
pub fn with_pool<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&PgPool) -> R,
{
    TEST_POOL.as_ref().map(f)
}

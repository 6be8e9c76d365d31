use mailflow::bootstrap;
use mailflow::config;
use mailflow::telemetry;

use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cfg = config::Config::from_env()?;

    let api_addr = cfg.api_addr.clone();
    let drain_interval_secs = cfg.drain_interval_secs;
    let maintenance_interval_secs = cfg.maintenance_interval_secs;

    info!(
        worker_id = %cfg.worker_id,
        store = ?cfg.store,
        mailer = ?cfg.mailer,
        api = %api_addr.clone().unwrap_or_else(|| "disabled".to_string()),
        cron_auth = if cfg.cron_secret.is_some() { "enabled" } else { "disabled" },
        lease_seconds = cfg.lease_seconds,
        drain_interval_secs,
        send_concurrency = cfg.send_concurrency,
        send_timeout_ms = cfg.send_timeout.as_millis() as u64,
        body_markup = ?cfg.body_markup,
        retention_days = cfg.retention_days,
        migrate_on_startup = cfg.migrate_on_startup,
        "mailflow worker starting"
    );

    let stores = bootstrap::open_stores(&cfg).await?;
    let sender = bootstrap::make_sender(&cfg)?;
    let components = bootstrap::build(&cfg, stores, sender)?;

    // ---- API task ----
    let app = mailflow::api::router(components.api_state(cfg.cron_secret.clone()));

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Retention task ----
    let maintenance_handle = {
        let retention = components.retention.clone();
        tokio::spawn(async move {
            loop {
                match retention.purge_once(Utc::now()).await {
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "retention purge failed"),
                }

                tokio::time::sleep(Duration::from_secs(maintenance_interval_secs)).await;
            }
            #[allow(unreachable_code)]
            Ok::<(), anyhow::Error>(())
        })
    };

    // ---- Drain loop task ----
    let drain_handle = {
        let drainer = components.drainer.clone();
        tokio::spawn(async move {
            if drain_interval_secs == 0 {
                info!("in-process drain disabled; waiting for /cron/mail-queue");
                std::future::pending::<()>().await;
            }

            let mut ticker = tokio::time::interval(Duration::from_secs(drain_interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // A failed pass is logged and retried on the next tick; claims expire on their own.
                if let Err(e) = drainer.drain(Utc::now()).await {
                    error!(worker_id = %drainer.worker_id(), error = %e, "drain failed");
                }
            }
            #[allow(unreachable_code)]
            Ok::<(), anyhow::Error>(())
        })
    };

    tokio::select! {
        res = api_handle => res??,
        res = drain_handle => res??,
        res = maintenance_handle => res??,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    Ok(())
}

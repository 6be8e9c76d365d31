//! Builds the store / mailer / dispatcher graph from a `Config`.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::api::ApiState;
use crate::config::{Config, MailerBackend, StoreBackend};
use crate::db;
use crate::error::{MailError, MailResult};
use crate::mail::{
    BroadcastLogStore, DispatchOptions, Dispatcher, DrainOptions, Drainer, LogSender,
    MailSender, MailService, MemoryBroadcastLogStore, MemoryQueueStore, MemoryReservationSource,
    PgBroadcastLogStore, PgQueueStore, PgReservationSource, QrCodeService, QueueStore,
    ReservationSource, Retention, SmtpSender, TemplateRenderer,
};

#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub reservations: Arc<dyn ReservationSource>,
    pub broadcast_logs: Arc<dyn BroadcastLogStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            queue: Arc::new(MemoryQueueStore::new()),
            reservations: Arc::new(MemoryReservationSource::new()),
            broadcast_logs: Arc::new(MemoryBroadcastLogStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            queue: Arc::new(PgQueueStore::new(pool.clone())),
            reservations: Arc::new(PgReservationSource::new(pool.clone())),
            broadcast_logs: Arc::new(PgBroadcastLogStore::new(pool)),
        }
    }
}

#[derive(Clone)]
pub struct Components {
    pub service: MailService,
    pub drainer: Drainer,
    pub retention: Retention,
}

impl Components {
    pub fn api_state(&self, cron_secret: Option<String>) -> ApiState {
        ApiState {
            service: self.service.clone(),
            drainer: self.drainer.clone(),
            cron_secret,
        }
    }
}

pub async fn open_stores(cfg: &Config) -> MailResult<Stores> {
    match cfg.store {
        StoreBackend::Memory => {
            info!("using in-memory stores");
            Ok(Stores::memory())
        }
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| MailError::Config("DATABASE_URL is missing".into()))?;
            let pool = db::make_pool(url).await?;
            if cfg.migrate_on_startup {
                db::run_migrations(&pool).await?;
            }
            Ok(Stores::postgres(pool))
        }
    }
}

pub fn make_sender(cfg: &Config) -> MailResult<Arc<dyn MailSender>> {
    Ok(match cfg.mailer {
        MailerBackend::Smtp => Arc::new(SmtpSender::new(&cfg.smtp)?),
        MailerBackend::Log => Arc::new(LogSender),
    })
}

pub fn build(cfg: &Config, stores: Stores, sender: Arc<dyn MailSender>) -> MailResult<Components> {
    let renderer = TemplateRenderer::new(QrCodeService::new(&cfg.qr_base_url), cfg.body_markup)?;
    let dispatcher = Dispatcher::new(
        sender,
        Arc::new(renderer),
        DispatchOptions {
            concurrency: cfg.send_concurrency,
            send_timeout: cfg.send_timeout,
            from_address: cfg.from_address.clone(),
            default_reply_to: cfg.reply_to.clone(),
        },
    );

    let drainer = Drainer::new(
        stores.queue.clone(),
        dispatcher.clone(),
        DrainOptions {
            worker_id: cfg.worker_id.clone(),
            lease_seconds: cfg.lease_seconds,
        },
    );

    Ok(Components {
        service: MailService::new(
            stores.queue.clone(),
            dispatcher,
            stores.reservations,
            stores.broadcast_logs,
        ),
        drainer,
        retention: Retention::new(stores.queue, cfg.retention_days),
    })
}

use std::env;

use anyhow::Context;
use chrono::{Duration, Utc};
use mailflow::bootstrap::{self, Stores};
use mailflow::config::Config;
use mailflow::mail::{NewMailJob, PgQueueStore, QueueStore, Recipient};
use mailflow::{db, telemetry};
use sqlx::PgPool;
use uuid::Uuid;

const USAGE: &str = "mailflowctl <command>\n\
     Commands:\n\
     - reset                     truncate mail_queue and broadcast_logs\n\
     - seed <n> [delay_secs]     enqueue n demo jobs due after delay_secs (default 0)\n\
     - drain                     run one drain pass now\n\
     - show <job_id>             print one job as JSON\n\
     - counts                    pending / due / processing / sent\n\
     \n\
     Uses DATABASE_URL (or TEST_DATABASE_URL). `drain` sends through the configured mailer\n\
     (MAILFLOW_MAILER=log to only log).\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let args: Vec<String> = env::args().collect();

    let Some(cmd) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .context("DATABASE_URL or TEST_DATABASE_URL must be set")?;
    let pool = db::make_pool(&url).await?;
    db::run_migrations(&pool).await?;
    let store = PgQueueStore::new(pool.clone());

    match cmd.as_str() {
        "reset" => reset(&pool).await?,
        "seed" => {
            let n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            let delay: i64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
            seed(&store, n, delay).await?;
        }
        "drain" => drain(pool).await?,
        "show" => {
            let id: Uuid = args
                .get(2)
                .context("usage: mailflowctl show <job_id>")?
                .parse()?;
            match store.get(id).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => println!("job {id} not found"),
            }
        }
        "counts" => {
            let c = store.counts().await?;
            println!(
                "mail_queue: pending={} due={} processing={} sent={}",
                c.pending, c.due, c.processing, c.sent
            );
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE mail_queue, broadcast_logs")
        .execute(pool)
        .await?;

    println!("reset OK");
    Ok(())
}

async fn seed(store: &PgQueueStore, n: usize, delay_secs: i64) -> anyhow::Result<()> {
    let scheduled_at = Utc::now() + Duration::seconds(delay_secs);
    for i in 0..n {
        let id = store
            .enqueue(NewMailJob {
                tenant_id: "demo".into(),
                recipients: vec![
                    Recipient::new(format!("Guest {i}a"), format!("guest{i}a@example.com"))
                        .with_id(format!("res-{i}a")),
                    Recipient::new(format!("Guest {i}b"), format!("guest{i}b@example.com")),
                ],
                subject: format!("Demo mail #{i}"),
                body_template: "all participants\nThanks for registering ({email}).\n{qr}".into(),
                sender_name: "Mailflow Demo".into(),
                tenant_name: "Demo Tenant".into(),
                tenant_logo_url: None,
                event_title: Some("Demo Meetup".into()),
                event_date: Some((scheduled_at + Duration::days(7)).to_rfc3339()),
                venue_name: Some("Community Hall".into()),
                reply_to: None,
                scheduled_at: Some(scheduled_at),
            })
            .await?;

        println!("+ enqueued job id={id} scheduled_at={scheduled_at}");
    }
    Ok(())
}

async fn drain(pool: PgPool) -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    let sender = bootstrap::make_sender(&cfg)?;
    let components = bootstrap::build(&cfg, Stores::postgres(pool), sender)?;
    let summary = components.drainer.drain(Utc::now()).await?;

    if summary.is_empty() {
        println!("nothing due");
    }
    for p in summary.processed {
        println!(
            "sent job id={} success={} failed={}",
            p.job_id, p.success, p.failed
        );
    }
    Ok(())
}

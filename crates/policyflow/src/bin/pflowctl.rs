use chrono::{DateTime, Duration, Utc};
use policyflow::config::Config;
use policyflow::jobs::{JobAlteration, JobCatalog, RoutineName, ScheduleFields};
use policyflow::pg::{self, PgJobCatalog, PgSession};
use policyflow::policy::PolicyKind;
use policyflow::time::Interval;
use policyflow::{db, job_type_counts, telemetry, PolicyEngine};
use serde_json::Value;
use std::env;

const USAGE: &str = "pflowctl <command>\n\
Commands:\n\
- migrate\n\
- jobs\n\
- counts\n\
- run <job_id>\n\
- check-config <schema.routine> <config-json>\n\
- add <reorder|retention|compression|refresh> <config-json> [schedule-interval]\n\
- alter <job_id> [--schedule-interval <interval>] [--max-runtime <interval>]\n\
        [--max-retries <n>] [--retry-period <interval>] [--scheduled <bool>]\n\
        [--config <json>] [--next-start <rfc3339>]\n\
- delete <job_id>\n\
\n\
Uses PFLOW_DATABASE_URL or DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url, 1).await?;
    if cfg.migrate_on_startup || args[1] == "migrate" {
        db::run_migrations(&pool).await?;
        if args[1] == "migrate" {
            println!("migrations applied");
            return Ok(());
        }
    }

    let engine = PolicyEngine::new(pg::services(pool.clone()));
    let jobs = PgJobCatalog::new(pool.clone());

    match args[1].as_str() {
        "jobs" => {
            for job in jobs.list_jobs().await? {
                let next_start = jobs
                    .get_run_stat(job.id)
                    .await?
                    .and_then(|s| s.next_start)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>5}  {:<40} scheduled={:<5} interval={} next_start={} config={}",
                    job.id,
                    job.routine,
                    job.scheduled,
                    Interval::from_duration(job.schedule_interval),
                    next_start,
                    job.config.map(|c| c.to_string()).unwrap_or_default(),
                );
            }
        }
        "counts" => {
            let counts = job_type_counts(&jobs.list_jobs().await?);
            println!("{counts:#?}");
        }
        "run" => {
            let job_id = parse_job_id(args.get(2))?;
            let mut session = PgSession::acquire(&pool).await?;
            let res = engine.run_job(&mut session, job_id).await;
            session.close().await?;
            let report = res?;
            println!(
                "job {} ran as {:?} (started_transaction={} pushed_snapshot={})",
                report.job_id,
                report.kind,
                report.bookkeeping.started_transaction,
                report.bookkeeping.pushed_snapshot
            );
        }
        "check-config" => {
            let routine = parse_routine(arg(&args, 2, "check-config <schema.routine> <json>")?)?;
            let config = parse_json(arg(&args, 3, "check-config <schema.routine> <json>")?)?;
            match engine.check_config(&routine, &config, Utc::now()).await? {
                Some(kind) => println!("config OK for {}", kind.proc_name()),
                None => println!("{routine} is a user-defined action; nothing to check"),
            }
        }
        "add" => {
            let usage = "add <kind> <config-json> [schedule-interval]";
            let kind = parse_kind(arg(&args, 2, usage)?)?;
            let config = parse_json(arg(&args, 3, usage)?)?;
            let schedule_interval = match args.get(4) {
                Some(s) => parse_interval(s)?,
                None => Duration::days(1),
            };
            let routine = kind.routine();
            engine.check_config(&routine, &config, Utc::now()).await?;

            let hypertable_id = config
                .get("hypertable_id")
                .or_else(|| config.get("mat_hypertable_id"))
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok());
            let fields = ScheduleFields {
                schedule_interval,
                max_runtime: Duration::zero(),
                max_retries: -1,
                retry_period: Duration::minutes(5),
                scheduled: true,
                config: Some(config),
            };
            let app_name = format!("{} [{}]", kind.proc_name(), hypertable_id.unwrap_or(0));
            let id = jobs
                .insert_job(&app_name, &routine, &fields, hypertable_id)
                .await?;
            println!("added job {id} ({routine})");
        }
        "alter" => {
            let job_id = parse_job_id(args.get(2))?;
            let alteration = parse_alteration(&args[3..])?;
            let altered = engine.alter_job(job_id, alteration, Utc::now()).await?;
            println!(
                "job {} scheduled={} interval={} next_start={}",
                altered.job.id,
                altered.job.scheduled,
                Interval::from_duration(altered.job.schedule_interval),
                altered
                    .next_start
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        "delete" => {
            let job_id = parse_job_id(args.get(2))?;
            if jobs.delete_job(job_id).await? {
                println!("deleted job {job_id}");
            } else {
                anyhow::bail!("job {job_id} not found");
            }
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], idx: usize, usage: &str) -> anyhow::Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("usage: pflowctl {usage}"))
}

fn parse_job_id(s: Option<&String>) -> anyhow::Result<i32> {
    let s = s.ok_or_else(|| anyhow::anyhow!("missing <job_id>"))?;
    Ok(s.parse()?)
}

fn parse_json(s: &str) -> anyhow::Result<Value> {
    serde_json::from_str(s).map_err(|e| anyhow::anyhow!("invalid config json: {e}"))
}

fn parse_interval(s: &str) -> anyhow::Result<Duration> {
    Interval::parse(s)
        .map(|i| i.to_duration())
        .ok_or_else(|| anyhow::anyhow!("invalid interval: {s:?}"))
}

fn parse_routine(s: &str) -> anyhow::Result<RoutineName> {
    let (schema, name) = s
        .split_once('.')
        .ok_or_else(|| anyhow::anyhow!("routine must be schema-qualified: {s:?}"))?;
    Ok(RoutineName::new(schema, name))
}

fn parse_kind(s: &str) -> anyhow::Result<PolicyKind> {
    Ok(match s {
        "reorder" => PolicyKind::Reorder,
        "retention" => PolicyKind::Retention,
        "compression" => PolicyKind::Compression,
        "refresh" => PolicyKind::Refresh,
        other => anyhow::bail!("unknown policy kind: {other}"),
    })
}

fn parse_alteration(flags: &[String]) -> anyhow::Result<JobAlteration> {
    let mut alteration = JobAlteration::default();
    let mut it = flags.iter();

    while let Some(flag) = it.next() {
        let value = it
            .next()
            .ok_or_else(|| anyhow::anyhow!("{flag} needs a value"))?;
        match flag.as_str() {
            "--schedule-interval" => alteration.schedule_interval = Some(parse_interval(value)?),
            "--max-runtime" => alteration.max_runtime = Some(parse_interval(value)?),
            "--max-retries" => alteration.max_retries = Some(value.parse()?),
            "--retry-period" => alteration.retry_period = Some(parse_interval(value)?),
            "--scheduled" => alteration.scheduled = Some(value.parse()?),
            "--config" => alteration.config = Some(parse_json(value)?),
            "--next-start" => {
                alteration.next_start = Some(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
            }
            other => anyhow::bail!("unknown flag: {other}"),
        }
    }

    Ok(alteration)
}

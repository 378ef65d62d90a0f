use anyhow::Result;
use spectrumscraper::{
    browser::chromium::ChromiumSession,
    config::Config,
    error::PipelineError,
    fetch::TabulaCli,
    init_logging, output,
    pipeline::RunContext,
};
use std::env;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    init_logging();
    info!("startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) configuration ────────────────────────────────────────────
    let cfg = Config::load(None)?;
    let category = env::args()
        .nth(1)
        .or_else(|| env::var("SPECTRUM_CATEGORY").ok());

    // ─── 3) browser + extractor ──────────────────────────────────────
    let session =
        ChromiumSession::launch(&cfg.browser, &cfg.download_dir, cfg.waits.element()).await?;
    let mut ctx = RunContext::new(session, TabulaCli::new(&cfg.tabula), cfg.clone());

    let Some(category) = category else {
        let categories = ctx.categories().await;
        ctx.session.close().await?;
        println!("Choose one of the following licence categories:");
        for c in categories? {
            println!("  {c}");
        }
        return Ok(());
    };

    // ─── 4) stop cleanly on Ctrl-C ───────────────────────────────────
    let cancel = ctx.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current record");
            cancel.cancel();
        }
    });

    // ─── 5) run both pipelines ───────────────────────────────────────
    let result = ctx.run(&category).await;
    if let Err(e) = ctx.session.close().await {
        warn!(error = %e, "closing browser");
    }

    let report = match result {
        Ok(report) => report,
        Err(PipelineError::NoRecords(category)) => {
            println!("There are no active licences in category {category:?}.");
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "run failed");
            return Err(e.into());
        }
    };

    // ─── 6) write datasets ───────────────────────────────────────────
    let written = output::write_report(&report, &cfg.output_dir, cfg.output_format)?;
    for path in &written {
        println!("{}", path.display());
    }
    if report.summary.cancelled {
        warn!("run was cancelled; datasets are partial");
    }
    if !report.summary.errors.is_empty() {
        warn!(
            errors = report.summary.errors.len(),
            "some records were skipped; see the run summary"
        );
    }
    info!("done");
    Ok(())
}

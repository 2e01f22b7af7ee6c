pub mod board;
pub mod cli;
pub mod client;
pub mod clock;
pub mod commands;
pub mod config;
pub mod credential;
pub mod datetime;
pub mod error;
pub mod remote;
pub mod render;
pub mod session;
pub mod users;
pub mod workspaces;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::clock::{
  Clock,
  SystemClock
};
use crate::remote::HttpRemote;
use crate::session::{
  FileSlot,
  SessionManager,
  TokioScheduler
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting corkboard CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let runtime =
    tokio::runtime::Builder::new_multi_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async {
    let remote = HttpRemote::new(
      &cfg.api_base_url(),
      cfg.api_timeout()?
    )
    .context(
      "failed to configure the board \
       service client"
    )?;
    let clock: Arc<dyn Clock> =
      Arc::new(SystemClock);
    let (scheduler, mut renewals) =
      TokioScheduler::channel();
    let session = SessionManager::new(
      FileSlot::in_dir(&data_dir),
      scheduler,
      clock.clone()
    )
    .with_skew(cfg.session_skew()?);

    let mut client =
      client::BoardClient::new(
        Arc::new(remote),
        session,
        clock,
        cfg.page_size(
          "users.page_size",
          users::DEFAULT_PAGE_SIZE
        )?,
        cfg.page_size(
          "workspaces.page_size",
          workspaces::DEFAULT_PAGE_SIZE
        )?
      );

    commands::dispatch(
      &mut client,
      &mut renderer,
      &mut renewals,
      inv
    )
    .await
  })?;

  info!("done");
  Ok(())
}

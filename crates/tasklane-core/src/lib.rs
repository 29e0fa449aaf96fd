pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod effects;
pub mod error;
pub mod model;
pub mod prompt;
pub mod reconcile;
pub mod render;
pub mod scheduler;
pub mod storage;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod theme;
pub mod timers;
pub mod windows;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::app::{
  App,
  AppOptions
};
use crate::effects::TerminalEffects;
use crate::prompt::{
  AutoConfirm,
  Prompter,
  TerminalPrompter
};
use crate::storage::{
  FileStore,
  Persistence
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
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
    "starting tasklane CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
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

  let store = FileStore::open(
    &data_dir
  )
  .with_context(|| {
    format!(
      "failed to open data store at \
       {}",
      data_dir.display()
    )
  })?;

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv =
    cli::Invocation::parse(cli.rest)?;

  let prompter: Box<dyn Prompter> =
    if cli.yes {
      Box::new(AutoConfirm)
    } else {
      Box::new(TerminalPrompter)
    };
  let mut app = App::open(
    Persistence::new(store),
    prompter,
    TerminalEffects,
    AppOptions::from_config(&cfg)
  );

  commands::dispatch(
    &mut app,
    &renderer,
    inv
  )?;

  let flushed = app.flush_pending();
  if !flushed.is_empty() {
    debug!(
      count = flushed.len(),
      "applied pending removals on exit"
    );
    renderer.render(&app, &flushed)?;
  }
  app.shutdown();

  info!("done");
  Ok(())
}
